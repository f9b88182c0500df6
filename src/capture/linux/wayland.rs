// Wayland capture through the org.freedesktop.portal.Screenshot portal.
//
// Strictly synchronous: call Screenshot on the session bus, wait for the
// Response signal on the request object, read the PNG the portal wrote,
// delete it. The blocking wait is bounded by the portal's own timeout.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use zbus::blocking::{Connection, Proxy};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

use crate::imageops;
use crate::types::{Frame, PixelLayout};

const PORTAL_DEST: &str = "org.freedesktop.portal.Desktop";
const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";

/// Distinguishes concurrent requests from the same connection.
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One synchronous screenshot round trip. Returns the whole virtual
/// desktop as a BGR frame.
pub(super) fn take_screenshot() -> Result<Frame> {
    let connection = Connection::session().context("session bus connection failed")?;

    // The request object path is derivable from our unique name and the
    // handle token; subscribing before the call avoids losing a fast
    // response.
    let unique = connection
        .unique_name()
        .context("connection has no unique name")?
        .to_string();
    let sender = unique.trim_start_matches(':').replace('.', "_");
    let token = format!(
        "screengate_{}",
        REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let expected_path = format!("/org/freedesktop/portal/desktop/request/{sender}/{token}");

    let request_proxy = Proxy::new(
        &connection,
        PORTAL_DEST,
        expected_path.as_str(),
        "org.freedesktop.portal.Request",
    )
    .context("request proxy creation failed")?;
    let mut responses = request_proxy
        .receive_signal("Response")
        .context("Response signal subscription failed")?;

    let screenshot_proxy = Proxy::new(
        &connection,
        PORTAL_DEST,
        PORTAL_PATH,
        "org.freedesktop.portal.Screenshot",
    )
    .context("screenshot proxy creation failed")?;

    let mut options: HashMap<&str, Value> = HashMap::new();
    options.insert("handle_token", Value::from(token.as_str()));
    options.insert("interactive", Value::from(false));

    let request_path: OwnedObjectPath = screenshot_proxy
        .call("Screenshot", &("", options))
        .context("Screenshot call failed; is xdg-desktop-portal running?")?;

    // Older portals may hand back a different request path; re-subscribe
    // on the actual one.
    if request_path.as_str() != expected_path {
        log::debug!("portal returned non-derived request path {request_path}");
        let actual_proxy = Proxy::new(
            &connection,
            PORTAL_DEST,
            request_path.as_str().to_owned(),
            "org.freedesktop.portal.Request",
        )
        .context("request proxy creation failed")?;
        responses = actual_proxy
            .receive_signal("Response")
            .context("Response signal subscription failed")?;
    }

    let message = responses
        .next()
        .context("session bus closed before the portal responded")?;
    let (code, results): (u32, HashMap<String, OwnedValue>) = message
        .body()
        .deserialize()
        .context("malformed portal response")?;

    if code != 0 {
        bail!("portal refused the screenshot (response code {code})");
    }

    let uri = results
        .get("uri")
        .and_then(|value| <&str>::try_from(value).ok().map(String::from))
        .context("portal response carries no uri")?;

    load_screenshot_file(&uri)
}

/// Decode the portal's PNG and convert it to BGR; the temp file is
/// removed on success.
fn load_screenshot_file(uri: &str) -> Result<Frame> {
    let path = uri
        .strip_prefix("file://")
        .map(percent_decode)
        .with_context(|| format!("unexpected screenshot uri scheme: {uri}"))?;

    let decoded = image::open(&path).with_context(|| format!("cannot decode {path}"))?;
    let rgb = decoded.to_rgb8();
    let (width, height) = (rgb.width(), rgb.height());

    let frame = Frame {
        data: rgb.into_raw(),
        width,
        height,
        layout: PixelLayout::Rgb24,
        stride: 0,
    };
    let frame = imageops::convert(&frame, PixelLayout::Bgr24)?;

    if let Err(err) = fs::remove_file(&path) {
        log::debug!("screenshot temp file not removed: {err}");
    }

    Ok(frame)
}

/// Minimal percent decoding for file URIs (spaces and similar).
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::percent_decode;

    #[test]
    fn decodes_escaped_spaces() {
        assert_eq!(
            percent_decode("/home/u/Pictures/Screenshot%20from%20today.png"),
            "/home/u/Pictures/Screenshot from today.png"
        );
    }

    #[test]
    fn passes_plain_paths_through() {
        assert_eq!(percent_decode("/tmp/shot.png"), "/tmp/shot.png");
        assert_eq!(percent_decode("100%"), "100%");
    }
}
