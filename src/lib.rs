// screengate: desktop screen acquisition and change triage.
//
// Two halves share one image model. The capture half grabs the desktop
// through whatever the platform offers (desktop duplication, the
// compositor capture API or a plain blit on Windows; XShm or the
// screenshot portal on Linux; CoreGraphics on macOS) and normalizes
// every path to tightly packed BGR24. The triage half scores each frame
// for change (pixel diff, color shift, sparse optical flow) so hosts
// only wake their expensive vision stages when something actually
// happened.

pub mod capture;
pub mod error;
pub mod imageops;
pub mod triage;
pub mod types;

pub use capture::{CaptureBackend, CaptureOptions, CaptureOutput, ScreenCapture};
pub use error::{CaptureError, Result};
pub use triage::{TriageConfig, TriageEngine, TriageResult};
pub use types::{DisplayInfo, Frame, PixelLayout, ProcessingLayer, Rect, WindowHandle};
