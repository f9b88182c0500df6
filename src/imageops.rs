// Image-processing utility layer.
//
// Shared by the capture path (output shaping, encoding) and the triage
// path (input downsampling, gray conversion). All operations take and
// return [`Frame`](crate::types::Frame) values; the `image` crate does the
// heavy lifting behind the scenes.

mod convert;
mod encode;
mod resize;

pub use convert::convert;
pub use encode::{encode_jpeg, encode_png};
pub use resize::{
    adaptive_resolution, apply_resolution_control, optimal_resolution, resize,
    resize_and_crop, resize_keep_aspect, Interpolation, ResolutionPolicy,
};

pub(crate) use convert::{from_dynamic, to_dynamic, to_gray_image, to_rgb_image};
