//! Face crop collaborator.
//!
//! The cropper turns a source frame into an aligned crop, its landmarks and
//! the crop→original transform used by paste-back. Face detection itself lives
//! behind the [`FaceCropper`] trait; [`StaticCropper`] covers callers that
//! already know where the face is.

mod cropper;
mod static_crop;

pub use cropper::{CropInfo, FaceCropper};
pub use static_crop::StaticCropper;
