use anyhow::Result;
use image::RgbImage;
use nalgebra::Matrix3;

use crate::keypoints::Landmarks;

/// Crop of one source frame.
///
/// Valid for the frame it was produced from; the engine only reuses it when
/// the source is a single static image.
#[derive(Clone, Debug)]
pub struct CropInfo {
    /// Aligned crop at the configured crop size.
    pub image: RgbImage,
    /// Landmarks in crop coordinates.
    pub landmarks: Landmarks,
    /// Homogeneous affine transform from crop to original coordinates.
    pub crop_to_original: Matrix3<f32>,
}

/// Face crop collaborator.
pub trait FaceCropper: Send {
    /// Cropper identifier.
    fn name(&self) -> &'static str;

    /// Crop one source frame.
    fn crop_single_image(&mut self, frame: &RgbImage) -> Result<CropInfo>;

    /// Retargeting landmarks for each driving frame, in order.
    ///
    /// Only called when eye or lip retargeting is enabled.
    fn retargeting_landmarks(&mut self, frames: &[RgbImage]) -> Result<Vec<Landmarks>>;
}
