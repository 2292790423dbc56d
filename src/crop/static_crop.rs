use anyhow::{anyhow, Result};
use image::RgbImage;
use nalgebra::Matrix3;

use crate::compositor::warp_affine;
use crate::config::CropSettings;
use crate::crop::cropper::{CropInfo, FaceCropper};
use crate::keypoints::Landmarks;

/// Cropper for faces whose landmarks are already known.
///
/// With source landmarks (original-frame coordinates) the crop is a square of
/// side `max(bbox_w, bbox_h) · scale` centred on the landmark box, shifted by
/// `(vx_ratio, vy_ratio)` times the box side. Without landmarks it is the
/// centred square of side `min(width, height)` and the crop carries no
/// landmarks.
pub struct StaticCropper {
    settings: CropSettings,
    source_landmarks: Option<Landmarks>,
    driving_landmarks: Vec<Landmarks>,
}

impl StaticCropper {
    pub fn new(settings: CropSettings) -> Self {
        Self {
            settings,
            source_landmarks: None,
            driving_landmarks: Vec::new(),
        }
    }

    pub fn with_source_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.source_landmarks = Some(landmarks);
        self
    }

    pub fn with_driving_landmarks(mut self, landmarks: Vec<Landmarks>) -> Self {
        self.driving_landmarks = landmarks;
        self
    }

    /// `(centre_x, centre_y, side)` of the crop square in original coordinates.
    fn crop_region(&self, width: u32, height: u32) -> (f32, f32, f32) {
        match self.source_landmarks.as_ref().and_then(|l| l.bounds()) {
            Some((x0, y0, x1, y1)) => {
                let box_side = (x1 - x0).max(y1 - y0).max(1.0);
                let cx = (x0 + x1) / 2.0 + self.settings.vx_ratio * box_side;
                let cy = (y0 + y1) / 2.0 + self.settings.vy_ratio * box_side;
                (cx, cy, box_side * self.settings.scale)
            }
            None => {
                let side = width.min(height) as f32;
                (width as f32 / 2.0, height as f32 / 2.0, side)
            }
        }
    }
}

impl FaceCropper for StaticCropper {
    fn name(&self) -> &'static str {
        "static"
    }

    fn crop_single_image(&mut self, frame: &RgbImage) -> Result<CropInfo> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("cannot crop an empty frame"));
        }
        let dsize = self.settings.dsize;
        let (cx, cy, side) = self.crop_region(frame.width(), frame.height());
        let s = side / dsize as f32;
        let x0 = cx - side / 2.0;
        let y0 = cy - side / 2.0;

        #[rustfmt::skip]
        let crop_to_original = Matrix3::new(
            s,   0.0, x0,
            0.0, s,   y0,
            0.0, 0.0, 1.0,
        );
        #[rustfmt::skip]
        let original_to_crop = Matrix3::new(
            1.0 / s, 0.0,     -x0 / s,
            0.0,     1.0 / s, -y0 / s,
            0.0,     0.0,     1.0,
        );

        let image = warp_affine(frame, &original_to_crop, dsize, dsize)?;
        let landmarks = self
            .source_landmarks
            .as_ref()
            .map(|lmk| lmk.transformed(&original_to_crop))
            .unwrap_or_default();

        Ok(CropInfo {
            image,
            landmarks,
            crop_to_original,
        })
    }

    fn retargeting_landmarks(&mut self, frames: &[RgbImage]) -> Result<Vec<Landmarks>> {
        if self.driving_landmarks.len() != frames.len() {
            return Err(anyhow!(
                "static cropper holds {} driving landmark sets for {} frames",
                self.driving_landmarks.len(),
                frames.len()
            ));
        }
        Ok(self.driving_landmarks.clone())
    }
}
