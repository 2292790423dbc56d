use std::borrow::Cow;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use nalgebra::Vector3;
use ndarray::{Array4, ArrayD};

use crate::error::ShapeError;
use crate::keypoints::{KeypointInfo, Keypoints};
use crate::model::backend::{ModelBundle, RetargetKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WrapperSettings {
    /// Square network input resolution.
    pub input_size: u32,
    pub num_keypoints: usize,
}

impl Default for WrapperSettings {
    fn default() -> Self {
        Self {
            input_size: crate::config::DEFAULT_INPUT_SIZE,
            num_keypoints: crate::keypoints::NUM_KEYPOINTS,
        }
    }
}

/// Numeric glue between images, keypoints and the neural modules.
///
/// Every operation is a pure function of its inputs and the frozen backends.
/// Shape contract violations surface as [`ShapeError`] rather than being
/// broadcast away.
pub struct ModelWrapper {
    models: ModelBundle,
    settings: WrapperSettings,
}

impl ModelWrapper {
    pub fn new(models: ModelBundle, settings: WrapperSettings) -> Self {
        log::info!(
            "model wrapper: appearance={} motion={} decoder={} retargeter={} input={} kp={}",
            models.appearance.name(),
            models.motion.name(),
            models.decoder.name(),
            models.retargeter.name(),
            settings.input_size,
            settings.num_keypoints
        );
        Self { models, settings }
    }

    pub fn num_keypoints(&self) -> usize {
        self.settings.num_keypoints
    }

    /// Resize to the network input and normalise to a `(1, 3, n, n)` tensor in `[0, 1]`.
    pub fn prepare(&self, image: &RgbImage) -> Array4<f32> {
        let n = self.settings.input_size;
        let resized = if image.dimensions() == (n, n) {
            Cow::Borrowed(image)
        } else {
            Cow::Owned(imageops::resize(image, n, n, FilterType::Triangle))
        };
        let n = n as usize;
        Array4::from_shape_fn((1, 3, n, n), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
    }

    fn check_input(&self, what: &'static str, input: &Array4<f32>) -> Result<(), ShapeError> {
        let n = self.settings.input_size as usize;
        let expected = [1, 3, n, n];
        if input.shape() != expected {
            return Err(ShapeError::Tensor {
                what,
                expected: expected.to_vec(),
                got: input.shape().to_vec(),
            });
        }
        Ok(())
    }

    pub fn extract_pose(&self, input: &Array4<f32>) -> Result<KeypointInfo> {
        self.check_input("motion input", input)?;
        let out = self
            .models
            .motion
            .extract(input)
            .context("motion extractor failed")?;
        let n = self.settings.num_keypoints;
        Ok(KeypointInfo {
            canonical: Keypoints::from_flat("canonical keypoints", &out.kp, n)?,
            pitch: out.pitch,
            yaw: out.yaw,
            roll: out.roll,
            scale: out.scale,
            translation: Vector3::from(out.translation),
            expression: Keypoints::from_flat("expression", &out.exp, n)?,
        })
    }

    pub fn extract_appearance_features(&self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        self.check_input("appearance input", input)?;
        let features = self
            .models
            .appearance
            .extract(input)
            .context("appearance extractor failed")?;
        let batch = features.shape().first().copied().unwrap_or(0);
        if batch != 1 {
            return Err(ShapeError::Batch {
                what: "appearance features",
                expected: 1,
                got: batch,
            }
            .into());
        }
        Ok(features)
    }

    /// `scale · (kp · R + exp)` followed by an x/y translation.
    pub fn project_canonical(&self, info: &KeypointInfo) -> Result<Keypoints> {
        let projected = info
            .canonical
            .rotate(&info.rotation())
            .checked_add(&info.expression)?
            .scaled(info.scale)
            .translated_xy(info.translation.x, info.translation.y);
        Ok(projected)
    }

    /// Eye delta from `[src_left, src_right, driving]` ratios.
    pub fn retarget_eye(&self, kp_source: &Keypoints, ratio: &[f32; 3]) -> Result<Keypoints> {
        self.retarget(RetargetKind::Eye, "eye delta", kp_source, ratio)
    }

    /// Lip delta from `[src_lip, driving]` ratios.
    pub fn retarget_lip(&self, kp_source: &Keypoints, ratio: &[f32; 2]) -> Result<Keypoints> {
        self.retarget(RetargetKind::Lip, "lip delta", kp_source, ratio)
    }

    fn retarget(
        &self,
        kind: RetargetKind,
        what: &'static str,
        kp_source: &Keypoints,
        ratio: &[f32],
    ) -> Result<Keypoints> {
        let mut input = kp_source.to_flat();
        input.extend_from_slice(ratio);
        let delta = self
            .models
            .retargeter
            .run(kind, &input)
            .with_context(|| format!("{what} network failed"))?;
        Ok(Keypoints::from_flat(what, &delta, kp_source.len())?)
    }

    /// Stitching correction of `kp_driving` against `kp_source`.
    pub fn stitch(&self, kp_source: &Keypoints, kp_driving: &Keypoints) -> Result<Keypoints> {
        let n = kp_driving.len();
        if kp_source.len() != n {
            return Err(ShapeError::KeypointCount {
                left: kp_source.len(),
                right: n,
            }
            .into());
        }
        let mut input = kp_source.to_flat();
        input.extend(kp_driving.to_flat());
        let delta = self
            .models
            .retargeter
            .run(RetargetKind::Stitching, &input)
            .context("stitching network failed")?;

        let expected = 3 * n + 2;
        if delta.len() != expected {
            return Err(ShapeError::ValueCount {
                what: "stitching delta",
                expected,
                got: delta.len(),
            }
            .into());
        }
        let delta_exp = Keypoints::from_flat("stitching delta", &delta[..3 * n], n)?;
        Ok(kp_driving
            .checked_add(&delta_exp)?
            .translated_xy(delta[3 * n], delta[3 * n + 1]))
    }

    pub fn decode(
        &self,
        features: &ArrayD<f32>,
        kp_source: &Keypoints,
        kp_driving: &Keypoints,
    ) -> Result<Array4<f32>> {
        if kp_source.len() != kp_driving.len() {
            return Err(ShapeError::KeypointCount {
                left: kp_source.len(),
                right: kp_driving.len(),
            }
            .into());
        }
        let out = self
            .models
            .decoder
            .warp_decode(features, kp_source, kp_driving)
            .context("warp/decode failed")?;
        if out.shape()[0] != 1 || out.shape()[1] != 3 {
            return Err(ShapeError::Tensor {
                what: "decoded image",
                expected: vec![1, 3, out.shape()[2], out.shape()[3]],
                got: out.shape().to_vec(),
            }
            .into());
        }
        Ok(out)
    }

    /// `(1, 3, H, W)` in `[0, 1]` to an 8-bit image; values are clipped then truncated.
    pub fn to_image(&self, tensor: &Array4<f32>) -> Result<RgbImage> {
        let shape = tensor.shape();
        if shape[0] != 1 || shape[1] != 3 {
            return Err(ShapeError::Tensor {
                what: "image tensor",
                expected: vec![1, 3, shape[2], shape[3]],
                got: shape.to_vec(),
            }
            .into());
        }
        let (height, width) = (shape[2] as u32, shape[3] as u32);
        Ok(RgbImage::from_fn(width, height, |x, y| {
            let px = |c: usize| {
                (tensor[[0, c, y as usize, x as usize]].clamp(0.0, 1.0) * 255.0) as u8
            };
            Rgb([px(0), px(1), px(2)])
        }))
    }
}
