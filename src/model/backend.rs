use anyhow::Result;
use ndarray::{Array4, ArrayD};

use crate::keypoints::Keypoints;

/// Raw motion extractor output for one frame.
///
/// Angles are already converted to degrees; `kp` and `exp` are flat
/// `[x0, y0, z0, x1, ...]` vectors.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionOutput {
    pub kp: Vec<f32>,
    pub exp: Vec<f32>,
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
    pub scale: f32,
    pub translation: [f32; 3],
}

/// Which stitching/retargeting head to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetargetKind {
    /// Input `[kp_source, kp_driving]`, output `3N + 2`.
    Stitching,
    /// Input `[kp_source, eye ratio ×3]`, output `3N`.
    Eye,
    /// Input `[kp_source, lip ratio ×2]`, output `3N`.
    Lip,
}

/// Head-pose and keypoint extraction.
///
/// Implementations are frozen networks: the same input always yields the same
/// output and no call mutates backend state.
pub trait PoseExtractor: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run on a `(1, 3, H, W)` tensor in `[0, 1]`.
    fn extract(&self, input: &Array4<f32>) -> Result<MotionOutput>;
}

/// 3D appearance feature extraction.
pub trait AppearanceExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run on a `(1, 3, H, W)` tensor; the result keeps the batch axis first.
    fn extract(&self, input: &Array4<f32>) -> Result<ArrayD<f32>>;
}

/// Warping network followed by the image generator.
pub trait Decoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Warp `features` from `kp_source` to `kp_driving` and decode to a
    /// `(1, 3, H, W)` image tensor in `[0, 1]`.
    fn warp_decode(
        &self,
        features: &ArrayD<f32>,
        kp_source: &Keypoints,
        kp_driving: &Keypoints,
    ) -> Result<Array4<f32>>;
}

/// Stitching and eye/lip retargeting heads.
pub trait Retargeter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one head on its flat, already concatenated input.
    fn run(&self, kind: RetargetKind, input: &[f32]) -> Result<Vec<f32>>;
}

/// The full set of neural modules the wrapper drives.
pub struct ModelBundle {
    pub appearance: Box<dyn AppearanceExtractor>,
    pub motion: Box<dyn PoseExtractor>,
    pub decoder: Box<dyn Decoder>,
    pub retargeter: Box<dyn Retargeter>,
}

/// Number of head-pose bins emitted per angle.
pub const HEADPOSE_BINS: usize = 66;

/// Expected angle in degrees from head-pose bin logits.
pub fn headpose_bins_to_degrees(logits: &[f32]) -> f32 {
    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let sum_exps: f32 = exps.iter().sum();
    let expected: f32 = exps
        .iter()
        .enumerate()
        .map(|(i, &e)| e / sum_exps * i as f32)
        .sum();
    expected * 3.0 - 97.5
}
