use std::f32::consts::PI;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array4, ArrayD, Axis, Ix4};

use crate::keypoints::Keypoints;
use crate::model::backend::{
    AppearanceExtractor, Decoder, ModelBundle, MotionOutput, PoseExtractor, RetargetKind,
    Retargeter,
};

/// Deterministic stand-ins for every neural module.
///
/// Equal inputs give bit-identical outputs, which lets the engine be tested
/// end to end without model weights.
pub fn stub_bundle(num_keypoints: usize) -> ModelBundle {
    ModelBundle {
        appearance: Box::new(StubAppearanceExtractor),
        motion: Box::new(StubPoseExtractor::new(num_keypoints)),
        decoder: Box::new(StubDecoder),
        retargeter: Box::new(StubRetargeter::default()),
    }
}

fn channel_means(input: &Array4<f32>) -> [f32; 3] {
    let mut means = [0.0; 3];
    for (c, mean) in means.iter_mut().enumerate() {
        *mean = input.index_axis(Axis(1), c).mean().unwrap_or(0.0);
    }
    means
}

/// Pose derived from per-channel image means; canonical keypoints sit on a
/// fixed ring.
pub struct StubPoseExtractor {
    num_keypoints: usize,
}

impl StubPoseExtractor {
    pub fn new(num_keypoints: usize) -> Self {
        Self { num_keypoints }
    }
}

impl PoseExtractor for StubPoseExtractor {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn extract(&self, input: &Array4<f32>) -> Result<MotionOutput> {
        let [r, g, b] = channel_means(input);
        let n = self.num_keypoints;

        let mut kp = Vec::with_capacity(n * 3);
        let mut exp = Vec::with_capacity(n * 3);
        for i in 0..n {
            let frac = i as f32 / n as f32;
            let angle = 2.0 * PI * frac;
            kp.extend([0.5 * angle.cos(), 0.5 * angle.sin(), (frac - 0.5) * 0.1]);
            exp.extend([
                (r - 0.5) * 0.02 * (i % 3) as f32,
                (g - 0.5) * 0.02,
                (b - 0.5) * 0.01,
            ]);
        }

        Ok(MotionOutput {
            kp,
            exp,
            pitch: (r - 0.5) * 30.0,
            yaw: (g - 0.5) * 30.0,
            roll: (b - 0.5) * 10.0,
            scale: 1.0 + 0.2 * (r + g + b) / 3.0,
            translation: [(r - b) * 0.1, (g - b) * 0.1, 0.05],
        })
    }
}

/// Returns the prepared input as the feature volume.
pub struct StubAppearanceExtractor;

impl AppearanceExtractor for StubAppearanceExtractor {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn extract(&self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        Ok(input.clone().into_dyn())
    }
}

/// Shifts the feature volume by the mean keypoint displacement.
pub struct StubDecoder;

impl Decoder for StubDecoder {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn warp_decode(
        &self,
        features: &ArrayD<f32>,
        kp_source: &Keypoints,
        kp_driving: &Keypoints,
    ) -> Result<Array4<f32>> {
        let image = features
            .clone()
            .into_dimensionality::<Ix4>()
            .context("stub decoder expects a (1, 3, H, W) feature volume")?;
        let mean = |kp: &Keypoints| kp.as_array().mean().unwrap_or(0.0);
        let shift = mean(kp_driving) - mean(kp_source);
        Ok(image.mapv(|v| (v + shift).clamp(0.0, 1.0)))
    }
}

/// Small deltas proportional to the ratio or keypoint differences.
pub struct StubRetargeter {
    gain: f32,
}

impl Default for StubRetargeter {
    fn default() -> Self {
        Self { gain: 0.01 }
    }
}

impl StubRetargeter {
    pub fn with_gain(gain: f32) -> Self {
        Self { gain }
    }
}

impl Retargeter for StubRetargeter {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn run(&self, kind: RetargetKind, input: &[f32]) -> Result<Vec<f32>> {
        let mean = |v: &[f32]| {
            if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f32>() / v.len() as f32
            }
        };
        match kind {
            RetargetKind::Stitching => {
                if input.is_empty() || input.len() % 2 != 0 {
                    return Err(anyhow!(
                        "stitching input must hold two keypoint sets, got {} values",
                        input.len()
                    ));
                }
                let (src, drv) = input.split_at(input.len() / 2);
                let d = self.gain * (mean(drv) - mean(src));
                let mut out = vec![d; src.len()];
                out.extend([self.gain, -self.gain]);
                Ok(out)
            }
            RetargetKind::Eye => {
                let (kp, ratio) = split_ratio(input, 3)?;
                let d = self.gain * (ratio[2] - (ratio[0] + ratio[1]) / 2.0);
                Ok(vec![d; kp.len()])
            }
            RetargetKind::Lip => {
                let (kp, ratio) = split_ratio(input, 2)?;
                let d = self.gain * (ratio[1] - ratio[0]);
                Ok(vec![d; kp.len()])
            }
        }
    }
}

fn split_ratio(input: &[f32], ratio_len: usize) -> Result<(&[f32], &[f32])> {
    if input.len() <= ratio_len {
        return Err(anyhow!(
            "retargeting input too short: {} values for a ratio of {}",
            input.len(),
            ratio_len
        ));
    }
    Ok(input.split_at(input.len() - ratio_len))
}
