//! Precomputed driving motion.
//!
//! A template stores the driving pose of every frame of a clip so the clip
//! can animate many source images without re-running pose extraction. It is
//! persisted as JSON with a format version and a SHA-256 digest over the
//! frame records and landmarks; `load` refuses anything that does not verify.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use indicatif::ProgressBar;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::keypoints::{DrivingPose, Keypoints, Landmarks};
use crate::model::ModelWrapper;

pub const TEMPLATE_VERSION: u32 = 1;

/// Driving pose of one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateFrame {
    pub n_frames: usize,
    pub frame_index: usize,
    pub scale: f32,
    /// Row-major rotation matrix.
    pub rotation_matrix: [[f32; 3]; 3],
    /// Flat `N × 3` expression deltas.
    pub expression: Vec<f32>,
    pub translation: [f32; 3],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionTemplate {
    pub version: u32,
    pub frames: Vec<TemplateFrame>,
    /// Retargeting landmarks, one set per frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Landmarks>>,
    pub digest: String,
}

impl MotionTemplate {
    /// Build a sealed template from frame records.
    pub fn from_frames(frames: Vec<TemplateFrame>, landmarks: Option<Vec<Landmarks>>) -> Self {
        let digest = compute_digest(&frames, landmarks.as_deref());
        Self {
            version: TEMPLATE_VERSION,
            frames,
            landmarks,
            digest,
        }
    }

    /// Extract driving poses from `frames`.
    ///
    /// `landmarks`, when given, must hold one set per frame.
    pub fn extract(
        wrapper: &ModelWrapper,
        frames: &[RgbImage],
        landmarks: Option<Vec<Landmarks>>,
        progress: &ProgressBar,
    ) -> Result<Self> {
        if let Some(lmk) = &landmarks {
            if lmk.len() != frames.len() {
                return Err(anyhow!(
                    "got {} landmark sets for {} driving frames",
                    lmk.len(),
                    frames.len()
                ));
            }
        }

        let n_frames = frames.len();
        progress.set_length(n_frames as u64);
        let mut records = Vec::with_capacity(n_frames);
        for (frame_index, frame) in frames.iter().enumerate() {
            let input = wrapper.prepare(frame);
            let info = wrapper
                .extract_pose(&input)
                .with_context(|| format!("pose extraction failed on driving frame {frame_index}"))?;
            let r = info.rotation();
            records.push(TemplateFrame {
                n_frames,
                frame_index,
                scale: info.scale,
                rotation_matrix: [
                    [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
                    [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
                    [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
                ],
                expression: info.expression.to_flat(),
                translation: [info.translation.x, info.translation.y, info.translation.z],
            });
            progress.inc(1);
        }
        progress.finish();
        log::info!("motion template extracted ({} frames)", n_frames);

        Ok(Self::from_frames(records, landmarks))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("failed to serialise motion template")?;
        std::fs::write(path, raw)
            .with_context(|| format!("failed to write motion template {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read motion template {}", path.display()))?;
        let template: Self = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid motion template {}: {}", path.display(), e))?;
        template
            .validate()
            .with_context(|| format!("rejected motion template {}", path.display()))?;
        Ok(template)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != TEMPLATE_VERSION {
            return Err(anyhow!(
                "unsupported template version {} (expected {})",
                self.version,
                TEMPLATE_VERSION
            ));
        }
        let n_frames = self.frames.len();
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.frame_index != i {
                return Err(anyhow!(
                    "frame {} carries frame_index {}",
                    i,
                    frame.frame_index
                ));
            }
            if frame.n_frames != n_frames {
                return Err(anyhow!(
                    "frame {} claims {} frames, template holds {}",
                    i,
                    frame.n_frames,
                    n_frames
                ));
            }
        }
        if let Some(lmk) = &self.landmarks {
            if lmk.len() != n_frames {
                return Err(anyhow!(
                    "template holds {} landmark sets for {} frames",
                    lmk.len(),
                    n_frames
                ));
            }
        }
        let expected = compute_digest(&self.frames, self.landmarks.as_deref());
        if expected != self.digest {
            return Err(anyhow!("digest mismatch"));
        }
        Ok(())
    }

    /// Driving pose of frame `index` with `num_kp` keypoints.
    pub fn driving_pose(&self, index: usize, num_kp: usize) -> Result<DrivingPose> {
        let frame = self.frames.get(index).ok_or_else(|| {
            anyhow!(
                "template frame {} out of range ({} frames)",
                index,
                self.frames.len()
            )
        })?;
        let m = &frame.rotation_matrix;
        Ok(DrivingPose {
            rotation: Matrix3::from_fn(|r, c| m[r][c]),
            expression: Keypoints::from_flat("template expression", &frame.expression, num_kp)?,
            scale: frame.scale,
            translation: Vector3::from(frame.translation),
        })
    }
}

/// Hex SHA-256 over the little-endian bytes of every record field.
fn compute_digest(frames: &[TemplateFrame], landmarks: Option<&[Landmarks]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"reenact-motion-template");
    hasher.update(TEMPLATE_VERSION.to_le_bytes());
    hasher.update((frames.len() as u64).to_le_bytes());
    for frame in frames {
        hasher.update((frame.n_frames as u64).to_le_bytes());
        hasher.update((frame.frame_index as u64).to_le_bytes());
        hasher.update(frame.scale.to_le_bytes());
        for v in frame.rotation_matrix.iter().flatten() {
            hasher.update(v.to_le_bytes());
        }
        hasher.update((frame.expression.len() as u64).to_le_bytes());
        for v in &frame.expression {
            hasher.update(v.to_le_bytes());
        }
        for v in &frame.translation {
            hasher.update(v.to_le_bytes());
        }
    }
    match landmarks {
        Some(sets) => {
            hasher.update([1u8]);
            for set in sets {
                hasher.update((set.points.len() as u64).to_le_bytes());
                for [x, y] in &set.points {
                    hasher.update(x.to_le_bytes());
                    hasher.update(y.to_le_bytes());
                }
            }
        }
        None => hasher.update([0u8]),
    }
    hex::encode(hasher.finalize())
}
