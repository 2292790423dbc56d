//! Motion-transfer engine.
//!
//! For every driving frame, in order:
//!
//! - pick a source frame with the configured mismatch policy
//! - crop it and extract its pose, appearance features and projected keypoints
//! - run the lip-zero pre-pass while the latch is still enabled
//! - extract (or read from a template) the driving pose; frame 0 is the baseline
//! - compose the new pose, relative to the baseline or absolute
//! - apply exactly one correction branch (plain, stitched or retargeted)
//! - decode once and paste the crop back into the source frame
//!
//! The baseline and the lip-zero latch are run state: nothing carries over
//! between `execute` calls and the configuration is never written.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use indicatif::ProgressBar;
use nalgebra::{Matrix3, Vector3};
use ndarray::ArrayD;

use crate::compositor::Compositor;
use crate::config::AnimationConfig;
use crate::crop::{CropInfo, FaceCropper};
use crate::error::ShapeError;
use crate::keypoints::{DrivingPose, KeypointInfo, Keypoints};
use crate::model::ModelWrapper;
use crate::retargeting::{self, DrivingRatios};
use crate::sampling::{self, MismatchMethod};
use crate::template::MotionTemplate;

/// Where the driving motion comes from.
#[derive(Clone, Copy, Debug)]
pub enum DrivingInput<'a> {
    /// Live frames; poses are extracted per frame.
    Frames(&'a [RgbImage]),
    /// Precomputed poses; no driving pose extraction runs.
    Template(&'a MotionTemplate),
}

impl DrivingInput<'_> {
    pub fn len(&self) -> usize {
        match self {
            DrivingInput::Frames(frames) => frames.len(),
            DrivingInput::Template(template) => template.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lip-zero latch. Once it leaves `Enabled` it stays off for the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LipZero {
    Enabled,
    /// Switched off in the configuration.
    Disabled,
    /// Switched off because the source lip ratio fell below the threshold.
    DisabledByDegenerateCheck,
}

impl LipZero {
    fn from_flag(enabled: bool) -> Self {
        if enabled {
            LipZero::Enabled
        } else {
            LipZero::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, LipZero::Enabled)
    }
}

/// The correction branch a run takes, fixed from the flags before frame 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorrectionMode {
    /// No stitching, no retargeting.
    Plain,
    /// Stitching only.
    Stitched,
    /// Eye and/or lip retargeting, optionally followed by stitching.
    Retargeted { eye: bool, lip: bool, stitch: bool },
}

impl CorrectionMode {
    pub fn from_config(cfg: &AnimationConfig) -> Self {
        if cfg.retargeting() {
            CorrectionMode::Retargeted {
                eye: cfg.flag_eye_retargeting,
                lip: cfg.flag_lip_retargeting,
                stitch: cfg.flag_stitching,
            }
        } else if cfg.flag_stitching {
            CorrectionMode::Stitched
        } else {
            CorrectionMode::Plain
        }
    }

    pub fn retargets(&self) -> bool {
        matches!(self, CorrectionMode::Retargeted { .. })
    }
}

/// New pose for one frame before keypoint projection.
#[derive(Clone, Debug, PartialEq)]
pub struct ComposedPose {
    pub rotation: Matrix3<f32>,
    pub expression: Keypoints,
    pub scale: f32,
    /// Always has `z == 0`.
    pub translation: Vector3<f32>,
}

impl ComposedPose {
    /// `scale · (canonical · R + exp) + t`.
    pub fn keypoints(&self, canonical: &Keypoints) -> Result<Keypoints, ShapeError> {
        Ok(canonical
            .rotate(&self.rotation)
            .checked_add(&self.expression)?
            .scaled(self.scale)
            .translated(&self.translation))
    }
}

/// Compose the source pose with the driving pose.
///
/// Relative mode applies the driving motion measured against `baseline` on
/// top of the source pose; absolute mode takes the driving pose as is and
/// keeps the source scale.
pub fn compose_pose(
    source: &KeypointInfo,
    driving: &DrivingPose,
    baseline: &DrivingPose,
    relative: bool,
) -> Result<ComposedPose, ShapeError> {
    let mut composed = if relative {
        let motion = driving.expression.checked_sub(&baseline.expression)?;
        ComposedPose {
            rotation: driving.rotation * baseline.rotation.transpose() * source.rotation(),
            expression: source.expression.checked_add(&motion)?,
            scale: source.scale * (driving.scale / baseline.scale),
            translation: source.translation + (driving.translation - baseline.translation),
        }
    } else {
        ComposedPose {
            rotation: driving.rotation,
            expression: driving.expression.clone(),
            scale: source.scale,
            translation: driving.translation,
        }
    };
    composed.translation.z = 0.0;
    Ok(composed)
}

/// What happened on one frame.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub index: usize,
    pub source_index: usize,
    pub mode: CorrectionMode,
    /// Latch state after the frame.
    pub lip_zero: LipZero,
    pub lip_correction_applied: bool,
    /// Keypoints straight from pose composition.
    pub provisional: Keypoints,
    /// Keypoints handed to the decoder.
    pub corrected: Keypoints,
}

/// Index-aligned outputs of one run.
#[derive(Debug, Default)]
pub struct AnimationOutput {
    pub cropped: Vec<RgbImage>,
    pub full: Vec<RgbImage>,
    pub reports: Vec<FrameReport>,
}

struct SourceState {
    crop: CropInfo,
    info: KeypointInfo,
    features: ArrayD<f32>,
    /// Source canonical keypoints projected through the source pose.
    kp_source: Keypoints,
}

struct RunState {
    baseline: Option<DrivingPose>,
    lip_zero: LipZero,
}

pub struct MotionTransferEngine {
    wrapper: ModelWrapper,
    cropper: Box<dyn FaceCropper>,
    compositor: Compositor,
    config: AnimationConfig,
    progress: ProgressBar,
}

impl MotionTransferEngine {
    pub fn new(
        wrapper: ModelWrapper,
        cropper: Box<dyn FaceCropper>,
        compositor: Compositor,
        config: AnimationConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            wrapper,
            cropper,
            compositor,
            config,
            progress: ProgressBar::hidden(),
        })
    }

    /// Report per-frame progress on `progress`.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &AnimationConfig {
        &self.config
    }

    pub fn wrapper(&self) -> &ModelWrapper {
        &self.wrapper
    }

    /// Animate `sources` with the driving motion.
    ///
    /// Returns one cropped and one full frame per driving frame. An empty
    /// driving input yields empty outputs. Source frames are picked with the
    /// configured `mismatch_method`.
    pub fn execute(
        &mut self,
        sources: &[RgbImage],
        driving: DrivingInput<'_>,
    ) -> Result<AnimationOutput> {
        let method = self.config.mismatch_method;
        let total = driving.len();
        let mut output = AnimationOutput::default();
        if total == 0 {
            log::info!("no driving frames; nothing to animate");
            return Ok(output);
        }
        if sources.is_empty() {
            return Err(crate::error::SamplingError::EmptySource.into());
        }

        let mode = CorrectionMode::from_config(&self.config);
        log::info!(
            "animating {} driving frames from {} source frames (mode={:?}, relative={}, mismatch={})",
            total,
            sources.len(),
            mode,
            self.config.flag_relative,
            method
        );

        let ratios = if mode.retargets() {
            Some(self.driving_ratios(driving)?)
        } else {
            None
        };

        let cached = if sources.len() == 1 {
            Some(self.prepare_source(&sources[0])?)
        } else {
            None
        };

        let mut state = RunState {
            baseline: None,
            lip_zero: LipZero::from_flag(self.config.flag_lip_zero),
        };
        self.progress.set_length(total as u64);

        for index in 0..total {
            let source_index = if method == MismatchMethod::Nearest && total == 1 {
                0
            } else {
                sampling::source_index(method, index, total, sources.len())?
            };
            let source_frame = &sources[source_index];

            let fresh;
            let source = match &cached {
                Some(source) => source,
                None => {
                    fresh = self.prepare_source(source_frame)?;
                    &fresh
                }
            };

            let lip_delta = self.lip_zero_delta(source, &mut state.lip_zero, index)?;

            let pose = self.driving_pose(driving, index)?;
            if index == 0 {
                state.baseline = Some(pose.clone());
            }
            let baseline = state
                .baseline
                .as_ref()
                .ok_or_else(|| anyhow!("driving baseline missing at frame {index}"))?;

            let composed = compose_pose(&source.info, &pose, baseline, self.config.flag_relative)?;
            let provisional = composed.keypoints(&source.info.canonical)?;

            let frame_ratios = ratios.as_ref().and_then(|r| r.get(index));
            let (corrected, lip_correction_applied) =
                self.correct(mode, source, &provisional, lip_delta, frame_ratios)?;

            let decoded = self
                .wrapper
                .decode(&source.features, &source.kp_source, &corrected)
                .with_context(|| format!("decode failed on frame {index}"))?;
            let cropped = self.wrapper.to_image(&decoded)?;
            let full = self.compositor.paste_back(
                &cropped,
                &source.crop,
                source_frame,
                self.config.flag_pasteback,
            )?;

            log::debug!(
                "frame {}/{}: source={} lip_zero={:?} lip_correction={}",
                index + 1,
                total,
                source_index,
                state.lip_zero,
                lip_correction_applied
            );
            output.cropped.push(cropped);
            output.full.push(full);
            output.reports.push(FrameReport {
                index,
                source_index,
                mode,
                lip_zero: state.lip_zero,
                lip_correction_applied,
                provisional,
                corrected,
            });
            self.progress.inc(1);
        }

        self.progress.finish();
        log::info!("animated {} frames", total);
        Ok(output)
    }

    fn prepare_source(&mut self, frame: &RgbImage) -> Result<SourceState> {
        let crop = self
            .cropper
            .crop_single_image(frame)
            .with_context(|| format!("cropper '{}' failed", self.cropper.name()))?;
        let input = if self.config.flag_do_crop {
            self.wrapper.prepare(&crop.image)
        } else {
            self.wrapper.prepare(frame)
        };
        let info = self.wrapper.extract_pose(&input)?;
        let features = self.wrapper.extract_appearance_features(&input)?;
        let kp_source = self.wrapper.project_canonical(&info)?;
        Ok(SourceState {
            crop,
            info,
            features,
            kp_source,
        })
    }

    /// Per-frame retargeting ratios, from the template or the cropper.
    fn driving_ratios(&mut self, driving: DrivingInput<'_>) -> Result<Vec<DrivingRatios>> {
        let landmarks = match driving {
            DrivingInput::Frames(frames) => self
                .cropper
                .retargeting_landmarks(frames)
                .context("failed to get driving retargeting landmarks")?,
            DrivingInput::Template(template) => template.landmarks.clone().ok_or_else(|| {
                anyhow!("eye/lip retargeting is enabled but the motion template has no landmarks")
            })?,
        };
        if landmarks.len() != driving.len() {
            return Err(anyhow!(
                "got {} driving landmark sets for {} driving frames",
                landmarks.len(),
                driving.len()
            ));
        }
        retargeting::driving_ratios(&landmarks)
    }

    fn driving_pose(&self, driving: DrivingInput<'_>, index: usize) -> Result<DrivingPose> {
        match driving {
            DrivingInput::Frames(frames) => {
                let input = self.wrapper.prepare(&frames[index]);
                let info = self
                    .wrapper
                    .extract_pose(&input)
                    .with_context(|| format!("pose extraction failed on driving frame {index}"))?;
                Ok(DrivingPose::from(&info))
            }
            DrivingInput::Template(template) => {
                template.driving_pose(index, self.wrapper.num_keypoints())
            }
        }
    }

    /// Lip-zero pre-pass. Latches the run off when the source lip ratio is
    /// below the threshold; otherwise returns the correction delta.
    fn lip_zero_delta(
        &self,
        source: &SourceState,
        lip_zero: &mut LipZero,
        index: usize,
    ) -> Result<Option<Keypoints>> {
        if !lip_zero.is_enabled() {
            return Ok(None);
        }
        let combined = retargeting::combined_lip_ratio(0.0, &source.crop.landmarks)?;
        if combined[0] < self.config.lip_zero_threshold {
            log::debug!(
                "frame {}: source lip ratio {:.4} below {:.4}, lip-zero off for the rest of the run",
                index,
                combined[0],
                self.config.lip_zero_threshold
            );
            *lip_zero = LipZero::DisabledByDegenerateCheck;
            return Ok(None);
        }
        Ok(Some(self.wrapper.retarget_lip(&source.kp_source, &combined)?))
    }

    /// Apply the run's correction branch. Returns the corrected keypoints and
    /// whether the lip-zero delta was added.
    fn correct(
        &self,
        mode: CorrectionMode,
        source: &SourceState,
        provisional: &Keypoints,
        lip_delta: Option<Keypoints>,
        ratios: Option<&DrivingRatios>,
    ) -> Result<(Keypoints, bool)> {
        match mode {
            CorrectionMode::Plain => match lip_delta {
                Some(delta) => Ok((provisional.checked_add(&delta)?, true)),
                None => Ok((provisional.clone(), false)),
            },
            CorrectionMode::Stitched => {
                let stitched = self.wrapper.stitch(&source.kp_source, provisional)?;
                match lip_delta {
                    Some(delta) => Ok((stitched.checked_add(&delta)?, true)),
                    None => Ok((stitched, false)),
                }
            }
            CorrectionMode::Retargeted { eye, lip, stitch } => {
                let ratios = ratios.ok_or_else(|| anyhow!("retargeting ratios missing"))?;
                let landmarks = &source.crop.landmarks;
                let mut kp = if self.config.flag_relative {
                    source.kp_source.clone()
                } else {
                    provisional.clone()
                };
                if eye {
                    let mut combined = retargeting::combined_eye_ratio(ratios.eye[0], landmarks)?;
                    combined
                        .iter_mut()
                        .for_each(|v| *v *= self.config.eyes_retargeting_multiplier);
                    kp = kp.checked_add(&self.wrapper.retarget_eye(&source.kp_source, &combined)?)?;
                }
                if lip {
                    let mut combined = retargeting::combined_lip_ratio(ratios.lip, landmarks)?;
                    combined
                        .iter_mut()
                        .for_each(|v| *v *= self.config.lip_retargeting_multiplier);
                    kp = kp.checked_add(&self.wrapper.retarget_lip(&source.kp_source, &combined)?)?;
                }
                if stitch {
                    kp = self.wrapper.stitch(&source.kp_source, &kp)?;
                }
                Ok((kp, false))
            }
        }
    }
}
