//! Portrait reenactment kernel.
//!
//! Transfers head pose, expression and eye/lip articulation from a driving
//! clip (or a precomputed motion template) onto a source face, then pastes
//! the animated crop back into the source framing.
//!
//! # Module Structure
//!
//! - `rotation`: pitch/yaw/roll to rotation matrices
//! - `sampling`: source-frame selection when source and driving lengths differ
//! - `keypoints`: keypoint, pose and landmark containers
//! - `retargeting`: eye/lip close ratios from landmarks
//! - `crop`: face crop collaborator interface and a static cropper
//! - `model`: neural module interfaces, backends and the model wrapper
//! - `engine`: the per-frame motion-transfer algorithm
//! - `compositor`: paste-back warp and mask blending
//! - `template`: motion template extraction and persistence
//! - `config`: layered configuration
//! - `media`: local image sequence and landmark I/O
//! - `ui`: stage and progress reporting for the binaries

pub mod compositor;
pub mod config;
pub mod crop;
pub mod engine;
pub mod error;
pub mod keypoints;
pub mod media;
pub mod model;
pub mod retargeting;
pub mod rotation;
pub mod sampling;
pub mod template;
pub mod ui;

pub use compositor::{Compositor, MaskSource};
pub use config::{AnimationConfig, CropSettings, KernelConfig, ModelSettings};
pub use crop::{CropInfo, FaceCropper, StaticCropper};
pub use engine::{
    compose_pose, AnimationOutput, ComposedPose, CorrectionMode, DrivingInput, FrameReport,
    LipZero, MotionTransferEngine,
};
pub use error::{SamplingError, ShapeError};
pub use keypoints::{DrivingPose, KeypointInfo, Keypoints, Landmarks, NUM_KEYPOINTS};
pub use model::{ModelBundle, ModelWrapper, WrapperSettings};
pub use rotation::{rotation_matrices, rotation_matrix};
pub use sampling::{source_index, MismatchMethod};
pub use template::{MotionTemplate, TemplateFrame};
