use thiserror::Error;

/// Shape contract violations between the engine and the neural modules.
///
/// These are fatal for the invocation that raised them. They are wrapped in
/// `anyhow::Error` on the way out; use `downcast_ref::<ShapeError>()` to
/// inspect them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("{what}: expected {expected} values, got {got}")]
    ValueCount {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("keypoint count mismatch: {left} vs {right}")]
    KeypointCount { left: usize, right: usize },

    #[error("{what}: expected tensor shape {expected:?}, got {got:?}")]
    Tensor {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("{what}: expected batch size {expected}, got {got}")]
    Batch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("landmark count mismatch: expected {expected}, got {got}")]
    LandmarkCount { expected: usize, got: usize },
}

/// Degenerate inputs to the source-frame sampling policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplingError {
    #[error("source sequence is empty")]
    EmptySource,

    #[error("nearest sampling needs at least 2 driving frames, got {0}")]
    NearestSingleFrame(usize),
}
