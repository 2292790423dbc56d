//! Source-frame sampling policy.
//!
//! Resolves a length mismatch between the source sequence and the driving
//! sequence into one source index per driving index.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::SamplingError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchMethod {
    /// Freeze on the last source frame once driving outruns it.
    #[default]
    Repeat,
    /// Wrap around with `i mod S`.
    Cycle,
    /// Bounce back and forth over a cycle of `2S - 2`.
    Mirror,
    /// Linearly resample across the driving length.
    Nearest,
}

impl MismatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchMethod::Repeat => "repeat",
            MismatchMethod::Cycle => "cycle",
            MismatchMethod::Mirror => "mirror",
            MismatchMethod::Nearest => "nearest",
        }
    }
}

impl fmt::Display for MismatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MismatchMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "repeat" => Ok(MismatchMethod::Repeat),
            "cycle" => Ok(MismatchMethod::Cycle),
            "mirror" => Ok(MismatchMethod::Mirror),
            "nearest" => Ok(MismatchMethod::Nearest),
            other => Err(anyhow!(
                "unknown mismatch method '{}' (expected repeat, cycle, mirror or nearest)",
                other
            )),
        }
    }
}

/// Select the source index for driving index `idx`.
///
/// A single-frame source always maps to 0, which also covers the mirror
/// fold's degenerate cycle length. Nearest over fewer than two driving frames
/// is rejected; callers guard that case before calling.
pub fn source_index(
    method: MismatchMethod,
    idx: usize,
    total_frames: usize,
    source_len: usize,
) -> Result<usize, SamplingError> {
    if source_len == 0 {
        return Err(SamplingError::EmptySource);
    }
    if source_len == 1 {
        return Ok(0);
    }

    match method {
        MismatchMethod::Repeat => Ok(idx.min(source_len - 1)),
        MismatchMethod::Cycle => Ok(idx % source_len),
        MismatchMethod::Mirror => {
            let cycle_length = 2 * source_len - 2;
            let folded = idx % cycle_length;
            if folded >= source_len {
                Ok(cycle_length - folded)
            } else {
                Ok(folded)
            }
        }
        MismatchMethod::Nearest => {
            if total_frames < 2 {
                return Err(SamplingError::NearestSingleFrame(total_frames));
            }
            let ratio = idx as f64 / (total_frames - 1) as f64;
            let picked = (ratio * (source_len - 1) as f64).floor() as usize;
            Ok(picked.min(source_len - 1))
        }
    }
}
