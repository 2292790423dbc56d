//! Keypoint and landmark containers.
//!
//! `Keypoints` is an `N × 3` matrix of row vectors. Every binary operation
//! checks that both operands carry the same keypoint count and fails with a
//! [`ShapeError`] instead of broadcasting.

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::ShapeError;
use crate::rotation::rotation_matrix;

/// Default keypoint count of the motion extractor.
pub const NUM_KEYPOINTS: usize = 21;

#[derive(Clone, Debug, PartialEq)]
pub struct Keypoints(Array2<f32>);

impl Keypoints {
    /// Build from a flat `[x0, y0, z0, x1, ...]` slice holding exactly `num_kp` rows.
    pub fn from_flat(what: &'static str, values: &[f32], num_kp: usize) -> Result<Self, ShapeError> {
        let expected = num_kp * 3;
        if values.len() != expected {
            return Err(ShapeError::ValueCount {
                what,
                expected,
                got: values.len(),
            });
        }
        let array = Array2::from_shape_vec((num_kp, 3), values.to_vec()).map_err(|_| {
            ShapeError::ValueCount {
                what,
                expected,
                got: values.len(),
            }
        })?;
        Ok(Self(array))
    }

    pub fn zeros(num_kp: usize) -> Self {
        Self(Array2::zeros((num_kp, 3)))
    }

    pub fn len(&self) -> usize {
        self.0.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.0.nrows() == 0
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.0
    }

    pub fn to_flat(&self) -> Vec<f32> {
        self.0.iter().copied().collect()
    }

    /// Row-vector product `self · rot`.
    pub fn rotate(&self, rot: &Matrix3<f32>) -> Self {
        let mut out = Array2::zeros(self.0.raw_dim());
        for (src, mut dst) in self.0.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
            let v = Vector3::new(src[0], src[1], src[2]);
            let rotated = rot.transpose() * v;
            dst[0] = rotated.x;
            dst[1] = rotated.y;
            dst[2] = rotated.z;
        }
        Self(out)
    }

    pub fn checked_add(&self, other: &Keypoints) -> Result<Self, ShapeError> {
        self.check_same_len(other)?;
        Ok(Self(&self.0 + &other.0))
    }

    pub fn checked_sub(&self, other: &Keypoints) -> Result<Self, ShapeError> {
        self.check_same_len(other)?;
        Ok(Self(&self.0 - &other.0))
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self(&self.0 * factor)
    }

    /// Add `t` to every row.
    pub fn translated(&self, t: &Vector3<f32>) -> Self {
        let mut out = self.0.clone();
        for mut row in out.axis_iter_mut(Axis(0)) {
            row[0] += t.x;
            row[1] += t.y;
            row[2] += t.z;
        }
        Self(out)
    }

    /// Add `(tx, ty)` to the first two coordinates of every row.
    pub fn translated_xy(&self, tx: f32, ty: f32) -> Self {
        self.translated(&Vector3::new(tx, ty, 0.0))
    }

    /// Largest absolute element-wise difference.
    pub fn max_abs_diff(&self, other: &Keypoints) -> Result<f32, ShapeError> {
        self.check_same_len(other)?;
        Ok(self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }

    fn check_same_len(&self, other: &Keypoints) -> Result<(), ShapeError> {
        if self.len() != other.len() {
            return Err(ShapeError::KeypointCount {
                left: self.len(),
                right: other.len(),
            });
        }
        Ok(())
    }
}

/// Per-frame output of the motion extractor. Angles are degrees.
#[derive(Clone, Debug, PartialEq)]
pub struct KeypointInfo {
    /// Canonical keypoints in the neutral reference pose.
    pub canonical: Keypoints,
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
    pub scale: f32,
    pub translation: Vector3<f32>,
    /// Expression deltas, same shape as `canonical`.
    pub expression: Keypoints,
}

impl KeypointInfo {
    pub fn rotation(&self) -> Matrix3<f32> {
        rotation_matrix(self.pitch, self.yaw, self.roll)
    }

    pub fn num_keypoints(&self) -> usize {
        self.canonical.len()
    }
}

/// Driving-side pose for one frame: either extracted live or read from a
/// motion template.
#[derive(Clone, Debug, PartialEq)]
pub struct DrivingPose {
    pub rotation: Matrix3<f32>,
    pub expression: Keypoints,
    pub scale: f32,
    pub translation: Vector3<f32>,
}

impl From<&KeypointInfo> for DrivingPose {
    fn from(info: &KeypointInfo) -> Self {
        Self {
            rotation: info.rotation(),
            expression: info.expression.clone(),
            scale: info.scale,
            translation: info.translation,
        }
    }
}

/// 2D facial landmarks for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub points: Vec<[f32; 2]>,
}

impl Landmarks {
    pub fn new(points: Vec<[f32; 2]>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Apply a homogeneous 2D affine transform to every point.
    pub fn transformed(&self, m: &Matrix3<f32>) -> Self {
        let points = self
            .points
            .iter()
            .map(|&[x, y]| {
                let p = m * Vector3::new(x, y, 1.0);
                [p.x, p.y]
            })
            .collect();
        Self { points }
    }

    /// Axis-aligned bounds as `(min_x, min_y, max_x, max_y)`.
    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let first = self.points.first()?;
        let init = (first[0], first[1], first[0], first[1]);
        Some(self.points.iter().fold(init, |(x0, y0, x1, y1), p| {
            (x0.min(p[0]), y0.min(p[1]), x1.max(p[0]), y1.max(p[1]))
        }))
    }
}
