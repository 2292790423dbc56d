//! Eye/lip close ratios computed from 2D landmarks.
//!
//! Landmarks follow the 203-point scheme used by the retargeting networks.
//! A ratio is an opening distance over a width distance, so it does not
//! depend on the coordinate space the landmarks live in.

use anyhow::Result;

use crate::error::ShapeError;
use crate::keypoints::Landmarks;

/// Landmark count of the retargeting scheme.
pub const RETARGETING_LANDMARKS: usize = 203;

const RATIO_EPS: f32 = 1e-6;

const LEFT_EYE: [usize; 4] = [6, 18, 0, 12];
const RIGHT_EYE: [usize; 4] = [30, 42, 24, 36];
const LIP: [usize; 4] = [90, 102, 48, 66];

/// Live eye/lip ratios of one driving frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrivingRatios {
    /// Left and right eye close ratios.
    pub eye: [f32; 2],
    pub lip: f32,
}

fn check_landmarks(lmk: &Landmarks) -> Result<(), ShapeError> {
    if lmk.len() != RETARGETING_LANDMARKS {
        return Err(ShapeError::LandmarkCount {
            expected: RETARGETING_LANDMARKS,
            got: lmk.len(),
        });
    }
    Ok(())
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

fn distance_ratio(lmk: &Landmarks, idx: [usize; 4]) -> f32 {
    let p = &lmk.points;
    distance(p[idx[0]], p[idx[1]]) / (distance(p[idx[2]], p[idx[3]]) + RATIO_EPS)
}

/// Left and right eye close ratios.
pub fn eye_close_ratio(lmk: &Landmarks) -> Result<[f32; 2], ShapeError> {
    check_landmarks(lmk)?;
    Ok([distance_ratio(lmk, LEFT_EYE), distance_ratio(lmk, RIGHT_EYE)])
}

pub fn lip_close_ratio(lmk: &Landmarks) -> Result<f32, ShapeError> {
    check_landmarks(lmk)?;
    Ok(distance_ratio(lmk, LIP))
}

/// Per-frame driving ratios for a whole landmark sequence.
pub fn driving_ratios(landmarks: &[Landmarks]) -> Result<Vec<DrivingRatios>> {
    landmarks
        .iter()
        .map(|lmk| {
            Ok(DrivingRatios {
                eye: eye_close_ratio(lmk)?,
                lip: lip_close_ratio(lmk)?,
            })
        })
        .collect()
}

/// `[src_left, src_right, driving_eye]` for the eye retargeting network.
pub fn combined_eye_ratio(driving_eye: f32, source: &Landmarks) -> Result<[f32; 3], ShapeError> {
    let [left, right] = eye_close_ratio(source)?;
    Ok([left, right, driving_eye])
}

/// `[src_lip, driving_lip]` for the lip retargeting network.
pub fn combined_lip_ratio(driving_lip: f32, source: &Landmarks) -> Result<[f32; 2], ShapeError> {
    Ok([lip_close_ratio(source)?, driving_lip])
}
