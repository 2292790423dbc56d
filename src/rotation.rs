//! Head-pose rotation algebra.
//!
//! The axis convention must match the motion extractor: angles are degrees,
//! the matrix is `(Rz · Ry · Rx)ᵗ` with x = pitch, y = yaw, z = roll, and
//! keypoints are row vectors rotated as `x · R`.

use nalgebra::Matrix3;

/// Build the rotation matrix for one `(pitch, yaw, roll)` triple in degrees.
pub fn rotation_matrix(pitch: f32, yaw: f32, roll: f32) -> Matrix3<f32> {
    let (sx, cx) = pitch.to_radians().sin_cos();
    let (sy, cy) = yaw.to_radians().sin_cos();
    let (sz, cz) = roll.to_radians().sin_cos();

    #[rustfmt::skip]
    let rot_x = Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, cx,  -sx,
        0.0, sx,  cx,
    );
    #[rustfmt::skip]
    let rot_y = Matrix3::new(
        cy,  0.0, sy,
        0.0, 1.0, 0.0,
        -sy, 0.0, cy,
    );
    #[rustfmt::skip]
    let rot_z = Matrix3::new(
        cz,  -sz, 0.0,
        sz,  cz,  0.0,
        0.0, 0.0, 1.0,
    );

    (rot_z * rot_y * rot_x).transpose()
}

/// Batched form of [`rotation_matrix`], one matrix per angle triple.
pub fn rotation_matrices(angles: &[(f32, f32, f32)]) -> Vec<Matrix3<f32>> {
    angles
        .iter()
        .map(|&(pitch, yaw, roll)| rotation_matrix(pitch, yaw, roll))
        .collect()
}
