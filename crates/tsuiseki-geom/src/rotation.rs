//! In-plane rotation helpers.
//!
//! Landmark trackers feed their networks an upright view of the tracked object. The functions in
//! here compute the object's rotation from two reference landmarks and build the homogeneous 3x3
//! matrices used to move points between the source frame and the rotated crop.
//!
//! All angles are in radians. Image coordinates have Y pointing *down*.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use nalgebra::{Matrix3, Rotation2, Vector2, Vector3};

use crate::rect::Point;

/// Rotations with a smaller magnitude than this are treated as no rotation at all.
///
/// Rotating the frame for tiny angles costs time and makes the crop jitter, so trackers skip it.
pub const SIGNIFICANT_ROTATION: f32 = 0.2;

/// Returns whether `angle` is large enough to warrant rotating the input.
#[inline]
pub fn is_significant(angle: f32) -> bool {
    angle.abs() >= SIGNIFICANT_ROTATION
}

/// Wraps `angle` into the half-open range `(-π, π]`.
pub fn normalize_radians(angle: f32) -> f32 {
    angle - TAU * ((angle - PI) / TAU).ceil()
}

/// Computes the rotation of the line from `a` to `b`, relative to a line pointing straight up.
///
/// An object whose reference line points up in the image (`b` above `a`) has a rotation of 0.
/// A reference line pointing right yields exactly `π/2`.
pub fn compute_rotation(a: Point, b: Point) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    normalize_radians(FRAC_PI_2 - (-dy).atan2(dx))
}

/// Builds an affine matrix that rotates points by `angle` around `center`.
///
/// The result is `translate(center) * rotate(angle) * translate(-center)`.
pub fn rotation_matrix(angle: f32, center: Point) -> Matrix3<f32> {
    let center = Vector2::new(center[0], center[1]);
    Matrix3::new_translation(&center)
        * Rotation2::new(angle).to_homogeneous()
        * Matrix3::new_translation(&-center)
}

/// Inverts an affine matrix produced by [`rotation_matrix`].
///
/// Uses the closed form for rigid transforms: the rotation block is transposed and the
/// translation is recomputed from it.
pub fn invert_transform(m: &Matrix3<f32>) -> Matrix3<f32> {
    let (r00, r01, r10, r11) = (m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]);
    let (tx, ty) = (m[(0, 2)], m[(1, 2)]);
    Matrix3::new(
        r00,
        r10,
        -(r00 * tx + r10 * ty),
        r01,
        r11,
        -(r01 * tx + r11 * ty),
        0.0,
        0.0,
        1.0,
    )
}

/// Applies the affine matrix `m` to a 2D point.
#[inline]
pub fn rotate_point(point: Point, m: &Matrix3<f32>) -> Point {
    let v = m * Vector3::new(point[0], point[1], 1.0);
    [v.x, v.y]
}
