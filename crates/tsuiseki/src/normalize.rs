//! Rotation normalization of regions of interest.
//!
//! Landmark models expect an upright view of their object. [`correct_region`] produces that view
//! from a frame, and [`transform_keypoints_back`] maps the model's landmarks from the crop back
//! into frame coordinates.

use nalgebra::Matrix3;
use tsuiseki_geom::{
    rotation::{invert_transform, is_significant, rotate_point, rotation_matrix},
    Point, Rect, Resolution,
};

use crate::{
    frame::Frame,
    nn::{ops, tensor::Tensor},
};

/// An upright crop of a region, plus the transform needed to undo the rotation.
#[derive(Debug)]
pub struct Corrected {
    /// Rotation that was removed from the crop. 0 if no rotation was applied.
    pub angle: f32,
    /// Maps frame coordinates into the rotated frame the crop was taken from. Identity if no
    /// rotation was applied.
    pub matrix: Matrix3<f32>,
    /// The crop, an `[1, H, W, 3]` tensor of the requested size.
    pub crop: Tensor,
}

/// How a landmark model's Z output relates to the crop it ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthScale {
    /// Z is passed through unchanged.
    Raw,
    /// Z is in crop pixels and scaled like X and Y: `z * (w + h) / input_size / 2`.
    BoxMean,
}

/// Crops `rect` out of `frame`, rotated so that an object rotated by `angle` comes out upright.
///
/// The rotation pivots around the center of `rect`. See [`correct_region_about`].
pub fn correct_region(
    frame: &Frame,
    rect: &Rect,
    target: Resolution,
    rotation_enabled: bool,
    angle: f32,
) -> Option<Corrected> {
    correct_region_about(frame, rect, rect.center(), target, rotation_enabled, angle)
}

/// Crops `rect` out of `frame` rotated by `-angle` around `pivot`.
///
/// `rect` is in the coordinates of the rotated frame. If rotation is disabled or `angle` is not
/// [significant](is_significant), the crop is taken from the unrotated frame and the
/// returned angle is 0.
///
/// Returns `None` for degenerate regions, which must not be fed to a landmark model.
pub fn correct_region_about(
    frame: &Frame,
    rect: &Rect,
    pivot: Point,
    target: Resolution,
    rotation_enabled: bool,
    angle: f32,
) -> Option<Corrected> {
    if !(rect.area() > 0.0) || !rect.start().iter().chain(&rect.end()).all(|v| v.is_finite()) {
        log::warn!("skipping degenerate region {:?}", rect);
        return None;
    }

    if rotation_enabled && is_significant(angle) {
        Some(Corrected {
            angle,
            matrix: rotation_matrix(-angle, pivot),
            crop: ops::crop_rotated(frame.tensor(), rect, pivot, angle, target),
        })
    } else {
        Some(Corrected {
            angle: 0.0,
            matrix: Matrix3::identity(),
            crop: ops::crop_and_resize(frame.tensor(), rect, target),
        })
    }
}

/// Maps landmarks from model input space back into frame coordinates.
///
/// `raw` landmarks are in pixels of the model input of size `input`. `rect`, `angle` and `matrix`
/// describe the crop the model ran on, as returned by [`correct_region`].
pub fn transform_keypoints_back(
    raw: &[[f32; 3]],
    rect: &Rect,
    angle: f32,
    matrix: &Matrix3<f32>,
    input: Resolution,
    depth: DepthScale,
) -> Vec<[f32; 3]> {
    let [iw, ih] = input.as_f32();
    let [bw, bh] = rect.size();
    let unrotate = is_significant(angle).then(|| rotation_matrix(angle, [0.0, 0.0]));
    let [cx, cy] = rotate_point(rect.center(), &invert_transform(matrix));

    raw.iter()
        .map(|&[x, y, z]| {
            let scaled = [bw / iw * (x - iw / 2.0), bh / ih * (y - ih / 2.0)];
            let [rx, ry] = match &unrotate {
                Some(m) => rotate_point(scaled, m),
                None => scaled,
            };
            let z = match depth {
                DepthScale::Raw => z,
                DepthScale::BoxMean => z * (bw + bh) / iw / 2.0,
            };
            [rx + cx, ry + cy, z]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    use crate::test::frame_from_fn;

    use super::*;

    /// Where a crop pixel position samples the source frame.
    fn source_of(q: Point, rect: &Rect, pivot: Point, angle: f32, input: f32) -> Point {
        let u = [
            rect.x() + q[0] * rect.width() / input,
            rect.y() + q[1] * rect.height() / input,
        ];
        rotate_point(u, &rotation_matrix(angle, pivot))
    }

    #[test]
    fn back_projection_matches_sampling() {
        let frame = frame_from_fn(200, 150, |_, _| [0.0; 3]);
        let mut rng = fastrand::Rng::with_seed(17);
        let input = Resolution::square(64);
        for _ in 0..200 {
            let rect = Rect::from_center(
                40.0 + rng.f32() * 120.0,
                40.0 + rng.f32() * 70.0,
                10.0 + rng.f32() * 60.0,
                10.0 + rng.f32() * 60.0,
            );
            let pivot = [rect.center()[0] + rng.f32() * 10.0, rect.center()[1] - rng.f32() * 10.0];
            let angle = (rng.f32() * 2.0 - 1.0) * PI;
            let corrected = correct_region_about(&frame, &rect, pivot, input, true, angle).unwrap();

            let q = [rng.f32() * 64.0, rng.f32() * 64.0];
            let back = transform_keypoints_back(
                &[[q[0], q[1], 1.0]],
                &rect,
                corrected.angle,
                &corrected.matrix,
                input,
                DepthScale::Raw,
            )[0];
            let expected = source_of(q, &rect, pivot, corrected.angle, 64.0);
            assert_abs_diff_eq!(back[0], expected[0], epsilon = 1e-2);
            assert_abs_diff_eq!(back[1], expected[1], epsilon = 1e-2);
            assert_eq!(back[2], 1.0);
        }
    }

    #[test]
    fn small_angles_are_ignored() {
        let frame = frame_from_fn(32, 32, |_, _| [0.5; 3]);
        let rect = Rect::from_top_left(8.0, 8.0, 16.0, 16.0);
        let corrected = correct_region(&frame, &rect, Resolution::square(8), true, 0.1).unwrap();
        assert_eq!(corrected.angle, 0.0);
        assert_eq!(corrected.matrix, Matrix3::identity());
        assert_eq!(corrected.crop.shape(), &[1, 8, 8, 3]);

        let corrected = correct_region(&frame, &rect, Resolution::square(8), false, 1.0).unwrap();
        assert_eq!(corrected.angle, 0.0);
    }

    #[test]
    fn degenerate_regions_are_skipped() {
        let frame = frame_from_fn(32, 32, |_, _| [0.5; 3]);
        let flat = Rect::from_top_left(8.0, 8.0, 16.0, 0.0);
        assert!(correct_region(&frame, &flat, Resolution::square(8), true, 1.0).is_none());
        let nan = Rect::from_center(f32::NAN, 0.0, 4.0, 4.0);
        assert!(correct_region(&frame, &nan, Resolution::square(8), true, 1.0).is_none());
    }

    #[test]
    fn finds_marked_pixel_through_rotation() {
        // a single bright pixel at (30, 12)
        let frame = frame_from_fn(48, 48, |x, y| {
            if (x, y) == (30, 12) {
                [1.0; 3]
            } else {
                [0.0; 3]
            }
        });
        let rect = Rect::from_center(24.0, 24.0, 32.0, 32.0);
        let input = Resolution::square(32);
        let corrected = correct_region(&frame, &rect, input, true, 2.0).unwrap();

        let (mut best, mut best_pos) = (0.0, [0.0; 2]);
        for y in 0..32 {
            for x in 0..32 {
                let v = corrected.crop.at([0, y, x, 0]);
                if v > best {
                    best = v;
                    best_pos = [x as f32 + 0.5, y as f32 + 0.5];
                }
            }
        }
        assert!(best > 0.0);
        let back = transform_keypoints_back(
            &[[best_pos[0], best_pos[1], 0.0]],
            &rect,
            corrected.angle,
            &corrected.matrix,
            input,
            DepthScale::Raw,
        )[0];
        assert!((back[0] - 30.5).abs() < 1.0, "{back:?}");
        assert!((back[1] - 12.5).abs() < 1.0, "{back:?}");
    }

    #[test]
    fn depth_scales() {
        let rect = Rect::from_top_left(0.0, 0.0, 100.0, 60.0);
        let input = Resolution::square(40);
        let m = Matrix3::identity();
        let raw = [[20.0, 20.0, 8.0]];

        let out = transform_keypoints_back(&raw, &rect, 0.0, &m, input, DepthScale::Raw);
        assert_eq!(out, vec![[50.0, 30.0, 8.0]]);

        let out = transform_keypoints_back(&raw, &rect, 0.0, &m, input, DepthScale::BoxMean);
        // 8 * 160 / 40 / 2
        assert_eq!(out[0][2], 16.0);
    }
}
