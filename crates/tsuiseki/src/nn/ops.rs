//! Image operations on `[1, H, W, 3]` tensors.
//!
//! Coordinates are continuous: pixel `(x, y)` covers the area from `(x, y)` to `(x + 1, y + 1)`,
//! so its center is at `(x + 0.5, y + 0.5)`. All sampling is bilinear, and samples that fall
//! outside of the source image read as black.

use tsuiseki_geom::{rotation, Point, Rect, Resolution};

use super::tensor::Tensor;

/// Bilinearly samples all 3 channels at a continuous position.
fn sample(image: &Tensor, x: f32, y: f32) -> [f32; 3] {
    let (h, w) = (image.shape()[1], image.shape()[2]);
    // shift to pixel-center space
    let (x, y) = (x - 0.5, y - 0.5);
    if x < -0.5 || y < -0.5 || x > w as f32 - 0.5 || y > h as f32 - 0.5 {
        return [0.0; 3];
    }

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let clamp = |v: f32, max: usize| (v.max(0.0) as usize).min(max - 1);
    let (xa, xb) = (clamp(x0, w), clamp(x0 + 1.0, w));
    let (ya, yb) = (clamp(y0, h), clamp(y0 + 1.0, h));

    let data = image.data();
    let px = |x: usize, y: usize, c: usize| data[(y * w + x) * 3 + c];
    let mut out = [0.0; 3];
    for (c, out) in out.iter_mut().enumerate() {
        let top = px(xa, ya, c) * (1.0 - fx) + px(xb, ya, c) * fx;
        let bottom = px(xa, yb, c) * (1.0 - fx) + px(xb, yb, c) * fx;
        *out = top * (1.0 - fy) + bottom * fy;
    }
    out
}

fn check_image(image: &Tensor) {
    assert!(
        matches!(image.shape(), [1, h, w, 3] if *h > 0 && *w > 0),
        "expected non-empty image tensor of shape [1, H, W, 3], got {:?}",
        image.shape()
    );
}

/// Builds an image of the given resolution by mapping each output pixel center to a source
/// position.
fn remap(image: &Tensor, target: Resolution, map: impl Fn(f32, f32) -> Point) -> Tensor {
    check_image(image);
    let (tw, th) = (target.width() as usize, target.height() as usize);
    let mut data = Vec::with_capacity(tw * th * 3);
    for y in 0..th {
        for x in 0..tw {
            let [sx, sy] = map(x as f32 + 0.5, y as f32 + 0.5);
            data.extend(sample(image, sx, sy));
        }
    }
    Tensor::from_iter(&[1, th, tw, 3], data)
}

/// Crops `rect` out of `image` and resizes it to `target`.
///
/// `rect` is in pixel coordinates of `image` and may extend past its borders.
#[track_caller]
pub fn crop_and_resize(image: &Tensor, rect: &Rect, target: Resolution) -> Tensor {
    let [sx, sy] = [
        rect.width() / target.width() as f32,
        rect.height() / target.height() as f32,
    ];
    let [x0, y0] = rect.start();
    remap(image, target, |x, y| [x0 + x * sx, y0 + y * sy])
}

/// Crops `rect` out of a rotated version of `image` and resizes it to `target`.
///
/// The rotated image is `image` rotated by `-angle` around `pivot`, so an object that is rotated by
/// `angle` in `image` will be upright in the result. `rect` is in pixel coordinates of the rotated
/// image.
///
/// Equivalently, the output pixel at rotated position `p` reads the source at
/// `pivot + R(angle) * (p - pivot)`.
#[track_caller]
pub fn crop_rotated(
    image: &Tensor,
    rect: &Rect,
    pivot: Point,
    angle: f32,
    target: Resolution,
) -> Tensor {
    let m = rotation::rotation_matrix(angle, pivot);
    let [sx, sy] = [
        rect.width() / target.width() as f32,
        rect.height() / target.height() as f32,
    ];
    let [x0, y0] = rect.start();
    remap(image, target, |x, y| {
        rotation::rotate_point([x0 + x * sx, y0 + y * sy], &m)
    })
}

/// Resizes a whole image to `target`, stretching it if the aspect ratio differs.
#[track_caller]
pub fn resize(image: &Tensor, target: Resolution) -> Tensor {
    check_image(image);
    let rect = Rect::from_top_left(0.0, 0.0, image.shape()[2] as f32, image.shape()[1] as f32);
    crop_and_resize(image, &rect, target)
}

/// Mirrors an image along its vertical axis.
#[track_caller]
pub fn flip_horizontal(image: &Tensor) -> Tensor {
    check_image(image);
    let (h, w) = (image.shape()[1], image.shape()[2]);
    Tensor::from_array_shape_fn([1, h, w, 3], |[_, y, x, c]| image.at([0, y, w - 1 - x, c]))
}

/// Converts an image to a single-channel luma buffer, row-major.
pub fn grayscale(image: &Tensor) -> Vec<f32> {
    check_image(image);
    image
        .data()
        .chunks_exact(3)
        .map(|px| 0.299 * px[0] + 0.587 * px[1] + 0.114 * px[2])
        .collect()
}
