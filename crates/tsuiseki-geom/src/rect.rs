//! Axis-aligned boxes.
//!
//! A [`Rect`] is stored as its two corner points. All constructors and transforms keep the
//! `start <= end` invariant, so the box math used by the trackers never has to deal with inverted
//! rectangles.

use std::fmt;

use approx::{AbsDiffEq, RelativeEq};

/// A 2D point or extent in pixel (or normalized) coordinates.
pub type Point = [f32; 2];

/// An axis-aligned rectangle defined by its top-left and bottom-right corners.
///
/// Rectangles are allowed to have zero height and/or width. Negative dimensions cannot be
/// represented.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    start: Point,
    end: Point,
}

impl Rect {
    /// Creates a rectangle spanning two arbitrary corner points.
    ///
    /// The corners may be passed in any order.
    #[inline]
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            start: [a[0].min(b[0]), a[1].min(b[1])],
            end: [a[0].max(b[0]), a[1].max(b[1])],
        }
    }

    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        let [hw, hh] = [width * 0.5, height * 0.5];
        Self::from_corners(
            [x_center - hw, y_center - hh],
            [x_center + hw, y_center + hh],
        )
    }

    /// Creates a rectangle extending downwards and right from a point.
    #[inline]
    pub fn from_top_left(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::from_corners([x, y], [x + width, y + height])
    }

    /// Computes the bounding rectangle that encompasses `points`.
    ///
    /// Any coordinates past the first two are ignored, so 3D landmarks can be passed directly.
    /// Returns [`None`] if `points` is an empty iterator.
    pub fn bounding<I, P>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[f32]>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let first = first.as_ref();
        let (mut min, mut max) = ([first[0], first[1]], [first[0], first[1]]);

        for pt in iter {
            let pt = pt.as_ref();
            min = [min[0].min(pt[0]), min[1].min(pt[1])];
            max = [max[0].max(pt[0]), max[1].max(pt[1])];
        }

        Some(Self::from_corners(min, max))
    }

    #[inline]
    pub fn start(&self) -> Point {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Point {
        self.end
    }

    /// Returns the X coordinate of the left side of the rectangle.
    #[inline]
    pub fn x(&self) -> f32 {
        self.start[0]
    }

    /// Returns the Y coordinate of the top side of the rectangle.
    #[inline]
    pub fn y(&self) -> f32 {
        self.start[1]
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.end[0] - self.start[0]
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.end[1] - self.start[1]
    }

    /// Returns `[width, height]`.
    #[inline]
    pub fn size(&self) -> Point {
        [self.width(), self.height()]
    }

    #[inline]
    pub fn center(&self) -> Point {
        [
            (self.start[0] + self.end[0]) * 0.5,
            (self.start[1] + self.end[1]) * 0.5,
        ]
    }

    /// Returns the number of pixels contained in `self`.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Scales the rectangle around its center by `factor`.
    ///
    /// The center position of the [`Rect`] remains the same.
    #[must_use]
    pub fn enlarge(&self, factor: f32) -> Self {
        let [cx, cy] = self.center();
        let [w, h] = self.size();
        Self::from_center(cx, cy, w * factor, h * factor)
    }

    /// Turns `self` into a square whose edge length is the longer of the two sides.
    ///
    /// The center position of the [`Rect`] remains the same.
    #[must_use]
    pub fn squarify(&self) -> Self {
        let [cx, cy] = self.center();
        let edge = self.width().max(self.height());
        Self::from_center(cx, cy, edge, edge)
    }

    /// Translates the rectangle by a fraction of its own size.
    ///
    /// A `factor` of `[0.0, -0.5]` moves the rectangle up by half its height.
    #[must_use]
    pub fn shift(&self, factor: [f32; 2]) -> Self {
        let [w, h] = self.size();
        let [dx, dy] = [w * factor[0], h * factor[1]];
        Self::from_corners(
            [self.start[0] + dx, self.start[1] + dy],
            [self.end[0] + dx, self.end[1] + dy],
        )
    }

    /// Multiplies both corner coordinates by a per-axis factor.
    ///
    /// This maps a rectangle between coordinate spaces that share an origin, for example from a
    /// detector's input resolution to the source frame's resolution.
    #[must_use]
    pub fn scale_coords(&self, factor: [f32; 2]) -> Self {
        Self::from_corners(
            [self.start[0] * factor[0], self.start[1] * factor[1]],
            [self.end[0] * factor[0], self.end[1] * factor[1]],
        )
    }

    /// Divides the coordinates of `self` by the given dimensions, mapping pixel coordinates into
    /// the `0.0..=1.0` range.
    #[must_use]
    pub fn normalize(&self, width: f32, height: f32) -> Self {
        self.scale_coords([width.recip(), height.recip()])
    }

    /// Clamps `self` to lie within `0..width` and `0..height`.
    #[must_use]
    pub fn clamp_to(&self, width: f32, height: f32) -> Self {
        Self::from_corners(
            [self.start[0].clamp(0.0, width), self.start[1].clamp(0.0, height)],
            [self.end[0].clamp(0.0, width), self.end[1].clamp(0.0, height)],
        )
    }

    /// Computes the intersection of `self` and `other`.
    ///
    /// Returns [`None`] when the intersection is empty (ie. the rectangles do not overlap).
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let min = [
            self.start[0].max(other.start[0]),
            self.start[1].max(other.start[1]),
        ];
        let max = [self.end[0].min(other.end[0]), self.end[1].min(other.end[1])];
        if min[0] > max[0] || min[1] > max[1] {
            return None;
        }

        Some(Rect { start: min, end: max })
    }

    fn intersection_area(&self, other: &Self) -> f32 {
        self.intersection(other).map_or(0.0, |rect| rect.area())
    }

    fn union_area(&self, other: &Self) -> f32 {
        self.area() + other.area() - self.intersection_area(other)
    }

    /// Computes the Intersection over Union (IOU) of `self` and `other`.
    ///
    /// Returns 0.0 if the union of both rectangles has no area.
    pub fn iou(&self, other: &Self) -> f32 {
        let union = self.union_area(other);
        if union <= 0.0 {
            return 0.0;
        }
        (self.intersection_area(other) / union).clamp(0.0, 1.0)
    }

    pub fn contains_point(&self, point: Point) -> bool {
        self.start[0] <= point[0]
            && self.start[1] <= point[1]
            && self.end[0] >= point[0]
            && self.end[1] >= point[1]
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})-({},{})",
            self.start[0], self.start[1], self.end[0], self.end[1],
        )
    }
}

impl AbsDiffEq for Rect {
    type Epsilon = f32;

    fn default_epsilon() -> f32 {
        f32::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.start
            .iter()
            .chain(&self.end)
            .zip(other.start.iter().chain(&other.end))
            .all(|(a, b)| a.abs_diff_eq(b, epsilon))
    }
}

impl RelativeEq for Rect {
    fn default_max_relative() -> f32 {
        f32::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: f32, max_relative: f32) -> bool {
        self.start
            .iter()
            .chain(&self.end)
            .zip(other.start.iter().chain(&other.end))
            .all(|(a, b)| a.relative_eq(b, epsilon, max_relative))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn well_formed(rect: &Rect) -> bool {
        rect.start()[0] <= rect.end()[0] && rect.start()[1] <= rect.end()[1]
    }

    #[test]
    fn test_enlarge_preserves_center() {
        let rect = Rect::from_corners([10.0, 10.0], [30.0, 50.0]);
        let big = rect.enlarge(2.0);
        assert_eq!(big.center(), [20.0, 30.0]);
        assert_eq!(big.size(), [40.0, 80.0]);
        assert_eq!(big.start(), [0.0, -10.0]);
        assert_eq!(big.end(), [40.0, 70.0]);
    }

    #[test]
    fn test_squarify() {
        let rect = Rect::from_center(10.0, 10.0, 50.0, 100.0).squarify();
        assert_eq!(rect, Rect::from_center(10.0, 10.0, 100.0, 100.0));
        let rect = Rect::from_center(10.0, 10.0, 100.0, 98.0).squarify();
        assert_eq!(rect, Rect::from_center(10.0, 10.0, 100.0, 100.0));
    }

    #[test]
    fn test_shift() {
        let rect = Rect::from_top_left(0.0, 0.0, 10.0, 20.0).shift([0.0, -0.5]);
        assert_eq!(rect, Rect::from_top_left(0.0, -10.0, 10.0, 20.0));
        let rect = Rect::from_top_left(0.0, 0.0, 10.0, 20.0).shift([1.0, 0.0]);
        assert_eq!(rect, Rect::from_top_left(10.0, 0.0, 10.0, 20.0));
    }

    #[test]
    fn test_scale_coords() {
        let rect = Rect::from_corners([1.0, 2.0], [3.0, 4.0]).scale_coords([2.0, 0.5]);
        assert_eq!(rect, Rect::from_corners([2.0, 1.0], [6.0, 2.0]));
        assert_relative_eq!(
            Rect::from_corners([64.0, 32.0], [128.0, 64.0]).normalize(128.0, 64.0),
            Rect::from_corners([0.5, 0.5], [1.0, 1.0]),
        );
    }

    #[test]
    fn test_corner_order() {
        let rect = Rect::from_corners([5.0, -1.0], [-5.0, 1.0]);
        assert_eq!(rect.start(), [-5.0, -1.0]);
        assert_eq!(rect.end(), [5.0, 1.0]);
        assert!(well_formed(&Rect::from_center(0.0, 0.0, -4.0, -2.0)));
    }

    #[test]
    fn test_transforms_stay_well_formed() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..1000 {
            let rect = Rect::from_top_left(
                rng.f32() * 200.0 - 100.0,
                rng.f32() * 200.0 - 100.0,
                rng.f32() * 50.0,
                rng.f32() * 50.0,
            );
            let factor = rng.f32() * 6.0 - 3.0;
            let shift = [rng.f32() * 2.0 - 1.0, rng.f32() * 2.0 - 1.0];

            assert!(well_formed(&rect.enlarge(factor)), "{rect:?} * {factor}");
            assert!(well_formed(&rect.squarify()), "{rect:?}");
            assert!(well_formed(&rect.shift(shift)), "{rect:?} + {shift:?}");
            assert!(well_formed(&rect.shift(shift).squarify().enlarge(factor)));
        }
    }

    #[test]
    fn test_intersection() {
        let big = Rect::from_corners([0.0, 0.0], [10.0, 10.0]);
        let dot = Rect::from_corners([5.0, 5.0], [5.0, 5.0]);
        assert_eq!(big.intersection(&dot), Some(dot));
        assert_eq!(dot.intersection(&big), Some(dot));
        assert_eq!(
            dot.intersection_area(&Rect::from_corners([6.0, 0.0], [10.0, 10.0])),
            0.0
        );
    }

    #[test]
    fn test_iou() {
        // Two rects with the same center point, but different sizes.
        let smaller = Rect::from_center(9.0, 9.0, 1.0, 1.0);
        let bigger = Rect::from_center(9.0, 9.0, 2.0, 2.0);

        assert_eq!(smaller.area(), 1.0);
        assert_eq!(bigger.area(), 4.0);
        assert_eq!(smaller.union_area(&bigger), 4.0);
        assert_eq!(smaller.iou(&bigger), 1.0 / 4.0);
        assert_eq!(bigger.iou(&smaller), 1.0 / 4.0);

        assert_eq!(bigger.iou(&bigger), 1.0);

        let far = Rect::from_center(100.0, 9.0, 2.0, 2.0);
        assert_eq!(bigger.iou(&far), 0.0);
    }

    #[test]
    fn test_iou_degenerate() {
        let zero = Rect::from_center(0.0, 0.0, 0.0, 0.0);
        assert_eq!(zero.area(), 0.0);
        assert_eq!(zero.iou(&zero), 0.0);
        assert_eq!(zero.iou(&Rect::from_center(1.0, 0.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_iou_bounds() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..1000 {
            let mut random_rect =
                || Rect::from_top_left(rng.f32() * 10.0, rng.f32() * 10.0, rng.f32(), rng.f32());
            let a = random_rect();
            let b = random_rect();
            let iou = a.iou(&b);
            assert!((0.0..=1.0).contains(&iou), "iou({a:?}, {b:?}) = {iou}");
            assert_eq!(iou, b.iou(&a));
        }
    }

    #[test]
    fn test_bounding() {
        assert_eq!(
            Rect::bounding([[0.0f32, 0.0], [1.0, 1.0], [-1.0, -1.0]]).unwrap(),
            Rect::from_center(0.0, 0.0, 2.0, 2.0),
        );
        assert_eq!(
            Rect::bounding([[1.0f32, 1.0, 7.0], [2.0, 2.0, -7.0]]).unwrap(),
            Rect::from_center(1.5, 1.5, 1.0, 1.0),
        );
        assert_eq!(
            Rect::bounding([[0.0f32, 0.0], [10.0, 0.0]]).unwrap(),
            Rect::from_center(5.0, 0.0, 10.0, 0.0),
        );
        assert!(Rect::bounding(Vec::<[f32; 2]>::new()).is_none());
    }

    #[test]
    fn test_clamp() {
        let rect = Rect::from_corners([-5.0, 10.0], [50.0, 70.0]).clamp_to(40.0, 60.0);
        assert_eq!(rect, Rect::from_corners([0.0, 10.0], [40.0, 60.0]));
    }

    #[test]
    fn test_contains_point() {
        let rect = Rect::from_top_left(-5.0, 5.0, 10.0, 5.0);
        assert!(rect.contains_point([-5.0, 5.0]));
        assert!(rect.contains_point([-5.0 + 9.0, 5.0 + 4.0]));
        assert!(!rect.contains_point([-5.0 + 11.0, 5.0 + 4.0]));
        assert!(!rect.contains_point([-5.0 + 9.0, 5.0 + 5.0 + 1.0]));
    }
}
