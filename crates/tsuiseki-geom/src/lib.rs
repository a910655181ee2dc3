//! Geometry for the tsuiseki landmark tracker.
//!
//! This crate holds the side-effect free math the trackers are built on: axis-aligned boxes
//! ([`Rect`]), rotation estimation and rotation matrices ([`rotation`]), and a few numeric helpers.
//! None of the functions validate their input. Degenerate (zero-area) boxes are representable and
//! produce degenerate results.
//!
//! # Coordinates
//!
//! Coordinates are image coordinates: X points to the right, Y points *down*, and the origin is
//! the top left corner of the frame. Depending on context, they are either in pixels or
//! normalized to the `0.0..=1.0` range.

pub mod num;
pub mod rect;
pub mod resolution;
pub mod rotation;

pub use rect::{Point, Rect};
pub use resolution::Resolution;
