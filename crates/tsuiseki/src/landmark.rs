//! Tracking results: keypoints and instances.

use tsuiseki_geom::{Rect, Resolution};

type Position = [f32; 3];

/// A named group of keypoint positions, like a finger or an eyebrow.
pub type Annotation = (&'static str, Vec<Position>);

/// A single detected keypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    /// Index of the part in the entity's part table.
    pub part: usize,
    /// Name of the part, or `""` for unnamed mesh points.
    pub name: &'static str,
    /// Position in pixels of the source frame. Z is 0 for 2D models.
    pub position: Position,
    /// X and Y normalized to the frame size, Z unchanged.
    pub raw: Option<Position>,
    pub score: f32,
}

impl Keypoint {
    pub fn new(part: usize, name: &'static str, position: Position, score: f32) -> Self {
        Self {
            part,
            name,
            position,
            raw: None,
            score,
        }
    }

    /// Fills in [`Keypoint::raw`] relative to a frame of resolution `res`.
    pub fn with_raw(self, res: Resolution) -> Self {
        let [w, h] = res.as_f32();
        let [x, y, z] = self.position;
        Self {
            raw: Some([x / w, y / h, z]),
            ..self
        }
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.position[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.position[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.position[2]
    }
}

/// A tracked object in one frame.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Slot index in the pipeline's region cache.
    ///
    /// Ids stay the same across frames as long as the number of tracked objects doesn't change,
    /// but are otherwise not guaranteed to refer to the same object.
    pub id: usize,
    /// Bounding box in pixels of the source frame.
    pub rect: Rect,
    /// [`Instance::rect`] normalized to the frame size.
    pub rect_raw: Rect,
    pub keypoints: Vec<Keypoint>,
    /// Named keypoint subsets, in a fixed per-entity order.
    pub annotations: Vec<Annotation>,
    /// Aggregate confidence in `0.0..=1.0`.
    pub score: f32,
}

impl Instance {
    /// Creates an instance without keypoints.
    pub fn new(id: usize, rect: Rect, res: Resolution, score: f32) -> Self {
        let [w, h] = res.as_f32();
        Self {
            id,
            rect,
            rect_raw: rect.normalize(w, h),
            keypoints: Vec::new(),
            annotations: Vec::new(),
            score,
        }
    }

    pub fn with_keypoints(self, keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints, ..self }
    }

    pub fn with_annotations(self, annotations: Vec<Annotation>) -> Self {
        Self {
            annotations,
            ..self
        }
    }

    /// Looks up a keypoint by part name.
    pub fn keypoint(&self, name: &str) -> Option<&Keypoint> {
        self.keypoints.iter().find(|kp| kp.name == name)
    }

    /// Looks up an annotation by name.
    pub fn annotation(&self, name: &str) -> Option<&[Position]> {
        self.annotations
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, points)| &points[..])
    }

    /// Returns the mean position of all keypoints, or `None` if there are none.
    pub fn average_position(&self) -> Option<Position> {
        if self.keypoints.is_empty() {
            return None;
        }
        let n = self.keypoints.len() as f32;
        let mut center = [0.0; 3];
        for kp in &self.keypoints {
            for (c, v) in center.iter_mut().zip(kp.position) {
                *c += v / n;
            }
        }
        Some(center)
    }
}

/// Builds annotations by picking the positions at the listed indices.
///
/// Groups that reference points past the end of `positions` are skipped.
pub(crate) fn annotate(groups: &[(&'static str, &[usize])], positions: &[Position]) -> Vec<Annotation> {
    groups
        .iter()
        .filter(|(_, indices)| indices.iter().all(|&i| i < positions.len()))
        .map(|&(name, indices)| (name, indices.iter().map(|&i| positions[i]).collect()))
        .collect()
}

/// Builds one keypoint per position, naming them from `names` where available.
pub(crate) fn keypoints_from_positions(
    names: &'static [&'static str],
    positions: &[Position],
    score: f32,
    res: Resolution,
) -> Vec<Keypoint> {
    positions
        .iter()
        .enumerate()
        .map(|(i, &pos)| {
            Keypoint::new(i, names.get(i).copied().unwrap_or(""), pos, score).with_raw(res)
        })
        .collect()
}
