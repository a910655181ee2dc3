//! Multi-instance pose decoding from heatmaps and displacement fields.
//!
//! Bottom-up pose models output, for every cell of a coarse grid:
//!
//! * a heatmap score per part,
//! * a 2D offset per part that refines the cell position to a pixel position,
//! * forward and backward 2D displacements per edge of the pose chain, pointing from a part to
//!   its child or parent.
//!
//! [`PoseGraphDecoder`] greedily assembles skeletons from this: the strongest remaining part
//! candidate becomes the root of a new instance, and the rest of the skeleton is found by following
//! the displacement fields along the pose chain.

pub mod queue;

use tsuiseki_geom::{num::dist_sq, Point};

use crate::{error::PredictError, nn::tensor::Tensor};

use self::queue::PriorityQueue;

/// A tree of parts connected by edges.
#[derive(Debug, Clone)]
pub struct PoseChain {
    names: &'static [&'static str],
    /// `(parent, child)` part indices.
    edges: Vec<(usize, usize)>,
}

impl PoseChain {
    /// Creates a chain from part names and `(parent, child)` name pairs.
    ///
    /// # Panics
    ///
    /// Panics if an edge references a part that is not in `names`.
    #[track_caller]
    pub fn new(names: &'static [&'static str], edges: &[(&str, &str)]) -> Self {
        let index = |name: &str| {
            names
                .iter()
                .position(|n| *n == name)
                .unwrap_or_else(|| panic!("pose chain references unknown part `{name}`"))
        };
        let edges = edges
            .iter()
            .map(|&(parent, child)| (index(parent), index(child)))
            .collect();
        Self { names, edges }
    }

    pub fn num_parts(&self) -> usize {
        self.names.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn part_names(&self) -> &'static [&'static str] {
        self.names
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }
}

/// Decoder settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeParams {
    /// Minimum heatmap score for root candidates and reported keypoints.
    pub min_confidence: f32,
    pub max_detected: usize,
    /// Two instances may not claim the same part within this many input pixels.
    pub nms_radius: f32,
    /// Input pixels per grid cell.
    pub output_stride: usize,
    /// Root candidates must be the maximum of their part within this many cells.
    pub local_max_radius: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            min_confidence: 0.2,
            max_detected: 1,
            nms_radius: 20.0,
            output_stride: 16,
            local_max_radius: 1,
        }
    }
}

/// A keypoint found by the decoder, in model input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedKeypoint {
    pub part: usize,
    /// `[x, y]` position.
    pub position: Point,
    pub score: f32,
}

/// A skeleton assembled by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPose {
    /// Keypoints with a score of at least `min_confidence`, plus the root, ordered by part.
    pub keypoints: Vec<DecodedKeypoint>,
    pub score: f32,
}

impl DecodedPose {
    pub fn keypoint(&self, part: usize) -> Option<&DecodedKeypoint> {
        self.keypoints.iter().find(|kp| kp.part == part)
    }
}

/// Row-major `[H, W, C]` view of a decoder input.
#[derive(Clone, Copy)]
struct Grid<'a> {
    data: &'a [f32],
    height: usize,
    width: usize,
    channels: usize,
}

impl<'a> Grid<'a> {
    fn new(name: &str, tensor: &'a Tensor) -> Result<Self, PredictError> {
        match *tensor.shape() {
            [height, width, channels] | [1, height, width, channels] => Ok(Self {
                data: tensor.data(),
                height,
                width,
                channels,
            }),
            _ => Err(PredictError::invalid(format!(
                "{name} must have shape [H, W, C], got {:?}",
                tensor.shape()
            ))),
        }
    }

    #[inline]
    fn get(&self, y: usize, x: usize, c: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + c]
    }
}

/// Grid cell with a part candidate.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    part: usize,
    y: usize,
    x: usize,
}

type CandidateQueue = PriorityQueue<Candidate, fn(&Candidate) -> f32>;

/// The decoder's input tensors, each `[H, W, C]` (a leading batch dimension of 1 is accepted).
pub struct DecoderInputs<'a> {
    /// `P` channels, already passed through sigmoid.
    pub heatmap: &'a Tensor,
    /// `2P` channels: y offsets of all parts, then x offsets.
    pub offsets: &'a Tensor,
    /// `2E` channels: dy of all edges, then dx. Point from parent to child.
    pub displacements_fwd: &'a Tensor,
    /// Same layout as `displacements_fwd`, pointing from child to parent.
    pub displacements_bwd: &'a Tensor,
}

/// Greedy multi-instance decoder.
#[derive(Debug, Clone)]
pub struct PoseGraphDecoder {
    chain: PoseChain,
    params: DecodeParams,
}

impl PoseGraphDecoder {
    pub fn new(chain: PoseChain, params: DecodeParams) -> Self {
        Self { chain, params }
    }

    pub fn chain(&self) -> &PoseChain {
        &self.chain
    }

    pub fn params(&self) -> &DecodeParams {
        &self.params
    }

    pub fn set_min_confidence(&mut self, min_confidence: f32) {
        self.params.min_confidence = min_confidence;
    }

    /// Decodes all instances, strongest root first.
    ///
    /// Never fails because of the tensor contents. Errors are only returned for tensor shapes that
    /// don't match each other or the pose chain.
    pub fn decode(&self, inputs: &DecoderInputs<'_>) -> Result<Vec<DecodedPose>, PredictError> {
        let heatmap = Grid::new("heatmap", inputs.heatmap)?;
        let offsets = Grid::new("offsets", inputs.offsets)?;
        let fwd = Grid::new("forward displacements", inputs.displacements_fwd)?;
        let bwd = Grid::new("backward displacements", inputs.displacements_bwd)?;

        let (p, e) = (self.chain.num_parts(), self.chain.num_edges());
        let expected = [(&heatmap, p), (&offsets, 2 * p), (&fwd, 2 * e), (&bwd, 2 * e)];
        for (grid, channels) in expected {
            if grid.height != heatmap.height
                || grid.width != heatmap.width
                || grid.channels != channels
            {
                return Err(PredictError::invalid(format!(
                    "decoder input of size {}x{}x{} does not match {}x{}x{channels}",
                    grid.height, grid.width, grid.channels, heatmap.height, heatmap.width,
                )));
            }
        }
        if heatmap.height == 0 || heatmap.width == 0 {
            return Ok(Vec::new());
        }

        let mut queue = self.build_queue(&heatmap);
        let radius_sq = self.params.nms_radius * self.params.nms_radius;
        let mut poses: Vec<Vec<Option<DecodedKeypoint>>> = Vec::new();
        let mut results = Vec::new();

        while results.len() < self.params.max_detected {
            let Some(root) = queue.pop() else { break };
            let root_pos = self.image_coords(&offsets, root.y, root.x, root.part);
            if within_radius(&poses, root_pos, root.part, radius_sq) {
                log::trace!("rejecting root candidate {root:?}, part already claimed");
                continue;
            }

            let keypoints = self.decode_pose(root, root_pos, &heatmap, &offsets, &fwd, &bwd);
            let score = keypoints
                .iter()
                .flatten()
                .filter(|kp| !within_radius(&poses, kp.position, kp.part, radius_sq))
                .map(|kp| kp.score)
                .sum::<f32>()
                / p as f32;

            let retained = keypoints
                .iter()
                .flatten()
                .filter(|kp| kp.part == root.part || kp.score >= self.params.min_confidence)
                .copied()
                .collect();
            results.push(DecodedPose {
                keypoints: retained,
                score,
            });
            poses.push(keypoints);
        }

        log::trace!("decoded {} poses", results.len());
        Ok(results)
    }

    /// Collects every part candidate that is a local maximum of its heatmap channel.
    fn build_queue(&self, heatmap: &Grid<'_>) -> CandidateQueue {
        let mut queue = CandidateQueue::new(|c: &Candidate| c.score);
        let r = self.params.local_max_radius;
        for y in 0..heatmap.height {
            for x in 0..heatmap.width {
                for part in 0..heatmap.channels {
                    let score = heatmap.get(y, x, part);
                    if score < self.params.min_confidence {
                        continue;
                    }

                    let is_max = (y.saturating_sub(r)..(y + r + 1).min(heatmap.height)).all(|cy| {
                        (x.saturating_sub(r)..(x + r + 1).min(heatmap.width))
                            .all(|cx| heatmap.get(cy, cx, part) <= score)
                    });
                    if is_max {
                        queue.push(Candidate { score, part, y, x });
                    }
                }
            }
        }
        queue
    }

    fn image_coords(&self, offsets: &Grid<'_>, y: usize, x: usize, part: usize) -> Point {
        let stride = self.params.output_stride as f32;
        let p = self.chain.num_parts();
        [
            x as f32 * stride + offsets.get(y, x, part + p),
            y as f32 * stride + offsets.get(y, x, part),
        ]
    }

    /// Nearest grid cell to a position, clamped to the grid.
    fn nearest_cell(&self, pos: Point, grid: &Grid<'_>) -> (usize, usize) {
        let stride = self.params.output_stride as f32;
        let clamp = |v: f32, len: usize| (v / stride).round().clamp(0.0, (len - 1) as f32) as usize;
        (clamp(pos[1], grid.height), clamp(pos[0], grid.width))
    }

    fn decode_pose(
        &self,
        root: Candidate,
        root_pos: Point,
        heatmap: &Grid<'_>,
        offsets: &Grid<'_>,
        fwd: &Grid<'_>,
        bwd: &Grid<'_>,
    ) -> Vec<Option<DecodedKeypoint>> {
        let mut keypoints = vec![None; self.chain.num_parts()];
        keypoints[root.part] = Some(DecodedKeypoint {
            part: root.part,
            position: root_pos,
            score: root.score,
        });

        let edges = self.chain.edges();
        for (edge, &(parent, child)) in edges.iter().enumerate().rev() {
            if let (Some(source), None) = (keypoints[child], keypoints[parent]) {
                keypoints[parent] =
                    Some(self.traverse(edge, source, parent, heatmap, offsets, bwd));
            }
        }
        for (edge, &(parent, child)) in edges.iter().enumerate() {
            if let (Some(source), None) = (keypoints[parent], keypoints[child]) {
                keypoints[child] = Some(self.traverse(edge, source, child, heatmap, offsets, fwd));
            }
        }

        keypoints
    }

    /// Follows the displacement field along `edge` from `source` to the `target` part.
    fn traverse(
        &self,
        edge: usize,
        source: DecodedKeypoint,
        target: usize,
        heatmap: &Grid<'_>,
        offsets: &Grid<'_>,
        displacements: &Grid<'_>,
    ) -> DecodedKeypoint {
        const REFINE_STEPS: usize = 2;

        let e = self.chain.num_edges();
        let (sy, sx) = self.nearest_cell(source.position, heatmap);
        let mut position = [
            source.position[0] + displacements.get(sy, sx, e + edge),
            source.position[1] + displacements.get(sy, sx, edge),
        ];
        for _ in 0..REFINE_STEPS {
            let (ty, tx) = self.nearest_cell(position, heatmap);
            position = self.image_coords(offsets, ty, tx, target);
        }

        let (ty, tx) = self.nearest_cell(position, heatmap);
        DecodedKeypoint {
            part: target,
            position,
            score: heatmap.get(ty, tx, target),
        }
    }
}

/// Returns whether an accepted pose already has `part` within the radius of `pos`.
fn within_radius(
    poses: &[Vec<Option<DecodedKeypoint>>],
    pos: Point,
    part: usize,
    radius_sq: f32,
) -> bool {
    poses.iter().any(|pose| match pose[part] {
        Some(kp) => dist_sq(kp.position, pos) <= radius_sq,
        None => false,
    })
}

/// The 17 parts of the COCO keypoint layout, in model output order.
pub const COCO_PARTS: &[&str] = &[
    "nose",
    "leftEye",
    "rightEye",
    "leftEar",
    "rightEar",
    "leftShoulder",
    "rightShoulder",
    "leftElbow",
    "rightElbow",
    "leftWrist",
    "rightWrist",
    "leftHip",
    "rightHip",
    "leftKnee",
    "rightKnee",
    "leftAnkle",
    "rightAnkle",
];

/// The COCO skeleton as a tree rooted at the nose.
pub const COCO_CHAIN: &[(&str, &str)] = &[
    ("nose", "leftEye"),
    ("leftEye", "leftEar"),
    ("nose", "rightEye"),
    ("rightEye", "rightEar"),
    ("nose", "leftShoulder"),
    ("leftShoulder", "leftElbow"),
    ("leftElbow", "leftWrist"),
    ("leftShoulder", "leftHip"),
    ("leftHip", "leftKnee"),
    ("leftKnee", "leftAnkle"),
    ("nose", "rightShoulder"),
    ("rightShoulder", "rightElbow"),
    ("rightElbow", "rightWrist"),
    ("rightShoulder", "rightHip"),
    ("rightHip", "rightKnee"),
    ("rightKnee", "rightAnkle"),
];

impl PoseChain {
    /// The 17-part, 16-edge COCO pose chain.
    pub fn coco() -> Self {
        Self::new(COCO_PARTS, COCO_CHAIN)
    }
}
