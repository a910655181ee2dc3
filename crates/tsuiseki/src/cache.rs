//! Region-of-interest caching across frames.
//!
//! Running the coarse detector on every frame is expensive, and the landmarks found in one frame
//! already tell us where to look in the next. A [`RegionCache`] keeps one slot per tracked object
//! and decides on each frame whether the detector has to run again.
//!
//! Each frame goes through the same steps:
//!
//! 1. [`RegionCache::refresh_if_needed`] runs the detector if the cache is stale, and replaces all
//!    slots with the fresh regions if the number of objects changed.
//! 2. The pipeline runs its landmark model on every [`RegionCache::regions`] entry, and derives the
//!    next frame's region from the landmarks.
//! 3. [`RegionCache::finish_pass`] stores those regions, evicting the slots whose landmark model
//!    lost track of its object.

use std::time::{Duration, Instant};

use tsuiseki_geom::Rect;

use crate::{config::CacheConfig, error::PredictError, iter::zip_exact};

/// Where the contents of a [`Region`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fresh from the coarse detector. Landmarks are the detector's keypoints.
    Detector,
    /// Derived from the previous frame's landmark model output.
    Landmarks,
}

/// A region of interest, with the landmarks that were found in or that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub rect: Rect,
    pub landmarks: Option<Vec<[f32; 3]>>,
    pub confidence: f32,
    pub origin: Origin,
}

impl Region {
    /// Creates a region from a detector result.
    pub fn detected(rect: Rect, keypoints: Vec<[f32; 3]>, confidence: f32) -> Self {
        Self {
            rect,
            landmarks: Some(keypoints),
            confidence,
            origin: Origin::Detector,
        }
    }

    /// Creates a region from landmark model output.
    pub fn tracked(rect: Rect, landmarks: Vec<[f32; 3]>, confidence: f32) -> Self {
        Self {
            rect,
            landmarks: Some(landmarks),
            confidence,
            origin: Origin::Landmarks,
        }
    }

    pub fn landmarks(&self) -> &[[f32; 3]] {
        self.landmarks.as_deref().unwrap_or(&[])
    }
}

/// A cache slot.
#[derive(Debug, Clone)]
pub struct Entry {
    pub region: Region,
    /// Confidence of the last landmark model pass, or of the detector for new slots.
    pub last_confidence: f32,
    /// Number of frames since the detector last ran for this slot.
    pub frames_since_detect: u32,
}

/// What happens to a slot after a landmark pass.
#[derive(Debug, Clone)]
pub enum SlotOutcome {
    /// Track the object in this region in the next frame.
    Keep(Region),
    /// The object was lost.
    Evict,
}

/// What [`RegionCache::refresh_if_needed`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// The cached regions were reused without running the detector.
    Reused,
    /// The detector ran. If `reset` is set, all slots were replaced with its results.
    Detected { reset: bool },
}

/// Rules for when cached regions may be reused.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    pub skip_frames: u32,
    pub skip_time: Duration,
    /// Number of objects the pipeline tracks at most.
    pub max_tracked: usize,
    /// Whether a landmark model refines the detector's regions. If not, every detector run
    /// replaces the cache.
    pub landmarks_enabled: bool,
    /// New regions overlapping the slot's previous region by more than this keep the previous
    /// rectangle.
    pub reuse_iou: f32,
}

impl CachePolicy {
    pub fn new(config: &CacheConfig, max_tracked: usize, landmarks_enabled: bool) -> Self {
        Self {
            skip_frames: config.skip_frames,
            skip_time: config.skip_time,
            max_tracked,
            landmarks_enabled,
            reuse_iou: config.reuse_iou,
        }
    }
}

/// Per-pipeline region cache.
#[derive(Debug)]
pub struct RegionCache {
    policy: CachePolicy,
    entries: Vec<Entry>,
    skipped: u32,
    last_detection: Option<Instant>,
}

impl RegionCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
            skipped: 0,
            last_detection: None,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Returns the number of tracked slots.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of consecutive frames that reused cached regions.
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Returns the region of every slot, in slot order.
    pub fn regions(&self) -> impl ExactSizeIterator<Item = &Region> + '_ {
        self.entries.iter().map(|e| &e.region)
    }

    /// Returns whether the detector has to run on the current frame.
    ///
    /// `skip_allowed` is the verdict of the frame-change gate for this frame.
    pub fn is_stale(&self, skip_allowed: bool, now: Instant) -> bool {
        let within_time = match self.last_detection {
            Some(last) => now.saturating_duration_since(last) < self.policy.skip_time,
            None => false,
        };
        let within_frames = self.skipped < self.policy.skip_frames;
        !skip_allowed || !within_time || !within_frames || self.entries.is_empty()
    }

    /// Runs `detect` if the cache is stale, and updates the slots with its results.
    ///
    /// `detect` returns fresh regions in the frame, already adjusted for the entity. All slots are
    /// replaced with them if their count differs from the tracked count (unless the maximum number
    /// of objects is already tracked), or if landmarks are disabled. Otherwise the tracked regions
    /// are kept, since they are more precise than the detector's.
    ///
    /// A detector run that finds nothing always empties the cache.
    pub fn refresh_if_needed<F>(
        &mut self,
        skip_allowed: bool,
        now: Instant,
        detect: F,
    ) -> Result<Refresh, PredictError>
    where
        F: FnOnce() -> Result<Vec<Region>, PredictError>,
    {
        if !self.is_stale(skip_allowed, now) {
            self.skipped += 1;
            for entry in &mut self.entries {
                entry.frames_since_detect += 1;
            }
            log::trace!(
                "reusing {} cached regions ({} skipped)",
                self.entries.len(),
                self.skipped
            );
            return Ok(Refresh::Reused);
        }

        let mut fresh = detect()?;
        fresh.truncate(self.policy.max_tracked);
        self.skipped = 0;
        self.last_detection = Some(now);

        let n = fresh.len();
        let tracked = self.entries.len();
        let reset = if n == 0 {
            tracked > 0
        } else {
            (n != tracked && tracked != self.policy.max_tracked) || !self.policy.landmarks_enabled
        };
        if reset {
            log::trace!("resetting region cache: {tracked} tracked, {n} detected");
            self.entries = fresh
                .into_iter()
                .map(|region| Entry {
                    last_confidence: region.confidence,
                    region,
                    frames_since_detect: 0,
                })
                .collect();
        } else {
            for entry in &mut self.entries {
                entry.frames_since_detect = 0;
            }
        }

        Ok(Refresh::Detected { reset })
    }

    /// Applies the results of a landmark pass over all slots.
    ///
    /// `outcomes` must contain exactly one entry per slot, in slot order. Evicted slots are removed
    /// and the remaining slots are renumbered.
    ///
    /// # Panics
    ///
    /// Panics if `outcomes` doesn't match the number of slots.
    #[track_caller]
    pub fn finish_pass(&mut self, outcomes: Vec<SlotOutcome>) {
        let reuse_iou = self.policy.reuse_iou;
        let entries = std::mem::take(&mut self.entries);
        self.entries = zip_exact(entries, outcomes)
            .enumerate()
            .filter_map(|(slot, (mut entry, outcome))| match outcome {
                SlotOutcome::Keep(mut region) => {
                    let iou = region.rect.iou(&entry.region.rect);
                    if iou > reuse_iou {
                        region.rect = entry.region.rect;
                    }
                    entry.last_confidence = region.confidence;
                    entry.region = region;
                    Some(entry)
                }
                SlotOutcome::Evict => {
                    log::trace!("evicting slot {slot} (confidence {})", entry.last_confidence);
                    None
                }
            })
            .collect();
    }
}
