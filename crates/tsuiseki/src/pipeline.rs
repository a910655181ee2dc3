//! The common pipeline interface and concurrent multi-pipeline tracking.

use std::env;

use anyhow::Context;

use crate::{
    error::PredictError,
    frame::Frame,
    landmark::Instance,
    timer::{FpsCounter, Timer},
};

/// The kind of object a [`Pipeline`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Face,
    Hand,
    Body,
}

/// A per-entity tracking pipeline.
///
/// Pipelines are stateful: they remember the regions they found in previous frames, so frames
/// should be passed in the order they were captured.
pub trait Pipeline: Send {
    fn kind(&self) -> EntityKind;

    /// Processes the next frame, returning all instances found in it.
    ///
    /// Finding nothing is not an error. Errors abort processing of this frame only; the cached
    /// state from the previous frames is kept.
    fn predict(&mut self, frame: &Frame) -> Result<Vec<Instance>, PredictError>;

    /// Returns the stage timers of this pipeline, for performance logging.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl<P: Pipeline + ?Sized> Pipeline for Box<P> {
    fn kind(&self) -> EntityKind {
        (**self).kind()
    }

    fn predict(&mut self, frame: &Frame) -> Result<Vec<Instance>, PredictError> {
        (**self).predict(frame)
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}

/// Results of one [`Tracker::predict`] call, one entry per pipeline in registration order.
pub type TrackerOutput = Vec<(EntityKind, Result<Vec<Instance>, PredictError>)>;

/// Runs several pipelines on the same frames concurrently.
pub struct Tracker {
    pipelines: Vec<Box<dyn Pipeline>>,
    pool: rayon::ThreadPool,
    fps: FpsCounter,
}

impl Tracker {
    /// Creates a tracker without pipelines.
    ///
    /// The size of the worker thread pool is read from the `TSUISEKI_THREADS` environment variable,
    /// falling back to rayon's default.
    pub fn new() -> anyhow::Result<Self> {
        let threads = match env::var("TSUISEKI_THREADS") {
            Ok(value) => Some(
                value
                    .parse::<usize>()
                    .with_context(|| format!("invalid value for TSUISEKI_THREADS: '{value}'"))?,
            ),
            Err(env::VarError::NotPresent) => None,
            Err(e) => return Err(e).context("failed to read TSUISEKI_THREADS"),
        };
        Self::with_threads(threads)
    }

    /// Creates a tracker whose thread pool has `threads` workers, or rayon's default if `None`.
    pub fn with_threads(threads: Option<usize>) -> anyhow::Result<Self> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("tsuiseki-worker-{i}"));
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build()?;
        log::debug!("tracker using {} worker threads", pool.current_num_threads());

        Ok(Self {
            pipelines: Vec::new(),
            pool,
            fps: FpsCounter::new("tracker"),
        })
    }

    /// Registers a pipeline. Its results are reported at the position it was added at.
    pub fn add<P: Pipeline + 'static>(&mut self, pipeline: P) {
        self.pipelines.push(Box::new(pipeline));
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Runs all pipelines on `frame` concurrently and waits for them to finish.
    ///
    /// A failing pipeline does not affect the others.
    pub fn predict(&mut self, frame: &Frame) -> TrackerOutput {
        let mut results: Vec<Result<Vec<Instance>, PredictError>> =
            self.pipelines.iter().map(|_| Ok(Vec::new())).collect();

        let pipelines = &mut self.pipelines;
        self.pool.scope(|s| {
            for (pipeline, slot) in pipelines.iter_mut().zip(results.iter_mut()) {
                s.spawn(move |_| *slot = pipeline.predict(frame));
            }
        });

        self.fps.tick_with(self.pipelines.iter().flat_map(|p| p.timers()));

        self.pipelines
            .iter()
            .map(|p| p.kind())
            .zip(results)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use tsuiseki_geom::Rect;

    use crate::test::solid_frame;

    use super::*;

    /// Reports one instance whose score is the frame's top-left red value.
    struct Probe {
        kind: EntityKind,
        barrier: Option<Arc<Barrier>>,
        calls: usize,
    }

    impl Pipeline for Probe {
        fn kind(&self) -> EntityKind {
            self.kind
        }

        fn predict(&mut self, frame: &Frame) -> Result<Vec<Instance>, PredictError> {
            if let Some(barrier) = &self.barrier {
                // deadlocks unless all probes run at the same time
                barrier.wait();
            }
            self.calls += 1;
            let score = frame.pixel(0, 0)[0];
            Ok(vec![Instance::new(
                self.calls,
                Rect::from_top_left(0.0, 0.0, 1.0, 1.0),
                frame.resolution(),
                score,
            )])
        }
    }

    struct Broken;

    impl Pipeline for Broken {
        fn kind(&self) -> EntityKind {
            EntityKind::Hand
        }

        fn predict(&mut self, _: &Frame) -> Result<Vec<Instance>, PredictError> {
            Err(anyhow::anyhow!("out of memory").into())
        }
    }

    #[test]
    fn runs_pipelines_concurrently() {
        let barrier = Arc::new(Barrier::new(3));
        let mut tracker = Tracker::with_threads(Some(3)).unwrap();
        for kind in [EntityKind::Face, EntityKind::Hand, EntityKind::Body] {
            tracker.add(Probe {
                kind,
                barrier: Some(barrier.clone()),
                calls: 0,
            });
        }
        assert_eq!(tracker.len(), 3);

        let frame = solid_frame(4, 4, 0.25);
        for round in 1..=2 {
            let results = tracker.predict(&frame);
            let kinds = results.iter().map(|(k, _)| *k).collect::<Vec<_>>();
            assert_eq!(kinds, [EntityKind::Face, EntityKind::Hand, EntityKind::Body]);
            for (_, result) in results {
                let instances = result.unwrap();
                assert_eq!(instances.len(), 1);
                assert_eq!(instances[0].id, round);
                assert_eq!(instances[0].score, 0.25);
            }
        }
    }

    #[test]
    fn errors_stay_per_pipeline() {
        let mut tracker = Tracker::with_threads(Some(1)).unwrap();
        tracker.add(Broken);
        tracker.add(Box::new(Probe {
            kind: EntityKind::Body,
            barrier: None,
            calls: 0,
        }));

        let results = tracker.predict(&solid_frame(2, 2, 1.0));
        assert!(matches!(results[0], (EntityKind::Hand, Err(PredictError::Inference(_)))));
        assert!(matches!(&results[1], (EntityKind::Body, Ok(v)) if v.len() == 1));
    }

    #[test]
    fn empty_tracker() {
        let mut tracker = Tracker::with_threads(None).unwrap();
        assert!(tracker.is_empty());
        assert!(tracker.predict(&solid_frame(2, 2, 0.0)).is_empty());
    }
}
