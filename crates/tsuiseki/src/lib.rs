//! Tsuiseki realtime landmark tracking library.
//!
//! Tsuiseki locates faces, hands and bodies in a stream of video frames and tracks their landmarks
//! from frame to frame. Every entity type has its own [`Pipeline`]:
//!
//! * [`face::FacePipeline`]: face detection, a dense 468-point face mesh, and optional iris
//!   refinement.
//! * [`hand::HandPipeline`]: palm detection and a 21-point hand skeleton.
//! * [`body::PoseNetPipeline`]: multi-person pose estimation from heatmaps and displacement fields.
//! * [`body::RegressionPipeline`]: single-person pose estimation from direct keypoint regression.
//!
//! Pipelines keep their detected regions in a [`cache::RegionCache`], so that the expensive coarse
//! detector only has to run every few frames. Several pipelines can process the same [`Frame`]
//! concurrently via [`pipeline::Tracker`].
//!
//! # Coordinates
//!
//! All returned coordinates are in pixels of the source frame: X points to the right, Y points
//! *down*. Z coordinates are relative depth values whose scale depends on the model that produced
//! them.
//!
//! # Environment Variables
//!
//! * `RUST_LOG`: overrides the log filters installed by [`init_logger!`].
//! * `TSUISEKI_THREADS`: number of worker threads used by [`pipeline::Tracker`]. If unset, rayon's
//!   default is used.
//!
//! [`Pipeline`]: pipeline::Pipeline
//! [`Frame`]: frame::Frame

use log::LevelFilter;

pub mod body;
pub mod cache;
pub mod config;
pub mod decode;
pub mod detection;
pub mod error;
pub mod face;
pub mod frame;
pub mod hand;
pub mod iter;
pub mod landmark;
pub mod nn;
pub mod normalize;
pub mod pipeline;
pub mod timer;

pub use tsuiseki_geom as geom;

#[cfg(test)]
mod test;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and Tsuiseki will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// `tract` will always log at *warn* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
