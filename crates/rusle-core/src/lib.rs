//! RUSLE soil-erosion estimation for a river basin.
//!
//! Raster factors R, K, LS and C are derived from independent collections,
//! stacked with a land-cover passthrough on one grid and reduced to mean
//! values per subbasin. See [`pipeline::RuslePipeline`] for the entry point.

pub mod collection;
pub mod config;
pub mod crs;
pub mod erosion;
pub mod error;
pub mod export;
pub mod factors;
pub mod parallel;
pub mod pipeline;
pub mod raster;
pub mod reproject;
pub mod source;
pub mod stack;
pub mod vector;
pub mod visual;
pub mod zonal;

pub use config::PipelineConfig;
pub use error::{Error, Result, ResultExt};
pub use pipeline::{PipelineResult, RuslePipeline};
