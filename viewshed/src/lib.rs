//! # Viewshed - DSM line-of-sight orchestration
//!
//! Computes the terrain visible from an observer by delegating the
//! line-of-sight computation to an external engine (a GDAL viewshed script)
//! and validating what it returns.
//!
//! ## Features
//!
//! - **Validated input**: coordinates and heights are checked before any process is spawned
//! - **Isolated engine runs**: one subordinate process per request, with a deadline
//! - **Trusted output**: engine GeoJSON is decoded into a closed, typed feature union
//! - **Classified errors**: every failure maps to a client or server category
//!
//! ## Quick Start
//!
//! ```ignore
//! use viewshed::{RawViewshedRequest, ViewshedServiceBuilder};
//!
//! let service = ViewshedServiceBuilder::from_env()?.build();
//!
//! let request = RawViewshedRequest::new(-96.21095, 41.1982, 30.0).with_max_distance(800.0);
//! let viewshed = service.compute(&request).await?;
//!
//! if let Some(stats) = viewshed.stats {
//!     println!("{:.1}% visible", stats.coverage_percent);
//! }
//! ```
//!
//! ## Engine Contract
//!
//! The engine is called as
//! `<program> [args...] <dsm_path> <lng> <lat> <mount_height> <max_distance>`
//! and must print the result FeatureCollection as the last non-empty line of
//! stdout, exiting with status 0. See [`engine`] for details.

pub mod dsm;
pub mod engine;
pub mod error;
pub mod output;
pub mod request;
pub mod response;
pub mod service;
pub mod stats;

// Re-export main types at crate root for convenience
pub use dsm::{DsmLocator, DsmReference};
pub use engine::{EngineFault, EngineFuture, EngineJob, ProcessEngine, ViewshedProvider};
pub use error::{ErrorCategory, Result, ViewshedError};
pub use output::parse_engine_output;
pub use request::{RawViewshedRequest, ViewshedRequest, DEFAULT_MAX_DISTANCE};
pub use response::{
    AnalysisRangeFeature, ObserverFeature, Units, ViewshedFeature, ViewshedResponse,
    VisibleAreaFeature,
};
pub use service::{Viewshed, ViewshedService, ViewshedServiceBuilder, DEFAULT_TIMEOUT};
pub use stats::CoverageStats;
