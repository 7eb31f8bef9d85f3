//! Viewshed service orchestrating validation, DSM lookup, engine invocation
//! and output validation.
//!
//! # Example
//!
//! ```ignore
//! use viewshed::{ProcessEngine, RawViewshedRequest, ViewshedServiceBuilder};
//!
//! let service = ViewshedServiceBuilder::new("/data/dsm.tif")
//!     .engine(ProcessEngine::new("python3").arg("/opt/viewshed/process_dsm.py"))
//!     .build();
//!
//! let viewshed = service
//!     .compute(&RawViewshedRequest::new(-96.21095, 41.1982, 30.0))
//!     .await?;
//! println!("{} features", viewshed.response.features.len());
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use geojson::{FeatureCollection, JsonObject};

use crate::dsm::DsmLocator;
use crate::engine::{EngineFault, EngineJob, ProcessEngine, ViewshedProvider};
use crate::error::{Result, ViewshedError};
use crate::output::parse_engine_output;
use crate::request::{RawViewshedRequest, ViewshedRequest, DEFAULT_MAX_DISTANCE};
use crate::response::ViewshedResponse;
use crate::stats::CoverageStats;

/// Engine program used when none is configured.
pub const DEFAULT_ENGINE_PROGRAM: &str = "python3";

/// Engine script passed to [`DEFAULT_ENGINE_PROGRAM`] when none is configured.
pub const DEFAULT_ENGINE_SCRIPT: &str = "process_dsm.py";

/// Deadline applied to each engine run unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A computed viewshed.
#[derive(Debug, Clone)]
pub struct Viewshed {
    /// The validated request, with the default radius filled in.
    pub request: ViewshedRequest,
    /// The validated engine response.
    pub response: ViewshedResponse,
    /// Coverage summary, when the response carries a unit.
    pub stats: Option<CoverageStats>,
}

impl Viewshed {
    /// The response as a FeatureCollection, with the coverage summary
    /// attached as a `stats` foreign member when one was computed.
    ///
    /// `features` is exactly [`ViewshedResponse::to_feature_collection`].
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let mut collection = self.response.to_feature_collection();
        if let Some(stats) = self.stats.and_then(|s| serde_json::to_value(s).ok()) {
            let mut members = JsonObject::new();
            members.insert("stats".to_string(), stats);
            collection.foreign_members = Some(members);
        }
        collection
    }
}

/// Computes viewsheds against a single configured DSM.
///
/// The service holds no per-request state. Each call to
/// [`compute`](Self::compute) runs its own engine invocation, so the service
/// can be shared across concurrent requests behind an `Arc`.
pub struct ViewshedService {
    dsm: DsmLocator,
    provider: Arc<dyn ViewshedProvider>,
    default_max_distance: f64,
    timeout: Option<Duration>,
}

impl ViewshedService {
    /// Create a service with default settings and the given provider.
    pub fn new<P, V>(dsm_path: P, provider: V) -> Self
    where
        P: AsRef<Path>,
        V: ViewshedProvider + 'static,
    {
        ViewshedServiceBuilder::new(dsm_path).provider(provider).build()
    }

    /// Create a builder for configuring a service.
    pub fn builder<P: AsRef<Path>>(dsm_path: P) -> ViewshedServiceBuilder {
        ViewshedServiceBuilder::new(dsm_path)
    }

    /// Compute a viewshed using the configured deadline.
    ///
    /// # Errors
    ///
    /// Any [`ViewshedError`]. Validation and DSM lookup failures are returned
    /// before the engine is invoked.
    pub async fn compute(&self, raw: &RawViewshedRequest) -> Result<Viewshed> {
        self.compute_with_deadline(raw, self.timeout).await
    }

    /// Compute a viewshed with an explicit deadline, overriding the configured
    /// one. `None` waits for the engine indefinitely.
    pub async fn compute_with_deadline(
        &self,
        raw: &RawViewshedRequest,
        timeout: Option<Duration>,
    ) -> Result<Viewshed> {
        let request = raw.validate(self.default_max_distance)?;
        let dsm = self.dsm.locate().await?;
        let job = EngineJob::new(&dsm, &request).with_timeout(timeout);

        let start = Instant::now();
        let output = self
            .provider
            .compute_viewshed(&job)
            .await
            .map_err(|fault| {
                tracing::warn!(
                    provider = self.provider.name(),
                    lng = request.longitude,
                    lat = request.latitude,
                    error = %fault,
                    diagnostics = fault_diagnostics(&fault),
                    "Viewshed engine failed"
                );
                fault.into_viewshed_error(&job)
            })?;

        let response = parse_engine_output(&output)?;
        let stats = CoverageStats::from_response(&response, request.max_distance);

        tracing::info!(
            lng = request.longitude,
            lat = request.latitude,
            mount_height = request.mount_height,
            max_distance = request.max_distance,
            features = response.features.len(),
            units = ?response.units(),
            coverage_percent = stats.map(|s| s.coverage_percent),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Viewshed computed"
        );

        Ok(Viewshed {
            request,
            response,
            stats,
        })
    }

    /// The DSM locator.
    pub fn dsm(&self) -> &DsmLocator {
        &self.dsm
    }

    /// Name of the configured provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Deadline applied by [`compute`](Self::compute).
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Radius used when a request has no `maxDistance`.
    pub fn default_max_distance(&self) -> f64 {
        self.default_max_distance
    }
}

fn fault_diagnostics(fault: &EngineFault) -> &str {
    match fault {
        EngineFault::Failed { diagnostics, .. } | EngineFault::OutOfExtent { diagnostics } => {
            diagnostics
        }
        _ => "",
    }
}

/// Builder for [`ViewshedService`] with environment variable support.
///
/// # Environment Variables
///
/// When using [`ViewshedServiceBuilder::from_env`], the following variables are read:
///
/// | Variable | Description | Default |
/// |----------|-------------|---------|
/// | `VIEWSHED_DSM_PATH` | Path to the DSM raster | Required |
/// | `VIEWSHED_ENGINE` | Engine program | `python3` |
/// | `VIEWSHED_ENGINE_ARGS` | Whitespace-separated leading arguments | `process_dsm.py` |
/// | `VIEWSHED_ENGINE_TIMEOUT_SECS` | Engine deadline, `0` disables it | 300 |
/// | `VIEWSHED_DEFAULT_MAX_DISTANCE` | Radius when a request omits `maxDistance` | 500 |
pub struct ViewshedServiceBuilder {
    dsm_path: PathBuf,
    engine: ProcessEngine,
    provider: Option<Arc<dyn ViewshedProvider>>,
    default_max_distance: f64,
    timeout: Option<Duration>,
}

impl ViewshedServiceBuilder {
    /// Create a builder with default settings.
    pub fn new<P: AsRef<Path>>(dsm_path: P) -> Self {
        Self {
            dsm_path: dsm_path.as_ref().to_path_buf(),
            engine: ProcessEngine::new(DEFAULT_ENGINE_PROGRAM).arg(DEFAULT_ENGINE_SCRIPT),
            provider: None,
            default_max_distance: DEFAULT_MAX_DISTANCE,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Create a builder from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `VIEWSHED_DSM_PATH` is not set.
    pub fn from_env() -> Result<Self> {
        let dsm_path = std::env::var("VIEWSHED_DSM_PATH").map_err(|_| {
            ViewshedError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "VIEWSHED_DSM_PATH environment variable not set",
            ))
        })?;

        let program = std::env::var("VIEWSHED_ENGINE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENGINE_PROGRAM.to_string());

        let engine = match std::env::var("VIEWSHED_ENGINE_ARGS") {
            Ok(args) => ProcessEngine::new(program).args(args.split_whitespace()),
            Err(_) => ProcessEngine::new(program).arg(DEFAULT_ENGINE_SCRIPT),
        };

        let timeout = match std::env::var("VIEWSHED_ENGINE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_TIMEOUT),
        };

        let default_max_distance = std::env::var("VIEWSHED_DEFAULT_MAX_DISTANCE")
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(DEFAULT_MAX_DISTANCE);

        Ok(Self {
            dsm_path: PathBuf::from(dsm_path),
            engine,
            provider: None,
            default_max_distance,
            timeout,
        })
    }

    /// Set the DSM path.
    pub fn dsm_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.dsm_path = path.as_ref().to_path_buf();
        self
    }

    /// Set the engine process. Ignored if a custom provider is set.
    pub fn engine(mut self, engine: ProcessEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Use a custom provider instead of an engine process.
    pub fn provider<V: ViewshedProvider + 'static>(mut self, provider: V) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Set the engine deadline. `None` disables it.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the radius used when a request omits `maxDistance`.
    pub fn default_max_distance(mut self, distance: f64) -> Self {
        self.default_max_distance = distance;
        self
    }

    /// The engine process that will be used if no provider is set.
    pub fn engine_config(&self) -> &ProcessEngine {
        &self.engine
    }

    /// Build the service.
    pub fn build(self) -> ViewshedService {
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(self.engine) as Arc<dyn ViewshedProvider>);

        ViewshedService {
            dsm: DsmLocator::new(self.dsm_path),
            provider,
            default_max_distance: self.default_max_distance,
            timeout: self.timeout,
        }
    }
}
