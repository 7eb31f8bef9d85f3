pub mod batch;
pub mod check;
pub mod run;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use viewshed::service::DEFAULT_ENGINE_SCRIPT;
use viewshed::{ProcessEngine, ViewshedService, ViewshedServiceBuilder};

/// Engine and DSM settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dsm: Option<PathBuf>,
    pub engine: String,
    pub engine_args: Vec<String>,
    pub timeout_secs: u64,
    pub default_max_distance: f64,
}

impl EngineOptions {
    pub fn dsm_path(&self) -> Result<&PathBuf> {
        self.dsm
            .as_ref()
            .context("VIEWSHED_DSM_PATH environment variable not set. Use --dsm or set VIEWSHED_DSM_PATH")
    }

    /// The engine process; an empty argument list falls back to the default script.
    pub fn engine(&self) -> ProcessEngine {
        let args: Vec<&str> = self
            .engine_args
            .iter()
            .map(String::as_str)
            .filter(|a| !a.is_empty())
            .collect();

        let engine = ProcessEngine::new(self.engine.clone());
        if args.is_empty() {
            engine.arg(DEFAULT_ENGINE_SCRIPT)
        } else {
            engine.args(args)
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn build_service(&self) -> Result<ViewshedService> {
        if !(self.default_max_distance.is_finite() && self.default_max_distance > 0.0) {
            bail!(
                "Default max distance must be a positive number, got {}",
                self.default_max_distance
            );
        }

        Ok(ViewshedServiceBuilder::new(self.dsm_path()?)
            .engine(self.engine())
            .timeout(self.timeout())
            .default_max_distance(self.default_max_distance)
            .build())
    }
}
