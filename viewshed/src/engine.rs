//! External viewshed engine invocation.
//!
//! The line-of-sight computation itself happens outside this crate. The
//! [`ViewshedProvider`] trait is the single seam to it: given an
//! [`EngineJob`], a provider returns the engine's raw standard output or a
//! structured [`EngineFault`]. [`ProcessEngine`] is the provider that runs the
//! engine as a subordinate process, one process per job.
//!
//! # Process contract
//!
//! The engine receives positional arguments after any configured leading
//! arguments:
//!
//! ```text
//! <program> [leading args...] <dsm_path> <longitude> <latitude> <mount_height> <max_distance>
//! ```
//!
//! It may print progress on stdout before its result; the last non-empty
//! stdout line must be the GeoJSON payload. Exit status `0` means success.
//! Standard error is diagnostic only: it is forwarded to the log and a bounded
//! tail is kept, but it is never parsed as a result.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::dsm::DsmReference;
use crate::error::ViewshedError;
use crate::output::parse_engine_output;
use crate::request::ViewshedRequest;

/// Maximum number of bytes of engine stderr kept for diagnostics.
pub const DIAGNOSTIC_TAIL_BYTES: usize = 4096;

/// Diagnostic phrases the engine prints when the observer is off the raster.
const OUT_OF_EXTENT_MARKERS: &[&str] = &["outside the dsm extent", "outside dsm extent"];

/// One viewshed computation handed to a provider.
#[derive(Debug, Clone)]
pub struct EngineJob {
    pub dsm_path: PathBuf,
    pub longitude: f64,
    pub latitude: f64,
    pub mount_height: f64,
    pub max_distance: f64,
    /// Deadline for the whole computation. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl EngineJob {
    /// Build a job for a validated request against a located DSM.
    pub fn new(dsm: &DsmReference, request: &ViewshedRequest) -> Self {
        Self {
            dsm_path: dsm.path.clone(),
            longitude: request.longitude,
            latitude: request.latitude,
            mount_height: request.mount_height,
            max_distance: request.max_distance,
            timeout: None,
        }
    }

    /// Set the deadline for this job.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Positional arguments in engine order.
    ///
    /// Numbers use Rust's shortest round-trip decimal form, which never
    /// switches to exponent notation.
    pub fn positional_args(&self) -> Vec<OsString> {
        vec![
            self.dsm_path.clone().into_os_string(),
            self.longitude.to_string().into(),
            self.latitude.to_string().into(),
            self.mount_height.to_string().into(),
            self.max_distance.to_string().into(),
        ]
    }
}

/// Structured failure reported by a [`ViewshedProvider`].
#[derive(Error, Debug)]
pub enum EngineFault {
    /// The engine could not be started at all.
    #[error("engine '{program}' could not be started: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The engine ran and reported failure.
    #[error("engine failed with exit code {code:?}")]
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },

    /// The engine was terminated at the deadline.
    #[error("engine timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    /// The observer point is not covered by the DSM.
    #[error("observer point is outside the DSM extent")]
    OutOfExtent { diagnostics: String },

    /// Reading the engine's output streams failed.
    #[error("engine IO error: {0}")]
    Io(#[from] io::Error),
}

impl EngineFault {
    /// Convert into the library error taxonomy.
    pub fn into_viewshed_error(self, job: &EngineJob) -> ViewshedError {
        match self {
            EngineFault::Unavailable { program, source } => {
                ViewshedError::EngineUnavailable { program, source }
            }
            EngineFault::Failed { code, diagnostics } => {
                ViewshedError::EngineExecutionFailed { code, diagnostics }
            }
            EngineFault::TimedOut { timeout } => ViewshedError::EngineTimeout { timeout },
            EngineFault::OutOfExtent { .. } => ViewshedError::OutOfExtent {
                lng: job.longitude,
                lat: job.latitude,
            },
            EngineFault::Io(e) => ViewshedError::Io(e),
        }
    }
}

/// Boxed future returned by [`ViewshedProvider::compute_viewshed`].
pub type EngineFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<String, EngineFault>> + Send + 'a>>;

/// A capability that computes viewsheds.
///
/// Implementations return the raw engine output; parsing and validation are
/// done by the caller. Implementations must honor [`EngineJob::timeout`].
pub trait ViewshedProvider: Send + Sync {
    /// Run one viewshed computation.
    fn compute_viewshed<'a>(&'a self, job: &'a EngineJob) -> EngineFuture<'a>;

    /// Returns the provider's name for logging and identification.
    fn name(&self) -> &str;
}

/// Runs the viewshed engine as a subordinate process.
///
/// # Example
///
/// ```ignore
/// use viewshed::ProcessEngine;
///
/// let engine = ProcessEngine::new("python3").arg("/opt/viewshed/process_dsm.py");
/// ```
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: String,
    leading_args: Vec<String>,
}

impl ProcessEngine {
    /// Create an engine that runs `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Append a leading argument, placed before the positional job arguments.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    /// Append several leading arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The program being executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Leading arguments passed before the job arguments.
    pub fn leading_args(&self) -> &[String] {
        &self.leading_args
    }

    /// Human-readable command line, without the per-job arguments.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.leading_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn run(&self, job: &EngineJob) -> std::result::Result<String, EngineFault> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(job.positional_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            command = %self.command_line(),
            dsm = %job.dsm_path.display(),
            lng = job.longitude,
            lat = job.latitude,
            mount_height = job.mount_height,
            max_distance = job.max_distance,
            "Spawning viewshed engine"
        );

        let mut child = command.spawn().map_err(|source| EngineFault::Unavailable {
            program: self.program.clone(),
            source,
        })?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("engine stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("engine stderr was not captured"))?;

        let start = Instant::now();
        let collect = async {
            tokio::join!(child.wait(), read_stdout(stdout), drain_stderr(stderr, pid))
        };

        let outcome = match job.timeout {
            Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
            None => Some(collect.await),
        };

        let (status, stdout, diagnostics) = match outcome {
            Some(outcome) => outcome,
            None => {
                let limit = job.timeout.unwrap_or_default();
                if let Err(e) = child.kill().await {
                    tracing::warn!(pid = ?pid, error = %e, "Failed to kill timed out engine");
                }
                tracing::warn!(
                    pid = ?pid,
                    timeout_ms = limit.as_millis() as u64,
                    "Viewshed engine timed out"
                );
                return Err(EngineFault::TimedOut { timeout: limit });
            }
        };

        let status = status?;
        let stdout = stdout?;
        let diagnostics = diagnostics?;

        tracing::debug!(
            pid = ?pid,
            exit_code = ?status.code(),
            stdout_bytes = stdout.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Viewshed engine exited"
        );

        // A usable result wins over extent text; progress lines alone do not.
        if diagnostics.out_of_extent
            && (!status.success() || parse_engine_output(&stdout).is_err())
        {
            return Err(EngineFault::OutOfExtent {
                diagnostics: diagnostics.tail,
            });
        }

        if !status.success() {
            return Err(EngineFault::Failed {
                code: status.code(),
                diagnostics: diagnostics.tail,
            });
        }

        Ok(stdout)
    }
}

impl ViewshedProvider for ProcessEngine {
    fn compute_viewshed<'a>(&'a self, job: &'a EngineJob) -> EngineFuture<'a> {
        Box::pin(self.run(job))
    }

    fn name(&self) -> &str {
        &self.program
    }
}

async fn read_stdout<R: AsyncRead + Unpin>(mut stdout: R) -> io::Result<String> {
    let mut buf = Vec::new();
    stdout.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// What was learned from the engine's stderr stream.
#[derive(Debug, Default)]
struct StderrSummary {
    tail: String,
    out_of_extent: bool,
}

impl StderrSummary {
    fn push(&mut self, line: &str) {
        let lower = line.to_lowercase();
        if OUT_OF_EXTENT_MARKERS.iter().any(|m| lower.contains(m)) {
            self.out_of_extent = true;
        }

        self.tail.push_str(line);
        self.tail.push('\n');
        if self.tail.len() > DIAGNOSTIC_TAIL_BYTES {
            let mut cut = self.tail.len() - DIAGNOSTIC_TAIL_BYTES;
            while !self.tail.is_char_boundary(cut) {
                cut += 1;
            }
            self.tail.drain(..cut);
        }
    }
}

async fn drain_stderr<R: AsyncRead + Unpin>(
    stderr: R,
    pid: Option<u32>,
) -> io::Result<StderrSummary> {
    let mut reader = BufReader::new(stderr);
    let mut summary = StderrSummary::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        tracing::info!(target: "viewshed::engine", pid = ?pid, "{}", line);
        summary.push(line);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> EngineJob {
        EngineJob {
            dsm_path: PathBuf::from("/data/dsm.tif"),
            longitude: -96.21095,
            latitude: 41.1982,
            mount_height: 30.0,
            max_distance: 500.0,
            timeout: None,
        }
    }

    #[test]
    fn test_positional_args_order() {
        let args = job().positional_args();
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["/data/dsm.tif", "-96.21095", "41.1982", "30", "500"]
        );
    }

    #[test]
    fn test_positional_args_never_use_exponent() {
        let mut job = job();
        job.longitude = 0.000001;
        job.max_distance = 1e21;
        let args = job.positional_args();
        assert_eq!(args[1].to_string_lossy(), "0.000001");
        assert!(!args[4].to_string_lossy().contains('e'));
    }

    #[test]
    fn test_command_line() {
        let engine = ProcessEngine::new("python3").args(["-u", "process_dsm.py"]);
        assert_eq!(engine.command_line(), "python3 -u process_dsm.py");
        assert_eq!(engine.name(), "python3");
    }

    #[test]
    fn test_stderr_summary_detects_extent() {
        let mut summary = StderrSummary::default();
        summary.push("DEBUG: Transformed point to DSM CRS");
        assert!(!summary.out_of_extent);
        summary.push("DEBUG: Point is outside the DSM extent.");
        assert!(summary.out_of_extent);
    }

    #[test]
    fn test_stderr_summary_tail_is_bounded() {
        let mut summary = StderrSummary::default();
        for i in 0..1000 {
            summary.push(&format!("progress line {} é", i));
        }
        assert!(summary.tail.len() <= DIAGNOSTIC_TAIL_BYTES);
        assert!(summary.tail.ends_with("progress line 999 é\n"));
    }

    #[test]
    fn test_fault_conversion() {
        let job = job();
        let err = EngineFault::OutOfExtent {
            diagnostics: String::new(),
        }
        .into_viewshed_error(&job);
        assert!(matches!(
            err,
            ViewshedError::OutOfExtent { lng, lat } if lng == -96.21095 && lat == 41.1982
        ));

        let err = EngineFault::Failed {
            code: Some(1),
            diagnostics: "oops".to_string(),
        }
        .into_viewshed_error(&job);
        assert!(matches!(
            err,
            ViewshedError::EngineExecutionFailed { code: Some(1), .. }
        ));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn shell(script: &str) -> ProcessEngine {
            ProcessEngine::new("sh").args(["-c", script, "engine"])
        }

        #[tokio::test]
        async fn test_passes_positional_args() {
            let engine = shell(r#"echo "$1|$2|$3|$4|$5""#);
            let out = engine.compute_viewshed(&job()).await.unwrap();
            assert_eq!(out.trim(), "/data/dsm.tif|-96.21095|41.1982|30|500");
        }

        #[tokio::test]
        async fn test_collects_full_stdout() {
            let engine = shell(r#"echo "progress"; echo '{"type":"FeatureCollection","features":[]}'"#);
            let out = engine.compute_viewshed(&job()).await.unwrap();
            assert_eq!(
                out,
                "progress\n{\"type\":\"FeatureCollection\",\"features\":[]}\n"
            );
        }

        #[tokio::test]
        async fn test_non_zero_exit() {
            let engine = shell("echo 'GDAL error: cannot open' >&2; exit 3");
            match engine.compute_viewshed(&job()).await {
                Err(EngineFault::Failed { code, diagnostics }) => {
                    assert_eq!(code, Some(3));
                    assert!(diagnostics.contains("GDAL error"));
                }
                other => panic!("expected Failed, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_missing_program() {
            let engine = ProcessEngine::new("/nonexistent/viewshed-engine");
            let result = engine.compute_viewshed(&job()).await;
            assert!(matches!(result, Err(EngineFault::Unavailable { .. })));
        }

        #[tokio::test]
        async fn test_timeout_kills_engine() {
            let engine = shell("sleep 5");
            let job = job().with_timeout(Some(Duration::from_millis(100)));

            let start = Instant::now();
            let result = engine.compute_viewshed(&job).await;
            assert!(matches!(result, Err(EngineFault::TimedOut { .. })));
            assert!(start.elapsed() < Duration::from_secs(4));
        }

        #[tokio::test]
        async fn test_out_of_extent_with_empty_output() {
            let engine = shell("echo 'DEBUG: Point is outside the DSM extent.' >&2");
            let result = engine.compute_viewshed(&job()).await;
            assert!(matches!(result, Err(EngineFault::OutOfExtent { .. })));
        }

        #[tokio::test]
        async fn test_out_of_extent_with_failure() {
            let engine = shell("echo 'Error: observer outside the DSM extent' >&2; exit 1");
            let result = engine.compute_viewshed(&job()).await;
            assert!(matches!(result, Err(EngineFault::OutOfExtent { .. })));
        }

        #[tokio::test]
        async fn test_out_of_extent_after_progress_output() {
            let engine = shell(
                "echo 'Opening DSM...'; echo 'DEBUG: Point is outside the DSM extent.' >&2",
            );
            let result = engine.compute_viewshed(&job()).await;
            assert!(matches!(result, Err(EngineFault::OutOfExtent { .. })));
        }

        #[tokio::test]
        async fn test_extent_text_ignored_when_result_present() {
            let engine = shell(
                "echo 'warning: part of range outside the DSM extent' >&2; echo '{\"type\":\"FeatureCollection\",\"features\":[]}'",
            );
            let result = engine.compute_viewshed(&job()).await;
            assert!(result.is_ok());
        }
    }
}
