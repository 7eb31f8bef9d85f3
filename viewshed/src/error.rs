//! Error types for the viewshed library.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which side of the service boundary a failure belongs to.
///
/// Client errors mean the request cannot be satisfied as given; server errors
/// mean the system failed to produce a result despite valid input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller's request is unsatisfiable (HTTP 400).
    Client,
    /// The system failed to produce a result (HTTP 500).
    Server,
}

/// Errors that can occur while computing a viewshed.
///
/// The `Display` output is meant for operators and may contain file paths or
/// engine diagnostics. Use [`ViewshedError::public_message`] for anything that
/// is returned to a caller.
#[derive(Error, Debug)]
pub enum ViewshedError {
    /// The request is missing a field or a value is out of range.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// The configured DSM file is missing or unreadable.
    #[error("DSM file not found: {path}")]
    DsmNotFound { path: PathBuf },

    /// The engine process could not be started.
    #[error("Viewshed engine '{program}' could not be started: {source}")]
    EngineUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine exited with a non-zero status.
    #[error("Viewshed engine exited with {}: {diagnostics}", exit_code_label(.code))]
    EngineExecutionFailed {
        code: Option<i32>,
        diagnostics: String,
    },

    /// The engine did not finish before the deadline and was terminated.
    #[error("Viewshed engine did not finish within {}s", .timeout.as_secs_f64())]
    EngineTimeout { timeout: Duration },

    /// The engine exited successfully but printed nothing usable.
    #[error("Viewshed engine produced no output")]
    EmptyEngineOutput,

    /// The engine output is not a valid viewshed FeatureCollection.
    #[error("Invalid GeoJSON from viewshed engine: {message} (payload: {payload})")]
    InvalidGeojsonFormat { message: String, payload: String },

    /// The observer point lies outside the DSM's spatial extent.
    #[error("Observer point is outside the DSM extent: lng={lng}, lat={lat}")]
    OutOfExtent { lng: f64, lat: f64 },

    /// IO error while talking to the engine process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl ViewshedError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        ViewshedError::InvalidInput {
            message: message.into(),
        }
    }

    /// Classify this error as a client or server failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ViewshedError::InvalidInput { .. }
            | ViewshedError::DsmNotFound { .. }
            | ViewshedError::OutOfExtent { .. } => ErrorCategory::Client,
            ViewshedError::EngineUnavailable { .. }
            | ViewshedError::EngineExecutionFailed { .. }
            | ViewshedError::EngineTimeout { .. }
            | ViewshedError::EmptyEngineOutput
            | ViewshedError::InvalidGeojsonFormat { .. }
            | ViewshedError::Io(_) => ErrorCategory::Server,
        }
    }

    /// Message safe to return to a caller.
    ///
    /// Never includes file paths, engine diagnostics or raw engine output.
    pub fn public_message(&self) -> String {
        match self {
            ViewshedError::InvalidInput { message } => message.clone(),
            ViewshedError::DsmNotFound { .. } => "DSM file not found".to_string(),
            ViewshedError::EngineUnavailable { .. } => {
                "Viewshed engine is unavailable".to_string()
            }
            ViewshedError::EngineExecutionFailed { .. } => {
                "Viewshed computation failed".to_string()
            }
            ViewshedError::EngineTimeout { .. } => "Viewshed computation timed out".to_string(),
            ViewshedError::EmptyEngineOutput => {
                "Invalid viewshed format: engine produced no result".to_string()
            }
            ViewshedError::InvalidGeojsonFormat { message, .. } => {
                format!("Invalid viewshed format: {}", message)
            }
            ViewshedError::OutOfExtent { .. } => {
                "Observer point is outside the DSM extent".to_string()
            }
            ViewshedError::Io(_) => "Viewshed computation failed".to_string(),
        }
    }
}

/// Result type alias using [`ViewshedError`].
pub type Result<T> = std::result::Result<T, ViewshedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ViewshedError::DsmNotFound {
            path: PathBuf::from("/data/dsm.tif"),
        };
        assert!(err.to_string().contains("/data/dsm.tif"));

        let err = ViewshedError::EngineExecutionFailed {
            code: Some(2),
            diagnostics: "Traceback".to_string(),
        };
        assert!(err.to_string().contains("status 2"));

        let err = ViewshedError::EngineExecutionFailed {
            code: None,
            diagnostics: String::new(),
        };
        assert!(err.to_string().contains("signal"));

        let err = ViewshedError::EngineTimeout {
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_category() {
        assert_eq!(
            ViewshedError::invalid_input("bad").category(),
            ErrorCategory::Client
        );
        assert_eq!(
            ViewshedError::DsmNotFound {
                path: PathBuf::from("x")
            }
            .category(),
            ErrorCategory::Client
        );
        assert_eq!(
            ViewshedError::OutOfExtent { lng: 0.0, lat: 0.0 }.category(),
            ErrorCategory::Client
        );
        assert_eq!(
            ViewshedError::EmptyEngineOutput.category(),
            ErrorCategory::Server
        );
        assert_eq!(
            ViewshedError::EngineTimeout {
                timeout: Duration::from_secs(1)
            }
            .category(),
            ErrorCategory::Server
        );
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = ViewshedError::DsmNotFound {
            path: PathBuf::from("/srv/secret/dsm.tif"),
        };
        assert!(!err.public_message().contains("/srv/secret"));

        let err = ViewshedError::EngineExecutionFailed {
            code: Some(1),
            diagnostics: "File \"/opt/engine/process_dsm.py\", line 12".to_string(),
        };
        assert!(!err.public_message().contains("process_dsm.py"));

        let err = ViewshedError::InvalidGeojsonFormat {
            message: "payload is not valid JSON".to_string(),
            payload: "Surface elevation from DSM: 1021.4ft".to_string(),
        };
        let message = err.public_message();
        assert!(message.starts_with("Invalid viewshed format: "));
        assert!(!message.contains("Surface elevation"));
    }
}
