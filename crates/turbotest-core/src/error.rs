use std::path::PathBuf;
use thiserror::Error;

/// Core error type for turbotest operations.
///
/// Absence conditions (no package, no test files, no node for a result) are
/// never errors; they surface as `None` or empty collections.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No JSON output found in test results")]
    NoJsonOutput,

    #[error("Failed to parse test results: {0}")]
    ResultParse(#[source] serde_json::Error),

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Test command exited with code {code} and produced no output{}", stderr_suffix(.stderr))]
    ProcessFailed { code: i32, stderr: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
