use crate::discover::DEFAULT_TEST_PATTERNS;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the optional workspace settings file.
pub const SETTINGS_FILE: &str = "turbotest.json";

/// Environment variable overriding the turbo binary invocation.
pub const BINARY_ENV: &str = "TURBOTEST_BINARY";

/// Default invocation used to reach the turbo CLI.
pub const DEFAULT_TURBO_BINARY: &str = "npx turbo";

/// Runtime configuration for the turbotest CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory (the workspace root).
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Discovery and execution settings, read from `turbotest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Glob patterns selecting test files by name.
    pub test_match: Vec<String>,
    /// Command prefix used to invoke turbo (e.g. `npx turbo`, `pnpm turbo`).
    pub turbo_binary_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            test_match: DEFAULT_TEST_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
            turbo_binary_path: DEFAULT_TURBO_BINARY.to_string(),
        }
    }
}

impl Settings {
    /// Load settings for a workspace root.
    ///
    /// A missing settings file yields defaults. Empty values fall back to the
    /// defaults as well, and `TURBOTEST_BINARY` overrides the binary path.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join(SETTINGS_FILE);
        let mut settings = if path.is_file() {
            let content = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<Self>(&content)
                .map_err(|source| Error::ConfigParse { path, source })?
        } else {
            Self::default()
        };

        if let Ok(binary) = std::env::var(BINARY_ENV) {
            settings.turbo_binary_path = binary;
        }
        Ok(settings.normalized())
    }

    /// Replace empty fields with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.test_match.is_empty() {
            self.test_match = defaults.test_match;
        }
        if self.turbo_binary_path.trim().is_empty() {
            self.turbo_binary_path = defaults.turbo_binary_path;
        }
        self
    }

    /// Set test patterns.
    #[must_use]
    pub fn with_test_match(mut self, patterns: Vec<String>) -> Self {
        self.test_match = patterns;
        self
    }

    /// Set the turbo binary invocation.
    #[must_use]
    pub fn with_turbo_binary(mut self, binary: impl Into<String>) -> Self {
        self.turbo_binary_path = binary.into();
        self
    }
}
