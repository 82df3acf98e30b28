//! Turbo invocation synthesis.

use crate::tree::leaf_name;
use std::fmt::Write;

/// Options for a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Node ids to restrict the run to; empty runs everything.
    pub test_ids: Vec<String>,
    /// Debug run requested by the host.
    pub debug: bool,
}

impl RunOptions {
    /// Create options with no filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the run to `ids`.
    #[must_use]
    pub fn with_test_ids(mut self, ids: Vec<String>) -> Self {
        self.test_ids = ids;
        self
    }

    /// Set debug mode.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Build the shell command that runs `package_name`'s tests through turbo.
///
/// Each requested id contributes `--test="<leaf>"`, in order. Names are only
/// wrapped in double quotes; names containing `"` are not supported.
#[must_use]
pub fn build_command(binary: &str, package_name: &str, options: &RunOptions) -> String {
    let mut command = format!("{binary} run test --filter={package_name} -- --reporter=json");

    for id in &options.test_ids {
        let _ = write!(command, " --test=\"{}\"", leaf_name(id));
    }

    command
}
