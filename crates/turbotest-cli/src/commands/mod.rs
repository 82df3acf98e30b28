pub mod discover;
pub mod run;
pub mod version;
pub mod watch;

use crate::host::TerminalHost;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use turbotest_core::{Config, Settings, TestController};

/// Load settings for the workspace and build a refreshed controller.
pub(crate) fn refreshed_controller(
    config: &Config,
    active_file: Option<PathBuf>,
) -> Result<TestController<TerminalHost>> {
    let settings = Settings::load(&config.cwd).into_diagnostic()?;
    tracing::debug!(?settings, "Loaded settings");

    let mut controller = TestController::new(
        Some(config.cwd.clone()),
        settings,
        TerminalHost::new(config.json_logs),
    );
    controller.set_active_file(active_file);
    controller.refresh();
    Ok(controller)
}
