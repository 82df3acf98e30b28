//! `turbotest run` command implementation.

use super::refreshed_controller;
use crate::host::Outcome;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::PathBuf;
use turbotest_core::{CancelToken, Config, RunOptions, RunSummary};

/// Exit code when any test failed.
const EXIT_TEST_FAILURE: i32 = 1;

/// Exit code when the run was interrupted.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Serialize)]
struct RunResult<'a> {
    ok: bool,
    requested: &'a [String],
    summary: RunSummary,
    results: &'a [Outcome],
}

/// Run the run command.
pub fn run(config: &Config, ids: Vec<String>, active_file: Option<PathBuf>) -> Result<()> {
    let mut controller = refreshed_controller(config, active_file)?;

    if controller.tree().is_empty() {
        if config.json_logs {
            let result = RunResult {
                ok: true,
                requested: &[],
                summary: RunSummary::default(),
                results: &[],
            };
            println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
        } else {
            println!("No tests found in {}", config.cwd.display());
        }
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let cancel = CancelToken::new();
    let options = RunOptions::new().with_test_ids(ids);

    let summary = runtime.block_on(async {
        let trigger = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling test run");
                trigger.cancel();
            }
        });
        controller.run_tests(&options, &cancel).await
    });

    let host = controller.host();
    if config.json_logs {
        let result = RunResult {
            ok: summary.success() && !summary.cancelled,
            requested: host.requested(),
            summary,
            results: host.outcomes(),
        };
        println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
    } else {
        println!();
        println!(
            "{} passed, {} failed, {} skipped{}",
            summary.passed,
            summary.failed,
            summary.skipped,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
    }

    if summary.cancelled {
        std::process::exit(EXIT_INTERRUPTED);
    }
    if !summary.success() {
        std::process::exit(EXIT_TEST_FAILURE);
    }
    Ok(())
}
