//! `turbotest watch` command implementation.
//!
//! A notify watcher runs on its own thread and forwards debounced batches of
//! changed paths; the main task applies them to the controller one batch at a
//! time until ctrl+c.

use super::refreshed_controller;
use crate::host::TerminalHost;
use miette::{IntoDiagnostic, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio::sync::mpsc;
use turbotest_core::config::SETTINGS_FILE;
use turbotest_core::package::MANIFEST_FILE;
use turbotest_core::{Config, NodeKind, Settings, TestController, EXCLUDE_DIRS};

/// Run the watch command.
pub fn run(config: &Config, active_file: Option<PathBuf>, debounce_ms: u64) -> Result<()> {
    let mut controller = refreshed_controller(config, active_file)?;
    report(&controller, config.json_logs);

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(watch_loop(
        config,
        &mut controller,
        Duration::from_millis(debounce_ms),
    ))?;

    controller.dispose();
    Ok(())
}

async fn watch_loop(
    config: &Config,
    controller: &mut TestController<TerminalHost>,
    debounce: Duration,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Vec<PathBuf>>(16);
    let root = config.cwd.clone();
    std::thread::spawn(move || {
        if let Err(e) = watch_files(&root, debounce, tx) {
            tracing::error!(error = %e, "File watcher stopped");
        }
    });

    if !config.json_logs {
        println!("Watching {} (ctrl+c to stop)", config.cwd.display());
    }

    loop {
        tokio::select! {
            batch = rx.recv() => {
                let Some(batch) = batch else {
                    break;
                };
                apply_batch(config, controller, &batch);
                report(controller, config.json_logs);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping watch");
                break;
            }
        }
    }

    Ok(())
}

/// Apply one batch of changed paths.
///
/// Manifest and settings changes can move package boundaries or patterns,
/// so they trigger a full refresh instead of per-file reconciliation.
fn apply_batch(config: &Config, controller: &mut TestController<TerminalHost>, batch: &[PathBuf]) {
    let needs_refresh = batch.iter().any(|p| {
        p.file_name()
            .is_some_and(|name| name == SETTINGS_FILE || name == MANIFEST_FILE)
    });

    if needs_refresh {
        match Settings::load(&config.cwd) {
            Ok(settings) => controller.set_settings(settings),
            Err(e) => tracing::warn!(error = %e, "Keeping previous settings"),
        }
        controller.refresh();
        return;
    }

    for path in batch {
        tracing::debug!(path = %path.display(), "File changed");
        controller.on_file_changed(path);
    }
}

fn report(controller: &TestController<TerminalHost>, json: bool) {
    let host = controller.host();
    let line = serde_json::json!({
        "packages": host.count(NodeKind::Package),
        "files": host.count(NodeKind::File),
        "suites": host.count(NodeKind::Suite),
        "cases": host.count(NodeKind::Case),
    });
    if json {
        println!("{line}");
    } else {
        println!(
            "{} package(s), {} file(s), {} suite(s), {} case(s)",
            line["packages"], line["files"], line["suites"], line["cases"]
        );
    }
}

fn should_ignore(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| match c {
            Component::Normal(name) => EXCLUDE_DIRS.iter().any(|d| name == *d),
            _ => false,
        })
}

/// Watch `root` recursively and send batches of changed paths.
///
/// A batch is flushed once no event arrived for `debounce`. Returns when the
/// receiving side is gone.
fn watch_files(root: &Path, debounce: Duration, batch_tx: mpsc::Sender<Vec<PathBuf>>) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, NotifyConfig::default()).into_diagnostic()?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .into_diagnostic()?;

    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();

    loop {
        let event = if pending.is_empty() {
            match rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            }
        } else {
            match rx.recv_timeout(debounce) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    let batch: Vec<PathBuf> = std::mem::take(&mut pending).into_iter().collect();
                    if batch_tx.blocking_send(batch).is_err() {
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        match event {
            Ok(event) => {
                if event.kind.is_access() {
                    continue;
                }
                pending.extend(event.paths.into_iter().filter(|p| !should_ignore(root, p)));
            }
            Err(e) => tracing::warn!(error = %e, "Watch error"),
        }
    }

    Ok(())
}
