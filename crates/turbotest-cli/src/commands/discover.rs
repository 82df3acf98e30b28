//! `turbotest discover` command implementation.

use super::refreshed_controller;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::PathBuf;
use turbotest_core::version::SCHEMA_VERSION;
use turbotest_core::{Config, NodeKind, NodeView, TestTree};

#[derive(Serialize)]
struct DiscoverResult<'a> {
    ok: bool,
    schema_version: u32,
    root: &'a std::path::Path,
    packages: usize,
    files: usize,
    suites: usize,
    cases: usize,
    tree: Vec<NodeView>,
}

fn count(tree: &TestTree, kind: NodeKind) -> usize {
    tree.preorder().iter().filter(|n| n.kind == kind).count()
}

/// Run the discover command.
pub fn run(config: &Config, active_file: Option<PathBuf>) -> Result<()> {
    let controller = refreshed_controller(config, active_file)?;
    let tree = controller.tree();

    if config.json_logs {
        let result = DiscoverResult {
            ok: true,
            schema_version: SCHEMA_VERSION,
            root: &config.cwd,
            packages: count(tree, NodeKind::Package),
            files: count(tree, NodeKind::File),
            suites: count(tree, NodeKind::Suite),
            cases: count(tree, NodeKind::Case),
            tree: tree.to_view(),
        };
        println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
        return Ok(());
    }

    if tree.is_empty() {
        println!("No package found in {}", config.cwd.display());
        println!("hint: run inside a directory with a named package.json");
        return Ok(());
    }

    for view in tree.to_view() {
        print_view(&view, 0);
    }
    println!();
    println!(
        "{} package(s), {} file(s), {} suite(s), {} case(s)",
        count(tree, NodeKind::Package),
        count(tree, NodeKind::File),
        count(tree, NodeKind::Suite),
        count(tree, NodeKind::Case)
    );
    Ok(())
}

fn print_view(view: &NodeView, depth: usize) {
    let indent = "  ".repeat(depth);
    match (view.kind, view.line) {
        (NodeKind::Package, _) => println!("{indent}{} ({})", view.label, view.location.display()),
        (_, Some(line)) => println!("{indent}{} [{}:{}]", view.label, line + 1, view.column.unwrap_or(0) + 1),
        (_, None) => println!("{indent}{}", view.label),
    }
    for child in &view.children {
        print_view(child, depth + 1);
    }
}
