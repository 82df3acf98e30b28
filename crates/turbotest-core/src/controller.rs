//! Test orchestration.
//!
//! [`TestController`] owns the test tree and drives the full cycle: package
//! resolution, discovery, incremental reconciliation on file changes, and
//! grouped execution through turbo with results mapped back onto nodes. Every
//! observable effect goes through a [`TestHost`].

use crate::command::{build_command, RunOptions};
use crate::config::Settings;
use crate::discover::{find_with, TestPatterns};
use crate::exec::{execute, OutputSink};
use crate::package::{
    detect_package_from_file, detect_package_from_path, detect_workspace_packages,
    DetectedPackage,
};
use crate::parser::parse_file_at;
use crate::results::{TestResult, TestStatus};
use crate::tree::{NodeKind, TestNode, TestTree};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use turbotest_util::fs::relative_slash_path;
use turbotest_util::text::offset_to_position;

/// Which process stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Per-node state reported during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TestState {
    Enqueued,
    Started,
    Passed {
        duration_ms: f64,
    },
    Failed {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<f64>,
    },
    Skipped,
}

/// Receiver of tree and run events.
///
/// `remove_node` names only the root of the removed subtree; hosts drop its
/// descendants with it.
pub trait TestHost {
    fn add_node(&mut self, parent: Option<&str>, node: &TestNode);
    fn remove_node(&mut self, id: &str);
    fn clear_all(&mut self);
    fn run_requested(&mut self, ids: &[String]);
    fn set_state(&mut self, id: &str, state: TestState);
    fn append_output(&mut self, stream: OutputStream, chunk: &str);
    fn run_ended(&mut self);
}

/// Cooperative cancellation for a test run.
///
/// Clones share the same flag. Cancelling while a command runs drops the
/// child process, which kills it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Outcome counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

impl RunSummary {
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Whether a run is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
}

/// Requested ids sharing one package, executed as one command.
#[derive(Debug)]
struct RunGroup {
    package_root: String,
    package_name: String,
    ids: Vec<String>,
}

impl RunGroup {
    /// Filter ids for the command; a request for the whole package is unfiltered.
    fn filter(&self) -> Vec<String> {
        if self.ids.contains(&self.package_root) {
            Vec::new()
        } else {
            self.ids.clone()
        }
    }
}

/// Forwards process output to the host.
struct HostSink<'a, H: TestHost> {
    host: &'a mut H,
}

impl<H: TestHost> OutputSink for HostSink<'_, H> {
    fn on_stdout(&mut self, chunk: &str) {
        self.host.append_output(OutputStream::Stdout, chunk);
    }

    fn on_stderr(&mut self, chunk: &str) {
        self.host.append_output(OutputStream::Stderr, chunk);
    }
}

/// Discovers and runs tests for one workspace.
pub struct TestController<H: TestHost> {
    workspace_root: Option<PathBuf>,
    settings: Settings,
    patterns: TestPatterns,
    active_file: Option<PathBuf>,
    tree: TestTree,
    phase: RunPhase,
    disposed: bool,
    host: H,
}

impl<H: TestHost> TestController<H> {
    /// Create a controller. Nothing is discovered until [`Self::refresh`].
    pub fn new(workspace_root: Option<PathBuf>, settings: Settings, host: H) -> Self {
        let patterns = TestPatterns::new(&settings.test_match);
        Self {
            workspace_root,
            settings,
            patterns,
            active_file: None,
            tree: TestTree::new(),
            phase: RunPhase::Idle,
            disposed: false,
            host,
        }
    }

    #[must_use]
    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Replace the settings. Takes effect on the next refresh or file event.
    pub fn set_settings(&mut self, settings: Settings) {
        self.patterns = TestPatterns::new(&settings.test_match);
        self.settings = settings;
    }

    /// Set the file whose package scopes the next refresh.
    pub fn set_active_file(&mut self, file: Option<PathBuf>) {
        self.active_file = file;
    }

    /// Rebuild the tree from scratch.
    pub fn refresh(&mut self) {
        if self.disposed {
            return;
        }

        self.tree.clear();
        self.host.clear_all();

        let Some(root) = self.workspace_root.clone() else {
            debug!("No workspace root, nothing to discover");
            return;
        };

        let packages = self.resolve_packages(&root);
        if packages.is_empty() {
            debug!(root = %root.display(), "No package found");
            return;
        }

        for pkg in &packages {
            let package_id = self.ensure_package(pkg);
            for file in find_with(&pkg.path, &self.patterns) {
                self.add_file(&root, &package_id, pkg, &file);
            }
        }

        info!(
            packages = packages.len(),
            nodes = self.tree.len(),
            "Test tree refreshed"
        );
    }

    /// Reconcile the tree with the current state of `path`.
    ///
    /// Handles edits, deletions and creations alike: any existing subtree for
    /// the file is dropped, then the file is re-added if it is still a test
    /// file inside some package.
    pub fn on_file_changed(&mut self, path: &Path) {
        if self.disposed {
            return;
        }
        let Some(root) = self.workspace_root.clone() else {
            return;
        };

        if let Some(id) = self.tree.find_file(path).map(|n| n.id.clone()) {
            self.tree.remove(&id);
            self.host.remove_node(&id);
            debug!(id = %id, "Removed file subtree");
        }

        if !path.is_file() || !self.patterns.matches_path(&root, path) {
            return;
        }

        let Some(pkg) = detect_package_from_file(path, Some(&root)) else {
            debug!(path = %path.display(), "Changed file has no package");
            return;
        };

        let package_id = self.ensure_package(&pkg);
        self.add_file(&root, &package_id, &pkg, path);
    }

    /// Run the tests named by `options.test_ids` (everything when empty).
    pub async fn run_tests(&mut self, options: &RunOptions, cancel: &CancelToken) -> RunSummary {
        let mut summary = RunSummary::default();
        if self.disposed {
            return summary;
        }
        let Some(cwd) = self.workspace_root.clone() else {
            warn!("No workspace root, cannot run tests");
            return summary;
        };

        let groups = self.group_by_package(&options.test_ids);
        let all_ids: Vec<String> = groups.iter().flat_map(|g| g.ids.iter().cloned()).collect();

        self.phase = RunPhase::Running;
        self.host.run_requested(&all_ids);
        for id in &all_ids {
            self.host.set_state(id, TestState::Enqueued);
        }

        for (index, group) in groups.iter().enumerate() {
            if cancel.is_cancelled() {
                for id in groups[index..].iter().flat_map(|g| &g.ids) {
                    self.host.set_state(id, TestState::Skipped);
                    summary.skipped += 1;
                }
                summary.cancelled = true;
                break;
            }
            self.run_group(&cwd, group, options.debug, cancel, &mut summary)
                .await;
        }

        self.phase = RunPhase::Idle;
        self.host.run_ended();
        info!(
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "Test run finished"
        );
        summary
    }

    /// Drop all state. Later refreshes and runs do nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.tree.clear();
        self.active_file = None;
        self.phase = RunPhase::Idle;
        self.disposed = true;
        self.host.clear_all();
    }

    fn resolve_packages(&self, root: &Path) -> Vec<DetectedPackage> {
        if let Some(file) = &self.active_file {
            return detect_package_from_file(file, Some(root))
                .into_iter()
                .collect();
        }

        let workspace = detect_workspace_packages(root);
        if !workspace.is_empty() {
            return workspace;
        }

        detect_package_from_path(root).into_iter().collect()
    }

    /// Tell the host about a node already in the tree.
    fn announce(&mut self, id: &str) {
        if let Some(node) = self.tree.get(id) {
            self.host.add_node(node.parent(), node);
        }
    }

    /// Id of the root node for `pkg`, creating it if needed.
    fn ensure_package(&mut self, pkg: &DetectedPackage) -> String {
        let node = TestNode::package(pkg);
        let id = node.id.clone();
        if self.tree.insert_root(node) {
            self.announce(&id);
        }
        id
    }

    /// Add a file node under `package_id` and parse it into suites and cases.
    fn add_file(&mut self, root: &Path, package_id: &str, pkg: &DetectedPackage, path: &Path) {
        let relative = relative_slash_path(root, path);
        let file_node = TestNode::file(&relative, path, pkg);
        let file_id = file_node.id.clone();
        if !self.tree.insert_child(package_id, file_node) {
            debug!(id = %file_id, "File already in tree");
            return;
        }
        self.announce(&file_id);

        let (text, parsed) = parse_file_at(path);
        let declarations = parsed
            .suites
            .iter()
            .map(|d| (NodeKind::Suite, d))
            .chain(parsed.cases.iter().map(|d| (NodeKind::Case, d)));

        for (kind, decl) in declarations {
            let position = offset_to_position(&text, decl.offset);
            let node = TestNode::declaration(kind, &file_id, &decl.name, path, position);
            let id = node.id.clone();
            if self.tree.insert_child(&file_id, node) {
                self.announce(&id);
            } else {
                debug!(id = %id, "Duplicate declaration ignored");
            }
        }
    }

    /// Group requested ids by owning package, in first-seen order.
    fn group_by_package(&self, ids: &[String]) -> Vec<RunGroup> {
        let requested: Vec<String> = if ids.is_empty() {
            self.tree.roots().to_vec()
        } else {
            ids.to_vec()
        };

        let mut groups: Vec<RunGroup> = Vec::new();
        for id in requested {
            let Some(package_root) = self.tree.package_root_of(&id) else {
                warn!(id = %id, "Ignoring unknown test id");
                continue;
            };
            let Some(meta) = self.tree.package_of(package_root) else {
                warn!(id = %id, "Ignoring test id without a package");
                continue;
            };

            match groups.iter_mut().find(|g| g.package_root == package_root) {
                Some(group) => {
                    if !group.ids.contains(&id) {
                        group.ids.push(id);
                    }
                }
                None => groups.push(RunGroup {
                    package_root: package_root.to_string(),
                    package_name: meta.package_name.clone(),
                    ids: vec![id],
                }),
            }
        }
        groups
    }

    async fn run_group(
        &mut self,
        cwd: &Path,
        group: &RunGroup,
        debug: bool,
        cancel: &CancelToken,
        summary: &mut RunSummary,
    ) {
        for id in &group.ids {
            self.host.set_state(id, TestState::Started);
        }

        let options = RunOptions::new()
            .with_test_ids(group.filter())
            .with_debug(debug);
        let command = build_command(
            &self.settings.turbo_binary_path,
            &group.package_name,
            &options,
        );
        info!(package = %group.package_name, command = %command, "Running tests");

        let outcome = {
            let mut sink = HostSink {
                host: &mut self.host,
            };
            tokio::select! {
                result = execute(&command, cwd, &mut sink) => Some(result),
                () = cancel.cancelled() => None,
            }
        };

        match outcome {
            None => {
                warn!(package = %group.package_name, "Test run cancelled");
                for id in &group.ids {
                    self.host.set_state(id, TestState::Skipped);
                }
                summary.skipped += group.ids.len();
                summary.cancelled = true;
            }
            Some(Err(e)) => {
                warn!(package = %group.package_name, error = %e, "Test command failed");
                let message = e.to_string();
                for id in &group.ids {
                    self.host.set_state(
                        id,
                        TestState::Failed {
                            message: message.clone(),
                            duration_ms: None,
                        },
                    );
                }
                summary.failed += group.ids.len();
            }
            Some(Ok(results)) => self.apply_results(&group.package_root, &results, summary),
        }
    }

    fn apply_results(&mut self, package_root: &str, results: &[TestResult], summary: &mut RunSummary) {
        let mut claimed = HashSet::new();
        for result in results {
            let Some(id) = self
                .tree
                .find_declaration(package_root, result.match_name(), &claimed)
                .map(|n| n.id.clone())
            else {
                debug!(name = result.match_name(), "No test node for result");
                continue;
            };
            claimed.insert(id.clone());

            let state = match result.status {
                TestStatus::Passed => {
                    summary.passed += 1;
                    TestState::Passed {
                        duration_ms: result.duration_ms,
                    }
                }
                TestStatus::Failed => {
                    summary.failed += 1;
                    TestState::Failed {
                        message: result
                            .error
                            .as_ref()
                            .map_or_else(|| "Test failed".to_string(), |e| e.message.clone()),
                        duration_ms: Some(result.duration_ms),
                    }
                }
                TestStatus::Skipped | TestStatus::Todo => {
                    summary.skipped += 1;
                    TestState::Skipped
                }
            };
            self.host.set_state(&id, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Add(Option<String>, String),
        Remove(String),
        Clear,
        Requested(Vec<String>),
        State(String, TestState),
        Output(OutputStream, String),
        Ended,
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl Recorder {
        fn added(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Add(_, id) => Some(id.as_str()),
                    _ => None,
                })
                .collect()
        }

        fn last_state(&self, id: &str) -> Option<&TestState> {
            self.events.iter().rev().find_map(|e| match e {
                Event::State(sid, state) if sid == id => Some(state),
                _ => None,
            })
        }

        fn stdout(&self) -> String {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Output(OutputStream::Stdout, chunk) => Some(chunk.as_str()),
                    _ => None,
                })
                .collect()
        }
    }

    impl TestHost for Recorder {
        fn add_node(&mut self, parent: Option<&str>, node: &TestNode) {
            self.events
                .push(Event::Add(parent.map(str::to_string), node.id.clone()));
        }
        fn remove_node(&mut self, id: &str) {
            self.events.push(Event::Remove(id.to_string()));
        }
        fn clear_all(&mut self) {
            self.events.push(Event::Clear);
        }
        fn run_requested(&mut self, ids: &[String]) {
            self.events.push(Event::Requested(ids.to_vec()));
        }
        fn set_state(&mut self, id: &str, state: TestState) {
            self.events.push(Event::State(id.to_string(), state));
        }
        fn append_output(&mut self, stream: OutputStream, chunk: &str) {
            self.events.push(Event::Output(stream, chunk.to_string()));
        }
        fn run_ended(&mut self) {
            self.events.push(Event::Ended);
        }
    }

    const MATH_SPEC: &str = "describe('math', () => {\n  it('adds', () => {});\n  it('subtracts', () => {});\n});\n";

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn single_package() -> TempDir {
        let dir = tempdir().unwrap();
        write(&dir.path().join("package.json"), r#"{"name": "app"}"#);
        write(&dir.path().join("src/math.spec.ts"), MATH_SPEC);
        write(&dir.path().join("node_modules/dep/x.spec.ts"), "it('hidden', f)");
        dir
    }

    fn monorepo() -> TempDir {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join("package.json"),
            r#"{"name": "root", "workspaces": ["packages/*"]}"#,
        );
        write(&dir.path().join("packages/a/package.json"), r#"{"name": "a"}"#);
        write(&dir.path().join("packages/a/one.spec.ts"), "it('one', f)");
        write(&dir.path().join("packages/b/package.json"), r#"{"name": "b"}"#);
        write(&dir.path().join("packages/b/two.spec.js"), "test('two', f)");
        dir
    }

    fn controller(root: &Path, settings: Settings) -> TestController<Recorder> {
        let mut controller =
            TestController::new(Some(root.to_path_buf()), settings, Recorder::default());
        controller.refresh();
        controller
    }

    #[test]
    fn test_refresh_builds_tree_parent_first() {
        let dir = single_package();
        let c = controller(dir.path(), Settings::default());

        assert_eq!(
            c.host().added(),
            vec![
                "package:app",
                "file:src/math.spec.ts",
                "file:src/math.spec.ts/math",
                "file:src/math.spec.ts/adds",
                "file:src/math.spec.ts/subtracts",
            ]
        );
        assert_eq!(c.host().events[0], Event::Clear);
        assert_eq!(
            c.host().events[2],
            Event::Add(
                Some("package:app".to_string()),
                "file:src/math.spec.ts".to_string()
            )
        );

        let adds = c.tree().get("file:src/math.spec.ts/adds").unwrap();
        assert_eq!(adds.position.unwrap().line, 1);
        assert_eq!(adds.position.unwrap().character, 2);
        assert_eq!(adds.location, dir.path().join("src/math.spec.ts"));
    }

    #[test]
    fn test_refresh_empty_package_keeps_root() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("package.json"), r#"{"name": "empty"}"#);
        let c = controller(dir.path(), Settings::default());
        assert_eq!(c.tree().roots(), &["package:empty".to_string()]);
        assert_eq!(c.tree().len(), 1);
    }

    #[test]
    fn test_refresh_without_package_or_root() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("a.spec.ts"), "it('x', f)");
        let c = controller(dir.path(), Settings::default());
        assert!(c.tree().is_empty());

        let mut rootless = TestController::new(None, Settings::default(), Recorder::default());
        rootless.refresh();
        assert!(rootless.tree().is_empty());
        assert_eq!(rootless.host().events, vec![Event::Clear]);
    }

    #[test]
    fn test_refresh_twice_has_no_duplicates() {
        let dir = single_package();
        let mut c = controller(dir.path(), Settings::default());
        let first = c.tree().len();
        c.refresh();
        assert_eq!(c.tree().len(), first);
        assert_eq!(
            c.host().events.iter().filter(|e| **e == Event::Clear).count(),
            2
        );
    }

    #[test]
    fn test_custom_patterns() {
        let dir = single_package();
        write(&dir.path().join("src/util.test.ts"), "it('util', f)");
        let settings = Settings::default().with_test_match(vec!["**/*.test.ts".to_string()]);
        let c = controller(dir.path(), settings);
        assert!(c.tree().contains("file:src/util.test.ts"));
        assert!(!c.tree().contains("file:src/math.spec.ts"));
    }

    #[test]
    fn test_workspaces_become_roots() {
        let dir = monorepo();
        let c = controller(dir.path(), Settings::default());
        assert_eq!(
            c.tree().roots(),
            &["package:a".to_string(), "package:b".to_string()]
        );
        assert!(c.tree().contains("file:packages/b/two.spec.js/two"));
    }

    #[test]
    fn test_active_file_scopes_refresh() {
        let dir = monorepo();
        let mut c = TestController::new(
            Some(dir.path().to_path_buf()),
            Settings::default(),
            Recorder::default(),
        );
        c.set_active_file(Some(dir.path().join("packages/b/two.spec.js")));
        c.refresh();
        assert_eq!(c.tree().roots(), &["package:b".to_string()]);
    }

    #[test]
    fn test_file_change_replaces_subtree() {
        let dir = single_package();
        let mut c = controller(dir.path(), Settings::default());
        let file = dir.path().join("src/math.spec.ts");
        write(&file, "it('multiplies', f)");

        c.on_file_changed(&file);

        assert!(c.host().events.contains(&Event::Remove("file:src/math.spec.ts".to_string())));
        assert!(c.tree().contains("file:src/math.spec.ts/multiplies"));
        assert!(!c.tree().contains("file:src/math.spec.ts/adds"));
        assert_eq!(c.tree().len(), 3);
    }

    #[test]
    fn test_file_deleted_removes_node() {
        let dir = single_package();
        let mut c = controller(dir.path(), Settings::default());
        let file = dir.path().join("src/math.spec.ts");
        fs::remove_file(&file).unwrap();

        c.on_file_changed(&file);

        assert_eq!(c.tree().len(), 1);
        assert!(c.tree().get("package:app").unwrap().children().is_empty());
    }

    #[test]
    fn test_new_file_is_added() {
        let dir = single_package();
        let mut c = controller(dir.path(), Settings::default());
        let file = dir.path().join("lib/new.spec.js");
        write(&file, "test('fresh', f)");

        c.on_file_changed(&file);

        assert!(c.tree().contains("file:lib/new.spec.js/fresh"));
        assert!(!c.host().events.iter().any(|e| matches!(e, Event::Remove(_))));
    }

    #[test]
    fn test_non_test_and_excluded_files_ignored() {
        let dir = single_package();
        let mut c = controller(dir.path(), Settings::default());
        let before = c.tree().len();

        let plain = dir.path().join("src/index.ts");
        write(&plain, "it('not a test file', f)");
        c.on_file_changed(&plain);

        let vendored = dir.path().join("node_modules/dep/y.spec.ts");
        write(&vendored, "it('vendored', f)");
        c.on_file_changed(&vendored);

        assert_eq!(c.tree().len(), before);
    }

    #[test]
    fn test_change_in_new_package_creates_root() {
        let dir = monorepo();
        let mut c = TestController::new(
            Some(dir.path().to_path_buf()),
            Settings::default(),
            Recorder::default(),
        );
        c.set_active_file(Some(dir.path().join("packages/a/one.spec.ts")));
        c.refresh();
        assert!(!c.tree().contains("package:b"));

        c.on_file_changed(&dir.path().join("packages/b/two.spec.js"));
        assert!(c.tree().contains("package:b"));
        assert!(c.tree().contains("file:packages/b/two.spec.js/two"));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let dir = single_package();
        let mut c = controller(dir.path(), Settings::default());
        c.dispose();
        c.dispose();
        assert!(c.is_disposed());
        assert!(c.tree().is_empty());

        let events = c.host().events.len();
        c.refresh();
        c.on_file_changed(&dir.path().join("src/math.spec.ts"));
        assert!(c.tree().is_empty());
        assert_eq!(c.host().events.len(), events);
    }

    #[tokio::test]
    async fn test_run_after_dispose_is_noop() {
        let dir = single_package();
        let mut c = controller(dir.path(), Settings::default());
        c.dispose();
        let summary = c.run_tests(&RunOptions::new(), &CancelToken::new()).await;
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch_skips_everything() {
        let dir = single_package();
        let mut c = controller(dir.path(), Settings::default().with_turbo_binary("exit 9 #"));
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = c.run_tests(&RunOptions::new(), &cancel).await;

        assert!(summary.cancelled);
        assert_eq!(summary.skipped, 1);
        assert_eq!(c.host().last_state("package:app"), Some(&TestState::Skipped));
        assert_eq!(c.host().stdout(), "");
        assert_eq!(c.host().events.last(), Some(&Event::Ended));
        assert_eq!(c.phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_ignored() {
        let dir = single_package();
        let mut c = controller(dir.path(), Settings::default());
        let options = RunOptions::new().with_test_ids(vec!["file:nope".to_string()]);
        let summary = c.run_tests(&options, &CancelToken::new()).await;
        assert_eq!(summary, RunSummary::default());
        assert!(c.host().events.contains(&Event::Requested(Vec::new())));
    }

    #[test]
    fn test_cancel_token_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[cfg(unix)]
    mod runs {
        use super::*;
        use std::time::{Duration, Instant};

        const REPORT: &str = r#"{"tests":[{"name":"adds","duration":5,"status":"pass"},{"name":"math subtracts","displayName":"subtracts","duration":7,"status":"fail","error":{"message":"expected 1"}},{"name":"ghost","status":"pass"}]}"#;

        fn echo_report(report: &str) -> Settings {
            Settings::default().with_turbo_binary(format!("echo '{report}' #"))
        }

        #[tokio::test]
        async fn test_results_mapped_to_nodes() {
            let dir = single_package();
            let mut c = controller(dir.path(), echo_report(REPORT));

            let summary = c.run_tests(&RunOptions::new(), &CancelToken::new()).await;

            assert_eq!(summary.passed, 1);
            assert_eq!(summary.failed, 1);
            assert!(!summary.success());
            let host = c.host();
            assert_eq!(
                host.last_state("file:src/math.spec.ts/adds"),
                Some(&TestState::Passed { duration_ms: 5.0 })
            );
            assert_eq!(
                host.last_state("file:src/math.spec.ts/subtracts"),
                Some(&TestState::Failed {
                    message: "expected 1".to_string(),
                    duration_ms: Some(7.0)
                })
            );
            assert!(host.events.contains(&Event::Requested(vec!["package:app".to_string()])));
            assert!(host
                .events
                .contains(&Event::State("package:app".to_string(), TestState::Enqueued)));
            assert_eq!(host.events.last(), Some(&Event::Ended));
        }

        #[tokio::test]
        async fn test_skip_and_todo_count_as_skipped() {
            let dir = single_package();
            let report = r#"{"tests":[{"name":"adds","status":"skip"},{"name":"subtracts","status":"todo"}]}"#;
            let mut c = controller(dir.path(), echo_report(report));
            let summary = c.run_tests(&RunOptions::new(), &CancelToken::new()).await;
            assert_eq!(summary.skipped, 2);
            assert_eq!(
                c.host().last_state("file:src/math.spec.ts/subtracts"),
                Some(&TestState::Skipped)
            );
        }

        #[tokio::test]
        async fn test_repeated_names_fill_successive_nodes() {
            let dir = tempdir().unwrap();
            write(&dir.path().join("package.json"), r#"{"name": "app"}"#);
            write(&dir.path().join("src/a.spec.ts"), "it('adds', f)");
            write(&dir.path().join("src/b.spec.ts"), "it('adds', f)");
            let report = r#"{"tests":[{"name":"adds","status":"pass"},{"name":"adds","status":"fail"}]}"#;
            let mut c = controller(dir.path(), echo_report(report));

            let summary = c.run_tests(&RunOptions::new(), &CancelToken::new()).await;

            assert_eq!(summary.passed, 1);
            assert_eq!(summary.failed, 1);
            let host = c.host();
            let states = [
                host.last_state("file:src/a.spec.ts/adds"),
                host.last_state("file:src/b.spec.ts/adds"),
            ];
            assert!(states
                .iter()
                .any(|s| matches!(s, Some(TestState::Passed { .. }))));
            assert!(states
                .iter()
                .any(|s| matches!(s, Some(TestState::Failed { .. }))));
        }

        #[tokio::test]
        async fn test_filter_uses_leaf_names() {
            let dir = single_package();
            let mut c = controller(dir.path(), Settings::default().with_turbo_binary("echo"));
            let options = RunOptions::new().with_test_ids(vec![
                "file:src/math.spec.ts/adds".to_string(),
                "file:src/math.spec.ts/subtracts".to_string(),
            ]);

            let summary = c.run_tests(&options, &CancelToken::new()).await;

            let out = c.host().stdout();
            assert!(out.contains("run test --filter=app -- --reporter=json --test=adds --test=subtracts"));
            // echo output carries no JSON, so the whole group fails
            assert_eq!(summary.failed, 2);
            match c.host().last_state("file:src/math.spec.ts/adds") {
                Some(TestState::Failed { message, .. }) => {
                    assert_eq!(message, "No JSON output found in test results");
                }
                other => panic!("unexpected state: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_package_root_request_is_unfiltered() {
            let dir = single_package();
            let mut c = controller(dir.path(), Settings::default().with_turbo_binary("echo"));
            let options = RunOptions::new().with_test_ids(vec![
                "file:src/math.spec.ts/adds".to_string(),
                "package:app".to_string(),
            ]);

            c.run_tests(&options, &CancelToken::new()).await;

            let out = c.host().stdout();
            assert!(out.contains("--filter=app -- --reporter=json"));
            assert!(!out.contains("--test="));
        }

        #[tokio::test]
        async fn test_groups_run_per_package() {
            let dir = monorepo();
            let mut c = controller(dir.path(), Settings::default().with_turbo_binary("echo"));
            let options = RunOptions::new().with_test_ids(vec![
                "file:packages/b/two.spec.js/two".to_string(),
                "file:packages/a/one.spec.ts/one".to_string(),
            ]);

            c.run_tests(&options, &CancelToken::new()).await;

            let out = c.host().stdout();
            let b = out.find("--filter=b").unwrap();
            let a = out.find("--filter=a").unwrap();
            assert!(b < a);
            assert!(out.contains("--filter=b -- --reporter=json --test=two"));
        }

        #[tokio::test]
        async fn test_process_failure_fails_requested_ids() {
            let dir = monorepo();
            let mut c = controller(
                dir.path(),
                Settings::default().with_turbo_binary("echo 'turbo exploded' >&2; exit 2 #"),
            );

            let summary = c.run_tests(&RunOptions::new(), &CancelToken::new()).await;

            assert_eq!(summary.failed, 2);
            for id in ["package:a", "package:b"] {
                match c.host().last_state(id) {
                    Some(TestState::Failed { message, duration_ms }) => {
                        assert!(message.contains("code 2"));
                        assert!(message.contains("turbo exploded"));
                        assert!(duration_ms.is_none());
                    }
                    other => panic!("unexpected state for {id}: {other:?}"),
                }
            }
        }

        #[tokio::test]
        async fn test_cancel_kills_running_group() {
            let dir = monorepo();
            let mut c = controller(dir.path(), Settings::default().with_turbo_binary("sleep 10 #"));
            let cancel = CancelToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            });

            let start = Instant::now();
            let summary = c.run_tests(&RunOptions::new(), &cancel).await;

            assert!(start.elapsed() < Duration::from_secs(5));
            assert!(summary.cancelled);
            assert_eq!(summary.skipped, 2);
            assert_eq!(c.host().last_state("package:a"), Some(&TestState::Skipped));
            assert_eq!(c.host().last_state("package:b"), Some(&TestState::Skipped));
        }
    }
}
