//! Terminal implementation of the test host.

use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use turbotest_core::{NodeKind, OutputStream, TestHost, TestNode, TestState};

#[derive(Debug)]
struct HostNode {
    parent: Option<String>,
    kind: NodeKind,
    label: String,
}

/// Final state of one node in a run.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub id: String,
    pub label: String,
    #[serde(flatten)]
    pub state: TestState,
}

/// Host that mirrors the tree in memory and reports runs on the terminal.
///
/// In JSON mode nothing but process output (on stderr) is printed; commands
/// serialize the collected outcomes themselves.
#[derive(Debug, Default)]
pub struct TerminalHost {
    json: bool,
    nodes: HashMap<String, HostNode>,
    requested: Vec<String>,
    outcomes: Vec<Outcome>,
}

impl TerminalHost {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            ..Self::default()
        }
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    /// Number of known nodes of `kind`.
    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.values().filter(|n| n.kind == kind).count()
    }

    fn label(&self, id: &str) -> String {
        self.nodes
            .get(id)
            .map_or_else(|| id.to_string(), |n| n.label.clone())
    }

    fn descends_from(&self, id: &str, ancestor: &str) -> bool {
        let mut current = self.nodes.get(id).and_then(|n| n.parent.as_deref());
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.nodes.get(parent).and_then(|n| n.parent.as_deref());
        }
        false
    }

    fn print_outcome(&self, outcome: &Outcome) {
        match &outcome.state {
            TestState::Passed { duration_ms } => {
                println!("  ✓ {} ({:.0}ms)", outcome.label, duration_ms);
            }
            TestState::Failed { message, .. } => {
                println!("  ✗ {}", outcome.label);
                for line in message.lines() {
                    println!("      {line}");
                }
            }
            TestState::Skipped => println!("  - {} (skipped)", outcome.label),
            TestState::Enqueued | TestState::Started => {}
        }
    }
}

impl TestHost for TerminalHost {
    fn add_node(&mut self, parent: Option<&str>, node: &TestNode) {
        tracing::trace!(id = %node.id, kind = node.kind.as_str(), "Node added");
        self.nodes.insert(
            node.id.clone(),
            HostNode {
                parent: parent.map(str::to_string),
                kind: node.kind,
                label: node.label.clone(),
            },
        );
    }

    fn remove_node(&mut self, id: &str) {
        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|candidate| candidate.as_str() == id || self.descends_from(candidate, id))
            .cloned()
            .collect();
        for candidate in doomed {
            self.nodes.remove(&candidate);
        }
    }

    fn clear_all(&mut self) {
        self.nodes.clear();
        self.requested.clear();
        self.outcomes.clear();
    }

    fn run_requested(&mut self, ids: &[String]) {
        self.requested = ids.to_vec();
        self.outcomes.clear();
        if !self.json && !ids.is_empty() {
            println!("Running {} item(s)", ids.len());
        }
    }

    fn set_state(&mut self, id: &str, state: TestState) {
        if matches!(state, TestState::Enqueued | TestState::Started) {
            tracing::debug!(id, ?state, "Test state changed");
            return;
        }

        let outcome = Outcome {
            id: id.to_string(),
            label: self.label(id),
            state,
        };
        if !self.json {
            self.print_outcome(&outcome);
        }
        self.outcomes.push(outcome);
    }

    fn append_output(&mut self, stream: OutputStream, chunk: &str) {
        if self.json || stream == OutputStream::Stderr {
            eprint!("{chunk}");
            let _ = std::io::stderr().flush();
        } else {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }
    }

    fn run_ended(&mut self) {
        tracing::debug!(outcomes = self.outcomes.len(), "Run ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use turbotest_core::DetectedPackage;

    fn populated() -> TerminalHost {
        let pkg = DetectedPackage {
            name: "app".to_string(),
            path: PathBuf::from("/repo"),
        };
        let file_path = Path::new("/repo/a.spec.ts");
        let mut host = TerminalHost::new(true);
        host.add_node(None, &TestNode::package(&pkg));
        host.add_node(
            Some("package:app"),
            &TestNode::file("a.spec.ts", file_path, &pkg),
        );
        host.add_node(
            Some("file:a.spec.ts"),
            &TestNode::declaration(
                NodeKind::Case,
                "file:a.spec.ts",
                "adds",
                file_path,
                Default::default(),
            ),
        );
        host
    }

    #[test]
    fn test_remove_node_drops_descendants() {
        let mut host = populated();
        host.remove_node("file:a.spec.ts");
        assert_eq!(host.count(NodeKind::Package), 1);
        assert_eq!(host.count(NodeKind::File), 0);
        assert_eq!(host.count(NodeKind::Case), 0);
    }

    #[test]
    fn test_terminal_states_are_collected() {
        let mut host = populated();
        host.run_requested(&["package:app".to_string()]);
        host.set_state("package:app", TestState::Enqueued);
        host.set_state("package:app", TestState::Started);
        host.set_state(
            "file:a.spec.ts/adds",
            TestState::Passed { duration_ms: 2.0 },
        );

        assert_eq!(host.outcomes().len(), 1);
        assert_eq!(host.outcomes()[0].label, "adds");
        let json = serde_json::to_value(&host.outcomes()[0]).unwrap();
        assert_eq!(json["state"], "passed");
        assert_eq!(json["id"], "file:a.spec.ts/adds");
    }

    #[test]
    fn test_unknown_id_uses_id_as_label() {
        let mut host = TerminalHost::new(true);
        host.set_state("ghost", TestState::Skipped);
        assert_eq!(host.outcomes()[0].label, "ghost");
    }
}
