//! Reporter output parsing.
//!
//! The runner prints log lines followed by one JSON document. Everything
//! before the first `{` is skipped; the rest must be a single JSON value.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Normalized outcome of a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Todo,
}

/// Map a reporter status to a [`TestStatus`].
///
/// Total: anything unrecognized counts as skipped.
#[must_use]
pub fn map_test_status(raw: &str) -> TestStatus {
    match raw {
        "pass" => TestStatus::Passed,
        "fail" => TestStatus::Failed,
        "skip" => TestStatus::Skipped,
        "todo" => TestStatus::Todo,
        _ => TestStatus::Skipped,
    }
}

/// Failure details reported for a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Result of one test as reported by the runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub duration_ms: f64,
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
}

impl TestResult {
    /// Name used to match the result against tree labels.
    #[must_use]
    pub fn match_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize)]
struct ReporterDocument {
    #[serde(default)]
    tests: Option<Vec<ReporterTest>>,
}

/// One reporter entry. Fields are loose so a single odd entry cannot sink the
/// whole report.
#[derive(Debug, Deserialize)]
struct ReporterTest {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(default)]
    duration: Option<Value>,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    error: Option<TestError>,
}

impl From<ReporterTest> for TestResult {
    fn from(test: ReporterTest) -> Self {
        // Non-string statuses fall through to skipped like unknown strings.
        let status = test
            .status
            .as_ref()
            .and_then(Value::as_str)
            .map_or(TestStatus::Skipped, map_test_status);

        Self {
            name: test.name.unwrap_or_default(),
            display_name: test.display_name,
            duration_ms: test
                .duration
                .as_ref()
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .max(0.0),
            status,
            error: test.error,
        }
    }
}

/// Parse runner output into test results.
///
/// Fails when the output holds no `{` or the JSON is malformed. A valid
/// document without a `tests` field yields an empty list.
pub fn parse_test_results(output: &str) -> Result<Vec<TestResult>> {
    let start = output.find('{').ok_or(Error::NoJsonOutput)?;
    let document: ReporterDocument =
        serde_json::from_str(&output[start..]).map_err(Error::ResultParse)?;

    let Some(tests) = document.tests else {
        debug!("Reporter output has no tests field");
        return Ok(Vec::new());
    };

    Ok(tests.into_iter().map(TestResult::from).collect())
}
