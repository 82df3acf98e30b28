#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::return_self_not_must_use)]

pub mod command;
pub mod config;
pub mod controller;
pub mod discover;
pub mod error;
pub mod exec;
pub mod package;
pub mod parser;
pub mod results;
pub mod tree;
pub mod version;

pub use command::{build_command, RunOptions};
pub use config::{Config, Settings};
pub use controller::{
    CancelToken, OutputStream, RunPhase, RunSummary, TestController, TestHost, TestState,
};
pub use discover::{find_test_files, find_with, TestPatterns, DEFAULT_TEST_PATTERNS, EXCLUDE_DIRS};
pub use error::{Error, Result};
pub use exec::{execute, run_shell, NullSink, OutputSink, RawOutput};
pub use package::{
    detect_package_from_file, detect_package_from_path, detect_workspace_packages, DetectedPackage,
};
pub use parser::{parse_file, Declaration, ParsedFile};
pub use results::{map_test_status, parse_test_results, TestError, TestResult, TestStatus};
pub use tree::{NodeKind, NodeView, PackageMeta, TestNode, TestTree};
pub use version::VERSION;
