//! Test-suite descriptors.
//!
//! A suite is one independently runnable test workload: a command, the image
//! it runs in, the directory it runs from, and the number of CPU cores it
//! needs exclusively while it runs. Suites are described in a plain text
//! format of `key=value` records (see [`parser`]) and are immutable once
//! parsed.
//!
//! # Example
//!
//! ```
//! use suitey::suite::parse_descriptors;
//!
//! let records = parse_descriptors(
//!     "suite_id=unit\n\
//!      test_command=cargo test\n\
//!      test_image=rust:1.85\n\
//!      working_directory=/workspace\n\
//!      cpu_cores=2\n",
//! );
//!
//! assert_eq!(records.len(), 1);
//! let suite = records[0].as_ref().unwrap();
//! assert_eq!(suite.suite_id, "unit");
//! assert_eq!(suite.cpu_cores, 2);
//! ```

pub mod parser;

pub use parser::{ParseError, parse_descriptors};

use serde::Serialize;

/// Outcome of parsing one descriptor record.
///
/// Invalid records are kept (not dropped) so they still count toward the
/// total number of suites in a run.
pub type SuiteRecord = Result<SuiteConfig, ParseError>;

/// A validated test-suite descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteConfig {
    /// Identifier used in reports. Unique among the suites of one run.
    pub suite_id: String,

    /// Command executed inside the container via `/bin/sh -c`.
    pub test_command: String,

    /// Container image reference.
    pub test_image: String,

    /// Directory inside the container the command runs from.
    pub working_directory: String,

    /// CPU cores this suite holds exclusively while running. Always > 0.
    pub cpu_cores: usize,
}

impl SuiteConfig {
    /// Creates a suite descriptor.
    ///
    /// Used by tests and by callers that build suites programmatically rather
    /// than parsing them. `cpu_cores` is clamped to at least 1.
    pub fn new(
        suite_id: impl Into<String>,
        test_command: impl Into<String>,
        test_image: impl Into<String>,
        working_directory: impl Into<String>,
        cpu_cores: usize,
    ) -> Self {
        Self {
            suite_id: suite_id.into(),
            test_command: test_command.into(),
            test_image: test_image.into(),
            working_directory: working_directory.into(),
            cpu_cores: cpu_cores.max(1),
        }
    }
}
