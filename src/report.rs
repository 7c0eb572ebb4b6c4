//! Execution report and its renderings.
//!
//! An [`ExecutionReport`] is produced once per run. It renders as the
//! `key=value` block consumed by scripts, as JSON with per-suite detail, or
//! as a colored console summary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::orchestrator::LaunchRecord;

/// Overall outcome of a run.
///
/// `Failure` means the container runtime itself could not be used. Suites
/// that fail individually do not make a run fail; compare
/// [`ExecutionReport::total_suites`] with
/// [`ExecutionReport::launched_suites`] to detect partial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure => f.write_str("failure"),
        }
    }
}

/// Why a suite never reached, or never finished, the launched state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The descriptor record was invalid.
    Invalid,
    /// The suite needs more cores than the whole budget.
    AdmissionImpossible,
    /// The runtime refused to start the container.
    LaunchFailed,
    /// The runtime could not be reached.
    RuntimeUnavailable,
    /// The run was cancelled before the suite was admitted.
    Cancelled,
}

/// A suite that did not launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteFailure {
    /// Position of the suite's record in the input.
    pub record: usize,
    /// The suite id, when the record had one.
    pub suite_id: Option<String>,
    pub kind: FailureKind,
    pub reason: String,
}

/// Aggregated outcome of one scheduler run.
///
/// # Example
///
/// ```
/// use suitey::report::{ExecutionReport, ExecutionStatus};
///
/// let report = ExecutionReport::empty(4);
/// assert_eq!(report.execution_status, ExecutionStatus::Success);
/// assert_eq!(
///     report.render(),
///     "execution_status=success\ntotal_suites=0\nlaunched_suites=0\ncontainer_ids=\n"
/// );
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_status: ExecutionStatus,

    /// Records recognized in the input, valid or not.
    pub total_suites: usize,

    /// Suites that obtained a container id.
    pub launched_suites: usize,

    /// Container ids in the order their launches completed.
    ///
    /// Not positionally aligned with the input; use
    /// [`launches`](Self::launches) to map ids back to suites.
    pub container_ids: Vec<String>,

    /// `(suite_id, container_id)` pairs, in the same order as
    /// [`container_ids`](Self::container_ids).
    pub launches: Vec<LaunchRecord>,

    /// Suites that did not launch, in input order.
    pub failures: Vec<SuiteFailure>,

    /// CPU-core budget of the run.
    pub capacity: usize,

    /// Most cores reserved at the same time.
    pub peak_cores_in_use: usize,

    /// Whether the run was cut short by its caller.
    pub cancelled: bool,

    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionReport {
    /// Report for a run with no suites at all.
    pub fn empty(capacity: usize) -> Self {
        Self {
            execution_status: ExecutionStatus::Success,
            total_suites: 0,
            launched_suites: 0,
            container_ids: Vec::new(),
            launches: Vec::new(),
            failures: Vec::new(),
            capacity,
            peak_cores_in_use: 0,
            cancelled: false,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.execution_status == ExecutionStatus::Success
    }

    /// Returns `true` if every recognized suite launched.
    pub fn all_launched(&self) -> bool {
        self.launched_suites == self.total_suites
    }

    /// Renders the four-line `key=value` block.
    ///
    /// ```text
    /// execution_status=success
    /// total_suites=2
    /// launched_suites=2
    /// container_ids=3f4e...,9a8b...
    /// ```
    pub fn render(&self) -> String {
        format!(
            "execution_status={}\ntotal_suites={}\nlaunched_suites={}\ncontainer_ids={}\n",
            self.execution_status,
            self.total_suites,
            self.launched_suites,
            self.container_ids.join(",")
        )
    }

    /// Renders the full report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Prints a human-readable summary to stderr.
///
/// Stdout is reserved for the machine-readable report.
pub fn print_summary(report: &ExecutionReport) {
    eprintln!();
    eprintln!("Suite Results:");
    eprintln!("  Total:    {}", report.total_suites);
    eprintln!(
        "  Launched: {}",
        console::style(report.launched_suites).green()
    );

    let not_launched = report.total_suites.saturating_sub(report.launched_suites);
    if not_launched > 0 {
        eprintln!("  Failed:   {}", console::style(not_launched).red());
    }

    eprintln!(
        "  Cores:    peak {} of {}",
        report.peak_cores_in_use, report.capacity
    );
    eprintln!("  Duration: {}ms", report.duration_ms);

    for launch in &report.launches {
        eprintln!(
            "  {} {} -> {}",
            console::style("✓").green(),
            launch.suite_id,
            launch.container_id.short()
        );
    }

    for failure in &report.failures {
        let label = failure
            .suite_id
            .clone()
            .unwrap_or_else(|| format!("record #{}", failure.record));
        eprintln!(
            "  {} {}: {}",
            console::style("✗").red(),
            label,
            console::style(&failure.reason).dim()
        );
    }

    eprintln!();
    if !report.success() {
        eprintln!(
            "{}",
            console::style("Container runtime unavailable.").red().bold()
        );
    } else if report.cancelled {
        eprintln!(
            "{}",
            console::style("Run cancelled before all suites launched.")
                .yellow()
                .bold()
        );
    } else if report.all_launched() {
        eprintln!("{}", console::style("All suites launched.").green().bold());
    } else {
        eprintln!(
            "{}",
            console::style("Some suites failed to launch.").red().bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContainerId;

    fn launched_report() -> ExecutionReport {
        let ids = ["aaaaaaaaaaaa1111", "bbbbbbbbbbbb2222"];
        let mut report = ExecutionReport::empty(2);
        report.total_suites = 3;
        report.launched_suites = 2;
        report.container_ids = ids.iter().map(|s| s.to_string()).collect();
        report.launches = vec![
            LaunchRecord {
                suite_id: "b".to_string(),
                container_id: ContainerId::parse(ids[0]).unwrap(),
            },
            LaunchRecord {
                suite_id: "a".to_string(),
                container_id: ContainerId::parse(ids[1]).unwrap(),
            },
        ];
        report.failures = vec![SuiteFailure {
            record: 2,
            suite_id: None,
            kind: FailureKind::Invalid,
            reason: "record 2: missing required field(s): suite_id".to_string(),
        }];
        report
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(
            ExecutionReport::empty(1).render(),
            "execution_status=success\ntotal_suites=0\nlaunched_suites=0\ncontainer_ids=\n"
        );
    }

    #[test]
    fn test_render_joins_ids_without_spaces() {
        let rendered = launched_report().render();
        assert!(rendered.contains("container_ids=aaaaaaaaaaaa1111,bbbbbbbbbbbb2222\n"));
        assert!(rendered.contains("total_suites=3\n"));
        assert!(rendered.contains("launched_suites=2\n"));
    }

    #[test]
    fn test_render_failure_status() {
        let mut report = ExecutionReport::empty(1);
        report.execution_status = ExecutionStatus::Failure;
        assert!(report.render().starts_with("execution_status=failure\n"));
        assert!(!report.success());
    }

    #[test]
    fn test_json_includes_details() {
        let json = launched_report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["execution_status"], "success");
        assert_eq!(value["launches"][0]["suite_id"], "b");
        assert_eq!(value["launches"][0]["container_id"], "aaaaaaaaaaaa1111");
        assert_eq!(value["failures"][0]["kind"], "invalid");
        assert_eq!(value["container_ids"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_all_launched() {
        let report = launched_report();
        assert!(!report.all_launched());
        assert!(ExecutionReport::empty(1).all_launched());
    }
}
