use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TestOutcome {
    /// Installed and, when launchable, ran without an error-severity log line.
    Passed,
    /// Install failed or an error-severity log line was attributed to the
    /// launched process.
    Failed,
    /// The harness could not decide: pid resolution timed out, a device
    /// command failed, or the rebuild step broke.
    Inconclusive,
    /// Excluded up front by the known-failure set; no device command issued.
    Skipped,
}

impl TestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "pass",
            TestOutcome::Failed => "fail",
            TestOutcome::Inconclusive => "inconclusive",
            TestOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TestStage {
    Original,
    Repackaged,
}

impl TestStage {
    pub fn label(&self) -> &'static str {
        match self {
            TestStage::Original => "original",
            TestStage::Repackaged => "repackaged",
        }
    }
}

/// Everything captured when an install reports failure, bundled for operator
/// triage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallDiagnostics {
    pub install_stdout: String,
    pub install_stderr: String,
    /// Snapshot of the device log taken right after the failed install,
    /// before the buffer is cleared again.
    pub log_snapshot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactReport {
    pub name: String,
    pub path: String,
    pub outcome: TestOutcome,
    /// The stage that decided the outcome; absent for skipped artifacts.
    pub stage: Option<TestStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics_bundle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub tool: &'static str,
    pub trace_id: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub inconclusive: usize,
    pub skipped: usize,
    pub reports: Vec<ArtifactReport>,
}

impl RunSummary {
    pub fn from_reports(trace_id: String, reports: Vec<ArtifactReport>) -> Self {
        let count = |outcome: TestOutcome| {
            reports
                .iter()
                .filter(|report| report.outcome == outcome)
                .count()
        };
        Self {
            tool: "apk-regress",
            trace_id,
            total: reports.len(),
            passed: count(TestOutcome::Passed),
            failed: count(TestOutcome::Failed),
            inconclusive: count(TestOutcome::Inconclusive),
            skipped: count(TestOutcome::Skipped),
            reports,
        }
    }

    pub fn all_clear(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_outcomes() {
        let report = |name: &str, outcome| ArtifactReport {
            name: name.to_string(),
            path: format!("/apks/{name}"),
            outcome,
            stage: None,
            detail: None,
            diagnostics_bundle: None,
        };
        let summary = RunSummary::from_reports(
            "trace-sum".to_string(),
            vec![
                report("a.apk", TestOutcome::Passed),
                report("b.apk", TestOutcome::Failed),
                report("c.apk", TestOutcome::Skipped),
                report("d.apk", TestOutcome::Passed),
                report("e.apk", TestOutcome::Inconclusive),
            ],
        );
        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.inconclusive, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.all_clear());
    }
}
