//! Run report: ordered findings plus a derived overall status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::finding::{Finding, FindingStatus};
use crate::types::Timestamp;

/// Per-status counts. Skipped findings are also counted as warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The outcome of one run. Built once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    generated_at: Timestamp,
    overall_status: FindingStatus,
    summary: ReportSummary,
    findings: Vec<Finding>,
}

impl Report {
    pub fn new(findings: Vec<Finding>, generated_at: Timestamp) -> Self {
        let overall_status = findings
            .iter()
            .map(Finding::status)
            .max()
            .unwrap_or(FindingStatus::Pass);

        let mut summary = ReportSummary {
            total: findings.len(),
            ..ReportSummary::default()
        };
        for finding in &findings {
            match finding.status() {
                FindingStatus::Pass => summary.passed += 1,
                FindingStatus::Warn => summary.warned += 1,
                FindingStatus::Fail => summary.failed += 1,
            }
            if finding.is_skipped() {
                summary.skipped += 1;
            }
        }

        Self {
            generated_at,
            overall_status,
            summary,
            findings,
        }
    }

    pub fn generated_at(&self) -> Timestamp {
        self.generated_at
    }

    pub fn overall_status(&self) -> FindingStatus {
        self.overall_status
    }

    pub fn summary(&self) -> ReportSummary {
        self.summary
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn finding(&self, rule_name: &str) -> Option<&Finding> {
        self.findings.iter().find(|f| f.rule_name() == rule_name)
    }

    /// Process exit status: 0 for Pass, 2 for Warn, 1 for Fail.
    pub fn exit_code(&self) -> u8 {
        match self.overall_status {
            FindingStatus::Pass => 0,
            FindingStatus::Fail => 1,
            FindingStatus::Warn => 2,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

const RULE_WIDTH: usize = 80;

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(f, "{rule}")?;
        writeln!(f, "CRJR DATA AUDIT  {}", self.generated_at.to_rfc3339())?;
        writeln!(f, "{rule}")?;
        for finding in &self.findings {
            writeln!(
                f,
                "[{}] {}: {}",
                finding.status().as_str().to_uppercase(),
                finding.rule_name(),
                finding.message()
            )?;
        }
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        let s = self.summary;
        writeln!(
            f,
            "{} rule(s): {} passed, {} warned ({} skipped), {} failed",
            s.total, s.passed, s.warned, s.skipped, s.failed
        )?;
        writeln!(f, "OVERALL: {}", self.overall_status.as_str().to_uppercase())?;
        write!(f, "{rule}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::SkipReason;
    use crate::rules::{Rule, RuleKind, Target};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn rule(name: &str) -> Rule {
        Rule::new(name, RuleKind::RowCount, Target::Table("t".to_string()))
    }

    fn at() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn empty_report_passes() {
        let report = Report::new(vec![], at());
        assert_eq!(report.overall_status(), FindingStatus::Pass);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn any_fail_fails() {
        let report = Report::new(
            vec![
                Finding::pass(&rule("a"), json!(1), "ok"),
                Finding::warn(&rule("b"), json!(1), "meh"),
                Finding::fail(&rule("c"), json!(0), "bad"),
            ],
            at(),
        );
        assert_eq!(report.overall_status(), FindingStatus::Fail);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.summary().failed, 1);
    }

    #[test]
    fn warn_without_fail_warns() {
        let report = Report::new(
            vec![
                Finding::pass(&rule("a"), json!(1), "ok"),
                Finding::skipped(&rule("b"), SkipReason::NoData, "no data."),
            ],
            at(),
        );
        assert_eq!(report.overall_status(), FindingStatus::Warn);
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.summary().skipped, 1);
        assert_eq!(report.summary().warned, 1);
    }

    #[test]
    fn text_rendering_lists_findings_in_order() {
        let report = Report::new(
            vec![
                Finding::pass(&rule("first"), json!(1), "ok"),
                Finding::fail(&rule("second"), json!(0), "bad"),
            ],
            at(),
        );
        let text = report.to_string();
        let first = text.find("[PASS] first: ok").unwrap();
        let second = text.find("[FAIL] second: bad").unwrap();
        assert!(first < second);
        assert!(text.contains("OVERALL: FAIL"));
        assert!(text.contains("2026-01-02T03:04:05+00:00"));
    }

    #[test]
    fn json_contains_overall_status_and_findings() {
        let report = Report::new(vec![Finding::pass(&rule("a"), json!(3), "ok")], at());
        let value: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(value["overall_status"], "pass");
        assert_eq!(value["findings"][0]["rule_name"], "a");
        assert_eq!(value["findings"][0]["observed_value"], 3);
    }
}
