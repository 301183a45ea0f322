//! Findings: the outcome of evaluating one rule.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SourceError;
use crate::rules::{Rule, Severity};

/// Status of a single finding. Ordered by badness so `max` yields the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    Pass,
    Warn,
    Fail,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }
}

/// Why a rule was skipped rather than evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The target table holds no rows.
    NoData,
    /// An earlier existence check found the target table missing.
    MissingTable,
    /// An earlier existence check for the target table errored.
    PrerequisiteFailed,
    /// The backend could not be reached.
    SourceUnavailable,
    /// No data source of the required kind was configured.
    NotConfigured,
}

/// Result of evaluating one rule. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    rule_name: String,
    status: FindingStatus,
    observed_value: Value,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    skip_reason: Option<SkipReason>,
}

impl Finding {
    fn build(rule: &Rule, status: FindingStatus, observed: Value, message: String) -> Self {
        Self {
            rule_name: rule.name().to_string(),
            status,
            observed_value: observed,
            message,
            skip_reason: None,
        }
    }

    pub fn pass(rule: &Rule, observed: Value, message: impl Into<String>) -> Self {
        Self::build(rule, FindingStatus::Pass, observed, message.into())
    }

    pub fn warn(rule: &Rule, observed: Value, message: impl Into<String>) -> Self {
        Self::build(rule, FindingStatus::Warn, observed, message.into())
    }

    pub fn fail(rule: &Rule, observed: Value, message: impl Into<String>) -> Self {
        Self::build(rule, FindingStatus::Fail, observed, message.into())
    }

    /// A threshold breach: Fail for error rules, Warn for warning rules.
    pub fn breach(rule: &Rule, observed: Value, message: impl Into<String>) -> Self {
        let status = match rule.severity() {
            Severity::Error => FindingStatus::Fail,
            Severity::Warning => FindingStatus::Warn,
        };
        Self::build(rule, status, observed, message.into())
    }

    /// A skip, recorded as Warn with a `skipped:` message.
    pub fn skipped(rule: &Rule, reason: SkipReason, detail: impl AsRef<str>) -> Self {
        let mut finding = Self::build(
            rule,
            FindingStatus::Warn,
            Value::Null,
            format!("skipped: {}", detail.as_ref()),
        );
        finding.skip_reason = Some(reason);
        finding
    }

    /// Convert an adapter error. Connection outages skip; everything else
    /// fails with the error text preserved.
    pub fn from_source_error(rule: &Rule, err: &SourceError) -> Self {
        if err.is_connection() {
            Self::skipped(rule, SkipReason::SourceUnavailable, err.to_string())
        } else {
            Self::fail(rule, Value::Null, err.to_string())
        }
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    pub fn status(&self) -> FindingStatus {
        self.status
    }

    pub fn observed_value(&self) -> &Value {
        &self.observed_value
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        self.skip_reason
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleKind, Target};
    use serde_json::json;

    fn rule(severity: Severity) -> Rule {
        Rule::new("r", RuleKind::RowCount, Target::Table("t".to_string())).with_severity(severity)
    }

    #[test]
    fn breach_follows_severity() {
        assert_eq!(
            Finding::breach(&rule(Severity::Error), json!(0), "x").status(),
            FindingStatus::Fail
        );
        assert_eq!(
            Finding::breach(&rule(Severity::Warning), json!(0), "x").status(),
            FindingStatus::Warn
        );
    }

    #[test]
    fn skipped_is_warn_with_prefix() {
        let finding = Finding::skipped(&rule(Severity::Error), SkipReason::NoData, "no data.");
        assert_eq!(finding.status(), FindingStatus::Warn);
        assert_eq!(finding.message(), "skipped: no data.");
        assert!(finding.is_skipped());
    }

    #[test]
    fn connection_errors_skip_and_others_fail() {
        let r = rule(Severity::Warning);
        let skipped =
            Finding::from_source_error(&r, &SourceError::Connection("refused".to_string()));
        assert_eq!(skipped.skip_reason(), Some(SkipReason::SourceUnavailable));
        assert!(skipped.message().contains("ConnectionError: refused"));

        let failed = Finding::from_source_error(&r, &SourceError::Query("bad".to_string()));
        assert_eq!(failed.status(), FindingStatus::Fail);
        assert_eq!(failed.message(), "QueryError: bad");
    }

    #[test]
    fn status_orders_by_badness() {
        assert!(FindingStatus::Fail > FindingStatus::Warn);
        assert!(FindingStatus::Warn > FindingStatus::Pass);
    }

    #[test]
    fn serializes_without_empty_skip_reason() {
        let finding = Finding::pass(&rule(Severity::Error), json!(3), "ok");
        let value = serde_json::to_value(&finding).unwrap();
        assert_eq!(value["status"], "pass");
        assert!(value.get("skip_reason").is_none());
    }
}
