//! Wiring for the `crjr-audit` binary: configuration, rule loading, tracing
//! setup and report rendering. Kept in a library so the pieces can be
//! tested without spawning the process.

pub mod config;

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crjr_audit_core::catalog;
use crjr_audit_core::source::DataSource;
use crjr_audit_core::{Aggregator, CoreError, Evaluator, Report, RuleSet, Sources};

use crate::config::{AuditConfig, LogFormat, ReportFormat};

/// Errors raised while loading a rule set.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("failed to read rules file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

/// Install the global tracing subscriber. Logs go to stderr so stdout only
/// carries the report.
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "crjr_audit=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Load rules from `path`, or the built-in catalog when no path is given.
pub fn load_rules(path: Option<&Path>) -> Result<RuleSet, RulesError> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|source| RulesError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(RuleSet::from_json(&json)?)
        }
        None => Ok(catalog::crjr_rule_set()?),
    }
}

/// Evaluate `rules` against both sources and log the outcome.
pub async fn run_audit(
    config: &AuditConfig,
    rules: &RuleSet,
    relational: &dyn DataSource,
    http: &dyn DataSource,
) -> Report {
    let evaluator = Evaluator::new(Sources {
        relational: Some(relational),
        http: Some(http),
    })
    .with_retry(config.retry);

    let started = Instant::now();
    let report = Aggregator::new(evaluator)
        .fail_fast(config.fail_fast)
        .run(rules)
        .await;

    let summary = report.summary();
    tracing::info!(
        overall = report.overall_status().as_str(),
        total = summary.total,
        passed = summary.passed,
        warned = summary.warned,
        skipped = summary.skipped,
        failed = summary.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Audit complete"
    );
    report
}

/// Render the report for stdout.
pub fn render_report(report: &Report, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(report.to_string()),
        ReportFormat::Json => report.to_json_pretty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crjr_audit_core::types::Timestamp;
    use crjr_audit_core::{Finding, Rule, RuleKind, Target};
    use serde_json::json;
    use std::io::Write;

    fn report() -> Report {
        let rule = Rule::new(
            "crjr_row_count",
            RuleKind::RowCount,
            Target::Table("tbl_mon_crjr".to_string()),
        );
        let generated_at: Timestamp = "2026-03-01T00:00:00Z".parse().unwrap();
        Report::new(
            vec![Finding::pass(&rule, json!(12), "tbl_mon_crjr has 12 row(s)")],
            generated_at,
        )
    }

    #[test]
    fn built_in_catalog_is_the_default() {
        let rules = load_rules(None).unwrap();
        assert_eq!(rules.len(), catalog::crjr_rules().len());
    }

    #[test]
    fn rules_file_replaces_the_catalog() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "rows", "kind": "row_count", "target": "tbl_mon_crjr"}}]"#
        )
        .unwrap();

        let rules = load_rules(Some(file.path())).unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn missing_rules_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = load_rules(Some(path.as_path())).unwrap_err();
        assert_matches!(err, RulesError::Read { .. });
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "a", "kind": "row_count", "target": "t"}},
                {{"name": "a", "kind": "row_count", "target": "t"}}]"#
        )
        .unwrap();

        let err = load_rules(Some(file.path())).unwrap_err();
        assert_matches!(err, RulesError::Invalid(_));
        assert!(err.to_string().contains("duplicate rule name 'a'"));
    }

    #[test]
    fn renders_text_and_json() {
        let report = report();

        let text = render_report(&report, ReportFormat::Text).unwrap();
        assert!(text.contains("[PASS] crjr_row_count: tbl_mon_crjr has 12 row(s)"));

        let json = render_report(&report, ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["overall_status"], "pass");
        assert_eq!(value["generated_at"], "2026-03-01T00:00:00Z");
    }
}
