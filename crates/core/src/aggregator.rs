//! Report aggregator: runs an ordered rule set and collects findings.

use chrono::Utc;

use crate::evaluator::{EvalContext, Evaluator};
use crate::finding::{Finding, FindingStatus};
use crate::report::Report;
use crate::rules::RuleSet;

/// Runs every rule in order, one at a time.
///
/// All rules run regardless of earlier failures unless `fail_fast` is set.
/// Rules targeting a table whose existence check failed, and relational
/// rules after a connection outage, are skipped instead of attempted.
pub struct Aggregator<'a> {
    evaluator: Evaluator<'a>,
    fail_fast: bool,
}

impl<'a> Aggregator<'a> {
    pub fn new(evaluator: Evaluator<'a>) -> Self {
        Self {
            evaluator,
            fail_fast: false,
        }
    }

    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    pub async fn run(&self, rules: &RuleSet) -> Report {
        let mut ctx = EvalContext::default();
        let mut findings = Vec::with_capacity(rules.len());

        for rule in rules.iter() {
            let outage_before = ctx.outage().is_some();
            let finding = match ctx.skip_for(rule) {
                Some((reason, detail)) => Finding::skipped(rule, reason, detail),
                None => self.evaluator.evaluate_in(rule, &mut ctx).await,
            };

            ctx.observe(rule, &finding);
            if !outage_before && ctx.outage().is_some() {
                tracing::error!(
                    rule = rule.name(),
                    error = ctx.outage().unwrap_or_default(),
                    "Relational backend unreachable, skipping remaining relational rules"
                );
            }
            log_finding(&finding);

            let stop = self.fail_fast && finding.status() == FindingStatus::Fail;
            findings.push(finding);
            if stop {
                tracing::warn!(rule = rule.name(), "Fail-fast enabled, stopping after first failure");
                break;
            }
        }

        Report::new(findings, Utc::now())
    }
}

fn log_finding(finding: &Finding) {
    let rule = finding.rule_name();
    let status = finding.status().as_str();
    match finding.status() {
        FindingStatus::Pass => {
            tracing::info!(rule, status, "{}", finding.message());
        }
        FindingStatus::Warn => {
            tracing::warn!(rule, status, "{}", finding.message());
        }
        FindingStatus::Fail => {
            tracing::error!(rule, status, "{}", finding.message());
        }
    }
}
