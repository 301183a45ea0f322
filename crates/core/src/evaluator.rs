//! Rule evaluator.
//!
//! Turns one rule plus the configured data sources into exactly one
//! [`Finding`]. Adapter errors never escape: they become Fail findings, or
//! Skip findings for connection outages. Apart from the optional endpoint
//! retry, evaluation is a pure function of the rule, the source contents and
//! the [`EvalContext`] built up by the aggregator.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::error::{CoreError, SourceError};
use crate::finding::{Finding, FindingStatus, SkipReason};
use crate::rules::{
    value_to_text, AggregateParams, AggregateSpec, ColumnSetParams, CrossCheck, DistributionParams,
    EndpointShapeParams, ForeignKeyCoverageParams, NullRateParams, RowCountParams, Rule,
    RuleKind, SampleParams, TableExistsParams, Target,
};
use crate::source::{AggregateFn, DataSource, Filter, QuerySpec, SourceKind};
use crate::threshold::{percent, ratio, round2, within_tolerance};
use crate::types::Record;

/// Message used when a row-dependent rule meets an empty table.
pub const NO_DATA: &str = "no data.";

/// Sampled text longer than this is truncated.
const SAMPLE_TEXT_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Sources, context, retry
// ---------------------------------------------------------------------------

/// The data sources available to a run. Either may be absent.
#[derive(Clone, Copy, Default)]
pub struct Sources<'a> {
    pub relational: Option<&'a dyn DataSource>,
    pub http: Option<&'a dyn DataSource>,
}

impl<'a> Sources<'a> {
    fn for_kind(&self, kind: SourceKind) -> Option<&'a dyn DataSource> {
        match kind {
            SourceKind::Relational => self.relational,
            SourceKind::Http => self.http,
        }
    }
}

/// What earlier findings in the same run revealed.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// Tables whose existence check did not pass, with the skip detail.
    unusable_tables: BTreeMap<String, (SkipReason, String)>,
    relational_outage: Option<String>,
}

impl EvalContext {
    fn table_skip(&self, table: &str) -> Option<(SkipReason, String)> {
        self.unusable_tables.get(table).cloned()
    }

    pub fn outage(&self) -> Option<&str> {
        self.relational_outage.as_deref()
    }

    /// Reason to skip `rule` without touching any source.
    pub fn skip_for(&self, rule: &Rule) -> Option<(SkipReason, String)> {
        if rule.kind().source_kind() == SourceKind::Relational && self.relational_outage.is_some()
        {
            return Some((
                SkipReason::SourceUnavailable,
                "relational backend unavailable".to_string(),
            ));
        }
        if rule.kind() == RuleKind::TableExists {
            return None;
        }
        self.table_skip(rule.target().table()?)
    }

    /// Remember a relational outage met outside a relational rule.
    pub fn record_outage(&mut self, detail: impl Into<String>) {
        if self.relational_outage.is_none() {
            self.relational_outage = Some(detail.into());
        }
    }

    /// Record what a finding tells later rules.
    pub fn observe(&mut self, rule: &Rule, finding: &Finding) {
        if finding.skip_reason() == Some(SkipReason::SourceUnavailable)
            && rule.kind().source_kind() == SourceKind::Relational
            && self.relational_outage.is_none()
        {
            self.relational_outage = Some(finding.message().to_string());
        }
        if rule.kind() == RuleKind::TableExists
            && !finding.is_skipped()
            && finding.status() != FindingStatus::Pass
        {
            if let Some(table) = rule.target().table() {
                // Only a `false` answer means the table is absent; anything
                // else is an error from the check itself.
                let skip = if finding.observed_value() == &Value::Bool(false) {
                    (SkipReason::MissingTable, format!("table {table} does not exist"))
                } else {
                    (
                        SkipReason::PrerequisiteFailed,
                        format!("existence check for {table} failed: {}", finding.message()),
                    )
                };
                self.unusable_tables.entry(table.to_string()).or_insert(skip);
            }
        }
    }
}

/// Bounded retry for unreachable endpoints. Other errors are never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Exponential backoff: `base`, `2 * base`, `4 * base`, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum EvalError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

type EvalResult = Result<Finding, EvalError>;

/// Evaluates single rules against the configured sources.
pub struct Evaluator<'a> {
    sources: Sources<'a>,
    retry: RetryPolicy,
}

impl<'a> Evaluator<'a> {
    pub fn new(sources: Sources<'a>) -> Self {
        Self {
            sources,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Produce exactly one finding for `rule`.
    pub async fn evaluate(&self, rule: &Rule, ctx: &EvalContext) -> Finding {
        self.evaluate_tracked(rule, ctx).await.0
    }

    /// Like [`evaluate`](Self::evaluate), and records in `ctx` a relational
    /// outage met by an endpoint cross-check so later rules skip it.
    pub async fn evaluate_in(&self, rule: &Rule, ctx: &mut EvalContext) -> Finding {
        let (finding, outage) = self.evaluate_tracked(rule, ctx).await;
        if let Some(err) = outage {
            ctx.record_outage(err.to_string());
        }
        finding
    }

    async fn evaluate_tracked(
        &self,
        rule: &Rule,
        ctx: &EvalContext,
    ) -> (Finding, Option<SourceError>) {
        let kind = rule.kind().source_kind();
        let Some(source) = self.sources.for_kind(kind) else {
            let label = match kind {
                SourceKind::Relational => "relational",
                SourceKind::Http => "HTTP",
            };
            let finding = Finding::skipped(
                rule,
                SkipReason::NotConfigured,
                format!("no {label} data source configured"),
            );
            return (finding, None);
        };

        let mut outage = None;
        let result = match rule.kind() {
            RuleKind::TableExists => table_exists(rule, source).await,
            RuleKind::ColumnSet => column_set(rule, source).await,
            RuleKind::RowCount => row_count(rule, source).await,
            RuleKind::NullRate => null_rate(rule, source).await,
            RuleKind::Distribution => distribution(rule, source).await,
            RuleKind::ForeignKeyCoverage => foreign_key_coverage(rule, source).await,
            RuleKind::Sample => sample(rule, source).await,
            RuleKind::Aggregate => aggregate(rule, source).await,
            RuleKind::EndpointShape => {
                self.endpoint_shape(rule, source, ctx)
                    .await
                    .map(|(finding, lost)| {
                        outage = lost;
                        finding
                    })
            }
        };

        let finding = match result {
            Ok(finding) => finding,
            Err(EvalError::Source(err)) => Finding::from_source_error(rule, &err),
            Err(EvalError::Invalid(err)) => Finding::fail(rule, Value::Null, err.to_string()),
        };
        (finding, outage)
    }

    async fn endpoint_shape(
        &self,
        rule: &Rule,
        http: &dyn DataSource,
        ctx: &EvalContext,
    ) -> Result<(Finding, Option<SourceError>), EvalError> {
        let params: EndpointShapeParams = rule.params_as()?;
        let Target::Endpoint(path) = rule.target() else {
            return Err(invalid_target(rule).into());
        };

        let body = self
            .fetch_json_with_retry(http, path, &params.query_pairs())
            .await?;

        let mut problems = shape_problems(&body, &params);
        let mut observed = Map::new();
        observed.insert("response".to_string(), declared_values(&body, &params));

        let mut cross_check_note = None;
        let mut outage = None;
        if let Some(spec) = &params.cross_check {
            match self.cross_check(spec, &body, ctx).await {
                Ok(CrossCheckOutcome::Compared {
                    comparisons,
                    mismatches,
                }) => {
                    observed.insert("cross_check".to_string(), comparisons);
                    problems.extend(mismatches);
                }
                Ok(CrossCheckOutcome::Skipped(reason)) => cross_check_note = Some(reason),
                Err(err) if err.is_connection() => {
                    cross_check_note = Some(err.to_string());
                    outage = Some(err);
                }
                Err(err) => problems.push(format!("cross-check: {err}")),
            }
        }

        let observed = Value::Object(observed);
        if !problems.is_empty() {
            return Ok((Finding::breach(rule, observed, problems.join("; ")), outage));
        }
        let finding = match (cross_check_note, &params.cross_check) {
            (Some(reason), _) => Finding::warn(
                rule,
                observed,
                format!("response shape ok; cross-check skipped: {reason}"),
            ),
            (None, Some(spec)) => Finding::pass(
                rule,
                observed,
                format!(
                    "response shape ok; {} figure(s) match {} within tolerance {}",
                    spec.fields.len(),
                    spec.table,
                    spec.tolerance
                ),
            ),
            (None, None) => Finding::pass(rule, observed, "response shape ok"),
        };
        Ok((finding, outage))
    }

    async fn fetch_json_with_retry(
        &self,
        http: &dyn DataSource,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<Value, SourceError> {
        let mut attempt = 0;
        loop {
            match http.fetch_json(endpoint, query).await {
                Err(err) if err.is_retryable() && attempt < self.retry.retries => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        endpoint,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Endpoint unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn cross_check(
        &self,
        spec: &CrossCheck,
        body: &Value,
        ctx: &EvalContext,
    ) -> Result<CrossCheckOutcome, SourceError> {
        if ctx.outage().is_some() {
            return Ok(CrossCheckOutcome::Skipped(
                "relational backend unavailable".to_string(),
            ));
        }
        if let Some((_, detail)) = ctx.table_skip(&spec.table) {
            return Ok(CrossCheckOutcome::Skipped(detail));
        }
        let Some(relational) = self.sources.relational else {
            return Ok(CrossCheckOutcome::Skipped(
                "no relational data source configured".to_string(),
            ));
        };

        let mut comparisons = Map::new();
        let mut mismatches = Vec::new();
        for (path, aggregate) in &spec.fields {
            let db_value = relational
                .fetch_scalar(&aggregate_query(&spec.table, aggregate))
                .await?;
            // SUM/AVG over zero rows is NULL; the endpoint reports those as 0.
            let db = value_f64(&db_value).unwrap_or(0.0);
            let api = lookup_path(body, path).and_then(value_f64);
            comparisons.insert(path.clone(), json!({ "api": api, "db": db }));
            match api {
                None => mismatches.push(format!("{path}: missing or not numeric in response")),
                Some(api) if !within_tolerance(api, db, spec.tolerance) => mismatches.push(format!(
                    "{path}: api={api} db={db} differ by more than {}",
                    spec.tolerance
                )),
                Some(_) => {}
            }
        }
        Ok(CrossCheckOutcome::Compared {
            comparisons: Value::Object(comparisons),
            mismatches,
        })
    }
}

enum CrossCheckOutcome {
    Compared {
        comparisons: Value,
        mismatches: Vec<String>,
    },
    Skipped(String),
}

// ---------------------------------------------------------------------------
// Relational rules
// ---------------------------------------------------------------------------

async fn table_exists(rule: &Rule, source: &dyn DataSource) -> EvalResult {
    let params: TableExistsParams = rule.params_as()?;
    let table = target_table(rule)?;
    let exists = source
        .fetch_scalar(&QuerySpec::TableExists {
            schema: params.schema.clone(),
            table: table.to_string(),
        })
        .await?;

    match exists.as_bool() {
        Some(true) => Ok(Finding::pass(
            rule,
            json!(true),
            format!("table {}.{table} exists", params.schema),
        )),
        Some(false) => Ok(Finding::breach(
            rule,
            json!(false),
            format!("table {}.{table} not found", params.schema),
        )),
        None => Err(SourceError::Query(format!("existence check returned {exists}")).into()),
    }
}

async fn column_set(rule: &Rule, source: &dyn DataSource) -> EvalResult {
    let params: ColumnSetParams = rule.params_as()?;
    let table = target_table(rule)?;
    let rows = source
        .fetch_rows(&QuerySpec::Columns {
            schema: params.schema.clone(),
            table: table.to_string(),
        })
        .await?;

    let mut discovered = Vec::with_capacity(rows.len());
    for row in &rows {
        let Some(name) = row.get("column_name").and_then(Value::as_str) else {
            continue;
        };
        let data_type = row.get("data_type").and_then(Value::as_str).unwrap_or("?");
        let nullable = row.get("is_nullable").and_then(Value::as_str).unwrap_or("?");
        tracing::debug!(table, column = name, data_type, nullable, "Discovered column");
        discovered.push(name.to_string());
    }

    let missing: Vec<&str> = params
        .required
        .iter()
        .filter(|c| !discovered.contains(*c))
        .map(String::as_str)
        .collect();
    let observed = json!(discovered);

    if missing.is_empty() {
        Ok(Finding::pass(
            rule,
            observed,
            format!(
                "{} column(s) found, all {} required column(s) present",
                discovered.len(),
                params.required.len()
            ),
        ))
    } else {
        Ok(Finding::breach(
            rule,
            observed,
            format!("{table} is missing column(s): {}", missing.join(", ")),
        ))
    }
}

async fn row_count(rule: &Rule, source: &dyn DataSource) -> EvalResult {
    let params: RowCountParams = rule.params_as()?;
    let table = target_table(rule)?;
    let count = count_rows(source, table).await?;

    if count == 0 {
        // An empty table fails whatever the rule's severity.
        Ok(Finding::fail(rule, json!(0), format!("{table} has no rows")))
    } else if count < params.min_rows {
        Ok(Finding::breach(
            rule,
            json!(count),
            format!("{table} has {count} row(s), expected at least {}", params.min_rows),
        ))
    } else {
        Ok(Finding::pass(rule, json!(count), format!("{table} has {count} row(s)")))
    }
}

async fn null_rate(rule: &Rule, source: &dyn DataSource) -> EvalResult {
    let params: NullRateParams = rule.params_as()?;
    let table = target_table(rule)?;
    let columns = params.columns_for(rule.target());

    let rows = source
        .fetch_rows(&QuerySpec::NullCounts {
            table: table.to_string(),
            columns: columns.clone(),
        })
        .await?;
    let record = first_record(rows, "null count")?;
    let total = record_i64(&record, "total")?;
    if total == 0 {
        return Ok(Finding::skipped(rule, SkipReason::NoData, NO_DATA));
    }
    let nulls = record
        .get("nulls")
        .and_then(Value::as_object)
        .ok_or_else(|| SourceError::Query("null count result has no 'nulls' map".to_string()))?;

    let mut worst = 0.0_f64;
    let mut breakdown = Vec::with_capacity(columns.len());
    let mut breaches = Vec::new();
    let mut warnings = Vec::new();
    for column in &columns {
        let count = nulls.get(column).and_then(value_i64).ok_or_else(|| {
            SourceError::Query(format!("null count result has no entry for '{column}'"))
        })?;
        let rate = ratio(count, total).unwrap_or(0.0);
        let limit = params.threshold_for(column);
        worst = worst.max(rate);
        breakdown.push(format!("{column}: {count}/{total} ({:.2}%)", rate * 100.0));
        if rate > limit {
            breaches.push(format!(
                "{column} {:.2}% > {:.2}%",
                rate * 100.0,
                limit * 100.0
            ));
        } else if let Some(warn) = params.warn_null_pct.filter(|warn| rate > *warn) {
            warnings.push(format!("{column} {:.2}% > {:.2}%", rate * 100.0, warn * 100.0));
        }
    }

    let breakdown = breakdown.join(", ");
    if !breaches.is_empty() {
        // Severity does not soften a null-rate breach.
        Ok(Finding::fail(
            rule,
            json!(worst),
            format!(
                "null rate above threshold for {}; breakdown: {breakdown}",
                breaches.join(", ")
            ),
        ))
    } else if !warnings.is_empty() {
        Ok(Finding::warn(
            rule,
            json!(worst),
            format!(
                "null or empty values in {}; breakdown: {breakdown}",
                warnings.join(", ")
            ),
        ))
    } else {
        Ok(Finding::pass(
            rule,
            json!(worst),
            format!("null rates within threshold: {breakdown}"),
        ))
    }
}

async fn distribution(rule: &Rule, source: &dyn DataSource) -> EvalResult {
    let params: DistributionParams = rule.params_as()?;
    let table = target_table(rule)?;
    let column = rule
        .target()
        .column()
        .ok_or_else(|| invalid_target(rule))?;

    let total = count_rows(source, table).await?;
    if total == 0 {
        return Ok(Finding::skipped(rule, SkipReason::NoData, NO_DATA));
    }

    let rows = source
        .fetch_rows(&QuerySpec::GroupCounts {
            table: table.to_string(),
            column: column.to_string(),
            include_nulls: params.include_nulls,
        })
        .await?;
    let groups = rows
        .iter()
        .map(|row| {
            let value = row.get("value").cloned().unwrap_or(Value::Null);
            record_i64(row, "count").map(|count| (value, count))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let observed = Value::Array(
        groups
            .iter()
            .map(|(value, count)| {
                json!({ "value": value, "count": count, "pct": percent(*count, total) })
            })
            .collect(),
    );
    let breakdown = groups
        .iter()
        .map(|(value, count)| {
            format!("{}: {count} ({:.2}%)", display_value(value), percent(*count, total))
        })
        .collect::<Vec<_>>()
        .join(", ");

    let Some(expected) = &params.expected else {
        return Ok(Finding::pass(
            rule,
            observed,
            format!("{} categor(ies) in {column}: {breakdown}", groups.len()),
        ));
    };

    let unexpected: Vec<String> = groups
        .iter()
        .filter(|(value, _)| !expected.contains(value))
        .map(|(value, _)| display_value(value))
        .collect();
    let missing: Vec<String> = expected
        .iter()
        .filter(|value| !groups.iter().any(|(seen, _)| seen == *value))
        .map(display_value)
        .collect();

    if unexpected.is_empty() && missing.is_empty() {
        Ok(Finding::pass(
            rule,
            observed,
            format!("{column} matches the expected categories: {breakdown}"),
        ))
    } else {
        let mut parts = Vec::new();
        if !unexpected.is_empty() {
            parts.push(format!("unexpected categor(ies): {}", unexpected.join(", ")));
        }
        if !missing.is_empty() {
            parts.push(format!("missing categor(ies): {}", missing.join(", ")));
        }
        Ok(Finding::breach(
            rule,
            observed,
            format!("{column}: {}; breakdown: {breakdown}", parts.join("; ")),
        ))
    }
}

async fn foreign_key_coverage(rule: &Rule, source: &dyn DataSource) -> EvalResult {
    let params: ForeignKeyCoverageParams = rule.params_as()?;
    let table = target_table(rule)?;
    let column = rule
        .target()
        .column()
        .ok_or_else(|| invalid_target(rule))?;

    let rows = source
        .fetch_rows(&QuerySpec::ForeignKeyCoverage {
            table: table.to_string(),
            column: column.to_string(),
            referenced_table: params.references.clone(),
            referenced_column: params.referenced_column.clone(),
        })
        .await?;
    let record = first_record(rows, "coverage")?;
    let total = record_i64(&record, "total")?;
    let matched = record_i64(&record, "matched")?;
    let Some(coverage) = ratio(matched, total) else {
        return Ok(Finding::skipped(rule, SkipReason::NoData, NO_DATA));
    };

    let message = format!(
        "{matched}/{total} row(s) of {table}.{column} reference {}.{} (coverage {:.2}%, minimum {:.2}%)",
        params.references,
        params.referenced_column,
        coverage * 100.0,
        params.min_coverage_pct * 100.0
    );
    let unmatched = total - matched;

    if coverage < params.min_coverage_pct {
        Ok(Finding::breach(rule, json!(coverage), message))
    } else if unmatched > 0 {
        Ok(Finding::warn(
            rule,
            json!(coverage),
            format!("{message}; {unmatched} row(s) without a match"),
        ))
    } else {
        Ok(Finding::pass(rule, json!(coverage), message))
    }
}

async fn sample(rule: &Rule, source: &dyn DataSource) -> EvalResult {
    let params: SampleParams = rule.params_as()?;
    let table = target_table(rule)?;

    let rows = source
        .fetch_rows(&QuerySpec::Sample {
            table: table.to_string(),
            columns: params.columns.clone(),
            lookup: params.lookup.clone(),
            order_by: params.order_by.clone(),
            limit: params.limit,
        })
        .await?;
    if rows.is_empty() {
        return Ok(Finding::skipped(rule, SkipReason::NoData, NO_DATA));
    }

    let count = rows.len();
    let records: Vec<Value> = rows
        .into_iter()
        .map(|record| Value::Object(truncate_record(record)))
        .collect();
    Ok(Finding::pass(
        rule,
        Value::Array(records),
        format!(
            "{count} most recent record(s) from {table} by {}",
            params.order_by
        ),
    ))
}

async fn aggregate(rule: &Rule, source: &dyn DataSource) -> EvalResult {
    let params: AggregateParams = rule.params_as()?;
    let table = target_table(rule)?;

    if count_rows(source, table).await? == 0 {
        return Ok(Finding::skipped(rule, SkipReason::NoData, NO_DATA));
    }

    let mut observed = Map::new();
    let mut figures = Vec::with_capacity(params.fields.len());
    let mut breaches = Vec::new();
    for (name, spec) in &params.fields {
        let raw = source.fetch_scalar(&aggregate_query(table, spec)).await?;
        let value = match spec {
            AggregateSpec::Count { .. } => value_i64(&raw).map(|n| json!(n)),
            AggregateSpec::Sum { .. } | AggregateSpec::Avg { .. } => {
                value_f64(&raw).map(|n| json!(round2(n)))
            }
        };
        let value = match (value, &raw) {
            (Some(value), _) => value,
            (None, Value::Null) => Value::Null,
            (None, other) => {
                return Err(SourceError::Query(format!("{name} returned {other}")).into());
            }
        };
        figures.push(format!("{name}={}", display_value(&value)));

        if let (Some(bounds), Some(n)) = (params.bounds.get(name), value_f64(&value)) {
            if !bounds.contains(n) {
                let min = bounds.min.map_or("-inf".to_string(), |m| m.to_string());
                let max = bounds.max.map_or("inf".to_string(), |m| m.to_string());
                breaches.push(format!("{name}={n} outside [{min}, {max}]"));
            }
        }
        observed.insert(name.clone(), value);
    }

    let figures = figures.join(", ");
    if breaches.is_empty() {
        Ok(Finding::pass(rule, Value::Object(observed), format!("{table}: {figures}")))
    } else {
        Ok(Finding::breach(
            rule,
            Value::Object(observed),
            format!("{table}: {}; figures: {figures}", breaches.join(", ")),
        ))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn target_table(rule: &Rule) -> Result<&str, CoreError> {
    rule.target().table().ok_or_else(|| invalid_target(rule))
}

fn invalid_target(rule: &Rule) -> CoreError {
    CoreError::Validation(format!(
        "rule '{}': target '{}' is not valid for a {} rule",
        rule.name(),
        rule.target(),
        rule.kind().as_str()
    ))
}

async fn count_rows(source: &dyn DataSource, table: &str) -> Result<i64, EvalError> {
    let value = source
        .fetch_scalar(&QuerySpec::Aggregate {
            table: table.to_string(),
            function: AggregateFn::Count,
            filter: Vec::new(),
        })
        .await?;
    value_i64(&value)
        .ok_or_else(|| SourceError::Query(format!("row count returned {value}")).into())
}

fn aggregate_query(table: &str, aggregate: &AggregateSpec) -> QuerySpec {
    let function = match aggregate {
        AggregateSpec::Count { .. } => AggregateFn::Count,
        AggregateSpec::Sum { column, .. } => AggregateFn::Sum(column.clone()),
        AggregateSpec::Avg { column, .. } => AggregateFn::Avg(column.clone()),
    };
    QuerySpec::Aggregate {
        table: table.to_string(),
        function,
        filter: aggregate
            .filter()
            .iter()
            .map(|(column, value)| Filter {
                column: column.clone(),
                value: value_to_text(value),
            })
            .collect(),
    }
}

fn first_record(rows: Vec<Record>, what: &str) -> Result<Record, SourceError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| SourceError::Query(format!("{what} query returned no rows")))
}

fn record_i64(record: &Record, key: &str) -> Result<i64, EvalError> {
    record.get(key).and_then(value_i64).ok_or_else(|| {
        SourceError::Query(format!("result is missing numeric field '{key}'")).into()
    })
}

fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Resolve a dotted path such as `data.total` or `data.0.id`.
pub fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Everything wrong with an endpoint response, in declaration order.
pub fn shape_problems(body: &Value, params: &EndpointShapeParams) -> Vec<String> {
    let Some(object) = body.as_object() else {
        return vec!["malformed response: expected a JSON object".to_string()];
    };

    let mut problems = Vec::new();
    match object.get("success") {
        Some(Value::Bool(true)) => {}
        Some(Value::Bool(false)) => {
            let error = object
                .get("error")
                .map(display_value)
                .unwrap_or_else(|| "no error message".to_string());
            problems.push(format!("endpoint reported success=false: {error}"));
        }
        _ => problems.push("`success` is missing or not a boolean".to_string()),
    }

    for (path, expected) in &params.keys {
        match lookup_path(body, path) {
            None => problems.push(format!("{path}: missing")),
            Some(value) if !expected.matches(value) => problems.push(format!(
                "{path}: expected {}, got {}",
                expected.as_str(),
                json_type_name(value)
            )),
            Some(value) => {
                if value.as_f64().is_some_and(|n| n < 0.0) {
                    problems.push(format!("{path}: negative value {value}"));
                }
            }
        }
    }

    for (path, max) in &params.max_items {
        match lookup_path(body, path).and_then(Value::as_array) {
            None => problems.push(format!("{path}: missing or not an array")),
            Some(items) if items.len() > *max => problems.push(format!(
                "{path}: {} item(s) exceeds maximum {max}",
                items.len()
            )),
            Some(_) => {}
        }
    }
    problems
}

/// The declared response figures; arrays are summarised by length.
fn declared_values(body: &Value, params: &EndpointShapeParams) -> Value {
    let paths: BTreeSet<&String> = params.keys.keys().chain(params.max_items.keys()).collect();
    let mut values = Map::new();
    for path in paths {
        let value = match lookup_path(body, path) {
            Some(Value::Array(items)) => json!({ "items": items.len() }),
            Some(Value::Object(_)) => json!("object"),
            Some(other) => other.clone(),
            None => Value::Null,
        };
        values.insert(path.clone(), value);
    }
    Value::Object(values)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "(null)".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate_record(mut record: Record) -> Record {
    for value in record.values_mut() {
        if let Value::String(s) = value {
            if s.chars().count() > SAMPLE_TEXT_LIMIT {
                let short: String = s.chars().take(SAMPLE_TEXT_LIMIT).collect();
                *s = format!("{short}...");
            }
        }
    }
    record
}
