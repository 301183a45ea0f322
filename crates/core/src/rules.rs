//! Rule types and rule-set validation.
//!
//! A [`Rule`] is an immutable description of one check. Its parameters are a
//! JSON object interpreted per [`RuleKind`] by the typed structs in this
//! module. [`RuleSet::new`] validates every rule before a run starts, so the
//! evaluator only sees rules whose parameters parse.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::source::{validate_identifier, Lookup, SourceKind};
use crate::threshold::validate_unit_range;

// ---------------------------------------------------------------------------
// Kind, severity, target
// ---------------------------------------------------------------------------

/// The check a rule performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    TableExists,
    ColumnSet,
    RowCount,
    NullRate,
    Distribution,
    ForeignKeyCoverage,
    EndpointShape,
    Sample,
    Aggregate,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TableExists => "table_exists",
            Self::ColumnSet => "column_set",
            Self::RowCount => "row_count",
            Self::NullRate => "null_rate",
            Self::Distribution => "distribution",
            Self::ForeignKeyCoverage => "foreign_key_coverage",
            Self::EndpointShape => "endpoint_shape",
            Self::Sample => "sample",
            Self::Aggregate => "aggregate",
        }
    }

    /// The backend the rule reads from first.
    pub fn source_kind(&self) -> SourceKind {
        match self {
            Self::EndpointShape => SourceKind::Http,
            _ => SourceKind::Relational,
        }
    }
}

/// How a threshold breach is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    #[default]
    Error,
}

/// What a rule points at.
///
/// Parsed from a string: a leading `/` is an endpoint path, `table.column`
/// is a column, anything else is a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    Table(String),
    Column { table: String, column: String },
    Endpoint(String),
}

impl Target {
    /// The table this target lives in, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Table(table) | Self::Column { table, .. } => Some(table),
            Self::Endpoint(_) => None,
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Column { column, .. } => Some(column),
            _ => None,
        }
    }
}

impl FromStr for Target {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('/') {
            return Ok(Self::Endpoint(s.to_string()));
        }
        match s.split_once('.') {
            Some((table, column)) => {
                validate_identifier(table)?;
                validate_identifier(column)?;
                Ok(Self::Column {
                    table: table.to_string(),
                    column: column.to_string(),
                })
            }
            None => {
                validate_identifier(s)?;
                Ok(Self::Table(s.to_string()))
            }
        }
    }
}

impl TryFrom<String> for Target {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(table) => f.write_str(table),
            Self::Column { table, column } => write!(f, "{table}.{column}"),
            Self::Endpoint(path) => f.write_str(path),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// One declarative check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    name: String,
    kind: RuleKind,
    target: Target,
    #[serde(default)]
    params: serde_json::Map<String, Value>,
    #[serde(default)]
    severity: Severity,
}

impl Rule {
    pub fn new(name: impl Into<String>, kind: RuleKind, target: Target) -> Self {
        Self {
            name: name.into(),
            kind,
            target,
            params: serde_json::Map::new(),
            severity: Severity::default(),
        }
    }

    /// Replace the parameters. Non-object values are ignored.
    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn params(&self) -> &serde_json::Map<String, Value> {
        &self.params
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Parse the parameters into a kind-specific struct.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        serde_json::from_value(Value::Object(self.params.clone())).map_err(|e| {
            CoreError::Validation(format!("rule '{}': invalid parameters: {e}", self.name))
        })
    }

    /// Check the target shape and parameters for this rule's kind.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("rule name must not be empty".to_string()));
        }
        self.validate_target()?;
        match self.kind {
            RuleKind::TableExists => {
                let p: TableExistsParams = self.params_as()?;
                validate_identifier(&p.schema)
            }
            RuleKind::ColumnSet => {
                let p: ColumnSetParams = self.params_as()?;
                validate_identifier(&p.schema)?;
                p.required.iter().try_for_each(|c| validate_identifier(c))
            }
            RuleKind::RowCount => {
                let p: RowCountParams = self.params_as()?;
                if p.min_rows < 0 {
                    return Err(self.invalid(format!("min_rows must be >= 0, got {}", p.min_rows)));
                }
                Ok(())
            }
            RuleKind::NullRate => {
                let p: NullRateParams = self.params_as()?;
                let columns = p.columns_for(&self.target);
                if columns.is_empty() {
                    return Err(self.invalid("no columns to check".to_string()));
                }
                columns.iter().try_for_each(|c| validate_identifier(c))?;
                validate_unit_range(p.max_null_pct, "max_null_pct")?;
                for (column, pct) in &p.column_thresholds {
                    validate_identifier(column)?;
                    validate_unit_range(*pct, &format!("column_thresholds.{column}"))?;
                }
                if let Some(warn) = p.warn_null_pct {
                    validate_unit_range(warn, "warn_null_pct")?;
                }
                Ok(())
            }
            RuleKind::Distribution => {
                let _: DistributionParams = self.params_as()?;
                Ok(())
            }
            RuleKind::ForeignKeyCoverage => {
                let p: ForeignKeyCoverageParams = self.params_as()?;
                validate_identifier(&p.references)?;
                validate_identifier(&p.referenced_column)?;
                validate_unit_range(p.min_coverage_pct, "min_coverage_pct")
            }
            RuleKind::EndpointShape => {
                let p: EndpointShapeParams = self.params_as()?;
                if let Some(cross_check) = &p.cross_check {
                    validate_identifier(&cross_check.table)?;
                    if cross_check.tolerance < 0.0 {
                        return Err(self.invalid(format!(
                            "cross_check tolerance must be >= 0, got {}",
                            cross_check.tolerance
                        )));
                    }
                    if cross_check.fields.is_empty() {
                        return Err(self.invalid("cross_check declares no fields".to_string()));
                    }
                    for aggregate in cross_check.fields.values() {
                        aggregate.validate()?;
                    }
                }
                Ok(())
            }
            RuleKind::Aggregate => {
                let p: AggregateParams = self.params_as()?;
                if p.fields.is_empty() {
                    return Err(self.invalid("no aggregate fields declared".to_string()));
                }
                for aggregate in p.fields.values() {
                    aggregate.validate()?;
                }
                for (name, bounds) in &p.bounds {
                    if !p.fields.contains_key(name) {
                        return Err(self.invalid(format!("bounds given for undeclared field '{name}'")));
                    }
                    if let (Some(min), Some(max)) = (bounds.min, bounds.max) {
                        if min > max {
                            return Err(self.invalid(format!(
                                "bounds for '{name}' are inverted: min {min} > max {max}"
                            )));
                        }
                    }
                }
                Ok(())
            }
            RuleKind::Sample => {
                let p: SampleParams = self.params_as()?;
                p.columns.iter().try_for_each(|c| validate_identifier(c))?;
                validate_identifier(&p.order_by)?;
                if p.limit <= 0 {
                    return Err(self.invalid(format!("limit must be positive, got {}", p.limit)));
                }
                Ok(())
            }
        }
    }

    fn validate_target(&self) -> Result<(), CoreError> {
        let ok = match (self.kind, &self.target) {
            (RuleKind::EndpointShape, Target::Endpoint(_)) => true,
            (RuleKind::Distribution | RuleKind::ForeignKeyCoverage, Target::Column { .. }) => true,
            (RuleKind::NullRate, Target::Table(_) | Target::Column { .. }) => true,
            (
                RuleKind::TableExists
                | RuleKind::ColumnSet
                | RuleKind::RowCount
                | RuleKind::Sample
                | RuleKind::Aggregate,
                Target::Table(_),
            ) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.invalid(format!(
                "target '{}' is not valid for a {} rule",
                self.target,
                self.kind.as_str()
            )))
        }
    }

    fn invalid(&self, message: String) -> CoreError {
        CoreError::Validation(format!("rule '{}': {message}", self.name))
    }
}

// ---------------------------------------------------------------------------
// Typed parameters
// ---------------------------------------------------------------------------

fn default_schema() -> String {
    "public".to_string()
}

fn default_id() -> String {
    "id".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableExistsParams {
    #[serde(default = "default_schema")]
    pub schema: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSetParams {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RowCountParams {
    #[serde(default = "RowCountParams::default_min_rows")]
    pub min_rows: i64,
}

impl RowCountParams {
    fn default_min_rows() -> i64 {
        1
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NullRateParams {
    #[serde(default)]
    pub columns: Vec<String>,
    /// Highest acceptable fraction of null or empty values.
    #[serde(default)]
    pub max_null_pct: f64,
    /// Per-column overrides of `max_null_pct`.
    #[serde(default)]
    pub column_thresholds: BTreeMap<String, f64>,
    /// Rates above this but within `max_null_pct` are reported as Warn.
    #[serde(default)]
    pub warn_null_pct: Option<f64>,
}

impl NullRateParams {
    /// Explicit columns, or the target's column when none are listed.
    pub fn columns_for(&self, target: &Target) -> Vec<String> {
        if !self.columns.is_empty() {
            return self.columns.clone();
        }
        target.column().map(|c| vec![c.to_string()]).unwrap_or_default()
    }

    pub fn threshold_for(&self, column: &str) -> f64 {
        self.column_thresholds
            .get(column)
            .copied()
            .unwrap_or(self.max_null_pct)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionParams {
    /// Required category set. `null` may be listed to allow the null group.
    #[serde(default)]
    pub expected: Option<Vec<Value>>,
    #[serde(default = "default_true")]
    pub include_nulls: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeyCoverageParams {
    pub references: String,
    #[serde(default = "default_id")]
    pub referenced_column: String,
    #[serde(default = "ForeignKeyCoverageParams::default_min_coverage")]
    pub min_coverage_pct: f64,
}

impl ForeignKeyCoverageParams {
    fn default_min_coverage() -> f64 {
        1.0
    }
}

/// JSON type a response field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    Integer,
    String,
    Boolean,
    Array,
    Object,
}

impl ValueType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Integer => "integer",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointShapeParams {
    /// Query-string parameters sent with the request.
    #[serde(default)]
    pub query: BTreeMap<String, Value>,
    /// Dotted paths that must exist, with their JSON type.
    #[serde(default)]
    pub keys: BTreeMap<String, ValueType>,
    /// Dotted paths of arrays with a maximum length.
    #[serde(default)]
    pub max_items: BTreeMap<String, usize>,
    #[serde(default)]
    pub cross_check: Option<CrossCheck>,
}

impl EndpointShapeParams {
    /// Query parameters in wire form.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .iter()
            .map(|(k, v)| (k.clone(), value_to_text(v)))
            .collect()
    }
}

/// Re-derivation of endpoint figures from the relational source.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossCheck {
    pub table: String,
    /// Largest absolute difference still treated as a match.
    #[serde(default)]
    pub tolerance: f64,
    /// Dotted response path to the aggregate that should reproduce it.
    pub fields: BTreeMap<String, AggregateSpec>,
}

/// Named figures computed over one table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateParams {
    pub fields: BTreeMap<String, AggregateSpec>,
    /// Accepted range per field; figures outside it are a breach.
    #[serde(default)]
    pub bounds: BTreeMap<String, Bounds>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bounds {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Aggregate used by a cross-check or aggregate field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "aggregate", rename_all = "snake_case", deny_unknown_fields)]
pub enum AggregateSpec {
    Count {
        #[serde(default)]
        filter: BTreeMap<String, Value>,
    },
    Sum {
        column: String,
        #[serde(default)]
        filter: BTreeMap<String, Value>,
    },
    Avg {
        column: String,
        #[serde(default)]
        filter: BTreeMap<String, Value>,
    },
}

impl AggregateSpec {
    pub fn filter(&self) -> &BTreeMap<String, Value> {
        match self {
            Self::Count { filter } | Self::Sum { filter, .. } | Self::Avg { filter, .. } => filter,
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        if let Self::Sum { column, .. } | Self::Avg { column, .. } = self {
            validate_identifier(column)?;
        }
        self.filter().keys().try_for_each(|c| validate_identifier(c))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleParams {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default = "SampleParams::default_order_by")]
    pub order_by: String,
    #[serde(default = "SampleParams::default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub lookup: Option<Lookup>,
}

impl SampleParams {
    fn default_order_by() -> String {
        "created_at".to_string()
    }

    fn default_limit() -> i64 {
        5
    }
}

/// Text form of a JSON scalar, used for query strings and SQL filters.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

/// An ordered, validated list of rules with unique names.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self, CoreError> {
        let mut seen = BTreeSet::new();
        for rule in &rules {
            if !seen.insert(rule.name()) {
                return Err(CoreError::Validation(format!(
                    "duplicate rule name '{}'",
                    rule.name()
                )));
            }
            rule.validate()?;
        }
        Ok(Self { rules })
    }

    /// Parse a JSON array of rules.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let rules: Vec<Rule> = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("invalid rules file: {e}")))?;
        Self::new(rules)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
