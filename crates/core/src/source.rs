//! Data source abstraction shared by the relational and HTTP adapters.
//!
//! Rules never carry SQL. They describe reads as [`QuerySpec`] values, and
//! each adapter decides how to execute them. Result shapes are part of the
//! contract and are documented on each variant.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, SourceError};
use crate::types::Record;

/// Which backend a source talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Relational,
    Http,
}

/// Aggregate function applied by [`QuerySpec::Aggregate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Count,
    Sum(String),
    Avg(String),
}

/// Equality filter, compared on the text form of the column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

/// Optional join used by sample listings to resolve a foreign key into a
/// human-readable column of the referenced table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lookup {
    /// Foreign key column on the sampled table.
    pub column: String,
    /// Referenced table.
    pub table: String,
    /// Key column on the referenced table.
    #[serde(default = "default_referenced_column")]
    pub referenced_column: String,
    /// Column of the referenced table to select.
    pub select: String,
    /// Name of the selected column in the sampled records.
    pub alias: String,
}

fn default_referenced_column() -> String {
    "id".to_string()
}

/// Backend-independent description of one relational read.
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySpec {
    /// Scalar `bool`: whether `schema.table` exists.
    TableExists { schema: String, table: String },

    /// Rows `{column_name, data_type, is_nullable}` in ordinal order.
    Columns { schema: String, table: String },

    /// Scalar number (or `null` for `Sum`/`Avg` over zero rows).
    Aggregate {
        table: String,
        function: AggregateFn,
        filter: Vec<Filter>,
    },

    /// One row `{total, nulls: {column: count}}`. A value counts as null when
    /// it is SQL `NULL` or its text form is empty.
    NullCounts { table: String, columns: Vec<String> },

    /// Rows `{value, count}` ordered by count descending, then value.
    GroupCounts {
        table: String,
        column: String,
        include_nulls: bool,
    },

    /// One row `{total, matched}` from a left join onto the referenced table.
    ForeignKeyCoverage {
        table: String,
        column: String,
        referenced_table: String,
        referenced_column: String,
    },

    /// Up to `limit` records ordered by `order_by` descending. An empty
    /// `columns` list selects every column.
    Sample {
        table: String,
        columns: Vec<String>,
        lookup: Option<Lookup>,
        order_by: String,
        limit: i64,
    },
}

impl QuerySpec {
    /// The primary table the query reads.
    pub fn table(&self) -> &str {
        match self {
            Self::TableExists { table, .. }
            | Self::Columns { table, .. }
            | Self::Aggregate { table, .. }
            | Self::NullCounts { table, .. }
            | Self::GroupCounts { table, .. }
            | Self::ForeignKeyCoverage { table, .. }
            | Self::Sample { table, .. } => table,
        }
    }

    /// Check every identifier the query would interpolate.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_identifier(self.table())?;
        match self {
            Self::TableExists { schema, .. } | Self::Columns { schema, .. } => {
                validate_identifier(schema)
            }
            Self::Aggregate {
                function, filter, ..
            } => {
                if let AggregateFn::Sum(column) | AggregateFn::Avg(column) = function {
                    validate_identifier(column)?;
                }
                filter.iter().try_for_each(|f| validate_identifier(&f.column))
            }
            Self::NullCounts { columns, .. } => {
                if columns.is_empty() {
                    return Err(CoreError::Validation(
                        "null count query needs at least one column".to_string(),
                    ));
                }
                columns.iter().try_for_each(|c| validate_identifier(c))
            }
            Self::GroupCounts { column, .. } => validate_identifier(column),
            Self::ForeignKeyCoverage {
                column,
                referenced_table,
                referenced_column,
                ..
            } => {
                validate_identifier(column)?;
                validate_identifier(referenced_table)?;
                validate_identifier(referenced_column)
            }
            Self::Sample {
                columns,
                lookup,
                order_by,
                limit,
                ..
            } => {
                columns.iter().try_for_each(|c| validate_identifier(c))?;
                validate_identifier(order_by)?;
                if let Some(lookup) = lookup {
                    validate_identifier(&lookup.column)?;
                    validate_identifier(&lookup.table)?;
                    validate_identifier(&lookup.referenced_column)?;
                    validate_identifier(&lookup.select)?;
                    validate_identifier(&lookup.alias)?;
                }
                if *limit <= 0 {
                    return Err(CoreError::Validation(format!(
                        "sample limit must be positive, got {limit}"
                    )));
                }
                Ok(())
            }
        }
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
    })
}

/// Validate a table or column name before it is interpolated into a query.
pub fn validate_identifier(name: &str) -> Result<(), CoreError> {
    if name.len() <= 63 && identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "'{name}' is not a valid table or column name"
        )))
    }
}

/// Read-only access to a backend.
///
/// Implementations never mutate the underlying system and never retry. A
/// capability the backend lacks fails with [`SourceError::Query`].
#[async_trait]
pub trait DataSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Execute a single-value query.
    async fn fetch_scalar(&self, query: &QuerySpec) -> Result<Value, SourceError>;

    /// Execute a query returning zero or more records.
    async fn fetch_rows(&self, query: &QuerySpec) -> Result<Vec<Record>, SourceError>;

    /// Issue a GET against `endpoint` and parse the JSON body.
    async fn fetch_json(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, SourceError>;
}
