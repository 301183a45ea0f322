//! SQL rendering for [`QuerySpec`].
//!
//! Every statement yields a single `jsonb` column so rows decode uniformly
//! into `serde_json::Value`. Identifiers are validated, then double-quoted;
//! filter values are always bound, never interpolated.

use crjr_audit_core::source::{AggregateFn, Filter, QuerySpec};
use crjr_audit_core::CoreError;

/// A rendered statement and its text parameters, in `$n` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    pub sql: String,
    pub binds: Vec<String>,
}

impl SqlStatement {
    fn new(sql: String) -> Self {
        Self {
            sql,
            binds: Vec::new(),
        }
    }
}

/// Quote an identifier that already passed validation.
fn ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// A null value or one whose text form is empty.
fn blank(column: &str) -> String {
    let c = ident(column);
    format!("{c} IS NULL OR {c}::text = ''")
}

pub fn render(query: &QuerySpec) -> Result<SqlStatement, CoreError> {
    query.validate()?;

    let statement = match query {
        QuerySpec::TableExists { schema, table } => SqlStatement {
            sql: "SELECT to_jsonb(EXISTS (\
                  SELECT 1 FROM information_schema.tables \
                  WHERE table_schema = $1 AND table_name = $2))"
                .to_string(),
            binds: vec![schema.clone(), table.clone()],
        },

        QuerySpec::Columns { schema, table } => SqlStatement {
            sql: "SELECT jsonb_build_object(\
                  'column_name', column_name::text, \
                  'data_type', data_type::text, \
                  'is_nullable', is_nullable::text) \
                  FROM information_schema.columns \
                  WHERE table_schema = $1 AND table_name = $2 \
                  ORDER BY ordinal_position"
                .to_string(),
            binds: vec![schema.clone(), table.clone()],
        },

        QuerySpec::Aggregate {
            table,
            function,
            filter,
        } => {
            let expr = match function {
                AggregateFn::Count => "COUNT(*)".to_string(),
                AggregateFn::Sum(column) => format!("SUM({})", ident(column)),
                AggregateFn::Avg(column) => format!("AVG({})", ident(column)),
            };
            let (clause, binds) = where_clause(filter);
            SqlStatement {
                sql: format!("SELECT to_jsonb({expr}) FROM {}{clause}", ident(table)),
                binds,
            }
        }

        QuerySpec::NullCounts { table, columns } => {
            let counts = columns
                .iter()
                .map(|c| format!("'{c}', COUNT(*) FILTER (WHERE {})", blank(c)))
                .collect::<Vec<_>>()
                .join(", ");
            SqlStatement::new(format!(
                "SELECT jsonb_build_object('total', COUNT(*), 'nulls', jsonb_build_object({counts})) \
                 FROM {}",
                ident(table)
            ))
        }

        QuerySpec::GroupCounts {
            table,
            column,
            include_nulls,
        } => {
            let c = ident(column);
            let filter = if *include_nulls {
                String::new()
            } else {
                format!(" WHERE {c} IS NOT NULL")
            };
            SqlStatement::new(format!(
                "SELECT jsonb_build_object('value', {c}, 'count', COUNT(*)) \
                 FROM {}{filter} \
                 GROUP BY {c} \
                 ORDER BY COUNT(*) DESC, {c} ASC NULLS LAST",
                ident(table)
            ))
        }

        QuerySpec::ForeignKeyCoverage {
            table,
            column,
            referenced_table,
            referenced_column,
        } => SqlStatement::new(format!(
            "SELECT jsonb_build_object('total', COUNT(*), 'matched', COUNT(*) FILTER (WHERE EXISTS (\
             SELECT 1 FROM {} AS r WHERE r.{} = b.{}))) \
             FROM {} AS b",
            ident(referenced_table),
            ident(referenced_column),
            ident(column),
            ident(table)
        )),

        QuerySpec::Sample {
            table,
            columns,
            lookup,
            order_by,
            limit,
        } => {
            let mut select: Vec<String> = if columns.is_empty() {
                vec!["b.*".to_string()]
            } else {
                columns.iter().map(|c| format!("b.{}", ident(c))).collect()
            };
            let mut from = format!("{} AS b", ident(table));
            if let Some(lookup) = lookup {
                select.push(format!(
                    "l.{} AS {}",
                    ident(&lookup.select),
                    ident(&lookup.alias)
                ));
                from.push_str(&format!(
                    " LEFT JOIN {} AS l ON l.{} = b.{}",
                    ident(&lookup.table),
                    ident(&lookup.referenced_column),
                    ident(&lookup.column)
                ));
            }
            SqlStatement::new(format!(
                "SELECT to_jsonb(s) FROM (\
                 SELECT {} FROM {from} ORDER BY b.{} DESC NULLS LAST LIMIT {limit}) AS s",
                select.join(", "),
                ident(order_by)
            ))
        }
    };

    Ok(statement)
}

fn where_clause(filter: &[Filter]) -> (String, Vec<String>) {
    if filter.is_empty() {
        return (String::new(), Vec::new());
    }
    let conditions = filter
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}::text = ${}", ident(&f.column), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let binds = filter.iter().map(|f| f.value.clone()).collect();
    (format!(" WHERE {conditions}"), binds)
}
