//! Built-in rule set for the CR/JR monitoring table and its reporting API.

use serde_json::json;

use crate::error::CoreError;
use crate::rules::{Rule, RuleKind, RuleSet, Severity, Target};

/// Change-request / job-request monitoring table.
pub const CRJR_TABLE: &str = "tbl_mon_crjr";

/// Product table referenced by `tbl_mon_crjr.id_produk`.
pub const PRODUCT_TABLE: &str = "tbl_produk";

/// Aggregate statistics endpoint.
pub const STATS_ENDPOINT: &str = "/api/monitoring/cr-jr/stats";

/// Paginated listing endpoint.
pub const LIST_ENDPOINT: &str = "/api/monitoring/cr-jr";

/// Columns the monitoring application reads.
pub const CRJR_COLUMNS: &[&str] = &[
    "id",
    "id_produk",
    "tipe_pekerjaan",
    "deskripsi",
    "status",
    "priority",
    "progress",
    "pic",
    "version",
    "tanggal_mulai",
    "tanggal_akhir",
    "created_at",
];

fn table(name: &str) -> Target {
    Target::Table(name.to_string())
}

fn column(name: &str) -> Target {
    Target::Column {
        table: CRJR_TABLE.to_string(),
        column: name.to_string(),
    }
}

/// Rules in execution order.
pub fn crjr_rules() -> Vec<Rule> {
    vec![
        Rule::new("crjr_table_exists", RuleKind::TableExists, table(CRJR_TABLE)),
        Rule::new("crjr_columns", RuleKind::ColumnSet, table(CRJR_TABLE))
            .with_params(json!({ "required": CRJR_COLUMNS })),
        Rule::new("crjr_row_count", RuleKind::RowCount, table(CRJR_TABLE)),
        Rule::new(
            "crjr_job_type_distribution",
            RuleKind::Distribution,
            column("tipe_pekerjaan"),
        )
        .with_params(json!({ "expected": ["CR", "JR"] })),
        Rule::new(
            "crjr_status_distribution",
            RuleKind::Distribution,
            column("status"),
        ),
        Rule::new(
            "crjr_priority_distribution",
            RuleKind::Distribution,
            column("priority"),
        ),
        Rule::new("crjr_required_fields", RuleKind::NullRate, table(CRJR_TABLE)).with_params(
            json!({
                "columns": ["id_produk", "tipe_pekerjaan", "status", "priority"],
                "max_null_pct": 0.0
            }),
        ),
        // Blank optional fields are reported but never fail the run.
        Rule::new("crjr_optional_fields", RuleKind::NullRate, table(CRJR_TABLE)).with_params(
            json!({
                "columns": ["deskripsi", "pic", "version", "tanggal_mulai", "tanggal_akhir"],
                "max_null_pct": 1.0,
                "warn_null_pct": 0.0
            }),
        ),
        Rule::new("crjr_recent_sample", RuleKind::Sample, table(CRJR_TABLE)).with_params(json!({
            "columns": [
                "id", "tipe_pekerjaan", "status", "priority", "progress", "pic",
                "tanggal_mulai", "tanggal_akhir", "deskripsi", "created_at"
            ],
            "order_by": "created_at",
            "limit": 5,
            "lookup": {
                "column": "id_produk",
                "table": PRODUCT_TABLE,
                "referenced_column": "id",
                "select": "produk",
                "alias": "nama_produk"
            }
        })),
        Rule::new("crjr_dashboard_stats", RuleKind::Aggregate, table(CRJR_TABLE)).with_params(
            json!({
                "fields": {
                    "total": { "aggregate": "count" },
                    "cr": { "aggregate": "count", "filter": { "tipe_pekerjaan": "CR" } },
                    "jr": { "aggregate": "count", "filter": { "tipe_pekerjaan": "JR" } },
                    "in_progress": { "aggregate": "count", "filter": { "status": "In Progress" } },
                    "completed": { "aggregate": "count", "filter": { "status": "Completed" } },
                    "planned": { "aggregate": "count", "filter": { "status": "Planned" } },
                    "high_priority": { "aggregate": "count", "filter": { "priority": "High" } },
                    "avg_progress": { "aggregate": "avg", "column": "progress" }
                },
                "bounds": {
                    "avg_progress": { "min": 0, "max": 100 }
                }
            }),
        ),
        Rule::new(
            "crjr_product_coverage",
            RuleKind::ForeignKeyCoverage,
            column("id_produk"),
        )
        .with_params(json!({
            "references": PRODUCT_TABLE,
            "referenced_column": "id",
            "min_coverage_pct": 1.0
        }))
        .with_severity(Severity::Warning),
        Rule::new(
            "crjr_stats_endpoint",
            RuleKind::EndpointShape,
            Target::Endpoint(STATS_ENDPOINT.to_string()),
        )
        .with_params(json!({
            "keys": {
                "data.total": "number",
                "data.cr": "number",
                "data.jr": "number",
                "data.inProgress": "number",
                "data.completed": "number"
            },
            "cross_check": {
                "table": CRJR_TABLE,
                "tolerance": 0,
                "fields": {
                    "data.total": { "aggregate": "count" },
                    "data.cr": { "aggregate": "count", "filter": { "tipe_pekerjaan": "CR" } },
                    "data.jr": { "aggregate": "count", "filter": { "tipe_pekerjaan": "JR" } },
                    "data.inProgress": { "aggregate": "count", "filter": { "status": "In Progress" } },
                    "data.completed": { "aggregate": "count", "filter": { "status": "Completed" } }
                }
            }
        })),
        Rule::new(
            "crjr_list_endpoint",
            RuleKind::EndpointShape,
            Target::Endpoint(LIST_ENDPOINT.to_string()),
        )
        .with_params(json!({
            "query": { "page": 1, "limit": 5 },
            "keys": {
                "data": "array",
                "pagination.total": "number",
                "pagination.totalPages": "number"
            },
            "max_items": { "data": 5 },
            "cross_check": {
                "table": CRJR_TABLE,
                "tolerance": 0,
                "fields": {
                    "pagination.total": { "aggregate": "count" }
                }
            }
        })),
    ]
}

/// The built-in rules, validated.
pub fn crjr_rule_set() -> Result<RuleSet, CoreError> {
    RuleSet::new(crjr_rules())
}
