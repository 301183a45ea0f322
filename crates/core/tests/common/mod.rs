#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crjr_audit_core::rules::value_to_text;
use crjr_audit_core::source::{AggregateFn, DataSource, QuerySpec, SourceKind};
use crjr_audit_core::types::Record;
use crjr_audit_core::SourceError;

/// Build a record from a JSON object literal.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("record must be a JSON object, got {other}"),
    }
}

struct Table {
    columns: Vec<String>,
    rows: Vec<Record>,
}

/// In-memory relational source that interprets [`QuerySpec`] directly.
#[derive(Default)]
pub struct MemoryDb {
    tables: BTreeMap<String, Table>,
    outage: Option<String>,
    queries: AtomicUsize,
    touched: Mutex<Vec<String>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table. Columns are taken from the first row when not given.
    pub fn with_table(mut self, name: &str, columns: &[&str], rows: Vec<Record>) -> Self {
        let columns = if columns.is_empty() {
            rows.first()
                .map(|r| r.keys().cloned().collect())
                .unwrap_or_default()
        } else {
            columns.iter().map(|c| c.to_string()).collect()
        };
        self.tables.insert(name.to_string(), Table { columns, rows });
        self
    }

    /// Every query fails with a connection error.
    pub fn unreachable(mut self, message: &str) -> Self {
        self.outage = Some(message.to_string());
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Tables read by any query, in order, including existence checks.
    pub fn touched_tables(&self) -> Vec<String> {
        self.touched.lock().unwrap().clone()
    }

    fn enter(&self, query: &QuerySpec) -> Result<(), SourceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.touched.lock().unwrap().push(query.table().to_string());
        if let Some(message) = &self.outage {
            return Err(SourceError::Connection(message.clone()));
        }
        query
            .validate()
            .map_err(|e| SourceError::Query(e.to_string()))
    }

    fn table(&self, name: &str) -> Result<&Table, SourceError> {
        self.tables
            .get(name)
            .ok_or_else(|| SourceError::Query(format!("relation \"{name}\" does not exist")))
    }
}

fn is_null_or_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn sort_key(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v) => value_to_text(v),
    }
}

#[async_trait]
impl DataSource for MemoryDb {
    fn kind(&self) -> SourceKind {
        SourceKind::Relational
    }

    async fn fetch_scalar(&self, query: &QuerySpec) -> Result<Value, SourceError> {
        self.enter(query)?;
        match query {
            QuerySpec::TableExists { table, .. } => Ok(json!(self.tables.contains_key(table))),
            QuerySpec::Aggregate {
                table,
                function,
                filter,
            } => {
                let rows: Vec<&Record> = self
                    .table(table)?
                    .rows
                    .iter()
                    .filter(|row| {
                        filter.iter().all(|f| match row.get(&f.column) {
                            None | Some(Value::Null) => false,
                            Some(v) => value_to_text(v) == f.value,
                        })
                    })
                    .collect();
                match function {
                    AggregateFn::Count => Ok(json!(rows.len())),
                    AggregateFn::Sum(column) | AggregateFn::Avg(column) => {
                        let values: Vec<f64> =
                            rows.iter().filter_map(|r| as_f64(r.get(column))).collect();
                        if values.is_empty() {
                            return Ok(Value::Null);
                        }
                        let sum: f64 = values.iter().sum();
                        Ok(match function {
                            AggregateFn::Sum(_) => json!(sum),
                            _ => json!(sum / values.len() as f64),
                        })
                    }
                }
            }
            other => Err(SourceError::Query(format!(
                "{other:?} does not return a scalar"
            ))),
        }
    }

    async fn fetch_rows(&self, query: &QuerySpec) -> Result<Vec<Record>, SourceError> {
        self.enter(query)?;
        match query {
            QuerySpec::Columns { table, .. } => Ok(self
                .tables
                .get(table)
                .map(|t| {
                    t.columns
                        .iter()
                        .map(|c| {
                            record(json!({
                                "column_name": c,
                                "data_type": "text",
                                "is_nullable": "YES"
                            }))
                        })
                        .collect()
                })
                .unwrap_or_default()),
            QuerySpec::NullCounts { table, columns } => {
                let t = self.table(table)?;
                let mut nulls = serde_json::Map::new();
                for column in columns {
                    if !t.columns.contains(column) {
                        return Err(SourceError::Query(format!(
                            "column \"{column}\" does not exist"
                        )));
                    }
                    let count = t
                        .rows
                        .iter()
                        .filter(|r| is_null_or_empty(r.get(column)))
                        .count();
                    nulls.insert(column.clone(), json!(count));
                }
                Ok(vec![record(json!({ "total": t.rows.len(), "nulls": nulls }))])
            }
            QuerySpec::GroupCounts {
                table,
                column,
                include_nulls,
            } => {
                let t = self.table(table)?;
                let mut groups: Vec<(Value, i64)> = Vec::new();
                for row in &t.rows {
                    let value = row.get(column).cloned().unwrap_or(Value::Null);
                    if value.is_null() && !include_nulls {
                        continue;
                    }
                    match groups.iter_mut().find(|(v, _)| *v == value) {
                        Some((_, count)) => *count += 1,
                        None => groups.push((value, 1)),
                    }
                }
                groups.sort_by(|(va, ca), (vb, cb)| {
                    cb.cmp(ca)
                        .then_with(|| sort_key(Some(va)).cmp(&sort_key(Some(vb))))
                });
                Ok(groups
                    .into_iter()
                    .map(|(value, count)| record(json!({ "value": value, "count": count })))
                    .collect())
            }
            QuerySpec::ForeignKeyCoverage {
                table,
                column,
                referenced_table,
                referenced_column,
            } => {
                let t = self.table(table)?;
                let referenced = self.table(referenced_table)?;
                let matched = t
                    .rows
                    .iter()
                    .filter(|row| match row.get(column) {
                        None | Some(Value::Null) => false,
                        Some(key) => referenced
                            .rows
                            .iter()
                            .any(|p| p.get(referenced_column) == Some(key)),
                    })
                    .count();
                Ok(vec![record(json!({ "total": t.rows.len(), "matched": matched }))])
            }
            QuerySpec::Sample {
                table,
                columns,
                lookup,
                order_by,
                limit,
            } => {
                let t = self.table(table)?;
                let mut rows: Vec<&Record> = t.rows.iter().collect();
                rows.sort_by(|a, b| sort_key(b.get(order_by)).cmp(&sort_key(a.get(order_by))));
                rows.truncate(*limit as usize);
                let referenced = match lookup {
                    Some(l) => Some((l, self.table(&l.table)?)),
                    None => None,
                };
                Ok(rows
                    .into_iter()
                    .map(|row| {
                        let mut out = if columns.is_empty() {
                            row.clone()
                        } else {
                            columns
                                .iter()
                                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                                .collect()
                        };
                        if let Some((l, parent)) = &referenced {
                            let selected = row
                                .get(&l.column)
                                .and_then(|key| {
                                    parent
                                        .rows
                                        .iter()
                                        .find(|p| p.get(&l.referenced_column) == Some(key))
                                })
                                .and_then(|p| p.get(&l.select).cloned())
                                .unwrap_or(Value::Null);
                            out.insert(l.alias.clone(), selected);
                        }
                        out
                    })
                    .collect())
            }
            other => Err(SourceError::Query(format!("{other:?} does not return rows"))),
        }
    }

    async fn fetch_json(
        &self,
        _endpoint: &str,
        _params: &[(String, String)],
    ) -> Result<Value, SourceError> {
        Err(SourceError::Query(
            "relational source does not serve HTTP endpoints".to_string(),
        ))
    }
}

/// Scripted HTTP source. Each endpoint answers from a queue; the last
/// response repeats once the queue is down to one entry.
#[derive(Default)]
pub struct MemoryApi {
    responses: Mutex<BTreeMap<String, VecDeque<Result<Value, SourceError>>>>,
    requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, endpoint: &str, response: Result<Value, SourceError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, endpoint: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .count()
    }
}

#[async_trait]
impl DataSource for MemoryApi {
    fn kind(&self) -> SourceKind {
        SourceKind::Http
    }

    async fn fetch_scalar(&self, _query: &QuerySpec) -> Result<Value, SourceError> {
        Err(SourceError::Query(
            "HTTP source does not support relational queries".to_string(),
        ))
    }

    async fn fetch_rows(&self, _query: &QuerySpec) -> Result<Vec<Record>, SourceError> {
        Err(SourceError::Query(
            "HTTP source does not support relational queries".to_string(),
        ))
    }

    async fn fetch_json(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, SourceError> {
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), params.to_vec()));
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(endpoint).ok_or_else(|| {
            SourceError::Response(format!("GET {endpoint} returned 404 Not Found"))
        })?;
        match queue.len() {
            0 => Err(SourceError::Response(format!("no response scripted for {endpoint}"))),
            1 => queue[0].clone(),
            _ => queue.pop_front().unwrap_or_else(|| {
                Err(SourceError::Response("empty response queue".to_string()))
            }),
        }
    }
}

/// `count` rows of `tbl_mon_crjr`. Row `i` is CR when `i < cr`, otherwise JR.
pub fn crjr_rows(count: usize, cr: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            record(json!({
                "id": i as i64 + 1,
                "id_produk": (i % 3) as i64 + 1,
                "tipe_pekerjaan": if i < cr { "CR" } else { "JR" },
                "deskripsi": format!("Pekerjaan {}", i + 1),
                "status": if i % 2 == 0 { "In Progress" } else { "Completed" },
                "priority": if i % 4 == 0 { "High" } else { "Medium" },
                "progress": (i * 10 % 100) as i64,
                "pic": format!("user{}", i % 5),
                "version": format!("1.{}", i % 3),
                "tanggal_mulai": "2026-01-01",
                "tanggal_akhir": "2026-03-31",
                "created_at": format!("2026-02-{:02}T08:00:00Z", i % 28 + 1)
            }))
        })
        .collect()
}

/// Products with ids `1..=count`.
pub fn products(count: usize) -> Vec<Record> {
    (1..=count)
        .map(|i| record(json!({ "id": i as i64, "produk": format!("Produk {i}") })))
        .collect()
}
