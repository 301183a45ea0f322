/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// One row returned by a data source, keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;
