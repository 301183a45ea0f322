//! HTTP adapter for the CR/JR audit.
//!
//! [`HttpDataSource`] issues read-only `GET` requests against the monitoring
//! API with a bounded timeout and maps transport failures onto the audit
//! error taxonomy.

pub mod config;
pub mod source;

pub use config::HttpConfig;
pub use source::{HttpDataSource, HttpSetupError};
