//! CR/JR data audit core.
//!
//! Pure domain logic for auditing the change-request / job-request
//! monitoring data. Nothing in this crate opens a connection; backends are
//! reached through the [`DataSource`] trait implemented by the adapter
//! crates.
//!
//! - [`Rule`] / [`RuleSet`]: declarative checks and their validation.
//! - [`Evaluator`]: turns one rule into exactly one [`Finding`].
//! - [`Aggregator`]: runs a rule set in order and builds a [`Report`].
//! - [`catalog`]: the built-in rule set for `tbl_mon_crjr`.

pub mod aggregator;
pub mod catalog;
pub mod error;
pub mod evaluator;
pub mod finding;
pub mod report;
pub mod rules;
pub mod source;
pub mod threshold;
pub mod types;

pub use aggregator::Aggregator;
pub use error::{CoreError, SourceError};
pub use evaluator::{EvalContext, Evaluator, RetryPolicy, Sources};
pub use finding::{Finding, FindingStatus, SkipReason};
pub use report::{Report, ReportSummary};
pub use rules::{Rule, RuleKind, RuleSet, Severity, Target};
pub use source::{DataSource, QuerySpec, SourceKind};
