/// Errors raised while building or validating rules.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Errors raised at the data source boundary.
///
/// The evaluator converts every variant into a finding; none of them reach
/// the aggregator or the runner as errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// The relational backend could not be reached.
    #[error("ConnectionError: {0}")]
    Connection(String),

    /// The query was malformed, unsupported, or referenced a missing object.
    #[error("QueryError: {0}")]
    Query(String),

    /// The HTTP endpoint could not be reached or timed out.
    #[error("EndpointUnavailable: {0}")]
    EndpointUnavailable(String),

    /// The HTTP endpoint answered with a non-2xx status or a malformed body.
    #[error("ResponseError: {0}")]
    Response(String),
}

impl SourceError {
    /// Whether the error means the whole relational backend is down.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EndpointUnavailable(_))
    }
}
