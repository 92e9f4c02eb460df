use thiserror::Error;

/// Errors reported at query creation / configuration time.
///
/// Counter-slot exhaustion is deliberately absent: an over-subscribed
/// performance query logs, measures nothing and later reports zero, because
/// failing the command stream is worse than an inaccurate counter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The query kind is unknown to this device or not supported by its
    /// capabilities, or the operation is not legal for the kind (e.g.
    /// `begin` on a timestamp).
    #[error("query kind not supported by this device or operation")]
    InvalidQueryType,

    /// Only occlusion and stream-output-overflow queries may drive the
    /// render condition.
    #[error("query kind cannot be used as a render-condition predicate")]
    InvalidPredicateQuery,

    /// The result-staging pool is exhausted and refuses further growth.
    #[error("out of result-staging memory")]
    OutOfStagingMemory,
}
