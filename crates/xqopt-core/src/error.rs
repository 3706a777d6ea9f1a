use thiserror::Error;

/// Canonical result for the optimizer crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Every variant aborts the current compilation. A rule whose pattern does not
/// match is *not* an error; rules report that as `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Malformed plan: {0}")]
    Plan(String),

    #[error("Static type inference failed: {0}")]
    TypeInference(String),

    #[error("Rewrite did not reach a fixed point after {iterations} iterations")]
    NonTermination { iterations: usize },

    #[error("Malformed constant: {0}")]
    MalformedConstant(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unknown sequence type code: {0}")]
    UnknownType(i64),

    #[error("Plan DSL error: {0}")]
    Dsl(String),

    #[error("Plan serialization failed: {0}")]
    Serialization(String),

    #[error("Optimization context is frozen")]
    Frozen,

    #[error("Plan invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    /// True when the iteration bound was hit.
    pub fn is_non_termination(&self) -> bool {
        matches!(self, Error::NonTermination { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
