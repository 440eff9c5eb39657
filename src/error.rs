use std::error::Error;
use std::fmt::{Display, Formatter};

/// Everything that can go wrong inside the document engine.
///
/// Mutator failures, schema and size rejections all discard the speculative
/// clone and leave the authoritative root untouched; the error is re-raised
/// to the caller of `update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocError {
    /// A write was attempted after the document was removed.
    DocumentRemoved,
    /// Bad path, unknown element, wrong element kind, malformed input.
    InvalidArgument(String),
    /// The speculative state violated one or more schema rules. Carries one
    /// message per failed rule.
    SchemaValidationFailed(Vec<String>),
    /// live + gc size after the mutation would exceed the configured limit.
    SizeExceedsLimit { limit: i64, size: i64 },
    /// Undo/redo was refused: empty stack, or called from inside a mutator.
    Refused(String),
    /// Authentication failure surfaced from the transport.
    AuthError(String),
}

impl Display for DocError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DocError::DocumentRemoved => write!(f, "document was removed"),
            DocError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            DocError::SchemaValidationFailed(msgs) => {
                write!(f, "schema validation failed: {}", msgs.join("; "))
            }
            DocError::SizeExceedsLimit { limit, size } => {
                write!(f, "document size {size} exceeds limit {limit}")
            }
            DocError::Refused(msg) => write!(f, "refused: {msg}"),
            DocError::AuthError(msg) => write!(f, "auth error: {msg}"),
        }
    }
}

impl Error for DocError {}

impl DocError {
    pub(crate) fn unknown_element(what: &str) -> DocError {
        DocError::InvalidArgument(format!("unknown element: {what}"))
    }
}
