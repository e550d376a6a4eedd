use thiserror::Error;

/// Errors raised while decoding core types from their string forms.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown finding kind: {0}")]
    UnknownFindingKind(String),

    #[error("Unknown change type: {0}")]
    UnknownChangeType(String),
}
