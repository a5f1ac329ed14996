use thiserror::Error;

/// Raised when a wire name read from a CSV file, the database, or the command
/// line does not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown term '{0}' (expected all, autumn or spring)")]
    UnknownTerm(String),

    #[error("unknown assessment form '{0}'")]
    UnknownForm(String),

    #[error("unknown assessment type '{0}'")]
    UnknownType(String),
}

/// Record-level checks applied before records reach the engines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("grade {0} is outside 1..=6")]
    GradeOutOfRange(u8),
}
