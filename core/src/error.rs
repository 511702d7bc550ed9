use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Errors that can occur while building, validating, or deserializing automata.
#[derive(Debug)]
pub enum AutomatonError {
    /// A builder operation would exceed [crate::automaton::MAX_STATES] states.
    TooLarge(usize /* requested */, usize /* max */),

    /// Finalization was attempted with a start state index outside the state array.
    InvalidStart(u32 /* start */, usize /* state count */),

    /// A consistency check discovered a transition or state-range violation.
    IndicesOutOfRange(String /* description */),

    /// A weight operation was applied outside its domain (e.g. inverse of zero).
    DomainError(String /* operation */),

    /// Serialized automaton data was structurally invalid.
    CorruptData(String /* description */),

    /// Serialized automaton data carried an unknown format version hash.
    UnsupportedFormatVersion(f64 /* actual */, f64 /* expected */),
}

impl Display for AutomatonError {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::TooLarge(requested, max) => {
                write!(f, "Too many states: {requested} exceeds the maximum of {max}")
            }
            Self::InvalidStart(start, state_count) => {
                write!(f, "Invalid start state: index {start} is not below the state count {state_count}")
            }
            Self::IndicesOutOfRange(description) => write!(f, "Indices out of range: {description}"),
            Self::DomainError(operation) => write!(f, "Domain error: {operation}"),
            Self::CorruptData(description) => write!(f, "Corrupt automaton data: {description}"),
            Self::UnsupportedFormatVersion(actual, expected) => {
                write!(f, "Unsupported format version hash: got {actual}, expected {expected}")
            }
        }
    }
}

impl Error for AutomatonError {}

/// A type alias for any kind of error. The error is boxed and must be `Send`, `Sync`, and `'static`.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A type alias for a `Result` with a [BoxError].
pub type BoxResult<T> = Result<T, BoxError>;
