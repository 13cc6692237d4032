use thiserror::Error;

/// Failures of the correlation engine itself.
///
/// An unmatched response is not an error: it is counted and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Every `u64` call id has been issued; ids are never reused.
    #[error("call id space exhausted")]
    IdSpaceExhausted,
}
