//! Error types for the fiber runtime

use core::fmt;

/// Result type for fiber operations and fiber outcomes
pub type FiberResult<T> = Result<T, FiberError>;

/// Errors that can occur in fiber operations
///
/// The same type carries a fiber's propagated failure to its joiner, so it
/// is `Send` and cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiberError {
    /// The current fiber was cancelled, or the cord is shutting down and
    /// refuses new client fibers
    Cancelled,

    /// `join` on a fiber that is not joinable
    NotJoinable,

    /// Another fiber is already joining the target
    JoinInProgress,

    /// No live fiber has this id (never existed, or already collected)
    NotFound,

    /// Operation does not fit the fiber's current state
    InvalidState(&'static str),

    /// Called outside of a cord
    NoCord,

    /// A deadline passed before the awaited condition held
    Timeout,

    /// Stack or region allocation failed
    Memory(MemoryError),

    /// Cord thread could not be spawned
    Spawn(String),

    /// Entry function panicked; payload message if it was a string
    Panicked(String),

    /// Application-defined failure
    Custom(String),
}

impl FiberError {
    /// Application error with a message.
    pub fn custom(msg: impl Into<String>) -> Self {
        FiberError::Custom(msg.into())
    }

    /// Whether this is the error `testcancel` raises.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FiberError::Cancelled)
    }
}

impl fmt::Display for FiberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberError::Cancelled => write!(f, "fiber is cancelled"),
            FiberError::NotJoinable => write!(f, "fiber is not joinable"),
            FiberError::JoinInProgress => write!(f, "fiber is already being joined"),
            FiberError::NotFound => write!(f, "fiber not found"),
            FiberError::InvalidState(what) => write!(f, "invalid fiber state: {}", what),
            FiberError::NoCord => write!(f, "not running inside a cord"),
            FiberError::Timeout => write!(f, "timed out"),
            FiberError::Memory(e) => write!(f, "memory error: {}", e),
            FiberError::Spawn(e) => write!(f, "failed to spawn cord thread: {}", e),
            FiberError::Panicked(msg) => write!(f, "fiber panicked: {}", msg),
            FiberError::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for FiberError {}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    AllocationFailed,

    /// mprotect of the guard page failed
    ProtectionFailed,

    /// Requested size overflows the address space
    SizeOverflow,

    /// Scratch region could not grow
    RegionExhausted,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page protection failed"),
            MemoryError::SizeOverflow => write!(f, "requested size is too large"),
            MemoryError::RegionExhausted => write!(f, "gc region allocation failed"),
        }
    }
}

impl From<MemoryError> for FiberError {
    fn from(e: MemoryError) -> Self {
        FiberError::Memory(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(FiberError::Cancelled.to_string(), "fiber is cancelled");
        assert_eq!(FiberError::custom("some error").to_string(), "some error");

        let e = FiberError::Memory(MemoryError::AllocationFailed);
        assert_eq!(e.to_string(), "memory error: stack allocation failed");
    }

    #[test]
    fn test_error_conversion() {
        let err: FiberError = MemoryError::RegionExhausted.into();
        assert!(matches!(err, FiberError::Memory(MemoryError::RegionExhausted)));
        assert!(!err.is_cancelled());
        assert!(FiberError::Cancelled.is_cancelled());
    }
}
