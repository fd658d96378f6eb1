/// Crate-wide error type
///
/// Every fallible operation in the pager returns `PagerResult<T>`. Registry
/// queries against unknown or stale file handles do not error; they return
/// neutral fallbacks instead, so most of these variants only surface from
/// construction paths and from the loader threads.

use crate::page::PageIndex;

/// Result alias used throughout the crate
pub type PagerResult<T> = Result<T, PagerError>;

#[derive(Debug, thiserror::Error)]
pub enum PagerError {
    #[error("Page source '{name}' unavailable: {reason}")]
    SourceUnavailable { name: String, reason: String },

    #[error("Failed to read page {page}: {reason}")]
    ReadFailure { page: PageIndex, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid page geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("Unsupported page format: {channels} channels of {bytes_per_channel} bytes")]
    UnsupportedFormat { channels: u32, bytes_per_channel: u32 },

    #[error("Failed to allocate {slots} cache slots: {reason}")]
    AllocationFailed { slots: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{context}: {reason}")]
    Context { context: String, reason: String },
}

impl PagerError {
    /// Whether this error came from cooperative cancellation rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PagerError::Cancelled)
    }
}

/// Helper trait for attaching context to foreign errors
pub trait PagerErrorContext<T> {
    fn pager_context(self, context: &str) -> PagerResult<T>;
}

impl<T, E> PagerErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn pager_context(self, context: &str) -> PagerResult<T> {
        self.map_err(|e| PagerError::Context {
            context: context.to_string(),
            reason: e.to_string(),
        })
    }
}

impl<T> PagerErrorContext<T> for Option<T> {
    fn pager_context(self, context: &str) -> PagerResult<T> {
        self.ok_or_else(|| PagerError::Context {
            context: context.to_string(),
            reason: "value missing".to_string(),
        })
    }
}

/// Create a source-unavailable error
pub fn source_unavailable(name: &str, reason: impl std::fmt::Display) -> PagerError {
    PagerError::SourceUnavailable {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Create a read-failure error
pub fn read_failure(page: PageIndex, reason: impl std::fmt::Display) -> PagerError {
    PagerError::ReadFailure {
        page,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wraps_display() {
        let result: Result<(), String> = Err("bad header".to_string());
        let err = result.pager_context("parsing page file").unwrap_err();
        assert_eq!(err.to_string(), "parsing page file: bad header");
        assert!(matches!(err, PagerError::Context { .. }));
    }

    #[test]
    fn test_option_context() {
        let value: Option<u32> = None;
        assert!(matches!(
            value.pager_context("missing table"),
            Err(PagerError::Context { ref context, .. }) if context == "missing table"
        ));
    }

    #[test]
    fn test_cancelled_flag() {
        assert!(PagerError::Cancelled.is_cancelled());
        assert!(!read_failure(PageIndex::root(0), "eof").is_cancelled());
    }
}
