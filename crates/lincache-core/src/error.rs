//! Error types for LinCache.
//!
//! This module provides a unified error type for all cache operations.
//! Error codes follow the pattern `LNC-XXX` for easy debugging.

use thiserror::Error;

/// Result type alias for LinCache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in LinCache operations.
///
/// The cache is best-effort: failures during `reuse`/`put` are downgraded to
/// cache-absent behavior by the engine. Only rehydration IO failures reach
/// callers, because they depend on a value that cannot be produced.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (LNC-001).
    #[error("[LNC-001] Configuration error: {0}")]
    Config(String),

    /// Lineage DAG invariant violated (LNC-002).
    ///
    /// Indicates a malformed lineage item, e.g. an inner node with an empty
    /// opcode. This is a programmer error in the tracing front-end.
    #[error("[LNC-002] Lineage invariant violated: {0}")]
    LineageInvariant(String),

    /// Cost model invoked on an instruction it cannot score (LNC-003).
    #[error("[LNC-003] Unsupported instruction for cost estimation: {0}")]
    Unsupported(String),

    /// IO error during spill or rehydration (LNC-004).
    #[error("[LNC-004] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Attempt to spill a valueless or scalar entry (LNC-005).
    #[error("[LNC-005] Invalid spill: {0}")]
    SpillInvalid(String),

    /// Internal error (LNC-006).
    ///
    /// Indicates an unexpected engine state. Please report if encountered.
    #[error("[LNC-006] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "LNC-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "LNC-001",
            Self::LineageInvariant(_) => "LNC-002",
            Self::Unsupported(_) => "LNC-003",
            Self::Io(_) => "LNC-004",
            Self::SpillInvalid(_) => "LNC-005",
            Self::Internal(_) => "LNC-006",
        }
    }

    /// Returns true if this error is recoverable.
    ///
    /// Lineage invariant violations and spill misuse are programmer errors;
    /// everything else the engine can degrade around.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::LineageInvariant(_) | Self::SpillInvalid(_) | Self::Internal(_)
        )
    }
}
