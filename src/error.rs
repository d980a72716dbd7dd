//! Error types shared across the capture pipeline.
//!
//! Fatal conditions that end a capture are reported as [`CaptureError`]. The
//! remaining enums cover recoverable failures of the individual stores and of
//! the wire decoder; callers log them and keep going.

use thiserror::Error;

/// Errors that abort processing of the current capture.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// A callstack id was referenced before (or without) being interned.
    #[error("{event} references unknown interned callstack {key}")]
    MissingCallstack { key: u64, event: &'static str },

    /// A string key was referenced before (or without) being interned.
    #[error("{event} references unknown interned string {key}")]
    MissingString { key: u64, event: &'static str },

    /// Processing was already aborted by an earlier fatal error.
    #[error("capture processing was aborted: {0}")]
    Aborted(Box<CaptureError>),
}

impl CaptureError {
    /// The intern key that caused the abort, if any.
    pub fn key(&self) -> Option<u64> {
        match self {
            CaptureError::MissingCallstack { key, .. }
            | CaptureError::MissingString { key, .. } => Some(*key),
            CaptureError::Aborted(inner) => inner.key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternError {
    #[error("interned string key {0} is already defined")]
    DuplicateString(u64),

    #[error("interned callstack key {0} is already defined")]
    DuplicateCallstack(u64),
}

/// Failures of the timer store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Allocating the next block of a depth chain failed.
    #[error("failed to allocate a block of {capacity} timers at depth {depth}")]
    BlockAllocation { depth: u8, capacity: usize },

    /// Every block slot of the depth chain is in use.
    #[error("timer chain at depth {depth} is full")]
    ChainFull { depth: u8 },
}

/// Rejected scope tree inserts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeTreeError {
    /// The new scope partially overlaps an existing one.
    #[error("scope [{start_ns}, {end_ns}] overlaps [{other_start_ns}, {other_end_ns}] without nesting")]
    Overlap {
        start_ns: u64,
        end_ns: u64,
        other_start_ns: u64,
        other_end_ns: u64,
    },

    #[error("scope ends at {end_ns} before it starts at {start_ns}")]
    Inverted { start_ns: u64, end_ns: u64 },
}

/// Errors produced while decoding framed capture events.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o error while reading capture stream")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("failed to decode capture event")]
    Decode(#[from] serde_json::Error),
}
