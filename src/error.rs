//! Error types for keyhold.
//!
//! Every error variant is a distinct failure mode of the store. Error
//! messages are intentionally minimal — they signal *what* failed without
//! revealing *why* in ways that could leak cryptographic state.
//!
//! All checks run before any mutation or primitive invocation; a returned
//! error means the store and session state are exactly as they were before
//! the call.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The single error type for all keyhold operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A key, digest or session reference is stale or unknown.
    InvalidReference,

    /// A malformed identifier, an invalid size/type combination, a wrong
    /// buffer or parameter length, or an operation the object's current
    /// configuration does not permit.
    InvalidArgument,

    /// The object exists but the requested value or attribute is absent.
    NotFound,

    /// The supplied output buffer is too small. The buffer is untouched.
    Overflow,

    /// An authentication check failed: missing/invalid authenticated command,
    /// stale or consumed challenge, bad signature, MAC mismatch, or an
    /// authenticated-decryption failure.
    Unauthorized,

    /// State-machine misuse: finalizing with nothing processed, processing
    /// after finalization, or using a cipher session in the wrong direction.
    SequenceViolation,

    /// Input size does not conform, e.g. ciphertext that is not a multiple of
    /// the block size, or a chunk larger than the packet limit.
    RangeViolation,

    /// The underlying backend does not implement the requested capability.
    Unsupported,

    /// A backend or storage fault.
    Internal,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidReference => write!(f, "invalid reference"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotFound => write!(f, "not found"),
            Self::Overflow => write!(f, "output buffer too small"),
            Self::Unauthorized => write!(f, "authentication failed"),
            Self::SequenceViolation => write!(f, "operation out of sequence"),
            Self::RangeViolation => write!(f, "input size out of range"),
            Self::Unsupported => write!(f, "operation unsupported"),
            Self::Internal => write!(f, "internal fault"),
        }
    }
}

impl std::error::Error for Error {}
