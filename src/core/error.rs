// This module defines the error taxonomy of the kernel generator using the thiserror crate.
// GenError has exactly three variants: RegisterExhausted (an allocation request the register
// file cannot satisfy), ProtocolError (a generator-logic defect such as freeing a register that
// is not allocated or closing a scope that was never opened) and UnsupportedConfiguration (a
// shape outside the supported ranges, rejected before any emission). Every failure aborts the
// generation of the one affected kernel; generation is deterministic so nothing is retried.
// GenResult<T> is the alias used by every fallible generation operation.

//! Error types for kernel generation.

use thiserror::Error;

use super::register_pool::RegisterKind;

/// Failure while generating a single kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenError {
    #[error("No free {kind} register at or above index {min_index}")]
    RegisterExhausted { kind: RegisterKind, min_index: u8 },

    #[error("Generator protocol violation: {reason}")]
    ProtocolError { reason: String },

    #[error("Unsupported configuration: {reason}")]
    UnsupportedConfiguration { reason: String },
}

impl GenError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        GenError::ProtocolError {
            reason: reason.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        GenError::UnsupportedConfiguration {
            reason: reason.into(),
        }
    }
}

/// Result type alias for generation operations.
pub type GenResult<T> = Result<T, GenError>;
