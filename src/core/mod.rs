// This module holds the infrastructure shared by every kernel family: the error taxonomy and
// result alias (error), the NEON register pool with its occupancy bitsets and operand bindings
// (register_pool), and the generation session that drives generators and accumulates statistics
// across kernels (session).

//! Core generator infrastructure.
//!
//! # Key Components
//!
//! ## Register Pool (`register_pool`)
//! - First-fit allocation of general, narrow and wide registers
//! - A wide register reserves both of its narrow halves
//! - Tracks every register ever touched for the clobber list
//! - Parameter bindings with input / read-write access modes
//!
//! ## Errors (`error`)
//! - `RegisterExhausted`, `ProtocolError`, `UnsupportedConfiguration`
//!
//! ## Session (`session`)
//! - Generates kernels with shared options
//! - Per-mnemonic instruction totals and the largest kernel

pub mod error;
pub mod register_pool;
pub mod session;

pub use error::{GenError, GenResult};

pub use register_pool::{
    AccessMode, OperandBinding, OperandRef, RegBitSet, Register, RegisterKind, RegisterPool,
};

pub use session::{GenerationSession, SessionStats};
