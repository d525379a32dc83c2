//! metagen - ARMv7 NEON kernel generator for low-precision GEMM.
//!
//! Every kernel is a C++ function wrapping one inline assembly block, hand
//! scheduled for a fixed shape: packing rows with checksums (zip), tiled
//! uint8 multiply-accumulate (mul), int32 to uint8 row requantization (qnt)
//! and 1-D elementwise transforms.
//!
//! # Primary Usage
//!
//! ```
//! use metagen::{GenOptions, GenerationSession, KernelShape, ZipShape};
//!
//! let session = GenerationSession::new(GenOptions { checked: true });
//! let shape = KernelShape::Zip(ZipShape { rows: 2, leftover: 3, aligned: false });
//! let kernel = session.generate(&shape).unwrap();
//! assert_eq!(kernel.name, "zip_2x8_3");
//! println!("{kernel}");
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Errors, register pool, generation session
//! - [`neon`] - Structured instructions and the emitter
//! - [`kernels`] - Kernel generators per family
//! - [`sim`] - Interpreter used to execute generated kernels in tests
//! - [`enumerate`] - Every supported shape, in a fixed order

pub mod core;
pub mod enumerate;
pub mod kernels;
pub mod neon;
pub mod sim;

pub use self::core::{
    // Errors
    GenError, GenResult,
    // Register allocation
    AccessMode, OperandRef, RegBitSet, Register, RegisterKind, RegisterPool,
    // Session management
    GenerationSession, SessionStats,
};
pub use kernels::{
    GenOptions, Kernel, KernelShape, MulShape, NumericType, QntShape, TransformKind,
    TransformShape, ZipShape,
};
pub use sim::{Machine, SimError};
