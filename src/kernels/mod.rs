// This module contains the kernel generators. Every family takes a validated shape descriptor and
// generation options and returns a finished Kernel: the rendered host function wrapping one inline
// asm block, together with its operand bindings, clobber list and per-opcode counters. The shared
// pieces are the generation context with its scope guards (context), the shape descriptors and
// naming (shape) and the per-row lane bookkeeping (lanes). The families are zip (pack plus row
// checksums), mul (tiled multiply-accumulate), qnt (row requantization) and transform (elementwise
// 1-D kernels, with the pipelined requantize driver in its own module).

//! Kernel generators.

pub mod context;
pub mod lanes;
pub mod mul;
pub mod qnt;
pub mod requantize;
pub mod shape;
pub mod transform;
pub mod zip;

pub use context::{GenOptions, Kernel, KernelContext};
pub use shape::{
    KernelShape, MulShape, NumericType, QntShape, TransformKind, TransformShape, ZipShape,
};

use crate::core::error::GenResult;

/// Generate the kernel for any shape.
pub fn generate(shape: &KernelShape, options: &GenOptions) -> GenResult<Kernel> {
    match shape {
        KernelShape::Zip(shape) => zip::generate(shape, options),
        KernelShape::Mul(shape) => mul::generate(shape, options),
        KernelShape::Qnt(shape) => qnt::generate(shape, options),
        KernelShape::Transform(shape) => transform::generate(shape, options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GenError;

    #[test]
    fn test_dispatch_validates_first() {
        let shape = KernelShape::Mul(MulShape {
            rows: 3,
            cols: 4,
            result: NumericType::Int32,
            lhs_add: false,
            rhs_add: true,
        });
        assert!(matches!(
            generate(&shape, &GenOptions::default()),
            Err(GenError::UnsupportedConfiguration { .. })
        ));

        let shape = KernelShape::Zip(ZipShape {
            rows: 2,
            leftover: 1,
            aligned: false,
        });
        let kernel = generate(&shape, &GenOptions::default()).unwrap();
        assert_eq!(kernel.name, shape.name());
    }
}
