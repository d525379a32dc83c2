// This module enumerates every supported kernel shape in a fixed order and drives a generation
// session over them. Families come out zip, mul, qnt, transform; within a family the order is
// rows, then columns or leftover, then variant, so two runs always produce byte-identical output.
// Failing shapes are collected next to the generated text instead of aborting the run.

//! Shape enumeration.

use std::fmt;

use log::info;

use crate::core::error::GenError;
use crate::core::session::GenerationSession;
use crate::kernels::shape::{CHUNK, TRANSFORM_BLOCK};
use crate::kernels::{
    KernelShape, MulShape, NumericType, QntShape, TransformKind, TransformShape, ZipShape,
};

/// Kernel families, in enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Zip,
    Mul,
    Qnt,
    Transform,
}

impl Family {
    pub const ALL: [Family; 4] = [Family::Zip, Family::Mul, Family::Qnt, Family::Transform];

    pub fn shapes(self) -> Vec<KernelShape> {
        match self {
            Family::Zip => zip_shapes(),
            Family::Mul => mul_shapes(),
            Family::Qnt => qnt_shapes(),
            Family::Transform => transform_shapes(),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Zip => "zip",
            Family::Mul => "mul",
            Family::Qnt => "qnt",
            Family::Transform => "transform",
        };
        f.write_str(name)
    }
}

pub fn zip_shapes() -> Vec<KernelShape> {
    let mut shapes = Vec::new();
    for rows in 1..=3 {
        for leftover in 0..CHUNK {
            for aligned in [false, true] {
                shapes.push(KernelShape::Zip(ZipShape {
                    rows,
                    leftover,
                    aligned,
                }));
            }
        }
    }
    shapes
}

/// Result type and offset variants generated for every multiply tile.
const MUL_VARIANTS: [(NumericType, bool, bool); 3] = [
    (NumericType::Int32, false, true),
    (NumericType::Int32, true, true),
    (NumericType::Float, true, true),
];

pub fn mul_shapes() -> Vec<KernelShape> {
    let mut tiles: Vec<(usize, usize)> = Vec::new();
    for rows in 1..=3 {
        for cols in 1..=3 {
            tiles.push((rows, cols));
        }
    }
    tiles.push((1, 4));

    tiles
        .into_iter()
        .flat_map(|(rows, cols)| {
            MUL_VARIANTS
                .iter()
                .map(move |&(result, lhs_add, rhs_add)| {
                    KernelShape::Mul(MulShape {
                        rows,
                        cols,
                        result,
                        lhs_add,
                        rhs_add,
                    })
                })
        })
        .collect()
}

pub fn qnt_shapes() -> Vec<KernelShape> {
    let mut shapes = Vec::new();
    for rows in 1..=3 {
        for leftover in 0..CHUNK {
            for aligned in [false, true] {
                shapes.push(KernelShape::Qnt(QntShape {
                    rows,
                    leftover,
                    aligned,
                }));
            }
        }
    }
    shapes
}

pub fn transform_shapes() -> Vec<KernelShape> {
    TransformKind::ALL
        .iter()
        .flat_map(|&kind| {
            (0..TRANSFORM_BLOCK)
                .map(move |leftover| KernelShape::Transform(TransformShape { kind, leftover }))
        })
        .collect()
}

/// Every supported shape of every family.
pub fn all_shapes() -> Vec<KernelShape> {
    Family::ALL.iter().flat_map(|family| family.shapes()).collect()
}

/// Output of a generation run.
#[derive(Debug, Default)]
pub struct GeneratedSet {
    /// Concatenated routine text, one blank line between routines.
    pub text: String,
    pub names: Vec<String>,
    pub failures: Vec<(KernelShape, GenError)>,
}

/// Generate every shape through `session`.
pub fn generate_all(session: &GenerationSession, shapes: &[KernelShape]) -> GeneratedSet {
    let mut set = GeneratedSet::default();
    for shape in shapes {
        match session.generate(shape) {
            Ok(kernel) => {
                if !set.text.is_empty() {
                    set.text.push('\n');
                }
                set.text.push_str(&kernel.to_string());
                set.names.push(kernel.name);
            }
            Err(err) => set.failures.push((*shape, err)),
        }
    }
    info!(
        "generated {} of {} kernels",
        set.names.len(),
        shapes.len()
    );
    set
}
