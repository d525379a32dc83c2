//! Shape descriptors.
//!
//! A shape fully determines one generated kernel: its code path, its name
//! and its parameter list. Shapes are plain values, validated before any
//! emission starts.

use std::fmt;

use crate::core::error::{GenError, GenResult};

/// Bytes per row consumed by one zip/mul/qnt loop iteration.
pub const CHUNK: usize = 8;

/// Elements per block of the transform kernels.
pub const TRANSFORM_BLOCK: usize = 16;

/// Upper bound on the zip depth; keeps the 16-bit lane sums from overflowing.
pub const MAX_ZIP_COUNT: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericType {
    Uint8,
    Int32,
    Float,
}

impl NumericType {
    /// Tag used in kernel names.
    pub fn tag(self) -> &'static str {
        match self {
            NumericType::Uint8 => "uint8",
            NumericType::Int32 => "int32",
            NumericType::Float => "float",
        }
    }

    /// Host element type.
    pub fn host_type(self) -> &'static str {
        match self {
            NumericType::Uint8 => "std::uint8_t",
            NumericType::Int32 => "std::int32_t",
            NumericType::Float => "float",
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            NumericType::Uint8 => 8,
            NumericType::Int32 | NumericType::Float => 32,
        }
    }
}

fn check_rows(rows: usize) -> GenResult<()> {
    if (1..=3).contains(&rows) {
        Ok(())
    } else {
        Err(GenError::unsupported(format!("{rows} rows (expected 1, 2 or 3)")))
    }
}

fn check_leftover(leftover: usize, block: usize) -> GenResult<()> {
    if leftover < block {
        Ok(())
    } else {
        Err(GenError::unsupported(format!(
            "leftover {leftover} (expected 0..{block})"
        )))
    }
}

/// Pack 1-3 rows of bytes and compute their checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZipShape {
    pub rows: usize,
    pub leftover: usize,
    pub aligned: bool,
}

impl ZipShape {
    pub fn validate(&self) -> GenResult<()> {
        check_rows(self.rows)?;
        check_leftover(self.leftover, CHUNK)
    }

    pub fn name(&self) -> String {
        row_kernel_name("zip", self.rows, self.leftover, self.aligned)
    }
}

/// Requantize 1-3 rows of int32 results to bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QntShape {
    pub rows: usize,
    pub leftover: usize,
    pub aligned: bool,
}

impl QntShape {
    pub fn validate(&self) -> GenResult<()> {
        check_rows(self.rows)?;
        check_leftover(self.leftover, CHUNK)
    }

    pub fn name(&self) -> String {
        row_kernel_name("qnt", self.rows, self.leftover, self.aligned)
    }
}

fn row_kernel_name(family: &str, rows: usize, leftover: usize, aligned: bool) -> String {
    let mut name = format!("{family}_{rows}x8");
    if leftover > 0 {
        name.push_str(&format!("_{leftover}"));
    }
    if aligned {
        name.push_str("_aligned");
    }
    name
}

/// Multiply an N-row packed block by an M-row packed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MulShape {
    pub rows: usize,
    pub cols: usize,
    pub result: NumericType,
    pub lhs_add: bool,
    pub rhs_add: bool,
}

impl MulShape {
    pub fn validate(&self) -> GenResult<()> {
        check_rows(self.rows)?;
        let cols_ok = (1..=3).contains(&self.cols) || (self.cols == 4 && self.rows == 1);
        if !cols_ok {
            return Err(GenError::unsupported(format!(
                "{}x{} multiply (columns must be 1-3, or 4 for a single row)",
                self.rows, self.cols
            )));
        }
        if self.result == NumericType::Uint8 {
            return Err(GenError::unsupported("multiply results are int32 or float"));
        }
        Ok(())
    }

    pub fn name(&self) -> String {
        let mut name = format!("mul_{}x8_{}x8_{}", self.rows, self.cols, self.result.tag());
        if self.lhs_add {
            name.push_str("_lhsadd");
        }
        if self.rhs_add {
            name.push_str("_rhsadd");
        }
        name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    MinMax,
    Quantize,
    Dequantize,
    Requantize,
    BiasAdd,
}

impl TransformKind {
    pub const ALL: [TransformKind; 5] = [
        TransformKind::MinMax,
        TransformKind::Quantize,
        TransformKind::Dequantize,
        TransformKind::Requantize,
        TransformKind::BiasAdd,
    ];

    pub fn input(self) -> NumericType {
        match self {
            TransformKind::MinMax | TransformKind::Dequantize | TransformKind::BiasAdd => {
                NumericType::Uint8
            }
            TransformKind::Quantize => NumericType::Float,
            TransformKind::Requantize => NumericType::Int32,
        }
    }

    pub fn output(self) -> NumericType {
        match self {
            TransformKind::MinMax | TransformKind::Quantize | TransformKind::Requantize => {
                NumericType::Uint8
            }
            TransformKind::Dequantize => NumericType::Float,
            TransformKind::BiasAdd => NumericType::Int32,
        }
    }

    /// Host type of the `params` argument.
    pub fn params_type(self) -> &'static str {
        match self {
            TransformKind::MinMax => "MinMax<std::uint8_t>",
            TransformKind::Quantize => "Quantize",
            TransformKind::Dequantize => "Dequantize",
            TransformKind::Requantize => "Requantize",
            TransformKind::BiasAdd => "BiasAdd<std::uint8_t>",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            TransformKind::MinMax => "minmax",
            TransformKind::Quantize => "quantize",
            TransformKind::Dequantize => "dequantize",
            TransformKind::Requantize => "requantize",
            TransformKind::BiasAdd => "biasadd",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One-dimensional elementwise transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformShape {
    pub kind: TransformKind,
    pub leftover: usize,
}

impl TransformShape {
    pub fn validate(&self) -> GenResult<()> {
        check_leftover(self.leftover, TRANSFORM_BLOCK)
    }

    pub fn name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.kind.tag(),
            self.kind.input().tag(),
            self.kind.output().tag(),
            TRANSFORM_BLOCK,
            self.leftover
        )
    }
}

/// Any kernel the generator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelShape {
    Zip(ZipShape),
    Mul(MulShape),
    Qnt(QntShape),
    Transform(TransformShape),
}

impl KernelShape {
    pub fn validate(&self) -> GenResult<()> {
        match self {
            KernelShape::Zip(shape) => shape.validate(),
            KernelShape::Mul(shape) => shape.validate(),
            KernelShape::Qnt(shape) => shape.validate(),
            KernelShape::Transform(shape) => shape.validate(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            KernelShape::Zip(shape) => shape.name(),
            KernelShape::Mul(shape) => shape.name(),
            KernelShape::Qnt(shape) => shape.name(),
            KernelShape::Transform(shape) => shape.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_encode_every_axis() {
        let aligned = ZipShape {
            rows: 2,
            leftover: 5,
            aligned: true,
        };
        let unaligned = ZipShape {
            aligned: false,
            ..aligned
        };
        assert_eq!(aligned.name(), "zip_2x8_5_aligned");
        assert_eq!(unaligned.name(), "zip_2x8_5");
        assert_eq!(
            ZipShape {
                rows: 1,
                leftover: 0,
                aligned: false
            }
            .name(),
            "zip_1x8"
        );

        let mul = MulShape {
            rows: 3,
            cols: 3,
            result: NumericType::Float,
            lhs_add: true,
            rhs_add: true,
        };
        assert_eq!(mul.name(), "mul_3x8_3x8_float_lhsadd_rhsadd");

        let transform = TransformShape {
            kind: TransformKind::Requantize,
            leftover: 5,
        };
        assert_eq!(transform.name(), "requantize_int32_uint8_16_5");
    }

    #[test]
    fn test_validation() {
        let zip = ZipShape {
            rows: 4,
            leftover: 0,
            aligned: false,
        };
        assert!(matches!(
            zip.validate(),
            Err(GenError::UnsupportedConfiguration { .. })
        ));
        assert!(ZipShape { rows: 3, leftover: 8, aligned: false }.validate().is_err());

        let mul = |rows, cols| MulShape {
            rows,
            cols,
            result: NumericType::Int32,
            lhs_add: false,
            rhs_add: true,
        };
        assert!(mul(1, 4).validate().is_ok());
        assert!(mul(2, 4).validate().is_err());
        assert!(mul(1, 0).validate().is_err());
        assert!(mul(1, 5).validate().is_err());
        assert!(mul(3, 3).validate().is_ok());

        assert!(TransformShape {
            kind: TransformKind::MinMax,
            leftover: 16
        }
        .validate()
        .is_err());
    }
}
