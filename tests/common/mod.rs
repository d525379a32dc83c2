//! Shared helpers for the kernel execution tests: logging setup, a
//! deterministic generator for test data, reference implementations and
//! runners that execute a generated kernel on the interpreter.

#![allow(dead_code)]

use metagen::kernels::{self, GenOptions, Kernel, KernelShape};
use metagen::sim::Machine;
use metagen::{MulShape, NumericType, ZipShape};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Generate a kernel with entry asserts enabled.
pub fn generate(shape: KernelShape) -> Kernel {
    kernels::generate(&shape, &GenOptions { checked: true })
        .unwrap_or_else(|e| panic!("{}: {e}", shape.name()))
}

/// Small linear congruential generator; test data must be reproducible.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    pub fn below(&mut self, bound: u32) -> u32 {
        self.next_u32() % bound
    }

    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.next_u32() as u8).collect()
    }

    pub fn rows(&mut self, rows: usize, len: usize) -> Vec<Vec<u8>> {
        (0..rows).map(|_| self.bytes(len)).collect()
    }
}

/// Packed stream of `rows`: 8-byte chunks of every row in turn, the last
/// chunk zero padded, then one int32 `sum * multiplicative_offset +
/// additive_offset` per row.
pub fn zip_reference(rows: &[Vec<u8>], multiplicative_offset: i32, additive_offset: i32) -> Vec<u8> {
    let count = rows[0].len();
    let mut packed = Vec::new();
    for chunk in 0..count.div_ceil(8) {
        for row in rows {
            let mut bytes = [0u8; 8];
            let start = chunk * 8;
            let end = (start + 8).min(count);
            bytes[..end - start].copy_from_slice(&row[start..end]);
            packed.extend_from_slice(&bytes);
        }
    }
    for row in rows {
        let sum: i32 = row.iter().map(|b| *b as i32).sum();
        let checksum = sum
            .wrapping_mul(multiplicative_offset)
            .wrapping_add(additive_offset);
        packed.extend_from_slice(&checksum.to_le_bytes());
    }
    packed
}

/// Run a zip kernel over `rows` and return the packed destination.
/// Unaligned runs place the rows at an odd address with an odd stride.
pub fn run_zip(
    rows: &[Vec<u8>],
    aligned: bool,
    multiplicative_offset: i32,
    additive_offset: i32,
) -> Vec<u8> {
    let count = rows[0].len();
    let kernel = generate(KernelShape::Zip(ZipShape {
        rows: rows.len(),
        leftover: count % 8,
        aligned,
    }));

    let mut machine = Machine::new();
    let stride = if aligned {
        count.next_multiple_of(8) + 8
    } else {
        count + 3
    };
    let source_len = stride * (rows.len() - 1) + count;
    let source = if aligned {
        machine.memory.alloc(source_len)
    } else {
        machine.memory.alloc_with_offset(source_len, 3)
    };
    for (i, row) in rows.iter().enumerate() {
        machine
            .memory
            .write(source + (i * stride) as u32, row)
            .unwrap();
    }
    let destination_len = rows.len() * count.next_multiple_of(8) + 4 * rows.len();
    let destination = machine.memory.alloc(destination_len);

    machine.set_param("source", source);
    machine.set_param("count", count as u32);
    machine.set_param("stride", stride as u32);
    machine.set_param("destination", destination);
    machine.set_param_i32("multiplicative_offset", multiplicative_offset);
    machine.set_param_i32("additive_offset", additive_offset);
    machine
        .run(&kernel)
        .unwrap_or_else(|e| panic!("{}: {e}", kernel.name));

    machine
        .memory
        .read(destination, destination_len)
        .unwrap()
        .to_vec()
}

/// Expected multiply result before any float conversion.
pub fn mul_reference(
    shape: &MulShape,
    left: &[Vec<u8>],
    right: &[Vec<u8>],
    lhs_offsets: &[i32],
    rhs_offsets: &[i32],
) -> Vec<Vec<i32>> {
    left.iter()
        .enumerate()
        .map(|(r, l)| {
            right
                .iter()
                .enumerate()
                .map(|(c, rr)| {
                    let mut value: i32 = l
                        .iter()
                        .zip(rr)
                        .map(|(a, b)| *a as i32 * *b as i32)
                        .sum();
                    if shape.lhs_add {
                        value = value.wrapping_add(lhs_offsets[r]);
                    }
                    if shape.rhs_add {
                        value = value.wrapping_add(rhs_offsets[c]);
                    }
                    value
                })
                .collect()
        })
        .collect()
}

/// Row checksums of a packed stream.
pub fn packed_offsets(packed: &[u8], rows: usize) -> Vec<i32> {
    packed[packed.len() - 4 * rows..]
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Run a multiply kernel on two packed streams. Returns the raw result
/// words, row by row; float results come back as their bit patterns.
pub fn run_mul(
    shape: &MulShape,
    left_packed: &[u8],
    right_packed: &[u8],
    depth: usize,
    result_scale: f32,
) -> Vec<Vec<u32>> {
    let kernel = generate(KernelShape::Mul(*shape));
    let mut machine = Machine::new();

    // The offset loads after the loop read a whole register, which can be
    // one int32 more than the stream holds.
    let pad = |packed: &[u8]| {
        let mut padded = packed.to_vec();
        padded.extend_from_slice(&[0; 8]);
        padded
    };
    let left = machine.memory.alloc_bytes(&pad(left_packed));
    let right = machine.memory.alloc_bytes(&pad(right_packed));

    let result_stride = shape.cols * 4 + 8;
    let result = machine.memory.alloc(result_stride * shape.rows);

    machine.set_param("left", left);
    machine.set_param("right", right);
    machine.set_param("count", depth as u32);
    machine.set_param("result", result);
    machine.set_param("result_stride", result_stride as u32);
    if shape.result == NumericType::Float {
        machine.set_param_f32("result_scale", result_scale);
    }
    machine
        .run(&kernel)
        .unwrap_or_else(|e| panic!("{}: {e}", kernel.name));

    (0..shape.rows)
        .map(|r| {
            machine
                .memory
                .read_i32s(result + (r * result_stride) as u32, shape.cols)
                .unwrap()
                .into_iter()
                .map(|v| v as u32)
                .collect()
        })
        .collect()
}

/// `sat_u8(sat_i16(((x + offset) * multiplicative_offset + rounding_offset) << shift))`
/// with a negative shift shifting right arithmetically.
pub fn qnt_reference(
    value: i32,
    offset: i32,
    multiplicative_offset: i32,
    rounding_offset: i32,
    shift: i32,
) -> u8 {
    let value = value
        .wrapping_add(offset)
        .wrapping_mul(multiplicative_offset)
        .wrapping_add(rounding_offset);
    let shifted = if shift >= 0 {
        value.wrapping_shl(shift as u32)
    } else {
        value >> (-shift).min(31)
    };
    shifted.clamp(i16::MIN as i32, i16::MAX as i32).clamp(0, 255) as u8
}

/// Saturating float to uint8 through int32 and int16, as the transform
/// kernels narrow.
pub fn saturate_f32(value: f32) -> u8 {
    (value as i32).clamp(0, 255) as u8
}
