// This module generates the qnt kernels, which turn 1 to 3 rows of int32 multiply results back
// into bytes. Every row gets its own broadcast offset read from the `offsets` stream, then each
// value goes through add offset, multiply, add rounding, shift (negative shifts are arithmetic
// right shifts) and two saturating narrows down to uint8. Source and destination rows are chained
// from the row 0 addresses by `stride` and `destination_stride`. The main loop handles 8 values
// per row; a tail after label 2 handles the 1-7 leftover values with the same piecewise
// loads and stores the zip kernels use.

//! Qnt (int32 to uint8 row requantization) kernels.

use log::debug;

use crate::core::error::GenResult;
use crate::core::register_pool::{AccessMode, OperandRef, Register};
use crate::neon::instruction::{DataType, Operand};
use crate::neon::memory::{load_elements, store_elements};

use super::context::{GenOptions, Kernel, KernelContext};
use super::lanes::chain_row_addresses;
use super::shape::{QntShape, CHUNK};

const PARAMETERS: [(&str, &str); 9] = [
    ("const std::int32_t*", "source"),
    ("std::int32_t", "count"),
    ("std::int32_t", "stride"),
    ("const std::int32_t*", "offsets"),
    ("std::uint8_t*", "destination"),
    ("std::int32_t", "destination_stride"),
    ("std::int32_t", "multiplicative_offset"),
    ("std::int32_t", "rounding_offset"),
    ("std::int32_t", "shift"),
];

/// One row of a qnt kernel: 8 int32 values are loaded into two wide
/// registers per iteration.
#[derive(Debug, Clone)]
struct QntRow {
    source: OperandRef,
    destination: OperandRef,
    offset: Register,
    load_1: Register,
    load_2: Register,
}

/// Broadcast scalars shared by every row.
#[derive(Debug, Clone, Copy)]
struct QuantizeParams {
    multiplicative_offset: Register,
    rounding_offset: Register,
    shift: Register,
}

/// Generate one qnt kernel.
pub fn generate(shape: &QntShape, options: &GenOptions) -> GenResult<Kernel> {
    shape.validate()?;
    let name = shape.name();
    debug!("generating {name}");

    let mut cx = KernelContext::new(options);
    cx.function(&name, &PARAMETERS, |cx| {
        emit_preconditions(cx, shape);
        cx.asm_block(|cx| emit_qnt(cx, shape))
    })?;
    cx.finish(name)
}

fn emit_preconditions(cx: &mut KernelContext, shape: &QntShape) {
    let e = &mut cx.emitter;
    e.assert(&format!("count % {CHUNK} == {}", shape.leftover));
    e.assert(&format!("count >= {CHUNK}"));
    e.assert("reinterpret_cast<std::uintptr_t>(source) % 8 == 0");
    if shape.rows > 1 {
        e.assert("stride % 8 == 0");
    }
    if shape.aligned {
        e.assert("reinterpret_cast<std::uintptr_t>(destination) % 8 == 0");
        if shape.rows > 1 {
            e.assert("destination_stride % 8 == 0");
        }
    }
}

fn broadcast(cx: &mut KernelContext, name: &str) -> GenResult<Register> {
    let param = cx.registers.bind_parameter(name, AccessMode::Input);
    let register = cx.registers.allocate_wide(0)?;
    cx.emitter.vdup(DataType::Bits32, register, &param);
    Ok(register)
}

fn qnt_rows(cx: &mut KernelContext, rows: usize) -> GenResult<Vec<QntRow>> {
    let offsets = cx.registers.bind_parameter("offsets", AccessMode::ReadWrite);
    let mut row_offsets = Vec::with_capacity(rows);
    for _ in 0..rows {
        let offset = cx.registers.allocate_wide(0)?;
        cx.emitter.vld1(
            DataType::Bits32,
            Operand::List(vec![
                Operand::all_lanes(offset.low()),
                Operand::all_lanes(offset.high()),
            ]),
            Operand::deref_increment(&offsets, Some(32)),
        );
        row_offsets.push(offset);
    }

    let source = cx.registers.bind_parameter("source", AccessMode::ReadWrite);
    let stride = cx.registers.bind_parameter("stride", AccessMode::Input);
    let destination = cx
        .registers
        .bind_parameter("destination", AccessMode::ReadWrite);
    let destination_stride = cx
        .registers
        .bind_parameter("destination_stride", AccessMode::Input);

    let sources = chain_row_addresses(cx, &source, &stride, rows)?;
    let destinations = chain_row_addresses(cx, &destination, &destination_stride, rows)?;

    let mut lanes = Vec::with_capacity(rows);
    for ((source, destination), offset) in sources.into_iter().zip(destinations).zip(row_offsets) {
        let load_1 = cx.registers.allocate_wide(0)?;
        let load_2 = cx.registers.allocate_wide(0)?;
        lanes.push(QntRow {
            source,
            destination,
            offset,
            load_1,
            load_2,
        });
    }
    Ok(lanes)
}

/// Quantize `(value, half)` pairs in place and narrow each into `half`;
/// `temps` are the wide registers owning the halves.
fn emit_quantize(
    cx: &mut KernelContext,
    setup: &[(Register, Register, Register)],
    temps: &[Register],
    params: QuantizeParams,
) {
    let e = &mut cx.emitter;
    for &(value, offset, _) in setup {
        e.vadd(DataType::I32, value, value, offset);
    }
    for &(value, _, _) in setup {
        e.vmul(DataType::I32, value, value, params.multiplicative_offset);
    }
    for &(value, _, _) in setup {
        e.vadd(DataType::I32, value, value, params.rounding_offset);
    }
    for &(value, _, _) in setup {
        e.vshl(DataType::S32, value, value, params.shift);
    }
    for &(value, _, half) in setup {
        e.vqmovn(DataType::S32, half, value);
    }
    for temp in temps {
        e.vqmovun(DataType::S16, temp.low(), *temp);
    }
}

fn emit_qnt(cx: &mut KernelContext, shape: &QntShape) -> GenResult<()> {
    let count = cx.registers.bind_parameter("count", AccessMode::ReadWrite);

    let params = QuantizeParams {
        multiplicative_offset: broadcast(cx, "multiplicative_offset")?,
        rounding_offset: broadcast(cx, "rounding_offset")?,
        shift: broadcast(cx, "shift")?,
    };
    let rows = qnt_rows(cx, shape.rows)?;
    let store_align = shape.aligned.then_some(64);

    if shape.leftover > 0 {
        cx.emitter
            .subs(&count, &count, Operand::imm(shape.leftover as i32));
        cx.emitter.beq_forward(2);
    }

    cx.section(None, Some(1), |cx| {
        cx.emitter
            .subs(&count, &count, Operand::imm(CHUNK as i32));
        emit_load_quantize_store(cx, &rows, params, store_align)?;
        cx.emitter.blank();
        cx.emitter.bne_back(1);
        Ok(())
    })?;

    if shape.leftover > 0 {
        cx.section(Some("Leftovers."), Some(2), |cx| {
            emit_leftover_load_quantize_store(cx, &rows, params, shape.leftover)
        })?;
    }

    for row in &rows {
        cx.registers
            .free_all([row.offset, row.load_1, row.load_2])?;
        cx.registers.free_operand(&row.source)?;
        cx.registers.free_operand(&row.destination)?;
    }
    cx.registers.free_all([
        params.multiplicative_offset,
        params.rounding_offset,
        params.shift,
    ])
}

fn emit_load_quantize_store(
    cx: &mut KernelContext,
    rows: &[QntRow],
    params: QuantizeParams,
    store_align: Option<u32>,
) -> GenResult<()> {
    let mut temps = Vec::with_capacity(rows.len());
    for _ in rows {
        temps.push(cx.registers.allocate_wide(0)?);
    }

    for row in rows {
        cx.emitter.vld1(
            DataType::Bits32,
            Operand::list(&[
                row.load_1.low(),
                row.load_1.high(),
                row.load_2.low(),
                row.load_2.high(),
            ]),
            Operand::deref_increment(&row.source, Some(64)),
        );
    }
    for row in rows {
        cx.emitter.pld(&row.source);
    }

    let mut setup = Vec::with_capacity(rows.len() * 2);
    for (row, temp) in rows.iter().zip(&temps) {
        setup.push((row.load_1, row.offset, temp.low()));
        setup.push((row.load_2, row.offset, temp.high()));
    }
    emit_quantize(cx, &setup, &temps, params);

    for (row, temp) in rows.iter().zip(&temps) {
        cx.emitter.vst1(
            DataType::Bits8,
            Operand::list(&[temp.low()]),
            Operand::deref_increment(&row.destination, store_align),
        );
    }
    cx.registers.free_all(temps)
}

fn emit_leftover_load_quantize_store(
    cx: &mut KernelContext,
    rows: &[QntRow],
    params: QuantizeParams,
    leftover: usize,
) -> GenResult<()> {
    let mut temps = Vec::with_capacity(rows.len());
    for _ in rows {
        temps.push(cx.registers.allocate_wide(0)?);
    }

    for row in rows {
        load_elements(
            &mut cx.emitter,
            32,
            leftover,
            &[row.load_1, row.load_2],
            &row.source,
            Some(64),
        )?;
    }

    let mut setup = Vec::with_capacity(rows.len() * 2);
    for (row, temp) in rows.iter().zip(&temps) {
        setup.push((row.load_1, row.offset, temp.low()));
        if leftover > 4 {
            setup.push((row.load_2, row.offset, temp.high()));
        }
    }
    emit_quantize(cx, &setup, &temps, params);

    for (row, temp) in rows.iter().zip(&temps) {
        store_elements(
            &mut cx.emitter,
            8,
            leftover,
            &[temp.low()],
            &row.destination,
            None,
        )?;
    }
    cx.registers.free_all(temps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(kernel: &Kernel) -> Vec<String> {
        kernel.instructions().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_qnt_1x8_main_loop() {
        let kernel = generate(
            &QntShape {
                rows: 1,
                leftover: 0,
                aligned: true,
            },
            &GenOptions::default(),
        )
        .unwrap();
        let listing = listing(&kernel);
        assert_eq!(
            &listing[..5],
            &[
                "vdup.32 q0, %[multiplicative_offset]",
                "vdup.32 q1, %[rounding_offset]",
                "vdup.32 q2, %[shift]",
                "vld1.32 {d6[], d7[]}, [%[offsets]:32]!",
                "subs %[count], %[count], #8",
            ]
        );
        assert!(listing.contains(&"vld1.32 {d8, d9, d10, d11}, [%[source]:64]!".to_string()));
        assert!(listing.contains(&"vshl.s32 q5, q5, q2".to_string()));
        assert!(listing.contains(&"vqmovn.s32 d13, q5".to_string()));
        assert!(listing.contains(&"vqmovun.s16 d12, q6".to_string()));
        assert!(listing.contains(&"vst1.8 {d12}, [%[destination]:64]!".to_string()));
        assert!(!listing.iter().any(|l| l.starts_with("beq")));
    }

    #[test]
    fn test_qnt_leftover_tail() {
        let kernel = generate(
            &QntShape {
                rows: 2,
                leftover: 3,
                aligned: false,
            },
            &GenOptions::default(),
        )
        .unwrap();
        let listing = listing(&kernel);
        assert!(listing.contains(&"add r0, %[source], %[stride]".to_string()));
        assert!(listing.contains(&"add r1, %[destination], %[destination_stride]".to_string()));
        assert!(listing.contains(&"beq 2f".to_string()));
        assert!(listing.contains(&"vst1.16 {d20[0]}, [r1]!".to_string()));
        assert!(listing.contains(&"vst1.8 {d20[2]}, [r1]!".to_string()));

        let text = kernel.to_string();
        assert!(text.contains("\"2:\""));
    }

    #[test]
    fn test_three_rows_fit_the_register_file() {
        for leftover in 0..8 {
            let kernel = generate(
                &QntShape {
                    rows: 3,
                    leftover,
                    aligned: false,
                },
                &GenOptions::default(),
            )
            .unwrap();
            assert_eq!(kernel.binding("offsets").map(|b| b.mode), Some(AccessMode::ReadWrite));
            assert_eq!(kernel.binding("shift").map(|b| b.mode), Some(AccessMode::Input));
        }
    }
}
