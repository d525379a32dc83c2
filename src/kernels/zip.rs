// This module generates the zip kernels: 1 to 3 rows of bytes are interleaved into one packed
// stream, 8 bytes per row at a time, while a running sum of every row is accumulated in a 16-bit
// wide register. After the main loop an optional tail loads the last 1-7 bytes of each row into a
// zeroed register so the packed stream is always padded to whole chunks. The row sums are then
// reduced horizontally, scaled by multiplicative_offset, shifted by additive_offset and appended
// to the packed stream as one int32 per row; the multiply kernels read them back as zero-point
// corrections. 48 variants exist: rows 1-3, leftover 0-7, aligned or unaligned source rows.

//! Zip (pack with row checksum) kernels.

use log::debug;

use crate::core::error::GenResult;
use crate::core::register_pool::{AccessMode, OperandRef, Register};
use crate::neon::instruction::{DataType, Operand};
use crate::neon::memory::byte_pieces;

use super::context::{GenOptions, Kernel, KernelContext};
use super::lanes::{chain_row_addresses, Lane, LaneGroup};
use super::shape::{ZipShape, CHUNK, MAX_ZIP_COUNT};

const PARAMETERS: [(&str, &str); 6] = [
    ("const std::uint8_t*", "source"),
    ("std::int32_t", "count"),
    ("std::int32_t", "stride"),
    ("std::uint8_t*", "destination"),
    ("std::int32_t", "multiplicative_offset"),
    ("std::int32_t", "additive_offset"),
];

/// Generate one zip kernel.
pub fn generate(shape: &ZipShape, options: &GenOptions) -> GenResult<Kernel> {
    shape.validate()?;
    let name = shape.name();
    debug!("generating {name}");

    let mut cx = KernelContext::new(options);
    cx.function(&name, &PARAMETERS, |cx| {
        emit_preconditions(cx, shape);
        cx.asm_block(|cx| emit_zip(cx, shape))
    })?;
    cx.finish(name)
}

fn emit_preconditions(cx: &mut KernelContext, shape: &ZipShape) {
    let e = &mut cx.emitter;
    e.assert(&format!("count % {CHUNK} == {}", shape.leftover));
    e.assert(&format!("count <= {MAX_ZIP_COUNT}"));
    e.assert(&format!("count >= {CHUNK}"));
    e.assert("reinterpret_cast<std::uintptr_t>(destination) % 8 == 0");
    if shape.aligned {
        e.assert("reinterpret_cast<std::uintptr_t>(source) % 8 == 0");
        if shape.rows > 1 {
            e.assert("stride % 8 == 0");
        }
    }
}

fn zip_lanes(
    cx: &mut KernelContext,
    rows: usize,
    source: &OperandRef,
    stride: &OperandRef,
) -> GenResult<LaneGroup> {
    let mut group = LaneGroup::new(source.clone());
    for address in chain_row_addresses(cx, source, stride, rows)? {
        let load = cx.registers.allocate_narrow(0)?;
        // Aggregators start at q2 so the loads stay in d0..d3.
        let aggregator = cx.registers.allocate_wide(2)?;
        group.push(Lane {
            address,
            load,
            aggregator: Some(aggregator),
        });
    }
    Ok(group)
}

fn emit_aggregate(cx: &mut KernelContext, lanes: &LaneGroup) {
    for lane in &lanes.lanes {
        if let Some(aggregator) = lane.aggregator {
            cx.emitter
                .vaddw(DataType::U8, aggregator, aggregator, lane.load);
        }
    }
}

fn emit_store_chunk(cx: &mut KernelContext, lanes: &LaneGroup, destination: &OperandRef) {
    cx.emitter.vst1(
        DataType::Bits8,
        Operand::list(&lanes.loads()),
        Operand::deref_increment(destination, Some(64)),
    );
}

fn emit_zip(cx: &mut KernelContext, shape: &ZipShape) -> GenResult<()> {
    let count = cx.registers.bind_parameter("count", AccessMode::ReadWrite);
    let destination = cx
        .registers
        .bind_parameter("destination", AccessMode::ReadWrite);
    let source = cx.registers.bind_parameter("source", AccessMode::ReadWrite);
    let stride = cx.registers.bind_parameter("stride", AccessMode::Input);

    let lanes = zip_lanes(cx, shape.rows, &source, &stride)?;
    let load_align = shape.aligned.then_some(64);

    if shape.leftover > 0 {
        cx.emitter
            .sub(&count, &count, Operand::imm(shape.leftover as i32));
    }

    cx.emitter.blank();
    cx.emitter.comment("Clear aggregators.");
    for aggregator in lanes.aggregators() {
        cx.emitter.vmov(DataType::I16, aggregator, Operand::imm(0));
    }

    cx.section(Some("Main loop."), Some(1), |cx| {
        cx.emitter
            .subs(&count, &count, Operand::imm(CHUNK as i32));
        for lane in &lanes.lanes {
            cx.emitter.vld1(
                DataType::Bits8,
                Operand::list(&[lane.load]),
                Operand::deref_increment(&lane.address, load_align),
            );
        }
        emit_aggregate(cx, &lanes);
        emit_store_chunk(cx, &lanes, &destination);
        cx.emitter.bne_back(1);
        Ok(())
    })?;

    if shape.leftover > 0 {
        cx.section(Some("Leftover loads."), None, |cx| {
            emit_leftover_loads(cx, &lanes, shape.leftover);
            emit_aggregate(cx, &lanes);
            emit_store_chunk(cx, &lanes, &destination);
            Ok(())
        })?;
    }

    emit_checksums(cx, &lanes, &destination)?;
    lanes.free(&mut cx.registers)
}

/// Zero each row's load register, then load exactly `leftover` bytes per
/// row. The last piece does not advance the row address.
fn emit_leftover_loads(cx: &mut KernelContext, lanes: &LaneGroup, leftover: usize) {
    for lane in &lanes.lanes {
        cx.emitter.vmov(DataType::I8, lane.load, Operand::imm(0));
    }
    let pieces = byte_pieces(leftover);
    for (i, piece) in pieces.iter().enumerate() {
        let last = i + 1 == pieces.len();
        for lane in &lanes.lanes {
            let address = if last {
                Operand::deref(&lane.address, None)
            } else {
                Operand::deref_increment(&lane.address, None)
            };
            cx.emitter.vld1(
                piece.data_type(),
                Operand::List(vec![Operand::lane(lane.load, piece.lane)]),
                address,
            );
        }
    }
}

/// Reduce every row's aggregator to one int32, apply
/// `sum * multiplicative_offset + additive_offset` and append the row sums
/// to the packed stream.
fn emit_checksums(
    cx: &mut KernelContext,
    lanes: &LaneGroup,
    destination: &OperandRef,
) -> GenResult<()> {
    let multiplicative_offset = cx
        .registers
        .bind_parameter("multiplicative_offset", AccessMode::Input);
    let additive_offset = cx
        .registers
        .bind_parameter("additive_offset", AccessMode::Input);

    cx.emitter.blank();
    cx.emitter.comment("Aggregator reduction.");
    let multiplier = cx.registers.allocate_narrow(0)?;
    cx.emitter.vmov(
        DataType::Bits32,
        Operand::lane(multiplier, 0),
        &multiplicative_offset,
    );
    let offset = cx.registers.allocate_wide(0)?;
    cx.emitter.vdup(DataType::Bits32, offset, &additive_offset);

    let aggregators = lanes.aggregators();
    for aggregator in &aggregators {
        cx.emitter.vpaddl(DataType::U16, *aggregator, *aggregator);
    }

    let mut row_sums: Vec<Register> = Vec::with_capacity(aggregators.len());
    for aggregator in &aggregators {
        let row_sum = cx.registers.allocate_narrow(0)?;
        cx.emitter
            .vpadd(DataType::U32, row_sum, aggregator.low(), aggregator.high());
        row_sums.push(row_sum);
    }

    let sums = cx.registers.allocate_wide(0)?;
    match row_sums.as_slice() {
        [a] => cx.emitter.vpadd(DataType::U32, sums.low(), *a, *a),
        [a, b] => cx.emitter.vpadd(DataType::U32, sums.low(), *a, *b),
        [a, b, c] => {
            cx.emitter.vpadd(DataType::U32, sums.low(), *a, *b);
            cx.emitter.vpadd(DataType::U32, sums.high(), *c, *c);
        }
        _ => unreachable!("zip shapes have 1-3 rows"),
    }
    cx.emitter
        .vmul(DataType::I32, sums, sums, Operand::lane(multiplier, 0));
    cx.emitter.vadd(DataType::I32, sums, sums, offset);

    match row_sums.len() {
        1 => cx.emitter.vst1(
            DataType::Bits32,
            Operand::List(vec![Operand::lane(sums.low(), 0)]),
            Operand::deref(destination, None),
        ),
        2 => cx.emitter.vst1(
            DataType::Bits32,
            Operand::list(&[sums.low()]),
            Operand::deref(destination, Some(64)),
        ),
        _ => {
            // Two stores: the destination can only take a 2-lane vector.
            cx.emitter.vst1(
                DataType::Bits32,
                Operand::list(&[sums.low()]),
                Operand::deref_increment(destination, Some(64)),
            );
            cx.emitter.vst1(
                DataType::Bits32,
                Operand::List(vec![Operand::lane(sums.high(), 0)]),
                Operand::deref(destination, None),
            );
        }
    }

    cx.registers.free(multiplier)?;
    cx.registers.free(offset)?;
    cx.registers.free_all(row_sums)?;
    cx.registers.free(sums)
}
