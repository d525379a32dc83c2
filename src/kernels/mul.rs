// This module generates the multiply kernels. Both operands arrive packed by the zip kernels:
// the left stream holds 8 bytes of each of N rows per depth step, the right stream 8 bytes of
// each of M rows, and both end with one int32 zero-point correction per row. The depth loop
// forms all N*M widening 8x8-bit products per step and pair-accumulates each into its own 4-lane
// int32 aggregator. The 3x3 shape needs 9 aggregators and cannot also hold 9 product registers,
// so its products are formed through 4 reused temporaries plus a backup register that overlaps
// two left operand rows, following a fixed schedule. After the loop every aggregator is reduced
// horizontally, the per-row and per-column corrections are added, the result is optionally
// converted to float and scaled, and each row is stored with the caller's result stride.

//! Tiled multiply-accumulate kernels.

use log::debug;

use crate::core::error::GenResult;
use crate::core::register_pool::{AccessMode, OperandRef, Register};
use crate::neon::instruction::{DataType, Operand};

use super::context::{GenOptions, Kernel, KernelContext};
use super::lanes::{Lane, LaneGroup};
use super::shape::{MulShape, NumericType, CHUNK};

/// One product of the 3x3 schedule: rows of the left and right operands and
/// the aggregator the product accumulates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Product {
    left: usize,
    right: usize,
    aggregator: usize,
}

const fn product(left: usize, right: usize) -> Product {
    Product {
        left,
        right,
        aggregator: left * 3 + right,
    }
}

/// 3x3 schedule. Group `g` puts product `SCHEDULE_3X3[g][t]` in temporary
/// `t`. The ninth product goes to the backup register, whose halves are left
/// rows 0 and 1; both are dead once the second group has read them. Do not
/// reorder: all 32 narrow registers are in use.
const SCHEDULE_3X3: [[Product; 4]; 2] = [
    [product(0, 0), product(0, 1), product(0, 2), product(1, 0)],
    [product(1, 1), product(1, 2), product(2, 0), product(2, 1)],
];

const BACKUP_PRODUCT: Product = product(2, 2);

/// Offsets and scales read after the loop start at q4 / d8.
const PARAMS_MIN_WIDE: u8 = 4;

fn parameters(shape: &MulShape) -> Vec<(&'static str, &'static str)> {
    let result_type = match shape.result {
        NumericType::Float => "float*",
        _ => "std::int32_t*",
    };
    let mut params = vec![
        ("const std::uint8_t*", "left"),
        ("const std::uint8_t*", "right"),
        ("std::int32_t", "count"),
        (result_type, "result"),
        ("std::int32_t", "result_stride"),
    ];
    if shape.result == NumericType::Float {
        params.push(("float", "result_scale"));
    }
    params
}

/// Generate one multiply kernel.
pub fn generate(shape: &MulShape, options: &GenOptions) -> GenResult<Kernel> {
    shape.validate()?;
    let name = shape.name();
    debug!("generating {name}");

    let mut cx = KernelContext::new(options);
    cx.function(&name, &parameters(shape), |cx| {
        cx.emitter.assert(&format!("count % {CHUNK} == 0"));
        cx.emitter.assert(&format!("count >= {CHUNK}"));
        cx.asm_block(|cx| emit_mul(cx, shape))
    })?;
    cx.finish(name)
}

fn mul_lanes(cx: &mut KernelContext, address: &OperandRef, rows: usize) -> GenResult<LaneGroup> {
    let mut group = LaneGroup::new(address.clone());
    for _ in 0..rows {
        let load = cx.registers.allocate_narrow(0)?;
        group.push(Lane {
            address: address.clone(),
            load,
            aggregator: None,
        });
    }
    Ok(group)
}

/// Left lanes of the 3x3 kernel: both halves of the backup register plus one
/// more narrow register.
fn mul_lanes_3x3(
    cx: &mut KernelContext,
    address: &OperandRef,
    backup: Register,
) -> GenResult<LaneGroup> {
    let mut group = LaneGroup::new(address.clone());
    let third = cx.registers.allocate_narrow(0)?;
    for load in [backup.low(), backup.high(), third] {
        group.push(Lane {
            address: address.clone(),
            load,
            aggregator: None,
        });
    }
    Ok(group)
}

/// Aggregators past the third copy an already cleared one instead of
/// taking another immediate move.
fn clear_aggregators(cx: &mut KernelContext, count: usize) -> GenResult<Vec<Register>> {
    cx.emitter.comment("Clear aggregators.");
    let mut aggregators: Vec<Register> = Vec::with_capacity(count);
    for i in 0..count {
        let aggregator = cx.registers.allocate_wide(0)?;
        if i < 3 {
            cx.emitter.vmov(DataType::I32, aggregator, Operand::imm(0));
        } else {
            cx.emitter.vmov(DataType::I32, aggregator, aggregators[i - 3]);
        }
        aggregators.push(aggregator);
    }
    Ok(aggregators)
}

fn emit_loads(cx: &mut KernelContext, left: &LaneGroup, right: &LaneGroup) {
    for group in [left, right] {
        cx.emitter.vld1(
            DataType::Bits8,
            Operand::list(&group.loads()),
            Operand::deref_increment(&group.address, Some(64)),
        );
    }
    cx.emitter.pld_offset(&left.address, 64);
    cx.emitter.pld_offset(&right.address, 64);
}

fn emit_mul(cx: &mut KernelContext, shape: &MulShape) -> GenResult<()> {
    let count = cx.registers.bind_parameter("count", AccessMode::ReadWrite);
    let left_address = cx.registers.bind_parameter("left", AccessMode::ReadWrite);
    let right_address = cx.registers.bind_parameter("right", AccessMode::ReadWrite);

    let square = shape.rows == 3 && shape.cols == 3;
    let backup = if square {
        Some(cx.registers.allocate_wide(0)?)
    } else {
        None
    };
    let left = match backup {
        Some(backup) => mul_lanes_3x3(cx, &left_address, backup)?,
        None => mul_lanes(cx, &left_address, shape.rows)?,
    };
    let right = mul_lanes(cx, &right_address, shape.cols)?;

    cx.emitter.pld(&left.address);
    cx.emitter.pld(&right.address);

    let aggregators = clear_aggregators(cx, shape.rows * shape.cols)?;

    match backup {
        Some(backup) => cx.section(Some("3x3 lanes loop."), Some(1), |cx| {
            emit_3x3_loop(cx, &count, &left, &right, &aggregators, backup)
        })?,
        None => cx.section(Some("General NxM lanes loop."), Some(1), |cx| {
            emit_nxm_loop(cx, &count, &left, &right, &aggregators)
        })?,
    }

    left.free(&mut cx.registers)?;
    right.free(&mut cx.registers)?;

    reduce_and_store(cx, shape, aggregators, &left_address, &right_address)
}

fn emit_nxm_loop(
    cx: &mut KernelContext,
    count: &OperandRef,
    left: &LaneGroup,
    right: &LaneGroup,
    aggregators: &[Register],
) -> GenResult<()> {
    cx.emitter.subs(count, count, Operand::imm(CHUNK as i32));
    emit_loads(cx, left, right);

    let mut products = Vec::with_capacity(aggregators.len());
    for _ in aggregators {
        products.push(cx.registers.allocate_wide(0)?);
    }
    let left_loads = left.loads();
    let right_loads = right.loads();
    for (row, left_load) in left_loads.iter().enumerate() {
        for (col, right_load) in right_loads.iter().enumerate() {
            let index = row * right_loads.len() + col;
            cx.emitter
                .vmull(DataType::U8, products[index], *right_load, *left_load);
        }
    }
    for (aggregator, product) in aggregators.iter().zip(&products) {
        cx.emitter.vpadal(DataType::U16, *aggregator, *product);
    }

    cx.emitter.blank();
    cx.emitter.comment("Loop break.");
    cx.emitter.bne_back(1);
    cx.registers.free_all(products)
}

fn emit_3x3_loop(
    cx: &mut KernelContext,
    count: &OperandRef,
    left: &LaneGroup,
    right: &LaneGroup,
    aggregators: &[Register],
    backup: Register,
) -> GenResult<()> {
    cx.emitter.subs(count, count, Operand::imm(CHUNK as i32));
    emit_loads(cx, left, right);

    let left_loads = left.loads();
    let right_loads = right.loads();
    let mut temps = Vec::with_capacity(4);
    for _ in 0..4 {
        temps.push(cx.registers.allocate_wide(0)?);
    }

    for (group, schedule) in SCHEDULE_3X3.iter().enumerate() {
        for (temp, p) in temps.iter().zip(schedule) {
            cx.emitter
                .vmull(DataType::U8, *temp, left_loads[p.left], right_loads[p.right]);
        }
        let last_group = group + 1 == SCHEDULE_3X3.len();
        if last_group {
            cx.emitter.vmull(
                DataType::U8,
                backup,
                left_loads[BACKUP_PRODUCT.left],
                right_loads[BACKUP_PRODUCT.right],
            );
        }
        for (temp, p) in temps.iter().zip(schedule) {
            cx.emitter
                .vpadal(DataType::U16, aggregators[p.aggregator], *temp);
        }
        if last_group {
            cx.emitter
                .vpadal(DataType::U16, aggregators[BACKUP_PRODUCT.aggregator], backup);
        }
    }

    cx.emitter.blank();
    cx.emitter.comment("Loop break.");
    cx.emitter.bne_back(1);
    cx.registers.free_all(temps)
}

/// Load `elements` int32 values stored after a packed stream.
fn read_params(cx: &mut KernelContext, address: &OperandRef, elements: usize) -> GenResult<Register> {
    let register = if elements <= 2 {
        cx.registers.allocate_narrow(PARAMS_MIN_WIDE * 2)?
    } else {
        cx.registers.allocate_wide(PARAMS_MIN_WIDE)?
    };
    cx.emitter.vld1(
        DataType::Bits32,
        Operand::list(&register.narrow_parts()),
        Operand::deref(address, Some(64)),
    );
    Ok(register)
}

/// Lane `index` of a narrow or wide register holding int32 values.
fn int32_lane(register: Register, index: usize) -> Operand {
    match register {
        Register::Wide(_) if index >= 2 => Operand::lane(register.high(), (index - 2) as u8),
        Register::Wide(_) => Operand::lane(register.low(), index as u8),
        _ => Operand::lane(register, index as u8),
    }
}

/// Pairwise add the horizontally reduced aggregators of `row` into one
/// register holding the row's `cols` results.
fn reduce_row(
    cx: &mut KernelContext,
    aggregators: &[Register],
    row: usize,
    cols: usize,
) -> GenResult<Register> {
    let agg = &aggregators[row * cols..(row + 1) * cols];
    let e = &mut cx.emitter;
    match cols {
        1 => {
            let register = cx.registers.allocate_narrow(0)?;
            e.vpadd(DataType::U32, register, agg[0].low(), agg[0].low());
            Ok(register)
        }
        2 => {
            let register = cx.registers.allocate_narrow(0)?;
            e.vpadd(DataType::U32, register, agg[0].low(), agg[1].low());
            Ok(register)
        }
        3 => {
            let register = cx.registers.allocate_wide(0)?;
            e.vpadd(DataType::U32, register.low(), agg[0].low(), agg[1].low());
            e.vpadd(DataType::U32, register.high(), agg[2].low(), agg[2].low());
            Ok(register)
        }
        _ => {
            let register = cx.registers.allocate_wide(0)?;
            e.vpadd(DataType::U32, register.low(), agg[0].low(), agg[1].low());
            e.vpadd(DataType::U32, register.high(), agg[2].low(), agg[3].low());
            Ok(register)
        }
    }
}

fn store_row(
    cx: &mut KernelContext,
    row: Register,
    cols: usize,
    result: &OperandRef,
    result_stride: &OperandRef,
) {
    let e = &mut cx.emitter;
    match cols {
        1 => e.vst1(
            DataType::Bits32,
            Operand::List(vec![Operand::lane(row, 0)]),
            Operand::deref_stride(result, result_stride),
        ),
        2 => e.vst1(
            DataType::Bits32,
            Operand::list(&[row]),
            Operand::deref_stride(result, result_stride),
        ),
        3 => {
            e.vst1(
                DataType::Bits32,
                Operand::list(&[row.low()]),
                Operand::deref_increment(result, None),
            );
            e.vst1(
                DataType::Bits32,
                Operand::List(vec![Operand::lane(row.high(), 0)]),
                Operand::deref_stride(result, result_stride),
            );
        }
        _ => e.vst1(
            DataType::Bits32,
            Operand::list(&[row.low(), row.high()]),
            Operand::deref_stride(result, result_stride),
        ),
    }
}

fn reduce_and_store(
    cx: &mut KernelContext,
    shape: &MulShape,
    aggregators: Vec<Register>,
    left_address: &OperandRef,
    right_address: &OperandRef,
) -> GenResult<()> {
    let (rows, cols) = (shape.rows, shape.cols);
    let result = cx.registers.bind_parameter("result", AccessMode::ReadWrite);
    let stride_mode = if cols == 3 {
        AccessMode::ReadWrite
    } else {
        AccessMode::Input
    };
    let result_stride = cx.registers.bind_parameter("result_stride", stride_mode);

    cx.emitter.blank();
    cx.emitter.comment("Load offsets and scale.");
    let rhs_offsets = if shape.rhs_add {
        Some(read_params(cx, right_address, cols)?)
    } else {
        None
    };
    let lhs_offsets = if shape.lhs_add {
        Some(read_params(cx, left_address, rows)?)
    } else {
        None
    };
    let scale = if shape.result == NumericType::Float {
        let result_scale = cx
            .registers
            .bind_parameter("result_scale", AccessMode::Input);
        let scale = cx.registers.allocate_wide(PARAMS_MIN_WIDE)?;
        cx.emitter.vdup(DataType::Bits32, scale, &result_scale);
        Some(scale)
    } else {
        None
    };

    if cols == 3 {
        cx.emitter.blank();
        cx.emitter
            .comment("Change stride because storing in two ops.");
        cx.emitter
            .sub(&result_stride, &result_stride, Operand::imm(8));
    }

    cx.emitter.blank();
    cx.emitter.comment("Horizontal reduce aggregators.");
    for aggregator in &aggregators {
        cx.emitter
            .vpadd(DataType::U32, aggregator.low(), aggregator.low(), aggregator.high());
    }

    cx.emitter.blank();
    cx.emitter.comment("Reduce rows.");
    let mut row_results = Vec::with_capacity(rows);
    for row in 0..rows {
        row_results.push(reduce_row(cx, &aggregators, row, cols)?);
    }
    cx.registers.free_all(aggregators)?;

    if let Some(lhs_offsets) = lhs_offsets {
        cx.emitter.blank();
        cx.emitter.comment("Add lhs offsets to aggregated rows.");
        for (row, register) in row_results.iter().enumerate() {
            let broadcast = match register {
                Register::Wide(_) => cx.registers.allocate_wide(0)?,
                _ => cx.registers.allocate_narrow(0)?,
            };
            cx.emitter
                .vdup(DataType::Bits32, broadcast, int32_lane(lhs_offsets, row));
            cx.emitter
                .vadd(DataType::S32, *register, *register, broadcast);
            cx.registers.free(broadcast)?;
        }
    }

    if let Some(rhs_offsets) = rhs_offsets {
        cx.emitter.blank();
        cx.emitter.comment("Add rhs offset to aggregated rows.");
        for register in &row_results {
            cx.emitter
                .vadd(DataType::S32, *register, *register, rhs_offsets);
        }
    }

    if let Some(scale) = scale {
        cx.emitter.blank();
        cx.emitter.comment("Convert to float and scale.");
        for register in &row_results {
            let scale = match register {
                Register::Wide(_) => scale,
                _ => scale.low(),
            };
            cx.emitter
                .vcvt(DataType::F32, DataType::S32, *register, *register);
            cx.emitter
                .vmul(DataType::F32, *register, *register, scale);
        }
    }

    cx.emitter.blank();
    cx.emitter.comment("Store reduced rows.");
    for register in &row_results {
        store_row(cx, *register, cols, &result, &result_stride);
    }

    for register in [rhs_offsets, lhs_offsets, scale].into_iter().flatten() {
        cx.registers.free(register)?;
    }
    cx.registers.free_all(row_results)
}
