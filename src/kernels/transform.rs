// This module generates the one-dimensional elementwise transform kernels. All of them walk
// `params.count` elements in blocks of 16 and finish with one partial block of `leftover`
// elements, loading and storing through the piecewise element transfers in neon::memory.
// MinMax, Quantize and Dequantize share one block-loop driver and differ only in their
// Transformation: which scalars they broadcast up front and what they do to one block. BiasAdd
// adds an outer loop over `params.rows` rows that all reuse the same bias row, and Requantize has
// its own software-pipelined driver in the requantize module. The mutable counters are bound
// through local copies declared in the host function before the asm block opens.

//! Elementwise transform kernels.

use log::debug;

use crate::core::error::GenResult;
use crate::core::register_pool::{AccessMode, OperandRef, Register};
use crate::neon::instruction::{DataType, Operand};
use crate::neon::memory::{load_elements, store_elements};

use super::context::{GenOptions, Kernel, KernelContext};
use super::requantize;
use super::shape::{TransformKind, TransformShape, TRANSFORM_BLOCK};

/// Broadcast scalars of MinMax, Quantize and Dequantize start at q4.
const BROADCAST_MIN_WIDE: u8 = 4;

/// BiasAdd keeps its scalars in q12..q14, above its 12 block registers.
const BIAS_ADD_MIN_WIDE: u8 = 12;

/// Host signature `(const In* input, const Params& params, Out* output)`.
fn signature(kind: TransformKind) -> Vec<(String, &'static str)> {
    vec![
        (format!("const {}*", kind.input().host_type()), "input"),
        (format!("const {}&", kind.params_type()), "params"),
        (format!("{}*", kind.output().host_type()), "output"),
    ]
}

/// Generate one transform kernel.
pub fn generate(shape: &TransformShape, options: &GenOptions) -> GenResult<Kernel> {
    shape.validate()?;
    let name = shape.name();
    debug!("generating {name}");

    let signature = signature(shape.kind);
    let params: Vec<(&str, &str)> = signature
        .iter()
        .map(|(ty, name)| (ty.as_str(), *name))
        .collect();

    let mut cx = KernelContext::new(options);
    cx.function(&name, &params, |cx| {
        emit_preconditions(cx, shape);
        match shape.kind {
            TransformKind::MinMax => emit_block_loop::<MinMax>(cx, shape.leftover),
            TransformKind::Quantize => emit_block_loop::<Quantize>(cx, shape.leftover),
            TransformKind::Dequantize => emit_block_loop::<Dequantize>(cx, shape.leftover),
            TransformKind::Requantize => requantize::emit(cx, shape.leftover),
            TransformKind::BiasAdd => emit_bias_add(cx, shape.leftover),
        }
    })?;
    cx.finish(name)
}

fn emit_preconditions(cx: &mut KernelContext, shape: &TransformShape) {
    let e = &mut cx.emitter;
    e.assert(&format!(
        "params.count % {TRANSFORM_BLOCK} == {}",
        shape.leftover
    ));
    match shape.kind {
        TransformKind::Requantize => {}
        TransformKind::BiasAdd => e.assert("params.rows > 0"),
        _ if shape.leftover == 0 => e.assert(&format!("params.count >= {TRANSFORM_BLOCK}")),
        _ => {}
    }
}

/// Declare the mutable count copy and bind it together with the input and
/// output addresses.
pub(crate) fn bind_stream(cx: &mut KernelContext) -> (OperandRef, OperandRef, OperandRef) {
    cx.emitter
        .declare("int", "params_count_copy", "params.count");
    let count = cx.registers.bind_parameter_expr(
        "count",
        "params_count_copy",
        AccessMode::ReadWrite,
    );
    let input = cx.registers.bind_parameter("input", AccessMode::ReadWrite);
    let output = cx.registers.bind_parameter("output", AccessMode::ReadWrite);
    (count, input, output)
}

/// Broadcast a scalar parameter to every lane of a wide register.
pub(crate) fn broadcast(
    cx: &mut KernelContext,
    dt: DataType,
    param: &OperandRef,
    min_index: u8,
) -> GenResult<Register> {
    let register = cx.registers.allocate_wide(min_index)?;
    cx.emitter.vdup(dt, register, param);
    Ok(register)
}

/// Wide registers needed for `elements` values of `bits` bits.
fn register_count(elements: usize, bits: u32) -> usize {
    let per_register = 128 / bits as usize;
    elements.div_ceil(per_register)
}

fn allocate_block(cx: &mut KernelContext, count: usize) -> GenResult<Vec<Register>> {
    let mut registers = Vec::with_capacity(count);
    for _ in 0..count {
        registers.push(cx.registers.allocate_wide(0)?);
    }
    Ok(registers)
}

/// Saturating narrow of up to four wide registers of int32 into uint8 bytes
/// starting at `regs[0].low()`.
pub(crate) fn emit_narrow(cx: &mut KernelContext, regs: &[Register]) {
    let e = &mut cx.emitter;
    for pair in regs.chunks(2) {
        e.vqmovn(DataType::S32, pair[0].low(), pair[0]);
        if let Some(second) = pair.get(1) {
            e.vqmovn(DataType::S32, pair[0].high(), *second);
        }
    }
    if let Some(first) = regs.first() {
        e.vqmovun(DataType::S16, first.low(), *first);
        if let Some(third) = regs.get(2) {
            e.vqmovun(DataType::S16, first.high(), *third);
        }
    }
}

/// One step of a widening sequence: `vmovl.{dt} dst, src`.
type Widen = (DataType, Register, Register);

/// Groups of `vmovl` steps widening the bytes in `regs[0]` to int32 lanes
/// across `regs`. Within a group the upper half is read before the lower
/// half of the same register is overwritten.
fn widen_groups(regs: &[Register]) -> Vec<Vec<Widen>> {
    let (u8, s16) = (DataType::U8, DataType::S16);
    match regs {
        [r0] => vec![vec![(u8, *r0, r0.low())], vec![(s16, *r0, r0.low())]],
        [r0, r1] => vec![
            vec![(u8, *r0, r0.low())],
            vec![(s16, *r1, r0.high()), (s16, *r0, r0.low())],
        ],
        [r0, r1, r2] => vec![
            vec![(u8, *r1, r0.high()), (u8, *r0, r0.low())],
            vec![(s16, *r2, r1.low())],
            vec![(s16, *r1, r0.high()), (s16, *r0, r0.low())],
        ],
        [r0, r1, r2, r3] => vec![
            vec![(u8, *r1, r0.high()), (u8, *r0, r0.low())],
            vec![(s16, *r3, r1.high()), (s16, *r2, r1.low())],
            vec![(s16, *r1, r0.high()), (s16, *r0, r0.low())],
        ],
        _ => Vec::new(),
    }
}

fn emit_widen_group(cx: &mut KernelContext, group: &[Widen]) {
    for &(dt, dst, src) in group {
        cx.emitter.vmovl(dt, dst, src);
    }
}

/// Block body of a kernel driven by [`emit_block_loop`].
trait Transformation: Sized {
    const NAME: &'static str;

    /// Bind and broadcast the scalar parameters.
    fn prepare(cx: &mut KernelContext) -> GenResult<Self>;

    /// Transform `elements` values read from `input` and written to `output`.
    fn transform(
        &self,
        cx: &mut KernelContext,
        input: &OperandRef,
        elements: usize,
        output: &OperandRef,
    ) -> GenResult<()>;

    /// Registers allocated by `prepare`.
    fn broadcasts(&self) -> Vec<Register>;
}

/// Blocks of 16 after label 1, then the leftover block after label 2.
fn emit_block_loop<T: Transformation>(cx: &mut KernelContext, leftover: usize) -> GenResult<()> {
    let (count, input, output) = bind_stream(cx);
    cx.asm_block(|cx| {
        cx.emitter.blank();
        cx.emitter.comment(&format!("{}::Prepare", T::NAME));
        let transformation = T::prepare(cx)?;

        if leftover > 0 {
            cx.emitter.blank();
            cx.emitter.comment("Reduce count by leftovers.");
            cx.emitter
                .subs(&count, &count, Operand::imm(leftover as i32));
            cx.emitter.beq_forward(2);
        }

        cx.section(None, Some(1), |cx| {
            cx.emitter
                .subs(&count, &count, Operand::imm(TRANSFORM_BLOCK as i32));
            transformation.transform(cx, &input, TRANSFORM_BLOCK, &output)?;
            cx.emitter.blank();
            cx.emitter.bne_back(1);
            Ok(())
        })?;

        if leftover > 0 {
            cx.section(Some("Handle leftovers."), Some(2), |cx| {
                transformation.transform(cx, &input, leftover, &output)
            })?;
        }

        cx.registers.free_all(transformation.broadcasts())
    })
}

/// Clamp bytes to `[params.min, params.max]`.
struct MinMax {
    min: Register,
    max: Register,
}

impl Transformation for MinMax {
    const NAME: &'static str = "MinMax";

    fn prepare(cx: &mut KernelContext) -> GenResult<Self> {
        let min = cx
            .registers
            .bind_parameter_expr("min", "params.min", AccessMode::Input);
        let max = cx
            .registers
            .bind_parameter_expr("max", "params.max", AccessMode::Input);
        Ok(Self {
            min: broadcast(cx, DataType::Bits8, &min, BROADCAST_MIN_WIDE)?,
            max: broadcast(cx, DataType::Bits8, &max, BROADCAST_MIN_WIDE)?,
        })
    }

    fn transform(
        &self,
        cx: &mut KernelContext,
        input: &OperandRef,
        elements: usize,
        output: &OperandRef,
    ) -> GenResult<()> {
        cx.emitter.blank();
        cx.emitter.comment("MinMax::Transform");
        let block = allocate_block(cx, register_count(elements, 8))?;
        load_elements(&mut cx.emitter, 8, elements, &block, input, None)?;
        cx.emitter.pld_offset(input, 16);

        for register in &block {
            cx.emitter
                .vmax(DataType::U8, *register, *register, self.min);
        }
        for register in &block {
            cx.emitter
                .vmin(DataType::U8, *register, *register, self.max);
        }

        cx.emitter.blank();
        store_elements(&mut cx.emitter, 8, elements, &block, output, None)?;
        cx.emitter.pld(output);
        cx.registers.free_all(block)
    }

    fn broadcasts(&self) -> Vec<Register> {
        vec![self.min, self.max]
    }
}

/// Range parameters shared by Quantize and Dequantize.
struct Range {
    min: Register,
    offset: Register,
    scale: Register,
}

impl Range {
    fn prepare(cx: &mut KernelContext) -> GenResult<Self> {
        let mut next = |name: &str| -> GenResult<Register> {
            let param = cx.registers.bind_parameter_expr(
                name,
                &format!("params.{name}"),
                AccessMode::Input,
            );
            broadcast(cx, DataType::Bits32, &param, BROADCAST_MIN_WIDE)
        };
        Ok(Self {
            min: next("range_min")?,
            offset: next("range_offset")?,
            scale: next("range_scale")?,
        })
    }

    fn registers(&self) -> Vec<Register> {
        vec![self.min, self.offset, self.scale]
    }
}

/// `u8 = sat((x - range_min) * range_scale + range_offset)` for float `x`.
struct Quantize(Range);

impl Transformation for Quantize {
    const NAME: &'static str = "Quantize";

    fn prepare(cx: &mut KernelContext) -> GenResult<Self> {
        Range::prepare(cx).map(Quantize)
    }

    fn transform(
        &self,
        cx: &mut KernelContext,
        input: &OperandRef,
        elements: usize,
        output: &OperandRef,
    ) -> GenResult<()> {
        let range = &self.0;
        cx.emitter.blank();
        cx.emitter.comment("Quantize::Transform");
        let block = allocate_block(cx, register_count(elements, 32))?;
        load_elements(&mut cx.emitter, 32, elements, &block, input, None)?;
        cx.emitter.pld_offset(input, 64);

        for register in &block {
            cx.emitter
                .vsub(DataType::F32, *register, *register, range.min);
        }
        for register in &block {
            cx.emitter
                .vmul(DataType::F32, *register, *register, range.scale);
        }
        for register in &block {
            cx.emitter
                .vadd(DataType::F32, *register, *register, range.offset);
        }
        for register in &block {
            cx.emitter
                .vcvt(DataType::S32, DataType::F32, *register, *register);
        }
        emit_narrow(cx, &block);

        cx.emitter.blank();
        store_elements(&mut cx.emitter, 8, elements, &block, output, None)?;
        cx.emitter.pld(output);
        cx.registers.free_all(block)
    }

    fn broadcasts(&self) -> Vec<Register> {
        self.0.registers()
    }
}

/// `f = (x - range_offset) * range_scale + range_min` for byte `x`.
struct Dequantize(Range);

impl Transformation for Dequantize {
    const NAME: &'static str = "Dequantize";

    fn prepare(cx: &mut KernelContext) -> GenResult<Self> {
        Range::prepare(cx).map(Dequantize)
    }

    fn transform(
        &self,
        cx: &mut KernelContext,
        input: &OperandRef,
        elements: usize,
        output: &OperandRef,
    ) -> GenResult<()> {
        let range = &self.0;
        cx.emitter.blank();
        cx.emitter.comment("Dequantize::Transform");
        let block = allocate_block(cx, register_count(elements, 32))?;
        load_elements(&mut cx.emitter, 8, elements, &block, input, None)?;
        cx.emitter.pld_offset(input, 32);

        for group in widen_groups(&block) {
            emit_widen_group(cx, &group);
        }
        for register in &block {
            cx.emitter
                .vcvt(DataType::F32, DataType::S32, *register, *register);
        }
        for register in &block {
            cx.emitter
                .vsub(DataType::F32, *register, *register, range.offset);
        }
        for register in &block {
            cx.emitter
                .vmul(DataType::F32, *register, *register, range.scale);
        }
        for register in &block {
            cx.emitter
                .vadd(DataType::F32, *register, *register, range.min);
        }

        cx.emitter.blank();
        store_elements(&mut cx.emitter, 32, elements, &block, output, None)?;
        cx.emitter.pld(output);
        cx.registers.free_all(block)
    }

    fn broadcasts(&self) -> Vec<Register> {
        self.0.registers()
    }
}

/// Scalars of a BiasAdd kernel.
struct BiasAddParams {
    offset: Register,
    coeff_input: Register,
    coeff_bias: Register,
}

fn declare_bias_add_locals(cx: &mut KernelContext) {
    let e = &mut cx.emitter;
    e.declare("int", "params_rows_copy", "params.rows");
    e.declare(
        "const float",
        "coeff_input",
        "params.input_range_scale * params.one_over_output_range_scale",
    );
    e.declare(
        "const float",
        "coeff_bias",
        "params.bias_range_scale * params.one_over_output_range_scale",
    );
    e.declare(
        "const float",
        "offset",
        "params.output_range_offset + params.one_over_output_range_scale * \
         (params.input_range_min + params.bias_range_min - params.output_range_min)",
    );
}

/// Every row of `params.rows` rows of `params.count` bytes is added to the
/// same bias row: `i32 = offset + x * coeff_input + bias * coeff_bias`.
fn emit_bias_add(cx: &mut KernelContext, leftover: usize) -> GenResult<()> {
    declare_bias_add_locals(cx);
    cx.asm_block(|cx| {
        let mut next = |name: &str| -> GenResult<Register> {
            let param = cx.registers.bind_parameter(name, AccessMode::Input);
            broadcast(cx, DataType::Bits32, &param, BIAS_ADD_MIN_WIDE)
        };
        let params = BiasAddParams {
            offset: next("offset")?,
            coeff_input: next("coeff_input")?,
            coeff_bias: next("coeff_bias")?,
        };

        let rows = cx.registers.bind_parameter_expr(
            "rows",
            "params_rows_copy",
            AccessMode::ReadWrite,
        );
        let count_param = cx
            .registers
            .bind_parameter_expr("count", "params.count", AccessMode::Input);
        let bias_param = cx
            .registers
            .bind_parameter_expr("bias", "params.bias", AccessMode::Input);
        let input = cx.registers.bind_parameter("input", AccessMode::ReadWrite);
        let output = cx.registers.bind_parameter("output", AccessMode::ReadWrite);

        let count = OperandRef::Register(cx.registers.allocate_general()?);
        let bias = OperandRef::Register(cx.registers.allocate_general()?);

        cx.section(Some("BiasAdd::Row"), Some(1), |cx| {
            cx.emitter.mov(&count, &count_param);
            cx.emitter.mov(&bias, &bias_param);
            if leftover > 0 {
                cx.emitter
                    .subs(&count, &count, Operand::imm(leftover as i32));
                cx.emitter.beq_forward(3);
            }

            cx.section(None, Some(2), |cx| {
                cx.emitter
                    .subs(&count, &count, Operand::imm(TRANSFORM_BLOCK as i32));
                emit_bias_add_block(cx, &params, &input, &bias, TRANSFORM_BLOCK, &output)?;
                cx.emitter.bne_back(2);
                Ok(())
            })?;

            if leftover > 0 {
                cx.section(None, Some(3), |cx| {
                    emit_bias_add_block(cx, &params, &input, &bias, leftover, &output)
                })?;
            }

            cx.emitter.blank();
            cx.emitter.subs(&rows, &rows, Operand::imm(1));
            cx.emitter.bne_back(1);
            Ok(())
        })?;

        cx.registers.free_operand(&count)?;
        cx.registers.free_operand(&bias)?;
        cx.registers
            .free_all([params.offset, params.coeff_input, params.coeff_bias])
    })
}

fn emit_bias_add_block(
    cx: &mut KernelContext,
    params: &BiasAddParams,
    input: &OperandRef,
    bias: &OperandRef,
    elements: usize,
    output: &OperandRef,
) -> GenResult<()> {
    cx.emitter.blank();
    cx.emitter.comment("BiasAdd::Transform");
    let count = register_count(elements, 32);
    let load_input = allocate_block(cx, count)?;
    let load_bias = allocate_block(cx, count)?;
    let outputs = allocate_block(cx, count)?;

    load_elements(&mut cx.emitter, 8, elements, &load_input, input, None)?;
    load_elements(&mut cx.emitter, 8, elements, &load_bias, bias, None)?;

    // Widen input and bias group by group, seeding one accumulator with the
    // offset after each of the first `count` groups.
    let input_groups = widen_groups(&load_input);
    let bias_groups = widen_groups(&load_bias);
    let interleaved = input_groups
        .iter()
        .zip(&bias_groups)
        .flat_map(|(input, bias)| [input, bias]);
    for (step, group) in interleaved.enumerate() {
        emit_widen_group(cx, group);
        if let Some(accumulator) = outputs.get(step) {
            cx.emitter.vmov(DataType::F32, *accumulator, params.offset);
        }
    }

    for register in load_input.iter().chain(&load_bias) {
        cx.emitter
            .vcvt(DataType::F32, DataType::S32, *register, *register);
    }
    for (accumulator, value) in outputs.iter().zip(&load_input) {
        cx.emitter
            .vfma(DataType::F32, *accumulator, *value, params.coeff_input);
    }
    for (accumulator, value) in outputs.iter().zip(&load_bias) {
        cx.emitter
            .vfma(DataType::F32, *accumulator, *value, params.coeff_bias);
    }
    for accumulator in &outputs {
        cx.emitter
            .vcvt(DataType::S32, DataType::F32, *accumulator, *accumulator);
    }

    cx.emitter.blank();
    store_elements(&mut cx.emitter, 32, elements, &outputs, output, None)?;
    cx.registers.free_all(outputs)?;
    cx.registers.free_all(load_input)?;
    cx.registers.free_all(load_bias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neon::emitter::Line;

    fn shape(kind: TransformKind, leftover: usize) -> TransformShape {
        TransformShape { kind, leftover }
    }

    fn listing(kernel: &Kernel) -> Vec<String> {
        kernel.instructions().map(|i| i.to_string()).collect()
    }

    fn narrowing(regs: &[Register]) -> Vec<String> {
        let mut cx = KernelContext::new(&GenOptions::default());
        cx.emitter.begin_asm_block();
        emit_narrow(&mut cx, regs);
        cx.emitter
            .lines()
            .iter()
            .filter_map(|l| match &l.line {
                Line::Instruction(inst) => Some(inst.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_narrow_four_registers() {
        let regs: Vec<Register> = (0..4).map(Register::Wide).collect();
        assert_eq!(
            narrowing(&regs),
            vec![
                "vqmovn.s32 d0, q0",
                "vqmovn.s32 d1, q1",
                "vqmovn.s32 d4, q2",
                "vqmovn.s32 d5, q3",
                "vqmovun.s16 d0, q0",
                "vqmovun.s16 d1, q2",
            ]
        );
        assert_eq!(
            narrowing(&regs[..1]),
            vec!["vqmovn.s32 d0, q0", "vqmovun.s16 d0, q0"]
        );
    }

    #[test]
    fn test_widen_reads_high_half_first() {
        let regs: Vec<Register> = (0..4).map(Register::Wide).collect();
        let groups = widen_groups(&regs);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0][0], (DataType::U8, Register::Wide(1), Register::Narrow(1)));
        assert_eq!(groups[1][0], (DataType::S16, Register::Wide(3), Register::Narrow(3)));
        assert_eq!(groups[2][1], (DataType::S16, Register::Wide(0), Register::Narrow(0)));
        assert_eq!(widen_groups(&regs[..1]).len(), 2);
    }

    #[test]
    fn test_minmax_listing() {
        let kernel = generate(&shape(TransformKind::MinMax, 0), &GenOptions::default()).unwrap();
        assert_eq!(kernel.name, "minmax_uint8_uint8_16_0");
        assert_eq!(
            listing(&kernel),
            vec![
                "vdup.8 q4, %[min]",
                "vdup.8 q5, %[max]",
                "subs %[count], %[count], #16",
                "vld1.32 {d0, d1}, [%[input]]!",
                "pld [%[input], #16]",
                "vmax.u8 q0, q0, q4",
                "vmin.u8 q0, q0, q5",
                "vst1.32 {d0, d1}, [%[output]]!",
                "pld [%[output]]",
                "bne 1b",
            ]
        );
        let text = kernel.to_string();
        assert!(text.starts_with(
            "inline void minmax_uint8_uint8_16_0(const std::uint8_t* input, \
             const MinMax<std::uint8_t>& params, std::uint8_t* output) {"
        ));
        assert!(text.contains("int params_count_copy = params.count;"));
        assert!(text.contains("[count] \"+r\"(params_count_copy)"));
        assert!(text.contains("[min] \"r\"(params.min)"));
    }

    #[test]
    fn test_leftover_branches_to_tail() {
        let kernel =
            generate(&shape(TransformKind::Quantize, 5), &GenOptions::default()).unwrap();
        let listing = listing(&kernel);
        assert_eq!(listing[3], "subs %[count], %[count], #5");
        assert_eq!(listing[4], "beq 2f");
        // 5 floats: two full doubles and one lane.
        assert!(listing.contains(&"vld1.32 {d0, d1}, [%[input]]!".to_string()));
        assert!(listing.contains(&"vld1.32 {d2[0]}, [%[input]]!".to_string()));
        // 5 bytes out: a word and a byte.
        assert!(listing.contains(&"vst1.32 {d0[0]}, [%[output]]!".to_string()));
        assert!(listing.contains(&"vst1.8 {d0[4]}, [%[output]]!".to_string()));
    }

    #[test]
    fn test_bias_add_row_loop() {
        let kernel = generate(&shape(TransformKind::BiasAdd, 3), &GenOptions::default()).unwrap();
        let listing = listing(&kernel);
        assert_eq!(
            &listing[..7],
            &[
                "vdup.32 q12, %[offset]",
                "vdup.32 q13, %[coeff_input]",
                "vdup.32 q14, %[coeff_bias]",
                "mov r0, %[count]",
                "mov r1, %[bias]",
                "subs r0, r0, #3",
                "beq 3f",
            ]
        );
        assert!(listing.contains(&"vfma.f32 q8, q0, q13".to_string()));
        assert!(listing.contains(&"vfma.f32 q8, q4, q14".to_string()));
        assert_eq!(listing[listing.len() - 2], "subs %[rows], %[rows], #1");
        assert_eq!(listing[listing.len() - 1], "bne 1b");

        assert_eq!(
            kernel.binding("rows").map(|b| b.mode),
            Some(AccessMode::ReadWrite)
        );
        assert_eq!(
            kernel.binding("count").map(|b| b.expression.as_str()),
            Some("params.count")
        );
        assert_eq!(kernel.ever_allocated[0], Register::General(0));
    }

    #[test]
    fn test_every_transform_releases_registers() {
        for kind in TransformKind::ALL {
            for leftover in 0..TRANSFORM_BLOCK {
                let kernel = generate(&shape(kind, leftover), &GenOptions { checked: true })
                    .unwrap_or_else(|e| panic!("{kind} {leftover}: {e}"));
                assert!(kernel.clobbers.ends_with(&["cc".to_string(), "memory".to_string()]));
            }
        }
    }
}
