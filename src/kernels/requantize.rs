// This module generates the requantize kernel, int32 to uint8 through
// `u8 = sat(offset + x * coefficient)` in float, as a two-stage software pipeline. Twelve wide
// registers are split into one load bank and two output banks, A and B. Every stage multiplies
// the block loaded by the previous stage into the output bank that was seeded with the offset,
// while it loads the next block and seeds the other bank; the banks swap roles every stage. The
// loop is unrolled twice so the swap needs no register moves.
//
// Control flow (L = leftover):
//
//   subs count, L ; beq 4f          count == L: nothing pending
//   subs count, 16; load, seed A    prologue
//   beq 2f
// 1: part A: process A, load, seed B; beq 3f
//    part B: process B, load, seed A; bne 1b
// 2: tail A: process A, load L, seed B; process L of B; b 5f
// 3: tail B: process B, load L, seed A; process L of A; b 5f
// 4: tail C: load L, seed A; process L of A
// 5:
//
// Every exit from the loop leaves exactly one block pending, in A at label 2 and in B at label
// 3; tail C is only reached with nothing pending.

//! Software-pipelined requantize kernel.

use crate::core::error::GenResult;
use crate::core::register_pool::{AccessMode, OperandRef, Register};
use crate::neon::instruction::{DataType, Operand};
use crate::neon::memory::{load_elements, store_elements};

use super::context::KernelContext;
use super::shape::TRANSFORM_BLOCK;
use super::transform::{bind_stream, broadcast, emit_narrow};

/// Values per wide register.
const LANES: usize = 4;

/// Bank registers per block of 16 values.
const BANK_SIZE: usize = TRANSFORM_BLOCK / LANES;

fn declare_locals(cx: &mut KernelContext) {
    let e = &mut cx.emitter;
    e.declare(
        "const float",
        "coefficient",
        "params.one_over_output_range_scale * params.input_range_scale",
    );
    e.declare(
        "const float",
        "offset",
        "params.one_over_output_range_scale * (params.input_range_min - \
         params.output_range_min - params.input_range_scale * params.input_range_offset)",
    );
}

/// Registers and addresses every stage works on.
struct Pipeline {
    loads: Vec<Register>,
    coefficient: Register,
    offset: Register,
    input: OperandRef,
    output: OperandRef,
}

impl Pipeline {
    /// Process `process_number` values pending in `process` while loading
    /// `load_number` new values and seeding `next` with the offset.
    fn stage(
        &self,
        cx: &mut KernelContext,
        process: &[Register],
        next: &[Register],
        process_number: usize,
        load_number: usize,
    ) -> GenResult<()> {
        let loads = load_number.div_ceil(LANES);
        let procs = process_number.div_ceil(LANES);

        let mut remaining = load_number;
        for i in 0..loads.max(procs) {
            if i < procs {
                cx.emitter
                    .vfma(DataType::F32, process[i], self.loads[i], self.coefficient);
            }
            if i < loads {
                let count = remaining.min(LANES);
                remaining -= count;
                cx.emitter.vmov(DataType::F32, next[i], self.offset);
                load_elements(
                    &mut cx.emitter,
                    32,
                    count,
                    &self.loads[i..=i],
                    &self.input,
                    None,
                )?;
            }
        }

        for register in &process[..procs] {
            cx.emitter
                .vcvt(DataType::S32, DataType::F32, *register, *register);
        }
        for register in &self.loads[..loads] {
            cx.emitter
                .vcvt(DataType::F32, DataType::S32, *register, *register);
        }

        emit_narrow(cx, &process[..procs]);
        store_elements(
            &mut cx.emitter,
            8,
            process_number,
            process,
            &self.output,
            None,
        )
    }
}

fn allocate_bank(cx: &mut KernelContext) -> GenResult<Vec<Register>> {
    let mut bank = Vec::with_capacity(BANK_SIZE);
    for _ in 0..BANK_SIZE {
        bank.push(cx.registers.allocate_wide(0)?);
    }
    Ok(bank)
}

pub(crate) fn emit(cx: &mut KernelContext, leftover: usize) -> GenResult<()> {
    let (count, input, output) = bind_stream(cx);
    declare_locals(cx);

    cx.asm_block(|cx| {
        let loads = allocate_bank(cx)?;
        let a = allocate_bank(cx)?;
        let b = allocate_bank(cx)?;

        cx.emitter.comment("Requantize::Prepare");
        let coefficient = cx
            .registers
            .bind_parameter("coefficient", AccessMode::Input);
        let offset = cx.registers.bind_parameter("offset", AccessMode::Input);
        let pipeline = Pipeline {
            loads,
            coefficient: broadcast(cx, DataType::Bits32, &coefficient, 0)?,
            offset: broadcast(cx, DataType::Bits32, &offset, 0)?,
            input,
            output,
        };
        let block = TRANSFORM_BLOCK as i32;

        cx.emitter.blank();
        cx.emitter.comment("Reduce count by leftovers.");
        cx.emitter
            .subs(&count, &count, Operand::imm(leftover as i32));
        cx.emitter.beq_forward(4);

        cx.emitter.blank();
        cx.emitter.comment("Prepare initial values.");
        cx.emitter.subs(&count, &count, Operand::imm(block));
        pipeline.stage(cx, &b, &a, 0, TRANSFORM_BLOCK)?;
        cx.emitter.beq_forward(2);

        cx.section(Some("Requantize::Transform"), Some(1), |cx| {
            cx.emitter.comment("Loop part A.");
            cx.emitter.subs(&count, &count, Operand::imm(block));
            pipeline.stage(cx, &a, &b, TRANSFORM_BLOCK, TRANSFORM_BLOCK)?;
            cx.emitter.beq_forward(3);

            cx.emitter.blank();
            cx.emitter.comment("Loop part B.");
            cx.emitter.subs(&count, &count, Operand::imm(block));
            pipeline.stage(cx, &b, &a, TRANSFORM_BLOCK, TRANSFORM_BLOCK)?;
            cx.emitter.bne_back(1);
            Ok(())
        })?;

        for (label, name, first, second) in [(2, "A", &a, &b), (3, "B", &b, &a)] {
            cx.section(Some(format!("Requantize::Tail {name}").as_str()), Some(label), |cx| {
                pipeline.stage(cx, first, second, TRANSFORM_BLOCK, leftover)?;
                cx.emitter.blank();
                pipeline.stage(cx, second, first, leftover, 0)?;
                cx.emitter.b_forward(5);
                Ok(())
            })?;
        }

        cx.section(Some("Requantize::Tail C"), Some(4), |cx| {
            pipeline.stage(cx, &b, &a, 0, leftover)?;
            pipeline.stage(cx, &a, &b, leftover, 0)
        })?;

        cx.emitter.blank();
        cx.emitter.comment("Requantize::Return");
        cx.emitter.label(5);

        cx.registers.free_all(pipeline.loads.iter().copied())?;
        cx.registers.free_all(a)?;
        cx.registers.free_all(b)?;
        cx.registers
            .free_all([pipeline.coefficient, pipeline.offset])
    })
}

#[cfg(test)]
mod tests {
    use crate::kernels::context::{GenOptions, Kernel};
    use crate::kernels::shape::{TransformKind, TransformShape};
    use crate::kernels::transform::generate;
    use crate::neon::emitter::Line;

    fn requantize(leftover: usize) -> Kernel {
        generate(
            &TransformShape {
                kind: TransformKind::Requantize,
                leftover,
            },
            &GenOptions::default(),
        )
        .unwrap()
    }

    fn listing(kernel: &Kernel) -> Vec<String> {
        kernel.instructions().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_every_label_defined_once() {
        let kernel = requantize(5);
        let labels: Vec<u32> = kernel
            .lines
            .iter()
            .filter_map(|l| match l.line {
                Line::Label(label) => Some(label),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_prologue_seeds_bank_a() {
        let kernel = requantize(5);
        let listing = listing(&kernel);
        assert_eq!(
            &listing[..8],
            &[
                "vdup.32 q12, %[coefficient]",
                "vdup.32 q13, %[offset]",
                "subs %[count], %[count], #5",
                "beq 4f",
                "subs %[count], %[count], #16",
                "vmov.f32 q4, q13",
                "vld1.32 {d0, d1}, [%[input]]!",
                "vmov.f32 q5, q13",
            ]
        );
    }

    #[test]
    fn test_tail_c_drains_only_leftover() {
        let kernel = requantize(5);
        let listing = listing(&kernel);
        let tail: Vec<&str> = listing[listing.len() - 15..]
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(
            tail,
            vec![
                "vmov.f32 q4, q13",
                "vld1.32 {d0, d1}, [%[input]]!",
                "vmov.f32 q5, q13",
                "vld1.32 {d2[0]}, [%[input]]!",
                "vcvt.f32.s32 q0, q0",
                "vcvt.f32.s32 q1, q1",
                "vfma.f32 q4, q0, q12",
                "vfma.f32 q5, q1, q12",
                "vcvt.s32.f32 q4, q4",
                "vcvt.s32.f32 q5, q5",
                "vqmovn.s32 d8, q4",
                "vqmovn.s32 d9, q5",
                "vqmovun.s16 d8, q4",
                "vst1.32 {d8[0]}, [%[output]]!",
                "vst1.8 {d8[4]}, [%[output]]!",
            ]
        );
        assert_eq!(listing[listing.len() - 16], "b 5f");
    }

    #[test]
    fn test_zero_leftover_keeps_all_paths() {
        let kernel = requantize(0);
        let listing = listing(&kernel);
        assert!(listing.contains(&"subs %[count], %[count], #0".to_string()));
        assert!(listing.contains(&"beq 4f".to_string()));
        assert_eq!(listing.iter().filter(|l| *l == "b 5f").count(), 2);
        assert_eq!(
            kernel.binding("count").map(|b| b.expression.as_str()),
            Some("params_count_copy")
        );
        assert_eq!(kernel.ever_allocated.len(), 28);
    }
}
