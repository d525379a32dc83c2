//! Structural invariants over every enumerated kernel: register accounting,
//! clobber lists, operand bindings and label references.

mod common;

use hashbrown::HashSet;
use metagen::core::register_pool::{AccessMode, Register};
use metagen::enumerate;
use metagen::kernels::Kernel;
use metagen::neon::emitter::Line;
use metagen::neon::instruction::{Direction, Opcode, Operand, PostIndex};
use metagen::{GenOptions, GenerationSession};

fn all_kernels() -> Vec<Kernel> {
    let session = GenerationSession::new(GenOptions { checked: true });
    enumerate::all_shapes()
        .iter()
        .map(|shape| {
            session
                .generate(shape)
                .unwrap_or_else(|e| panic!("{}: {e}", shape.name()))
        })
        .collect()
}

/// Narrow halves (or the general register itself) of a register.
fn parts(register: Register) -> Vec<Register> {
    match register {
        Register::General(_) => vec![register],
        _ => register.narrow_parts(),
    }
}

/// Parameters an instruction writes.
fn written_params(opcode: Opcode, operands: &[Operand]) -> Vec<String> {
    let mut written = Vec::new();
    if matches!(opcode, Opcode::Add | Opcode::Sub | Opcode::Subs | Opcode::Mov) {
        if let Some(Operand::Param(name)) = operands.first() {
            written.push(name.clone());
        }
    }
    for operand in operands {
        if let Operand::Mem {
            base: metagen::OperandRef::Param(name),
            post: PostIndex::Writeback | PostIndex::Stride(_),
            ..
        } = operand
        {
            written.push(name.clone());
        }
    }
    written
}

#[test]
fn test_every_shape_generates_without_leaks() {
    common::init_logging();
    let session = GenerationSession::default();
    let set = enumerate::generate_all(&session, &enumerate::all_shapes());
    assert!(set.failures.is_empty(), "{:?}", set.failures);
    assert_eq!(set.names.len(), 206);
    assert_eq!(session.stats().kernels_generated, 206);
}

#[test]
fn test_clobbers_are_ever_allocated_plus_side_effects() {
    common::init_logging();
    for kernel in all_kernels() {
        let mut expected: Vec<String> = kernel
            .ever_allocated
            .iter()
            .map(Register::to_string)
            .collect();
        expected.push("cc".to_string());
        expected.push("memory".to_string());
        assert_eq!(kernel.clobbers, expected, "{}", kernel.name);
    }
}

#[test]
fn test_referenced_registers_were_allocated() {
    common::init_logging();
    for kernel in all_kernels() {
        let allocated: HashSet<Register> = kernel.ever_allocated.iter().copied().collect();
        for inst in kernel.instructions() {
            for operand in &inst.operands {
                for register in operand.registers() {
                    for part in parts(register) {
                        assert!(
                            allocated.contains(&part),
                            "{}: `{inst}` uses {part} which was never allocated",
                            kernel.name
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_parameters_bound_once_and_written_only_when_read_write() {
    common::init_logging();
    for kernel in all_kernels() {
        let mut names = HashSet::new();
        for binding in &kernel.bindings {
            assert!(
                names.insert(binding.name.clone()),
                "{}: {} bound twice",
                kernel.name,
                binding.name
            );
        }

        for inst in kernel.instructions() {
            for operand in &inst.operands {
                for param in operand.params() {
                    assert!(
                        kernel.binding(param).is_some(),
                        "{}: `{inst}` uses unbound {param}",
                        kernel.name
                    );
                }
            }
            for param in written_params(inst.opcode, &inst.operands) {
                let binding = kernel.binding(&param).unwrap();
                assert_eq!(
                    binding.mode,
                    AccessMode::ReadWrite,
                    "{}: `{inst}` writes input {param}",
                    kernel.name
                );
            }
        }
    }
}

#[test]
fn test_branches_target_existing_labels() {
    common::init_logging();
    for kernel in all_kernels() {
        let lines: Vec<&Line> = kernel.lines.iter().map(|l| &l.line).collect();
        for (index, line) in lines.iter().enumerate() {
            let Line::Instruction(inst) = line else {
                continue;
            };
            let Some(Operand::Label(label, direction)) = inst.operands.first() else {
                continue;
            };
            let is_target = |l: &&Line| matches!(l, Line::Label(n) if n == label);
            let found = match direction {
                Direction::Back => lines[..index].iter().any(is_target),
                Direction::Forward => lines[index + 1..].iter().any(is_target),
            };
            assert!(found, "{}: `{inst}` has no target", kernel.name);
        }
    }
}

#[test]
fn test_rendered_routine_shape() {
    common::init_logging();
    for kernel in all_kernels() {
        let text = kernel.to_string();
        assert!(
            text.starts_with(&format!("inline void {}(", kernel.name)),
            "{}",
            kernel.name
        );
        assert!(text.contains("asm volatile("));
        assert!(text.trim_end().ends_with('}'));
        assert!(text.contains("\"cc\", \"memory\");"));
        assert!(kernel.instruction_count() > 0);
    }
}
