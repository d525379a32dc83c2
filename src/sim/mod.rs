// This module implements a small interpreter for the generated kernels. It executes the
// structured instruction stream of a Kernel directly, without going through the rendered text,
// against a flat little-endian memory and the ARMv7 register file (r0..r15, d0..d31 with qN as a
// view over d2N/d2N+1, Z and N flags). Parameters bound by the asm block are looked up by name;
// read-write parameters are updated in place so tests can observe how far a kernel advanced its
// pointers and counters. Memory is only accessible inside explicit allocations, alignment
// qualifiers are enforced, and a step limit stops kernels that never leave their loop.

//! NEON kernel interpreter.
//!
//! # Architecture
//!
//! - `memory`: allocations and bounds-checked byte access
//! - `state`: general registers, the narrow vector file and flags
//! - `execute`: per-opcode semantics
//!
//! Labels are resolved the way the assembler resolves numeric local labels:
//! `1b` is the nearest preceding `1:` and `1f` the nearest following one.

pub mod execute;
pub mod memory;
pub mod state;

use hashbrown::HashMap;
use log::trace;
use thiserror::Error;

use crate::kernels::Kernel;
use crate::neon::emitter::Line;
use crate::neon::instruction::{Direction, Instruction};

use self::execute::Flow;
pub use self::memory::Memory;
pub use self::state::RegisterState;

/// Instructions executed before a run is abandoned.
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("parameter `{name}` has no value")]
    UnboundParameter { name: String },

    #[error("access of {len} bytes at {address:#x} is outside every allocation")]
    Unmapped { address: u32, len: usize },

    #[error("address {address:#x} is not aligned to {align} bits")]
    Misaligned { address: u32, align: u32 },

    #[error("label {label} not found ({direction:?})")]
    MissingLabel { label: u32, direction: Direction },

    #[error("step limit of {limit} instructions exceeded")]
    StepLimit { limit: usize },

    #[error("unsupported operands: {instruction}")]
    MalformedOperands { instruction: String },
}

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Clone, Copy)]
enum Step<'k> {
    Label(u32),
    Instruction(&'k Instruction),
}

/// Index of the step just after label `label` searched from `pc`.
fn resolve(program: &[Step], pc: usize, label: u32, direction: Direction) -> SimResult<usize> {
    let is_label = |step: &Step| matches!(step, Step::Label(l) if *l == label);
    let found = match direction {
        Direction::Back => program[..pc].iter().rposition(is_label),
        Direction::Forward => program[pc + 1..]
            .iter()
            .position(is_label)
            .map(|i| i + pc + 1),
    };
    found
        .map(|index| index + 1)
        .ok_or(SimError::MissingLabel { label, direction })
}

/// Interpreter state for running kernels.
#[derive(Debug, Clone)]
pub struct Machine {
    pub registers: RegisterState,
    pub memory: Memory,
    params: HashMap<String, u32>,
    step_limit: usize,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            registers: RegisterState::new(),
            memory: Memory::new(),
            params: HashMap::new(),
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn set_param(&mut self, name: &str, value: u32) {
        self.params.insert(name.to_string(), value);
    }

    pub fn set_param_i32(&mut self, name: &str, value: i32) {
        self.set_param(name, value as u32);
    }

    /// Float parameters travel as their bit pattern.
    pub fn set_param_f32(&mut self, name: &str, value: f32) {
        self.set_param(name, value.to_bits());
    }

    pub fn param(&self, name: &str) -> Option<u32> {
        self.params.get(name).copied()
    }

    /// Execute `kernel` to completion and return the number of instructions
    /// executed.
    pub fn run(&mut self, kernel: &Kernel) -> SimResult<usize> {
        let program: Vec<Step> = kernel
            .lines
            .iter()
            .filter_map(|l| match &l.line {
                Line::Label(label) => Some(Step::Label(*label)),
                Line::Instruction(inst) => Some(Step::Instruction(inst)),
                _ => None,
            })
            .collect();

        let mut pc = 0;
        let mut steps = 0;
        while let Some(step) = program.get(pc) {
            let inst = match step {
                Step::Label(_) => {
                    pc += 1;
                    continue;
                }
                Step::Instruction(inst) => *inst,
            };

            steps += 1;
            if steps > self.step_limit {
                return Err(SimError::StepLimit {
                    limit: self.step_limit,
                });
            }
            trace!("{pc:4}: {inst}");

            pc = match self.execute(inst)? {
                Flow::Next => pc + 1,
                Flow::Branch(label, direction) => resolve(&program, pc, label, direction)?,
            };
        }
        Ok(steps)
    }
}
