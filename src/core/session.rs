// This module provides the generation session: the object that drives kernel generators for a
// whole run and accumulates statistics across every kernel it produced. The session owns the
// generation options shared by all kernels and keeps its statistics behind a RefCell so the
// recording methods work through a shared reference while the enumerator iterates. SessionStats
// tracks kernels generated, instructions emitted with a per-mnemonic breakdown, narrow/general
// registers touched, failed shapes and the largest kernel, and renders as a short report.

//! Generation session and statistics.

use std::cell::RefCell;
use std::fmt;

use hashbrown::HashMap;
use log::debug;

use crate::core::error::GenResult;
use crate::kernels::{self, GenOptions, Kernel, KernelShape};

/// Drives kernel generation for one run.
#[derive(Debug, Default)]
pub struct GenerationSession {
    options: GenOptions,
    stats: RefCell<SessionStats>,
}

impl GenerationSession {
    pub fn new(options: GenOptions) -> Self {
        Self {
            options,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    pub fn options(&self) -> &GenOptions {
        &self.options
    }

    /// Generate the kernel for `shape` and record it. Failures are counted
    /// and returned unchanged.
    pub fn generate(&self, shape: &KernelShape) -> GenResult<Kernel> {
        match kernels::generate(shape, &self.options) {
            Ok(kernel) => {
                self.record_kernel(&kernel);
                Ok(kernel)
            }
            Err(err) => {
                self.stats.borrow_mut().failures += 1;
                Err(err)
            }
        }
    }

    /// Record a generated kernel.
    pub fn record_kernel(&self, kernel: &Kernel) {
        let mut stats = self.stats.borrow_mut();
        let size = kernel.instruction_count();
        stats.kernels_generated += 1;
        stats.instructions_emitted += size;
        stats.registers_used += kernel.ever_allocated.len();
        for (mnemonic, count) in &kernel.op_counts {
            *stats
                .instruction_counts
                .entry(mnemonic.clone())
                .or_insert(0) += count;
        }

        if stats.largest_kernel_size < size {
            stats.largest_kernel_size = size;
            stats.largest_kernel_name = kernel.name.clone();
        }
        debug!("session: recorded {} ({size} instructions)", kernel.name);
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Generation statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub kernels_generated: usize,

    /// Instructions emitted across all kernels.
    pub instructions_emitted: usize,

    /// Emitted instructions per mnemonic.
    pub instruction_counts: HashMap<String, usize>,

    /// Registers touched, summed over kernels.
    pub registers_used: usize,

    /// Shapes that failed to generate.
    pub failures: usize,

    pub largest_kernel_size: usize,
    pub largest_kernel_name: String,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Generation Session Statistics:")?;
        writeln!(f, "  Kernels generated: {}", self.kernels_generated)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Registers used: {}", self.registers_used)?;
        if self.failures > 0 {
            writeln!(f, "  Failures: {}", self.failures)?;
        }

        if !self.largest_kernel_name.is_empty() {
            writeln!(
                f,
                "  Largest kernel: {} ({} instructions)",
                self.largest_kernel_name, self.largest_kernel_size
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|(a_op, a), (b_op, b)| b.cmp(a).then_with(|| a_op.cmp(b_op)));

            for (mnemonic, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", mnemonic, count)?;
            }
        }

        Ok(())
    }
}
