// This module ties the emitter and the register pool together into the per-kernel generation
// context every generator works on, and defines the finished Kernel handed back to callers.
// Scopes are opened through closures (function, asm block, labelled section) that close the
// scope on every exit path, including an early `?` return from the body, so a generator can
// never leave a brace or asm footer unemitted. Finishing a kernel checks that every scope is
// closed and that every register was freed, then freezes the line stream together with the
// operand bindings and the clobber list.

//! Per-kernel generation context and the generated kernel.

use std::fmt;

use hashbrown::HashMap;
use log::debug;

use crate::core::error::{GenError, GenResult};
use crate::core::register_pool::{OperandBinding, Register, RegisterPool};
use crate::neon::emitter::{Emitter, IndentedLine, Line};
use crate::neon::instruction::Instruction;

/// Generation options shared by every kernel family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenOptions {
    /// Emit entry precondition asserts.
    pub checked: bool,
}

/// Return type of every generated routine.
const RETURN_TYPE: &str = "inline void";

/// Emitter plus register pool for one kernel.
#[derive(Debug)]
pub struct KernelContext {
    pub emitter: Emitter,
    pub registers: RegisterPool,
}

fn close_after<T>(result: GenResult<T>, closed: GenResult<()>) -> GenResult<T> {
    let value = result?;
    closed?;
    Ok(value)
}

impl KernelContext {
    pub fn new(options: &GenOptions) -> Self {
        Self {
            emitter: Emitter::new(options.checked),
            registers: RegisterPool::new(),
        }
    }

    /// Emit the host function around `body`.
    pub fn function<T>(
        &mut self,
        name: &str,
        params: &[(&str, &str)],
        body: impl FnOnce(&mut Self) -> GenResult<T>,
    ) -> GenResult<T> {
        self.emitter.begin_function(name, params, RETURN_TYPE);
        let result = body(self);
        let closed = self.emitter.end_function();
        close_after(result, closed)
    }

    /// Emit an inline asm block around `body`; the footer is built from the
    /// register pool when the block closes.
    pub fn asm_block<T>(&mut self, body: impl FnOnce(&mut Self) -> GenResult<T>) -> GenResult<T> {
        self.emitter.begin_asm_block();
        let result = body(self);
        let closed = self.emitter.end_asm_block(&self.registers);
        close_after(result, closed)
    }

    /// Emit an indented section headed by an optional comment and label.
    pub fn section<T>(
        &mut self,
        comment: Option<&str>,
        label: Option<u32>,
        body: impl FnOnce(&mut Self) -> GenResult<T>,
    ) -> GenResult<T> {
        self.emitter.begin_section(comment, label);
        let result = body(self);
        let closed = self.emitter.end_section();
        close_after(result, closed)
    }

    /// Freeze the kernel. Fails if a scope is still open or a register is
    /// still allocated.
    pub fn finish(self, name: String) -> GenResult<Kernel> {
        if !self.emitter.is_balanced() {
            return Err(GenError::protocol(format!(
                "{name}: scopes left open: {:?}",
                self.emitter.open_scopes()
            )));
        }
        let leaked = self.registers.in_use();
        if !leaked.is_empty() {
            let leaked: Vec<String> = leaked.iter().map(Register::to_string).collect();
            return Err(GenError::protocol(format!(
                "{name}: registers never freed: {}",
                leaked.join(", ")
            )));
        }

        let bindings = self.registers.bindings().to_vec();
        let clobbers = self.registers.clobbers();
        let ever_allocated = self.registers.ever_allocated();
        let (lines, op_counts) = self.emitter.into_parts();
        let kernel = Kernel {
            name,
            lines,
            bindings,
            clobbers,
            ever_allocated,
            op_counts,
        };
        debug!(
            "generated {} ({} instructions, {} registers)",
            kernel.name,
            kernel.instruction_count(),
            kernel.ever_allocated.len()
        );
        Ok(kernel)
    }
}

/// One generated routine.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub name: String,
    pub lines: Vec<IndentedLine>,
    /// Parameter bindings in first-bound order.
    pub bindings: Vec<OperandBinding>,
    pub clobbers: Vec<String>,
    pub ever_allocated: Vec<Register>,
    pub op_counts: HashMap<String, usize>,
}

impl Kernel {
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.lines.iter().filter_map(|l| match &l.line {
            Line::Instruction(inst) => Some(inst),
            _ => None,
        })
    }

    pub fn instruction_count(&self) -> usize {
        self.op_counts.values().sum()
    }

    pub fn binding(&self, name: &str) -> Option<&OperandBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for IndentedLine { depth, line } in &self.lines {
            let indent = "  ".repeat(*depth);
            match line {
                Line::Host(text) => writeln!(f, "{indent}{text}")?,
                Line::Comment(text) => writeln!(f, "{indent}// {text}")?,
                Line::Label(label) => writeln!(f, "{indent}\"{label}:\"")?,
                Line::Instruction(inst) => writeln!(f, "{indent}\"{inst}\\n\"")?,
                Line::Blank => writeln!(f)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::register_pool::AccessMode;
    use crate::neon::instruction::Operand;

    fn sample(cx: &mut KernelContext) -> GenResult<()> {
        cx.function("sample", &[("std::int32_t", "count")], |cx| {
            cx.emitter.assert("count >= 8");
            cx.asm_block(|cx| {
                let count = cx.registers.bind_parameter("count", AccessMode::ReadWrite);
                let d = cx.registers.allocate_narrow(0)?;
                cx.section(Some("Loop."), Some(1), |cx| {
                    cx.emitter.subs(&count, &count, Operand::imm(8));
                    cx.emitter.bne_back(1);
                    Ok(())
                })?;
                cx.registers.free(d)
            })
        })
    }

    #[test]
    fn test_render_kernel() {
        let mut cx = KernelContext::new(&GenOptions { checked: true });
        sample(&mut cx).unwrap();
        let kernel = cx.finish("sample".to_string()).unwrap();

        let text = kernel.to_string();
        let expected = "inline void sample(std::int32_t count) {\n\
                        \x20 assert(count >= 8);\n\
                        \x20 asm volatile(\n\
                        \n\
                        \x20   // Loop.\n\
                        \x20   \"1:\"\n\
                        \x20     \"subs %[count], %[count], #8\\n\"\n\
                        \x20     \"bne 1b\\n\"\n\
                        \x20   : [count] \"+r\"(count)\n\
                        \x20   : \n\
                        \x20   : \"d0\", \"cc\", \"memory\");\n\
                        }\n";
        assert_eq!(text, expected);
        assert_eq!(kernel.instruction_count(), 2);
        assert_eq!(kernel.clobbers, vec!["d0", "cc", "memory"]);
    }

    #[test]
    fn test_scopes_close_on_error() {
        let mut cx = KernelContext::new(&GenOptions::default());
        let result: GenResult<()> = cx.function("failing", &[], |cx| {
            cx.asm_block(|cx| {
                cx.section(None, Some(1), |_| Err(GenError::unsupported("no")))
            })
        });
        assert!(result.is_err());
        assert!(cx.emitter.is_balanced());
    }

    #[test]
    fn test_finish_rejects_leaks() {
        let mut cx = KernelContext::new(&GenOptions::default());
        cx.function("leaky", &[], |cx| {
            cx.asm_block(|cx| {
                cx.registers.allocate_wide(0)?;
                Ok(())
            })
        })
        .unwrap();
        assert!(matches!(
            cx.finish("leaky".to_string()),
            Err(GenError::ProtocolError { .. })
        ));
    }
}
