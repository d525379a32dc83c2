// This module implements the instruction emitter: the ordered, indented stream of lines that
// makes up one generated kernel. It tracks the lexical scopes that are open (the host function,
// the inline asm block and labelled sections inside it), the current indentation depth and a
// per-mnemonic counter of emitted instructions. Host-language text is kept as plain strings
// (function header, local declarations, entry asserts, the asm footer) while instructions stay
// structured so the interpreter can execute them. Closing a scope that is not the innermost open
// one is a ProtocolError; the guards in kernels::context make sure every scope is closed on all
// paths. The instruction helpers mirror the NEON mnemonics the kernel generators need.

//! Instruction stream and lexical scopes.

use hashbrown::HashMap;

use crate::core::error::{GenError, GenResult};
use crate::core::register_pool::{OperandRef, RegisterPool};

use super::instruction::{Condition, DataType, Direction, Instruction, Opcode, Operand};

/// One line of a generated kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// Host-language text emitted verbatim.
    Host(String),
    Comment(String),
    Label(u32),
    Instruction(Instruction),
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndentedLine {
    pub depth: usize,
    pub line: Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Function,
    AsmBlock,
    Section,
}

/// Emitter for one kernel.
#[derive(Debug, Default)]
pub struct Emitter {
    lines: Vec<IndentedLine>,
    depth: usize,
    scopes: Vec<Scope>,
    op_counts: HashMap<String, usize>,
    checked: bool,
}

impl Emitter {
    /// `checked` turns entry asserts on.
    pub fn new(checked: bool) -> Self {
        Self {
            checked,
            ..Self::default()
        }
    }

    fn push(&mut self, line: Line) {
        self.lines.push(IndentedLine {
            depth: self.depth,
            line,
        });
    }

    fn open(&mut self, scope: Scope) {
        self.scopes.push(scope);
        self.depth += 1;
    }

    fn close(&mut self, scope: Scope) -> GenResult<()> {
        match self.scopes.last() {
            Some(open) if *open == scope => {
                self.scopes.pop();
                self.depth -= 1;
                Ok(())
            }
            Some(open) => Err(GenError::protocol(format!(
                "closing {scope:?} while {open:?} is the innermost open scope"
            ))),
            None => Err(GenError::protocol(format!(
                "closing {scope:?} with no open scope"
            ))),
        }
    }

    /// True when every opened scope has been closed.
    pub fn is_balanced(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn open_scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn begin_function(&mut self, name: &str, params: &[(&str, &str)], return_type: &str) {
        let params: Vec<String> = params
            .iter()
            .map(|(ty, param)| format!("{ty} {param}"))
            .collect();
        self.push(Line::Host(format!(
            "{return_type} {name}({}) {{",
            params.join(", ")
        )));
        self.open(Scope::Function);
    }

    pub fn end_function(&mut self) -> GenResult<()> {
        self.close(Scope::Function)?;
        self.push(Line::Host("}".to_string()));
        Ok(())
    }

    /// Local variable declaration in the host function.
    pub fn declare(&mut self, ty: &str, name: &str, value: &str) {
        self.push(Line::Host(format!("{ty} {name} = {value};")));
    }

    /// Entry precondition; only emitted for checked builds.
    pub fn assert(&mut self, condition: &str) {
        if self.checked {
            self.push(Line::Host(format!("assert({condition});")));
        }
    }

    pub fn begin_asm_block(&mut self) {
        self.push(Line::Host("asm volatile(".to_string()));
        self.open(Scope::AsmBlock);
    }

    /// Close the asm block with its footer: read-write bindings, input
    /// bindings, then clobbers, always in that order.
    pub fn end_asm_block(&mut self, registers: &RegisterPool) -> GenResult<()> {
        let outputs: Vec<String> = registers
            .read_write_bindings()
            .map(|b| b.to_string())
            .collect();
        let inputs: Vec<String> = registers.input_bindings().map(|b| b.to_string()).collect();
        let clobbers: Vec<String> = registers
            .clobbers()
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect();

        self.push(Line::Host(format!(": {}", outputs.join(", "))));
        self.push(Line::Host(format!(": {}", inputs.join(", "))));
        self.push(Line::Host(format!(": {});", clobbers.join(", "))));
        self.close(Scope::AsmBlock)
    }

    /// Open an indented section, optionally headed by a comment and a label.
    pub fn begin_section(&mut self, comment: Option<&str>, label: Option<u32>) {
        self.blank();
        if let Some(comment) = comment {
            self.comment(comment);
        }
        if let Some(label) = label {
            self.label(label);
        }
        self.open(Scope::Section);
    }

    pub fn end_section(&mut self) -> GenResult<()> {
        self.close(Scope::Section)
    }

    pub fn comment(&mut self, text: &str) {
        self.push(Line::Comment(text.to_string()));
    }

    pub fn blank(&mut self) {
        self.push(Line::Blank);
    }

    pub fn label(&mut self, label: u32) {
        self.push(Line::Label(label));
    }

    pub fn emit(&mut self, opcode: Opcode, operands: Vec<Operand>) {
        debug_assert!(
            self.scopes.contains(&Scope::AsmBlock),
            "instruction emitted outside of an asm block"
        );
        let instruction = Instruction::new(opcode, operands);
        *self.op_counts.entry(instruction.mnemonic()).or_insert(0) += 1;
        self.push(Line::Instruction(instruction));
    }

    pub fn lines(&self) -> &[IndentedLine] {
        &self.lines
    }

    pub fn op_counts(&self) -> &HashMap<String, usize> {
        &self.op_counts
    }

    pub fn instruction_count(&self) -> usize {
        self.op_counts.values().sum()
    }

    pub fn into_parts(self) -> (Vec<IndentedLine>, HashMap<String, usize>) {
        (self.lines, self.op_counts)
    }

    // Scalar instructions.

    pub fn add(&mut self, dst: impl Into<Operand>, a: impl Into<Operand>, b: impl Into<Operand>) {
        self.emit(Opcode::Add, vec![dst.into(), a.into(), b.into()]);
    }

    pub fn sub(&mut self, dst: impl Into<Operand>, a: impl Into<Operand>, b: impl Into<Operand>) {
        self.emit(Opcode::Sub, vec![dst.into(), a.into(), b.into()]);
    }

    /// Subtract and set flags.
    pub fn subs(&mut self, dst: impl Into<Operand>, a: impl Into<Operand>, b: impl Into<Operand>) {
        self.emit(Opcode::Subs, vec![dst.into(), a.into(), b.into()]);
    }

    pub fn mov(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) {
        self.emit(Opcode::Mov, vec![dst.into(), src.into()]);
    }

    pub fn branch(&mut self, condition: Condition, label: u32, direction: Direction) {
        self.emit(
            Opcode::B(condition),
            vec![Operand::Label(label, direction)],
        );
    }

    pub fn bne_back(&mut self, label: u32) {
        self.branch(Condition::Ne, label, Direction::Back);
    }

    pub fn beq_forward(&mut self, label: u32) {
        self.branch(Condition::Eq, label, Direction::Forward);
    }

    pub fn b_forward(&mut self, label: u32) {
        self.branch(Condition::Always, label, Direction::Forward);
    }

    pub fn pld(&mut self, base: &OperandRef) {
        self.emit(Opcode::Pld, vec![Operand::deref(base, None)]);
    }

    pub fn pld_offset(&mut self, base: &OperandRef, offset: i32) {
        self.emit(Opcode::Pld, vec![Operand::deref_offset(base, offset)]);
    }

    // NEON instructions.

    pub fn vmov(&mut self, dt: DataType, dst: impl Into<Operand>, src: impl Into<Operand>) {
        self.emit(Opcode::VMov(dt), vec![dst.into(), src.into()]);
    }

    pub fn vdup(&mut self, dt: DataType, dst: impl Into<Operand>, src: impl Into<Operand>) {
        self.emit(Opcode::VDup(dt), vec![dst.into(), src.into()]);
    }

    pub fn vadd(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VAdd(dt), vec![dst.into(), a.into(), b.into()]);
    }

    pub fn vsub(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VSub(dt), vec![dst.into(), a.into(), b.into()]);
    }

    pub fn vmul(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VMul(dt), vec![dst.into(), a.into(), b.into()]);
    }

    /// Widening multiply.
    pub fn vmull(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VMull(dt), vec![dst.into(), a.into(), b.into()]);
    }

    /// Widening add of a narrow vector into a wide one.
    pub fn vaddw(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VAddw(dt), vec![dst.into(), a.into(), b.into()]);
    }

    pub fn vpadd(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VPadd(dt), vec![dst.into(), a.into(), b.into()]);
    }

    pub fn vpaddl(&mut self, dt: DataType, dst: impl Into<Operand>, src: impl Into<Operand>) {
        self.emit(Opcode::VPaddl(dt), vec![dst.into(), src.into()]);
    }

    /// Pairwise add long and accumulate.
    pub fn vpadal(&mut self, dt: DataType, dst: impl Into<Operand>, src: impl Into<Operand>) {
        self.emit(Opcode::VPadal(dt), vec![dst.into(), src.into()]);
    }

    pub fn vmax(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VMax(dt), vec![dst.into(), a.into(), b.into()]);
    }

    pub fn vmin(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VMin(dt), vec![dst.into(), a.into(), b.into()]);
    }

    /// Fused multiply-accumulate: `dst += a * b`.
    pub fn vfma(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VFma(dt), vec![dst.into(), a.into(), b.into()]);
    }

    pub fn vshl(
        &mut self,
        dt: DataType,
        dst: impl Into<Operand>,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) {
        self.emit(Opcode::VShl(dt), vec![dst.into(), a.into(), b.into()]);
    }

    /// Lengthen each lane of a narrow register into a wide one.
    pub fn vmovl(&mut self, dt: DataType, dst: impl Into<Operand>, src: impl Into<Operand>) {
        self.emit(Opcode::VMovl(dt), vec![dst.into(), src.into()]);
    }

    /// Saturating narrow.
    pub fn vqmovn(&mut self, dt: DataType, dst: impl Into<Operand>, src: impl Into<Operand>) {
        self.emit(Opcode::VQmovn(dt), vec![dst.into(), src.into()]);
    }

    /// Saturating narrow, signed to unsigned.
    pub fn vqmovun(&mut self, dt: DataType, dst: impl Into<Operand>, src: impl Into<Operand>) {
        self.emit(Opcode::VQmovun(dt), vec![dst.into(), src.into()]);
    }

    pub fn vcvt(
        &mut self,
        to: DataType,
        from: DataType,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) {
        self.emit(Opcode::VCvt { to, from }, vec![dst.into(), src.into()]);
    }

    pub fn vld1(&mut self, dt: DataType, list: Operand, address: Operand) {
        self.emit(Opcode::VLd1(dt), vec![list, address]);
    }

    pub fn vst1(&mut self, dt: DataType, list: Operand, address: Operand) {
        self.emit(Opcode::VSt1(dt), vec![list, address]);
    }
}
