// This module implements the register pool that every kernel generator draws its registers from.
// The ARMv7 NEON register file is modelled as three kinds of register: general-purpose scalars
// (r0..r12), narrow 64-bit vectors (d0..d31) and wide 128-bit vectors (q0..q15) where qN is made
// of the narrow halves d(2N) and d(2N+1). Wide registers are never tracked on their own: the pool
// only records narrow halves, so allocating or freeing a wide register always claims or releases
// both halves together and a half can never be handed out twice. Next to the in-use set the pool
// keeps an "ever used" set that only grows; it becomes the clobber list of the inline assembly
// block. The pool also records named parameter bindings (input or read-write operands whose
// physical register is chosen by the host compiler). A fresh pool is created for every kernel.

//! Register pool and operand bindings.
//!
//! Allocation is first-fit within a kind. `min_index` lets a caller keep the
//! low end of the narrow/wide file free for registers it is about to allocate
//! explicitly afterwards.

use std::fmt;

use log::trace;

use super::error::{GenError, GenResult};

/// Allocatable general registers: r0..r12 (sp, lr and pc are never handed out).
pub const GENERAL_FILE_SIZE: u8 = 13;

/// Narrow (64-bit) vector registers: d0..d31.
pub const NARROW_FILE_SIZE: u8 = 32;

/// Wide (128-bit) vector registers: q0..q15.
pub const WIDE_FILE_SIZE: u8 = NARROW_FILE_SIZE / 2;

/// Side effects every generated asm block declares besides its registers.
pub const SIDE_EFFECT_CLOBBERS: [&str; 2] = ["cc", "memory"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    General,
    Narrow,
    Wide,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::General => write!(f, "general"),
            RegisterKind::Narrow => write!(f, "narrow"),
            RegisterKind::Wide => write!(f, "wide"),
        }
    }
}

/// A physical register, tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    General(u8),
    Narrow(u8),
    Wide(u8),
}

impl Register {
    pub fn kind(self) -> RegisterKind {
        match self {
            Register::General(_) => RegisterKind::General,
            Register::Narrow(_) => RegisterKind::Narrow,
            Register::Wide(_) => RegisterKind::Wide,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Register::General(i) | Register::Narrow(i) | Register::Wide(i) => i,
        }
    }

    /// Low narrow half of a wide register.
    ///
    /// # Panics
    /// When called on a general or narrow register; that is a generator bug.
    pub fn low(self) -> Register {
        match self {
            Register::Wide(i) => Register::Narrow(2 * i),
            other => panic!("{other} has no narrow halves"),
        }
    }

    /// High narrow half of a wide register.
    ///
    /// # Panics
    /// When called on a general or narrow register.
    pub fn high(self) -> Register {
        match self {
            Register::Wide(i) => Register::Narrow(2 * i + 1),
            other => panic!("{other} has no narrow halves"),
        }
    }

    /// The narrow registers this register occupies (itself for a narrow one).
    pub fn narrow_parts(self) -> Vec<Register> {
        match self {
            Register::Wide(_) => vec![self.low(), self.high()],
            Register::Narrow(_) => vec![self],
            Register::General(_) => Vec::new(),
        }
    }

    /// Width of the register in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Register::General(_) => 4,
            Register::Narrow(_) => 8,
            Register::Wide(_) => 16,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::General(i) => write!(f, "r{i}"),
            Register::Narrow(i) => write!(f, "d{i}"),
            Register::Wide(i) => write!(f, "q{i}"),
        }
    }
}

/// A scalar operand: an allocated general register or a bound parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperandRef {
    Register(Register),
    Param(String),
}

impl OperandRef {
    pub fn register(&self) -> Option<Register> {
        match self {
            OperandRef::Register(reg) => Some(*reg),
            OperandRef::Param(_) => None,
        }
    }
}

impl From<Register> for OperandRef {
    fn from(reg: Register) -> Self {
        OperandRef::Register(reg)
    }
}

impl fmt::Display for OperandRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandRef::Register(reg) => write!(f, "{reg}"),
            OperandRef::Param(name) => write!(f, "%[{name}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Input,
    ReadWrite,
}

/// A named parameter participating in the asm block's operand list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandBinding {
    pub name: String,
    /// Host expression the operand is bound to (usually the parameter name).
    pub expression: String,
    pub mode: AccessMode,
}

impl OperandBinding {
    pub fn constraint(&self) -> &'static str {
        match self.mode {
            AccessMode::Input => "r",
            AccessMode::ReadWrite => "+r",
        }
    }
}

impl fmt::Display for OperandBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] \"{}\"({})",
            self.name,
            self.constraint(),
            self.expression
        )
    }
}

/// Bit set over the general and narrow banks.
///
/// Wide registers are stored as their two narrow halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegBitSet {
    general: u64,
    narrow: u64,
}

impl RegBitSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn mask(reg: Register) -> (u64, u64) {
        match reg {
            Register::General(i) => (1u64 << i, 0),
            Register::Narrow(i) => (0, 1u64 << i),
            Register::Wide(i) => (0, 0b11u64 << (2 * i)),
        }
    }

    /// True if the register is set (for a wide register: both halves).
    pub fn contains(&self, reg: Register) -> bool {
        let (general, narrow) = Self::mask(reg);
        self.general & general == general && self.narrow & narrow == narrow
    }

    /// True if any part of the register is set.
    pub fn overlaps(&self, reg: Register) -> bool {
        let (general, narrow) = Self::mask(reg);
        self.general & general != 0 || self.narrow & narrow != 0
    }

    pub fn set(&mut self, reg: Register) {
        let (general, narrow) = Self::mask(reg);
        self.general |= general;
        self.narrow |= narrow;
    }

    pub fn clear(&mut self, reg: Register) {
        let (general, narrow) = Self::mask(reg);
        self.general &= !general;
        self.narrow &= !narrow;
    }

    pub fn is_empty(&self) -> bool {
        self.general == 0 && self.narrow == 0
    }

    /// Set registers in clobber order: general registers, then narrow ones.
    pub fn registers(&self) -> Vec<Register> {
        let general = (0..64u8)
            .filter(|i| self.general & (1u64 << i) != 0)
            .map(Register::General);
        let narrow = (0..64u8)
            .filter(|i| self.narrow & (1u64 << i) != 0)
            .map(Register::Narrow);
        general.chain(narrow).collect()
    }
}

/// Allocation state of one kernel's register file.
#[derive(Debug, Default)]
pub struct RegisterPool {
    in_use: RegBitSet,
    ever_used: RegBitSet,
    bindings: Vec<OperandBinding>,
}

impl RegisterPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// First free general register.
    pub fn allocate_general(&mut self) -> GenResult<Register> {
        let reg = (0..GENERAL_FILE_SIZE)
            .map(Register::General)
            .find(|reg| !self.in_use.contains(*reg))
            .ok_or(GenError::RegisterExhausted {
                kind: RegisterKind::General,
                min_index: 0,
            })?;
        self.claim(reg);
        Ok(reg)
    }

    /// First free narrow register at or above `min_index`.
    pub fn allocate_narrow(&mut self, min_index: u8) -> GenResult<Register> {
        let reg = (min_index..NARROW_FILE_SIZE)
            .map(Register::Narrow)
            .find(|reg| !self.in_use.overlaps(*reg))
            .ok_or(GenError::RegisterExhausted {
                kind: RegisterKind::Narrow,
                min_index,
            })?;
        self.claim(reg);
        Ok(reg)
    }

    /// First wide register at or above `min_index` whose both halves are free.
    pub fn allocate_wide(&mut self, min_index: u8) -> GenResult<Register> {
        let reg = (min_index..WIDE_FILE_SIZE)
            .map(Register::Wide)
            .find(|reg| !self.in_use.overlaps(*reg))
            .ok_or(GenError::RegisterExhausted {
                kind: RegisterKind::Wide,
                min_index,
            })?;
        self.claim(reg);
        Ok(reg)
    }

    fn claim(&mut self, reg: Register) {
        trace!("allocate {reg}");
        self.in_use.set(reg);
        self.ever_used.set(reg);
    }

    /// Release a register. A wide register releases both halves.
    pub fn free(&mut self, reg: Register) -> GenResult<()> {
        if !self.in_use.contains(reg) {
            return Err(GenError::protocol(format!(
                "free of register {reg} that is not allocated"
            )));
        }
        trace!("free {reg}");
        self.in_use.clear(reg);
        Ok(())
    }

    pub fn free_all(&mut self, regs: impl IntoIterator<Item = Register>) -> GenResult<()> {
        regs.into_iter().try_for_each(|reg| self.free(reg))
    }

    /// Free the register behind a scalar operand; bound parameters own no slot.
    pub fn free_operand(&mut self, operand: &OperandRef) -> GenResult<()> {
        match operand {
            OperandRef::Register(reg) => self.free(*reg),
            OperandRef::Param(_) => Ok(()),
        }
    }

    pub fn is_allocated(&self, reg: Register) -> bool {
        self.in_use.contains(reg)
    }

    /// Registers currently allocated, as general and narrow registers.
    pub fn in_use(&self) -> Vec<Register> {
        self.in_use.registers()
    }

    /// Every register handed out since the pool was created.
    pub fn ever_allocated(&self) -> Vec<Register> {
        self.ever_used.registers()
    }

    /// Clobber list for the asm footer: every register ever allocated plus
    /// the condition flags and memory.
    pub fn clobbers(&self) -> Vec<String> {
        self.ever_allocated()
            .iter()
            .map(Register::to_string)
            .chain(SIDE_EFFECT_CLOBBERS.iter().map(|s| s.to_string()))
            .collect()
    }

    /// Bind a parameter whose host expression is its own name.
    pub fn bind_parameter(&mut self, name: &str, mode: AccessMode) -> OperandRef {
        self.bind_parameter_expr(name, name, mode)
    }

    /// Bind a parameter to a host expression. Binding the same name again
    /// returns the same operand; a read-write request upgrades an input
    /// binding.
    pub fn bind_parameter_expr(
        &mut self,
        name: &str,
        expression: &str,
        mode: AccessMode,
    ) -> OperandRef {
        match self.bindings.iter_mut().find(|b| b.name == name) {
            Some(existing) => {
                debug_assert_eq!(existing.expression, expression);
                if mode == AccessMode::ReadWrite {
                    existing.mode = AccessMode::ReadWrite;
                }
            }
            None => self.bindings.push(OperandBinding {
                name: name.to_string(),
                expression: expression.to_string(),
                mode,
            }),
        }
        OperandRef::Param(name.to_string())
    }

    /// All bindings in first-bound order.
    pub fn bindings(&self) -> &[OperandBinding] {
        &self.bindings
    }

    pub fn read_write_bindings(&self) -> impl Iterator<Item = &OperandBinding> {
        self.bindings
            .iter()
            .filter(|b| b.mode == AccessMode::ReadWrite)
    }

    pub fn input_bindings(&self) -> impl Iterator<Item = &OperandBinding> {
        self.bindings.iter().filter(|b| b.mode == AccessMode::Input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_display_and_halves() {
        let q3 = Register::Wide(3);
        assert_eq!(q3.to_string(), "q3");
        assert_eq!(q3.low(), Register::Narrow(6));
        assert_eq!(q3.high(), Register::Narrow(7));
        assert_eq!(Register::General(2).to_string(), "r2");
        assert_eq!(Register::Narrow(31).to_string(), "d31");
    }

    #[test]
    fn test_first_fit_allocation() {
        let mut pool = RegisterPool::new();
        assert_eq!(pool.allocate_general().unwrap(), Register::General(0));
        assert_eq!(pool.allocate_general().unwrap(), Register::General(1));
        assert_eq!(pool.allocate_narrow(0).unwrap(), Register::Narrow(0));
        assert_eq!(pool.allocate_narrow(0).unwrap(), Register::Narrow(1));
        assert_eq!(pool.allocate_narrow(5).unwrap(), Register::Narrow(5));
    }

    #[test]
    fn test_wide_reserves_both_halves() {
        let mut pool = RegisterPool::new();
        let d0 = pool.allocate_narrow(0).unwrap();
        // q0 overlaps d0, so the first wide register is q1.
        let wide = pool.allocate_wide(0).unwrap();
        assert_eq!(wide, Register::Wide(1));
        assert!(pool.is_allocated(Register::Narrow(2)));
        assert!(pool.is_allocated(Register::Narrow(3)));
        // d1 is still free, d2/d3 are not.
        assert_eq!(pool.allocate_narrow(0).unwrap(), Register::Narrow(1));
        assert_eq!(pool.allocate_narrow(0).unwrap(), Register::Narrow(4));

        pool.free(wide).unwrap();
        assert!(!pool.is_allocated(Register::Narrow(2)));
        assert!(!pool.is_allocated(Register::Narrow(3)));
        pool.free(d0).unwrap();
    }

    #[test]
    fn test_wide_min_index() {
        let mut pool = RegisterPool::new();
        assert_eq!(pool.allocate_wide(2).unwrap(), Register::Wide(2));
        assert_eq!(pool.allocate_wide(2).unwrap(), Register::Wide(3));
        assert_eq!(pool.allocate_wide(0).unwrap(), Register::Wide(0));
    }

    #[test]
    fn test_free_errors() {
        let mut pool = RegisterPool::new();
        assert!(matches!(
            pool.free(Register::Narrow(4)),
            Err(GenError::ProtocolError { .. })
        ));

        let d4 = pool.allocate_narrow(4).unwrap();
        assert_eq!(d4, Register::Narrow(4));
        // Only one half of q2 is allocated.
        assert!(matches!(
            pool.free(Register::Wide(2)),
            Err(GenError::ProtocolError { .. })
        ));
        pool.free(d4).unwrap();
        assert!(pool.free(d4).is_err());
    }

    #[test]
    fn test_halves_of_wide_can_be_freed_separately() {
        let mut pool = RegisterPool::new();
        let q0 = pool.allocate_wide(0).unwrap();
        pool.free(q0.low()).unwrap();
        pool.free(q0.high()).unwrap();
        assert!(pool.in_use().is_empty());
    }

    #[test]
    fn test_exhaustion() {
        let mut pool = RegisterPool::new();
        for _ in 0..WIDE_FILE_SIZE {
            pool.allocate_wide(0).unwrap();
        }
        assert_eq!(
            pool.allocate_narrow(0),
            Err(GenError::RegisterExhausted {
                kind: RegisterKind::Narrow,
                min_index: 0
            })
        );
        assert!(pool.allocate_wide(0).is_err());

        for _ in 0..GENERAL_FILE_SIZE {
            pool.allocate_general().unwrap();
        }
        assert!(pool.allocate_general().is_err());
    }

    #[test]
    fn test_ever_allocated_survives_free() {
        let mut pool = RegisterPool::new();
        let r0 = pool.allocate_general().unwrap();
        let q1 = pool.allocate_wide(1).unwrap();
        pool.free(r0).unwrap();
        pool.free(q1).unwrap();

        assert!(pool.in_use().is_empty());
        assert_eq!(
            pool.ever_allocated(),
            vec![
                Register::General(0),
                Register::Narrow(2),
                Register::Narrow(3)
            ]
        );
        assert_eq!(pool.clobbers(), vec!["r0", "d2", "d3", "cc", "memory"]);
    }

    #[test]
    fn test_binding_dedup_and_upgrade() {
        let mut pool = RegisterPool::new();
        let count = pool.bind_parameter("count", AccessMode::Input);
        assert_eq!(count, OperandRef::Param("count".to_string()));
        pool.bind_parameter("stride", AccessMode::Input);
        pool.bind_parameter("count", AccessMode::ReadWrite);
        pool.bind_parameter("stride", AccessMode::Input);

        assert_eq!(pool.bindings().len(), 2);
        let rw: Vec<_> = pool.read_write_bindings().map(|b| b.name.as_str()).collect();
        let input: Vec<_> = pool.input_bindings().map(|b| b.name.as_str()).collect();
        assert_eq!(rw, vec!["count"]);
        assert_eq!(input, vec!["stride"]);
        // Bindings never consume a register slot.
        assert!(pool.ever_allocated().is_empty());
    }

    #[test]
    fn test_binding_display() {
        let mut pool = RegisterPool::new();
        pool.bind_parameter_expr("count", "params_count_copy", AccessMode::ReadWrite);
        pool.bind_parameter_expr("range_min", "params.range_min", AccessMode::Input);
        let rendered: Vec<String> = pool.bindings().iter().map(|b| b.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "[count] \"+r\"(params_count_copy)",
                "[range_min] \"r\"(params.range_min)"
            ]
        );
    }
}
