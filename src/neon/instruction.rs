// This module defines the structured form of an emitted ARMv7 NEON instruction. Kernels are not
// built as strings: every instruction is an Opcode (mnemonic plus data type suffix) with a list
// of typed Operands (registers, lanes, register lists, memory references with alignment and
// post-increment, immediates, bound parameters and numeric local labels). The Display impls
// render the exact GNU assembler syntax used inside the inline asm block, and the same values
// are consumed by the interpreter in `sim`, so what is printed is what gets tested.

//! Structured NEON instructions and their textual rendering.

use std::fmt;

use crate::core::register_pool::{OperandRef, Register};

/// Data type suffix of a NEON mnemonic (`vadd.i32`, `vld1.8`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
    S16,
    S32,
    F32,
    /// Untyped element size, as in `vld1.8` or `vdup.32`.
    Bits8,
    Bits16,
    Bits32,
}

impl DataType {
    /// Element size in bits.
    pub fn bits(self) -> u32 {
        match self {
            DataType::I8 | DataType::U8 | DataType::Bits8 => 8,
            DataType::I16 | DataType::U16 | DataType::S16 | DataType::Bits16 => 16,
            DataType::I32 | DataType::U32 | DataType::S32 | DataType::F32 | DataType::Bits32 => 32,
        }
    }

    /// Untyped data type for an element size in bits.
    pub fn for_bits(bits: u32) -> DataType {
        match bits {
            8 => DataType::Bits8,
            16 => DataType::Bits16,
            _ => DataType::Bits32,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self {
            DataType::I8 => "i8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::U8 => "u8",
            DataType::U16 => "u16",
            DataType::U32 => "u32",
            DataType::S16 => "s16",
            DataType::S32 => "s32",
            DataType::F32 => "f32",
            DataType::Bits8 => "8",
            DataType::Bits16 => "16",
            DataType::Bits32 => "32",
        };
        f.write_str(suffix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Always,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Sub,
    Subs,
    Mov,
    B(Condition),
    Pld,
    VMov(DataType),
    VDup(DataType),
    VAdd(DataType),
    VSub(DataType),
    VMul(DataType),
    VMull(DataType),
    VAddw(DataType),
    VPadd(DataType),
    VPaddl(DataType),
    VPadal(DataType),
    VMax(DataType),
    VMin(DataType),
    VFma(DataType),
    VShl(DataType),
    VMovl(DataType),
    VQmovn(DataType),
    VQmovun(DataType),
    VCvt { to: DataType, from: DataType },
    VLd1(DataType),
    VSt1(DataType),
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, dt) = match *self {
            Opcode::Add => ("add", None),
            Opcode::Sub => ("sub", None),
            Opcode::Subs => ("subs", None),
            Opcode::Mov => ("mov", None),
            Opcode::B(Condition::Always) => ("b", None),
            Opcode::B(Condition::Eq) => ("beq", None),
            Opcode::B(Condition::Ne) => ("bne", None),
            Opcode::Pld => ("pld", None),
            Opcode::VMov(dt) => ("vmov", Some(dt)),
            Opcode::VDup(dt) => ("vdup", Some(dt)),
            Opcode::VAdd(dt) => ("vadd", Some(dt)),
            Opcode::VSub(dt) => ("vsub", Some(dt)),
            Opcode::VMul(dt) => ("vmul", Some(dt)),
            Opcode::VMull(dt) => ("vmull", Some(dt)),
            Opcode::VAddw(dt) => ("vaddw", Some(dt)),
            Opcode::VPadd(dt) => ("vpadd", Some(dt)),
            Opcode::VPaddl(dt) => ("vpaddl", Some(dt)),
            Opcode::VPadal(dt) => ("vpadal", Some(dt)),
            Opcode::VMax(dt) => ("vmax", Some(dt)),
            Opcode::VMin(dt) => ("vmin", Some(dt)),
            Opcode::VFma(dt) => ("vfma", Some(dt)),
            Opcode::VShl(dt) => ("vshl", Some(dt)),
            Opcode::VMovl(dt) => ("vmovl", Some(dt)),
            Opcode::VQmovn(dt) => ("vqmovn", Some(dt)),
            Opcode::VQmovun(dt) => ("vqmovun", Some(dt)),
            Opcode::VCvt { to, from } => return write!(f, "vcvt.{to}.{from}"),
            Opcode::VLd1(dt) => ("vld1", Some(dt)),
            Opcode::VSt1(dt) => ("vst1", Some(dt)),
        };
        match dt {
            Some(dt) => write!(f, "{name}.{dt}"),
            None => f.write_str(name),
        }
    }
}

/// Direction of a numeric local label reference (`1b` / `1f`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Back,
    Forward,
}

/// Post-access address update of a memory operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PostIndex {
    None,
    /// `[addr]!`: advance by the number of bytes transferred.
    Writeback,
    /// `[addr], reg`: advance by the value of a scalar.
    Stride(OperandRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(Register),
    Param(String),
    /// Single lane of a narrow register, `d0[1]`.
    Lane(Register, u8),
    /// All lanes of a narrow register, `d0[]`.
    AllLanes(Register),
    /// Register list, `{d0, d1}`.
    List(Vec<Operand>),
    Mem {
        base: OperandRef,
        /// Alignment qualifier in bits (`:64`).
        align: Option<u32>,
        post: PostIndex,
    },
    /// `[base, #offset]`, only used by preload hints.
    MemOffset { base: OperandRef, offset: i32 },
    Imm(i32),
    Label(u32, Direction),
}

impl Operand {
    /// Register list of plain registers.
    pub fn list(regs: &[Register]) -> Operand {
        Operand::List(regs.iter().map(|r| Operand::Reg(*r)).collect())
    }

    pub fn lane(reg: Register, lane: u8) -> Operand {
        Operand::Lane(reg, lane)
    }

    pub fn all_lanes(reg: Register) -> Operand {
        Operand::AllLanes(reg)
    }

    /// `[base:align]`
    pub fn deref(base: &OperandRef, align: Option<u32>) -> Operand {
        Operand::Mem {
            base: base.clone(),
            align,
            post: PostIndex::None,
        }
    }

    /// `[base:align]!`
    pub fn deref_increment(base: &OperandRef, align: Option<u32>) -> Operand {
        Operand::Mem {
            base: base.clone(),
            align,
            post: PostIndex::Writeback,
        }
    }

    /// `[base], stride`
    pub fn deref_stride(base: &OperandRef, stride: &OperandRef) -> Operand {
        Operand::Mem {
            base: base.clone(),
            align: None,
            post: PostIndex::Stride(stride.clone()),
        }
    }

    /// `[base, #offset]`
    pub fn deref_offset(base: &OperandRef, offset: i32) -> Operand {
        Operand::MemOffset {
            base: base.clone(),
            offset,
        }
    }

    pub fn imm(value: i32) -> Operand {
        Operand::Imm(value)
    }

    /// Registers named by this operand, including those inside lists and
    /// memory references.
    pub fn registers(&self) -> Vec<Register> {
        match self {
            Operand::Reg(reg) | Operand::Lane(reg, _) | Operand::AllLanes(reg) => vec![*reg],
            Operand::List(items) => items.iter().flat_map(Operand::registers).collect(),
            Operand::Mem { base, post, .. } => {
                let mut regs: Vec<Register> = base.register().into_iter().collect();
                if let PostIndex::Stride(stride) = post {
                    regs.extend(stride.register());
                }
                regs
            }
            Operand::MemOffset { base, .. } => base.register().into_iter().collect(),
            Operand::Param(_) | Operand::Imm(_) | Operand::Label(..) => Vec::new(),
        }
    }

    /// Parameters named by this operand.
    pub fn params(&self) -> Vec<&str> {
        fn of_ref(operand: &OperandRef) -> Option<&str> {
            match operand {
                OperandRef::Param(name) => Some(name),
                OperandRef::Register(_) => None,
            }
        }
        match self {
            Operand::Param(name) => vec![name.as_str()],
            Operand::List(items) => items.iter().flat_map(Operand::params).collect(),
            Operand::Mem { base, post, .. } => {
                let mut names: Vec<&str> = of_ref(base).into_iter().collect();
                if let PostIndex::Stride(stride) = post {
                    names.extend(of_ref(stride));
                }
                names
            }
            Operand::MemOffset { base, .. } => of_ref(base).into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl From<Register> for Operand {
    fn from(reg: Register) -> Self {
        Operand::Reg(reg)
    }
}

impl From<&OperandRef> for Operand {
    fn from(operand: &OperandRef) -> Self {
        match operand {
            OperandRef::Register(reg) => Operand::Reg(*reg),
            OperandRef::Param(name) => Operand::Param(name.clone()),
        }
    }
}

impl From<OperandRef> for Operand {
    fn from(operand: OperandRef) -> Self {
        Operand::from(&operand)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{reg}"),
            Operand::Param(name) => write!(f, "%[{name}]"),
            Operand::Lane(reg, lane) => write!(f, "{reg}[{lane}]"),
            Operand::AllLanes(reg) => write!(f, "{reg}[]"),
            Operand::List(items) => {
                let items: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "{{{}}}", items.join(", "))
            }
            Operand::Mem { base, align, post } => {
                write!(f, "[{base}")?;
                if let Some(bits) = align {
                    write!(f, ":{bits}")?;
                }
                write!(f, "]")?;
                match post {
                    PostIndex::None => Ok(()),
                    PostIndex::Writeback => write!(f, "!"),
                    PostIndex::Stride(stride) => write!(f, ", {stride}"),
                }
            }
            Operand::MemOffset { base, offset } => write!(f, "[{base}, #{offset}]"),
            Operand::Imm(value) => write!(f, "#{value}"),
            Operand::Label(label, Direction::Back) => write!(f, "{label}b"),
            Operand::Label(label, Direction::Forward) => write!(f, "{label}f"),
        }
    }
}

/// One emitted instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self { opcode, operands }
    }

    /// Mnemonic used as the key of the per-opcode counters.
    pub fn mnemonic(&self) -> String {
        self.opcode.to_string()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let separator = if i == 0 { " " } else { ", " };
            write!(f, "{separator}{operand}")?;
        }
        Ok(())
    }
}
