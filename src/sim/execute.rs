// This module gives every opcode the generators emit its ARMv7 semantics. Vector registers are
// handled as little-endian byte strings that are split into lanes of the instruction's element
// size, operated on as 64-bit integers (sign- or zero-extended according to the data type) or as
// f32 bit patterns, and joined back. Integer arithmetic wraps, narrowing moves saturate, float to
// integer conversion truncates toward zero and saturates, and `vshl` with a negative count shifts
// right. Memory operands check their alignment qualifier before the access and apply their
// post-index update after it.

//! Instruction semantics.

use crate::core::register_pool::{OperandRef, Register};
use crate::neon::instruction::{
    Condition, DataType, Direction, Instruction, Opcode, Operand, PostIndex,
};

use super::{Machine, SimError, SimResult};

/// What the run loop does after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flow {
    Next,
    Branch(u32, Direction),
}

fn malformed(inst: &Instruction) -> SimError {
    SimError::MalformedOperands {
        instruction: inst.to_string(),
    }
}

/// Split little-endian bytes into lanes of `bits` bits.
fn split(bytes: &[u8], bits: u32) -> Vec<u64> {
    bytes
        .chunks((bits / 8) as usize)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u64, |value, (i, byte)| value | (*byte as u64) << (8 * i))
        })
        .collect()
}

fn join(lanes: &[u64], bits: u32) -> Vec<u8> {
    let size = (bits / 8) as usize;
    lanes
        .iter()
        .flat_map(|lane| lane.to_le_bytes().into_iter().take(size))
        .collect()
}

fn truncate(value: i64, bits: u32) -> u64 {
    if bits >= 64 {
        value as u64
    } else {
        value as u64 & ((1u64 << bits) - 1)
    }
}

fn extend(value: u64, bits: u32, signed: bool) -> i64 {
    if signed {
        ((value << (64 - bits)) as i64) >> (64 - bits)
    } else {
        value as i64
    }
}

fn saturate(value: i64, bits: u32, signed: bool) -> u64 {
    let (low, high) = if signed {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    } else {
        (0, (1i64 << bits) - 1)
    };
    truncate(value.clamp(low, high), bits)
}

fn is_signed(dt: DataType) -> bool {
    matches!(dt, DataType::S16 | DataType::S32)
}

/// `vshl` by register: the count is the signed low byte of the lane,
/// negative counts shift right.
fn shift(value: i64, count: i8, bits: u32) -> i64 {
    let count = count as i32;
    if count >= 0 {
        if count as u32 >= bits {
            0
        } else {
            value.wrapping_shl(count as u32)
        }
    } else {
        let count = (-count) as u32;
        if count >= bits {
            if value < 0 {
                -1
            } else {
                0
            }
        } else {
            value >> count
        }
    }
}

fn float_op(opcode: Opcode, x: u64, y: u64) -> Option<u64> {
    let (x, y) = (f32::from_bits(x as u32), f32::from_bits(y as u32));
    let result = match opcode {
        Opcode::VAdd(_) => x + y,
        Opcode::VSub(_) => x - y,
        Opcode::VMul(_) => x * y,
        Opcode::VMax(_) => x.max(y),
        Opcode::VMin(_) => x.min(y),
        _ => return None,
    };
    Some(result.to_bits() as u64)
}

fn integer_op(opcode: Opcode, x: u64, y: u64, bits: u32, signed: bool) -> Option<u64> {
    let (a, b) = (extend(x, bits, signed), extend(y, bits, signed));
    let result = match opcode {
        Opcode::VAdd(_) => a.wrapping_add(b),
        Opcode::VSub(_) => a.wrapping_sub(b),
        Opcode::VMul(_) => a.wrapping_mul(b),
        Opcode::VMax(_) => a.max(b),
        Opcode::VMin(_) => a.min(b),
        Opcode::VShl(_) => shift(a, y as u8 as i8, bits),
        _ => return None,
    };
    Some(truncate(result, bits))
}

fn vector_register(inst: &Instruction, operand: &Operand) -> SimResult<Register> {
    match operand {
        Operand::Reg(register @ (Register::Narrow(_) | Register::Wide(_))) => Ok(*register),
        _ => Err(malformed(inst)),
    }
}

fn narrow_register(inst: &Instruction, operand: &Operand) -> SimResult<Register> {
    match operand {
        Operand::Reg(register @ Register::Narrow(_)) => Ok(*register),
        _ => Err(malformed(inst)),
    }
}

fn wide_register(inst: &Instruction, operand: &Operand) -> SimResult<Register> {
    match operand {
        Operand::Reg(register @ Register::Wide(_)) => Ok(*register),
        _ => Err(malformed(inst)),
    }
}

impl Machine {
    pub(super) fn execute(&mut self, inst: &Instruction) -> SimResult<Flow> {
        let operands = inst.operands.as_slice();
        match inst.opcode {
            Opcode::Add | Opcode::Sub | Opcode::Subs => {
                let [dst, a, b] = operands else {
                    return Err(malformed(inst));
                };
                let (a, b) = (self.scalar(inst, a)?, self.scalar(inst, b)?);
                let value = if inst.opcode == Opcode::Add {
                    a.wrapping_add(b)
                } else {
                    a.wrapping_sub(b)
                };
                if inst.opcode == Opcode::Subs {
                    self.registers.zero = value == 0;
                    self.registers.negative = (value as i32) < 0;
                }
                self.set_scalar(inst, dst, value)?;
            }
            Opcode::Mov => {
                let [dst, src] = operands else {
                    return Err(malformed(inst));
                };
                let value = self.scalar(inst, src)?;
                self.set_scalar(inst, dst, value)?;
            }
            Opcode::B(condition) => {
                let [Operand::Label(label, direction)] = operands else {
                    return Err(malformed(inst));
                };
                let taken = match condition {
                    Condition::Always => true,
                    Condition::Eq => self.registers.zero,
                    Condition::Ne => !self.registers.zero,
                };
                if taken {
                    return Ok(Flow::Branch(*label, *direction));
                }
            }
            // Preload hints have no architectural effect.
            Opcode::Pld => {}
            Opcode::VMov(dt) => self.vmov(inst, dt)?,
            Opcode::VDup(dt) => self.vdup(inst, dt)?,
            Opcode::VAdd(dt)
            | Opcode::VSub(dt)
            | Opcode::VMul(dt)
            | Opcode::VMax(dt)
            | Opcode::VMin(dt)
            | Opcode::VShl(dt) => self.lanewise(inst, dt)?,
            Opcode::VFma(_) => self.vfma(inst)?,
            Opcode::VMull(dt) | Opcode::VAddw(dt) => self.widening(inst, dt)?,
            Opcode::VPadd(dt) => self.vpadd(inst, dt)?,
            Opcode::VPaddl(dt) => self.pairwise_long(inst, dt, false)?,
            Opcode::VPadal(dt) => self.pairwise_long(inst, dt, true)?,
            Opcode::VMovl(dt) => self.vmovl(inst, dt)?,
            Opcode::VQmovn(dt) => self.narrowing(inst, dt, is_signed(dt))?,
            Opcode::VQmovun(dt) => self.narrowing(inst, dt, false)?,
            Opcode::VCvt { to, from } => self.vcvt(inst, to, from)?,
            Opcode::VLd1(dt) => self.vld1(inst, dt)?,
            Opcode::VSt1(dt) => self.vst1(inst, dt)?,
        }
        Ok(Flow::Next)
    }

    fn scalar_ref(&self, operand: &OperandRef) -> SimResult<u32> {
        match operand {
            OperandRef::Register(Register::General(index)) => Ok(self.registers.general(*index)),
            OperandRef::Register(register) => Err(SimError::MalformedOperands {
                instruction: format!("{register} used as an address"),
            }),
            OperandRef::Param(name) => self.param(name).ok_or(SimError::UnboundParameter {
                name: name.clone(),
            }),
        }
    }

    fn set_scalar_ref(&mut self, operand: &OperandRef, value: u32) -> SimResult<()> {
        match operand {
            OperandRef::Register(Register::General(index)) => {
                self.registers.set_general(*index, value);
                Ok(())
            }
            OperandRef::Register(register) => Err(SimError::MalformedOperands {
                instruction: format!("{register} used as an address"),
            }),
            OperandRef::Param(name) => {
                if self.param(name).is_none() {
                    return Err(SimError::UnboundParameter { name: name.clone() });
                }
                self.set_param(name, value);
                Ok(())
            }
        }
    }

    fn scalar(&self, inst: &Instruction, operand: &Operand) -> SimResult<u32> {
        match operand {
            Operand::Reg(register @ Register::General(_)) => {
                self.scalar_ref(&OperandRef::Register(*register))
            }
            Operand::Param(name) => self.scalar_ref(&OperandRef::Param(name.clone())),
            Operand::Imm(value) => Ok(*value as u32),
            _ => Err(malformed(inst)),
        }
    }

    fn set_scalar(&mut self, inst: &Instruction, operand: &Operand, value: u32) -> SimResult<()> {
        match operand {
            Operand::Reg(register @ Register::General(_)) => {
                self.set_scalar_ref(&OperandRef::Register(*register), value)
            }
            Operand::Param(name) => self.set_scalar_ref(&OperandRef::Param(name.clone()), value),
            _ => Err(malformed(inst)),
        }
    }

    fn lane_value(
        &self,
        inst: &Instruction,
        register: Register,
        lane: u8,
        bits: u32,
    ) -> SimResult<u64> {
        split(&self.registers.vector(register), bits)
            .get(lane as usize)
            .copied()
            .ok_or_else(|| malformed(inst))
    }

    fn set_lane(
        &mut self,
        inst: &Instruction,
        register: Register,
        lane: u8,
        bits: u32,
        value: u64,
    ) -> SimResult<()> {
        let mut lanes = split(&self.registers.vector(register), bits);
        let slot = lanes.get_mut(lane as usize).ok_or_else(|| malformed(inst))?;
        *slot = value;
        self.registers.set_vector(register, &join(&lanes, bits));
        Ok(())
    }

    fn fill(&mut self, register: Register, bits: u32, value: u64) {
        let lanes = vec![truncate(value as i64, bits); register.bytes() * 8 / bits as usize];
        self.registers.set_vector(register, &join(&lanes, bits));
    }

    /// Bytes of a vector source operand of `width` bytes. A lane operand is
    /// a scalar broadcast to every lane.
    fn vector_source(
        &self,
        inst: &Instruction,
        operand: &Operand,
        width: usize,
        bits: u32,
    ) -> SimResult<Vec<u8>> {
        match operand {
            Operand::Lane(register, lane) => {
                let value = self.lane_value(inst, *register, *lane, bits)?;
                Ok(join(&vec![value; width * 8 / bits as usize], bits))
            }
            _ => {
                let register = vector_register(inst, operand)?;
                if register.bytes() != width {
                    return Err(malformed(inst));
                }
                Ok(self.registers.vector(register))
            }
        }
    }

    fn vmov(&mut self, inst: &Instruction, dt: DataType) -> SimResult<()> {
        let [dst, src] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let bits = dt.bits();
        match (dst, src) {
            (Operand::Lane(register, lane), _) => {
                let value = self.scalar(inst, src)? as u64;
                self.set_lane(inst, *register, *lane, bits, truncate(value as i64, bits))
            }
            (_, Operand::Imm(value)) => {
                let register = vector_register(inst, dst)?;
                self.fill(register, bits, *value as i64 as u64);
                Ok(())
            }
            _ => {
                let register = vector_register(inst, dst)?;
                let bytes = self.vector_source(inst, src, register.bytes(), bits)?;
                self.registers.set_vector(register, &bytes);
                Ok(())
            }
        }
    }

    fn vdup(&mut self, inst: &Instruction, dt: DataType) -> SimResult<()> {
        let [dst, src] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let register = vector_register(inst, dst)?;
        let bits = dt.bits();
        let value = match src {
            Operand::Lane(source, lane) => self.lane_value(inst, *source, *lane, bits)?,
            _ => self.scalar(inst, src)? as u64,
        };
        self.fill(register, bits, value);
        Ok(())
    }

    fn lanewise(&mut self, inst: &Instruction, dt: DataType) -> SimResult<()> {
        let [dst, a, b] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let register = vector_register(inst, dst)?;
        let (width, bits) = (register.bytes(), dt.bits());
        let a = split(&self.vector_source(inst, a, width, bits)?, bits);
        let b = split(&self.vector_source(inst, b, width, bits)?, bits);

        let lanes = a
            .iter()
            .zip(&b)
            .map(|(&x, &y)| {
                let lane = if dt == DataType::F32 {
                    float_op(inst.opcode, x, y)
                } else {
                    integer_op(inst.opcode, x, y, bits, is_signed(dt))
                };
                lane.ok_or_else(|| malformed(inst))
            })
            .collect::<SimResult<Vec<u64>>>()?;
        self.registers.set_vector(register, &join(&lanes, bits));
        Ok(())
    }

    /// `dst += a * b`, fused.
    fn vfma(&mut self, inst: &Instruction) -> SimResult<()> {
        let [dst, a, b] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let register = vector_register(inst, dst)?;
        let width = register.bytes();
        let acc = split(&self.registers.vector(register), 32);
        let a = split(&self.vector_source(inst, a, width, 32)?, 32);
        let b = split(&self.vector_source(inst, b, width, 32)?, 32);

        let lanes: Vec<u64> = acc
            .iter()
            .zip(a.iter().zip(&b))
            .map(|(&acc, (&x, &y))| {
                let (acc, x, y) = (
                    f32::from_bits(acc as u32),
                    f32::from_bits(x as u32),
                    f32::from_bits(y as u32),
                );
                x.mul_add(y, acc).to_bits() as u64
            })
            .collect();
        self.registers.set_vector(register, &join(&lanes, 32));
        Ok(())
    }

    /// `vmull` (narrow x narrow into wide) and `vaddw` (wide + narrow into
    /// wide).
    fn widening(&mut self, inst: &Instruction, dt: DataType) -> SimResult<()> {
        let [dst, a, b] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let register = wide_register(inst, dst)?;
        let (bits, signed) = (dt.bits(), is_signed(dt));
        let b = split(&self.registers.vector(narrow_register(inst, b)?), bits);

        let lanes: Vec<u64> = match inst.opcode {
            Opcode::VMull(_) => {
                let a = split(&self.registers.vector(narrow_register(inst, a)?), bits);
                a.iter()
                    .zip(&b)
                    .map(|(&x, &y)| {
                        let product = extend(x, bits, signed).wrapping_mul(extend(y, bits, signed));
                        truncate(product, 2 * bits)
                    })
                    .collect()
            }
            _ => {
                let a = split(&self.registers.vector(wide_register(inst, a)?), 2 * bits);
                a.iter()
                    .zip(&b)
                    .map(|(&x, &y)| {
                        let sum = extend(x, 2 * bits, signed).wrapping_add(extend(y, bits, signed));
                        truncate(sum, 2 * bits)
                    })
                    .collect()
            }
        };
        self.registers.set_vector(register, &join(&lanes, 2 * bits));
        Ok(())
    }

    /// Adjacent lanes of `a`, then of `b`, added pairwise.
    fn vpadd(&mut self, inst: &Instruction, dt: DataType) -> SimResult<()> {
        let [dst, a, b] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let register = narrow_register(inst, dst)?;
        let bits = dt.bits();
        let mut lanes = Vec::new();
        for source in [a, b] {
            let values = split(&self.registers.vector(narrow_register(inst, source)?), bits);
            for pair in values.chunks(2) {
                let sum = if dt == DataType::F32 {
                    float_op(Opcode::VAdd(dt), pair[0], pair[1]).ok_or_else(|| malformed(inst))?
                } else {
                    truncate((pair[0] as i64).wrapping_add(pair[1] as i64), bits)
                };
                lanes.push(sum);
            }
        }
        self.registers.set_vector(register, &join(&lanes, bits));
        Ok(())
    }

    /// `vpaddl` / `vpadal`: adjacent lanes added into lanes twice as wide,
    /// optionally accumulated into the destination.
    fn pairwise_long(&mut self, inst: &Instruction, dt: DataType, accumulate: bool) -> SimResult<()> {
        let [dst, src] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let register = vector_register(inst, dst)?;
        let source = vector_register(inst, src)?;
        if register.bytes() != source.bytes() {
            return Err(malformed(inst));
        }
        let (bits, signed) = (dt.bits(), is_signed(dt));
        let values = split(&self.registers.vector(source), bits);
        let previous = split(&self.registers.vector(register), 2 * bits);

        let lanes: Vec<u64> = values
            .chunks(2)
            .zip(previous)
            .map(|(pair, previous)| {
                let mut sum = extend(pair[0], bits, signed) + extend(pair[1], bits, signed);
                if accumulate {
                    sum = sum.wrapping_add(extend(previous, 2 * bits, signed));
                }
                truncate(sum, 2 * bits)
            })
            .collect();
        self.registers.set_vector(register, &join(&lanes, 2 * bits));
        Ok(())
    }

    fn vmovl(&mut self, inst: &Instruction, dt: DataType) -> SimResult<()> {
        let [dst, src] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let register = wide_register(inst, dst)?;
        let (bits, signed) = (dt.bits(), is_signed(dt));
        let values = split(&self.registers.vector(narrow_register(inst, src)?), bits);
        let lanes: Vec<u64> = values
            .iter()
            .map(|&value| truncate(extend(value, bits, signed), 2 * bits))
            .collect();
        self.registers.set_vector(register, &join(&lanes, 2 * bits));
        Ok(())
    }

    /// Saturating narrow of a wide register into a narrow one.
    fn narrowing(&mut self, inst: &Instruction, dt: DataType, signed_result: bool) -> SimResult<()> {
        let [dst, src] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let register = narrow_register(inst, dst)?;
        let (bits, signed) = (dt.bits(), is_signed(dt));
        let values = split(&self.registers.vector(wide_register(inst, src)?), bits);
        let lanes: Vec<u64> = values
            .iter()
            .map(|&value| saturate(extend(value, bits, signed), bits / 2, signed_result))
            .collect();
        self.registers.set_vector(register, &join(&lanes, bits / 2));
        Ok(())
    }

    fn vcvt(&mut self, inst: &Instruction, to: DataType, from: DataType) -> SimResult<()> {
        let [dst, src] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let register = vector_register(inst, dst)?;
        let source = vector_register(inst, src)?;
        if register.bytes() != source.bytes() {
            return Err(malformed(inst));
        }
        let convert = |value: u64| -> Option<u64> {
            let value = value as u32;
            let converted = match (to, from) {
                (DataType::F32, DataType::S32) => (value as i32 as f32).to_bits(),
                (DataType::F32, DataType::U32) => (value as f32).to_bits(),
                // Rust float to int casts truncate toward zero and saturate,
                // which is what the NEON conversion does.
                (DataType::S32, DataType::F32) => f32::from_bits(value) as i32 as u32,
                (DataType::U32, DataType::F32) => f32::from_bits(value) as u32,
                _ => return None,
            };
            Some(converted as u64)
        };
        let lanes = split(&self.registers.vector(source), 32)
            .into_iter()
            .map(|value| convert(value).ok_or_else(|| malformed(inst)))
            .collect::<SimResult<Vec<u64>>>()?;
        self.registers.set_vector(register, &join(&lanes, 32));
        Ok(())
    }

    /// Address of a memory operand, checked against its alignment qualifier.
    fn effective_address(&self, inst: &Instruction, operand: &Operand) -> SimResult<u32> {
        let Operand::Mem { base, align, .. } = operand else {
            return Err(malformed(inst));
        };
        let address = self.scalar_ref(base)?;
        if let Some(bits) = align {
            if address % (bits / 8) != 0 {
                return Err(SimError::Misaligned {
                    address,
                    align: *bits,
                });
            }
        }
        Ok(address)
    }

    fn post_index(&mut self, operand: &Operand, transferred: usize) -> SimResult<()> {
        let Operand::Mem { base, post, .. } = operand else {
            return Ok(());
        };
        let advance = match post {
            PostIndex::None => return Ok(()),
            PostIndex::Writeback => transferred as u32,
            PostIndex::Stride(stride) => self.scalar_ref(stride)?,
        };
        let address = self.scalar_ref(base)?;
        self.set_scalar_ref(base, address.wrapping_add(advance))
    }

    fn vld1(&mut self, inst: &Instruction, dt: DataType) -> SimResult<()> {
        let [Operand::List(items), address] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let bits = dt.bits();
        let size = (bits / 8) as usize;
        let base = self.effective_address(inst, address)?;

        // `{d0[], d1[]}` reads one element and replicates it everywhere.
        let transferred = if items.iter().all(|item| matches!(item, Operand::AllLanes(_))) {
            let element = split(self.memory.read(base, size)?, bits)[0];
            for item in items {
                if let Operand::AllLanes(register) = item {
                    self.fill(*register, bits, element);
                }
            }
            size
        } else {
            let mut offset = 0usize;
            for item in items {
                let address = base.wrapping_add(offset as u32);
                match item {
                    Operand::Reg(register @ Register::Narrow(_)) => {
                        let bytes = self.memory.read(address, 8)?.to_vec();
                        self.registers.set_vector(*register, &bytes);
                        offset += 8;
                    }
                    Operand::Lane(register, lane) => {
                        let value = split(self.memory.read(address, size)?, bits)[0];
                        self.set_lane(inst, *register, *lane, bits, value)?;
                        offset += size;
                    }
                    _ => return Err(malformed(inst)),
                }
            }
            offset
        };
        self.post_index(address, transferred)
    }

    fn vst1(&mut self, inst: &Instruction, dt: DataType) -> SimResult<()> {
        let [Operand::List(items), address] = inst.operands.as_slice() else {
            return Err(malformed(inst));
        };
        let bits = dt.bits();
        let base = self.effective_address(inst, address)?;

        let mut offset = 0usize;
        for item in items {
            let bytes = match item {
                Operand::Reg(register @ Register::Narrow(_)) => self.registers.vector(*register),
                Operand::Lane(register, lane) => {
                    join(&[self.lane_value(inst, *register, *lane, bits)?], bits)
                }
                _ => return Err(malformed(inst)),
            };
            self.memory.write(base.wrapping_add(offset as u32), &bytes)?;
            offset += bytes.len();
        }
        self.post_index(address, offset)
    }
}
