//! Element-count loads and stores.
//!
//! A block of `count` elements is moved between memory and the narrow halves
//! of a register list: whole 8-byte halves first (up to four consecutive
//! registers per `vld1`/`vst1`), then the remaining bytes as a 4-byte, a
//! 2-byte and a 1-byte lane transfer. Every transfer post-increments the
//! address.

use crate::core::error::{GenError, GenResult};
use crate::core::register_pool::{OperandRef, Register};

use super::emitter::Emitter;
use super::instruction::{DataType, Operand};

/// A partial transfer of `bits` bits into lane `lane` of a narrow register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub bits: u32,
    /// Lane index in units of `bits`.
    pub lane: u8,
}

impl Piece {
    pub fn data_type(self) -> DataType {
        DataType::for_bits(self.bits)
    }
}

/// Cover `bytes` (< 8) with the fewest lane transfers, widest first.
///
/// 3 bytes become a 2-byte piece at lane 0 and a 1-byte piece at lane 2;
/// 7 bytes become 4 + 2 + 1.
pub fn byte_pieces(bytes: usize) -> Vec<Piece> {
    debug_assert!(bytes < 8);
    let mut pieces = Vec::new();
    let mut offset = 0;
    for size in [4usize, 2, 1] {
        if bytes & size != 0 {
            pieces.push(Piece {
                bits: (size * 8) as u32,
                lane: (offset / size) as u8,
            });
            offset += size;
        }
    }
    pieces
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Load,
    Store,
}

fn emit_transfer(e: &mut Emitter, transfer: Transfer, dt: DataType, list: Operand, address: Operand) {
    match transfer {
        Transfer::Load => e.vld1(dt, list, address),
        Transfer::Store => e.vst1(dt, list, address),
    }
}

/// Split narrow registers into runs of at most four consecutive registers,
/// the longest register list a single `vld1`/`vst1` accepts.
fn consecutive_runs(doubles: &[Register]) -> Vec<Vec<Register>> {
    let mut runs: Vec<Vec<Register>> = Vec::new();
    for reg in doubles {
        match runs.last_mut() {
            Some(run)
                if run.len() < 4
                    && run
                        .last()
                        .is_some_and(|last| last.index() + 1 == reg.index()) =>
            {
                run.push(*reg)
            }
            _ => runs.push(vec![*reg]),
        }
    }
    runs
}

fn transfer_elements(
    e: &mut Emitter,
    transfer: Transfer,
    element_bits: u32,
    count: usize,
    regs: &[Register],
    address: &OperandRef,
    align: Option<u32>,
) -> GenResult<()> {
    let doubles: Vec<Register> = regs.iter().flat_map(|r| r.narrow_parts()).collect();
    let bytes = count * element_bits as usize / 8;
    if bytes > doubles.len() * 8 {
        return Err(GenError::protocol(format!(
            "{count} elements of {element_bits} bits do not fit in {} registers",
            regs.len()
        )));
    }

    let full = bytes / 8;
    for run in consecutive_runs(&doubles[..full]) {
        emit_transfer(
            e,
            transfer,
            DataType::Bits32,
            Operand::list(&run),
            Operand::deref_increment(address, align),
        );
    }

    let remainder = bytes % 8;
    if remainder > 0 {
        let target = doubles[full];
        for piece in byte_pieces(remainder) {
            emit_transfer(
                e,
                transfer,
                piece.data_type(),
                Operand::List(vec![Operand::lane(target, piece.lane)]),
                Operand::deref_increment(address, None),
            );
        }
    }
    Ok(())
}

/// Load `count` elements of `element_bits` bits into `regs`.
pub fn load_elements(
    e: &mut Emitter,
    element_bits: u32,
    count: usize,
    regs: &[Register],
    address: &OperandRef,
    align: Option<u32>,
) -> GenResult<()> {
    transfer_elements(e, Transfer::Load, element_bits, count, regs, address, align)
}

/// Store `count` elements of `element_bits` bits from `regs`.
pub fn store_elements(
    e: &mut Emitter,
    element_bits: u32,
    count: usize,
    regs: &[Register],
    address: &OperandRef,
    align: Option<u32>,
) -> GenResult<()> {
    transfer_elements(e, Transfer::Store, element_bits, count, regs, address, align)
}
