//! Lanes: the per-row register bundle of an N-row tile.

use crate::core::error::GenResult;
use crate::core::register_pool::{OperandRef, Register, RegisterPool};

use super::context::KernelContext;

/// Row `i` of a tile: where it is read from or written to, the register its
/// data is loaded into and, for reducing kernels, its running sum.
#[derive(Debug, Clone)]
pub struct Lane {
    pub address: OperandRef,
    pub load: Register,
    pub aggregator: Option<Register>,
}

/// The lanes of one tile operand.
#[derive(Debug, Clone)]
pub struct LaneGroup {
    /// Address of row 0; also the shared stream address for packed operands.
    pub address: OperandRef,
    pub lanes: Vec<Lane>,
}

impl LaneGroup {
    pub fn new(address: OperandRef) -> Self {
        Self {
            address,
            lanes: Vec::new(),
        }
    }

    pub fn push(&mut self, lane: Lane) {
        self.lanes.push(lane);
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn loads(&self) -> Vec<Register> {
        self.lanes.iter().map(|lane| lane.load).collect()
    }

    pub fn aggregators(&self) -> Vec<Register> {
        self.lanes.iter().filter_map(|lane| lane.aggregator).collect()
    }

    /// Release every register the lanes own. Addresses shared with the group
    /// or bound to parameters are not registers of the pool.
    pub fn free(&self, registers: &mut RegisterPool) -> GenResult<()> {
        for lane in &self.lanes {
            registers.free(lane.load)?;
            if let Some(aggregator) = lane.aggregator {
                registers.free(aggregator)?;
            }
            if lane.address != self.address {
                registers.free_operand(&lane.address)?;
            }
        }
        Ok(())
    }
}

/// Addresses of `rows` rows spaced `stride` bytes apart. Row 0 is `base`;
/// every following row costs one general register and one `add` chained
/// from the previous row.
pub fn chain_row_addresses(
    cx: &mut KernelContext,
    base: &OperandRef,
    stride: &OperandRef,
    rows: usize,
) -> GenResult<Vec<OperandRef>> {
    let mut addresses = vec![base.clone()];
    for _ in 1..rows {
        let register = cx.registers.allocate_general()?;
        let previous = addresses[addresses.len() - 1].clone();
        cx.emitter.add(register, &previous, stride);
        addresses.push(OperandRef::Register(register));
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::register_pool::AccessMode;
    use crate::kernels::context::GenOptions;
    use crate::neon::emitter::Line;

    #[test]
    fn test_chained_addresses() {
        let mut cx = KernelContext::new(&GenOptions::default());
        cx.emitter.begin_asm_block();
        let source = cx.registers.bind_parameter("source", AccessMode::ReadWrite);
        let stride = cx.registers.bind_parameter("stride", AccessMode::Input);
        let addresses = chain_row_addresses(&mut cx, &source, &stride, 3).unwrap();

        assert_eq!(
            addresses,
            vec![
                source.clone(),
                OperandRef::Register(Register::General(0)),
                OperandRef::Register(Register::General(1)),
            ]
        );
        let rendered: Vec<String> = cx
            .emitter
            .lines()
            .iter()
            .filter_map(|l| match &l.line {
                Line::Instruction(inst) => Some(inst.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(
            rendered,
            vec!["add r0, %[source], %[stride]", "add r1, r0, %[stride]"]
        );
    }

    #[test]
    fn test_group_free_releases_lane_registers() {
        let mut cx = KernelContext::new(&GenOptions::default());
        cx.emitter.begin_asm_block();
        let source = cx.registers.bind_parameter("source", AccessMode::ReadWrite);
        let stride = cx.registers.bind_parameter("stride", AccessMode::Input);

        let mut group = LaneGroup::new(source.clone());
        for address in chain_row_addresses(&mut cx, &source, &stride, 2).unwrap() {
            let load = cx.registers.allocate_narrow(0).unwrap();
            let aggregator = cx.registers.allocate_wide(2).unwrap();
            group.push(Lane {
                address,
                load,
                aggregator: Some(aggregator),
            });
        }
        assert_eq!(group.loads(), vec![Register::Narrow(0), Register::Narrow(1)]);
        assert_eq!(group.aggregators(), vec![Register::Wide(2), Register::Wide(3)]);

        group.free(&mut cx.registers).unwrap();
        assert!(cx.registers.in_use().is_empty());
    }
}
