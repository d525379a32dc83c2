//! Flat byte memory with explicit allocations.
//!
//! Every access must fall entirely inside one allocation, so a kernel that
//! reads or writes one byte past a buffer fails instead of silently touching
//! a neighbour.

use super::{SimError, SimResult};

/// First address handed out; keeps address 0 unmapped.
const BASE_ADDRESS: u32 = 0x1000;

/// Gap left between allocations.
const GUARD_BYTES: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    start: u32,
    len: u32,
}

impl Region {
    fn contains(&self, address: u32, len: usize) -> bool {
        let end = address as u64 + len as u64;
        address >= self.start && end <= self.start as u64 + self.len as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct Memory {
    bytes: Vec<u8>,
    regions: Vec<Region>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_free(&self) -> u32 {
        BASE_ADDRESS + self.bytes.len() as u32
    }

    /// Allocate `len` zeroed bytes whose address is `offset` bytes past a
    /// 64-byte boundary. A non-zero offset produces deliberately misaligned
    /// buffers.
    pub fn alloc_with_offset(&mut self, len: usize, offset: u32) -> u32 {
        let aligned = self.next_free().next_multiple_of(64) + GUARD_BYTES;
        let start = aligned + offset;
        let end = start + len as u32;
        self.bytes.resize((end - BASE_ADDRESS) as usize, 0);
        self.regions.push(Region {
            start,
            len: len as u32,
        });
        start
    }

    /// Allocate `len` zeroed bytes on a 64-byte boundary.
    pub fn alloc(&mut self, len: usize) -> u32 {
        self.alloc_with_offset(len, 0)
    }

    /// Allocate and fill.
    pub fn alloc_bytes(&mut self, data: &[u8]) -> u32 {
        let address = self.alloc(data.len());
        self.bytes[(address - BASE_ADDRESS) as usize..][..data.len()].copy_from_slice(data);
        address
    }

    pub fn alloc_i32s(&mut self, values: &[i32]) -> u32 {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.alloc_bytes(&bytes)
    }

    pub fn alloc_f32s(&mut self, values: &[f32]) -> u32 {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.alloc_bytes(&bytes)
    }

    fn check(&self, address: u32, len: usize) -> SimResult<usize> {
        if self.regions.iter().any(|r| r.contains(address, len)) {
            Ok((address - BASE_ADDRESS) as usize)
        } else {
            Err(SimError::Unmapped { address, len })
        }
    }

    pub fn read(&self, address: u32, len: usize) -> SimResult<&[u8]> {
        let offset = self.check(address, len)?;
        Ok(&self.bytes[offset..offset + len])
    }

    pub fn write(&mut self, address: u32, data: &[u8]) -> SimResult<()> {
        let offset = self.check(address, data.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read_i32s(&self, address: u32, count: usize) -> SimResult<Vec<i32>> {
        let bytes = self.read(address, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn read_f32s(&self, address: u32, count: usize) -> SimResult<Vec<f32>> {
        let bytes = self.read(address, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
