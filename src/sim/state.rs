//! Architectural register state: general registers, the narrow vector file
//! (wide registers are views over pairs of narrow ones) and the Z/N flags.

use crate::core::register_pool::Register;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterState {
    general: [u32; 16],
    narrow: [u64; 32],
    /// Set by `subs` when the result is zero.
    pub zero: bool,
    /// Set by `subs` when the result is negative.
    pub negative: bool,
}

impl RegisterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn general(&self, index: u8) -> u32 {
        self.general[index as usize]
    }

    pub fn set_general(&mut self, index: u8, value: u32) {
        self.general[index as usize] = value;
    }

    pub fn narrow(&self, index: u8) -> u64 {
        self.narrow[index as usize]
    }

    /// Little-endian contents of a narrow or wide register; empty for a
    /// general register.
    pub fn vector(&self, register: Register) -> Vec<u8> {
        register
            .narrow_parts()
            .iter()
            .flat_map(|part| self.narrow[part.index() as usize].to_le_bytes())
            .collect()
    }

    /// Overwrite a narrow or wide register. `bytes` must hold exactly
    /// `register.bytes()` bytes.
    pub fn set_vector(&mut self, register: Register, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), register.bytes());
        for (part, chunk) in register.narrow_parts().iter().zip(bytes.chunks_exact(8)) {
            let mut value = [0u8; 8];
            value.copy_from_slice(chunk);
            self.narrow[part.index() as usize] = u64::from_le_bytes(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_is_view_over_narrow_pair() {
        let mut state = RegisterState::new();
        let bytes: Vec<u8> = (0..16).collect();
        state.set_vector(Register::Wide(1), &bytes);

        assert_eq!(state.narrow(2), u64::from_le_bytes([0, 1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(
            state.narrow(3),
            u64::from_le_bytes([8, 9, 10, 11, 12, 13, 14, 15])
        );
        assert_eq!(state.vector(Register::Narrow(3)), bytes[8..].to_vec());
        assert_eq!(state.vector(Register::Wide(1)), bytes);
        assert!(state.vector(Register::General(0)).is_empty());
    }
}
