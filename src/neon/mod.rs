// This module groups everything that knows about the ARMv7 NEON instruction set: the structured
// instruction model and its GNU assembler rendering (instruction), the instruction emitter with
// its lexical scopes and per-opcode counters (emitter), and the element-count load/store
// sequences shared by the kernel generators (memory).

//! NEON instruction model and emission.

pub mod emitter;
pub mod instruction;
pub mod memory;

pub use emitter::{Emitter, IndentedLine, Line, Scope};
pub use instruction::{Condition, DataType, Direction, Instruction, Opcode, Operand, PostIndex};
pub use memory::{byte_pieces, load_elements, store_elements, Piece};
