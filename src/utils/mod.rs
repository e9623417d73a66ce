//! 工具模块

pub mod disasm;
mod elf;
pub mod ringbuf;

pub use disasm::{PpcDisassembler, disasm_ppc_instruction};
pub use elf::load_elf;
