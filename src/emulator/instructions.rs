//! PowerPC整数指令子集
//!
//! 仅覆盖驱动调试器所需的立即数运算、字/字节访存和无条件跳转。

use anyhow::Result;

use super::Emulator;

#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    pub mask: u32,
    pub identifier: u32,
    pub name: &'static str,
    pub execute: fn(emu: &mut Emulator, inst: u32, pc: u32) -> Result<()>,
}

const MASK_OPCODE: u32 = 0xfc00_0000;
/// 跳转指令额外比较LK位
const MASK_BRANCH: u32 = MASK_OPCODE | 0b01;

const fn primary(opcode: u32) -> u32 {
    opcode << 26
}

/// D格式: `op rD, d(rA)` 或 `op rD, rA, SIMM`
struct FormD {
    rt: usize,
    ra: usize,
    imm: u32,
}

fn parse_format_d(inst: u32) -> FormD {
    FormD {
        rt: ((inst >> 21) & 0x1f) as usize,
        ra: ((inst >> 16) & 0x1f) as usize,
        imm: inst as u16 as i16 as i32 as u32,
    }
}

/// rA为0时取常数0
fn base_or_zero(emu: &Emulator, ra: usize) -> u32 {
    if ra == 0 { 0 } else { emu.state.get_gpr(ra) }
}

fn branch_target(inst: u32, pc: u32) -> u32 {
    // 26位有符号偏移
    let li = (((inst & 0x03ff_fffc) << 6) as i32 >> 6) as u32;
    if inst & 0b10 != 0 { li } else { pc.wrapping_add(li) }
}

pub const PPC_BASE: &[Instruction] = &[
    Instruction {
        mask: 0xffff_ffff,
        identifier: 0,
        name: "halt",
        execute: |emu: &mut Emulator, _inst: u32, pc: u32| {
            emu.halt(pc);
            Ok(())
        },
    },
    Instruction {
        mask: MASK_OPCODE,
        identifier: primary(14),
        name: "addi",
        execute: |emu: &mut Emulator, inst: u32, _pc: u32| {
            let d = parse_format_d(inst);
            let value = base_or_zero(emu, d.ra).wrapping_add(d.imm);
            emu.state.set_gpr(d.rt, value);
            Ok(())
        },
    },
    Instruction {
        mask: MASK_OPCODE,
        identifier: primary(15),
        name: "addis",
        execute: |emu: &mut Emulator, inst: u32, _pc: u32| {
            let d = parse_format_d(inst);
            let value = base_or_zero(emu, d.ra).wrapping_add(d.imm << 16);
            emu.state.set_gpr(d.rt, value);
            Ok(())
        },
    },
    Instruction {
        mask: MASK_OPCODE,
        identifier: primary(24),
        name: "ori",
        execute: |emu: &mut Emulator, inst: u32, _pc: u32| {
            // ori rA, rS, UIMM: 目标寄存器在rA字段
            let d = parse_format_d(inst);
            let value = emu.state.get_gpr(d.rt) | (inst & 0xffff);
            emu.state.set_gpr(d.ra, value);
            Ok(())
        },
    },
    Instruction {
        mask: MASK_OPCODE,
        identifier: primary(32),
        name: "lwz",
        execute: |emu: &mut Emulator, inst: u32, _pc: u32| {
            let d = parse_format_d(inst);
            let ea = base_or_zero(emu, d.ra).wrapping_add(d.imm);
            let value = emu.load_u32(ea)?;
            emu.state.set_gpr(d.rt, value);
            Ok(())
        },
    },
    Instruction {
        mask: MASK_OPCODE,
        identifier: primary(34),
        name: "lbz",
        execute: |emu: &mut Emulator, inst: u32, _pc: u32| {
            let d = parse_format_d(inst);
            let ea = base_or_zero(emu, d.ra).wrapping_add(d.imm);
            let value = emu.load_u8(ea)?;
            emu.state.set_gpr(d.rt, value as u32);
            Ok(())
        },
    },
    Instruction {
        mask: MASK_OPCODE,
        identifier: primary(36),
        name: "stw",
        execute: |emu: &mut Emulator, inst: u32, _pc: u32| {
            let d = parse_format_d(inst);
            let ea = base_or_zero(emu, d.ra).wrapping_add(d.imm);
            emu.store_u32(ea, emu.state.get_gpr(d.rt))
        },
    },
    Instruction {
        mask: MASK_OPCODE,
        identifier: primary(38),
        name: "stb",
        execute: |emu: &mut Emulator, inst: u32, _pc: u32| {
            let d = parse_format_d(inst);
            let ea = base_or_zero(emu, d.ra).wrapping_add(d.imm);
            emu.store_u8(ea, emu.state.get_gpr(d.rt) as u8)
        },
    },
    Instruction {
        mask: MASK_BRANCH,
        identifier: primary(18),
        name: "b",
        execute: |emu: &mut Emulator, inst: u32, pc: u32| {
            emu.state.set_pc(branch_target(inst, pc));
            Ok(())
        },
    },
    Instruction {
        mask: MASK_BRANCH,
        identifier: primary(18) | 0b01,
        name: "bl",
        execute: |emu: &mut Emulator, inst: u32, pc: u32| {
            emu.state.set_lr(pc.wrapping_add(4));
            emu.state.set_pc(branch_target(inst, pc));
            Ok(())
        },
    },
];

pub fn decode(inst: u32) -> Option<&'static Instruction> {
    PPC_BASE.iter().find(|x| inst & x.mask == x.identifier)
}
