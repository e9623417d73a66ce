//! CPU状态管理

use std::fmt;

use super::memory::{Memory, MemoryError};
use crate::debugger::MachineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ExecState {
    #[default]
    Idle,
    Running,
    /// 因断点命中而暂停
    Stopped,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Event {
    #[default]
    None,
    Halted,
    /// 指令断点，停在该地址的指令执行之前
    Break(u32),
    WatchWrite(u32),
    WatchRead(u32),
}

/// CPU状态
#[derive(Debug, Clone)]
pub struct State {
    // 通用寄存器
    gpr: [u32; 32],
    // 浮点寄存器
    fpr: [f64; 32],
    pc: u32,
    lr: u32,
    ctr: u32,
    msr: u32,
    xer: u32,
    memory: Memory,
}

impl State {
    /// 创建新的CPU状态，PC指向内存起始地址
    pub fn new(memory_base: u32, memory_size: usize) -> Result<Self, MemoryError> {
        Ok(Self {
            gpr: [0; 32],
            fpr: [0.0; 32],
            pc: memory_base,
            lr: 0,
            ctr: 0,
            msr: 0,
            xer: 0,
            memory: Memory::new(memory_base, memory_size)?,
        })
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.memory.write(addr, data)
    }

    pub fn fetch_instruction(&self, pc: u32) -> Result<u32, MemoryError> {
        self.memory.fetch(pc)
    }

    pub fn get_gpr(&self, reg: usize) -> u32 {
        self.gpr[reg & 31]
    }

    pub fn set_gpr(&mut self, reg: usize, value: u32) {
        self.gpr[reg & 31] = value;
    }

    pub fn get_fpr(&self, reg: usize) -> f64 {
        self.fpr[reg & 31]
    }

    pub fn get_pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, value: u32) {
        self.pc = value;
    }

    pub fn get_lr(&self) -> u32 {
        self.lr
    }

    pub fn set_lr(&mut self, value: u32) {
        self.lr = value;
    }
}

impl MachineState for State {
    fn gpr(&self, index: usize) -> u32 {
        self.get_gpr(index)
    }

    fn fpr(&self, index: usize) -> f64 {
        self.get_fpr(index)
    }

    fn pc(&self) -> u32 {
        self.pc
    }

    fn lr(&self) -> u32 {
        self.lr
    }

    fn ctr(&self) -> u32 {
        self.ctr
    }

    fn msr(&self) -> u32 {
        self.msr
    }

    fn xer(&self) -> u32 {
        self.xer
    }

    fn read_u8(&self, addr: u32) -> Option<u8> {
        self.memory.read_u8(addr).ok()
    }

    fn read_u16(&self, addr: u32) -> Option<u16> {
        self.memory.read_u16(addr).ok()
    }

    fn read_u32(&self, addr: u32) -> Option<u32> {
        self.memory.read_u32(addr).ok()
    }

    fn read_u64(&self, addr: u32) -> Option<u64> {
        self.memory.read_u64(addr).ok()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pc: {:#010x}  lr: {:#010x}  ctr: {:#010x}  msr: {:#010x}  xer: {:#010x}",
            self.pc, self.lr, self.ctr, self.msr, self.xer
        )?;
        for (row, regs) in self.gpr.chunks(4).enumerate() {
            for (col, value) in regs.iter().enumerate() {
                write!(f, "r{:<2}: {:#010x}  ", row * 4 + col, value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
