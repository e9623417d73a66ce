//! 模拟器核心模块
//!
//! 每步先检查指令断点，命中且要求中断时停在指令执行之前；
//! 内存断点在访存前检查，命中后当前指令照常完成再暂停。

mod instructions;
mod memory;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::const_values::EmuConfig;
use crate::debugger::{AccessKind, DebugContext, HitDecision, HitEvaluator, HitKind, HitRecord};
use crate::symbols::SymbolResolver;
use crate::utils::disasm_ppc_instruction;
use crate::utils::ringbuf::RingBuffer;

pub use memory::{Memory, MemoryError};
pub use state::{Event, ExecState, State};

/// 模拟器结构体
pub struct Emulator {
    /// CPU状态（包含内存）
    state: State,
    evaluator: HitEvaluator,
    exec_state: ExecState,
    event: Event,
    event_list: RingBuffer<Event>,
    /// 从指令断点恢复时，跳过一次该地址的断点检查
    resume_from: Option<u32>,
}

impl Emulator {
    pub fn new(config: &EmuConfig, ctx: &DebugContext) -> Result<Self> {
        let memory_size = config.memory.memory_size * 1024 * 1024;
        let state = State::new(config.memory.memory_base, memory_size)
            .with_context(|| format!("无法创建 {} MB 内存", config.memory.memory_size))?;
        Ok(Self {
            state,
            evaluator: HitEvaluator::new(ctx, config.debug.hit_log_size),
            exec_state: ExecState::Idle,
            event: Event::None,
            event_list: RingBuffer::new(config.debug.event_list_size),
            resume_from: None,
        })
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolResolver>) -> Self {
        self.evaluator = self.evaluator.with_symbols(symbols);
        self
    }

    /// 加载ELF文件
    pub fn load_elf(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        crate::utils::load_elf(&mut self.state, path)
            .with_context(|| format!("无法从 '{}' 加载ELF文件", path.display()))
    }

    /// 按大端写入指令序列并把PC指向起始地址
    pub fn load_program(&mut self, addr: u32, code: &[u32]) -> Result<()> {
        let bytes: Vec<u8> = code.iter().flat_map(|word| word.to_be_bytes()).collect();
        self.state
            .write_memory(addr, &bytes)
            .with_context(|| format!("无法在 {:#010x} 处写入程序", addr))?;
        self.state.set_pc(addr);
        self.exec_state = ExecState::Idle;
        self.resume_from = None;
        Ok(())
    }

    #[inline(always)]
    fn step_internal(&mut self) -> Result<()> {
        let pc = self.state.get_pc();
        self.evaluator.begin_step(pc);

        let resuming = self.resume_from.take() == Some(pc);
        if !resuming
            && self.evaluator.check_instruction(&self.state)
            && self.evaluator.has_pending_break()
        {
            let decision = self.evaluator.finish_step();
            self.apply_decision(decision);
            return Ok(());
        }

        let instruction = self
            .state
            .fetch_instruction(pc)
            .with_context(|| format!("无法从PC {:#010x} 处读取指令", pc))?;
        let inst = instructions::decode(instruction).ok_or_else(|| {
            anyhow!(
                "未实现的指令 {:#010x} ({}) 位于 {:#010x}",
                instruction,
                disasm_ppc_instruction(instruction, pc).unwrap_or_else(|_| "未知指令".to_string()),
                pc
            )
        })?;

        self.state.set_pc(pc.wrapping_add(4));
        (inst.execute)(self, instruction, pc).with_context(|| {
            format!(
                "无法执行PC {:#010x} 处的指令 {:#010x} ({}), cpu状态:\n{}",
                pc, instruction, inst.name, self.state
            )
        })?;

        let decision = self.evaluator.finish_step();
        self.apply_decision(decision);
        Ok(())
    }

    fn apply_decision(&mut self, decision: HitDecision) {
        let HitDecision::Break { kind, address } = decision else {
            return;
        };
        self.event = match kind {
            HitKind::Instruction => {
                self.resume_from = Some(address);
                Event::Break(address)
            }
            HitKind::Read => Event::WatchRead(address),
            HitKind::Write => Event::WatchWrite(address),
        };
        self.exec_state = ExecState::Stopped;
        debug!(event = ?self.event, pc = format_args!("{:#010x}", self.state.get_pc()), "执行暂停");
    }

    pub(crate) fn halt(&mut self, pc: u32) {
        self.state.set_pc(pc);
        self.event = Event::Halted;
        self.exec_state = ExecState::End;
        info!(pc = format_args!("{pc:#010x}"), steps = self.evaluator.step_count(), "程序结束");
    }

    pub(crate) fn load_u32(&mut self, addr: u32) -> Result<u32> {
        self.evaluator.check_memory(addr, 4, AccessKind::Read, &self.state);
        Ok(self.state.memory().read_u32(addr)?)
    }

    pub(crate) fn load_u8(&mut self, addr: u32) -> Result<u8> {
        self.evaluator.check_memory(addr, 1, AccessKind::Read, &self.state);
        Ok(self.state.memory().read_u8(addr)?)
    }

    pub(crate) fn store_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.evaluator.check_memory(addr, 4, AccessKind::Write, &self.state);
        Ok(self.state.memory_mut().write_u32(addr, value)?)
    }

    pub(crate) fn store_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        self.evaluator.check_memory(addr, 1, AccessKind::Write, &self.state);
        Ok(self.state.memory_mut().write_u8(addr, value)?)
    }

    /// 执行单步指令，返回本步事件
    pub fn step(&mut self) -> Result<Event> {
        if self.exec_state == ExecState::End {
            return Ok(Event::Halted);
        }
        self.exec_state = ExecState::Running;
        self.event = Event::None;

        self.step_internal()?;

        // 捕获除了None以外的event，放入事件列表
        if self.event != Event::None {
            self.event_list.push_overwrite(self.event);
        }
        if self.exec_state == ExecState::Running {
            self.exec_state = ExecState::Idle;
        }
        Ok(self.event)
    }

    /// 最多执行 `n` 步，遇到中断或结束时提前返回
    pub fn steps(&mut self, n: usize) -> Result<Event> {
        for _ in 0..n {
            let event = self.step()?;
            if event != Event::None {
                return Ok(event);
            }
        }
        Ok(Event::None)
    }

    /// 运行直到中断或结束
    pub fn run(&mut self) -> Result<Event> {
        self.steps(usize::MAX)
    }

    #[inline(always)]
    pub fn get_state_ref(&self) -> &State {
        &self.state
    }

    #[inline(always)]
    pub fn get_exec_state(&self) -> ExecState {
        self.exec_state
    }

    // 返回事件列表
    pub fn get_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_list.pop() {
            events.push(event);
        }
        events
    }

    pub fn hit_log(&self) -> impl Iterator<Item = &HitRecord> {
        self.evaluator.hit_log()
    }
}
