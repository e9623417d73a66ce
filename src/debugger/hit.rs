//! 命中判定
//!
//! 执行核心每步调用顺序：
//! `begin_step(pc)` → `check_instruction` → 每次内存访问 `check_memory` → `finish_step`。
//! 条件求值失败按"条件成立"处理，命中照常触发。

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::expression::{Expression, MachineState};
use super::memchecks::AccessKind;
use super::DebugContext;
use crate::symbols::SymbolResolver;
use crate::utils::ringbuf::RingBuffer;

/// 命中类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Instruction,
    Read,
    Write,
}

impl From<AccessKind> for HitKind {
    fn from(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Read => HitKind::Read,
            AccessKind::Write => HitKind::Write,
        }
    }
}

/// 命中记录
#[derive(Debug, Clone, PartialEq)]
pub struct HitRecord {
    /// 步数计数
    pub step: u64,
    pub kind: HitKind,
    /// 指令断点为PC，内存断点为访问地址
    pub address: u32,
    pub size: u32,
    pub pc: u32,
    pub symbol: Option<String>,
}

/// 单步判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitDecision {
    Continue,
    LogAndContinue,
    /// 第一个要求中断的命中
    Break { kind: HitKind, address: u32 },
}

#[derive(Debug, Default)]
struct PendingHits {
    breaking: Option<(HitKind, u32)>,
    logged: bool,
    temporaries: Vec<u32>,
}

pub struct HitEvaluator {
    ctx: DebugContext,
    symbols: Option<Arc<dyn SymbolResolver>>,
    log: RingBuffer<HitRecord>,
    step: u64,
    pc: u32,
    pending: PendingHits,
}

fn condition_holds(condition: Option<&Expression>, state: &dyn MachineState, address: u32) -> bool {
    let Some(expr) = condition else {
        return true;
    };
    match expr.evaluate(state) {
        Ok(result) => result,
        Err(e) => {
            warn!(
                address = format_args!("{address:#010x}"),
                condition = expr.text(),
                error = %e,
                "条件求值失败，按命中处理"
            );
            true
        }
    }
}

impl HitEvaluator {
    pub fn new(ctx: &DebugContext, log_size: usize) -> Self {
        Self {
            ctx: ctx.clone(),
            symbols: None,
            log: RingBuffer::new(log_size),
            step: 0,
            pc: 0,
            pending: PendingHits::default(),
        }
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolResolver>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    pub fn begin_step(&mut self, pc: u32) {
        self.step += 1;
        self.pc = pc;
        self.pending = PendingHits::default();
    }

    /// 检查当前PC处的指令断点，返回是否命中
    pub fn check_instruction(&mut self, state: &dyn MachineState) -> bool {
        let pc = self.pc;
        let (break_on_hit, log_on_hit, is_temporary) = {
            let mut bps = self.ctx.breakpoints();
            let Some(bp) = bps.get_mut(pc) else {
                return false;
            };
            if !bp.is_enabled || !condition_holds(bp.condition.as_ref(), state, pc) {
                return false;
            }
            bp.num_hits += 1;
            (bp.break_on_hit, bp.log_on_hit, bp.is_temporary)
        };

        if is_temporary && break_on_hit {
            self.pending.temporaries.push(pc);
        }
        self.record(HitKind::Instruction, pc, 4, break_on_hit, log_on_hit);
        true
    }

    /// 检查一次内存访问，返回命中的内存断点数量
    pub fn check_memory(
        &mut self,
        address: u32,
        size: u32,
        kind: AccessKind,
        state: &dyn MachineState,
    ) -> usize {
        let hits: Vec<(bool, bool)> = {
            let mut mcs = self.ctx.memchecks();
            if !mcs.has_any() {
                return 0;
            }
            let keys: Vec<u32> = mcs
                .matches_access(address, size, kind)
                .iter()
                .map(|check| check.start_address)
                .collect();
            let mut hits = Vec::with_capacity(keys.len());
            for key in keys {
                let Some(check) = mcs.get_mut(key) else { continue };
                if condition_holds(check.condition.as_ref(), state, address) {
                    check.num_hits += 1;
                    hits.push((check.break_on_hit, check.log_on_hit));
                }
            }
            hits
        };

        for &(break_on_hit, log_on_hit) in &hits {
            self.record(kind.into(), address, size, break_on_hit, log_on_hit);
        }
        hits.len()
    }

    fn record(&mut self, kind: HitKind, address: u32, size: u32, break_on_hit: bool, log_on_hit: bool) {
        if break_on_hit && self.pending.breaking.is_none() {
            self.pending.breaking = Some((kind, address));
        }
        if !log_on_hit {
            debug!(?kind, address = format_args!("{address:#010x}"), "断点命中");
            return;
        }

        let symbol = self
            .symbols
            .as_ref()
            .and_then(|symbols| symbols.symbol_at(address))
            .map(str::to_owned);
        info!(
            step = self.step,
            ?kind,
            address = format_args!("{address:#010x}"),
            size,
            pc = format_args!("{:#010x}", self.pc),
            symbol = symbol.as_deref().unwrap_or("-"),
            "断点命中"
        );
        self.log.push_overwrite(HitRecord {
            step: self.step,
            kind,
            address,
            size,
            pc: self.pc,
            symbol,
        });
        self.pending.logged = true;
    }

    pub fn has_pending_break(&self) -> bool {
        self.pending.breaking.is_some()
    }

    /// 汇总本步命中并返回判定，中断时删除本步触发的临时断点
    pub fn finish_step(&mut self) -> HitDecision {
        let pending = std::mem::take(&mut self.pending);
        let decision = match pending.breaking {
            Some((kind, address)) => HitDecision::Break { kind, address },
            None if pending.logged => HitDecision::LogAndContinue,
            None => HitDecision::Continue,
        };

        if matches!(decision, HitDecision::Break { .. }) && !pending.temporaries.is_empty() {
            self.ctx.edit_breakpoints(|bps| {
                for address in &pending.temporaries {
                    bps.remove(*address);
                }
            });
        }
        decision
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// 按时间顺序遍历命中日志
    pub fn hit_log(&self) -> impl Iterator<Item = &HitRecord> {
        self.log.iter()
    }

    pub fn take_hit_log(&mut self) -> Vec<HitRecord> {
        let mut records = Vec::with_capacity(self.log.len());
        while let Ok(record) = self.log.pop() {
            records.push(record);
        }
        records
    }
}
