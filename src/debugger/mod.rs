//! 断点与内存断点的调试核心
//!
//! 两个断点表由 [`DebugContext`] 持有，通过 `Arc<Mutex<_>>` 在模拟线程与
//! 界面/命令线程之间共享。所有修改都会向订阅者广播 [`DebugEvent`]。

pub mod breakpoints;
pub mod expression;
pub mod hit;
pub mod memchecks;
pub mod panel;
pub mod persist;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};

pub use breakpoints::{BreakPoints, Breakpoint};
pub use expression::{EvalError, Expression, MachineState, ParseError};
pub use hit::{HitDecision, HitEvaluator, HitKind, HitRecord};
pub use memchecks::{AccessKind, MemCheck, MemChecks};
pub use panel::{BreakpointPanel, Column, EditOutcome, PanelError, Row, RowKind};

/// 断点表错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("非法的十六进制地址: '{0}'")]
    InvalidAddress(String),
    #[error("非法的地址范围: {start:#010x} - {end:#010x}")]
    InvalidRange { start: u32, end: u32 },
    #[error("无效的断点记录 '{line}': {reason}")]
    MalformedLine { line: String, reason: &'static str },
}

/// 解析十六进制地址，允许 `0x` 前缀
pub fn parse_hex(text: &str) -> Result<u32, StoreError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    // from_str_radix 接受前导正号，这里只允许十六进制数字
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidAddress(text.to_string()));
    }
    u32::from_str_radix(digits, 16).map_err(|_| StoreError::InvalidAddress(text.to_string()))
}

pub(crate) fn parse_flag(line: &str, text: &str) -> Result<bool, StoreError> {
    match text {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(StoreError::MalformedLine {
            line: line.to_string(),
            reason: "标志位只能是0或1",
        }),
    }
}

pub(crate) fn format_flag(flag: bool) -> char {
    if flag { '1' } else { '0' }
}

/// 载入记录时使用：条件无法解析则丢弃条件并告警
pub(crate) fn lenient_condition(address: u32, text: &str) -> Option<Expression> {
    if text.trim().is_empty() {
        return None;
    }
    match Expression::try_parse(text) {
        Ok(expr) => Some(expr),
        Err(e) => {
            warn!(address = format_args!("{address:#010x}"), condition = text, error = %e, "条件无法解析，已按无条件处理");
            None
        }
    }
}

/// 调试事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    /// 断点表发生变化
    BreakpointsChanged,
    /// 请求在代码视图中显示地址
    ShowCode(u32),
    /// 请求在内存视图中显示地址
    ShowMemory(u32),
}

#[derive(Debug, Default)]
struct NotifierState {
    subscribers: Vec<Sender<DebugEvent>>,
    batch_depth: usize,
    dirty: bool,
}

#[derive(Debug, Default)]
struct Notifier {
    state: Mutex<NotifierState>,
}

impl Notifier {
    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(state: &mut NotifierState, event: DebugEvent) {
        // 接收端已释放的订阅者直接移除
        state.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    fn emit(&self, event: DebugEvent) {
        let mut state = self.lock();
        if event == DebugEvent::BreakpointsChanged && state.batch_depth > 0 {
            state.dirty = true;
            return;
        }
        Self::broadcast(&mut state, event);
    }
}

pub type SharedBreakPoints = Arc<Mutex<BreakPoints>>;
pub type SharedMemChecks = Arc<Mutex<MemChecks>>;

/// 调试上下文
///
/// 持有断点表句柄，由执行核心创建并传递给 [`HitEvaluator`] 和界面层。
/// 加锁顺序固定为先指令断点后内存断点。
#[derive(Debug, Clone, Default)]
pub struct DebugContext {
    breakpoints: SharedBreakPoints,
    memchecks: SharedMemChecks,
    notifier: Arc<Notifier>,
}

impl DebugContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只读访问指令断点表
    pub fn breakpoints(&self) -> MutexGuard<'_, BreakPoints> {
        self.breakpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 只读访问内存断点表
    pub fn memchecks(&self) -> MutexGuard<'_, MemChecks> {
        self.memchecks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 修改指令断点表并发出变更通知
    pub fn edit_breakpoints<R>(&self, f: impl FnOnce(&mut BreakPoints) -> R) -> R {
        let result = f(&mut self.breakpoints());
        self.notify_changed();
        result
    }

    /// 修改内存断点表并发出变更通知
    pub fn edit_memchecks<R>(&self, f: impl FnOnce(&mut MemChecks) -> R) -> R {
        let result = f(&mut self.memchecks());
        self.notify_changed();
        result
    }

    /// 清空两个断点表
    ///
    /// 同时持有两把锁，返回后不会有命中检查仍在读取旧内容。
    pub fn clear_all(&self) {
        {
            let mut bps = self.breakpoints();
            let mut mcs = self.memchecks();
            bps.clear();
            mcs.clear();
        }
        debug!("已清空全部断点");
        self.notify_changed();
    }

    pub fn subscribe(&self) -> Receiver<DebugEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.notifier.lock().subscribers.push(tx);
        rx
    }

    pub fn notify_changed(&self) {
        self.notifier.emit(DebugEvent::BreakpointsChanged);
    }

    pub fn emit(&self, event: DebugEvent) {
        self.notifier.emit(event);
    }

    /// 开始批量修改，作用域结束时只发出一次变更通知
    pub fn batch(&self) -> BatchEdit<'_> {
        self.notifier.lock().batch_depth += 1;
        BatchEdit { ctx: self }
    }
}

/// 批量修改作用域，可嵌套
#[must_use = "批量修改在guard释放时结束"]
pub struct BatchEdit<'a> {
    ctx: &'a DebugContext,
}

impl Drop for BatchEdit<'_> {
    fn drop(&mut self) {
        let mut state = self.ctx.notifier.lock();
        state.batch_depth = state.batch_depth.saturating_sub(1);
        if state.batch_depth == 0 && state.dirty {
            state.dirty = false;
            Notifier::broadcast(&mut state, DebugEvent::BreakpointsChanged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("80003000"), Ok(0x8000_3000));
        assert_eq!(parse_hex("0x80003000"), Ok(0x8000_3000));
        assert_eq!(parse_hex(" 1f "), Ok(0x1f));
        assert!(matches!(parse_hex("8000g000"), Err(StoreError::InvalidAddress(_))));
        assert!(parse_hex("").is_err());
        assert!(parse_hex("100000000").is_err());
    }

    #[test]
    fn test_parse_hex_rejects_sign() {
        assert!(matches!(parse_hex("+80003000"), Err(StoreError::InvalidAddress(_))));
        assert!(matches!(parse_hex("0x+1f"), Err(StoreError::InvalidAddress(_))));
        assert!(parse_hex("-1").is_err());
        assert!(parse_hex("0x").is_err());
    }

    #[test]
    fn test_edit_notifies_subscribers() {
        let ctx = DebugContext::new();
        let rx = ctx.subscribe();
        ctx.edit_breakpoints(|bps| bps.add(Breakpoint::new(0x8000_0000)));
        assert_eq!(rx.try_recv(), Ok(DebugEvent::BreakpointsChanged));
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.breakpoints().len(), 1);
    }

    #[test]
    fn test_batch_emits_once() {
        let ctx = DebugContext::new();
        let rx = ctx.subscribe();
        {
            let _outer = ctx.batch();
            for addr in 0..10 {
                ctx.edit_breakpoints(|bps| bps.add(Breakpoint::new(addr * 4)));
            }
            {
                let _inner = ctx.batch();
                ctx.edit_memchecks(|mcs| mcs.add(MemCheck::single(0x100)).unwrap());
            }
            // 内层结束时外层仍在批量中
            assert!(rx.try_recv().is_err());
            // 非变更事件不受批量影响
            ctx.emit(DebugEvent::ShowCode(0x10));
            assert_eq!(rx.try_recv(), Ok(DebugEvent::ShowCode(0x10)));
        }
        assert_eq!(rx.try_recv(), Ok(DebugEvent::BreakpointsChanged));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_empty_batch_is_silent() {
        let ctx = DebugContext::new();
        let rx = ctx.subscribe();
        drop(ctx.batch());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let ctx = DebugContext::new();
        let rx = ctx.subscribe();
        drop(rx);
        ctx.notify_changed();
        assert!(ctx.notifier.lock().subscribers.is_empty());
    }

    #[test]
    fn test_clear_all_from_other_thread() {
        let ctx = DebugContext::new();
        ctx.edit_breakpoints(|bps| bps.add(Breakpoint::new(0x10)));
        ctx.edit_memchecks(|mcs| mcs.add(MemCheck::single(0x20)).unwrap());

        let remote = ctx.clone();
        std::thread::spawn(move || remote.clear_all())
            .join()
            .unwrap();

        assert_eq!(ctx.breakpoints().list().count(), 0);
        assert_eq!(ctx.memchecks().list().count(), 0);
    }
}
