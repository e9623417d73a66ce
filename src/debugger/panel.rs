//! 断点面板的表格模型
//!
//! 不涉及绘制，只负责把两个断点表整理成行，并把界面上的编辑转换成对断点表的修改。

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};

use super::expression::{Expression, ParseError};
use super::persist::{self, IniFile, LoadSummary};
use super::{DebugContext, DebugEvent, MemCheck, StoreError, parse_hex};
use crate::symbols::SymbolResolver;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 编辑结果
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Applied,
    /// 条件无法解析，断点已保存但不带条件
    ConditionDropped(ParseError),
    /// 该列不可编辑或缺少输入
    Unchanged,
    NotFound,
}

/// 表格列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Enabled,
    Type,
    Symbol,
    Address,
    EndAddress,
    Break,
    Log,
    Read,
    Write,
    Condition,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::Enabled,
        Column::Type,
        Column::Symbol,
        Column::Address,
        Column::EndAddress,
        Column::Break,
        Column::Log,
        Column::Read,
        Column::Write,
        Column::Condition,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Column::Enabled => "Active",
            Column::Type => "Type",
            Column::Symbol => "Function",
            Column::Address => "Address",
            Column::EndAddress => "End Addr",
            Column::Break => "Break",
            Column::Log => "Log",
            Column::Read => "Read",
            Column::Write => "Write",
            Column::Condition => "Condition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Breakpoint,
    MemCheck,
}

/// 表格中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub kind: RowKind,
    /// 指令断点地址或内存断点起始地址
    pub address: u32,
    pub end_address: Option<u32>,
    pub is_enabled: bool,
    pub symbol: Option<String>,
    pub break_on_hit: bool,
    pub log_on_hit: bool,
    pub read: bool,
    pub write: bool,
    pub condition: String,
}

impl Row {
    /// 单元格文本，标志列以 `x` 表示
    pub fn cell(&self, column: Column) -> String {
        let flag = |on: bool| if on { "x" } else { "" }.to_string();
        match column {
            Column::Enabled => flag(self.is_enabled),
            Column::Type => match self.kind {
                RowKind::Breakpoint => "BP".to_string(),
                RowKind::MemCheck => "MBP".to_string(),
            },
            Column::Symbol => self.symbol.clone().unwrap_or_default(),
            Column::Address => match self.end_address {
                Some(end) if end != self.address => format!("{:08x} - {:08x}", self.address, end),
                _ => format!("{:08x}", self.address),
            },
            Column::EndAddress => String::new(),
            Column::Break => flag(self.break_on_hit),
            Column::Log => flag(self.log_on_hit),
            Column::Read => flag(self.read),
            Column::Write => flag(self.write),
            Column::Condition => self.condition.clone(),
        }
    }
}

fn parse_condition(text: &str) -> (Option<Expression>, EditOutcome) {
    if text.trim().is_empty() {
        return (None, EditOutcome::Applied);
    }
    match Expression::try_parse(text) {
        Ok(expr) => (Some(expr), EditOutcome::Applied),
        Err(e) => {
            warn!(condition = text, error = %e, "条件无法解析，断点将不带条件保存");
            (None, EditOutcome::ConditionDropped(e))
        }
    }
}

/// 解析后的单元格修改，在加锁前完成输入校验
enum Change {
    Toggle(Column),
    Address(u32),
    EndAddress(u32),
    Condition(Option<Expression>),
}

impl Change {
    fn parse(
        column: Column,
        text: Option<&str>,
    ) -> Result<Option<(Self, EditOutcome)>, PanelError> {
        let change = match (column, text) {
            (Column::Address, Some(text)) => Change::Address(parse_hex(text)?),
            (Column::EndAddress, Some(text)) => Change::EndAddress(parse_hex(text)?),
            (Column::Condition, Some(text)) => {
                let (condition, outcome) = parse_condition(text);
                return Ok(Some((Change::Condition(condition), outcome)));
            }
            (Column::Address | Column::EndAddress | Column::Condition, None)
            | (Column::Type | Column::Symbol, _) => return Ok(None),
            (column, _) => Change::Toggle(column),
        };
        Ok(Some((change, EditOutcome::Applied)))
    }
}

pub struct BreakpointPanel {
    ctx: DebugContext,
    symbols: Option<Arc<dyn SymbolResolver>>,
}

impl BreakpointPanel {
    pub fn new(ctx: &DebugContext) -> Self {
        Self {
            ctx: ctx.clone(),
            symbols: None,
        }
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolResolver>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    fn symbol_at(&self, address: u32) -> Option<String> {
        self.symbols
            .as_ref()
            .and_then(|symbols| symbols.symbol_at(address))
            .map(str::to_owned)
    }

    /// 先列出指令断点，再列出内存断点
    pub fn rows(&self) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .ctx
            .breakpoints()
            .list()
            .map(|bp| Row {
                kind: RowKind::Breakpoint,
                address: bp.address,
                end_address: None,
                is_enabled: bp.is_enabled,
                symbol: self.symbol_at(bp.address),
                break_on_hit: bp.break_on_hit,
                log_on_hit: bp.log_on_hit,
                read: false,
                write: false,
                condition: bp.condition_text().to_string(),
            })
            .collect();

        rows.extend(self.ctx.memchecks().list().map(|mc| Row {
            kind: RowKind::MemCheck,
            address: mc.start_address,
            end_address: Some(mc.end_address),
            is_enabled: mc.is_enabled,
            symbol: self.symbol_at(mc.start_address),
            break_on_hit: mc.break_on_hit,
            log_on_hit: mc.log_on_hit,
            read: mc.break_on_read,
            write: mc.break_on_write,
            condition: mc.condition_text().to_string(),
        }));
        rows
    }

    /// 单击单元格：启用列切换启用状态，地址列不响应，其余列切换对应标志
    pub fn on_clicked(&self, row: &Row, column: Column) -> Result<EditOutcome, PanelError> {
        match (column, row.kind) {
            (Column::Address | Column::EndAddress, _) => Ok(EditOutcome::Unchanged),
            (Column::Enabled, RowKind::Breakpoint) => {
                Ok(self.toggled(self.ctx.edit_breakpoints(|bps| bps.toggle_enabled(row.address))))
            }
            (Column::Enabled, RowKind::MemCheck) => {
                Ok(self.toggled(self.ctx.edit_memchecks(|mcs| mcs.toggle_enabled(row.address))))
            }
            (_, RowKind::Breakpoint) => self.edit_breakpoint(row.address, column, None),
            (_, RowKind::MemCheck) => self.edit_memcheck(row.address, column, None),
        }
    }

    fn toggled(&self, found: bool) -> EditOutcome {
        if found {
            EditOutcome::Applied
        } else {
            EditOutcome::NotFound
        }
    }

    /// 修改指令断点的某一列，`text` 为地址或条件列的新文本
    pub fn edit_breakpoint(
        &self,
        address: u32,
        column: Column,
        text: Option<&str>,
    ) -> Result<EditOutcome, PanelError> {
        let Some((change, outcome)) = Change::parse(column, text)? else {
            return Ok(EditOutcome::Unchanged);
        };

        {
            // 查找、修改和写回在同一把锁内完成
            let mut bps = self.ctx.breakpoints();
            let Some(mut bp) = bps.get(address).cloned() else {
                return Ok(EditOutcome::NotFound);
            };
            match change {
                Change::Toggle(Column::Enabled) => bp.is_enabled = !bp.is_enabled,
                Change::Toggle(Column::Break) => bp.break_on_hit = !bp.break_on_hit,
                Change::Toggle(Column::Log) => bp.log_on_hit = !bp.log_on_hit,
                Change::Address(new) => bp.address = new,
                Change::Condition(condition) => bp.condition = condition,
                Change::Toggle(_) | Change::EndAddress(_) => return Ok(EditOutcome::Unchanged),
            }
            if bp.address != address {
                bps.remove(address);
            }
            bps.add(bp);
        }
        self.ctx.notify_changed();
        Ok(outcome)
    }

    /// 修改内存断点的某一列，范围非法时断点表保持不变
    pub fn edit_memcheck(
        &self,
        address: u32,
        column: Column,
        text: Option<&str>,
    ) -> Result<EditOutcome, PanelError> {
        let Some((change, outcome)) = Change::parse(column, text)? else {
            return Ok(EditOutcome::Unchanged);
        };

        {
            let mut mcs = self.ctx.memchecks();
            let Some(mut check) = mcs.get(address).cloned() else {
                return Ok(EditOutcome::NotFound);
            };
            match change {
                Change::Toggle(Column::Enabled) => check.is_enabled = !check.is_enabled,
                Change::Toggle(Column::Break) => check.break_on_hit = !check.break_on_hit,
                Change::Toggle(Column::Log) => check.log_on_hit = !check.log_on_hit,
                Change::Toggle(Column::Read) => check.break_on_read = !check.break_on_read,
                Change::Toggle(Column::Write) => check.break_on_write = !check.break_on_write,
                Change::Address(new) => check.start_address = new,
                Change::EndAddress(new) => check.end_address = new,
                Change::Condition(condition) => check.condition = condition,
                Change::Toggle(_) => return Ok(EditOutcome::Unchanged),
            }
            let moved = check.start_address != address;
            mcs.add(check)?;
            if moved {
                mcs.remove(address);
            }
        }
        self.ctx.notify_changed();
        Ok(outcome)
    }

    /// 默认参数添加断点: 中断并记录
    pub fn add_bp(&self, address: u32) -> EditOutcome {
        self.add_bp_with(address, false, true, true, "")
    }

    pub fn add_bp_with(
        &self,
        address: u32,
        is_temporary: bool,
        break_on_hit: bool,
        log_on_hit: bool,
        condition: &str,
    ) -> EditOutcome {
        let (condition, outcome) = parse_condition(condition);
        self.ctx.edit_breakpoints(|bps| {
            bps.add_from_parts(address, is_temporary, break_on_hit, log_on_hit, condition)
        });
        outcome
    }

    pub fn add_address_mbp(
        &self,
        address: u32,
        on_read: bool,
        on_write: bool,
        do_log: bool,
        do_break: bool,
        condition: &str,
    ) -> Result<EditOutcome, PanelError> {
        self.add_ranged_mbp(address, address, on_read, on_write, do_log, do_break, condition)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_ranged_mbp(
        &self,
        from: u32,
        to: u32,
        on_read: bool,
        on_write: bool,
        do_log: bool,
        do_break: bool,
        condition: &str,
    ) -> Result<EditOutcome, PanelError> {
        let mut check = MemCheck::new(from, to)?;
        check.break_on_read = on_read;
        check.break_on_write = on_write;
        check.log_on_hit = do_log;
        check.break_on_hit = do_break;
        let (condition, outcome) = parse_condition(condition);
        check.condition = condition;

        self.ctx.edit_memchecks(|mcs| mcs.add(check))?;
        Ok(outcome)
    }

    pub fn delete(&self, row: &Row) -> bool {
        match row.kind {
            RowKind::Breakpoint => self.ctx.edit_breakpoints(|bps| bps.remove(row.address)),
            RowKind::MemCheck => self.ctx.edit_memchecks(|mcs| mcs.remove(row.address)),
        }
    }

    /// 指令断点跳转到代码视图，内存断点跳转到内存视图
    pub fn show(&self, row: &Row) {
        self.ctx.emit(match row.kind {
            RowKind::Breakpoint => DebugEvent::ShowCode(row.address),
            RowKind::MemCheck => DebugEvent::ShowMemory(row.address),
        });
    }

    pub fn clear(&self) {
        let _batch = self.ctx.batch();
        self.ctx.clear_all();
    }

    /// 从断点文件载入，文件或节缺失时对应断点表保持不变
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadSummary> {
        let ini = IniFile::load(path.as_ref())?;
        let _batch = self.ctx.batch();
        let summary = {
            let mut bps = self.ctx.breakpoints();
            let mut mcs = self.ctx.memchecks();
            persist::load_into(&ini, &mut bps, &mut mcs)
        };
        if summary != LoadSummary::default() {
            self.ctx.notify_changed();
        }
        info!(
            path = %path.as_ref().display(),
            breakpoints = ?summary.breakpoints,
            memchecks = ?summary.memchecks,
            "已载入断点"
        );
        Ok(summary)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut ini = IniFile::load(path)?;
        {
            let bps = self.ctx.breakpoints();
            let mcs = self.ctx.memchecks();
            persist::store_into(&mut ini, &bps, &mcs);
        }
        ini.save(path)?;
        info!(path = %path.display(), "已保存断点");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolMap;

    fn panel() -> (DebugContext, BreakpointPanel) {
        let ctx = DebugContext::new();
        let panel = BreakpointPanel::new(&ctx);
        (ctx, panel)
    }

    #[test]
    fn test_rows_layout() {
        let (ctx, panel) = panel();
        let mut symbols = SymbolMap::new();
        symbols.insert("main", 0x8000_3000, 0x100);
        let panel = panel.with_symbols(Arc::new(symbols));

        panel.add_bp_with(0x8000_3000, false, true, false, "r3 == 5");
        panel
            .add_ranged_mbp(0x8000_4000, 0x8000_4010, false, true, true, true, "")
            .unwrap();
        panel.add_address_mbp(0x8000_5000, true, true, false, true, "").unwrap();

        let rows = panel.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].cell(Column::Type), "BP");
        assert_eq!(rows[0].cell(Column::Symbol), "main");
        assert_eq!(rows[0].cell(Column::Address), "80003000");
        assert_eq!(rows[0].cell(Column::Log), "");
        assert_eq!(rows[0].cell(Column::Condition), "r3 == 5");

        assert_eq!(rows[1].cell(Column::Type), "MBP");
        assert_eq!(rows[1].cell(Column::Address), "80004000 - 80004010");
        assert_eq!(rows[1].cell(Column::Read), "");
        assert_eq!(rows[1].cell(Column::Write), "x");
        assert_eq!(rows[2].cell(Column::Address), "80005000");

        assert_eq!(ctx.memchecks().len(), 2);
    }

    #[test]
    fn test_click_toggles() {
        let (ctx, panel) = panel();
        panel.add_bp(0x10);
        panel.add_address_mbp(0x20, true, false, true, true, "").unwrap();

        let rows = panel.rows();
        assert_eq!(panel.on_clicked(&rows[0], Column::Enabled).unwrap(), EditOutcome::Applied);
        assert!(!ctx.breakpoints().get(0x10).unwrap().is_enabled);
        panel.on_clicked(&rows[0], Column::Enabled).unwrap();
        assert!(ctx.breakpoints().get(0x10).unwrap().is_enabled);

        panel.on_clicked(&rows[1], Column::Write).unwrap();
        assert!(ctx.memchecks().get(0x20).unwrap().break_on_write);
        panel.on_clicked(&rows[1], Column::Break).unwrap();
        assert!(!ctx.memchecks().get(0x20).unwrap().break_on_hit);

        assert_eq!(
            panel.on_clicked(&rows[0], Column::Address).unwrap(),
            EditOutcome::Unchanged
        );
    }

    #[test]
    fn test_invalid_address_edit_rejected() {
        let (ctx, panel) = panel();
        panel.add_bp(0x8000_3000);
        let rx = ctx.subscribe();

        let err = panel
            .edit_breakpoint(0x8000_3000, Column::Address, Some("80zz3000"))
            .unwrap_err();
        assert!(matches!(err, PanelError::Store(StoreError::InvalidAddress(_))));
        assert!(ctx.breakpoints().get(0x8000_3000).is_some());
        assert_eq!(ctx.breakpoints().len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_edit_breakpoint_address_moves_entry() {
        let (ctx, panel) = panel();
        panel.add_bp_with(0x8000_3000, false, true, true, "r4 > 1");
        panel
            .edit_breakpoint(0x8000_3000, Column::Address, Some("0x80003100"))
            .unwrap();
        let bps = ctx.breakpoints();
        assert!(bps.get(0x8000_3000).is_none());
        assert_eq!(bps.get(0x8000_3100).unwrap().condition_text(), "r4 > 1");
    }

    #[test]
    fn test_bad_condition_is_dropped_explicitly() {
        let (ctx, panel) = panel();
        let outcome = panel.add_bp_with(0x10, false, true, true, "r3 ==");
        assert!(matches!(outcome, EditOutcome::ConditionDropped(ParseError::UnexpectedEnd)));
        assert!(ctx.breakpoints().get(0x10).unwrap().condition.is_none());

        let outcome = panel
            .edit_breakpoint(0x10, Column::Condition, Some("r3 == 1"))
            .unwrap();
        assert_eq!(outcome, EditOutcome::Applied);
        assert_eq!(ctx.breakpoints().get(0x10).unwrap().condition_text(), "r3 == 1");

        // 空文本清除条件
        panel.edit_breakpoint(0x10, Column::Condition, Some("")).unwrap();
        assert!(ctx.breakpoints().get(0x10).unwrap().condition.is_none());
    }

    #[test]
    fn test_edit_memcheck_addresses() {
        let (ctx, panel) = panel();
        panel.add_address_mbp(0x100, true, true, true, true, "").unwrap();

        panel.edit_memcheck(0x100, Column::EndAddress, Some("1ff")).unwrap();
        assert!(ctx.memchecks().get(0x100).unwrap().is_ranged());

        panel.edit_memcheck(0x100, Column::Address, Some("180")).unwrap();
        {
            let mcs = ctx.memchecks();
            assert!(mcs.get(0x100).is_none());
            let moved = mcs.get(0x180).unwrap();
            assert_eq!(moved.end_address, 0x1ff);
        }

        // 起始地址大于结束地址
        let err = panel.edit_memcheck(0x180, Column::Address, Some("200")).unwrap_err();
        assert!(matches!(err, PanelError::Store(StoreError::InvalidRange { .. })));
        assert!(ctx.memchecks().get(0x180).is_some());
    }

    #[test]
    fn test_rejected_range_edit_is_silent() {
        let (ctx, panel) = panel();
        panel.add_ranged_mbp(0x100, 0x1ff, true, true, true, true, "").unwrap();
        let rx = ctx.subscribe();

        let err = panel.edit_memcheck(0x100, Column::EndAddress, Some("80")).unwrap_err();
        assert!(matches!(err, PanelError::Store(StoreError::InvalidRange { .. })));
        assert_eq!(ctx.memchecks().get(0x100).unwrap().end_address, 0x1ff);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_edit_after_removal_keeps_entry_removed() {
        let (ctx, panel) = panel();
        panel.add_bp_with(0x10, true, true, true, "");
        panel.add_address_mbp(0x20, true, true, true, true, "").unwrap();
        let rows = panel.rows();

        // 模拟线程在界面读取行之后删除了断点，例如临时断点命中
        ctx.edit_breakpoints(|bps| bps.remove(0x10));
        ctx.edit_memchecks(|mcs| mcs.remove(0x20));
        let rx = ctx.subscribe();

        assert_eq!(panel.on_clicked(&rows[0], Column::Log).unwrap(), EditOutcome::NotFound);
        assert_eq!(
            panel.edit_breakpoint(0x10, Column::Condition, Some("r3 == 1")).unwrap(),
            EditOutcome::NotFound
        );
        assert_eq!(panel.on_clicked(&rows[1], Column::Read).unwrap(), EditOutcome::NotFound);
        assert!(ctx.breakpoints().is_empty());
        assert!(ctx.memchecks().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_edit_missing_entry() {
        let (_ctx, panel) = panel();
        assert_eq!(
            panel.edit_breakpoint(0x10, Column::Break, None).unwrap(),
            EditOutcome::NotFound
        );
        assert_eq!(
            panel.edit_memcheck(0x10, Column::Read, None).unwrap(),
            EditOutcome::NotFound
        );
    }

    #[test]
    fn test_delete_and_show() {
        let (ctx, panel) = panel();
        panel.add_bp(0x10);
        panel.add_address_mbp(0x20, true, true, true, true, "").unwrap();
        let rx = ctx.subscribe();

        let rows = panel.rows();
        panel.show(&rows[0]);
        panel.show(&rows[1]);
        assert_eq!(rx.try_recv(), Ok(DebugEvent::ShowCode(0x10)));
        assert_eq!(rx.try_recv(), Ok(DebugEvent::ShowMemory(0x20)));

        assert!(panel.delete(&rows[1]));
        assert!(!panel.delete(&rows[1]));
        assert_eq!(panel.rows().len(), 1);
    }

    #[test]
    fn test_clear_notifies_once() {
        let (ctx, panel) = panel();
        panel.add_bp(0x10);
        panel.add_address_mbp(0x20, true, true, true, true, "").unwrap();
        let rx = ctx.subscribe();

        panel.clear();
        assert!(panel.rows().is_empty());
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GALE01.ini");

        let (_ctx, panel) = panel();
        panel.add_bp_with(0x8000_3000, true, true, false, "r3 == 5");
        panel
            .add_ranged_mbp(0x8000_4000, 0x8000_4010, false, true, true, true, "")
            .unwrap();
        panel.save(&path).unwrap();

        let (ctx, other) = self::panel();
        other.add_bp(0x1234);
        let rx = ctx.subscribe();
        let summary = other.load(&path).unwrap();
        assert_eq!(summary.breakpoints, Some(1));
        assert_eq!(summary.memchecks, Some(1));
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(other.rows(), panel.rows());
    }

    #[test]
    fn test_multiline_condition_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GALE01.ini");

        let (ctx, panel) = panel();
        let outcome = panel.add_bp_with(0x10, false, true, true, "r3 ==\n5");
        assert!(matches!(
            outcome,
            EditOutcome::ConditionDropped(ParseError::UnexpectedChar { ch: '\n', .. })
        ));
        let outcome = panel.add_address_mbp(0x20, true, true, true, true, "r4\r\n== 1").unwrap();
        assert!(matches!(outcome, EditOutcome::ConditionDropped(_)));
        assert!(ctx.memchecks().get(0x20).unwrap().condition.is_none());
        panel.save(&path).unwrap();

        let (_ctx, other) = self::panel();
        other.load(&path).unwrap();
        assert_eq!(other.rows(), panel.rows());
    }

    #[test]
    fn test_load_missing_file_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, panel) = panel();
        panel.add_bp(0x10);
        let rx = ctx.subscribe();
        let summary = panel.load(dir.path().join("none.ini")).unwrap();
        assert_eq!(summary, LoadSummary::default());
        assert_eq!(panel.rows().len(), 1);
        assert!(rx.try_recv().is_err());
    }
}
