//! 内存断点（内存监视）管理

use super::breakpoints::NoHashIndexMap;
use super::expression::Expression;
use super::{StoreError, format_flag, lenient_condition, parse_flag, parse_hex};

/// 内存访问类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// 内存断点，地址范围为闭区间 `[start_address, end_address]`
#[derive(Debug, Clone, PartialEq)]
pub struct MemCheck {
    pub start_address: u32,
    pub end_address: u32,
    pub is_enabled: bool,
    pub break_on_read: bool,
    pub break_on_write: bool,
    pub break_on_hit: bool,
    pub log_on_hit: bool,
    pub condition: Option<Expression>,
    pub num_hits: u64,
}

impl MemCheck {
    /// 创建范围断点，默认读写都触发
    pub fn new(start_address: u32, end_address: u32) -> Result<Self, StoreError> {
        if start_address > end_address {
            return Err(StoreError::InvalidRange {
                start: start_address,
                end: end_address,
            });
        }
        Ok(Self {
            start_address,
            end_address,
            is_enabled: true,
            break_on_read: true,
            break_on_write: true,
            break_on_hit: true,
            log_on_hit: true,
            condition: None,
            num_hits: 0,
        })
    }

    /// 单地址断点
    pub fn single(address: u32) -> Self {
        Self {
            start_address: address,
            end_address: address,
            is_enabled: true,
            break_on_read: true,
            break_on_write: true,
            break_on_hit: true,
            log_on_hit: true,
            condition: None,
            num_hits: 0,
        }
    }

    pub fn is_ranged(&self) -> bool {
        self.start_address != self.end_address
    }

    pub fn contains(&self, address: u32) -> bool {
        (self.start_address..=self.end_address).contains(&address)
    }

    /// 访问区间 `[address, address + size - 1]` 是否与本断点重叠
    pub fn overlaps(&self, address: u32, size: u32) -> bool {
        let last = address.saturating_add(size.max(1) - 1);
        address <= self.end_address && last >= self.start_address
    }

    pub fn is_armed_for(&self, kind: AccessKind) -> bool {
        match kind {
            AccessKind::Read => self.break_on_read,
            AccessKind::Write => self.break_on_write,
        }
    }

    pub fn condition_text(&self) -> &str {
        self.condition.as_ref().map_or("", Expression::text)
    }

    /// 格式: `起始 结束 启用 读 写 中断 记录 [条件]`
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{:08x} {:08x} {} {} {} {} {}",
            self.start_address,
            self.end_address,
            format_flag(self.is_enabled),
            format_flag(self.break_on_read),
            format_flag(self.break_on_write),
            format_flag(self.break_on_hit),
            format_flag(self.log_on_hit),
        );
        if let Some(condition) = &self.condition {
            line.push(' ');
            line.push_str(condition.text());
        }
        line
    }

    pub fn from_line(line: &str) -> Result<Self, StoreError> {
        let mut fields = line.splitn(8, ' ');
        let mut next = |what: &'static str| {
            fields.next().ok_or_else(|| StoreError::MalformedLine {
                line: line.to_string(),
                reason: what,
            })
        };
        let start = parse_hex(next("缺少起始地址")?)?;
        let end = parse_hex(next("缺少结束地址")?)?;
        let mut check = MemCheck::new(start, end)?;
        check.is_enabled = parse_flag(line, next("缺少启用标志")?)?;
        check.break_on_read = parse_flag(line, next("缺少读标志")?)?;
        check.break_on_write = parse_flag(line, next("缺少写标志")?)?;
        check.break_on_hit = parse_flag(line, next("缺少中断标志")?)?;
        check.log_on_hit = parse_flag(line, next("缺少记录标志")?)?;
        check.condition = fields.next().and_then(|text| lenient_condition(start, text));
        Ok(check)
    }
}

/// 内存断点管理器，以起始地址为键，保持插入顺序
#[derive(Debug, Default)]
pub struct MemChecks {
    checks: NoHashIndexMap<MemCheck>,
}

impl MemChecks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加内存断点，同起始地址已存在时原位替换
    pub fn add(&mut self, check: MemCheck) -> Result<bool, StoreError> {
        if check.start_address > check.end_address {
            return Err(StoreError::InvalidRange {
                start: check.start_address,
                end: check.end_address,
            });
        }
        Ok(self.checks.insert(check.start_address, check).is_some())
    }

    pub fn remove(&mut self, start_address: u32) -> bool {
        self.checks.shift_remove(&start_address).is_some()
    }

    pub fn toggle_enabled(&mut self, start_address: u32) -> bool {
        if let Some(check) = self.checks.get_mut(&start_address) {
            check.is_enabled = !check.is_enabled;
            true
        } else {
            false
        }
    }

    pub fn get(&self, start_address: u32) -> Option<&MemCheck> {
        self.checks.get(&start_address)
    }

    pub(crate) fn get_mut(&mut self, start_address: u32) -> Option<&mut MemCheck> {
        self.checks.get_mut(&start_address)
    }

    pub fn list(&self) -> impl Iterator<Item = &MemCheck> {
        self.checks.values()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// 是否存在启用的内存断点，命中检查的快速路径
    pub fn has_any(&self) -> bool {
        self.checks.values().any(|check| check.is_enabled)
    }

    pub fn clear(&mut self) {
        self.checks.clear();
    }

    /// 包含该地址的全部启用断点，按插入顺序
    pub fn matches(&self, address: u32) -> Vec<&MemCheck> {
        self.checks
            .values()
            .filter(|check| check.is_enabled && check.contains(address))
            .collect()
    }

    /// 与访问区间重叠且监视该访问类型的启用断点
    pub fn matches_access(&self, address: u32, size: u32, kind: AccessKind) -> Vec<&MemCheck> {
        self.checks
            .values()
            .filter(|check| {
                check.is_enabled && check.is_armed_for(kind) && check.overlaps(address, size)
            })
            .collect()
    }

    pub fn get_strings(&self) -> Vec<String> {
        self.list().map(MemCheck::to_line).collect()
    }

    pub fn add_from_strings<S: AsRef<str>>(&mut self, lines: &[S]) -> usize {
        let mut added = 0;
        for line in lines {
            match MemCheck::from_line(line.as_ref()).and_then(|check| self.add(check)) {
                Ok(_) => added += 1,
                Err(e) => tracing::warn!(error = %e, "跳过无效的内存断点记录"),
            }
        }
        added
    }
}
