//! 指令断点管理

use indexmap::IndexMap;
use nohash_hasher::BuildNoHashHasher;

use super::expression::Expression;
use super::{StoreError, format_flag, lenient_condition, parse_flag, parse_hex};

pub(crate) type NoHashIndexMap<V> = IndexMap<u32, V, BuildNoHashHasher<u32>>;

/// 断点信息
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    /// 断点地址
    pub address: u32,
    /// 是否启用
    pub is_enabled: bool,
    /// 命中并中断后自动删除
    pub is_temporary: bool,
    pub break_on_hit: bool,
    pub log_on_hit: bool,
    pub condition: Option<Expression>,
    /// 命中次数，不持久化
    pub num_hits: u64,
}

impl Breakpoint {
    pub fn new(address: u32) -> Self {
        Self {
            address,
            is_enabled: true,
            is_temporary: false,
            break_on_hit: true,
            log_on_hit: true,
            condition: None,
            num_hits: 0,
        }
    }

    pub fn condition_text(&self) -> &str {
        self.condition.as_ref().map_or("", Expression::text)
    }

    /// 格式: `地址 启用 临时 中断 记录 [条件]`
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{:08x} {} {} {} {}",
            self.address,
            format_flag(self.is_enabled),
            format_flag(self.is_temporary),
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
        let mut fields = line.splitn(6, ' ');
        let mut next = |what: &'static str| {
            fields.next().ok_or_else(|| StoreError::MalformedLine {
                line: line.to_string(),
                reason: what,
            })
        };
        let address = parse_hex(next("缺少地址")?)?;
        let is_enabled = parse_flag(line, next("缺少启用标志")?)?;
        let is_temporary = parse_flag(line, next("缺少临时标志")?)?;
        let break_on_hit = parse_flag(line, next("缺少中断标志")?)?;
        let log_on_hit = parse_flag(line, next("缺少记录标志")?)?;
        let condition = fields.next().and_then(|text| lenient_condition(address, text));

        Ok(Self {
            address,
            is_enabled,
            is_temporary,
            break_on_hit,
            log_on_hit,
            condition,
            num_hits: 0,
        })
    }
}

/// 断点管理器
///
/// 按地址唯一，保持插入顺序。
#[derive(Debug, Default)]
pub struct BreakPoints {
    breakpoints: NoHashIndexMap<Breakpoint>,
}

impl BreakPoints {
    /// 创建新的断点管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加断点，同地址已存在时原位替换，返回是否发生替换
    pub fn add(&mut self, bp: Breakpoint) -> bool {
        self.breakpoints.insert(bp.address, bp).is_some()
    }

    pub fn add_from_parts(
        &mut self,
        address: u32,
        is_temporary: bool,
        break_on_hit: bool,
        log_on_hit: bool,
        condition: Option<Expression>,
    ) -> bool {
        self.add(Breakpoint {
            is_temporary,
            break_on_hit,
            log_on_hit,
            condition,
            ..Breakpoint::new(address)
        })
    }

    /// 移除断点
    pub fn remove(&mut self, address: u32) -> bool {
        self.breakpoints.shift_remove(&address).is_some()
    }

    /// 切换启用状态，地址不存在时什么都不做
    pub fn toggle_enabled(&mut self, address: u32) -> bool {
        if let Some(bp) = self.breakpoints.get_mut(&address) {
            bp.is_enabled = !bp.is_enabled;
            true
        } else {
            false
        }
    }

    pub fn get(&self, address: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&address)
    }

    pub(crate) fn get_mut(&mut self, address: u32) -> Option<&mut Breakpoint> {
        self.breakpoints.get_mut(&address)
    }

    /// 检查地址是否有启用的断点
    pub fn is_address_break_point(&self, address: u32) -> bool {
        self.breakpoints
            .get(&address)
            .map(|bp| bp.is_enabled)
            .unwrap_or(false)
    }

    /// 按插入顺序遍历
    pub fn list(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }

    /// 删除所有临时断点
    pub fn clear_temporary(&mut self) {
        self.breakpoints.retain(|_, bp| !bp.is_temporary);
    }

    pub fn get_strings(&self) -> Vec<String> {
        self.list().map(Breakpoint::to_line).collect()
    }

    /// 逐行导入，格式错误的行被跳过，返回成功导入的数量
    pub fn add_from_strings<S: AsRef<str>>(&mut self, lines: &[S]) -> usize {
        let mut added = 0;
        for line in lines {
            match Breakpoint::from_line(line.as_ref()) {
                Ok(bp) => {
                    self.add(bp);
                    added += 1;
                }
                Err(e) => tracing::warn!(error = %e, "跳过无效的断点记录"),
            }
        }
        added
    }
}
