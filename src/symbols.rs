//! 符号表：地址到函数名的映射，仅用于显示和日志

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use object::{Object, ObjectSymbol, SymbolKind};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// 地址符号解析
pub trait SymbolResolver: Send + Sync {
    fn symbol_at(&self, address: u32) -> Option<&str>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    /// 大小为0时只匹配起始地址
    pub size: u32,
}

impl Symbol {
    fn contains(&self, address: u32) -> bool {
        if self.size == 0 {
            address == self.address
        } else {
            address >= self.address && address - self.address < self.size
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SymbolMap {
    by_address: BTreeMap<u32, Symbol>,
    by_name: FxHashMap<String, u32>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, address: u32, size: u32) {
        let name = name.into();
        self.by_name.insert(name.clone(), address);
        self.by_address.insert(address, Symbol { name, address, size });
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn lookup(&self, address: u32) -> Option<&Symbol> {
        self.by_address
            .range(..=address)
            .next_back()
            .map(|(_, sym)| sym)
            .filter(|sym| sym.contains(address))
    }

    /// 按名字查找符号地址
    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// 从ELF符号表加载函数和数据符号
    pub fn from_elf(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).with_context(|| format!("无法读取ELF文件 '{}'", path.display()))?;
        let elf = object::File::parse(&*data)
            .with_context(|| format!("无法解析ELF文件 '{}'", path.display()))?;

        let mut map = Self::new();
        for symbol in elf.symbols() {
            if !matches!(symbol.kind(), SymbolKind::Text | SymbolKind::Data) {
                continue;
            }
            let Ok(name) = symbol.name() else { continue };
            if name.is_empty() {
                continue;
            }
            let Ok(address) = u32::try_from(symbol.address()) else {
                warn!(name, address = symbol.address(), "符号地址超出32位范围");
                continue;
            };
            map.insert(name, address, symbol.size() as u32);
        }
        debug!(count = map.len(), path = %path.display(), "已加载ELF符号");
        Ok(map)
    }

    /// 解析文本符号表，每行 `地址 大小 名字`，`#` 开头为注释
    pub fn from_map_text(text: &str) -> Self {
        let mut map = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.splitn(3, char::is_whitespace);
            let parsed = (|| {
                let address = u32::from_str_radix(fields.next()?, 16).ok()?;
                let size = u32::from_str_radix(fields.next()?, 16).ok()?;
                let name = fields.next()?.trim();
                (!name.is_empty()).then_some((address, size, name))
            })();
            match parsed {
                Some((address, size, name)) => map.insert(name, address, size),
                None => warn!(line, "跳过无效的符号行"),
            }
        }
        map
    }

    pub fn from_map_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("无法读取符号文件 '{}'", path.display()))?;
        Ok(Self::from_map_text(&text))
    }

    /// 根据扩展名选择格式
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("map") | Some("txt") => Self::from_map_file(path),
            _ => Self::from_elf(path),
        }
    }
}

impl SymbolResolver for SymbolMap {
    fn symbol_at(&self, address: u32) -> Option<&str> {
        self.lookup(address).map(|sym| sym.name.as_str())
    }
}
