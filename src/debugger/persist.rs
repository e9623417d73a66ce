//! 每个游戏的断点文件
//!
//! INI风格，`[BreakPoints]` 与 `[MemoryBreakPoints]` 两节各为一组记录行。
//! 保存时保留文件中的其他节。

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use super::{BreakPoints, MemChecks};

pub const BREAKPOINTS_SECTION: &str = "BreakPoints";
pub const MEMCHECKS_SECTION: &str = "MemoryBreakPoints";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Section {
    name: String,
    lines: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniFile {
    sections: Vec<Section>,
}

impl IniFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut ini = Self::new();
        for raw in text.lines() {
            let line = raw.trim_end_matches('\r');
            let header = line
                .trim()
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'));
            if let Some(name) = header {
                ini.section_mut(name.trim());
                continue;
            }
            if ini.sections.is_empty() {
                // 第一节之前的内容归入无名节
                ini.section_mut("");
            }
            if let Some(section) = ini.sections.last_mut() {
                section.lines.push(line.to_string());
            }
        }
        ini
    }

    /// 文件不存在时返回空文件
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "断点文件不存在");
                Ok(Self::new())
            }
            Err(e) => Err(e).with_context(|| format!("无法读取断点文件 '{}'", path.display())),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("无法创建目录 '{}'", dir.display()))?;
        }
        fs::write(path, self.to_string())
            .with_context(|| format!("无法写入断点文件 '{}'", path.display()))
    }

    fn section_mut(&mut self, name: &str) -> &mut Section {
        let index = match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(Section {
                    name: name.to_string(),
                    lines: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    /// 读取一节的记录行，跳过空行和 `#` 注释；节不存在时返回 `None`
    pub fn get_lines(&self, name: &str) -> Option<Vec<String>> {
        self.sections.iter().find(|s| s.name == name).map(|s| {
            s.lines
                .iter()
                .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
                .cloned()
                .collect()
        })
    }

    pub fn set_lines(&mut self, name: &str, lines: Vec<String>) {
        self.section_mut(name).lines = lines;
    }
}

impl std::fmt::Display for IniFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for section in &self.sections {
            if !section.name.is_empty() {
                writeln!(f, "[{}]", section.name)?;
            }
            for line in &section.lines {
                writeln!(f, "{line}")?;
            }
        }
        Ok(())
    }
}

/// 载入结果：各节是否存在及导入条数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub breakpoints: Option<usize>,
    pub memchecks: Option<usize>,
}

/// 从文件载入断点，存在的节会替换对应断点表的全部内容，缺失的节不做改动
pub fn load_into(ini: &IniFile, bps: &mut BreakPoints, mcs: &mut MemChecks) -> LoadSummary {
    let breakpoints = ini.get_lines(BREAKPOINTS_SECTION).map(|lines| {
        bps.clear();
        bps.add_from_strings(&lines)
    });
    let memchecks = ini.get_lines(MEMCHECKS_SECTION).map(|lines| {
        mcs.clear();
        mcs.add_from_strings(&lines)
    });
    LoadSummary {
        breakpoints,
        memchecks,
    }
}

pub fn store_into(ini: &mut IniFile, bps: &BreakPoints, mcs: &MemChecks) {
    ini.set_lines(BREAKPOINTS_SECTION, bps.get_strings());
    ini.set_lines(MEMCHECKS_SECTION, mcs.get_strings());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::{Breakpoint, Expression, MemCheck};

    const SAMPLE: &str = "\
[Core]
CPUThread = True
[BreakPoints]
80003000 1 0 1 1 r3 == 5
# disabled
80003004 0 0 1 0

[MemoryBreakPoints]
80004000 80004010 1 0 1 1 1
";

    #[test]
    fn test_parse_sections() {
        let ini = IniFile::parse(SAMPLE);
        assert_eq!(
            ini.get_lines("Core"),
            Some(vec!["CPUThread = True".to_string()])
        );
        assert_eq!(ini.get_lines(BREAKPOINTS_SECTION).unwrap().len(), 2);
        assert!(ini.get_lines("Missing").is_none());
    }

    #[test]
    fn test_load_into_stores() {
        let ini = IniFile::parse(SAMPLE);
        let mut bps = BreakPoints::new();
        let mut mcs = MemChecks::new();
        let summary = load_into(&ini, &mut bps, &mut mcs);
        assert_eq!(summary.breakpoints, Some(2));
        assert_eq!(summary.memchecks, Some(1));
        assert_eq!(bps.get(0x8000_3000).unwrap().condition_text(), "r3 == 5");
        assert!(!bps.get(0x8000_3004).unwrap().is_enabled);
        assert!(!mcs.get(0x8000_4000).unwrap().break_on_read);
    }

    #[test]
    fn test_missing_section_leaves_store() {
        let ini = IniFile::parse("[BreakPoints]\n80000000 1 0 1 1\n");
        let mut bps = BreakPoints::new();
        let mut mcs = MemChecks::new();
        mcs.add(MemCheck::single(0x10)).unwrap();
        let summary = load_into(&ini, &mut bps, &mut mcs);
        assert_eq!(summary.memchecks, None);
        assert_eq!(mcs.len(), 1);
        assert_eq!(bps.len(), 1);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ini = IniFile::load(dir.path().join("GALE01.ini")).unwrap();
        assert_eq!(ini, IniFile::new());
    }

    #[test]
    fn test_save_preserves_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GameSettings").join("GALE01.ini");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, SAMPLE).unwrap();

        let mut bps = BreakPoints::new();
        bps.add(Breakpoint {
            condition: Some(Expression::try_parse("lr != 0").unwrap()),
            ..Breakpoint::new(0x8000_5000)
        });
        let mcs = MemChecks::new();

        let mut ini = IniFile::load(&path).unwrap();
        store_into(&mut ini, &bps, &mcs);
        ini.save(&path).unwrap();

        let reloaded = IniFile::load(&path).unwrap();
        assert_eq!(
            reloaded.get_lines("Core"),
            Some(vec!["CPUThread = True".to_string()])
        );
        assert_eq!(
            reloaded.get_lines(BREAKPOINTS_SECTION),
            Some(vec!["80005000 1 0 1 1 lr != 0".to_string()])
        );
        assert_eq!(reloaded.get_lines(MEMCHECKS_SECTION), Some(vec![]));
    }
}
