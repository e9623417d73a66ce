//! ELF文件加载器

use anyhow::{Context, Result, anyhow};
use object::{Architecture, Endianness, Object, ObjectSection, SectionKind};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::emulator::State;

/// 加载32位大端PowerPC ELF文件到模拟器内存
pub fn load_elf(state: &mut State, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let elf_data =
        fs::read(path).with_context(|| format!("无法读取ELF文件 '{}'", path.display()))?;
    let elf_file = object::File::parse(&*elf_data)
        .with_context(|| format!("无法解析ELF文件 '{}'", path.display()))?;

    if elf_file.architecture() != Architecture::PowerPc || elf_file.endianness() != Endianness::Big {
        return Err(anyhow!("不支持的目标架构, 仅支持32位大端PowerPC"));
    }

    for section in elf_file.sections() {
        if !matches!(
            section.kind(),
            SectionKind::Text | SectionKind::Data | SectionKind::ReadOnlyData
        ) {
            continue;
        }

        let section_name = section.name().unwrap_or("<unknown>").to_string();
        let addr = u32::try_from(section.address())
            .with_context(|| format!("节 '{}' 的地址超出32位范围", section_name))?;
        let data = section
            .data()
            .with_context(|| format!("无法读取节 '{}' 的数据", section_name))?;

        state
            .write_memory(addr, data)
            .with_context(|| format!("无法将节 '{}' 写入地址 {:#010x}", section_name, addr))?;
        debug!(section = %section_name, addr = format_args!("{addr:#010x}"), len = data.len(), "已加载节");
    }

    let entry = u32::try_from(elf_file.entry()).context("入口地址超出32位范围")?;
    state.set_pc(entry);
    Ok(())
}
