//! PowerPC 32位大端指令反汇编

use anyhow::{Result, anyhow};
use capstone::prelude::*;

/// PowerPC反汇编器
pub struct PpcDisassembler {
    cs: Capstone,
}

impl PpcDisassembler {
    pub fn new() -> Result<Self> {
        let cs = Capstone::new()
            .ppc()
            .mode(arch::ppc::ArchMode::Mode32)
            .endian(capstone::Endian::Big)
            .build()
            .map_err(|e| anyhow!("无法创建capstone引擎: {}", e))?;

        Ok(Self { cs })
    }

    /// 反汇编单条指令
    pub fn disasm_instruction(&self, code: u32, address: u32) -> Result<String> {
        let insns = self
            .cs
            .disasm_count(&code.to_be_bytes(), address as u64, 1)
            .map_err(|e| anyhow!("反汇编失败: {}", e))?;

        let Some(insn) = insns.iter().next() else {
            return Ok(format!("{:#010x}    <invalid>", code));
        };
        let mnemonic = insn.mnemonic().unwrap_or("<unknown>");
        match insn.op_str() {
            Some(op_str) if !op_str.is_empty() => Ok(format!("{} {}", mnemonic, op_str)),
            _ => Ok(mnemonic.to_string()),
        }
    }

    /// 带地址和机器码的反汇编文本，用于代码视图
    pub fn disasm_with_details(&self, code: u32, address: u32) -> Result<String> {
        let text = self.disasm_instruction(code, address)?;
        Ok(format!("{:08x}: {:08x}    {}", address, code, text))
    }
}

/// 便利函数：反汇编单条PowerPC指令
pub fn disasm_ppc_instruction(code: u32, address: u32) -> Result<String> {
    PpcDisassembler::new()?.disasm_instruction(code, address)
}
