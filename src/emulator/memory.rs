//! 内存管理模块
//!
//! 平坦大端内存，地址从 `base` 开始。

use thiserror::Error;

/// 内存错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("内存访问越界: 地址 {addr:#010x}, 大小 {size}")]
    OutOfBounds { addr: u32, size: usize },
    #[error("内存对齐错误: 地址 {addr:#010x}, 对齐要求 {alignment}")]
    Misaligned { addr: u32, alignment: usize },
    #[error("非法的内存大小: {0}")]
    InvalidSize(usize),
}

/// 内存管理结构
#[derive(Debug, Clone)]
pub struct Memory {
    base: u32,
    data: Vec<u8>,
}

impl Memory {
    pub fn new(base: u32, size: usize) -> Result<Self, MemoryError> {
        if size == 0 || size as u64 > u64::from(u32::MAX - base) + 1 {
            return Err(MemoryError::InvalidSize(size));
        }
        Ok(Self {
            base,
            data: vec![0; size],
        })
    }

    /// 转换并检查地址有效性
    fn translate_address(&self, addr: u32, size: usize) -> Result<usize, MemoryError> {
        let offset = addr.wrapping_sub(self.base) as usize;
        let end = offset
            .checked_add(size)
            .ok_or(MemoryError::OutOfBounds { addr, size })?;
        if addr < self.base || end > self.data.len() {
            return Err(MemoryError::OutOfBounds { addr, size });
        }
        Ok(offset)
    }

    pub fn read(&self, addr: u32, size: usize) -> Result<&[u8], MemoryError> {
        let start = self.translate_address(addr, size)?;
        Ok(&self.data[start..start + size])
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let start = self.translate_address(addr, data.len())?;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_array<const N: usize>(&self, addr: u32) -> Result<[u8; N], MemoryError> {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(self.read(addr, N)?);
        Ok(bytes)
    }

    pub fn read_u8(&self, addr: u32) -> Result<u8, MemoryError> {
        Ok(self.read_array::<1>(addr)?[0])
    }

    pub fn read_u16(&self, addr: u32) -> Result<u16, MemoryError> {
        self.read_array(addr).map(u16::from_be_bytes)
    }

    pub fn read_u32(&self, addr: u32) -> Result<u32, MemoryError> {
        self.read_array(addr).map(u32::from_be_bytes)
    }

    pub fn read_u64(&self, addr: u32) -> Result<u64, MemoryError> {
        self.read_array(addr).map(u64::from_be_bytes)
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), MemoryError> {
        self.write(addr, &[value])
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.write(addr, &value.to_be_bytes())
    }

    /// 取指令，要求4字节对齐
    pub fn fetch(&self, addr: u32) -> Result<u32, MemoryError> {
        if addr % 4 != 0 {
            return Err(MemoryError::Misaligned { addr, alignment: 4 });
        }
        self.read_u32(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_access() {
        let mut mem = Memory::new(0x8000_0000, 0x1000).unwrap();
        mem.write_u32(0x8000_0010, 0x1234_5678).unwrap();
        assert_eq!(mem.read_u8(0x8000_0010).unwrap(), 0x12);
        assert_eq!(mem.read_u16(0x8000_0012).unwrap(), 0x5678);
        assert_eq!(mem.read_u32(0x8000_0010).unwrap(), 0x1234_5678);
        mem.write(0x8000_0014, &[0xab, 0xcd]).unwrap();
        assert_eq!(mem.read_u64(0x8000_0010).unwrap(), 0x1234_5678_abcd_0000);
    }

    #[test]
    fn test_bounds() {
        let mem = Memory::new(0x8000_0000, 0x1000).unwrap();
        assert_eq!(
            mem.read_u32(0x7fff_fffe),
            Err(MemoryError::OutOfBounds { addr: 0x7fff_fffe, size: 4 })
        );
        assert!(mem.read_u32(0x8000_0ffc).is_ok());
        assert!(mem.read_u32(0x8000_0ffe).is_err());
        assert_eq!(
            mem.fetch(0x8000_0002),
            Err(MemoryError::Misaligned { addr: 0x8000_0002, alignment: 4 })
        );
        assert!(matches!(Memory::new(0, 0), Err(MemoryError::InvalidSize(0))));
        assert!(Memory::new(0x8000_0000, 24 * 1024 * 1024).is_ok());
    }
}
