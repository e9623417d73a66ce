//! 断点条件表达式
//!
//! 表达式在创建断点时解析一次，命中检查时只做求值。求值基于
//! [`MachineState`] 提供的只读快照，不会修改CPU或内存状态。

mod parser;

use std::fmt;
use thiserror::Error;

/// 表达式解析错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("表达式为空")]
    Empty,
    #[error("非法字符 '{ch}' (位置 {pos})")]
    UnexpectedChar { pos: usize, ch: char },
    #[error("非法数字 '{text}' (位置 {pos})")]
    InvalidNumber { pos: usize, text: String },
    #[error("未知变量 '{name}' (位置 {pos})")]
    UnknownVariable { pos: usize, name: String },
    #[error("未知函数 '{name}' (位置 {pos})")]
    UnknownFunction { pos: usize, name: String },
    #[error("位置 {pos} 处需要 {what}")]
    Expected { pos: usize, what: &'static str },
    #[error("表达式意外结束")]
    UnexpectedEnd,
    #[error("位置 {pos} 处存在多余输入")]
    TrailingInput { pos: usize },
    #[error("嵌套超过 {limit} 层")]
    TooDeep { limit: usize },
    #[error("表达式过长，超过 {limit} 个单元")]
    TooLong { limit: usize },
}

/// 表达式求值错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("除数为零")]
    DivisionByZero,
    #[error("无法读取内存: 地址 {addr:#010x}")]
    MemoryRead { addr: u32 },
}

/// 表达式求值所需的机器状态只读视图
pub trait MachineState {
    fn gpr(&self, index: usize) -> u32;
    fn fpr(&self, index: usize) -> f64;
    fn pc(&self) -> u32;
    fn lr(&self) -> u32;
    fn ctr(&self) -> u32;
    fn msr(&self) -> u32;
    fn xer(&self) -> u32;

    fn read_u8(&self, addr: u32) -> Option<u8>;
    fn read_u16(&self, addr: u32) -> Option<u16>;
    fn read_u32(&self, addr: u32) -> Option<u32>;
    fn read_u64(&self, addr: u32) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Var {
    Gpr(u8),
    Fpr(u8),
    Pc,
    Lr,
    Ctr,
    Msr,
    Xer,
}

impl Var {
    fn from_name(name: &str) -> Option<Self> {
        let indexed = |prefix: &str| {
            name.strip_prefix(prefix)
                .filter(|n| !n.is_empty() && n.len() <= 2 && n.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| *n < 32)
        };
        match name {
            "pc" => Some(Var::Pc),
            "lr" => Some(Var::Lr),
            "ctr" => Some(Var::Ctr),
            "msr" => Some(Var::Msr),
            "xer" => Some(Var::Xer),
            _ => indexed("r")
                .map(Var::Gpr)
                .or_else(|| indexed("f").map(Var::Fpr)),
        }
    }

    fn value(self, state: &dyn MachineState) -> f64 {
        match self {
            Var::Gpr(n) => state.gpr(n as usize) as f64,
            Var::Fpr(n) => state.fpr(n as usize),
            Var::Pc => state.pc() as f64,
            Var::Lr => state.lr() as f64,
            Var::Ctr => state.ctr() as f64,
            Var::Msr => state.msr() as f64,
            Var::Xer => state.xer() as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func {
    ReadU8,
    ReadS8,
    ReadU16,
    ReadS16,
    ReadU32,
    ReadS32,
    ReadF32,
    ReadF64,
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "read_u8" => Func::ReadU8,
            "read_s8" => Func::ReadS8,
            "read_u16" => Func::ReadU16,
            "read_s16" => Func::ReadS16,
            "read_u32" => Func::ReadU32,
            "read_s32" => Func::ReadS32,
            "read_f32" => Func::ReadF32,
            "read_f64" => Func::ReadF64,
            "u8" => Func::U8,
            "s8" => Func::S8,
            "u16" => Func::U16,
            "s16" => Func::S16,
            "u32" => Func::U32,
            "s32" => Func::S32,
            _ => return None,
        })
    }

    fn apply(self, arg: f64, state: &dyn MachineState) -> Result<f64, EvalError> {
        let addr = arg as i64 as u32;
        let fail = || EvalError::MemoryRead { addr };
        let bits = arg as i64;
        Ok(match self {
            Func::ReadU8 => state.read_u8(addr).ok_or_else(fail)? as f64,
            Func::ReadS8 => state.read_u8(addr).ok_or_else(fail)? as i8 as f64,
            Func::ReadU16 => state.read_u16(addr).ok_or_else(fail)? as f64,
            Func::ReadS16 => state.read_u16(addr).ok_or_else(fail)? as i16 as f64,
            Func::ReadU32 => state.read_u32(addr).ok_or_else(fail)? as f64,
            Func::ReadS32 => state.read_u32(addr).ok_or_else(fail)? as i32 as f64,
            Func::ReadF32 => f32::from_bits(state.read_u32(addr).ok_or_else(fail)?) as f64,
            Func::ReadF64 => f64::from_bits(state.read_u64(addr).ok_or_else(fail)?),
            Func::U8 => bits as u8 as f64,
            Func::S8 => bits as i8 as f64,
            Func::U16 => bits as u16 as f64,
            Func::S16 => bits as i16 as f64,
            Func::U32 => bits as u32 as f64,
            Func::S32 => bits as i32 as f64,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Number(f64),
    Var(Var),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Func, Box<Node>),
}

fn truth(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

impl Node {
    fn eval(&self, state: &dyn MachineState) -> Result<f64, EvalError> {
        match self {
            Node::Number(value) => Ok(*value),
            Node::Var(var) => Ok(var.value(state)),
            Node::Call(func, arg) => func.apply(arg.eval(state)?, state),
            Node::Unary(op, operand) => {
                let value = operand.eval(state)?;
                Ok(match op {
                    UnaryOp::Neg => -value,
                    UnaryOp::Not => truth(value == 0.0),
                    UnaryOp::BitNot => !(value as i64) as f64,
                })
            }
            // 短路求值
            Node::Binary(BinaryOp::LogicalAnd, lhs, rhs) => {
                if lhs.eval(state)? == 0.0 {
                    return Ok(0.0);
                }
                Ok(truth(rhs.eval(state)? != 0.0))
            }
            Node::Binary(BinaryOp::LogicalOr, lhs, rhs) => {
                if lhs.eval(state)? != 0.0 {
                    return Ok(1.0);
                }
                Ok(truth(rhs.eval(state)? != 0.0))
            }
            Node::Binary(op, lhs, rhs) => {
                let a = lhs.eval(state)?;
                let b = rhs.eval(state)?;
                let (ia, ib) = (a as i64, b as i64);
                Ok(match op {
                    BinaryOp::BitOr => (ia | ib) as f64,
                    BinaryOp::BitXor => (ia ^ ib) as f64,
                    BinaryOp::BitAnd => (ia & ib) as f64,
                    BinaryOp::Eq => truth(a == b),
                    BinaryOp::Ne => truth(a != b),
                    BinaryOp::Lt => truth(a < b),
                    BinaryOp::Le => truth(a <= b),
                    BinaryOp::Gt => truth(a > b),
                    BinaryOp::Ge => truth(a >= b),
                    BinaryOp::Shl => ia.wrapping_shl(ib as u32) as f64,
                    BinaryOp::Shr => ia.wrapping_shr(ib as u32) as f64,
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div if b == 0.0 => return Err(EvalError::DivisionByZero),
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem if b == 0.0 => return Err(EvalError::DivisionByZero),
                    BinaryOp::Rem => a % b,
                    BinaryOp::LogicalAnd | BinaryOp::LogicalOr => unreachable!(),
                })
            }
        }
    }
}

/// 已解析的条件表达式
///
/// 保留原始文本，`text()` 原样返回，不做规范化输出。
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    text: String,
    root: Node,
}

impl Expression {
    pub fn try_parse(text: &str) -> Result<Self, ParseError> {
        let root = parser::parse(text)?;
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 计算表达式的数值
    pub fn evaluate_value(&self, state: &dyn MachineState) -> Result<f64, EvalError> {
        self.root.eval(state)
    }

    /// 非零即为真
    pub fn evaluate(&self, state: &dyn MachineState) -> Result<bool, EvalError> {
        Ok(self.evaluate_value(state)? != 0.0)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;

    /// 测试用机器状态，记录内存读取次数
    #[derive(Default)]
    pub(crate) struct FakeState {
        pub gpr: [u32; 32],
        pub fpr: [f64; 32],
        pub pc: u32,
        pub lr: u32,
        pub memory: Vec<(u32, u8)>,
        pub reads: Cell<usize>,
    }

    impl MachineState for FakeState {
        fn gpr(&self, index: usize) -> u32 {
            self.gpr[index]
        }
        fn fpr(&self, index: usize) -> f64 {
            self.fpr[index]
        }
        fn pc(&self) -> u32 {
            self.pc
        }
        fn lr(&self) -> u32 {
            self.lr
        }
        fn ctr(&self) -> u32 {
            0
        }
        fn msr(&self) -> u32 {
            0
        }
        fn xer(&self) -> u32 {
            0
        }
        fn read_u8(&self, addr: u32) -> Option<u8> {
            self.reads.set(self.reads.get() + 1);
            self.memory.iter().find(|(a, _)| *a == addr).map(|(_, v)| *v)
        }
        fn read_u16(&self, addr: u32) -> Option<u16> {
            Some(u16::from_be_bytes([self.read_u8(addr)?, self.read_u8(addr + 1)?]))
        }
        fn read_u32(&self, addr: u32) -> Option<u32> {
            Some(((self.read_u16(addr)? as u32) << 16) | self.read_u16(addr + 2)? as u32)
        }
        fn read_u64(&self, addr: u32) -> Option<u64> {
            Some(((self.read_u32(addr)? as u64) << 32) | self.read_u32(addr + 4)? as u64)
        }
    }

    fn eval(text: &str, state: &FakeState) -> f64 {
        Expression::try_parse(text).unwrap().evaluate_value(state).unwrap()
    }

    #[test]
    fn test_register_condition() {
        let mut state = FakeState::default();
        let expr = Expression::try_parse("r3 == 5").unwrap();
        assert!(!expr.evaluate(&state).unwrap());
        state.gpr[3] = 5;
        assert!(expr.evaluate(&state).unwrap());
        state.gpr[3] = 6;
        assert!(!expr.evaluate(&state).unwrap());
    }

    #[test]
    fn test_arithmetic_and_bitwise() {
        let mut state = FakeState::default();
        state.gpr[4] = 0x10;
        state.lr = 0x8000_3000;
        assert_eq!(eval("1 + 2 * 3", &state), 7.0);
        assert_eq!(eval("(1 + 2) * 3", &state), 9.0);
        assert_eq!(eval("r4 << 4 | 1", &state), 0x101 as f64);
        assert_eq!(eval("0xff & ~0x0f ^ 1", &state), 0xf1 as f64);
        assert_eq!(eval("-r4 + 0x20", &state), 16.0);
        assert_eq!(eval("!r4", &state), 0.0);
        assert_eq!(eval("7 % 4", &state), 3.0);
        assert_eq!(eval("lr == 0x80003000", &state), 1.0);
        assert_eq!(eval("s8(0xff)", &state), -1.0);
        assert_eq!(eval("u16(0x12345)", &state), 0x2345 as f64);
    }

    #[test]
    fn test_memory_reads() {
        let state = FakeState {
            memory: vec![(0x100, 0xff), (0x101, 0xfe), (0x102, 0x00), (0x103, 0x01)],
            ..Default::default()
        };
        assert_eq!(eval("read_u8(0x100)", &state), 255.0);
        assert_eq!(eval("read_s8(0x100)", &state), -1.0);
        assert_eq!(eval("read_s16(0x100)", &state), -2.0);
        assert_eq!(eval("read_u32(0x100)", &state), 0xfffe0001u32 as f64);

        let err = Expression::try_parse("read_u32(0x200) == 0")
            .unwrap()
            .evaluate(&state)
            .unwrap_err();
        assert_eq!(err, EvalError::MemoryRead { addr: 0x200 });
    }

    #[test]
    fn test_short_circuit() {
        let state = FakeState::default();
        // 左侧为假，右侧内存读取不会执行
        let expr = Expression::try_parse("r3 != 0 && read_u8(0x100) == 1").unwrap();
        assert!(!expr.evaluate(&state).unwrap());
        assert_eq!(state.reads.get(), 0);

        let expr = Expression::try_parse("r3 == 0 || 1 / 0").unwrap();
        assert!(expr.evaluate(&state).unwrap());
    }

    #[test]
    fn test_division_by_zero() {
        let state = FakeState::default();
        let expr = Expression::try_parse("r3 / r4").unwrap();
        assert_eq!(expr.evaluate(&state), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_text_is_verbatim() {
        let expr = Expression::try_parse("  R3==5 ").unwrap();
        assert_eq!(expr.text(), "  R3==5 ");
        assert_eq!(expr.to_string(), "  R3==5 ");
        assert!(Expression::try_parse("").is_err());
    }

    #[test]
    fn test_nested_and_multiline_conditions_rejected() {
        let deep = format!("{}1{}", "(".repeat(3_000), ")".repeat(3_000));
        assert!(Expression::try_parse(&deep).is_err());
        assert!(Expression::try_parse("r3 ==\n5").is_err());
        assert!(Expression::try_parse("r3 == 5\r\n").is_err());
    }
}
