//! 条件表达式的词法与语法分析

use super::{BinaryOp, Func, Node, ParseError, UnaryOp, Var};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

/// 按长度降序排列，保证最长匹配
const OPERATORS: &[&str] = &[
    "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "&", "|",
    "^", "!", "~",
];

/// 括号、一元运算符和函数调用的最大嵌套层数
const MAX_DEPTH: usize = 64;
/// 单个表达式的最大词法单元数，同时限制语法树高度
const MAX_TOKENS: usize = 1024;

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos] as char;
        // 条件按行保存，换行等控制字符一律视为非法
        if c == ' ' || c == '\t' {
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            let start = pos;
            let value = if text[pos..].starts_with("0x") || text[pos..].starts_with("0X") {
                pos += 2;
                let digits_start = pos;
                while pos < bytes.len() && bytes[pos].is_ascii_hexdigit() {
                    pos += 1;
                }
                u64::from_str_radix(&text[digits_start..pos], 16)
                    .map_err(|_| ParseError::InvalidNumber {
                        pos: start,
                        text: text[start..pos].to_string(),
                    })? as f64
            } else {
                while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                    pos += 1;
                }
                text[start..pos]
                    .parse::<f64>()
                    .map_err(|_| ParseError::InvalidNumber {
                        pos: start,
                        text: text[start..pos].to_string(),
                    })?
            };
            // 数字后紧跟字母视为非法，如 `12ab`
            if pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                return Err(ParseError::InvalidNumber {
                    pos: start,
                    text: text[start..=pos].to_string(),
                });
            }
            tokens.push((start, Token::Number(value)));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            tokens.push((start, Token::Ident(text[start..pos].to_ascii_lowercase())));
            continue;
        }

        match c {
            '(' => {
                tokens.push((pos, Token::LParen));
                pos += 1;
            }
            ')' => {
                tokens.push((pos, Token::RParen));
                pos += 1;
            }
            _ => {
                let op = *OPERATORS
                    .iter()
                    .find(|op| text[pos..].starts_with(**op))
                    .ok_or_else(|| ParseError::UnexpectedChar {
                        pos,
                        ch: text[pos..].chars().next().unwrap_or(c),
                    })?;
                tokens.push((pos, Token::Op(op)));
                pos += op.len();
            }
        }
    }

    if tokens.len() > MAX_TOKENS {
        return Err(ParseError::TooLong { limit: MAX_TOKENS });
    }
    Ok(tokens)
}

/// 二元运算符优先级，从低到高
const BINARY_LEVELS: &[&[(&str, BinaryOp)]] = &[
    &[("||", BinaryOp::LogicalOr)],
    &[("&&", BinaryOp::LogicalAnd)],
    &[("|", BinaryOp::BitOr)],
    &[("^", BinaryOp::BitXor)],
    &[("&", BinaryOp::BitAnd)],
    &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
    &[
        ("<", BinaryOp::Lt),
        ("<=", BinaryOp::Le),
        (">", BinaryOp::Gt),
        (">=", BinaryOp::Ge),
    ],
    &[("<<", BinaryOp::Shl), (">>", BinaryOp::Shr)],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
];

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, tok)| tok)
    }

    fn pos(&self) -> usize {
        self.tokens.get(self.cursor).map_or(self.end, |(pos, _)| *pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.cursor).map(|(_, tok)| tok.clone());
        self.cursor += 1;
        tok
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        let pos = self.pos();
        match self.next() {
            Some(Token::RParen) => Ok(()),
            Some(_) => Err(ParseError::Expected { pos, what: "')'" }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<Node, ParseError>,
    ) -> Result<Node, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::TooDeep { limit: MAX_DEPTH });
        }
        self.depth += 1;
        let node = f(self);
        self.depth -= 1;
        node
    }

    fn binary(&mut self, level: usize) -> Result<Node, ParseError> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.unary();
        };

        let mut lhs = self.binary(level + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(sym)) => ops.iter().find(|(s, _)| s == sym).map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = op else { break };
            self.cursor += 1;
            let rhs = self.binary(level + 1)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, ParseError> {
        let op = match self.peek() {
            Some(Token::Op("-")) => Some(UnaryOp::Neg),
            Some(Token::Op("!")) => Some(UnaryOp::Not),
            Some(Token::Op("~")) => Some(UnaryOp::BitNot),
            Some(Token::Op("+")) => {
                self.cursor += 1;
                return self.nested(Self::unary);
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.cursor += 1;
                Ok(Node::Unary(op, Box::new(self.nested(Self::unary)?)))
            }
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        match self.next() {
            Some(Token::Number(value)) => Ok(Node::Number(value)),
            Some(Token::LParen) => self.nested(|p| {
                let node = p.binary(0)?;
                p.expect_rparen()?;
                Ok(node)
            }),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let func = Func::from_name(&name)
                        .ok_or(ParseError::UnknownFunction { pos, name })?;
                    self.cursor += 1;
                    let arg = self.nested(|p| {
                        let arg = p.binary(0)?;
                        p.expect_rparen()?;
                        Ok(arg)
                    })?;
                    Ok(Node::Call(func, Box::new(arg)))
                } else {
                    Var::from_name(&name)
                        .map(Node::Var)
                        .ok_or(ParseError::UnknownVariable { pos, name })
                }
            }
            Some(_) => Err(ParseError::Expected {
                pos,
                what: "操作数",
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }
}

pub(super) fn parse(text: &str) -> Result<Node, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parser = Parser {
        tokens: tokenize(text)?,
        cursor: 0,
        end: text.len(),
        depth: 0,
    };
    let node = parser.binary(0)?;
    if parser.cursor < parser.tokens.len() {
        return Err(ParseError::TrailingInput { pos: parser.pos() });
    }
    Ok(node)
}
