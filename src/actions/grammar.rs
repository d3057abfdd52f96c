//! 动作语法：从叙事文本中抽取受限的函数调用
//!
//! 只接受 `identifier "(" literal ("," literal)* ","? ")"`，字面量为数字或字符串；
//! 嵌套调用、属性访问、关键字参数、表达式一律视为叙事，静默跳过。
//! 纯函数：同一段文本每次抽取结果相同。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 参数字面量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    /// 类型名（用于错误提示）
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::Str(_) => "str",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Int(v) => Some(*v as f64),
            Literal::Float(v) => Some(*v),
            Literal::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// 一次被识别的调用；由解析产生，只读，执行器消费一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    pub args: Vec<Literal>,
    /// 原始行（已去除首尾空白），作为反馈里的 call-text
    pub source: String,
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n(.*?)```").expect("fence regex is valid")
    })
}

/// 候选行：有围栏代码块时只取块内内容，否则取全文
pub fn candidate_lines(text: &str) -> Vec<&str> {
    let blocks: Vec<&str> = fence_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let sources: Vec<&str> = if blocks.is_empty() { vec![text] } else { blocks };
    sources
        .into_iter()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// 抽取全部已声明工具的调用，保持从左到右、从上到下的顺序
pub fn extract_calls<F>(text: &str, is_known: F) -> Vec<ActionCall>
where
    F: Fn(&str) -> bool,
{
    candidate_lines(text)
        .into_iter()
        .filter_map(|line| parse_call(line).ok())
        .filter(|call| is_known(&call.name))
        .collect()
}

/// 解析失败原因（仅用于测试与调试，抽取时一律静默跳过）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    ExpectedIdentifier,
    ExpectedOpenParen,
    ExpectedLiteral(usize),
    UnterminatedString,
    BadNumber(String),
    ExpectedCommaOrClose(usize),
    TrailingInput(usize),
}

/// 把单行解析为一次调用
pub fn parse_call(line: &str) -> Result<ActionCall, ParseError> {
    let source = line.trim();
    let mut cur = Cursor::new(source);

    let name = cur.identifier().ok_or(ParseError::ExpectedIdentifier)?;
    cur.skip_ws();
    if !cur.eat('(') {
        return Err(ParseError::ExpectedOpenParen);
    }

    let mut args = Vec::new();
    loop {
        cur.skip_ws();
        if cur.eat(')') {
            break;
        }
        args.push(cur.literal()?);
        cur.skip_ws();
        if cur.eat(',') {
            continue;
        }
        if cur.eat(')') {
            break;
        }
        return Err(ParseError::ExpectedCommaOrClose(cur.pos));
    }

    cur.skip_ws();
    if !cur.at_end() {
        return Err(ParseError::TrailingInput(cur.pos));
    }

    Ok(ActionCall {
        name: name.to_string(),
        args,
        source: source.to_string(),
    })
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn identifier(&mut self) -> Option<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                self.bump();
            }
            _ => return None,
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        Some(&self.src[start..self.pos])
    }

    fn literal(&mut self) -> Result<Literal, ParseError> {
        match self.peek() {
            Some('"') | Some('\'') => self.string(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            _ => Err(ParseError::ExpectedLiteral(self.pos)),
        }
    }

    fn number(&mut self) -> Result<Literal, ParseError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        let mut is_float = false;
        let mut digits = 0usize;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits += 1;
                self.bump();
            } else if c == '.' && !is_float {
                is_float = true;
                self.bump();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) && digits > 0 {
            is_float = true;
            self.bump();
            if matches!(self.peek(), Some('-') | Some('+')) {
                self.bump();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = &self.src[start..self.pos];
        if digits == 0 {
            return Err(ParseError::BadNumber(text.to_string()));
        }
        if is_float {
            text.parse::<f64>()
                .map(Literal::Float)
                .map_err(|_| ParseError::BadNumber(text.to_string()))
        } else {
            text.parse::<i64>()
                .map(Literal::Int)
                .map_err(|_| ParseError::BadNumber(text.to_string()))
        }
    }

    fn string(&mut self) -> Result<Literal, ParseError> {
        let quote = self.bump().ok_or(ParseError::UnterminatedString)?;
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or(ParseError::UnterminatedString)?;
            if c == quote {
                return Ok(Literal::Str(out));
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let esc = self.bump().ok_or(ParseError::UnterminatedString)?;
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' => out.push('\\'),
                '\'' => out.push('\''),
                '"' => out.push('"'),
                'u' => {
                    let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(ch) => out.push(ch),
                        None => return Err(ParseError::UnterminatedString),
                    }
                }
                other => {
                    // 未知转义按原样保留
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }
}
