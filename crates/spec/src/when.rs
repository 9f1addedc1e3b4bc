// SPDX-License-Identifier: MIT

//! Restricted `when` expression grammar (spec.md §4.3, §9).
//!
//! Hand-rolled recursive-descent parser rather than a general expression
//! engine — the grammar is five node kinds, not worth a
//! parser-combinator crate for something this small and fixed.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WhenError {
    #[error("unexpected end of `when` expression")]
    UnexpectedEof,
    #[error("unexpected token `{0}` in `when` expression")]
    UnexpectedToken(String),
    #[error("attribute access must be rooted at `jobs`, `job`, or `env`, found `{0}`")]
    InvalidRoot(String),
    #[error("trailing input after `when` expression: `{0}`")]
    TrailingInput(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("attribute `{0}` is not present in the evaluation view")]
    MissingAttribute(String),
    #[error("cannot compare {0} and {1}")]
    Incomparable(String, String),
    #[error("expression `{0}` did not evaluate to a boolean")]
    NotBoolean(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Restricted AST: only the node kinds spec.md §4.3 permits.
#[derive(Debug, Clone, PartialEq)]
pub enum WhenExpr {
    And(Box<WhenExpr>, Box<WhenExpr>),
    Or(Box<WhenExpr>, Box<WhenExpr>),
    Not(Box<WhenExpr>),
    Compare(CmpOp, Box<WhenExpr>, Box<WhenExpr>),
    BoolLit(bool),
    NumLit(f64),
    Attr(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Op(CmpOp),
    Bool(bool),
    Num(f64),
    Attr(Vec<String>),
}

fn tokenize(src: &str) -> Result<Vec<Token>, WhenError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Le));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Ge));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op(CmpOp::Lt));
                i += 1;
            }
            '>' => {
                tokens.push(Token::Op(CmpOp::Gt));
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num: f64 = text
                    .parse()
                    .map_err(|_| WhenError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                match text.to_ascii_lowercase().as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "not" => tokens.push(Token::Not),
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => {
                        let parts: Vec<String> = text.split('.').map(|s| s.to_string()).collect();
                        match parts.first().map(|s| s.as_str()) {
                            Some("jobs") | Some("job") | Some("env") => {
                                tokens.push(Token::Attr(parts))
                            }
                            _ => return Err(WhenError::InvalidRoot(text)),
                        }
                    }
                }
            }
            other => return Err(WhenError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> Result<WhenExpr, WhenError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = WhenExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<WhenExpr, WhenError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = WhenExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<WhenExpr, WhenError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(WhenExpr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<WhenExpr, WhenError> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.advance();
            let rhs = self.parse_primary()?;
            return Ok(WhenExpr::Compare(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<WhenExpr, WhenError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(WhenError::UnexpectedToken(format!("{other:?}"))),
                    None => Err(WhenError::UnexpectedEof),
                }
            }
            Some(Token::Not) => {
                let inner = self.parse_not()?;
                Ok(WhenExpr::Not(Box::new(inner)))
            }
            Some(Token::Bool(b)) => Ok(WhenExpr::BoolLit(b)),
            Some(Token::Num(n)) => Ok(WhenExpr::NumLit(n)),
            Some(Token::Attr(parts)) => Ok(WhenExpr::Attr(parts)),
            Some(other) => Err(WhenError::UnexpectedToken(format!("{other:?}"))),
            None => Err(WhenError::UnexpectedEof),
        }
    }
}

/// Parse a `when` string into a restricted boolean expression tree.
/// Any construct outside the grammar (function calls, indexing,
/// arithmetic other than comparisons, containment) fails to parse.
pub fn parse(src: &str) -> Result<WhenExpr, WhenError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(WhenError::UnexpectedEof);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(WhenError::TrailingInput(src.to_string()));
    }
    Ok(expr)
}

fn attr_display(parts: &[String]) -> String {
    parts.join(".")
}

fn traverse<'a>(root: &'a Value, parts: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn eval_value(expr: &WhenExpr, view: &Value) -> Result<Value, EvalError> {
    match expr {
        WhenExpr::BoolLit(b) => Ok(Value::Bool(*b)),
        WhenExpr::NumLit(n) => Ok(serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)),
        WhenExpr::Attr(parts) => traverse(view, parts)
            .cloned()
            .ok_or_else(|| EvalError::MissingAttribute(attr_display(parts))),
        other => eval_bool(other, view).map(Value::Bool),
    }
}

/// Job outputs always round-trip through the resolver as rendered
/// strings (spec.md §4.2 — a template always substitutes text), so a
/// `when` clause written against a boolean/numeric literal (e.g.
/// `jobs.probe.outputs.has_data == true`, spec.md §8 scenario S1)
/// would otherwise fail to typecheck even when the author's intent is
/// unambiguous. Coerce a string attribute to the literal's shape when
/// it parses cleanly; leave it alone otherwise so a genuine type
/// mismatch still reports `Incomparable`.
fn coerce(value: &Value, shape: &Value) -> Value {
    match (value, shape) {
        (Value::String(s), Value::Bool(_)) => match s.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value.clone(),
        },
        (Value::String(s), Value::Number(_)) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

fn cmp(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, EvalError> {
    let lhs = coerce(lhs, rhs);
    let rhs = coerce(rhs, &lhs);
    match (&lhs, &rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            Ok(match op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
            })
        }
        (Value::Bool(a), Value::Bool(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            _ => Err(EvalError::Incomparable("bool".into(), "bool".into())),
        },
        (Value::String(a), Value::String(b)) => Ok(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }),
        (a, b) => Err(EvalError::Incomparable(
            value_kind(a).to_string(),
            value_kind(b).to_string(),
        )),
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Evaluate a parsed `when` expression against a restricted view
/// (`jobs.*`, `job.*`, `env.*`).
pub fn eval_bool(expr: &WhenExpr, view: &Value) -> Result<bool, EvalError> {
    match expr {
        WhenExpr::And(l, r) => Ok(eval_bool(l, view)? && eval_bool(r, view)?),
        WhenExpr::Or(l, r) => Ok(eval_bool(l, view)? || eval_bool(r, view)?),
        WhenExpr::Not(inner) => Ok(!eval_bool(inner, view)?),
        WhenExpr::Compare(op, l, r) => {
            let lv = eval_value(l, view)?;
            let rv = eval_value(r, view)?;
            cmp(*op, &lv, &rv)
        }
        WhenExpr::BoolLit(b) => Ok(*b),
        WhenExpr::Attr(parts) => match traverse(view, parts) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(EvalError::NotBoolean(other.to_string())),
            None => Err(EvalError::MissingAttribute(attr_display(parts))),
        },
        WhenExpr::NumLit(_) => Err(EvalError::NotBoolean(format!("{expr:?}"))),
    }
}

impl fmt::Display for WhenExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
#[path = "when_tests.rs"]
mod tests;
