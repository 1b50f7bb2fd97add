//! Calculator tool: evaluates arithmetic expressions.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    = term (('+' | '-') term)*
//! term    = unary (('*' | '/' | '//' | '%') unary)*
//! unary   = ('-' | '+') unary | power
//! power   = primary (('**' | '^') unary)?        right-associative
//! primary = NUMBER | IDENT | IDENT '(' expr ')' | '(' expr ')'
//! ```
//!
//! Identifiers: `pi`, `e`; functions: `sqrt`, `abs`, `round`, `floor`, `ceil`,
//! `ln`, `log10`, `sin`, `cos`, `tan`.

use std::iter::Peekable;
use std::str::CharIndices;

use async_trait::async_trait;
use dewey_core::error::ToolError;
use dewey_core::tool::{ParamType, Tool, ToolResult, ToolSchema};
use thiserror::Error;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports + - * / // % ** , parentheses, \
         pi, e and sqrt/abs/round/floor/ceil/ln/log10/sin/cos/tan."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().param(
            "expression",
            ParamType::String,
            "The expression to evaluate, e.g. '(2 + 3) * 4'",
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        let value = evaluate(expr).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "calculator".into(),
            reason: e.to_string(),
        })?;
        Ok(ToolResult::ok(format_number(value)))
    }
}

/// Integers print without a trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NotFinite,
    #[error("expression nests deeper than 256 levels")]
    TooDeep,
}

/// Nesting limit for parentheses, function calls, signs and exponents.
pub const MAX_DEPTH: usize = 256;

/// Evaluate an arithmetic expression.
pub fn evaluate(expr: &str) -> Result<f64, CalcError> {
    let tokens = Lexer::new(expr).collect::<Result<Vec<_>, _>>()?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        return Err(CalcError::UnexpectedToken(tok.describe()));
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(&'static str),
    Open,
    Close,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(n) => format!("number {n}"),
            Token::Ident(s) => format!("name '{s}'"),
            Token::Op(op) => format!("operator '{op}'"),
            Token::Open => "'('".into(),
            Token::Close => "')'".into(),
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn take_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> &'a str {
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            end = i + c.len_utf8();
            self.chars.next();
        }
        &self.src[start..end]
    }

    /// Consume `second` if it follows, returning the two-char operator.
    fn pair(&mut self, second: char, double: &'static str, single: &'static str) -> Token {
        if self.chars.peek().is_some_and(|&(_, c)| c == second) {
            self.chars.next();
            Token::Op(double)
        } else {
            Token::Op(single)
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, CalcError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.chars.peek().is_some_and(|&(_, c)| c.is_whitespace()) {
            self.chars.next();
        }
        let (start, c) = self.chars.next()?;
        let token = match c {
            '+' | '-' | '%' | '^' => Token::Op(match c {
                '+' => "+",
                '-' => "-",
                '%' => "%",
                _ => "**",
            }),
            '*' => self.pair('*', "**", "*"),
            '/' => self.pair('/', "//", "/"),
            '(' => Token::Open,
            ')' => Token::Close,
            c if c.is_ascii_digit() || c == '.' => {
                let end = start + c.len_utf8();
                let rest = self.take_while(end, |c| c.is_ascii_digit() || c == '.' || c == '_');
                let text = format!("{c}{rest}").replace('_', "");
                match text.parse() {
                    Ok(n) => Token::Num(n),
                    Err(_) => return Some(Err(CalcError::InvalidNumber(text))),
                }
            }
            c if c.is_ascii_alphabetic() => {
                let end = start + c.len_utf8();
                let rest = self.take_while(end, |c| c.is_ascii_alphanumeric());
                Token::Ident(format!("{c}{rest}").to_ascii_lowercase())
            }
            other => return Some(Err(CalcError::UnexpectedChar(other, start))),
        };
        Some(Ok(token))
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Result<&Token, CalcError> {
        let tok = self.tokens.get(self.pos).ok_or(CalcError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.term()?;
        while let Some(op @ ("+" | "-")) = self.peek_op() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == "+" { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.unary()?;
        while let Some(op @ ("*" | "/" | "//" | "%")) = self.peek_op() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = match op {
                "*" => acc * rhs,
                _ if rhs == 0.0 => return Err(CalcError::DivisionByZero),
                "/" => acc / rhs,
                "//" => (acc / rhs).floor(),
                // Sign follows the divisor, as in Python.
                _ => acc - rhs * (acc / rhs).floor(),
            };
        }
        Ok(acc)
    }

    /// Every recursive path goes through here, so the depth check lives here.
    fn unary(&mut self) -> Result<f64, CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, CalcError> {
        match self.peek_op() {
            Some("-") => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.primary()?;
        if self.peek_op() == Some("**") {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, CalcError> {
        match self.next()?.clone() {
            Token::Num(n) => Ok(n),
            Token::Open => {
                let value = self.expr()?;
                match self.next()? {
                    Token::Close => Ok(value),
                    other => Err(CalcError::UnexpectedToken(other.describe())),
                }
            }
            Token::Ident(name) => {
                if self.tokens.get(self.pos) == Some(&Token::Open) {
                    let arg = self.primary()?;
                    return apply(&name, arg);
                }
                match name.as_str() {
                    "pi" => Ok(std::f64::consts::PI),
                    "e" => Ok(std::f64::consts::E),
                    _ => Err(CalcError::UnknownName(name)),
                }
            }
            other => Err(CalcError::UnexpectedToken(other.describe())),
        }
    }
}

fn apply(function: &str, x: f64) -> Result<f64, CalcError> {
    Ok(match function {
        "sqrt" => x.sqrt(),
        "abs" => x.abs(),
        "round" => x.round(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "ln" => x.ln(),
        "log10" => x.log10(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        _ => return Err(CalcError::UnknownName(function.to_string())),
    })
}
