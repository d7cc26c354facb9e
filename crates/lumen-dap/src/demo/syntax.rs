//! Parser for the demo script language.
//!
//! One statement per line. Blocks (`func`, `if`/`else`, `while`) close with
//! `end`. `#` starts a comment line.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTS: &[&str] = &[
    "==", "!=", "<=", ">=", "(", ")", "[", "]", "{", "}", ",", ":", ".", "+", "-", "*", "/", "<", ">",
];

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let is_float = i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(if is_float {
                Token::Float(text.parse().map_err(|_| format!("invalid number {text}"))?)
            } else {
                Token::Int(text.parse().map_err(|_| format!("invalid number {text}"))?)
            });
            continue;
        }

        if c == '"' {
            i += 1;
            let mut out = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err("unterminated string".to_string());
                };
                i += 1;
                match ch {
                    '"' => break,
                    '\\' => {
                        let escaped = chars.get(i).copied().ok_or("unterminated string")?;
                        i += 1;
                        out.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    other => out.push(other),
                }
            }
            tokens.push(Token::Str(out));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let Some(punct) = PUNCTS.iter().find(|p| rest.starts_with(**p)) else {
            return Err(format!("unexpected character {c:?}"));
        };
        tokens.push(Token::Punct(punct));
        i += punct.len();
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Expr>),
    Record(Vec<(String, Expr)>),
    /// `table([columns...], [row...], ...)`
    Table(Vec<String>, Vec<Vec<Expr>>),
    Var(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub function: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rhs {
    Expr(Expr),
    Call(CallExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Func(Arc<FunctionDef>),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Let {
        name: String,
        value: Rhs,
    },
    Call(CallExpr),
    Print(Expr),
    Return(Option<Expr>),
    Throw {
        type_name: String,
        message: Option<Expr>,
    },
    Break(Option<String>),
    Sleep(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

#[derive(Debug)]
pub struct Program {
    pub file: String,
    pub body: Vec<Stmt>,
}

impl Program {
    /// Every line a statement starts on, sorted.
    pub fn executable_lines(&self) -> Vec<u32> {
        fn walk(stmts: &[Stmt], out: &mut Vec<u32>) {
            for stmt in stmts {
                out.push(stmt.line);
                match &stmt.kind {
                    StmtKind::Func(def) => walk(&def.body, out),
                    StmtKind::If { then, otherwise, .. } => {
                        walk(then, out);
                        walk(otherwise, out);
                    }
                    StmtKind::While { body, .. } => walk(body, out),
                    _ => {}
                }
            }
        }
        let mut lines = Vec::new();
        walk(&self.body, &mut lines);
        lines.sort_unstable();
        lines.dedup();
        lines
    }
}

/// A parse failure at a 1-based line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.line, self.message)
    }
}

impl std::error::Error for SyntaxError {}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn new(text: &str) -> Result<Self, String> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), String> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(format!("expected `{punct}`"))
        }
    }

    fn ident(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            _ => Err("expected a name".to_string()),
        }
    }

    fn finish(&self) -> Result<(), String> {
        if self.pos < self.tokens.len() {
            Err("unexpected trailing input".to_string())
        } else {
            Ok(())
        }
    }

    fn comma_separated<T>(
        &mut self,
        close: &str,
        mut item: impl FnMut(&mut Self) -> Result<T, String>,
    ) -> Result<Vec<T>, String> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(",")?;
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Token::Punct("==")) => BinOp::Eq,
            Some(Token::Punct("!=")) => BinOp::Ne,
            Some(Token::Punct("<")) => BinOp::Lt,
            Some(Token::Punct(">")) => BinOp::Gt,
            Some(Token::Punct("<=")) => BinOp::Le,
            Some(Token::Punct(">=")) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct("+")) => BinOp::Add,
                Some(Token::Punct("-")) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct("*")) => BinOp::Mul,
                Some(Token::Punct("/")) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                let field = self.ident()?;
                expr = Expr::Field(Box::new(expr), field);
            } else if self.eat("[") {
                let index = self.expr()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Float(f)) => Ok(Expr::Float(f)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "null" => Ok(Expr::Null),
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "table" if self.eat("(") => self.table(),
                _ => Ok(Expr::Var(name)),
            },
            Some(Token::Punct("(")) => {
                let inner = self.expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Punct("[")) => Ok(Expr::List(self.comma_separated("]", Self::expr)?)),
            Some(Token::Punct("{")) => {
                let fields = self.comma_separated("}", |p| {
                    let key = match p.next() {
                        Some(Token::Ident(key)) | Some(Token::Str(key)) => key,
                        _ => return Err("expected a field name".to_string()),
                    };
                    p.expect(":")?;
                    Ok((key, p.expr()?))
                })?;
                Ok(Expr::Record(fields))
            }
            Some(other) => Err(format!("unexpected {other:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn table(&mut self) -> Result<Expr, String> {
        let mut lists = self.comma_separated(")", Self::expr)?.into_iter();
        let Some(Expr::List(header)) = lists.next() else {
            return Err("table() needs a column list first".to_string());
        };
        let columns = header
            .into_iter()
            .map(|col| match col {
                Expr::Str(name) | Expr::Var(name) => Ok(name),
                _ => Err("column names must be strings".to_string()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rows = lists
            .map(|row| match row {
                Expr::List(cells) if cells.len() == columns.len() => Ok(cells),
                _ => Err(format!("each table row needs {} cells", columns.len())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Expr::Table(columns, rows))
    }

    fn call(&mut self) -> Result<CallExpr, String> {
        let function = self.ident()?;
        self.expect("(")?;
        let args = self.comma_separated(")", Self::expr)?;
        Ok(CallExpr { function, args })
    }
}

/// Parse a standalone expression (used for conditions and `evaluate`).
pub fn parse_expression(text: &str) -> Result<Expr, String> {
    let mut parser = ExprParser::new(text)?;
    let expr = parser.expr()?;
    parser.finish()?;
    Ok(expr)
}

fn parse_call(text: &str) -> Result<CallExpr, String> {
    let mut parser = ExprParser::new(text)?;
    let call = parser.call()?;
    parser.finish()?;
    Ok(call)
}

fn parse_signature(text: &str) -> Result<(String, Vec<String>), String> {
    let mut parser = ExprParser::new(text)?;
    let name = parser.ident()?;
    parser.expect("(")?;
    let params = parser.comma_separated(")", ExprParser::ident)?;
    parser.finish()?;
    Ok((name, params))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

struct BlockParser<'a> {
    file: &'a str,
    lines: Vec<(u32, &'a str)>,
    pos: usize,
}

impl<'a> BlockParser<'a> {
    fn error(line: u32, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            line,
            message: message.into(),
        }
    }

    fn block(&mut self, closers: &[&str], opened_at: u32) -> Result<(Vec<Stmt>, &'a str), SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            let Some(&(line, text)) = self.lines.get(self.pos) else {
                if closers.is_empty() {
                    return Ok((stmts, ""));
                }
                return Err(Self::error(opened_at, "block is missing `end`"));
            };
            self.pos += 1;
            if closers.contains(&text) {
                return Ok((stmts, text));
            }
            stmts.push(self.statement(line, text)?);
        }
    }

    fn statement(&mut self, line: u32, text: &'a str) -> Result<Stmt, SyntaxError> {
        let (keyword, rest) = text
            .split_once(char::is_whitespace)
            .map(|(k, r)| (k, r.trim()))
            .unwrap_or((text, ""));
        let at = |message: String| Self::error(line, message);

        let kind = match keyword {
            "func" => {
                let (name, params) = parse_signature(rest).map_err(at)?;
                let (body, _) = self.block(&["end"], line)?;
                StmtKind::Func(Arc::new(FunctionDef {
                    name,
                    params,
                    body,
                    file: self.file.to_string(),
                    line,
                }))
            }
            "if" => {
                let cond = parse_expression(rest).map_err(at)?;
                let (then, closer) = self.block(&["else", "end"], line)?;
                let otherwise = if closer == "else" {
                    self.block(&["end"], line)?.0
                } else {
                    Vec::new()
                };
                StmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            "while" => {
                let cond = parse_expression(rest).map_err(at)?;
                let (body, _) = self.block(&["end"], line)?;
                StmtKind::While { cond, body }
            }
            "let" => {
                let (name, value) = rest
                    .split_once('=')
                    .ok_or_else(|| at("expected `let name = value`".to_string()))?;
                let name = name.trim();
                if !is_identifier(name) {
                    return Err(at(format!("invalid variable name {name:?}")));
                }
                let value = value.trim();
                let value = match value.strip_prefix("call ") {
                    Some(call) => Rhs::Call(parse_call(call).map_err(at)?),
                    None => Rhs::Expr(parse_expression(value).map_err(at)?),
                };
                StmtKind::Let {
                    name: name.to_string(),
                    value,
                }
            }
            "call" => StmtKind::Call(parse_call(rest).map_err(at)?),
            "print" => StmtKind::Print(parse_expression(rest).map_err(at)?),
            "return" if rest.is_empty() => StmtKind::Return(None),
            "return" => StmtKind::Return(Some(parse_expression(rest).map_err(at)?)),
            "throw" => {
                let (type_name, message) = rest
                    .split_once(char::is_whitespace)
                    .map(|(t, m)| (t, m.trim()))
                    .unwrap_or((rest, ""));
                if !is_identifier(type_name) {
                    return Err(at("expected `throw Type [message]`".to_string()));
                }
                let message = if message.is_empty() {
                    None
                } else {
                    Some(parse_expression(message).map_err(at)?)
                };
                StmtKind::Throw {
                    type_name: type_name.to_string(),
                    message,
                }
            }
            "break" => StmtKind::Break((!rest.is_empty()).then(|| rest.to_string())),
            "sleep" => StmtKind::Sleep(parse_expression(rest).map_err(at)?),
            "end" | "else" => return Err(at(format!("unexpected `{keyword}`"))),
            other => return Err(at(format!("unknown statement `{other}`"))),
        };
        Ok(Stmt { line, kind })
    }
}

/// Parse a whole script. `file` is recorded on every function for display.
pub fn parse_program(file: &str, source: &str) -> Result<Program, SyntaxError> {
    let lines = source
        .lines()
        .enumerate()
        .map(|(idx, text)| ((idx + 1) as u32, text.trim()))
        .filter(|(_, text)| !text.is_empty() && !text.starts_with('#'))
        .collect();
    let mut parser = BlockParser {
        file,
        lines,
        pos: 0,
    };
    let (body, _) = parser.block(&[], 1)?;
    Ok(Program {
        file: file.to_string(),
        body,
    })
}
