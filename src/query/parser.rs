use super::ast::{Filter, Statement};
use super::value::Value;
use crate::types::{Result, UmbraError};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Eq,
    Comma,
    Semi,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("'{s}'"),
            Token::Str(s) => format!("string '{s}'"),
            Token::Int(i) => format!("number {i}"),
            Token::Float(x) => format!("number {x}"),
            Token::Eq => "'='".into(),
            Token::Comma => "','".into(),
            Token::Semi => "';'".into(),
        }
    }
}

fn syntax(msg: impl Into<String>) -> UmbraError {
    UmbraError::Syntax(msg.into())
}

fn lex(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semi);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut out = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => out.push(escaped),
                            None => break,
                        },
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => out.push(c),
                    }
                }
                if !closed {
                    return Err(syntax(format!("unterminated string at offset {start}")));
                }
                tokens.push(Token::Str(out));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut end = start;
                let mut is_float = false;
                while let Some(&(i, c)) = chars.peek() {
                    let sign = c == '-' && i == start;
                    if c.is_ascii_digit() || sign || (c == '.' && !is_float) {
                        is_float |= c == '.';
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let raw = &src[start..end];
                let token = if is_float {
                    raw.parse().map(Token::Float).ok()
                } else {
                    raw.parse().map(Token::Int).ok()
                };
                tokens.push(token.ok_or_else(|| syntax(format!("invalid number '{raw}'")))?);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(src[start..end].to_owned()));
            }
            other => {
                return Err(syntax(format!(
                    "unexpected character '{other}' at offset {start}"
                )))
            }
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

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn keyword(&mut self, kw: &str) -> Result<()> {
        if self.at_keyword(kw) {
            self.pos += 1;
            return Ok(());
        }
        Err(match self.peek() {
            Some(token) => syntax(format!("expected {kw}, found {}", token.describe())),
            None => syntax(format!("expected {kw}, found end of input")),
        })
    }

    fn ident(&mut self, what: &str) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(token) => Err(syntax(format!("expected {what}, found {}", token.describe()))),
            None => Err(syntax(format!("expected {what}, found end of input"))),
        }
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == want => Ok(()),
            Some(token) => Err(syntax(format!(
                "expected {}, found {}",
                want.describe(),
                token.describe()
            ))),
            None => Err(syntax(format!("expected {}, found end of input", want.describe()))),
        }
    }

    fn literal(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Int(i)) => Ok(Value::Int(i)),
            Some(Token::Float(x)) => Ok(Value::Float(x)),
            Some(Token::Ident(word)) => match word.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(syntax(format!("expected a literal, found '{word}'"))),
            },
            Some(token) => Err(syntax(format!("expected a literal, found {}", token.describe()))),
            None => Err(syntax("expected a literal, found end of input")),
        }
    }

    fn filter(&mut self) -> Result<Option<Filter>> {
        if !self.at_keyword("where") {
            return Ok(None);
        }
        self.pos += 1;
        let field = self.ident("field name")?;
        self.expect(Token::Eq)?;
        let value = self.literal()?;
        Ok(Some(Filter { field, value }))
    }

    fn statement(&mut self) -> Result<Statement> {
        let verb = self.ident("statement")?;
        let stmt = match verb.to_ascii_lowercase().as_str() {
            "create" => {
                self.keyword("class")?;
                Statement::CreateClass {
                    name: self.ident("class name")?,
                }
            }
            "drop" => {
                self.keyword("class")?;
                Statement::DropClass {
                    name: self.ident("class name")?,
                }
            }
            "insert" => {
                self.keyword("into")?;
                let class = self.ident("class name")?;
                self.keyword("set")?;
                let mut fields: Vec<(String, Value)> = Vec::new();
                loop {
                    let field = self.ident("field name")?;
                    self.expect(Token::Eq)?;
                    let value = self.literal()?;
                    if let Some(slot) = fields.iter_mut().find(|entry| entry.0 == field) {
                        slot.1 = value;
                    } else {
                        fields.push((field, value));
                    }
                    if self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Statement::Insert { class, fields }
            }
            "select" => {
                self.keyword("from")?;
                let class = self.ident("class name")?;
                let filter = self.filter()?;
                let limit = if self.at_keyword("limit") {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Int(n)) if n >= 0 => Some(n as usize),
                        Some(token) => {
                            return Err(syntax(format!(
                                "expected a non-negative limit, found {}",
                                token.describe()
                            )))
                        }
                        None => return Err(syntax("expected a limit, found end of input")),
                    }
                } else {
                    None
                };
                Statement::Select {
                    class,
                    filter,
                    limit,
                }
            }
            "delete" => {
                self.keyword("from")?;
                let class = self.ident("class name")?;
                let filter = self.filter()?;
                Statement::Delete { class, filter }
            }
            other => return Err(syntax(format!("unknown statement '{other}'"))),
        };
        if self.peek() == Some(&Token::Semi) {
            self.pos += 1;
        }
        match self.peek() {
            None => Ok(stmt),
            Some(token) => Err(syntax(format!("unexpected trailing {}", token.describe()))),
        }
    }
}

pub(super) fn parse(src: &str) -> Result<Statement> {
    let tokens = lex(src)?;
    if tokens.is_empty() {
        return Err(syntax("empty statement"));
    }
    Parser { tokens, pos: 0 }.statement()
}
