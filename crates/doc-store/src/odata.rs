//! Translation of restricted OData-style expression strings into the
//! filter algebra. The grammar is validated up front; a bad expression
//! fails before any I/O is issued.
//!
//! Supported: `eq ne gt ge lt le`, `and or not`, parentheses,
//! `contains(field,'lit')`, `startswith(...)`, `endswith(...)`, string
//! literals in single quotes (doubled to escape), numbers, `true`,
//! `false`, `null`.

use crate::filter::{CompareOp, Filter, TextMatch};
use crate::query::{SortKey, SortOrder};
use crate::store::QueryError;
use serde_json::Value;

pub fn parse_filter(input: &str) -> Result<Filter, QueryError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Filter::Empty);
    }
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let filter = parser.parse_or()?;
    parser.expect_end()?;
    Ok(filter)
}

/// Parse a `$orderby`-style list: `Field asc, Other desc`. Direction
/// defaults to ascending.
pub fn parse_order_by(input: &str) -> Result<Vec<SortKey>, QueryError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Vec::new());
    }
    input
        .split(',')
        .map(|clause| {
            let mut words = clause.split_whitespace();
            let field = words.next().filter(|f| is_identifier(f)).ok_or_else(|| {
                QueryError::BadExpression(format!("invalid orderby clause '{}'", clause.trim()))
            })?;
            let order = match words.next() {
                None => SortOrder::Ascending,
                Some("asc") => SortOrder::Ascending,
                Some("desc") => SortOrder::Descending,
                Some(other) => {
                    return Err(QueryError::BadExpression(format!(
                        "invalid sort direction '{other}'"
                    )))
                }
            };
            if words.next().is_some() {
                return Err(QueryError::BadExpression(format!(
                    "invalid orderby clause '{}'",
                    clause.trim()
                )));
            }
            Ok(SortKey {
                field: field.to_string(),
                order,
            })
        })
        .collect()
}

/// Parse a `$select`-style list of field names.
pub fn parse_select(input: &str) -> Result<Vec<String>, QueryError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Vec::new());
    }
    input
        .split(',')
        .map(|field| {
            let field = field.trim();
            if is_identifier(field) {
                Ok(field.to_string())
            } else {
                Err(QueryError::BadExpression(format!(
                    "invalid select field '{field}'"
                )))
            }
        })
        .collect()
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(at, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '\'' => {
                chars.next();
                let mut lit = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\'')) => {
                            // A doubled quote is an escaped quote.
                            if let Some(&(_, '\'')) = chars.peek() {
                                chars.next();
                                lit.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some((_, c)) => lit.push(c),
                        None => {
                            return Err(QueryError::BadExpression(
                                "unterminated string literal".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(lit));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut lit = String::new();
                lit.push(c);
                chars.next();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        lit.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = lit.parse::<f64>().map_err(|_| {
                    QueryError::BadExpression(format!("invalid number literal '{lit}'"))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut lit = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        lit.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(lit));
            }
            other => {
                return Err(QueryError::BadExpression(format!(
                    "unexpected character '{other}' at offset {at}"
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

    fn expect(&mut self, expected: Token) -> Result<(), QueryError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(QueryError::BadExpression(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn expect_end(&self) -> Result<(), QueryError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(QueryError::BadExpression(format!(
                "unexpected trailing {token:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Filter, QueryError> {
        let mut members = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Ident(word)) if word == "or") {
            self.next();
            members.push(self.parse_and()?);
        }
        Ok(Filter::or(members))
    }

    fn parse_and(&mut self) -> Result<Filter, QueryError> {
        let mut members = vec![self.parse_unary()?];
        while matches!(self.peek(), Some(Token::Ident(word)) if word == "and") {
            self.next();
            members.push(self.parse_unary()?);
        }
        Ok(Filter::and(members))
    }

    fn parse_unary(&mut self) -> Result<Filter, QueryError> {
        if matches!(self.peek(), Some(Token::Ident(word)) if word == "not") {
            self.next();
            return Ok(self.parse_unary()?.negate());
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Filter, QueryError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "contains" => self.parse_text_function(TextMatch::Contains),
                "startswith" => self.parse_text_function(TextMatch::StartsWith),
                "endswith" => self.parse_text_function(TextMatch::EndsWith),
                _ => self.parse_comparison(word),
            },
            other => Err(QueryError::BadExpression(format!(
                "expected an expression, found {other:?}"
            ))),
        }
    }

    fn parse_text_function(&mut self, mode: TextMatch) -> Result<Filter, QueryError> {
        self.expect(Token::LParen)?;
        let field = match self.next() {
            Some(Token::Ident(field)) => field,
            other => {
                return Err(QueryError::BadExpression(format!(
                    "expected a field name, found {other:?}"
                )))
            }
        };
        self.expect(Token::Comma)?;
        let needle = match self.next() {
            Some(Token::Str(needle)) => needle,
            other => {
                return Err(QueryError::BadExpression(format!(
                    "expected a string literal, found {other:?}"
                )))
            }
        };
        self.expect(Token::RParen)?;
        Ok(Filter::text(mode, &field, &needle, true))
    }

    fn parse_comparison(&mut self, field: String) -> Result<Filter, QueryError> {
        let op = match self.next() {
            Some(Token::Ident(op)) => match op.as_str() {
                "eq" => CompareOp::Eq,
                "ne" => CompareOp::Ne,
                "gt" => CompareOp::Gt,
                "ge" => CompareOp::Ge,
                "lt" => CompareOp::Lt,
                "le" => CompareOp::Le,
                other => {
                    return Err(QueryError::BadExpression(format!(
                        "unknown comparison operator '{other}'"
                    )))
                }
            },
            other => {
                return Err(QueryError::BadExpression(format!(
                    "expected a comparison operator, found {other:?}"
                )))
            }
        };
        let value = match self.next() {
            Some(Token::Str(s)) => Value::String(s),
            Some(Token::Number(n)) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                other => {
                    return Err(QueryError::BadExpression(format!(
                        "expected a literal, found identifier '{other}'"
                    )))
                }
            },
            other => {
                return Err(QueryError::BadExpression(format!(
                    "expected a literal, found {other:?}"
                )))
            }
        };
        Ok(Filter::compare(op, &field, value))
    }
}
