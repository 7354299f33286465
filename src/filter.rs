//! Row-predicate filter grammar (spec §9 Design Notes: "Filter predicate").
//!
//! A small, portable grammar replaces the source's free-form string
//! predicate: `column (==|!=|<|<=|>|>=) literal`, combined with `and`, `or`,
//! `not`, and `in (…)`. The filter is parsed once per transformer and
//! evaluated row-wise. Anything outside this grammar is a hard parse error,
//! never silently accepted.
//!
//! ```text
//! filter    := or_expr
//! or_expr   := and_expr ( "or" and_expr )*
//! and_expr  := unary ( "and" unary )*
//! unary     := "not" unary | atom
//! atom      := "(" or_expr ")" | compare | membership
//! compare   := ident ("==" | "!=" | "<" | "<=" | ">" | ">=") literal
//! membership:= ident "in" "(" literal ("," literal)* ")"
//! literal   := number | "true" | "false" | quoted-string | bare-word
//! ```

use crate::error::DeidError;
use crate::frame::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A compiled filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        column: String,
        op: CompareOpPublic,
        literal: Value,
    },
    In {
        column: String,
        literals: Vec<Value>,
    },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

/// Public mirror of [`CompareOp`] so the enum can appear in `Filter`'s public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOpPublic {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl From<CompareOp> for CompareOpPublic {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Eq => CompareOpPublic::Eq,
            CompareOp::Ne => CompareOpPublic::Ne,
            CompareOp::Lt => CompareOpPublic::Lt,
            CompareOp::Le => CompareOpPublic::Le,
            CompareOp::Gt => CompareOpPublic::Gt,
            CompareOp::Ge => CompareOpPublic::Ge,
        }
    }
}

impl Filter {
    /// Parse a filter expression. Returns `TransformError` on anything
    /// outside the grammar — unsupported syntax is a hard error, never
    /// silently accepted (spec §9).
    pub fn parse(src: &str) -> Result<Filter, DeidError> {
        let tokens = lex(src)?;
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(DeidError::TransformError(format!(
                "unexpected trailing input in filter: '{src}'"
            )));
        }
        Ok(expr)
    }

    /// Evaluate this filter against one row. `columns` maps position to
    /// column name, `row` is the cell list in the same order.
    pub fn evaluate(&self, row: &[Value], columns: &[String]) -> Result<bool, DeidError> {
        match self {
            Filter::Compare { column, op, literal } => {
                let idx = column_index(columns, column)?;
                let cell = &row[idx];
                if cell.is_null() {
                    return Ok(false);
                }
                let ord = cell.partial_compare(literal).ok_or_else(|| {
                    DeidError::TransformError(format!(
                        "filter: cannot compare column '{column}' to literal"
                    ))
                })?;
                Ok(match op {
                    CompareOpPublic::Eq => ord == std::cmp::Ordering::Equal,
                    CompareOpPublic::Ne => ord != std::cmp::Ordering::Equal,
                    CompareOpPublic::Lt => ord == std::cmp::Ordering::Less,
                    CompareOpPublic::Le => ord != std::cmp::Ordering::Greater,
                    CompareOpPublic::Gt => ord == std::cmp::Ordering::Greater,
                    CompareOpPublic::Ge => ord != std::cmp::Ordering::Less,
                })
            }
            Filter::In { column, literals } => {
                let idx = column_index(columns, column)?;
                let cell = &row[idx];
                if cell.is_null() {
                    return Ok(false);
                }
                Ok(literals.iter().any(|l| cell.to_key() == l.to_key()))
            }
            Filter::And(a, b) => Ok(a.evaluate(row, columns)? && b.evaluate(row, columns)?),
            Filter::Or(a, b) => Ok(a.evaluate(row, columns)? || b.evaluate(row, columns)?),
            Filter::Not(a) => Ok(!a.evaluate(row, columns)?),
        }
    }
}

fn column_index(columns: &[String], name: &str) -> Result<usize, DeidError> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| DeidError::TransformError(format!("filter references unknown column '{name}'")))
}

// ── Lexer ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
    In,
}

fn lex(src: &str) -> Result<Vec<Token>, DeidError> {
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("=="));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("!="));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("<="));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(">="));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op("<"));
                i += 1;
            }
            '>' => {
                tokens.push(Token::Op(">"));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(DeidError::TransformError(format!(
                        "unterminated string literal in filter: '{src}'"
                    )));
                }
                tokens.push(Token::Literal(Value::Str(s)));
            }
            _ if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(classify_word(&word));
            }
            _ => {
                return Err(DeidError::TransformError(format!(
                    "unexpected character '{c}' in filter: '{src}'"
                )));
            }
        }
    }
    Ok(tokens)
}

fn classify_word(word: &str) -> Token {
    match word {
        "and" | "AND" => Token::And,
        "or" | "OR" => Token::Or,
        "not" | "NOT" => Token::Not,
        "in" | "IN" => Token::In,
        "true" | "True" | "TRUE" => Token::Literal(Value::Bool(true)),
        "false" | "False" | "FALSE" => Token::Literal(Value::Bool(false)),
        _ => {
            if let Ok(i) = word.parse::<i64>() {
                Token::Literal(Value::Int(i))
            } else if let Ok(f) = word.parse::<f64>() {
                Token::Literal(Value::Float(f))
            } else {
                Token::Ident(word.to_string())
            }
        }
    }
}

// ── Recursive-descent parser ────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> Result<Filter, DeidError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Filter::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Filter, DeidError> {
        let mut lhs = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Filter::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Filter, DeidError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Filter::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Filter, DeidError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(DeidError::TransformError("expected ')' in filter".into())),
                }
            }
            Some(Token::Ident(_)) => self.parse_comparison_or_membership(),
            other => Err(DeidError::TransformError(format!(
                "expected column identifier in filter, found {other:?}"
            ))),
        }
    }

    fn parse_comparison_or_membership(&mut self) -> Result<Filter, DeidError> {
        let column = match self.next() {
            Some(Token::Ident(name)) => name.clone(),
            _ => unreachable!(),
        };
        match self.next() {
            Some(Token::Op(op)) => {
                let literal = self.parse_literal()?;
                let op = match *op {
                    "==" => CompareOp::Eq,
                    "!=" => CompareOp::Ne,
                    "<" => CompareOp::Lt,
                    "<=" => CompareOp::Le,
                    ">" => CompareOp::Gt,
                    ">=" => CompareOp::Ge,
                    _ => unreachable!(),
                };
                Ok(Filter::Compare {
                    column,
                    op: op.into(),
                    literal,
                })
            }
            Some(Token::In) => {
                match self.next() {
                    Some(Token::LParen) => {}
                    _ => return Err(DeidError::TransformError("expected '(' after 'in'".into())),
                }
                let mut literals = Vec::new();
                loop {
                    literals.push(self.parse_literal()?);
                    match self.peek() {
                        Some(Token::Comma) => {
                            self.next();
                        }
                        Some(Token::RParen) => {
                            self.next();
                            break;
                        }
                        other => {
                            return Err(DeidError::TransformError(format!(
                                "expected ',' or ')' in 'in (...)', found {other:?}"
                            )))
                        }
                    }
                }
                Ok(Filter::In { column, literals })
            }
            other => Err(DeidError::TransformError(format!(
                "expected comparison operator or 'in' after column '{column}', found {other:?}"
            ))),
        }
    }

    fn parse_literal(&mut self) -> Result<Value, DeidError> {
        match self.next() {
            Some(Token::Literal(v)) => Ok(v.clone()),
            Some(Token::Ident(word)) => Ok(Value::Str(word.clone())),
            other => Err(DeidError::TransformError(format!("expected literal, found {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(columns: &[&str], values: Vec<Value>) -> (Vec<String>, Vec<Value>) {
        (columns.iter().map(|s| s.to_string()).collect(), values)
    }

    #[test]
    fn simple_equality() {
        let f = Filter::parse("status == 'active'").unwrap();
        let (cols, r) = row(&["status"], vec![Value::Str("active".into())]);
        assert!(f.evaluate(&r, &cols).unwrap());
        let (_, r2) = row(&["status"], vec![Value::Str("inactive".into())]);
        assert!(!f.evaluate(&r2, &cols).unwrap());
    }

    #[test]
    fn numeric_comparison_and_and_or() {
        let f = Filter::parse("age >= 18 and age < 65").unwrap();
        let (cols, _) = row(&["age"], vec![]);
        assert!(f.evaluate(&[Value::Int(30)], &cols).unwrap());
        assert!(!f.evaluate(&[Value::Int(10)], &cols).unwrap());
        assert!(!f.evaluate(&[Value::Int(70)], &cols).unwrap());
    }

    #[test]
    fn membership_and_negation() {
        let f = Filter::parse("not (country in ('US', 'CA'))").unwrap();
        let (cols, _) = row(&["country"], vec![]);
        assert!(!f.evaluate(&[Value::Str("US".into())], &cols).unwrap());
        assert!(f.evaluate(&[Value::Str("FR".into())], &cols).unwrap());
    }

    #[test]
    fn null_cell_never_matches() {
        let f = Filter::parse("age == 30").unwrap();
        let (cols, _) = row(&["age"], vec![]);
        assert!(!f.evaluate(&[Value::Null], &cols).unwrap());
    }

    #[test]
    fn unsupported_syntax_is_a_hard_error() {
        assert!(Filter::parse("age ~= 30").is_err());
        assert!(Filter::parse("age == ").is_err());
        assert!(Filter::parse("age == 30 extra").is_err());
    }
}
