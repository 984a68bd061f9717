//! A small Lucene-style filter language evaluated by the in-memory backend.
//!
//! Supported: `field:value`, `field:"quoted value"`, `field:*`, `field:pre*`,
//! bare words and quoted phrases (case-insensitive substring over all field
//! values), `AND`, `OR`, `NOT`, `-term`, parentheses. Adjacent terms are ANDed.

use crate::parser::LogRecord;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error in filter at position {position}: {reason}")]
pub struct FilterSyntaxError {
    pub position: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Field(String),
    Word(String),
    Phrase(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValuePattern {
    Exists,
    Exact(String),
    Prefix(String),
}

impl ValuePattern {
    fn from_token(raw: &str, quoted: bool) -> Self {
        let lower = raw.to_lowercase();
        if quoted {
            ValuePattern::Exact(lower)
        } else if lower == "*" {
            ValuePattern::Exists
        } else if let Some(prefix) = lower.strip_suffix('*') {
            ValuePattern::Prefix(prefix.to_string())
        } else {
            ValuePattern::Exact(lower)
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            ValuePattern::Exists => true,
            ValuePattern::Exact(v) => value.eq_ignore_ascii_case(v) || value.to_lowercase() == *v,
            ValuePattern::Prefix(p) => value.to_lowercase().starts_with(p.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Field { field: String, pattern: ValuePattern },
    Text(String),
}

impl FilterExpr {
    pub fn parse(input: &str) -> Result<Self, FilterSyntaxError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(FilterSyntaxError { position: 0, reason: "empty filter".into() });
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("unexpected ')'"));
        }
        Ok(expr)
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        match self {
            FilterExpr::And(parts) => parts.iter().all(|p| p.matches(record)),
            FilterExpr::Or(parts) => parts.iter().any(|p| p.matches(record)),
            FilterExpr::Not(inner) => !inner.matches(record),
            FilterExpr::Field { field, pattern } => record.get(field).map(|v| pattern.matches(v)).unwrap_or(false),
            FilterExpr::Text(needle) => record.fields.values().any(|v| v.to_lowercase().contains(needle.as_str())),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, FilterSyntaxError> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match c {
            '(' => {
                out.push((start, Token::LParen));
                i += 1;
            }
            ')' => {
                out.push((start, Token::RParen));
                i += 1;
            }
            '"' => {
                let (phrase, next) = read_quoted(&chars, i)?;
                out.push((start, Token::Phrase(phrase)));
                i = next;
            }
            '-' if chars.get(i + 1).is_some_and(|n| !n.is_whitespace()) => {
                out.push((start, Token::Not));
                i += 1;
            }
            _ => {
                let mut word = String::new();
                while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '(' && chars[i] != ')' {
                    if chars[i] == ':' && !word.is_empty() {
                        break;
                    }
                    word.push(chars[i]);
                    i += 1;
                }
                if i < chars.len() && chars[i] == ':' {
                    i += 1;
                    out.push((start, Token::Field(word)));
                    match chars.get(i) {
                        Some('"') => {
                            let (phrase, next) = read_quoted(&chars, i)?;
                            out.push((i, Token::Phrase(phrase)));
                            i = next;
                        }
                        Some(n) if !n.is_whitespace() && *n != '(' && *n != ')' => {
                            let vstart = i;
                            let mut value = String::new();
                            while i < chars.len() && !chars[i].is_whitespace() && chars[i] != ')' {
                                value.push(chars[i]);
                                i += 1;
                            }
                            out.push((vstart, Token::Word(value)));
                        }
                        _ => {
                            return Err(FilterSyntaxError { position: i, reason: "expected a value after ':'".into() })
                        }
                    }
                    continue;
                }
                let token = match word.as_str() {
                    "AND" | "&&" => Token::And,
                    "OR" | "||" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Word(word),
                };
                out.push((start, token));
            }
        }
    }
    Ok(out)
}

fn read_quoted(chars: &[char], open: usize) -> Result<(String, usize), FilterSyntaxError> {
    let mut i = open + 1;
    let mut s = String::new();
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                s.push(chars[i + 1]);
                i += 2;
            }
            '"' => return Ok((s, i + 1)),
            c => {
                s.push(c);
                i += 1;
            }
        }
    }
    Err(FilterSyntaxError { position: open, reason: "unterminated quoted string".into() })
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn error(&self, reason: &str) -> FilterSyntaxError {
        let position = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0);
        FilterSyntaxError { position, reason: reason.to_string() }
    }

    fn parse_or(&mut self) -> Result<FilterExpr, FilterSyntaxError> {
        let mut parts = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { FilterExpr::Or(parts) })
    }

    fn parse_and(&mut self) -> Result<FilterExpr, FilterSyntaxError> {
        let mut parts = vec![self.parse_unary()?];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                    parts.push(self.parse_unary()?);
                }
                Some(Token::Or) | Some(Token::RParen) | None => break,
                Some(_) => parts.push(self.parse_unary()?),
            }
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { FilterExpr::And(parts) })
    }

    fn parse_unary(&mut self) -> Result<FilterExpr, FilterSyntaxError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(FilterExpr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<FilterExpr, FilterSyntaxError> {
        let Some((_, token)) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error("unexpected end of filter"));
        };
        self.pos += 1;
        match token {
            Token::LParen => {
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Token::Field(field) => {
                let (_, value) = self.tokens.get(self.pos).cloned().ok_or_else(|| self.error("expected a value"))?;
                self.pos += 1;
                let pattern = match value {
                    Token::Word(w) => ValuePattern::from_token(&w, false),
                    Token::Phrase(p) => ValuePattern::from_token(&p, true),
                    _ => return Err(self.error("expected a value")),
                };
                Ok(FilterExpr::Field { field, pattern })
            }
            Token::Word(w) => Ok(FilterExpr::Text(w.to_lowercase())),
            Token::Phrase(p) => Ok(FilterExpr::Text(p.to_lowercase())),
            Token::RParen => {
                self.pos -= 1;
                Err(self.error("unexpected ')'"))
            }
            Token::And | Token::Or | Token::Not => {
                self.pos -= 1;
                Err(self.error("operator without operand"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    fn rec(json: &str) -> LogRecord {
        parse_line(json)
    }

    #[test]
    fn field_terms_and_boolean_operators() {
        let r = rec(r#"{"level":"ERROR","service":"api","message":"db timeout"}"#);
        assert!(FilterExpr::parse("level:error AND service:api").unwrap().matches(&r));
        assert!(FilterExpr::parse("level:warn OR service:api").unwrap().matches(&r));
        assert!(!FilterExpr::parse("NOT service:api").unwrap().matches(&r));
        assert!(!FilterExpr::parse("-service:api").unwrap().matches(&r));
        assert!(FilterExpr::parse("(level:warn OR level:error) timeout").unwrap().matches(&r));
        assert!(FilterExpr::parse(r#"message:"db timeout""#).unwrap().matches(&r));
        assert!(FilterExpr::parse("service:* AND service:a*").unwrap().matches(&r));
    }

    #[test]
    fn reports_syntax_errors() {
        for bad in ["(level:error", "level:", "\"open", "AND level:error", "level:error)", ""] {
            assert!(FilterExpr::parse(bad).is_err(), "{bad:?} should fail");
        }
    }
}
