//! Tokenizer for projection expressions

use serde_json::Value;

use super::FilterError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Identifier(String),
    QuotedIdentifier(String),
    Number(i64),
    Literal(Value),
    Dot,
    Star,
    Flatten,
    Filter,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Colon,
    At,
    Pipe,
    Or,
    And,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

impl Token {
    /// Left binding power used by the Pratt parser.
    pub(crate) fn lbp(&self) -> u8 {
        match self {
            Token::Pipe => 1,
            Token::Or => 2,
            Token::And => 3,
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge => 5,
            Token::Flatten => 9,
            Token::Star => 20,
            Token::Filter => 21,
            Token::Dot => 40,
            Token::Not => 45,
            Token::LBrace => 50,
            Token::LBracket => 55,
            Token::LParen => 60,
            _ => 0,
        }
    }
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, FilterError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\n' | '\r' => pos += 1,
            '.' => {
                tokens.push(Token::Dot);
                pos += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                pos += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                pos += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                pos += 1;
            }
            '@' => {
                tokens.push(Token::At);
                pos += 1;
            }
            '[' => match chars.get(pos + 1) {
                Some(']') => {
                    tokens.push(Token::Flatten);
                    pos += 2;
                }
                Some('?') => {
                    tokens.push(Token::Filter);
                    pos += 2;
                }
                _ => {
                    tokens.push(Token::LBracket);
                    pos += 1;
                }
            },
            '|' => {
                if chars.get(pos + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    pos += 2;
                } else {
                    tokens.push(Token::Pipe);
                    pos += 1;
                }
            }
            '&' => {
                if chars.get(pos + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    pos += 2;
                } else {
                    return Err(invalid(input, pos, "expression references are not supported"));
                }
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    pos += 2;
                } else {
                    tokens.push(Token::Not);
                    pos += 1;
                }
            }
            '=' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    pos += 2;
                } else {
                    return Err(invalid(input, pos, "expected '=='"));
                }
            }
            '<' | '>' => {
                let or_equal = chars.get(pos + 1) == Some(&'=');
                tokens.push(match (c, or_equal) {
                    ('<', false) => Token::Lt,
                    ('<', true) => Token::Le,
                    ('>', false) => Token::Gt,
                    _ => Token::Ge,
                });
                pos += if or_equal { 2 } else { 1 };
            }
            '"' => {
                let (text, next) = delimited(&chars, pos, '"', input)?;
                let name: String = serde_json::from_str(&format!("\"{}\"", text))
                    .map_err(|e| invalid(input, pos, &format!("bad quoted identifier: {}", e)))?;
                tokens.push(Token::QuotedIdentifier(name));
                pos = next;
            }
            '\'' => {
                let (text, next) = delimited(&chars, pos, '\'', input)?;
                tokens.push(Token::Literal(Value::String(text.replace("\\'", "'"))));
                pos = next;
            }
            '`' => {
                let (text, next) = delimited(&chars, pos, '`', input)?;
                let value: Value = serde_json::from_str(&text.replace("\\`", "`"))
                    .map_err(|e| invalid(input, pos, &format!("bad JSON literal: {}", e)))?;
                tokens.push(Token::Literal(value));
                pos = next;
            }
            '-' | '0'..='9' => {
                let start = pos;
                pos += 1;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                let text: String = chars[start..pos].iter().collect();
                let number = text
                    .parse::<i64>()
                    .map_err(|_| invalid(input, start, "bad number"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_')
                {
                    pos += 1;
                }
                tokens.push(Token::Identifier(chars[start..pos].iter().collect()));
            }
            other => {
                return Err(invalid(input, pos, &format!("unexpected character '{}'", other)));
            }
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

/// Scan a token wrapped in `delim`, honouring backslash escapes. Returns the raw
/// inner text and the position just past the closing delimiter.
fn delimited(
    chars: &[char],
    start: usize,
    delim: char,
    input: &str,
) -> Result<(String, usize), FilterError> {
    let mut pos = start + 1;
    let mut text = String::new();
    while pos < chars.len() {
        match chars[pos] {
            '\\' if pos + 1 < chars.len() => {
                text.push('\\');
                text.push(chars[pos + 1]);
                pos += 2;
            }
            c if c == delim => return Ok((text, pos + 1)),
            c => {
                text.push(c);
                pos += 1;
            }
        }
    }
    Err(invalid(input, start, &format!("unterminated {}", delim)))
}

fn invalid(input: &str, pos: usize, reason: &str) -> FilterError {
    FilterError::InvalidFilterSpec(format!("{} at offset {} in '{}'", reason, pos, input))
}
