//! Pratt parser producing the projection AST

use serde_json::Value;

use super::FilterError;
use super::lexer::{Token, tokenize};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Ast {
    Identity,
    Field(String),
    Literal(Value),
    Subexpr(Box<Ast>, Box<Ast>),
    Index(i64),
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
    Projection {
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    ObjectProjection {
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    FilterProjection {
        lhs: Box<Ast>,
        predicate: Box<Ast>,
        rhs: Box<Ast>,
    },
    Flatten(Box<Ast>),
    MultiHash(Vec<(String, Ast)>),
    MultiList(Vec<Ast>),
    Pipe(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Not(Box<Ast>),
    Compare(Comparator, Box<Ast>, Box<Ast>),
}

/// Parse a complete expression; trailing tokens are an error.
pub(crate) fn parse(expression: &str) -> Result<Ast, FilterError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source: expression,
    };
    let ast = parser.expression(0)?;
    match parser.peek() {
        Token::Eof => Ok(ast),
        other => Err(parser.error(&format!("unexpected trailing token {:?}", other))),
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), FilterError> {
        let token = self.advance();
        if token == expected {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}, found {:?}", expected, token)))
        }
    }

    fn error(&self, reason: &str) -> FilterError {
        FilterError::InvalidFilterSpec(format!("{} in '{}'", reason, self.source))
    }

    fn expression(&mut self, rbp: u8) -> Result<Ast, FilterError> {
        let token = self.advance();
        let mut left = self.nud(token)?;
        while rbp < self.peek().lbp() {
            let token = self.advance();
            left = self.led(token, left)?;
        }
        Ok(left)
    }

    fn nud(&mut self, token: Token) -> Result<Ast, FilterError> {
        match token {
            Token::At => Ok(Ast::Identity),
            Token::Identifier(name) | Token::QuotedIdentifier(name) => Ok(Ast::Field(name)),
            Token::Literal(value) => Ok(Ast::Literal(value)),
            Token::Star => {
                let rhs = self.projection_rhs(Token::Star.lbp())?;
                Ok(Ast::ObjectProjection {
                    lhs: Box::new(Ast::Identity),
                    rhs: Box::new(rhs),
                })
            }
            Token::Flatten => {
                let rhs = self.projection_rhs(Token::Flatten.lbp())?;
                Ok(Ast::Projection {
                    lhs: Box::new(Ast::Flatten(Box::new(Ast::Identity))),
                    rhs: Box::new(rhs),
                })
            }
            Token::Filter => self.filter(Ast::Identity),
            Token::LBracket => match self.peek() {
                Token::Number(_) | Token::Colon => self.index_or_slice(Ast::Identity),
                Token::Star if self.peek_at(1) == &Token::RBracket => {
                    self.advance();
                    self.advance();
                    self.wildcard_projection(Ast::Identity)
                }
                _ => self.multi_list(),
            },
            Token::LBrace => self.multi_hash(),
            Token::Not => {
                let operand = self.expression(Token::Not.lbp())?;
                Ok(Ast::Not(Box::new(operand)))
            }
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(self.error(&format!("unexpected token {:?}", other))),
        }
    }

    fn led(&mut self, token: Token, left: Ast) -> Result<Ast, FilterError> {
        match token {
            Token::Dot => {
                let rhs = self.dot_rhs(Token::Dot.lbp())?;
                Ok(Ast::Subexpr(Box::new(left), Box::new(rhs)))
            }
            Token::Pipe => {
                let rhs = self.expression(Token::Pipe.lbp())?;
                Ok(Ast::Pipe(Box::new(left), Box::new(rhs)))
            }
            Token::Or => {
                let rhs = self.expression(Token::Or.lbp())?;
                Ok(Ast::Or(Box::new(left), Box::new(rhs)))
            }
            Token::And => {
                let rhs = self.expression(Token::And.lbp())?;
                Ok(Ast::And(Box::new(left), Box::new(rhs)))
            }
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge => {
                let comparator = match token {
                    Token::Eq => Comparator::Eq,
                    Token::Ne => Comparator::Ne,
                    Token::Lt => Comparator::Lt,
                    Token::Le => Comparator::Le,
                    Token::Gt => Comparator::Gt,
                    _ => Comparator::Ge,
                };
                let rhs = self.expression(5)?;
                Ok(Ast::Compare(comparator, Box::new(left), Box::new(rhs)))
            }
            Token::Flatten => {
                let rhs = self.projection_rhs(Token::Flatten.lbp())?;
                Ok(Ast::Projection {
                    lhs: Box::new(Ast::Flatten(Box::new(left))),
                    rhs: Box::new(rhs),
                })
            }
            Token::Filter => self.filter(left),
            Token::LBracket => match self.peek() {
                Token::Number(_) | Token::Colon => self.index_or_slice(left),
                Token::Star => {
                    self.advance();
                    self.expect(Token::RBracket)?;
                    self.wildcard_projection(left)
                }
                other => Err(self.error(&format!("unexpected token {:?} after '['", other))),
            },
            other => Err(self.error(&format!("unexpected token {:?}", other))),
        }
    }

    /// Right-hand side of a projection: everything that binds tighter than the
    /// projection itself is applied to each projected element.
    fn projection_rhs(&mut self, bp: u8) -> Result<Ast, FilterError> {
        if self.peek().lbp() < 10 {
            return Ok(Ast::Identity);
        }
        match self.peek() {
            Token::LBracket | Token::Filter => self.expression(bp),
            Token::Dot => {
                self.advance();
                self.dot_rhs(bp)
            }
            other => Err(self.error(&format!("unexpected token {:?} in projection", other))),
        }
    }

    fn dot_rhs(&mut self, bp: u8) -> Result<Ast, FilterError> {
        match self.peek() {
            Token::Identifier(_) | Token::QuotedIdentifier(_) | Token::Star | Token::LBrace => {
                self.expression(bp)
            }
            Token::LBracket => {
                self.advance();
                self.multi_list()
            }
            other => Err(self.error(&format!("unexpected token {:?} after '.'", other))),
        }
    }

    fn wildcard_projection(&mut self, lhs: Ast) -> Result<Ast, FilterError> {
        let rhs = self.projection_rhs(Token::Star.lbp())?;
        Ok(Ast::Projection {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn filter(&mut self, lhs: Ast) -> Result<Ast, FilterError> {
        let predicate = self.expression(0)?;
        self.expect(Token::RBracket)?;
        let rhs = self.projection_rhs(Token::Filter.lbp())?;
        Ok(Ast::FilterProjection {
            lhs: Box::new(lhs),
            predicate: Box::new(predicate),
            rhs: Box::new(rhs),
        })
    }

    /// Parses `n]` or `start:stop:step]` after an opening bracket.
    fn index_or_slice(&mut self, lhs: Ast) -> Result<Ast, FilterError> {
        let mut parts: [Option<i64>; 3] = [None, None, None];
        let mut slot = 0;
        loop {
            match self.advance() {
                Token::Number(n) => parts[slot] = Some(n),
                Token::Colon if slot < 2 => slot += 1,
                Token::RBracket => break,
                other => return Err(self.error(&format!("unexpected token {:?} in index", other))),
            }
        }

        if slot == 0 {
            let index = parts[0].ok_or_else(|| self.error("empty index"))?;
            return Ok(chain(lhs, Ast::Index(index)));
        }

        if parts[2] == Some(0) {
            return Err(self.error("slice step cannot be 0"));
        }
        let slice = Ast::Slice {
            start: parts[0],
            stop: parts[1],
            step: parts[2],
        };
        let rhs = self.projection_rhs(Token::Star.lbp())?;
        Ok(Ast::Projection {
            lhs: Box::new(chain(lhs, slice)),
            rhs: Box::new(rhs),
        })
    }

    fn multi_list(&mut self) -> Result<Ast, FilterError> {
        let mut items = Vec::new();
        loop {
            items.push(self.expression(0)?);
            match self.advance() {
                Token::Comma => continue,
                Token::RBracket => break,
                other => return Err(self.error(&format!("unexpected token {:?} in list", other))),
            }
        }
        Ok(Ast::MultiList(items))
    }

    fn multi_hash(&mut self) -> Result<Ast, FilterError> {
        let mut pairs = Vec::new();
        loop {
            let key = match self.advance() {
                Token::Identifier(key) | Token::QuotedIdentifier(key) => key,
                other => return Err(self.error(&format!("expected key, found {:?}", other))),
            };
            self.expect(Token::Colon)?;
            let value = self.expression(0)?;
            pairs.push((key, value));
            match self.advance() {
                Token::Comma => continue,
                Token::RBrace => break,
                other => return Err(self.error(&format!("unexpected token {:?} in hash", other))),
            }
        }
        Ok(Ast::MultiHash(pairs))
    }
}

fn chain(lhs: Ast, rhs: Ast) -> Ast {
    match lhs {
        Ast::Identity => rhs,
        lhs => Ast::Subexpr(Box::new(lhs), Box::new(rhs)),
    }
}
