//! Recursive-descent parser producing a [`Node`] tree.

use crate::ast::{BinaryOp, Node, UnaryOp};
use crate::error::ParseError;
use crate::lexer::{Token, TokenKind, tokenize};

/// Maximum nesting of parentheses and unary operators.
pub const MAX_DEPTH: usize = 64;

/// Parse `source` into an expression tree.
pub fn parse(source: &str) -> Result<Node, ParseError> {
    let tokens = tokenize(source)?;
    if matches!(tokens.first(), Some(Token { kind: TokenKind::Eof, .. })) {
        return Err(ParseError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let node = parser.parse_or()?;
    parser.expect_eof()?;
    Ok(node)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The token stream always ends with Eof and we never advance past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        let token = self.peek();
        ParseError::UnexpectedToken {
            found: token.kind.to_string(),
            expected,
            offset: token.offset,
        }
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if self.peek().kind == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.unexpected("an operator or end of expression"))
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::TooDeep {
                limit: MAX_DEPTH,
                offset: self.peek().offset,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.peek().kind == TokenKind::Or {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Node::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.peek().kind == TokenKind::And {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Node::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Node, ParseError> {
        if self.peek().kind != TokenKind::Not {
            return self.parse_comparison();
        }
        self.advance();
        self.enter()?;
        let operand = self.parse_not()?;
        self.leave();
        Ok(Node::Unary(UnaryOp::Not, Box::new(operand)))
    }

    fn parse_comparison(&mut self) -> Result<Node, ParseError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek().kind {
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Node::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_term(&mut self) -> Result<Node, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        if self.peek().kind != TokenKind::Minus {
            return self.parse_primary();
        }
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Node::Unary(UnaryOp::Neg, Box::new(operand)))
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Number(value) => {
                self.advance();
                Ok(Node::Number(value))
            }
            TokenKind::True => {
                self.advance();
                Ok(Node::Number(1.0))
            }
            TokenKind::False => {
                self.advance();
                Ok(Node::Number(0.0))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Node::Ident(name))
            }
            TokenKind::LParen => {
                self.advance();
                self.enter()?;
                let inner = self.parse_or()?;
                self.leave();
                if self.peek().kind != TokenKind::RParen {
                    return Err(self.unexpected("')'"));
                }
                self.advance();
                Ok(inner)
            }
            _ => Err(self.unexpected("a number, identifier or '('")),
        }
    }
}
