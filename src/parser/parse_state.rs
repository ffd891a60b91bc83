use crate::lexer::{Span, Token, TokenKind};

use super::ParseError;

/// Cursor over the token stream produced by the lexer. The stream is
/// always terminated by an `Eof` token, so peeking never runs off the end.
#[derive(Debug, Clone)]
pub struct ParseState {
    tokens: Vec<Token>,
    index: usize,
}

impl ParseState {
    pub fn new(tokens: Vec<Token>) -> Self {
        debug_assert!(matches!(
            tokens.last().map(|t| &t.kind),
            Some(TokenKind::Eof)
        ));
        Self { tokens, index: 0 }
    }

    pub fn peek(&self) -> &Token {
        self.tokens
            .get(self.index)
            .unwrap_or_else(|| self.tokens.last().expect("stream has an Eof token"))
    }

    pub fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    pub fn peek_second(&self) -> &Token {
        self.tokens
            .get(self.index + 1)
            .unwrap_or_else(|| self.tokens.last().expect("stream has an Eof token"))
    }

    pub fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    pub fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    pub fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    /// Consume the next token if it matches.
    pub fn eat(&mut self, kind: &TokenKind) -> Option<Token> {
        if self.at(kind) {
            Some(self.next())
        } else {
            None
        }
    }

    pub fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.next())
        } else {
            let found = self.peek();
            Err(ParseError {
                message: format!(
                    "expected {}, found {}",
                    kind.describe(),
                    found.kind.describe()
                ),
                span: found.span.clone(),
            })
        }
    }

    pub fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let token = self.next();
                Ok((name, token.span))
            }
            other => Err(ParseError {
                message: format!("expected an identifier, found {}", other.describe()),
                span: self.peek().span.clone(),
            }),
        }
    }

    pub fn expect_singleton(&mut self) -> Result<(String, Span), ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Singleton(name) => {
                let token = self.next();
                Ok((name, token.span))
            }
            other => Err(ParseError {
                message: format!(
                    "expected a singleton identifier, found {}",
                    other.describe()
                ),
                span: self.peek().span.clone(),
            }),
        }
    }

    pub fn span(&self) -> Span {
        self.peek().span.clone()
    }

    pub fn previous_span(&self) -> Span {
        if self.index > 0 {
            self.tokens[self.index - 1].span.clone()
        } else {
            self.span()
        }
    }
}
