//! # Lexer Module
//!
//! Lexical analysis for Homescript. The lexer transforms raw UTF-8 source
//! text into a positioned token stream for the parser.
//!
//! The scanner is a single linear pass with one character of lookahead
//! (two for the `1..2` versus `1.5` ambiguity). Keywords are recognised
//! after matching a maximal identifier, operators by maximal munch.
//! Comments (`//…` and `/*…*/`, nesting allowed) and whitespace are
//! stripped; newlines are not significant beyond position tracking.
//!
//! Numeric literals support `_` separators, `0x` hexadecimal notation and
//! a trailing `f` that forces a float. String literals accept both quote
//! styles with the escape set `\n \t \r \' \" \\ \xHH \uHHHH \UHHHHHHHH`
//! plus three-digit octal escapes.
//!
//! Every token carries a [`Span`]; lexer failures surface as a [`LexError`]
//! with the exact span of the offending input, which the parser converts
//! into a `SyntaxError` diagnostic.

mod token;

pub use token::*;

use std::{error::Error, fmt::Display};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

impl Error for LexError {}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer<'a> {
    input: &'a str,
    filename: String,
    location: Location,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(filename: impl Into<String>, input: &'a str) -> Self {
        Self {
            input,
            filename: filename.into(),
            location: Location::default(),
            tokens: vec![],
        }
    }

    /// Tokenize the whole input. The returned stream is terminated by a
    /// single [`TokenKind::Eof`] token.
    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        loop {
            self.eat_trivia()?;
            let Some(c) = self.peek() else {
                break;
            };

            let start = self.location;
            match c {
                c if c.is_ascii_digit() => self.lex_number(start)?,
                c if is_ident_start(c) => self.lex_ident(start),
                '$' => self.lex_sigil_ident(start, '$')?,
                '@' => self.lex_sigil_ident(start, '@')?,
                '"' | '\'' => self.lex_string(start, c)?,
                _ => self.lex_operator(start)?,
            }
        }

        let end = self.location;
        self.tokens
            .push(Token::new(TokenKind::Eof, "", self.span(end)));
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.location.byte..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.location.byte..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.location.advance(c);
        Some(c)
    }

    fn span(&self, start: Location) -> Span {
        Span::new(self.filename.clone(), start, self.location)
    }

    fn lexeme(&self, start: Location) -> &'a str {
        &self.input[start.byte..self.location.byte]
    }

    fn error(&self, message: impl Into<String>, start: Location) -> LexError {
        LexError {
            message: message.into(),
            span: self.span(start),
        }
    }

    fn push(&mut self, kind: TokenKind, start: Location) {
        let lexeme = self.lexeme(start).to_string();
        self.tokens.push(Token::new(kind, lexeme, self.span(start)));
    }

    /// Skip whitespace and comments. Block comments may nest.
    fn eat_trivia(&mut self) -> LexResult<()> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.location;
                    self.bump();
                    self.bump();
                    let mut depth = 1usize;
                    loop {
                        match (self.peek(), self.peek_second()) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            (Some('/'), Some('*')) => {
                                self.bump();
                                self.bump();
                                depth += 1;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => {
                                return Err(self.error("unterminated block comment", start));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_ident(&mut self, start: Location) {
        while let Some(c) = self.peek() {
            if !is_ident_continue(c) {
                break;
            }
            self.bump();
        }

        let lexeme = self.lexeme(start);
        let kind = KEYWORDS
            .get(lexeme)
            .cloned()
            .unwrap_or_else(|| TokenKind::Ident(lexeme.to_string()));
        self.push(kind, start);
    }

    /// `$Singleton` and `@Annotation` identifiers.
    fn lex_sigil_ident(&mut self, start: Location, sigil: char) -> LexResult<()> {
        self.bump();
        let ident_start = self.location;
        if !self.peek().map(is_ident_start).unwrap_or(false) {
            return Err(self.error(
                format!("expected an identifier after '{sigil}'"),
                start,
            ));
        }
        while let Some(c) = self.peek() {
            if !is_ident_continue(c) {
                break;
            }
            self.bump();
        }

        let name = self.input[ident_start.byte..self.location.byte].to_string();
        let kind = if sigil == '$' {
            TokenKind::Singleton(name)
        } else {
            TokenKind::Annotation(name)
        };
        self.push(kind, start);
        Ok(())
    }

    fn lex_number(&mut self, start: Location) -> LexResult<()> {
        let hex = self.peek() == Some('0') && matches!(self.peek_second(), Some('x') | Some('X'));
        if hex {
            self.bump();
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() || c == '_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let digits = self.lexeme(start)[2..].replace('_', "");
            if digits.is_empty() {
                return Err(self.error("missing digits after hex prefix", start));
            }
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|err| self.error(format!("invalid hex literal: {err}"), start))?;
            self.push(TokenKind::Int(value), start);
            return Ok(());
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.bump();
            } else if c == '.'
                && !is_float
                && self.peek_second().map(|c| c.is_ascii_digit()).unwrap_or(false)
            {
                // a second dot starts a range operator instead
                is_float = true;
                self.bump();
            } else {
                break;
            }
        }

        // trailing `f` forces a float literal
        if self.peek() == Some('f') {
            self.bump();
            is_float = true;
        }

        let digits = self.lexeme(start).trim_end_matches('f').replace('_', "");
        if is_float {
            let value: f64 = digits
                .parse()
                .map_err(|err| self.error(format!("invalid float literal: {err}"), start))?;
            self.push(TokenKind::Float(value), start);
        } else {
            let value: i64 = digits
                .parse()
                .map_err(|err| self.error(format!("invalid integer literal: {err}"), start))?;
            self.push(TokenKind::Int(value), start);
        }
        Ok(())
    }

    fn lex_string(&mut self, start: Location, quote: char) -> LexResult<()> {
        self.bump();
        let mut value = String::new();

        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string literal", start));
            };

            match c {
                c if c == quote => break,
                '\\' => value.push(self.lex_escape(start)?),
                c => value.push(c),
            }
        }

        self.push(TokenKind::Str(value), start);
        Ok(())
    }

    fn lex_escape(&mut self, literal_start: Location) -> LexResult<char> {
        let escape_start = self.location;
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated string literal", literal_start));
        };

        let c = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            'x' => self.hex_escape(2, escape_start)?,
            'u' => self.hex_escape(4, escape_start)?,
            'U' => self.hex_escape(8, escape_start)?,
            c if c.is_digit(8) => {
                let mut digits = String::from(c);
                for _ in 0..2 {
                    match self.peek() {
                        Some(c) if c.is_digit(8) => {
                            digits.push(c);
                            self.bump();
                        }
                        _ => {
                            return Err(
                                self.error("octal escape requires three digits", escape_start)
                            )
                        }
                    }
                }
                let code = u32::from_str_radix(&digits, 8).expect("digits are octal");
                char::from_u32(code)
                    .ok_or_else(|| self.error("invalid octal escape", escape_start))?
            }
            c => {
                return Err(self.error(format!("unknown escape sequence '\\{c}'"), escape_start))
            }
        };

        Ok(c)
    }

    fn hex_escape(&mut self, len: usize, escape_start: Location) -> LexResult<char> {
        let mut digits = String::new();
        for _ in 0..len {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => {
                    digits.push(c);
                    self.bump();
                }
                _ => {
                    return Err(self.error(
                        format!("hex escape requires {len} hexadecimal digits"),
                        escape_start,
                    ))
                }
            }
        }
        let code = u32::from_str_radix(&digits, 16).expect("digits are hexadecimal");
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape", escape_start))
    }

    fn lex_operator(&mut self, start: Location) -> LexResult<()> {
        use TokenKind::*;

        let c = self.bump().expect("caller checked for a character");
        let second = self.peek();

        let mut two = |this: &mut Self, kind: TokenKind| {
            this.bump();
            kind
        };

        let kind = match (c, second) {
            ('(', _) => LParen,
            (')', _) => RParen,
            ('{', _) => LBrace,
            ('}', _) => RBrace,
            ('[', _) => LBracket,
            (']', _) => RBracket,
            (',', _) => Comma,
            (';', _) => Semicolon,
            (':', _) => Colon,
            ('?', _) => QuestionMark,
            ('.', Some('.')) => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    DotDotEq
                } else {
                    DotDot
                }
            }
            ('.', _) => Dot,
            ('-', Some('>')) => two(self, Arrow),
            ('-', Some('=')) => two(self, MinusAssign),
            ('-', _) => Minus,
            ('+', Some('=')) => two(self, PlusAssign),
            ('+', _) => Plus,
            ('*', Some('*')) => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    PowerAssign
                } else {
                    Power
                }
            }
            ('*', Some('=')) => two(self, StarAssign),
            ('*', _) => Star,
            ('/', Some('=')) => two(self, SlashAssign),
            ('/', _) => Slash,
            ('%', Some('=')) => two(self, PercentAssign),
            ('%', _) => Percent,
            ('=', Some('=')) => two(self, Eq),
            ('=', Some('>')) => two(self, FatArrow),
            ('=', _) => Assign,
            ('!', Some('=')) => two(self, NotEq),
            ('!', _) => Not,
            ('<', Some('<')) => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    ShlAssign
                } else {
                    Shl
                }
            }
            ('<', Some('=')) => two(self, LtEq),
            ('<', _) => Lt,
            ('>', Some('>')) => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    ShrAssign
                } else {
                    Shr
                }
            }
            ('>', Some('=')) => two(self, GtEq),
            ('>', _) => Gt,
            ('&', Some('&')) => two(self, And),
            ('&', Some('=')) => two(self, BitAndAssign),
            ('&', _) => BitAnd,
            ('|', Some('|')) => two(self, Or),
            ('|', Some('=')) => two(self, BitOrAssign),
            ('|', _) => BitOr,
            ('^', Some('=')) => two(self, BitXorAssign),
            ('^', _) => BitXor,
            (c, _) => return Err(self.error(format!("unexpected character '{c}'"), start)),
        };

        self.push(kind, start);
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let mut tokens = Lexer::new("test.hms", input).lex().expect("lexing failed");
        assert_eq!(tokens.pop().map(|t| t.kind), Some(TokenKind::Eof));
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lex_let_statement() {
        assert_eq!(
            kinds("let foo = 42;"),
            vec![
                TokenKind::Let,
                TokenKind::Ident("foo".into()),
                TokenKind::Assign,
                TokenKind::Int(42),
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_lex_number_forms() {
        assert_eq!(
            kinds("1_000 0xff 3.5 2f"),
            vec![
                TokenKind::Int(1000),
                TokenKind::Int(255),
                TokenKind::Float(3.5),
                TokenKind::Float(2.0),
            ]
        );
    }

    #[test]
    fn test_lex_range_is_not_a_float() {
        assert_eq!(
            kinds("0..3"),
            vec![TokenKind::Int(0), TokenKind::DotDot, TokenKind::Int(3)]
        );
        assert_eq!(
            kinds("0..=3"),
            vec![TokenKind::Int(0), TokenKind::DotDotEq, TokenKind::Int(3)]
        );
    }

    #[test]
    fn test_lex_string_escapes() {
        assert_eq!(
            kinds(r#""a\n\x41B\101" 'b'"#),
            vec![
                TokenKind::Str("a\nABA".into()),
                TokenKind::Str("b".into()),
            ]
        );
    }

    #[test]
    fn test_lex_unknown_escape() {
        let err = Lexer::new("test.hms", r#""\q""#).lex().unwrap_err();
        assert!(err.message.contains("unknown escape"));
        assert_eq!(err.span.start.column, 2);
    }

    #[test]
    fn test_lex_unterminated_string() {
        let err = Lexer::new("test.hms", "\"abc").lex().unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_lex_singletons_and_annotations() {
        assert_eq!(
            kinds("impl Power for $Lamp { fn x(@Lamp l) {} }"),
            vec![
                TokenKind::Impl,
                TokenKind::Ident("Power".into()),
                TokenKind::For,
                TokenKind::Singleton("Lamp".into()),
                TokenKind::LBrace,
                TokenKind::Fn,
                TokenKind::Ident("x".into()),
                TokenKind::LParen,
                TokenKind::Annotation("Lamp".into()),
                TokenKind::Ident("l".into()),
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn test_lex_operators_maximal_munch() {
        assert_eq!(
            kinds("a **= b << 1 <= 2 && c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::PowerAssign,
                TokenKind::Ident("b".into()),
                TokenKind::Shl,
                TokenKind::Int(1),
                TokenKind::LtEq,
                TokenKind::Int(2),
                TokenKind::And,
                TokenKind::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn test_lex_comments_are_stripped() {
        assert_eq!(
            kinds("1 // line\n/* block /* nested */ */ 2"),
            vec![TokenKind::Int(1), TokenKind::Int(2)]
        );
    }

    #[test]
    fn test_relex_round_trip() {
        // re-lexing the lexemes joined by canonical whitespace yields the
        // same stream modulo spans
        let source = "fn main() { let xs = [1, 2f]; xs.push(0x10); $Lamp.on = true; }";
        let tokens = Lexer::new("test.hms", source).lex().unwrap();
        let joined = tokens
            .iter()
            .map(|t| t.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let relexed = Lexer::new("test.hms", &joined).lex().unwrap();
        assert_eq!(
            tokens.iter().map(|t| &t.kind).collect::<Vec<_>>(),
            relexed.iter().map(|t| &t.kind).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("test.hms", "let x\n= 1;").lex().unwrap();
        let assign = &tokens[2];
        assert_eq!(assign.kind, TokenKind::Assign);
        assert_eq!(assign.span.start.line, 2);
        assert_eq!(assign.span.start.column, 1);
        assert_eq!(assign.span.start.byte, 6);
    }
}
