//! # Parser Module
//!
//! Recursive-descent parsing for Homescript, transforming the lexer's
//! token stream into the untyped AST (`Program<()>`).
//!
//! Statements are dispatched on their leading token; expressions are
//! parsed with a Pratt-style binding power table implementing the ladder
//!
//! ```text
//! ** > unary prefix > * / % > + - > << >> > & > ^ > | >
//! < <= > >= > == != > && > || > .. > assignment
//! ```
//!
//! with postfix forms (call, index, member access, `as` casts) binding
//! tighter than everything else. `..` is non-associative; assignment is
//! right-associative.
//!
//! Parsing is total: on unexpected input the parser records a
//! `SyntaxError` diagnostic, skips ahead to the next `;` or block
//! boundary, and continues. Callers always receive an `(ast, errors)`
//! pair, never a panic.

pub mod ast;
mod parse_state;

pub use parse_state::ParseState;

use std::{error::Error, fmt::Display};

use log::debug;

use crate::{
    diagnostic::{Diagnostic, ErrorCode},
    lexer::{Lexer, Span, TokenKind},
};

use self::ast::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

impl Error for ParseError {}

impl From<ParseError> for Diagnostic {
    fn from(err: ParseError) -> Self {
        Diagnostic::error(ErrorCode::SyntaxError, err.message, err.span)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse one module. Returns the best-effort AST together with all
/// diagnostics encountered; an empty item list with one diagnostic is the
/// worst case (e.g. a lexer failure).
pub fn parse_module(name: &str, filename: &str, source: &str) -> (Program<()>, Vec<Diagnostic>) {
    debug!("parsing module '{name}'");

    let tokens = match Lexer::new(filename, source).lex() {
        Ok(tokens) => tokens,
        Err(err) => {
            let program = Program {
                name: name.to_string(),
                items: vec![],
                span: err.span.clone(),
            };
            return (
                program,
                vec![Diagnostic::error(
                    ErrorCode::SyntaxError,
                    err.message,
                    err.span,
                )],
            );
        }
    };

    let mut parser = Parser {
        state: ParseState::new(tokens),
        diagnostics: vec![],
    };
    let program = parser.parse_program(name);
    (program, parser.diagnostics)
}

/// Binding powers for infix operators; `(left, right)` pairs in the
/// matklad style: left-associative operators use `(n, n + 1)`,
/// right-associative ones `(n + 1, n)`.
fn infix_binding_power(kind: &TokenKind) -> Option<(u8, u8)> {
    use TokenKind::*;
    let bp = match kind {
        Assign | PlusAssign | MinusAssign | StarAssign | SlashAssign | PercentAssign
        | PowerAssign | ShlAssign | ShrAssign | BitAndAssign | BitOrAssign | BitXorAssign => {
            (2, 1)
        }
        DotDot | DotDotEq => (3, 4),
        Or => (5, 6),
        And => (7, 8),
        Eq | NotEq => (9, 10),
        Lt | LtEq | Gt | GtEq => (11, 12),
        BitOr => (13, 14),
        BitXor => (15, 16),
        BitAnd => (17, 18),
        Shl | Shr => (19, 20),
        Plus | Minus => (21, 22),
        Star | Slash | Percent => (23, 24),
        Power => (28, 27),
        _ => return Option::None,
    };
    Some(bp)
}

/// Operand binding power of the prefix operators `- ! ?`.
const PREFIX_BP: u8 = 26;
/// Binding power of call, index, member and cast postfix forms.
const POSTFIX_BP: u8 = 31;
/// Minimum binding power that keeps postfix forms but rejects infix
/// operators; used for the `spawn` callee.
const CALLEE_BP: u8 = 29;

struct Parser {
    state: ParseState,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    fn parse_program(&mut self, name: &str) -> Program<()> {
        let start = self.state.span();
        let mut items = vec![];

        while !self.state.at_eof() {
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(err) => {
                    self.diagnostics.push(err.into());
                    self.sync();
                }
            }
        }

        let span = start.merge(&self.state.previous_span());
        Program {
            name: name.to_string(),
            items,
            span,
        }
    }

    /// Skip ahead to the next plausible statement or item boundary: past
    /// the next `;`, or up to a closing brace, balancing nested braces.
    fn sync(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.state.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Semicolon if depth == 0 => {
                    self.state.next();
                    return;
                }
                TokenKind::LBrace => {
                    depth += 1;
                    self.state.next();
                }
                TokenKind::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.state.next();
                }
                _ => {
                    self.state.next();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // items
    // ------------------------------------------------------------------

    fn parse_item(&mut self) -> ParseResult<Item<()>> {
        match self.state.peek_kind() {
            TokenKind::Import => self.parse_import().map(Item::Import),
            TokenKind::Type => self.parse_type_alias().map(Item::TypeAlias),
            TokenKind::Let => {
                if matches!(self.state.peek_second().kind, TokenKind::Singleton(_)) {
                    self.parse_singleton_decl().map(Item::Singleton)
                } else {
                    let stmt = self.parse_let_statement()?;
                    Ok(Item::Global(stmt))
                }
            }
            TokenKind::Fn => self.parse_function(false, false).map(Item::Function),
            TokenKind::Pub => {
                self.state.next();
                let is_event = self.state.eat(&TokenKind::Event).is_some();
                self.parse_function(true, is_event).map(Item::Function)
            }
            TokenKind::Event => {
                self.state.next();
                self.parse_function(false, true).map(Item::Function)
            }
            TokenKind::Impl => self.parse_impl_block().map(Item::Impl),
            other => Err(ParseError {
                message: format!("expected an item, found {}", other.describe()),
                span: self.state.span(),
            }),
        }
    }

    /// `import { a, type B } from module;`
    fn parse_import(&mut self) -> ParseResult<ImportItem> {
        let start = self.state.expect(&TokenKind::Import)?.span;
        self.state.expect(&TokenKind::LBrace)?;

        let mut symbols = vec![];
        while !self.state.at(&TokenKind::RBrace) {
            let type_import = self.state.eat(&TokenKind::Type).is_some();
            let (name, span) = self.state.expect_ident()?;
            symbols.push(ImportSymbol {
                type_import,
                name,
                span,
            });
            if self.state.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }

        self.state.expect(&TokenKind::RBrace)?;
        self.state.expect(&TokenKind::From)?;
        let (module, module_span) = self.state.expect_ident()?;
        let end = self.state.expect(&TokenKind::Semicolon)?.span;

        Ok(ImportItem {
            module,
            module_span,
            symbols,
            span: start.merge(&end),
        })
    }

    /// `let $Name: Type;`
    fn parse_singleton_decl(&mut self) -> ParseResult<SingletonDecl> {
        let start = self.state.expect(&TokenKind::Let)?.span;
        let (name, _) = self.state.expect_singleton()?;
        self.state.expect(&TokenKind::Colon)?;
        let type_name = self.parse_type_name()?;
        let end = self.state.expect(&TokenKind::Semicolon)?.span;

        Ok(SingletonDecl {
            name,
            type_name,
            span: start.merge(&end),
        })
    }

    /// `type Name = T;`
    fn parse_type_alias(&mut self) -> ParseResult<TypeAlias> {
        let start = self.state.expect(&TokenKind::Type)?.span;
        let (name, _) = self.state.expect_ident()?;
        self.state.expect(&TokenKind::Assign)?;
        let type_name = self.parse_type_name()?;
        let end = self.state.expect(&TokenKind::Semicolon)?.span;

        Ok(TypeAlias {
            name,
            type_name,
            span: start.merge(&end),
        })
    }

    fn parse_function(&mut self, is_pub: bool, is_event: bool) -> ParseResult<FunctionDefinition<()>> {
        let start = self.state.expect(&TokenKind::Fn)?.span;
        let (name, _) = self.state.expect_ident()?;
        let params = self.parse_params()?;

        let return_type = if self.state.eat(&TokenKind::Arrow).is_some() {
            Some(self.parse_type_name()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        let span = start.merge(&body.span);

        Ok(FunctionDefinition {
            name,
            params,
            return_type,
            body,
            is_pub,
            is_event,
            info: (),
            span,
        })
    }

    fn parse_params(&mut self) -> ParseResult<Vec<Parameter>> {
        self.state.expect(&TokenKind::LParen)?;
        let mut params = vec![];

        while !self.state.at(&TokenKind::RParen) {
            let param = match self.state.peek_kind().clone() {
                TokenKind::Annotation(singleton) => {
                    let ann_span = self.state.next().span;
                    let (name, span) = self.state.expect_ident()?;
                    Parameter {
                        name,
                        type_name: None,
                        singleton_extractor: Some(singleton),
                        span: ann_span.merge(&span),
                    }
                }
                _ => {
                    let (name, span) = self.state.expect_ident()?;
                    self.state.expect(&TokenKind::Colon)?;
                    let type_name = self.parse_type_name()?;
                    let span = span.merge(&type_name.span());
                    Parameter {
                        name,
                        type_name: Some(type_name),
                        singleton_extractor: None,
                        span,
                    }
                }
            };
            params.push(param);
            if self.state.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }

        self.state.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    /// `impl Template with { cap, ... } for $Singleton { fns }`
    fn parse_impl_block(&mut self) -> ParseResult<ImplBlock<()>> {
        let start = self.state.expect(&TokenKind::Impl)?.span;
        let (template, template_span) = self.state.expect_ident()?;

        let mut capabilities = vec![];
        if self.state.eat(&TokenKind::With).is_some() {
            self.state.expect(&TokenKind::LBrace)?;
            while !self.state.at(&TokenKind::RBrace) {
                let (cap, _) = self.state.expect_ident()?;
                capabilities.push(cap);
                if self.state.eat(&TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.state.expect(&TokenKind::RBrace)?;
        }

        self.state.expect(&TokenKind::For)?;
        let (singleton, singleton_span) = self.state.expect_singleton()?;

        self.state.expect(&TokenKind::LBrace)?;
        let mut functions = vec![];
        while !self.state.at(&TokenKind::RBrace) {
            functions.push(self.parse_function(false, false)?);
        }
        let end = self.state.expect(&TokenKind::RBrace)?.span;

        Ok(ImplBlock {
            template,
            template_span,
            capabilities,
            singleton,
            singleton_span,
            functions,
            span: start.merge(&end),
        })
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> ParseResult<Block<()>> {
        let start = self.state.expect(&TokenKind::LBrace)?.span;
        let mut statements = vec![];
        let mut trailing = None;

        while !self.state.at(&TokenKind::RBrace) && !self.state.at_eof() {
            match self.parse_block_entry(&mut statements, &mut trailing) {
                Ok(done) => {
                    if done {
                        break;
                    }
                }
                Err(err) => {
                    self.diagnostics.push(err.into());
                    self.sync();
                }
            }
        }

        let end = self.state.expect(&TokenKind::RBrace)?.span;
        Ok(Block {
            statements,
            trailing,
            info: (),
            span: start.merge(&end),
        })
    }

    /// Parse one statement (or the trailing expression) of a block.
    /// Returns `true` once the trailing expression has been captured.
    fn parse_block_entry(
        &mut self,
        statements: &mut Vec<Statement<()>>,
        trailing: &mut Option<Expression<()>>,
    ) -> ParseResult<bool> {
        // tolerate stray semicolons between statements
        if self.state.eat(&TokenKind::Semicolon).is_some() {
            return Ok(false);
        }

        match self.state.peek_kind() {
            TokenKind::Let => {
                let stmt = self.parse_let_statement()?;
                statements.push(Statement::Let(stmt));
            }
            TokenKind::Return => {
                let start = self.state.next().span;
                let value = if self.state.at(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression(0)?)
                };
                let end = self.state.expect(&TokenKind::Semicolon)?.span;
                statements.push(Statement::Return(ReturnStatement {
                    value,
                    span: start.merge(&end),
                }));
            }
            TokenKind::Break => {
                let start = self.state.next().span;
                let end = self.state.expect(&TokenKind::Semicolon)?.span;
                statements.push(Statement::Break(BreakStatement {
                    span: start.merge(&end),
                }));
            }
            TokenKind::Continue => {
                let start = self.state.next().span;
                let end = self.state.expect(&TokenKind::Semicolon)?.span;
                statements.push(Statement::Continue(ContinueStatement {
                    span: start.merge(&end),
                }));
            }
            TokenKind::Loop => {
                let start = self.state.next().span;
                let body = self.parse_block()?;
                let span = start.merge(&body.span);
                statements.push(Statement::Loop(LoopStatement { body, span }));
            }
            TokenKind::While => {
                let start = self.state.next().span;
                let condition = self.parse_expression(0)?;
                let body = self.parse_block()?;
                let span = start.merge(&body.span);
                statements.push(Statement::While(WhileStatement {
                    condition,
                    body,
                    span,
                }));
            }
            TokenKind::For => {
                let start = self.state.next().span;
                let (ident, _) = self.state.expect_ident()?;
                self.state.expect(&TokenKind::In)?;
                let iterable = self.parse_expression(0)?;
                let body = self.parse_block()?;
                let span = start.merge(&body.span);
                statements.push(Statement::For(ForStatement {
                    ident,
                    iterable,
                    body,
                    span,
                }));
            }
            TokenKind::Trigger => {
                let stmt = self.parse_trigger()?;
                statements.push(Statement::Trigger(stmt));
            }
            _ => {
                let expression = self.parse_expression(0)?;
                if let Some(end) = self.state.eat(&TokenKind::Semicolon) {
                    let span = expression.span().merge(&end.span);
                    statements.push(Statement::Expression(ExpressionStatement {
                        expression,
                        span,
                    }));
                } else if self.state.at(&TokenKind::RBrace) {
                    *trailing = Some(expression);
                    return Ok(true);
                } else if expression.is_block_like() {
                    let span = expression.span();
                    statements.push(Statement::Expression(ExpressionStatement {
                        expression,
                        span,
                    }));
                } else {
                    return Err(ParseError {
                        message: format!(
                            "expected ';' after expression, found {}",
                            self.state.peek_kind().describe()
                        ),
                        span: self.state.span(),
                    });
                }
            }
        }
        Ok(false)
    }

    fn parse_let_statement(&mut self) -> ParseResult<LetStatement<()>> {
        let start = self.state.expect(&TokenKind::Let)?.span;
        let (ident, _) = self.state.expect_ident()?;

        let type_name = if self.state.eat(&TokenKind::Colon).is_some() {
            Some(self.parse_type_name()?)
        } else {
            None
        };

        self.state.expect(&TokenKind::Assign)?;
        let value = self.parse_expression(0)?;
        let end = self.state.expect(&TokenKind::Semicolon)?.span;

        Ok(LetStatement {
            ident,
            type_name,
            value,
            info: (),
            span: start.merge(&end),
        })
    }

    /// `trigger callback(args) on event_expr;` (or `at`)
    fn parse_trigger(&mut self) -> ParseResult<TriggerStatement<()>> {
        let start = self.state.expect(&TokenKind::Trigger)?.span;
        let (callee, callee_span) = self.state.expect_ident()?;

        self.state.expect(&TokenKind::LParen)?;
        let mut args = vec![];
        while !self.state.at(&TokenKind::RParen) {
            args.push(self.parse_expression(0)?);
            if self.state.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        self.state.expect(&TokenKind::RParen)?;

        let mode = match self.state.peek_kind() {
            TokenKind::On => {
                self.state.next();
                TriggerMode::On
            }
            TokenKind::At => {
                self.state.next();
                TriggerMode::At
            }
            other => {
                return Err(ParseError {
                    message: format!("expected 'on' or 'at', found {}", other.describe()),
                    span: self.state.span(),
                })
            }
        };

        let event = self.parse_expression(0)?;
        let end = self.state.expect(&TokenKind::Semicolon)?.span;

        Ok(TriggerStatement {
            callee,
            callee_span,
            args,
            mode,
            event,
            span: start.merge(&end),
        })
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self, min_bp: u8) -> ParseResult<Expression<()>> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let kind = self.state.peek_kind().clone();

            // postfix forms bind tighter than all infix operators
            match kind {
                TokenKind::LParen if POSTFIX_BP >= min_bp => {
                    lhs = self.parse_call(lhs, false)?;
                    continue;
                }
                TokenKind::LBracket if POSTFIX_BP >= min_bp => {
                    self.state.next();
                    let index = self.parse_expression(0)?;
                    let end = self.state.expect(&TokenKind::RBracket)?.span;
                    let span = lhs.span().merge(&end);
                    lhs = Expression::Index(Box::new(IndexExpression {
                        base: lhs,
                        index,
                        info: (),
                        span,
                    }));
                    continue;
                }
                TokenKind::Dot if POSTFIX_BP >= min_bp => {
                    self.state.next();
                    let (member, member_span) = self.state.expect_ident()?;
                    let span = lhs.span().merge(&member_span);
                    lhs = Expression::Member(Box::new(MemberExpression {
                        base: lhs,
                        member,
                        member_span,
                        info: (),
                        span,
                    }));
                    continue;
                }
                TokenKind::As if POSTFIX_BP >= min_bp => {
                    self.state.next();
                    let type_name = self.parse_type_name()?;
                    let span = lhs.span().merge(&type_name.span());
                    lhs = Expression::Cast(Box::new(CastExpression {
                        base: lhs,
                        type_name,
                        info: (),
                        span,
                    }));
                    continue;
                }
                _ => {}
            }

            let Some((l_bp, r_bp)) = infix_binding_power(&kind) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }

            let op_token = self.state.next();
            let rhs = self.parse_expression(r_bp)?;
            let span = lhs.span().merge(&rhs.span());

            lhs = match kind {
                TokenKind::DotDot | TokenKind::DotDotEq => {
                    if matches!(lhs, Expression::Range(_)) {
                        return Err(ParseError {
                            message: "range expressions are not associative".to_string(),
                            span: op_token.span,
                        });
                    }
                    Expression::Range(Box::new(RangeExpression {
                        start: lhs,
                        end: rhs,
                        inclusive: kind == TokenKind::DotDotEq,
                        info: (),
                        span,
                    }))
                }
                TokenKind::Assign
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
                | TokenKind::PercentAssign
                | TokenKind::PowerAssign
                | TokenKind::ShlAssign
                | TokenKind::ShrAssign
                | TokenKind::BitAndAssign
                | TokenKind::BitOrAssign
                | TokenKind::BitXorAssign => Expression::Assign(Box::new(AssignExpression {
                    place: lhs,
                    operator: assign_operator(&kind),
                    value: rhs,
                    info: (),
                    span,
                })),
                _ => Expression::Infix(Box::new(InfixExpression {
                    operator: infix_operator(&kind),
                    left: lhs,
                    right: rhs,
                    info: (),
                    span,
                })),
            };
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> ParseResult<Expression<()>> {
        let token = self.state.peek().clone();
        let span = token.span.clone();

        let expression = match token.kind {
            TokenKind::Int(value) => {
                self.state.next();
                Expression::Int(IntLiteral {
                    value,
                    info: (),
                    span,
                })
            }
            TokenKind::Float(value) => {
                self.state.next();
                Expression::Float(FloatLiteral {
                    value,
                    info: (),
                    span,
                })
            }
            TokenKind::Str(value) => {
                self.state.next();
                Expression::Str(StringLiteral {
                    value,
                    info: (),
                    span,
                })
            }
            TokenKind::True | TokenKind::On => {
                self.state.next();
                Expression::Bool(BoolLiteral {
                    value: true,
                    info: (),
                    span,
                })
            }
            TokenKind::False | TokenKind::Off => {
                self.state.next();
                Expression::Bool(BoolLiteral {
                    value: false,
                    info: (),
                    span,
                })
            }
            TokenKind::Null => {
                self.state.next();
                Expression::Null(NullLiteral { info: (), span })
            }
            TokenKind::None => {
                self.state.next();
                Expression::NoneLiteral(NoneLiteral { info: (), span })
            }
            TokenKind::Ident(name) => {
                self.state.next();
                Expression::Ident(IdentExpression {
                    name,
                    is_global: false,
                    is_function: false,
                    info: (),
                    span,
                })
            }
            TokenKind::Singleton(name) => {
                self.state.next();
                Expression::SingletonIdent(SingletonIdentExpression {
                    name,
                    info: (),
                    span,
                })
            }
            TokenKind::LParen => {
                self.state.next();
                let inner = self.parse_expression(0)?;
                let end = self.state.expect(&TokenKind::RParen)?.span;
                Expression::Grouped(Box::new(GroupedExpression {
                    inner,
                    info: (),
                    span: span.merge(&end),
                }))
            }
            TokenKind::LBracket => {
                self.state.next();
                let mut elements = vec![];
                while !self.state.at(&TokenKind::RBracket) {
                    elements.push(self.parse_expression(0)?);
                    if self.state.eat(&TokenKind::Comma).is_none() {
                        break;
                    }
                }
                let end = self.state.expect(&TokenKind::RBracket)?.span;
                Expression::List(ListLiteral {
                    elements,
                    info: (),
                    span: span.merge(&end),
                })
            }
            TokenKind::New => {
                self.state.next();
                self.state.expect(&TokenKind::LBrace)?;
                let mut fields = vec![];
                while !self.state.at(&TokenKind::RBrace) {
                    let (name, name_span) = self.state.expect_ident()?;
                    self.state.expect(&TokenKind::Colon)?;
                    let value = self.parse_expression(0)?;
                    let span = name_span.merge(&value.span());
                    fields.push(ObjectLiteralField { name, value, span });
                    if self.state.eat(&TokenKind::Comma).is_none() {
                        break;
                    }
                }
                let end = self.state.expect(&TokenKind::RBrace)?.span;
                Expression::Object(ObjectLiteral {
                    fields,
                    info: (),
                    span: span.merge(&end),
                })
            }
            TokenKind::Fn => {
                self.state.next();
                let params = self.parse_params()?;
                let return_type = if self.state.eat(&TokenKind::Arrow).is_some() {
                    Some(self.parse_type_name()?)
                } else {
                    None
                };
                let body = self.parse_block()?;
                let span = span.merge(&body.span);
                Expression::FnLiteral(Box::new(FnLiteral {
                    params,
                    return_type,
                    body,
                    info: (),
                    span,
                }))
            }
            TokenKind::LBrace => {
                let block = self.parse_block()?;
                Expression::Block(Box::new(block))
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::Match => self.parse_match()?,
            TokenKind::Try => self.parse_try()?,
            TokenKind::Spawn => {
                self.state.next();
                let callee = self.parse_expression(CALLEE_BP)?;
                let Expression::Call(mut call) = callee else {
                    return Err(ParseError {
                        message: "'spawn' must be followed by a function call".to_string(),
                        span: callee.span(),
                    });
                };
                call.is_spawn = true;
                call.span = span.merge(&call.span);
                Expression::Call(call)
            }
            TokenKind::Minus => {
                self.state.next();
                let operand = self.parse_expression(PREFIX_BP)?;
                let span = span.merge(&operand.span());
                Expression::Prefix(Box::new(PrefixExpression {
                    operator: PrefixOperator::Neg,
                    operand,
                    info: (),
                    span,
                }))
            }
            TokenKind::Not => {
                self.state.next();
                let operand = self.parse_expression(PREFIX_BP)?;
                let span = span.merge(&operand.span());
                Expression::Prefix(Box::new(PrefixExpression {
                    operator: PrefixOperator::Not,
                    operand,
                    info: (),
                    span,
                }))
            }
            TokenKind::QuestionMark => {
                self.state.next();
                let operand = self.parse_expression(PREFIX_BP)?;
                let span = span.merge(&operand.span());
                Expression::Prefix(Box::new(PrefixExpression {
                    operator: PrefixOperator::Some,
                    operand,
                    info: (),
                    span,
                }))
            }
            other => {
                return Err(ParseError {
                    message: format!("expected an expression, found {}", other.describe()),
                    span,
                })
            }
        };

        Ok(expression)
    }

    fn parse_call(&mut self, callee: Expression<()>, is_spawn: bool) -> ParseResult<Expression<()>> {
        self.state.expect(&TokenKind::LParen)?;
        let mut args = vec![];
        while !self.state.at(&TokenKind::RParen) {
            args.push(self.parse_expression(0)?);
            if self.state.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        let end = self.state.expect(&TokenKind::RParen)?.span;
        let span = callee.span().merge(&end);

        Ok(Expression::Call(Box::new(CallExpression {
            callee,
            args,
            is_spawn,
            is_normal_function: false,
            info: (),
            span,
        })))
    }

    fn parse_if(&mut self) -> ParseResult<Expression<()>> {
        let start = self.state.expect(&TokenKind::If)?.span;
        let condition = self.parse_expression(0)?;
        let then_block = self.parse_block()?;

        let (else_branch, end) = if self.state.eat(&TokenKind::Else).is_some() {
            if self.state.at(&TokenKind::If) {
                let nested = self.parse_if()?;
                let end = nested.span();
                (Some(nested), end)
            } else {
                let block = self.parse_block()?;
                let end = block.span.clone();
                (Some(Expression::Block(Box::new(block))), end)
            }
        } else {
            (None, then_block.span.clone())
        };

        Ok(Expression::If(Box::new(IfExpression {
            condition,
            then_block,
            else_branch,
            info: (),
            span: start.merge(&end),
        })))
    }

    fn parse_match(&mut self) -> ParseResult<Expression<()>> {
        let start = self.state.expect(&TokenKind::Match)?.span;
        let control = self.parse_expression(0)?;
        self.state.expect(&TokenKind::LBrace)?;

        let mut arms = vec![];
        while !self.state.at(&TokenKind::RBrace) {
            let pattern = self.parse_match_pattern()?;
            self.state.expect(&TokenKind::FatArrow)?;
            let body = self.parse_expression(0)?;
            let span = match &pattern {
                MatchPattern::Literal(expr) => expr.span().merge(&body.span()),
                MatchPattern::Wildcard(span) => span.merge(&body.span()),
            };
            arms.push(MatchArm {
                pattern,
                body,
                span,
            });
            if self.state.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }

        let end = self.state.expect(&TokenKind::RBrace)?.span;
        Ok(Expression::Match(Box::new(MatchExpression {
            control,
            arms,
            info: (),
            span: start.merge(&end),
        })))
    }

    /// Match arms accept literal patterns (optionally negated numbers)
    /// and the `_` wildcard.
    fn parse_match_pattern(&mut self) -> ParseResult<MatchPattern<()>> {
        let token = self.state.peek().clone();
        match &token.kind {
            TokenKind::Ident(name) if name == "_" => {
                self.state.next();
                Ok(MatchPattern::Wildcard(token.span))
            }
            TokenKind::Minus => {
                self.state.next();
                let inner = self.state.peek().clone();
                match inner.kind {
                    TokenKind::Int(value) => {
                        self.state.next();
                        Ok(MatchPattern::Literal(Expression::Int(IntLiteral {
                            value: -value,
                            info: (),
                            span: token.span.merge(&inner.span),
                        })))
                    }
                    TokenKind::Float(value) => {
                        self.state.next();
                        Ok(MatchPattern::Literal(Expression::Float(FloatLiteral {
                            value: -value,
                            info: (),
                            span: token.span.merge(&inner.span),
                        })))
                    }
                    other => Err(ParseError {
                        message: format!(
                            "expected a numeric literal after '-', found {}",
                            other.describe()
                        ),
                        span: inner.span,
                    }),
                }
            }
            TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::True
            | TokenKind::False
            | TokenKind::On
            | TokenKind::Off
            | TokenKind::Null
            | TokenKind::None => {
                let literal = self.parse_prefix()?;
                Ok(MatchPattern::Literal(literal))
            }
            other => Err(ParseError {
                message: format!("expected a literal pattern or '_', found {}", other.describe()),
                span: token.span,
            }),
        }
    }

    fn parse_try(&mut self) -> ParseResult<Expression<()>> {
        let start = self.state.expect(&TokenKind::Try)?.span;
        let try_block = self.parse_block()?;
        self.state.expect(&TokenKind::Catch)?;
        let (catch_ident, _) = self.state.expect_ident()?;
        let catch_block = self.parse_block()?;
        let span = start.merge(&catch_block.span);

        Ok(Expression::Try(Box::new(TryExpression {
            try_block,
            catch_ident,
            catch_block,
            info: (),
            span,
        })))
    }

    // ------------------------------------------------------------------
    // type names
    // ------------------------------------------------------------------

    fn parse_type_name(&mut self) -> ParseResult<TypeName> {
        let token = self.state.peek().clone();
        let span = token.span.clone();

        match token.kind {
            TokenKind::Ident(name) => {
                self.state.next();
                Ok(TypeName::Literal(name, span))
            }
            // `null` is a keyword but also names the unit type
            TokenKind::Null => {
                self.state.next();
                Ok(TypeName::Literal("null".to_string(), span))
            }
            TokenKind::Singleton(name) => {
                self.state.next();
                Ok(TypeName::Singleton(name, span))
            }
            TokenKind::QuestionMark => {
                self.state.next();
                let inner = self.parse_type_name()?;
                let span = span.merge(&inner.span());
                Ok(TypeName::Option(Box::new(inner), span))
            }
            TokenKind::LBracket => {
                self.state.next();
                let inner = self.parse_type_name()?;
                let end = self.state.expect(&TokenKind::RBracket)?.span;
                Ok(TypeName::List(Box::new(inner), span.merge(&end)))
            }
            TokenKind::LBrace => {
                self.state.next();
                if self.state.eat(&TokenKind::QuestionMark).is_some() {
                    let end = self.state.expect(&TokenKind::RBrace)?.span;
                    return Ok(TypeName::AnyObject(span.merge(&end)));
                }
                let mut fields = vec![];
                while !self.state.at(&TokenKind::RBrace) {
                    let (name, name_span) = self.state.expect_ident()?;
                    self.state.expect(&TokenKind::Colon)?;
                    let type_name = self.parse_type_name()?;
                    let span = name_span.merge(&type_name.span());
                    fields.push(ObjectTypeField {
                        name,
                        type_name,
                        span,
                    });
                    if self.state.eat(&TokenKind::Comma).is_none() {
                        break;
                    }
                }
                let end = self.state.expect(&TokenKind::RBrace)?.span;
                Ok(TypeName::Object(fields, span.merge(&end)))
            }
            TokenKind::Fn => {
                self.state.next();
                self.state.expect(&TokenKind::LParen)?;
                let mut params = vec![];
                let mut variadic = None;
                while !self.state.at(&TokenKind::RParen) {
                    if self.state.eat(&TokenKind::DotDot).is_some() {
                        variadic = Some(Box::new(self.parse_type_name()?));
                        break;
                    }
                    params.push(self.parse_type_name()?);
                    if self.state.eat(&TokenKind::Comma).is_none() {
                        break;
                    }
                }
                let mut end = self.state.expect(&TokenKind::RParen)?.span;
                let return_type = if self.state.eat(&TokenKind::Arrow).is_some() {
                    let ret = self.parse_type_name()?;
                    end = ret.span();
                    Some(Box::new(ret))
                } else {
                    None
                };
                Ok(TypeName::Function {
                    params,
                    variadic,
                    return_type,
                    span: span.merge(&end),
                })
            }
            other => Err(ParseError {
                message: format!("expected a type, found {}", other.describe()),
                span,
            }),
        }
    }
}

fn assign_operator(kind: &TokenKind) -> AssignOperator {
    match kind {
        TokenKind::Assign => AssignOperator::Assign,
        TokenKind::PlusAssign => AssignOperator::Plus,
        TokenKind::MinusAssign => AssignOperator::Minus,
        TokenKind::StarAssign => AssignOperator::Multiply,
        TokenKind::SlashAssign => AssignOperator::Divide,
        TokenKind::PercentAssign => AssignOperator::Remainder,
        TokenKind::PowerAssign => AssignOperator::Power,
        TokenKind::ShlAssign => AssignOperator::Shl,
        TokenKind::ShrAssign => AssignOperator::Shr,
        TokenKind::BitAndAssign => AssignOperator::BitAnd,
        TokenKind::BitOrAssign => AssignOperator::BitOr,
        TokenKind::BitXorAssign => AssignOperator::BitXor,
        _ => unreachable!("not an assignment token"),
    }
}

fn infix_operator(kind: &TokenKind) -> InfixOperator {
    match kind {
        TokenKind::Plus => InfixOperator::Plus,
        TokenKind::Minus => InfixOperator::Minus,
        TokenKind::Star => InfixOperator::Multiply,
        TokenKind::Slash => InfixOperator::Divide,
        TokenKind::Percent => InfixOperator::Remainder,
        TokenKind::Power => InfixOperator::Power,
        TokenKind::Shl => InfixOperator::Shl,
        TokenKind::Shr => InfixOperator::Shr,
        TokenKind::BitAnd => InfixOperator::BitAnd,
        TokenKind::BitOr => InfixOperator::BitOr,
        TokenKind::BitXor => InfixOperator::BitXor,
        TokenKind::Lt => InfixOperator::Lt,
        TokenKind::LtEq => InfixOperator::LtEq,
        TokenKind::Gt => InfixOperator::Gt,
        TokenKind::GtEq => InfixOperator::GtEq,
        TokenKind::Eq => InfixOperator::Eq,
        TokenKind::NotEq => InfixOperator::NotEq,
        TokenKind::And => InfixOperator::And,
        TokenKind::Or => InfixOperator::Or,
        _ => unreachable!("not an infix token"),
    }
}

#[cfg(test)]
mod tests {
    use super::ast::*;
    use super::*;

    fn parse_ok(source: &str) -> Program<()> {
        let (program, diagnostics) = parse_module("test", "test.hms", source);
        assert!(
            diagnostics.is_empty(),
            "unexpected diagnostics: {diagnostics:#?}"
        );
        program
    }

    fn parse_single_expression(source: &str) -> Expression<()> {
        let program = parse_ok(&format!("fn main() {{ {source} }}"));
        let Item::Function(function) = &program.items[0] else {
            panic!("expected a function item");
        };
        function
            .body
            .trailing
            .clone()
            .expect("expected a trailing expression")
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_single_expression("1 + 2 * 3");
        let Expression::Infix(infix) = expr else {
            panic!("expected an infix expression");
        };
        assert_eq!(infix.operator, InfixOperator::Plus);
        assert!(matches!(infix.left, Expression::Int(_)));
        assert!(matches!(&infix.right, Expression::Infix(inner) if inner.operator == InfixOperator::Multiply));
    }

    #[test]
    fn test_parse_power_above_unary() {
        // -2 ** 2 parses as -(2 ** 2)
        let expr = parse_single_expression("-2 ** 2");
        let Expression::Prefix(prefix) = expr else {
            panic!("expected a prefix expression");
        };
        assert_eq!(prefix.operator, PrefixOperator::Neg);
        assert!(matches!(&prefix.operand, Expression::Infix(inner) if inner.operator == InfixOperator::Power));
    }

    #[test]
    fn test_parse_assignment_is_right_associative() {
        let expr = parse_single_expression("a = b = 1");
        let Expression::Assign(outer) = expr else {
            panic!("expected an assignment");
        };
        assert!(matches!(outer.value, Expression::Assign(_)));
    }

    #[test]
    fn test_parse_range_is_not_associative() {
        let (_, diagnostics) = parse_module("test", "test.hms", "fn main() { 1..2..3; }");
        assert!(!diagnostics.is_empty());
        assert!(diagnostics[0].message.contains("not associative"));
    }

    #[test]
    fn test_parse_spawn_requires_call() {
        let expr = parse_single_expression("spawn f(1, 2)");
        let Expression::Call(call) = expr else {
            panic!("expected a call");
        };
        assert!(call.is_spawn);
        assert_eq!(call.args.len(), 2);

        let (_, diagnostics) = parse_module("test", "test.hms", "fn main() { spawn 42; }");
        assert!(!diagnostics.is_empty());
    }

    #[test]
    fn test_parse_items() {
        let program = parse_ok(
            "import { log, type Config } from util;\n\
             let $Lamp: { brightness: int };\n\
             type Pair = { a: int, b: int };\n\
             let counter = 0;\n\
             pub fn main() { counter += 1; }\n\
             impl Power with { dim } for $Lamp {\n\
                 fn set(@Lamp lamp, state: bool) { lamp.brightness = 100; }\n\
             }",
        );

        assert_eq!(program.items.len(), 6);
        assert!(matches!(&program.items[0], Item::Import(import) if import.module == "util"));
        assert!(
            matches!(&program.items[1], Item::Singleton(singleton) if singleton.name == "Lamp")
        );
        assert!(matches!(&program.items[2], Item::TypeAlias(alias) if alias.name == "Pair"));
        assert!(matches!(&program.items[3], Item::Global(global) if global.ident == "counter"));
        assert!(matches!(&program.items[4], Item::Function(f) if f.is_pub && f.name == "main"));
        let Item::Impl(impl_block) = &program.items[5] else {
            panic!("expected an impl block");
        };
        assert_eq!(impl_block.template, "Power");
        assert_eq!(impl_block.capabilities, vec!["dim".to_string()]);
        assert_eq!(impl_block.singleton, "Lamp");
        assert_eq!(
            impl_block.functions[0].params[0].singleton_extractor,
            Some("Lamp".to_string())
        );
    }

    #[test]
    fn test_parse_recovers_from_errors() {
        let (program, diagnostics) = parse_module(
            "test",
            "test.hms",
            "fn broken() { let = 3; }\nfn ok() { return 1; }",
        );
        assert!(!diagnostics.is_empty());
        // the second function still parses
        assert!(program
            .items
            .iter()
            .any(|item| matches!(item, Item::Function(f) if f.name == "ok")));
    }

    #[test]
    fn test_parse_match_patterns() {
        let expr = parse_single_expression("match x { 1 => \"a\", -2 => \"b\", _ => \"c\" }");
        let Expression::Match(matched) = expr else {
            panic!("expected a match");
        };
        assert_eq!(matched.arms.len(), 3);
        assert!(
            matches!(&matched.arms[1].pattern, MatchPattern::Literal(Expression::Int(i)) if i.value == -2)
        );
        assert!(matches!(
            &matched.arms[2].pattern,
            MatchPattern::Wildcard(_)
        ));
    }

    #[test]
    fn test_parse_type_names() {
        let program = parse_ok(
            "type A = [int];\n\
             type B = { ? };\n\
             type C = ?str;\n\
             type D = fn(int, bool) -> [float];\n\
             type E = fn(..any) -> null;",
        );
        let Item::TypeAlias(alias) = &program.items[1] else {
            panic!("expected a type alias");
        };
        assert!(matches!(alias.type_name, TypeName::AnyObject(_)));
        let Item::TypeAlias(alias) = &program.items[4] else {
            panic!("expected a type alias");
        };
        assert!(
            matches!(&alias.type_name, TypeName::Function { variadic: Some(_), .. })
        );
    }

    #[test]
    fn test_parse_block_trailing_expression() {
        let expr = parse_single_expression("{ let a = 1; a + 1 }");
        let Expression::Block(block) = expr else {
            panic!("expected a block");
        };
        assert_eq!(block.statements.len(), 1);
        assert!(block.trailing.is_some());
    }

    #[test]
    fn test_parse_trigger_statement() {
        let program = parse_ok("fn main() { trigger on_motion(1) on \"motion\"; }");
        let Item::Function(function) = &program.items[0] else {
            panic!("expected a function");
        };
        assert!(matches!(
            function.body.statements[0],
            Statement::Trigger(TriggerStatement {
                mode: TriggerMode::On,
                ..
            })
        ));
    }
}
