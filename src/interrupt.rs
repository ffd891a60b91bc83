//! Non-local control flow signals, shared by both execution backends.
//!
//! Every evaluator entry point returns `ExecResult<T>`; the `Err` arm is
//! an [`Interrupt`] instead of a language-level exception so the tree
//! interpreter and the VM implement identical semantics. Only
//! [`Interrupt::Throw`] can be caught by `try`/`catch`; everything else
//! propagates to its nearest legitimate handler (loop, function boundary
//! or top level). A cancelled context always wins and cannot be caught.

use std::fmt::Display;

use crate::diagnostic::ErrorCode;
use crate::lexer::Span;
use crate::value::Value;

/// A runtime error with its origin span. Used both for catchable throws
/// and for fatal exceptions.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: ErrorCode,
    pub message: String,
    pub span: Span,
}

impl RuntimeError {
    pub fn new(kind: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.kind, self.message, self.span)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    /// `return` leaving the enclosing function.
    Return(Value),
    Break,
    Continue,
    /// `exit(code)` terminating the whole program.
    Exit(i64),
    /// A normal exception; the only interrupt `try`/`catch` can catch.
    Throw(RuntimeError),
    /// Fatal exceptions (stack overflow, host failures); uncatchable.
    Fatal(RuntimeError),
    /// The cancellation context fired; uncatchable, always wins.
    Terminate { reason: String, span: Span },
}

impl Interrupt {
    pub fn throw(kind: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Interrupt::Throw(RuntimeError::new(kind, message, span))
    }

    pub fn fatal(kind: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Interrupt::Fatal(RuntimeError::new(kind, message, span))
    }

    /// The process exit code this interrupt maps to when it reaches the
    /// top level.
    pub fn exit_code(&self) -> i64 {
        match self {
            Interrupt::Exit(code) => *code,
            _ => 1,
        }
    }
}

pub type ExecResult<T> = Result<T, Interrupt>;
