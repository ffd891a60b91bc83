//! Homescript: an embeddable domain-specific language for home
//! automation hosts.
//!
//! The crate covers the language core: lexer, recursive-descent parser,
//! module loader, semantic analyzer, the shared runtime value model, and
//! two observationally equivalent execution backends (a tree-walking
//! interpreter and a bytecode compiler + VM). Everything with side
//! effects goes through the [`host::HostExecutor`] boundary.
//!
//! ```no_run
//! use homescript::{compile_program, execute, Backend};
//! use homescript::host::{CancelContext, TestExecutor};
//!
//! let executor = TestExecutor::new()
//!     .with_module("main", "fn main() { println(\"hello\"); }");
//! let output = compile_program("main", &executor);
//! assert!(!output.analyzed.has_errors());
//!
//! let result = execute(
//!     &output.analyzed,
//!     &executor,
//!     Backend::Tree,
//!     CancelContext::new(),
//!     homescript::interpreter::DEFAULT_CALLSTACK_LIMIT,
//! );
//! assert_eq!(result.exit_code, 0);
//! ```

pub mod analyzer;
pub mod compiler;
pub mod diagnostic;
pub mod host;
pub mod interpreter;
pub mod interrupt;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod value;
pub mod vm;

use std::collections::HashMap;

use analyzer::AnalyzedProgram;
use diagnostic::Diagnostic;
use host::{CancelContext, HostExecutor};
use interrupt::{Interrupt, RuntimeError};
use value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Tree,
    Vm,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub analyzed: AnalyzedProgram,
    /// Filename → source text, for diagnostic rendering.
    pub sources: HashMap<String, String>,
}

/// Load, parse and analyze the module graph rooted at `entry`. All
/// diagnostics (loader, parser, analyzer) come back merged and sorted.
pub fn compile_program(entry: &str, executor: &dyn HostExecutor) -> CompileOutput {
    let loaded = loader::load(entry, executor);
    let mut analyzed = analyzer::analyze(loaded.modules, entry, executor);

    analyzed.diagnostics.extend(loaded.diagnostics);
    analyzed.diagnostics.sort_by(Diagnostic::compare);

    CompileOutput {
        analyzed,
        sources: loaded.sources,
    }
}

/// The outcome of one program execution.
#[derive(Debug)]
pub struct RunResult {
    pub exit_code: i64,
    /// The value returned by `main`, when execution completed normally.
    pub value: Option<Value>,
    /// The structured runtime error of an uncaught throw or fatal
    /// exception.
    pub error: Option<RuntimeError>,
    /// The cancellation cause when the run was terminated.
    pub terminated: Option<String>,
}

impl RunResult {
    fn completed(value: Value) -> Self {
        Self {
            exit_code: 0,
            value: Some(value),
            error: None,
            terminated: None,
        }
    }

    fn from_interrupt(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Exit(code) => Self {
                exit_code: code,
                value: None,
                error: None,
                terminated: None,
            },
            Interrupt::Throw(error) => Self {
                exit_code: 1,
                value: None,
                error: Some(error),
                terminated: None,
            },
            Interrupt::Fatal(error) => Self {
                exit_code: 1,
                value: None,
                error: Some(error),
                terminated: None,
            },
            Interrupt::Terminate { reason, span } => Self {
                exit_code: 1,
                value: None,
                error: Some(RuntimeError::new(
                    diagnostic::ErrorCode::HostError,
                    format!("terminated: {reason}"),
                    span,
                )),
                terminated: Some(reason),
            },
            // return/break/continue never escape a well-formed program
            other => Self {
                exit_code: 1,
                value: None,
                error: Some(RuntimeError::new(
                    diagnostic::ErrorCode::HostError,
                    format!("stray control flow interrupt: {other:?}"),
                    lexer::Span::default(),
                )),
                terminated: None,
            },
        }
    }
}

/// Execute an analyzed (error-free) program on the selected backend.
pub fn execute(
    analyzed: &AnalyzedProgram,
    executor: &dyn HostExecutor,
    backend: Backend,
    cancel: CancelContext,
    callstack_limit: usize,
) -> RunResult {
    let result = match backend {
        Backend::Tree => interpreter::Interpreter::new(analyzed, executor, cancel, callstack_limit)
            .and_then(|mut interpreter| interpreter.run_main()),
        Backend::Vm => match compiler::compile(analyzed) {
            Ok(compiled) => vm::Vm::new(&compiled, executor, cancel, callstack_limit)
                .and_then(|mut vm| vm.run_main()),
            Err(diagnostic) => Err(Interrupt::fatal(
                diagnostic.code,
                diagnostic.message,
                diagnostic.span,
            )),
        },
    };

    match result {
        Ok(value) => RunResult::completed(value),
        Err(interrupt) => RunResult::from_interrupt(interrupt),
    }
}
