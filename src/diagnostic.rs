//! Structured diagnostics shared by every pipeline stage.
//!
//! A [`Diagnostic`] pairs a severity level with one of the toolchain error
//! codes, a message, the offending [`Span`] and optional notes. Only
//! `error` level diagnostics block code generation; warnings and hints are
//! advisory. Rendering embeds a three-line source excerpt with a caret
//! under the offending range.

use std::cmp::Ordering;
use std::fmt::Display;

use colored::Colorize;

use crate::lexer::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Level {
    Hint,
    Warning,
    Error,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Hint => write!(f, "hint"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// Error codes surfaced by the toolchain, at compile time and at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    SyntaxError,
    TypeError,
    ReferenceError,
    ValueError,
    ImportError,
    CastError,
    IndexOutOfBounds,
    StackOverflow,
    OutOfMemory,
    HostError,
    JsonError,
    UncaughtThrow,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::SyntaxError => "SyntaxError",
            ErrorCode::TypeError => "TypeError",
            ErrorCode::ReferenceError => "ReferenceError",
            ErrorCode::ValueError => "ValueError",
            ErrorCode::ImportError => "ImportError",
            ErrorCode::CastError => "CastError",
            ErrorCode::IndexOutOfBounds => "IndexOutOfBounds",
            ErrorCode::StackOverflow => "StackOverflow",
            ErrorCode::OutOfMemory => "OutOfMemory",
            ErrorCode::HostError => "HostError",
            ErrorCode::JsonError => "JsonError",
            ErrorCode::UncaughtThrow => "UncaughtThrow",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub level: Level,
    pub code: ErrorCode,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            level: Level::Error,
            code,
            message: message.into(),
            span,
            notes: vec![],
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            level: Level::Warning,
            code: ErrorCode::TypeError,
            message: message.into(),
            span,
            notes: vec![],
        }
    }

    pub fn hint(message: impl Into<String>, span: Span) -> Self {
        Self {
            level: Level::Hint,
            code: ErrorCode::TypeError,
            message: message.into(),
            span,
            notes: vec![],
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Stable ordering so analyzer output is byte-identical across runs.
    pub fn sort_key(&self) -> (String, usize, Level, String) {
        (
            self.span.filename.clone(),
            self.span.start.byte,
            self.level,
            self.message.clone(),
        )
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }

    /// Render this diagnostic with a three-line excerpt of `source` and a
    /// caret marking the offending span.
    pub fn display(&self, source: &str) -> String {
        let level = match self.level {
            Level::Error => format!("{}", self.level).red().bold(),
            Level::Warning => format!("{}", self.level).yellow().bold(),
            Level::Hint => format!("{}", self.level).cyan().bold(),
        };

        let mut out = format!("{level}[{code}]: {msg}\n", code = self.code, msg = self.message);
        out.push_str(&format!("  --> {}\n", self.span));
        out.push_str(&render_excerpt(source, &self.span));

        for note in &self.notes {
            out.push_str(&format!("  = note: {note}\n"));
        }

        out
    }
}

/// Three-line window around the span start with a caret underline. The
/// underline covers the span on its first line; multi-line spans mark the
/// rest of the first line.
fn render_excerpt(source: &str, span: &Span) -> String {
    let lines = source.lines().collect::<Vec<_>>();
    if lines.is_empty() || span.start.line == 0 {
        return String::new();
    }

    let line_idx = (span.start.line - 1).min(lines.len().saturating_sub(1));
    let gutter = format!("{}", span.start.line + 1).len().max(2);
    let pad = " ".repeat(gutter);

    let mut out = format!("{pad} |\n");

    if line_idx > 0 {
        out.push_str(&format!(
            "{:>gutter$} | {}\n",
            line_idx,
            lines[line_idx - 1]
        ));
    }

    let line = lines[line_idx];
    out.push_str(&format!("{:>gutter$} | {}\n", line_idx + 1, line));

    let caret_offset = span.start.column.saturating_sub(1);
    let caret_len = if span.end.line == span.start.line {
        (span.end.column.saturating_sub(span.start.column)).max(1)
    } else {
        line.chars().count().saturating_sub(caret_offset).max(1)
    };
    out.push_str(&format!(
        "{pad} | {}{}\n",
        " ".repeat(caret_offset),
        "^".repeat(caret_len).red()
    ));

    if line_idx + 1 < lines.len() {
        out.push_str(&format!(
            "{:>gutter$} | {}\n",
            line_idx + 2,
            lines[line_idx + 1]
        ));
    }

    out.push_str(&format!("{pad} |\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Location;

    fn span(line: usize, column: usize, len: usize) -> Span {
        Span::new(
            "test.hms",
            Location {
                line,
                column,
                byte: 0,
            },
            Location {
                line,
                column: column + len,
                byte: len,
            },
        )
    }

    #[test]
    fn test_excerpt_caret_position() {
        colored::control::set_override(false);
        let source = "let a = 1;\nlet b = $;\nlet c = 3;";
        let rendered = Diagnostic::error(
            ErrorCode::SyntaxError,
            "unexpected character '$'",
            span(2, 9, 1),
        )
        .display(source);

        assert!(rendered.contains("error[SyntaxError]: unexpected character '$'"));
        assert!(rendered.contains("--> test.hms:2:9"));
        assert!(rendered.contains(" 2 | let b = $;"));
        assert!(rendered.contains("   |         ^"));
        assert!(rendered.contains(" 1 | let a = 1;"));
        assert!(rendered.contains(" 3 | let c = 3;"));
    }

    #[test]
    fn test_sorted_deterministic() {
        let a = Diagnostic::error(ErrorCode::TypeError, "a", span(1, 1, 1));
        let b = Diagnostic::error(ErrorCode::TypeError, "b", span(1, 1, 1));
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(a.compare(&a), Ordering::Equal);
    }
}
