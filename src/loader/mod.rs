//! Module graph resolution.
//!
//! Starting from the entry module the loader asks the host to resolve
//! module source by name, parses each module exactly once (memoized by
//! name) and follows `import` items depth first. A "currently resolving"
//! set detects cycles, which are reported as `ImportError` diagnostics
//! naming the cycle. Modules the host cannot resolve are left to the
//! analyzer: their symbols may still exist as builtin imports, and
//! genuinely missing ones become analyzer diagnostics. Only a missing
//! entry module is an error here.
//!
//! The output lists modules in dependency post-order (imports first),
//! which is the order the analyzer consumes them in.

use std::collections::HashMap;

use log::{debug, trace};

use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::host::HostExecutor;
use crate::lexer::Span;
use crate::parser::ast::{Item, Program};
use crate::parser::parse_module;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Resolving,
    Done,
}

#[derive(Debug, Default)]
pub struct LoadedModules {
    /// `(name, parsed module)` in dependency post-order.
    pub modules: Vec<(String, Program<()>)>,
    /// Filename → source text, for diagnostic rendering.
    pub sources: HashMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn load(entry: &str, executor: &dyn HostExecutor) -> LoadedModules {
    let mut loader = Loader {
        executor,
        result: LoadedModules::default(),
        state: HashMap::new(),
        stack: vec![],
    };
    loader.visit(entry, None);

    let entry_loaded = loader
        .result
        .modules
        .iter()
        .any(|(name, _)| name == entry);
    if !entry_loaded {
        loader.result.diagnostics.push(Diagnostic::error(
            ErrorCode::ImportError,
            format!("entry module '{entry}' could not be resolved"),
            Span::default(),
        ));
    }

    loader.result
}

struct Loader<'a> {
    executor: &'a dyn HostExecutor,
    result: LoadedModules,
    state: HashMap<String, VisitState>,
    stack: Vec<String>,
}

impl<'a> Loader<'a> {
    fn visit(&mut self, name: &str, import_span: Option<&Span>) {
        match self.state.get(name) {
            Some(VisitState::Done) => return,
            Some(VisitState::Resolving) => {
                let mut cycle = self.stack.clone();
                cycle.push(name.to_string());
                let cycle = cycle.join(" -> ");
                self.result.diagnostics.push(Diagnostic::error(
                    ErrorCode::ImportError,
                    format!("import cycle detected: {cycle}"),
                    import_span.cloned().unwrap_or_default(),
                ));
                return;
            }
            None => {}
        }

        trace!("resolving module '{name}'");
        let source = match self.executor.resolve_module(name) {
            Ok(Some(source)) => source,
            Ok(None) => {
                // possibly a builtin module; the analyzer decides per
                // imported symbol
                debug!("host provides no source for module '{name}'");
                self.state.insert(name.to_string(), VisitState::Done);
                return;
            }
            Err(err) => {
                self.result.diagnostics.push(Diagnostic::error(
                    ErrorCode::HostError,
                    format!("failed to resolve module '{name}': {err}"),
                    import_span.cloned().unwrap_or_default(),
                ));
                self.state.insert(name.to_string(), VisitState::Done);
                return;
            }
        };

        self.state.insert(name.to_string(), VisitState::Resolving);
        self.stack.push(name.to_string());

        let filename = format!("{name}.hms");
        let (program, diagnostics) = parse_module(name, &filename, &source);
        self.result.sources.insert(filename, source);
        self.result.diagnostics.extend(diagnostics);

        for item in &program.items {
            if let Item::Import(import) = item {
                self.visit(&import.module, Some(&import.module_span));
            }
        }

        self.stack.pop();
        self.state.insert(name.to_string(), VisitState::Done);
        self.result.modules.push((name.to_string(), program));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TestExecutor;

    #[test]
    fn test_dependency_post_order() {
        let executor = TestExecutor::default()
            .with_module("main", "import { helper } from util;\nfn main() { helper(); }")
            .with_module("util", "pub fn helper() { }");

        let loaded = load("main", &executor);
        assert!(loaded.diagnostics.is_empty(), "{:#?}", loaded.diagnostics);
        let names: Vec<_> = loaded.modules.iter().map(|(name, _)| name.clone()).collect();
        assert_eq!(names, vec!["util".to_string(), "main".to_string()]);
    }

    #[test]
    fn test_modules_are_parsed_once() {
        let executor = TestExecutor::default()
            .with_module(
                "main",
                "import { a } from left;\nimport { b } from right;\nfn main() { }",
            )
            .with_module("left", "import { c } from shared;\npub fn a() { }")
            .with_module("right", "import { c } from shared;\npub fn b() { }")
            .with_module("shared", "pub fn c() { }");

        let loaded = load("main", &executor);
        let shared_count = loaded
            .modules
            .iter()
            .filter(|(name, _)| name == "shared")
            .count();
        assert_eq!(shared_count, 1);
    }

    #[test]
    fn test_import_cycle_is_reported() {
        let executor = TestExecutor::default()
            .with_module("main", "import { a } from other;\nfn main() { }")
            .with_module("other", "import { b } from main;\npub fn a() { }");

        let loaded = load("main", &executor);
        assert!(loaded
            .diagnostics
            .iter()
            .any(|d| d.code == ErrorCode::ImportError
                && d.message.contains("main -> other -> main")));
    }

    #[test]
    fn test_missing_entry_module() {
        let executor = TestExecutor::default();
        let loaded = load("main", &executor);
        assert!(loaded
            .diagnostics
            .iter()
            .any(|d| d.message.contains("entry module 'main'")));
    }

    #[test]
    fn test_unresolved_import_is_left_to_the_analyzer() {
        let executor = TestExecutor::default()
            .with_module("main", "import { x } from builtin_stuff;\nfn main() { }");

        let loaded = load("main", &executor);
        // no loader diagnostic; the analyzer reports unknown builtins
        assert!(loaded.diagnostics.is_empty(), "{:#?}", loaded.diagnostics);
    }
}
