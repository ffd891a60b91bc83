//! # Analyzer Module
//!
//! Semantic analysis for Homescript: name resolution across lexical
//! scopes, structural type checking over the `any`/`{ ? }`/`never`
//! lattice, singleton/template verification and production of the typed
//! AST.
//!
//! ## Architecture
//!
//! Analysis runs per module, in the dependency order established by the
//! loader, with two passes each:
//!
//! 1. **Declarations** — imports, type aliases, singleton declarations,
//!    function signatures, lazily typed globals and impl blocks are
//!    collected into module tables; identifiers must be unique within
//!    their namespace.
//! 2. **Bodies** — every statement and expression is checked under a
//!    lexical scope stack and re-instantiated as `Expression<TypeInformation>`.
//!
//! The analyzer never aborts: errors poison the offending expression
//! with `Type::Unknown`, which is compatible with everything, so a
//! single mistake does not cascade. Diagnostics are collected and
//! returned in a stable sorted order; only `error` level diagnostics
//! block code generation.

pub mod methods;
pub mod scope;
pub mod types;

use std::collections::HashMap;

use indexmap::IndexMap;
use log::{debug, trace};

use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::host::{AnalyzerImport, HostExecutor, TemplateSpec};
use crate::lexer::Span;
use crate::parser::ast::*;

use self::methods::{builtin_member_type, sortable_element};
use self::scope::{Declared, Scope, Symbol, SymbolKind};
use self::types::{FunctionType, ObjectField, Params, Type};

/// The per-expression info slot of the typed AST.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TypeInformation {
    pub type_id: Type,
}

impl TypeInformation {
    pub fn new(type_id: Type) -> Self {
        Self { type_id }
    }
}

#[derive(Debug, Clone)]
pub struct SingletonInfo {
    /// The declared value type backing the singleton.
    pub type_id: Type,
    /// Templates implemented for this singleton.
    pub templates: Vec<String>,
    /// Method name → callable signature, collected from impl blocks.
    pub methods: IndexMap<String, FunctionType>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    /// The caller-visible signature; singleton extractor parameters are
    /// excluded, the runtime binds them.
    pub type_id: FunctionType,
    /// `(parameter name, singleton ident)` for each extractor parameter.
    pub singleton_params: Vec<(String, String)>,
    pub is_pub: bool,
    pub is_event: bool,
    pub span: Span,
}

/// One fully analyzed module: the typed AST plus the declaration tables
/// the backends dispatch on.
#[derive(Debug, Clone)]
pub struct AnalyzedModule {
    pub name: String,
    pub program: Program<TypeInformation>,
    pub imports: Vec<ImportItem>,
    pub types: IndexMap<String, Type>,
    pub singletons: IndexMap<String, SingletonInfo>,
    pub globals: IndexMap<String, Type>,
    pub functions: IndexMap<String, FunctionInfo>,
}

#[derive(Debug, Clone)]
pub struct AnalyzedProgram {
    pub entry: String,
    pub modules: IndexMap<String, AnalyzedModule>,
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalyzedProgram {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.level == crate::diagnostic::Level::Error)
    }
}

/// Analyze `modules` (in dependency order, imports first). `entry` names
/// the module whose `main` function starts execution.
pub fn analyze(
    modules: Vec<(String, Program<()>)>,
    entry: &str,
    executor: &dyn HostExecutor,
) -> AnalyzedProgram {
    let mut analyzer = Analyzer {
        executor,
        diagnostics: vec![],
        analyzed: IndexMap::new(),
        scope: Scope::new(),
        types_table: IndexMap::new(),
        singletons: IndexMap::new(),
        globals: IndexMap::new(),
        functions: IndexMap::new(),
        templates: HashMap::new(),
        current_return: Type::Null,
        current_impl: None,
        loop_breaks: vec![],
    };

    for (name, program) in modules {
        analyzer.check_module(name, program);
    }

    analyzer.check_entry(entry);

    let mut diagnostics = analyzer.diagnostics;
    diagnostics.sort_by(Diagnostic::compare);

    AnalyzedProgram {
        entry: entry.to_string(),
        modules: analyzer.analyzed,
        diagnostics,
    }
}

struct Analyzer<'a> {
    executor: &'a dyn HostExecutor,
    diagnostics: Vec<Diagnostic>,
    analyzed: IndexMap<String, AnalyzedModule>,

    // per-module state
    scope: Scope,
    types_table: IndexMap<String, Type>,
    singletons: IndexMap<String, SingletonInfo>,
    globals: IndexMap<String, Type>,
    functions: IndexMap<String, FunctionInfo>,
    templates: HashMap<String, TemplateSpec>,

    // per-body state
    current_return: Type,
    current_impl: Option<String>,
    loop_breaks: Vec<bool>,
}

impl<'a> Analyzer<'a> {
    fn error(&mut self, code: ErrorCode, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::error(code, message, span));
    }

    fn warning(&mut self, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::warning(message, span));
    }

    fn hint(&mut self, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::hint(message, span));
    }

    // ==================================================================
    // module driver
    // ==================================================================

    fn check_module(&mut self, name: String, program: Program<()>) {
        debug!("analyzing module '{name}'");

        self.scope = Scope::new();
        self.types_table = IndexMap::new();
        self.singletons = IndexMap::new();
        self.globals = IndexMap::new();
        self.functions = IndexMap::new();
        self.templates = HashMap::new();
        self.current_return = Type::Null;
        self.current_impl = None;
        self.loop_breaks = vec![];

        for (name, type_id) in crate::host::prelude_types() {
            self.scope.declare(
                name,
                Symbol {
                    kind: SymbolKind::Function,
                    type_id,
                    span: Span::default(),
                },
            );
        }

        // pass 1: declarations
        for item in &program.items {
            self.declare_item(item);
        }

        // pass 2: bodies
        let mut items = vec![];
        for item in program.items {
            items.push(self.check_item(item));
        }

        let program = Program {
            name: program.name,
            items,
            span: program.span,
        };

        let imports = program
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Import(import) => Some(import.clone()),
                _ => None,
            })
            .collect();

        let module = AnalyzedModule {
            name: name.clone(),
            program,
            imports,
            types: std::mem::take(&mut self.types_table),
            singletons: std::mem::take(&mut self.singletons),
            globals: std::mem::take(&mut self.globals),
            functions: std::mem::take(&mut self.functions),
        };
        self.analyzed.insert(name, module);
    }

    fn check_entry(&mut self, entry: &str) {
        let Some(module) = self.analyzed.get(entry) else {
            return;
        };
        let main = module.functions.get("main").cloned();
        let module_span = module.program.span.clone();

        match main {
            Some(info) => {
                let arity = match &info.type_id.params {
                    Params::Normal(params) => params.len(),
                    Params::VarArgs(_) => 1,
                };
                if arity != 0 {
                    self.error(
                        ErrorCode::TypeError,
                        "the 'main' function must not take parameters",
                        info.span,
                    );
                }
            }
            None => {
                self.error(
                    ErrorCode::ReferenceError,
                    format!("entry module '{entry}' has no 'main' function"),
                    module_span,
                );
            }
        }
    }

    // ==================================================================
    // pass 1: declarations
    // ==================================================================

    fn declare_item(&mut self, item: &Item<()>) {
        match item {
            Item::Import(import) => self.declare_import(import),
            Item::TypeAlias(alias) => {
                let type_id = self.resolve_type_name(&alias.type_name);
                self.types_table.insert(alias.name.clone(), type_id.clone());
                self.declare_symbol(
                    &alias.name,
                    SymbolKind::Type,
                    type_id,
                    alias.span.clone(),
                );
            }
            Item::Singleton(singleton) => {
                let type_id = self.resolve_type_name(&singleton.type_name);
                if self.singletons.contains_key(&singleton.name) {
                    self.error(
                        ErrorCode::TypeError,
                        format!("singleton '${}' is declared twice", singleton.name),
                        singleton.span.clone(),
                    );
                    return;
                }
                self.singletons.insert(
                    singleton.name.clone(),
                    SingletonInfo {
                        type_id,
                        templates: vec![],
                        methods: IndexMap::new(),
                        span: singleton.span.clone(),
                    },
                );
                self.declare_symbol(
                    &singleton.name,
                    SymbolKind::Singleton,
                    Type::Singleton(singleton.name.clone()),
                    singleton.span.clone(),
                );
            }
            Item::Global(global) => {
                let type_id = match &global.type_name {
                    Some(type_name) => self.resolve_type_name(type_name),
                    None => Type::Unknown,
                };
                self.globals.insert(global.ident.clone(), type_id.clone());
                self.declare_symbol(
                    &global.ident,
                    SymbolKind::Value,
                    type_id,
                    global.span.clone(),
                );
            }
            Item::Function(function) => {
                let info = self.function_signature(function);
                self.declare_symbol(
                    &function.name,
                    SymbolKind::Function,
                    Type::Function(Box::new(info.type_id.clone())),
                    function.span.clone(),
                );
                self.functions.insert(function.name.clone(), info);
            }
            Item::Impl(impl_block) => self.declare_impl(impl_block),
        }
    }

    fn declare_symbol(&mut self, name: &str, kind: SymbolKind, type_id: Type, span: Span) {
        match self.scope.declare(
            name,
            Symbol {
                kind,
                type_id,
                span: span.clone(),
            },
        ) {
            Declared::Ok => {}
            Declared::Shadows(previous) => {
                let diagnostic = Diagnostic::hint(
                    format!("'{name}' shadows an outer binding"),
                    span,
                )
                .with_note(format!(
                    "previously bound at {}:{}",
                    previous.start.line, previous.start.column
                ));
                self.diagnostics.push(diagnostic);
            }
            Declared::Duplicate(previous) => {
                let diagnostic = Diagnostic::error(
                    ErrorCode::TypeError,
                    format!("'{name}' is already declared in this scope"),
                    span,
                )
                .with_note(format!(
                    "previous declaration at {}:{}",
                    previous.start.line, previous.start.column
                ));
                self.diagnostics.push(diagnostic);
            }
        }
    }

    fn declare_import(&mut self, import: &ImportItem) {
        trace!("resolving import from '{}'", import.module);

        let user_module = self.analyzed.get(&import.module).cloned();

        for symbol in &import.symbols {
            if let Some(module) = &user_module {
                if symbol.type_import {
                    match module.types.get(&symbol.name) {
                        Some(type_id) => {
                            self.types_table.insert(symbol.name.clone(), type_id.clone());
                            self.declare_symbol(
                                &symbol.name,
                                SymbolKind::Type,
                                type_id.clone(),
                                symbol.span.clone(),
                            );
                        }
                        None => self.error(
                            ErrorCode::ImportError,
                            format!(
                                "module '{}' has no type '{}'",
                                import.module, symbol.name
                            ),
                            symbol.span.clone(),
                        ),
                    }
                    continue;
                }

                match module.functions.get(&symbol.name) {
                    Some(info) if info.is_pub => {
                        self.declare_symbol(
                            &symbol.name,
                            SymbolKind::Function,
                            Type::Function(Box::new(info.type_id.clone())),
                            symbol.span.clone(),
                        );
                    }
                    Some(_) => self.error(
                        ErrorCode::ImportError,
                        format!(
                            "function '{}' of module '{}' is not 'pub'",
                            symbol.name, import.module
                        ),
                        symbol.span.clone(),
                    ),
                    None => self.error(
                        ErrorCode::ImportError,
                        format!(
                            "module '{}' has no function '{}'",
                            import.module, symbol.name
                        ),
                        symbol.span.clone(),
                    ),
                }
                continue;
            }

            // builtin module: ask the host
            match self.executor.get_builtin_import(&import.module, &symbol.name) {
                AnalyzerImport::Value(type_id) => {
                    let kind = match &type_id {
                        Type::Function(_) => SymbolKind::Function,
                        _ => SymbolKind::Value,
                    };
                    self.declare_symbol(&symbol.name, kind, type_id, symbol.span.clone());
                }
                AnalyzerImport::TypeSymbol(type_id) => {
                    self.types_table.insert(symbol.name.clone(), type_id.clone());
                    self.declare_symbol(
                        &symbol.name,
                        SymbolKind::Type,
                        type_id,
                        symbol.span.clone(),
                    );
                }
                AnalyzerImport::Template(spec) => {
                    self.templates.insert(symbol.name.clone(), spec);
                }
                AnalyzerImport::SymbolNotFound => self.error(
                    ErrorCode::ImportError,
                    format!(
                        "module '{}' provides no symbol '{}'",
                        import.module, symbol.name
                    ),
                    symbol.span.clone(),
                ),
                AnalyzerImport::ModuleNotFound => self.error(
                    ErrorCode::ImportError,
                    format!("module '{}' could not be resolved", import.module),
                    import.module_span.clone(),
                ),
            }
        }
    }

    /// Build a function's caller-visible signature; extractor parameters
    /// are recorded separately.
    fn function_signature(&mut self, function: &FunctionDefinition<()>) -> FunctionInfo {
        let mut params = vec![];
        let mut singleton_params = vec![];
        let mut seen_ordinary = false;

        for param in &function.params {
            match &param.singleton_extractor {
                Some(singleton) => {
                    if seen_ordinary {
                        self.error(
                            ErrorCode::TypeError,
                            "singleton extractor parameters must precede ordinary parameters",
                            param.span.clone(),
                        );
                    }
                    if !self.singletons.contains_key(singleton) {
                        self.error(
                            ErrorCode::ReferenceError,
                            format!("unknown singleton '${singleton}'"),
                            param.span.clone(),
                        );
                    }
                    singleton_params.push((param.name.clone(), singleton.clone()));
                }
                None => {
                    seen_ordinary = true;
                    let type_id = match &param.type_name {
                        Some(type_name) => self.resolve_type_name(type_name),
                        None => {
                            self.error(
                                ErrorCode::TypeError,
                                format!("parameter '{}' needs a type annotation", param.name),
                                param.span.clone(),
                            );
                            Type::Unknown
                        }
                    };
                    params.push((param.name.clone(), type_id));
                }
            }
        }

        let return_type = match &function.return_type {
            Some(type_name) => self.resolve_type_name(type_name),
            None => Type::Null,
        };

        FunctionInfo {
            type_id: FunctionType::new(params, return_type),
            singleton_params,
            is_pub: function.is_pub,
            is_event: function.is_event,
            span: function.span.clone(),
        }
    }

    fn declare_impl(&mut self, impl_block: &ImplBlock<()>) {
        let Some(template) = self.templates.get(&impl_block.template).cloned() else {
            self.error(
                ErrorCode::ReferenceError,
                format!(
                    "unknown template '{}'; templates come from host imports",
                    impl_block.template
                ),
                impl_block.template_span.clone(),
            );
            return;
        };

        for capability in &impl_block.capabilities {
            if !template.has_capability(capability) {
                self.error(
                    ErrorCode::TypeError,
                    format!(
                        "template '{}' has no capability '{capability}'",
                        impl_block.template
                    ),
                    impl_block.template_span.clone(),
                );
            }
        }

        if !self.singletons.contains_key(&impl_block.singleton) {
            self.error(
                ErrorCode::ReferenceError,
                format!("unknown singleton '${}'", impl_block.singleton),
                impl_block.singleton_span.clone(),
            );
            return;
        }

        let required = template.required_methods(&impl_block.capabilities);

        for function in &impl_block.functions {
            let info = self.function_signature(function);

            match required.iter().find(|(name, _)| *name == function.name) {
                Some((_, expected)) => {
                    let expected_type = Type::Function(Box::new(expected.clone()));
                    let actual_type = Type::Function(Box::new(info.type_id.clone()));
                    if !expected_type.accepts(&actual_type) || !actual_type.accepts(&expected_type)
                    {
                        let diagnostic = Diagnostic::error(
                            ErrorCode::TypeError,
                            format!(
                                "method '{}' does not match the template signature",
                                function.name
                            ),
                            function.span.clone(),
                        )
                        .with_note(format!("template requires {expected_type}"))
                        .with_note(format!("impl provides   {actual_type}"));
                        self.diagnostics.push(diagnostic);
                    }
                }
                None => self.error(
                    ErrorCode::TypeError,
                    format!(
                        "method '{}' is not part of template '{}'",
                        function.name, impl_block.template
                    ),
                    function.span.clone(),
                ),
            }

            let already_implemented = self
                .singletons
                .get(&impl_block.singleton)
                .map(|singleton| singleton.methods.contains_key(&function.name))
                .unwrap_or(false);
            if already_implemented {
                self.error(
                    ErrorCode::TypeError,
                    format!(
                        "method '{}' is implemented twice for '${}'",
                        function.name, impl_block.singleton
                    ),
                    function.span.clone(),
                );
            } else {
                self.singletons
                    .get_mut(&impl_block.singleton)
                    .expect("singleton checked above")
                    .methods
                    .insert(function.name.clone(), info.type_id.clone());
            }
        }

        for (name, _) in &required {
            if !impl_block.functions.iter().any(|f| &f.name == name) {
                self.error(
                    ErrorCode::TypeError,
                    format!(
                        "impl of template '{}' for '${}' is missing method '{name}'",
                        impl_block.template, impl_block.singleton
                    ),
                    impl_block.span.clone(),
                );
            }
        }

        let singleton = self
            .singletons
            .get_mut(&impl_block.singleton)
            .expect("singleton checked above");
        singleton.templates.push(impl_block.template.clone());
    }

    // ==================================================================
    // pass 2: bodies
    // ==================================================================

    fn check_item(&mut self, item: Item<()>) -> Item<TypeInformation> {
        match item {
            Item::Import(import) => Item::Import(import),
            Item::Singleton(singleton) => Item::Singleton(singleton),
            Item::TypeAlias(alias) => Item::TypeAlias(alias),
            Item::Global(global) => {
                if matches!(global.value, Expression::FnLiteral(_)) {
                    self.error(
                        ErrorCode::TypeError,
                        "a module global may not bind a function literal",
                        global.span.clone(),
                    );
                }
                let typed = self.check_let_binding(global, true);
                Item::Global(typed)
            }
            Item::Function(function) => Item::Function(self.check_function(function)),
            Item::Impl(impl_block) => {
                let previous = self.current_impl.replace(impl_block.singleton.clone());
                let functions = impl_block
                    .functions
                    .into_iter()
                    .map(|function| self.check_function(function))
                    .collect();
                self.current_impl = previous;
                Item::Impl(ImplBlock {
                    template: impl_block.template,
                    template_span: impl_block.template_span,
                    capabilities: impl_block.capabilities,
                    singleton: impl_block.singleton,
                    singleton_span: impl_block.singleton_span,
                    functions,
                    span: impl_block.span,
                })
            }
        }
    }

    fn check_function(
        &mut self,
        function: FunctionDefinition<()>,
    ) -> FunctionDefinition<TypeInformation> {
        trace!("checking function '{}'", function.name);

        self.scope.push();

        for param in &function.params {
            let type_id = match &param.singleton_extractor {
                Some(singleton) => Type::Singleton(singleton.clone()),
                None => match &param.type_name {
                    Some(type_name) => self.resolve_type_name(type_name),
                    None => Type::Unknown,
                },
            };
            self.declare_symbol(&param.name, SymbolKind::Value, type_id, param.span.clone());
        }

        let return_type = match &function.return_type {
            Some(type_name) => self.resolve_type_name(type_name),
            None => Type::Null,
        };
        let previous_return = std::mem::replace(&mut self.current_return, return_type.clone());

        let body = self.check_block(function.body);
        let body_type = body.info.type_id.clone();

        if !return_type.accepts(&body_type) {
            let diagnostic = Diagnostic::error(
                ErrorCode::TypeError,
                format!(
                    "function '{}' returns '{body_type}' but is declared to return '{return_type}'",
                    function.name
                ),
                body.span.clone(),
            );
            self.diagnostics.push(diagnostic);
        }

        self.current_return = previous_return;
        self.scope.pop();

        let info = self
            .functions
            .get(&function.name)
            .map(|info| Type::Function(Box::new(info.type_id.clone())))
            .unwrap_or(Type::Unknown);

        FunctionDefinition {
            name: function.name,
            params: function.params,
            return_type: function.return_type,
            body,
            is_pub: function.is_pub,
            is_event: function.is_event,
            info: TypeInformation::new(info),
            span: function.span,
        }
    }

    fn check_block(&mut self, block: Block<()>) -> Block<TypeInformation> {
        self.scope.push();

        let mut statements = vec![];
        let mut diverged = false;
        let mut warned_unreachable = false;

        for statement in block.statements {
            if diverged && !warned_unreachable {
                self.warning("unreachable code", statement.span());
                warned_unreachable = true;
            }
            let (typed, diverges) = self.check_statement(statement);
            diverged = diverged || diverges;
            statements.push(typed);
        }

        let trailing = block.trailing.map(|expression| {
            if diverged && !warned_unreachable {
                self.warning("unreachable code", expression.span());
            }
            self.check_expression(expression)
        });

        let type_id = if diverged {
            Type::Never
        } else {
            trailing
                .as_ref()
                .map(|e| e.get_info().type_id)
                .unwrap_or(Type::Null)
        };

        self.scope.pop();

        Block {
            statements,
            trailing,
            info: TypeInformation::new(type_id),
            span: block.span,
        }
    }

    /// Check one statement; the second component reports whether the
    /// statement diverges (making following code unreachable).
    fn check_statement(&mut self, statement: Statement<()>) -> (Statement<TypeInformation>, bool) {
        match statement {
            Statement::Let(stmt) => {
                let typed = self.check_let_binding(stmt, false);
                let diverges = matches!(typed.value.get_info().type_id, Type::Never);
                (Statement::Let(typed), diverges)
            }
            Statement::Return(stmt) => {
                let value = stmt.value.map(|value| self.check_expression(value));
                let value_type = value
                    .as_ref()
                    .map(|v| v.get_info().type_id)
                    .unwrap_or(Type::Null);
                if !self.current_return.accepts(&value_type) {
                    self.error(
                        ErrorCode::TypeError,
                        format!(
                            "cannot return '{value_type}' from a function returning '{}'",
                            self.current_return
                        ),
                        stmt.span.clone(),
                    );
                }
                (
                    Statement::Return(ReturnStatement {
                        value,
                        span: stmt.span,
                    }),
                    true,
                )
            }
            Statement::Break(stmt) => {
                match self.loop_breaks.last_mut() {
                    Some(saw_break) => *saw_break = true,
                    None => self.error(
                        ErrorCode::TypeError,
                        "'break' outside of a loop",
                        stmt.span.clone(),
                    ),
                }
                (Statement::Break(stmt), true)
            }
            Statement::Continue(stmt) => {
                if self.loop_breaks.is_empty() {
                    self.error(
                        ErrorCode::TypeError,
                        "'continue' outside of a loop",
                        stmt.span.clone(),
                    );
                }
                (Statement::Continue(stmt), true)
            }
            Statement::Loop(stmt) => {
                self.loop_breaks.push(false);
                let body = self.check_block(stmt.body);
                let saw_break = self.loop_breaks.pop().unwrap_or(false);
                // a loop without a break can only be left by an interrupt
                (
                    Statement::Loop(LoopStatement {
                        body,
                        span: stmt.span,
                    }),
                    !saw_break,
                )
            }
            Statement::While(stmt) => {
                let condition = self.check_expression(stmt.condition);
                let condition_type = condition.get_info().type_id;
                if !Type::Bool.accepts(&condition_type) {
                    self.error(
                        ErrorCode::TypeError,
                        format!("a while condition must be 'bool', found '{condition_type}'"),
                        condition.span(),
                    );
                }
                self.loop_breaks.push(false);
                let body = self.check_block(stmt.body);
                self.loop_breaks.pop();
                (
                    Statement::While(WhileStatement {
                        condition,
                        body,
                        span: stmt.span,
                    }),
                    false,
                )
            }
            Statement::For(stmt) => {
                let iterable = self.check_expression(stmt.iterable);
                let iterable_type = iterable.get_info().type_id;
                if !iterable_type.is_iterable() {
                    self.error(
                        ErrorCode::TypeError,
                        format!("cannot iterate a value of type '{iterable_type}'"),
                        iterable.span(),
                    );
                }

                self.scope.push();
                self.declare_symbol(
                    &stmt.ident,
                    SymbolKind::Value,
                    iterable_type.element_type(),
                    stmt.span.clone(),
                );
                self.loop_breaks.push(false);
                let body = self.check_block(stmt.body);
                self.loop_breaks.pop();
                self.scope.pop();

                (
                    Statement::For(ForStatement {
                        ident: stmt.ident,
                        iterable,
                        body,
                        span: stmt.span,
                    }),
                    false,
                )
            }
            Statement::Trigger(stmt) => {
                let typed = self.check_trigger(stmt);
                (Statement::Trigger(typed), false)
            }
            Statement::Expression(stmt) => {
                let expression = self.check_expression(stmt.expression);
                let diverges = matches!(expression.get_info().type_id, Type::Never);
                (
                    Statement::Expression(ExpressionStatement {
                        expression,
                        span: stmt.span,
                    }),
                    diverges,
                )
            }
        }
    }

    fn check_let_binding(
        &mut self,
        stmt: LetStatement<()>,
        is_global: bool,
    ) -> LetStatement<TypeInformation> {
        let value = self.check_expression(stmt.value);
        let value_type = value.get_info().type_id;

        let declared = match &stmt.type_name {
            Some(type_name) => {
                let annotated = self.resolve_type_name(type_name);
                if !annotated.accepts(&value_type) {
                    self.error(
                        ErrorCode::TypeError,
                        format!("cannot assign '{value_type}' to '{annotated}'"),
                        value.span(),
                    );
                }
                annotated
            }
            None => value_type,
        };

        if is_global {
            // refine the lazily typed global from pass 1
            self.globals.insert(stmt.ident.clone(), declared.clone());
            self.scope.redeclare(
                &stmt.ident,
                Symbol {
                    kind: SymbolKind::Value,
                    type_id: declared.clone(),
                    span: stmt.span.clone(),
                },
            );
        } else {
            self.declare_symbol(
                &stmt.ident,
                SymbolKind::Value,
                declared.clone(),
                stmt.span.clone(),
            );
        }

        LetStatement {
            ident: stmt.ident,
            type_name: stmt.type_name,
            value,
            info: TypeInformation::new(declared),
            span: stmt.span,
        }
    }

    fn check_trigger(&mut self, stmt: TriggerStatement<()>) -> TriggerStatement<TypeInformation> {
        match self.functions.get(&stmt.callee).cloned() {
            Some(info) if !info.is_event => {
                self.error(
                    ErrorCode::TypeError,
                    format!("'{}' must be an 'event' function to be triggered", stmt.callee),
                    stmt.callee_span.clone(),
                );
            }
            Some(_) => {}
            None => {
                self.error(
                    ErrorCode::ReferenceError,
                    format!("unknown function '{}'", stmt.callee),
                    stmt.callee_span.clone(),
                );
            }
        }

        let args: Vec<_> = stmt
            .args
            .into_iter()
            .map(|arg| self.check_expression(arg))
            .collect();

        if let Some(info) = self.functions.get(&stmt.callee).cloned() {
            self.check_arguments(&info.type_id.params, &args, &stmt.span);
        }

        let event = self.check_expression(stmt.event);
        let event_type = event.get_info().type_id;
        if !Type::String.accepts(&event_type) {
            self.error(
                ErrorCode::TypeError,
                format!("a trigger event must be 'str', found '{event_type}'"),
                event.span(),
            );
        }

        TriggerStatement {
            callee: stmt.callee,
            callee_span: stmt.callee_span,
            args,
            mode: stmt.mode,
            event,
            span: stmt.span,
        }
    }

    // ==================================================================
    // expressions
    // ==================================================================

    fn check_expression(&mut self, expression: Expression<()>) -> Expression<TypeInformation> {
        match expression {
            Expression::Int(node) => Expression::Int(IntLiteral {
                value: node.value,
                info: TypeInformation::new(Type::Int),
                span: node.span,
            }),
            Expression::Float(node) => Expression::Float(FloatLiteral {
                value: node.value,
                info: TypeInformation::new(Type::Float),
                span: node.span,
            }),
            Expression::Bool(node) => Expression::Bool(BoolLiteral {
                value: node.value,
                info: TypeInformation::new(Type::Bool),
                span: node.span,
            }),
            Expression::Str(node) => Expression::Str(StringLiteral {
                value: node.value,
                info: TypeInformation::new(Type::String),
                span: node.span,
            }),
            Expression::Null(node) => Expression::Null(NullLiteral {
                info: TypeInformation::new(Type::Null),
                span: node.span,
            }),
            Expression::NoneLiteral(node) => Expression::NoneLiteral(NoneLiteral {
                info: TypeInformation::new(Type::Option(Box::new(Type::Never))),
                span: node.span,
            }),
            Expression::Range(node) => self.check_range(*node),
            Expression::List(node) => self.check_list(node),
            Expression::Object(node) => self.check_object(node),
            Expression::FnLiteral(node) => self.check_fn_literal(*node),
            Expression::Ident(node) => self.check_ident(node),
            Expression::SingletonIdent(node) => self.check_singleton_ident(node),
            Expression::Grouped(node) => {
                let inner = self.check_expression(node.inner);
                let info = TypeInformation::new(inner.get_info().type_id);
                Expression::Grouped(Box::new(GroupedExpression {
                    inner,
                    info,
                    span: node.span,
                }))
            }
            Expression::Prefix(node) => self.check_prefix(*node),
            Expression::Infix(node) => self.check_infix(*node),
            Expression::Assign(node) => self.check_assign(*node),
            Expression::Call(node) => self.check_call(*node),
            Expression::Index(node) => self.check_index(*node),
            Expression::Member(node) => self.check_member(*node),
            Expression::Cast(node) => self.check_cast(*node),
            Expression::Block(node) => {
                let block = self.check_block(*node);
                Expression::Block(Box::new(block))
            }
            Expression::If(node) => self.check_if(*node),
            Expression::Match(node) => self.check_match(*node),
            Expression::Try(node) => self.check_try(*node),
        }
    }

    fn check_range(&mut self, node: RangeExpression<()>) -> Expression<TypeInformation> {
        let start = self.check_expression(node.start);
        let end = self.check_expression(node.end);

        for bound in [&start, &end] {
            let bound_type = bound.get_info().type_id;
            if !Type::Int.accepts(&bound_type) {
                self.error(
                    ErrorCode::TypeError,
                    format!("range bounds must be 'int', found '{bound_type}'"),
                    bound.span(),
                );
            }
        }

        Expression::Range(Box::new(RangeExpression {
            start,
            end,
            inclusive: node.inclusive,
            info: TypeInformation::new(Type::Range),
            span: node.span,
        }))
    }

    fn check_list(&mut self, node: ListLiteral<()>) -> Expression<TypeInformation> {
        let elements: Vec<_> = node
            .elements
            .into_iter()
            .map(|element| self.check_expression(element))
            .collect();

        // `[]` commits to no element type yet
        let mut element_type = if elements.is_empty() {
            Type::Unknown
        } else {
            Type::Never
        };
        for element in &elements {
            let current = element.get_info().type_id;
            match element_type.join(&current) {
                Some(joined) => element_type = joined,
                None => {
                    self.error(
                        ErrorCode::TypeError,
                        format!(
                            "list elements have incompatible types '{element_type}' and '{current}'"
                        ),
                        element.span(),
                    );
                    element_type = Type::Unknown;
                    break;
                }
            }
        }

        Expression::List(ListLiteral {
            elements,
            info: TypeInformation::new(Type::List(Box::new(element_type))),
            span: node.span,
        })
    }

    fn check_object(&mut self, node: ObjectLiteral<()>) -> Expression<TypeInformation> {
        let mut fields = vec![];
        let mut field_types = vec![];

        for field in node.fields {
            if field_types
                .iter()
                .any(|f: &ObjectField| f.name == field.name)
            {
                self.error(
                    ErrorCode::TypeError,
                    format!("duplicate object field '{}'", field.name),
                    field.span.clone(),
                );
            }
            let value = self.check_expression(field.value);
            field_types.push(ObjectField {
                name: field.name.clone(),
                type_id: value.get_info().type_id,
            });
            fields.push(ObjectLiteralField {
                name: field.name,
                value,
                span: field.span,
            });
        }

        Expression::Object(ObjectLiteral {
            fields,
            info: TypeInformation::new(Type::Object(field_types)),
            span: node.span,
        })
    }

    fn check_fn_literal(&mut self, node: FnLiteral<()>) -> Expression<TypeInformation> {
        self.scope.push();

        let mut params = vec![];
        for param in &node.params {
            if param.singleton_extractor.is_some() {
                self.error(
                    ErrorCode::TypeError,
                    "function literals cannot take singleton extractor parameters",
                    param.span.clone(),
                );
            }
            let type_id = match &param.type_name {
                Some(type_name) => self.resolve_type_name(type_name),
                None => {
                    self.error(
                        ErrorCode::TypeError,
                        format!("parameter '{}' needs a type annotation", param.name),
                        param.span.clone(),
                    );
                    Type::Unknown
                }
            };
            self.declare_symbol(
                &param.name,
                SymbolKind::Value,
                type_id.clone(),
                param.span.clone(),
            );
            params.push((param.name.clone(), type_id));
        }

        let return_type = match &node.return_type {
            Some(type_name) => self.resolve_type_name(type_name),
            None => Type::Null,
        };
        let previous_return = std::mem::replace(&mut self.current_return, return_type.clone());
        let previous_breaks = std::mem::take(&mut self.loop_breaks);

        let body = self.check_block(node.body);
        let body_type = body.info.type_id.clone();
        if !return_type.accepts(&body_type) {
            self.error(
                ErrorCode::TypeError,
                format!("function literal returns '{body_type}' but is declared to return '{return_type}'"),
                body.span.clone(),
            );
        }

        self.loop_breaks = previous_breaks;
        self.current_return = previous_return;
        self.scope.pop();

        let type_id = Type::Function(Box::new(FunctionType::new(params, return_type)));
        Expression::FnLiteral(Box::new(FnLiteral {
            params: node.params,
            return_type: node.return_type,
            body,
            info: TypeInformation::new(type_id),
            span: node.span,
        }))
    }

    fn check_ident(&mut self, node: IdentExpression<()>) -> Expression<TypeInformation> {
        let (type_id, is_global, is_function) = match self.scope.resolve_with_depth(&node.name) {
            Some((symbol, depth)) => {
                let is_function = symbol.kind == SymbolKind::Function;
                let is_global = depth == 0 && symbol.kind == SymbolKind::Value;
                (symbol.type_id.clone(), is_global, is_function)
            }
            None => {
                self.error(
                    ErrorCode::ReferenceError,
                    format!("use of undeclared identifier '{}'", node.name),
                    node.span.clone(),
                );
                (Type::Unknown, false, false)
            }
        };

        Expression::Ident(IdentExpression {
            name: node.name,
            is_global,
            is_function,
            info: TypeInformation::new(type_id),
            span: node.span,
        })
    }

    fn check_singleton_ident(
        &mut self,
        node: SingletonIdentExpression<()>,
    ) -> Expression<TypeInformation> {
        let type_id = if self.singletons.contains_key(&node.name) {
            Type::Singleton(node.name.clone())
        } else {
            self.error(
                ErrorCode::ReferenceError,
                format!("unknown singleton '${}'", node.name),
                node.span.clone(),
            );
            Type::Unknown
        };

        Expression::SingletonIdent(SingletonIdentExpression {
            name: node.name,
            info: TypeInformation::new(type_id),
            span: node.span,
        })
    }

    fn check_prefix(&mut self, node: PrefixExpression<()>) -> Expression<TypeInformation> {
        let operand = self.check_expression(node.operand);
        let operand_type = operand.get_info().type_id;

        let type_id = match node.operator {
            PrefixOperator::Neg => match operand_type {
                Type::Int | Type::Float | Type::Unknown => operand_type,
                other => {
                    self.error(
                        ErrorCode::TypeError,
                        format!("cannot negate a value of type '{other}'"),
                        operand.span(),
                    );
                    Type::Unknown
                }
            },
            PrefixOperator::Not => match operand_type {
                Type::Bool | Type::Unknown => Type::Bool,
                other => {
                    self.error(
                        ErrorCode::TypeError,
                        format!("'!' expects 'bool', found '{other}'"),
                        operand.span(),
                    );
                    Type::Unknown
                }
            },
            PrefixOperator::Some => Type::Option(Box::new(operand_type)),
        };

        Expression::Prefix(Box::new(PrefixExpression {
            operator: node.operator,
            operand,
            info: TypeInformation::new(type_id),
            span: node.span,
        }))
    }

    fn infix_result(
        &mut self,
        operator: InfixOperator,
        left: &Type,
        right: &Type,
        span: &Span,
    ) -> Type {
        use InfixOperator::*;

        if matches!(left, Type::Unknown | Type::Never) || matches!(right, Type::Unknown | Type::Never)
        {
            return match operator {
                Eq | NotEq | Lt | LtEq | Gt | GtEq | And | Or => Type::Bool,
                _ => Type::Unknown,
            };
        }

        let same = left.accepts(right) && right.accepts(left);

        match operator {
            Plus => {
                if same && matches!(left, Type::Int | Type::Float | Type::String) {
                    left.clone()
                } else {
                    self.operator_error(operator, left, right, span);
                    Type::Unknown
                }
            }
            Minus | Multiply | Divide | Remainder | Power => {
                if same && matches!(left, Type::Int | Type::Float) {
                    left.clone()
                } else {
                    self.operator_error(operator, left, right, span);
                    Type::Unknown
                }
            }
            Shl | Shr | BitAnd | BitOr | BitXor => {
                if same && matches!(left, Type::Int) {
                    Type::Int
                } else {
                    self.operator_error(operator, left, right, span);
                    Type::Unknown
                }
            }
            Lt | LtEq | Gt | GtEq => {
                if same && matches!(left, Type::Int | Type::Float | Type::String) {
                    Type::Bool
                } else {
                    self.operator_error(operator, left, right, span);
                    Type::Bool
                }
            }
            Eq | NotEq => {
                if left.accepts(right) || right.accepts(left) {
                    Type::Bool
                } else {
                    self.error(
                        ErrorCode::TypeError,
                        format!("cannot compare '{left}' with '{right}'"),
                        span.clone(),
                    );
                    Type::Bool
                }
            }
            And | Or => {
                if matches!(left, Type::Bool) && matches!(right, Type::Bool) {
                    Type::Bool
                } else {
                    self.operator_error(operator, left, right, span);
                    Type::Bool
                }
            }
        }
    }

    fn operator_error(&mut self, operator: InfixOperator, left: &Type, right: &Type, span: &Span) {
        self.error(
            ErrorCode::TypeError,
            format!(
                "operator '{}' is not defined for '{left}' and '{right}'",
                operator.symbol()
            ),
            span.clone(),
        );
    }

    fn check_infix(&mut self, node: InfixExpression<()>) -> Expression<TypeInformation> {
        let left = self.check_expression(node.left);
        let right = self.check_expression(node.right);

        let type_id = self.infix_result(
            node.operator,
            &left.get_info().type_id,
            &right.get_info().type_id,
            &node.span,
        );

        Expression::Infix(Box::new(InfixExpression {
            operator: node.operator,
            left,
            right,
            info: TypeInformation::new(type_id),
            span: node.span,
        }))
    }

    fn check_assign(&mut self, node: AssignExpression<()>) -> Expression<TypeInformation> {
        let place = self.check_expression(node.place);
        let value = self.check_expression(node.value);

        self.check_place(&place);

        let place_type = place.get_info().type_id;
        let value_type = value.get_info().type_id;

        match node.operator.infix() {
            None => {
                if !place_type.accepts(&value_type) {
                    self.error(
                        ErrorCode::TypeError,
                        format!("cannot assign '{value_type}' to '{place_type}'"),
                        value.span(),
                    );
                }
            }
            Some(operator) => {
                let result = self.infix_result(operator, &place_type, &value_type, &node.span);
                if !place_type.accepts(&result) {
                    self.error(
                        ErrorCode::TypeError,
                        format!("cannot assign '{result}' to '{place_type}'"),
                        node.span.clone(),
                    );
                }
            }
        }

        Expression::Assign(Box::new(AssignExpression {
            place,
            operator: node.operator,
            value,
            info: TypeInformation::new(Type::Null),
            span: node.span,
        }))
    }

    /// Validate that an expression is a legal assignment target and
    /// enforce the singleton mutation restriction.
    fn check_place(&mut self, place: &Expression<TypeInformation>) {
        match place {
            Expression::Ident(ident) => {
                if ident.is_function {
                    self.error(
                        ErrorCode::TypeError,
                        format!("cannot assign to function '{}'", ident.name),
                        ident.span.clone(),
                    );
                }
            }
            Expression::Index(_) => {}
            Expression::Member(member) => {
                let base_type = member.base.get_info().type_id;
                if let Type::Singleton(name) = base_type {
                    if self.current_impl.as_deref() != Some(name.as_str()) {
                        self.error(
                            ErrorCode::TypeError,
                            format!(
                                "fields of '${name}' may only be assigned inside its impl blocks"
                            ),
                            member.span.clone(),
                        );
                    }
                }
            }
            Expression::Grouped(grouped) => self.check_place(&grouped.inner),
            Expression::SingletonIdent(singleton) => {
                self.error(
                    ErrorCode::TypeError,
                    format!(
                        "cannot reassign singleton '${}'; mutate it through impl methods",
                        singleton.name
                    ),
                    singleton.span.clone(),
                );
            }
            other => {
                self.error(
                    ErrorCode::TypeError,
                    "invalid assignment target",
                    other.span(),
                );
            }
        }
    }

    fn check_arguments(
        &mut self,
        params: &Params,
        args: &[Expression<TypeInformation>],
        span: &Span,
    ) {
        match params {
            Params::Normal(params) => {
                if params.len() != args.len() {
                    self.error(
                        ErrorCode::TypeError,
                        format!(
                            "expected {} argument(s), got {}",
                            params.len(),
                            args.len()
                        ),
                        span.clone(),
                    );
                    return;
                }
                for ((name, param_type), arg) in params.iter().zip(args.iter()) {
                    let arg_type = arg.get_info().type_id;
                    if !param_type.accepts(&arg_type) {
                        self.error(
                            ErrorCode::TypeError,
                            format!(
                                "argument '{name}' expects '{param_type}', found '{arg_type}'"
                            ),
                            arg.span(),
                        );
                    }
                }
            }
            Params::VarArgs(element) => {
                for arg in args {
                    let arg_type = arg.get_info().type_id;
                    if !element.accepts(&arg_type) {
                        self.error(
                            ErrorCode::TypeError,
                            format!("argument expects '{element}', found '{arg_type}'"),
                            arg.span(),
                        );
                    }
                }
            }
        }
    }

    fn check_call(&mut self, node: CallExpression<()>) -> Expression<TypeInformation> {
        let callee = self.check_expression(node.callee);
        let args: Vec<_> = node
            .args
            .into_iter()
            .map(|arg| self.check_expression(arg))
            .collect();

        let callee_type = callee.get_info().type_id;
        let is_normal_function =
            matches!(&callee, Expression::Ident(ident) if ident.is_function);

        let return_type = match &callee_type {
            Type::Function(function) => {
                self.check_arguments(&function.params, &args, &node.span);
                function.return_type.clone()
            }
            Type::Unknown => Type::Unknown,
            Type::Any => Type::Any,
            other => {
                self.error(
                    ErrorCode::TypeError,
                    format!("a value of type '{other}' is not callable"),
                    callee.span(),
                );
                Type::Unknown
            }
        };

        let type_id = if node.is_spawn {
            if !matches!(callee_type, Type::Function(_) | Type::Unknown) {
                self.error(
                    ErrorCode::TypeError,
                    "'spawn' requires a function call",
                    node.span.clone(),
                );
            }
            Type::Null
        } else {
            return_type
        };

        Expression::Call(Box::new(CallExpression {
            callee,
            args,
            is_spawn: node.is_spawn,
            is_normal_function,
            info: TypeInformation::new(type_id),
            span: node.span,
        }))
    }

    fn check_index(&mut self, node: IndexExpression<()>) -> Expression<TypeInformation> {
        let base = self.check_expression(node.base);
        let index = self.check_expression(node.index);

        let base_type = base.get_info().type_id;
        let index_type = index.get_info().type_id;

        let type_id = match &base_type {
            Type::List(element) => {
                if !Type::Int.accepts(&index_type) {
                    self.error(
                        ErrorCode::TypeError,
                        format!("list indices must be 'int', found '{index_type}'"),
                        index.span(),
                    );
                }
                (**element).clone()
            }
            Type::String => {
                if !Type::Int.accepts(&index_type) {
                    self.error(
                        ErrorCode::TypeError,
                        format!("string indices must be 'int', found '{index_type}'"),
                        index.span(),
                    );
                }
                Type::String
            }
            Type::AnyObject => {
                if !Type::String.accepts(&index_type) {
                    self.error(
                        ErrorCode::TypeError,
                        format!("'{{ ? }}' keys must be 'str', found '{index_type}'"),
                        index.span(),
                    );
                }
                Type::Any
            }
            Type::Unknown => Type::Unknown,
            other => {
                self.error(
                    ErrorCode::TypeError,
                    format!("a value of type '{other}' cannot be indexed"),
                    base.span(),
                );
                Type::Unknown
            }
        };

        Expression::Index(Box::new(IndexExpression {
            base,
            index,
            info: TypeInformation::new(type_id),
            span: node.span,
        }))
    }

    fn check_member(&mut self, node: MemberExpression<()>) -> Expression<TypeInformation> {
        let base = self.check_expression(node.base);
        let base_type = base.get_info().type_id;

        let type_id = self.member_type(&base_type, &node.member, &node.member_span);

        Expression::Member(Box::new(MemberExpression {
            base,
            member: node.member,
            member_span: node.member_span,
            info: TypeInformation::new(type_id),
            span: node.span,
        }))
    }

    fn member_type(&mut self, base_type: &Type, member: &str, span: &Span) -> Type {
        match base_type {
            Type::Unknown => Type::Unknown,
            Type::Any => {
                self.error(
                    ErrorCode::TypeError,
                    "cast 'any' to a concrete type before accessing members",
                    span.clone(),
                );
                Type::Unknown
            }
            Type::Singleton(name) => {
                if let Some(info) = self.singletons.get(name) {
                    if let Some(method) = info.methods.get(member) {
                        return Type::Function(Box::new(method.clone()));
                    }
                    let underlying = info.type_id.clone();
                    return self.member_type(&underlying, member, span);
                }
                Type::Unknown
            }
            Type::Object(fields) => {
                if let Some(field) = fields.iter().find(|field| field.name == member) {
                    return field.type_id.clone();
                }
                if let Some(type_id) = builtin_member_type(base_type, member) {
                    return type_id;
                }
                let available = fields
                    .iter()
                    .map(|field| field.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                let diagnostic = Diagnostic::error(
                    ErrorCode::TypeError,
                    format!("object has no field or method '{member}'"),
                    span.clone(),
                )
                .with_note(format!("available fields: {available}"));
                self.diagnostics.push(diagnostic);
                Type::Unknown
            }
            other => {
                if let Type::List(element) = other {
                    if member == "sort" && !sortable_element(element) {
                        self.error(
                            ErrorCode::TypeError,
                            format!("'sort' is not defined for elements of type '{element}'"),
                            span.clone(),
                        );
                        return Type::Unknown;
                    }
                }
                match builtin_member_type(other, member) {
                    Some(type_id) => type_id,
                    None => {
                        self.error(
                            ErrorCode::TypeError,
                            format!("a value of type '{other}' has no member '{member}'"),
                            span.clone(),
                        );
                        Type::Unknown
                    }
                }
            }
        }
    }

    fn check_cast(&mut self, node: CastExpression<()>) -> Expression<TypeInformation> {
        let base = self.check_expression(node.base);
        let target = self.resolve_type_name(&node.type_name);
        let base_type = base.get_info().type_id;

        if !base_type.castable_to(&target) {
            self.error(
                ErrorCode::TypeError,
                format!("cannot cast '{base_type}' to '{target}'"),
                node.span.clone(),
            );
        }

        Expression::Cast(Box::new(CastExpression {
            base,
            type_name: node.type_name,
            info: TypeInformation::new(target),
            span: node.span,
        }))
    }

    fn check_if(&mut self, node: IfExpression<()>) -> Expression<TypeInformation> {
        let condition = self.check_expression(node.condition);
        let condition_type = condition.get_info().type_id;
        if !Type::Bool.accepts(&condition_type) {
            self.error(
                ErrorCode::TypeError,
                format!("an if condition must be 'bool', found '{condition_type}'"),
                condition.span(),
            );
        }

        let then_block = self.check_block(node.then_block);
        let then_type = then_block.info.type_id.clone();

        let (else_branch, type_id) = match node.else_branch {
            Some(else_branch) => {
                let else_branch = self.check_expression(else_branch);
                let else_type = else_branch.get_info().type_id;
                let joined = match then_type.join(&else_type) {
                    Some(joined) => joined,
                    None => {
                        self.error(
                            ErrorCode::TypeError,
                            format!(
                                "if and else branches have incompatible types '{then_type}' and '{else_type}'"
                            ),
                            node.span.clone(),
                        );
                        Type::Unknown
                    }
                };
                (Some(else_branch), joined)
            }
            None => {
                if !matches!(then_type, Type::Null | Type::Never | Type::Unknown) {
                    self.hint(
                        "the if branch produces a value but there is no else branch",
                        node.span.clone(),
                    );
                }
                (None, Type::Null)
            }
        };

        Expression::If(Box::new(IfExpression {
            condition,
            then_block,
            else_branch,
            info: TypeInformation::new(type_id),
            span: node.span,
        }))
    }

    fn check_match(&mut self, node: MatchExpression<()>) -> Expression<TypeInformation> {
        let control = self.check_expression(node.control);
        let control_type = control.get_info().type_id;

        let mut arms = vec![];
        let mut result_type = Type::Never;
        let mut has_wildcard = false;
        let mut bool_cases = (false, false);

        for arm in node.arms {
            let pattern = match arm.pattern {
                MatchPattern::Wildcard(span) => {
                    has_wildcard = true;
                    MatchPattern::Wildcard(span)
                }
                MatchPattern::Literal(literal) => {
                    let literal = self.check_expression(literal);
                    let literal_type = literal.get_info().type_id;
                    if !control_type.accepts(&literal_type) && !literal_type.accepts(&control_type)
                    {
                        self.error(
                            ErrorCode::TypeError,
                            format!(
                                "match arm pattern of type '{literal_type}' is incompatible with '{control_type}'"
                            ),
                            literal.span(),
                        );
                    }
                    if let Expression::Bool(b) = &literal {
                        if b.value {
                            bool_cases.0 = true;
                        } else {
                            bool_cases.1 = true;
                        }
                    }
                    MatchPattern::Literal(literal)
                }
            };

            let body = self.check_expression(arm.body);
            let body_type = body.get_info().type_id;
            match result_type.join(&body_type) {
                Some(joined) => result_type = joined,
                None => {
                    self.error(
                        ErrorCode::TypeError,
                        format!(
                            "match arms have incompatible types '{result_type}' and '{body_type}'"
                        ),
                        body.span(),
                    );
                    result_type = Type::Unknown;
                }
            }

            arms.push(MatchArm {
                pattern,
                body,
                span: arm.span,
            });
        }

        let exhaustive = has_wildcard
            || (matches!(control_type, Type::Bool) && bool_cases.0 && bool_cases.1);

        if arms.is_empty() {
            result_type = Type::Null;
        } else if !exhaustive {
            if !matches!(result_type, Type::Null | Type::Never | Type::Unknown) {
                self.error(
                    ErrorCode::TypeError,
                    "match used as an expression must be exhaustive; add a '_' arm",
                    node.span.clone(),
                );
            }
            // a partial match may fall through without a value
            result_type = match result_type {
                Type::Never => Type::Null,
                other => other,
            };
        }

        Expression::Match(Box::new(MatchExpression {
            control,
            arms,
            info: TypeInformation::new(result_type),
            span: node.span,
        }))
    }

    fn check_try(&mut self, node: TryExpression<()>) -> Expression<TypeInformation> {
        let try_block = self.check_block(node.try_block);
        let try_type = try_block.info.type_id.clone();

        self.scope.push();
        self.declare_symbol(
            &node.catch_ident,
            SymbolKind::Value,
            Type::Object(vec![
                ObjectField {
                    name: "message".to_string(),
                    type_id: Type::String,
                },
                ObjectField {
                    name: "line".to_string(),
                    type_id: Type::Int,
                },
                ObjectField {
                    name: "column".to_string(),
                    type_id: Type::Int,
                },
                ObjectField {
                    name: "filename".to_string(),
                    type_id: Type::String,
                },
            ]),
            node.span.clone(),
        );
        let catch_block = self.check_block(node.catch_block);
        self.scope.pop();

        let catch_type = catch_block.info.type_id.clone();
        let type_id = match try_type.join(&catch_type) {
            Some(joined) => joined,
            None => {
                self.error(
                    ErrorCode::TypeError,
                    format!(
                        "try and catch blocks have incompatible types '{try_type}' and '{catch_type}'"
                    ),
                    node.span.clone(),
                );
                Type::Unknown
            }
        };

        Expression::Try(Box::new(TryExpression {
            try_block,
            catch_ident: node.catch_ident,
            catch_block,
            info: TypeInformation::new(type_id),
            span: node.span,
        }))
    }

    // ==================================================================
    // type names
    // ==================================================================

    fn resolve_type_name(&mut self, type_name: &TypeName) -> Type {
        match type_name {
            TypeName::Literal(name, span) => match name.as_str() {
                "int" => Type::Int,
                "float" => Type::Float,
                "bool" => Type::Bool,
                "str" => Type::String,
                "range" => Type::Range,
                "null" => Type::Null,
                "any" => Type::Any,
                "never" => Type::Never,
                other => match self.types_table.get(other) {
                    Some(type_id) => type_id.clone(),
                    None => {
                        self.error(
                            ErrorCode::TypeError,
                            format!("undefined type '{other}'"),
                            span.clone(),
                        );
                        Type::Unknown
                    }
                },
            },
            TypeName::List(inner, _) => Type::List(Box::new(self.resolve_type_name(inner))),
            TypeName::Object(fields, span) => {
                let mut resolved = vec![];
                for field in fields {
                    if resolved.iter().any(|f: &ObjectField| f.name == field.name) {
                        self.error(
                            ErrorCode::TypeError,
                            format!("duplicate object field '{}'", field.name),
                            span.clone(),
                        );
                        continue;
                    }
                    resolved.push(ObjectField {
                        name: field.name.clone(),
                        type_id: self.resolve_type_name(&field.type_name),
                    });
                }
                Type::Object(resolved)
            }
            TypeName::AnyObject(_) => Type::AnyObject,
            TypeName::Option(inner, _) => Type::Option(Box::new(self.resolve_type_name(inner))),
            TypeName::Function {
                params,
                variadic,
                return_type,
                ..
            } => {
                let return_type = return_type
                    .as_ref()
                    .map(|t| self.resolve_type_name(t))
                    .unwrap_or(Type::Null);
                match variadic {
                    Some(variadic) => {
                        let element = self.resolve_type_name(variadic);
                        Type::Function(Box::new(FunctionType::var_args(element, return_type)))
                    }
                    None => {
                        let params = params
                            .iter()
                            .enumerate()
                            .map(|(i, p)| (format!("arg{i}"), self.resolve_type_name(p)))
                            .collect();
                        Type::Function(Box::new(FunctionType::new(params, return_type)))
                    }
                }
            }
            TypeName::Singleton(name, span) => {
                if self.singletons.contains_key(name) {
                    Type::Singleton(name.clone())
                } else {
                    self.error(
                        ErrorCode::TypeError,
                        format!("unknown singleton '${name}'"),
                        span.clone(),
                    );
                    Type::Unknown
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TestExecutor;
    use crate::parser::parse_module;

    fn analyze_source(source: &str) -> AnalyzedProgram {
        let executor = TestExecutor::default();
        let (program, diagnostics) = parse_module("main", "main.hms", source);
        assert!(diagnostics.is_empty(), "parse errors: {diagnostics:#?}");
        analyze(vec![("main".to_string(), program)], "main", &executor)
    }

    fn errors(program: &AnalyzedProgram) -> Vec<String> {
        program
            .diagnostics
            .iter()
            .filter(|d| d.level == crate::diagnostic::Level::Error)
            .map(|d| d.message.clone())
            .collect()
    }

    #[test]
    fn test_well_typed_program() {
        let program = analyze_source(
            "fn main() {\n\
                 let xs = [1, 2, 3];\n\
                 xs.push(4);\n\
                 println(xs.len());\n\
             }",
        );
        assert!(errors(&program).is_empty(), "{:#?}", program.diagnostics);
    }

    #[test]
    fn test_type_mismatch_in_let() {
        let program = analyze_source("fn main() { let x: int = \"oops\"; }");
        assert!(errors(&program)
            .iter()
            .any(|m| m.contains("cannot assign 'str' to 'int'")));
    }

    #[test]
    fn test_undeclared_identifier() {
        let program = analyze_source("fn main() { println(missing); }");
        assert!(errors(&program)
            .iter()
            .any(|m| m.contains("undeclared identifier 'missing'")));
    }

    #[test]
    fn test_shadowing_is_a_hint_across_scopes() {
        let program = analyze_source(
            "fn main() { let x = 1; { let x = 2; println(x); } }",
        );
        assert!(errors(&program).is_empty());
        assert!(program
            .diagnostics
            .iter()
            .any(|d| d.level == crate::diagnostic::Level::Hint
                && d.message.contains("shadows")));
    }

    #[test]
    fn test_duplicate_in_same_scope_is_an_error() {
        let program = analyze_source("fn main() { let x = 1; let x = 2; }");
        assert!(errors(&program)
            .iter()
            .any(|m| m.contains("already declared")));
    }

    #[test]
    fn test_break_outside_loop() {
        let program = analyze_source("fn main() { break; }");
        assert!(errors(&program)
            .iter()
            .any(|m| m.contains("'break' outside of a loop")));
    }

    #[test]
    fn test_match_exhaustiveness() {
        let program = analyze_source(
            "fn main() { let x = match 2 { 1 => \"a\", 2 => \"b\" }; println(x); }",
        );
        assert!(errors(&program).iter().any(|m| m.contains("exhaustive")));

        let ok = analyze_source(
            "fn main() { let x = match 2 { 1 => \"a\", _ => \"b\" }; println(x); }",
        );
        assert!(errors(&ok).is_empty(), "{:#?}", ok.diagnostics);
    }

    #[test]
    fn test_unreachable_code_is_a_warning() {
        let program = analyze_source("fn main() { return; println(1); }");
        assert!(errors(&program).is_empty());
        assert!(program
            .diagnostics
            .iter()
            .any(|d| d.level == crate::diagnostic::Level::Warning
                && d.message.contains("unreachable")));
    }

    #[test]
    fn test_singleton_member_assign_outside_impl() {
        let program = analyze_source(
            "let $Lamp: { brightness: int };\n\
             fn main() { $Lamp.brightness = 10; }",
        );
        assert!(errors(&program)
            .iter()
            .any(|m| m.contains("impl blocks")));
    }

    #[test]
    fn test_impl_block_against_template() {
        use crate::analyzer::types::FunctionType;
        use crate::host::TemplateSpec;

        let executor = TestExecutor::default().with_template(
            "host",
            "Power",
            TemplateSpec {
                base_methods: vec![(
                    "set_power".to_string(),
                    FunctionType::new(vec![("state".to_string(), Type::Bool)], Type::Null),
                )],
                capabilities: vec![],
            },
        );

        let source = "import { Power } from host;\n\
             let $Lamp: { on: bool };\n\
             impl Power for $Lamp {\n\
                 fn set_power(@Lamp lamp, state: bool) { lamp.on = state; }\n\
             }\n\
             fn main() { $Lamp.set_power(true); }";
        let (program, diagnostics) = parse_module("main", "main.hms", source);
        assert!(diagnostics.is_empty(), "{diagnostics:#?}");
        let analyzed = analyze(vec![("main".to_string(), program)], "main", &executor);
        assert!(errors(&analyzed).is_empty(), "{:#?}", analyzed.diagnostics);

        let module = &analyzed.modules["main"];
        assert_eq!(module.singletons["Lamp"].templates, vec!["Power".to_string()]);
        assert!(module.singletons["Lamp"].methods.contains_key("set_power"));
    }

    #[test]
    fn test_impl_block_missing_method() {
        use crate::analyzer::types::FunctionType;
        use crate::host::TemplateSpec;

        let executor = TestExecutor::default().with_template(
            "host",
            "Power",
            TemplateSpec {
                base_methods: vec![(
                    "set_power".to_string(),
                    FunctionType::new(vec![("state".to_string(), Type::Bool)], Type::Null),
                )],
                capabilities: vec![],
            },
        );

        let source = "import { Power } from host;\n\
             let $Lamp: { on: bool };\n\
             impl Power for $Lamp { }\n\
             fn main() { }";
        let (program, diagnostics) = parse_module("main", "main.hms", source);
        assert!(diagnostics.is_empty());
        let analyzed = analyze(vec![("main".to_string(), program)], "main", &executor);
        assert!(errors(&analyzed)
            .iter()
            .any(|m| m.contains("missing method 'set_power'")));
    }

    #[test]
    fn test_missing_main() {
        let program = analyze_source("fn helper() { }");
        assert!(errors(&program)
            .iter()
            .any(|m| m.contains("no 'main' function")));
    }

    #[test]
    fn test_global_may_not_bind_function_literal() {
        let program = analyze_source("let f = fn() { };\nfn main() { }");
        assert!(errors(&program)
            .iter()
            .any(|m| m.contains("may not bind a function literal")));
    }

    #[test]
    fn test_spawn_requires_function() {
        let program = analyze_source("fn worker() { }\nfn main() { spawn worker(); }");
        assert!(errors(&program).is_empty(), "{:#?}", program.diagnostics);
    }

    #[test]
    fn test_cast_rules() {
        let ok = analyze_source("fn main() { let x = 1 as float; println(x); }");
        assert!(errors(&ok).is_empty());

        let bad = analyze_source("fn main() { let x = \"s\" as int; println(x); }");
        assert!(errors(&bad).iter().any(|m| m.contains("cannot cast")));
    }

    #[test]
    fn test_deterministic_diagnostics_order() {
        let source = "fn main() { missing_a; missing_b; }";
        let first = analyze_source(source);
        let second = analyze_source(source);
        assert_eq!(first.diagnostics, second.diagnostics);
    }
}
