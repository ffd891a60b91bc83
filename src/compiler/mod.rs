//! # Bytecode Compiler
//!
//! Lowers the typed AST into per-function instruction lists for the VM.
//!
//! Functions, globals and singletons are addressed by qualified
//! `module::name` keys. Each module additionally gets a synthetic
//! `module::@init` function binding its imported symbols (the `Import`
//! instruction) and a `module::<global>@init` function per module global,
//! which the VM runs lazily on first access, mirroring the tree
//! interpreter's semantics.
//!
//! Locals are slot-indexed cells. Function literals are lifted into the
//! function table; free variables resolve through the stack of open
//! function contexts and become capture table entries, transitively for
//! nested literals.

pub mod instruction;

pub use instruction::{CompiledFunction, Instruction, ParamSpec, UnaryOp};

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use log::debug;

use crate::analyzer::types::Type;
use crate::analyzer::{AnalyzedModule, AnalyzedProgram, TypeInformation};
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::lexer::Span;
use crate::parser::ast::*;

#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub functions: IndexMap<String, Rc<CompiledFunction>>,
    pub strings: Vec<String>,
    /// Function key of the program entry point.
    pub entry: String,
    /// Module names in dependency order; their `@init` functions run in
    /// this order.
    pub init_order: Vec<String>,
    /// `(qualified key, value type, declaration span)` per singleton.
    pub singletons: Vec<(String, Type, Span)>,
}

pub fn compile(program: &AnalyzedProgram) -> Result<CompiledProgram, Diagnostic> {
    let mut compiler = Compiler {
        functions: IndexMap::new(),
        strings: vec![],
        string_index: HashMap::new(),
        ctxs: vec![],
        lambda_counter: 0,
        module: String::new(),
        module_functions: vec![],
        module_imports: vec![],
        module_singleton_methods: HashMap::new(),
    };

    let mut init_order = vec![];
    let mut singletons = vec![];

    for (name, module) in &program.modules {
        compiler.compile_module(module)?;
        init_order.push(name.clone());
        for (singleton, info) in &module.singletons {
            singletons.push((
                format!("{name}::${singleton}"),
                info.type_id.clone(),
                info.span.clone(),
            ));
        }
    }

    Ok(CompiledProgram {
        functions: compiler.functions,
        strings: compiler.strings,
        entry: format!("{}::main", program.entry),
        init_order,
        singletons,
    })
}

struct LoopCtx {
    continue_target: usize,
    break_jumps: Vec<usize>,
}

struct FnCtx {
    key: String,
    params: Vec<ParamSpec>,
    captured: Vec<(String, u32)>,
    scopes: Vec<HashMap<String, u32>>,
    next_slot: u32,
    code: Vec<Instruction>,
    spans: Vec<Span>,
    loops: Vec<LoopCtx>,
}

impl FnCtx {
    fn new(key: String) -> Self {
        Self {
            key,
            params: vec![],
            captured: vec![],
            scopes: vec![HashMap::new()],
            next_slot: 0,
            code: vec![],
            spans: vec![],
            loops: vec![],
        }
    }

    fn alloc_slot(&mut self, name: &str) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.scopes
            .last_mut()
            .expect("a function context always has a scope")
            .insert(name.to_string(), slot);
        slot
    }

    fn resolve(&self, name: &str) -> Option<u32> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }
}

struct Compiler {
    functions: IndexMap<String, Rc<CompiledFunction>>,
    strings: Vec<String>,
    string_index: HashMap<String, u32>,
    ctxs: Vec<FnCtx>,
    lambda_counter: usize,

    module: String,
    module_functions: Vec<String>,
    module_imports: Vec<String>,
    module_singleton_methods: HashMap<String, Vec<String>>,
}

impl Compiler {
    fn compile_module(&mut self, module: &AnalyzedModule) -> Result<(), Diagnostic> {
        debug!("compiling module '{}'", module.name);

        self.module = module.name.clone();
        self.module_functions = module.functions.keys().cloned().collect();
        self.module_imports = module
            .imports
            .iter()
            .flat_map(|import| import.symbols.iter().map(|s| s.name.clone()))
            .collect();
        self.module_singleton_methods = module
            .singletons
            .iter()
            .map(|(name, info)| (name.clone(), info.methods.keys().cloned().collect()))
            .collect();

        // synthetic @init binds imported symbols
        let init_key = format!("{}::@init", module.name);
        self.push_ctx(FnCtx::new(init_key.clone()));
        for import in &module.imports {
            for symbol in &import.symbols {
                if symbol.type_import {
                    continue;
                }
                self.emit(
                    Instruction::Import {
                        module: import.module.clone(),
                        symbol: symbol.name.clone(),
                        target: format!("{}::{}", module.name, symbol.name),
                    },
                    symbol.span.clone(),
                );
            }
        }
        self.emit(Instruction::ConstNull, module.program.span.clone());
        self.emit(Instruction::Return, module.program.span.clone());
        self.finish_ctx();

        for item in &module.program.items {
            match item {
                Item::Function(function) => {
                    let key = format!("{}::{}", module.name, function.name);
                    self.compile_function(function, key)?;
                }
                Item::Impl(impl_block) => {
                    for function in &impl_block.functions {
                        let key = format!(
                            "{}::${}::{}",
                            module.name, impl_block.singleton, function.name
                        );
                        self.compile_function(function, key)?;
                    }
                }
                Item::Global(global) => {
                    let key = format!("{}::{}@init", module.name, global.ident);
                    self.push_ctx(FnCtx::new(key));
                    self.compile_expression(&global.value)?;
                    self.emit(Instruction::Return, global.span.clone());
                    self.finish_ctx();
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn compile_function(
        &mut self,
        function: &FunctionDefinition<TypeInformation>,
        key: String,
    ) -> Result<(), Diagnostic> {
        let mut ctx = FnCtx::new(key);
        for param in &function.params {
            let slot = ctx.alloc_slot(&param.name);
            ctx.params.push(ParamSpec {
                name: param.name.clone(),
                slot,
                singleton: param
                    .singleton_extractor
                    .as_ref()
                    .map(|singleton| format!("{}::${singleton}", self.module)),
            });
        }
        self.push_ctx(ctx);
        self.compile_block(&function.body)?;
        self.emit(Instruction::Return, function.span.clone());
        self.finish_ctx();
        Ok(())
    }

    fn push_ctx(&mut self, ctx: FnCtx) {
        self.ctxs.push(ctx);
    }

    fn finish_ctx(&mut self) -> String {
        let ctx = self.ctxs.pop().expect("context stack is balanced");
        let key = ctx.key.clone();
        let function = CompiledFunction {
            key: key.clone(),
            module: self.module.clone(),
            params: ctx.params,
            captured: ctx.captured,
            n_slots: ctx.next_slot,
            code: ctx.code,
            spans: ctx.spans,
        };
        self.functions.insert(key.clone(), Rc::new(function));
        key
    }

    fn ctx(&mut self) -> &mut FnCtx {
        self.ctxs.last_mut().expect("context stack is non-empty")
    }

    fn emit(&mut self, instruction: Instruction, span: Span) -> usize {
        let ctx = self.ctx();
        ctx.code.push(instruction);
        ctx.spans.push(span);
        ctx.code.len() - 1
    }

    fn here(&mut self) -> usize {
        self.ctx().code.len()
    }

    fn patch_jump(&mut self, at: usize) {
        let target = self.here();
        let ctx = self.ctx();
        match &mut ctx.code[at] {
            Instruction::Jump(t)
            | Instruction::JumpIfFalse(t)
            | Instruction::JumpIfTrue(t)
            | Instruction::IterNext(t)
            | Instruction::PushHandler(t) => *t = target,
            other => unreachable!("patching a non-jump instruction {other:?}"),
        }
    }

    fn intern(&mut self, value: &str) -> u32 {
        if let Some(index) = self.string_index.get(value) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.string_index.insert(value.to_string(), index);
        index
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}::{name}", self.module)
    }

    /// Resolve a name to a local slot of the current context, adding
    /// transitive capture entries through enclosing function literals
    /// when necessary.
    fn resolve_or_capture(&mut self, name: &str) -> Option<u32> {
        if let Some(slot) = self.ctxs.last().and_then(|ctx| ctx.resolve(name)) {
            return Some(slot);
        }

        // search enclosing contexts, innermost first
        let mut found_level = None;
        for level in (0..self.ctxs.len().saturating_sub(1)).rev() {
            if self.ctxs[level].resolve(name).is_some() {
                found_level = Some(level);
                break;
            }
        }
        let found_level = found_level?;

        // thread the capture through every intermediate literal
        let mut slot = 0;
        for level in (found_level + 1)..self.ctxs.len() {
            let already = self.ctxs[level]
                .captured
                .iter()
                .find(|(captured, _)| captured == name)
                .map(|(_, slot)| *slot);
            slot = match already {
                Some(slot) => slot,
                None => {
                    let ctx = &mut self.ctxs[level];
                    let slot = ctx.next_slot;
                    ctx.next_slot += 1;
                    ctx.scopes[0].insert(name.to_string(), slot);
                    ctx.captured.push((name.to_string(), slot));
                    slot
                }
            };
        }
        Some(slot)
    }

    /// Whether a call to `name` targets the prelude (not shadowed by a
    /// local, a module function or an import).
    fn is_prelude_ref(&self, name: &str) -> bool {
        let locally_bound = self
            .ctxs
            .iter()
            .any(|ctx| ctx.resolve(name).is_some());
        !locally_bound
            && !self.module_functions.iter().any(|f| f == name)
            && !self.module_imports.iter().any(|i| i == name)
    }

    // ==================================================================
    // statements
    // ==================================================================

    fn compile_block(&mut self, block: &Block<TypeInformation>) -> Result<(), Diagnostic> {
        self.ctx().scopes.push(HashMap::new());

        for statement in &block.statements {
            self.compile_statement(statement)?;
        }

        match &block.trailing {
            Some(trailing) => self.compile_expression(trailing)?,
            None => {
                self.emit(Instruction::ConstNull, block.span.clone());
            }
        }

        self.ctx().scopes.pop();
        Ok(())
    }

    fn compile_statement(&mut self, statement: &Statement<TypeInformation>) -> Result<(), Diagnostic> {
        match statement {
            Statement::Let(stmt) => {
                self.compile_expression(&stmt.value)?;
                let slot = self.ctx().alloc_slot(&stmt.ident);
                self.emit(Instruction::StoreLocal(slot), stmt.span.clone());
            }
            Statement::Return(stmt) => {
                match &stmt.value {
                    Some(value) => self.compile_expression(value)?,
                    None => {
                        self.emit(Instruction::ConstNull, stmt.span.clone());
                    }
                }
                self.emit(Instruction::Return, stmt.span.clone());
            }
            Statement::Break(stmt) => {
                let jump = self.emit(Instruction::Jump(usize::MAX), stmt.span.clone());
                match self.ctx().loops.last_mut() {
                    Some(ctx) => ctx.break_jumps.push(jump),
                    None => {
                        return Err(Diagnostic::error(
                            ErrorCode::TypeError,
                            "'break' outside of a loop",
                            stmt.span.clone(),
                        ))
                    }
                }
            }
            Statement::Continue(stmt) => {
                let target = match self.ctx().loops.last() {
                    Some(ctx) => ctx.continue_target,
                    None => {
                        return Err(Diagnostic::error(
                            ErrorCode::TypeError,
                            "'continue' outside of a loop",
                            stmt.span.clone(),
                        ))
                    }
                };
                self.emit(Instruction::Jump(target), stmt.span.clone());
            }
            Statement::Loop(stmt) => {
                let start = self.here();
                self.ctx().loops.push(LoopCtx {
                    continue_target: start,
                    break_jumps: vec![],
                });
                self.compile_block(&stmt.body)?;
                self.emit(Instruction::Pop, stmt.span.clone());
                self.emit(Instruction::Jump(start), stmt.span.clone());
                let loop_ctx = self.ctx().loops.pop().expect("loop context is balanced");
                for jump in loop_ctx.break_jumps {
                    self.patch_jump(jump);
                }
            }
            Statement::While(stmt) => {
                let start = self.here();
                self.compile_expression(&stmt.condition)?;
                let exit = self.emit(Instruction::JumpIfFalse(usize::MAX), stmt.span.clone());
                self.ctx().loops.push(LoopCtx {
                    continue_target: start,
                    break_jumps: vec![],
                });
                self.compile_block(&stmt.body)?;
                self.emit(Instruction::Pop, stmt.span.clone());
                self.emit(Instruction::Jump(start), stmt.span.clone());
                let loop_ctx = self.ctx().loops.pop().expect("loop context is balanced");
                self.patch_jump(exit);
                for jump in loop_ctx.break_jumps {
                    self.patch_jump(jump);
                }
            }
            Statement::For(stmt) => {
                self.compile_expression(&stmt.iterable)?;
                self.emit(Instruction::Iter, stmt.span.clone());

                let next = self.here();
                let next_instr = self.emit(Instruction::IterNext(usize::MAX), stmt.span.clone());

                self.ctx().scopes.push(HashMap::new());
                let slot = self.ctx().alloc_slot(&stmt.ident);
                self.emit(Instruction::StoreLocal(slot), stmt.span.clone());

                self.ctx().loops.push(LoopCtx {
                    continue_target: next,
                    break_jumps: vec![],
                });
                self.compile_block(&stmt.body)?;
                self.emit(Instruction::Pop, stmt.span.clone());
                self.emit(Instruction::Jump(next), stmt.span.clone());

                let loop_ctx = self.ctx().loops.pop().expect("loop context is balanced");
                self.patch_jump(next_instr);
                for jump in loop_ctx.break_jumps {
                    self.patch_jump(jump);
                }
                self.ctx().scopes.pop();
                // the exhausted iterator is still on the stack
                self.emit(Instruction::Pop, stmt.span.clone());
            }
            Statement::Trigger(stmt) => {
                // evaluated for side effects only; dispatch is host business
                for arg in &stmt.args {
                    self.compile_expression(arg)?;
                    self.emit(Instruction::Pop, stmt.span.clone());
                }
                self.compile_expression(&stmt.event)?;
                self.emit(Instruction::Pop, stmt.span.clone());
            }
            Statement::Expression(stmt) => {
                self.compile_expression(&stmt.expression)?;
                self.emit(Instruction::Pop, stmt.span.clone());
            }
        }
        Ok(())
    }

    // ==================================================================
    // expressions
    // ==================================================================

    fn compile_expression(
        &mut self,
        expression: &Expression<TypeInformation>,
    ) -> Result<(), Diagnostic> {
        match expression {
            Expression::Int(node) => {
                self.emit(Instruction::ConstInt(node.value), node.span.clone());
            }
            Expression::Float(node) => {
                self.emit(Instruction::ConstFloat(node.value), node.span.clone());
            }
            Expression::Bool(node) => {
                self.emit(Instruction::ConstBool(node.value), node.span.clone());
            }
            Expression::Str(node) => {
                let index = self.intern(&node.value);
                self.emit(Instruction::ConstStr(index), node.span.clone());
            }
            Expression::Null(node) => {
                self.emit(Instruction::ConstNull, node.span.clone());
            }
            Expression::NoneLiteral(node) => {
                self.emit(Instruction::ConstNone, node.span.clone());
            }
            Expression::Range(node) => {
                self.compile_expression(&node.start)?;
                self.compile_expression(&node.end)?;
                self.emit(
                    Instruction::MakeRange {
                        inclusive: node.inclusive,
                    },
                    node.span.clone(),
                );
            }
            Expression::List(node) => {
                for element in &node.elements {
                    self.compile_expression(element)?;
                }
                self.emit(
                    Instruction::MakeList(node.elements.len() as u32),
                    node.span.clone(),
                );
            }
            Expression::Object(node) => {
                let mut names = vec![];
                for field in &node.fields {
                    self.compile_expression(&field.value)?;
                    names.push(field.name.clone());
                }
                self.emit(Instruction::MakeObject(names), node.span.clone());
            }
            Expression::FnLiteral(node) => self.compile_fn_literal(node)?,
            Expression::Ident(node) => self.compile_ident_read(node),
            Expression::SingletonIdent(node) => {
                let key = format!("{}::${}", self.module, node.name);
                self.emit(Instruction::LoadSingleton(key), node.span.clone());
            }
            Expression::Grouped(node) => self.compile_expression(&node.inner)?,
            Expression::Prefix(node) => {
                self.compile_expression(&node.operand)?;
                let op = match node.operator {
                    PrefixOperator::Neg => UnaryOp::Neg,
                    PrefixOperator::Not => UnaryOp::Not,
                    PrefixOperator::Some => {
                        self.emit(Instruction::MakeSome, node.span.clone());
                        return Ok(());
                    }
                };
                self.emit(Instruction::Unary(op), node.span.clone());
            }
            Expression::Infix(node) => self.compile_infix(node)?,
            Expression::Assign(node) => self.compile_assign(node)?,
            Expression::Call(node) => self.compile_call(node)?,
            Expression::Index(node) => {
                self.compile_expression(&node.base)?;
                self.compile_expression(&node.index)?;
                self.emit(Instruction::LoadIndex, node.span.clone());
            }
            Expression::Member(node) => self.compile_member(node)?,
            Expression::Cast(node) => {
                self.compile_expression(&node.base)?;
                self.emit(
                    Instruction::Cast(node.info.type_id.clone()),
                    node.span.clone(),
                );
            }
            Expression::Block(node) => self.compile_block(node)?,
            Expression::If(node) => {
                self.compile_expression(&node.condition)?;
                let els = self.emit(Instruction::JumpIfFalse(usize::MAX), node.span.clone());
                self.compile_block(&node.then_block)?;
                let end = self.emit(Instruction::Jump(usize::MAX), node.span.clone());
                self.patch_jump(els);
                match &node.else_branch {
                    Some(else_branch) => self.compile_expression(else_branch)?,
                    None => {
                        self.emit(Instruction::ConstNull, node.span.clone());
                    }
                }
                self.patch_jump(end);
            }
            Expression::Match(node) => self.compile_match(node)?,
            Expression::Try(node) => self.compile_try(node)?,
        }
        Ok(())
    }

    fn compile_ident_read(&mut self, node: &IdentExpression<TypeInformation>) {
        if let Some(slot) = self.resolve_or_capture(&node.name) {
            self.emit(Instruction::LoadLocal(slot), node.span.clone());
        } else {
            // module functions, globals, imports and the prelude all live
            // in the qualified global table
            let key = self.qualify(&node.name);
            self.emit(Instruction::LoadGlobal(key), node.span.clone());
        }
    }

    fn compile_fn_literal(
        &mut self,
        node: &FnLiteral<TypeInformation>,
    ) -> Result<(), Diagnostic> {
        let key = format!("{}::lambda@{}", self.module, self.lambda_counter);
        self.lambda_counter += 1;

        let mut ctx = FnCtx::new(key);
        for param in &node.params {
            let slot = ctx.alloc_slot(&param.name);
            ctx.params.push(ParamSpec {
                name: param.name.clone(),
                slot,
                singleton: None,
            });
        }
        self.push_ctx(ctx);
        self.compile_block(&node.body)?;
        self.emit(Instruction::Return, node.span.clone());
        let captured = self
            .ctxs
            .last()
            .expect("context was just pushed")
            .captured
            .clone();
        let key = self.finish_ctx();

        // resolve every captured name in the enclosing context; this may
        // cascade captures further out
        let mut captures = vec![];
        for (name, _) in &captured {
            match self.resolve_or_capture(name) {
                Some(slot) => captures.push((name.clone(), slot)),
                None => {
                    return Err(Diagnostic::error(
                        ErrorCode::ReferenceError,
                        format!("cannot capture '{name}' in a function literal"),
                        node.span.clone(),
                    ))
                }
            }
        }

        self.emit(
            Instruction::Closure {
                function: key,
                captures,
            },
            node.span.clone(),
        );
        Ok(())
    }

    fn compile_infix(&mut self, node: &InfixExpression<TypeInformation>) -> Result<(), Diagnostic> {
        // logical operators short-circuit
        match node.operator {
            InfixOperator::And => {
                self.compile_expression(&node.left)?;
                let short = self.emit(Instruction::JumpIfFalse(usize::MAX), node.span.clone());
                self.compile_expression(&node.right)?;
                let end = self.emit(Instruction::Jump(usize::MAX), node.span.clone());
                self.patch_jump(short);
                self.emit(Instruction::ConstBool(false), node.span.clone());
                self.patch_jump(end);
                return Ok(());
            }
            InfixOperator::Or => {
                self.compile_expression(&node.left)?;
                let short = self.emit(Instruction::JumpIfTrue(usize::MAX), node.span.clone());
                self.compile_expression(&node.right)?;
                let end = self.emit(Instruction::Jump(usize::MAX), node.span.clone());
                self.patch_jump(short);
                self.emit(Instruction::ConstBool(true), node.span.clone());
                self.patch_jump(end);
                return Ok(());
            }
            _ => {}
        }

        self.compile_expression(&node.left)?;
        self.compile_expression(&node.right)?;
        self.emit(Instruction::Binary(node.operator), node.span.clone());
        Ok(())
    }

    fn compile_assign(&mut self, node: &AssignExpression<TypeInformation>) -> Result<(), Diagnostic> {
        match node.operator.infix() {
            None => self.compile_expression(&node.value)?,
            Some(operator) => {
                // compound assignment reuses the infix evaluator
                self.compile_expression(&node.place)?;
                self.compile_expression(&node.value)?;
                self.emit(Instruction::Binary(operator), node.span.clone());
            }
        }

        self.compile_store(&node.place)?;
        // an assignment expression evaluates to null
        self.emit(Instruction::ConstNull, node.span.clone());
        Ok(())
    }

    /// Store the value at the stack top into a place. `StoreMember` and
    /// `StoreIndex` take their base (and index) above the value.
    fn compile_store(&mut self, place: &Expression<TypeInformation>) -> Result<(), Diagnostic> {
        match place {
            Expression::Ident(ident) => {
                if let Some(slot) = self.resolve_or_capture(&ident.name) {
                    self.emit(Instruction::StoreLocal(slot), ident.span.clone());
                } else {
                    let key = self.qualify(&ident.name);
                    self.emit(Instruction::StoreGlobal(key), ident.span.clone());
                }
            }
            Expression::Member(member) => {
                self.compile_expression(&member.base)?;
                self.emit(
                    Instruction::StoreMember(member.member.clone()),
                    member.span.clone(),
                );
            }
            Expression::Index(index) => {
                self.compile_expression(&index.base)?;
                self.compile_expression(&index.index)?;
                self.emit(Instruction::StoreIndex, index.span.clone());
            }
            Expression::Grouped(grouped) => self.compile_store(&grouped.inner)?,
            other => {
                return Err(Diagnostic::error(
                    ErrorCode::TypeError,
                    "invalid assignment target",
                    other.span(),
                ))
            }
        }
        Ok(())
    }

    fn compile_call(&mut self, node: &CallExpression<TypeInformation>) -> Result<(), Diagnostic> {
        // `throw(msg)` lowers to the dedicated instruction
        if let Expression::Ident(ident) = &node.callee {
            if ident.name == "throw"
                && ident.is_function
                && node.args.len() == 1
                && !node.is_spawn
                && self.is_prelude_ref("throw")
            {
                self.compile_expression(&node.args[0])?;
                self.emit(Instruction::Throw, node.span.clone());
                // unreachable, but keeps the expression's stack shape
                self.emit(Instruction::ConstNull, node.span.clone());
                return Ok(());
            }
        }

        self.compile_expression(&node.callee)?;
        for arg in &node.args {
            self.compile_expression(arg)?;
        }

        let instruction = if node.is_spawn {
            Instruction::Spawn(node.args.len() as u32)
        } else {
            Instruction::Call(node.args.len() as u32)
        };
        self.emit(instruction, node.span.clone());
        Ok(())
    }

    fn compile_member(&mut self, node: &MemberExpression<TypeInformation>) -> Result<(), Diagnostic> {
        // singleton method access resolves to the impl function
        if let Type::Singleton(singleton) = &node.base.get_info().type_id {
            let is_method = self
                .module_singleton_methods
                .get(singleton)
                .map(|methods| methods.iter().any(|m| m == &node.member))
                .unwrap_or(false);
            if is_method {
                self.compile_expression(&node.base)?;
                self.emit(Instruction::Pop, node.span.clone());
                self.emit(
                    Instruction::LoadFunction {
                        module: self.module.clone(),
                        name: format!("${singleton}::{}", node.member),
                    },
                    node.span.clone(),
                );
                return Ok(());
            }
        }

        self.compile_expression(&node.base)?;
        self.emit(Instruction::Member(node.member.clone()), node.member_span.clone());
        Ok(())
    }

    fn compile_match(&mut self, node: &MatchExpression<TypeInformation>) -> Result<(), Diagnostic> {
        self.compile_expression(&node.control)?;

        let mut end_jumps = vec![];
        let mut saw_wildcard = false;

        for arm in &node.arms {
            match &arm.pattern {
                MatchPattern::Wildcard(span) => {
                    saw_wildcard = true;
                    self.emit(Instruction::Pop, span.clone());
                    self.compile_expression(&arm.body)?;
                    end_jumps.push(self.emit(Instruction::Jump(usize::MAX), arm.span.clone()));
                    break;
                }
                MatchPattern::Literal(literal) => {
                    self.emit(Instruction::Dup, arm.span.clone());
                    self.compile_expression(literal)?;
                    self.emit(Instruction::Binary(InfixOperator::Eq), arm.span.clone());
                    let next = self.emit(Instruction::JumpIfFalse(usize::MAX), arm.span.clone());
                    self.emit(Instruction::Pop, arm.span.clone());
                    self.compile_expression(&arm.body)?;
                    end_jumps.push(self.emit(Instruction::Jump(usize::MAX), arm.span.clone()));
                    self.patch_jump(next);
                }
            }
        }

        if !saw_wildcard {
            // no arm matched: the match evaluates to null
            self.emit(Instruction::Pop, node.span.clone());
            self.emit(Instruction::ConstNull, node.span.clone());
        }

        for jump in end_jumps {
            self.patch_jump(jump);
        }
        Ok(())
    }

    fn compile_try(&mut self, node: &TryExpression<TypeInformation>) -> Result<(), Diagnostic> {
        let handler = self.emit(Instruction::PushHandler(usize::MAX), node.span.clone());
        self.compile_block(&node.try_block)?;
        self.emit(Instruction::PopHandler, node.span.clone());
        let end = self.emit(Instruction::Jump(usize::MAX), node.span.clone());

        // the unwinder leaves the catch object at the stack top
        self.patch_jump(handler);
        self.ctx().scopes.push(HashMap::new());
        let slot = self.ctx().alloc_slot(&node.catch_ident);
        self.emit(Instruction::StoreLocal(slot), node.span.clone());
        self.compile_block(&node.catch_block)?;
        self.ctx().scopes.pop();

        self.patch_jump(end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::host::TestExecutor;
    use crate::parser::parse_module;

    fn compile_source(source: &str) -> CompiledProgram {
        let executor = TestExecutor::default();
        let (program, diagnostics) = parse_module("main", "main.hms", source);
        assert!(diagnostics.is_empty(), "{diagnostics:#?}");
        let analyzed = analyze(vec![("main".to_string(), program)], "main", &executor);
        assert!(!analyzed.has_errors(), "{:#?}", analyzed.diagnostics);
        compile(&analyzed).expect("compilation failed")
    }

    #[test]
    fn test_compiles_entry_and_init() {
        let program = compile_source("fn main() { }");
        assert_eq!(program.entry, "main::main");
        assert!(program.functions.contains_key("main::@init"));
        assert!(program.functions.contains_key("main::main"));
    }

    #[test]
    fn test_while_loop_shape() {
        let program = compile_source("fn main() { let x = 0; while x < 5 { x = x + 1; } }");
        let main = &program.functions["main::main"];
        assert!(main
            .code
            .iter()
            .any(|i| matches!(i, Instruction::JumpIfFalse(_))));
        // the loop jumps backwards
        assert!(main.code.iter().enumerate().any(
            |(at, i)| matches!(i, Instruction::Jump(target) if *target < at)
        ));
    }

    #[test]
    fn test_global_initializer_is_lifted() {
        let program = compile_source("let counter = 1 + 2;\nfn main() { println(counter); }");
        assert!(program.functions.contains_key("main::counter@init"));
    }

    #[test]
    fn test_closure_captures_local() {
        let program = compile_source(
            "fn main() { let x = 1; let f = fn() -> int { x }; println(f()); }",
        );
        let main = &program.functions["main::main"];
        let closure = main
            .code
            .iter()
            .find_map(|i| match i {
                Instruction::Closure { function, captures } => Some((function, captures)),
                _ => None,
            })
            .expect("expected a closure instruction");
        assert_eq!(closure.1.len(), 1);
        assert_eq!(closure.1[0].0, "x");
        let lambda = &program.functions[closure.0.as_str()];
        assert_eq!(lambda.captured.len(), 1);
    }

    #[test]
    fn test_throw_lowers_to_instruction() {
        let program = compile_source("fn main() { throw(\"boom\"); }");
        let main = &program.functions["main::main"];
        assert!(main.code.iter().any(|i| matches!(i, Instruction::Throw)));
    }

    #[test]
    fn test_string_pool() {
        let program = compile_source("fn main() { println(\"a\", \"a\", \"b\"); }");
        assert_eq!(program.strings, vec!["a".to_string(), "b".to_string()]);
    }
}
