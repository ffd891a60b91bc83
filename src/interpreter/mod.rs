//! # Tree Interpreter
//!
//! Single threaded, cooperative execution directly over the typed AST.
//!
//! Control flow signals are interrupt values (see [`crate::interrupt`]):
//! every evaluation returns `ExecResult<Value>` and non-local flow
//! (`return`, `break`, `continue`, throws, `exit`, termination) travels
//! through the `Err` arm to its nearest legitimate handler. Only normal
//! throws are catchable by `try`/`catch`.
//!
//! State: per-module environments (prelude, imported bindings, function
//! values), lazily initialized module globals, host-loaded singleton
//! values, a scope chain of reference-counted frames (closures splice
//! their captured chain in place of the active one) and a call depth
//! counter bounded by `callstack_limit`. The cancellation context is
//! sampled before every statement and expression evaluation; a cancelled
//! context raises an uncatchable `terminate` interrupt.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace, warn};

use crate::analyzer::types::Type;
use crate::analyzer::{AnalyzedModule, AnalyzedProgram, TypeInformation};
use crate::diagnostic::ErrorCode;
use crate::host::{builtins, CancelContext, HostExecutor};
use crate::interrupt::{ExecResult, Interrupt};
use crate::lexer::Span;
use crate::parser::ast::*;
use crate::value::{
    cast::deep_cast, fields, BuiltinFunction, Closure, Env, Value, ValueIterator,
};

pub const DEFAULT_CALLSTACK_LIMIT: usize = 10_000;

#[derive(Debug, Clone)]
enum GlobalSlot {
    Uninit,
    Evaluating,
    Init(Value),
}

/// Per-module runtime state, created once at interpreter construction.
#[derive(Clone)]
struct ModuleState {
    env: Env,
    globals: Rc<RefCell<HashMap<String, GlobalSlot>>>,
    global_inits: Rc<HashMap<String, Rc<LetStatement<TypeInformation>>>>,
    singletons: Rc<HashMap<String, Value>>,
    functions: Rc<HashMap<String, Rc<FunctionDefinition<TypeInformation>>>>,
}

pub struct Interpreter<'a> {
    program: &'a AnalyzedProgram,
    executor: &'a dyn HostExecutor,
    cancel: CancelContext,
    callstack_limit: usize,
    depth: usize,

    modules: HashMap<String, ModuleState>,
    current_module: String,
    module_stack: Vec<String>,
    scopes: Vec<Env>,
}

impl<'a> Interpreter<'a> {
    /// Build the runtime: initialize every module's environment, bind
    /// imports and load singleton values from the host.
    pub fn new(
        program: &'a AnalyzedProgram,
        executor: &'a dyn HostExecutor,
        cancel: CancelContext,
        callstack_limit: usize,
    ) -> ExecResult<Self> {
        let mut interpreter = Self {
            program,
            executor,
            cancel,
            callstack_limit,
            depth: 0,
            modules: HashMap::new(),
            current_module: program.entry.clone(),
            module_stack: vec![],
            scopes: vec![],
        };

        for (name, module) in &program.modules {
            let state = interpreter.init_module(module)?;
            interpreter.modules.insert(name.clone(), state);
        }

        Ok(interpreter)
    }

    fn init_module(&mut self, module: &AnalyzedModule) -> ExecResult<ModuleState> {
        debug!("initializing module '{}'", module.name);

        let env: Env = Rc::new(RefCell::new(HashMap::new()));

        for (name, value) in builtins::prelude_values() {
            env.borrow_mut().insert(name.to_string(), value);
        }

        // imported bindings
        for import in &module.imports {
            let is_user_module = self.program.modules.contains_key(&import.module);
            for symbol in &import.symbols {
                if symbol.type_import {
                    continue;
                }
                let value = if is_user_module {
                    Value::Function {
                        module: import.module.clone(),
                        name: symbol.name.clone(),
                    }
                } else {
                    match self.executor.get_builtin_value(&import.module, &symbol.name) {
                        Some(value) => value,
                        None => {
                            return Err(Interrupt::fatal(
                                ErrorCode::HostError,
                                format!(
                                    "host provides no value for '{}::{}'",
                                    import.module, symbol.name
                                ),
                                symbol.span.clone(),
                            ))
                        }
                    }
                };
                env.borrow_mut().insert(symbol.name.clone(), value);
            }
        }

        // function values and the function table
        let mut functions = HashMap::new();
        let mut global_inits = HashMap::new();
        for item in &module.program.items {
            match item {
                Item::Function(function) => {
                    env.borrow_mut().insert(
                        function.name.clone(),
                        Value::Function {
                            module: module.name.clone(),
                            name: function.name.clone(),
                        },
                    );
                    functions.insert(function.name.clone(), Rc::new(function.clone()));
                }
                Item::Impl(impl_block) => {
                    for function in &impl_block.functions {
                        functions.insert(
                            format!("${}::{}", impl_block.singleton, function.name),
                            Rc::new(function.clone()),
                        );
                    }
                }
                Item::Global(global) => {
                    global_inits.insert(global.ident.clone(), Rc::new(global.clone()));
                }
                _ => {}
            }
        }

        // singletons are created once per module load and persist until
        // the runtime is destroyed
        let mut singletons = HashMap::new();
        for (name, info) in &module.singletons {
            let value = match self
                .executor
                .load_singleton(name, &info.type_id)
                .map_err(|err| {
                    Interrupt::fatal(
                        ErrorCode::HostError,
                        format!("failed to load singleton '${name}': {err}"),
                        info.span.clone(),
                    )
                })? {
                Some(value) => deep_cast(&value, &info.type_id, &info.span)?,
                None => Value::zero_value(&info.type_id),
            };
            singletons.insert(name.clone(), value);
        }

        let globals = module
            .globals
            .keys()
            .map(|name| (name.clone(), GlobalSlot::Uninit))
            .collect::<HashMap<_, _>>();

        Ok(ModuleState {
            env,
            globals: Rc::new(RefCell::new(globals)),
            global_inits: Rc::new(global_inits),
            singletons: Rc::new(singletons),
            functions: Rc::new(functions),
        })
    }

    fn state(&self) -> &ModuleState {
        self.modules
            .get(&self.current_module)
            .expect("current module is always initialized")
    }

    /// Run the entry module's `main` function to completion.
    pub fn run_main(&mut self) -> ExecResult<Value> {
        self.current_module = self.program.entry.clone();
        self.call_function(self.program.entry.clone(), "main".to_string(), vec![], &Span::default())
    }

    /// Call an event function by name; used by hosts dispatching events.
    pub fn run_event(&mut self, name: &str, args: Vec<Value>) -> ExecResult<Value> {
        self.current_module = self.program.entry.clone();
        self.call_function(self.program.entry.clone(), name.to_string(), args, &Span::default())
    }

    fn check_cancelled(&self, span: &Span) -> ExecResult<()> {
        if let Some(reason) = self.cancel.check() {
            return Err(Interrupt::Terminate {
                reason,
                span: span.clone(),
            });
        }
        Ok(())
    }

    // ==================================================================
    // calls
    // ==================================================================

    fn call_function(
        &mut self,
        module: String,
        name: String,
        args: Vec<Value>,
        span: &Span,
    ) -> ExecResult<Value> {
        if self.depth >= self.callstack_limit {
            return Err(Interrupt::fatal(
                ErrorCode::StackOverflow,
                format!("maximum call depth of {} exceeded", self.callstack_limit),
                span.clone(),
            ));
        }

        let state = self
            .modules
            .get(&module)
            .ok_or_else(|| {
                Interrupt::fatal(
                    ErrorCode::HostError,
                    format!("module '{module}' is not initialized"),
                    span.clone(),
                )
            })?
            .clone();
        let function = state.functions.get(&name).cloned().ok_or_else(|| {
            Interrupt::throw(
                ErrorCode::ReferenceError,
                format!("module '{module}' has no function '{name}'"),
                span.clone(),
            )
        })?;

        trace!("calling {module}::{name}");

        // bind parameters into a fresh frame
        let frame: Env = Rc::new(RefCell::new(HashMap::new()));
        let mut args = args.into_iter();
        for param in &function.params {
            match &param.singleton_extractor {
                Some(singleton) => {
                    let value = state.singletons.get(singleton).cloned().ok_or_else(|| {
                        Interrupt::fatal(
                            ErrorCode::HostError,
                            format!("singleton '${singleton}' is not loaded"),
                            param.span.clone(),
                        )
                    })?;
                    frame.borrow_mut().insert(param.name.clone(), value);
                }
                None => {
                    let value = args.next().unwrap_or(Value::Null);
                    frame.borrow_mut().insert(param.name.clone(), value);
                }
            }
        }

        // switch module context for the call's duration
        let previous_scopes = std::mem::replace(&mut self.scopes, vec![state.env.clone(), frame]);
        self.module_stack.push(self.current_module.clone());
        self.current_module = module;
        self.depth += 1;

        let result = self.block(&function.body, false);

        self.depth -= 1;
        self.current_module = self
            .module_stack
            .pop()
            .expect("module stack is balanced");
        self.scopes = previous_scopes;

        match result {
            Ok(value) => Ok(value),
            Err(Interrupt::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    fn call_closure(
        &mut self,
        closure: &Rc<Closure>,
        args: Vec<Value>,
        span: &Span,
    ) -> ExecResult<Value> {
        let Closure::Tree {
            literal,
            env,
            module,
        } = closure.as_ref()
        else {
            return Err(Interrupt::fatal(
                ErrorCode::HostError,
                "VM closure invoked by the tree interpreter",
                span.clone(),
            ));
        };

        if self.depth >= self.callstack_limit {
            return Err(Interrupt::fatal(
                ErrorCode::StackOverflow,
                format!("maximum call depth of {} exceeded", self.callstack_limit),
                span.clone(),
            ));
        }

        let frame: Env = Rc::new(RefCell::new(HashMap::new()));
        let mut args = args.into_iter();
        for param in &literal.params {
            let value = args.next().unwrap_or(Value::Null);
            frame.borrow_mut().insert(param.name.clone(), value);
        }

        // splice the captured chain in place of the active one
        let mut chain = env.clone();
        chain.push(frame);
        let previous_scopes = std::mem::replace(&mut self.scopes, chain);
        self.module_stack.push(self.current_module.clone());
        self.current_module = module.clone();
        self.depth += 1;

        let result = self.block(&literal.body, false);

        self.depth -= 1;
        self.current_module = self
            .module_stack
            .pop()
            .expect("module stack is balanced");
        self.scopes = previous_scopes;

        match result {
            Ok(value) => Ok(value),
            Err(Interrupt::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, span: &Span) -> ExecResult<Value> {
        match callee {
            Value::Function { module, name } => self.call_function(module, name, args, span),
            Value::Closure(closure) => self.call_closure(&closure, args, span),
            Value::Builtin(BuiltinFunction::Native(native)) => {
                builtins::call_native(native, args, span, self.executor, &self.cancel)
            }
            Value::Builtin(BuiltinFunction::Method { receiver, name }) => {
                fields::call_method(&receiver, &name, args, span)
            }
            Value::Builtin(BuiltinFunction::Host(host)) => (host.f)(args, span),
            other => Err(Interrupt::throw(
                ErrorCode::TypeError,
                format!("a value of type '{}' is not callable", other.kind()),
                span.clone(),
            )),
        }
    }

    // ==================================================================
    // globals
    // ==================================================================

    fn read_global(&mut self, name: &str, span: &Span) -> ExecResult<Value> {
        let state = self.state().clone();
        let slot = state.globals.borrow().get(name).cloned();

        match slot {
            Some(GlobalSlot::Init(value)) => Ok(value),
            Some(GlobalSlot::Evaluating) => Err(Interrupt::throw(
                ErrorCode::ValueError,
                format!("initializer of global '{name}' depends on itself"),
                span.clone(),
            )),
            Some(GlobalSlot::Uninit) => {
                let Some(init) = state.global_inits.get(name).cloned() else {
                    return Err(Interrupt::throw(
                        ErrorCode::ReferenceError,
                        format!("global '{name}' has no initializer"),
                        span.clone(),
                    ));
                };
                state
                    .globals
                    .borrow_mut()
                    .insert(name.to_string(), GlobalSlot::Evaluating);

                // globals are evaluated lazily, in module scope
                let previous_scopes =
                    std::mem::replace(&mut self.scopes, vec![state.env.clone()]);
                let result = self.expression(&init.value);
                self.scopes = previous_scopes;

                let value = result?;
                state
                    .globals
                    .borrow_mut()
                    .insert(name.to_string(), GlobalSlot::Init(value.clone()));
                Ok(value)
            }
            None => Err(Interrupt::throw(
                ErrorCode::ReferenceError,
                format!("unknown global '{name}'"),
                span.clone(),
            )),
        }
    }

    fn write_global(&mut self, name: &str, value: Value) {
        let state = self.state().clone();
        state
            .globals
            .borrow_mut()
            .insert(name.to_string(), GlobalSlot::Init(value));
    }

    // ==================================================================
    // statements
    // ==================================================================

    fn block(&mut self, block: &Block<TypeInformation>, own_frame: bool) -> ExecResult<Value> {
        if own_frame {
            self.scopes.push(Rc::new(RefCell::new(HashMap::new())));
        }

        let mut result = Ok(Value::Null);
        for statement in &block.statements {
            if let Err(interrupt) = self.statement(statement) {
                result = Err(interrupt);
                break;
            }
        }

        if result.is_ok() {
            if let Some(trailing) = &block.trailing {
                result = self.expression(trailing);
            }
        }

        if own_frame {
            self.scopes.pop();
        }
        result
    }

    fn statement(&mut self, statement: &Statement<TypeInformation>) -> ExecResult<()> {
        self.check_cancelled(&statement.span())?;

        match statement {
            Statement::Let(stmt) => {
                let value = self.expression(&stmt.value)?;
                self.scopes
                    .last()
                    .expect("a statement always runs inside a frame")
                    .borrow_mut()
                    .insert(stmt.ident.clone(), value);
                Ok(())
            }
            Statement::Return(stmt) => {
                let value = match &stmt.value {
                    Some(value) => self.expression(value)?,
                    None => Value::Null,
                };
                Err(Interrupt::Return(value))
            }
            Statement::Break(_) => Err(Interrupt::Break),
            Statement::Continue(_) => Err(Interrupt::Continue),
            Statement::Loop(stmt) => loop {
                self.check_cancelled(&stmt.span)?;
                match self.block(&stmt.body, true) {
                    Ok(_) | Err(Interrupt::Continue) => continue,
                    Err(Interrupt::Break) => return Ok(()),
                    Err(other) => return Err(other),
                }
            },
            Statement::While(stmt) => loop {
                self.check_cancelled(&stmt.span)?;
                let condition = self.expression(&stmt.condition)?;
                if !matches!(condition, Value::Bool(true)) {
                    return Ok(());
                }
                match self.block(&stmt.body, true) {
                    Ok(_) | Err(Interrupt::Continue) => continue,
                    Err(Interrupt::Break) => return Ok(()),
                    Err(other) => return Err(other),
                }
            },
            Statement::For(stmt) => {
                let iterable = self.expression(&stmt.iterable)?;
                let mut iterator = ValueIterator::new(&iterable, &stmt.span)?;
                loop {
                    self.check_cancelled(&stmt.span)?;
                    let Some(element) = iterator.next() else {
                        return Ok(());
                    };
                    let frame: Env = Rc::new(RefCell::new(HashMap::new()));
                    frame.borrow_mut().insert(stmt.ident.clone(), element);
                    self.scopes.push(frame);
                    let result = self.block(&stmt.body, false);
                    self.scopes.pop();
                    match result {
                        Ok(_) | Err(Interrupt::Continue) => continue,
                        Err(Interrupt::Break) => return Ok(()),
                        Err(other) => return Err(other),
                    }
                }
            }
            Statement::Trigger(stmt) => {
                // subscriptions are host business; the core only records
                // the parsed form
                debug!(
                    "trigger registration for '{}' (mode {:?}) reached the interpreter",
                    stmt.callee, stmt.mode
                );
                for arg in &stmt.args {
                    self.expression(arg)?;
                }
                self.expression(&stmt.event)?;
                Ok(())
            }
            Statement::Expression(stmt) => {
                self.expression(&stmt.expression)?;
                Ok(())
            }
        }
    }

    // ==================================================================
    // expressions
    // ==================================================================

    fn expression(&mut self, expression: &Expression<TypeInformation>) -> ExecResult<Value> {
        self.check_cancelled(&expression.span())?;

        match expression {
            Expression::Int(node) => Ok(Value::Int(node.value)),
            Expression::Float(node) => Ok(Value::Float(node.value)),
            Expression::Bool(node) => Ok(Value::Bool(node.value)),
            Expression::Str(node) => Ok(Value::String(node.value.clone())),
            Expression::Null(_) => Ok(Value::Null),
            Expression::NoneLiteral(_) => Ok(Value::none()),
            Expression::Range(node) => {
                let start = self.int_operand(&node.start)?;
                let end = self.int_operand(&node.end)?;
                Ok(Value::Range {
                    start,
                    end,
                    inclusive: node.inclusive,
                })
            }
            Expression::List(node) => {
                let mut elements = vec![];
                for element in &node.elements {
                    elements.push(self.expression(element)?);
                }
                Ok(Value::new_list(elements))
            }
            Expression::Object(node) => {
                let mut fields = vec![];
                for field in &node.fields {
                    fields.push((field.name.clone(), self.expression(&field.value)?));
                }
                Ok(Value::new_object(fields))
            }
            Expression::FnLiteral(node) => Ok(Value::Closure(Rc::new(Closure::Tree {
                literal: Rc::new((**node).clone()),
                env: self.scopes.clone(),
                module: self.current_module.clone(),
            }))),
            Expression::Ident(node) => self.read_ident(node),
            Expression::SingletonIdent(node) => {
                let state = self.state();
                state.singletons.get(&node.name).cloned().ok_or_else(|| {
                    Interrupt::fatal(
                        ErrorCode::HostError,
                        format!("singleton '${}' is not loaded", node.name),
                        node.span.clone(),
                    )
                })
            }
            Expression::Grouped(node) => self.expression(&node.inner),
            Expression::Prefix(node) => self.prefix(node),
            Expression::Infix(node) => self.infix(node),
            Expression::Assign(node) => self.assign(node),
            Expression::Call(node) => self.call(node),
            Expression::Index(node) => {
                let base = self.expression(&node.base)?;
                let index = self.expression(&node.index)?;
                index_read(&base, &index, &node.span)
            }
            Expression::Member(node) => self.member(node),
            Expression::Cast(node) => {
                let base = self.expression(&node.base)?;
                deep_cast(&base, &node.info.type_id, &node.span)
            }
            Expression::Block(node) => self.block(node, true),
            Expression::If(node) => {
                let condition = self.expression(&node.condition)?;
                if matches!(condition, Value::Bool(true)) {
                    self.block(&node.then_block, true)
                } else if let Some(else_branch) = &node.else_branch {
                    self.expression(else_branch)
                } else {
                    Ok(Value::Null)
                }
            }
            Expression::Match(node) => self.matched(node),
            Expression::Try(node) => self.try_catch(node),
        }
    }

    fn read_ident(&mut self, node: &IdentExpression<TypeInformation>) -> ExecResult<Value> {
        // imported host values are module-frame bindings, not globals, so
        // the slot table decides which path applies
        if node.is_global && self.state().globals.borrow().contains_key(&node.name) {
            return self.read_global(&node.name, &node.span);
        }

        for frame in self.scopes.iter().rev() {
            if let Some(value) = frame.borrow().get(&node.name) {
                return Ok(value.clone());
            }
        }

        Err(Interrupt::throw(
            ErrorCode::ReferenceError,
            format!("use of undeclared identifier '{}'", node.name),
            node.span.clone(),
        ))
    }

    fn int_operand(&mut self, expression: &Expression<TypeInformation>) -> ExecResult<i64> {
        match self.expression(expression)? {
            Value::Int(value) => Ok(value),
            other => Err(Interrupt::throw(
                ErrorCode::TypeError,
                format!("expected 'int', found '{}'", other.kind()),
                expression.span(),
            )),
        }
    }

    fn prefix(&mut self, node: &PrefixExpression<TypeInformation>) -> ExecResult<Value> {
        let operand = self.expression(&node.operand)?;
        match node.operator {
            PrefixOperator::Neg => match operand {
                Value::Int(value) => {
                    value.checked_neg().map(Value::Int).ok_or_else(|| {
                        Interrupt::throw(
                            ErrorCode::ValueError,
                            "integer overflow",
                            node.span.clone(),
                        )
                    })
                }
                Value::Float(value) => Ok(Value::Float(-value)),
                other => Err(Interrupt::throw(
                    ErrorCode::TypeError,
                    format!("cannot negate a value of type '{}'", other.kind()),
                    node.span.clone(),
                )),
            },
            PrefixOperator::Not => match operand {
                Value::Bool(value) => Ok(Value::Bool(!value)),
                other => Err(Interrupt::throw(
                    ErrorCode::TypeError,
                    format!("'!' expects 'bool', found '{}'", other.kind()),
                    node.span.clone(),
                )),
            },
            PrefixOperator::Some => Ok(Value::some(operand)),
        }
    }

    fn infix(&mut self, node: &InfixExpression<TypeInformation>) -> ExecResult<Value> {
        // logical operators short-circuit
        match node.operator {
            InfixOperator::And => {
                let left = self.expression(&node.left)?;
                if !matches!(left, Value::Bool(true)) {
                    return Ok(Value::Bool(false));
                }
                return self.expression(&node.right);
            }
            InfixOperator::Or => {
                let left = self.expression(&node.left)?;
                if matches!(left, Value::Bool(true)) {
                    return Ok(Value::Bool(true));
                }
                return self.expression(&node.right);
            }
            _ => {}
        }

        let left = self.expression(&node.left)?;
        let right = self.expression(&node.right)?;
        apply_infix(node.operator, left, right, &node.span)
    }

    fn assign(&mut self, node: &AssignExpression<TypeInformation>) -> ExecResult<Value> {
        let value = match node.operator.infix() {
            None => self.expression(&node.value)?,
            Some(operator) => {
                // compound assignment reuses the infix evaluator
                let current = self.expression(&node.place)?;
                let rhs = self.expression(&node.value)?;
                apply_infix(operator, current, rhs, &node.span)?
            }
        };

        self.write_place(&node.place, value)?;
        Ok(Value::Null)
    }

    fn write_place(
        &mut self,
        place: &Expression<TypeInformation>,
        value: Value,
    ) -> ExecResult<()> {
        match place {
            Expression::Ident(ident) => {
                if ident.is_global && self.state().globals.borrow().contains_key(&ident.name) {
                    self.write_global(&ident.name, value);
                    return Ok(());
                }
                for frame in self.scopes.iter().rev() {
                    let mut frame = frame.borrow_mut();
                    if frame.contains_key(&ident.name) {
                        frame.insert(ident.name.clone(), value);
                        return Ok(());
                    }
                }
                Err(Interrupt::throw(
                    ErrorCode::ReferenceError,
                    format!("assignment to undeclared identifier '{}'", ident.name),
                    ident.span.clone(),
                ))
            }
            Expression::Member(member) => {
                let base = self.expression(&member.base)?;
                match base {
                    Value::Object(map) | Value::AnyObject(map) => {
                        map.borrow_mut().insert(member.member.clone(), value);
                        Ok(())
                    }
                    other => Err(Interrupt::throw(
                        ErrorCode::TypeError,
                        format!(
                            "cannot assign to a field of a value of type '{}'",
                            other.kind()
                        ),
                        member.span.clone(),
                    )),
                }
            }
            Expression::Index(index) => {
                let base = self.expression(&index.base)?;
                let key = self.expression(&index.index)?;
                match (&base, &key) {
                    (Value::List(list), Value::Int(i)) => {
                        let mut list = list.borrow_mut();
                        let len = list.len();
                        let idx = normalize_index(*i, len).ok_or_else(|| {
                            Interrupt::throw(
                                ErrorCode::IndexOutOfBounds,
                                format!("index {i} is out of bounds for length {len}"),
                                index.span.clone(),
                            )
                        })?;
                        list[idx] = value;
                        Ok(())
                    }
                    (Value::AnyObject(map), Value::String(key)) => {
                        map.borrow_mut().insert(key.clone(), value);
                        Ok(())
                    }
                    (base, key) => Err(Interrupt::throw(
                        ErrorCode::TypeError,
                        format!(
                            "cannot index-assign '{}' with '{}'",
                            base.kind(),
                            key.kind()
                        ),
                        index.span.clone(),
                    )),
                }
            }
            Expression::Grouped(grouped) => self.write_place(&grouped.inner, value),
            other => Err(Interrupt::throw(
                ErrorCode::TypeError,
                "invalid assignment target",
                other.span(),
            )),
        }
    }

    fn call(&mut self, node: &CallExpression<TypeInformation>) -> ExecResult<Value> {
        let callee = self.expression(&node.callee)?;
        let mut args = vec![];
        for arg in &node.args {
            args.push(self.expression(arg)?);
        }

        if node.is_spawn {
            return self.spawn(callee, args, &node.span);
        }

        self.call_value(callee, args, &node.span)
    }

    /// `spawn f(...)`: run the call eagerly under a child cancellation
    /// scope. Uncaught throws in the child are demoted to log warnings;
    /// parent cancellation still wins.
    fn spawn(&mut self, callee: Value, args: Vec<Value>, span: &Span) -> ExecResult<Value> {
        let parent_cancel = self.cancel.clone();
        self.cancel = parent_cancel.child();

        let result = self.call_value(callee, args, span);

        self.cancel = parent_cancel;

        match result {
            Ok(_) => Ok(Value::Null),
            Err(Interrupt::Throw(error)) => {
                warn!("uncaught throw in spawned task: {error}");
                Ok(Value::Null)
            }
            Err(other) => Err(other),
        }
    }

    fn member(&mut self, node: &MemberExpression<TypeInformation>) -> ExecResult<Value> {
        let base = self.expression(&node.base)?;

        // singleton method dispatch goes through the impl function table
        if let Type::Singleton(singleton) = &node.base.get_info().type_id {
            let module = self
                .program
                .modules
                .get(&self.current_module)
                .expect("current module is analyzed");
            if let Some(info) = module.singletons.get(singleton) {
                if info.methods.contains_key(&node.member) {
                    return Ok(Value::Function {
                        module: self.current_module.clone(),
                        name: format!("${singleton}::{}", node.member),
                    });
                }
            }
        }

        fields::member(&base, &node.member).ok_or_else(|| {
            Interrupt::throw(
                ErrorCode::TypeError,
                format!(
                    "a value of type '{}' has no member '{}'",
                    base.kind(),
                    node.member
                ),
                node.member_span.clone(),
            )
        })
    }

    fn matched(&mut self, node: &MatchExpression<TypeInformation>) -> ExecResult<Value> {
        let control = self.expression(&node.control)?;

        for arm in &node.arms {
            let matches = match &arm.pattern {
                MatchPattern::Wildcard(_) => true,
                MatchPattern::Literal(literal) => {
                    let candidate = self.expression(literal)?;
                    control.is_equal(&candidate)
                }
            };
            if matches {
                return self.expression(&arm.body);
            }
        }

        Ok(Value::Null)
    }

    fn try_catch(&mut self, node: &TryExpression<TypeInformation>) -> ExecResult<Value> {
        match self.block(&node.try_block, true) {
            Ok(value) => Ok(value),
            // only normal exceptions are catchable
            Err(Interrupt::Throw(error)) => {
                let binding = Value::new_object(vec![
                    ("message".to_string(), Value::String(error.message.clone())),
                    (
                        "line".to_string(),
                        Value::Int(error.span.start.line as i64),
                    ),
                    (
                        "column".to_string(),
                        Value::Int(error.span.start.column as i64),
                    ),
                    (
                        "filename".to_string(),
                        Value::String(error.span.filename.clone()),
                    ),
                ]);

                let frame: Env = Rc::new(RefCell::new(HashMap::new()));
                frame
                    .borrow_mut()
                    .insert(node.catch_ident.clone(), binding);
                self.scopes.push(frame);
                let result = self.block(&node.catch_block, false);
                self.scopes.pop();
                result
            }
            Err(other) => Err(other),
        }
    }
}

pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    // negative indices count from the back
    let idx = if index < 0 {
        let from_back = index.unsigned_abs() as usize;
        len.checked_sub(from_back)?
    } else {
        index as usize
    };
    (idx < len).then_some(idx)
}

/// Index read shared by the tree interpreter and the VM.
pub(crate) fn index_read(base: &Value, index: &Value, span: &Span) -> ExecResult<Value> {
    match (base, index) {
        (Value::List(list), Value::Int(i)) => {
            let list = list.borrow();
            let idx = normalize_index(*i, list.len()).ok_or_else(|| {
                Interrupt::throw(
                    ErrorCode::IndexOutOfBounds,
                    format!("index {i} is out of bounds for length {}", list.len()),
                    span.clone(),
                )
            })?;
            Ok(list[idx].clone())
        }
        (Value::String(value), Value::Int(i)) => {
            let chars: Vec<char> = value.chars().collect();
            let idx = normalize_index(*i, chars.len()).ok_or_else(|| {
                Interrupt::throw(
                    ErrorCode::IndexOutOfBounds,
                    format!("index {i} is out of bounds for length {}", chars.len()),
                    span.clone(),
                )
            })?;
            Ok(Value::String(chars[idx].to_string()))
        }
        (Value::AnyObject(map), Value::String(key)) => {
            map.borrow().get(key).cloned().ok_or_else(|| {
                Interrupt::throw(
                    ErrorCode::IndexOutOfBounds,
                    format!("no key '{key}' in object"),
                    span.clone(),
                )
            })
        }
        (base, index) => Err(Interrupt::throw(
            ErrorCode::TypeError,
            format!("cannot index '{}' with '{}'", base.kind(), index.kind()),
            span.clone(),
        )),
    }
}

/// The infix evaluator shared by plain operators and compound
/// assignment. Integer arithmetic is checked: overflow raises a
/// catchable throw.
pub fn apply_infix(
    operator: InfixOperator,
    left: Value,
    right: Value,
    span: &Span,
) -> ExecResult<Value> {
    use InfixOperator::*;

    let overflow = || Interrupt::throw(ErrorCode::ValueError, "integer overflow", span.clone());

    match operator {
        Eq => return Ok(Value::Bool(left.is_equal(&right))),
        NotEq => return Ok(Value::Bool(!left.is_equal(&right))),
        And => {
            // non-short-circuit path used by compound evaluation
            if let (Value::Bool(l), Value::Bool(r)) = (&left, &right) {
                return Ok(Value::Bool(*l && *r));
            }
        }
        Or => {
            if let (Value::Bool(l), Value::Bool(r)) = (&left, &right) {
                return Ok(Value::Bool(*l || *r));
            }
        }
        _ => {}
    }

    let result = match (&left, operator, &right) {
        (Value::Int(l), Plus, Value::Int(r)) => Value::Int(l.checked_add(*r).ok_or_else(overflow)?),
        (Value::Int(l), Minus, Value::Int(r)) => {
            Value::Int(l.checked_sub(*r).ok_or_else(overflow)?)
        }
        (Value::Int(l), Multiply, Value::Int(r)) => {
            Value::Int(l.checked_mul(*r).ok_or_else(overflow)?)
        }
        (Value::Int(l), Divide, Value::Int(r)) => {
            if *r == 0 {
                return Err(Interrupt::throw(
                    ErrorCode::ValueError,
                    "division by zero",
                    span.clone(),
                ));
            }
            Value::Int(l.checked_div(*r).ok_or_else(overflow)?)
        }
        (Value::Int(l), Remainder, Value::Int(r)) => {
            if *r == 0 {
                return Err(Interrupt::throw(
                    ErrorCode::ValueError,
                    "division by zero",
                    span.clone(),
                ));
            }
            Value::Int(l.checked_rem(*r).ok_or_else(overflow)?)
        }
        (Value::Int(l), Power, Value::Int(r)) => {
            if *r < 0 {
                return Err(Interrupt::throw(
                    ErrorCode::ValueError,
                    "negative integer exponent",
                    span.clone(),
                ));
            }
            let exponent = u32::try_from(*r).map_err(|_| overflow())?;
            Value::Int(l.checked_pow(exponent).ok_or_else(overflow)?)
        }
        (Value::Int(l), Shl, Value::Int(r)) => {
            let shift = u32::try_from(*r).ok().filter(|s| *s < 64).ok_or_else(|| {
                Interrupt::throw(ErrorCode::ValueError, "invalid shift amount", span.clone())
            })?;
            Value::Int(l.checked_shl(shift).ok_or_else(overflow)?)
        }
        (Value::Int(l), Shr, Value::Int(r)) => {
            let shift = u32::try_from(*r).ok().filter(|s| *s < 64).ok_or_else(|| {
                Interrupt::throw(ErrorCode::ValueError, "invalid shift amount", span.clone())
            })?;
            Value::Int(l.checked_shr(shift).ok_or_else(overflow)?)
        }
        (Value::Int(l), BitAnd, Value::Int(r)) => Value::Int(l & r),
        (Value::Int(l), BitOr, Value::Int(r)) => Value::Int(l | r),
        (Value::Int(l), BitXor, Value::Int(r)) => Value::Int(l ^ r),
        (Value::Int(l), Lt, Value::Int(r)) => Value::Bool(l < r),
        (Value::Int(l), LtEq, Value::Int(r)) => Value::Bool(l <= r),
        (Value::Int(l), Gt, Value::Int(r)) => Value::Bool(l > r),
        (Value::Int(l), GtEq, Value::Int(r)) => Value::Bool(l >= r),

        (Value::Float(l), Plus, Value::Float(r)) => Value::Float(l + r),
        (Value::Float(l), Minus, Value::Float(r)) => Value::Float(l - r),
        (Value::Float(l), Multiply, Value::Float(r)) => Value::Float(l * r),
        (Value::Float(l), Divide, Value::Float(r)) => Value::Float(l / r),
        (Value::Float(l), Remainder, Value::Float(r)) => Value::Float(l % r),
        (Value::Float(l), Power, Value::Float(r)) => Value::Float(l.powf(*r)),
        (Value::Float(l), Lt, Value::Float(r)) => Value::Bool(l < r),
        (Value::Float(l), LtEq, Value::Float(r)) => Value::Bool(l <= r),
        (Value::Float(l), Gt, Value::Float(r)) => Value::Bool(l > r),
        (Value::Float(l), GtEq, Value::Float(r)) => Value::Bool(l >= r),

        (Value::String(l), Plus, Value::String(r)) => Value::String(format!("{l}{r}")),
        (Value::String(l), Lt, Value::String(r)) => Value::Bool(l < r),
        (Value::String(l), LtEq, Value::String(r)) => Value::Bool(l <= r),
        (Value::String(l), Gt, Value::String(r)) => Value::Bool(l > r),
        (Value::String(l), GtEq, Value::String(r)) => Value::Bool(l >= r),

        (left, operator, right) => {
            return Err(Interrupt::throw(
                ErrorCode::TypeError,
                format!(
                    "operator '{}' is not defined for '{}' and '{}'",
                    operator.symbol(),
                    left.kind(),
                    right.kind()
                ),
                span.clone(),
            ))
        }
    };

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_integer_arithmetic() {
        let span = Span::default();
        let err = apply_infix(
            InfixOperator::Plus,
            Value::Int(i64::MAX),
            Value::Int(1),
            &span,
        )
        .unwrap_err();
        assert!(matches!(err, Interrupt::Throw(e) if e.message.contains("overflow")));

        let err =
            apply_infix(InfixOperator::Divide, Value::Int(1), Value::Int(0), &span).unwrap_err();
        assert!(matches!(err, Interrupt::Throw(e) if e.message.contains("division by zero")));
    }

    #[test]
    fn test_integer_division_truncates_toward_zero() {
        let span = Span::default();
        assert_eq!(
            apply_infix(InfixOperator::Divide, Value::Int(-7), Value::Int(2), &span).unwrap(),
            Value::Int(-3)
        );
        assert_eq!(
            apply_infix(InfixOperator::Remainder, Value::Int(-7), Value::Int(2), &span).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_string_concatenation() {
        let span = Span::default();
        assert_eq!(
            apply_infix(
                InfixOperator::Plus,
                Value::String("a".to_string()),
                Value::String("b".to_string()),
                &span
            )
            .unwrap(),
            Value::String("ab".to_string())
        );
    }

    #[test]
    fn test_int_power_stays_int() {
        let span = Span::default();
        assert_eq!(
            apply_infix(InfixOperator::Power, Value::Int(2), Value::Int(10), &span).unwrap(),
            Value::Int(1024)
        );
        assert!(
            apply_infix(InfixOperator::Power, Value::Int(2), Value::Int(-1), &span).is_err()
        );
    }
}
