//! # Virtual Machine
//!
//! A stack/register hybrid executing the compiler's instruction lists:
//! each frame holds slot-indexed local cells, an operand stack, the
//! instruction pointer and a stack of active exception handlers.
//!
//! `throw` unwinds frames until a handler catches; an uncaught throw
//! leaves the machine as a fatal `UncaughtThrow`. Division by zero and
//! integer overflow raise catchable throws through the same infix
//! evaluator the tree interpreter uses, which keeps the two backends
//! observationally equivalent on spawn-free programs.
//!
//! The cancellation context is sampled on a short instruction cadence,
//! bounding the number of steps between a cancellation and the resulting
//! `terminate` interrupt.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::{debug, warn};

use crate::compiler::{CompiledFunction, CompiledProgram, Instruction, UnaryOp};
use crate::diagnostic::ErrorCode;
use crate::host::{builtins, CancelContext, HostExecutor};
use crate::interpreter::{apply_infix, index_read, normalize_index};
use crate::interrupt::{ExecResult, Interrupt, RuntimeError};
use crate::lexer::Span;
use crate::value::{cast::deep_cast, fields, BuiltinFunction, Closure, Value, ValueIterator};

/// Instruction cadence between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 64;

#[derive(Debug, Clone)]
enum VmGlobal {
    Value(Value),
    Evaluating,
}

#[derive(Debug, Clone, Copy)]
struct Handler {
    catch_ip: usize,
    depth: usize,
}

enum ReturnMode {
    /// Push the returned value onto the caller's operand stack.
    Push,
    /// Store the returned value as a global (lazy initializer frames).
    StoreGlobal(String),
    /// Deliver the value to the `execute` invocation that pushed this
    /// frame.
    Entry,
}

struct Frame {
    function: Rc<CompiledFunction>,
    ip: usize,
    locals: Vec<Rc<RefCell<Value>>>,
    stack: Vec<Value>,
    handlers: Vec<Handler>,
    mode: ReturnMode,
}

impl Frame {
    fn span(&self) -> Span {
        let at = self.ip.saturating_sub(1).min(self.function.spans.len().saturating_sub(1));
        self.function
            .spans
            .get(at)
            .cloned()
            .unwrap_or_default()
    }
}

pub struct Vm<'a> {
    program: &'a CompiledProgram,
    executor: &'a dyn HostExecutor,
    cancel: CancelContext,
    callstack_limit: usize,

    globals: HashMap<String, VmGlobal>,
    singletons: HashMap<String, Value>,
    user_modules: HashSet<String>,
    frames: Vec<Frame>,
    steps: u64,
}

impl<'a> Vm<'a> {
    /// Build the machine: seed the prelude and function values, load
    /// singletons from the host and run every module's `@init`.
    pub fn new(
        program: &'a CompiledProgram,
        executor: &'a dyn HostExecutor,
        cancel: CancelContext,
        callstack_limit: usize,
    ) -> ExecResult<Self> {
        let mut vm = Self {
            program,
            executor,
            cancel,
            callstack_limit,
            globals: HashMap::new(),
            singletons: HashMap::new(),
            user_modules: program.init_order.iter().cloned().collect(),
            frames: vec![],
            steps: 0,
        };

        for module in &program.init_order {
            for (name, value) in builtins::prelude_values() {
                vm.globals
                    .insert(format!("{module}::{name}"), VmGlobal::Value(value));
            }
        }

        // module-level functions are values
        for key in program.functions.keys() {
            let Some((module, name)) = key.split_once("::") else {
                continue;
            };
            if name.contains('@') || name.starts_with('$') {
                continue;
            }
            vm.globals.insert(
                key.clone(),
                VmGlobal::Value(Value::Function {
                    module: module.to_string(),
                    name: name.to_string(),
                }),
            );
        }

        for (key, type_id, span) in &program.singletons {
            let ident = key
                .rsplit_once("::$")
                .map(|(_, ident)| ident)
                .unwrap_or(key.as_str());
            let value = match vm.executor.load_singleton(ident, type_id).map_err(|err| {
                Interrupt::fatal(
                    ErrorCode::HostError,
                    format!("failed to load singleton '${ident}': {err}"),
                    span.clone(),
                )
            })? {
                Some(value) => deep_cast(&value, type_id, span)?,
                None => Value::zero_value(type_id),
            };
            vm.singletons.insert(key.clone(), value);
        }

        for module in &program.init_order.clone() {
            debug!("running {module}::@init");
            vm.execute(&format!("{module}::@init"), vec![])?;
        }

        Ok(vm)
    }

    pub fn run_main(&mut self) -> ExecResult<Value> {
        self.execute(&self.program.entry.clone(), vec![])
    }

    /// Push an entry frame for `key` and run until it returns.
    fn execute(&mut self, key: &str, args: Vec<Value>) -> ExecResult<Value> {
        let base_depth = self.frames.len();
        self.push_frame(key, args, ReturnMode::Entry, &Span::default())?;
        self.run_until(base_depth)
    }

    fn push_frame(
        &mut self,
        key: &str,
        args: Vec<Value>,
        mode: ReturnMode,
        span: &Span,
    ) -> ExecResult<()> {
        if self.frames.len() >= self.callstack_limit {
            return Err(Interrupt::fatal(
                ErrorCode::StackOverflow,
                format!("maximum call depth of {} exceeded", self.callstack_limit),
                span.clone(),
            ));
        }

        let function = self.program.functions.get(key).cloned().ok_or_else(|| {
            Interrupt::throw(
                ErrorCode::ReferenceError,
                format!("unknown function '{key}'"),
                span.clone(),
            )
        })?;

        let locals: Vec<Rc<RefCell<Value>>> = (0..function.n_slots)
            .map(|_| Rc::new(RefCell::new(Value::Null)))
            .collect();

        let mut args = args.into_iter();
        for param in &function.params {
            let value = match &param.singleton {
                Some(singleton_key) => {
                    self.singletons.get(singleton_key).cloned().ok_or_else(|| {
                        Interrupt::fatal(
                            ErrorCode::HostError,
                            format!("singleton '{singleton_key}' is not loaded"),
                            span.clone(),
                        )
                    })?
                }
                None => args.next().unwrap_or(Value::Null),
            };
            *locals[param.slot as usize].borrow_mut() = value;
        }

        self.frames.push(Frame {
            function,
            ip: 0,
            locals,
            stack: vec![],
            handlers: vec![],
            mode,
        });
        Ok(())
    }

    /// The fetch-decode-execute loop, running until the frame stack
    /// drops back to `base_depth`.
    fn run_until(&mut self, base_depth: usize) -> ExecResult<Value> {
        loop {
            match self.step() {
                Ok(Some(value)) => {
                    if self.frames.len() == base_depth {
                        return Ok(value);
                    }
                    // an inner entry frame finished; push its value for
                    // the caller
                    self.frames
                        .last_mut()
                        .expect("frames cannot be empty here")
                        .stack
                        .push(value);
                }
                Ok(None) => {}
                Err(Interrupt::Throw(error)) => self.unwind(error, base_depth)?,
                Err(other) => return Err(other),
            }
        }
    }

    /// Unwind frames until a handler catches the throw; without one the
    /// throw propagates out of `run_until`.
    fn unwind(&mut self, error: RuntimeError, base_depth: usize) -> ExecResult<()> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Err(Interrupt::Throw(error));
            };

            if let Some(handler) = frame.handlers.pop() {
                frame.stack.truncate(handler.depth);
                frame.stack.push(catch_object(&error));
                frame.ip = handler.catch_ip;
                return Ok(());
            }

            if self.frames.len() == base_depth {
                return Err(Interrupt::Throw(error));
            }
            self.frames.pop();
            if self.frames.len() == base_depth {
                return Err(Interrupt::Throw(error));
            }
        }
    }

    fn span(&self) -> Span {
        self.frames.last().map(Frame::span).unwrap_or_default()
    }

    fn pop(&mut self) -> ExecResult<Value> {
        self.frames
            .last_mut()
            .and_then(|frame| frame.stack.pop())
            .ok_or_else(|| {
                Interrupt::fatal(
                    ErrorCode::HostError,
                    "operand stack underflow",
                    Span::default(),
                )
            })
    }

    fn push(&mut self, value: Value) {
        self.frames
            .last_mut()
            .expect("push requires an active frame")
            .stack
            .push(value);
    }

    /// Execute one instruction. `Ok(Some(v))` reports that an entry
    /// frame returned `v`.
    fn step(&mut self) -> ExecResult<Option<Value>> {
        self.steps += 1;
        if self.steps % CANCEL_CHECK_INTERVAL == 0 {
            if let Some(reason) = self.cancel.check() {
                return Err(Interrupt::Terminate {
                    reason,
                    span: self.span(),
                });
            }
        }

        let frame = self.frames.last_mut().expect("step requires a frame");
        let Some(instruction) = frame.function.code.get(frame.ip).cloned() else {
            return Err(Interrupt::fatal(
                ErrorCode::HostError,
                format!("instruction pointer ran off '{}'", frame.function.key),
                Span::default(),
            ));
        };
        frame.ip += 1;
        let span = frame.span();

        match instruction {
            Instruction::ConstInt(value) => self.push(Value::Int(value)),
            Instruction::ConstFloat(value) => self.push(Value::Float(value)),
            Instruction::ConstBool(value) => self.push(Value::Bool(value)),
            Instruction::ConstNull => self.push(Value::Null),
            Instruction::ConstNone => self.push(Value::none()),
            Instruction::ConstStr(index) => {
                let value = self.program.strings[index as usize].clone();
                self.push(Value::String(value));
            }

            Instruction::LoadLocal(slot) => {
                let frame = self.frames.last().expect("frame exists");
                let value = frame.locals[slot as usize].borrow().clone();
                self.push(value);
            }
            Instruction::StoreLocal(slot) => {
                let value = self.pop()?;
                let frame = self.frames.last().expect("frame exists");
                *frame.locals[slot as usize].borrow_mut() = value;
            }

            Instruction::LoadGlobal(key) => match self.globals.get(&key).cloned() {
                Some(VmGlobal::Value(value)) => {
                    self.push(value);
                }
                Some(VmGlobal::Evaluating) => {
                    return Err(Interrupt::throw(
                        ErrorCode::ValueError,
                        format!("initializer of global '{key}' depends on itself"),
                        span,
                    ))
                }
                None => {
                    let init_key = format!("{key}@init");
                    if self.program.functions.contains_key(&init_key) {
                        // re-execute this LoadGlobal once the lazy
                        // initializer has stored the value
                        let frame = self.frames.last_mut().expect("frame exists");
                        frame.ip -= 1;
                        self.globals.insert(key.clone(), VmGlobal::Evaluating);
                        self.push_frame(&init_key, vec![], ReturnMode::StoreGlobal(key), &span)?;
                    } else {
                        return Err(Interrupt::throw(
                            ErrorCode::ReferenceError,
                            format!("unknown global '{key}'"),
                            span,
                        ));
                    }
                }
            },
            Instruction::StoreGlobal(key) => {
                let value = self.pop()?;
                self.globals.insert(key, VmGlobal::Value(value));
            }

            Instruction::LoadFunction { module, name } => {
                self.push(Value::Function { module, name });
            }
            Instruction::Closure { function, captures } => {
                let frame = self.frames.last().expect("frame exists");
                let upvalues = captures
                    .iter()
                    .map(|(name, slot)| (name.clone(), frame.locals[*slot as usize].clone()))
                    .collect();
                self.push(Value::Closure(Rc::new(Closure::Vm { function, upvalues })));
            }
            Instruction::LoadSingleton(key) => {
                let value = self.singletons.get(&key).cloned().ok_or_else(|| {
                    Interrupt::fatal(
                        ErrorCode::HostError,
                        format!("singleton '{key}' is not loaded"),
                        span.clone(),
                    )
                })?;
                self.push(value);
            }

            Instruction::Member(name) => {
                let base = self.pop()?;
                let value = fields::member(&base, &name).ok_or_else(|| {
                    Interrupt::throw(
                        ErrorCode::TypeError,
                        format!(
                            "a value of type '{}' has no member '{name}'",
                            base.kind()
                        ),
                        span.clone(),
                    )
                })?;
                self.push(value);
            }
            Instruction::StoreMember(name) => {
                let base = self.pop()?;
                let value = self.pop()?;
                match base {
                    Value::Object(map) | Value::AnyObject(map) => {
                        map.borrow_mut().insert(name, value);
                    }
                    other => {
                        return Err(Interrupt::throw(
                            ErrorCode::TypeError,
                            format!(
                                "cannot assign to a field of a value of type '{}'",
                                other.kind()
                            ),
                            span,
                        ))
                    }
                }
            }
            Instruction::LoadIndex => {
                let index = self.pop()?;
                let base = self.pop()?;
                let value = index_read(&base, &index, &span)?;
                self.push(value);
            }
            Instruction::StoreIndex => {
                let index = self.pop()?;
                let base = self.pop()?;
                let value = self.pop()?;
                match (&base, &index) {
                    (Value::List(list), Value::Int(i)) => {
                        let mut list = list.borrow_mut();
                        let len = list.len();
                        let idx = normalize_index(*i, len).ok_or_else(|| {
                            Interrupt::throw(
                                ErrorCode::IndexOutOfBounds,
                                format!("index {i} is out of bounds for length {len}"),
                                span.clone(),
                            )
                        })?;
                        list[idx] = value;
                    }
                    (Value::AnyObject(map), Value::String(key)) => {
                        map.borrow_mut().insert(key.clone(), value);
                    }
                    (base, index) => {
                        return Err(Interrupt::throw(
                            ErrorCode::TypeError,
                            format!(
                                "cannot index-assign '{}' with '{}'",
                                base.kind(),
                                index.kind()
                            ),
                            span,
                        ))
                    }
                }
            }

            Instruction::MakeList(count) => {
                let frame = self.frames.last_mut().expect("frame exists");
                let at = frame.stack.len() - count as usize;
                let elements = frame.stack.split_off(at);
                self.push(Value::new_list(elements));
            }
            Instruction::MakeObject(names) => {
                let frame = self.frames.last_mut().expect("frame exists");
                let at = frame.stack.len() - names.len();
                let values = frame.stack.split_off(at);
                let fields = names.into_iter().zip(values).collect::<Vec<_>>();
                self.push(Value::new_object(fields));
            }
            Instruction::MakeRange { inclusive } => {
                let end = self.pop()?;
                let start = self.pop()?;
                match (start, end) {
                    (Value::Int(start), Value::Int(end)) => self.push(Value::Range {
                        start,
                        end,
                        inclusive,
                    }),
                    (start, _) => {
                        return Err(Interrupt::throw(
                            ErrorCode::TypeError,
                            format!("range bounds must be 'int', found '{}'", start.kind()),
                            span,
                        ))
                    }
                }
            }
            Instruction::MakeSome => {
                let value = self.pop()?;
                self.push(Value::some(value));
            }

            Instruction::Unary(op) => {
                let operand = self.pop()?;
                let result = match (op, operand) {
                    (UnaryOp::Neg, Value::Int(value)) => {
                        Value::Int(value.checked_neg().ok_or_else(|| {
                            Interrupt::throw(ErrorCode::ValueError, "integer overflow", span.clone())
                        })?)
                    }
                    (UnaryOp::Neg, Value::Float(value)) => Value::Float(-value),
                    (UnaryOp::Not, Value::Bool(value)) => Value::Bool(!value),
                    (op, operand) => {
                        return Err(Interrupt::throw(
                            ErrorCode::TypeError,
                            format!(
                                "unary {op:?} is not defined for '{}'",
                                operand.kind()
                            ),
                            span,
                        ))
                    }
                };
                self.push(result);
            }
            Instruction::Binary(operator) => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = apply_infix(operator, left, right, &span)?;
                self.push(result);
            }
            Instruction::Cast(target) => {
                let value = self.pop()?;
                let result = deep_cast(&value, &target, &span)?;
                self.push(result);
            }

            Instruction::Jump(target) => {
                self.frames.last_mut().expect("frame exists").ip = target;
            }
            Instruction::JumpIfFalse(target) => {
                let condition = self.pop()?;
                match condition {
                    Value::Bool(false) => {
                        self.frames.last_mut().expect("frame exists").ip = target;
                    }
                    Value::Bool(true) => {}
                    other => {
                        return Err(Interrupt::throw(
                            ErrorCode::TypeError,
                            format!("expected 'bool', found '{}'", other.kind()),
                            span,
                        ))
                    }
                }
            }
            Instruction::JumpIfTrue(target) => {
                let condition = self.pop()?;
                match condition {
                    Value::Bool(true) => {
                        self.frames.last_mut().expect("frame exists").ip = target;
                    }
                    Value::Bool(false) => {}
                    other => {
                        return Err(Interrupt::throw(
                            ErrorCode::TypeError,
                            format!("expected 'bool', found '{}'", other.kind()),
                            span,
                        ))
                    }
                }
            }

            Instruction::Call(argc) => {
                let (callee, args) = self.pop_call(argc)?;
                self.call_value(callee, args, &span)?;
            }
            Instruction::Spawn(argc) => {
                let (callee, args) = self.pop_call(argc)?;
                self.spawn(callee, args, &span)?;
            }
            Instruction::Return => {
                let frame = self.frames.last_mut().expect("frame exists");
                let value = frame.stack.pop().unwrap_or(Value::Null);
                let mode = std::mem::replace(&mut frame.mode, ReturnMode::Push);
                self.frames.pop();
                match mode {
                    ReturnMode::Push => {
                        self.frames
                            .last_mut()
                            .expect("a pushed frame always has a caller")
                            .stack
                            .push(value);
                    }
                    ReturnMode::StoreGlobal(key) => {
                        self.globals.insert(key, VmGlobal::Value(value));
                    }
                    ReturnMode::Entry => return Ok(Some(value)),
                }
            }

            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Dup => {
                let value = self
                    .frames
                    .last()
                    .and_then(|frame| frame.stack.last().cloned())
                    .ok_or_else(|| {
                        Interrupt::fatal(
                            ErrorCode::HostError,
                            "operand stack underflow",
                            span.clone(),
                        )
                    })?;
                self.push(value);
            }

            Instruction::Throw => {
                let message = match self.pop()? {
                    Value::String(message) => message,
                    other => other.display(),
                };
                return Err(Interrupt::throw(ErrorCode::UncaughtThrow, message, span));
            }
            Instruction::PushHandler(catch_ip) => {
                let frame = self.frames.last_mut().expect("frame exists");
                let depth = frame.stack.len();
                frame.handlers.push(Handler { catch_ip, depth });
            }
            Instruction::PopHandler => {
                self.frames
                    .last_mut()
                    .expect("frame exists")
                    .handlers
                    .pop();
            }

            Instruction::Iter => {
                let value = self.pop()?;
                let iterator = ValueIterator::new(&value, &span)?;
                self.push(Value::Iterator(Rc::new(RefCell::new(iterator))));
            }
            Instruction::IterNext(target) => {
                let frame = self.frames.last_mut().expect("frame exists");
                let Some(Value::Iterator(iterator)) = frame.stack.last() else {
                    return Err(Interrupt::fatal(
                        ErrorCode::HostError,
                        "iterator expected at stack top",
                        span,
                    ));
                };
                let next = iterator.borrow_mut().next();
                match next {
                    Some(value) => frame.stack.push(value),
                    None => frame.ip = target,
                }
            }

            Instruction::Import {
                module,
                symbol,
                target,
            } => {
                let value = if self.user_modules.contains(&module) {
                    Value::Function {
                        module: module.clone(),
                        name: symbol.clone(),
                    }
                } else {
                    self.executor
                        .get_builtin_value(&module, &symbol)
                        .ok_or_else(|| {
                            Interrupt::fatal(
                                ErrorCode::HostError,
                                format!("host provides no value for '{module}::{symbol}'"),
                                span.clone(),
                            )
                        })?
                };
                self.globals.insert(target, VmGlobal::Value(value));
            }
        }

        Ok(None)
    }

    fn pop_call(&mut self, argc: u32) -> ExecResult<(Value, Vec<Value>)> {
        let frame = self.frames.last_mut().expect("frame exists");
        let at = frame.stack.len() - argc as usize;
        let args = frame.stack.split_off(at);
        let callee = frame.stack.pop().ok_or_else(|| {
            Interrupt::fatal(
                ErrorCode::HostError,
                "operand stack underflow",
                Span::default(),
            )
        })?;
        Ok((callee, args))
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, span: &Span) -> ExecResult<()> {
        match callee {
            Value::Function { module, name } => {
                let key = format!("{module}::{name}");
                self.push_frame(&key, args, ReturnMode::Push, span)
            }
            Value::Closure(closure) => {
                let Closure::Vm { function, upvalues } = closure.as_ref() else {
                    return Err(Interrupt::fatal(
                        ErrorCode::HostError,
                        "tree closure invoked by the VM",
                        span.clone(),
                    ));
                };
                let function = function.clone();
                self.push_frame(&function, args, ReturnMode::Push, span)?;
                // splice captured cells into the fresh frame
                let frame = self.frames.last_mut().expect("frame was just pushed");
                for (name, cell) in upvalues {
                    if let Some((_, slot)) = frame
                        .function
                        .captured
                        .iter()
                        .find(|(captured, _)| captured == name)
                    {
                        frame.locals[*slot as usize] = cell.clone();
                    }
                }
                Ok(())
            }
            Value::Builtin(BuiltinFunction::Native(native)) => {
                let result = builtins::call_native(native, args, span, self.executor, &self.cancel)?;
                self.push(result);
                Ok(())
            }
            Value::Builtin(BuiltinFunction::Method { receiver, name }) => {
                let result = fields::call_method(&receiver, &name, args, span)?;
                self.push(result);
                Ok(())
            }
            Value::Builtin(BuiltinFunction::Host(host)) => {
                let result = (host.f)(args, span)?;
                self.push(result);
                Ok(())
            }
            other => Err(Interrupt::throw(
                ErrorCode::TypeError,
                format!("a value of type '{}' is not callable", other.kind()),
                span.clone(),
            )),
        }
    }

    /// `spawn f(...)`: run the call eagerly under a child cancellation
    /// scope; uncaught throws in the child are demoted to log warnings.
    fn spawn(&mut self, callee: Value, args: Vec<Value>, span: &Span) -> ExecResult<()> {
        let parent_cancel = self.cancel.clone();
        self.cancel = parent_cancel.child();

        let result = match callee {
            Value::Function { module, name } => {
                let key = format!("{module}::{name}");
                let base_depth = self.frames.len();
                self.push_frame(&key, args, ReturnMode::Entry, span)
                    .and_then(|()| self.run_until(base_depth))
            }
            other => {
                // natives and closures run through the regular call path
                let base_depth = self.frames.len();
                match self.call_value(other, args, span) {
                    Ok(()) if self.frames.len() > base_depth => {
                        // a frame was pushed; convert it into an entry
                        self.frames
                            .last_mut()
                            .expect("frame was just pushed")
                            .mode = ReturnMode::Entry;
                        self.run_until(base_depth)
                    }
                    Ok(()) => {
                        // a builtin already pushed its result
                        self.pop()
                    }
                    Err(err) => Err(err),
                }
            }
        };

        self.cancel = parent_cancel;

        match result {
            Ok(_) => {
                self.push(Value::Null);
                Ok(())
            }
            Err(Interrupt::Throw(error)) => {
                warn!("uncaught throw in spawned task: {error}");
                self.push(Value::Null);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

fn catch_object(error: &RuntimeError) -> Value {
    Value::new_object(vec![
        ("message".to_string(), Value::String(error.message.clone())),
        ("line".to_string(), Value::Int(error.span.start.line as i64)),
        (
            "column".to_string(),
            Value::Int(error.span.start.column as i64),
        ),
        (
            "filename".to_string(),
            Value::String(error.span.filename.clone()),
        ),
    ])
}
