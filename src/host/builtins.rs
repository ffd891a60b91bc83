//! The prelude builtin functions, shared by both backends.
//!
//! Waiting builtins poll the cancellation context at sub-second
//! granularity and abort promptly with a `terminate` interrupt carrying
//! the cancellation cause.

use std::time::Duration;

use crate::diagnostic::ErrorCode;
use crate::interrupt::{ExecResult, Interrupt};
use crate::lexer::Span;
use crate::value::{NativeFunction, Value};

use super::{CancelContext, HostExecutor};

/// The values bound to the prelude names at module initialization.
pub fn prelude_values() -> Vec<(&'static str, Value)> {
    use crate::value::BuiltinFunction::Native;
    vec![
        ("print", Value::Builtin(Native(NativeFunction::Print))),
        ("println", Value::Builtin(Native(NativeFunction::Println))),
        ("debug", Value::Builtin(Native(NativeFunction::Debug))),
        ("exit", Value::Builtin(Native(NativeFunction::Exit))),
        ("assert", Value::Builtin(Native(NativeFunction::Assert))),
        ("throw", Value::Builtin(Native(NativeFunction::Throw))),
        ("sleep", Value::Builtin(Native(NativeFunction::Sleep))),
        ("get_user", Value::Builtin(Native(NativeFunction::GetUser))),
    ]
}

/// Granularity at which waiting builtins sample the cancel context.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn call_native(
    native: NativeFunction,
    args: Vec<Value>,
    span: &Span,
    executor: &dyn HostExecutor,
    cancel: &CancelContext,
) -> ExecResult<Value> {
    match native {
        NativeFunction::Print => {
            executor.write_string(&join_display(&args));
            Ok(Value::Null)
        }
        NativeFunction::Println => {
            executor.write_string(&format!("{}\n", join_display(&args)));
            Ok(Value::Null)
        }
        NativeFunction::Debug => {
            log::debug!("{}", join_display(&args));
            Ok(Value::Null)
        }
        NativeFunction::Exit => {
            let code = match args.first() {
                Some(Value::Int(code)) => *code,
                _ => 0,
            };
            Err(Interrupt::Exit(code))
        }
        NativeFunction::Assert => match args.first() {
            Some(Value::Bool(true)) => Ok(Value::Null),
            Some(Value::Bool(false)) => Err(Interrupt::throw(
                ErrorCode::ValueError,
                "assertion failed",
                span.clone(),
            )),
            other => Err(Interrupt::throw(
                ErrorCode::TypeError,
                format!(
                    "'assert' expects a bool, got '{}'",
                    other.map(Value::kind).unwrap_or("nothing")
                ),
                span.clone(),
            )),
        },
        NativeFunction::Throw => {
            let message = match args.first() {
                Some(Value::String(message)) => message.clone(),
                Some(other) => other.display(),
                None => String::new(),
            };
            Err(Interrupt::throw(ErrorCode::UncaughtThrow, message, span.clone()))
        }
        NativeFunction::Sleep => {
            let seconds = match args.first() {
                Some(Value::Int(seconds)) => *seconds as f64,
                Some(Value::Float(seconds)) => *seconds,
                other => {
                    return Err(Interrupt::throw(
                        ErrorCode::TypeError,
                        format!(
                            "'sleep' expects a number of seconds, got '{}'",
                            other.map(Value::kind).unwrap_or("nothing")
                        ),
                        span.clone(),
                    ))
                }
            };

            let mut remaining = Duration::from_secs_f64(seconds.max(0.0));
            while !remaining.is_zero() {
                if let Some(reason) = cancel.check() {
                    return Err(Interrupt::Terminate {
                        reason,
                        span: span.clone(),
                    });
                }
                let chunk = remaining.min(POLL_INTERVAL);
                std::thread::sleep(chunk);
                remaining -= chunk;
            }
            Ok(Value::Null)
        }
        NativeFunction::GetUser => Ok(Value::String(executor.get_user())),
    }
}

fn join_display(args: &[Value]) -> String {
    args.iter().map(Value::display).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TestExecutor;

    #[test]
    fn test_println_serializes_through_the_sink() {
        let executor = TestExecutor::default();
        let cancel = CancelContext::new();
        call_native(
            NativeFunction::Println,
            vec![Value::Int(4)],
            &Span::default(),
            &executor,
            &cancel,
        )
        .unwrap();
        assert_eq!(executor.output(), "4\n");
    }

    #[test]
    fn test_cancelled_sleep_terminates() {
        let executor = TestExecutor::default();
        let cancel = CancelContext::new();
        cancel.cancel("test cause");
        let err = call_native(
            NativeFunction::Sleep,
            vec![Value::Int(10)],
            &Span::default(),
            &executor,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, Interrupt::Terminate { reason, .. } if reason == "test cause"));
    }

    #[test]
    fn test_throw_is_catchable() {
        let executor = TestExecutor::default();
        let err = call_native(
            NativeFunction::Throw,
            vec![Value::String("boom".to_string())],
            &Span::default(),
            &executor,
            &CancelContext::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Interrupt::Throw(e) if e.message == "boom"));
    }
}
