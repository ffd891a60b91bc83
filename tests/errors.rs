//! Runtime error behavior: catchability, fatal exceptions, cancellation.

use std::time::Duration;

use homescript::diagnostic::ErrorCode;
use homescript::host::{CancelContext, TestExecutor};
use homescript::interpreter::DEFAULT_CALLSTACK_LIMIT;
use homescript::{compile_program, execute, Backend};
use test_utils::{check_program, run_backend, Expected};

fn run_both(source: &str) -> Vec<homescript::RunResult> {
    [Backend::Tree, Backend::Vm]
        .into_iter()
        .map(|backend| {
            let executor = TestExecutor::new().with_module("main", source);
            run_backend(&executor, backend).0
        })
        .collect()
}

#[test]
fn uncaught_throw_reports_kind_and_message() {
    for result in run_both("fn main() { throw(\"boom\"); }") {
        let error = result.error.expect("expected a runtime error");
        assert_eq!(error.kind, ErrorCode::UncaughtThrow);
        assert_eq!(error.message, "boom");
        assert_eq!(result.exit_code, 1);
        // the span points at the throw site
        assert_eq!(error.span.start.line, 1);
    }
}

#[test]
fn division_by_zero_is_catchable() {
    check_program(
        "fn main() {\n\
             let x = try { 1 / 0 } catch e { println(e.message); -1 };\n\
             println(x);\n\
         }",
        Expected {
            stdout: "division by zero\n-1\n",
            exit_code: 0,
        },
    );
}

#[test]
fn integer_overflow_is_catchable() {
    check_program(
        "fn main() {\n\
             let big = 9223372036854775807;\n\
             try { big + 1; } catch e { println(\"caught\"); }\n\
         }",
        Expected {
            stdout: "caught\n",
            exit_code: 0,
        },
    );
}

#[test]
fn cast_errors_are_catchable_interrupts() {
    check_program(
        "fn main() {\n\
             let v = \"5\" as any;\n\
             try { v as bool; println(\"unreachable\"); } catch e { println(\"cast failed\"); }\n\
         }",
        Expected {
            stdout: "cast failed\n",
            exit_code: 0,
        },
    );
}

#[test]
fn index_out_of_bounds_is_catchable() {
    check_program(
        "fn main() {\n\
             let xs = [1];\n\
             try { xs[7]; } catch e { println(e.message); }\n\
         }",
        Expected {
            stdout: "index 7 is out of bounds for length 1\n",
            exit_code: 0,
        },
    );
}

#[test]
fn exceeding_the_callstack_limit_is_fatal() {
    for backend in [Backend::Tree, Backend::Vm] {
        let executor = TestExecutor::new().with_module(
            "main",
            "fn rec() { rec(); }\nfn main() { try { rec(); } catch e { println(\"caught\"); } }",
        );
        let output = compile_program("main", &executor);
        assert!(!output.analyzed.has_errors());
        let result = execute(
            &output.analyzed,
            &executor,
            backend,
            CancelContext::new(),
            64,
        );
        // fatal exceptions cannot be caught
        assert_eq!(executor.output(), "");
        let error = result.error.expect("expected a stack overflow");
        assert_eq!(error.kind, ErrorCode::StackOverflow);
        assert_eq!(result.exit_code, 1);
    }
}

#[test]
fn double_fault_propagates_the_newer_throw() {
    check_program(
        "fn main() {\n\
             let r = try {\n\
                 throw(\"first\");\n\
             } catch e {\n\
                 try { throw(\"second\"); } catch inner { inner.message }\n\
             };\n\
             println(r);\n\
         }",
        Expected {
            stdout: "second\n",
            exit_code: 0,
        },
    );
}

#[test]
fn cancelled_context_terminates_both_backends() {
    for backend in [Backend::Tree, Backend::Vm] {
        let executor = TestExecutor::new().with_module(
            "main",
            "fn main() { let i = 0; loop { i += 1; try { i += 1; } catch e { } } }",
        );
        let output = compile_program("main", &executor);
        assert!(!output.analyzed.has_errors());

        let cancel = CancelContext::new();
        cancel.arm_deadline(Duration::from_millis(50));
        let result = execute(
            &output.analyzed,
            &executor,
            backend,
            cancel,
            DEFAULT_CALLSTACK_LIMIT,
        );

        // a cancelled context always wins and cannot be caught
        assert_eq!(result.terminated.as_deref(), Some("timeout expired"));
        assert_eq!(result.exit_code, 1);
    }
}

#[test]
fn assertion_failures_throw() {
    check_program(
        "fn main() { try { assert(1 == 2); } catch e { println(e.message); } }",
        Expected {
            stdout: "assertion failed\n",
            exit_code: 0,
        },
    );
}

#[test]
fn unwrapping_none_throws() {
    check_program(
        "fn main() {\n\
             let v: ?int = none;\n\
             try { v.unwrap(); } catch e { println(e.message); }\n\
             println(v.unwrap_or(5));\n\
         }",
        Expected {
            stdout: "unwrapped a 'none' value\n5\n",
            exit_code: 0,
        },
    );
}
