//! Module graph behavior: imports, visibility, cycles, builtin modules.

use homescript::compile_program;
use homescript::diagnostic::{ErrorCode, Level};
use homescript::host::TestExecutor;
use test_utils::{check_with, Expected};

#[test]
fn cross_module_function_call() {
    check_with(
        || {
            TestExecutor::new()
                .with_module(
                    "main",
                    "import { double } from util;\nfn main() { println(double(21)); }",
                )
                .with_module("util", "pub fn double(x: int) -> int { return x * 2; }")
        },
        Expected {
            stdout: "42\n",
            exit_code: 0,
        },
    );
}

#[test]
fn imported_type_alias() {
    check_with(
        || {
            TestExecutor::new()
                .with_module(
                    "main",
                    "import { type Pair, make } from util;\n\
                     fn main() { let p: Pair = make(); println(p.a + p.b); }",
                )
                .with_module(
                    "util",
                    "type Pair = { a: int, b: int };\n\
                     pub fn make() -> Pair { return new { a: 40, b: 2 }; }",
                )
        },
        Expected {
            stdout: "42\n",
            exit_code: 0,
        },
    );
}

#[test]
fn private_function_is_not_importable() {
    let executor = TestExecutor::new()
        .with_module(
            "main",
            "import { hidden } from util;\nfn main() { hidden(); }",
        )
        .with_module("util", "fn hidden() { }");

    let output = compile_program("main", &executor);
    assert!(output
        .analyzed
        .diagnostics
        .iter()
        .any(|d| d.code == ErrorCode::ImportError && d.message.contains("not 'pub'")));
}

#[test]
fn import_cycles_are_rejected() {
    let executor = TestExecutor::new()
        .with_module("main", "import { a } from other;\nfn main() { }")
        .with_module("other", "import { b } from main;\npub fn a() { }");

    let output = compile_program("main", &executor);
    assert!(output
        .analyzed
        .diagnostics
        .iter()
        .any(|d| d.code == ErrorCode::ImportError && d.message.contains("cycle")));
}

#[test]
fn unknown_builtin_module_is_an_analyzer_error() {
    let executor = TestExecutor::new().with_module(
        "main",
        "import { gadget } from devices;\nfn main() { }",
    );

    let output = compile_program("main", &executor);
    assert!(output
        .analyzed
        .diagnostics
        .iter()
        .any(|d| d.level == Level::Error
            && d.code == ErrorCode::ImportError
            && d.message.contains("devices")));
}

#[test]
fn builtin_value_import_runs_through_the_host() {
    use homescript::analyzer::types::{FunctionType, Type};
    use homescript::value::{BuiltinFunction, HostFunction, Value};
    use std::rc::Rc;

    let build = || {
        TestExecutor::new()
            .with_module(
                "main",
                "import { amplify } from audio;\nfn main() { println(amplify(21)); }",
            )
            .with_builtin_value(
                "audio",
                "amplify",
                Type::Function(Box::new(FunctionType::new(
                    vec![("level".to_string(), Type::Int)],
                    Type::Int,
                ))),
                Value::Builtin(BuiltinFunction::Host(HostFunction {
                    name: "amplify".to_string(),
                    f: Rc::new(|args, span| match args.first() {
                        Some(Value::Int(level)) => Ok(Value::Int(level * 2)),
                        _ => Err(homescript::interrupt::Interrupt::throw(
                            ErrorCode::TypeError,
                            "expected an int",
                            span.clone(),
                        )),
                    }),
                })),
            )
    };

    check_with(
        build,
        Expected {
            stdout: "42\n",
            exit_code: 0,
        },
    );
}
