//! Helpers for the integration test suite: run a program on one or both
//! backends against an in-memory host executor and compare the observable
//! behavior (stdout, exit code, final value kind).

use homescript::host::{CancelContext, TestExecutor};
use homescript::interpreter::DEFAULT_CALLSTACK_LIMIT;
use homescript::{compile_program, execute, Backend, RunResult};

#[derive(Debug, Clone, Copy)]
pub struct Expected {
    pub stdout: &'static str,
    pub exit_code: i64,
}

/// Run `main` from the given executor on one backend. Panics on
/// compilation errors.
pub fn run_backend(executor: &TestExecutor, backend: Backend) -> (RunResult, String) {
    let output = compile_program("main", executor);
    assert!(
        !output.analyzed.has_errors(),
        "compilation failed: {:#?}",
        output.analyzed.diagnostics
    );

    let result = execute(
        &output.analyzed,
        executor,
        backend,
        CancelContext::new(),
        DEFAULT_CALLSTACK_LIMIT,
    );
    (result, executor.output())
}

/// Run a single-module program on both backends and check the expected
/// output; also asserts the backends agree with each other.
pub fn check_program(source: &str, expected: Expected) {
    check_with(|| TestExecutor::new().with_module("main", source), expected);
}

/// Same as [`check_program`] with a custom executor per backend run.
pub fn check_with(build: impl Fn() -> TestExecutor, expected: Expected) {
    let tree_executor = build();
    let (tree_result, tree_output) = run_backend(&tree_executor, Backend::Tree);

    let vm_executor = build();
    let (vm_result, vm_output) = run_backend(&vm_executor, Backend::Vm);

    assert_eq!(
        tree_output, expected.stdout,
        "tree backend stdout mismatch (result: {tree_result:?})"
    );
    assert_eq!(
        tree_result.exit_code, expected.exit_code,
        "tree backend exit code mismatch (error: {:?})",
        tree_result.error
    );

    assert_eq!(vm_output, tree_output, "backends disagree on stdout");
    assert_eq!(
        vm_result.exit_code, tree_result.exit_code,
        "backends disagree on the exit code (vm error: {:?})",
        vm_result.error
    );

    let tree_kind = tree_result.value.as_ref().map(|v| v.kind());
    let vm_kind = vm_result.value.as_ref().map(|v| v.kind());
    assert_eq!(tree_kind, vm_kind, "backends disagree on the value kind");
}
