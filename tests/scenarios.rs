//! End-to-end scenarios executed on both backends.

use test_utils::{check_program, Expected};

#[test]
fn list_push_and_len() {
    check_program(
        "fn main() { let xs = [1, 2, 3]; xs.push(4); println(xs.len()); }",
        Expected {
            stdout: "4\n",
            exit_code: 0,
        },
    );
}

#[test]
fn while_loop_counts_to_five() {
    check_program(
        "fn main() { let x = 0; while x < 5 { x = x + 1; } println(x); }",
        Expected {
            stdout: "5\n",
            exit_code: 0,
        },
    );
}

#[test]
fn uncaught_throw_exits_nonzero() {
    check_program(
        "fn main() { throw(\"boom\"); }",
        Expected {
            stdout: "",
            exit_code: 1,
        },
    );
}

#[test]
fn try_catch_binds_the_message() {
    check_program(
        "fn main() { try { throw(\"nope\"); } catch e { println(e.message) } }",
        Expected {
            stdout: "nope\n",
            exit_code: 0,
        },
    );
}

#[test]
fn objects_have_reference_semantics() {
    check_program(
        "fn main() { let o = new { a: 1 }; let p = o; p.a = 2; assert(o.a == 2); }",
        Expected {
            stdout: "",
            exit_code: 0,
        },
    );
}

#[test]
fn for_over_range() {
    check_program(
        "fn main() { for i in 0..3 { print(i) } }",
        Expected {
            stdout: "012",
            exit_code: 0,
        },
    );
}

#[test]
fn match_expression_selects_arm() {
    check_program(
        "fn main() { println(match 2 { 1 => \"a\", 2 => \"b\", _ => \"c\" }); }",
        Expected {
            stdout: "b\n",
            exit_code: 0,
        },
    );
}

#[test]
fn exit_sets_the_process_code() {
    check_program(
        "fn main() { exit(3); println(\"not reached\"); }",
        Expected {
            stdout: "",
            exit_code: 3,
        },
    );
}

#[test]
fn functions_and_recursion() {
    check_program(
        "fn fib(n: int) -> int {\n\
             if n < 2 { return n; }\n\
             return fib(n - 1) + fib(n - 2);\n\
         }\n\
         fn main() { println(fib(10)); }",
        Expected {
            stdout: "55\n",
            exit_code: 0,
        },
    );
}

#[test]
fn string_iteration_yields_scalar_values() {
    check_program(
        "fn main() { for c in \"añc\" { print(c, \"\") } }",
        Expected {
            stdout: "a ñ c ",
            exit_code: 0,
        },
    );
}

#[test]
fn reversed_range_counts_down() {
    check_program(
        "fn main() { for i in 3..0 { print(i) } }",
        Expected {
            stdout: "321",
            exit_code: 0,
        },
    );
}

#[test]
fn block_expressions_produce_values() {
    check_program(
        "fn main() { let x = { let a = 2; a * 21 }; println(x); }",
        Expected {
            stdout: "42\n",
            exit_code: 0,
        },
    );
}

#[test]
fn closures_capture_by_reference() {
    check_program(
        "fn main() {\n\
             let count = 0;\n\
             let bump = fn() { count = count + 1; };\n\
             bump();\n\
             bump();\n\
             println(count);\n\
         }",
        Expected {
            stdout: "2\n",
            exit_code: 0,
        },
    );
}

#[test]
fn compound_assignment_operators() {
    check_program(
        "fn main() { let x = 10; x += 5; x *= 2; x -= 6; x /= 4; println(x); }",
        Expected {
            stdout: "6\n",
            exit_code: 0,
        },
    );
}

#[test]
fn loop_with_break_and_continue() {
    check_program(
        "fn main() {\n\
             let i = 0;\n\
             loop {\n\
                 i += 1;\n\
                 if i == 3 { continue; }\n\
                 if i > 5 { break; }\n\
                 print(i);\n\
             }\n\
         }",
        Expected {
            stdout: "1245",
            exit_code: 0,
        },
    );
}

#[test]
fn lazy_globals_initialize_on_first_use() {
    check_program(
        "let counter = boot();\n\
         fn boot() -> int { println(\"init\"); return 7; }\n\
         fn main() { println(counter); println(counter); }",
        Expected {
            stdout: "init\n7\n7\n",
            exit_code: 0,
        },
    );
}

#[test]
fn spawn_runs_the_task() {
    check_program(
        "fn worker(x: int) { println(x * 2); }\n\
         fn main() { spawn worker(21); println(\"done\"); }",
        Expected {
            stdout: "42\ndone\n",
            exit_code: 0,
        },
    );
}

#[test]
fn spawned_task_throw_is_silent() {
    check_program(
        "fn worker() { throw(\"inside\"); }\n\
         fn main() { spawn worker(); println(\"alive\"); }",
        Expected {
            stdout: "alive\n",
            exit_code: 0,
        },
    );
}
