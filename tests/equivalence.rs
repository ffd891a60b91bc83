//! Backend equivalence: for spawn-free programs that compile without
//! errors, the tree interpreter and the VM must agree on printed output,
//! exit code and final value kind.

use homescript::host::TestExecutor;
use homescript::Backend;
use test_utils::run_backend;

/// A corpus of spawn-free programs stressing different language areas.
const CORPUS: &[&str] = &[
    // arithmetic and precedence
    "fn main() { println(1 + 2 * 3 - 4 / 2, 2 ** 3 ** 2, 7 % 3); }",
    // bitwise ladder
    "fn main() { println(1 << 4 | 3 & 1 ^ 2, 255 >> 2); }",
    // comparisons and logic
    "fn main() { println(1 < 2 && 2 <= 2 || false, !(3 > 4)); }",
    // string building in a loop
    "fn main() { let s = \"\"; for i in 0..4 { s += i.to_string(); } println(s); }",
    // nested functions and early returns
    "fn classify(n: int) -> str {\n\
         if n < 0 { return \"neg\"; }\n\
         if n == 0 { return \"zero\"; }\n\
         return \"pos\";\n\
     }\n\
     fn main() { println(classify(-5), classify(0), classify(5)); }",
    // closures over mutable state
    "fn main() {\n\
         let total = 0;\n\
         let add = fn(n: int) { total += n; };\n\
         for i in 1..=4 { add(i); }\n\
         println(total);\n\
     }",
    // higher order functions
    "fn apply(f: fn(int) -> int, x: int) -> int { return f(x); }\n\
     fn main() { println(apply(fn(n: int) -> int { n * n }, 9)); }",
    // aggregates and reference semantics
    "fn grow(xs: [int]) { xs.push(xs.len()); }\n\
     fn main() { let xs = [0]; grow(xs); grow(xs); println(xs); }",
    // match with wildcard
    "fn main() {\n\
         for i in 0..5 {\n\
             print(match i { 0 => \"z\", 1 => \"o\", _ => \"+\" });\n\
         }\n\
     }",
    // try/catch value production
    "fn main() {\n\
         let results = [];\n\
         for d in [2, 0, 5] {\n\
             results.push(try { 10 / d } catch e { -1 });\n\
         }\n\
         println(results);\n\
     }",
    // options and casts
    "fn main() {\n\
         let xs = [1, 2, 3] as [float];\n\
         let total = 0f;\n\
         for x in xs { total += x; }\n\
         println(total, ?total);\n\
     }",
    // lazy globals with side effects
    "let seed = make();\n\
     fn make() -> int { println(\"global init\"); return 3; }\n\
     fn main() { println(seed + seed); }",
    // deep object plumbing through json
    "fn main() {\n\
         let o = new { a: [1, 2], b: new { c: \"x\" } };\n\
         println(o.to_json());\n\
     }",
    // while with break/continue
    "fn main() {\n\
         let i = 0;\n\
         let acc = 0;\n\
         while true {\n\
             i += 1;\n\
             if i % 2 == 0 { continue; }\n\
             if i > 9 { break; }\n\
             acc += i;\n\
         }\n\
         println(acc);\n\
     }",
    // runtime errors propagate identically
    "fn main() { let xs = [1]; println(xs[3]); }",
    "fn main() { throw(\"expected failure\"); }",
];

#[test]
fn corpus_matches_across_backends() {
    for (index, source) in CORPUS.iter().enumerate() {
        let tree_executor = TestExecutor::new().with_module("main", source);
        let (tree_result, tree_output) = run_backend(&tree_executor, Backend::Tree);

        let vm_executor = TestExecutor::new().with_module("main", source);
        let (vm_result, vm_output) = run_backend(&vm_executor, Backend::Vm);

        assert_eq!(
            tree_output, vm_output,
            "stdout diverged for corpus program #{index}:\n{source}"
        );
        assert_eq!(
            tree_result.exit_code, vm_result.exit_code,
            "exit code diverged for corpus program #{index}:\n{source}"
        );
        assert_eq!(
            tree_result.value.as_ref().map(|v| v.kind()),
            vm_result.value.as_ref().map(|v| v.kind()),
            "value kind diverged for corpus program #{index}:\n{source}"
        );
        assert_eq!(
            tree_result.error.as_ref().map(|e| e.kind),
            vm_result.error.as_ref().map(|e| e.kind),
            "error kind diverged for corpus program #{index}:\n{source}"
        );
    }
}
