//! Value model behavior through full programs: JSON bridge, deep casts,
//! display forms, builtin methods.

use test_utils::{check_program, Expected};

#[test]
fn json_round_trip() {
    check_program(
        "fn main() {\n\
             let o = new { name: \"kitchen\", level: 3, tags: [\"a\", \"b\"] };\n\
             let encoded = o.to_json();\n\
             let back = encoded.parse_json() as { ? };\n\
             println(back.get(\"name\").unwrap() as str);\n\
             println(back.get(\"level\").unwrap() as int);\n\
         }",
        Expected {
            stdout: "kitchen\n3\n",
            exit_code: 0,
        },
    );
}

#[test]
fn json_null_becomes_none() {
    check_program(
        "fn main() {\n\
             let v = \"{\\\"a\\\": null}\".parse_json() as { ? };\n\
             let a = v.get(\"a\").unwrap() as ?int;\n\
             println(a.is_none());\n\
         }",
        Expected {
            stdout: "true\n",
            exit_code: 0,
        },
    );
}

#[test]
fn deep_cast_converts_elementwise() {
    check_program(
        "fn main() {\n\
             let xs = [1, 2, 3] as [float];\n\
             println(xs);\n\
         }",
        Expected {
            stdout: "[1f, 2f, 3f]\n",
            exit_code: 0,
        },
    );
}

#[test]
fn erasure_view_shares_storage() {
    check_program(
        "fn main() {\n\
             let o = new { level: 1 };\n\
             let dynamic = o as { ? };\n\
             dynamic.set(\"level\", 9);\n\
             println(o.level);\n\
         }",
        Expected {
            stdout: "9\n",
            exit_code: 0,
        },
    );
}

#[test]
fn dynamic_object_back_to_static() {
    check_program(
        "fn main() {\n\
             let dynamic = \"{\\\"a\\\": 1, \\\"b\\\": 2}\".parse_json() as { ? };\n\
             let o = dynamic as { a: int, b: int };\n\
             println(o.a + o.b);\n\
         }",
        Expected {
            stdout: "3\n",
            exit_code: 0,
        },
    );
}

#[test]
fn option_wrapping_with_question_mark() {
    check_program(
        "fn main() {\n\
             let v = ?42;\n\
             println(v.is_some(), v.unwrap());\n\
             let empty = null as ?int;\n\
             println(empty.is_none());\n\
         }",
        Expected {
            stdout: "true 42\ntrue\n",
            exit_code: 0,
        },
    );
}

#[test]
fn string_methods() {
    check_program(
        "fn main() {\n\
             println(\"Hello World\".to_upper());\n\
             println(\"a,b,c\".split(\",\").len());\n\
             println(\"kitten\".compare_lev(\"sitting\"));\n\
             println(\"42\".parse_int().unwrap() + 1);\n\
         }",
        Expected {
            stdout: "HELLO WORLD\n3\n3\n43\n",
            exit_code: 0,
        },
    );
}

#[test]
fn list_methods_and_sorting() {
    check_program(
        "fn main() {\n\
             let xs = [3, 1, 2];\n\
             xs.sort();\n\
             println(xs);\n\
             println(xs.contains(2), xs.last().unwrap());\n\
             xs.push_front(0);\n\
             println(xs.pop_front().unwrap());\n\
         }",
        Expected {
            stdout: "[1, 2, 3]\ntrue 3\n0\n",
            exit_code: 0,
        },
    );
}

#[test]
fn range_methods() {
    check_program(
        "fn main() {\n\
             let r = 2..7;\n\
             println(r.start(), r.end(), r.diff());\n\
             for i in r.rev() { print(i) }\n\
         }",
        Expected {
            stdout: "2 7 5\n65432",
            exit_code: 0,
        },
    );
}

#[test]
fn float_display_keeps_the_f_suffix() {
    check_program(
        "fn main() { println(2f, 2.5, (3.7).trunc()); }",
        Expected {
            stdout: "2f 2.5 3\n",
            exit_code: 0,
        },
    );
}

#[test]
fn negative_list_indices_count_from_the_back() {
    check_program(
        "fn main() { let xs = [1, 2, 3]; println(xs[-1]); }",
        Expected {
            stdout: "3\n",
            exit_code: 0,
        },
    );
}

#[test]
fn structural_equality_ignores_object_field_order() {
    check_program(
        "fn main() {\n\
             let a = new { x: 1, y: 2 };\n\
             let b = new { y: 2, x: 1 };\n\
             println(a == b);\n\
         }",
        Expected {
            stdout: "true\n",
            exit_code: 0,
        },
    );
}
