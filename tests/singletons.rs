//! Singleton, template and impl block behavior across both backends.

use homescript::analyzer::types::{FunctionType, Type};
use homescript::host::{TemplateSpec, TestExecutor};
use homescript::value::Value;
use test_utils::{check_with, Expected};

fn power_template() -> TemplateSpec {
    TemplateSpec {
        base_methods: vec![(
            "set_power".to_string(),
            FunctionType::new(vec![("state".to_string(), Type::Bool)], Type::Null),
        )],
        capabilities: vec![(
            "dim".to_string(),
            vec![(
                "set_level".to_string(),
                FunctionType::new(vec![("level".to_string(), Type::Int)], Type::Null),
            )],
        )],
    }
}

const LAMP_SOURCE: &str = "import { Power } from host;\n\
     let $Lamp: { on: bool, level: int };\n\
     impl Power with { dim } for $Lamp {\n\
         fn set_power(@Lamp lamp, state: bool) {\n\
             lamp.on = state;\n\
         }\n\
         fn set_level(@Lamp lamp, level: int) {\n\
             lamp.level = level;\n\
         }\n\
     }\n\
     fn main() {\n\
         $Lamp.set_power(true);\n\
         $Lamp.set_level(80);\n\
         println($Lamp.on, $Lamp.level);\n\
     }";

#[test]
fn impl_methods_mutate_the_singleton() {
    check_with(
        || {
            TestExecutor::new()
                .with_module("main", LAMP_SOURCE)
                .with_template("host", "Power", power_template())
        },
        Expected {
            stdout: "true 80\n",
            exit_code: 0,
        },
    );
}

#[test]
fn host_provided_singleton_value_is_used() {
    check_with(
        || {
            TestExecutor::new()
                .with_module(
                    "main",
                    "let $Config: { city: str };\n\
                     fn main() { println($Config.city); }",
                )
                .with_singleton(
                    "Config",
                    Value::new_object(vec![(
                        "city".to_string(),
                        Value::String("Kiel".to_string()),
                    )]),
                )
        },
        Expected {
            stdout: "Kiel\n",
            exit_code: 0,
        },
    );
}

#[test]
fn missing_singleton_value_synthesizes_the_zero_value() {
    check_with(
        || {
            TestExecutor::new().with_module(
                "main",
                "let $State: { count: int, label: str };\n\
                 fn main() { println($State.count, $State.label.len()); }",
            )
        },
        Expected {
            stdout: "0 0\n",
            exit_code: 0,
        },
    );
}

#[test]
fn extractor_parameters_bind_the_current_singleton() {
    check_with(
        || {
            TestExecutor::new()
                .with_module(
                    "main",
                    "let $Meter: { total: int };\n\
                     fn read(@Meter meter) -> int { return meter.total; }\n\
                     fn main() { println(read()); }",
                )
                .with_singleton(
                    "Meter",
                    Value::new_object(vec![("total".to_string(), Value::Int(1337))]),
                )
        },
        Expected {
            stdout: "1337\n",
            exit_code: 0,
        },
    );
}

#[test]
fn singleton_state_persists_across_calls() {
    check_with(
        || {
            TestExecutor::new()
                .with_module(
                    "main",
                    "import { Power } from host;\n\
                     let $Lamp: { on: bool, level: int };\n\
                     impl Power for $Lamp {\n\
                         fn set_power(@Lamp lamp, state: bool) { lamp.on = state; }\n\
                     }\n\
                     fn flip(n: int) {\n\
                         $Lamp.set_power(n % 2 == 0);\n\
                     }\n\
                     fn main() {\n\
                         flip(1);\n\
                         println($Lamp.on);\n\
                         flip(2);\n\
                         println($Lamp.on);\n\
                     }",
                )
                .with_template("host", "Power", power_template())
        },
        Expected {
            stdout: "false\ntrue\n",
            exit_code: 0,
        },
    );
}
