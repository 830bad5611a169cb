//! End-to-end `Engine::execute` scenarios, exercising the full
//! lex/parse/compile/run pipeline the way a host embedding the engine would.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use ape::{Engine, EngineConfig};
use ape_runtime::Value;

#[test]
fn executes_arithmetic_with_correct_precedence() {
    let mut engine = Engine::default();
    let result = engine.execute("1 + 2 * 3;").unwrap();
    assert_eq!(result.as_number(), Some(7.0));
}

#[test]
fn recursive_fibonacci_via_current_function_capture() {
    let mut engine = Engine::default();
    let result = engine
        .execute(
            "const fib = fn(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }; \
             fib(10);",
        )
        .unwrap();
    assert_eq!(result.as_number(), Some(55.0));
}

#[test]
fn template_string_interpolation_splices_values_and_parses_the_trailing_statement() {
    let mut engine = Engine::default();
    let result = engine
        .execute(
            "const name = \"world\"; const n = 1 + 2; \
             const greeting = \"hi ${name}, ${n} done\"; greeting;",
        )
        .unwrap();
    assert_eq!(format!("{result}"), "\"hi world, 3 done\"");
}

#[test]
fn map_literal_indexing_by_string_key() {
    let mut engine = Engine::default();
    let result = engine.execute("const m = {\"a\": 1, \"b\": 2}; m[\"a\"] + m[\"b\"];").unwrap();
    assert_eq!(result.as_number(), Some(3.0));
}

#[test]
fn execution_time_cap_raises_a_timeout_error() {
    let config = EngineConfig::builder()
        .with_max_execution_time(Duration::from_millis(10))
        .build();
    let mut engine = Engine::new(config);
    let errs = engine.execute("while (true) { }").expect_err("should time out");
    assert_eq!(errs[0].r#type, ape_core::ErrorKind::Timeout);
}

#[test]
fn string_concatenation_via_add() {
    let mut engine = Engine::default();
    let result = engine.execute("\"foo\" + \"bar\";").unwrap();
    assert_eq!(ape::value::as_str(result), Some("foobar".to_string()));
}

#[test]
fn postfix_increment_yields_the_pre_increment_value() {
    let mut engine = Engine::default();
    let result = engine
        .execute("var i = 5; var snapshot = i++; [snapshot, i];")
        .unwrap();
    let items = ape::value::as_array(result).unwrap();
    assert_eq!(items[0].as_number(), Some(5.0));
    assert_eq!(items[1].as_number(), Some(6.0));
}

#[test]
fn postfix_decrement_yields_the_pre_decrement_value() {
    let mut engine = Engine::default();
    let result = engine
        .execute("var i = 5; var snapshot = i--; [snapshot, i];")
        .unwrap();
    let items = ape::value::as_array(result).unwrap();
    assert_eq!(items[0].as_number(), Some(5.0));
    assert_eq!(items[1].as_number(), Some(4.0));
}

#[test]
fn compound_assign_desugars_to_target_op_value() {
    let mut engine = Engine::default();
    let result = engine.execute("var x = 10; x += 5; x;").unwrap();
    assert_eq!(result.as_number(), Some(15.0));
}

#[test]
fn closures_capture_free_variables() {
    let mut engine = Engine::default();
    let result = engine
        .execute(
            "fn make_adder(n) { return fn(x) { return x + n; }; } \
             var add5 = make_adder(5); add5(10);",
        )
        .unwrap();
    assert_eq!(result.as_number(), Some(15.0));
}

#[test]
fn for_loop_accumulates() {
    let mut engine = Engine::default();
    let result = engine
        .execute("var sum = 0; for (var i = 0; i < 5; i = i + 1) { sum = sum + i; } sum;")
        .unwrap();
    assert_eq!(result.as_number(), Some(10.0));
}

#[test]
fn foreach_loop_over_an_array() {
    let mut engine = Engine::default();
    let result = engine
        .execute("var sum = 0; for (x in [1, 2, 3]) { sum = sum + x; } sum;")
        .unwrap();
    assert_eq!(result.as_number(), Some(6.0));
}

#[test]
fn recover_catches_a_runtime_error_and_binds_it() {
    let mut engine = Engine::default();
    let result = engine
        .execute(
            "fn risky() { \
                 recover (e) { return \"caught\"; } \
                 return 1 + [1, 2]; \
             } \
             risky();",
        )
        .unwrap();
    assert_eq!(ape::value::as_str(result), Some("caught".to_string()));
}

#[test]
fn comparison_operator_overload_is_dispatched_to_a_map_handler() {
    let mut engine = Engine::default();
    let result = engine
        .execute(
            "fn make_box(n) { \
                 return { \
                     \"value\": n, \
                     \"__operator_compare__\": fn(a, b) { return a[\"value\"] - b[\"value\"]; } \
                 }; \
             } \
             make_box(3) < make_box(5);",
        )
        .unwrap();
    assert_eq!(result.as_bool(), Some(true));
}

#[test]
fn arithmetic_operator_overload_is_dispatched_to_a_map_handler() {
    let mut engine = Engine::default();
    let result = engine
        .execute(
            "fn make_box(n) { \
                 return { \
                     \"value\": n, \
                     \"__operator_add__\": fn(a, b) { return a[\"value\"] + b[\"value\"]; } \
                 }; \
             } \
             make_box(3) + make_box(4);",
        )
        .unwrap();
    assert_eq!(result.as_number(), Some(7.0));
}

#[test]
fn host_registered_native_function_is_callable_from_script() {
    let mut engine = Engine::default();
    engine.set_native_function("double", |_vm, args| Ok(Value::number(args[0].as_number().unwrap_or(0.0) * 2.0)));
    let result = engine.execute("double(21);").unwrap();
    assert_eq!(result.as_number(), Some(42.0));
}

#[test]
fn stdout_writer_callback_is_reachable_from_a_registered_native() {
    let captured: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = captured.clone();
    let config = EngineConfig::builder()
        .with_stdout_writer(move |s| sink.borrow_mut().push(s.to_string()))
        .build();
    let mut engine = Engine::new(config);

    let writer = engine.stdout_writer().expect("configured above");
    engine.set_native_function("print", move |_vm, args| {
        if let Some(s) = ape::value::as_str(args[0]) {
            writer(&s);
        }
        Ok(Value::null())
    });

    engine.execute("print(\"hello\");").unwrap();
    assert_eq!(captured.borrow().as_slice(), ["hello".to_string()]);
}

#[test]
fn redeclaring_a_module_global_fails_outside_repl_mode() {
    let mut engine = Engine::default();
    engine.execute("const x = 1;").unwrap();
    let err = engine.execute("const x = 2;");
    assert!(err.is_err());
}

#[test]
fn redeclaring_a_module_global_succeeds_in_repl_mode() {
    let config = EngineConfig::builder().with_repl_mode(true).build();
    let mut engine = Engine::new(config);
    engine.execute("const x = 1;").unwrap();
    let result = engine.execute("const x = 2; x;").unwrap();
    assert_eq!(result.as_number(), Some(2.0));
}

#[test]
fn import_resolves_through_the_file_reader_callback() {
    let config = EngineConfig::builder()
        .with_file_reader(|path| {
            if path.ends_with("mathlib.ape") {
                Ok("const two = 2;".to_string())
            } else {
                Err(ape_core::EngineError::compilation(format!("no such module: {path}"), ape_core::SourcePosition::synthetic()))
            }
        })
        .build();
    let mut engine = Engine::new(config);
    let result = engine.execute("import \"mathlib\"; mathlib::two + 40;").unwrap();
    assert_eq!(result.as_number(), Some(42.0));
}
