//! Tests for generated bytecode: literal interning, peephole
//! specialization, label and lexical resolution.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use minim_engine::{error::Error, Env, Form, Handle, Opcode, Value};

fn compile_one(source: &str) -> (Handle<Env>, Rc<Form>) {
    let env = minim_engine::new_env().expect("create core environment");
    let expr = minim_engine::parse(source).expect("parse").remove(0);
    let form = minim_engine::compile(&env, &expr).expect("compile");
    (env, form)
}

#[test]
fn test_literal_interning_is_type_aware() {
    // 42 appears twice and shares a slot; 42.0 is a distinct literal.
    let (_env, form) = compile_one("(+ 42 42.0 42)");
    assert_eq!(form.literals(), &[Value::Int(42), Value::Float(42.0)]);
}

#[test]
fn test_string_literals_intern_structurally() {
    let (_env, form) = compile_one("(list \"a\" \"a\" \"b\")");
    assert_eq!(
        form.literals(),
        &[Value::Str("a".to_string()), Value::Str("b".to_string())]
    );
}

#[test]
fn test_peephole_specialization() {
    for (source, op) in [
        ("0", Opcode::Push0),
        ("1", Opcode::Push1),
        ("#t", Opcode::PushTrue),
        ("#f", Opcode::PushFalse),
        ("'()", Opcode::PushNil),
    ] {
        let (_env, form) = compile_one(source);
        assert_eq!(form.bytecode(), &[op.encode()], "for source {source:?}");
        assert!(form.literals().is_empty(), "for source {source:?}");
    }

    // The specialization is type-aware: 0.0 is not 0 and stays a literal.
    let (_env, form) = compile_one("0.0");
    assert_eq!(
        form.bytecode(),
        &[Opcode::PushLiteral.encode(), 0],
    );
    assert_eq!(form.literals(), &[Value::Float(0.0)]);
}

/// Executing the specialized push and the generic literal push leaves the
/// same value behind.
#[test]
fn test_peephole_equivalence() {
    let env = minim_engine::new_env().expect("create core environment");
    for (specialized, quoted, expected) in [
        ("0", "(car (quote (0)))", Value::Int(0)),
        ("1", "(car (quote (1)))", Value::Int(1)),
        ("#t", "(car (quote (#t)))", Value::Bool(true)),
        ("#f", "(car (quote (#f)))", Value::Bool(false)),
        ("'()", "(car (quote (())))", Value::Nil),
    ] {
        let fast = minim_engine::eval_str(&env, specialized).expect("specialized");
        let slow = minim_engine::eval_str(&env, quoted).expect("literal table");
        assert_eq!(fast, expected);
        assert_eq!(slow, expected);
    }
}

#[test]
fn test_goto_targets_resolve_to_final_ips() {
    let (_env, form) = compile_one("(if #t 1 2)");

    // 0: push_true
    // 1: goto_if_not_false 7
    // 3: push_literal 0     ; 2
    // 5: goto 8
    // 7: push_1
    let expected = [
        Opcode::PushTrue.encode(),
        Opcode::GotoIfNotFalse.encode(),
        7,
        Opcode::PushLiteral.encode(),
        0,
        Opcode::Goto.encode(),
        8,
        Opcode::Push1.encode(),
    ];
    assert_eq!(form.bytecode(), &expected);
    assert_eq!(form.literals(), &[Value::Int(2)]);
}

#[test]
fn test_local_resolution_by_depth_and_index() {
    let (_env, form) = compile_one("(lambda (x) (lambda (y) (list x y)))");

    // The outer procedure is the only literal of the form.
    let outer = match &form.literals()[0] {
        Value::Procedure(proc) => proc.clone(),
        other => panic!("expected procedure literal, got {other:?}"),
    };
    let inner = match &outer.form().literals()[0] {
        Value::Procedure(proc) => proc.clone(),
        other => panic!("expected nested procedure literal, got {other:?}"),
    };

    let code = inner.form().bytecode();
    // x lives one frame up at slot 0, y in the current frame at slot 0.
    let push_local_depth = Opcode::PushLocalDepth.encode();
    let push_local = Opcode::PushLocal.encode();
    assert!(
        code.windows(3).any(|w| w == [push_local_depth, 1, 0]),
        "inner body resolves x through one parent hop: {code:?}"
    );
    assert!(
        code.windows(2).any(|w| w == [push_local, 0]),
        "inner body resolves y locally: {code:?}"
    );
}

#[test]
fn test_closure_creation_is_literal_plus_fix() {
    let (_env, form) = compile_one("(lambda (x) x)");
    assert_eq!(
        form.bytecode(),
        &[
            Opcode::PushLiteral.encode(),
            0,
            Opcode::FixLexical.encode(),
        ],
    );
    assert!(matches!(form.literals()[0], Value::Procedure(_)));
}

#[test]
fn test_unbound_variable_fails_compilation() {
    let env = minim_engine::new_env().expect("create core environment");
    let expr = minim_engine::parse("nowhere").expect("parse").remove(0);
    let result = minim_engine::compile(&env, &expr);
    assert!(matches!(result, Err(Error::UnboundVariable(name)) if name == "nowhere"));
}

#[test]
fn test_compile_rejects_non_expression_values() {
    // A macro expanding to itself-as-value cannot happen through the
    // reader, but the compiler still rejects non-program values.
    let env = minim_engine::new_env().expect("create core environment");
    let prim = env.borrow().lookup("+").expect("core primitive");
    let result = minim_engine::compile(&env, &prim);
    assert!(matches!(result, Err(Error::Compile(_))));
}

#[test]
fn test_disassembly_lists_mnemonics() {
    let (_env, form) = compile_one("(if #t 1 2)");
    let listing = form.disassemble();
    assert!(listing.contains("push_true"));
    assert!(listing.contains("goto_if_not_false"));
    assert!(listing.contains("push_literal"));
}
