//! Tests for first-class continuations.

use pretty_assertions::assert_eq;

use minim_engine::{error::Error, Value};

fn eval(source: &str) -> Value {
    let env = minim_engine::new_env().expect("create core environment");
    minim_engine::eval_str(&env, source).expect("evaluation")
}

#[test]
fn test_normal_return() {
    assert_eq!(eval("(+ 1 (call/cc (lambda (k) 10)))"), Value::Int(11));
}

#[test]
fn test_escaping_invocation() {
    assert_eq!(eval("(+ 1 (call/cc (lambda (k) (k 10))))"), Value::Int(11));
}

#[test]
fn test_escape_abandons_rest_of_body() {
    assert_eq!(
        eval("(call/cc (lambda (k) (begin (k 5) 99)))"),
        Value::Int(5)
    );
}

#[test]
fn test_invocation_without_argument_resumes_with_nil() {
    assert_eq!(eval("(call/cc (lambda (k) (k)))"), Value::Nil);
}

#[test]
fn test_long_name_alias() {
    assert_eq!(
        eval("(+ 1 (call-with-current-continuation (lambda (k) (k 10))))"),
        Value::Int(11)
    );
}

#[test]
fn test_escape_from_nested_calls() {
    let value = eval(
        r"(begin
            (define (inner k) (k 42))
            (define (outer k) (begin (inner k) 99))
            (call/cc (lambda (k) (outer k))))",
    );
    assert_eq!(value, Value::Int(42));
}

#[test]
fn test_saved_continuation_resumes_in_later_form() {
    // Invoking a saved continuation replays the rest of the captured
    // form: here, adding 1 to the resumption value.
    let value = eval(
        r"(define saved '())
          (+ 1 (call/cc (lambda (k) (begin (set! saved k) 10))))
          (saved 41)",
    );
    assert_eq!(value, Value::Int(42));
}

#[test]
fn test_continuation_rejects_multiple_arguments() {
    let env = minim_engine::new_env().expect("create core environment");
    let result = minim_engine::eval_str(&env, "(call/cc (lambda (k) (k 1 2)))");
    assert!(matches!(result, Err(Error::WrongArgNumber(_))));
}

#[test]
fn test_continuation_is_a_procedure() {
    assert_eq!(
        eval("(call/cc (lambda (k) (procedure? k)))"),
        Value::Bool(true)
    );
}

#[test]
fn test_host_invocation_of_saved_continuation() {
    let env = minim_engine::new_env().expect("create core environment");
    minim_engine::eval_str(
        &env,
        r"(define saved '())
          (+ 1 (call/cc (lambda (k) (begin (set! saved k) 10))))",
    )
    .expect("evaluation");

    let saved = env.borrow().lookup("saved").expect("saved continuation");
    assert!(matches!(saved, Value::Continuation(_)));

    let value = minim_engine::call(&saved, &[Value::Int(41)]).expect("host invocation");
    assert_eq!(value, Value::Int(42));
}
