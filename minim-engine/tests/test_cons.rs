//! Tests for pairs and the list primitives.

use pretty_assertions::assert_eq;

use minim_engine::Value;

fn eval(source: &str) -> Value {
    let env = minim_engine::new_env().expect("create core environment");
    minim_engine::eval_str(&env, source).expect("evaluation")
}

#[test]
fn test_cons_car_cdr() {
    assert_eq!(eval("(car (cons 1 2))"), Value::Int(1));
    assert_eq!(eval("(cdr (cons 1 2))"), Value::Int(2));
    assert_eq!(eval("(first (pair 1 2))"), Value::Int(1));
    assert_eq!(eval("(rest (pair 1 2))"), Value::Int(2));
}

#[test]
fn test_list_builds_proper_lists() {
    assert_eq!(
        eval("(list 1 2 3)"),
        Value::list([Value::Int(1), Value::Int(2), Value::Int(3)])
    );
    assert_eq!(eval("(list)"), Value::Nil);
}

#[test]
fn test_pair_mutation() {
    assert_eq!(
        eval("(begin (define foo (pair 1 2)) (set-car! foo 3) foo)"),
        Value::cons(Value::Int(3), Value::Int(2))
    );
    assert_eq!(
        eval("(begin (define foo (pair 1 2)) (set-cdr! foo 3) foo)"),
        Value::cons(Value::Int(1), Value::Int(3))
    );
}

#[test]
fn test_eq_is_identity_for_pairs() {
    assert_eq!(eval("(begin (define p (cons 1 2)) (eq? p p))"), Value::Bool(true));
    assert_eq!(eval("(eq? (cons 1 2) (cons 1 2))"), Value::Bool(false));
    assert_eq!(eval("(equal? (cons 1 2) (cons 1 2))"), Value::Bool(true));
}

#[test]
fn test_type_predicates() {
    assert_eq!(eval("(boolean? #t)"), Value::Bool(true));
    assert_eq!(eval("(boolean? (= 1 2))"), Value::Bool(true));
    assert_eq!(eval("(pair? (pair 1 2))"), Value::Bool(true));
    assert_eq!(eval("(pair? #t)"), Value::Bool(false));
    assert_eq!(eval("(pair? '())"), Value::Bool(false));
    assert_eq!(eval("(null? '())"), Value::Bool(true));
    assert_eq!(eval("(null? (cons 1 2))"), Value::Bool(false));
    assert_eq!(eval("(symbol? 'foo)"), Value::Bool(true));
    assert_eq!(eval("(symbol? 2)"), Value::Bool(false));
    assert_eq!(eval("(string? \"foo\")"), Value::Bool(true));
    assert_eq!(eval("(number? 2)"), Value::Bool(true));
    assert_eq!(eval("(number? 2.0)"), Value::Bool(true));
    assert_eq!(eval("(number? 2+3i)"), Value::Bool(true));
    assert_eq!(eval("(procedure? pair)"), Value::Bool(true));
    assert_eq!(eval("(procedure? (lambda (x) x))"), Value::Bool(true));
    assert_eq!(eval("(procedure? 5)"), Value::Bool(false));
}

#[test]
fn test_quoted_structure_equals_constructed() {
    assert_eq!(
        eval("'(1 (2 3))"),
        Value::list([
            Value::Int(1),
            Value::list([Value::Int(2), Value::Int(3)]),
        ])
    );
    assert_eq!(eval("'(1 . 2)"), Value::cons(Value::Int(1), Value::Int(2)));
}
