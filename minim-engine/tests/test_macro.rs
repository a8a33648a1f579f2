//! Tests for `define-syntax` and `syntax-rules` expansion.

use pretty_assertions::assert_eq;

use minim_engine::{error::Error, Value};

fn eval(source: &str) -> Value {
    let env = minim_engine::new_env().expect("create core environment");
    minim_engine::eval_str(&env, source).expect("evaluation")
}

#[test]
fn test_when_macro() {
    let value = eval(
        r"(begin
            (define-syntax when
              (syntax-rules ()
                ((_ c e ...) (if c (begin e ...) '()))))
            (when #t 1 2 3))",
    );
    assert_eq!(value, Value::Int(3));
}

#[test]
fn test_when_macro_false_branch() {
    let value = eval(
        r"(begin
            (define-syntax when
              (syntax-rules ()
                ((_ c e ...) (if c (begin e ...) '()))))
            (when #f 1 2 3))",
    );
    assert_eq!(value, Value::Nil);
}

#[test]
fn test_define_syntax_evaluates_to_nil() {
    let value = eval("(define-syntax noop (syntax-rules () ((_) 0)))");
    assert_eq!(value, Value::Nil);
}

#[test]
fn test_macro_in_tail_position() {
    let value = eval(
        r"(begin
            (define-syntax when
              (syntax-rules ()
                ((_ c e ...) (if c (begin e ...) '()))))
            (define (f c) (when c 1 2))
            (f #t))",
    );
    assert_eq!(value, Value::Int(2));
}

#[test]
fn test_recursive_macro() {
    let value = eval(
        r"(begin
            (define-syntax my-or
              (syntax-rules ()
                ((_) #f)
                ((_ e) e)
                ((_ e1 e2 ...) (if e1 e1 (my-or e2 ...)))))
            (my-or #f #f 7))",
    );
    assert_eq!(value, Value::Int(7));
}

#[test]
fn test_let_style_binding_macro() {
    let value = eval(
        r"(begin
            (define-syntax my-let
              (syntax-rules ()
                ((_ ((name val) ...) body ...)
                 ((lambda (name ...) body ...) val ...))))
            (my-let ((a 1) (b 2)) (+ a b)))",
    );
    assert_eq!(value, Value::Int(3));
}

#[test]
fn test_macro_usable_across_top_level_forms() {
    let value = eval(
        r"(define-syntax twice (syntax-rules () ((_ e) (+ e e))))
          (twice 21)",
    );
    assert_eq!(value, Value::Int(42));
}

#[test]
fn test_literal_identifier_selects_rule() {
    let value = eval(
        r"(begin
            (define-syntax route
              (syntax-rules (=>)
                ((_ a => b) (cons a b))
                ((_ a b) (list a b))))
            (route 1 => 2))",
    );
    assert_eq!(value, Value::cons(Value::Int(1), Value::Int(2)));
}

#[test]
fn test_expansion_only_for_macro_heads() {
    // The macro binding is an ordinary environment slot; overwriting it
    // with a non-macro value turns uses back into plain calls.
    let env = minim_engine::new_env().expect("create core environment");
    minim_engine::eval_str(&env, "(define-syntax m (syntax-rules () ((_ x) x)))")
        .expect("macro definition");
    minim_engine::eval_str(&env, "(define m 5)").expect("redefinition");

    let result = minim_engine::eval_str(&env, "(m 1)");
    assert!(matches!(result, Err(Error::WrongArgType(_))));
}

#[test]
fn test_no_matching_rule_is_syntax_error() {
    let env = minim_engine::new_env().expect("create core environment");
    let result = minim_engine::eval_str(
        &env,
        r"(begin
            (define-syntax unary (syntax-rules () ((_ x) x)))
            (unary 1 2))",
    );
    assert!(matches!(result, Err(Error::Syntax(_))));
}

#[test]
fn test_duplicate_pattern_variable_is_syntax_error() {
    let env = minim_engine::new_env().expect("create core environment");
    let result = minim_engine::eval_str(
        &env,
        "(define-syntax bad (syntax-rules () ((_ a a) a)))",
    );
    assert!(matches!(result, Err(Error::Syntax(_))));
}

#[test]
fn test_mismatched_ellipsis_counts_are_syntax_errors() {
    let env = minim_engine::new_env().expect("create core environment");
    let result = minim_engine::eval_str(
        &env,
        r"(begin
            (define-syntax zip
              (syntax-rules ()
                ((_ (a ...) (b ...)) (list (list a b) ...))))
            (zip (1 2 3) (4 5)))",
    );
    assert!(matches!(result, Err(Error::Syntax(_))));
}

#[test]
fn test_nested_ellipsis_flattening() {
    let value = eval(
        r"(begin
            (define-syntax flatten
              (syntax-rules ()
                ((_ (a ...) ...) (list a ... ...))))
            (flatten (1 2) (3 4)))",
    );
    assert_eq!(
        value,
        Value::list([Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)])
    );
}
