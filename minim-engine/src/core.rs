//! Core primitive library.

use std::fmt;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::env::Env;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::value::{Pair, Value};
use crate::vm::Vm;

pub type PrimitiveFn = fn(&mut Vm, &[Value]) -> Result<Value>;

/// A host function exposed to Scheme with a declared arity.
pub struct Primitive {
    name: SmolStr,
    min_argc: usize,
    /// `None` means variadic from `min_argc`.
    max_argc: Option<usize>,
    func: PrimitiveFn,
}

impl Primitive {
    pub fn new(
        name: impl Into<SmolStr>,
        min_argc: usize,
        max_argc: Option<usize>,
        func: PrimitiveFn,
    ) -> Self {
        Self {
            name: name.into(),
            min_argc,
            max_argc,
            func,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn check_arity(&self, argc: usize) -> Result<()> {
        if argc < self.min_argc {
            return Err(Error::WrongArgNumber(format!(
                "{} expects at least {} arguments, got {argc}",
                self.name, self.min_argc
            )));
        }
        if let Some(max_argc) = self.max_argc {
            if argc > max_argc {
                return Err(Error::WrongArgNumber(format!(
                    "{} expects at most {max_argc} arguments, got {argc}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn call(&self, vm: &mut Vm, args: &[Value]) -> Result<Value> {
        (self.func)(vm, args)
    }
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<primitive {}>", self.name)
    }
}

/// Load the core library into the given environment.
pub fn init_core(env: &mut Env) -> Result<()> {
    bind(env, "+", 0, None, number_add);
    bind(env, "-", 1, None, number_sub);
    bind(env, "*", 0, None, number_mul);
    bind(env, "/", 1, None, number_div);

    bind(env, "=", 2, None, number_eq);
    bind(env, "<", 2, None, number_lt);
    bind(env, ">", 2, None, number_gt);
    bind(env, "<=", 2, None, number_le);
    bind(env, ">=", 2, None, number_ge);

    bind(env, "not", 1, Some(1), logic_not);
    bind(env, "eq?", 2, Some(2), is_eq);
    bind(env, "equal?", 2, Some(2), is_equal);

    bind(env, "pair", 2, Some(2), pair_cons);
    bind(env, "cons", 2, Some(2), pair_cons);
    bind(env, "car", 1, Some(1), pair_car);
    bind(env, "first", 1, Some(1), pair_car);
    bind(env, "cdr", 1, Some(1), pair_cdr);
    bind(env, "rest", 1, Some(1), pair_cdr);
    bind(env, "set-car!", 2, Some(2), pair_set_car);
    bind(env, "set-cdr!", 2, Some(2), pair_set_cdr);
    bind(env, "list", 0, None, list_new);

    bind(env, "boolean?", 1, Some(1), is_boolean);
    bind(env, "pair?", 1, Some(1), is_pair);
    bind(env, "null?", 1, Some(1), is_null);
    bind(env, "symbol?", 1, Some(1), is_symbol);
    bind(env, "string?", 1, Some(1), is_string);
    bind(env, "number?", 1, Some(1), is_number);
    bind(env, "procedure?", 1, Some(1), is_procedure);

    bind(env, "display", 1, Some(1), io_display);
    bind(env, "newline", 0, Some(0), io_newline);
    bind(env, "assert", 1, Some(1), check_assert);

    Ok(())
}

fn bind(env: &mut Env, name: &str, min_argc: usize, max_argc: Option<usize>, func: PrimitiveFn) {
    let index = env.alloc_local(name);
    env.assign_local(
        index,
        Value::Primitive(Rc::new(Primitive::new(name, min_argc, max_argc, func))),
    );
}

// ----------------------------------------------------------------------------
// Number

/// Arithmetic operand: integers stay integral until a float joins the fold.
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn to_value(self) -> Value {
        match self {
            Number::Int(value) => Value::Int(value),
            Number::Float(value) => Value::Float(value),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(value) => value as f64,
            Number::Float(value) => value,
        }
    }

    fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a + b),
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn sub(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a - b),
            (a, b) => Number::Float(a.as_f64() - b.as_f64()),
        }
    }

    fn mul(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a * b),
            (a, b) => Number::Float(a.as_f64() * b.as_f64()),
        }
    }

    fn div(self, other: Number) -> Result<Number> {
        if other.as_f64() == 0.0 {
            return Err(Error::WrongArgType("division by zero".to_string()));
        }
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Ok(Number::Int(a / b)),
            (a, b) => Ok(Number::Float(a.as_f64() / b.as_f64())),
        }
    }
}

fn expect_number(prim: &str, index: usize, value: &Value) -> Result<Number> {
    match value {
        Value::Int(v) => Ok(Number::Int(*v)),
        Value::Float(v) => Ok(Number::Float(*v)),
        other => Err(Error::WrongArgType(format!(
            "{prim}: expected argument {index} to be a number, but encountered {}",
            other.repr()
        ))),
    }
}

fn number_add(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    let mut sum = Number::Int(0);
    for (index, arg) in args.iter().enumerate() {
        sum = sum.add(expect_number("+", index, arg)?);
    }
    Ok(sum.to_value())
}

fn number_sub(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    let first = expect_number("-", 0, &args[0])?;
    if args.len() == 1 {
        return Ok(Number::Int(0).sub(first).to_value());
    }

    let mut difference = first;
    for (index, arg) in args.iter().enumerate().skip(1) {
        difference = difference.sub(expect_number("-", index, arg)?);
    }
    Ok(difference.to_value())
}

fn number_mul(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    let mut product = Number::Int(1);
    for (index, arg) in args.iter().enumerate() {
        product = product.mul(expect_number("*", index, arg)?);
    }
    Ok(product.to_value())
}

fn number_div(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    let first = expect_number("/", 0, &args[0])?;
    if args.len() == 1 {
        return Ok(Number::Int(1).div(first)?.to_value());
    }

    let mut quotient = first;
    for (index, arg) in args.iter().enumerate().skip(1) {
        quotient = quotient.div(expect_number("/", index, arg)?)?;
    }
    Ok(quotient.to_value())
}

fn number_compare(
    prim: &str,
    args: &[Value],
    pred: fn(f64, f64) -> bool,
) -> Result<Value> {
    let mut prev = expect_number(prim, 0, &args[0])?;
    for (index, arg) in args.iter().enumerate().skip(1) {
        let next = expect_number(prim, index, arg)?;
        if !pred(prev.as_f64(), next.as_f64()) {
            return Ok(Value::Bool(false));
        }
        prev = next;
    }
    Ok(Value::Bool(true))
}

fn number_eq(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    number_compare("=", args, |a, b| a == b)
}

fn number_lt(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    number_compare("<", args, |a, b| a < b)
}

fn number_gt(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    number_compare(">", args, |a, b| a > b)
}

fn number_le(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    number_compare("<=", args, |a, b| a <= b)
}

fn number_ge(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    number_compare(">=", args, |a, b| a >= b)
}

// ----------------------------------------------------------------------------
// Logic

fn logic_not(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn is_eq(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    // Pairs compare by identity here, unlike `equal?`.
    let eq = match (&args[0], &args[1]) {
        (Value::Pair(a), Value::Pair(b)) => a.ptr_eq(b),
        (a, b) => a == b,
    };
    Ok(Value::Bool(eq))
}

fn is_equal(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(args[0] == args[1]))
}

// ----------------------------------------------------------------------------
// Pairs and lists

fn pair_cons(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::cons(args[0].clone(), args[1].clone()))
}

fn expect_pair<'a>(prim: &str, value: &'a Value) -> Result<&'a Handle<Pair>> {
    value.as_pair().ok_or_else(|| {
        Error::WrongArgType(format!(
            "{prim}: expected a pair, but encountered {}",
            value.repr()
        ))
    })
}

fn pair_car(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(expect_pair("car", &args[0])?.borrow().head.clone())
}

fn pair_cdr(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(expect_pair("cdr", &args[0])?.borrow().tail.clone())
}

fn pair_set_car(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    expect_pair("set-car!", &args[0])?.borrow_mut().head = args[1].clone();
    Ok(Value::Nil)
}

fn pair_set_cdr(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    expect_pair("set-cdr!", &args[0])?.borrow_mut().tail = args[1].clone();
    Ok(Value::Nil)
}

fn list_new(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::list(args.iter().cloned()))
}

// ----------------------------------------------------------------------------
// Type predicates

fn is_boolean(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Bool(_))))
}

fn is_pair(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Pair(_))))
}

fn is_null(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(args[0].is_nil()))
}

fn is_symbol(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Sym(_))))
}

fn is_string(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Str(_))))
}

fn is_number(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(
        args[0],
        Value::Int(_) | Value::Float(_) | Value::Complex(_, _)
    )))
}

fn is_procedure(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(matches!(
        args[0],
        Value::Procedure(_) | Value::Primitive(_) | Value::Continuation(_)
    )))
}

// ----------------------------------------------------------------------------
// I/O and testing

fn io_display(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    print!("{}", args[0].repr());
    Ok(Value::Nil)
}

fn io_newline(_vm: &mut Vm, _args: &[Value]) -> Result<Value> {
    println!();
    Ok(Value::Nil)
}

fn check_assert(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
    if args[0].is_truthy() {
        Ok(Value::Bool(true))
    } else {
        Err(Error::WrongArgType("assertion failed".to_string()))
    }
}
