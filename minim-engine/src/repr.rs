//! External text representation.

use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;

use crate::value::{Pair, Value};

pub struct ValueRepr<'a> {
    value: &'a Value,
}

impl<'a> ValueRepr<'a> {
    pub(crate) const fn new(value: &'a Value) -> Self {
        Self { value }
    }

    fn fmt_pair(&self, f: &mut Formatter, pair: &Pair) -> fmt::Result {
        write!(f, "{}", ValueRepr::new(&pair.head))?;
        match &pair.tail {
            Value::Nil => Ok(()),
            Value::Pair(inner) => {
                write!(f, " ")?;
                self.fmt_pair(f, &inner.borrow())
            }
            tail => write!(f, " . {}", ValueRepr::new(tail)),
        }
    }
}

impl<'a> fmt::Display for ValueRepr<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.value {
            Value::Nil => write!(f, "()"),
            Value::Bool(boolean) => {
                if *boolean {
                    write!(f, "#t")
                } else {
                    write!(f, "#f")
                }
            }
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Complex(re, im) => write!(f, "{re}{im:+}i"),
            Value::Str(string) => write!(f, "{string}"),
            Value::Sym(name) => write!(f, "{name}"),
            Value::Pair(pair) => {
                write!(f, "(")?;
                self.fmt_pair(f, &pair.borrow())?;
                write!(f, ")")
            }
            Value::Procedure(proc) => write!(f, "<procedure {:?}>", Rc::as_ptr(proc)),
            Value::Form(form) => write!(f, "<form {:?}>", Rc::as_ptr(form)),
            Value::Primitive(prim) => write!(f, "<primitive {}>", prim.name()),
            Value::Continuation(_) => write!(f, "<continuation>"),
            Value::Macro(_) => write!(f, "<macro>"),
        }
    }
}
