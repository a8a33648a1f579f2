//! Compiled code artifacts.

use std::cell::RefCell;
use std::fmt;
use std::fmt::Write as _;

use crate::env::Env;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::opcode::Opcode;
use crate::value::Value;

/// A compiled top-level code object: bytecode plus literal table.
///
/// The environment a form executes against is not known at compile time;
/// callers stamp it with [`Form::fix_lexical`] before handing the form to
/// the virtual machine.
pub struct Form {
    pub(crate) code: Box<[i64]>,
    pub(crate) literals: Box<[Value]>,
    pub(crate) lexical_parent: RefCell<Option<Handle<Env>>>,
}

impl Form {
    pub(crate) fn new(code: Vec<i64>, literals: Vec<Value>) -> Self {
        Self {
            code: code.into_boxed_slice(),
            literals: literals.into_boxed_slice(),
            lexical_parent: RefCell::new(None),
        }
    }

    /// Bytecode instructions for this form.
    #[inline]
    pub fn bytecode(&self) -> &[i64] {
        &self.code
    }

    #[inline]
    pub fn literals(&self) -> &[Value] {
        &self.literals
    }

    /// Bind the environment this form will execute against.
    pub fn fix_lexical(&self, env: Handle<Env>) {
        *self.lexical_parent.borrow_mut() = Some(env);
    }

    pub(crate) fn lexical_parent(&self) -> Option<Handle<Env>> {
        self.lexical_parent.borrow().clone()
    }

    /// Human readable bytecode listing, one instruction per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut ip = 0;

        while ip < self.code.len() {
            let _ = write!(out, "  {ip:>6} : ");
            match Opcode::decode(self.code[ip]) {
                Some(op) => {
                    let _ = write!(out, "{}", op.mnemonic());
                    for offset in 1..op.length() {
                        let _ = write!(out, " {}", self.code[ip + offset]);
                    }
                    if op == Opcode::PushLiteral {
                        let index = self.code[ip + 1] as usize;
                        if let Some(literal) = self.literals.get(index) {
                            let _ = write!(out, " ; {}", literal.repr());
                        }
                    }
                    ip += op.length();
                }
                None => {
                    let _ = write!(out, "?? {}", self.code[ip]);
                    ip += 1;
                }
            }
            out.push('\n');
        }

        out
    }
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("code", &self.code.len())
            .field("literals", &self.literals.len())
            .finish()
    }
}

/// A compiled callable: a [`Form`] with parameter metadata and the frame
/// template its locals live in.
pub struct Proc {
    pub(crate) form: Form,

    /// Frame template holding parameter and body-local slots.
    ///
    /// Every call duplicates this environment so recursion does not alias
    /// local slots.
    pub(crate) env: Handle<Env>,

    pub(crate) fixed_argc: usize,
    pub(crate) argc: usize,

    /// The last declared parameter collects surplus arguments into a list.
    pub(crate) rest_arg: bool,
}

impl Proc {
    #[inline]
    pub fn form(&self) -> &Form {
        &self.form
    }

    #[inline]
    pub fn fixed_argc(&self) -> usize {
        self.fixed_argc
    }

    #[inline]
    pub fn rest_arg(&self) -> bool {
        self.rest_arg
    }

    /// Bind the closure's captured environment.
    pub fn fix_lexical(&self, env: Handle<Env>) {
        self.form.fix_lexical(env);
    }

    /// Exact arity without a rest argument, at-least-fixed with one.
    pub(crate) fn check_arity(&self, argc: usize) -> Result<()> {
        let ok = if self.rest_arg {
            argc >= self.fixed_argc
        } else {
            argc == self.argc
        };

        if ok {
            Ok(())
        } else {
            Err(Error::WrongArgNumber(format!(
                "procedure expects {}{} arguments, got {argc}",
                self.fixed_argc,
                if self.rest_arg { " or more" } else { "" },
            )))
        }
    }

    /// Fresh environment instance for a call, parented to the captured
    /// lexical environment.
    pub(crate) fn instance_env(&self) -> Env {
        self.env.borrow().dup_for_call(self.form.lexical_parent())
    }
}

impl fmt::Debug for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proc")
            .field("fixed_argc", &self.fixed_argc)
            .field("argc", &self.argc)
            .field("rest_arg", &self.rest_arg)
            .field("code", &self.form.code.len())
            .finish()
    }
}
