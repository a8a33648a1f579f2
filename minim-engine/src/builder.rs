//! Bytecode emission for a single form.

use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::env::Env;
use crate::error::{Error, Result};
use crate::form::{Form, Proc};
use crate::handle::Handle;
use crate::opcode::Opcode;
use crate::value::Value;

/// Accumulates instructions and nested procedure builders for one form,
/// then linearizes them into bytecode.
///
/// Labels record final instruction pointers at definition time, so fixup
/// is a single pass: instruction widths are known when they are emitted.
pub(crate) struct Builder {
    /// The lexical scope the form is compiled in.
    env: Handle<Env>,
    stream: Vec<Emit>,
    /// Instruction pointer, measured in final bytecode integers.
    ip: usize,
    labels: HashMap<SmolStr, usize>,
    literals: Vec<Value>,
    /// `Some` when the artifact is a procedure rather than a bare form.
    params: Option<ProcParams>,
}

struct ProcParams {
    fixed_argc: usize,
    argc: usize,
    rest_arg: bool,
}

enum Emit {
    Op(Opcode, SmallVec<[i64; 2]>),
    /// A jump with an unresolved label.
    Goto(Opcode, SmolStr),
    /// `push_literal` with the literal value; interned during generation.
    Literal(Value),
    /// Pseudo-instruction: a nested procedure to generate, append to the
    /// literals and close over the running environment.
    Proc(Box<Builder>),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum LocalAction {
    Push,
    Set,
}

impl Builder {
    pub(crate) fn new(env: Handle<Env>) -> Self {
        Self {
            env,
            stream: Vec::new(),
            ip: 0,
            labels: HashMap::new(),
            literals: Vec::new(),
            params: None,
        }
    }

    #[inline]
    pub(crate) fn env(&self) -> &Handle<Env> {
        &self.env
    }

    pub(crate) fn emit(&mut self, op: Opcode, operands: &[i64]) {
        assert_eq!(
            operands.len(),
            op.operand_count(),
            "instruction {} expects {} operands",
            op.mnemonic(),
            op.operand_count(),
        );
        self.ip += op.length();
        self.stream.push(Emit::Op(op, SmallVec::from_slice(operands)));
    }

    #[inline]
    pub(crate) fn emit_op(&mut self, op: Opcode) {
        self.emit(op, &[]);
    }

    /// Emit `push_literal`, peephole-specialized for common values.
    ///
    /// The specialization matches on the variant, so `#t` never collapses
    /// into `push_1` and `0.0` never collapses into `push_0`.
    pub(crate) fn emit_literal(&mut self, literal: Value) {
        let specialized = match &literal {
            Value::Bool(true) => Some(Opcode::PushTrue),
            Value::Bool(false) => Some(Opcode::PushFalse),
            Value::Int(0) => Some(Opcode::Push0),
            Value::Int(1) => Some(Opcode::Push1),
            Value::Nil => Some(Opcode::PushNil),
            _ => None,
        };

        match specialized {
            Some(op) => self.emit_op(op),
            None => {
                self.ip += Opcode::PushLiteral.length();
                self.stream.push(Emit::Literal(literal));
            }
        }
    }

    pub(crate) fn emit_goto(&mut self, op: Opcode, label: &SmolStr) {
        debug_assert!(matches!(
            op,
            Opcode::Goto | Opcode::GotoIfFalse | Opcode::GotoIfNotFalse
        ));
        self.ip += op.length();
        self.stream.push(Emit::Goto(op, label.clone()));
    }

    /// Define a local variable in the builder's environment.
    pub(crate) fn def_local(&mut self, name: &str) -> usize {
        self.env.borrow_mut().alloc_local(name)
    }

    /// Record the current instruction pointer under a label name.
    pub(crate) fn def_label(&mut self, name: SmolStr) -> Result<()> {
        if self.labels.insert(name.clone(), self.ip).is_some() {
            return Err(Error::Compile(format!("duplicated label: {name}")));
        }
        Ok(())
    }

    /// Emit a push or set of a local variable, resolving the name through
    /// the lexical scope chain to a `(depth, index)` pair.
    pub(crate) fn emit_local(&mut self, action: LocalAction, name: &str) -> Result<()> {
        let (depth, index) = self
            .find_local_depth(name)
            .ok_or_else(|| Error::UnboundVariable(SmolStr::from(name)))?;

        let index = index as i64;
        match (action, depth) {
            (LocalAction::Push, 0) => self.emit(Opcode::PushLocal, &[index]),
            (LocalAction::Set, 0) => self.emit(Opcode::SetLocal, &[index]),
            (LocalAction::Push, depth) => {
                self.emit(Opcode::PushLocalDepth, &[depth as i64, index])
            }
            (LocalAction::Set, depth) => self.emit(Opcode::SetLocalDepth, &[depth as i64, index]),
        }

        Ok(())
    }

    /// Find the depth and slot index of a local variable, walking the
    /// environment chain outwards from the builder's own scope.
    pub(crate) fn find_local_depth(&self, name: &str) -> Option<(usize, usize)> {
        let mut depth = 0;
        let mut env = self.env.clone();

        loop {
            if let Some(index) = env.borrow().find_local(name) {
                return Some((depth, index));
            }
            let parent = env.borrow().parent()?;
            env = parent;
            depth += 1;
        }
    }

    /// Start a nested builder for a procedure body.
    ///
    /// The child scope is parented to the current environment and its
    /// parameter slots are pre-allocated. Three bytecode slots are
    /// reserved here for the eventual `push_literal` + `fix_lexical` pair
    /// that generation appends in place of the pseudo-instruction.
    pub(crate) fn push_proc(&mut self, params: &[SmolStr], rest_arg: bool) -> &mut Builder {
        let mut env = Env::with_parent(self.env.clone());
        for name in params {
            env.alloc_local(name);
        }

        let argc = params.len();
        let builder = Builder {
            env: Handle::new(env),
            stream: Vec::new(),
            ip: 0,
            labels: HashMap::new(),
            literals: Vec::new(),
            params: Some(ProcParams {
                fixed_argc: argc - usize::from(rest_arg),
                argc,
                rest_arg,
            }),
        };

        self.ip += Opcode::PushLiteral.length() + Opcode::FixLexical.length();
        self.stream.push(Emit::Proc(Box::new(builder)));
        match self.stream.last_mut() {
            Some(Emit::Proc(child)) => child,
            _ => unreachable!("push_proc appends a proc emission"),
        }
    }

    /// Linearize the emission stream into a top-level form.
    pub(crate) fn generate_form(self) -> Result<Form> {
        debug_assert!(self.params.is_none(), "procedure builder generated as form");
        let (form, _env) = self.generate()?;
        Ok(form)
    }

    fn generate_proc(mut self) -> Result<Proc> {
        let params = match self.params.take() {
            Some(params) => params,
            None => unreachable!("form builder generated as procedure"),
        };
        let (form, env) = self.generate()?;

        Ok(Proc {
            form,
            env,
            fixed_argc: params.fixed_argc,
            argc: params.argc,
            rest_arg: params.rest_arg,
        })
    }

    fn generate(self) -> Result<(Form, Handle<Env>)> {
        let Builder {
            env,
            stream,
            ip,
            labels,
            mut literals,
            params: _,
        } = self;

        let mut code: Vec<i64> = Vec::with_capacity(ip);

        for emit in stream {
            match emit {
                Emit::Op(op, operands) => {
                    code.push(op.encode());
                    code.extend(operands);
                }
                Emit::Goto(op, label) => {
                    let target = labels
                        .get(&label)
                        .copied()
                        .ok_or_else(|| Error::Compile(format!("undefined label: {label}")))?;
                    code.push(op.encode());
                    code.push(target as i64);
                }
                Emit::Literal(value) => {
                    let index = intern_literal(&mut literals, value);
                    code.push(Opcode::PushLiteral.encode());
                    code.push(index as i64);
                }
                Emit::Proc(builder) => {
                    let proc = builder.generate_proc()?;
                    let index = literals.len();
                    literals.push(Value::Procedure(Rc::new(proc)));
                    code.push(Opcode::PushLiteral.encode());
                    code.push(index as i64);
                    code.push(Opcode::FixLexical.encode());
                }
            }
        }

        debug_assert_eq!(code.len(), ip, "emission width bookkeeping out of sync");

        Ok((Form::new(code, literals), env))
    }
}

/// Return the index of the literal, appending it if not present.
///
/// Interning requires the same dynamic type on top of equality, which
/// [`Value`]'s equality already guarantees, so `42` and `42.0` land in
/// distinct slots.
fn intern_literal(literals: &mut Vec<Value>, literal: Value) -> usize {
    match literals.iter().position(|existing| existing == &literal) {
        Some(index) => index,
        None => {
            literals.push(literal);
            literals.len() - 1
        }
    }
}
