//! Compiler: lowers s-expressions into bytecode forms.

use std::rc::Rc;

use smol_str::SmolStr;

use crate::builder::{Builder, LocalAction};
use crate::env::Env;
use crate::error::{Error, Result};
use crate::form::Form;
use crate::handle::Handle;
use crate::macros::Macro;
use crate::opcode::Opcode;
use crate::value::Value;

/// Compiles the given top-level expression into bytecode.
///
/// The given environment is the lexical scope the expression will
/// eventually execute in; the compiler allocates top-level definitions in
/// it and consults it for macros. Callers stamp it onto the result with
/// [`Form::fix_lexical`] before running the form.
pub fn compile(env: &Handle<Env>, expr: &Value) -> Result<Rc<Form>> {
    let mut compiler = Compiler::new();
    let mut bdr = Builder::new(env.clone());

    compiler.generate_expr(&mut bdr, expr, true, false)?;

    let form = bdr.generate_form()?;
    tracing::debug!("compiled bytecode:\n{}", form.disassemble());

    Ok(Rc::new(form))
}

struct Compiler {
    /// Counter for unique jump label names within one compilation.
    label_seed: usize,
}

impl Compiler {
    fn new() -> Self {
        Self { label_seed: 0 }
    }

    fn next_label(&mut self) -> SmolStr {
        self.label_seed += 1;
        SmolStr::from(format!("__lbl_{}", self.label_seed))
    }

    /// Generate instructions for a single expression.
    ///
    /// With `keep`, the expression's value stays on the operand stack;
    /// otherwise it is popped or never pushed. With `tail`, the expression
    /// is in tail position and ends in `tail_call` or `ret`. `tail`
    /// implies `keep`.
    fn generate_expr(&mut self, bdr: &mut Builder, expr: &Value, keep: bool, tail: bool) -> Result<()> {
        if is_self_evaluating(expr) {
            if keep {
                bdr.emit_literal(expr.clone());
                if tail {
                    bdr.emit_op(Opcode::Ret);
                }
            }
            return Ok(());
        }

        if let Value::Sym(name) = expr {
            if keep {
                bdr.emit_local(LocalAction::Push, name)?;
                if tail {
                    bdr.emit_op(Opcode::Ret);
                }
            }
            return Ok(());
        }

        match expr.uncons() {
            Some((head, rest)) => self.generate_form(bdr, expr, &head, &rest, keep, tail),
            None => Err(Error::Compile(format!(
                "expecting atom or list, but got {}",
                expr.repr()
            ))),
        }
    }

    /// Dispatch a list form: special form, macro use, or procedure call.
    fn generate_form(
        &mut self,
        bdr: &mut Builder,
        expr: &Value,
        head: &Value,
        rest: &Value,
        keep: bool,
        tail: bool,
    ) -> Result<()> {
        if let Value::Sym(name) = head {
            match name.as_str() {
                "begin" => return self.generate_body(bdr, rest, keep, tail),
                "if" => return self.generate_if(bdr, rest, keep, tail),
                "lambda" => return self.generate_lambda(bdr, rest, keep, tail),
                "define" => return self.generate_define(bdr, rest, keep, tail),
                "set!" => return self.generate_set(bdr, rest, keep, tail),
                "quote" => return self.generate_quote(bdr, rest, keep, tail),
                "or" => return self.generate_or(bdr, rest, keep, tail),
                "and" => return self.generate_and(bdr, rest, keep, tail),
                "define-syntax" => return self.generate_define_syntax(bdr, rest, keep, tail),
                "call/cc" | "call-with-current-continuation" => {
                    return self.generate_call_cc(bdr, rest, keep, tail)
                }
                _ => {}
            }

            // Macro uses look like calls until the head resolves to a
            // macro value in the compile-time environment. The expansion
            // is recompiled in place, in the same keep/tail context, which
            // also expands any macro the expansion itself starts with.
            if let Some(macro_) = get_macro(bdr.env(), name) {
                let expanded = macro_.transform(expr)?;
                return self.generate_expr(bdr, &expanded, keep, tail);
            }
        }

        self.generate_call(bdr, head, rest, keep, tail)
    }

    /// Generate a sequence of expressions; only the last one inherits
    /// `keep` and `tail`.
    fn generate_body(&mut self, bdr: &mut Builder, body: &Value, keep: bool, tail: bool) -> Result<()> {
        if body.is_nil() && keep {
            bdr.emit_op(Opcode::PushNil);
            if tail {
                bdr.emit_op(Opcode::Ret);
            }
            return Ok(());
        }

        let mut cursor = body.clone();
        while let Some((expr, rest)) = cursor.uncons() {
            let will_keep = keep && rest.is_nil();
            self.generate_expr(bdr, &expr, will_keep, will_keep && tail)?;
            cursor = rest;
        }

        if !cursor.is_nil() {
            return Err(Error::Syntax(format!(
                "expected expression sequence, but got {}",
                body.repr()
            )));
        }

        Ok(())
    }

    fn generate_call(
        &mut self,
        bdr: &mut Builder,
        callee: &Value,
        args: &Value,
        keep: bool,
        tail: bool,
    ) -> Result<()> {
        let mut argc: i64 = 0;
        let mut cursor = args.clone();
        while let Some((arg, rest)) = cursor.uncons() {
            self.generate_expr(bdr, &arg, true, false)?;
            argc += 1;
            cursor = rest;
        }
        if !cursor.is_nil() {
            return Err(Error::Syntax(format!(
                "improper argument list: {}",
                args.repr()
            )));
        }

        self.generate_expr(bdr, callee, true, false)?;

        if tail {
            bdr.emit(Opcode::TailCall, &[argc]);
        } else {
            bdr.emit(Opcode::Call, &[argc]);
            if !keep {
                bdr.emit_op(Opcode::Pop);
            }
        }

        Ok(())
    }

    fn generate_if(&mut self, bdr: &mut Builder, expr: &Value, keep: bool, tail: bool) -> Result<()> {
        let (cond, rest) = expr
            .uncons()
            .ok_or_else(|| Error::Syntax("missing condition expression in 'if'".to_string()))?;
        let (then_expr, rest) = rest
            .uncons()
            .ok_or_else(|| Error::Syntax("missing 'then' expression in 'if'".to_string()))?;
        let else_expr = match rest.uncons() {
            Some((else_expr, extra)) => {
                if !extra.is_nil() {
                    return Err(Error::Syntax("extra expression in 'if'".to_string()));
                }
                Some(else_expr)
            }
            None => {
                if !rest.is_nil() {
                    return Err(Error::Syntax("extra expression in 'if'".to_string()));
                }
                None
            }
        };

        self.generate_expr(bdr, &cond, true, false)?;

        if keep {
            let lbl_then = self.next_label();
            let lbl_end = self.next_label();

            bdr.emit_goto(Opcode::GotoIfNotFalse, &lbl_then);
            match &else_expr {
                Some(else_expr) => self.generate_expr(bdr, else_expr, true, tail)?,
                None => {
                    bdr.emit_op(Opcode::PushNil);
                    if tail {
                        bdr.emit_op(Opcode::Ret);
                    }
                }
            }
            if !tail {
                bdr.emit_goto(Opcode::Goto, &lbl_end);
            }
            bdr.def_label(lbl_then)?;
            self.generate_expr(bdr, &then_expr, true, tail)?;
            bdr.def_label(lbl_end)?;
        } else {
            // Value not needed: branch straight over the side-effect code.
            match &else_expr {
                None => {
                    let lbl_end = self.next_label();
                    bdr.emit_goto(Opcode::GotoIfFalse, &lbl_end);
                    self.generate_expr(bdr, &then_expr, false, false)?;
                    bdr.def_label(lbl_end)?;
                }
                Some(else_expr) => {
                    let lbl_then = self.next_label();
                    let lbl_end = self.next_label();
                    bdr.emit_goto(Opcode::GotoIfNotFalse, &lbl_then);
                    self.generate_expr(bdr, else_expr, false, false)?;
                    bdr.emit_goto(Opcode::Goto, &lbl_end);
                    bdr.def_label(lbl_then)?;
                    self.generate_expr(bdr, &then_expr, false, false)?;
                    bdr.def_label(lbl_end)?;
                }
            }
        }

        Ok(())
    }

    /// ```scheme
    /// (lambda <formal> <body>)
    /// (lambda (<formals>) <body>)
    /// (lambda (<formals> . <rest>) <body>)
    /// ```
    fn generate_lambda(&mut self, bdr: &mut Builder, expr: &Value, keep: bool, tail: bool) -> Result<()> {
        if !keep {
            // A lambda expression has no side effect.
            return Ok(());
        }

        let (formals, body) = expr.uncons().ok_or_else(|| {
            Error::Syntax("lambda expects formal parameters followed by a body".to_string())
        })?;
        let (params, rest_arg) = parse_formals(&formals)?;

        let child = bdr.push_proc(&params, rest_arg);
        self.generate_body(child, &body, true, true)?;

        if tail {
            bdr.emit_op(Opcode::Ret);
        }

        Ok(())
    }

    fn generate_define(&mut self, bdr: &mut Builder, expr: &Value, keep: bool, tail: bool) -> Result<()> {
        let (var, rest) = expr
            .uncons()
            .ok_or_else(|| Error::Syntax("empty define expression".to_string()))?;

        // Define the local before generating the value, so recursive
        // references resolve to the fresh slot.
        let name = if let Some((name_value, formals)) = var.uncons() {
            // (define (name . formals) body...) defines a procedure.
            let name = match name_value {
                Value::Sym(name) => name,
                other => {
                    return Err(Error::Syntax(format!(
                        "invalid define expression, expecting name but got {}",
                        other.repr()
                    )))
                }
            };
            bdr.def_local(&name);
            let lambda = Value::cons(formals, rest);
            self.generate_lambda(bdr, &lambda, true, false)?;
            name
        } else if let Value::Sym(name) = &var {
            let (value, extra) = rest
                .uncons()
                .ok_or_else(|| Error::Syntax("missing value for defined variable".to_string()))?;
            if !extra.is_nil() {
                return Err(Error::Syntax("extra expressions in 'define'".to_string()));
            }
            bdr.def_local(name);
            self.generate_expr(bdr, &value, true, false)?;
            name.clone()
        } else {
            return Err(Error::Syntax(format!(
                "invalid define expression: {}",
                var.repr()
            )));
        };

        if keep {
            bdr.emit_op(Opcode::Dup);
        }
        bdr.emit_local(LocalAction::Set, &name)?;
        if tail {
            bdr.emit_op(Opcode::Ret);
        }

        Ok(())
    }

    fn generate_set(&mut self, bdr: &mut Builder, expr: &Value, keep: bool, tail: bool) -> Result<()> {
        let (var, rest) = expr
            .uncons()
            .ok_or_else(|| Error::Syntax("empty set! expression".to_string()))?;
        let name = match &var {
            Value::Sym(name) => name,
            other => {
                return Err(Error::Syntax(format!(
                    "invalid set! expression, expecting symbol but got {}",
                    other.repr()
                )))
            }
        };
        let (value, extra) = rest
            .uncons()
            .ok_or_else(|| Error::Syntax("missing value for set! expression".to_string()))?;
        if !extra.is_nil() {
            return Err(Error::Syntax("extra expressions in 'set!'".to_string()));
        }

        self.generate_expr(bdr, &value, true, false)?;
        if keep {
            bdr.emit_op(Opcode::Dup);
        }
        // The target must already resolve; set! never creates a binding.
        bdr.emit_local(LocalAction::Set, name)?;
        if tail {
            bdr.emit_op(Opcode::Ret);
        }

        Ok(())
    }

    fn generate_quote(&mut self, bdr: &mut Builder, expr: &Value, keep: bool, tail: bool) -> Result<()> {
        let (datum, _) = expr
            .uncons()
            .ok_or_else(|| Error::Syntax("empty quote expression".to_string()))?;

        if keep {
            bdr.emit_literal(datum);
            if tail {
                bdr.emit_op(Opcode::Ret);
            }
        }

        Ok(())
    }

    fn generate_or(&mut self, bdr: &mut Builder, expr: &Value, keep: bool, tail: bool) -> Result<()> {
        let lbl_end = self.next_label();
        let mut emitted = false;

        let mut cursor = expr.clone();
        while let Some((element, rest)) = cursor.uncons() {
            cursor = rest;

            // A literal #f contributes nothing to an or expression.
            if matches!(element, Value::Bool(false)) {
                continue;
            }

            emitted = true;
            self.generate_expr(bdr, &element, true, false)?;
            if keep {
                bdr.emit_op(Opcode::Dup);
            }
            bdr.emit_goto(Opcode::GotoIfNotFalse, &lbl_end);
            if keep && !cursor.is_nil() {
                bdr.emit_op(Opcode::Pop);
            }
        }
        if !cursor.is_nil() {
            return Err(Error::Syntax(format!(
                "invalid element in or expression: {}",
                cursor.repr()
            )));
        }

        if keep {
            if !emitted {
                bdr.emit_op(Opcode::PushFalse);
            }
            if tail {
                bdr.emit_op(Opcode::Ret);
            }
        }
        bdr.def_label(lbl_end)?;
        // Short-circuit jumps land here with the value on the stack; in
        // tail position the frame must still exit through ret.
        if tail {
            bdr.emit_op(Opcode::Ret);
        }

        Ok(())
    }

    fn generate_and(&mut self, bdr: &mut Builder, expr: &Value, keep: bool, tail: bool) -> Result<()> {
        let lbl_end = self.next_label();
        let mut emitted = false;

        let mut cursor = expr.clone();
        while let Some((element, rest)) = cursor.uncons() {
            cursor = rest;

            // A literal #t contributes nothing to an and expression.
            if matches!(element, Value::Bool(true)) {
                continue;
            }

            emitted = true;
            self.generate_expr(bdr, &element, true, false)?;
            if keep {
                bdr.emit_op(Opcode::Dup);
            }
            bdr.emit_goto(Opcode::GotoIfFalse, &lbl_end);
            if keep && !cursor.is_nil() {
                bdr.emit_op(Opcode::Pop);
            }
        }
        if !cursor.is_nil() {
            return Err(Error::Syntax(format!(
                "invalid element in and expression: {}",
                cursor.repr()
            )));
        }

        if keep {
            if !emitted {
                bdr.emit_op(Opcode::PushTrue);
            }
            if tail {
                bdr.emit_op(Opcode::Ret);
            }
        }
        bdr.def_label(lbl_end)?;
        // Same as `or`: the jump target needs its own ret in tail position.
        if tail {
            bdr.emit_op(Opcode::Ret);
        }

        Ok(())
    }

    fn generate_define_syntax(
        &mut self,
        bdr: &mut Builder,
        expr: &Value,
        keep: bool,
        tail: bool,
    ) -> Result<()> {
        let (name_value, rest) = expr.uncons().ok_or_else(|| {
            Error::Syntax("invalid define-syntax expression, expecting macro keyword".to_string())
        })?;
        let name = match name_value {
            Value::Sym(name) => name,
            other => {
                return Err(Error::Syntax(format!(
                    "expecting macro keyword as a symbol, but got {}",
                    other.repr()
                )))
            }
        };
        let (rules_form, extra) = rest
            .uncons()
            .ok_or_else(|| Error::Syntax("expecting syntax-rules in define-syntax".to_string()))?;
        if !extra.is_nil() {
            return Err(Error::Syntax(format!(
                "extra expressions in define-syntax: {}",
                extra.repr()
            )));
        }
        let rules_tail = match rules_form.uncons() {
            Some((Value::Sym(keyword), tail)) if keyword == "syntax-rules" => tail,
            _ => {
                return Err(Error::Syntax(format!(
                    "expecting syntax-rules, but got {}",
                    rules_form.repr()
                )))
            }
        };

        // Define the keyword before constructing the macro, so recursive
        // macros resolve. The macro value is committed to the compile-time
        // environment immediately; it never exists as emitted bytecode.
        let index = bdr.def_local(&name);
        let macro_ = Macro::new(&rules_tail)?;
        bdr.env()
            .borrow_mut()
            .assign_local(index, Value::Macro(Rc::new(macro_)));

        if keep {
            bdr.emit_op(Opcode::PushNil);
            if tail {
                bdr.emit_op(Opcode::Ret);
            }
        }

        Ok(())
    }

    fn generate_call_cc(&mut self, bdr: &mut Builder, expr: &Value, keep: bool, tail: bool) -> Result<()> {
        let (callee, extra) = expr
            .uncons()
            .ok_or_else(|| Error::Syntax("call/cc expects a procedure".to_string()))?;
        if !extra.is_nil() {
            return Err(Error::Syntax("extra expressions in call/cc".to_string()));
        }

        self.generate_expr(bdr, &callee, true, false)?;
        bdr.emit_op(Opcode::CallCc);
        if tail {
            bdr.emit_op(Opcode::Ret);
        } else if !keep {
            bdr.emit_op(Opcode::Pop);
        }

        Ok(())
    }
}

fn is_self_evaluating(expr: &Value) -> bool {
    matches!(
        expr,
        Value::Nil
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Complex(_, _)
            | Value::Str(_)
    )
}

/// Parse lambda formals into parameter names and a rest flag.
fn parse_formals(formals: &Value) -> Result<(Vec<SmolStr>, bool)> {
    match formals {
        // A single identifier takes the whole argument list.
        Value::Sym(name) => Ok((vec![name.clone()], true)),
        Value::Nil => Ok((Vec::new(), false)),
        Value::Pair(_) => {
            let mut params = Vec::new();
            let mut cursor = formals.clone();

            while let Some((param, rest)) = cursor.uncons() {
                match param {
                    Value::Sym(name) => params.push(name),
                    other => {
                        return Err(Error::Syntax(format!(
                            "parameter must be an identifier, but got {}",
                            other.repr()
                        )))
                    }
                }
                cursor = rest;
            }

            match cursor {
                Value::Nil => Ok((params, false)),
                // Improper tail collects surplus arguments.
                Value::Sym(name) => {
                    params.push(name);
                    Ok((params, true))
                }
                other => Err(Error::Syntax(format!(
                    "parameter must be an identifier, but got {}",
                    other.repr()
                ))),
            }
        }
        other => Err(Error::Syntax(format!(
            "invalid lambda formals: {}",
            other.repr()
        ))),
    }
}

/// Resolve a head symbol to a macro in the compile-time environment.
fn get_macro(env: &Handle<Env>, name: &str) -> Option<Rc<Macro>> {
    match env.borrow().lookup(name) {
        Some(Value::Macro(macro_)) => Some(macro_),
        _ => None,
    }
}
