//! Virtual machine.
//!
//! Executes compiled forms against a chain of call frames. Each frame owns
//! its operand stack; frames link to their parent, so tail calls keep the
//! chain flat by reparenting and continuations snapshot the whole chain by
//! cloning it.

use std::rc::Rc;

use crate::env::Env;
use crate::error::{Error, Result};
use crate::form::{Form, Proc};
use crate::handle::Handle;
use crate::opcode::Opcode;
use crate::value::Value;

/// Evaluate a compiled top-level form.
pub fn eval(form: &Rc<Form>) -> Result<Value> {
    Vm::new().run(form)
}

/// Call a callable value from the host with the given arguments.
pub fn call(callee: &Value, args: &[Value]) -> Result<Value> {
    Vm::new().call_value(callee, args)
}

#[derive(Debug, Default)]
pub struct Vm {
    /// High-water mark of the frame chain depth for this machine.
    max_depth: usize,
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deepest frame chain observed so far. Stays flat for tail-recursive
    /// code.
    #[inline]
    pub fn max_frame_depth(&self) -> usize {
        self.max_depth
    }

    /// Run a form against its stamped lexical parent environment.
    ///
    /// The top-level frame executes in that environment directly, so
    /// definitions persist for subsequent forms compiled against it.
    pub fn run(&mut self, form: &Rc<Form>) -> Result<Value> {
        let env = form
            .lexical_parent()
            .ok_or_else(|| Error::Compile("form has no lexical parent".to_string()))?;
        let ctx = Context::for_form(form.clone(), env);
        run_context(self, ctx)
    }

    pub fn call_value(&mut self, callee: &Value, args: &[Value]) -> Result<Value> {
        match callee {
            Value::Procedure(proc) => {
                proc.check_arity(args.len())?;
                let mut env = proc.instance_env();
                for (index, arg) in args.iter().take(proc.fixed_argc()).enumerate() {
                    env.assign_local(index, arg.clone());
                }
                if proc.rest_arg() {
                    let rest = Value::list(args[proc.fixed_argc()..].iter().cloned());
                    env.assign_local(proc.fixed_argc(), rest);
                }
                let ctx = Context::for_proc(proc.clone(), env);
                run_context(self, ctx)
            }
            Value::Primitive(prim) => {
                prim.check_arity(args.len())?;
                prim.call(self, args)
            }
            Value::Continuation(continuation) => {
                if args.len() > 1 {
                    return Err(Error::WrongArgNumber(
                        "continuation accepts at most 1 argument".to_string(),
                    ));
                }
                let mut ctx = continuation.snapshot();
                ctx.push(args.first().cloned().unwrap_or(Value::Nil));
                run_context(self, ctx)
            }
            other => Err(Error::WrongArgType(format!(
                "not a callable: {}",
                other.repr()
            ))),
        }
    }
}

/// A reified, callable snapshot of a frame chain.
///
/// Created by `call_cc` with the capturing frame's stack already stripped
/// of the callee and its instruction pointer past the capture site, so
/// invocation resumes as if `call_cc` had just returned.
pub struct Continuation {
    ctx: Context,
}

impl Continuation {
    pub(crate) fn capture(ctx: &Context) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn snapshot(&self) -> Context {
        self.ctx.clone()
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<continuation>")
    }
}

/// The code a frame executes: either a bare form or a procedure.
#[derive(Clone)]
enum Code {
    Form(Rc<Form>),
    Proc(Rc<Proc>),
}

impl Code {
    #[inline]
    fn bytecode(&self) -> &[i64] {
        match self {
            Code::Form(form) => form.bytecode(),
            Code::Proc(proc) => proc.form().bytecode(),
        }
    }

    fn literal(&self, index: usize) -> Value {
        let literals = match self {
            Code::Form(form) => form.literals(),
            Code::Proc(proc) => proc.form().literals(),
        };
        literals.get(index).cloned().unwrap_or(Value::Nil)
    }
}

/// An activation record.
#[derive(Clone)]
pub(crate) struct Context {
    code: Code,
    env: Handle<Env>,
    stack: Vec<Value>,
    ip: usize,
    parent: Option<Box<Context>>,
    depth: usize,
}

impl Context {
    fn for_form(form: Rc<Form>, env: Handle<Env>) -> Self {
        Self {
            code: Code::Form(form),
            env,
            stack: Vec::new(),
            ip: 0,
            parent: None,
            depth: 0,
        }
    }

    fn for_proc(proc: Rc<Proc>, env: Env) -> Self {
        Self {
            code: Code::Proc(proc),
            env: Handle::new(env),
            stack: Vec::new(),
            ip: 0,
            parent: None,
            depth: 0,
        }
    }

    #[inline]
    fn fetch(&self, offset: usize) -> i64 {
        self.code.bytecode()[self.ip + offset]
    }

    #[inline]
    fn code_len(&self) -> usize {
        self.code.bytecode().len()
    }

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Nil)
    }

    /// The `idx`-th element from the top, 1-based, without popping.
    #[inline]
    fn top(&self, idx: usize) -> Value {
        self.stack[self.stack.len() - idx].clone()
    }

    #[inline]
    fn pop_n(&mut self, count: usize) {
        let len = self.stack.len();
        self.stack.truncate(len.saturating_sub(count));
    }

    fn walk_env(&self, depth: i64) -> Result<Handle<Env>> {
        walk_parents(self.env.clone(), depth)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Unlink the parent chain iteratively so dropping a deep chain
        // cannot overflow the host stack.
        let mut parent = self.parent.take();
        while let Some(mut ctx) = parent {
            parent = ctx.parent.take();
        }
    }
}

fn walk_parents(env: Handle<Env>, depth: i64) -> Result<Handle<Env>> {
    let mut env = env;
    for _ in 0..depth {
        let parent = env.borrow().parent();
        env = parent.ok_or_else(|| Error::Compile("lexical depth out of range".to_string()))?;
    }
    Ok(env)
}

/// Stamp an environment as the lexical parent of a closure-like value.
fn fix_lexical(env: &Handle<Env>, value: &Value) -> Result<()> {
    match value {
        Value::Procedure(proc) => {
            proc.fix_lexical(env.clone());
            Ok(())
        }
        Value::Form(form) => {
            form.fix_lexical(env.clone());
            Ok(())
        }
        other => Err(Error::WrongArgType(format!(
            "cannot fix lexical parent of {}",
            other.repr()
        ))),
    }
}

/// The environment captured by a form produced during macro expansion.
fn dynamic_env(value: &Value) -> Result<Handle<Env>> {
    match value {
        Value::Form(form) => form
            .lexical_parent()
            .ok_or_else(|| Error::Compile("form has no lexical parent".to_string())),
        Value::Procedure(proc) => proc
            .form()
            .lexical_parent()
            .ok_or_else(|| Error::Compile("procedure has no lexical parent".to_string())),
        other => Err(Error::WrongArgType(format!(
            "value carries no lexical parent: {}",
            other.repr()
        ))),
    }
}

/// The dispatch loop.
///
/// Runs until the active frame's instruction pointer passes the end of its
/// bytecode; the result is that frame's top of stack. Compiled procedure
/// bodies always exit through `ret` or a tail call, so only form frames
/// end this way: the outermost one, or a continuation's snapshot of one,
/// which is how an escaping continuation delivers the program result.
fn run_context(vm: &mut Vm, mut ctx: Context) -> Result<Value> {
    loop {
        if ctx.ip >= ctx.code_len() {
            return Ok(ctx.pop());
        }

        let instruction = ctx.fetch(0);
        let op = Opcode::decode(instruction)
            .ok_or_else(|| Error::Compile(format!("invalid opcode {instruction}")))?;

        match op {
            Opcode::Ret => {
                let value = ctx.pop();
                match ctx.parent.take() {
                    Some(mut parent) => {
                        parent.push(value);
                        ctx = *parent;
                    }
                    // A host-called procedure returns without a caller
                    // frame below it.
                    None => return Ok(value),
                }
            }
            Opcode::Call => {
                let argc = ctx.fetch(1) as usize;
                ctx.ip += 2;
                ctx = match make_call(vm, ctx, argc, false)? {
                    Transfer::Jump(nctx) => nctx,
                    Transfer::Done(value) => return Ok(value),
                };
            }
            Opcode::TailCall => {
                let argc = ctx.fetch(1) as usize;
                ctx.ip += 2;
                ctx = match make_call(vm, ctx, argc, true)? {
                    Transfer::Jump(nctx) => nctx,
                    Transfer::Done(value) => return Ok(value),
                };
            }
            Opcode::CallCc => {
                ctx.ip += 1;
                let callee = ctx.pop();
                // Snapshot with the callee stripped and ip advanced, then
                // call the callee with the continuation as its argument.
                let continuation = Value::Continuation(Rc::new(Continuation::capture(&ctx)));
                ctx.push(continuation);
                ctx.push(callee);
                ctx = match make_call(vm, ctx, 1, false)? {
                    Transfer::Jump(nctx) => nctx,
                    Transfer::Done(value) => return Ok(value),
                };
            }
            Opcode::Pop => {
                ctx.pop();
                ctx.ip += 1;
            }
            Opcode::PushLocal => {
                let index = ctx.fetch(1) as usize;
                let value = ctx.env.borrow().read_local(index);
                ctx.push(value);
                ctx.ip += 2;
            }
            Opcode::SetLocal => {
                let index = ctx.fetch(1) as usize;
                let value = ctx.pop();
                ctx.env.borrow_mut().assign_local(index, value);
                ctx.ip += 2;
            }
            Opcode::PushLocalDepth => {
                let depth = ctx.fetch(1);
                let index = ctx.fetch(2) as usize;
                let env = ctx.walk_env(depth)?;
                let value = env.borrow().read_local(index);
                ctx.push(value);
                ctx.ip += 3;
            }
            Opcode::SetLocalDepth => {
                let depth = ctx.fetch(1);
                let index = ctx.fetch(2) as usize;
                let value = ctx.pop();
                let env = ctx.walk_env(depth)?;
                env.borrow_mut().assign_local(index, value);
                ctx.ip += 3;
            }
            Opcode::PushLiteral => {
                let index = ctx.fetch(1) as usize;
                let value = ctx.code.literal(index);
                ctx.push(value);
                ctx.ip += 2;
            }
            Opcode::Push0 => {
                ctx.push(Value::Int(0));
                ctx.ip += 1;
            }
            Opcode::Push1 => {
                ctx.push(Value::Int(1));
                ctx.ip += 1;
            }
            Opcode::PushNil => {
                ctx.push(Value::Nil);
                ctx.ip += 1;
            }
            Opcode::PushTrue => {
                ctx.push(Value::Bool(true));
                ctx.ip += 1;
            }
            Opcode::PushFalse => {
                ctx.push(Value::Bool(false));
                ctx.ip += 1;
            }
            Opcode::Dup => {
                let value = ctx.top(1);
                ctx.push(value);
                ctx.ip += 1;
            }
            Opcode::Goto => {
                ctx.ip = ctx.fetch(1) as usize;
            }
            Opcode::GotoIfFalse => {
                let target = ctx.fetch(1) as usize;
                let condition = ctx.pop();
                if condition.is_truthy() {
                    ctx.ip += 2;
                } else {
                    ctx.ip = target;
                }
            }
            Opcode::GotoIfNotFalse => {
                let target = ctx.fetch(1) as usize;
                let condition = ctx.pop();
                if condition.is_truthy() {
                    ctx.ip = target;
                } else {
                    ctx.ip += 2;
                }
            }
            Opcode::FixLexical => {
                let value = ctx.top(1);
                fix_lexical(&ctx.env, &value)?;
                ctx.ip += 1;
            }
            Opcode::FixLexicalPop => {
                let value = ctx.pop();
                fix_lexical(&ctx.env, &value)?;
                ctx.ip += 1;
            }
            Opcode::FixLexicalDepth => {
                let depth = ctx.fetch(1);
                let env = ctx.walk_env(depth)?;
                let value = ctx.top(1);
                fix_lexical(&env, &value)?;
                ctx.ip += 2;
            }
            Opcode::DynamicEval => {
                let value = ctx.pop();
                match value {
                    Value::Form(form) => {
                        let result = vm.run(&form)?;
                        ctx.push(result);
                    }
                    other => {
                        return Err(Error::WrongArgType(format!(
                            "cannot evaluate {}",
                            other.repr()
                        )))
                    }
                }
                ctx.ip += 1;
            }
            Opcode::DynamicSetLocal => {
                let index = ctx.fetch(1) as usize;
                let closure = ctx.pop();
                let value = ctx.pop();
                let env = dynamic_env(&closure)?;
                env.borrow_mut().assign_local(index, value);
                ctx.ip += 2;
            }
            Opcode::DynamicSetLocalDepth => {
                let depth = ctx.fetch(1);
                let index = ctx.fetch(2) as usize;
                let closure = ctx.pop();
                let value = ctx.pop();
                let env = walk_parents(dynamic_env(&closure)?, depth)?;
                env.borrow_mut().assign_local(index, value);
                ctx.ip += 3;
            }
        }
    }
}

/// Where control goes after a call instruction.
enum Transfer {
    /// Continue dispatching in this frame.
    Jump(Context),
    /// The run is complete with this value.
    Done(Value),
}

/// Shared call semantics for `call`, `tail_call` and `call_cc`.
///
/// Pops the callee from the caller's stack. Procedures get a fresh frame
/// whose parent is the caller (or, for tail calls, the caller's parent, so
/// the chain does not grow). Primitives run inline and push their result
/// without a new frame. Continuations replace the chain with a clone of
/// their snapshot.
fn make_call(vm: &mut Vm, mut ctx: Context, argc: usize, tail: bool) -> Result<Transfer> {
    let callee = ctx.pop();

    match callee {
        Value::Procedure(proc) => {
            proc.check_arity(argc)?;

            let mut env = proc.instance_env();
            for i in 0..proc.fixed_argc() {
                env.assign_local(i, ctx.top(argc - i));
            }
            if proc.rest_arg() {
                let mut rest = Value::Nil;
                for i in 0..(argc - proc.fixed_argc()) {
                    rest = Value::cons(ctx.top(i + 1), rest);
                }
                env.assign_local(proc.fixed_argc(), rest);
            }
            ctx.pop_n(argc);

            let parent = if tail {
                ctx.parent.take()
            } else {
                Some(Box::new(ctx))
            };
            let depth = parent.as_ref().map(|p| p.depth + 1).unwrap_or(0);
            vm.max_depth = vm.max_depth.max(depth);

            Ok(Transfer::Jump(Context {
                code: Code::Proc(proc),
                env: Handle::new(env),
                stack: Vec::new(),
                ip: 0,
                parent,
                depth,
            }))
        }
        Value::Primitive(prim) => {
            prim.check_arity(argc)?;

            let mut args = Vec::with_capacity(argc);
            for i in 0..argc {
                args.push(ctx.top(argc - i));
            }
            ctx.pop_n(argc);

            let result = prim.call(vm, &args)?;

            if tail {
                // The primitive's value is the caller's return value.
                match ctx.parent.take() {
                    Some(mut parent) => {
                        parent.push(result);
                        Ok(Transfer::Jump(*parent))
                    }
                    None => Ok(Transfer::Done(result)),
                }
            } else {
                ctx.push(result);
                Ok(Transfer::Jump(ctx))
            }
        }
        Value::Continuation(continuation) => {
            if argc > 1 {
                return Err(Error::WrongArgNumber(format!(
                    "continuation accepts at most 1 argument, got {argc}"
                )));
            }

            let mut nctx = continuation.snapshot();
            if argc == 1 {
                let value = ctx.pop();
                nctx.push(value);
            } else {
                nctx.push(Value::Nil);
            }
            // Splice onto the invoking frame's parent; the invoking frame
            // itself is abandoned.
            nctx.parent = ctx.parent.take();
            nctx.depth = nctx.parent.as_ref().map(|p| p.depth + 1).unwrap_or(0);
            Ok(Transfer::Jump(nctx))
        }
        other => Err(Error::WrongArgType(format!(
            "not a callable: {}",
            other.repr()
        ))),
    }
}
