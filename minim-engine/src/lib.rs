mod builder;
mod compiler;
mod core;
mod env;
pub mod error;
mod form;
mod handle;
mod lexer;
mod macros;
mod opcode;
mod parser;
mod repr;
mod value;
mod vm;

pub use self::compiler::compile;
pub use self::core::{init_core, Primitive, PrimitiveFn};
pub use self::env::Env;
pub use self::form::{Form, Proc};
pub use self::handle::Handle;
pub use self::macros::Macro;
pub use self::opcode::Opcode;
pub use self::parser::parse;
pub use self::value::{Pair, Value};
pub use self::vm::{call, eval, Continuation, Vm};

/// Create a new environment loaded with the core library.
pub fn new_env() -> error::Result<Handle<Env>> {
    let mut env = Env::new();
    init_core(&mut env)?;
    Ok(Handle::new(env))
}

/// Parse, compile and run every top-level expression in the source,
/// returning the value of the last one.
pub fn eval_str(env: &Handle<Env>, source: &str) -> error::Result<Value> {
    let mut result = Value::Nil;

    for expr in parse(source)? {
        let form = compile(env, &expr)?;
        form.fix_lexical(env.clone());
        result = vm::eval(&form)?;
    }

    Ok(result)
}
