use smol_str::SmolStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, self::Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed special form or syntax rule encountered at compile time.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Expression is neither an atom nor a list, or the compiler was
    /// driven outside its invariants (duplicate label, bad operand count).
    #[error("compile error: {0}")]
    Compile(String),

    #[error("unbound variable {0}")]
    UnboundVariable(SmolStr),

    /// A callee is not callable, or an argument has the wrong type.
    #[error("wrong argument type: {0}")]
    WrongArgType(String),

    #[error("wrong number of arguments: {0}")]
    WrongArgNumber(String),

    #[error("parse error at byte {pos}: {message}")]
    Parse { message: String, pos: usize },
}
