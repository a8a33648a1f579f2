//! Parser: tokens to s-expressions.

use crate::error::{Error, Result};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::value::Value;

/// Parse all top-level expressions in the source.
pub fn parse(source: &str) -> Result<Vec<Value>> {
    let mut lexer = Lexer::new(source);
    let mut expressions = Vec::new();

    loop {
        let token = lexer.next_token();
        if token.kind == TokenKind::Eof {
            break;
        }
        expressions.push(parse_expr(&mut lexer, token)?);
    }

    Ok(expressions)
}

fn parse_error(message: impl Into<String>, token: Token) -> Error {
    Error::Parse {
        message: message.into(),
        pos: token.offset,
    }
}

fn parse_expr(lexer: &mut Lexer, token: Token) -> Result<Value> {
    match token.kind {
        TokenKind::LeftParen => parse_list(lexer),
        TokenKind::RightParen => Err(parse_error("unexpected right parenthesis", token)),
        TokenKind::QuoteMark => {
            let next = lexer.next_token();
            let datum = parse_expr(lexer, next)?;
            Ok(Value::list([Value::symbol("quote"), datum]))
        }
        TokenKind::Dot => Err(parse_error("unexpected dot", token)),
        TokenKind::String => parse_string(token.fragment(lexer.source()), token),
        TokenKind::Atom => parse_atom(token.fragment(lexer.source()), token),
        TokenKind::Eof => Err(parse_error("unexpected end-of-file", token)),
    }
}

fn parse_list(lexer: &mut Lexer) -> Result<Value> {
    let mut elements = Vec::new();
    let mut tail = Value::Nil;

    loop {
        let token = lexer.next_token();
        match token.kind {
            TokenKind::RightParen => break,
            TokenKind::Eof => {
                return Err(parse_error("unexpected end-of-file in list", token));
            }
            TokenKind::Dot => {
                if elements.is_empty() {
                    return Err(parse_error("dot requires a preceding element", token));
                }
                let next = lexer.next_token();
                tail = parse_expr(lexer, next)?;
                let close = lexer.next_token();
                if close.kind != TokenKind::RightParen {
                    return Err(parse_error(
                        "expected right parenthesis after dotted tail",
                        close,
                    ));
                }
                break;
            }
            _ => elements.push(parse_expr(lexer, token)?),
        }
    }

    Ok(Value::list_with_tail(elements, tail))
}

fn parse_string(fragment: &str, token: Token) -> Result<Value> {
    let inner = fragment
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(|| parse_error("unterminated string", token))?;

    let mut string = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            string.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => string.push('"'),
            Some('\\') => string.push('\\'),
            Some('n') => string.push('\n'),
            Some('t') => string.push('\t'),
            Some(other) => {
                return Err(parse_error(format!("unknown escape: \\{other}"), token));
            }
            None => return Err(parse_error("unterminated escape", token)),
        }
    }

    Ok(Value::Str(string))
}

fn parse_atom(fragment: &str, token: Token) -> Result<Value> {
    let mut chars = fragment.chars();
    let first = chars
        .next()
        .ok_or_else(|| parse_error("expected atom", token))?;

    if first == '#' {
        return match chars.as_str() {
            "t" | "true" => Ok(Value::Bool(true)),
            "f" | "false" => Ok(Value::Bool(false)),
            _ => Err(parse_error(format!("unknown atom: {fragment}"), token)),
        };
    }

    // Only classify as a number when it can start one; `+`, `-` and `...`
    // are ordinary symbols.
    let numeric_start = first.is_ascii_digit()
        || (matches!(first, '+' | '-' | '.')
            && chars.clone().next().is_some_and(|c| c.is_ascii_digit()));

    if numeric_start {
        if let Ok(value) = fragment.parse::<i64>() {
            return Ok(Value::Int(value));
        }
        if let Ok(value) = fragment.parse::<f64>() {
            return Ok(Value::Float(value));
        }
        if let Some(value) = parse_complex(fragment) {
            return Ok(value);
        }
        return Err(parse_error(format!("malformed number: {fragment}"), token));
    }

    Ok(Value::symbol(fragment))
}

/// Parse `a+bi` / `a-bi` / `bi` complex literals.
fn parse_complex(fragment: &str) -> Option<Value> {
    let body = fragment.strip_suffix('i')?;

    // Split at the sign of the imaginary part, skipping the leading sign
    // of the real part.
    let split = body
        .char_indices()
        .skip(1)
        .find(|(_, c)| matches!(c, '+' | '-'))
        .map(|(at, _)| at);

    match split {
        Some(at) => {
            let re = body[..at].parse::<f64>().ok()?;
            let im = body[at..].parse::<f64>().ok()?;
            Some(Value::Complex(re, im))
        }
        None => {
            let im = body.parse::<f64>().ok()?;
            Some(Value::Complex(0.0, im))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_one(source: &str) -> Value {
        let mut expressions = parse(source).expect("parse failed");
        assert_eq!(expressions.len(), 1);
        expressions.remove(0)
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_one("42"), Value::Int(42));
        assert_eq!(parse_one("-7"), Value::Int(-7));
        assert_eq!(parse_one("2.5"), Value::Float(2.5));
        assert_eq!(parse_one("2+3i"), Value::Complex(2.0, 3.0));
        assert_eq!(parse_one("2-3i"), Value::Complex(2.0, -3.0));
    }

    #[test]
    fn test_booleans() {
        assert_eq!(parse_one("#t"), Value::Bool(true));
        assert_eq!(parse_one("#f"), Value::Bool(false));
    }

    #[test]
    fn test_symbols() {
        assert_eq!(parse_one("+"), Value::symbol("+"));
        assert_eq!(parse_one("set!"), Value::symbol("set!"));
        assert_eq!(parse_one("..."), Value::symbol("..."));
    }

    #[test]
    fn test_nested_lists() {
        let expr = parse_one("(1 (2 3) ())");
        assert_eq!(expr.repr().to_string(), "(1 (2 3) ())");

        let (head, _) = expr.uncons().expect("list");
        assert_eq!(head, Value::Int(1));
    }

    #[test]
    fn test_dotted_pair() {
        let expr = parse_one("(1 . 2)");
        assert_eq!(expr.repr().to_string(), "(1 . 2)");

        let (head, tail) = expr.uncons().expect("pair");
        assert_eq!(head, Value::Int(1));
        assert_eq!(tail, Value::Int(2));
    }

    #[test]
    fn test_quote_reads_as_list() {
        let expr = parse_one("'(1 2)");
        assert_eq!(expr.repr().to_string(), "(quote (1 2))");
    }

    #[test]
    fn test_empty_list_is_nil() {
        assert_eq!(parse_one("()"), Value::Nil);
    }

    #[test]
    fn test_sequence_of_expressions() {
        let expressions = parse("(one 1) (two 2) (three 3)").expect("parse failed");
        assert_eq!(expressions.len(), 3);
    }

    #[test]
    fn test_unbalanced_list_is_an_error() {
        assert!(matches!(parse("(1 2"), Err(Error::Parse { .. })));
        assert!(matches!(parse(")"), Err(Error::Parse { .. })));
    }
}
