//! Built-in functions such as `$(subst ...)` and `$(foreach ...)`.
//!
//! The tokenizer asks [`make_function`] whether a `$(...)` body names a
//! built-in function; if so the body is split into arguments once, at parse
//! time. Arity is checked when the call is expanded.

mod control;
mod file;
mod text;

use crate::ast::{Expression, FunctionCall, Token};
use crate::error::{fail, Error, ErrorKind};
use crate::eval::Context;
use crate::source::Position;
use crate::vline::{is_whitespace, VChar, VCharString};

pub(crate) use file::{dir_part, file_part};

type FunctionEval = fn(&mut Context, &FunctionCall) -> Result<String, Error>;

struct FunctionSpec {
    name: &'static str,
    min_args: usize,
    /// The last argument takes any further commas
    max_args: Option<usize>,
    eval: FunctionEval,
}

const fn spec(name: &'static str, min_args: usize, max_args: Option<usize>, eval: FunctionEval) -> FunctionSpec {
    FunctionSpec {
        name,
        min_args,
        max_args,
        eval,
    }
}

const FUNCTIONS: &[FunctionSpec] = &[
    spec("subst", 3, Some(3), text::subst),
    spec("patsubst", 3, Some(3), text::patsubst),
    spec("strip", 1, Some(1), text::strip),
    spec("findstring", 2, Some(2), text::findstring),
    spec("filter", 2, Some(2), text::filter),
    spec("filter-out", 2, Some(2), text::filter_out),
    spec("sort", 1, Some(1), text::sort),
    spec("word", 2, Some(2), text::word),
    spec("words", 1, Some(1), text::words),
    spec("wordlist", 3, Some(3), text::wordlist),
    spec("firstword", 1, Some(1), text::firstword),
    spec("lastword", 1, Some(1), text::lastword),
    spec("addsuffix", 2, Some(2), text::addsuffix),
    spec("addprefix", 2, Some(2), text::addprefix),
    spec("join", 2, Some(2), text::join),
    spec("dir", 1, Some(1), file::dir),
    spec("notdir", 1, Some(1), file::notdir),
    spec("suffix", 1, Some(1), file::suffix),
    spec("basename", 1, Some(1), file::basename),
    spec("wildcard", 1, Some(1), file::wildcard),
    spec("realpath", 1, Some(1), file::realpath),
    spec("abspath", 1, Some(1), file::abspath),
    spec("file", 1, Some(2), file::file),
    spec("error", 1, Some(1), control::error),
    spec("warning", 1, Some(1), control::warning),
    spec("info", 1, Some(1), control::info),
    spec("shell", 1, Some(1), control::shell),
    spec("origin", 1, Some(1), control::origin),
    spec("flavor", 1, Some(1), control::flavor),
    spec("value", 1, Some(1), control::value),
    spec("foreach", 3, Some(3), control::foreach),
    spec("if", 2, Some(3), control::if_),
    spec("or", 1, None, control::or),
    spec("and", 1, None, control::and),
    spec("call", 1, None, control::call),
    spec("eval", 1, Some(1), control::eval),
];

fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Is `name` a built-in function?
pub fn is_function(name: &str) -> bool {
    lookup(name).is_some()
}

/// Turn the tokens of a `$(...)` body into a function call if the body
/// starts with a built-in function name followed by whitespace.
///
/// Gives the tokens back when the body is a plain variable reference.
pub(crate) fn make_function(tokens: Vec<Token>, open: char, pos: &Position) -> Result<FunctionCall, Vec<Token>> {
    let first: Vec<VChar> = match tokens.first() {
        Some(Token::Literal(s)) => s.vchars().cloned().collect(),
        _ => return Err(tokens),
    };
    let name_len = match first.iter().position(|v| is_whitespace(v.ch)) {
        Some(len) => len,
        None => return Err(tokens),
    };
    let name: String = first[..name_len].iter().map(|v| v.ch).collect();
    let spec = match lookup(&name) {
        Some(spec) => spec,
        None => return Err(tokens),
    };
    log::trace!("function '{}' at {}", name, pos);

    // whitespace between the name and the first argument is dropped
    let rest: VCharString = first[name_len..]
        .iter()
        .skip_while(|v| is_whitespace(v.ch))
        .cloned()
        .collect();
    let mut body = Vec::with_capacity(tokens.len());
    if !rest.is_empty() {
        body.push(Token::Literal(rest));
    }
    body.extend(tokens.into_iter().skip(1));

    Ok(FunctionCall {
        name,
        open,
        args: split_args(body, open, spec.max_args),
        pos: pos.clone(),
    })
}

/// Split on commas outside nested parentheses, leaving the commas of the
/// last permitted argument alone.
fn split_args(tokens: Vec<Token>, open: char, max_args: Option<usize>) -> Vec<Expression> {
    let close = if open == '(' { ')' } else { '}' };
    let mut args = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;

    for token in tokens {
        let literal = match token {
            Token::Literal(s) => s,
            other => {
                current.push(other);
                continue;
            }
        };
        let mut piece = VCharString::new();
        for vchar in literal.vchars() {
            let last = max_args.is_some_and(|max| args.len() + 1 >= max);
            match vchar.ch {
                c if c == open => depth += 1,
                c if c == close => depth = depth.saturating_sub(1),
                ',' if depth == 0 && !last => {
                    if !piece.is_empty() {
                        current.push(Token::Literal(piece.take()));
                    }
                    args.push(Expression::new(std::mem::take(&mut current)));
                    continue;
                }
                _ => {}
            }
            piece.push(vchar.clone());
        }
        if !piece.is_empty() {
            current.push(Token::Literal(piece));
        }
    }
    args.push(Expression::new(current));
    args
}

/// Expand a function call.
pub(crate) fn call(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let spec = match lookup(&f.name) {
        Some(spec) => spec,
        None => return fail(ErrorKind::Parse, Some(&f.pos), format!("unknown function '{}'", f.name)),
    };
    if f.args.len() < spec.min_args {
        return fail(
            ErrorKind::InvalidFunctionArguments,
            Some(&f.pos),
            format!(
                "insufficient number of arguments ({}) to function '{}'",
                f.args.len(),
                f.name
            ),
        );
    }
    (spec.eval)(ctx, f)
}

/// Expand argument `idx` and split it into words.
fn arg_words(ctx: &mut Context, f: &FunctionCall, idx: usize) -> Result<Vec<String>, Error> {
    Ok(f.arg(ctx, idx)?.split_whitespace().map(String::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::ToSyntax;
    use crate::tokenizer::tokenize_line;
    use crate::vline::VirtualLine;
    use std::rc::Rc;

    fn tokens(text: &str) -> Vec<Token> {
        let vline = VirtualLine::new(vec![format!("{}\n", text)], Position::new(Rc::from("t"), 0, 0));
        tokenize_line(&mut vline.scanner()).unwrap()
    }

    fn function(text: &str) -> FunctionCall {
        match tokens(text).into_iter().next() {
            Some(Token::Function(f)) => *f,
            other => panic!("not a function: {:?}", other),
        }
    }

    fn arg_texts(f: &FunctionCall) -> Vec<String> {
        f.args.iter().map(|a| a.makefile()).collect()
    }

    #[test]
    fn test_split_on_top_level_commas() {
        let f = function("$(subst a,b,$(patsubst x,y,z) c)");
        assert_eq!(f.name, "subst");
        assert_eq!(arg_texts(&f), vec!["a", "b", "$(patsubst x,y,z) c"]);
    }

    #[test]
    fn test_commas_inside_parens() {
        let f = function("$(if a,(b,c),d)");
        assert_eq!(arg_texts(&f), vec!["a", "(b,c)", "d"]);
    }

    #[test]
    fn test_last_argument_keeps_commas() {
        let f = function("$(info a, b,c)");
        assert_eq!(arg_texts(&f), vec!["a, b,c"]);

        let f = function("$(if x,y,z,w)");
        assert_eq!(arg_texts(&f), vec!["x", "y", "z,w"]);
    }

    #[test]
    fn test_leading_whitespace_dropped() {
        let f = function("$(info    hello  world)");
        assert_eq!(arg_texts(&f), vec!["hello  world"]);

        let f = function("$(info $(X))");
        assert_eq!(f.args.len(), 1);
        assert!(matches!(f.args[0].tokens[0], Token::VarRef(_)));
    }

    #[test]
    fn test_not_a_function() {
        assert!(matches!(tokens("$(info)")[0], Token::VarRef(_)));
        assert!(matches!(tokens("$(foo bar)")[0], Token::VarRef(_)));
        assert!(matches!(tokens("$(SRC:.c=.o)")[0], Token::VarRef(_)));
        assert!(is_function("filter-out"));
        assert!(!is_function("filterout"));
    }

    #[test]
    fn test_empty_arguments() {
        let f = function("$(subst ,X,abc)");
        assert_eq!(f.args.len(), 3);
        assert!(f.args[0].is_empty());
    }
}
