//! Text functions.

use super::arg_words;
use crate::ast::FunctionCall;
use crate::error::{fail, Error, ErrorKind};
use crate::eval::Context;
use crate::pattern::matches_pattern;
use std::collections::BTreeSet;

pub(super) fn subst(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let from = f.arg(ctx, 0)?;
    let to = f.arg(ctx, 1)?;
    let text = f.arg(ctx, 2)?;
    if from.is_empty() {
        return Ok(text + &to);
    }
    Ok(text.replace(&from, &to))
}

pub(super) fn patsubst(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let pattern = f.arg(ctx, 0)?;
    let replacement = f.arg(ctx, 1)?;
    let text = f.arg(ctx, 2)?;
    Ok(crate::pattern::patsubst(&pattern, &replacement, &text))
}

pub(super) fn strip(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    Ok(arg_words(ctx, f, 0)?.join(" "))
}

pub(super) fn findstring(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let find = f.arg(ctx, 0)?;
    let text = f.arg(ctx, 1)?;
    Ok(if text.contains(&find) { find } else { String::new() })
}

fn filter_words(ctx: &mut Context, f: &FunctionCall, keep: bool) -> Result<String, Error> {
    let patterns = arg_words(ctx, f, 0)?;
    let words = arg_words(ctx, f, 1)?;
    Ok(words
        .into_iter()
        .filter(|word| patterns.iter().any(|p| matches_pattern(p, word)) == keep)
        .collect::<Vec<_>>()
        .join(" "))
}

pub(super) fn filter(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    filter_words(ctx, f, true)
}

pub(super) fn filter_out(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    filter_words(ctx, f, false)
}

pub(super) fn sort(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let words: BTreeSet<String> = arg_words(ctx, f, 0)?.into_iter().collect();
    Ok(words.into_iter().collect::<Vec<_>>().join(" "))
}

/// Parse a numeric argument of `word` or `wordlist`.
fn number(text: &str, which: &str, function: &str, f: &FunctionCall) -> Result<usize, Error> {
    match text.trim().parse::<usize>() {
        Ok(n) => Ok(n),
        Err(_) => fail(
            ErrorKind::InvalidFunctionArguments,
            Some(&f.pos),
            format!("non-numeric {} argument to '{}' function: '{}'", which, function, text.trim()),
        ),
    }
}

pub(super) fn word(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let n = number(&f.arg(ctx, 0)?, "first", "word", f)?;
    if n == 0 {
        return fail(
            ErrorKind::InvalidFunctionArguments,
            Some(&f.pos),
            "first argument to 'word' function must be greater than 0",
        );
    }
    Ok(arg_words(ctx, f, 1)?.into_iter().nth(n - 1).unwrap_or_default())
}

pub(super) fn words(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    Ok(arg_words(ctx, f, 0)?.len().to_string())
}

pub(super) fn wordlist(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let start = f.arg(ctx, 0)?;
    let start = number(&start, "first", "wordlist", f)?;
    let end = f.arg(ctx, 1)?;
    let end = number(&end, "second", "wordlist", f)?;
    if start == 0 {
        return fail(
            ErrorKind::InvalidFunctionArguments,
            Some(&f.pos),
            format!("invalid first argument to 'wordlist' function: '{}'", start),
        );
    }
    let words = arg_words(ctx, f, 2)?;
    if end < start {
        return Ok(String::new());
    }
    Ok(words
        .iter()
        .skip(start - 1)
        .take(end - start + 1)
        .cloned()
        .collect::<Vec<_>>()
        .join(" "))
}

pub(super) fn firstword(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    Ok(arg_words(ctx, f, 0)?.into_iter().next().unwrap_or_default())
}

pub(super) fn lastword(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    Ok(arg_words(ctx, f, 0)?.pop().unwrap_or_default())
}

pub(super) fn addsuffix(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let suffix = f.arg(ctx, 0)?;
    Ok(arg_words(ctx, f, 1)?
        .iter()
        .map(|word| format!("{}{}", word, suffix))
        .collect::<Vec<_>>()
        .join(" "))
}

pub(super) fn addprefix(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let prefix = f.arg(ctx, 0)?;
    Ok(arg_words(ctx, f, 1)?
        .iter()
        .map(|word| format!("{}{}", prefix, word))
        .collect::<Vec<_>>()
        .join(" "))
}

pub(super) fn join(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let first = arg_words(ctx, f, 0)?;
    let second = arg_words(ctx, f, 1)?;
    let len = first.len().max(second.len());
    Ok((0..len)
        .map(|i| {
            let a = first.get(i).map_or("", String::as_str);
            let b = second.get(i).map_or("", String::as_str);
            format!("{}{}", a, b)
        })
        .collect::<Vec<_>>()
        .join(" "))
}
