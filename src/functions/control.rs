//! Functions that control expansion or talk to the outside world.

use crate::ast::FunctionCall;
use crate::error::{fail, Error, ErrorKind};
use crate::eval::Context;
use crate::symtable::{Entry, Origin};

pub(super) fn error(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let message = f.arg(ctx, 0)?;
    fail(ErrorKind::UserError, Some(&f.pos), message)
}

pub(super) fn warning(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let message = f.arg(ctx, 0)?;
    eprintln!("{}: {}", f.pos, message);
    Ok(String::new())
}

pub(super) fn info(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let message = f.arg(ctx, 0)?;
    ctx.print(&message);
    Ok(String::new())
}

pub(super) fn shell(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let command = f.arg(ctx, 0)?;
    ctx.run_shell(&command)
}

pub(super) fn origin(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let name = f.arg(ctx, 0)?;
    Ok(ctx.symtable().origin(name.trim()).to_string())
}

pub(super) fn flavor(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let name = f.arg(ctx, 0)?;
    Ok(ctx.symtable().flavor(name.trim()).to_string())
}

pub(super) fn value(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let name = f.arg(ctx, 0)?;
    Ok(ctx.symtable().raw_value(name.trim()).unwrap_or_default())
}

pub(super) fn foreach(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let var = f.arg(ctx, 0)?.trim().to_string();
    let list = f.arg(ctx, 1)?;

    ctx.symtable_mut().push_layer();
    let mut results = Vec::new();
    let mut outcome = Ok(());
    for word in list.split_whitespace() {
        ctx.symtable_mut()
            .insert(Entry::simple(&var, word, Origin::Automatic), true);
        match f.arg(ctx, 2) {
            Ok(result) => results.push(result),
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    ctx.symtable_mut().pop_layer();
    outcome?;
    Ok(results.join(" "))
}

pub(super) fn if_(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let condition = f.arg(ctx, 0)?;
    if !condition.trim().is_empty() {
        f.arg(ctx, 1)
    } else {
        f.arg(ctx, 2)
    }
}

pub(super) fn or(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    for idx in 0..f.args.len() {
        let value = f.arg(ctx, idx)?;
        if !value.trim().is_empty() {
            return Ok(value);
        }
    }
    Ok(String::new())
}

pub(super) fn and(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let mut last = String::new();
    for idx in 0..f.args.len() {
        last = f.arg(ctx, idx)?;
        if last.trim().is_empty() {
            return Ok(String::new());
        }
    }
    Ok(last)
}

pub(super) fn call(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let name = f.arg(ctx, 0)?.trim().to_string();
    let mut params = Vec::with_capacity(f.args.len());
    for idx in 1..f.args.len() {
        params.push(f.arg(ctx, idx)?);
    }
    log::trace!("call {} with {} argument(s)", name, params.len());

    let outer = ctx.enter_call(params.len());
    let table = ctx.symtable_mut();
    table.push_layer();
    table.insert(Entry::simple("0", name.as_str(), Origin::Automatic), true);
    for (idx, param) in params.iter().enumerate() {
        table.insert(Entry::simple(&(idx + 1).to_string(), param.as_str(), Origin::Automatic), true);
    }
    // hide parameters of an enclosing call that this one doesn't pass
    for idx in params.len() + 1..=outer {
        table.insert(Entry::simple(&idx.to_string(), "", Origin::Automatic), true);
    }

    let result = ctx.expand_unguarded(&name);
    ctx.symtable_mut().pop_layer();
    ctx.leave_call(outer);
    result
}

pub(super) fn eval(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let text = f.arg(ctx, 0)?;
    ctx.eval_text(&text)?;
    Ok(String::new())
}
