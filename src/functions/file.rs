//! File name functions.

use super::arg_words;
use crate::ast::FunctionCall;
use crate::error::{fail, Error, ErrorKind};
use crate::eval::Context;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

fn map_words(ctx: &mut Context, f: &FunctionCall, map: impl Fn(&str) -> Option<String>) -> Result<String, Error> {
    Ok(arg_words(ctx, f, 0)?
        .iter()
        .filter_map(|word| map(word))
        .collect::<Vec<_>>()
        .join(" "))
}

/// Directory part of a file name, without the trailing slash; `.` if there
/// is none. This is what `$(@D)` expands to.
pub(crate) fn dir_part(word: &str) -> String {
    match word.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => word[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// File part of a file name, as for `$(@F)`.
pub(crate) fn file_part(word: &str) -> String {
    match word.rfind('/') {
        Some(idx) => word[idx + 1..].to_string(),
        None => word.to_string(),
    }
}

/// Index of the `.` starting the suffix of the file part, if any.
fn suffix_start(word: &str) -> Option<usize> {
    let dot = word.rfind('.')?;
    match word.rfind('/') {
        Some(slash) if slash > dot => None,
        _ => Some(dot),
    }
}

pub(super) fn dir(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    map_words(ctx, f, |word| {
        Some(match word.rfind('/') {
            Some(idx) => word[..=idx].to_string(),
            None => "./".to_string(),
        })
    })
}

pub(super) fn notdir(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    map_words(ctx, f, |word| Some(file_part(word)))
}

pub(super) fn suffix(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    map_words(ctx, f, |word| suffix_start(word).map(|dot| word[dot..].to_string()))
}

pub(super) fn basename(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    map_words(ctx, f, |word| {
        Some(match suffix_start(word) {
            Some(dot) => word[..dot].to_string(),
            None => word.to_string(),
        })
    })
}

pub(super) fn wildcard(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let mut found = Vec::new();
    for pattern in arg_words(ctx, f, 0)? {
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                log::debug!("bad wildcard pattern '{}': {}", pattern, e);
                continue;
            }
        };
        let mut matches: Vec<String> = paths
            .filter_map(Result::ok)
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
        matches.sort();
        found.extend(matches);
    }
    Ok(found.join(" "))
}

pub(super) fn realpath(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    map_words(ctx, f, |word| {
        std::fs::canonicalize(word)
            .ok()
            .map(|path| path.to_string_lossy().into_owned())
    })
}

/// Make `path` absolute and resolve `.` and `..` without touching the file
/// system.
pub(crate) fn absolute_path(path: &str, cwd: &Path) -> String {
    let mut result = PathBuf::from("/");
    let joined = cwd.join(path);
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(part) => result.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    result.to_string_lossy().into_owned()
}

pub(super) fn abspath(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let cwd = std::env::current_dir()?;
    map_words(ctx, f, |word| Some(absolute_path(word, &cwd)))
}

pub(super) fn file(ctx: &mut Context, f: &FunctionCall) -> Result<String, Error> {
    let op = f.arg(ctx, 0)?;
    let op = op.trim();
    let (mode, name) = if let Some(name) = op.strip_prefix(">>") {
        (">>", name.trim())
    } else if let Some(name) = op.strip_prefix('>') {
        (">", name.trim())
    } else if let Some(name) = op.strip_prefix('<') {
        ("<", name.trim())
    } else {
        return fail(
            ErrorKind::InvalidFunctionArguments,
            Some(&f.pos),
            format!("file: invalid file operation: {}", op),
        );
    };
    if name.is_empty() {
        return fail(ErrorKind::InvalidFunctionArguments, Some(&f.pos), "file: missing filename");
    }
    log::debug!("$(file {}{})", mode, name);

    if mode == "<" {
        if f.args.len() > 1 {
            return fail(ErrorKind::InvalidFunctionArguments, Some(&f.pos), "file: too many arguments");
        }
        return Ok(match std::fs::read_to_string(name) {
            Ok(text) => text.strip_suffix('\n').map(String::from).unwrap_or(text),
            Err(_) => String::new(),
        });
    }

    let mut options = std::fs::OpenOptions::new();
    if mode == ">>" {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    let mut out = match options.create(true).open(name) {
        Ok(out) => out,
        Err(e) => return fail(ErrorKind::FileNotFound, Some(&f.pos), format!("open: {}: {}", name, e)),
    };
    if f.args.len() > 1 {
        let mut text = f.arg(ctx, 1)?;
        if !text.ends_with('\n') {
            text.push('\n');
        }
        out.write_all(text.as_bytes())?;
    }
    Ok(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Options;
    use crate::source::Source;

    fn expand(text: &str) -> String {
        let mut ctx = Context::with_captured_output(Options::default());
        ctx.read_makefile(&Source::from_string(&format!("$(info {})\n", text)))
            .unwrap();
        ctx.captured_output().trim_end_matches('\n').to_string()
    }

    #[test]
    fn test_dir_and_notdir() {
        assert_eq!(expand("$(dir src/foo.c hacks)"), "src/ ./");
        assert_eq!(expand("$(notdir src/foo.c hacks)"), "foo.c hacks");
    }

    #[test]
    fn test_suffix_and_basename() {
        assert_eq!(expand("$(suffix src/foo.c src-1.0/bar.c hacks)"), ".c .c");
        assert_eq!(
            expand("$(basename src/foo.c src-1.0/bar hacks)"),
            "src/foo src-1.0/bar hacks"
        );
    }

    #[test]
    fn test_automatic_parts() {
        assert_eq!(dir_part("obj/main.o"), "obj");
        assert_eq!(dir_part("main.o"), ".");
        assert_eq!(dir_part("/main.o"), "/");
        assert_eq!(file_part("obj/main.o"), "main.o");
    }

    #[test]
    fn test_absolute_path() {
        let cwd = Path::new("/home/user/project");
        assert_eq!(absolute_path("src/../lib/./a.c", cwd), "/home/user/project/lib/a.c");
        assert_eq!(absolute_path("/tmp//x/", cwd), "/tmp/x");
        assert_eq!(absolute_path("../../..", cwd), "/");
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(expand("$(wildcard Cargo.tom?)"), "Cargo.toml");
        assert_eq!(expand("[$(wildcard /nonexistent/*.rmake)]"), "[]");
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("rmake-file-test-{}", std::process::id()));
        let name = path.to_string_lossy();
        let text = format!(
            "$(file >{0},first)\n$(file >>{0},second)\n$(info $(file <{0}))\n",
            name
        );
        let mut ctx = Context::with_captured_output(Options::default());
        ctx.read_makefile(&Source::from_string(&text)).unwrap();
        assert_eq!(ctx.captured_output(), "first\nsecond\n");
        std::fs::remove_file(&path).unwrap();
    }
}
