use crate::error::{Error, ErrorKind, MakeError};
use std::path::Path;
use std::rc::Rc;

/// Makefile names tried, in order, when none is given explicitly.
pub const DEFAULT_MAKEFILES: [&str; 3] = ["GNUmakefile", "makefile", "Makefile"];

/// Name given to a source that doesn't come from a file.
pub const STRING_SOURCE_NAME: &str = "...string";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A zero-based location inside a makefile
pub struct Position {
    /// File the character came from
    pub filename: Rc<str>,
    /// Zero-based line number
    pub row: usize,
    /// Zero-based column
    pub col: usize,
}

impl Position {
    /// Create a new position.
    pub fn new(filename: Rc<str>, row: usize, col: usize) -> Self {
        Position { filename, row, col }
    }

    /// One-based line number, as printed in diagnostics.
    pub fn line(&self) -> usize {
        self.row + 1
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.filename, self.line())
    }
}

/// Anything that knows where in a makefile it came from.
pub trait Positioned {
    /// The position of the item.
    fn pos(&self) -> Position;
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The text of a makefile, split into lines that keep their terminators
///
/// # Example
/// ```
/// use rmake::Source;
/// let src = Source::from_string("all:\n\techo hi\n");
/// assert_eq!(&*src.name(), "...string");
/// assert_eq!(src.lines(), &["all:\n".to_string(), "\techo hi\n".to_string()]);
/// ```
pub struct Source {
    name: Rc<str>,
    lines: Vec<String>,
}

impl Source {
    /// Read a makefile from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        log::debug!("loading makefile {}", path.display());
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(Source::with_name(path.to_string_lossy().as_ref(), &text))
    }

    /// Wrap an in-memory string.
    pub fn from_string(text: &str) -> Self {
        Source::with_name(STRING_SOURCE_NAME, text)
    }

    /// Wrap an in-memory string under a chosen name.
    pub fn with_name(name: &str, text: &str) -> Self {
        Source {
            name: Rc::from(name),
            lines: split_lines(text),
        }
    }

    /// Look for `GNUmakefile`, `makefile` and `Makefile`, in that order.
    pub fn find_default() -> Result<Self, Error> {
        Source::find_default_in(Path::new("."))
    }

    /// Like [`Source::find_default`], but relative to `dir`.
    pub fn find_default_in(dir: &Path) -> Result<Self, Error> {
        for name in DEFAULT_MAKEFILES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                let mut src = Source::from_file(&candidate)?;
                if dir == Path::new(".") {
                    src.name = Rc::from(name);
                }
                return Ok(src);
            }
        }
        Err(MakeError::new(ErrorKind::NoMakefileFound, None).into())
    }

    /// The name of the source, used in every position it produces.
    pub fn name(&self) -> Rc<str> {
        self.name.clone()
    }

    /// The lines of the source, terminators included.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(String::from).collect()
}
