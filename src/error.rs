use crate::source::Position;

/// Name used as the prefix of diagnostics that have no source position.
pub const PROGRAM_NAME: &str = "make";

/// Exit status of a successful run.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status when `-q` finds a target that needs rebuilding.
pub const EXIT_REBUILD: i32 = 1;

/// Exit status for every other failure.
pub const EXIT_ERROR: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// The kind of failure a [`MakeError`] describes
pub enum ErrorKind {
    /// Malformed makefile syntax
    Parse,
    /// A recipe line appeared before any rule
    RecipeCommencesBeforeFirstTarget,
    /// A statement expanded to text that is neither a rule nor an assignment
    MissingSeparator,
    /// A built-in function was called with the wrong number of arguments
    InvalidFunctionArguments,
    /// The arguments of `ifeq`/`ifneq` could not be parsed
    InvalidSyntaxInConditional,
    /// An assignment whose name expanded to nothing
    EmptyVariableName,
    /// A recursively expanded variable referenced itself
    RecursiveVariable,
    /// None of the default makefile names exist
    NoMakefileFound,
    /// An `include` named a file that does not exist
    FileNotFound,
    /// A `define` without its `endef`
    MissingEndef,
    /// A scanner was pushed back past its first item
    EndOfStream,
    /// Raised by `$(error ...)`
    UserError,
    /// A goal or prerequisite has no rule and no file
    NoRule,
    /// A recipe line exited with a non-zero status
    RecipeFailed {
        /// The target whose recipe failed
        target: String,
        /// Exit status of the shell
        status: i32,
    },
}

impl ErrorKind {
    fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse error",
            ErrorKind::RecipeCommencesBeforeFirstTarget => "recipe commences before first target",
            ErrorKind::MissingSeparator => "missing separator",
            ErrorKind::InvalidFunctionArguments => "invalid function arguments",
            ErrorKind::InvalidSyntaxInConditional => "invalid syntax in conditional",
            ErrorKind::EmptyVariableName => "empty variable name",
            ErrorKind::RecursiveVariable => "recursive variable references itself",
            ErrorKind::NoMakefileFound => "No targets specified and no makefile found",
            ErrorKind::FileNotFound => "No such file or directory",
            ErrorKind::MissingEndef => "missing 'endef', unterminated 'define'",
            ErrorKind::EndOfStream => "unexpected end of input",
            ErrorKind::UserError => "",
            ErrorKind::NoRule => "No rule to make target",
            ErrorKind::RecipeFailed { .. } => "recipe failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// An error raised while reading, parsing or running a makefile
pub struct MakeError {
    /// What went wrong
    pub kind: ErrorKind,
    /// Where in the makefile it went wrong, when known
    pub pos: Option<Position>,
    /// Human readable description
    pub message: String,
}

impl MakeError {
    /// Create an error carrying the default message of its kind.
    pub fn new(kind: ErrorKind, pos: Option<Position>) -> Self {
        let message = kind.default_message().to_string();
        MakeError { kind, pos, message }
    }

    /// Create an error with a specific message.
    pub fn with_message(kind: ErrorKind, pos: Option<Position>, message: impl Into<String>) -> Self {
        MakeError {
            kind,
            pos,
            message: message.into(),
        }
    }

    /// Append detail to the message, separated by `"; "`.
    pub fn more(mut self, detail: impl AsRef<str>) -> Self {
        self.message = format!("{}; {}", self.message, detail.as_ref());
        self
    }

    /// Process exit status this error maps to.
    pub fn exit_status(&self) -> i32 {
        match self.kind {
            ErrorKind::UserError => 1,
            _ => EXIT_ERROR,
        }
    }
}

impl std::fmt::Display for MakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match (&self.kind, &self.pos) {
            (ErrorKind::RecipeFailed { target, status }, Some(pos)) => {
                write!(f, "{}: *** [{}: {}] Error {}", PROGRAM_NAME, pos, target, status)
            }
            (ErrorKind::RecipeFailed { target, status }, None) => {
                write!(f, "{}: *** [{}] Error {}", PROGRAM_NAME, target, status)
            }
            (_, Some(pos)) => write!(f, "{}: *** {}. Stop.", pos, self.message),
            (_, None) => write!(f, "{}: *** {}. Stop.", PROGRAM_NAME, self.message),
        }
    }
}

impl std::error::Error for MakeError {}

#[derive(Debug)]
/// An error that can occur when running a makefile
pub enum Error {
    /// An I/O error occurred
    Io(std::io::Error),

    /// A makefile error occurred
    Make(MakeError),
}

impl Error {
    /// The makefile error kind, if this is not an I/O error.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            Error::Io(_) => None,
            Error::Make(e) => Some(&e.kind),
        }
    }

    /// Process exit status this error maps to.
    pub fn exit_status(&self) -> i32 {
        match self {
            Error::Io(_) => EXIT_ERROR,
            Error::Make(e) => e.exit_status(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Make(e) => write!(f, "{}", e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<MakeError> for Error {
    fn from(e: MakeError) -> Self {
        Error::Make(e)
    }
}

impl From<crate::scanner::EndOfStream> for Error {
    fn from(_: crate::scanner::EndOfStream) -> Self {
        Error::Make(MakeError::new(ErrorKind::EndOfStream, None))
    }
}

impl std::error::Error for Error {}

/// Shorthand for building an `Err(Error::Make(..))` with a custom message.
pub(crate) fn fail<T>(kind: ErrorKind, pos: Option<&Position>, message: impl Into<String>) -> Result<T, Error> {
    Err(MakeError::with_message(kind, pos.cloned(), message).into())
}

/// Format a warning the way GNU Make does.
pub fn format_warning(pos: Option<&Position>, msg: &str) -> String {
    match pos {
        Some(pos) => format!("{}: warning: {}", pos, msg),
        None => format!("{}: warning: {}", PROGRAM_NAME, msg),
    }
}

/// Print a warning to stderr. Warnings never stop the run.
pub fn warning_message(pos: Option<&Position>, msg: &str) {
    log::debug!("warning at {:?}: {}", pos, msg);
    eprintln!("{}", format_warning(pos, msg));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn pos(row: usize) -> Position {
        Position::new(Rc::from("Makefile"), row, 0)
    }

    #[test]
    fn test_positioned_error() {
        let err = MakeError::new(ErrorKind::MissingSeparator, Some(pos(2)));
        assert_eq!(err.to_string(), "Makefile:3: *** missing separator. Stop.");
        assert_eq!(err.exit_status(), EXIT_ERROR);
    }

    #[test]
    fn test_unpositioned_error() {
        let err = MakeError::with_message(ErrorKind::NoRule, None, "No rule to make target 'all'");
        assert_eq!(err.to_string(), "make: *** No rule to make target 'all'. Stop.");
    }

    #[test]
    fn test_more_message() {
        let err = MakeError::new(ErrorKind::InvalidSyntaxInConditional, Some(pos(0)))
            .more("missing closing )");
        assert_eq!(err.message, "invalid syntax in conditional; missing closing )");
    }

    #[test]
    fn test_recipe_failure() {
        let err = MakeError::new(
            ErrorKind::RecipeFailed {
                target: "all".to_string(),
                status: 3,
            },
            Some(pos(1)),
        );
        assert_eq!(err.to_string(), "make: *** [Makefile:2: all] Error 3");
    }

    #[test]
    fn test_user_error_exit_status() {
        let err: Error = MakeError::with_message(ErrorKind::UserError, Some(pos(0)), "boom").into();
        assert_eq!(err.exit_status(), 1);
        assert_eq!(err.kind(), Some(&ErrorKind::UserError));
    }

    #[test]
    fn test_warning_format() {
        assert_eq!(
            format_warning(Some(&pos(4)), "undefined variable 'FOO'"),
            "Makefile:5: warning: undefined variable 'FOO'"
        );
        assert_eq!(format_warning(None, "x"), "make: warning: x");
    }
}
