#![allow(clippy::tabs_in_doc_comments)] // Makefile uses tabs
#![deny(missing_docs)]

//! A GNU Make compatible build tool
//!
//! Makefiles are read into an AST that remembers where every character came
//! from, then executed by a [`Context`]. The AST can also be lowered into a
//! rowan syntax tree and printed back as a makefile.
//!
//! Example:
//!
//! ```rust
//! use rmake::{Context, Options, Source};
//! let contents = r#"PYTHON := python3
//! SOURCES = setup.py tests.py
//!
//! $(info $(PYTHON) $(words $(SOURCES)))
//!
//! .PHONY: all
//! all:
//! 	@$(PYTHON) setup.py build
//! "#;
//! let makefile: rmake::Makefile = contents.parse().unwrap();
//! assert_eq!(makefile.rules().count(), 2);
//!
//! let mut ctx = Context::with_captured_output(Options::default());
//! ctx.read_makefile(&Source::from_string(contents)).unwrap();
//! assert_eq!(ctx.captured_output(), "python3 2\n");
//! ```

mod ast;
mod error;
mod eval;
mod functions;
mod parser;
mod pattern;
mod rules;
mod scanner;
mod shell;
mod source;
mod symtable;
mod syntax;
mod tokenizer;
mod vline;

pub use ast::{
    AssignOp, AssignmentExpression, Block, Conditional, ConditionalArgs, ConditionalBlock, ConditionalKind,
    DefineBlock, DefineDirective, Directive, DirectiveKind, Expression, FunctionCall, Makefile, Modifier, Recipe,
    RuleExpression, RuleOp, RuleRhs, Statement, Token, UndefineDirective, VarRef,
};
pub use error::{Error, ErrorKind, MakeError, EXIT_ERROR, EXIT_REBUILD, EXIT_SUCCESS};
pub use eval::{Context, Options};
pub use functions::is_function;
pub use parser::{parse_ifeq_conditionals, parse_makefile};
pub use rules::{Rule, RuleDb, Target};
pub use scanner::{EndOfStream, ScannerIterator};
pub use source::{Position, Positioned, Source};
pub use symtable::{Entry, Origin, SymbolTable, Value};
pub use syntax::{Lang, SyntaxNode, ToSyntax};
pub use vline::{LineKind, VChar, VCharString, VirtualLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(non_camel_case_types)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum SyntaxKind {
    IDENTIFIER = 0,
    INDENT,
    TEXT,
    WHITESPACE,
    NEWLINE,
    DOLLAR,
    LPAREN,
    RPAREN,
    LBRACE,
    RBRACE,
    COMMA,
    OPERATOR,
    KEYWORD,

    // composite nodes
    ROOT, // The entire file
    RULE, // A single rule
    RECIPE,
    ASSIGNMENT,
    EXPR,
    VARIABLE,
    FUNCTION,
    ARGUMENT,

    // Directives
    CONDITIONAL,
    DIRECTIVE,
    DEFINE,
    BLOCK,
}

/// Convert our `SyntaxKind` into the rowan `SyntaxKind`.
impl From<SyntaxKind> for rowan::SyntaxKind {
    fn from(kind: SyntaxKind) -> Self {
        Self(kind as u16)
    }
}
