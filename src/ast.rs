//! Statement and expression types produced by the parser.

use crate::error::Error;
use crate::eval::Context;
use crate::source::{Position, Positioned};
use crate::vline::{VCharString, VirtualLine};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A single piece of an expression
pub enum Token {
    /// Plain text, never empty
    Literal(VCharString),
    /// `$(NAME)`, `${NAME}` or `$X`
    VarRef(VarRef),
    /// A call to a built-in function
    Function(Box<FunctionCall>),
}

impl Token {
    /// Expand the token.
    pub fn eval(&self, ctx: &mut Context) -> Result<String, Error> {
        match self {
            Token::Literal(s) => Ok(s.to_string()),
            Token::VarRef(v) => v.eval(ctx),
            Token::Function(f) => crate::functions::call(ctx, f),
        }
    }

    /// Where the token starts.
    pub fn get_pos(&self) -> Option<Position> {
        match self {
            Token::Literal(s) => s.get_pos(),
            Token::VarRef(v) => Some(v.pos.clone()),
            Token::Function(f) => Some(f.pos.clone()),
        }
    }

    /// True for a literal made only of blanks.
    pub fn is_whitespace(&self) -> bool {
        matches!(self, Token::Literal(s) if s.is_whitespace())
    }

    /// The literal text, if this is a literal.
    pub fn as_literal(&self) -> Option<&VCharString> {
        match self {
            Token::Literal(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// A sequence of tokens whose expansions are concatenated
pub struct Expression {
    /// The tokens, in source order
    pub tokens: Vec<Token>,
}

impl Expression {
    /// Wrap a token list.
    pub fn new(tokens: Vec<Token>) -> Self {
        Expression { tokens }
    }

    /// True if there are no tokens.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Expand every token and concatenate the results.
    pub fn eval(&self, ctx: &mut Context) -> Result<String, Error> {
        let mut result = String::new();
        for token in &self.tokens {
            result.push_str(&token.eval(ctx)?);
        }
        Ok(result)
    }

    /// Position of the first token that has one.
    pub fn get_pos(&self) -> Option<Position> {
        self.tokens.iter().find_map(Token::get_pos)
    }

    /// Drop whitespace-only literals from both ends.
    pub fn trimmed(&self) -> Expression {
        let start = self
            .tokens
            .iter()
            .position(|t| !t.is_whitespace())
            .unwrap_or(self.tokens.len());
        let end = self
            .tokens
            .iter()
            .rposition(|t| !t.is_whitespace())
            .map_or(start, |i| i + 1);
        Expression::new(self.tokens[start..end.max(start)].to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A variable reference
pub struct VarRef {
    /// `(` or `{`, or `None` for the single-character form
    pub open: Option<char>,
    /// Tokens making up the variable name
    pub tokens: Vec<Token>,
    /// Position of the `$`
    pub pos: Position,
}

impl VarRef {
    /// Expand the name, then look it up.
    pub fn eval(&self, ctx: &mut Context) -> Result<String, Error> {
        let mut name = String::new();
        for token in &self.tokens {
            name.push_str(&token.eval(ctx)?);
        }
        ctx.fetch(&name, Some(&self.pos))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A built-in function call such as `$(subst a,b,$(X))`
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// `(` or `{`
    pub open: char,
    /// Arguments, split on top-level commas
    pub args: Vec<Expression>,
    /// Position of the `$`
    pub pos: Position,
}

impl FunctionCall {
    /// Expand argument `idx`, or return the empty string if it is absent.
    pub fn arg(&self, ctx: &mut Context, idx: usize) -> Result<String, Error> {
        match self.args.get(idx) {
            Some(expr) => expr.eval(ctx),
            None => Ok(String::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Assignment operators
pub enum AssignOp {
    /// `=`: recursively expanded
    Recursive,
    /// `:=`: simply expanded
    Simple,
    /// `::=`: POSIX spelling of `:=`
    PosixSimple,
    /// `:::=`: expanded now, stored escaped as a recursive value
    Immediate,
    /// `?=`: only if not yet defined
    Conditional,
    /// `+=`
    Append,
    /// `!=`: run the value through the shell
    Shell,
    /// A `define` with no operator; behaves as `=`
    Implicit,
}

impl AssignOp {
    /// Parse an operator from its spelling.
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "=" => AssignOp::Recursive,
            ":=" => AssignOp::Simple,
            "::=" => AssignOp::PosixSimple,
            ":::=" => AssignOp::Immediate,
            "?=" => AssignOp::Conditional,
            "+=" => AssignOp::Append,
            "!=" => AssignOp::Shell,
            _ => return None,
        })
    }

    /// The operator's spelling; empty for [`AssignOp::Implicit`].
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignOp::Recursive => "=",
            AssignOp::Simple => ":=",
            AssignOp::PosixSimple => "::=",
            AssignOp::Immediate => ":::=",
            AssignOp::Conditional => "?=",
            AssignOp::Append => "+=",
            AssignOp::Shell => "!=",
            AssignOp::Implicit => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Words that may prefix an assignment
pub enum Modifier {
    /// `export`
    Export,
    /// `unexport`
    Unexport,
    /// `override`
    Override,
    /// `private`
    Private,
}

impl Modifier {
    /// Parse a modifier word.
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "export" => Modifier::Export,
            "unexport" => Modifier::Unexport,
            "override" => Modifier::Override,
            "private" => Modifier::Private,
            _ => return None,
        })
    }

    /// The modifier word.
    pub fn as_str(&self) -> &'static str {
        match self {
            Modifier::Export => "export",
            Modifier::Unexport => "unexport",
            Modifier::Override => "override",
            Modifier::Private => "private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// `NAME OP VALUE`, possibly with modifiers
pub struct AssignmentExpression {
    /// Tokens naming the variable
    pub lhs: Expression,
    /// The operator
    pub op: AssignOp,
    /// The value; its leading whitespace is hidden
    pub rhs: Expression,
    /// Modifiers in source order
    pub modifiers: Vec<Modifier>,
    /// Start of the statement
    pub pos: Position,
}

impl AssignmentExpression {
    /// Does the assignment carry `modifier`?
    pub fn has_modifier(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Rule operators
pub enum RuleOp {
    /// `:`
    Single,
    /// `::`
    Double,
    /// `?:`
    Maybe,
}

impl RuleOp {
    /// The operator's spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOp::Single => ":",
            RuleOp::Double => "::",
            RuleOp::Maybe => "?:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What follows the rule operator
pub enum RuleRhs {
    /// Whitespace separated prerequisites
    Prerequisites(Vec<Expression>),
    /// A target-specific variable assignment
    Assignment(Box<AssignmentExpression>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// `targets OP prerequisites [; recipe]`
pub struct RuleExpression {
    /// Target expressions
    pub targets: Vec<Expression>,
    /// The rule operator
    pub op: RuleOp,
    /// Prerequisites or a target-specific assignment
    pub rhs: RuleRhs,
    /// A recipe given after `;` on the rule line
    pub recipes: Vec<Recipe>,
    /// Start of the rule line
    pub pos: Position,
}

impl RuleExpression {
    /// Expand targets and prerequisites into whitespace separated words.
    pub fn eval(&self, ctx: &mut Context) -> Result<(Vec<String>, Vec<String>), Error> {
        let targets = eval_words(ctx, &self.targets)?;
        let prereqs = match &self.rhs {
            RuleRhs::Prerequisites(exprs) => eval_words(ctx, exprs)?,
            RuleRhs::Assignment(_) => Vec::new(),
        };
        Ok((targets, prereqs))
    }
}

fn eval_words(ctx: &mut Context, exprs: &[Expression]) -> Result<Vec<String>, Error> {
    let mut words = Vec::new();
    for expr in exprs {
        let value = expr.eval(ctx)?;
        words.extend(value.split_whitespace().map(String::from));
    }
    Ok(words)
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One recipe line
pub struct Recipe {
    /// The command text; `$$` is kept doubled in literals
    pub expr: Expression,
    /// Start of the recipe line
    pub pos: Position,
}

impl Recipe {
    /// Expand the recipe, turning `$$` into `$`.
    pub fn eval(&self, ctx: &mut Context) -> Result<String, Error> {
        let mut result = String::new();
        for token in &self.expr.tokens {
            match token {
                Token::Literal(s) => result.push_str(&s.to_string().replace("$$", "$")),
                other => result.push_str(&other.eval(ctx)?),
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Directives other than conditionals and `define`
pub enum DirectiveKind {
    /// `export`
    Export,
    /// `unexport`
    Unexport,
    /// `include`
    Include,
    /// `-include`
    MinusInclude,
    /// `sinclude`
    SInclude,
    /// `vpath`
    Vpath,
}

impl DirectiveKind {
    /// Parse a directive word.
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "export" => DirectiveKind::Export,
            "unexport" => DirectiveKind::Unexport,
            "include" => DirectiveKind::Include,
            "-include" => DirectiveKind::MinusInclude,
            "sinclude" => DirectiveKind::SInclude,
            "vpath" => DirectiveKind::Vpath,
            _ => return None,
        })
    }

    /// The directive word.
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveKind::Export => "export",
            DirectiveKind::Unexport => "unexport",
            DirectiveKind::Include => "include",
            DirectiveKind::MinusInclude => "-include",
            DirectiveKind::SInclude => "sinclude",
            DirectiveKind::Vpath => "vpath",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A directive with its (unexpanded) operand
pub struct Directive {
    /// Which directive
    pub kind: DirectiveKind,
    /// The rest of the line, if any
    pub expr: Option<Expression>,
    /// Position of the directive word
    pub pos: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Conditional directive words
pub enum ConditionalKind {
    /// `ifdef`
    Ifdef,
    /// `ifndef`
    Ifndef,
    /// `ifeq`
    Ifeq,
    /// `ifneq`
    Ifneq,
}

impl ConditionalKind {
    /// Parse a conditional word.
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "ifdef" => ConditionalKind::Ifdef,
            "ifndef" => ConditionalKind::Ifndef,
            "ifeq" => ConditionalKind::Ifeq,
            "ifneq" => ConditionalKind::Ifneq,
            _ => return None,
        })
    }

    /// The conditional word.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionalKind::Ifdef => "ifdef",
            ConditionalKind::Ifndef => "ifndef",
            ConditionalKind::Ifeq => "ifeq",
            ConditionalKind::Ifneq => "ifneq",
        }
    }

    /// `ifeq`/`ifneq` compare two expressions.
    pub fn is_comparison(&self) -> bool {
        matches!(self, ConditionalKind::Ifeq | ConditionalKind::Ifneq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Operands of a conditional directive
pub enum ConditionalArgs {
    /// Not parsed yet: the raw rest of the line
    Partial(VCharString),
    /// `ifdef`/`ifndef` operand
    Name(Option<Expression>),
    /// `ifeq`/`ifneq` operands
    Compare(Expression, Expression),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One `ifXXX` test
pub struct Conditional {
    /// Which test
    pub kind: ConditionalKind,
    /// Position of the directive word
    pub pos: Position,
    /// The operands
    pub args: ConditionalArgs,
}

#[derive(Debug, Clone)]
/// Contents of a conditional branch
pub enum Block {
    /// Lines kept unparsed until the branch is taken
    Lines(Vec<VirtualLine>),
    /// A nested conditional
    Conditional(ConditionalBlock),
}

#[derive(Debug, Clone)]
/// `if ... [else if ...] [else ...] endif`
pub struct ConditionalBlock {
    /// Each test with the blocks it guards
    pub branches: Vec<(Conditional, Vec<Block>)>,
    /// Blocks of the final `else`
    pub else_branch: Option<Vec<Block>>,
    /// Position of the opening directive
    pub pos: Position,
}

#[derive(Debug, Clone)]
/// The unparsed body of a `define`
pub struct DefineBlock {
    /// Body lines, blank and comment lines included
    pub lines: Vec<VirtualLine>,
}

impl DefineBlock {
    /// The body as written, one entry per physical line without EOLs.
    pub fn raw_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .flat_map(|vline| vline.phys_lines().iter())
            .map(|line| line.trim_end_matches(['\r', '\n']).to_string())
            .collect()
    }
}

#[derive(Debug, Clone)]
/// `define NAME [OP]` ... `endef`
pub struct DefineDirective {
    /// The header as an assignment with an empty value
    pub assignment: AssignmentExpression,
    /// The body
    pub body: Rc<DefineBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// `undefine NAME...`
pub struct UndefineDirective {
    /// The names
    pub names: Expression,
    /// `override` and friends
    pub modifiers: Vec<Modifier>,
    /// Position of the directive
    pub pos: Position,
}

#[derive(Debug, Clone)]
/// A top-level makefile statement
pub enum Statement {
    /// A variable assignment
    Assignment(AssignmentExpression),
    /// A rule line
    Rule(RuleExpression),
    /// A recipe line
    Recipe(Recipe),
    /// A line that is none of the others; expanded for side effects
    Expression(Expression, Position),
    /// `export`, `include`, ...
    Directive(Directive),
    /// `ifdef` ... `endif`
    Conditional(ConditionalBlock),
    /// A multi-line variable
    Define(DefineDirective),
    /// `undefine`
    Undefine(UndefineDirective),
}

impl Positioned for Statement {
    fn pos(&self) -> Position {
        match self {
            Statement::Assignment(a) => a.pos.clone(),
            Statement::Rule(r) => r.pos.clone(),
            Statement::Recipe(r) => r.pos.clone(),
            Statement::Expression(_, pos) => pos.clone(),
            Statement::Directive(d) => d.pos.clone(),
            Statement::Conditional(c) => c.pos.clone(),
            Statement::Define(d) => d.assignment.pos.clone(),
            Statement::Undefine(u) => u.pos.clone(),
        }
    }
}

#[derive(Debug, Clone)]
/// A parsed makefile
pub struct Makefile {
    /// Name of the source it was parsed from
    pub name: Rc<str>,
    /// Statements in source order
    pub statements: Vec<Statement>,
}

impl Makefile {
    /// All rule statements, in source order (not descending into conditionals).
    pub fn rules(&self) -> impl Iterator<Item = &RuleExpression> + '_ {
        self.statements.iter().filter_map(|s| match s {
            Statement::Rule(r) => Some(r),
            _ => None,
        })
    }

    /// All assignment statements, in source order (not descending into conditionals).
    pub fn assignments(&self) -> impl Iterator<Item = &AssignmentExpression> + '_ {
        self.statements.iter().filter_map(|s| match s {
            Statement::Assignment(a) => Some(a),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(text: &str) -> Token {
        Token::Literal(VCharString::from_text(text, Position::new(Rc::from("t"), 0, 0)))
    }

    #[test]
    fn test_trimmed() {
        let expr = Expression::new(vec![lit("  "), lit("foo"), lit(" "), lit("bar"), lit("\t")]);
        let trimmed = expr.trimmed();
        assert_eq!(trimmed.tokens.len(), 3);
        assert_eq!(trimmed.tokens[0], lit("foo"));

        let blank = Expression::new(vec![lit(" ")]);
        assert!(blank.trimmed().is_empty());
    }

    #[test]
    fn test_operators() {
        for op in ["=", ":=", "::=", ":::=", "?=", "+=", "!="] {
            assert_eq!(AssignOp::from_str(op).map(|o| o.as_str()), Some(op));
        }
        assert_eq!(AssignOp::from_str("=="), None);
        assert_eq!(RuleOp::Maybe.as_str(), "?:");
        assert_eq!(DirectiveKind::from_str("sinclude"), Some(DirectiveKind::SInclude));
        assert!(ConditionalKind::Ifneq.is_comparison());
        assert!(!ConditionalKind::Ifdef.is_comparison());
    }
}
