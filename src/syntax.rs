//! Lossless-style syntax trees built from the AST.
//!
//! Every AST node can be lowered into a rowan green tree whose text is a
//! valid makefile fragment. Re-parsing that text yields an equivalent AST.

use crate::ast::{
    AssignOp, AssignmentExpression, Block, ConditionalArgs, ConditionalBlock, DefineDirective, Directive,
    Expression, Makefile, Modifier, Recipe, RuleExpression, RuleRhs, Statement, Token, UndefineDirective,
};
use crate::vline::{is_eol, is_whitespace, VCharString, VirtualLine};
use crate::SyntaxKind;
use crate::SyntaxKind::*;
use rowan::{GreenNode, GreenNodeBuilder};

/// Teaches rowan to convert between its raw kinds and [`SyntaxKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lang {}
impl rowan::Language for Lang {
    type Kind = SyntaxKind;
    fn kind_from_raw(raw: rowan::SyntaxKind) -> Self::Kind {
        unsafe { std::mem::transmute::<u16, SyntaxKind>(raw.0) }
    }
    fn kind_to_raw(kind: Self::Kind) -> rowan::SyntaxKind {
        kind.into()
    }
}

/// A node of a lowered syntax tree.
pub type SyntaxNode = rowan::SyntaxNode<Lang>;

/// AST nodes that can be turned back into makefile text.
pub trait ToSyntax {
    /// Lower the node into a syntax tree.
    fn syntax(&self) -> SyntaxNode {
        let mut lowering = Lowering::new();
        self.lower(&mut lowering);
        SyntaxNode::new_root(lowering.finish())
    }

    /// The makefile text of the node.
    ///
    /// # Example
    /// ```
    /// use rmake::{Makefile, ToSyntax};
    /// let makefile: Makefile = "X   :=   $$HOME  \nall:;@echo $$HOME\n".parse().unwrap();
    /// assert_eq!(makefile.makefile(), "X := $$HOME  \nall: ; @echo $$HOME\n");
    /// ```
    fn makefile(&self) -> String {
        self.syntax().text().to_string()
    }

    #[doc(hidden)]
    fn lower(&self, lowering: &mut Lowering);
}

#[doc(hidden)]
/// Builds green trees out of AST nodes.
pub struct Lowering {
    builder: GreenNodeBuilder<'static>,
}

impl Lowering {
    fn new() -> Self {
        Lowering {
            builder: GreenNodeBuilder::new(),
        }
    }

    fn start(&mut self, kind: SyntaxKind) {
        self.builder.start_node(kind.into());
    }

    fn finish_node(&mut self) {
        self.builder.finish_node();
    }

    fn finish(self) -> GreenNode {
        self.builder.finish()
    }

    fn token(&mut self, kind: SyntaxKind, text: &str) {
        if !text.is_empty() {
            self.builder.token(kind.into(), text);
        }
    }

    /// Emit text split into whitespace, newline and text runs.
    fn text(&mut self, text: &str) {
        let mut run = String::new();
        let mut run_kind = TEXT;
        for c in text.chars() {
            let kind = if is_eol(c) {
                NEWLINE
            } else if is_whitespace(c) {
                WHITESPACE
            } else {
                TEXT
            };
            if kind != run_kind && !run.is_empty() {
                self.token(run_kind, &run);
                run.clear();
            }
            run_kind = kind;
            run.push(c);
        }
        self.token(run_kind, &run);
    }

    fn literal(&mut self, s: &VCharString, escape: bool) {
        let text = s.to_string();
        if escape {
            self.text(&text.replace('$', "$$"));
        } else {
            self.text(&text);
        }
    }

    fn tokens(&mut self, tokens: &[Token], escape: bool) {
        for token in tokens {
            match token {
                Token::Literal(s) => self.literal(s, escape),
                Token::VarRef(v) => {
                    self.start(VARIABLE);
                    self.token(DOLLAR, "$");
                    match v.open {
                        Some(open) => {
                            let (lkind, rkind, close) = delimiters(open);
                            self.token(lkind, &open.to_string());
                            self.tokens(&v.tokens, true);
                            self.token(rkind, close);
                        }
                        None => self.tokens(&v.tokens, true),
                    }
                    self.finish_node();
                }
                Token::Function(f) => {
                    let (lkind, rkind, close) = delimiters(f.open);
                    self.start(FUNCTION);
                    self.token(DOLLAR, "$");
                    self.token(lkind, &f.open.to_string());
                    self.token(IDENTIFIER, &f.name);
                    self.token(WHITESPACE, " ");
                    for (idx, arg) in f.args.iter().enumerate() {
                        if idx > 0 {
                            self.token(COMMA, ",");
                        }
                        self.start(ARGUMENT);
                        self.tokens(&arg.tokens, true);
                        self.finish_node();
                    }
                    self.token(rkind, close);
                    self.finish_node();
                }
            }
        }
    }

    fn expression(&mut self, expr: &Expression, escape: bool) {
        self.start(EXPR);
        self.tokens(&expr.tokens, escape);
        self.finish_node();
    }

    fn modifiers(&mut self, modifiers: &[Modifier]) {
        for modifier in modifiers {
            self.token(KEYWORD, modifier.as_str());
            self.token(WHITESPACE, " ");
        }
    }

    fn assignment(&mut self, a: &AssignmentExpression) {
        self.start(ASSIGNMENT);
        self.modifiers(&a.modifiers);
        self.expression(&a.lhs.trimmed(), true);
        self.token(WHITESPACE, " ");
        self.token(OPERATOR, a.op.as_str());
        if !expression_text(&a.rhs).is_empty() {
            self.token(WHITESPACE, " ");
            self.expression(&a.rhs, true);
        }
        self.finish_node();
    }

    fn rule(&mut self, rule: &RuleExpression) {
        self.start(RULE);
        for (idx, target) in rule.targets.iter().enumerate() {
            if idx > 0 {
                self.token(WHITESPACE, " ");
            }
            self.expression(target, true);
        }
        self.token(OPERATOR, rule.op.as_str());
        match &rule.rhs {
            RuleRhs::Prerequisites(prereqs) => {
                for prereq in prereqs {
                    self.token(WHITESPACE, " ");
                    self.expression(prereq, true);
                }
            }
            RuleRhs::Assignment(a) => {
                self.token(WHITESPACE, " ");
                self.assignment(a);
            }
        }
        for recipe in &rule.recipes {
            self.token(WHITESPACE, " ");
            self.start(RECIPE);
            self.token(OPERATOR, ";");
            self.token(WHITESPACE, " ");
            self.expression(&recipe.expr, false);
            self.finish_node();
        }
        self.token(NEWLINE, "\n");
        self.finish_node();
    }

    fn recipe(&mut self, recipe: &Recipe) {
        self.start(RECIPE);
        self.token(INDENT, "\t");
        self.expression(&recipe.expr, false);
        self.token(NEWLINE, "\n");
        self.finish_node();
    }

    fn directive(&mut self, d: &Directive) {
        self.start(DIRECTIVE);
        self.token(KEYWORD, d.kind.as_str());
        if let Some(expr) = &d.expr {
            self.token(WHITESPACE, " ");
            self.expression(expr, true);
        }
        self.token(NEWLINE, "\n");
        self.finish_node();
    }

    fn undefine(&mut self, u: &UndefineDirective) {
        self.start(DIRECTIVE);
        self.modifiers(&u.modifiers);
        self.token(KEYWORD, "undefine");
        self.token(WHITESPACE, " ");
        self.expression(&u.names, true);
        self.token(NEWLINE, "\n");
        self.finish_node();
    }

    fn raw_lines(&mut self, lines: &[VirtualLine]) {
        for vline in lines {
            for line in vline.phys_lines() {
                self.text(line);
                if !line.ends_with(is_eol) {
                    self.token(NEWLINE, "\n");
                }
            }
        }
    }

    fn define(&mut self, d: &DefineDirective) {
        let a = &d.assignment;
        self.start(DEFINE);
        self.modifiers(&a.modifiers);
        self.token(KEYWORD, "define");
        self.token(WHITESPACE, " ");
        self.expression(&a.lhs.trimmed(), true);
        if a.op != AssignOp::Implicit {
            self.token(WHITESPACE, " ");
            self.token(OPERATOR, a.op.as_str());
        }
        self.token(NEWLINE, "\n");
        self.start(BLOCK);
        self.raw_lines(&d.body.lines);
        self.finish_node();
        self.token(KEYWORD, "endef");
        self.token(NEWLINE, "\n");
        self.finish_node();
    }

    fn conditional_args(&mut self, args: &ConditionalArgs) {
        match args {
            ConditionalArgs::Partial(raw) => {
                let text = raw.to_string();
                let text = text.trim_end_matches(is_eol);
                if !text.is_empty() {
                    self.token(WHITESPACE, " ");
                    self.text(text);
                }
            }
            ConditionalArgs::Name(Some(expr)) => {
                self.token(WHITESPACE, " ");
                self.expression(expr, true);
            }
            ConditionalArgs::Name(None) => {}
            ConditionalArgs::Compare(lhs, rhs) => {
                self.token(WHITESPACE, " ");
                let (ltext, rtext) = (expression_text(lhs), expression_text(rhs));
                match quote_for(&ltext, &rtext) {
                    None => {
                        self.token(LPAREN, "(");
                        self.expression(lhs, true);
                        self.token(COMMA, ",");
                        self.expression(rhs, true);
                        self.token(RPAREN, ")");
                    }
                    Some(quote) => {
                        self.token(TEXT, quote);
                        self.expression(lhs, true);
                        self.token(TEXT, quote);
                        self.token(WHITESPACE, " ");
                        self.token(TEXT, quote);
                        self.expression(rhs, true);
                        self.token(TEXT, quote);
                    }
                }
            }
        }
    }

    fn blocks(&mut self, blocks: &[Block]) {
        for block in blocks {
            match block {
                Block::Lines(lines) => {
                    self.start(BLOCK);
                    self.raw_lines(lines);
                    self.finish_node();
                }
                Block::Conditional(c) => self.conditional(c),
            }
        }
    }

    fn conditional(&mut self, c: &ConditionalBlock) {
        self.start(CONDITIONAL);
        for (idx, (test, blocks)) in c.branches.iter().enumerate() {
            if idx > 0 {
                self.token(KEYWORD, "else");
                self.token(WHITESPACE, " ");
            }
            self.token(KEYWORD, test.kind.as_str());
            self.conditional_args(&test.args);
            self.token(NEWLINE, "\n");
            self.blocks(blocks);
        }
        if let Some(blocks) = &c.else_branch {
            self.token(KEYWORD, "else");
            self.token(NEWLINE, "\n");
            self.blocks(blocks);
        }
        self.token(KEYWORD, "endif");
        self.token(NEWLINE, "\n");
        self.finish_node();
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Assignment(a) => {
                self.assignment(a);
                self.token(NEWLINE, "\n");
            }
            Statement::Rule(r) => self.rule(r),
            Statement::Recipe(r) => self.recipe(r),
            Statement::Expression(expr, _) => {
                self.expression(expr, true);
                self.token(NEWLINE, "\n");
            }
            Statement::Directive(d) => self.directive(d),
            Statement::Conditional(c) => self.conditional(c),
            Statement::Define(d) => self.define(d),
            Statement::Undefine(u) => self.undefine(u),
        }
    }
}

fn delimiters(open: char) -> (SyntaxKind, SyntaxKind, &'static str) {
    if open == '{' {
        (LBRACE, RBRACE, "}")
    } else {
        (LPAREN, RPAREN, ")")
    }
}

/// The `(a,b)` form can't carry every pair of operands; pick a quote when
/// it can't.
fn quote_for(lhs: &str, rhs: &str) -> Option<&'static str> {
    let balanced = |s: &str| {
        let mut depth = 0i32;
        for c in s.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return false;
            }
        }
        depth == 0
    };
    let plain = !lhs.contains(',')
        && balanced(lhs)
        && balanced(rhs)
        && !lhs.ends_with(is_whitespace)
        && !rhs.starts_with(is_whitespace);
    if plain {
        None
    } else if !lhs.contains('"') && !rhs.contains('"') {
        Some("\"")
    } else {
        Some("'")
    }
}

/// The source text of an expression, `$` re-escaped.
pub(crate) fn expression_text(expr: &Expression) -> String {
    expr.makefile()
}

impl ToSyntax for Makefile {
    fn lower(&self, lowering: &mut Lowering) {
        lowering.start(ROOT);
        for statement in &self.statements {
            lowering.statement(statement);
        }
        lowering.finish_node();
    }
}

impl ToSyntax for Statement {
    fn lower(&self, lowering: &mut Lowering) {
        lowering.start(ROOT);
        lowering.statement(self);
        lowering.finish_node();
    }
}

impl ToSyntax for Expression {
    fn lower(&self, lowering: &mut Lowering) {
        lowering.expression(self, true);
    }
}

impl ToSyntax for Recipe {
    fn lower(&self, lowering: &mut Lowering) {
        lowering.recipe(self);
    }
}

impl ToSyntax for AssignmentExpression {
    fn lower(&self, lowering: &mut Lowering) {
        lowering.assignment(self);
    }
}

impl ToSyntax for RuleExpression {
    fn lower(&self, lowering: &mut Lowering) {
        lowering.rule(self);
    }
}

impl ToSyntax for ConditionalBlock {
    fn lower(&self, lowering: &mut Lowering) {
        lowering.conditional(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Makefile {
        text.parse().unwrap()
    }

    fn assert_round_trip(text: &str) {
        let first = parse(text).makefile();
        let second = parse(&first).makefile();
        assert_eq!(first, second, "round trip of {:?}", text);
    }

    #[test]
    fn test_assignment_tree() {
        let makefile = parse("CC := gcc\n");
        assert_eq!(
            format!("{:#?}", makefile.syntax()),
            r#"ROOT@0..10
  ASSIGNMENT@0..9
    EXPR@0..2
      TEXT@0..2 "CC"
    WHITESPACE@2..3 " "
    OPERATOR@3..5 ":="
    WHITESPACE@5..6 " "
    EXPR@6..9
      TEXT@6..9 "gcc"
  NEWLINE@9..10 "\n"
"#
        );
    }

    #[test]
    fn test_rule_tree() {
        let makefile = parse("all: dep\n\t$(CC) -c\n");
        assert_eq!(
            format!("{:#?}", makefile.syntax()),
            r#"ROOT@0..19
  RULE@0..9
    EXPR@0..3
      TEXT@0..3 "all"
    OPERATOR@3..4 ":"
    WHITESPACE@4..5 " "
    EXPR@5..8
      TEXT@5..8 "dep"
    NEWLINE@8..9 "\n"
  RECIPE@9..19
    INDENT@9..10 "\t"
    EXPR@10..18
      VARIABLE@10..15
        DOLLAR@10..11 "$"
        LPAREN@11..12 "("
        TEXT@12..14 "CC"
        RPAREN@14..15 ")"
      WHITESPACE@15..16 " "
      TEXT@16..18 "-c"
    NEWLINE@18..19 "\n"
"#
        );
    }

    #[test]
    fn test_function_text() {
        let makefile = parse("X = $(patsubst %.c,%.o,  $(SRC))\n");
        assert_eq!(makefile.makefile(), "X = $(patsubst %.c,%.o,  $(SRC))\n");
    }

    #[test]
    fn test_conditional_text() {
        let text = "ifeq ($(A),b)\nX = 1\nelse ifdef B\nifneq 'a,b' 'c'\nendif\nelse\nY = 2\nendif\n";
        assert_eq!(parse(text).makefile(), text);
    }

    #[test]
    fn test_quoted_comparison_kept_quoted() {
        let makefile = parse("ifeq \"a,b\" \"c\"\nendif\n");
        assert_eq!(makefile.makefile(), "ifeq \"a,b\" \"c\"\nendif\n");
    }

    #[test]
    fn test_define_text() {
        let text = "override define BODY :=\n  echo $(X)\n\n# kept\nendef\n";
        assert_eq!(parse(text).makefile(), text);
    }

    #[test]
    fn test_round_trips() {
        for text in [
            "CC:=gcc\n$(info CC=$(CC))\n@:;@:\n",
            "FOO:=foo\nFOO+=bar\n$(info FOO=$(FOO))\n@:;@:\n",
            "mixed-build:=\nifdef mixed-build\n$(error should not see this)\nendif\n@:;@:\n",
            "ifeq (10,11)\n    ifeq (a,a  # missing close paren)\n    endif\nendif\n@:;@:\n",
            "export\nunexport A B\n-include a.mk\noverride undefine X\n",
            "a b: c $$d ${e}\n\techo $$HOME \\\n\t  done\n",
            "foo.o: CFLAGS += -g\nx ?= $(if $(A),$(B), c)\n",
            "SRC = a.c \\\n      b.c\nOBJ = $(SRC:.c=.o)\n",
            "weird\\#name = 1\n",
        ] {
            assert_round_trip(text);
        }
    }

    #[test]
    fn test_statement_makefile() {
        let makefile = parse("all: ; @echo $$x\n");
        assert_eq!(makefile.statements[0].makefile(), "all: ; @echo $$x\n");
    }
}
