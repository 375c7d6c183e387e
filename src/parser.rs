//! Statement-level parsing of virtual lines.
//!
//! The parser decides, line by line, whether a virtual line is an
//! assignment, a directive, a rule or a recipe. Conditional and `define`
//! blocks pull further lines from the same [`VirtualLineSource`].

use crate::ast::{
    Block, Conditional, ConditionalArgs, ConditionalBlock, ConditionalKind, DefineBlock, DefineDirective,
    Directive, DirectiveKind, Expression, Makefile, RuleExpression, RuleRhs, Statement, Token,
};
use crate::error::{fail, warning_message, Error, ErrorKind, MakeError};
use crate::source::{Position, Source};
use crate::tokenizer::{
    seek_comment, seek_directive, seek_word, tokenize_assignment_statement, tokenize_line, tokenize_recipe,
    tokenize_rule, tokenize_rule_rhs, AssignmentLine, VCharScanner, CONDITIONAL_DIRECTIVES,
    CONDITIONAL_OPEN, INCLUDE_DIRECTIVES,
};
use crate::vline::{is_whitespace, VChar, VCharString, VirtualLine, VirtualLineIterator, VirtualLineReplay, VirtualLineSource};
use std::rc::Rc;
use std::str::FromStr;

const DEFINE_WORDS: &[&str] = &["endef", "define"];

/// Parse a whole makefile.
///
/// # Example
/// ```
/// use rmake::{parse_makefile, Source};
/// let src = Source::from_string("CC := gcc\nall: main.o\n\t$(CC) -o $@ $^\n");
/// let makefile = parse_makefile(&src).unwrap();
/// assert_eq!(makefile.statements.len(), 3);
/// assert_eq!(makefile.rules().count(), 1);
/// ```
pub fn parse_makefile(src: &Source) -> Result<Makefile, Error> {
    log::debug!("parsing {}", src.name());
    let mut lines = VirtualLineIterator::new(src);
    let statements = Parser::new(&mut lines, false).parse_all()?;
    Ok(Makefile {
        name: src.name(),
        statements,
    })
}

/// Parse lines collected earlier, such as a taken conditional branch.
///
/// `rule_open` says whether a rule was open when the lines are executed, so
/// recipe lines are recognised as such.
pub(crate) fn parse_lines(lines: Vec<VirtualLine>, rule_open: bool) -> Result<Vec<Statement>, Error> {
    let mut replay = VirtualLineReplay::new(lines);
    Parser::new(&mut replay, rule_open).parse_all()
}

impl FromStr for Makefile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_makefile(&Source::from_string(s))
    }
}

struct Parser<'a, S: VirtualLineSource> {
    lines: &'a mut S,
    rule_open: bool,
}

impl<'a, S: VirtualLineSource> Parser<'a, S> {
    fn new(lines: &'a mut S, rule_open: bool) -> Self {
        Parser { lines, rule_open }
    }

    fn parse_all(&mut self) -> Result<Vec<Statement>, Error> {
        let mut statements = Vec::new();
        while let Some(vline) = self.lines.next_vline() {
            if let Some(statement) = self.parse_vline(&vline)? {
                statements.push(statement);
            }
        }
        Ok(statements)
    }

    fn parse_vline(&mut self, vline: &VirtualLine) -> Result<Option<Statement>, Error> {
        let pos = vline.get_pos();
        let mut scanner = vline.scanner();

        if vline.is_recipe() && self.rule_open {
            scanner.push_state();
            let directive = seek_word(&mut scanner, CONDITIONAL_DIRECTIVES)?;
            scanner.pop_state();
            if directive.is_none() {
                log::trace!("recipe at {}", pos);
                return Ok(Some(Statement::Recipe(tokenize_recipe(&mut scanner)?)));
            }
        }

        if let Some(line) = tokenize_assignment_statement(&mut scanner, false)? {
            self.rule_open = false;
            return Ok(Some(match line {
                AssignmentLine::Assignment(a) => Statement::Assignment(a),
                AssignmentLine::Define(assignment) => {
                    let (body, _) = self.read_define_body(&assignment.pos)?;
                    log::debug!("define at {} with {} line(s)", assignment.pos, body.len());
                    Statement::Define(DefineDirective {
                        assignment,
                        body: Rc::new(DefineBlock { lines: body }),
                    })
                }
                AssignmentLine::Undefine(u) => Statement::Undefine(u),
            }));
        }

        if let Some(word) = seek_directive(&mut scanner, CONDITIONAL_DIRECTIVES)? {
            let word_pos = word.get_pos().unwrap_or_else(|| pos.clone());
            let word = word.to_string();
            return match ConditionalKind::from_str(&word) {
                Some(kind) => {
                    let conditional = read_conditional(kind, word_pos, &mut scanner)?;
                    let block = self.collect_conditional(conditional)?;
                    Ok(Some(Statement::Conditional(block)))
                }
                None => fail(ErrorKind::Parse, Some(&word_pos), format!("extraneous '{}'", word)),
            };
        }

        for words in [&["export", "unexport"][..], &["vpath"][..], INCLUDE_DIRECTIVES] {
            if let Some(word) = seek_directive(&mut scanner, words)? {
                let word_pos = word.get_pos().unwrap_or_else(|| pos.clone());
                let kind = match DirectiveKind::from_str(&word.to_string()) {
                    Some(kind) => kind,
                    None => return fail(ErrorKind::Parse, Some(&word_pos), "unknown directive"),
                };
                let expr = read_expression(&mut scanner)?;
                if kind != DirectiveKind::Vpath {
                    self.rule_open = false;
                }
                log::trace!("{} directive at {}", kind.as_str(), word_pos);
                return Ok(Some(Statement::Directive(Directive {
                    kind,
                    expr,
                    pos: word_pos,
                })));
            }
        }

        if let Some((targets, op)) = tokenize_rule(&mut scanner)? {
            let rhs = tokenize_rule_rhs(&mut scanner)?;
            let mut recipes = Vec::new();
            if !scanner.is_empty() {
                if let RuleRhs::Assignment(_) = rhs {
                    return fail(ErrorKind::Parse, Some(&pos), "recipe after a target-specific assignment");
                }
                recipes.push(tokenize_recipe(&mut scanner)?);
            }
            self.rule_open = matches!(rhs, RuleRhs::Prerequisites(_));
            log::trace!("rule at {} with {} target(s)", pos, targets.len());
            return Ok(Some(Statement::Rule(RuleExpression {
                targets,
                op,
                rhs,
                recipes,
                pos,
            })));
        }

        if vline.is_recipe() {
            // a stray recipe; whether a rule is open is known only at run time
            if seek_comment(&scanner) {
                return Ok(None);
            }
            return Ok(Some(Statement::Recipe(tokenize_recipe(&mut vline.scanner())?)));
        }

        let tokens = tokenize_line(&mut scanner)?;
        if tokens.iter().all(Token::is_whitespace) {
            return Ok(None);
        }
        self.rule_open = false;
        Ok(Some(Statement::Expression(Expression::new(tokens), pos)))
    }

    /// Collect `define` body lines up to the matching `endef`, returning the
    /// body and the `endef` line itself.
    fn read_define_body(&mut self, pos: &Position) -> Result<(Vec<VirtualLine>, VirtualLine), Error> {
        let mut depth = 1usize;
        let mut body = Vec::new();
        while let Some(vline) = self.lines.next_raw() {
            if !vline.is_recipe() {
                let mut scanner = vline.scanner();
                if let Some(word) = seek_word(&mut scanner, DEFINE_WORDS)? {
                    if word == "endef" {
                        depth -= 1;
                        if depth == 0 {
                            if !scanner.is_empty() {
                                warning_message(scanner.get_pos().as_ref(), "extraneous text after 'endef' directive");
                            }
                            return Ok((body, vline));
                        }
                    } else {
                        depth += 1;
                    }
                }
            }
            body.push(vline);
        }
        Err(MakeError::new(ErrorKind::MissingEndef, Some(pos.clone())).into())
    }

    /// Gather the branches of a conditional up to its `endif`.
    ///
    /// Only the opening test of a top-level block is parsed eagerly. Every
    /// `else if` test and every test met inside a branch keeps its raw text
    /// until it is evaluated.
    fn collect_conditional(&mut self, first: Conditional) -> Result<ConditionalBlock, Error> {
        let start = first.pos.clone();
        let mut branches = Vec::new();
        let mut current = Some(first);
        let mut blocks: Vec<Block> = Vec::new();
        let mut lines: Vec<VirtualLine> = Vec::new();

        fn flush(blocks: &mut Vec<Block>, lines: &mut Vec<VirtualLine>) {
            if !lines.is_empty() {
                blocks.push(Block::Lines(std::mem::take(lines)));
            }
        }

        while let Some(vline) = self.lines.next_raw() {
            if vline.is_blank() || vline.is_comment() {
                lines.push(vline);
                continue;
            }

            // `ifdef := 1` is an assignment, not a directive
            let mut scanner = vline.scanner();
            match tokenize_assignment_statement(&mut scanner, false) {
                Ok(Some(AssignmentLine::Define(header))) => {
                    lines.push(vline);
                    let (body, endef) = self.read_define_body(&header.pos)?;
                    lines.extend(body);
                    lines.push(endef);
                    continue;
                }
                Ok(Some(_)) => {
                    lines.push(vline);
                    continue;
                }
                Ok(None) | Err(_) => {}
            }

            let mut scanner = vline.scanner();
            let word = match seek_directive(&mut scanner, CONDITIONAL_DIRECTIVES)? {
                Some(word) => word,
                None => {
                    lines.push(vline);
                    continue;
                }
            };
            let word_pos = word.get_pos().unwrap_or_else(|| vline.get_pos());

            match word.to_string().as_str() {
                "else" => {
                    flush(&mut blocks, &mut lines);
                    let finished = match current.take() {
                        Some(c) => c,
                        None => {
                            return fail(ErrorKind::Parse, Some(&word_pos), "only one 'else' per conditional");
                        }
                    };
                    branches.push((finished, std::mem::take(&mut blocks)));
                    if let Some(next) = seek_word(&mut scanner, CONDITIONAL_OPEN)? {
                        let next_pos = next.get_pos().unwrap_or_else(|| word_pos.clone());
                        let kind = conditional_kind(&next, &next_pos)?;
                        current = Some(partial_conditional(kind, next_pos, &scanner));
                    } else if !scanner.is_empty() && !seek_comment(&scanner) {
                        warning_message(scanner.get_pos().as_ref(), "extraneous text after 'else' directive");
                    }
                }
                "endif" => {
                    flush(&mut blocks, &mut lines);
                    let else_branch = match current.take() {
                        Some(c) => {
                            branches.push((c, blocks));
                            None
                        }
                        None => Some(blocks),
                    };
                    log::trace!("conditional at {} has {} branch(es)", start, branches.len());
                    return Ok(ConditionalBlock {
                        branches,
                        else_branch,
                        pos: start,
                    });
                }
                _ => {
                    flush(&mut blocks, &mut lines);
                    let kind = conditional_kind(&word, &word_pos)?;
                    let nested = partial_conditional(kind, word_pos, &scanner);
                    blocks.push(Block::Conditional(self.collect_conditional(nested)?));
                }
            }
        }

        fail(ErrorKind::Parse, Some(&start), "missing 'endif'")
    }
}

fn conditional_kind(word: &VCharString, pos: &Position) -> Result<ConditionalKind, Error> {
    match ConditionalKind::from_str(&word.to_string()) {
        Some(kind) => Ok(kind),
        None => fail(ErrorKind::Parse, Some(pos), format!("unexpected '{}'", word)),
    }
}

fn read_expression(scanner: &mut VCharScanner) -> Result<Option<Expression>, Error> {
    let tokens = tokenize_line(scanner)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    Ok(Some(Expression::new(tokens)))
}

fn read_args(kind: ConditionalKind, pos: &Position, scanner: &mut VCharScanner) -> Result<ConditionalArgs, Error> {
    let tokens = tokenize_line(scanner)?;
    if kind.is_comparison() {
        let (lhs, rhs) = parse_ifeq_conditionals(&Expression::new(tokens), kind, pos)?;
        return Ok(ConditionalArgs::Compare(lhs, rhs));
    }
    let expr = Expression::new(tokens).trimmed();
    Ok(ConditionalArgs::Name((!expr.is_empty()).then_some(expr)))
}

fn read_conditional(kind: ConditionalKind, pos: Position, scanner: &mut VCharScanner) -> Result<Conditional, Error> {
    let args = read_args(kind, &pos, scanner)?;
    Ok(Conditional { kind, pos, args })
}

fn partial_conditional(kind: ConditionalKind, pos: Position, scanner: &VCharScanner) -> Conditional {
    let raw: VCharString = scanner.remain().iter().cloned().collect();
    Conditional {
        kind,
        pos,
        args: ConditionalArgs::Partial(raw),
    }
}

/// Finish parsing a conditional whose operands were kept raw.
pub(crate) fn resolve_conditional(conditional: &Conditional) -> Result<ConditionalArgs, Error> {
    match &conditional.args {
        ConditionalArgs::Partial(raw) => {
            let mut scanner = VCharScanner::new(raw.vchars().cloned().collect());
            read_args(conditional.kind, &conditional.pos, &mut scanner)
        }
        args => Ok(args.clone()),
    }
}

fn syntax_error(pos: Option<Position>, detail: &str) -> Error {
    MakeError::new(ErrorKind::InvalidSyntaxInConditional, pos)
        .more(detail)
        .into()
}

fn push_pending(pending: &mut VCharString, expr: &mut Vec<Token>) {
    if !pending.is_empty() {
        expr.push(Token::Literal(pending.take()));
    }
}

fn is_quote(c: char) -> bool {
    c == '\'' || c == '"'
}

fn check_pair(open: &Option<VChar>, close: char, kind: ConditionalKind) -> Result<(), Error> {
    let matched = match open {
        Some(v) if v.ch == '(' => close == ')',
        Some(v) => v.ch == close,
        None => false,
    };
    if matched {
        return Ok(());
    }
    Err(syntax_error(
        open.as_ref().map(|v| v.pos.clone()),
        &format!("unbalanced open/close chars in {}", kind.as_str()),
    ))
}

/// Split the operand of `ifeq`/`ifneq` into its two expressions.
///
/// Accepts `(a,b)`, `'a' 'b'`, `"a" "b"` and mixed quotes. Parentheses
/// inside the operands are counted. Trailing whitespace of the first
/// operand and leading whitespace of the second are dropped.
pub fn parse_ifeq_conditionals(
    expr: &Expression,
    kind: ConditionalKind,
    pos: &Position,
) -> Result<(Expression, Expression), Error> {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Start,
        Quote,
        Expr1,
        Expr2Start,
        Expr2,
        Closed,
    }

    let first = match expr.tokens.iter().find(|t| !t.is_whitespace()) {
        Some(token) => token,
        None => return Err(syntax_error(Some(pos.clone()), "missing conditional expression")),
    };
    if first.as_literal().is_none() {
        return Err(syntax_error(
            first.get_pos(),
            &format!("{} missing opening ( or ' or \"", kind.as_str()),
        ));
    }

    let mut exprs: [Vec<Token>; 2] = [Vec::new(), Vec::new()];
    let mut current: Option<usize> = None;
    let mut pending = VCharString::new();
    let mut open: Option<VChar> = None;
    let mut quotes_seen = 0usize;
    let mut parens = 0usize;
    let mut state = State::Start;
    let mut last_pos = pos.clone();

    'tokens: for token in &expr.tokens {
        let literal = match token {
            Token::Literal(s) => s,
            other => {
                if state == State::Closed {
                    warning_message(
                        other.get_pos().as_ref(),
                        &format!("extraneous text after '{}' directive", kind.as_str()),
                    );
                    break;
                }
                let idx = match current {
                    Some(idx) => idx,
                    None => return Err(syntax_error(other.get_pos(), "missing opening (")),
                };
                push_pending(&mut pending, &mut exprs[idx]);
                exprs[idx].push(other.clone());
                if state == State::Expr2Start {
                    state = State::Expr2;
                }
                continue;
            }
        };

        for vchar in literal.vchars() {
            last_pos = vchar.pos.clone();
            let c = vchar.ch;
            match state {
                State::Start => {
                    if is_quote(c) {
                        open = Some(vchar.clone());
                        current = Some(quotes_seen);
                        quotes_seen += 1;
                        state = State::Quote;
                    } else if c == '(' && quotes_seen == 0 {
                        open = Some(vchar.clone());
                        current = Some(0);
                        state = State::Expr1;
                    } else if !is_whitespace(c) {
                        return Err(syntax_error(Some(vchar.pos.clone()), &format!("invalid character '{}'", c)));
                    }
                }
                State::Quote => {
                    if is_quote(c) {
                        check_pair(&open, c, kind)?;
                        if let Some(idx) = current.take() {
                            push_pending(&mut pending, &mut exprs[idx]);
                        }
                        state = if quotes_seen == 2 { State::Closed } else { State::Start };
                    } else {
                        pending.push(vchar.clone());
                    }
                }
                State::Expr1 => match c {
                    ',' => {
                        if parens != 0 {
                            return Err(syntax_error(
                                Some(vchar.pos.clone()),
                                "unbalanced parenthesis in first expression",
                            ));
                        }
                        push_pending(&mut pending, &mut exprs[0]);
                        while exprs[0].last().is_some_and(Token::is_whitespace) {
                            exprs[0].pop();
                        }
                        current = Some(1);
                        state = State::Expr2Start;
                    }
                    '(' => {
                        parens += 1;
                        pending.push(vchar.clone());
                    }
                    ')' => {
                        if parens == 0 {
                            return Err(syntax_error(
                                Some(vchar.pos.clone()),
                                "unbalanced parenthesis in first expression",
                            ));
                        }
                        parens -= 1;
                        pending.push(vchar.clone());
                    }
                    _ => pending.push(vchar.clone()),
                },
                State::Expr2Start => {
                    if c == ')' {
                        check_pair(&open, c, kind)?;
                        state = State::Closed;
                    } else if !is_whitespace(c) {
                        if c == '(' {
                            parens += 1;
                        }
                        pending.push(vchar.clone());
                        state = State::Expr2;
                    }
                }
                State::Expr2 => match c {
                    ')' if parens == 0 => {
                        check_pair(&open, c, kind)?;
                        push_pending(&mut pending, &mut exprs[1]);
                        state = State::Closed;
                    }
                    ')' => {
                        parens -= 1;
                        pending.push(vchar.clone());
                    }
                    '(' => {
                        parens += 1;
                        pending.push(vchar.clone());
                    }
                    _ => pending.push(vchar.clone()),
                },
                State::Closed => {
                    if !is_whitespace(c) {
                        warning_message(
                            Some(&vchar.pos),
                            &format!("extraneous text after '{}' directive", kind.as_str()),
                        );
                        break 'tokens;
                    }
                }
            }
        }

        if let Some(idx) = current {
            push_pending(&mut pending, &mut exprs[idx]);
        }
    }

    match state {
        State::Closed => {
            let [lhs, rhs] = exprs;
            log::trace!("{} operands parsed at {}", kind.as_str(), pos);
            Ok((Expression::new(lhs), Expression::new(rhs)))
        }
        State::Quote => Err(syntax_error(Some(last_pos), "missing closing quote")),
        State::Start => Err(syntax_error(Some(last_pos), "missing conditional expression")),
        State::Expr1 | State::Expr2Start | State::Expr2 => Err(syntax_error(Some(last_pos), "missing closing )")),
    }
}
