//! Character-level state machines turning a virtual line into AST pieces.
//!
//! Every tokenizer works on a [`VCharScanner`] positioned somewhere inside a
//! virtual line. Speculative tokenizers save the scanner state on entry and
//! restore it when the line turns out not to be what they were looking for,
//! so the caller can try the next interpretation.

use crate::ast::{
    AssignOp, AssignmentExpression, Expression, Modifier, Recipe, RuleOp, RuleRhs, Token,
    UndefineDirective, VarRef,
};
use crate::error::{fail, warning_message, Error, ErrorKind};
use crate::scanner::ScannerIterator;
use crate::source::Position;
use crate::vline::{is_eol, is_whitespace, VChar, VCharString, RECIPE_PREFIX};

/// Scanner over the visible characters of a virtual line.
pub type VCharScanner = ScannerIterator<VChar>;

/// Words that open a conditional block.
pub const CONDITIONAL_OPEN: &[&str] = &["ifdef", "ifndef", "ifeq", "ifneq"];

/// Every word that takes part in conditional blocks.
pub const CONDITIONAL_DIRECTIVES: &[&str] = &["ifdef", "ifndef", "ifeq", "ifneq", "else", "endif"];

/// The include family.
pub const INCLUDE_DIRECTIVES: &[&str] = &["include", "-include", "sinclude"];

/// Words that may precede an assignment.
pub const ASSIGNMENT_MODIFIERS: &[&str] = &["export", "unexport", "override", "private", "define", "undefine"];

/// Result of [`tokenize_assignment_statement`].
#[derive(Debug, Clone)]
pub enum AssignmentLine {
    /// `NAME OP VALUE`
    Assignment(AssignmentExpression),
    /// `define NAME [OP]`; the body follows on later lines
    Define(AssignmentExpression),
    /// `undefine NAME...`
    Undefine(UndefineDirective),
}

fn push_literal(tokens: &mut Vec<Token>, token: &mut VCharString) {
    if !token.is_empty() {
        tokens.push(Token::Literal(token.take()));
    }
}

fn scanner_pos(scanner: &VCharScanner) -> Option<Position> {
    scanner.get_pos()
}

/// Split a flat token list into whitespace separated expressions.
pub(crate) fn split_on_whitespace(tokens: Vec<Token>) -> Vec<Expression> {
    let mut exprs = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if token.is_whitespace() {
            if !current.is_empty() {
                exprs.push(Expression::new(std::mem::take(&mut current)));
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        exprs.push(Expression::new(current));
    }
    exprs
}

/// Tokenize literals and variable references up to the end of the line or a
/// comment.
///
/// Runs of whitespace become their own literals. `$$` becomes a single `$`.
pub fn tokenize_line(scanner: &mut VCharScanner) -> Result<Vec<Token>, Error> {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Start,
        InWord,
        Dollar,
        Backslash,
    }

    let mut tokens = Vec::new();
    if scanner.is_empty() {
        return Ok(tokens);
    }
    log::trace!("tokenize_line at {:?}", scanner_pos(scanner));

    let mut token = VCharString::new();
    let mut state = State::Start;

    while let Some(vchar) = scanner.next() {
        let c = vchar.ch;
        match state {
            State::Start => {
                if is_whitespace(c) {
                    token.push(vchar);
                } else {
                    scanner.pushback()?;
                    push_literal(&mut tokens, &mut token);
                    state = State::InWord;
                }
            }
            State::InWord => {
                if c == '\\' {
                    state = State::Backslash;
                    token.push(vchar);
                } else if is_whitespace(c) {
                    push_literal(&mut tokens, &mut token);
                    scanner.pushback()?;
                    state = State::Start;
                } else if c == '$' {
                    state = State::Dollar;
                } else if c == '#' {
                    push_literal(&mut tokens, &mut token);
                    scanner.drain();
                } else if is_eol(c) {
                    push_literal(&mut tokens, &mut token);
                    break;
                } else {
                    token.push(vchar);
                }
            }
            State::Dollar => {
                if c == '$' {
                    token.push(vchar);
                } else {
                    push_literal(&mut tokens, &mut token);
                    scanner.pushback()?;
                    scanner.pushback()?;
                    tokens.push(tokenize_variable_ref(scanner)?);
                }
                state = State::InWord;
            }
            State::Backslash => {
                token.push(vchar);
                state = State::InWord;
            }
        }
    }
    push_literal(&mut tokens, &mut token);
    Ok(tokens)
}

/// Tokenize the text of a `define` body line: literals and variable
/// references only, with no comment or whitespace handling.
pub fn tokenize_text(scanner: &mut VCharScanner) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut token = VCharString::new();
    while let Some(vchar) = scanner.next() {
        if vchar.ch != '$' {
            token.push(vchar);
            continue;
        }
        match scanner.lookahead().map(|v| v.ch) {
            Some('$') => {
                token.push(vchar);
                scanner.next();
            }
            None => token.push(vchar),
            Some(_) => {
                push_literal(&mut tokens, &mut token);
                scanner.pushback()?;
                tokens.push(tokenize_variable_ref(scanner)?);
            }
        }
    }
    push_literal(&mut tokens, &mut token);
    Ok(tokens)
}

/// Tokenize a variable reference; the scanner must be positioned at `$`.
///
/// Returns a [`Token::Function`] when the body starts with the name of a
/// built-in function, a [`Token::VarRef`] otherwise.
pub fn tokenize_variable_ref(scanner: &mut VCharScanner) -> Result<Token, Error> {
    let dollar = match scanner.next() {
        Some(vchar) if vchar.ch == '$' => vchar,
        Some(vchar) => return fail(ErrorKind::Parse, Some(&vchar.pos), "expected '$'"),
        None => return fail(ErrorKind::Parse, None, "expected '$'"),
    };
    let pos = dollar.pos.clone();

    let open = match scanner.next() {
        None => {
            return Ok(Token::VarRef(VarRef {
                open: None,
                tokens: Vec::new(),
                pos,
            }))
        }
        Some(vchar) if is_eol(vchar.ch) => {
            // a lone `$` at the end of a line expands to nothing
            scanner.pushback()?;
            return Ok(Token::VarRef(VarRef {
                open: None,
                tokens: Vec::new(),
                pos,
            }));
        }
        Some(vchar) if is_whitespace(vchar.ch) => {
            return fail(ErrorKind::Parse, Some(&vchar.pos), "unclosed variable ref");
        }
        Some(vchar) if vchar.ch == '(' || vchar.ch == '{' => vchar.ch,
        Some(vchar) => {
            return Ok(Token::VarRef(VarRef {
                open: None,
                tokens: vec![Token::Literal(VCharString::from_vchars(vec![vchar]))],
                pos,
            }));
        }
    };
    let close = if open == '(' { ')' } else { '}' };
    log::trace!("variable reference '{}' at {}", open, pos);

    let mut depth = 1usize;
    let mut tokens = Vec::new();
    let mut token = VCharString::new();

    while let Some(vchar) = scanner.next() {
        let c = vchar.ch;
        if c == close {
            depth -= 1;
            if depth == 0 {
                push_literal(&mut tokens, &mut token);
                return Ok(match crate::functions::make_function(tokens, open, &pos) {
                    Ok(call) => Token::Function(Box::new(call)),
                    Err(tokens) => Token::VarRef(VarRef {
                        open: Some(open),
                        tokens,
                        pos,
                    }),
                });
            }
            token.push(vchar);
        } else if c == '$' {
            if scanner.lookahead().map(|v| v.ch) == Some('$') {
                token.push(vchar);
                scanner.next();
            } else {
                push_literal(&mut tokens, &mut token);
                scanner.pushback()?;
                tokens.push(tokenize_variable_ref(scanner)?);
            }
        } else if c == open {
            depth += 1;
            token.push(vchar);
        } else {
            token.push(vchar);
        }
    }

    fail(ErrorKind::Parse, Some(&pos), "unterminated variable reference")
}

/// Tokenize the targets of a rule up to and including the rule operator.
///
/// Restores the scanner and returns `None` if the line has no rule operator.
pub fn tokenize_rule(scanner: &mut VCharScanner) -> Result<Option<(Vec<Expression>, RuleOp)>, Error> {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Start,
        InWord,
        Dollar,
        Backslash,
        Colon,
    }

    log::trace!("tokenize_rule at {:?}", scanner_pos(scanner));
    scanner.push_state();

    let mut tokens = Vec::new();
    let mut token = VCharString::new();
    let mut state = State::Start;

    while let Some(vchar) = scanner.next() {
        let c = vchar.ch;
        match state {
            State::Start => {
                if is_whitespace(c) {
                    token.push(vchar);
                } else if c == ':' {
                    push_literal(&mut tokens, &mut token);
                    state = State::Colon;
                } else {
                    scanner.pushback()?;
                    push_literal(&mut tokens, &mut token);
                    state = State::InWord;
                }
            }
            State::InWord => {
                if c == '\\' {
                    state = State::Backslash;
                    token.push(vchar);
                } else if is_whitespace(c) {
                    push_literal(&mut tokens, &mut token);
                    scanner.pushback()?;
                    state = State::Start;
                } else if c == '$' {
                    state = State::Dollar;
                } else if c == '#' {
                    push_literal(&mut tokens, &mut token);
                    scanner.drain();
                } else if c == ':' {
                    push_literal(&mut tokens, &mut token);
                    state = State::Colon;
                } else if c == '?' && scanner.lookahead().map(|v| v.ch) == Some(':') {
                    push_literal(&mut tokens, &mut token);
                    scanner.next();
                    scanner.clear_state();
                    return Ok(Some((split_on_whitespace(tokens), RuleOp::Maybe)));
                } else if c == '&' && scanner.lookahead().map(|v| v.ch) == Some(':') {
                    return fail(ErrorKind::Parse, Some(&vchar.pos), "grouped targets (&:) are not supported");
                } else if is_eol(c) {
                    push_literal(&mut tokens, &mut token);
                    break;
                } else {
                    token.push(vchar);
                }
            }
            State::Dollar => {
                if c == '$' {
                    token.push(vchar);
                } else {
                    push_literal(&mut tokens, &mut token);
                    scanner.pushback()?;
                    scanner.pushback()?;
                    tokens.push(tokenize_variable_ref(scanner)?);
                }
                state = State::InWord;
            }
            State::Backslash => {
                token.push(vchar);
                state = State::InWord;
            }
            State::Colon => {
                let op = if c == ':' {
                    RuleOp::Double
                } else {
                    scanner.pushback()?;
                    RuleOp::Single
                };
                scanner.clear_state();
                return Ok(Some((split_on_whitespace(tokens), op)));
            }
        }
    }
    push_literal(&mut tokens, &mut token);

    if state == State::Colon {
        scanner.clear_state();
        return Ok(Some((split_on_whitespace(tokens), RuleOp::Single)));
    }

    scanner.pop_state();
    Ok(None)
}

/// Tokenize what follows a rule operator: prerequisites or a target-specific
/// assignment. Stops in front of a `;` so the caller can read the recipe.
pub fn tokenize_rule_rhs(scanner: &mut VCharScanner) -> Result<RuleRhs, Error> {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Start,
        Whitespace,
        Word,
        Dollar,
        Backslash,
    }

    log::trace!("tokenize_rule_rhs at {:?}", scanner_pos(scanner));

    if let Some(AssignmentLine::Assignment(a)) = tokenize_assignment_statement(scanner, true)? {
        log::debug!("target-specific assignment at {}", a.pos);
        return Ok(RuleRhs::Assignment(Box::new(a)));
    }

    let mut prereqs = Vec::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut token = VCharString::new();
    let mut state = State::Start;
    let mut backslash: Option<VChar> = None;

    fn save_prereq(prereqs: &mut Vec<Expression>, tokens: &mut Vec<Token>, token: &mut VCharString) {
        push_literal(tokens, token);
        if !tokens.is_empty() {
            prereqs.push(Expression::new(std::mem::take(tokens)));
        }
    }

    while let Some(vchar) = scanner.next() {
        let c = vchar.ch;
        match state {
            State::Start => {
                if c == ';' {
                    scanner.pushback()?;
                    return Ok(RuleRhs::Prerequisites(prereqs));
                } else if is_whitespace(c) {
                    state = State::Whitespace;
                } else {
                    scanner.pushback()?;
                    state = State::Word;
                }
            }
            State::Whitespace => {
                if !is_whitespace(c) {
                    scanner.pushback()?;
                    state = State::Start;
                }
            }
            State::Word => {
                if is_whitespace(c) {
                    save_prereq(&mut prereqs, &mut tokens, &mut token);
                    state = State::Whitespace;
                } else if c == '\\' {
                    backslash = Some(vchar);
                    state = State::Backslash;
                } else if c == ':' {
                    return fail(ErrorKind::Parse, Some(&vchar.pos), "static pattern rules are not supported");
                } else if c == '|' {
                    return fail(
                        ErrorKind::Parse,
                        Some(&vchar.pos),
                        "order-only prerequisites are not supported",
                    );
                } else if c == '#' {
                    scanner.drain();
                    save_prereq(&mut prereqs, &mut tokens, &mut token);
                    return Ok(RuleRhs::Prerequisites(prereqs));
                } else if c == '$' {
                    state = State::Dollar;
                } else if c == ';' {
                    scanner.pushback()?;
                    save_prereq(&mut prereqs, &mut tokens, &mut token);
                    return Ok(RuleRhs::Prerequisites(prereqs));
                } else if is_eol(c) {
                    save_prereq(&mut prereqs, &mut tokens, &mut token);
                    return Ok(RuleRhs::Prerequisites(prereqs));
                } else {
                    token.push(vchar);
                }
            }
            State::Dollar => {
                if c == '$' {
                    token.push(vchar);
                } else {
                    push_literal(&mut tokens, &mut token);
                    scanner.pushback()?;
                    scanner.pushback()?;
                    tokens.push(tokenize_variable_ref(scanner)?);
                }
                state = State::Word;
            }
            State::Backslash => {
                if let Some(b) = backslash.take() {
                    token.push(b);
                }
                token.push(vchar);
                state = State::Word;
            }
        }
    }

    save_prereq(&mut prereqs, &mut tokens, &mut token);
    Ok(RuleRhs::Prerequisites(prereqs))
}

/// Tokenize a recipe. The scanner must be at the recipe prefix or at the
/// `;` that separates a rule from its inline recipe.
///
/// `$$` is kept doubled; backslash-newline pairs are kept verbatim.
pub fn tokenize_recipe(scanner: &mut VCharScanner) -> Result<Recipe, Error> {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Start,
        LeadingWhitespace,
        Recipe,
        Dollar,
        Backslash,
    }

    let pos = scanner_pos(scanner).unwrap_or_else(|| Position::new("".into(), 0, 0));
    log::trace!("tokenize_recipe at {}", pos);

    let mut tokens = Vec::new();
    let mut token = VCharString::new();
    let mut state = State::Start;
    let mut held: Option<VChar> = None;

    while let Some(vchar) = scanner.next() {
        let c = vchar.ch;
        match state {
            State::Start => {
                if c == ';' || c == RECIPE_PREFIX {
                    state = State::LeadingWhitespace;
                }
            }
            State::LeadingWhitespace => {
                if !is_whitespace(c) {
                    scanner.pushback()?;
                    state = State::Recipe;
                }
            }
            State::Recipe => {
                if is_eol(c) {
                    push_literal(&mut tokens, &mut token);
                    return Ok(Recipe {
                        expr: Expression::new(tokens),
                        pos,
                    });
                } else if c == '$' {
                    held = Some(vchar);
                    state = State::Dollar;
                } else if c == '\\' {
                    held = Some(vchar);
                    state = State::Backslash;
                } else {
                    token.push(vchar);
                }
            }
            State::Dollar => {
                if c == '$' {
                    if let Some(d) = held.take() {
                        token.push(d);
                    }
                    token.push(vchar);
                } else {
                    held = None;
                    push_literal(&mut tokens, &mut token);
                    scanner.pushback()?;
                    scanner.pushback()?;
                    tokens.push(tokenize_variable_ref(scanner)?);
                }
                state = State::Recipe;
            }
            State::Backslash => {
                if let Some(b) = held.take() {
                    token.push(b);
                }
                token.push(vchar);
                state = State::Recipe;
            }
        }
    }

    if let Some(v) = held.take() {
        token.push(v);
    }
    push_literal(&mut tokens, &mut token);
    Ok(Recipe {
        expr: Expression::new(tokens),
        pos,
    })
}

fn finish_assignment(
    scanner: &mut VCharScanner,
    lhs: Vec<Token>,
    op: AssignOp,
    pos: &Position,
) -> Result<AssignmentExpression, Error> {
    let mut rhs = tokenize_line(scanner)?;
    if let Some(Token::Literal(s)) = rhs.first_mut() {
        if s.is_whitespace() {
            s.hide_all();
        }
    }
    log::debug!("assignment '{}' at {}", op.as_str(), pos);
    Ok(AssignmentExpression {
        lhs: Expression::new(lhs),
        op,
        rhs: Expression::new(rhs),
        modifiers: Vec::new(),
        pos: pos.clone(),
    })
}

fn define_header(lhs: Vec<Token>, pos: &Position) -> AssignmentExpression {
    AssignmentExpression {
        lhs: Expression::new(lhs),
        op: AssignOp::Implicit,
        rhs: Expression::default(),
        modifiers: Vec::new(),
        pos: pos.clone(),
    }
}

/// Try to read `NAME OP VALUE` from the scanner.
///
/// With `define` set, a lone name (no operator) is accepted as the header of
/// a multi-line variable. Returns `None` when the line is not an assignment;
/// the caller is responsible for restoring the scanner.
pub fn tokenize_assignment_expression(
    scanner: &mut VCharScanner,
    define: bool,
    pos: &Position,
) -> Result<Option<AssignmentExpression>, Error> {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Start,
        InWord,
        Dollar,
        Backslash,
        Colon,
        ColonColon,
        SeekAssign,
    }

    let mut tokens = Vec::new();
    let mut token = VCharString::new();
    let mut state = State::Start;

    while let Some(vchar) = scanner.next() {
        let c = vchar.ch;
        match state {
            State::Start => {
                if is_whitespace(c) {
                    token.push(vchar);
                } else {
                    scanner.pushback()?;
                    push_literal(&mut tokens, &mut token);
                    state = State::InWord;
                }
            }
            State::InWord => {
                if c == '\\' {
                    state = State::Backslash;
                    token.push(vchar);
                } else if is_whitespace(c) {
                    push_literal(&mut tokens, &mut token);
                    scanner.pushback()?;
                    state = State::SeekAssign;
                } else if c == '$' {
                    state = State::Dollar;
                } else if c == '#' {
                    return Ok(None);
                } else if c == ':' {
                    push_literal(&mut tokens, &mut token);
                    state = State::Colon;
                } else if matches!(c, '?' | '+' | '!') && scanner.lookahead().map(|v| v.ch) == Some('=') {
                    push_literal(&mut tokens, &mut token);
                    scanner.next();
                    let op = match c {
                        '?' => AssignOp::Conditional,
                        '+' => AssignOp::Append,
                        _ => AssignOp::Shell,
                    };
                    return finish_assignment(scanner, tokens, op, pos).map(Some);
                } else if c == '=' {
                    push_literal(&mut tokens, &mut token);
                    return finish_assignment(scanner, tokens, AssignOp::Recursive, pos).map(Some);
                } else if is_eol(c) {
                    push_literal(&mut tokens, &mut token);
                    return Ok(define.then(|| define_header(tokens, pos)));
                } else {
                    token.push(vchar);
                }
            }
            State::Dollar => {
                if c == '$' {
                    token.push(vchar);
                } else {
                    push_literal(&mut tokens, &mut token);
                    scanner.pushback()?;
                    scanner.pushback()?;
                    tokens.push(tokenize_variable_ref(scanner)?);
                }
                state = State::InWord;
            }
            State::Backslash => {
                token.push(vchar);
                state = State::InWord;
            }
            State::Colon => {
                if c == ':' {
                    state = State::ColonColon;
                } else if c == '=' {
                    return finish_assignment(scanner, tokens, AssignOp::Simple, pos).map(Some);
                } else {
                    return Ok(None);
                }
            }
            State::ColonColon => {
                if c == '=' {
                    return finish_assignment(scanner, tokens, AssignOp::PosixSimple, pos).map(Some);
                }
                if c == ':' && scanner.lookahead().map(|v| v.ch) == Some('=') {
                    scanner.next();
                    return finish_assignment(scanner, tokens, AssignOp::Immediate, pos).map(Some);
                }
                return Ok(None);
            }
            State::SeekAssign => {
                if is_whitespace(c) {
                    token.push(vchar);
                } else if c == ':' {
                    push_literal(&mut tokens, &mut token);
                    let mut colons = 1;
                    loop {
                        match scanner.lookahead().map(|v| v.ch) {
                            Some('=') => {
                                scanner.next();
                                let op = match colons {
                                    1 => AssignOp::Simple,
                                    2 => AssignOp::PosixSimple,
                                    _ => AssignOp::Immediate,
                                };
                                return finish_assignment(scanner, tokens, op, pos).map(Some);
                            }
                            Some(':') if colons < 3 => {
                                scanner.next();
                                colons += 1;
                            }
                            _ => return Ok(None),
                        }
                    }
                } else if c == '=' {
                    push_literal(&mut tokens, &mut token);
                    return finish_assignment(scanner, tokens, AssignOp::Recursive, pos).map(Some);
                } else if matches!(c, '?' | '+' | '!') {
                    if scanner.lookahead().map(|v| v.ch) != Some('=') {
                        return Ok(None);
                    }
                    push_literal(&mut tokens, &mut token);
                    scanner.next();
                    let op = match c {
                        '?' => AssignOp::Conditional,
                        '+' => AssignOp::Append,
                        _ => AssignOp::Shell,
                    };
                    return finish_assignment(scanner, tokens, op, pos).map(Some);
                } else if is_eol(c) {
                    if !define {
                        return Ok(None);
                    }
                    push_literal(&mut tokens, &mut token);
                    return Ok(Some(define_header(tokens, pos)));
                } else {
                    if !define {
                        return Ok(None);
                    }
                    push_literal(&mut tokens, &mut token);
                    warning_message(Some(&vchar.pos), "extraneous text after 'define' directive");
                    scanner.drain();
                    return Ok(Some(define_header(tokens, pos)));
                }
            }
        }
    }

    // ran off the end without a newline (command line, $(eval) text)
    if define && !matches!(state, State::Colon | State::ColonColon) {
        push_literal(&mut tokens, &mut token);
        return Ok(Some(define_header(tokens, pos)));
    }
    Ok(None)
}

/// Look for an assignment, possibly behind modifiers such as `export` or
/// `override`, or a `define`/`undefine` header.
///
/// `target_var` is set while reading the right-hand side of a rule, where
/// `define` and `undefine` are not allowed. Restores the scanner and
/// returns `None` if the line is something else.
pub fn tokenize_assignment_statement(
    scanner: &mut VCharScanner,
    target_var: bool,
) -> Result<Option<AssignmentLine>, Error> {
    let pos = match scanner.get_pos() {
        Some(pos) if !scanner.is_empty() => pos,
        _ => return Ok(None),
    };
    log::trace!("tokenize_assignment_statement at {}", pos);

    scanner.push_state();
    let mut modifiers = Vec::new();

    loop {
        scanner.push_state();
        if let Some(mut assignment) = tokenize_assignment_expression(scanner, false, &pos)? {
            scanner.clear_state();
            scanner.clear_state();
            assignment.modifiers = modifiers;
            return Ok(Some(AssignmentLine::Assignment(assignment)));
        }
        scanner.pop_state();

        let word = match seek_word(scanner, ASSIGNMENT_MODIFIERS)? {
            Some(word) => word.to_string(),
            None => {
                scanner.pop_state();
                return Ok(None);
            }
        };

        match word.as_str() {
            "define" | "undefine" if target_var => {
                scanner.pop_state();
                return Ok(None);
            }
            "define" => {
                scanner.clear_state();
                return match tokenize_assignment_expression(scanner, true, &pos)? {
                    Some(mut header) => {
                        header.modifiers = modifiers;
                        Ok(Some(AssignmentLine::Define(header)))
                    }
                    None => fail(ErrorKind::Parse, Some(&pos), "invalid 'define' directive"),
                };
            }
            "undefine" => {
                scanner.clear_state();
                let names = tokenize_line(scanner)?;
                return Ok(Some(AssignmentLine::Undefine(UndefineDirective {
                    names: Expression::new(names),
                    modifiers,
                    pos,
                })));
            }
            other => {
                log::trace!("assignment modifier '{}'", other);
                if let Some(modifier) = Modifier::from_str(other) {
                    modifiers.push(modifier);
                }
            }
        }
    }
}

/// Skip leading whitespace and try to match one of `words`, which must be
/// followed by whitespace, the end of the line or a comment.
///
/// On a match the scanner is left after the word and its trailing
/// whitespace; otherwise it is restored.
pub fn seek_word(scanner: &mut VCharScanner, words: &[&str]) -> Result<Option<VCharString>, Error> {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Leading,
        Word,
        Trailing,
    }

    let in_charset = |c: char| words.iter().any(|w| w.contains(c));

    scanner.push_state();
    let first = match scanner.next() {
        Some(vchar) => vchar,
        None => {
            scanner.pop_state();
            return Ok(None);
        }
    };

    let mut token = VCharString::new();
    let mut state = if is_whitespace(first.ch) {
        State::Leading
    } else {
        token.push(first);
        State::Word
    };

    while let Some(vchar) = scanner.next() {
        let c = vchar.ch;
        match state {
            State::Leading => {
                if !is_whitespace(c) {
                    state = State::Word;
                    scanner.pushback()?;
                }
            }
            State::Word => {
                if is_whitespace(c) || is_eol(c) {
                    state = State::Trailing;
                } else if c == '#' {
                    scanner.drain();
                } else if !in_charset(c) {
                    token = VCharString::new();
                    scanner.pushback()?;
                    break;
                } else {
                    token.push(vchar);
                }
            }
            State::Trailing => {
                if c == '#' {
                    scanner.drain();
                } else if !is_whitespace(c) && !is_eol(c) {
                    scanner.pushback()?;
                    break;
                }
            }
        }
    }

    if words.iter().any(|w| token == *w) {
        log::trace!("seek_word found '{}' at {:?}", token, token.get_pos());
        scanner.clear_state();
        return Ok(Some(token));
    }
    scanner.pop_state();
    Ok(None)
}

/// [`seek_word`] that warns when the directive hides behind the recipe
/// prefix.
pub fn seek_directive(scanner: &mut VCharScanner, words: &[&str]) -> Result<Option<VCharString>, Error> {
    let prefix_pos = match scanner.lookahead() {
        Some(vchar) if vchar.ch == RECIPE_PREFIX => Some(vchar.pos.clone()),
        _ => None,
    };
    let found = seek_word(scanner, words)?;
    if let (Some(word), Some(pos)) = (&found, prefix_pos) {
        warning_message(
            Some(&pos),
            &format!("recipe prefix means directive '{}' might be confused as a recipe", word),
        );
    }
    Ok(found)
}

/// True if the rest of the line is only whitespace and a comment.
pub fn seek_comment(scanner: &VCharScanner) -> bool {
    scanner.remain()
        .iter()
        .find(|v| !is_whitespace(v.ch))
        .map_or(true, |v| v.ch == '#' || is_eol(v.ch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vline::VirtualLine;
    use std::rc::Rc;

    fn scanner(text: &str) -> VCharScanner {
        VirtualLine::new(vec![text.to_string()], Position::new(Rc::from("t.mk"), 0, 0)).scanner()
    }

    fn render(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .map(|t| match t {
                Token::Literal(s) => format!("L({})", s),
                Token::VarRef(v) => format!("V({})", render(&v.tokens).join("")),
                Token::Function(f) => format!("F({}:{})", f.name, f.args.len()),
            })
            .collect()
    }

    fn assignment(text: &str) -> AssignmentExpression {
        match tokenize_assignment_statement(&mut scanner(text), false).unwrap() {
            Some(AssignmentLine::Assignment(a)) => a,
            other => panic!("not an assignment: {:?}", other),
        }
    }

    #[test]
    fn test_tokenize_line() {
        let tokens = tokenize_line(&mut scanner("  foo $(bar)baz # comment\n")).unwrap();
        assert_eq!(render(&tokens), vec!["L(  )", "L(foo)", "L( )", "V(L(bar))", "L(baz)", "L( )"]);
    }

    #[test]
    fn test_tokenize_line_dollar_dollar() {
        let tokens = tokenize_line(&mut scanner("a$$b $x\n")).unwrap();
        assert_eq!(render(&tokens), vec!["L(a$b)", "L( )", "V(L(x))"]);
    }

    #[test]
    fn test_nested_variable_ref() {
        let tokens = tokenize_line(&mut scanner("$(a$(b)c) ${x(y)}\n")).unwrap();
        assert_eq!(render(&tokens), vec!["V(L(a)V(L(b))L(c))", "L( )", "V(L(x(y)))"]);
    }

    #[test]
    fn test_unterminated_variable_ref() {
        let err = tokenize_line(&mut scanner("$(foo\n")).unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::Parse));
        let err = tokenize_line(&mut scanner("a$ b\n")).unwrap_err();
        assert!(err.to_string().contains("unclosed variable ref"));
    }

    #[test]
    fn test_function_call() {
        let tokens = tokenize_line(&mut scanner("$(subst a,b,abc)\n")).unwrap();
        assert_eq!(render(&tokens), vec!["F(subst:3)"]);
    }

    #[test]
    fn test_assignment_operators() {
        for (text, op) in [
            ("A=1\n", AssignOp::Recursive),
            ("A :=1\n", AssignOp::Simple),
            ("A::=1\n", AssignOp::PosixSimple),
            ("A :::= 1\n", AssignOp::Immediate),
            ("A ?= 1\n", AssignOp::Conditional),
            ("A+=1\n", AssignOp::Append),
            ("A != echo 1\n", AssignOp::Shell),
        ] {
            assert_eq!(assignment(text).op, op, "{}", text);
        }
    }

    #[test]
    fn test_assignment_rhs_leading_whitespace_hidden() {
        let a = assignment("CC =   gcc -O2  \n");
        assert_eq!(render(&a.lhs.tokens), vec!["L(CC)", "L( )"]);
        let rhs: String = a.rhs.tokens.iter().map(|t| match t {
            Token::Literal(s) => s.to_string(),
            _ => String::new(),
        }).collect();
        assert_eq!(rhs, "gcc -O2  ");
    }

    #[test]
    fn test_assignment_modifiers() {
        let a = assignment("export override CC := gcc\n");
        assert_eq!(a.modifiers, vec![Modifier::Export, Modifier::Override]);
        assert_eq!(a.op, AssignOp::Simple);
    }

    #[test]
    fn test_not_an_assignment() {
        for text in ["all: foo\n", "foo bar baz\n", "$(info hi)\n", "a b : c\n", "export FOO\n"] {
            let mut s = scanner(text);
            assert!(tokenize_assignment_statement(&mut s, false).unwrap().is_none(), "{}", text);
            assert!(s.is_starting(), "{}", text);
        }
    }

    #[test]
    fn test_define_header() {
        match tokenize_assignment_statement(&mut scanner("define FOO\n"), false).unwrap() {
            Some(AssignmentLine::Define(a)) => {
                assert_eq!(a.op, AssignOp::Implicit);
                assert_eq!(render(&a.lhs.tokens)[0], "L(FOO)");
            }
            other => panic!("{:?}", other),
        }
        match tokenize_assignment_statement(&mut scanner("override define FOO :=\n"), false).unwrap() {
            Some(AssignmentLine::Define(a)) => {
                assert_eq!(a.op, AssignOp::Simple);
                assert_eq!(a.modifiers, vec![Modifier::Override]);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_undefine() {
        match tokenize_assignment_statement(&mut scanner("undefine FOO BAR\n"), false).unwrap() {
            Some(AssignmentLine::Undefine(u)) => assert_eq!(render(&u.names.tokens), vec!["L(FOO)", "L( )", "L(BAR)"]),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_tokenize_rule() {
        let mut s = scanner("all clean:: foo\n");
        let (targets, op) = tokenize_rule(&mut s).unwrap().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(op, RuleOp::Double);
        match tokenize_rule_rhs(&mut s).unwrap() {
            RuleRhs::Prerequisites(p) => assert_eq!(p.len(), 1),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_rule_with_inline_recipe() {
        let mut s = scanner("@:;@:\n");
        let (targets, op) = tokenize_rule(&mut s).unwrap().unwrap();
        assert_eq!(render(&targets[0].tokens), vec!["L(@)"]);
        assert_eq!(op, RuleOp::Single);
        match tokenize_rule_rhs(&mut s).unwrap() {
            RuleRhs::Prerequisites(p) => assert!(p.is_empty()),
            other => panic!("{:?}", other),
        }
        let recipe = tokenize_recipe(&mut s).unwrap();
        assert_eq!(render(&recipe.expr.tokens), vec!["L(@:)"]);
    }

    #[test]
    fn test_target_specific_assignment() {
        let mut s = scanner("foo.o: CFLAGS += -g\n");
        tokenize_rule(&mut s).unwrap().unwrap();
        match tokenize_rule_rhs(&mut s).unwrap() {
            RuleRhs::Assignment(a) => assert_eq!(a.op, AssignOp::Append),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_not_a_rule() {
        let mut s = scanner("$(info hello)\n");
        assert!(tokenize_rule(&mut s).unwrap().is_none());
        assert!(s.is_starting());
    }

    #[test]
    fn test_order_only_unsupported() {
        let mut s = scanner("a: b | c\n");
        tokenize_rule(&mut s).unwrap();
        assert!(tokenize_rule_rhs(&mut s).is_err());
    }

    #[test]
    fn test_tokenize_recipe_keeps_dollars() {
        let vline = VirtualLine::recipe(
            vec!["\t  echo $$HOME $@ \\\n".to_string(), "\tdone\n".to_string()],
            Position::new(Rc::from("t.mk"), 0, 0),
        );
        let recipe = tokenize_recipe(&mut vline.scanner()).unwrap();
        assert_eq!(
            render(&recipe.expr.tokens),
            vec!["L(echo $$HOME )", "V(L(@))", "L( \\\ndone)"]
        );
    }

    #[test]
    fn test_seek_word() {
        let mut s = scanner("  ifdef FOO\n");
        let word = seek_word(&mut s, CONDITIONAL_DIRECTIVES).unwrap().unwrap();
        assert_eq!(word, "ifdef");
        assert_eq!(s.next().map(|v| v.ch), Some('F'));

        let mut s = scanner("ifdefs FOO\n");
        assert!(seek_word(&mut s, CONDITIONAL_DIRECTIVES).unwrap().is_none());
        assert!(s.is_starting());

        let mut s = scanner("endif # done\n");
        assert!(seek_word(&mut s, CONDITIONAL_DIRECTIVES).unwrap().is_some());
        assert!(s.is_empty());
    }

    #[test]
    fn test_seek_comment() {
        assert!(seek_comment(&scanner("\t  # note\n")));
        assert!(!seek_comment(&scanner("\techo\n")));
    }

    #[test]
    fn test_tokenize_text() {
        let tokens = tokenize_text(&mut scanner("echo $$x $(Y) # not a comment")).unwrap();
        assert_eq!(render(&tokens), vec!["L(echo $x )", "V(L(Y))", "L( # not a comment)"]);
    }
}
