//! Executing makefiles.
//!
//! A [`Context`] owns everything one make invocation needs: the variables,
//! the rule database and the options given on the command line. Statements
//! are executed in source order; conditional branches and `define` bodies
//! are only parsed once they are needed.

use crate::ast::{
    AssignOp, AssignmentExpression, Block, Conditional, ConditionalArgs, ConditionalBlock, ConditionalKind,
    DefineBlock, Directive, DirectiveKind, Expression, Modifier, Recipe, RuleExpression, RuleOp, RuleRhs,
    Statement, Token, UndefineDirective,
};
use crate::error::{fail, warning_message, Error, ErrorKind, MakeError, EXIT_REBUILD, EXIT_SUCCESS, PROGRAM_NAME};
use crate::functions::{dir_part, file_part};
use crate::parser::{parse_lines, parse_makefile, resolve_conditional};
use crate::pattern::substitution_ref;
use crate::rules::{is_older_than, mtime, Rule, RuleDb, Target};
use crate::scanner::ScannerIterator;
use crate::shell::{fold_newlines, ShellCommand};
use crate::source::{Position, Source};
use crate::symtable::{variables_callback, Entry, Origin, SymbolTable, Value};
use crate::tokenizer::{tokenize_assignment_statement, tokenize_text, AssignmentLine};
use crate::vline::{VCharString, VirtualLine};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;

/// Name used for positions of `NAME=VALUE` arguments.
const COMMAND_LINE_SOURCE: &str = "<command-line>";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Settings that come from the command line
pub struct Options {
    /// `-n`: print recipes instead of running them
    pub dry_run: bool,
    /// `-B`: treat every target as out of date
    pub always_make: bool,
    /// `-s`: don't echo recipes
    pub silent: bool,
    /// `-q`: run nothing, report through the exit status
    pub question: bool,
    /// `--warn-undefined-variables`
    pub warn_undefined: bool,
}

#[derive(Debug)]
enum Output {
    Stdout,
    Buffer(String),
}

#[derive(Debug, Clone)]
struct OpenRule {
    targets: Vec<String>,
    pos: Position,
}

#[derive(Debug)]
/// State of one make invocation
///
/// # Example
/// ```
/// use rmake::{Context, Options, Source};
/// let mut ctx = Context::with_captured_output(Options::default());
/// let src = Source::from_string("CC := gcc\n$(info CC=$(CC))\n");
/// ctx.read_makefile(&src).unwrap();
/// assert_eq!(ctx.captured_output(), "CC=gcc\n");
/// ```
pub struct Context {
    symtable: SymbolTable,
    rules: RuleDb,
    options: Options,
    open_rule: Option<OpenRule>,
    output: Output,
    call_args: usize,
    updated: HashMap<String, bool>,
    in_progress: HashSet<String>,
    commands_run: usize,
}

impl Context {
    /// A context printing to stdout, with the environment imported.
    pub fn new(options: Options) -> Self {
        let mut ctx = Context {
            symtable: SymbolTable::new(),
            rules: RuleDb::new(),
            options,
            open_rule: None,
            output: Output::Stdout,
            call_args: 0,
            updated: HashMap::new(),
            in_progress: HashSet::new(),
            commands_run: 0,
        };
        ctx.import_environment();
        ctx.define_builtins();
        ctx
    }

    /// Like [`Context::new`], but `$(info)`, recipe echo and recipe output
    /// are collected instead of printed.
    pub fn with_captured_output(options: Options) -> Self {
        let mut ctx = Context::new(options);
        ctx.output = Output::Buffer(String::new());
        ctx
    }

    /// Everything printed so far by a capturing context.
    pub fn captured_output(&self) -> &str {
        match &self.output {
            Output::Buffer(text) => text,
            Output::Stdout => "",
        }
    }

    /// The options this context runs with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The variables.
    pub fn symtable(&self) -> &SymbolTable {
        &self.symtable
    }

    pub(crate) fn symtable_mut(&mut self) -> &mut SymbolTable {
        &mut self.symtable
    }

    /// The rules read so far.
    pub fn rules(&self) -> &RuleDb {
        &self.rules
    }

    fn import_environment(&mut self) {
        for (name, value) in std::env::vars_os() {
            let (Some(name), Some(value)) = (name.to_str(), value.to_str()) else {
                continue;
            };
            if name == "SHELL" {
                continue;
            }
            self.symtable
                .insert(Entry::simple(name, value, Origin::Environment), false);
        }
    }

    fn define_builtins(&mut self) {
        let make = std::env::args().next().unwrap_or_else(|| PROGRAM_NAME.to_string());
        let curdir = std::env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default();
        let builtins = [
            ("MAKE", make),
            ("MAKE_VERSION", env!("CARGO_PKG_VERSION").to_string()),
            ("MAKEFILE_LIST", String::new()),
            ("MAKECMDGOALS", String::new()),
            ("CURDIR", curdir),
            ("SHELL", "/bin/sh".to_string()),
            (".SHELLFLAGS", "-c".to_string()),
            (".DEFAULT_GOAL", String::new()),
        ];
        for (name, value) in builtins {
            self.set_builtin(name, value);
        }
        self.symtable.insert(
            Entry::new(".VARIABLES", Value::Callback(variables_callback), Origin::Default, None),
            false,
        );
    }

    fn set_builtin(&mut self, name: &str, value: impl Into<String>) {
        let origin = self.symtable.lookup(name).map_or(Origin::Default, |e| e.origin);
        self.symtable.insert(Entry::simple(name, value, origin), false);
    }

    /// Print a line of output.
    pub(crate) fn print(&mut self, text: &str) {
        match &mut self.output {
            Output::Stdout => println!("{}", text),
            Output::Buffer(buffer) => {
                buffer.push_str(text);
                buffer.push('\n');
            }
        }
    }

    /// Handle a `NAME=VALUE` command-line argument.
    ///
    /// Returns false if the argument is not an assignment, i.e. a goal.
    pub fn add_command_line(&mut self, arg: &str) -> Result<bool, Error> {
        let pos = Position::new(Rc::from(COMMAND_LINE_SOURCE), 0, 0);
        let vline = VirtualLine::new(vec![format!("{}\n", arg)], pos);
        match tokenize_assignment_statement(&mut vline.scanner(), true)? {
            Some(AssignmentLine::Assignment(a)) => {
                self.assign(&a, None, false, Origin::CommandLine)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Parse and execute a makefile, recording it in `MAKEFILE_LIST`.
    pub fn read_makefile(&mut self, src: &Source) -> Result<(), Error> {
        let list = self.symtable.raw_value("MAKEFILE_LIST").unwrap_or_default();
        let list = if list.is_empty() {
            src.name().to_string()
        } else {
            format!("{} {}", list, src.name())
        };
        self.set_builtin("MAKEFILE_LIST", list);

        let makefile = parse_makefile(src)?;
        self.execute_statements(&makefile.statements)
    }

    /// Read a makefile and bring `goals` up to date; with no goals, the
    /// default goal. Returns the exit status.
    pub fn execute(&mut self, src: &Source, goals: &[String]) -> Result<i32, Error> {
        self.set_builtin("MAKECMDGOALS", goals.join(" "));
        self.read_makefile(src)?;
        self.build(goals)
    }

    /// Parse text produced by `$(eval)` and execute it.
    pub(crate) fn eval_text(&mut self, text: &str) -> Result<(), Error> {
        let makefile = parse_makefile(&Source::from_string(text))?;
        self.execute_statements(&makefile.statements)
    }

    /// Execute statements in order.
    pub fn execute_statements(&mut self, statements: &[Statement]) -> Result<(), Error> {
        for statement in statements {
            self.execute_statement(statement)?;
        }
        Ok(())
    }

    /// Execute one statement.
    pub fn execute_statement(&mut self, statement: &Statement) -> Result<(), Error> {
        match statement {
            Statement::Assignment(a) => {
                self.open_rule = None;
                self.assign(a, None, false, Origin::File)
            }
            Statement::Define(d) => {
                self.open_rule = None;
                self.assign(&d.assignment, Some(&d.body), false, Origin::File)
            }
            Statement::Undefine(u) => {
                self.open_rule = None;
                self.undefine(u)
            }
            Statement::Rule(rule) => self.execute_rule(rule),
            Statement::Recipe(recipe) => self.add_recipe(recipe),
            Statement::Directive(d) => self.execute_directive(d),
            Statement::Conditional(block) => self.execute_conditional(block),
            Statement::Expression(expr, pos) => {
                self.open_rule = None;
                let value = expr.eval(self)?;
                if value.trim().is_empty() {
                    Ok(())
                } else {
                    Err(MakeError::new(ErrorKind::MissingSeparator, Some(pos.clone())).into())
                }
            }
        }
    }

    /// Expand the variable `name` at `pos`.
    ///
    /// `NAME:FROM=TO` is a substitution reference. Undefined variables expand
    /// to nothing.
    pub fn fetch(&mut self, name: &str, pos: Option<&Position>) -> Result<String, Error> {
        if let Some((var, from, to)) = substitution_parts(name) {
            let value = self.fetch(var, pos)?;
            return Ok(substitution_ref(from, to, &value));
        }
        let entry = match self.symtable.lookup(name) {
            Some(entry) => entry.clone(),
            None => {
                if self.options.warn_undefined {
                    warning_message(pos, &format!("undefined variable '{}'", name));
                }
                return Ok(String::new());
            }
        };
        self.expand_entry(&entry, true)
    }

    /// Expand a variable for `$(call)`, which may legitimately re-enter it.
    pub(crate) fn expand_unguarded(&mut self, name: &str) -> Result<String, Error> {
        match self.symtable.lookup(name).cloned() {
            Some(entry) => self.expand_entry(&entry, false),
            None => Ok(String::new()),
        }
    }

    /// Note that a `$(call)` with `params` arguments starts; returns the value
    /// to hand back to [`Context::leave_call`].
    pub(crate) fn enter_call(&mut self, params: usize) -> usize {
        let outer = self.call_args;
        self.call_args = outer.max(params);
        outer
    }

    pub(crate) fn leave_call(&mut self, outer: usize) {
        self.call_args = outer;
    }

    fn expand_entry(&mut self, entry: &Entry, guard: bool) -> Result<String, Error> {
        if !entry.value.is_recursive() {
            return self.expand_value(&entry.value);
        }
        let depth = entry.depth();
        if guard && depth.get() > 0 {
            if self.symtable.ignore_recursion() {
                return Ok(String::new());
            }
            return fail(
                ErrorKind::RecursiveVariable,
                entry.pos.as_ref(),
                format!("Recursive variable '{}' references itself (eventually)", entry.name),
            );
        }

        depth.set(depth.get() + 1);
        let result = self.expand_with_appends(entry);
        depth.set(depth.get() - 1);
        result
    }

    fn expand_with_appends(&mut self, entry: &Entry) -> Result<String, Error> {
        let mut result = self.expand_value(&entry.value)?;
        for append in &entry.appends {
            result.push(' ');
            result.push_str(&self.expand_value(append)?);
        }
        Ok(result)
    }

    fn expand_value(&mut self, value: &Value) -> Result<String, Error> {
        match value {
            Value::Simple(s) => Ok(s.clone()),
            Value::Recursive(expr) => expr.eval(self),
            Value::Define(body) => self.expand_define(body),
            Value::Callback(callback) => Ok(callback(&self.symtable)),
        }
    }

    /// Expand a `define` body line by line, joining the lines with newlines.
    fn expand_define(&mut self, body: &DefineBlock) -> Result<String, Error> {
        let mut lines = Vec::with_capacity(body.lines.len());
        for vline in &body.lines {
            let raw = vline.raw_text();
            let mut scanner = ScannerIterator::new(raw.vchars().cloned().collect());
            let tokens = tokenize_text(&mut scanner)?;
            lines.push(Expression::new(tokens).eval(self)?);
        }
        Ok(lines.join("\n"))
    }

    fn expand_rhs(&mut self, a: &AssignmentExpression, body: Option<&Rc<DefineBlock>>) -> Result<String, Error> {
        match body {
            Some(body) => self.expand_define(body),
            None => a.rhs.eval(self),
        }
    }

    /// Run `command` for `$(shell)` or `!=`, updating `.SHELLSTATUS`.
    pub(crate) fn run_shell(&mut self, command: &str) -> Result<String, Error> {
        let (shell, flags) = self.shell_program()?;
        let env = self.shell_env()?;
        let output = ShellCommand::new(&shell, &flags)
            .env(env)
            .capture(true)
            .run(command)?;
        self.set_builtin(".SHELLSTATUS", output.status.to_string());
        Ok(fold_newlines(&output.stdout))
    }

    fn shell_program(&mut self) -> Result<(String, String), Error> {
        let shell = self.fetch("SHELL", None)?;
        let flags = self.fetch(".SHELLFLAGS", None)?;
        Ok((shell.trim().to_string(), flags))
    }

    /// The environment of a child process: every exported variable, expanded.
    ///
    /// A variable that refers to itself while this runs expands to nothing.
    fn shell_env(&mut self) -> Result<Vec<(String, String)>, Error> {
        let previous = self.symtable.set_ignore_recursion(true);
        let mut env = Vec::new();
        let mut result = Ok(());
        for name in self.symtable.exported_names() {
            match self.fetch(&name, None) {
                Ok(value) => env.push((name, value)),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.symtable.set_ignore_recursion(previous);
        result.map(|_| env)
    }

    fn assign(
        &mut self,
        a: &AssignmentExpression,
        body: Option<&Rc<DefineBlock>>,
        local: bool,
        origin: Origin,
    ) -> Result<(), Error> {
        let name = a.lhs.eval(self)?.trim().to_string();
        if name.is_empty() {
            return Err(MakeError::new(ErrorKind::EmptyVariableName, Some(a.pos.clone())).into());
        }
        let origin = if a.has_modifier(Modifier::Override) {
            Origin::Override
        } else {
            origin
        };
        if !local && !self.symtable.may_assign(&name, origin) {
            log::debug!("{} keeps its {} value", name, self.symtable.origin(&name));
            self.apply_export_modifiers(a, &name);
            return Ok(());
        }

        let pos = Some(a.pos.clone());
        let deferred = || match body {
            Some(body) => Value::Define(body.clone()),
            None => Value::Recursive(Rc::new(a.rhs.clone())),
        };
        let mut entry = match a.op {
            AssignOp::Recursive | AssignOp::Implicit => Entry::new(&name, deferred(), origin, pos),
            AssignOp::Conditional => {
                if self.symtable.is_defined(&name) {
                    return Ok(());
                }
                Entry::new(&name, deferred(), origin, pos)
            }
            AssignOp::Simple | AssignOp::PosixSimple => {
                let value = self.expand_rhs(a, body)?;
                Entry::new(&name, Value::Simple(value), origin, pos)
            }
            AssignOp::Immediate => {
                let value = self.expand_rhs(a, body)?;
                let tokens = if value.is_empty() {
                    Vec::new()
                } else {
                    vec![Token::Literal(VCharString::from_text(&value, a.pos.clone()))]
                };
                Entry::new(&name, Value::Recursive(Rc::new(Expression::new(tokens))), origin, pos)
            }
            AssignOp::Shell => {
                let command = self.expand_rhs(a, body)?;
                let output = self.run_shell(&command)?;
                Entry::new(&name, Value::Simple(output), origin, pos)
            }
            AssignOp::Append => match self.symtable.lookup(&name).cloned() {
                None => Entry::new(&name, deferred(), origin, pos),
                Some(mut entry) => {
                    let empty = self
                        .symtable
                        .raw_value(&name)
                        .map_or(true, |raw| raw.is_empty());
                    if entry.value.is_recursive() {
                        if empty {
                            entry.value = deferred();
                            entry.appends.clear();
                        } else {
                            entry.appends.push(deferred());
                        }
                    } else {
                        let old = self.expand_value(&entry.value)?;
                        let more = self.expand_rhs(a, body)?;
                        entry.value = Value::Simple(if old.is_empty() {
                            more
                        } else {
                            format!("{} {}", old, more)
                        });
                    }
                    entry.origin = origin;
                    entry
                }
            },
        };

        if a.has_modifier(Modifier::Export) {
            entry.exported = Some(true);
        } else if a.has_modifier(Modifier::Unexport) {
            entry.exported = Some(false);
        }
        self.symtable.insert(entry, local);
        Ok(())
    }

    fn apply_export_modifiers(&mut self, a: &AssignmentExpression, name: &str) {
        if a.has_modifier(Modifier::Export) {
            self.symtable.export(name);
        } else if a.has_modifier(Modifier::Unexport) {
            self.symtable.unexport(name);
        }
    }

    fn undefine(&mut self, u: &UndefineDirective) -> Result<(), Error> {
        let names = u.names.eval(self)?;
        let origin = if u.modifiers.contains(&Modifier::Override) {
            Origin::Override
        } else {
            Origin::File
        };
        for name in names.split_whitespace() {
            if self.symtable.may_assign(name, origin) {
                self.symtable.remove(name);
            } else {
                log::debug!("not undefining {} ({})", name, self.symtable.origin(name));
            }
        }
        Ok(())
    }

    fn execute_rule(&mut self, rule: &RuleExpression) -> Result<(), Error> {
        if rule.op == RuleOp::Maybe {
            warning_message(Some(&rule.pos), "'?:' is not supported; treating it as ':'");
        }
        let (targets, prereqs) = rule.eval(self)?;

        if let RuleRhs::Assignment(a) = &rule.rhs {
            let a = Rc::new((**a).clone());
            for target in &targets {
                self.rules.add_target_var(target, a.clone());
            }
            self.open_rule = None;
            return Ok(());
        }

        let had_goal = self.rules.default_goal().is_some();
        for target in &targets {
            self.rules
                .add_rule(target, &prereqs, rule.op == RuleOp::Double, &rule.pos)?;
        }
        if !had_goal {
            let goal = self.rules.default_goal().map(String::from);
            let unset = self
                .symtable
                .raw_value(".DEFAULT_GOAL")
                .map_or(true, |v| v.trim().is_empty());
            if let (Some(goal), true) = (goal, unset) {
                self.set_builtin(".DEFAULT_GOAL", goal);
            }
        }

        self.open_rule = Some(OpenRule {
            targets,
            pos: rule.pos.clone(),
        });
        for recipe in &rule.recipes {
            self.add_recipe(recipe)?;
        }
        Ok(())
    }

    fn add_recipe(&mut self, recipe: &Recipe) -> Result<(), Error> {
        let Some(open) = &self.open_rule else {
            return Err(MakeError::new(ErrorKind::RecipeCommencesBeforeFirstTarget, Some(recipe.pos.clone())).into());
        };
        let recipe = Rc::new(recipe.clone());
        for target in &open.targets {
            self.rules.add_recipe(target, recipe.clone(), &open.pos);
        }
        Ok(())
    }

    fn execute_directive(&mut self, d: &Directive) -> Result<(), Error> {
        if d.kind != DirectiveKind::Vpath {
            self.open_rule = None;
        }
        let words: Vec<String> = match &d.expr {
            Some(expr) => expr.eval(self)?.split_whitespace().map(String::from).collect(),
            None => Vec::new(),
        };

        match d.kind {
            DirectiveKind::Export | DirectiveKind::Unexport if words.is_empty() => {
                self.symtable.set_export_all(d.kind == DirectiveKind::Export);
            }
            DirectiveKind::Export => words.iter().for_each(|name| self.symtable.export(name)),
            DirectiveKind::Unexport => words.iter().for_each(|name| self.symtable.unexport(name)),
            DirectiveKind::Include | DirectiveKind::MinusInclude | DirectiveKind::SInclude => {
                for name in &words {
                    self.include(name, d)?;
                }
            }
            DirectiveKind::Vpath => {
                warning_message(Some(&d.pos), "'vpath' is not supported and has no effect");
            }
        }
        Ok(())
    }

    fn include(&mut self, name: &str, d: &Directive) -> Result<(), Error> {
        if !Path::new(name).is_file() {
            if d.kind == DirectiveKind::Include {
                return fail(
                    ErrorKind::FileNotFound,
                    Some(&d.pos),
                    format!("{}: No such file or directory", name),
                );
            }
            log::debug!("skipping missing makefile {}", name);
            return Ok(());
        }
        log::debug!("including {}", name);
        self.read_makefile(&Source::from_file(name)?)
    }

    fn execute_conditional(&mut self, block: &ConditionalBlock) -> Result<(), Error> {
        let mut taken = None;
        for (conditional, blocks) in &block.branches {
            if self.test_truth(conditional)? {
                taken = Some(blocks);
                break;
            }
        }
        match taken.or(block.else_branch.as_ref()) {
            Some(blocks) => self.execute_blocks(blocks),
            None => Ok(()),
        }
    }

    fn execute_blocks(&mut self, blocks: &[Block]) -> Result<(), Error> {
        for block in blocks {
            match block {
                Block::Lines(lines) => {
                    let statements = parse_lines(lines.clone(), self.open_rule.is_some())?;
                    self.execute_statements(&statements)?;
                }
                Block::Conditional(nested) => self.execute_conditional(nested)?,
            }
        }
        Ok(())
    }

    /// Evaluate the test of a conditional directive.
    ///
    /// `ifdef` is true for a variable whose value is not empty, without
    /// expanding it.
    pub fn test_truth(&mut self, conditional: &Conditional) -> Result<bool, Error> {
        let resolved;
        let args = match &conditional.args {
            ConditionalArgs::Partial(_) => {
                resolved = resolve_conditional(conditional)?;
                &resolved
            }
            args => args,
        };
        match args {
            ConditionalArgs::Name(expr) => {
                let name = match expr {
                    Some(expr) => expr.eval(self)?.trim().to_string(),
                    None => String::new(),
                };
                let defined = self
                    .symtable
                    .raw_value(&name)
                    .is_some_and(|raw| !raw.is_empty());
                Ok(defined == (conditional.kind == ConditionalKind::Ifdef))
            }
            ConditionalArgs::Compare(lhs, rhs) => {
                let equal = lhs.eval(self)? == rhs.eval(self)?;
                Ok(equal == (conditional.kind == ConditionalKind::Ifeq))
            }
            ConditionalArgs::Partial(_) => fail(
                ErrorKind::InvalidSyntaxInConditional,
                Some(&conditional.pos),
                "invalid syntax in conditional",
            ),
        }
    }

    /// Bring `goals` up to date, or the default goal if there are none.
    ///
    /// Returns [`EXIT_REBUILD`] under `-q` when something is out of date.
    pub fn build(&mut self, goals: &[String]) -> Result<i32, Error> {
        let goals = if goals.is_empty() {
            let goal = self.fetch(".DEFAULT_GOAL", None)?.trim().to_string();
            if goal.is_empty() {
                return fail(ErrorKind::NoRule, None, "No targets");
            }
            vec![goal]
        } else {
            goals.to_vec()
        };

        let mut status = EXIT_SUCCESS;
        for goal in &goals {
            let commands_before = self.commands_run;
            let remade = self.update_target(goal, None)?;
            if self.options.question {
                if remade {
                    status = EXIT_REBUILD;
                }
                continue;
            }
            if self.commands_run == commands_before && !self.options.silent {
                let has_recipe = self
                    .rules
                    .get(goal)
                    .is_some_and(|t| t.rules.iter().any(|r| !r.recipes.is_empty()));
                if has_recipe || (!remade && mtime(goal).is_some()) {
                    self.print(&format!("{}: '{}' is up to date.", PROGRAM_NAME, goal));
                } else {
                    self.print(&format!("{}: Nothing to be done for '{}'.", PROGRAM_NAME, goal));
                }
            }
        }
        Ok(status)
    }

    /// Update `target` and its prerequisites. Returns true if the target was
    /// (or, under `-q`, would be) remade.
    fn update_target(&mut self, target: &str, parent: Option<&str>) -> Result<bool, Error> {
        if let Some(&remade) = self.updated.get(target) {
            return Ok(remade);
        }
        let entry = match self.rules.get(target) {
            Some(entry) if !entry.rules.is_empty() => entry.clone(),
            Some(entry) if entry.phony => {
                self.updated.insert(target.to_string(), true);
                return Ok(true);
            }
            _ => {
                if mtime(target).is_some() {
                    self.updated.insert(target.to_string(), false);
                    return Ok(false);
                }
                let message = match parent {
                    Some(parent) => format!("No rule to make target '{}', needed by '{}'", target, parent),
                    None => format!("No rule to make target '{}'", target),
                };
                return fail(ErrorKind::NoRule, None, message);
            }
        };
        log::debug!("considering target {}", target);

        self.in_progress.insert(target.to_string());
        let result = self.update_rules(target, &entry);
        self.in_progress.remove(target);
        let remade = result?;
        self.updated.insert(target.to_string(), remade);
        Ok(remade)
    }

    fn update_rules(&mut self, target: &str, entry: &Target) -> Result<bool, Error> {
        let mut remade = false;
        for rule in &entry.rules {
            let mut prereqs = Vec::with_capacity(rule.prerequisites.len());
            let mut prereq_remade = Vec::with_capacity(rule.prerequisites.len());
            for prereq in &rule.prerequisites {
                if self.in_progress.contains(prereq) {
                    eprintln!("{}: Circular {} <- {} dependency dropped.", PROGRAM_NAME, target, prereq);
                    continue;
                }
                prereq_remade.push(self.update_target(prereq, Some(target))?);
                prereqs.push(prereq.clone());
            }

            let target_time = mtime(target);
            let prereq_times: Vec<_> = prereqs.iter().map(|p| mtime(p)).collect();
            let out_of_date = self.options.always_make
                || entry.phony
                || (rule.double_colon && prereqs.is_empty())
                || prereq_remade.iter().any(|r| *r)
                || is_older_than(target_time, &prereq_times);
            if !out_of_date {
                log::debug!("{} is up to date", target);
                continue;
            }

            remade = true;
            if self.options.question {
                continue;
            }
            let mut newer: Vec<String> = Vec::new();
            for (prereq, (time, was_remade)) in prereqs.iter().zip(prereq_times.iter().zip(prereq_remade.iter())) {
                let is_newer = *was_remade || target_time.is_none() || is_older_than(target_time, &[*time]);
                if is_newer && !newer.contains(prereq) {
                    newer.push(prereq.clone());
                }
            }
            self.run_rule(target, rule, entry, &newer)?;
        }
        Ok(remade)
    }

    /// Run the recipe of `rule` in a scope holding the automatic and
    /// target-specific variables.
    fn run_rule(&mut self, target: &str, rule: &Rule, entry: &Target, newer: &[String]) -> Result<(), Error> {
        if rule.recipes.is_empty() {
            return Ok(());
        }
        self.symtable.push_layer();
        let result = self.run_rule_in_scope(target, rule, entry, newer);
        self.symtable.pop_layer();
        result
    }

    fn run_rule_in_scope(&mut self, target: &str, rule: &Rule, entry: &Target, newer: &[String]) -> Result<(), Error> {
        for a in &entry.target_vars {
            self.assign(a, None, true, Origin::File)?;
        }
        self.set_automatic_variables(target, &rule.prerequisites, newer);

        for recipe in &rule.recipes {
            let text = recipe.eval(self)?;
            for line in split_commands(&text) {
                self.run_command(target, recipe, &line)?;
            }
        }
        Ok(())
    }

    fn set_automatic_variables(&mut self, target: &str, prereqs: &[String], newer: &[String]) {
        let mut unique: Vec<&str> = Vec::new();
        for prereq in prereqs {
            if !unique.contains(&prereq.as_str()) {
                unique.push(prereq);
            }
        }
        let values = [
            ("@", target.to_string()),
            ("%", String::new()),
            ("<", prereqs.first().cloned().unwrap_or_default()),
            ("?", newer.join(" ")),
            ("^", unique.join(" ")),
            ("+", prereqs.join(" ")),
            ("*", String::new()),
        ];
        for (name, value) in values {
            let dirs: Vec<String> = value.split_whitespace().map(dir_part).collect();
            let files: Vec<String> = value.split_whitespace().map(file_part).collect();
            let table = &mut self.symtable;
            table.insert(Entry::simple(&format!("{}D", name), dirs.join(" "), Origin::Automatic), true);
            table.insert(Entry::simple(&format!("{}F", name), files.join(" "), Origin::Automatic), true);
            table.insert(Entry::simple(name, value, Origin::Automatic), true);
        }
    }

    /// Run one command line of a recipe, honouring the `@`, `-` and `+`
    /// prefixes.
    fn run_command(&mut self, target: &str, recipe: &Recipe, line: &str) -> Result<(), Error> {
        let mut silent = self.options.silent;
        let mut ignore_errors = false;
        let mut force = false;
        let mut command = line.trim_start();
        loop {
            match command.chars().next() {
                Some('@') => silent = true,
                Some('-') => ignore_errors = true,
                Some('+') => force = true,
                _ => break,
            }
            command = command[1..].trim_start();
        }

        if command.trim().is_empty() {
            return Ok(());
        }

        self.commands_run += 1;
        let dry_run = self.options.dry_run && !force;
        if !silent || dry_run {
            self.print(command);
        }
        if dry_run {
            return Ok(());
        }

        let (shell, flags) = self.shell_program()?;
        let env = self.shell_env()?;
        let capture = matches!(self.output, Output::Buffer(_));
        let output = ShellCommand::new(&shell, &flags)
            .env(env)
            .capture(capture)
            .run(command)?;
        if let Output::Buffer(buffer) = &mut self.output {
            buffer.push_str(&output.stdout);
        }

        if output.status != 0 {
            if ignore_errors {
                eprintln!(
                    "{}: [{}: {}] Error {} (ignored)",
                    PROGRAM_NAME, recipe.pos, target, output.status
                );
            } else {
                return Err(MakeError::new(
                    ErrorKind::RecipeFailed {
                        target: target.to_string(),
                        status: output.status,
                    },
                    Some(recipe.pos.clone()),
                )
                .into());
            }
        }
        Ok(())
    }
}

/// Split `NAME:FROM=TO` into its parts.
fn substitution_parts(name: &str) -> Option<(&str, &str, &str)> {
    let (var, rest) = name.split_once(':')?;
    let (from, to) = rest.split_once('=')?;
    Some((var, from, to))
}

/// Split an expanded recipe into the commands given to separate shells,
/// keeping backslash-continued lines together.
fn split_commands(text: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current = String::new();
    for line in text.split('\n') {
        current.push_str(line);
        if line.ends_with('\\') {
            current.push('\n');
            continue;
        }
        commands.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        commands.push(current);
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashset;

    fn context() -> Context {
        Context::with_captured_output(Options::default())
    }

    fn run(text: &str) -> (Result<i32, Error>, String) {
        let mut ctx = context();
        let result = ctx.execute(&Source::from_string(text), &[]);
        (result, ctx.captured_output().to_string())
    }

    fn run_goals(ctx: &mut Context, text: &str, goals: &[&str]) -> Result<i32, Error> {
        let goals: Vec<String> = goals.iter().map(|g| g.to_string()).collect();
        ctx.execute(&Source::from_string(text), &goals)
    }

    #[test]
    fn test_simple_assignment_and_expansion() {
        let (result, output) = run("CC:=gcc\n$(info CC=$(CC))\n@:;@:\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "CC=gcc\n");
    }

    #[test]
    fn test_append_to_simple() {
        let (result, output) = run("FOO:=foo\nFOO+=bar\n$(info FOO=$(FOO))\n@:;@:\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "FOO=foo bar\n");
    }

    #[test]
    fn test_append_to_recursive_stays_deferred() {
        let (_, output) = run("A = $(X)\nA += $(Y)\nX = 1\nY = 2\n$(info [$(A)] $(flavor A) $(value A))\n@:;@:\n");
        assert_eq!(output, "[1 2] recursive $(X) $(Y)\n");

        let (_, output) = run("E =\nE += x\n$(info [$(E)])\n@:;@:\n");
        assert_eq!(output, "[x]\n");
    }

    #[test]
    fn test_ifdef_on_empty_value() {
        let (result, output) = run("mixed-build:=\nifdef mixed-build\n$(error should not see this)\nendif\n@:;@:\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "");
    }

    #[test]
    fn test_ifeq_parsed_lazily() {
        let (result, output) =
            run("ifeq (10,11)\n    ifeq (a,a  # missing close paren)\n    endif\nendif\n@:;@:\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "");
    }

    #[test]
    fn test_else_ifeq_skipped_after_taken_branch() {
        let (result, output) = run("ifeq (1,1)\n$(info taken)\nelse ifeq (a,a\nendif\n@:;@:\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "taken\n");
    }

    #[test]
    fn test_reached_malformed_else_ifeq_fails() {
        let (result, _) = run("ifeq (1,2)\nelse ifeq (a,a\nendif\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::InvalidSyntaxInConditional));
    }

    #[test]
    fn test_taken_malformed_ifeq_fails() {
        let (result, _) = run("ifeq (1,1)\nifeq (a,a\nendif\nendif\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::InvalidSyntaxInConditional));
    }

    #[test]
    fn test_conditional_branches() {
        let (_, output) = run(
            "A = 1\nifeq ($(A),2)\nR = two\nelse ifeq ($(A),1)\nR = one\nelse\nR = other\nendif\n\
             ifndef NOPE\nN = undefined\nendif\n$(info $(R) $(N))\n@:;@:\n",
        );
        assert_eq!(output, "one undefined\n");
    }

    #[test]
    fn test_foreach_leaves_variable_undefined() {
        let mut ctx = context();
        ctx.read_makefile(&Source::from_string("$(info $(foreach var,a b c,$(var)))\n"))
            .unwrap();
        assert_eq!(ctx.captured_output(), "a b c\n");
        assert!(!ctx.symtable().is_defined("var"));
    }

    #[test]
    fn test_recursive_variable_detected() {
        let (result, _) = run("FOO=$(FOO)\n$(info $(FOO))\n@:;@:\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::RecursiveVariable));
        assert_eq!(
            err.to_string(),
            "...string:1: *** Recursive variable 'FOO' references itself (eventually). Stop."
        );
    }

    #[test]
    fn test_substitution_reference() {
        let (_, output) = run("SRC = main.c util.c\n$(info $(SRC:.c=.o) $(SRC:%.c=obj/%.o))\n@:;@:\n");
        assert_eq!(output, "main.o util.o obj/main.o obj/util.o\n");
    }

    #[test]
    fn test_conditional_and_immediate_assignment() {
        let (_, output) = run(
            "A ?= 1\nA ?= 2\nB = x\nC :::= $(B)$$\nB = y\n$(info $(A) $(C) $(value C) $(flavor C))\n@:;@:\n",
        );
        assert_eq!(output, "1 x$ x$$ recursive\n");
    }

    #[test]
    fn test_shell_assignment() {
        let (_, output) = run("X != echo hi; echo there\n$(info $(X) $(.SHELLSTATUS))\n@:;@:\n");
        assert_eq!(output, "hi there 0\n");
    }

    #[test]
    fn test_define() {
        let (_, output) = run(
            "X = world\ndefine GREETING\nhello\n\n# not a comment\n$(X)\nendef\n$(info $(GREETING))\n\
             define SIMPLE :=\n$(X)\nendef\nX = later\n$(info $(SIMPLE) $(flavor SIMPLE))\n@:;@:\n",
        );
        assert_eq!(output, "hello\n\n# not a comment\nworld\nworld simple\n");
    }

    #[test]
    fn test_define_inside_conditional() {
        let (_, output) = run(
            "ifeq (1,1)\ndefine BODY\nendif\nendef\nendif\n$(info [$(BODY)])\n@:;@:\n",
        );
        assert_eq!(output, "[endif]\n");
    }

    #[test]
    fn test_undefine() {
        let mut ctx = context();
        ctx.add_command_line("CMD=1").unwrap();
        ctx.read_makefile(&Source::from_string(
            "A = 1\nundefine A\nundefine CMD\n$(info [$(origin A)] $(CMD))\noverride undefine CMD\n$(info [$(CMD)])\n",
        ))
        .unwrap();
        assert_eq!(ctx.captured_output(), "[undefined] 1\n[]\n");
    }

    #[test]
    fn test_command_line_precedence() {
        let mut ctx = context();
        assert!(ctx.add_command_line("CC=clang").unwrap());
        assert!(!ctx.add_command_line("all").unwrap());
        ctx.read_makefile(&Source::from_string(
            "CC = gcc\nCC += -O2\n$(info $(CC) $(origin CC))\noverride LD = ld\nLD = gold\n$(info $(LD) $(origin LD))\n\
             override CC = tcc\n$(info $(CC) $(origin CC))\n",
        ))
        .unwrap();
        assert_eq!(
            ctx.captured_output(),
            "clang command line\nld override\ntcc override\n"
        );
    }

    #[test]
    fn test_builtin_variables() {
        let mut ctx = context();
        let goals = vec!["@".to_string()];
        ctx.execute(
            &Source::from_string(
                "$(info $(SHELL) $(.SHELLFLAGS) $(MAKEFILE_LIST) [$(MAKECMDGOALS)] $(origin SHELL))\n\
                 first: ; @:\n@:;@:\n$(info $(.DEFAULT_GOAL))\n",
            ),
            &goals,
        )
        .unwrap();
        assert_eq!(ctx.captured_output(), "/bin/sh -c ...string [@] default\nfirst\n");
        let names = ctx.symtable().names();
        for name in ["MAKE", "MAKE_VERSION", "CURDIR", ".VARIABLES"] {
            assert!(names.contains(name), "{} missing", name);
        }
    }

    #[test]
    fn test_missing_separator() {
        let (result, _) = run("\nX = foo\n$(X)\n");
        assert_eq!(
            result.unwrap_err().to_string(),
            "...string:3: *** missing separator. Stop."
        );
    }

    #[test]
    fn test_recipe_before_first_target() {
        let (result, _) = run("\techo hi\n");
        assert_eq!(
            result.unwrap_err().kind(),
            Some(&ErrorKind::RecipeCommencesBeforeFirstTarget)
        );
    }

    #[test]
    fn test_empty_variable_name() {
        let (result, _) = run("$(EMPTY) = 1\n");
        assert_eq!(result.unwrap_err().kind(), Some(&ErrorKind::EmptyVariableName));
    }

    #[test]
    fn test_missing_include() {
        let (result, _) = run("include /nonexistent/rmake.mk\n");
        assert_eq!(
            result.unwrap_err().to_string(),
            "...string:1: *** /nonexistent/rmake.mk: No such file or directory. Stop."
        );

        let (result, output) = run("-include /nonexistent/rmake.mk\nsinclude /nonexistent/other.mk\n@:;@:\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "");
    }

    #[test]
    fn test_include() {
        let path = std::env::temp_dir().join(format!("rmake-include-{}.mk", std::process::id()));
        std::fs::write(&path, "INCLUDED = yes\n").unwrap();
        let text = format!("include {}\n$(info $(INCLUDED) $(words $(MAKEFILE_LIST)))\n@:;@:\n", path.display());
        let (result, output) = run(&text);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "yes 2\n");
    }

    #[test]
    fn test_recipe_execution() {
        let (result, output) = run("all: dep\n\techo building $@ from $<\n\t@echo quiet\ndep:\n\t@echo dep\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "dep\necho building all from dep\nbuilding all from dep\nquiet\n");
    }

    #[test]
    fn test_automatic_variables() {
        let (_, output) = run(
            "out/prog: a b a\n\t@echo '$@|$(@D)|$(@F)|$<|$^|$+|$?'\na:\n\t@:\nb:\n\t@:\n",
        );
        assert_eq!(output, "out/prog|out|prog|a|a b|a b a|a b\n");
    }

    #[test]
    fn test_multi_line_recipe_variable() {
        let (_, output) = run(
            "define STEPS\n@echo one\n@echo two \\\n  three\nendef\nall:\n\t$(STEPS)\n",
        );
        assert_eq!(output, "one\ntwo three\n");
    }

    #[test]
    fn test_dry_run() {
        let mut ctx = Context::with_captured_output(Options {
            dry_run: true,
            ..Options::default()
        });
        let status = run_goals(&mut ctx, "all:\n\t@echo hidden\n\t+@echo forced\n", &[]).unwrap();
        assert_eq!(status, 0);
        assert_eq!(ctx.captured_output(), "echo hidden\nforced\n");
    }

    #[test]
    fn test_question_mode() {
        let mut ctx = Context::with_captured_output(Options {
            question: true,
            ..Options::default()
        });
        let status = run_goals(&mut ctx, "all:\n\techo never\n", &[]).unwrap();
        assert_eq!(status, EXIT_REBUILD);
        assert_eq!(ctx.captured_output(), "");

        let mut ctx = Context::with_captured_output(Options {
            question: true,
            ..Options::default()
        });
        let status = run_goals(&mut ctx, "Cargo.toml:\n\techo never\n", &[]).unwrap();
        assert_eq!(status, EXIT_SUCCESS);
    }

    #[test]
    fn test_silent_option() {
        let mut ctx = Context::with_captured_output(Options {
            silent: true,
            ..Options::default()
        });
        run_goals(&mut ctx, "all:\n\techo hi\n", &[]).unwrap();
        assert_eq!(ctx.captured_output(), "hi\n");
    }

    #[test]
    fn test_recipe_failure() {
        let (result, output) = run("all:\n\t@exit 3\n\t@echo unreachable\n");
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "make: *** [...string:2: all] Error 3");
        assert_eq!(err.exit_status(), 2);
        assert_eq!(output, "");

        let (result, output) = run("all:\n\t-@exit 3\n\t@echo reached\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "reached\n");
    }

    #[test]
    fn test_target_specific_variables() {
        let (_, output) = run(
            "CFLAGS = -O2\nall: prog\n\t@echo all $(CFLAGS)\nprog: CFLAGS += -g\nprog:\n\t@echo prog $(CFLAGS)\n",
        );
        assert_eq!(output, "prog -O2 -g\nall -O2\n");
    }

    #[test]
    fn test_exports_reach_recipes() {
        let (_, output) = run(
            "export EARLY\nEARLY = early\nexport LATE = late\nHIDDEN = hidden\nSELF = $(SELF)\nexport SELF\n\
             all:\n\t@echo $$EARLY $$LATE [$$HIDDEN] [$$SELF]\n",
        );
        assert_eq!(output, "early late [] []\n");
    }

    #[test]
    fn test_phony_and_up_to_date_messages() {
        let mut ctx = context();
        run_goals(&mut ctx, ".PHONY: all\nall:\nCargo.toml:\n\t@echo never\n", &["all", "Cargo.toml"]).unwrap();
        assert_eq!(
            ctx.captured_output(),
            "make: Nothing to be done for 'all'.\nmake: 'Cargo.toml' is up to date.\n"
        );
        assert!(ctx.rules().is_phony("all"));
    }

    #[test]
    fn test_no_rule() {
        let (result, _) = run("all: missing-file-for-rmake\n\t@:\n");
        assert_eq!(
            result.unwrap_err().to_string(),
            "make: *** No rule to make target 'missing-file-for-rmake', needed by 'all'. Stop."
        );

        let mut ctx = context();
        let err = run_goals(&mut ctx, "", &["nothing-here"]).unwrap_err();
        assert_eq!(err.to_string(), "make: *** No rule to make target 'nothing-here'. Stop.");

        let (result, _) = run("X = 1\n");
        assert_eq!(result.unwrap_err().to_string(), "make: *** No targets. Stop.");
    }

    #[test]
    fn test_circular_dependency_dropped() {
        let (result, output) = run("a: b\n\t@echo a\nb: a\n\t@echo b\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, "b\na\n");
    }

    #[test]
    fn test_double_colon_rules() {
        let (_, output) = run("log::\n\t@echo one\nlog::\n\t@echo two\n");
        assert_eq!(output, "one\ntwo\n");
    }

    #[test]
    fn test_overriding_recipe() {
        let (_, output) = run("all:\n\t@echo old\nall:\n\t@echo new\n");
        assert_eq!(output, "new\n");
    }

    #[test]
    fn test_recipe_lines_inside_conditional() {
        let (_, output) = run("all:\nifdef MISSING\n\t@echo no\nelse\n\t@echo yes\nendif\n");
        assert_eq!(output, "yes\n");
    }

    #[test]
    fn test_variables_listing() {
        let mut ctx = context();
        ctx.read_makefile(&Source::from_string("zzz_rmake = 1\nyyy_rmake = 2\n"))
            .unwrap();
        let listed: HashSet<String> = ctx
            .fetch(".VARIABLES", None)
            .unwrap()
            .split_whitespace()
            .filter(|n| n.ends_with("_rmake"))
            .map(String::from)
            .collect();
        assert_eq!(listed, hashset! {"yyy_rmake".to_string(), "zzz_rmake".to_string()});
    }

    #[test]
    fn test_split_commands() {
        assert_eq!(split_commands("a\nb"), vec!["a", "b"]);
        assert_eq!(split_commands("a \\\n b\nc"), vec!["a \\\n b", "c"]);
        assert_eq!(split_commands(""), vec![""]);
    }
}
