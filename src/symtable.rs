//! Variable storage.
//!
//! The table is a stack of scopes. The bottom scope holds global variables;
//! `$(foreach)`, `$(call)` and target-specific variables push scopes on top
//! of it. Values are stored unexpanded where the assignment operator asks for
//! it; expansion itself lives in [`crate::eval::Context`].

use crate::ast::{DefineBlock, Expression};
use crate::source::Position;
use crate::syntax::expression_text;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Where a variable's value came from
pub enum Origin {
    /// Built in
    Default,
    /// Imported from the process environment
    Environment,
    /// Set by a makefile
    File,
    /// Set by a `NAME=VALUE` argument
    CommandLine,
    /// Set by an `override` assignment
    Override,
    /// An automatic or loop variable
    Automatic,
}

impl Origin {
    /// The word `$(origin)` reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Default => "default",
            Origin::Environment => "environment",
            Origin::File => "file",
            Origin::CommandLine => "command line",
            Origin::Override => "override",
            Origin::Automatic => "automatic",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Origin::Default => 0,
            Origin::Environment => 1,
            Origin::File => 2,
            Origin::CommandLine => 3,
            Origin::Override => 4,
            Origin::Automatic => 5,
        }
    }
}

#[derive(Clone)]
/// A stored value
pub enum Value {
    /// Already expanded
    Simple(String),
    /// Expanded on every reference
    Recursive(Rc<Expression>),
    /// A `define` body, expanded on every reference
    Define(Rc<DefineBlock>),
    /// Computed from the table on every reference, e.g. `.VARIABLES`
    Callback(fn(&SymbolTable) -> String),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Value::Simple(s) => f.debug_tuple("Simple").field(s).finish(),
            Value::Recursive(expr) => f.debug_tuple("Recursive").field(&expression_text(expr)).finish(),
            Value::Define(body) => f.debug_tuple("Define").field(&body.raw_lines()).finish(),
            Value::Callback(_) => f.write_str("Callback"),
        }
    }
}

impl Value {
    /// Is the value expanded when referenced?
    pub fn is_recursive(&self) -> bool {
        matches!(self, Value::Recursive(_) | Value::Define(_))
    }

    /// The value as written, without expanding it.
    fn raw(&self, table: &SymbolTable) -> String {
        match self {
            Value::Simple(s) => s.clone(),
            Value::Recursive(expr) => expression_text(expr),
            Value::Define(body) => body.raw_lines().join("\n"),
            Value::Callback(callback) => callback(table),
        }
    }
}

#[derive(Debug, Clone)]
/// A variable
pub struct Entry {
    /// The variable name
    pub name: String,
    /// The value
    pub value: Value,
    /// Values added by `+=` to a recursive variable
    pub appends: Vec<Value>,
    /// Where the value came from
    pub origin: Origin,
    /// Where it was assigned, if in a makefile
    pub pos: Option<Position>,
    /// `Some(true)` after `export NAME`, `Some(false)` after `unexport NAME`
    pub exported: Option<bool>,
    /// Passed to sub-makes even without `export`
    pub submake: bool,
    /// Never placed in a recipe's environment
    pub never_export: bool,
    depth: Rc<Cell<u32>>,
}

impl Entry {
    /// Create an entry with default export flags.
    pub fn new(name: &str, value: Value, origin: Origin, pos: Option<Position>) -> Self {
        Entry {
            name: name.to_string(),
            value,
            appends: Vec::new(),
            origin,
            pos,
            exported: None,
            submake: matches!(origin, Origin::Environment | Origin::CommandLine),
            never_export: origin == Origin::Automatic,
            depth: Rc::new(Cell::new(0)),
        }
    }

    /// An expanded value set by the program itself.
    pub fn simple(name: &str, value: impl Into<String>, origin: Origin) -> Self {
        Entry::new(name, Value::Simple(value.into()), origin, None)
    }

    /// Expansion depth counter used to catch self-reference.
    pub(crate) fn depth(&self) -> &Cell<u32> {
        &self.depth
    }

    /// `simple` or `recursive`, as reported by `$(flavor)`.
    pub fn flavor(&self) -> &'static str {
        if self.value.is_recursive() {
            "recursive"
        } else {
            "simple"
        }
    }

    fn is_exported(&self, export_all: bool) -> bool {
        if self.never_export || !valid_env_name(&self.name) {
            return false;
        }
        match self.exported {
            Some(exported) => exported,
            None => self.submake || export_all,
        }
    }
}

fn valid_env_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone)]
/// Scoped variable storage
pub struct SymbolTable {
    layers: Vec<HashMap<String, Entry>>,
    pending_exports: HashMap<String, bool>,
    export_all: bool,
    ignore_recursion: bool,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// An empty table with a single global scope.
    pub fn new() -> Self {
        SymbolTable {
            layers: vec![HashMap::new()],
            pending_exports: HashMap::new(),
            export_all: false,
            ignore_recursion: false,
        }
    }

    /// Find the innermost entry for `name`.
    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.layers.iter().rev().find_map(|layer| layer.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.layers.iter_mut().rev().find_map(|layer| layer.get_mut(name))
    }

    /// Is `name` defined in any scope?
    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Store an entry.
    ///
    /// A `local` entry goes into the innermost scope. Otherwise the entry
    /// replaces the innermost existing one, or becomes global if the name is
    /// new. Export flags of a replaced entry are kept.
    pub fn insert(&mut self, mut entry: Entry, local: bool) {
        log::debug!("set {} ({}) = {:?}", entry.name, entry.origin.as_str(), entry.value);
        if let Some(exported) = self.pending_exports.remove(&entry.name) {
            entry.exported = Some(exported);
        }

        let depth = if local {
            self.layers.len() - 1
        } else {
            self.layers
                .iter()
                .rposition(|layer| layer.contains_key(&entry.name))
                .unwrap_or(0)
        };
        let layer = &mut self.layers[depth];
        if let Some(old) = layer.get(&entry.name) {
            if entry.exported.is_none() {
                entry.exported = old.exported;
            }
            entry.submake |= old.submake;
        }
        layer.insert(entry.name.clone(), entry);
    }

    /// Remove the innermost entry for `name`. Returns false if there was none.
    pub fn remove(&mut self, name: &str) -> bool {
        for layer in self.layers.iter_mut().rev() {
            if layer.remove(name).is_some() {
                log::debug!("undefine {}", name);
                return true;
            }
        }
        false
    }

    /// Open a new innermost scope.
    pub fn push_layer(&mut self) {
        self.layers.push(HashMap::new());
    }

    /// Drop the innermost scope. The global scope is never dropped.
    pub fn pop_layer(&mut self) {
        if self.layers.len() > 1 {
            self.layers.pop();
        }
    }

    /// Can an assignment of the given origin replace the current value?
    ///
    /// Command-line values beat makefile values, and `override` beats both.
    pub fn may_assign(&self, name: &str, origin: Origin) -> bool {
        match self.lookup(name) {
            Some(entry) => origin.precedence() >= entry.origin.precedence(),
            None => true,
        }
    }

    /// The unexpanded value of `name`, appends included.
    pub fn raw_value(&self, name: &str) -> Option<String> {
        let entry = self.lookup(name)?;
        let mut raw = entry.value.raw(self);
        for append in &entry.appends {
            raw.push(' ');
            raw.push_str(&append.raw(self));
        }
        Some(raw)
    }

    /// `$(flavor NAME)`
    pub fn flavor(&self, name: &str) -> &'static str {
        self.lookup(name).map_or("undefined", Entry::flavor)
    }

    /// `$(origin NAME)`
    pub fn origin(&self, name: &str) -> &'static str {
        self.lookup(name).map_or("undefined", |entry| entry.origin.as_str())
    }

    /// Every defined name, sorted.
    pub fn names(&self) -> BTreeSet<String> {
        self.layers.iter().flat_map(|layer| layer.keys().cloned()).collect()
    }

    /// `export NAME`. A name that isn't defined yet is exported once it is.
    pub fn export(&mut self, name: &str) {
        self.set_exported(name, true);
    }

    /// `unexport NAME`
    pub fn unexport(&mut self, name: &str) {
        self.set_exported(name, false);
    }

    fn set_exported(&mut self, name: &str, exported: bool) {
        match self.lookup_mut(name) {
            Some(entry) => entry.exported = Some(exported),
            None => {
                self.pending_exports.insert(name.to_string(), exported);
            }
        }
    }

    /// A bare `export` or `unexport`.
    pub fn set_export_all(&mut self, export_all: bool) {
        self.export_all = export_all;
    }

    /// Names exported before they were defined.
    pub fn pending_exports(&self) -> BTreeSet<&str> {
        self.pending_exports
            .iter()
            .filter(|(_, exported)| **exported)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Names of the entries placed in a child process's environment.
    pub fn exported_names(&self) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|name| {
                self.lookup(name)
                    .is_some_and(|entry| entry.is_exported(self.export_all))
            })
            .collect()
    }

    /// While set, a self-referencing variable expands to nothing instead of
    /// failing.
    pub fn ignore_recursion(&self) -> bool {
        self.ignore_recursion
    }

    /// See [`SymbolTable::ignore_recursion`]. Returns the previous setting.
    pub fn set_ignore_recursion(&mut self, ignore: bool) -> bool {
        std::mem::replace(&mut self.ignore_recursion, ignore)
    }
}

/// Callback behind `.VARIABLES`.
pub(crate) fn variables_callback(table: &SymbolTable) -> String {
    table.names().into_iter().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreeset;

    fn simple(name: &str, value: &str) -> Entry {
        Entry::simple(name, value, Origin::File)
    }

    #[test]
    fn test_lookup_layers() {
        let mut table = SymbolTable::new();
        table.insert(simple("x", "global"), false);
        table.push_layer();
        table.insert(Entry::simple("x", "local", Origin::Automatic), true);
        assert_eq!(table.raw_value("x").as_deref(), Some("local"));
        assert_eq!(table.origin("x"), "automatic");
        table.pop_layer();
        assert_eq!(table.raw_value("x").as_deref(), Some("global"));

        // the global scope survives extra pops
        table.pop_layer();
        assert!(table.is_defined("x"));
    }

    #[test]
    fn test_non_local_insert_goes_global() {
        let mut table = SymbolTable::new();
        table.push_layer();
        table.insert(simple("y", "1"), false);
        table.pop_layer();
        assert_eq!(table.raw_value("y").as_deref(), Some("1"));
    }

    #[test]
    fn test_remove() {
        let mut table = SymbolTable::new();
        table.insert(simple("x", "1"), false);
        assert!(table.remove("x"));
        assert!(!table.remove("x"));
        assert_eq!(table.origin("x"), "undefined");
        assert_eq!(table.flavor("x"), "undefined");
    }

    #[test]
    fn test_precedence() {
        let mut table = SymbolTable::new();
        table.insert(Entry::simple("CC", "clang", Origin::CommandLine), false);
        assert!(!table.may_assign("CC", Origin::File));
        assert!(table.may_assign("CC", Origin::Override));
        assert!(table.may_assign("LD", Origin::File));

        table.insert(Entry::simple("HOME", "/root", Origin::Environment), false);
        assert!(table.may_assign("HOME", Origin::File));
    }

    #[test]
    fn test_exports() {
        let mut table = SymbolTable::new();
        table.insert(Entry::simple("PATH", "/bin", Origin::Environment), false);
        table.insert(simple("CFLAGS", "-O2"), false);
        table.insert(simple("weird-name", "x"), false);
        table.insert(Entry::simple("@", "all", Origin::Automatic), false);
        assert_eq!(table.exported_names(), vec!["PATH".to_string()]);

        table.export("CFLAGS");
        table.export("LATER");
        assert_eq!(table.pending_exports(), btreeset! {"LATER"});
        table.insert(simple("LATER", "1"), false);
        assert!(table.pending_exports().is_empty());
        assert_eq!(
            table.exported_names(),
            vec!["CFLAGS".to_string(), "LATER".to_string(), "PATH".to_string()]
        );

        table.unexport("PATH");
        table.insert(Entry::simple("PATH", "/usr/bin", Origin::File), false);
        assert_eq!(table.exported_names(), vec!["CFLAGS".to_string(), "LATER".to_string()]);

        table.set_export_all(true);
        table.export("PATH");
        assert_eq!(
            table.exported_names(),
            vec!["CFLAGS".to_string(), "LATER".to_string(), "PATH".to_string()]
        );
    }

    #[test]
    fn test_raw_value_with_appends() {
        let mut table = SymbolTable::new();
        let mut entry = simple("x", "a");
        entry.appends.push(Value::Simple("b".to_string()));
        table.insert(entry, false);
        assert_eq!(table.raw_value("x").as_deref(), Some("a b"));
    }

    #[test]
    fn test_variables_callback() {
        let mut table = SymbolTable::new();
        table.insert(simple("b", ""), false);
        table.insert(simple("a", ""), false);
        table.insert(Entry::new(".VARIABLES", Value::Callback(variables_callback), Origin::Default, None), false);
        assert_eq!(table.raw_value(".VARIABLES").as_deref(), Some(".VARIABLES a b"));
        assert_eq!(table.flavor(".VARIABLES"), "simple");
    }

    #[test]
    fn test_ignore_recursion_flag() {
        let mut table = SymbolTable::new();
        assert!(!table.set_ignore_recursion(true));
        assert!(table.ignore_recursion());
        assert!(table.set_ignore_recursion(false));
    }
}
