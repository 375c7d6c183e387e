//! The rule database.
//!
//! Rules are keyed by target name. Single-colon rules for the same target
//! merge into one rule; each double-colon rule stands on its own.

use crate::ast::{AssignmentExpression, Recipe};
use crate::error::{fail, warning_message, Error, ErrorKind};
use crate::source::Position;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::SystemTime;

/// Target whose prerequisites are always rebuilt.
pub const PHONY_TARGET: &str = ".PHONY";

#[derive(Debug, Clone)]
/// Prerequisites and recipe for one target
pub struct Rule {
    /// Prerequisites, in the order they were given
    pub prerequisites: Vec<String>,
    /// Recipe lines
    pub recipes: Vec<Rc<Recipe>>,
    /// Declared with `::`
    pub double_colon: bool,
    /// Position of the first rule line
    pub pos: Position,
    recipe_rule: Option<Position>,
}

impl Rule {
    fn new(double_colon: bool, pos: &Position) -> Self {
        Rule {
            prerequisites: Vec::new(),
            recipes: Vec::new(),
            double_colon,
            pos: pos.clone(),
            recipe_rule: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Everything known about one target
pub struct Target {
    /// One merged rule, or one rule per `::` line
    pub rules: Vec<Rule>,
    /// Listed as a prerequisite of `.PHONY`
    pub phony: bool,
    /// Target-specific assignments, in source order
    pub target_vars: Vec<Rc<AssignmentExpression>>,
}

impl Target {
    /// Prerequisites of every rule for this target, first mention kept.
    pub fn prerequisites(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for prereq in self.rules.iter().flat_map(|rule| rule.prerequisites.iter()) {
            if !seen.contains(&prereq.as_str()) {
                seen.push(prereq.as_str());
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Default)]
/// All rules read so far
pub struct RuleDb {
    targets: HashMap<String, Target>,
    default_goal: Option<String>,
}

fn is_goal_candidate(target: &str) -> bool {
    !target.contains('%') && (!target.starts_with('.') || target.contains('/'))
}

impl RuleDb {
    /// An empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rule line for `target`.
    ///
    /// Mixing `:` and `::` for the same target is an error.
    pub fn add_rule(&mut self, target: &str, prerequisites: &[String], double_colon: bool, pos: &Position) -> Result<(), Error> {
        log::debug!("rule {} {} {:?}", target, if double_colon { "::" } else { ":" }, prerequisites);
        if target == PHONY_TARGET {
            for prereq in prerequisites {
                self.targets.entry(prereq.clone()).or_default().phony = true;
            }
        }
        if self.default_goal.is_none() && is_goal_candidate(target) {
            self.default_goal = Some(target.to_string());
        }

        let entry = self.targets.entry(target.to_string()).or_default();
        if let Some(last) = entry.rules.last() {
            if last.double_colon != double_colon {
                return fail(
                    ErrorKind::Parse,
                    Some(pos),
                    format!("target file '{}' has both : and :: entries", target),
                );
            }
        }

        if double_colon || entry.rules.is_empty() {
            entry.rules.push(Rule::new(double_colon, pos));
        }
        if let Some(rule) = entry.rules.last_mut() {
            rule.prerequisites.extend(prerequisites.iter().cloned());
        }
        Ok(())
    }

    /// Attach a recipe line to `target`, which the rule at `rule_pos` opened.
    ///
    /// A single-colon target that already has a recipe from an earlier rule
    /// line drops the old recipe with a warning.
    pub fn add_recipe(&mut self, target: &str, recipe: Rc<Recipe>, rule_pos: &Position) {
        let Some(rule) = self.targets.get_mut(target).and_then(|t| t.rules.last_mut()) else {
            return;
        };
        if rule.recipe_rule.as_ref() != Some(rule_pos) {
            if let Some(old) = rule.recipes.first() {
                warning_message(Some(&recipe.pos), &format!("overriding recipe for target '{}'", target));
                warning_message(Some(&old.pos), &format!("ignoring old recipe for target '{}'", target));
                rule.recipes.clear();
            }
            rule.recipe_rule = Some(rule_pos.clone());
        }
        rule.recipes.push(recipe);
    }

    /// Record a target-specific assignment.
    pub fn add_target_var(&mut self, target: &str, assignment: Rc<AssignmentExpression>) {
        self.targets
            .entry(target.to_string())
            .or_default()
            .target_vars
            .push(assignment);
    }

    /// Look up a target.
    pub fn get(&self, target: &str) -> Option<&Target> {
        self.targets.get(target)
    }

    /// Does `target` have at least one rule?
    pub fn has_rule(&self, target: &str) -> bool {
        self.targets.get(target).is_some_and(|t| !t.rules.is_empty())
    }

    /// Is `target` phony?
    pub fn is_phony(&self, target: &str) -> bool {
        self.targets.get(target).is_some_and(|t| t.phony)
    }

    /// The first target of the first rule that isn't a special target.
    pub fn default_goal(&self) -> Option<&str> {
        self.default_goal.as_deref()
    }
}

/// Modification time of a file, or `None` if it doesn't exist.
pub fn mtime(path: &str) -> Option<SystemTime> {
    std::fs::metadata(Path::new(path)).and_then(|m| m.modified()).ok()
}

/// Is a file with modification time `target` older than any of `prerequisites`?
///
/// A missing target is always out of date.
pub fn is_older_than(target: Option<SystemTime>, prerequisites: &[Option<SystemTime>]) -> bool {
    match target {
        None => true,
        Some(target) => prerequisites.iter().flatten().any(|prereq| *prereq > target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;
    use std::time::Duration;

    fn pos(row: usize) -> Position {
        Position::new(Rc::from("Makefile"), row, 0)
    }

    fn recipe(row: usize) -> Rc<Recipe> {
        Rc::new(Recipe {
            expr: Expression::default(),
            pos: pos(row),
        })
    }

    fn strings(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_colon_rules_merge() {
        let mut db = RuleDb::new();
        db.add_rule("all", &strings(&["a", "b"]), false, &pos(0)).unwrap();
        db.add_rule("all", &strings(&["b", "c"]), false, &pos(1)).unwrap();
        let target = db.get("all").unwrap();
        assert_eq!(target.rules.len(), 1);
        assert_eq!(target.prerequisites(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_double_colon_rules_stay_apart() {
        let mut db = RuleDb::new();
        db.add_rule("log", &strings(&["a"]), true, &pos(0)).unwrap();
        db.add_rule("log", &strings(&["b"]), true, &pos(2)).unwrap();
        assert_eq!(db.get("log").unwrap().rules.len(), 2);
        assert_eq!(db.get("log").unwrap().prerequisites(), vec!["a", "b"]);

        let err = db.add_rule("log", &[], false, &pos(4)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Makefile:5: *** target file 'log' has both : and :: entries. Stop."
        );
    }

    #[test]
    fn test_recipe_override() {
        let mut db = RuleDb::new();
        db.add_rule("all", &[], false, &pos(0)).unwrap();
        db.add_recipe("all", recipe(1), &pos(0));
        db.add_recipe("all", recipe(2), &pos(0));
        assert_eq!(db.get("all").unwrap().rules[0].recipes.len(), 2);

        db.add_rule("all", &[], false, &pos(3)).unwrap();
        db.add_recipe("all", recipe(4), &pos(3));
        let recipes = &db.get("all").unwrap().rules[0].recipes;
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].pos, pos(4));
    }

    #[test]
    fn test_phony_and_default_goal() {
        let mut db = RuleDb::new();
        db.add_rule(".PHONY", &strings(&["clean", "all"]), false, &pos(0)).unwrap();
        db.add_rule("%.o", &strings(&["%.c"]), false, &pos(1)).unwrap();
        db.add_rule("all", &strings(&["prog"]), false, &pos(2)).unwrap();
        db.add_rule("clean", &[], false, &pos(3)).unwrap();
        assert_eq!(db.default_goal(), Some("all"));
        assert!(db.is_phony("clean"));
        assert!(!db.is_phony("prog"));
        assert!(db.has_rule("all"));
        assert!(!db.has_rule("prog"));
    }

    #[test]
    fn test_is_older_than() {
        let now = SystemTime::now();
        let earlier = now - Duration::from_secs(10);
        assert!(is_older_than(None, &[]));
        assert!(is_older_than(Some(earlier), &[Some(now)]));
        assert!(!is_older_than(Some(now), &[Some(earlier), None]));
    }

    #[test]
    fn test_mtime_of_missing_file() {
        assert_eq!(mtime("/nonexistent/file/for/rmake"), None);
        assert!(mtime("Cargo.toml").is_some());
    }
}
