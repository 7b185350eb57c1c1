//! Rules engine for the Stagehand event pipeline.
//!
//! A [`Ruleset`] is compiled once into a [`CompiledEngine`], which then
//! evaluates events against every enabled rule in declaration order and
//! returns the accumulated [`RenderAction`]s.
//!
//! # Failure model
//!
//! Compilation is total. A rule whose `textRegex` does not compile (bad
//! syntax, or over the compiled-size limit) becomes permanently inert: it is
//! kept in the engine but never matches. One bad rule cannot take the rest of
//! the ruleset down with it.
//!
//! # Cooldowns
//!
//! Cooldown state is owned by the engine and keyed by rule id. Recompiling
//! (i.e. replacing the ruleset) starts from a clean slate.

use regex::{Regex, RegexBuilder};
use stagehand_types::{AppEvent, EventKind, Platform, RenderAction, Rule, Ruleset, UserRole};
use std::collections::HashMap;

/// Compiled-program size cap for operator-supplied patterns.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// State of a rule's `textRegex` condition after compilation.
#[derive(Debug, Clone)]
enum PatternCondition {
    /// The rule has no regex condition.
    Absent,
    Compiled(Regex),
    /// The source failed to compile; the condition is always false.
    Inert,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    id: String,
    enabled: bool,
    cooldown_ms: i64,
    kind: EventKind,
    match_all: bool,
    platform: Option<Platform>,
    role: Option<UserRole>,
    /// Lower-cased needle for case-insensitive containment.
    includes: Option<String>,
    pattern: PatternCondition,
    actions: Vec<RenderAction>,
}

impl CompiledRule {
    fn compile(rule: &Rule) -> Self {
        let m = &rule.match_;
        let pattern = match &m.text_regex {
            None => PatternCondition::Absent,
            Some(source) => match RegexBuilder::new(source)
                .case_insensitive(true)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
            {
                Ok(re) => PatternCondition::Compiled(re),
                Err(e) => {
                    tracing::warn!(
                        rule_id = %rule.id,
                        error = %e,
                        "rule pattern does not compile; rule will never match"
                    );
                    PatternCondition::Inert
                }
            },
        };

        Self {
            id: rule.id.clone(),
            enabled: rule.enabled,
            cooldown_ms: rule
                .cooldown_ms
                .map(|c| i64::try_from(c).unwrap_or(i64::MAX))
                .unwrap_or(0),
            kind: m.kind,
            match_all: m.match_all.unwrap_or(false),
            platform: m.platform,
            role: m.user_has_role,
            includes: m.text_includes.as_ref().map(|s| s.to_lowercase()),
            pattern,
            actions: rule.actions.clone(),
        }
    }

    fn matches(&self, event: &AppEvent) -> bool {
        if self.platform.is_some_and(|p| p != event.platform()) {
            return false;
        }
        if self.match_all {
            return true;
        }
        if self.role.is_some_and(|r| !event.user().has_role(r)) {
            return false;
        }
        let text = event.text().unwrap_or("");
        if let Some(needle) = &self.includes {
            if !text.to_lowercase().contains(needle.as_str()) {
                return false;
            }
        }
        match &self.pattern {
            PatternCondition::Absent => true,
            PatternCondition::Compiled(re) => re.is_match(text),
            PatternCondition::Inert => false,
        }
    }
}

/// A ruleset compiled for evaluation, plus its cooldown bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct CompiledEngine {
    rules: Vec<CompiledRule>,
    /// Rule id -> earliest time (epoch ms) the rule may fire again.
    next_eligible: HashMap<String, i64>,
}

impl CompiledEngine {
    /// Compiles `ruleset`. Never fails; see the crate docs.
    pub fn compile(ruleset: &Ruleset) -> Self {
        let rules: Vec<CompiledRule> = ruleset.rules.iter().map(CompiledRule::compile).collect();
        tracing::debug!(rules = rules.len(), "compiled ruleset");
        Self {
            rules,
            next_eligible: HashMap::new(),
        }
    }

    /// Evaluates `event` at wall-clock time `now` (epoch ms).
    ///
    /// Actions from every matching rule are concatenated in rule order.
    pub fn evaluate(&mut self, event: &AppEvent, now: i64) -> Vec<RenderAction> {
        let mut out = Vec::new();
        for rule in &self.rules {
            if !rule.enabled {
                continue;
            }
            if self.next_eligible.get(&rule.id).is_some_and(|next| now < *next) {
                continue;
            }
            if rule.kind != event.kind() || !rule.matches(event) {
                continue;
            }
            out.extend(rule.actions.iter().cloned());
            if rule.cooldown_ms > 0 {
                self.next_eligible
                    .insert(rule.id.clone(), now.saturating_add(rule.cooldown_ms));
            }
        }
        out
    }

    /// Number of compiled rules, including disabled and inert ones.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Ids of rules whose pattern failed to compile.
    pub fn inert_rules(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|r| matches!(r.pattern, PatternCondition::Inert))
            .map(|r| r.id.as_str())
    }
}

#[cfg(test)]
mod tests;
