//! `KeyMapping` rules and the rule set matching function (spec.md 4.C).

use anyhow::{bail, Result};
use regex::Regex;

use crate::key_catalog::{KeyCatalog, KeyCode};
use crate::window_context::Window;

/// A compiled regex pattern used inside a `MatchPredicate`. Wraps `Regex` so
/// `MatchPredicate` can derive `Debug`/comparisons in tests without fighting
/// `Regex`'s lack of `PartialEq`.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn compile(src: &str) -> Result<Self> {
        Ok(Pattern(Regex::new(src)?))
    }

    fn is_match(&self, haystack: &str) -> bool {
        self.0.is_match(haystack)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}
impl Eq for Pattern {}

/// One `{class, title}` sub-match used by `MatchPredicate`'s variants.
/// Either half may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowPattern {
    pub class: Option<Pattern>,
    pub title: Option<Pattern>,
}

/// A window-context guard on a `KeyMapping`. At most one predicate per rule;
/// `None` (the rule has no `match*` key at all) behaves exactly like
/// `MatchPredicate::None` and matches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPredicate {
    /// No predicate: matches unconditionally.
    None,
    /// Both sub-patterns (when present) must match (AND). An absent
    /// sub-pattern contributes no constraint.
    All(WindowPattern),
    /// Either sub-pattern (when present) may match (OR). An absent
    /// sub-pattern contributes `false`.
    Any(WindowPattern),
    /// Negation of `All`: every individual pattern match is inverted before
    /// the AND combination.
    NotAll(WindowPattern),
    /// Negation of `Any`: every individual pattern match is inverted before
    /// the OR combination.
    NotAny(WindowPattern),
}

impl MatchPredicate {
    /// Evaluates this predicate against the current window snapshot per the
    /// rules in spec.md 4.C.
    pub fn matches(&self, window: &Window) -> bool {
        match self {
            MatchPredicate::None => true,
            MatchPredicate::All(p) => Self::eval_all(p, window, false),
            MatchPredicate::Any(p) => Self::eval_any(p, window, false),
            MatchPredicate::NotAll(p) => Self::eval_all(p, window, true),
            MatchPredicate::NotAny(p) => Self::eval_any(p, window, true),
        }
    }

    fn eval_all(p: &WindowPattern, window: &Window, invert: bool) -> bool {
        if p.class.is_none() && p.title.is_none() {
            return true;
        }
        let class_ok = match &p.class {
            Some(pat) => pat.is_match(&window.class) != invert,
            None => true,
        };
        let title_ok = match &p.title {
            Some(pat) => pat.is_match(&window.title) != invert,
            None => true,
        };
        class_ok && title_ok
    }

    fn eval_any(p: &WindowPattern, window: &Window, invert: bool) -> bool {
        if p.class.is_none() && p.title.is_none() {
            return true;
        }
        let class_ok = match &p.class {
            Some(pat) => pat.is_match(&window.class) != invert,
            None => false,
        };
        let title_ok = match &p.title {
            Some(pat) => pat.is_match(&window.title) != invert,
            None => false,
        };
        class_ok || title_ok
    }
}

/// One configured remapping: `src_modifiers + src_key -> dst_modifiers +
/// dst_key`, optionally guarded by a window predicate.
#[derive(Debug, Clone)]
pub struct KeyMapping {
    pub src_modifiers: Vec<KeyCode>,
    pub src_key: KeyCode,
    pub dst_modifiers: Vec<KeyCode>,
    pub dst_key: KeyCode,
    pub predicate: MatchPredicate,
}

impl KeyMapping {
    /// Builds and validates a mapping from parsed src/dst combos. Enforces
    /// the invariants of spec.md 3: `src_key`/`dst_key` are never modifiers
    /// (guaranteed already by `KeyCatalog::parse_combo`'s split), and
    /// `src_modifiers` is non-empty (also enforced by `parse_combo`'s
    /// `require_modifier`).
    pub fn new(
        src_modifiers: Vec<KeyCode>,
        src_key: KeyCode,
        dst_modifiers: Vec<KeyCode>,
        dst_key: KeyCode,
        predicate: MatchPredicate,
    ) -> Result<Self> {
        if src_modifiers.is_empty() {
            bail!("source combo must have at least one modifier");
        }
        if KeyCatalog::is_modifier(src_key) {
            bail!("source key must not itself be a modifier");
        }
        if KeyCatalog::is_modifier(dst_key) {
            bail!("destination key must not itself be a modifier");
        }
        Ok(KeyMapping {
            src_modifiers,
            src_key,
            dst_modifiers,
            dst_key,
            predicate,
        })
    }

    fn src_modifier_set_eq(&self, active: &[KeyCode]) -> bool {
        if self.src_modifiers.len() != active.len() {
            return false;
        }
        self.src_modifiers.iter().all(|m| active.contains(m))
    }
}

/// An ordered list of rules for one keyboard binding.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<KeyMapping>,
}

impl RuleSet {
    pub fn new(rules: Vec<KeyMapping>) -> Self {
        RuleSet { rules }
    }

    pub fn rules(&self) -> &[KeyMapping] {
        &self.rules
    }

    /// Every key code referenced anywhere in this rule set (source and
    /// destination, modifiers and triggers) -- used by device binding to
    /// size the virtual device's capability set (spec.md 4.E).
    pub fn referenced_codes(&self) -> Vec<KeyCode> {
        let mut codes = Vec::new();
        for rule in &self.rules {
            for m in &rule.src_modifiers {
                if !codes.contains(m) {
                    codes.push(*m);
                }
            }
            for m in &rule.dst_modifiers {
                if !codes.contains(m) {
                    codes.push(*m);
                }
            }
            if !codes.contains(&rule.src_key) {
                codes.push(rule.src_key);
            }
            if !codes.contains(&rule.dst_key) {
                codes.push(rule.dst_key);
            }
        }
        codes
    }

    /// Linear scan in declaration order; the first rule whose source chord
    /// and window predicate both match wins (spec.md 4.C).
    pub fn find_match(
        &self,
        active_modifiers: &[KeyCode],
        key: KeyCode,
        window: &Window,
    ) -> Option<&KeyMapping> {
        self.rules.iter().find(|rule| {
            rule.src_key == key
                && rule.src_modifier_set_eq(active_modifiers)
                && rule.predicate.matches(window)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::Key;

    fn code(key: Key) -> KeyCode {
        KeyCode::from_evdev(key)
    }

    fn ctrl_i_to_ctrl_a() -> KeyMapping {
        KeyMapping::new(
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_I),
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_A),
            MatchPredicate::None,
        )
        .unwrap()
    }

    #[test]
    fn first_match_wins_in_declaration_order() {
        let first = ctrl_i_to_ctrl_a();
        let second = KeyMapping::new(
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_I),
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_B),
            MatchPredicate::None,
        )
        .unwrap();
        let rule_set = RuleSet::new(vec![first, second]);

        let found = rule_set
            .find_match(&[code(Key::KEY_LEFTCTRL)], code(Key::KEY_I), &Window::default())
            .unwrap();
        assert_eq!(found.dst_key, code(Key::KEY_A));
    }

    #[test]
    fn predicate_disambiguates_identical_src_chords() {
        let firefox_rule = KeyMapping::new(
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_I),
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_B),
            MatchPredicate::All(WindowPattern {
                class: Some(Pattern::compile("firefox").unwrap()),
                title: None,
            }),
        )
        .unwrap();
        let default_rule = ctrl_i_to_ctrl_a();
        let rule_set = RuleSet::new(vec![firefox_rule, default_rule]);

        let firefox_window = Window::new("firefox", "");
        let found = rule_set
            .find_match(&[code(Key::KEY_LEFTCTRL)], code(Key::KEY_I), &firefox_window)
            .unwrap();
        assert_eq!(found.dst_key, code(Key::KEY_B));

        let other_window = Window::new("alacritty", "");
        let found = rule_set
            .find_match(&[code(Key::KEY_LEFTCTRL)], code(Key::KEY_I), &other_window)
            .unwrap();
        assert_eq!(found.dst_key, code(Key::KEY_A));
    }

    #[test]
    fn no_match_when_modifiers_differ() {
        let rule_set = RuleSet::new(vec![ctrl_i_to_ctrl_a()]);
        let active = [code(Key::KEY_LEFTCTRL), code(Key::KEY_LEFTSHIFT)];
        assert!(rule_set
            .find_match(&active, code(Key::KEY_I), &Window::default())
            .is_none());
    }

    #[test]
    fn empty_window_makes_predicates_vacuous() {
        let guarded = KeyMapping::new(
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_I),
            vec![],
            code(Key::KEY_A),
            MatchPredicate::All(WindowPattern::default()),
        )
        .unwrap();
        let rule_set = RuleSet::new(vec![guarded]);
        assert!(rule_set
            .find_match(&[code(Key::KEY_LEFTCTRL)], code(Key::KEY_I), &Window::default())
            .is_some());
    }

    #[test]
    fn not_all_inverts_before_and() {
        let rule = KeyMapping::new(
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_I),
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_A),
            MatchPredicate::NotAll(WindowPattern {
                class: Some(Pattern::compile("firefox").unwrap()),
                title: None,
            }),
        )
        .unwrap();
        let rule_set = RuleSet::new(vec![rule]);

        // Suppressed under firefox.
        let firefox = Window::new("firefox", "");
        assert!(rule_set
            .find_match(&[code(Key::KEY_LEFTCTRL)], code(Key::KEY_I), &firefox)
            .is_none());

        // Active elsewhere.
        let other = Window::new("alacritty", "");
        assert!(rule_set
            .find_match(&[code(Key::KEY_LEFTCTRL)], code(Key::KEY_I), &other)
            .is_some());
    }

    #[test]
    fn any_with_absent_subpattern_contributes_false() {
        let rule = KeyMapping::new(
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_I),
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_A),
            MatchPredicate::Any(WindowPattern {
                class: None,
                title: Some(Pattern::compile("Example").unwrap()),
            }),
        )
        .unwrap();
        let rule_set = RuleSet::new(vec![rule]);

        let matches_title = Window::new("anything", "Example Domain");
        assert!(rule_set
            .find_match(&[code(Key::KEY_LEFTCTRL)], code(Key::KEY_I), &matches_title)
            .is_some());

        let matches_neither = Window::new("anything", "Unrelated");
        assert!(rule_set
            .find_match(&[code(Key::KEY_LEFTCTRL)], code(Key::KEY_I), &matches_neither)
            .is_none());
    }

    #[test]
    fn referenced_codes_covers_src_and_dst() {
        let rule_set = RuleSet::new(vec![ctrl_i_to_ctrl_a()]);
        let codes = rule_set.referenced_codes();
        assert!(codes.contains(&code(Key::KEY_LEFTCTRL)));
        assert!(codes.contains(&code(Key::KEY_I)));
        assert!(codes.contains(&code(Key::KEY_A)));
    }

    #[test]
    fn new_rejects_modifier_as_src_key() {
        let result = KeyMapping::new(
            vec![code(Key::KEY_LEFTCTRL)],
            code(Key::KEY_LEFTSHIFT),
            vec![],
            code(Key::KEY_A),
            MatchPredicate::None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn new_rejects_empty_src_modifiers() {
        let result = KeyMapping::new(
            vec![],
            code(Key::KEY_I),
            vec![],
            code(Key::KEY_A),
            MatchPredicate::None,
        );
        assert!(result.is_err());
    }
}
