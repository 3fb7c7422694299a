//! JSON configuration loading (spec.md 6): parses the on-disk format with
//! `serde`/`serde_json`, then lowers each group into a `RuleSet` bound to a
//! keyboard selector. All validation happens here, at load time, so a
//! malformed file is rejected before any device is ever grabbed (spec.md 7).

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::key_catalog::KeyCatalog;
use crate::rules::{KeyMapping, MatchPredicate, Pattern, RuleSet, WindowPattern};

#[derive(Debug, Deserialize)]
struct RawGroup {
    keyboards: Option<Vec<String>>,
    #[serde(default)]
    mappings: Vec<RawMapping>,
}

#[derive(Debug, Deserialize)]
struct RawMapping {
    src: String,
    dst: String,
    #[serde(rename = "match")]
    match_all: Option<RawWindowPattern>,
    match_or: Option<RawWindowPattern>,
    match_not: Option<RawWindowPattern>,
    match_not_or: Option<RawWindowPattern>,
}

#[derive(Debug, Deserialize)]
struct RawWindowPattern {
    class: Option<String>,
    title: Option<String>,
}

/// Which physical keyboards a group's `RuleSet` applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyboardSelector {
    /// No `keyboards` key in the group: every keyboard with `EV_KEY`.
    All,
    /// An explicit, non-empty `keyboards` list: name/phys/path selectors.
    Named(Vec<String>),
}

/// One configuration group, lowered and validated.
#[derive(Debug, Clone)]
pub struct KeyboardGroup {
    pub selector: KeyboardSelector,
    pub rules: RuleSet,
}

/// Loads and validates the configuration file at `path`.
pub fn load(path: &Path) -> Result<Vec<KeyboardGroup>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse(&content).with_context(|| format!("invalid config file {}", path.display()))
}

/// Parses and lowers configuration content directly, without touching the
/// filesystem -- used by `load` and exercised directly by tests. The root of
/// the document is a bare JSON array of groups (spec.md 6), not an object
/// wrapping one.
pub fn parse(content: &str) -> Result<Vec<KeyboardGroup>> {
    let raw: Vec<RawGroup> = serde_json::from_str(content).context("malformed JSON")?;

    let mut groups = Vec::new();
    for (index, group) in raw.into_iter().enumerate() {
        if group.mappings.is_empty() {
            continue;
        }
        let selector = match group.keyboards {
            None => KeyboardSelector::All,
            Some(names) if names.is_empty() => continue,
            Some(names) => KeyboardSelector::Named(names),
        };

        let mut mappings = Vec::with_capacity(group.mappings.len());
        for (mapping_index, mapping) in group.mappings.into_iter().enumerate() {
            let key_mapping = lower_mapping(mapping).with_context(|| {
                format!("group {index}, mapping {mapping_index}")
            })?;
            mappings.push(key_mapping);
        }

        groups.push(KeyboardGroup {
            selector,
            rules: RuleSet::new(mappings),
        });
    }

    Ok(groups)
}

fn lower_mapping(raw: RawMapping) -> Result<KeyMapping> {
    let (src_modifiers, src_key) = KeyCatalog::parse_combo(&raw.src, true)
        .with_context(|| format!("invalid src combo '{}'", raw.src))?;
    let (dst_modifiers, dst_key) = KeyCatalog::parse_combo(&raw.dst, false)
        .with_context(|| format!("invalid dst combo '{}'", raw.dst))?;

    let predicate = lower_predicate(
        raw.match_all,
        raw.match_or,
        raw.match_not,
        raw.match_not_or,
    )?;

    KeyMapping::new(src_modifiers, src_key, dst_modifiers, dst_key, predicate)
}

fn lower_predicate(
    all: Option<RawWindowPattern>,
    any: Option<RawWindowPattern>,
    not_all: Option<RawWindowPattern>,
    not_any: Option<RawWindowPattern>,
) -> Result<MatchPredicate> {
    let present = [all.is_some(), any.is_some(), not_all.is_some(), not_any.is_some()]
        .iter()
        .filter(|p| **p)
        .count();
    if present > 1 {
        bail!("at most one of match/match_or/match_not/match_not_or may be set");
    }

    if let Some(p) = all {
        return Ok(MatchPredicate::All(lower_pattern(p)?));
    }
    if let Some(p) = any {
        return Ok(MatchPredicate::Any(lower_pattern(p)?));
    }
    if let Some(p) = not_all {
        return Ok(MatchPredicate::NotAll(lower_pattern(p)?));
    }
    if let Some(p) = not_any {
        return Ok(MatchPredicate::NotAny(lower_pattern(p)?));
    }
    Ok(MatchPredicate::None)
}

fn lower_pattern(raw: RawWindowPattern) -> Result<WindowPattern> {
    Ok(WindowPattern {
        class: raw
            .class
            .map(|p| Pattern::compile(&p))
            .transpose()
            .context("invalid class regex")?,
        title: raw
            .title
            .map(|p| Pattern::compile(&p))
            .transpose()
            .context("invalid title regex")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::Key;

    #[test]
    fn parses_minimal_group() {
        let groups = parse(
            r#"[
                { "mappings": [ { "src": "ctrl+i", "dst": "ctrl+a" } ] }
            ]"#,
        )
        .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].selector, KeyboardSelector::All);
        assert_eq!(groups[0].rules.rules().len(), 1);
        let mapping = &groups[0].rules.rules()[0];
        assert_eq!(mapping.src_key, crate::key_catalog::KeyCode::from_evdev(Key::KEY_I));
        assert_eq!(mapping.dst_key, crate::key_catalog::KeyCode::from_evdev(Key::KEY_A));
    }

    #[test]
    fn explicit_keyboards_list_is_named_selector() {
        let groups = parse(
            r#"[
                {
                    "keyboards": ["Logitech K120"],
                    "mappings": [ { "src": "ctrl+i", "dst": "ctrl+a" } ]
                }
            ]"#,
        )
        .unwrap();
        assert_eq!(
            groups[0].selector,
            KeyboardSelector::Named(vec!["Logitech K120".to_string()])
        );
    }

    #[test]
    fn empty_keyboards_list_skips_group() {
        let groups = parse(
            r#"[
                { "keyboards": [], "mappings": [ { "src": "ctrl+i", "dst": "ctrl+a" } ] }
            ]"#,
        )
        .unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn empty_mappings_skips_group() {
        let groups = parse(r#"[ { "mappings": [] } ]"#).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let groups = parse(
            r#"[
                {
                    "mappings": [
                        { "src": "ctrl+i", "dst": "ctrl+a", "unexpected": 42 }
                    ],
                    "unexpected_group_key": true
                }
            ]"#,
        )
        .unwrap();
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn match_predicate_lowers_to_all() {
        let groups = parse(
            r#"[
                {
                    "mappings": [
                        {
                            "src": "ctrl+i",
                            "dst": "ctrl+a",
                            "match": { "class": "firefox" }
                        }
                    ]
                }
            ]"#,
        )
        .unwrap();
        match &groups[0].rules.rules()[0].predicate {
            MatchPredicate::All(p) => assert!(p.class.is_some()),
            other => panic!("expected All predicate, got {other:?}"),
        }
    }

    #[test]
    fn rejects_multiple_match_kinds_on_one_mapping() {
        let result = parse(
            r#"[
                {
                    "mappings": [
                        {
                            "src": "ctrl+i",
                            "dst": "ctrl+a",
                            "match": { "class": "firefox" },
                            "match_or": { "class": "alacritty" }
                        }
                    ]
                }
            ]"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_src_combo() {
        let result = parse(
            r#"[
                { "mappings": [ { "src": "i", "dst": "ctrl+a" } ] }
            ]"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse("not json").is_err());
    }

    #[test]
    fn load_reads_and_parses_a_real_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("create temp config");
        write!(
            file,
            r#"[ {{ "mappings": [ {{ "src": "ctrl+i", "dst": "ctrl+a" }} ] }} ]"#
        )
        .expect("write temp config");

        let groups = load(file.path()).expect("load should succeed");
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn load_reports_missing_file() {
        let result = load(Path::new("/nonexistent/magickey.conf"));
        assert!(result.is_err());
    }

    #[test]
    fn parses_the_literal_example_from_the_config_format_reference() {
        let groups = parse(
            r#"[
                {
                    "keyboards": ["Logitech K120"],
                    "mappings": [
                        {
                            "src": "ctrl+i",
                            "dst": "ctrl+a",
                            "match": { "class": "firefox", "title": "Example Domain" }
                        },
                        { "src": "alt+j", "dst": "down" }
                    ]
                }
            ]"#,
        )
        .unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].selector,
            KeyboardSelector::Named(vec!["Logitech K120".to_string()])
        );
        assert_eq!(groups[0].rules.rules().len(), 2);
    }
}
