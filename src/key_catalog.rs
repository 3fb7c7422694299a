//! Bidirectional mapping between symbolic key names and evdev key codes.
//!
//! Two separate directions are exposed as distinct functions -- one parsing
//! names to codes, one formatting codes back to names -- rather than a
//! single type that tries to be both a string and a code.

use std::fmt;

use anyhow::{anyhow, bail, Result};
use evdev::Key;

/// A key code as reported by the host input subsystem (the evdev/uinput
/// `EV_KEY` code space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub fn from_evdev(key: Key) -> Self {
        KeyCode(key.code())
    }

    pub fn to_evdev(self) -> Key {
        Key::new(self.0)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", KeyCatalog::name_for_code(*self))
    }
}

/// Aliases for the fixed `{ctrl, shift, alt, meta, caps_lock}` modifier
/// families, left/right variants included. `caps_lock` has no left/right
/// split but is listed alongside the others so it can be referenced the
/// same way in a chord string.
const MODIFIER_ALIASES: &[(&str, Key)] = &[
    ("ctrl", Key::KEY_LEFTCTRL),
    ("left_ctrl", Key::KEY_LEFTCTRL),
    ("right_ctrl", Key::KEY_RIGHTCTRL),
    ("shift", Key::KEY_LEFTSHIFT),
    ("left_shift", Key::KEY_LEFTSHIFT),
    ("right_shift", Key::KEY_RIGHTSHIFT),
    ("alt", Key::KEY_LEFTALT),
    ("left_alt", Key::KEY_LEFTALT),
    ("right_alt", Key::KEY_RIGHTALT),
    ("meta", Key::KEY_LEFTMETA),
    ("left_meta", Key::KEY_LEFTMETA),
    ("right_meta", Key::KEY_RIGHTMETA),
    ("caps_lock", Key::KEY_CAPSLOCK),
];

/// The canonical modifier set: every key code that `is_modifier` returns
/// true for, independent of which alias (if any) a rule used to name it.
const MODIFIER_CODES: &[Key] = &[
    Key::KEY_LEFTCTRL,
    Key::KEY_RIGHTCTRL,
    Key::KEY_LEFTSHIFT,
    Key::KEY_RIGHTSHIFT,
    Key::KEY_LEFTALT,
    Key::KEY_RIGHTALT,
    Key::KEY_LEFTMETA,
    Key::KEY_RIGHTMETA,
    Key::KEY_CAPSLOCK,
];

/// Static key-name/key-code tables and modifier identification.
///
/// All methods are free functions over static tables; `KeyCatalog` carries
/// no state of its own and exists only as a namespace.
pub struct KeyCatalog;

impl KeyCatalog {
    /// Returns true iff `code` belongs to the fixed modifier set.
    pub fn is_modifier(code: KeyCode) -> bool {
        MODIFIER_CODES.iter().any(|k| k.code() == code.0)
    }

    /// Looks up a single key name (case-insensitive). Recognizes the
    /// modifier aliases first, then falls back to evdev's `KEY_<NAME>`
    /// table.
    pub fn code_for_name(name: &str) -> Result<KeyCode> {
        let lower = name.trim().to_ascii_lowercase();

        if let Some((_, key)) = MODIFIER_ALIASES.iter().find(|(alias, _)| *alias == lower) {
            return Ok(KeyCode::from_evdev(*key));
        }

        let evdev_name = format!("KEY_{}", lower.to_ascii_uppercase());
        evdev_key_by_name(&evdev_name)
            .map(KeyCode::from_evdev)
            .ok_or_else(|| anyhow!("unknown key name: {name}"))
    }

    /// Formats a key code back to a lowercase name for logging/display.
    /// Modifier codes format to their canonical (non-handed) alias, e.g.
    /// `KEY_LEFTCTRL` formats as `"ctrl"`.
    pub fn name_for_code(code: KeyCode) -> String {
        for (alias, key) in MODIFIER_ALIASES {
            if key.code() == code.0 && !alias.starts_with("left_") && !alias.starts_with("right_")
            {
                return (*alias).to_string();
            }
        }
        evdev_name_for_key(code.to_evdev())
            .map(|n| n.trim_start_matches("KEY_").to_ascii_lowercase())
            .unwrap_or_else(|| format!("code_{}", code.0))
    }

    /// Parses `"a+b+c"` into `(modifiers, non_modifier_key)`.
    ///
    /// Exactly one non-modifier key is required; duplicate modifiers and
    /// zero non-modifier keys are rejected. `require_modifier` enforces the
    /// additional "source combos require >= 1 modifier" rule from spec.md
    /// 4.A (destination combos may pass `false` to allow zero modifiers).
    pub fn parse_combo(
        combo: &str,
        require_modifier: bool,
    ) -> Result<(Vec<KeyCode>, KeyCode)> {
        let mut modifiers: Vec<KeyCode> = Vec::new();
        let mut non_modifier: Option<KeyCode> = None;

        for part in combo.split('+') {
            let part = part.trim();
            if part.is_empty() {
                bail!("empty key name in combo '{combo}'");
            }
            let code = Self::code_for_name(part)?;

            if Self::is_modifier(code) {
                if modifiers.contains(&code) {
                    bail!("duplicate modifier '{part}' in combo '{combo}'");
                }
                modifiers.push(code);
            } else {
                if non_modifier.is_some() {
                    bail!("combo '{combo}' has more than one non-modifier key");
                }
                non_modifier = Some(code);
            }
        }

        let key = non_modifier.ok_or_else(|| anyhow!("combo '{combo}' has no non-modifier key"))?;

        if require_modifier && modifiers.is_empty() {
            bail!("combo '{combo}' requires at least one modifier");
        }

        Ok((modifiers, key))
    }
}

/// The `KEY_*` name table, keyed by the bare uppercase suffix (`"A"`,
/// `"LEFTCTRL"`, `"F1"`, ...). Kept as an explicit closed table -- rather
/// than introspecting the `evdev::Key` debug representation -- so lookups
/// are correct by construction and don't depend on incidental formatting
/// behavior of the underlying crate.
const KEY_NAMES: &[(&str, Key)] = &[
    ("ESC", Key::KEY_ESC),
    ("1", Key::KEY_1),
    ("2", Key::KEY_2),
    ("3", Key::KEY_3),
    ("4", Key::KEY_4),
    ("5", Key::KEY_5),
    ("6", Key::KEY_6),
    ("7", Key::KEY_7),
    ("8", Key::KEY_8),
    ("9", Key::KEY_9),
    ("0", Key::KEY_0),
    ("MINUS", Key::KEY_MINUS),
    ("EQUAL", Key::KEY_EQUAL),
    ("BACKSPACE", Key::KEY_BACKSPACE),
    ("TAB", Key::KEY_TAB),
    ("Q", Key::KEY_Q),
    ("W", Key::KEY_W),
    ("E", Key::KEY_E),
    ("R", Key::KEY_R),
    ("T", Key::KEY_T),
    ("Y", Key::KEY_Y),
    ("U", Key::KEY_U),
    ("I", Key::KEY_I),
    ("O", Key::KEY_O),
    ("P", Key::KEY_P),
    ("LEFTBRACE", Key::KEY_LEFTBRACE),
    ("RIGHTBRACE", Key::KEY_RIGHTBRACE),
    ("ENTER", Key::KEY_ENTER),
    ("LEFTCTRL", Key::KEY_LEFTCTRL),
    ("A", Key::KEY_A),
    ("S", Key::KEY_S),
    ("D", Key::KEY_D),
    ("F", Key::KEY_F),
    ("G", Key::KEY_G),
    ("H", Key::KEY_H),
    ("J", Key::KEY_J),
    ("K", Key::KEY_K),
    ("L", Key::KEY_L),
    ("SEMICOLON", Key::KEY_SEMICOLON),
    ("APOSTROPHE", Key::KEY_APOSTROPHE),
    ("GRAVE", Key::KEY_GRAVE),
    ("LEFTSHIFT", Key::KEY_LEFTSHIFT),
    ("BACKSLASH", Key::KEY_BACKSLASH),
    ("Z", Key::KEY_Z),
    ("X", Key::KEY_X),
    ("C", Key::KEY_C),
    ("V", Key::KEY_V),
    ("B", Key::KEY_B),
    ("N", Key::KEY_N),
    ("M", Key::KEY_M),
    ("COMMA", Key::KEY_COMMA),
    ("DOT", Key::KEY_DOT),
    ("SLASH", Key::KEY_SLASH),
    ("RIGHTSHIFT", Key::KEY_RIGHTSHIFT),
    ("KPASTERISK", Key::KEY_KPASTERISK),
    ("LEFTALT", Key::KEY_LEFTALT),
    ("SPACE", Key::KEY_SPACE),
    ("CAPSLOCK", Key::KEY_CAPSLOCK),
    ("F1", Key::KEY_F1),
    ("F2", Key::KEY_F2),
    ("F3", Key::KEY_F3),
    ("F4", Key::KEY_F4),
    ("F5", Key::KEY_F5),
    ("F6", Key::KEY_F6),
    ("F7", Key::KEY_F7),
    ("F8", Key::KEY_F8),
    ("F9", Key::KEY_F9),
    ("F10", Key::KEY_F10),
    ("F11", Key::KEY_F11),
    ("F12", Key::KEY_F12),
    ("HOME", Key::KEY_HOME),
    ("UP", Key::KEY_UP),
    ("PAGEUP", Key::KEY_PAGEUP),
    ("LEFT", Key::KEY_LEFT),
    ("RIGHT", Key::KEY_RIGHT),
    ("END", Key::KEY_END),
    ("DOWN", Key::KEY_DOWN),
    ("PAGEDOWN", Key::KEY_PAGEDOWN),
    ("INSERT", Key::KEY_INSERT),
    ("DELETE", Key::KEY_DELETE),
    ("LEFTMETA", Key::KEY_LEFTMETA),
    ("RIGHTMETA", Key::KEY_RIGHTMETA),
    ("RIGHTCTRL", Key::KEY_RIGHTCTRL),
    ("RIGHTALT", Key::KEY_RIGHTALT),
    ("COMPOSE", Key::KEY_COMPOSE),
];

fn evdev_key_by_name(name: &str) -> Option<Key> {
    let suffix = name.trim_start_matches("KEY_");
    KEY_NAMES
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(suffix))
        .map(|(_, key)| *key)
}

fn evdev_name_for_key(key: Key) -> Option<String> {
    KEY_NAMES
        .iter()
        .find(|(_, candidate)| candidate.code() == key.code())
        .map(|(name, _)| format!("KEY_{name}"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_alias_is_modifier() {
        let code = KeyCatalog::code_for_name("ctrl").unwrap();
        assert!(KeyCatalog::is_modifier(code));
        assert_eq!(code, KeyCode::from_evdev(Key::KEY_LEFTCTRL));
    }

    #[test]
    fn right_shift_alias_resolves() {
        let code = KeyCatalog::code_for_name("right_shift").unwrap();
        assert_eq!(code, KeyCode::from_evdev(Key::KEY_RIGHTSHIFT));
    }

    #[test]
    fn plain_key_name_is_case_insensitive() {
        let lower = KeyCatalog::code_for_name("i").unwrap();
        let upper = KeyCatalog::code_for_name("I").unwrap();
        assert_eq!(lower, upper);
        assert!(!KeyCatalog::is_modifier(lower));
    }

    #[test]
    fn unknown_key_name_errors() {
        assert!(KeyCatalog::code_for_name("not_a_real_key").is_err());
    }

    #[test]
    fn parse_combo_splits_modifiers_and_key() {
        let (mods, key) = KeyCatalog::parse_combo("ctrl+i", true).unwrap();
        assert_eq!(mods, vec![KeyCode::from_evdev(Key::KEY_LEFTCTRL)]);
        assert_eq!(key, KeyCatalog::code_for_name("i").unwrap());
    }

    #[test]
    fn parse_combo_rejects_duplicate_modifiers() {
        assert!(KeyCatalog::parse_combo("ctrl+ctrl+i", true).is_err());
    }

    #[test]
    fn parse_combo_rejects_zero_non_modifiers() {
        assert!(KeyCatalog::parse_combo("ctrl+shift", true).is_err());
    }

    #[test]
    fn parse_combo_rejects_multiple_non_modifiers() {
        assert!(KeyCatalog::parse_combo("ctrl+i+j", true).is_err());
    }

    #[test]
    fn src_combo_requires_modifier() {
        assert!(KeyCatalog::parse_combo("i", true).is_err());
    }

    #[test]
    fn dst_combo_allows_zero_modifiers() {
        let (mods, key) = KeyCatalog::parse_combo("down", false).unwrap();
        assert!(mods.is_empty());
        assert!(!KeyCatalog::is_modifier(key));
    }

    #[test]
    fn name_for_code_round_trips_modifier_to_canonical_alias() {
        let code = KeyCatalog::code_for_name("left_ctrl").unwrap();
        assert_eq!(KeyCatalog::name_for_code(code), "ctrl");
    }
}
