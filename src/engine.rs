//! The per-keyboard translation engine -- the heart of the system
//! (spec.md 4.D).
//!
//! The engine is pure: it takes one input event plus the rule set and
//! window snapshot that apply to it, and returns the events to write to the
//! virtual device. It performs no I/O and cannot fail, which is what keeps
//! `binding` (which does the actual device reads/writes) simple and keeps
//! the state machine itself trivially unit-testable.
//!
//! Dispatch is one handler function per `EngineState` variant (see the
//! REDESIGN FLAGS in spec.md 9) rather than a chain of conditionals on a
//! string tag, so the compiler flags a missing arm the moment a state is
//! added.

use std::time::Instant;

use log::warn;

use crate::key_catalog::{KeyCatalog, KeyCode};
use crate::rules::RuleSet;
use crate::window_context::Window;

/// One key transition as reported by the kernel: `Up` is a release, `Down`
/// a fresh press, `Hold` kernel autorepeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Up,
    Down,
    Hold,
}

impl KeyState {
    pub fn is_press(self) -> bool {
        matches!(self, KeyState::Down | KeyState::Hold)
    }
}

impl TryFrom<i32> for KeyState {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyState::Up),
            1 => Ok(KeyState::Down),
            2 => Ok(KeyState::Hold),
            _ => Err(()),
        }
    }
}

/// One event read from the physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Key(KeyCode, KeyState),
    /// Anything that is not `EV_KEY` (or an `EV_KEY` code that is neither a
    /// modifier nor referenced by any rule), forwarded verbatim.
    Other { type_: u16, code: u16, value: i32 },
}

/// One event to write to the virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    Key(KeyCode, KeyState),
    Syn,
    Other { type_: u16, code: u16, value: i32 },
}

/// A physically-held key tracked by the engine (spec.md 3 `ActiveKey`).
#[derive(Debug, Clone)]
struct ActiveKey {
    state: KeyState,
    first_pressed_at: Instant,
    press_count: u32,
    emitted: bool,
}

impl ActiveKey {
    fn new(state: KeyState, emitted: bool) -> Self {
        ActiveKey {
            state,
            first_pressed_at: Instant::now(),
            press_count: 1,
            emitted,
        }
    }
}

/// The per-chord outcome for one physically-held non-modifier trigger key,
/// tracked until that key is released. Supports the "overlap" case where a
/// second non-modifier key is pressed while an earlier one is still held.
#[derive(Debug, Clone)]
struct TriggerEntry {
    physical: KeyCode,
    dst_key: KeyCode,
    dst_modifiers: Vec<KeyCode>,
    /// true if a rule matched (engine was in MATCHED for this trigger),
    /// false if it passed through unmatched (UNMATCHED).
    matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    PreMatchInit,
    PreMatchPressedKey,
    PreMatchPressedModifier,
    Matched,
    Unmatched,
}

/// The per-keyboard chord state machine. See spec.md 3 (`EngineState`) and
/// 4.D for the full state chart.
pub struct Engine {
    keyboard_id: String,
    state: EngineState,
    active_modifiers: Vec<(KeyCode, ActiveKey)>,
    active_keys: Vec<(KeyCode, ActiveKey)>,
    /// Every modifier currently asserted DOWN on the virtual device, whether
    /// it got there by physical passthrough or purely because a matched
    /// rule's `dst_modifiers` needed it. A physically-held modifier is never
    /// force-released while still held (see `resolve_chord`), but once it is
    /// released and no open trigger's `dst_modifiers` still needs it, its
    /// entry here is what tells the modifier-release branch of
    /// `handle_matched_or_unmatched` that a virtual `UP` is owed.
    virtual_modifiers: Vec<KeyCode>,
    /// Currently-held non-modifier trigger keys, most recently resolved
    /// last, each carrying its own resolved destination.
    triggers: Vec<TriggerEntry>,
}

impl Engine {
    pub fn new(keyboard_id: impl Into<String>) -> Self {
        Engine {
            keyboard_id: keyboard_id.into(),
            state: EngineState::PreMatchInit,
            active_modifiers: Vec::new(),
            active_keys: Vec::new(),
            virtual_modifiers: Vec::new(),
            triggers: Vec::new(),
        }
    }

    /// True when the engine holds no chord state at all -- the only state
    /// in which `binding::ungrab` is permitted (spec.md 4.E).
    pub fn is_idle(&self) -> bool {
        self.state == EngineState::PreMatchInit
    }

    /// Processes one input event, returning the events to write.
    pub fn handle(&mut self, event: InputEvent, rules: &RuleSet, window: &Window) -> Vec<Emission> {
        match event {
            InputEvent::Other { type_, code, value } => {
                vec![Emission::Other { type_, code, value }, Emission::Syn]
            }
            InputEvent::Key(code, state) => match self.state {
                EngineState::PreMatchInit => self.handle_pre_match_init(code, state),
                EngineState::PreMatchPressedKey => self.handle_pre_match_pressed_key(code, state),
                EngineState::PreMatchPressedModifier => {
                    self.handle_pre_match_pressed_modifier(code, state, rules, window)
                }
                EngineState::Matched | EngineState::Unmatched => {
                    self.handle_matched_or_unmatched(code, state, rules, window)
                }
            },
        }
    }

    fn handle_pre_match_init(&mut self, code: KeyCode, state: KeyState) -> Vec<Emission> {
        if !state.is_press() {
            warn!(
                "{}: PRE_MATCH_INIT got unexpected key {code} {state:?}",
                self.keyboard_id
            );
            return Vec::new();
        }

        if KeyCatalog::is_modifier(code) {
            self.active_modifiers.push((code, ActiveKey::new(state, true)));
            self.virtual_modifiers.push(code);
            self.state = EngineState::PreMatchPressedModifier;
        } else {
            self.active_keys.push((code, ActiveKey::new(state, true)));
            self.state = EngineState::PreMatchPressedKey;
        }
        vec![Emission::Key(code, state), Emission::Syn]
    }

    fn handle_pre_match_pressed_key(&mut self, code: KeyCode, state: KeyState) -> Vec<Emission> {
        if KeyCatalog::is_modifier(code) {
            warn!(
                "{}: PRE_MATCH_PRESSED_KEY got unexpected modifier {code} {state:?}",
                self.keyboard_id
            );
            return Vec::new();
        }

        if state.is_press() {
            if let Some((_, active)) = self.active_keys.iter_mut().find(|(c, _)| *c == code) {
                active.state = state;
                active.press_count += 1;
            } else {
                self.active_keys.push((code, ActiveKey::new(state, true)));
            }
        } else {
            self.active_keys.retain(|(c, _)| *c != code);
            if self.active_keys.is_empty() {
                self.state = EngineState::PreMatchInit;
            }
        }
        vec![Emission::Key(code, state), Emission::Syn]
    }

    fn handle_pre_match_pressed_modifier(
        &mut self,
        code: KeyCode,
        state: KeyState,
        rules: &RuleSet,
        window: &Window,
    ) -> Vec<Emission> {
        if KeyCatalog::is_modifier(code) {
            if state.is_press() {
                if let Some((_, active)) = self.active_modifiers.iter_mut().find(|(c, _)| *c == code)
                {
                    active.state = state;
                    active.press_count += 1;
                } else {
                    self.active_modifiers.push((code, ActiveKey::new(state, true)));
                    if !self.virtual_modifiers.contains(&code) {
                        self.virtual_modifiers.push(code);
                    }
                }
                return vec![Emission::Key(code, state), Emission::Syn];
            }

            let had = self.active_modifiers.iter().any(|(c, _)| *c == code);
            self.active_modifiers.retain(|(c, _)| *c != code);
            if self.active_modifiers.is_empty() {
                self.state = EngineState::PreMatchInit;
            }
            return if had {
                self.virtual_modifiers.retain(|c| *c != code);
                vec![Emission::Key(code, state), Emission::Syn]
            } else {
                Vec::new()
            };
        }

        if !state.is_press() {
            warn!(
                "{}: PRE_MATCH_PRESSED_MODIFIER got unexpected key {code} {state:?}",
                self.keyboard_id
            );
            return Vec::new();
        }

        self.resolve_chord(code, state, rules, window)
    }

    fn handle_matched_or_unmatched(
        &mut self,
        code: KeyCode,
        state: KeyState,
        rules: &RuleSet,
        window: &Window,
    ) -> Vec<Emission> {
        if KeyCatalog::is_modifier(code) {
            if state.is_press() {
                // A modifier pressed after the chord already resolved is
                // tracked but not forwarded -- the virtual device already
                // holds whatever modifier set the last resolution decided.
                if let Some((_, active)) = self.active_modifiers.iter_mut().find(|(c, _)| *c == code)
                {
                    active.state = state;
                    active.press_count += 1;
                } else {
                    self.active_modifiers.push((code, ActiveKey::new(state, false)));
                }
                return Vec::new();
            }

            self.active_modifiers.retain(|(c, _)| *c != code);

            // Physical release of a modifier still asserted on the virtual
            // device: if no open trigger's destination still needs it, its
            // virtual DOWN is no longer wanted and must get its matching UP
            // now, rather than lingering until the engine returns to
            // PRE_MATCH_INIT.
            let still_needed = self.triggers.iter().any(|t| t.dst_modifiers.contains(&code));
            if still_needed || !self.virtual_modifiers.contains(&code) {
                return Vec::new();
            }
            self.virtual_modifiers.retain(|c| *c != code);
            return vec![Emission::Key(code, KeyState::Up), Emission::Syn];
        }

        if state.is_press() {
            if let Some(entry) = self.triggers.iter().find(|t| t.physical == code) {
                // Autorepeat (or a duplicate DOWN) of an already-resolved
                // trigger: forward as the resolved destination key, same
                // state.
                return vec![Emission::Key(entry.dst_key, state), Emission::Syn];
            }
            // A second, distinct non-modifier key pressed while an earlier
            // chord is still held: re-enter chord resolution (the overlap
            // case).
            return self.resolve_chord(code, state, rules, window);
        }

        // K UP: the terminating event for whichever trigger `code` was.
        let Some(pos) = self.triggers.iter().position(|t| t.physical == code) else {
            warn!(
                "{}: release of untracked trigger key {code}",
                self.keyboard_id
            );
            return Vec::new();
        };
        let entry = self.triggers.remove(pos);

        let mut out = vec![Emission::Key(entry.dst_key, KeyState::Up)];

        let still_needed: Vec<KeyCode> = self
            .triggers
            .iter()
            .flat_map(|t| t.dst_modifiers.iter().copied())
            .collect();
        let still_physically_held: Vec<KeyCode> =
            self.active_modifiers.iter().map(|(c, _)| *c).collect();
        self.virtual_modifiers.retain(|m| {
            if entry.dst_modifiers.contains(m)
                && !still_needed.contains(m)
                && !still_physically_held.contains(m)
            {
                out.push(Emission::Key(*m, KeyState::Up));
                false
            } else {
                true
            }
        });
        out.push(Emission::Syn);

        if self.triggers.is_empty() {
            self.state = if self.active_modifiers.is_empty() {
                EngineState::PreMatchInit
            } else {
                EngineState::PreMatchPressedModifier
            };
        } else {
            self.state = if self.triggers.last().unwrap().matched {
                EngineState::Matched
            } else {
                EngineState::Unmatched
            };
        }

        out
    }

    /// Chord resolution (spec.md 4.D): matches the currently-held modifiers
    /// plus `code` against the rule set, reconciles the virtual modifier
    /// set, and emits the destination key.
    ///
    /// Physically-held modifiers are never force-released here even when
    /// absent from the matched rule's `dst_modifiers` -- only modifiers
    /// added purely for synthesis are added and later removed by the
    /// engine. This is what makes the worked example in spec.md 8 (#4,
    /// holding `alt` across two `alt+j -> down` taps) come out as the
    /// "alt stays as part of dst" net output rather than flickering `alt`
    /// off and back on around every tap.
    fn resolve_chord(
        &mut self,
        code: KeyCode,
        triggering_state: KeyState,
        rules: &RuleSet,
        window: &Window,
    ) -> Vec<Emission> {
        let mods: Vec<KeyCode> = self.active_modifiers.iter().map(|(c, _)| *c).collect();
        let rule = rules.find_match(&mods, code, window);

        let (dst_modifiers, dst_key, matched) = match rule {
            Some(r) => (r.dst_modifiers.clone(), r.dst_key, true),
            None => (mods.clone(), code, false),
        };

        let mut out = Vec::new();

        for m in &dst_modifiers {
            if !self.virtual_modifiers.contains(m) {
                out.push(Emission::Key(*m, KeyState::Down));
                self.virtual_modifiers.push(*m);
            }
        }

        let still_needed: Vec<KeyCode> = self
            .triggers
            .iter()
            .flat_map(|t| t.dst_modifiers.iter().copied())
            .chain(dst_modifiers.iter().copied())
            .collect();
        self.virtual_modifiers.retain(|m| {
            if mods.contains(m) || still_needed.contains(m) {
                true
            } else {
                out.push(Emission::Key(*m, KeyState::Up));
                false
            }
        });

        if !out.is_empty() {
            out.push(Emission::Syn);
        }

        out.push(Emission::Key(dst_key, triggering_state));
        out.push(Emission::Syn);

        self.triggers.push(TriggerEntry {
            physical: code,
            dst_key,
            dst_modifiers,
            matched,
        });
        self.state = if matched {
            EngineState::Matched
        } else {
            EngineState::Unmatched
        };

        out
    }
}
