//! Mapping engine: translates normalized input events into held keys.
//!
//! Profile identifiers are parsed once into a lookup cache, so per-event
//! dispatch never touches strings. The engine tracks which logical sources
//! (a button, one direction of an axis, a d-pad arm) currently hold their
//! key; the synthesizer's held-key set enforces the exactly-once pairing.
//!
//! Within one report, releases are flushed before presses so a rotating
//! chord never overlaps its modifiers.

use std::collections::HashMap;

use log::debug;
use smallvec::SmallVec;

use crate::events::{
    AxisId, ButtonId, DpadHorizontal, DpadVertical, InputEvent, TriggerId, HAT_NEUTRAL,
};
use crate::output::Synthesizer;
use crate::profile::{KeyModifier, Profile};

/// Normalized travel past which an axis or trigger drives its mapped key.
const AXIS_PRESS_THRESHOLD: f32 = 0.5;

/// A key/modifier pair as it is emitted.
type KeyChord = (u16, KeyModifier);

/// One logical press source. A source holds at most one key at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SourceKey {
    Button(ButtonId),
    AxisFull(AxisId),
    AxisPositive(AxisId),
    AxisNegative(AxisId),
    Trigger(TriggerId),
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
}

/// Identifier lookup tables derived from one profile.
///
/// A plain identifier like `LT` lands in every table it can drive: the
/// trigger-click button on pads that report it digitally and the analog
/// trigger elsewhere.
#[derive(Debug, Default)]
pub struct MappingCache {
    buttons: HashMap<ButtonId, KeyChord>,
    axes_full: HashMap<AxisId, KeyChord>,
    axes_positive: HashMap<AxisId, KeyChord>,
    axes_negative: HashMap<AxisId, KeyChord>,
    triggers: HashMap<TriggerId, KeyChord>,
    dpad: [Option<KeyChord>; 4],
}

impl MappingCache {
    /// Builds the cache from a validated profile. Unmapped entries
    /// (`key_code == 0`) and unknown identifiers contribute nothing.
    pub fn build(profile: &Profile) -> Self {
        let mut cache = Self::default();
        for mapping in &profile.button_mappings {
            if mapping.key_code == 0 {
                continue;
            }
            let chord = (mapping.key_code, mapping.modifier);
            let ident = mapping.button_identifier.as_str();

            match ident {
                "DPadUp" => {
                    cache.dpad[0] = Some(chord);
                    continue;
                }
                "DPadDown" => {
                    cache.dpad[1] = Some(chord);
                    continue;
                }
                "DPadLeft" => {
                    cache.dpad[2] = Some(chord);
                    continue;
                }
                "DPadRight" => {
                    cache.dpad[3] = Some(chord);
                    continue;
                }
                _ => {}
            }

            if let Some(stem) = ident.strip_suffix('+') {
                match AxisId::from_identifier(stem) {
                    Some(axis) => {
                        cache.axes_positive.insert(axis, chord);
                    }
                    None => debug!("ignoring unknown axis identifier `{}`", ident),
                }
                continue;
            }
            if let Some(stem) = ident.strip_suffix('-') {
                match AxisId::from_identifier(stem) {
                    Some(axis) => {
                        cache.axes_negative.insert(axis, chord);
                    }
                    None => debug!("ignoring unknown axis identifier `{}`", ident),
                }
                continue;
            }

            let mut known = false;
            if let Some(button) = ButtonId::from_identifier(ident) {
                cache.buttons.insert(button, chord);
                known = true;
            }
            if let Some(axis) = AxisId::from_identifier(ident) {
                cache.axes_full.insert(axis, chord);
                known = true;
            }
            if let Some(trigger) = TriggerId::from_identifier(ident) {
                cache.triggers.insert(trigger, chord);
                known = true;
            }
            if !known {
                debug!("ignoring unknown input identifier `{}`", ident);
            }
        }
        cache
    }

    fn lookup(&self, source: SourceKey) -> Option<KeyChord> {
        match source {
            SourceKey::Button(button) => self.buttons.get(&button).copied(),
            SourceKey::AxisFull(axis) => self.axes_full.get(&axis).copied(),
            SourceKey::AxisPositive(axis) => self.axes_positive.get(&axis).copied(),
            SourceKey::AxisNegative(axis) => self.axes_negative.get(&axis).copied(),
            SourceKey::Trigger(trigger) => self.triggers.get(&trigger).copied(),
            SourceKey::DpadUp => self.dpad[0],
            SourceKey::DpadDown => self.dpad[1],
            SourceKey::DpadLeft => self.dpad[2],
            SourceKey::DpadRight => self.dpad[3],
        }
    }
}

/// Per-session mapping engine.
pub struct MappingEngine {
    cache: MappingCache,
    /// Sources currently holding a key, with the chord they pressed.
    active: HashMap<SourceKey, KeyChord>,
    /// Sources to re-evaluate on the next report after a profile swap.
    repress: SmallVec<[SourceKey; 8]>,
    pending_press: SmallVec<[KeyChord; 8]>,
    pending_release: SmallVec<[KeyChord; 8]>,
}

impl MappingEngine {
    pub fn new(profile: &Profile) -> Self {
        Self {
            cache: MappingCache::build(profile),
            active: HashMap::new(),
            repress: SmallVec::new(),
            pending_press: SmallVec::new(),
            pending_release: SmallVec::new(),
        }
    }

    /// Swaps in a new profile: every held key is released, the cache is
    /// rebuilt, and still-active sources re-press their new binding on
    /// the next report.
    pub fn apply_profile(&mut self, profile: &Profile, synth: &mut Synthesizer) {
        synth.release_all();
        self.repress.clear();
        self.repress.extend(self.active.keys().copied());
        self.active.clear();
        self.pending_press.clear();
        self.pending_release.clear();
        self.cache = MappingCache::build(profile);
    }

    /// Releases everything this session holds. Used on teardown and
    /// detach.
    pub fn release_all(&mut self, synth: &mut Synthesizer) {
        synth.release_all();
        self.active.clear();
        self.repress.clear();
        self.pending_press.clear();
        self.pending_release.clear();
    }

    /// Processes the events of one parsed report and emits the resulting
    /// key transitions, releases first.
    pub fn process_report(
        &mut self,
        events: &[InputEvent],
        synth: &mut Synthesizer,
    ) {
        // Sources that stayed pressed across a profile swap produce their
        // new chord with the next report.
        let repress = std::mem::take(&mut self.repress);
        for source in repress {
            if let Some(chord) = self.cache.lookup(source) {
                self.active.insert(source, chord);
                self.pending_press.push(chord);
            }
        }

        for event in events {
            self.handle(event);
        }
        self.flush(synth);
    }

    fn handle(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::ButtonPress { button, .. } => {
                self.set_source(SourceKey::Button(button), true);
            }
            InputEvent::ButtonRelease { button, .. } => {
                self.set_source(SourceKey::Button(button), false);
            }
            InputEvent::AxisMove { axis, normalized, .. } => {
                self.set_source(
                    SourceKey::AxisFull(axis),
                    normalized.abs() > AXIS_PRESS_THRESHOLD,
                );
                self.set_source(
                    SourceKey::AxisPositive(axis),
                    normalized > AXIS_PRESS_THRESHOLD,
                );
                self.set_source(
                    SourceKey::AxisNegative(axis),
                    normalized < -AXIS_PRESS_THRESHOLD,
                );
            }
            InputEvent::TriggerMove {
                trigger, normalized, ..
            } => {
                self.set_source(
                    SourceKey::Trigger(trigger),
                    normalized > AXIS_PRESS_THRESHOLD,
                );
            }
            InputEvent::DPadMove {
                horizontal,
                vertical,
                ..
            } => {
                self.set_source(SourceKey::DpadUp, vertical == DpadVertical::Up);
                self.set_source(SourceKey::DpadDown, vertical == DpadVertical::Down);
                self.set_source(SourceKey::DpadLeft, horizontal == DpadHorizontal::Left);
                self.set_source(SourceKey::DpadRight, horizontal == DpadHorizontal::Right);
            }
            InputEvent::HatSwitch { angle_degrees, .. } => {
                let (up, right, down, left) = hat_directions(angle_degrees);
                self.set_source(SourceKey::DpadUp, up);
                self.set_source(SourceKey::DpadDown, down);
                self.set_source(SourceKey::DpadLeft, left);
                self.set_source(SourceKey::DpadRight, right);
            }
        }
    }

    fn set_source(&mut self, source: SourceKey, desired: bool) {
        let is_active = self.active.contains_key(&source);
        if desired && !is_active {
            if let Some(chord) = self.cache.lookup(source) {
                self.active.insert(source, chord);
                self.pending_press.push(chord);
            }
        } else if !desired && is_active {
            if let Some(chord) = self.active.remove(&source) {
                // A press queued earlier in this same report cancels out
                // instead of emitting an up/down glitch.
                if let Some(pos) = self.pending_press.iter().position(|p| *p == chord) {
                    self.pending_press.remove(pos);
                } else {
                    self.pending_release.push(chord);
                }
            }
        }
    }

    fn flush(&mut self, synth: &mut Synthesizer) {
        for (key_code, modifier) in self.pending_release.drain(..) {
            let _ = synth.key_up(key_code, modifier);
        }
        for (key_code, modifier) in self.pending_press.drain(..) {
            let _ = synth.key_down(key_code, modifier);
        }
    }
}

/// Expands a hat angle into the four d-pad arms. `HAT_NEUTRAL` (or any
/// out-of-range angle) presses nothing.
fn hat_directions(angle: u16) -> (bool, bool, bool, bool) {
    if angle == HAT_NEUTRAL || angle > 360 {
        return (false, false, false, false);
    }
    let up = angle >= 315 || angle <= 45;
    let right = (45..=135).contains(&angle);
    let down = (135..=225).contains(&angle);
    let left = (225..=315).contains(&angle);
    (up, right, down, left)
}
