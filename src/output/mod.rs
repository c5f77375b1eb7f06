//! Output synthesis.
//!
//! The mapping engine talks to a [`Synthesizer`], which owns the session's
//! held-key set and enforces the pairing contract: every `KeyDown` is
//! matched by exactly one `KeyUp`, including across teardown. Actual event
//! posting goes through an [`InputSink`] backend: `SendInput` on Windows,
//! a logging sink elsewhere, a recording sink in tests.

pub mod recording;
#[cfg(windows)]
pub mod windows;

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::OutputError;
use crate::profile::KeyModifier;

/// Hold time for a synthesized tap.
const TAP_HOLD: Duration = Duration::from_millis(16);
/// Clicks within this window and radius chain into multi-clicks.
const MULTI_CLICK_WINDOW: Duration = Duration::from_millis(500);
const MULTI_CLICK_RADIUS: i32 = 5;

/// Mouse buttons the synthesizer can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Backend contract: post one synthetic event into the host.
pub trait InputSink: Send {
    fn key_event(
        &mut self,
        key_code: u16,
        modifier: KeyModifier,
        pressed: bool,
    ) -> Result<(), OutputError>;
    fn mouse_move_abs(&mut self, x: i32, y: i32) -> Result<(), OutputError>;
    fn mouse_move_rel(&mut self, dx: i32, dy: i32) -> Result<(), OutputError>;
    fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), OutputError>;
    fn scroll(&mut self, dx: i32, dy: i32) -> Result<(), OutputError>;
    /// Primary display rectangle as `(x, y, width, height)`.
    fn display_bounds(&self) -> (i32, i32, i32, i32);
}

/// Fallback sink that only logs. Keeps the pipeline observable on
/// platforms without an injection backend wired in.
pub struct LogSink;

impl InputSink for LogSink {
    fn key_event(
        &mut self,
        key_code: u16,
        modifier: KeyModifier,
        pressed: bool,
    ) -> Result<(), OutputError> {
        debug!(
            "key {:#04x} {:?} {}",
            key_code,
            modifier,
            if pressed { "down" } else { "up" }
        );
        Ok(())
    }

    fn mouse_move_abs(&mut self, x: i32, y: i32) -> Result<(), OutputError> {
        debug!("mouse move to ({}, {})", x, y);
        Ok(())
    }

    fn mouse_move_rel(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        debug!("mouse move by ({}, {})", dx, dy);
        Ok(())
    }

    fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), OutputError> {
        debug!(
            "mouse {:?} {}",
            button,
            if pressed { "down" } else { "up" }
        );
        Ok(())
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        debug!("scroll ({}, {})", dx, dy);
        Ok(())
    }

    fn display_bounds(&self) -> (i32, i32, i32, i32) {
        (0, 0, 1920, 1080)
    }
}

/// Builds the default sink for this platform.
pub fn platform_sink() -> Box<dyn InputSink> {
    #[cfg(windows)]
    {
        Box::new(windows::SendInputSink::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(LogSink)
    }
}

/// Per-session output synthesizer.
pub struct Synthesizer {
    sink: Box<dyn InputSink>,
    held: HashSet<(u16, KeyModifier)>,
    scroll_sensitivity: f32,
    permission_denied: bool,
    cursor: (i32, i32),
    last_click: Option<(MouseButton, Instant, i32, i32)>,
    click_streak: u32,
}

impl Synthesizer {
    pub fn new(sink: Box<dyn InputSink>) -> Self {
        Self {
            sink,
            held: HashSet::new(),
            scroll_sensitivity: 1.0,
            permission_denied: false,
            cursor: (0, 0),
            last_click: None,
            click_streak: 0,
        }
    }

    pub fn set_scroll_sensitivity(&mut self, sensitivity: f32) {
        self.scroll_sensitivity = sensitivity.max(0.0);
    }

    /// Snapshot of the held-key set.
    pub fn held_keys(&self) -> Vec<(u16, KeyModifier)> {
        self.held.iter().copied().collect()
    }

    pub fn is_permission_denied(&self) -> bool {
        self.permission_denied
    }

    /// Clears the permission latch so the next call probes the host again.
    pub fn recheck_permissions(&mut self) {
        self.permission_denied = false;
    }

    /// Runs one sink call under the permission latch: after the first
    /// `permission_denied` the synthesizer logs once and every further
    /// output becomes a silent no-op until rechecked.
    fn guarded(
        &mut self,
        op: impl FnOnce(&mut dyn InputSink) -> Result<(), OutputError>,
    ) -> Result<(), OutputError> {
        if self.permission_denied {
            return Ok(());
        }
        match op(self.sink.as_mut()) {
            Err(OutputError::PermissionDenied) => {
                warn!("input injection denied by the host; suppressing further output");
                self.permission_denied = true;
                Ok(())
            }
            other => other,
        }
    }

    /// Presses a key. No-op when the pair is already held.
    pub fn key_down(&mut self, key_code: u16, modifier: KeyModifier) -> Result<(), OutputError> {
        if !self.held.insert((key_code, modifier)) {
            return Ok(());
        }
        self.guarded(|sink| sink.key_event(key_code, modifier, true))
    }

    /// Releases a key. No-op when the pair is not held.
    pub fn key_up(&mut self, key_code: u16, modifier: KeyModifier) -> Result<(), OutputError> {
        if !self.held.remove(&(key_code, modifier)) {
            return Ok(());
        }
        self.guarded(|sink| sink.key_event(key_code, modifier, false))
    }

    /// Press, hold briefly, release. The release runs on every exit path.
    pub fn tap(&mut self, key_code: u16, modifier: KeyModifier) -> Result<(), OutputError> {
        struct HeldGuard<'a> {
            synth: &'a mut Synthesizer,
            key_code: u16,
            modifier: KeyModifier,
        }
        impl Drop for HeldGuard<'_> {
            fn drop(&mut self) {
                let _ = self.synth.key_up(self.key_code, self.modifier);
            }
        }

        self.key_down(key_code, modifier)?;
        let guard = HeldGuard {
            synth: self,
            key_code,
            modifier,
        };
        thread::sleep(TAP_HOLD);
        drop(guard);
        Ok(())
    }

    /// Moves the cursor to an absolute position, clamped to the primary
    /// display.
    pub fn mouse_move_to(&mut self, x: i32, y: i32) -> Result<(), OutputError> {
        let (bx, by, bw, bh) = self.sink.display_bounds();
        let cx = x.clamp(bx, bx + bw - 1);
        let cy = y.clamp(by, by + bh - 1);
        self.cursor = (cx, cy);
        self.guarded(|sink| sink.mouse_move_abs(cx, cy))
    }

    /// Moves the cursor relatively; the resulting position stays inside
    /// the primary display.
    pub fn mouse_move_by(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        let (bx, by, bw, bh) = self.sink.display_bounds();
        let nx = (self.cursor.0 + dx).clamp(bx, bx + bw - 1);
        let ny = (self.cursor.1 + dy).clamp(by, by + bh - 1);
        let (cdx, cdy) = (nx - self.cursor.0, ny - self.cursor.1);
        self.cursor = (nx, ny);
        if cdx == 0 && cdy == 0 {
            return Ok(());
        }
        self.guarded(|sink| sink.mouse_move_rel(cdx, cdy))
    }

    pub fn cursor(&self) -> (i32, i32) {
        self.cursor
    }

    pub fn mouse_button_down(&mut self, button: MouseButton) -> Result<(), OutputError> {
        self.guarded(|sink| sink.mouse_button(button, true))
    }

    pub fn mouse_button_up(&mut self, button: MouseButton) -> Result<(), OutputError> {
        self.guarded(|sink| sink.mouse_button(button, false))
    }

    /// Performs `count` down/up pairs and returns the streak length:
    /// clicks landing within 500 ms and 5 px of the previous one continue
    /// the sequence (2 = double click).
    pub fn click(&mut self, button: MouseButton, count: u32) -> Result<u32, OutputError> {
        let now = Instant::now();
        let (cx, cy) = self.cursor;
        let chained = matches!(
            self.last_click,
            Some((prev, at, px, py))
                if prev == button
                    && now.duration_since(at) <= MULTI_CLICK_WINDOW
                    && (px - cx).abs() <= MULTI_CLICK_RADIUS
                    && (py - cy).abs() <= MULTI_CLICK_RADIUS
        );
        self.click_streak = if chained { self.click_streak + count } else { count };

        for _ in 0..count {
            self.mouse_button_down(button)?;
            self.mouse_button_up(button)?;
        }
        self.last_click = Some((button, Instant::now(), cx, cy));
        Ok(self.click_streak)
    }

    /// Scrolls with the configured sensitivity multiplier.
    pub fn scroll(&mut self, dx: f32, dy: f32) -> Result<(), OutputError> {
        let sx = (dx * self.scroll_sensitivity) as i32;
        let sy = (dy * self.scroll_sensitivity) as i32;
        if sx == 0 && sy == 0 {
            return Ok(());
        }
        self.guarded(|sink| sink.scroll(sx, sy))
    }

    /// Emits `KeyUp` for every held pair and clears the set.
    pub fn release_all(&mut self) {
        let held: Vec<(u16, KeyModifier)> = self.held.drain().collect();
        for (key_code, modifier) in held {
            let _ = self.guarded(|sink| sink.key_event(key_code, modifier, false));
        }
    }
}

impl Drop for Synthesizer {
    fn drop(&mut self) {
        // The held-key invariant survives unexpected teardown.
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::recording::{RecordingSink, SinkEvent};
    use super::*;

    fn recording_synth() -> (Synthesizer, RecordingSink) {
        let sink = RecordingSink::new();
        let synth = Synthesizer::new(Box::new(sink.clone()));
        (synth, sink)
    }

    #[test]
    fn test_key_down_up_pairing() {
        let (mut synth, sink) = recording_synth();
        synth.key_down(0x1E, KeyModifier::None).unwrap();
        synth.key_down(0x1E, KeyModifier::None).unwrap(); // no-op
        synth.key_up(0x1E, KeyModifier::None).unwrap();
        synth.key_up(0x1E, KeyModifier::None).unwrap(); // no-op
        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::KeyDown(0x1E, KeyModifier::None),
                SinkEvent::KeyUp(0x1E, KeyModifier::None),
            ]
        );
        assert!(synth.held_keys().is_empty());
    }

    #[test]
    fn test_same_key_different_modifier_is_distinct() {
        let (mut synth, _sink) = recording_synth();
        synth.key_down(0x1E, KeyModifier::None).unwrap();
        synth.key_down(0x1E, KeyModifier::Shift).unwrap();
        assert_eq!(synth.held_keys().len(), 2);
    }

    #[test]
    fn test_release_all_empties_held_set() {
        let (mut synth, sink) = recording_synth();
        synth.key_down(0x11, KeyModifier::None).unwrap();
        synth.key_down(0x1F, KeyModifier::Control).unwrap();
        synth.release_all();
        assert!(synth.held_keys().is_empty());
        let ups = sink
            .events()
            .iter()
            .filter(|e| matches!(e, SinkEvent::KeyUp(..)))
            .count();
        assert_eq!(ups, 2);
    }

    #[test]
    fn test_drop_releases_held_keys() {
        let sink = RecordingSink::new();
        {
            let mut synth = Synthesizer::new(Box::new(sink.clone()));
            synth.key_down(0x1E, KeyModifier::None).unwrap();
        }
        assert_eq!(
            sink.events().last(),
            Some(&SinkEvent::KeyUp(0x1E, KeyModifier::None))
        );
    }

    #[test]
    fn test_tap_emits_down_then_up() {
        let (mut synth, sink) = recording_synth();
        synth.tap(0x39, KeyModifier::None).unwrap();
        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::KeyDown(0x39, KeyModifier::None),
                SinkEvent::KeyUp(0x39, KeyModifier::None),
            ]
        );
        assert!(synth.held_keys().is_empty());
    }

    #[test]
    fn test_mouse_move_clamps_to_display() {
        let (mut synth, sink) = recording_synth();
        synth.mouse_move_to(5000, -50).unwrap();
        // Recording sink reports a 1280x800 display.
        assert_eq!(sink.events(), vec![SinkEvent::MouseMoveAbs(1279, 0)]);
        assert_eq!(synth.cursor(), (1279, 0));

        synth.mouse_move_by(50, -10).unwrap();
        // dx clamps to 0 at the right edge; dy clamps at the top.
        assert_eq!(synth.cursor(), (1279, 0));
    }

    #[test]
    fn test_relative_move_tracks_cursor() {
        let (mut synth, sink) = recording_synth();
        synth.mouse_move_to(100, 100).unwrap();
        synth.mouse_move_by(-30, 40).unwrap();
        assert_eq!(synth.cursor(), (70, 140));
        assert_eq!(
            sink.events().last(),
            Some(&SinkEvent::MouseMoveRel(-30, 40))
        );
    }

    #[test]
    fn test_click_streak_detection() {
        let (mut synth, _sink) = recording_synth();
        synth.mouse_move_to(200, 200).unwrap();
        assert_eq!(synth.click(MouseButton::Left, 1).unwrap(), 1);
        // Same spot, immediately after: a double click.
        assert_eq!(synth.click(MouseButton::Left, 1).unwrap(), 2);
        // Move beyond the 5 px radius: streak resets.
        synth.mouse_move_by(20, 0).unwrap();
        assert_eq!(synth.click(MouseButton::Left, 1).unwrap(), 1);
        // Different button: streak resets.
        assert_eq!(synth.click(MouseButton::Right, 1).unwrap(), 1);
    }

    #[test]
    fn test_scroll_sensitivity() {
        let (mut synth, sink) = recording_synth();
        synth.set_scroll_sensitivity(2.0);
        synth.scroll(0.0, 3.0).unwrap();
        assert_eq!(sink.events(), vec![SinkEvent::Scroll(0, 6)]);
    }

    #[test]
    fn test_permission_latch_suppresses_after_first_denial() {
        let (mut synth, sink) = recording_synth();
        sink.fail_with(OutputError::PermissionDenied);
        synth.key_down(0x1E, KeyModifier::None).unwrap();
        assert!(synth.is_permission_denied());
        // Subsequent outputs are swallowed without touching the sink.
        synth.key_down(0x1F, KeyModifier::None).unwrap();
        assert_eq!(sink.attempt_count(), 1);

        // After a recheck the sink is probed again.
        sink.clear_failure();
        synth.recheck_permissions();
        synth.key_down(0x20, KeyModifier::None).unwrap();
        assert_eq!(
            sink.events().last(),
            Some(&SinkEvent::KeyDown(0x20, KeyModifier::None))
        );
    }

    #[test]
    fn test_other_errors_propagate() {
        let (mut synth, sink) = recording_synth();
        sink.fail_with(OutputError::EventCreationFailed);
        let err = synth.key_down(0x1E, KeyModifier::None).unwrap_err();
        assert_eq!(err, OutputError::EventCreationFailed);
        assert!(!synth.is_permission_denied());
    }
}
