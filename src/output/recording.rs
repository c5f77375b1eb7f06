//! Recording sink for tests.
//!
//! Cloneable handle over a shared event log so tests can inspect what the
//! synthesizer emitted while the pipeline owns the boxed sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::OutputError;
use crate::output::{InputSink, MouseButton};
use crate::profile::KeyModifier;

/// One observed output event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkEvent {
    KeyDown(u16, KeyModifier),
    KeyUp(u16, KeyModifier),
    MouseMoveAbs(i32, i32),
    MouseMoveRel(i32, i32),
    MouseButtonDown(MouseButton),
    MouseButtonUp(MouseButton),
    Scroll(i32, i32),
}

struct Shared {
    events: Mutex<Vec<SinkEvent>>,
    fail_with: Mutex<Option<OutputError>>,
    attempts: AtomicUsize,
}

/// The sink. Clones share the same log.
#[derive(Clone)]
pub struct RecordingSink {
    shared: Arc<Shared>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                events: Mutex::new(Vec::new()),
                fail_with: Mutex::new(None),
                attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.shared.events.lock().unwrap().clone()
    }

    /// Key events only, in order.
    pub fn key_events(&self) -> Vec<SinkEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, SinkEvent::KeyDown(..) | SinkEvent::KeyUp(..)))
            .collect()
    }

    pub fn clear(&self) {
        self.shared.events.lock().unwrap().clear();
    }

    /// Total sink calls, including failed ones.
    pub fn attempt_count(&self) -> usize {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Makes every subsequent call fail with `err`.
    pub fn fail_with(&self, err: OutputError) {
        *self.shared.fail_with.lock().unwrap() = Some(err);
    }

    pub fn clear_failure(&self) {
        *self.shared.fail_with.lock().unwrap() = None;
    }

    fn record(&self, event: SinkEvent) -> Result<(), OutputError> {
        self.shared.attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = *self.shared.fail_with.lock().unwrap() {
            return Err(err);
        }
        self.shared.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSink for RecordingSink {
    fn key_event(
        &mut self,
        key_code: u16,
        modifier: KeyModifier,
        pressed: bool,
    ) -> Result<(), OutputError> {
        self.record(if pressed {
            SinkEvent::KeyDown(key_code, modifier)
        } else {
            SinkEvent::KeyUp(key_code, modifier)
        })
    }

    fn mouse_move_abs(&mut self, x: i32, y: i32) -> Result<(), OutputError> {
        self.record(SinkEvent::MouseMoveAbs(x, y))
    }

    fn mouse_move_rel(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        self.record(SinkEvent::MouseMoveRel(dx, dy))
    }

    fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), OutputError> {
        self.record(if pressed {
            SinkEvent::MouseButtonDown(button)
        } else {
            SinkEvent::MouseButtonUp(button)
        })
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        self.record(SinkEvent::Scroll(dx, dy))
    }

    fn display_bounds(&self) -> (i32, i32, i32, i32) {
        (0, 0, 1280, 800)
    }
}
