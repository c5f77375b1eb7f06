//! SendInput backend for Windows.
//!
//! Keys are posted by scancode with the extended-key flag where the
//! hardware would set it. Every injected event carries a marker in
//! `dwExtraInfo` so hooks can tell synthetic input from the real thing.

use windows::Win32::Foundation::GetLastError;
use windows::Win32::UI::Input::KeyboardAndMouse::*;
use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

use crate::error::OutputError;
use crate::output::{InputSink, MouseButton};
use crate::profile::KeyModifier;

/// Marker value identifying events injected by this process.
const INJECTED_EVENT_MARKER: usize = 0x4A4D;

/// ERROR_ACCESS_DENIED, raised when UIPI blocks the injection.
const ACCESS_DENIED: u32 = 5;

/// Scancodes of the modifier keys.
const SCAN_SHIFT: u16 = 0x2A;
const SCAN_CONTROL: u16 = 0x1D;
const SCAN_ALT: u16 = 0x38;
const SCAN_WIN: u16 = 0x5B;

pub struct SendInputSink;

impl SendInputSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendInputSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Scancodes that require `KEYEVENTF_EXTENDEDKEY`.
#[inline(always)]
fn is_extended_scancode(scancode: u16) -> bool {
    const EXTENDED_KEYS_BITMAP: u128 = (1u128 << 0x1D)
        | (1u128 << 0x38)
        | (1u128 << 0x47)
        | (1u128 << 0x48)
        | (1u128 << 0x49)
        | (1u128 << 0x4B)
        | (1u128 << 0x4D)
        | (1u128 << 0x4F)
        | (1u128 << 0x50)
        | (1u128 << 0x51)
        | (1u128 << 0x52)
        | (1u128 << 0x53)
        | (1u128 << 0x5B)
        | (1u128 << 0x5C);

    scancode < 128 && (EXTENDED_KEYS_BITMAP & (1u128 << scancode)) != 0
}

fn keyboard_input(scancode: u16, pressed: bool) -> INPUT {
    let mut flags = KEYEVENTF_SCANCODE;
    if is_extended_scancode(scancode) {
        flags |= KEYEVENTF_EXTENDEDKEY;
    }
    if !pressed {
        flags |= KEYEVENTF_KEYUP;
    }
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(0),
                wScan: scancode,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: INJECTED_EVENT_MARKER,
            },
        },
    }
}

fn mouse_input(dx: i32, dy: i32, data: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx,
                dy,
                mouseData: data as u32,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: INJECTED_EVENT_MARKER,
            },
        },
    }
}

fn modifier_scancode(modifier: KeyModifier) -> Option<u16> {
    match modifier {
        KeyModifier::None => None,
        KeyModifier::Shift => Some(SCAN_SHIFT),
        KeyModifier::Control => Some(SCAN_CONTROL),
        KeyModifier::Option => Some(SCAN_ALT),
        KeyModifier::Command => Some(SCAN_WIN),
    }
}

fn send(inputs: &[INPUT]) -> Result<(), OutputError> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent == inputs.len() as u32 {
        return Ok(());
    }
    let code = unsafe { GetLastError() }.0;
    if code == ACCESS_DENIED {
        Err(OutputError::PermissionDenied)
    } else {
        Err(OutputError::EventCreationFailed)
    }
}

impl InputSink for SendInputSink {
    fn key_event(
        &mut self,
        key_code: u16,
        modifier: KeyModifier,
        pressed: bool,
    ) -> Result<(), OutputError> {
        let mut inputs: smallvec::SmallVec<[INPUT; 2]> = smallvec::SmallVec::new();
        let modifier = modifier_scancode(modifier);
        if pressed {
            // Modifier leads the press and trails the release.
            if let Some(scan) = modifier {
                inputs.push(keyboard_input(scan, true));
            }
            inputs.push(keyboard_input(key_code, true));
        } else {
            inputs.push(keyboard_input(key_code, false));
            if let Some(scan) = modifier {
                inputs.push(keyboard_input(scan, false));
            }
        }
        send(&inputs)
    }

    fn mouse_move_abs(&mut self, x: i32, y: i32) -> Result<(), OutputError> {
        let width = unsafe { GetSystemMetrics(SM_CXSCREEN) }.max(1);
        let height = unsafe { GetSystemMetrics(SM_CYSCREEN) }.max(1);
        // Absolute coordinates are normalized onto a 0..65535 grid.
        let nx = x * 65535 / width;
        let ny = y * 65535 / height;
        send(&[mouse_input(
            nx,
            ny,
            0,
            MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE,
        )])
    }

    fn mouse_move_rel(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        send(&[mouse_input(dx, dy, 0, MOUSEEVENTF_MOVE)])
    }

    fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), OutputError> {
        let flags = match (button, pressed) {
            (MouseButton::Left, true) => MOUSEEVENTF_LEFTDOWN,
            (MouseButton::Left, false) => MOUSEEVENTF_LEFTUP,
            (MouseButton::Right, true) => MOUSEEVENTF_RIGHTDOWN,
            (MouseButton::Right, false) => MOUSEEVENTF_RIGHTUP,
            (MouseButton::Middle, true) => MOUSEEVENTF_MIDDLEDOWN,
            (MouseButton::Middle, false) => MOUSEEVENTF_MIDDLEUP,
        };
        send(&[mouse_input(0, 0, 0, flags)])
    }

    fn scroll(&mut self, dx: i32, dy: i32) -> Result<(), OutputError> {
        // One notch is 120 wheel units.
        if dy != 0 {
            send(&[mouse_input(0, 0, dy * 120, MOUSEEVENTF_WHEEL)])?;
        }
        if dx != 0 {
            send(&[mouse_input(0, 0, dx * 120, MOUSEEVENTF_HWHEEL)])?;
        }
        Ok(())
    }

    fn display_bounds(&self) -> (i32, i32, i32, i32) {
        let width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
        let height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
        (0, 0, width.max(1), height.max(1))
    }
}
