//! Input processing between parsing and mapping.
//!
//! Applies per-axis calibration, radial stick deadzones (pairing the X/Y
//! halves of each stick), the single-axis fallback for unpaired axes, and
//! a final emit hysteresis so downstream layers only see meaningful
//! movement.

use std::collections::HashMap;

use crate::events::{AxisId, InputEvent, TriggerId};
use crate::parsers::{MAX_AXES, MAX_TRIGGERS, TRIGGER_PRESS_THRESHOLD};

/// Post-processing change below which values are not re-emitted.
const EMIT_EPSILON: f32 = 0.001;

/// Default left-stick deadzone radius.
pub const DEFAULT_LS_DEADZONE: f32 = 0.2395;
/// Default right-stick deadzone radius.
pub const DEFAULT_RS_DEADZONE: f32 = 0.2652;
/// Default trigger deadzone.
pub const DEFAULT_TRIGGER_DEADZONE: f32 = 0.0;

/// Measured travel of one axis.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AxisCalibration {
    pub min: i16,
    pub max: i16,
    pub center: i16,
}

/// Deadzone radii.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadzoneConfig {
    pub left_stick: f32,
    pub right_stick: f32,
    pub trigger: f32,
}

impl Default for DeadzoneConfig {
    fn default() -> Self {
        Self {
            left_stick: DEFAULT_LS_DEADZONE,
            right_stick: DEFAULT_RS_DEADZONE,
            trigger: DEFAULT_TRIGGER_DEADZONE,
        }
    }
}

/// Stateful processor, one per session.
pub struct InputProcessor {
    calibration: HashMap<AxisId, AxisCalibration>,
    deadzones: DeadzoneConfig,
    /// Latest post-calibration values, kept for radial pairing.
    current: [f32; MAX_AXES],
    /// Last emitted post-deadzone values.
    emitted: [f32; MAX_AXES],
    emitted_triggers: [f32; MAX_TRIGGERS],
}

impl InputProcessor {
    pub fn new(deadzones: DeadzoneConfig) -> Self {
        Self {
            calibration: HashMap::new(),
            deadzones,
            current: [0.0; MAX_AXES],
            emitted: [0.0; MAX_AXES],
            emitted_triggers: [0.0; MAX_TRIGGERS],
        }
    }

    pub fn set_calibration(&mut self, axis: AxisId, calibration: AxisCalibration) {
        self.calibration.insert(axis, calibration);
    }

    /// Transforms one parsed event. `None` means the change did not
    /// survive deadzones or hysteresis.
    pub fn process(&mut self, event: InputEvent) -> Option<InputEvent> {
        match event {
            InputEvent::AxisMove {
                axis,
                normalized,
                raw,
                timestamp,
            } => {
                let calibrated = self.calibrate(axis, raw, normalized);
                let slot = axis.slot();
                self.current[slot] = calibrated;

                let value = match axis.stick_partner() {
                    Some(partner) => {
                        let deadzone = self.stick_deadzone(axis);
                        radial_deadzone(calibrated, self.current[partner.slot()], deadzone)
                    }
                    None => {
                        let deadzone = match axis {
                            AxisId::LTrigger | AxisId::RTrigger => self.deadzones.trigger,
                            _ => self.deadzones.left_stick,
                        };
                        axial_deadzone(calibrated, deadzone)
                    }
                };

                if (value - self.emitted[slot]).abs() <= EMIT_EPSILON {
                    return None;
                }
                self.emitted[slot] = value;
                Some(InputEvent::AxisMove {
                    axis,
                    normalized: value,
                    raw,
                    timestamp,
                })
            }
            InputEvent::TriggerMove {
                trigger,
                normalized,
                raw,
                timestamp,
                ..
            } => {
                let d = self.deadzones.trigger;
                let value = if normalized <= d {
                    0.0
                } else {
                    ((normalized - d) / (1.0 - d)).clamp(0.0, 1.0)
                };
                let slot = trigger.slot();
                if (value - self.emitted_triggers[slot]).abs() <= EMIT_EPSILON {
                    return None;
                }
                self.emitted_triggers[slot] = value;
                Some(InputEvent::TriggerMove {
                    trigger,
                    normalized: value,
                    raw,
                    is_pressed: value >= TRIGGER_PRESS_THRESHOLD,
                    timestamp,
                })
            }
            // Buttons, d-pad, and hat pass through untouched.
            other => Some(other),
        }
    }

    fn stick_deadzone(&self, axis: AxisId) -> f32 {
        match axis {
            AxisId::LStickX | AxisId::LStickY => self.deadzones.left_stick,
            _ => self.deadzones.right_stick,
        }
    }

    /// Maps raw travel into `[-1, 1]` around the calibrated center; passes
    /// the parser's normalization through when no calibration exists.
    fn calibrate(&self, axis: AxisId, raw: i16, normalized: f32) -> f32 {
        let Some(cal) = self.calibration.get(&axis) else {
            return normalized;
        };
        let raw = raw as f32;
        let center = cal.center as f32;
        let span = if raw >= center {
            cal.max as f32 - center
        } else {
            center - cal.min as f32
        };
        if span <= 0.0 {
            return normalized;
        }
        ((raw - center) / span).clamp(-1.0, 1.0)
    }
}

/// Radial deadzone over a stick pair. The boundary itself maps to zero.
fn radial_deadzone(value: f32, partner: f32, deadzone: f32) -> f32 {
    let magnitude = (value * value + partner * partner).sqrt();
    if magnitude <= deadzone {
        return 0.0;
    }
    let scale = (magnitude - deadzone) / (1.0 - deadzone) / magnitude;
    (value * scale).clamp(-1.0, 1.0)
}

/// Single-axis deadzone for axes without a pair.
fn axial_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() <= deadzone {
        return 0.0;
    }
    (value.signum() * (value.abs() - deadzone) / (1.0 - deadzone)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ButtonId, InputEvent};

    fn axis_event(axis: AxisId, normalized: f32, raw: i16) -> InputEvent {
        InputEvent::AxisMove {
            axis,
            normalized,
            raw,
            timestamp: 0,
        }
    }

    fn processed_value(result: Option<InputEvent>) -> f32 {
        match result {
            Some(InputEvent::AxisMove { normalized, .. }) => normalized,
            other => panic!("expected axis event, got {:?}", other),
        }
    }

    #[test]
    fn test_buttons_pass_through() {
        let mut p = InputProcessor::new(DeadzoneConfig::default());
        let event = InputEvent::ButtonPress {
            button: ButtonId::A,
            timestamp: 7,
        };
        assert_eq!(p.process(event), Some(event));
    }

    #[test]
    fn test_inside_radial_deadzone_is_silent() {
        let mut p = InputProcessor::new(DeadzoneConfig {
            left_stick: 0.24,
            ..DeadzoneConfig::default()
        });
        // LSX +2/127, LSY -8/127: magnitude well inside the radius.
        assert!(p.process(axis_event(AxisId::LStickX, 2.0 / 127.0, 2)).is_none());
        assert!(p.process(axis_event(AxisId::LStickY, -8.0 / 127.0, -8)).is_none());
    }

    #[test]
    fn test_full_deflection_reaches_one() {
        let mut p = InputProcessor::new(DeadzoneConfig {
            left_stick: 0.24,
            ..DeadzoneConfig::default()
        });
        let x = processed_value(p.process(axis_event(AxisId::LStickX, 1.0, 127)));
        assert!((x - 1.0).abs() < 1e-3);
        let y = processed_value(p.process(axis_event(AxisId::LStickY, -1.0, -128)));
        assert_eq!(y, -1.0);
    }

    #[test]
    fn test_boundary_value_yields_zero() {
        let mut p = InputProcessor::new(DeadzoneConfig {
            left_stick: 0.25,
            right_stick: 0.25,
            trigger: 0.1,
        });
        // Exactly on the radius.
        assert!(p.process(axis_event(AxisId::LStickX, 0.25, 32)).is_none());
        // Exactly on the trigger deadzone.
        let result = p.process(InputEvent::TriggerMove {
            trigger: TriggerId::Left,
            normalized: 0.1,
            raw: 25,
            is_pressed: true,
            timestamp: 0,
        });
        assert!(result.is_none());
    }

    #[test]
    fn test_rescale_is_continuous_past_deadzone() {
        let mut p = InputProcessor::new(DeadzoneConfig {
            left_stick: 0.2,
            ..DeadzoneConfig::default()
        });
        // Just past the boundary: small but nonzero... except hysteresis
        // swallows anything within 0.001 of the last emitted zero.
        let v = p.process(axis_event(AxisId::LStickX, 0.3, 38));
        let out = processed_value(v);
        let expected = (0.3 - 0.2) / (1.0 - 0.2);
        assert!((out - expected).abs() < 1e-4);
    }

    #[test]
    fn test_per_stick_deadzones() {
        let mut p = InputProcessor::new(DeadzoneConfig {
            left_stick: 0.9,
            right_stick: 0.1,
            trigger: 0.0,
        });
        assert!(p.process(axis_event(AxisId::LStickX, 0.5, 64)).is_none());
        assert!(p.process(axis_event(AxisId::RStickX, 0.5, 64)).is_some());
    }

    #[test]
    fn test_trigger_deadzone_and_press_recompute() {
        let mut p = InputProcessor::new(DeadzoneConfig {
            trigger: 0.5,
            ..DeadzoneConfig::default()
        });
        let result = p.process(InputEvent::TriggerMove {
            trigger: TriggerId::Right,
            normalized: 0.55,
            raw: 140,
            is_pressed: true,
            timestamp: 0,
        });
        match result {
            Some(InputEvent::TriggerMove {
                normalized,
                is_pressed,
                ..
            }) => {
                assert!((normalized - 0.1).abs() < 1e-4);
                assert!(is_pressed);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_hysteresis_suppresses_jitter() {
        let mut p = InputProcessor::new(DeadzoneConfig {
            left_stick: 0.0,
            right_stick: 0.0,
            trigger: 0.0,
        });
        assert!(p.process(axis_event(AxisId::LStickX, 0.5, 64)).is_some());
        // A sub-epsilon wiggle does not re-emit.
        assert!(p.process(axis_event(AxisId::LStickX, 0.5005, 64)).is_none());
        assert!(p.process(axis_event(AxisId::LStickX, 0.51, 65)).is_some());
    }

    #[test]
    fn test_calibration_recentres_raw_travel() {
        let mut p = InputProcessor::new(DeadzoneConfig {
            left_stick: 0.0,
            right_stick: 0.0,
            trigger: 0.0,
        });
        // A worn stick: center drifted to 1000, asymmetric travel.
        p.set_calibration(
            AxisId::LStickX,
            AxisCalibration {
                min: -30000,
                max: 31000,
                center: 1000,
            },
        );
        let v = processed_value(p.process(axis_event(AxisId::LStickX, 0.94, 31000)));
        assert_eq!(v, 1.0);

        let v = processed_value(p.process(axis_event(AxisId::LStickX, -0.91, -30000)));
        assert_eq!(v, -1.0);
    }

    #[test]
    fn test_single_axis_fallback_for_custom_axes() {
        let mut p = InputProcessor::new(DeadzoneConfig {
            left_stick: 0.5,
            right_stick: 0.5,
            trigger: 0.0,
        });
        assert!(p.process(axis_event(AxisId::Custom(0), 0.4, 51)).is_none());
        let v = processed_value(p.process(axis_event(AxisId::Custom(0), 0.75, 96)));
        assert!((v - 0.5).abs() < 1e-4);
    }
}
