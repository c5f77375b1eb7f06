//! Runtime configuration.
//!
//! Loaded from a TOML file next to the binary (created with defaults on
//! first run). Values are clamped into safe ranges at load time rather
//! than rejected, so a hand-edited file cannot wedge the driver.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::events::AxisId;
use crate::manager::ManagerSettings;
use crate::processor::{
    AxisCalibration, DeadzoneConfig, DEFAULT_LS_DEADZONE, DEFAULT_RS_DEADZONE,
    DEFAULT_TRIGGER_DEADZONE,
};
use std::time::Duration;

/// Calibration row as it appears in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    /// Canonical axis identifier (`LSX`, `RSY`, ...).
    pub axis: String,
    pub min: i16,
    pub max: i16,
    pub center: i16,
}

/// Main application configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding profile files
    #[serde(default = "default_profile_dir")]
    pub profile_dir: String,
    /// Profile applied when no device-specific profile matches
    #[serde(default = "default_active_profile")]
    pub active_profile: String,
    /// Left stick deadzone radius (0.0 - 0.95)
    #[serde(default = "default_ls_deadzone")]
    pub ls_deadzone: f32,
    /// Right stick deadzone radius (0.0 - 0.95)
    #[serde(default = "default_rs_deadzone")]
    pub rs_deadzone: f32,
    /// Trigger deadzone (0.0 - 0.95); 0.05 is a sensible value for worn
    /// triggers
    #[serde(default = "default_trigger_deadzone")]
    pub trigger_deadzone: f32,
    /// Interrupt read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    /// Inactivity span that counts as one stall, in milliseconds
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout: u64,
    /// Watchdog check period in milliseconds
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval: u64,
    /// Consecutive stalls before a reconnect attempt
    #[serde(default = "default_max_stalls")]
    pub max_watchdog_stalls: u32,
    /// Scroll output multiplier
    #[serde(default = "default_scroll_sensitivity")]
    pub scroll_sensitivity: f32,
    /// Expose a virtual HID gamepad mirroring the physical one
    #[serde(default)]
    pub virtual_gamepad: bool,
    /// Per-axis calibration data
    #[serde(default)]
    pub calibrations: Vec<CalibrationEntry>,
}

fn default_profile_dir() -> String {
    "profiles".to_string()
}
fn default_active_profile() -> String {
    "default".to_string()
}
fn default_ls_deadzone() -> f32 {
    DEFAULT_LS_DEADZONE
}
fn default_rs_deadzone() -> f32 {
    DEFAULT_RS_DEADZONE
}
fn default_trigger_deadzone() -> f32 {
    DEFAULT_TRIGGER_DEADZONE
}
fn default_read_timeout() -> u64 {
    100
}
fn default_stall_timeout() -> u64 {
    5000
}
fn default_watchdog_interval() -> u64 {
    1000
}
fn default_max_stalls() -> u32 {
    3
}
fn default_scroll_sensitivity() -> f32 {
    1.0
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
            active_profile: default_active_profile(),
            ls_deadzone: default_ls_deadzone(),
            rs_deadzone: default_rs_deadzone(),
            trigger_deadzone: default_trigger_deadzone(),
            read_timeout: default_read_timeout(),
            stall_timeout: default_stall_timeout(),
            watchdog_interval: default_watchdog_interval(),
            max_watchdog_stalls: default_max_stalls(),
            scroll_sensitivity: default_scroll_sensitivity(),
            virtual_gamepad: false,
            calibrations: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from file, creating default if not found.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if !path.as_ref().exists() {
            let default_config = Self::default();
            default_config.save_to_file(&path)?;
            return Ok(default_config);
        }
        Self::load_from_file(path)
    }

    /// Loads configuration from a TOML file, clamping out-of-range values.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;

        config.ls_deadzone = config.ls_deadzone.clamp(0.0, 0.95);
        config.rs_deadzone = config.rs_deadzone.clamp(0.0, 0.95);
        config.trigger_deadzone = config.trigger_deadzone.clamp(0.0, 0.95);
        if config.read_timeout < 10 {
            config.read_timeout = 10;
        }
        if config.stall_timeout < 500 {
            config.stall_timeout = 500;
        }
        if config.watchdog_interval < 100 {
            config.watchdog_interval = 100;
        }
        if config.max_watchdog_stalls == 0 {
            config.max_watchdog_stalls = 1;
        }
        if config.scroll_sensitivity <= 0.0 {
            config.scroll_sensitivity = default_scroll_sensitivity();
        }

        // Calibration rows with unknown axis names are dropped here so the
        // hot path never revalidates them.
        config
            .calibrations
            .retain(|entry| AxisId::from_identifier(&entry.axis).is_some());

        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut content = String::from(
            "# joymap configuration\n\
             #\n\
             # Deadzones are normalized radii in [0, 0.95]. Timings are in\n\
             # milliseconds. Calibration rows are added by the `map` tooling\n\
             # and can be edited by hand:\n\
             #   [[calibrations]]\n\
             #   axis = \"LSX\"\n\
             #   min = -32000\n\
             #   max = 32000\n\
             #   center = 120\n\n",
        );
        content.push_str(&toml::to_string_pretty(self)?);
        fs::write(path, content)?;
        Ok(())
    }

    pub fn deadzones(&self) -> DeadzoneConfig {
        DeadzoneConfig {
            left_stick: self.ls_deadzone,
            right_stick: self.rs_deadzone,
            trigger: self.trigger_deadzone,
        }
    }

    /// Parsed calibration table for the input processor.
    pub fn calibration_table(&self) -> Vec<(AxisId, AxisCalibration)> {
        self.calibrations
            .iter()
            .filter_map(|entry| {
                AxisId::from_identifier(&entry.axis).map(|axis| {
                    (
                        axis,
                        AxisCalibration {
                            min: entry.min,
                            max: entry.max,
                            center: entry.center,
                        },
                    )
                })
            })
            .collect()
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            read_timeout: Duration::from_millis(self.read_timeout),
            stall_timeout: Duration::from_millis(self.stall_timeout),
            watchdog_interval: Duration::from_millis(self.watchdog_interval),
            max_watchdog_stalls: self.max_watchdog_stalls,
            deadzones: self.deadzones(),
            calibration: self.calibration_table(),
            scroll_sensitivity: self.scroll_sensitivity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn get_test_config_path(name: &str) -> PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let mut path = std::env::temp_dir();
        path.push(format!("joymap_test_{}_{}.toml", name, timestamp));
        path
    }

    fn cleanup_test_file(path: &PathBuf) {
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.active_profile, "default");
        assert_eq!(config.ls_deadzone, DEFAULT_LS_DEADZONE);
        assert_eq!(config.rs_deadzone, DEFAULT_RS_DEADZONE);
        assert_eq!(config.trigger_deadzone, 0.0);
        assert_eq!(config.stall_timeout, 5000);
        assert_eq!(config.max_watchdog_stalls, 3);
        assert!(!config.virtual_gamepad);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = get_test_config_path("round_trip");
        cleanup_test_file(&path);

        let mut config = AppConfig::default();
        config.active_profile = "shooter".to_string();
        config.ls_deadzone = 0.3;
        config.virtual_gamepad = true;
        config.calibrations.push(CalibrationEntry {
            axis: "LSX".to_string(),
            min: -32000,
            max: 32000,
            center: 150,
        });

        config.save_to_file(&path).expect("save failed");
        let loaded = AppConfig::load_from_file(&path).expect("load failed");

        assert_eq!(loaded.active_profile, "shooter");
        assert_eq!(loaded.ls_deadzone, 0.3);
        assert!(loaded.virtual_gamepad);
        assert_eq!(loaded.calibrations.len(), 1);
        assert_eq!(loaded.calibrations[0].center, 150);

        cleanup_test_file(&path);
    }

    #[test]
    fn test_load_or_create_missing_file() {
        let path = get_test_config_path("missing");
        cleanup_test_file(&path);

        let config = AppConfig::load_or_create(&path).expect("load_or_create failed");
        assert!(path.exists());
        assert_eq!(config.active_profile, "default");

        cleanup_test_file(&path);
    }

    #[test]
    fn test_validation_clamps_values() {
        let path = get_test_config_path("clamps");
        cleanup_test_file(&path);

        let content = r#"
            ls_deadzone = 2.5
            rs_deadzone = -1.0
            trigger_deadzone = 0.99
            read_timeout = 1
            stall_timeout = 10
            watchdog_interval = 5
            max_watchdog_stalls = 0
            scroll_sensitivity = -3.0
        "#;
        fs::write(&path, content).expect("write failed");

        let config = AppConfig::load_from_file(&path).expect("load failed");
        assert_eq!(config.ls_deadzone, 0.95);
        assert_eq!(config.rs_deadzone, 0.0);
        assert_eq!(config.trigger_deadzone, 0.95);
        assert_eq!(config.read_timeout, 10);
        assert_eq!(config.stall_timeout, 500);
        assert_eq!(config.watchdog_interval, 100);
        assert_eq!(config.max_watchdog_stalls, 1);
        assert_eq!(config.scroll_sensitivity, 1.0);

        cleanup_test_file(&path);
    }

    #[test]
    fn test_unknown_calibration_axis_is_dropped() {
        let path = get_test_config_path("bad_axis");
        cleanup_test_file(&path);

        let content = r#"
            [[calibrations]]
            axis = "LSX"
            min = -100
            max = 100
            center = 0

            [[calibrations]]
            axis = "Bogus"
            min = -100
            max = 100
            center = 0
        "#;
        fs::write(&path, content).expect("write failed");

        let config = AppConfig::load_from_file(&path).expect("load failed");
        assert_eq!(config.calibrations.len(), 1);
        let table = config.calibration_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].0, AxisId::LStickX);

        cleanup_test_file(&path);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let path = get_test_config_path("invalid");
        cleanup_test_file(&path);
        fs::write(&path, "not [[ toml").expect("write failed");
        assert!(AppConfig::load_from_file(&path).is_err());
        cleanup_test_file(&path);
    }

    #[test]
    fn test_manager_settings_conversion() {
        let mut config = AppConfig::default();
        config.read_timeout = 50;
        config.stall_timeout = 2000;
        config.calibrations.push(CalibrationEntry {
            axis: "RSY".to_string(),
            min: -30000,
            max: 30000,
            center: -250,
        });
        let settings = config.manager_settings();
        assert_eq!(settings.read_timeout, Duration::from_millis(50));
        assert_eq!(settings.stall_timeout, Duration::from_millis(2000));
        assert_eq!(settings.deadzones.left_stick, DEFAULT_LS_DEADZONE);
        // Calibration rows ride along into the per-session processors.
        assert_eq!(settings.calibration.len(), 1);
        assert_eq!(settings.calibration[0].0, AxisId::RStickY);
        assert_eq!(settings.calibration[0].1.center, -250);
    }
}
