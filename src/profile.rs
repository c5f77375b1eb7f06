//! Profiles: named sets of controller-input → key mappings.
//!
//! The core consumes profiles through the [`ProfileStore`] trait. A
//! TOML-backed store covers the CLI collaborator; an in-memory store backs
//! tests. Stored profiles round-trip exactly.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::device::DeviceIdentity;
use crate::error::ProfileError;

/// Current on-disk profile format version.
pub const PROFILE_VERSION: u32 = 1;

/// Modifier held together with the mapped key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyModifier {
    #[default]
    None,
    Command,
    Control,
    Option,
    Shift,
}

/// Binds one controller input identifier to a key. `key_code == 0` means
/// the input is deliberately unmapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonMapping {
    pub button_identifier: String,
    pub key_code: u16,
    #[serde(default)]
    pub modifier: KeyModifier,
}

impl ButtonMapping {
    pub fn new(identifier: &str, key_code: u16) -> Self {
        Self {
            button_identifier: identifier.to_string(),
            key_code,
            modifier: KeyModifier::None,
        }
    }
}

/// A named mapping set, optionally bound to one controller model.
///
/// Scalar fields precede the tables so the TOML serializer accepts the
/// declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub version: u32,
    /// `None` makes this a wildcard profile that matches any device.
    #[serde(default)]
    pub device_id: Option<DeviceIdentity>,
    pub button_mappings: Vec<ButtonMapping>,
}

impl Profile {
    /// The built-in fallback: WASD on the left stick, space on A, arrows
    /// on the d-pad. Scancodes are PC set 1; arrow keys are the extended
    /// variants.
    pub fn default_profile() -> Self {
        Self {
            name: "default".to_string(),
            device_id: None,
            button_mappings: vec![
                ButtonMapping::new("A", 0x39),    // space
                ButtonMapping::new("B", 0x2E),    // C
                ButtonMapping::new("X", 0x13),    // R
                ButtonMapping::new("Y", 0x0F),    // tab
                ButtonMapping::new("LSX+", 0x20), // D
                ButtonMapping::new("LSX-", 0x1E), // A
                ButtonMapping::new("LSY+", 0x1F), // S
                ButtonMapping::new("LSY-", 0x11), // W
                ButtonMapping::new("DPadUp", 0x48),
                ButtonMapping::new("DPadDown", 0x50),
                ButtonMapping::new("DPadLeft", 0x4B),
                ButtonMapping::new("DPadRight", 0x4D),
            ],
            version: PROFILE_VERSION,
        }
    }

    /// Checks invariants: identifiers unique, version understood.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.version > PROFILE_VERSION {
            return Err(ProfileError::UnsupportedVersion(self.version));
        }
        let mut seen = HashSet::new();
        for mapping in &self.button_mappings {
            if !seen.insert(mapping.button_identifier.as_str()) {
                return Err(ProfileError::InvalidMapping(format!(
                    "duplicate identifier `{}` in profile `{}`",
                    mapping.button_identifier, self.name
                )));
            }
        }
        Ok(())
    }

    /// True when this profile applies to `identity` (device match or
    /// wildcard).
    pub fn matches_device(&self, identity: &DeviceIdentity) -> bool {
        match &self.device_id {
            Some(bound) => bound == identity,
            None => true,
        }
    }

    /// True when the profile is bound to exactly this device model.
    pub fn is_device_specific(&self, identity: &DeviceIdentity) -> bool {
        matches!(&self.device_id, Some(bound) if bound == identity)
    }
}

/// Store contract consumed by the coordinator and the CLI.
pub trait ProfileStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<Profile>, ProfileError>;
    fn load(&self, name: &str) -> Result<Profile, ProfileError>;
    fn save(&self, profile: &Profile) -> Result<(), ProfileError>;
    fn delete(&self, name: &str) -> Result<(), ProfileError>;
    fn exists(&self, name: &str) -> Result<bool, ProfileError>;
    fn create_default(&self) -> Result<Profile, ProfileError>;
}

/// One TOML file per profile under a directory.
pub struct TomlProfileStore {
    dir: PathBuf,
}

impl TomlProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, ProfileError> {
        if name.is_empty()
            || name
                .chars()
                .any(|c| matches!(c, '/' | '\\' | '.' | ':') || c.is_control())
        {
            return Err(ProfileError::InvalidMapping(format!(
                "profile name `{}` is not a valid file stem",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.toml", name)))
    }
}

impl ProfileStore for TomlProfileStore {
    fn load_all(&self) -> Result<Vec<Profile>, ProfileError> {
        let mut profiles = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(profiles),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            profiles.push(self.load(stem)?);
        }
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    fn load(&self, name: &str) -> Result<Profile, ProfileError> {
        let path = self.path_for(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProfileError::NotFound(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let profile: Profile =
            toml::from_str(&content).map_err(|err| ProfileError::Corrupted(err.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    fn save(&self, profile: &Profile) -> Result<(), ProfileError> {
        profile.validate()?;
        let path = self.path_for(&profile.name)?;
        fs::create_dir_all(&self.dir)?;
        let content = toml::to_string_pretty(profile)
            .map_err(|err| ProfileError::Corrupted(err.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), ProfileError> {
        let path = self.path_for(name)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ProfileError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn exists(&self, name: &str) -> Result<bool, ProfileError> {
        Ok(self.path_for(name)?.exists())
    }

    fn create_default(&self) -> Result<Profile, ProfileError> {
        let profile = Profile::default_profile();
        if !self.exists(&profile.name)? {
            self.save(&profile)?;
        }
        self.load(&profile.name)
    }
}

/// In-memory store for tests and embedding.
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<String, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore for MemoryProfileStore {
    fn load_all(&self) -> Result<Vec<Profile>, ProfileError> {
        let mut profiles: Vec<Profile> = self.profiles.lock().unwrap().values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    fn load(&self, name: &str) -> Result<Profile, ProfileError> {
        self.profiles
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    fn save(&self, profile: &Profile) -> Result<(), ProfileError> {
        profile.validate()?;
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.name.clone(), profile.clone());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), ProfileError> {
        self.profiles
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> Result<bool, ProfileError> {
        Ok(self.profiles.lock().unwrap().contains_key(name))
    }

    fn create_default(&self) -> Result<Profile, ProfileError> {
        let profile = Profile::default_profile();
        if !self.exists(&profile.name)? {
            self.save(&profile)?;
        }
        self.load(&profile.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> TomlProfileStore {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let mut dir = std::env::temp_dir();
        dir.push(format!("joymap_profiles_{}_{}", name, timestamp));
        TomlProfileStore::new(dir)
    }

    fn sample_profile() -> Profile {
        Profile {
            name: "sample".to_string(),
            device_id: Some(DeviceIdentity::new(0x045E, 0x028E)),
            button_mappings: vec![
                ButtonMapping::new("A", 0x39),
                ButtonMapping {
                    button_identifier: "B".to_string(),
                    key_code: 0x2E,
                    modifier: KeyModifier::Shift,
                },
                ButtonMapping::new("LT", 0),
            ],
            version: PROFILE_VERSION,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = temp_store("round_trip");
        let profile = sample_profile();
        store.save(&profile).unwrap();
        let loaded = store.load("sample").unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let store = temp_store("missing");
        match store.load("nope") {
            Err(ProfileError::NotFound(name)) => assert_eq!(name, "nope"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_file() {
        let store = temp_store("corrupted");
        store.save(&sample_profile()).unwrap();
        let path = store.path_for("sample").unwrap();
        fs::write(&path, "not [[ valid toml").unwrap();
        assert!(matches!(
            store.load("sample"),
            Err(ProfileError::Corrupted(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let store = temp_store("version");
        let mut profile = sample_profile();
        profile.version = PROFILE_VERSION + 1;
        // Save rejects a version it does not understand...
        assert!(matches!(
            store.save(&profile),
            Err(ProfileError::UnsupportedVersion(_))
        ));
        // ...and a file written by a future build is rejected on load.
        fs::create_dir_all(&store.dir).unwrap();
        let content = toml::to_string(&profile).unwrap();
        fs::write(store.path_for("sample").unwrap(), content).unwrap();
        assert!(matches!(
            store.load("sample"),
            Err(ProfileError::UnsupportedVersion(v)) if v == PROFILE_VERSION + 1
        ));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let mut profile = sample_profile();
        profile
            .button_mappings
            .push(ButtonMapping::new("A", 0x10));
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_delete_and_exists() {
        let store = temp_store("delete");
        store.save(&sample_profile()).unwrap();
        assert!(store.exists("sample").unwrap());
        store.delete("sample").unwrap();
        assert!(!store.exists("sample").unwrap());
        assert!(matches!(
            store.delete("sample"),
            Err(ProfileError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_all_sorted() {
        let store = temp_store("load_all");
        for name in ["zeta", "alpha", "mid"] {
            let mut profile = sample_profile();
            profile.name = name.to_string();
            store.save(&profile).unwrap();
        }
        let names: Vec<String> = store
            .load_all()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_create_default_is_idempotent() {
        let store = temp_store("default");
        let first = store.create_default().unwrap();
        assert_eq!(first.name, "default");
        assert!(first.device_id.is_none());

        // A customized default must survive a second create_default.
        let mut custom = first.clone();
        custom.button_mappings[0].key_code = 0x01;
        store.save(&custom).unwrap();
        let second = store.create_default().unwrap();
        assert_eq!(second.button_mappings[0].key_code, 0x01);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let store = temp_store("traversal");
        assert!(store.path_for("../evil").is_err());
        assert!(store.path_for("a/b").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("ok-name_1").is_ok());
    }

    #[test]
    fn test_wildcard_and_device_match() {
        let profile = sample_profile();
        let xbox = DeviceIdentity::new(0x045E, 0x028E);
        let ds4 = DeviceIdentity::new(0x054C, 0x05C4);
        assert!(profile.matches_device(&xbox));
        assert!(profile.is_device_specific(&xbox));
        assert!(!profile.matches_device(&ds4));

        let wildcard = Profile::default_profile();
        assert!(wildcard.matches_device(&ds4));
        assert!(!wildcard.is_device_specific(&ds4));
    }

    #[test]
    fn test_memory_store_behaves_like_disk_store() {
        let store = MemoryProfileStore::new();
        let profile = sample_profile();
        store.save(&profile).unwrap();
        assert_eq!(store.load("sample").unwrap(), profile);
        assert!(store.exists("sample").unwrap());
        assert_eq!(store.load_all().unwrap().len(), 1);
        store.delete("sample").unwrap();
        assert!(matches!(
            store.load("sample"),
            Err(ProfileError::NotFound(_))
        ));
    }
}
