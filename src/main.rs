//! CLI front-end for the joymap driver.

use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::warn;

use joymap::config::AppConfig;
use joymap::coordinator::Coordinator;
use joymap::error::ProfileError;
use joymap::events::{AxisId, ButtonId};
use joymap::profile::{ButtonMapping, KeyModifier, Profile, ProfileStore, TomlProfileStore};
use joymap::protocol;
use joymap::transport::usb::RusbBackend;
use joymap::transport::UsbBackend;
use joymap::virtual_pad::LoopbackGamepadHost;

/// Exit codes of the CLI surface.
const EXIT_RUNTIME: u8 = 1;
const EXIT_PROFILE_NOT_FOUND: u8 = 2;
const EXIT_PROFILE_EXISTS: u8 = 3;
const EXIT_INVALID_ARGUMENT: u8 = 4;

#[derive(Parser)]
#[command(name = "joymap", about = "User-space gamepad to keyboard/mouse driver")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "Config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the driver until terminated
    Start,
    /// Show configuration, profiles, and connected devices
    Status,
    /// List connected USB devices and their detected protocols
    ListDevices,
    /// Bind a controller input to a key within a profile
    Map {
        /// Profile to modify
        profile: String,
        /// Input identifier (A, B, LSX+, DPadUp, ...)
        input: String,
        /// Key code, decimal or 0x-prefixed hex; 0 unmaps
        key: String,
        /// Modifier: none, shift, control, option, command
        #[arg(long, default_value = "none")]
        modifier: String,
    },
    /// List stored profiles
    ProfileList,
    /// Make a profile the active wildcard profile
    ProfileLoad { name: String },
    /// Create a new profile from the defaults
    ProfileCreate { name: String },
    /// Delete a profile
    ProfileDelete { name: String },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err.message);
            ExitCode::from(err.code)
        }
    }
}

struct CliError {
    code: u8,
    message: anyhow::Error,
}

impl CliError {
    fn runtime(message: anyhow::Error) -> Self {
        Self {
            code: EXIT_RUNTIME,
            message,
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_INVALID_ARGUMENT,
            message: anyhow::anyhow!(message.into()),
        }
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::runtime(err)
    }
}

impl From<ProfileError> for CliError {
    fn from(err: ProfileError) -> Self {
        let code = match &err {
            ProfileError::NotFound(_) => EXIT_PROFILE_NOT_FOUND,
            ProfileError::AlreadyExists(_) => EXIT_PROFILE_EXISTS,
            ProfileError::InvalidMapping(_) => EXIT_INVALID_ARGUMENT,
            _ => EXIT_RUNTIME,
        };
        Self {
            code,
            message: err.into(),
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = AppConfig::load_or_create(&cli.config)
        .with_context(|| format!("loading {}", cli.config))?;
    let store = TomlProfileStore::new(&config.profile_dir);

    match cli.command {
        Command::Start => start(config, store),
        Command::Status => status(&cli.config, config, store),
        Command::ListDevices => list_devices(),
        Command::Map {
            profile,
            input,
            key,
            modifier,
        } => map(store, &profile, &input, &key, &modifier),
        Command::ProfileList => {
            for profile in store.load_all().map_err(CliError::from)? {
                let scope = match &profile.device_id {
                    Some(id) => format!("{:04X}:{:04X}", id.vendor_id, id.product_id),
                    None => "any device".to_string(),
                };
                println!(
                    "{} ({} mappings, {})",
                    profile.name,
                    profile.button_mappings.len(),
                    scope
                );
            }
            Ok(())
        }
        Command::ProfileLoad { name } => profile_load(&cli.config, config, store, &name),
        Command::ProfileCreate { name } => profile_create(store, &name),
        Command::ProfileDelete { name } => {
            store.delete(&name).map_err(CliError::from)?;
            println!("deleted profile `{}`", name);
            Ok(())
        }
    }
}

fn start(config: AppConfig, store: TomlProfileStore) -> Result<(), CliError> {
    let backend = Arc::new(
        RusbBackend::new().map_err(|err| anyhow::anyhow!("usb context: {}", err))?,
    );
    let virtual_gamepad = config.virtual_gamepad;
    let mut coordinator = Coordinator::new(backend, Arc::new(store), config)
        .map_err(CliError::runtime)?;
    if virtual_gamepad {
        // No platform HID facility is wired in yet; the loopback host
        // keeps the mirroring path alive for consumers polling it.
        warn!("virtual gamepad enabled: using in-process loopback host");
        coordinator.set_virtual_host(Arc::new(Mutex::new(LoopbackGamepadHost::new())));
    }
    coordinator.run();
    Ok(())
}

fn status(config_path: &str, config: AppConfig, store: TomlProfileStore) -> Result<(), CliError> {
    println!("config: {}", config_path);
    println!("active profile: {}", config.active_profile);
    println!(
        "deadzones: LS {:.4} RS {:.4} trigger {:.2}",
        config.ls_deadzone, config.rs_deadzone, config.trigger_deadzone
    );
    let profiles = store.load_all().map_err(CliError::from)?;
    println!("profiles: {}", profiles.len());

    let backend =
        RusbBackend::new().map_err(|err| anyhow::anyhow!("usb context: {}", err))?;
    let devices = backend
        .enumerate()
        .map_err(|err| anyhow::anyhow!("enumeration: {}", err))?;
    println!("usb devices visible: {}", devices.len());
    Ok(())
}

fn list_devices() -> Result<(), CliError> {
    let backend =
        RusbBackend::new().map_err(|err| anyhow::anyhow!("usb context: {}", err))?;
    let devices = backend
        .enumerate()
        .map_err(|err| anyhow::anyhow!("enumeration: {}", err))?;
    for descriptor in devices {
        let kind = protocol::detect(&descriptor.identity, &descriptor);
        println!(
            "{}  {}  {} {}",
            descriptor.identity,
            kind,
            descriptor.manufacturer,
            descriptor.product
        );
    }
    Ok(())
}

fn map(
    store: TomlProfileStore,
    profile_name: &str,
    input: &str,
    key: &str,
    modifier: &str,
) -> Result<(), CliError> {
    if !is_known_identifier(input) {
        return Err(CliError::invalid(format!(
            "unknown input identifier `{}`",
            input
        )));
    }
    let key_code = parse_key_code(key)
        .ok_or_else(|| CliError::invalid(format!("invalid key code `{}`", key)))?;
    let modifier = parse_modifier(modifier)
        .ok_or_else(|| CliError::invalid(format!("invalid modifier `{}`", modifier)))?;

    let mut profile = store.load(profile_name).map_err(CliError::from)?;
    match profile
        .button_mappings
        .iter_mut()
        .find(|m| m.button_identifier == input)
    {
        Some(mapping) => {
            mapping.key_code = key_code;
            mapping.modifier = modifier;
        }
        None => profile.button_mappings.push(ButtonMapping {
            button_identifier: input.to_string(),
            key_code,
            modifier,
        }),
    }
    store.save(&profile).map_err(CliError::from)?;
    println!(
        "profile `{}`: {} -> {:#04x} ({:?})",
        profile_name, input, key_code, modifier
    );
    Ok(())
}

fn profile_load(
    config_path: &str,
    mut config: AppConfig,
    store: TomlProfileStore,
    name: &str,
) -> Result<(), CliError> {
    if !store.exists(name).map_err(CliError::from)? {
        return Err(ProfileError::NotFound(name.to_string()).into());
    }
    config.active_profile = name.to_string();
    config
        .save_to_file(config_path)
        .map_err(CliError::runtime)?;
    println!("active profile set to `{}`", name);
    Ok(())
}

fn profile_create(store: TomlProfileStore, name: &str) -> Result<(), CliError> {
    if store.exists(name).map_err(CliError::from)? {
        return Err(ProfileError::AlreadyExists(name.to_string()).into());
    }
    let mut profile = Profile::default_profile();
    profile.name = name.to_string();
    store.save(&profile).map_err(CliError::from)?;
    println!("created profile `{}`", name);
    Ok(())
}

/// Accepts every identifier the mapping engine can drive.
fn is_known_identifier(input: &str) -> bool {
    if matches!(input, "DPadUp" | "DPadDown" | "DPadLeft" | "DPadRight") {
        return true;
    }
    if let Some(stem) = input.strip_suffix('+').or_else(|| input.strip_suffix('-')) {
        return AxisId::from_identifier(stem).is_some();
    }
    ButtonId::from_identifier(input).is_some() || AxisId::from_identifier(input).is_some()
}

fn parse_key_code(s: &str) -> Option<u16> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_modifier(s: &str) -> Option<KeyModifier> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Some(KeyModifier::None),
        "shift" => Some(KeyModifier::Shift),
        "control" | "ctrl" => Some(KeyModifier::Control),
        "option" | "alt" => Some(KeyModifier::Option),
        "command" | "win" | "super" => Some(KeyModifier::Command),
        _ => None,
    }
}
