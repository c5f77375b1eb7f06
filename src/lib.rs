//! Core modules for the joymap gamepad driver.
//!
//! The pipeline runs transport → parser → processor → mapping → output,
//! orchestrated by the coordinator. The library surface exists for the
//! CLI binary and for integration tests; it is not a stable public API.

pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod events;
pub mod manager;
pub mod mapping;
pub mod output;
pub mod parsers;
pub mod processor;
pub mod profile;
pub mod protocol;
pub mod transport;
pub mod util;
pub mod virtual_pad;

pub use config::AppConfig;
pub use coordinator::Coordinator;
pub use profile::{ButtonMapping, Profile, ProfileStore};
pub use protocol::ProtocolKind;
