//! Error types for the battery monitor.
//!
//! Decoding problems never surface here; they are handled inside the beacon
//! pipeline. This covers Bluetooth, D-Bus, I/O and configuration failures.

use thiserror::Error;

/// Main error type for the monitor.
#[derive(Error, Debug)]
pub enum PodsError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("D-Bus connection error: {0}")]
   DBusConnection(#[from] zbus::fdo::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Invalid device address: {0}")]
   InvalidAddress(String),

   #[error("Adapter not found: {0}")]
   AdapterNotFound(String),

   #[error("Discovery stream ended")]
   DiscoveryEnded,
}

/// Convenience type alias for Results with `PodsError`.
pub type Result<T> = std::result::Result<T, PodsError>;
