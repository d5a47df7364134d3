//! Configuration management for the battery monitor.
//!
//! This module handles loading and saving configuration from disk,
//! including scan parameters and known accessory addresses.

use std::{
   env, fs,
   path::{Path, PathBuf},
   str::FromStr,
   time::Duration,
};

use bluer::Address;
use serde::{Deserialize, Serialize};

use crate::error::{PodsError, Result};

/// Radio power/latency trade-off for discovery.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScanMode {
   /// Duplicate advertisements are suppressed by the controller
   #[default]
   LowPower,
   /// Duplicates are reported
   Balanced,
   /// Duplicates are reported and never batched
   LowLatency,
}

impl ScanMode {
   pub const fn reports_duplicates(self) -> bool {
      !matches!(self, Self::LowPower)
   }
}

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
   /// Adapter name such as `hci0`; the default adapter when unset
   #[serde(default)]
   pub adapter: Option<String>,

   #[serde(default)]
   pub scan_mode: ScanMode,

   /// Batch delivery delay for advertisements; 0 delivers each immediately
   #[serde(default)]
   pub report_delay_ms: u64,

   #[serde(default = "default_render_interval")]
   pub render_interval_secs: u64,

   #[serde(default = "default_connectivity_poll")]
   pub connectivity_poll_secs: u64,

   #[serde(default)]
   pub known_devices: Vec<KnownDevice>,
}

/// An accessory address that is always treated as the monitored headset.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct KnownDevice {
   pub address: String,
   pub name: String,
}

const fn default_render_interval() -> u64 {
   1
}

const fn default_connectivity_poll() -> u64 {
   5
}

impl Default for Config {
   fn default() -> Self {
      Self {
         adapter: None,
         scan_mode: ScanMode::default(),
         report_delay_ms: 0,
         render_interval_secs: default_render_interval(),
         connectivity_poll_secs: default_connectivity_poll(),
         known_devices: vec![],
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   /// Saves the configuration, creating parent directories.
   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }
      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;
      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      config_path_with(|key| env::var(key).ok())
   }

   /// Batch delay, or `None` when advertisements are delivered one by one.
   pub fn report_delay(&self) -> Option<Duration> {
      if self.report_delay_ms == 0 || self.scan_mode == ScanMode::LowLatency {
         None
      } else {
         Some(Duration::from_millis(self.report_delay_ms))
      }
   }

   /// Renderer tick, clamped to 1-10 seconds.
   pub fn render_interval(&self) -> Duration {
      Duration::from_secs(self.render_interval_secs.clamp(1, 10))
   }

   pub fn connectivity_poll(&self) -> Duration {
      Duration::from_secs(self.connectivity_poll_secs.max(1))
   }

   /// Parses the configured known device addresses.
   pub fn known_addresses(&self) -> Result<Vec<Address>> {
      self
         .known_devices
         .iter()
         .map(|d| {
            Address::from_str(&d.address).map_err(|_| PodsError::InvalidAddress(d.address.clone()))
         })
         .collect()
   }
}

fn config_path_with(var: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
   let config_dir = if let Some(home) = var("PODBATTERY_HOME") {
      PathBuf::from(home)
   } else if let Some(config_home) = var("XDG_CONFIG_HOME") {
      PathBuf::from(config_home)
   } else if let Some(home) = var("HOME") {
      PathBuf::from(home).join(".config")
   } else {
      dirs::config_dir().ok_or(PodsError::ConfigDirNotFound)?
   };

   Ok(config_dir.join("podbattery").join("config.toml"))
}
