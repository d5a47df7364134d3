//! Proximity-pairing beacon format for `AirPods`-family earbuds.
//!
//! The earbuds broadcast a 27-byte Apple manufacturer-data payload while the
//! lid is open or the buds are out. Every field consumed here is a single
//! nibble addressed by its character position in the uppercase hex rendering
//! of that payload.

use std::{fmt, time::Instant};

use smol_str::SmolStr;

use crate::beacon::decoder::DecodeError;

/// Apple company ID for manufacturer data
pub const APPLE_CID: u16 = 0x004C;

/// Length of the proximity-pairing payload
pub const PAYLOAD_LEN: usize = 27;

/// Proximity-pairing type byte followed by its TLV length
pub const PAYLOAD_SIGNATURE: [u8; 2] = [0x07, 0x19];

/// A proximity-pairing payload of the exact expected length.
pub type Payload = [u8; PAYLOAD_LEN];

// Character offsets into the hex rendering
pub const HEX_MODEL: usize = 7;
pub const HEX_ORIENTATION: usize = 10;
pub const HEX_PRIMARY_LEVEL: usize = 12;
pub const HEX_SECONDARY_LEVEL: usize = 13;
pub const HEX_CHARGING: usize = 14;
pub const HEX_CASE_LEVEL: usize = 15;

/// Model character identifying the Pro variant
pub const MODEL_PRO_MARKER: u8 = b'E';

/// Orientation bit; when clear, the two bud channels are swapped
pub const ORIENTATION_UNSWAPPED: u8 = 0x02;

// Charging flag bits
pub const CHARGING_SECONDARY: u8 = 1 << 0;
pub const CHARGING_PRIMARY: u8 = 1 << 1;
pub const CHARGING_CASE: u8 = 1 << 2;

/// Highest valid battery level, in tenths
pub const MAX_LEVEL: u8 = 10;

/// Raw level reported for a component that is not present
pub const RAW_DISCONNECTED: u8 = 15;

/// Service UUIDs advertised by the paired accessory, one per model.
pub const MODEL_UUIDS: [uuid::Uuid; 2] = [
   uuid::Uuid::from_u128(0x74ec2172_0bad_4d01_8f77_997b2be0722a), // Standard
   uuid::Uuid::from_u128(0x2a72e02b_7b99_778f_014d_ad0b7221ec74), // Pro
];

/// A single advertisement as delivered by the radio.
///
/// The device identifier is whatever the radio reports; for this accessory it
/// is a randomized address and must not be used as a stable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
   pub device_id: SmolStr,
   pub rssi: i16,
   pub manufacturer_data: Vec<u8>,
   pub captured_at: Instant,
}

impl RawAdvertisement {
   pub fn new(
      device_id: impl Into<SmolStr>,
      rssi: i16,
      manufacturer_data: Vec<u8>,
      captured_at: Instant,
   ) -> Self {
      Self {
         device_id: device_id.into(),
         rssi,
         manufacturer_data,
         captured_at,
      }
   }
}

/// Battery level of one component as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
   /// Charge in tenths, `0..=10`.
   Tenths(u8),
   /// A raw value that is neither a level nor the disconnected marker.
   OutOfRange(u8),
   Disconnected,
}

impl Level {
   pub const fn from_raw(raw: u8) -> Self {
      match raw {
         0..=MAX_LEVEL => Self::Tenths(raw),
         RAW_DISCONNECTED => Self::Disconnected,
         _ => Self::OutOfRange(raw),
      }
   }

   pub const fn raw(self) -> u8 {
      match self {
         Self::Tenths(raw) | Self::OutOfRange(raw) => raw,
         Self::Disconnected => RAW_DISCONNECTED,
      }
   }
}

/// Battery state for a single bud or the case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeLevel {
   pub level: Level,
   pub charging: bool,
}

impl ChargeLevel {
   pub const DISCONNECTED: Self = Self {
      level: Level::Disconnected,
      charging: false,
   };

   pub const fn from_raw(raw: u8, charging: bool) -> Self {
      Self {
         level: Level::from_raw(raw),
         charging,
      }
   }

   pub const fn is_charging(&self) -> bool {
      self.charging
   }

   pub const fn is_available(&self) -> bool {
      !matches!(self.level, Level::Disconnected)
   }

   /// Charge as a percentage, `None` when the component is disconnected.
   ///
   /// Raw values 11 to 14 have no defined meaning and are reported as an error
   /// instead of being clamped.
   pub fn percent(&self) -> Result<Option<u8>, DecodeError> {
      match self.level {
         Level::Tenths(tenths) => Ok(Some(tenths * 10)),
         Level::Disconnected => Ok(None),
         Level::OutOfRange(raw) => Err(DecodeError::LevelOutOfRange { raw }),
      }
   }
}

impl Default for ChargeLevel {
   fn default() -> Self {
      Self::DISCONNECTED
   }
}

impl fmt::Display for ChargeLevel {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self.level {
         Level::Tenths(tenths) => write!(f, "{}%", u32::from(tenths) * 10)?,
         Level::OutOfRange(raw) => write!(f, "?{raw}")?,
         Level::Disconnected => return f.write_str("-"),
      }
      if self.charging {
         f.write_str("+")?;
      }
      Ok(())
   }
}

/// Earbud model, classified from a single payload character.
#[derive(
   Debug,
   Clone,
   Copy,
   Default,
   PartialEq,
   Eq,
   strum::Display,
   strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceModel {
   Standard,
   Pro,
   /// No beacon decoded yet.
   #[default]
   Unknown,
}

impl DeviceModel {
   /// Every marker other than the Pro one collapses to `Standard`. Hex case
   /// is ignored.
   pub const fn from_marker(marker: u8) -> Self {
      if marker.to_ascii_uppercase() == MODEL_PRO_MARKER {
         Self::Pro
      } else {
         Self::Standard
      }
   }

   pub fn to_str(self) -> &'static str {
      self.into()
   }
}

/// One successfully decoded beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
   pub left: ChargeLevel,
   pub right: ChargeLevel,
   pub case: ChargeLevel,
   pub model: DeviceModel,
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_level_from_raw() {
      assert_eq!(Level::from_raw(0), Level::Tenths(0));
      assert_eq!(Level::from_raw(10), Level::Tenths(10));
      assert_eq!(Level::from_raw(15), Level::Disconnected);
      for raw in 11..=14 {
         assert_eq!(Level::from_raw(raw), Level::OutOfRange(raw));
         assert_eq!(Level::from_raw(raw).raw(), raw);
      }
      assert_eq!(Level::Disconnected.raw(), RAW_DISCONNECTED);
   }

   #[test]
   fn test_percent() {
      assert_eq!(ChargeLevel::from_raw(7, false).percent().unwrap(), Some(70));
      assert_eq!(ChargeLevel::from_raw(0, true).percent().unwrap(), Some(0));
      assert_eq!(ChargeLevel::from_raw(15, false).percent().unwrap(), None);
      assert!(matches!(
         ChargeLevel::from_raw(12, false).percent(),
         Err(DecodeError::LevelOutOfRange { raw: 12 })
      ));
   }

   #[test]
   fn test_disconnected_is_not_a_level() {
      let level = ChargeLevel::from_raw(RAW_DISCONNECTED, false);
      assert_eq!(level, ChargeLevel::DISCONNECTED);
      assert!(!level.is_available());
      assert_ne!(level.percent().unwrap(), Some(150));
   }

   #[test]
   fn test_charge_level_display() {
      assert_eq!(ChargeLevel::from_raw(5, true).to_string(), "50%+");
      assert_eq!(ChargeLevel::from_raw(7, false).to_string(), "70%");
      assert_eq!(ChargeLevel::from_raw(13, false).to_string(), "?13");
      assert_eq!(ChargeLevel::DISCONNECTED.to_string(), "-");
   }

   #[test]
   fn test_model_collapses_to_standard() {
      assert_eq!(DeviceModel::from_marker(b'E'), DeviceModel::Pro);
      assert_eq!(DeviceModel::from_marker(b'e'), DeviceModel::Pro);
      for marker in b"0123456789ABCDF" {
         assert_eq!(DeviceModel::from_marker(*marker), DeviceModel::Standard);
      }
      assert_eq!(DeviceModel::Pro.to_str(), "pro");
      assert_eq!(DeviceModel::default(), DeviceModel::Unknown);
   }
}
