//! Decoding of proximity-pairing payloads into battery readings.
//!
//! The payload is rendered as uppercase hex and individual nibbles are read
//! back by character position, which keeps the offsets identical to the ones
//! seen in packet captures.

use std::mem;

use log::debug;
use thiserror::Error;

use crate::beacon::protocol::{
   CHARGING_CASE, CHARGING_PRIMARY, CHARGING_SECONDARY, ChargeLevel, DeviceModel, HEX_CASE_LEVEL,
   HEX_CHARGING, HEX_MODEL, HEX_ORIENTATION, HEX_PRIMARY_LEVEL, HEX_SECONDARY_LEVEL,
   ORIENTATION_UNSWAPPED, PAYLOAD_LEN, PAYLOAD_SIGNATURE, Reading,
};

/// Error type for beacon decoding.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
   /// Payload does not have the proximity-pairing length
   #[error("Payload length mismatch: expected {expected} bytes, got {actual}")]
   WrongLength { expected: usize, actual: usize },

   /// Payload does not start with the proximity-pairing signature
   #[error("Payload signature mismatch: {found:02x?}")]
   WrongSignature { found: [u8; 2] },

   /// A character at a field offset is not a hex digit
   #[error("Malformed payload: non-hex character at offset {offset}")]
   Malformed { offset: usize },

   /// Level nibble that is neither a battery level nor the disconnected marker
   #[error("Battery level out of range: {raw} (must be 0-10 or 15)")]
   LevelOutOfRange { raw: u8 },
}

/// Decodes a raw proximity-pairing payload.
pub fn decode(data: &[u8]) -> Result<Reading, DecodeError> {
   if data.len() != PAYLOAD_LEN {
      return Err(DecodeError::WrongLength {
         expected: PAYLOAD_LEN,
         actual: data.len(),
      });
   }
   if !data.starts_with(&PAYLOAD_SIGNATURE) {
      return Err(DecodeError::WrongSignature {
         found: [data[0], data[1]],
      });
   }
   decode_hex(&hex::encode_upper(data))
}

/// Decodes a payload that has already been rendered as hex.
pub fn decode_hex(hex: &str) -> Result<Reading, DecodeError> {
   if hex.len() != PAYLOAD_LEN * 2 {
      return Err(DecodeError::WrongLength {
         expected: PAYLOAD_LEN,
         actual: hex.len() / 2,
      });
   }
   debug!("Beacon payload: {hex}");

   let flags = nibble_at(hex, HEX_CHARGING)?;
   let mut left = ChargeLevel::from_raw(
      nibble_at(hex, HEX_SECONDARY_LEVEL)?,
      flags & CHARGING_SECONDARY != 0,
   );
   let mut right = ChargeLevel::from_raw(
      nibble_at(hex, HEX_PRIMARY_LEVEL)?,
      flags & CHARGING_PRIMARY != 0,
   );
   let case = ChargeLevel::from_raw(nibble_at(hex, HEX_CASE_LEVEL)?, flags & CHARGING_CASE != 0);

   let orientation = nibble_at(hex, HEX_ORIENTATION)?;
   if is_flipped(orientation) {
      mem::swap(&mut left, &mut right);
   }

   let model = DeviceModel::from_marker(char_at(hex, HEX_MODEL)?);

   debug!(
      "Beacon decoded - model={model}, orientation=0x{orientation:x}, l={left}, r={right}, c={case}"
   );
   Ok(Reading {
      left,
      right,
      case,
      model,
   })
}

/// Whether the bud channels are reported in swapped order.
///
/// `(orientation + 0x10)` written in binary is `1abcd`; the channels are
/// swapped when digit 3 (bit 1 of the nibble) is `0`.
pub const fn is_flipped(orientation: u8) -> bool {
   orientation & ORIENTATION_UNSWAPPED == 0
}

fn char_at(hex: &str, offset: usize) -> Result<u8, DecodeError> {
   hex.as_bytes()
      .get(offset)
      .copied()
      .filter(u8::is_ascii_hexdigit)
      .ok_or(DecodeError::Malformed { offset })
}

fn nibble_at(hex: &str, offset: usize) -> Result<u8, DecodeError> {
   let c = char_at(hex, offset)?;
   char::from(c)
      .to_digit(16)
      .map(|d| d as u8)
      .ok_or(DecodeError::Malformed { offset })
}
