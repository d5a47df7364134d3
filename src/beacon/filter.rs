//! First-line filter for proximity-pairing candidates.
//!
//! Apple devices broadcast many unrelated payloads under the same company ID;
//! only the exact proximity-pairing length and signature are kept.

use crate::beacon::protocol::{PAYLOAD_LEN, PAYLOAD_SIGNATURE, RawAdvertisement};

/// Checks whether a manufacturer-data buffer is a proximity-pairing payload.
pub fn is_candidate(data: &[u8]) -> bool {
   data.len() == PAYLOAD_LEN && data.starts_with(&PAYLOAD_SIGNATURE)
}

/// Checks whether an advertisement should enter the beacon window.
pub fn accepts(raw: &RawAdvertisement) -> bool {
   is_candidate(&raw.manufacturer_data)
}

#[cfg(test)]
mod tests {
   use std::time::Instant;

   use super::*;

   fn adv(data: Vec<u8>) -> RawAdvertisement {
      RawAdvertisement::new("AA:BB:CC:DD:EE:FF", -40, data, Instant::now())
   }

   #[test]
   fn test_accepts_signature_and_length() {
      let mut data = vec![0u8; PAYLOAD_LEN];
      data[..2].copy_from_slice(&PAYLOAD_SIGNATURE);
      assert!(accepts(&adv(data)));
   }

   #[test]
   fn test_rejects_any_other_length() {
      for len in (0..64).filter(|&len| len != PAYLOAD_LEN) {
         let mut data = vec![0xffu8; len];
         if len >= 2 {
            data[..2].copy_from_slice(&PAYLOAD_SIGNATURE);
         }
         assert!(!accepts(&adv(data)), "accepted length {len}");
      }
   }

   #[test]
   fn test_rejects_signature_mismatch() {
      for first in 0..=255u8 {
         for second in [0x00, 0x18, 0x19, 0x1a, 0xff] {
            if [first, second] == PAYLOAD_SIGNATURE {
               continue;
            }
            let mut data = vec![0u8; PAYLOAD_LEN];
            data[0] = first;
            data[1] = second;
            assert!(!is_candidate(&data), "accepted {first:02x}{second:02x}");
         }
      }
   }
}
