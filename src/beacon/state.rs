//! Current battery and connection state of the monitored earbuds.

use std::fmt;

use serde_json::json;

use crate::beacon::protocol::{ChargeLevel, DeviceModel, Reading};

/// Authoritative state, written only from decoded beacons and
/// connectivity transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceState {
   left: ChargeLevel,
   right: ChargeLevel,
   case: ChargeLevel,
   model: DeviceModel,
   connected: bool,
}

impl DeviceState {
   /// Overwrites the battery fields and model, returning whether anything changed.
   pub fn apply(&mut self, reading: Reading) -> bool {
      let prev = *self;
      self.left = reading.left;
      self.right = reading.right;
      self.case = reading.case;
      self.model = reading.model;
      prev != *self
   }

   /// Marks every component disconnected and forgets the model.
   pub fn reset(&mut self) {
      self.left = ChargeLevel::DISCONNECTED;
      self.right = ChargeLevel::DISCONNECTED;
      self.case = ChargeLevel::DISCONNECTED;
      self.model = DeviceModel::Unknown;
   }

   /// Sets the headset-profile connection flag, returning the previous value.
   pub fn set_connected(&mut self, connected: bool) -> bool {
      std::mem::replace(&mut self.connected, connected)
   }

   pub fn snapshot(&self) -> Snapshot {
      Snapshot {
         left: self.left,
         right: self.right,
         case: self.case,
         model: self.model,
         connected: self.connected,
      }
   }
}

/// Immutable copy of [`DeviceState`] handed to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
   pub left: ChargeLevel,
   pub right: ChargeLevel,
   pub case: ChargeLevel,
   pub model: DeviceModel,
   pub connected: bool,
}

impl Snapshot {
   /// Whether the battery part differs, ignoring the connection flag.
   pub fn battery_differs(&self, other: &Self) -> bool {
      (self.left, self.right, self.case, self.model)
         != (other.left, other.right, other.case, other.model)
   }

   pub fn to_json(self) -> serde_json::Value {
      fn percent(level: ChargeLevel) -> serde_json::Value {
         match level.percent() {
            Ok(Some(p)) => json!(p),
            Ok(None) | Err(_) => json!(null),
         }
      }

      json!({
          "left_level": percent(self.left),
          "right_level": percent(self.right),
          "case_level": percent(self.case),
          "left_charging": self.left.is_charging(),
          "right_charging": self.right.is_charging(),
          "case_charging": self.case.is_charging(),
          "left_available": self.left.is_available(),
          "right_available": self.right.is_available(),
          "case_available": self.case.is_available(),
          "left_raw": self.left.level.raw(),
          "right_raw": self.right.level.raw(),
          "case_raw": self.case.level.raw(),
          "model": self.model.to_str(),
          "connected": self.connected,
      })
   }
}

impl fmt::Display for Snapshot {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(
         f,
         "l={}, r={}, c={} ({})",
         self.left, self.right, self.case, self.model
      )
   }
}
