//! Sliding window of recently seen proximity-pairing beacons.
//!
//! Addresses are randomized by the accessory, so sightings are kept as an
//! unkeyed multiset and the window only answers "which fresh beacon is the
//! strongest right now".

use std::{
   collections::HashMap,
   time::{Duration, Instant},
};

use log::debug;
use smol_str::SmolStr;

use crate::beacon::protocol::{Payload, RawAdvertisement};

/// Maximum age of a beacon before it is evicted
pub const BEACON_TTL: Duration = Duration::from_secs(10);

/// Weakest signal strength considered for selection, in dBm
pub const NOISE_FLOOR: i16 = -60;

/// One accepted sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
   pub device_id: SmolStr,
   pub rssi: i16,
   pub payload: Payload,
   pub seen_at: Instant,
}

impl Beacon {
   /// Copies a beacon out of an advertisement of the exact payload length.
   pub fn from_advertisement(raw: &RawAdvertisement) -> Option<Self> {
      let payload = Payload::try_from(raw.manufacturer_data.as_slice()).ok()?;
      Some(Self {
         device_id: raw.device_id.clone(),
         rssi: raw.rssi,
         payload,
         seen_at: raw.captured_at,
      })
   }

   /// Age of the beacon at `now`; zero for timestamps in the future.
   pub fn age(&self, now: Instant) -> Duration {
      now.saturating_duration_since(self.seen_at)
   }

   pub fn is_expired(&self, now: Instant) -> bool {
      self.age(now) > BEACON_TTL
   }
}

#[derive(Debug, Default)]
pub struct BeaconWindow {
   beacons: Vec<Beacon>,
   hits: HashMap<SmolStr, u32>,
}

impl BeaconWindow {
   /// Adds a sighting; duplicates are kept.
   pub fn insert(&mut self, beacon: Beacon) {
      *self.hits.entry(beacon.device_id.clone()).or_default() += 1;
      self.beacons.push(beacon);
   }

   /// Removes every beacon older than [`BEACON_TTL`], returning how many were dropped.
   pub fn evict(&mut self, now: Instant) -> usize {
      let before = self.beacons.len();
      self.beacons.retain(|b| !b.is_expired(now));
      let evicted = before - self.beacons.len();
      if evicted > 0 {
         if self.is_empty() {
            self.hits.clear();
         } else {
            let beacons = &self.beacons;
            self
               .hits
               .retain(|id, _| beacons.iter().any(|b| &b.device_id == id));
         }
         debug!("Evicted {evicted} stale beacons, {} left", self.beacons.len());
      }
      evicted
   }

   /// Returns the strongest beacon at or above [`NOISE_FLOOR`].
   ///
   /// On equal strength the earliest inserted beacon wins.
   pub fn select_best(&self) -> Option<&Beacon> {
      self
         .beacons
         .iter()
         .filter(|b| b.rssi >= NOISE_FLOOR)
         .fold(None, |best: Option<&Beacon>, b| match best {
            Some(best) if best.rssi >= b.rssi => Some(best),
            _ => Some(b),
         })
   }

   pub fn clear(&mut self) {
      self.beacons.clear();
      self.hits.clear();
   }

   pub fn len(&self) -> usize {
      self.beacons.len()
   }

   pub fn is_empty(&self) -> bool {
      self.beacons.is_empty()
   }

   /// Sightings per device id, forgotten once an id has no beacon left in the window.
   pub fn hits(&self) -> &HashMap<SmolStr, u32> {
      &self.hits
   }
}
