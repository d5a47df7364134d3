//! Scan session driving advertisements through filter, window and decoder.
//!
//! All mutable state sits behind one lock. Decoding runs outside of it, so a
//! selection is stamped with a ticket and only applied if no newer selection
//! was applied and no stop or disconnect happened in the meantime.

use std::time::Instant;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::beacon::{
   decoder, filter,
   protocol::{Payload, RawAdvertisement, Reading},
   state::{DeviceState, Snapshot},
   window::{Beacon, BeaconWindow},
};

/// What happened to a single advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
   /// Session is stopped
   Inactive,
   /// Not a proximity-pairing payload
   Rejected,
   /// Nothing fresh above the noise floor
   NoCandidate,
   /// Selected payload failed to decode
   Dropped,
   /// Decoded and written to the device state
   Applied,
   /// A stop, disconnect or newer selection overtook this one
   Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
   epoch: u64,
   seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
   running: bool,
   /// Bumped by every stop and disconnect
   epoch: u64,
   next_seq: u64,
   applied_seq: u64,
   window: BeaconWindow,
   state: DeviceState,
}

impl Inner {
   fn invalidate(&mut self) {
      self.epoch += 1;
      self.window.clear();
      self.state.reset();
   }
}

pub struct ScanSession {
   inner: Mutex<Inner>,
   running_tx: watch::Sender<bool>,
}

impl Default for ScanSession {
   fn default() -> Self {
      Self::new()
   }
}

impl ScanSession {
   pub fn new() -> Self {
      Self {
         inner: Mutex::new(Inner::default()),
         running_tx: watch::Sender::new(false),
      }
   }

   /// Starts accepting advertisements. Returns `false` if already running.
   pub fn start(&self) -> bool {
      let mut inner = self.inner.lock();
      if inner.running {
         return false;
      }
      inner.running = true;
      self.running_tx.send_replace(true);
      info!("Scan session started");
      true
   }

   /// Stops the session, clearing the window and resetting the device state.
   /// Returns `false` if already stopped.
   pub fn stop(&self) -> bool {
      let mut inner = self.inner.lock();
      if !inner.running {
         return false;
      }
      inner.running = false;
      inner.invalidate();
      self.running_tx.send_replace(false);
      info!("Scan session stopped");
      true
   }

   pub fn is_running(&self) -> bool {
      self.inner.lock().running
   }

   /// Watches the running flag, for the radio to start and stop discovery.
   pub fn subscribe(&self) -> watch::Receiver<bool> {
      self.running_tx.subscribe()
   }

   /// Processes one advertisement with the current time as the eviction clock.
   pub fn on_advertisement(&self, raw: &RawAdvertisement) -> Outcome {
      self.on_advertisement_at(raw, Instant::now())
   }

   /// Processes one advertisement, evicting relative to `now`.
   pub fn on_advertisement_at(&self, raw: &RawAdvertisement, now: Instant) -> Outcome {
      if !filter::accepts(raw) {
         return Outcome::Rejected;
      }
      let Some(beacon) = Beacon::from_advertisement(raw) else {
         return Outcome::Rejected;
      };
      let (ticket, payload) = match self.select(beacon, now) {
         Ok(selected) => selected,
         Err(outcome) => return outcome,
      };
      match decoder::decode(&payload) {
         Ok(reading) => self.commit(ticket, reading),
         Err(e) => {
            warn!("Dropping beacon {}: {e}", hex::encode_upper(payload));
            Outcome::Dropped
         },
      }
   }

   fn select(&self, beacon: Beacon, now: Instant) -> Result<(Ticket, Payload), Outcome> {
      let mut inner = self.inner.lock();
      if !inner.running {
         return Err(Outcome::Inactive);
      }
      inner.window.insert(beacon);
      inner.window.evict(now);
      let Some(payload) = inner.window.select_best().map(|best| best.payload) else {
         debug!("No beacon above the noise floor ({} in window)", inner.window.len());
         return Err(Outcome::NoCandidate);
      };
      debug!("Beacon hits: {:?}", inner.window.hits());
      inner.next_seq += 1;
      let ticket = Ticket {
         epoch: inner.epoch,
         seq: inner.next_seq,
      };
      Ok((ticket, payload))
   }

   fn commit(&self, ticket: Ticket, reading: Reading) -> Outcome {
      let mut inner = self.inner.lock();
      if !inner.running || inner.epoch != ticket.epoch || inner.applied_seq > ticket.seq {
         return Outcome::Superseded;
      }
      inner.applied_seq = ticket.seq;
      if inner.state.apply(reading) {
         debug!("Device state updated: {}", inner.state.snapshot());
      }
      Outcome::Applied
   }

   /// Processes a batch in delivery order.
   pub fn on_batch<'a>(&self, batch: impl IntoIterator<Item = &'a RawAdvertisement>) -> usize {
      batch
         .into_iter()
         .filter(|raw| self.on_advertisement(raw) == Outcome::Applied)
         .count()
   }

   /// Records a headset-profile connection transition. A disconnect clears
   /// the window and resets the device state. Returns whether the flag changed.
   pub fn set_connected(&self, connected: bool) -> bool {
      let mut inner = self.inner.lock();
      let prev = inner.state.set_connected(connected);
      if prev == connected {
         return false;
      }
      if !connected {
         inner.invalidate();
      }
      info!(
         "Headset {}",
         if connected { "connected" } else { "disconnected" }
      );
      true
   }

   pub fn snapshot(&self) -> Snapshot {
      self.inner.lock().state.snapshot()
   }
}

#[cfg(test)]
mod tests {
   use std::{
      sync::{Arc, Barrier},
      thread,
      time::Duration,
   };

   use super::*;
   use crate::beacon::{
      decoder::tests::payload,
      protocol::{ChargeLevel, DeviceModel, Level, PAYLOAD_LEN},
   };

   fn adv(data: &[u8], rssi: i16, at: Instant) -> RawAdvertisement {
      RawAdvertisement::new("4C:00:00:00:00:01", rssi, data.to_vec(), at)
   }

   fn started() -> ScanSession {
      let session = ScanSession::new();
      assert!(session.start());
      session
   }

   #[test]
   fn test_start_stop_idempotent() {
      let session = ScanSession::new();
      let rx = session.subscribe();
      assert!(!*rx.borrow());

      assert!(session.start());
      assert!(!session.start());
      assert!(*rx.borrow());
      assert!(session.is_running());

      assert!(session.stop());
      assert!(!session.stop());
      assert!(!*rx.borrow());
   }

   #[test]
   fn test_applies_decoded_beacon() {
      let session = started();
      let now = Instant::now();
      let data = payload(7, 5, 2, 0b101, 0x2, true);

      assert_eq!(session.on_advertisement_at(&adv(&data, -50, now), now), Outcome::Applied);

      let snap = session.snapshot();
      assert_eq!(snap.left, ChargeLevel::from_raw(5, true));
      assert_eq!(snap.right, ChargeLevel::from_raw(7, false));
      assert_eq!(snap.case, ChargeLevel::from_raw(2, true));
      assert_eq!(snap.model, DeviceModel::Pro);
   }

   #[test]
   fn test_inactive_session_ignores_beacons() {
      let session = ScanSession::new();
      let now = Instant::now();
      let data = payload(7, 5, 2, 0, 0x2, true);
      assert_eq!(session.on_advertisement_at(&adv(&data, -50, now), now), Outcome::Inactive);
      assert_eq!(session.snapshot(), Snapshot::default());
   }

   #[test]
   fn test_rejected_leaves_snapshot_unchanged() {
      let session = started();
      let now = Instant::now();
      session.on_advertisement_at(&adv(&payload(7, 5, 2, 0, 0x2, true), -50, now), now);
      let before = session.snapshot();

      let mut wrong_sig = payload(1, 1, 1, 0, 0x2, false);
      wrong_sig[0] = 0x10;
      let cases = [vec![], vec![0x07, 0x19], wrong_sig.to_vec(), vec![0u8; PAYLOAD_LEN + 1]];
      for data in cases {
         assert_eq!(
            session.on_advertisement_at(&adv(&data, -30, now), now),
            Outcome::Rejected
         );
         assert_eq!(session.snapshot(), before);
      }
   }

   #[test]
   fn test_weak_signal_is_no_update() {
      let session = started();
      let now = Instant::now();
      session.on_advertisement_at(&adv(&payload(7, 5, 2, 0, 0x2, true), -50, now), now);
      let before = session.snapshot();

      let later = now + Duration::from_secs(20);
      let weak = payload(1, 1, 1, 0, 0x2, false);
      assert_eq!(
         session.on_advertisement_at(&adv(&weak, -75, later), later),
         Outcome::NoCandidate
      );
      assert_eq!(session.snapshot(), before);
   }

   #[test]
   fn test_strongest_beacon_wins() {
      let session = started();
      let now = Instant::now();
      let near = payload(9, 9, 9, 0, 0x2, false);
      let far = payload(1, 1, 1, 0, 0x2, false);

      session.on_advertisement_at(&adv(&near, -40, now), now);
      session.on_advertisement_at(&adv(&far, -55, now), now);
      assert_eq!(session.snapshot().left.level, Level::Tenths(9));

      // Once the strong beacon expires the weaker one takes over
      let later = now + Duration::from_secs(11);
      session.on_advertisement_at(&adv(&far, -55, later), later);
      assert_eq!(session.snapshot().left.level, Level::Tenths(1));
   }

   #[test]
   fn test_stop_resets_state() {
      let session = started();
      let now = Instant::now();
      session.on_advertisement_at(&adv(&payload(7, 5, 2, 0, 0x2, true), -50, now), now);
      assert!(session.stop());

      let snap = session.snapshot();
      assert_eq!(snap.left, ChargeLevel::DISCONNECTED);
      assert_eq!(snap.right, ChargeLevel::DISCONNECTED);
      assert_eq!(snap.case, ChargeLevel::DISCONNECTED);
      assert_eq!(snap.model, DeviceModel::Unknown);

      // The window was cleared as well
      assert!(session.start());
      let weak = payload(1, 1, 1, 0, 0x2, false);
      assert_eq!(
         session.on_advertisement_at(&adv(&weak, -80, now), now),
         Outcome::NoCandidate
      );
   }

   #[test]
   fn test_commit_after_stop_is_superseded() {
      let session = started();
      let now = Instant::now();
      let data = payload(7, 5, 2, 0, 0x2, true);
      let beacon = Beacon::from_advertisement(&adv(&data, -50, now)).unwrap();
      let (ticket, payload) = session.select(beacon, now).unwrap();

      session.stop();
      session.start();
      let reading = decoder::decode(&payload).unwrap();
      assert_eq!(session.commit(ticket, reading), Outcome::Superseded);
      assert_eq!(session.snapshot(), Snapshot::default());
   }

   #[test]
   fn test_older_selection_does_not_overwrite_newer() {
      let session = started();
      let now = Instant::now();
      let old = payload(2, 2, 2, 0, 0x2, false);
      let new = payload(8, 8, 8, 0, 0x2, false);

      let (old_ticket, _) = session
         .select(Beacon::from_advertisement(&adv(&old, -50, now)).unwrap(), now)
         .unwrap();
      let (new_ticket, _) = session
         .select(Beacon::from_advertisement(&adv(&new, -40, now)).unwrap(), now)
         .unwrap();

      assert_eq!(
         session.commit(new_ticket, decoder::decode(&new).unwrap()),
         Outcome::Applied
      );
      assert_eq!(
         session.commit(old_ticket, decoder::decode(&old).unwrap()),
         Outcome::Superseded
      );
      assert_eq!(session.snapshot().left.level, Level::Tenths(8));
   }

   #[test]
   fn test_disconnect_resets_and_clears() {
      let session = started();
      let now = Instant::now();
      assert!(session.set_connected(true));
      assert!(!session.set_connected(true));
      session.on_advertisement_at(&adv(&payload(7, 5, 2, 0, 0x2, true), -50, now), now);
      assert!(session.snapshot().connected);

      assert!(session.set_connected(false));
      let snap = session.snapshot();
      assert!(!snap.connected);
      assert_eq!(snap.left, ChargeLevel::DISCONNECTED);
      assert!(session.is_running());
   }

   #[test]
   fn test_batch_in_order() {
      let session = started();
      let now = Instant::now();
      let batch = [
         adv(&payload(3, 3, 3, 0, 0x2, false), -50, now),
         adv(&[0x07], -40, now),
         adv(&payload(4, 4, 4, 0, 0x2, false), -45, now),
      ];
      assert_eq!(session.on_batch(&batch), 2);
      assert_eq!(session.snapshot().left.level, Level::Tenths(4));
   }

   #[test]
   fn test_stop_during_concurrent_advertisements() {
      const WORKERS: usize = 4;
      let session = Arc::new(started());
      let data = payload(7, 5, 2, 0, 0x2, true);
      let barrier = Arc::new(Barrier::new(WORKERS + 1));

      let workers: Vec<_> = (0..WORKERS)
         .map(|_| {
            let session = session.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
               barrier.wait();
               for _ in 0..500 {
                  session.on_advertisement(&adv(&data, -50, Instant::now()));
               }
            })
         })
         .collect();
      barrier.wait();
      session.stop();
      for worker in workers {
         worker.join().unwrap();
      }

      assert!(!session.is_running());
      assert_eq!(session.snapshot(), Snapshot::default());
   }
}
