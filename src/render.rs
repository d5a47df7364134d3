//! Periodic rendering of the session snapshot.
//!
//! Runs on its own timer, independent of the beacon pipeline, and only ever
//! reads snapshots. Battery updates are shown only while the headset is
//! connected.

use std::{sync::Arc, time::Duration};

use log::info;
use tokio::{
   sync::watch,
   task::JoinHandle,
   time::{self, MissedTickBehavior},
};

use crate::{
   beacon::{session::ScanSession, state::Snapshot},
   event::{EventSender, PodsEvent},
};

/// Turns a stream of snapshots into change events.
#[derive(Debug, Default)]
pub struct Renderer {
   last: Option<Snapshot>,
}

impl Renderer {
   pub fn new() -> Self {
      Self::default()
   }

   /// Compares `snapshot` with the previously rendered one.
   pub fn observe(&mut self, snapshot: Snapshot) -> Vec<PodsEvent> {
      let mut events = Vec::new();
      let prev = self.last.replace(snapshot);
      let was_connected = prev.is_some_and(|p| p.connected);

      match (was_connected, snapshot.connected) {
         (false, true) => events.push(PodsEvent::Connected),
         (true, false) => events.push(PodsEvent::Disconnected),
         _ => {},
      }

      if snapshot.connected
         && (!was_connected || prev.is_none_or(|p| p.battery_differs(&snapshot)))
      {
         events.push(PodsEvent::StateUpdated(snapshot));
      }
      events
   }
}

/// Spawns the render loop.
pub fn spawn(session: Arc<ScanSession>, events: EventSender, interval: Duration) -> JoinHandle<()> {
   tokio::spawn(async move {
      let mut ticker = time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      let mut renderer = Renderer::new();

      loop {
         ticker.tick().await;
         for event in renderer.observe(session.snapshot()) {
            if let PodsEvent::StateUpdated(snapshot) = &event {
               info!("Battery: {snapshot}");
            }
            events.emit(event);
         }
      }
   })
}

/// Emits [`PodsEvent::ScanningChanged`] whenever the running flag flips,
/// whoever started or stopped the session.
async fn forward_scanning(
   mut running: watch::Receiver<bool>,
   mut last: bool,
   events: EventSender,
) {
   while running.changed().await.is_ok() {
      let now = *running.borrow_and_update();
      if now != last {
         last = now;
         events.emit(PodsEvent::ScanningChanged(now));
      }
   }
}

pub fn spawn_scanning(session: &ScanSession, events: EventSender) -> JoinHandle<()> {
   let running = session.subscribe();
   let initial = *running.borrow();
   tokio::spawn(forward_scanning(running, initial, events))
}
