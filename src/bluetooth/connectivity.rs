//! Headset-profile connectivity tracking.
//!
//! Whether the accessory is connected is a separate signal from the battery
//! beacons: the buds may keep advertising while disconnected and may stop
//! advertising while connected. The signal comes from a [`HeadsetProbe`].

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use bluer::{Adapter, Address};
use log::{debug, warn};
use tokio::{
   task::JoinHandle,
   time::{self, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
   beacon::{protocol::MODEL_UUIDS, session::ScanSession},
   error::Result,
};

/// Name patterns matched as a last resort (case-insensitive)
const NAME_PATTERNS: &[&str] = &["airpods"];

/// Source of the headset-profile connection state.
pub trait HeadsetProbe: Send + Sync {
   /// Returns whether the accessory is currently connected.
   fn headset_connected(&self) -> impl Future<Output = Result<bool>> + Send;
}

/// Probe that inspects the devices BlueZ knows about.
pub struct BluezProbe {
   adapter: Adapter,
   known: Vec<Address>,
}

impl BluezProbe {
   pub const fn new(adapter: Adapter, known: Vec<Address>) -> Self {
      Self { adapter, known }
   }

   async fn is_accessory(&self, device: &bluer::Device) -> bool {
      if self.known.contains(&device.address()) {
         return true;
      }
      let uuids = device.uuids().await.ok().flatten().unwrap_or_default();
      let name = device.name().await.ok().flatten();
      matches_accessory(&uuids, name.as_deref())
   }
}

impl HeadsetProbe for BluezProbe {
   async fn headset_connected(&self) -> Result<bool> {
      for addr in self.adapter.device_addresses().await? {
         let device = self.adapter.device(addr)?;
         if device.is_connected().await.unwrap_or(false) && self.is_accessory(&device).await {
            debug!("Headset connected: {addr}");
            return Ok(true);
         }
      }
      Ok(false)
   }
}

/// Checks advertised service UUIDs, then the device name.
fn matches_accessory(uuids: &HashSet<Uuid>, name: Option<&str>) -> bool {
   if MODEL_UUIDS.iter().any(|u| uuids.contains(u)) {
      return true;
   }
   name.is_some_and(|name| {
      let name = name.to_ascii_lowercase();
      NAME_PATTERNS.iter().any(|p| name.contains(p))
   })
}

/// Queries the probe once and forwards the result to the session.
///
/// Probe failures leave the flag untouched.
async fn poll_once<P: HeadsetProbe>(probe: &P, session: &ScanSession) {
   match probe.headset_connected().await {
      Ok(connected) => {
         session.set_connected(connected);
      },
      Err(e) => warn!("Failed to query headset connection: {e}"),
   }
}

/// Spawns the connectivity poll loop.
pub fn spawn<P: HeadsetProbe + 'static>(
   probe: P,
   session: Arc<ScanSession>,
   interval: Duration,
) -> JoinHandle<()> {
   tokio::spawn(async move {
      let mut ticker = time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
         ticker.tick().await;
         poll_once(&probe, &session).await;
      }
   })
}
