//! BLE advertisement scanner backed by BlueZ.
//!
//! Feeds proximity-pairing advertisements into the [`ScanSession`] while the
//! session is running, and follows the adapter's power state.

use std::{pin::pin, sync::Arc, time::Instant};

use bluer::{
   Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use rand::Rng;
use smol_str::ToSmolStr;
use tokio::{
   select,
   sync::watch,
   task::JoinHandle,
   time::{self, Duration, MissedTickBehavior},
};

use crate::{
   beacon::{
      filter,
      protocol::{APPLE_CID, RawAdvertisement},
      session::ScanSession,
   },
   config::{Config, ScanMode},
   error::{PodsError, Result},
};

/// Maximum delay between discovery restarts
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Resolves the configured adapter, or the default one.
pub async fn open_adapter(session: &Session, config: &Config) -> Result<Adapter> {
   let adapter = match &config.adapter {
      Some(name) => session
         .adapter(name)
         .map_err(|_| PodsError::AdapterNotFound(name.clone()))?,
      None => session.default_adapter().await?,
   };
   info!("Using adapter: {}", adapter.name());
   Ok(adapter)
}

pub struct Scanner {
   adapter: Adapter,
   session: Arc<ScanSession>,
   scan_mode: ScanMode,
   report_delay: Option<Duration>,
}

impl Scanner {
   pub fn new(adapter: Adapter, session: Arc<ScanSession>, config: &Config) -> Self {
      Self {
         adapter,
         session,
         scan_mode: config.scan_mode,
         report_delay: config.report_delay(),
      }
   }

   /// Spawns the discovery loop and the adapter power watcher.
   pub fn spawn(self) -> (JoinHandle<()>, JoinHandle<()>) {
      let power = tokio::spawn(watch_power(self.adapter.clone(), self.session.clone()));
      let discovery = tokio::spawn(self.run());
      (discovery, power)
   }

   async fn run(self) {
      let mut running = self.session.subscribe();
      let mut retry_count = 0u32;

      loop {
         if !*running.borrow_and_update() {
            if running.changed().await.is_err() {
               break;
            }
            continue;
         }

         match self.discover(&mut running).await {
            Ok(()) => {
               retry_count = 0;
               info!("Discovery paused");
            },
            Err(e) => {
               retry_count += 1;
               let delay = calc_retry_delay(retry_count);
               warn!("Discovery failed: {e}, retrying in {delay:?}");
               time::sleep(delay).await;
            },
         }
      }
   }

   fn discovery_filter(&self) -> DiscoveryFilter {
      DiscoveryFilter {
         transport: DiscoveryTransport::Le,
         duplicate_data: self.scan_mode.reports_duplicates(),
         ..Default::default()
      }
   }

   /// Runs discovery until the session stops. Dropping the event stream ends
   /// discovery on the adapter.
   async fn discover(&self, running: &mut watch::Receiver<bool>) -> Result<()> {
      self
         .adapter
         .set_discovery_filter(self.discovery_filter())
         .await?;
      let mut events = pin!(self.adapter.discover_devices_with_changes().await?);
      info!(
         "Discovery started on {} (mode={}, batch={:?})",
         self.adapter.name(),
         self.scan_mode,
         self.report_delay
      );

      let mut batch = Vec::new();
      let mut flush = time::interval(self.report_delay.unwrap_or(Duration::from_secs(1)));
      flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
         select! {
            changed = running.changed() => {
               if changed.is_err() || !*running.borrow_and_update() {
                  return Ok(());
               }
            }
            event = events.next() => {
               let Some(event) = event else {
                  return Err(PodsError::DiscoveryEnded);
               };
               let AdapterEvent::DeviceAdded(addr) = event else {
                  continue;
               };
               let Some(adv) = self.read_advertisement(addr).await else {
                  continue;
               };
               if self.report_delay.is_some() {
                  batch.push(adv);
               } else {
                  self.session.on_advertisement(&adv);
               }
            }
            _ = flush.tick(), if self.report_delay.is_some() => {
               if !batch.is_empty() {
                  let applied = self.session.on_batch(&batch);
                  debug!("Delivered batch of {} advertisements ({applied} applied)", batch.len());
                  batch.clear();
               }
            }
         }
      }
   }

   async fn read_advertisement(&self, addr: Address) -> Option<RawAdvertisement> {
      let device = self.adapter.device(addr).ok()?;
      let mut mfg_data = device.manufacturer_data().await.ok().flatten()?;
      let data = mfg_data.remove(&APPLE_CID)?;
      if !filter::is_candidate(&data) {
         return None;
      }
      // Cached devices that are not currently advertising have no RSSI
      let rssi = device.rssi().await.ok().flatten()?;
      Some(RawAdvertisement::new(
         addr.to_smolstr(),
         rssi,
         data,
         Instant::now(),
      ))
   }
}

/// Stops the session while the adapter is powered off.
async fn watch_power(adapter: Adapter, session: Arc<ScanSession>) {
   let events = match adapter.events().await {
      Ok(events) => events,
      Err(e) => {
         warn!("Failed to watch adapter {}: {e}", adapter.name());
         return;
      },
   };
   let mut events = pin!(events);

   while let Some(event) = events.next().await {
      if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
         info!("Adapter {} powered {}", adapter.name(), if powered { "on" } else { "off" });
         if powered {
            session.start();
         } else {
            session.set_connected(false);
            session.stop();
         }
      }
   }
   warn!("Adapter {} event stream ended", adapter.name());
}

fn calc_retry_delay(retry_count: u32) -> Duration {
   let base_delay = Duration::from_secs(2);
   let exponential = base_delay * (1 << retry_count.min(4));
   let delay = exponential.min(MAX_RETRY_DELAY);
   let jitter = rand::thread_rng().gen_range(0..1000);
   delay + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_retry_delay_is_bounded() {
      for retry in 0..20 {
         let delay = calc_retry_delay(retry);
         assert!(delay >= Duration::from_secs(2));
         assert!(delay < MAX_RETRY_DELAY + Duration::from_secs(1));
      }
      assert!(calc_retry_delay(4) >= Duration::from_secs(32));
   }
}
