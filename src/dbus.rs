//! D-Bus interface exposing the monitor to desktop consumers.

use std::sync::Arc;

use log::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::beacon::session::ScanSession;

pub const SERVICE_NAME: &str = "org.podbattery";
pub const OBJECT_PATH: &str = "/org/podbattery/monitor";

pub struct MonitorService {
   session: Arc<ScanSession>,
}

impl MonitorService {
   pub const fn new(session: Arc<ScanSession>) -> Self {
      Self { session }
   }
}

#[interface(name = "org.podbattery.Monitor")]
impl MonitorService {
   async fn get_state(&self) -> String {
      self.session.snapshot().to_json().to_string()
   }

   async fn start(&self) -> bool {
      let started = self.session.start();
      if started {
         info!("Scanning started over D-Bus");
      }
      started
   }

   async fn stop(&self) -> bool {
      let stopped = self.session.stop();
      if stopped {
         info!("Scanning stopped over D-Bus");
      }
      stopped
   }

   // Signals
   #[zbus(signal)]
   pub async fn state_updated(emitter: &SignalEmitter<'_>, state: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_connected(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn device_disconnected(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   // Properties for polling-free updates
   #[zbus(property)]
   async fn state(&self) -> String {
      self.get_state().await
   }

   #[zbus(property)]
   async fn connected(&self) -> bool {
      self.session.snapshot().connected
   }

   #[zbus(property)]
   async fn scanning(&self) -> bool {
      self.session.is_running()
   }
}
