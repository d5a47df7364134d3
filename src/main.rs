//! `AirPods` battery monitor
//!
//! This service watches BLE proximity-pairing beacons, derives the battery
//! state of both buds and the case, and publishes it on D-Bus while the
//! headset is connected.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use beacon::session::ScanSession;
use bluetooth::{connectivity::BluezProbe, scanner::Scanner};
use dbus::MonitorService;
use event::{EventBus, PodsEvent};

mod beacon;
mod bluetooth;
mod config;
mod dbus;
mod error;
mod event;
mod render;

use crate::{dbus::MonitorServiceSignals, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting podbattery monitor...");

   // Load configuration
   let config = config::Config::load()?;
   info!(
      "Loaded configuration: scan mode {}, {} known devices",
      config.scan_mode,
      config.known_devices.len()
   );
   let known = config.known_addresses()?;

   // Open the adapter
   let bt_session = bluer::Session::new().await?;
   let adapter = bluetooth::scanner::open_adapter(&bt_session, &config).await?;

   let session = Arc::new(ScanSession::new());

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name(dbus::SERVICE_NAME)?
      .serve_at(dbus::OBJECT_PATH, MonitorService::new(session.clone()))?
      .build()
      .await?;
   info!("D-Bus service started at {}", dbus::SERVICE_NAME);

   let event_bus = EventProcessor::new();
   event_bus.clone().spawn_dispatcher(connection).await?;

   // Start collaborators
   let (discovery, power) = Scanner::new(adapter.clone(), session.clone(), &config).spawn();
   let connectivity = bluetooth::connectivity::spawn(
      BluezProbe::new(adapter.clone(), known),
      session.clone(),
      config.connectivity_poll(),
   );
   let scanning = render::spawn_scanning(&session, event_bus.clone());
   let renderer = render::spawn(session.clone(), event_bus, config.render_interval());

   match adapter.is_powered().await {
      Ok(true) => {
         session.start();
      },
      Ok(false) => warn!("Adapter {} is powered off, waiting for it", adapter.name()),
      Err(e) => warn!(
         "Failed to read power state of adapter {}: {e}, waiting for it",
         adapter.name()
      ),
   }

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down podbattery monitor...");

   session.stop();
   for handle in [discovery, power, connectivity, scanning, renderer] {
      handle.abort();
   }

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<PodsEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<PodsEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(&self, iface: &InterfaceRef<MonitorService>, event: PodsEvent) -> Result<()> {
      match event {
         PodsEvent::Connected => {
            iface.device_connected().await?;
            iface.get().await.connected_changed(iface.signal_emitter()).await?;
         },
         PodsEvent::Disconnected => {
            iface.device_disconnected().await?;
            let service = iface.get().await;
            service.connected_changed(iface.signal_emitter()).await?;
            // Battery fields were reset with the disconnect
            service.state_changed(iface.signal_emitter()).await?;
         },
         PodsEvent::StateUpdated(snapshot) => {
            iface.state_updated(&snapshot.to_json().to_string()).await?;
            iface.get().await.state_changed(iface.signal_emitter()).await?;
         },
         PodsEvent::ScanningChanged(_) => {
            iface.get().await.scanning_changed(iface.signal_emitter()).await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, MonitorService>(dbus::OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: PodsEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
