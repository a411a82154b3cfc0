/// Application state owned by the refresh loop
use log::{debug, warn};
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::cache::Registry;
use crate::ingest::{IngestEvent, PacketBatch};

#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Registry,
    pub database_connected: bool,
    pub arduino_connected: bool,
    /// When the newest valid packet arrived; None until the first one
    pub last_packet_at: Option<OffsetDateTime>,
    /// Arduino uptime reported by the newest packet, in seconds
    pub arduino_uptime: Option<f64>,
    pub packets_received: u64,
}

impl AppState {
    pub fn new(registry: Registry, database_connected: bool, arduino_connected: bool) -> Self {
        AppState {
            registry,
            database_connected,
            arduino_connected,
            last_packet_at: None,
            arduino_uptime: None,
            packets_received: 0,
        }
    }

    pub fn packet_received(&self) -> bool {
        self.last_packet_at.is_some()
    }

    /// Whole seconds since the newest packet
    pub fn seconds_since_last_packet(&self, now: OffsetDateTime) -> Option<i64> {
        self.last_packet_at
            .map(|at| (now - at).whole_seconds().max(0))
    }

    /// Apply every packet of a batch to the registry in one go
    pub fn apply_batch(&mut self, batch: &PacketBatch) {
        for write in &batch.writes {
            self.registry
                .record(&write.target.unique_tag(), batch.received_at, write.value);
        }
        self.last_packet_at = Some(batch.received_at);
        self.arduino_uptime = Some(batch.uptime);
        self.packets_received += 1;
    }

    pub fn apply(&mut self, event: IngestEvent) {
        match event {
            IngestEvent::Packet(batch) => self.apply_batch(&batch),
            IngestEvent::SerialClosed(reason) => {
                warn!("Arduino disconnected: {}", reason);
                self.arduino_connected = false;
            }
        }
    }

    /// Apply everything the ingest task has sent so far. Returns the number
    /// of events applied.
    pub fn drain(&mut self, events: &mut mpsc::Receiver<IngestEvent>) -> usize {
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        if applied > 0 {
            debug!("Applied {} ingest events", applied);
        }
        applied
    }
}
