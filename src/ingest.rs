//! Serial ingest worker: lines in, database rows and registry updates out.
//!
//! Runs on its own task. A packet's six inserts are issued one by one (each
//! commits on its own), then the whole packet goes to the refresh loop as a
//! single [`IngestEvent::Packet`], so the view never sees half a packet.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use crate::database::Database;
use crate::error::DbError;
use crate::models::SensorWrite;
use crate::serial::codec::PacketLineCodec;
use crate::serial::PacketDecoder;

/// Destination of decoded readings
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn append(&self, write: &SensorWrite) -> Result<(), DbError>;
}

#[async_trait]
impl ReadingSink for Database {
    async fn append(&self, write: &SensorWrite) -> Result<(), DbError> {
        self.append_value(&write.target, write.value).await.map(|_| ())
    }
}

#[async_trait]
impl<K: ReadingSink + ?Sized> ReadingSink for Arc<K> {
    async fn append(&self, write: &SensorWrite) -> Result<(), DbError> {
        (**self).append(write).await
    }
}

/// Everything one packet produced
#[derive(Debug, Clone, PartialEq)]
pub struct PacketBatch {
    pub received_at: OffsetDateTime,
    /// Arduino uptime in seconds
    pub uptime: f64,
    pub writes: Vec<SensorWrite>,
    /// Inserts that did not make it into the database
    pub failed_writes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    Packet(PacketBatch),
    /// The serial stream ended or failed; no more packets will arrive
    SerialClosed(String),
}

/// Decode one line and persist its readings.
///
/// Returns `None` for lines that are not valid packets; those are dropped
/// without further action.
pub async fn ingest_line<K: ReadingSink>(
    decoder: &PacketDecoder,
    sink: Option<&K>,
    line: &str,
) -> Option<PacketBatch> {
    let packet = match decoder.decode(line) {
        Ok(packet) => packet,
        Err(e) => {
            debug!("Dropping packet '{}': {}", line, e);
            return None;
        }
    };

    let writes = packet.writes();
    let mut failed_writes = 0;

    if let Some(sink) = sink {
        for write in &writes {
            if let Err(e) = sink.append(write).await {
                warn!("Failed to store {}: {}", write.target, e);
                failed_writes += 1;
            }
        }
    }

    Some(PacketBatch {
        received_at: OffsetDateTime::now_utc(),
        uptime: packet.uptime,
        writes,
        failed_writes,
    })
}

/// Read packets until the stream ends or the receiving side goes away
pub async fn run_ingest<R, K>(
    io: R,
    decoder: PacketDecoder,
    sink: Option<K>,
    events: mpsc::Sender<IngestEvent>,
) where
    R: AsyncRead + Unpin,
    K: ReadingSink,
{
    let mut lines = FramedRead::new(io, PacketLineCodec::new());
    info!("Listening for telemetry packets");

    let reason = loop {
        match lines.next().await {
            Some(Ok(line)) => {
                debug!("Received line: {}", line);
                if let Some(batch) = ingest_line(&decoder, sink.as_ref(), &line).await {
                    if batch.failed_writes > 0 {
                        warn!(
                            "{} of {} readings were not stored",
                            batch.failed_writes,
                            batch.writes.len()
                        );
                    }
                    if events.send(IngestEvent::Packet(batch)).await.is_err() {
                        debug!("Refresh loop gone, stopping ingest");
                        return;
                    }
                }
            }
            Some(Err(e)) => break format!("Serial read error: {}", e),
            None => break "Serial stream closed".to_string(),
        }
    };

    warn!("{}", reason);
    let _ = events.send(IngestEvent::SerialClosed(reason)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records writes and fails the ones aimed at `fail_schema`
    struct RecordingSink {
        written: Mutex<Vec<SensorWrite>>,
        fail_schema: Option<&'static str>,
    }

    impl RecordingSink {
        fn new(fail_schema: Option<&'static str>) -> Self {
            RecordingSink {
                written: Mutex::new(Vec::new()),
                fail_schema,
            }
        }
    }

    #[async_trait]
    impl ReadingSink for RecordingSink {
        async fn append(&self, write: &SensorWrite) -> Result<(), DbError> {
            if Some(write.target.schema.as_str()) == self.fail_schema {
                return Err(DbError::Address(write.target.to_string()));
            }
            self.written.lock().unwrap().push(write.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ingest_line_writes_six_values() {
        let sink = RecordingSink::new(None);
        let batch = ingest_line(&PacketDecoder::default(), Some(&sink), "50.2,1.3,12.1,22.5,100,-80")
            .await
            .unwrap();

        assert_eq!(batch.writes.len(), 6);
        assert_eq!(batch.failed_writes, 0);
        assert_eq!(batch.uptime, 100.0);
        assert_eq!(sink.written.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_malformed_line_writes_nothing() {
        let sink = RecordingSink::new(None);
        let decoder = PacketDecoder::default();

        assert!(ingest_line(&decoder, Some(&sink), "50.2,1.3,12.1,22.5,100").await.is_none());
        assert!(ingest_line(&decoder, Some(&sink), "50.2,1.3,12.1,22.5,100,-80,1").await.is_none());
        assert!(sink.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_writes() {
        let sink = RecordingSink::new(Some("main_battery"));
        let batch = ingest_line(&PacketDecoder::default(), Some(&sink), "50.2,1.3,12.1,22.5,100,-80")
            .await
            .unwrap();

        assert_eq!(batch.failed_writes, 3);
        assert_eq!(batch.writes.len(), 6);
        assert_eq!(sink.written.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_shared_sink_receives_writes() {
        let sink = Arc::new(RecordingSink::new(None));
        let shared = sink.clone();
        let batch = ingest_line(&PacketDecoder::default(), Some(&shared), "1,2,3,4,5,6")
            .await
            .unwrap();

        assert_eq!(batch.failed_writes, 0);
        assert_eq!(sink.written.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_without_database_still_emits_batch() {
        let batch = ingest_line::<RecordingSink>(&PacketDecoder::default(), None, "1,2,3,4,5,6")
            .await
            .unwrap();
        assert_eq!(batch.failed_writes, 0);
        assert_eq!(batch.writes.len(), 6);
    }

    #[tokio::test]
    async fn test_run_ingest_over_mock_stream() {
        let io = tokio_test::io::Builder::new()
            .read(b"Booting...\r\n50.2,1.3,12.1,22.5,100,-80\r\n")
            .read(b"50.0,1.0,12.0,22.0,101,")
            .read(b"-81\r\n")
            .build();

        let (tx, mut rx) = mpsc::channel(8);
        run_ingest(io, PacketDecoder::default(), None::<RecordingSink>, tx).await;

        let mut uptimes = Vec::new();
        let mut closed = false;
        while let Some(event) = rx.recv().await {
            match event {
                IngestEvent::Packet(batch) => uptimes.push(batch.uptime),
                IngestEvent::SerialClosed(_) => closed = true,
            }
        }

        assert_eq!(uptimes, vec![100.0, 101.0]);
        assert!(closed);
    }

    #[tokio::test]
    async fn test_run_ingest_stops_when_receiver_dropped() {
        let io = tokio_test::io::Builder::new()
            .read(b"1,2,3,4,5,6\n")
            .build();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        // Must return instead of blocking on a full channel
        run_ingest(io, PacketDecoder::default(), None::<RecordingSink>, tx).await;
    }
}
