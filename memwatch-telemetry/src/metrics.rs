//! ## memwatch-telemetry::metrics
//! **Prometheus counters for the telemetry server**
//!
//! The server updates these as parcels finish sending; owners expose them
//! through [`TelemetryMetrics::gather`].

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct TelemetryMetrics {
    pub registry: Registry,
    pub snapshots_sent: IntCounter,
    pub dumps_sent: IntCounter,
    pub bytes_sent: IntCounter,
    pub protocol_errors: IntCounter,
    pub sessions: IntCounter,
    pub queued_parcels: IntGauge,
}

impl TelemetryMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let snapshots_sent = IntCounter::new(
            "memwatch_snapshots_sent_total",
            "Statistics snapshots fully delivered",
        )?;
        let dumps_sent = IntCounter::new("memwatch_dumps_sent_total", "Heap dumps fully delivered")?;
        let bytes_sent = IntCounter::new(
            "memwatch_bytes_sent_total",
            "Bytes acknowledged by the channel",
        )?;
        let protocol_errors = IntCounter::new(
            "memwatch_protocol_errors_total",
            "Inbound packets dropped as malformed or unexpected",
        )?;
        let sessions = IntCounter::new(
            "memwatch_sessions_total",
            "Handshakes answered, new or resumed",
        )?;
        let queued_parcels = IntGauge::new(
            "memwatch_queued_parcels",
            "Parcels waiting in the send queue",
        )?;

        registry.register(Box::new(snapshots_sent.clone()))?;
        registry.register(Box::new(dumps_sent.clone()))?;
        registry.register(Box::new(bytes_sent.clone()))?;
        registry.register(Box::new(protocol_errors.clone()))?;
        registry.register(Box::new(sessions.clone()))?;
        registry.register(Box::new(queued_parcels.clone()))?;

        Ok(Self {
            registry,
            snapshots_sent,
            dumps_sent,
            bytes_sent,
            protocol_errors,
            sessions,
            queued_parcels,
        })
    }

    /// Text exposition of every metric.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
