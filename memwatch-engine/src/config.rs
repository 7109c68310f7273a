//! ## memwatch-engine::config
//! **Applies loaded configuration to the tracker and the server.**

use std::time::Duration;

use memwatch_config::{TelemetryConfig, TrackerConfig};
use memwatch_core::{AllocPool, RawAllocator, Symbolizer, Tracker, DEFAULT_MARKER, DEFAULT_TAG};
use memwatch_telemetry::ServerConfig;
use tracing::info;

use crate::error::EngineError;

/// Registers the configured names after the predefined entries and sets
/// the backtrace options. Stops at the first name the tracker rejects.
pub fn apply_tracker_config<A: RawAllocator, S: Symbolizer>(
    tracker: &Tracker<A, S>,
    config: &TrackerConfig,
) -> Result<(), EngineError> {
    tracker.set_backtrace_capture(config.capture_backtraces, config.backtrace_skip);
    for (index, name) in (AllocPool::PREDEFINED..).zip(&config.pools) {
        tracker.register_pool_name(index, name)?;
    }
    for (index, name) in (DEFAULT_TAG + 1..).zip(&config.tags) {
        tracker.register_tag_name(index, name)?;
    }
    for (index, name) in (DEFAULT_MARKER + 1..).zip(&config.markers) {
        tracker.register_marker_name(index, name)?;
    }
    info!(
        pools = tracker.pool_count(),
        tags = tracker.tag_count(),
        markers = tracker.marker_count(),
        capture_backtraces = config.capture_backtraces,
        "tracker configured"
    );
    Ok(())
}

pub fn server_config(config: &TelemetryConfig) -> ServerConfig {
    ServerConfig {
        stat_period: Duration::from_millis(config.stat_period_ms),
        chunk_size: config.chunk_size,
        max_request_len: config.max_request_len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_land_after_predefined() {
        let tracker: Tracker = Tracker::new();
        let config = TrackerConfig {
            capture_backtraces: false,
            pools: vec!["scratch".into(), "network".into()],
            tags: vec!["frame".into()],
            markers: vec!["level-1".into(), "level-2".into()],
            ..TrackerConfig::default()
        };
        apply_tracker_config(&tracker, &config).unwrap();
        assert_eq!(tracker.pool_count(), 6);
        assert_eq!(tracker.tag_count(), 2);
        assert_eq!(tracker.marker_count(), 3);
        assert_eq!(tracker.stat_config().pools[4].as_str(), "scratch");
        assert!(tracker.set_active_marker(2).is_ok());
    }

    #[test]
    fn test_rejected_name_is_reported() {
        let tracker: Tracker = Tracker::new();
        let config = TrackerConfig {
            pools: vec!["a-name-that-is-far-too-long".into()],
            ..TrackerConfig::default()
        };
        let err = apply_tracker_config(&tracker, &config).unwrap_err();
        assert!(matches!(err, EngineError::Contract(_)));
    }

    #[test]
    fn test_server_config_mapping() {
        let server = server_config(&TelemetryConfig::default());
        assert_eq!(server.stat_period, Duration::from_millis(250));
        assert_eq!(server.chunk_size, 4096);
    }
}
