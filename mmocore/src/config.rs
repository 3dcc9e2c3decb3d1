//! Engine configuration
//!
//! [`MmoConfig`] covers the recognized options of the engine: selector
//! poll interval, per-loop thread counts, worker pool size, maximum frame
//! size and the flood-manager tick width and filter triples. Binaries
//! typically populate it from CLI arguments and environment variables and
//! call [`MmoConfig::validate`] before starting a controller.

use serde::Deserialize;

use crate::flood::FloodFilter;

/// Configuration for an [`MmoController`](crate::MmoController).
#[derive(Debug, Clone, Deserialize)]
pub struct MmoConfig {
    /// Sleep between selector poll iterations (ms).
    pub poll_interval_ms: u64,
    /// Number of read selector loops.
    pub read_loops: usize,
    /// Number of write selector loops.
    pub write_loops: usize,
    /// Worker threads executing decoded packets.
    pub workers: usize,
    /// Pending execute jobs admitted before submissions are dropped.
    pub dispatch_queue_size: usize,
    /// Largest admissible frame payload in bytes.
    pub max_frame_size: usize,
    /// Flood-manager tick width (ms).
    pub flood_tick_ms: u64,
    /// Flood filter triples; all are evaluated on every check.
    pub flood_filters: Vec<FloodFilter>,
    /// Interval between flood-entry sweeps (ms).
    pub flood_sweep_interval_ms: u64,
}

impl Default for MmoConfig {
    fn default() -> Self {
        MmoConfig {
            poll_interval_ms: 10,
            read_loops: 1,
            write_loops: 1,
            workers: 4,
            dispatch_queue_size: 10_000,
            max_frame_size: 8 * 1024,
            flood_tick_ms: 1_000,
            flood_filters: vec![FloodFilter {
                warn_limit: 30,
                reject_limit: 60,
                window: 10,
            }],
            flood_sweep_interval_ms: 60_000,
        }
    }
}

impl MmoConfig {
    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.read_loops == 0 || self.write_loops == 0 {
            return Err("at least one read and one write loop are required".to_string());
        }
        if self.workers == 0 {
            return Err("the worker pool needs at least one thread".to_string());
        }
        if self.max_frame_size == 0 || self.max_frame_size > u16::MAX as usize {
            return Err(format!(
                "max_frame_size must be within 1..={}",
                u16::MAX
            ));
        }
        if self.flood_tick_ms == 0 {
            return Err("flood_tick_ms must be positive".to_string());
        }
        for filter in &self.flood_filters {
            if filter.window == 0 {
                return Err("flood filter windows must span at least one tick".to_string());
            }
            if filter.reject_limit < filter.warn_limit {
                return Err("flood filter reject limit below its warn limit".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(MmoConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_loops_and_workers() {
        let mut cfg = MmoConfig::default();
        cfg.read_loops = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = MmoConfig::default();
        cfg.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_unframeable_max_frame_size() {
        let mut cfg = MmoConfig::default();
        cfg.max_frame_size = u16::MAX as usize + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_flood_limits() {
        let mut cfg = MmoConfig::default();
        cfg.flood_filters = vec![FloodFilter {
            warn_limit: 10,
            reject_limit: 5,
            window: 3,
        }];
        assert!(cfg.validate().is_err());
    }
}
