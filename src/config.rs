//! Relay configuration
//!
//! Tuning knobs for the capture loop and subscriber fan-out. The defaults
//! mirror a typical IP-camera preview: ~10 frames per second at moderate
//! JPEG quality.

use std::time::Duration;

/// Configuration for sessions and the registry
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Target frames per second for the capture loop
    pub target_fps: u32,

    /// Maximum time to wait for the upstream capture to open
    pub open_timeout: Duration,

    /// Maximum time to wait for a single frame read
    pub read_timeout: Duration,

    /// Delay between the last subscriber leaving and session teardown
    pub grace_period: Duration,

    /// Bounded capacity of each subscriber's outbound frame queue
    pub subscriber_queue_capacity: usize,

    /// JPEG quality (0-100) used when encoding frames for transport
    pub jpeg_quality: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target_fps: 10,
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(3),
            subscriber_queue_capacity: 4,
            jpeg_quality: 70,
        }
    }
}

impl RelayConfig {
    /// Set the target frame rate (clamped to at least 1 fps)
    pub fn target_fps(mut self, fps: u32) -> Self {
        self.target_fps = fps.max(1);
        self
    }

    /// Set the capture open timeout
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the per-frame read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the teardown grace period
    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    /// Set the per-subscriber frame queue capacity (at least 1)
    pub fn subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity.max(1);
        self
    }

    /// Set the transport JPEG quality (capped at 100)
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.min(100);
        self
    }

    /// Interval between frame pulls derived from the target frame rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.target_fps.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.target_fps, 10);
        assert_eq!(config.subscriber_queue_capacity, 4);
        assert_eq!(config.jpeg_quality, 70);
        assert_eq!(config.frame_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_builder_chaining() {
        let config = RelayConfig::default()
            .target_fps(25)
            .open_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(2))
            .grace_period(Duration::from_millis(500))
            .subscriber_queue_capacity(8)
            .jpeg_quality(90);

        assert_eq!(config.target_fps, 25);
        assert_eq!(config.open_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert_eq!(config.subscriber_queue_capacity, 8);
        assert_eq!(config.jpeg_quality, 90);
    }

    #[test]
    fn test_fps_floor() {
        // A zero frame rate would make the interval division panic
        let config = RelayConfig::default().target_fps(0);

        assert_eq!(config.target_fps, 1);
        assert_eq!(config.frame_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_quality_capped() {
        let config = RelayConfig::default().jpeg_quality(255);

        assert_eq!(config.jpeg_quality, 100);
    }

    #[test]
    fn test_queue_capacity_floor() {
        let config = RelayConfig::default().subscriber_queue_capacity(0);

        assert_eq!(config.subscriber_queue_capacity, 1);
    }
}
