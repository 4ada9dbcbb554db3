//! Link activity tracking for the clock face
//!
//! Tracks in/out frame activity for each remote controller using a DashMap so
//! session tasks can record without contending on a lock and the renderer can
//! light "link" indicators.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::trace;

/// Direction of frame activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActivityDirection {
    /// Frame received from a remote controller
    Inbound,
    /// Frame sent to a remote controller
    Outbound,
}

/// Last activity per (endpoint, direction)
pub struct LinkActivity {
    activity_map: DashMap<(String, ActivityDirection), Instant>,
    /// How long an indicator stays lit after the last frame
    led_duration: Duration,
}

impl LinkActivity {
    pub fn new(led_duration: Duration) -> Self {
        Self {
            activity_map: DashMap::new(),
            led_duration,
        }
    }

    /// Record a frame on `endpoint`
    pub fn record(&self, endpoint: &str, direction: ActivityDirection) {
        self.activity_map
            .insert((endpoint.to_string(), direction), Instant::now());
        trace!("Activity: {} {:?}", endpoint, direction);
    }

    /// True if a frame went by within the indicator window
    pub fn is_active(&self, endpoint: &str, direction: ActivityDirection) -> bool {
        self.since_last(endpoint, direction)
            .map(|elapsed| elapsed < self.led_duration)
            .unwrap_or(false)
    }

    /// Time since the last frame, if any was ever seen
    pub fn since_last(&self, endpoint: &str, direction: ActivityDirection) -> Option<Duration> {
        self.activity_map
            .get(&(endpoint.to_string(), direction))
            .map(|entry| entry.value().elapsed())
    }
}

impl Default for LinkActivity {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_activity_tracking() {
        let tracker = LinkActivity::new(Duration::from_millis(100));

        tracker.record("studio-a:6254", ActivityDirection::Inbound);

        assert!(tracker.is_active("studio-a:6254", ActivityDirection::Inbound));
        assert!(!tracker.is_active("studio-a:6254", ActivityDirection::Outbound));
        assert!(tracker.since_last("studio-b:6254", ActivityDirection::Inbound).is_none());

        sleep(Duration::from_millis(150));

        assert!(!tracker.is_active("studio-a:6254", ActivityDirection::Inbound));
        assert!(tracker.since_last("studio-a:6254", ActivityDirection::Inbound).is_some());
    }
}
