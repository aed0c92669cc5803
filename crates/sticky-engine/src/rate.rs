use core::time::Duration;
use std::collections::VecDeque;

use dashmap::DashMap;

use crate::{ChannelId, Timestamp};

/// Span of the trailing window used to estimate messages per minute.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sliding window of message arrivals per channel.
///
/// Windows are created on first use and never removed; they only shrink as
/// entries age out. Nothing here is persisted.
#[derive(Debug)]
pub struct RateTracker {
    window: Duration,
    channels: DashMap<ChannelId, VecDeque<Timestamp>>,
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::with_window(RATE_WINDOW)
    }
}

impl RateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            channels: DashMap::new(),
        }
    }

    /// Appends `at` and prunes entries older than `at - window`.
    ///
    /// An instant earlier than the newest entry is clamped to it so the
    /// window stays ordered.
    pub fn record_message(&self, channel: &ChannelId, at: Timestamp) {
        let mut window = self.channels.entry(channel.clone()).or_default();
        let at = window.back().map_or(at, |newest| at.max(*newest));
        window.push_back(at);

        let cutoff = at.saturating_sub(self.window);
        while window.front().is_some_and(|oldest| *oldest < cutoff) {
            window.pop_front();
        }
    }

    /// Messages retained in the channel's window; 0 for unseen channels.
    #[must_use]
    pub fn current_rate(&self, channel: &ChannelId) -> usize {
        self.channels.get(channel).map_or(0, |window| window.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn unknown_channel_has_zero_rate() {
        let tracker = RateTracker::new();
        assert_eq!(tracker.current_rate(&ChannelId::from("nowhere")), 0);
    }

    #[test]
    fn prunes_entries_older_than_window() {
        let tracker = RateTracker::new();
        let chan = ChannelId::from("c");
        tracker.record_message(&chan, ts(0));
        tracker.record_message(&chan, ts(30_000));
        tracker.record_message(&chan, ts(60_000));
        // 0 is exactly 60s old and stays.
        assert_eq!(tracker.current_rate(&chan), 3);

        tracker.record_message(&chan, ts(60_001));
        assert_eq!(tracker.current_rate(&chan), 3);

        tracker.record_message(&chan, ts(200_000));
        assert_eq!(tracker.current_rate(&chan), 1);
    }

    #[test]
    fn channels_are_independent() {
        let tracker = RateTracker::new();
        let a = ChannelId::from("a");
        let b = ChannelId::from("b");
        for i in 0..5 {
            tracker.record_message(&a, ts(i * 100));
        }
        tracker.record_message(&b, ts(0));
        assert_eq!(tracker.current_rate(&a), 5);
        assert_eq!(tracker.current_rate(&b), 1);
    }

    #[test]
    fn out_of_order_arrivals_are_clamped() {
        let tracker = RateTracker::with_window(Duration::from_secs(10));
        let chan = ChannelId::from("c");
        tracker.record_message(&chan, ts(20_000));
        tracker.record_message(&chan, ts(1_000));
        assert_eq!(tracker.current_rate(&chan), 2);
        tracker.record_message(&chan, ts(30_001));
        assert_eq!(tracker.current_rate(&chan), 1);
    }
}
