use core::time::Duration;

/// Cooldown and traffic requirement for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdSnapshot {
    /// Minimum time since the last post before a resend is considered.
    pub cooldown: Duration,
    /// Minimum intervening non-bot messages before a resend.
    pub message_threshold: usize,
}

/// Maps a channel's messages-per-minute to resend timing.
///
/// Busy channels wait longer and need more traffic before the sticky is
/// reposted; quiet channels get it back quickly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdPolicy;

impl ThresholdPolicy {
    const BUSY: ThresholdSnapshot = ThresholdSnapshot {
        cooldown: Duration::from_millis(7_000),
        message_threshold: 10,
    };
    const MODERATE: ThresholdSnapshot = ThresholdSnapshot {
        cooldown: Duration::from_millis(5_000),
        message_threshold: 5,
    };
    const QUIET: ThresholdSnapshot = ThresholdSnapshot {
        cooldown: Duration::from_millis(3_000),
        message_threshold: 3,
    };

    #[must_use]
    pub const fn evaluate(rate: usize) -> ThresholdSnapshot {
        if rate > 20 {
            Self::BUSY
        } else if rate > 10 {
            Self::MODERATE
        } else {
            Self::QUIET
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(rate: usize) -> (u128, usize) {
        let snap = ThresholdPolicy::evaluate(rate);
        (snap.cooldown.as_millis(), snap.message_threshold)
    }

    #[test]
    fn tiers_match_table() {
        assert_eq!(pair(25), (7_000, 10));
        assert_eq!(pair(15), (5_000, 5));
        assert_eq!(pair(3), (3_000, 3));
        assert_eq!(pair(0), (3_000, 3));
    }

    #[test]
    fn tier_edges() {
        assert_eq!(pair(10), (3_000, 3));
        assert_eq!(pair(11), (5_000, 5));
        assert_eq!(pair(20), (5_000, 5));
        assert_eq!(pair(21), (7_000, 10));
        assert_eq!(pair(usize::MAX), (7_000, 10));
    }
}
