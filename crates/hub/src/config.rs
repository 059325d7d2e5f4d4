//! Hub tuning knobs.

use std::time::Duration;

use crate::{
    CONTROL_QUEUE_CAPACITY, DRAIN_TIMEOUT, KEEPALIVE_PERIOD, OUTBOX_CAPACITY, PONG_WAIT,
    WRITE_TIMEOUT,
};

/// What the hub does when a member's outbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Unregister and close the member. Memory stays bounded and the client
    /// sees a disconnect it can react to.
    #[default]
    Evict,
    /// Drop the frame for that member only and keep it connected.
    DropNewest,
}

/// Configuration shared by the hub and every client it spawns.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames a client may have queued before the overflow policy applies.
    pub outbox_capacity: usize,
    /// Requests that may be queued for the control loop.
    pub control_queue_capacity: usize,
    /// Interval between keepalive probes.
    pub keepalive_period: Duration,
    /// Silence tolerated from a peer before it is declared dead.
    pub pong_wait: Duration,
    /// Upper bound on a single frame write.
    pub write_timeout: Duration,
    /// Upper bound on flushing queued frames while closing.
    pub drain_timeout: Duration,
    /// Whether a broadcast is also delivered back to its sender.
    pub echo_to_sender: bool,
    pub overflow_policy: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: OUTBOX_CAPACITY,
            control_queue_capacity: CONTROL_QUEUE_CAPACITY,
            keepalive_period: KEEPALIVE_PERIOD,
            pong_wait: PONG_WAIT,
            write_timeout: WRITE_TIMEOUT,
            drain_timeout: DRAIN_TIMEOUT,
            echo_to_sender: true,
            overflow_policy: OverflowPolicy::Evict,
        }
    }
}

impl HubConfig {
    /// Clamps values that would make channels or timers unusable.
    pub(crate) fn normalized(mut self) -> Self {
        self.outbox_capacity = self.outbox_capacity.max(1);
        self.control_queue_capacity = self.control_queue_capacity.max(1);
        if self.keepalive_period.is_zero() {
            self.keepalive_period = KEEPALIVE_PERIOD;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HubConfig::default();
        assert_eq!(config.outbox_capacity, 256);
        assert_eq!(config.keepalive_period, Duration::from_secs(25));
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert!(config.echo_to_sender);
        assert_eq!(config.overflow_policy, OverflowPolicy::Evict);
        assert!(config.keepalive_period < config.pong_wait);
    }

    #[test]
    fn normalized_clamps_zero_values() {
        let config = HubConfig {
            outbox_capacity: 0,
            control_queue_capacity: 0,
            keepalive_period: Duration::ZERO,
            ..HubConfig::default()
        }
        .normalized();
        assert_eq!(config.outbox_capacity, 1);
        assert_eq!(config.control_queue_capacity, 1);
        assert_eq!(config.keepalive_period, KEEPALIVE_PERIOD);
    }
}
