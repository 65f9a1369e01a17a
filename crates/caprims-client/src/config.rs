use std::time::Duration;

use caprims_dbr::{DecodeOptions, PutLengthPolicy};
use caprims_native::{EventMask, Priority};

/// Controls client context behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Dispatch callbacks from native threads instead of inside pend calls.
    /// Only a preemptive context can be joined by other threads.
    pub preemptive: bool,
    /// Wait used by the blocking helpers when the caller passes no timeout.
    pub pend_timeout: Duration,
    /// Priority of channels created without an explicit one.
    pub priority: Priority,
    /// How writes longer than the channel or request are handled.
    pub put_length_policy: PutLengthPolicy,
    /// Mask of subscriptions created without an explicit one.
    pub subscription_mask: EventMask,
    /// Representation of decoded values unless a request overrides it.
    pub decode: DecodeOptions,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            preemptive: false,
            pend_timeout: Duration::from_secs(1),
            priority: Priority::DEFAULT,
            put_length_policy: PutLengthPolicy::Truncate,
            subscription_mask: EventMask::default(),
            decode: DecodeOptions::default(),
        }
    }
}

impl ContextConfig {
    pub fn with_preemptive(mut self, preemptive: bool) -> Self {
        self.preemptive = preemptive;
        self
    }

    pub fn with_pend_timeout(mut self, timeout: Duration) -> Self {
        self.pend_timeout = timeout;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_put_length_policy(mut self, policy: PutLengthPolicy) -> Self {
        self.put_length_policy = policy;
        self
    }

    pub fn with_subscription_mask(mut self, mask: EventMask) -> Self {
        self.subscription_mask = mask;
        self
    }

    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }
}
