use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule for step retries.
///
/// Delay doubles per attempt from the base, capped at the maximum, with up
/// to 25% random jitter added so a swarm of retrying runners does not
/// hammer a recovering collaborator in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before retrying after the given attempt number (1-based).
    /// An explicit hint from the collaborator overrides the schedule.
    pub fn delay_for(&self, attempt: u32, hint_ms: Option<u64>) -> Duration {
        if let Some(hint) = hint_ms {
            return Duration::from_millis(hint.min(self.max_ms));
        }

        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.base_ms.saturating_mul(1u64 << exponent);
        let capped = raw.min(self.max_ms);

        let jitter = if capped > 0 {
            rand::rng().random_range(0..=capped / 4)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }
}
