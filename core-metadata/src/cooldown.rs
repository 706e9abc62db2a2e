//! Per-item cool-down bookkeeping for freshness checks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_traits::Clock;

/// Remembers when each item was last checked.
///
/// Owned by a single updater; two updaters never share a tracker.
pub struct CooldownTracker {
    cool_down: chrono::Duration,
    clock: Arc<dyn Clock>,
    last_checked: Mutex<HashMap<String, i64>>,
}

impl CooldownTracker {
    pub fn new(cool_down: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cool_down: chrono::Duration::from_std(cool_down)
                .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100)),
            clock,
            last_checked: Mutex::new(HashMap::new()),
        }
    }

    /// Record a check of `item_id` now, unless one happened within the cool-down.
    ///
    /// Returns `true` when the caller may proceed with the check.
    pub fn try_begin(&self, item_id: &str) -> bool {
        let now = self.clock.now().timestamp_millis();
        let window = self.cool_down.num_milliseconds();
        let mut checked = self
            .last_checked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match checked.get(item_id) {
            Some(&last) if now.saturating_sub(last) < window => false,
            _ => {
                checked.insert(item_id.to_string(), now);
                true
            }
        }
    }

    /// Unix millis of the last recorded check.
    pub fn last_checked(&self, item_id: &str) -> Option<i64> {
        self.last_checked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(item_id)
            .copied()
    }

    pub fn forget(&self, item_id: &str) {
        self.last_checked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(item_id);
    }
}
