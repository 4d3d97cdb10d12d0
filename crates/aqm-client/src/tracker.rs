//! Interaction counting between maintenance cycles.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

/// Counts messages sent per contact during the current maintenance window.
///
/// A contact's rate for a cycle is its configured baseline plus the sends
/// seen since the previous snapshot. Contacts with a baseline are reported
/// every cycle even when idle.
#[derive(Debug, Default)]
pub struct InteractionTracker {
    inner: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    baseline: HashMap<String, u32>,
    window: HashMap<String, u32>,
}

impl InteractionTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker seeded with baseline rates.
    pub fn with_baseline(baseline: impl IntoIterator<Item = (String, u32)>) -> Self {
        let tracker = Self::new();
        for (user, rate) in baseline {
            tracker.set_baseline(&user, rate);
        }
        tracker
    }

    /// Set the rate `user` is assumed to have each cycle.
    pub fn set_baseline(&self, user: &str, rate: u32) {
        self.lock().baseline.insert(user.to_string(), rate);
    }

    /// Count one message sent to `user`.
    pub fn record_send(&self, user: &str) {
        let mut state = self.lock();
        let count = state.window.entry(user.to_string()).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Rates for this cycle, sorted by user. Clears the window.
    pub fn snapshot_and_reset(&self) -> Vec<(String, u32)> {
        let mut state = self.lock();
        let window = std::mem::take(&mut state.window);

        let mut rates: BTreeMap<String, u32> =
            state.baseline.iter().map(|(user, rate)| (user.clone(), *rate)).collect();
        for (user, sent) in window {
            let rate = rates.entry(user).or_insert(0);
            *rate = rate.saturating_add(sent);
        }
        rates.into_iter().collect()
    }

    #[allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]
    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.inner.lock().expect("InteractionTracker mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_adds_to_baseline() {
        let tracker = InteractionTracker::with_baseline([("bob".to_string(), 60)]);
        tracker.record_send("bob");
        tracker.record_send("carol");
        tracker.record_send("carol");

        assert_eq!(
            tracker.snapshot_and_reset(),
            vec![("bob".to_string(), 61), ("carol".to_string(), 2)]
        );
    }

    #[test]
    fn snapshot_clears_window_but_keeps_baseline() {
        let tracker = InteractionTracker::with_baseline([("bob".to_string(), 10)]);
        tracker.record_send("carol");
        tracker.snapshot_and_reset();

        assert_eq!(tracker.snapshot_and_reset(), vec![("bob".to_string(), 10)]);
    }

    #[test]
    fn empty_tracker_reports_nothing() {
        assert!(InteractionTracker::new().snapshot_and_reset().is_empty());
    }
}
