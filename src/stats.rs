//! Runtime counters
//!
//! Cheap process-local counters read by the stats flush job and the
//! `inspect` owner command.

use crate::gateway::EventKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Stats {
    started: Instant,
    events: RwLock<HashMap<EventKind, u64>>,
    commands: AtomicU64,
    command_errors: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            events: RwLock::new(HashMap::new()),
            commands: AtomicU64::new(0),
            command_errors: AtomicU64::new(0),
        }
    }

    pub fn record_event(&self, kind: EventKind) {
        *self.events.write().entry(kind).or_insert(0) += 1;
    }

    pub fn record_command(&self, ok: bool) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.command_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn event_count(&self, kind: EventKind) -> u64 {
        self.events.read().get(&kind).copied().unwrap_or(0)
    }

    /// Per-type counts, busiest first.
    pub fn event_counts(&self) -> Vec<(EventKind, u64)> {
        let mut counts: Vec<_> = self.events.read().iter().map(|(k, v)| (*k, *v)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        counts
    }

    pub fn total_events(&self) -> u64 {
        self.events.read().values().sum()
    }

    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    pub fn command_errors(&self) -> u64 {
        self.command_errors.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_counts_sorted() {
        let stats = Stats::new();
        stats.record_event(EventKind::MessageCreate);
        stats.record_event(EventKind::MessageCreate);
        stats.record_event(EventKind::Ready);

        assert_eq!(stats.total_events(), 3);
        assert_eq!(stats.event_count(EventKind::MessageCreate), 2);
        assert_eq!(
            stats.event_counts(),
            vec![(EventKind::MessageCreate, 2), (EventKind::Ready, 1)]
        );
    }

    #[test]
    fn test_command_counters() {
        let stats = Stats::new();
        stats.record_command(true);
        stats.record_command(false);
        assert_eq!(stats.commands(), 2);
        assert_eq!(stats.command_errors(), 1);
    }
}
