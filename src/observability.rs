//! Tracing setup and process counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber; `RUST_LOG` overrides the `info` default
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    submissions_accepted: AtomicU64,
    submissions_rejected: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    poison_messages: AtomicU64,
    people_detected: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submission_accepted(&self) {
        self.submissions_accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "submissions_accepted", "Metric incremented");
    }

    pub fn submission_rejected(&self) {
        self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "submissions_rejected", "Metric incremented");
    }

    pub fn task_completed(&self, people: usize) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.people_detected.fetch_add(people as u64, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_completed", people, "Metric incremented");
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_failed", "Metric incremented");
    }

    pub fn poison_message(&self) {
        self.poison_messages.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "poison_messages", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submissions_accepted: self.submissions_accepted.load(Ordering::Relaxed),
            submissions_rejected: self.submissions_rejected.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            poison_messages: self.poison_messages.load(Ordering::Relaxed),
            people_detected: self.people_detected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub submissions_accepted: u64,
    pub submissions_rejected: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub poison_messages: u64,
    pub people_detected: u64,
}
