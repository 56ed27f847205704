// Common test utilities for scenario tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of what the fakes observed.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn new_journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Index of the first entry equal to `entry`.
pub fn position(journal: &Journal, entry: &str) -> Option<usize> {
    journal.lock().unwrap().iter().position(|e| e == entry)
}

pub fn count(journal: &Journal, entry: &str) -> usize {
    journal.lock().unwrap().iter().filter(|e| *e == entry).count()
}

/// Waits until `entry` shows up in the journal. Panics after a generous
/// (virtual or real) deadline.
pub async fn wait_for(journal: &Journal, entry: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
    while position(journal, entry).is_none() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "journal never got {:?}: {:?}",
            entry,
            entries(journal)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Waits until `entry` was recorded at least `n` times.
pub async fn wait_for_count(journal: &Journal, entry: &str, n: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
    while count(journal, entry) < n {
        assert!(
            tokio::time::Instant::now() < deadline,
            "journal never got {} x {:?}: {:?}",
            n,
            entry,
            entries(journal)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Asserts two virtual-clock durations match within a few milliseconds.
pub fn assert_near(actual: Duration, expected: Duration) {
    let slack = Duration::from_millis(50);
    assert!(
        actual + slack >= expected && actual <= expected + slack,
        "expected about {:?}, got {:?}",
        expected,
        actual
    );
}
