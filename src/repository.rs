//! In-memory history window over recent evaluations.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::db::{DbError, Store};
use crate::status::{Evaluation, ResourceStatus};

/// Single source of truth for "recent" state: a fixed-capacity FIFO window
/// of evaluations, safe for concurrent readers and one writer. Accepted
/// evaluations are forwarded to the durable store; the buffer mutation and
/// the durable write are deliberately not atomic (a crash in between loses
/// at most one sample).
pub struct StatusRepository {
    history: Mutex<VecDeque<Evaluation>>,
    capacity: usize,
    store: Store,
}

impl StatusRepository {
    pub fn new(capacity: usize, store: Store) -> Self {
        // The window always holds at least the latest sample.
        let capacity = capacity.max(1);
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            store,
        }
    }

    /// Capacity derived from the configured window: how many samples at the
    /// given interval fit into the history duration (rounded down).
    pub fn with_window(history_duration: Duration, sample_interval: Duration, store: Store) -> Self {
        let capacity = (history_duration.as_secs() / sample_interval.as_secs().max(1)) as usize;
        Self::new(capacity, store)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append to the window, evicting the oldest entry at capacity, then
    /// forward to durable storage. The buffer keeps the sample even when the
    /// durable write fails; the error is surfaced to the caller.
    pub fn add(&self, evaluation: Evaluation) -> Result<(), DbError> {
        {
            let mut history = self.history.lock().unwrap();
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(evaluation.clone());
        }
        // Lock released before the store write; the store serializes its own
        // writers.
        self.store.insert(&evaluation)
    }

    pub fn last(&self) -> Option<Evaluation> {
        self.history.lock().unwrap().back().cloned()
    }

    /// Copy-on-read snapshot, oldest first.
    pub fn history(&self) -> Vec<Evaluation> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    /// Resource samples across the window, grouped by resource id.
    pub fn resource_history(&self) -> HashMap<String, Vec<ResourceStatus>> {
        let history = self.history.lock().unwrap();
        let mut grouped: HashMap<String, Vec<ResourceStatus>> = HashMap::new();
        for eval in history.iter() {
            for resource in &eval.resources {
                grouped
                    .entry(resource.id.clone())
                    .or_default()
                    .push(resource.clone());
            }
        }
        grouped
    }

    /// Replay the most recent `capacity` persisted measurements into the
    /// window so it survives a restart without re-sampling. A corrupt or
    /// missing store is logged and yields an empty window, never a boot
    /// failure.
    pub fn restore(&self) {
        match self.store.recent_evaluations(self.capacity) {
            Ok(evaluations) => {
                let count = evaluations.len();
                let mut history = self.history.lock().unwrap();
                for eval in evaluations {
                    if history.len() >= self.capacity {
                        history.pop_front();
                    }
                    history.push_back(eval);
                }
                tracing::info!("Restored {} history entries", count);
            }
            Err(e) => {
                tracing::error!("Failed to restore history, starting empty: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ResourceStatus;
    use tempfile::NamedTempFile;

    fn repository(capacity: usize) -> (NamedTempFile, StatusRepository) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, StatusRepository::new(capacity, store))
    }

    fn ram_eval(time: i64, current: f32) -> Evaluation {
        Evaluation::at(
            time,
            vec![],
            vec![ResourceStatus {
                id: "RRam".to_string(),
                name: "RAM usage".to_string(),
                description: String::new(),
                current,
                total: 100.0,
            }],
        )
    }

    #[test]
    fn test_window_capacity_rounds_down() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let repo = StatusRepository::with_window(
            Duration::from_secs(100),
            Duration::from_secs(30),
            store,
        );
        assert_eq!(repo.capacity(), 3);
    }

    #[test]
    fn test_window_shorter_than_interval_keeps_one_entry() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let repo = StatusRepository::with_window(
            Duration::from_secs(10),
            Duration::from_secs(30),
            store,
        );
        assert_eq!(repo.capacity(), 1);

        repo.add(ram_eval(0, 10.0)).unwrap();
        repo.add(ram_eval(1, 20.0)).unwrap();
        assert_eq!(repo.history().len(), 1);
        assert_eq!(repo.last().unwrap().time, 1);
    }

    #[test]
    fn test_bounded_buffer_evicts_oldest_first() {
        let (_tmp, repo) = repository(3);

        repo.add(ram_eval(0, 50.0)).unwrap();
        repo.add(ram_eval(1, 60.0)).unwrap();
        repo.add(ram_eval(2, 70.0)).unwrap();
        repo.add(ram_eval(3, 80.0)).unwrap();

        let snapshot = repo.history();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot.iter().map(|e| e.time).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let last = repo.last().unwrap();
        assert_eq!(last.resources[0].usage(), 80.0);
    }

    #[test]
    fn test_snapshot_length_is_min_of_n_and_capacity() {
        let (_tmp, repo) = repository(5);
        repo.add(ram_eval(0, 10.0)).unwrap();
        repo.add(ram_eval(1, 20.0)).unwrap();
        assert_eq!(repo.history().len(), 2);
        assert!(repo.last().is_some());
    }

    #[test]
    fn test_resource_history_grouping() {
        let (_tmp, repo) = repository(5);
        repo.add(ram_eval(0, 10.0)).unwrap();
        repo.add(ram_eval(1, 20.0)).unwrap();

        let grouped = repo.resource_history();
        assert_eq!(grouped["RRam"].len(), 2);
        assert_eq!(grouped["RRam"][1].current, 20.0);
    }

    #[test]
    fn test_restore_replays_recent_measurements_in_order() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        for t in 0..5 {
            store.insert(&ram_eval(t, t as f32)).unwrap();
        }

        let repo = StatusRepository::new(3, store);
        repo.restore();

        let snapshot = repo.history();
        assert_eq!(
            snapshot.iter().map(|e| e.time).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn test_restore_failure_yields_empty_window() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        // Corrupt the schema out from under the repository.
        {
            let conn = rusqlite::Connection::open(tmp.path()).unwrap();
            conn.execute_batch("DROP TABLE measurement;").unwrap();
        }

        let repo = StatusRepository::new(3, store);
        repo.restore();
        assert!(repo.history().is_empty());
        assert!(repo.last().is_none());
    }
}
