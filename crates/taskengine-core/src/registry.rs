//! Task registry.
//!
//! A concurrent map from [`TaskId`] to its [`ResultCell`], with a soft
//! retention bound on terminal entries: once the registry holds more than
//! `retention_terminal_max` terminal entries, the oldest (by
//! `completed_at`) is evicted on the next insert. Non-terminal entries are
//! never evicted.

use std::sync::Arc;

use dashmap::DashMap;

use crate::task::{ResultCell, TaskId};

pub(crate) struct Registry {
    cells: DashMap<TaskId, Arc<ResultCell>>,
    retention_terminal_max: usize,
}

impl Registry {
    pub(crate) fn new(retention_terminal_max: usize) -> Self {
        Self {
            cells: DashMap::new(),
            retention_terminal_max,
        }
    }

    pub(crate) fn insert(&self, id: TaskId, cell: Arc<ResultCell>) {
        self.cells.insert(id, cell);
        self.evict_if_over_bound();
    }

    #[must_use]
    pub(crate) fn lookup(&self, id: TaskId) -> Option<Arc<ResultCell>> {
        self.cells.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn remove(&self, id: TaskId) {
        self.cells.remove(&id);
        tracing::debug!(task_id = id.as_u64(), "registry entry released");
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    /// All cells currently tracked. Used by `stop(wait_for_completion)` to
    /// enumerate running/pending work without needing a separate index.
    pub(crate) fn all_cells(&self) -> Vec<Arc<ResultCell>> {
        self.cells.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn evict_if_over_bound(&self) {
        loop {
            let terminal_count = self
                .cells
                .iter()
                .filter(|e| e.value().is_ready())
                .count();
            if terminal_count <= self.retention_terminal_max {
                return;
            }

            let oldest = self
                .cells
                .iter()
                .filter(|e| e.value().is_ready())
                .filter_map(|e| {
                    e.value()
                        .snapshot()
                        .completed_at
                        .map(|completed_at| (*e.key(), completed_at))
                })
                .min_by_key(|(_, completed_at)| *completed_at);

            match oldest {
                Some((id, _)) => {
                    self.cells.remove(&id);
                    tracing::debug!(task_id = id.as_u64(), "terminal entry evicted over retention bound");
                }
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    fn terminal_cell(id: u64) -> (TaskId, Arc<ResultCell>) {
        let task_id = TaskId::from_raw(id);
        let cell = ResultCell::new(task_id, Priority::Normal);
        cell.transition_to_running(0).unwrap();
        cell.complete(Arc::new(()));
        (task_id, cell)
    }

    #[test]
    fn lookup_returns_the_same_cell() {
        let registry = Registry::new(10);
        let (id, cell) = terminal_cell(1);
        registry.insert(id, Arc::clone(&cell));
        let found = registry.lookup(id).unwrap();
        assert!(Arc::ptr_eq(&found, &cell));
    }

    #[test]
    fn lookup_missing_returns_none() {
        let registry = Registry::new(10);
        assert!(registry.lookup(TaskId::from_raw(99)).is_none());
    }

    #[test]
    fn non_terminal_entries_are_never_evicted() {
        let registry = Registry::new(1);
        let pending_id = TaskId::from_raw(1);
        let pending_cell = ResultCell::new(pending_id, Priority::Normal);
        registry.insert(pending_id, pending_cell);

        for i in 2..10 {
            let (id, cell) = terminal_cell(i);
            registry.insert(id, cell);
        }

        assert!(registry.lookup(pending_id).is_some());
    }

    #[test]
    fn retention_bound_evicts_oldest_terminal_entry() {
        let registry = Registry::new(2);
        let (id1, cell1) = terminal_cell(1);
        registry.insert(id1, cell1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let (id2, cell2) = terminal_cell(2);
        registry.insert(id2, cell2);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let (id3, cell3) = terminal_cell(3);
        registry.insert(id3, cell3);

        assert!(registry.lookup(id1).is_none());
        assert!(registry.lookup(id2).is_some());
        assert!(registry.lookup(id3).is_some());
    }
}
