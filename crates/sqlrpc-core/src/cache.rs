//! Compute-once concurrent map.
//!
//! Each key owns an `Arc<OnceCell<Arc<V>>>`. The map lock is held only long
//! enough to fetch or insert the cell; initialisation runs outside it, so
//! different keys initialise in parallel while callers racing on the same
//! key block on that key's cell and all observe the same `Arc<V>`.
//!
//! A failed initialisation goes to the caller that ran it; the empty cell is
//! dropped once no other caller is waiting on it, and the next caller retries.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

pub struct OnceMap<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<Arc<V>>>>>,
}

impl<K, V> Default for OnceMap<K, V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> OnceMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, computing it with `init` if absent.
    pub fn get_or_try_init<E, F>(&self, key: &K, init: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let cell = {
            let mut cells = self.cells.lock();
            cells
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let result = cell.get_or_try_init(|| init().map(Arc::new)).cloned();
        if result.is_err() {
            self.evict_empty(key, &cell);
        }
        result
    }

    /// Drop `cell` from the map if it is still empty and nobody else holds it,
    /// so failed keys do not accumulate.
    fn evict_empty(&self, key: &K, cell: &Arc<OnceCell<Arc<V>>>) {
        let mut cells = self.cells.lock();
        let unused = cells.get(key).is_some_and(|c| {
            Arc::ptr_eq(c, cell) && c.get().is_none() && Arc::strong_count(c) == 2
        });
        if unused {
            cells.remove(key);
        }
    }

    /// The cached value for `key`, if initialisation already succeeded.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let cells = self.cells.lock();
        cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of successfully initialised entries.
    pub fn len(&self) -> usize {
        self.cells
            .lock()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cells held, including ones still being initialised.
    #[cfg(test)]
    pub(crate) fn cell_count(&self) -> usize {
        self.cells.lock().len()
    }
}
