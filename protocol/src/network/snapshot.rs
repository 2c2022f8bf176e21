//! # Versioned Snapshot Container
//!
//! Node state that many tasks read and a few mutate: the pending set, the
//! peer view, the known-artifact and known-user sets, and the chain.
//!
//! Readers take an `Arc` snapshot and iterate it with no lock held, so a
//! slow relay loop never blocks writers. Writers go through
//! [`Snapshot::update`], which runs a closure against the current version
//! under the write lock and publishes the result. When a reader still holds
//! the old version, `Arc::make_mut` clones it first (copy-on-write).
//!
//! A membership check and the mutation it guards belong in the same
//! `update` closure. Splitting them lets two callers pass the same check.
//! The closure must not block or await.

use std::sync::Arc;

use parking_lot::RwLock;

/// Copy-on-write cell with atomic snapshot reads.
#[derive(Debug, Default)]
pub struct Snapshot<T> {
    current: RwLock<Arc<T>>,
}

impl<T: Clone> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    /// Current version. Cheap: one refcount bump under a brief read lock.
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Runs `f` against the current version and publishes the result
    /// atomically. Returns whatever `f` returns.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.current.write();
        f(Arc::make_mut(&mut guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::thread;

    #[test]
    fn readers_keep_their_version() {
        let cell = Snapshot::new(vec![1, 2, 3]);
        let before = cell.load();

        cell.update(|v| v.push(4));

        assert_eq!(*before, vec![1, 2, 3]);
        assert_eq!(*cell.load(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn update_returns_closure_result() {
        let cell = Snapshot::new(BTreeSet::new());
        assert!(cell.update(|s| s.insert("a")));
        assert!(!cell.update(|s| s.insert("a")));
    }

    #[test]
    fn concurrent_check_then_insert_admits_each_value_once() {
        let cell = Arc::new(Snapshot::new(Vec::<u32>::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    let mut admitted = 0;
                    for value in 0..200 {
                        let inserted = cell.update(|v| {
                            if v.contains(&value) {
                                false
                            } else {
                                v.push(value);
                                true
                            }
                        });
                        admitted += inserted as u32;
                    }
                    admitted
                })
            })
            .collect();

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 200);
        assert_eq!(cell.load().len(), 200);
    }
}
