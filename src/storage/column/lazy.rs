// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::storage::mem_tracker::{MemGuard, MemTracker, MemUsage, Tracked};
use crate::storage::{StorageResult, TracedStorageError};

enum LoadState<M, R> {
    /// Only the serialized metadata is held.
    Unloaded(Tracked<M>),
    /// Some thread is reading the index. The metadata is lent to it.
    Loading,
    Loaded {
        reader: Arc<R>,
        _guard: MemGuard,
    },
    Failed(Arc<TracedStorageError>),
}

/// An index that is read from disk by the first caller needing it.
///
/// The I/O happens outside the lock. Concurrent callers wait for the first one
/// and then share its result, including a failure.
pub struct LazyIndex<M, R> {
    state: Mutex<LoadState<M, R>>,
    loaded: Condvar,
}

impl<M: MemUsage, R: MemUsage> LazyIndex<M, R> {
    pub fn new(tracker: &Arc<MemTracker>, meta: M) -> Self {
        Self {
            state: Mutex::new(LoadState::Unloaded(Tracked::new(tracker, meta))),
            loaded: Condvar::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), LoadState::Loaded { .. })
    }

    /// The reader, if it has been loaded.
    pub fn get(&self) -> Option<Arc<R>> {
        match &*self.state.lock() {
            LoadState::Loaded { reader, .. } => Some(reader.clone()),
            _ => None,
        }
    }

    /// Load the reader with `load` unless some caller already did.
    ///
    /// The metadata footprint is released and the reader footprint charged to
    /// `tracker` when the reader takes its place.
    pub fn get_or_load(
        &self,
        tracker: &Arc<MemTracker>,
        load: impl FnOnce(&M) -> StorageResult<R>,
    ) -> StorageResult<Arc<R>> {
        let meta = {
            let mut state = self.state.lock();
            loop {
                match &*state {
                    LoadState::Loaded { reader, .. } => return Ok(reader.clone()),
                    LoadState::Failed(e) => return Err(e.clone().into()),
                    LoadState::Unloaded(_) => break,
                    LoadState::Loading => {}
                }
                self.loaded.wait(&mut state);
            }
            match std::mem::replace(&mut *state, LoadState::Loading) {
                LoadState::Unloaded(meta) => meta,
                _ => unreachable!(),
            }
        };

        let mut guard = LoadingGuard { index: self, done: false };
        let result = load(&meta);
        let mut state = self.state.lock();
        let ret = match result {
            Ok(reader) => {
                let bytes = reader.mem_usage();
                let reader = Arc::new(reader);
                *state = LoadState::Loaded {
                    reader: reader.clone(),
                    _guard: MemGuard::new(tracker, bytes),
                };
                Ok(reader)
            }
            Err(e) => {
                let e = Arc::new(e);
                *state = LoadState::Failed(e.clone());
                Err(e.into())
            }
        };
        guard.done = true;
        drop(state);
        drop(meta);
        self.loaded.notify_all();
        ret
    }
}

/// Wakes up waiters with a failure if the loading closure panics.
struct LoadingGuard<'a, M, R> {
    index: &'a LazyIndex<M, R>,
    done: bool,
}

impl<M, R> Drop for LoadingGuard<'_, M, R> {
    fn drop(&mut self) {
        if !self.done {
            *self.index.state.lock() = LoadState::Failed(Arc::new(TracedStorageError::internal(
                "index loading panicked",
            )));
            self.index.loaded.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct Bytes(usize);

    impl MemUsage for Bytes {
        fn mem_usage(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn loads_once_under_contention() {
        let tracker = MemTracker::new("test");
        let index = LazyIndex::<Bytes, Bytes>::new(&tracker, Bytes(10));
        assert_eq!(tracker.consumption(), 10);
        let loads = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let reader = index
                        .get_or_load(&tracker, |meta| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(Bytes(meta.0 * 10))
                        })
                        .unwrap();
                    assert_eq!(reader.0, 100);
                });
            }
        });
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(index.is_loaded());
        assert_eq!(tracker.consumption(), 100);
        drop(index);
        assert_eq!(tracker.consumption(), 0);
    }

    #[test]
    fn failure_is_replayed() {
        let tracker = MemTracker::new("test");
        let index = LazyIndex::<Bytes, Bytes>::new(&tracker, Bytes(10));
        let err = index
            .get_or_load(&tracker, |_| Err(TracedStorageError::corruption("bad index page")))
            .unwrap_err();
        assert!(err.is_corruption());
        let err = index
            .get_or_load(&tracker, |_| unreachable!("must not load again"))
            .unwrap_err();
        assert!(err.is_corruption());
        assert!(index.get().is_none());
        assert_eq!(tracker.consumption(), 0);
    }
}
