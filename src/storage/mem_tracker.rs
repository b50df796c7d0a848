// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Hierarchical memory accounting.

use std::ops::Deref;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Counts bytes held by readers. Consumption propagates to every ancestor.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    consumption: AtomicI64,
    peak: AtomicI64,
    parent: Option<Arc<MemTracker>>,
}

impl MemTracker {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            parent: None,
        })
    }

    pub fn with_parent(label: impl Into<String>, parent: Arc<MemTracker>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            parent: Some(parent),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn consume(&self, bytes: i64) {
        let mut tracker = Some(self);
        while let Some(t) = tracker {
            let now = t.consumption.fetch_add(bytes, Ordering::Relaxed) + bytes;
            t.peak.fetch_max(now, Ordering::Relaxed);
            tracker = t.parent.as_deref();
        }
    }

    pub fn release(&self, bytes: i64) {
        self.consume(-bytes);
    }

    pub fn consumption(&self) -> i64 {
        self.consumption.load(Ordering::Relaxed)
    }

    pub fn peak_consumption(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }
}

/// Types that can report the bytes they occupy.
pub trait MemUsage {
    fn mem_usage(&self) -> usize;
}

/// Bytes charged to a tracker for as long as the guard lives.
#[derive(Debug)]
pub struct MemGuard {
    tracker: Arc<MemTracker>,
    bytes: usize,
}

impl MemGuard {
    pub fn new(tracker: &Arc<MemTracker>, bytes: usize) -> Self {
        tracker.consume(bytes as i64);
        Self {
            tracker: tracker.clone(),
            bytes,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemGuard {
    fn drop(&mut self) {
        self.tracker.release(self.bytes as i64);
    }
}

/// A value whose footprint is charged to a tracker until it is dropped.
#[derive(Debug)]
pub struct Tracked<T> {
    value: T,
    _guard: MemGuard,
}

impl<T: MemUsage> Tracked<T> {
    pub fn new(tracker: &Arc<MemTracker>, value: T) -> Self {
        let bytes = value.mem_usage();
        Self::with_bytes(tracker, value, bytes)
    }
}

impl<T> Tracked<T> {
    pub fn with_bytes(tracker: &Arc<MemTracker>, value: T, bytes: usize) -> Self {
        Self {
            value,
            _guard: MemGuard::new(tracker, bytes),
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Footprint of a protobuf message kept in memory.
pub fn message_mem_usage<M: prost::Message>(message: &M) -> usize {
    std::mem::size_of::<M>() + message.encoded_len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumption_propagates_to_parent() {
        let root = MemTracker::new("root");
        let child = MemTracker::with_parent("child", root.clone());
        {
            let _a = MemGuard::new(&child, 100);
            let _b = MemGuard::new(&child, 20);
            assert_eq!(child.consumption(), 120);
            assert_eq!(root.consumption(), 120);
        }
        assert_eq!(child.consumption(), 0);
        assert_eq!(root.consumption(), 0);
        assert_eq!(root.peak_consumption(), 120);
    }

    #[test]
    fn tracked_releases_on_drop() {
        struct Blob(usize);
        impl MemUsage for Blob {
            fn mem_usage(&self) -> usize {
                self.0
            }
        }
        let tracker = MemTracker::new("test");
        let blob = Tracked::new(&tracker, Blob(64));
        assert_eq!(blob.0, 64);
        assert_eq!(tracker.consumption(), 64);
        drop(blob);
        assert_eq!(tracker.consumption(), 0);
    }
}
