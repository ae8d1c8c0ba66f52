//! Promises: reads that observed a value no write has produced yet.

use crate::action::{ActionId, ThreadId};

/// A read bound to a predicted value, waiting for a later write to supply it.
///
/// A thread becomes unable to satisfy the promise once it has synchronized
/// with the read: any write it issues afterwards happens after the read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Promise {
    read: ActionId,
    value: u64,
    synced: Vec<bool>,
}

impl Promise {
    /// The reading thread can never satisfy its own read.
    pub fn new(read: ActionId, reader: ThreadId, value: u64) -> Self {
        let mut promise = Self {
            read,
            value,
            synced: Vec::new(),
        };
        promise.eliminate_thread(reader);
        promise
    }

    pub fn read(&self) -> ActionId {
        self.read
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Record that `tid` can no longer satisfy this promise. Returns true if
    /// the thread was previously available.
    pub fn eliminate_thread(&mut self, tid: ThreadId) -> bool {
        if tid >= self.synced.len() {
            self.synced.resize(tid + 1, false);
        }
        !std::mem::replace(&mut self.synced[tid], true)
    }

    pub fn is_thread_available(&self, tid: ThreadId) -> bool {
        !self.synced.get(tid).copied().unwrap_or(false)
    }

    /// Failed once none of the `num_threads` threads can satisfy it.
    pub fn has_failed(&self, num_threads: usize) -> bool {
        (0..num_threads).all(|tid| !self.is_thread_available(tid))
    }
}
