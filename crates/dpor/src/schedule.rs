//! Thread selection between checker decision points.

use std::collections::VecDeque;

use crate::action::ThreadId;

/// The scheduler the engine consults after every step.
///
/// A thread marked waiting must never be returned by `next_thread` until it
/// has been woken.
pub trait Scheduler {
    fn add_thread(&mut self, tid: ThreadId);
    fn remove_thread(&mut self, tid: ThreadId);
    fn wait(&mut self, waiter: ThreadId, target: ThreadId);
    fn wake(&mut self, tid: ThreadId);
    /// Pick the thread to run; `hint` is the engine's choice (replay or
    /// atomicity) and takes precedence when that thread is ready.
    fn next_thread(&mut self, hint: Option<ThreadId>) -> Option<ThreadId>;
    fn reset(&mut self);
}

/// Runs the hinted thread if there is one, otherwise the thread that has been
/// ready the longest.
#[derive(Clone, Debug, Default)]
pub struct FifoScheduler {
    ready: VecDeque<ThreadId>,
    waiting: Vec<(ThreadId, ThreadId)>,
}

impl FifoScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.ready.iter().copied()
    }

    pub fn is_waiting(&self, tid: ThreadId) -> bool {
        self.waiting.iter().any(|&(w, _)| w == tid)
    }
}

impl Scheduler for FifoScheduler {
    fn add_thread(&mut self, tid: ThreadId) {
        if !self.ready.contains(&tid) && !self.is_waiting(tid) {
            self.ready.push_back(tid);
        }
    }

    fn remove_thread(&mut self, tid: ThreadId) {
        self.ready.retain(|&t| t != tid);
    }

    fn wait(&mut self, waiter: ThreadId, target: ThreadId) {
        self.remove_thread(waiter);
        self.waiting.push((waiter, target));
    }

    fn wake(&mut self, tid: ThreadId) {
        self.waiting.retain(|&(w, _)| w != tid);
        self.add_thread(tid);
    }

    fn next_thread(&mut self, hint: Option<ThreadId>) -> Option<ThreadId> {
        match hint {
            Some(tid) if self.ready.contains(&tid) => {
                self.remove_thread(tid);
                Some(tid)
            }
            _ => self.ready.pop_front(),
        }
    }

    fn reset(&mut self) {
        self.ready.clear();
        self.waiting.clear();
    }
}
