//! Thread state tracking for the model checker.
//!
//! The engine never switches contexts itself; it only records each thread's
//! lifecycle state, who created it, and who is waiting for it to finish.

use crate::action::{ActionId, ThreadId, VALUE_NONE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Ready,
    Running,
    /// Waiting on another thread (join).
    Blocked,
    Complete,
}

impl ThreadStatus {
    pub fn is_runnable(self) -> bool {
        matches!(self, ThreadStatus::Ready | ThreadStatus::Running)
    }
}

#[derive(Clone, Debug)]
pub struct ThreadState {
    pub id: ThreadId,
    /// Creating thread; `None` for the initial thread.
    pub parent: Option<ThreadId>,
    pub status: ThreadStatus,
    /// The `ThreadCreate` action that spawned this thread.
    pub creation: Option<ActionId>,
    /// Threads blocked joining this one.
    pub wait_list: Vec<ThreadId>,
    /// Value produced by the thread's most recent action.
    pub return_value: u64,
}

impl ThreadState {
    pub fn new(id: ThreadId, parent: Option<ThreadId>) -> Self {
        Self {
            id,
            parent,
            status: ThreadStatus::Ready,
            creation: None,
            wait_list: Vec::new(),
            return_value: VALUE_NONE,
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.status.is_runnable()
    }

    pub fn is_blocked(&self) -> bool {
        self.status == ThreadStatus::Blocked
    }

    pub fn is_complete(&self) -> bool {
        self.status == ThreadStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thread() {
        let t = ThreadState::new(1, Some(0));
        assert_eq!(t.id, 1);
        assert_eq!(t.parent, Some(0));
        assert!(t.is_runnable());
        assert!(t.wait_list.is_empty());
        assert_eq!(t.return_value, VALUE_NONE);
    }

    #[test]
    fn test_complete_thread_not_runnable() {
        let mut t = ThreadState::new(0, None);
        t.status = ThreadStatus::Complete;
        assert!(!t.is_runnable());
        assert!(t.is_complete());
    }

    #[test]
    fn test_blocked_thread_not_runnable() {
        let mut t = ThreadState::new(0, None);
        t.status = ThreadStatus::Blocked;
        assert!(!t.is_runnable());
        assert!(t.is_blocked());
    }

    #[test]
    fn test_thread_status_runnable() {
        assert!(ThreadStatus::Ready.is_runnable());
        assert!(ThreadStatus::Running.is_runnable());
        assert!(!ThreadStatus::Blocked.is_runnable());
        assert!(!ThreadStatus::Complete.is_runnable());
    }
}
