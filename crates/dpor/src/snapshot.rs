//! Hook for hosts that checkpoint the program under test.

/// Restorable checkpoints keyed by step index.
///
/// The engine calls `backtrack_before_step(0)` once at the start of every
/// execution after the first, and relies on it to restore whatever program
/// state lives outside the engine. Engine-owned state is reset by the engine.
pub trait SnapshotStore {
    fn snapshot_step(&mut self, index: usize);
    /// Restore the latest checkpoint at or before `index`; returns the index
    /// actually restored.
    fn backtrack_before_step(&mut self, index: usize) -> usize;
}

/// For hosts that re-run the program from scratch each execution.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSnapshot;

impl SnapshotStore for NullSnapshot {
    fn snapshot_step(&mut self, _index: usize) {}

    fn backtrack_before_step(&mut self, _index: usize) -> usize {
        0
    }
}

/// Records the requests it receives.
#[derive(Clone, Debug, Default)]
pub struct RecordingSnapshot {
    pub checkpoints: Vec<usize>,
    pub restores: Vec<usize>,
}

impl SnapshotStore for RecordingSnapshot {
    fn snapshot_step(&mut self, index: usize) {
        self.checkpoints.push(index);
    }

    fn backtrack_before_step(&mut self, index: usize) -> usize {
        self.restores.push(index);
        self.checkpoints
            .iter()
            .copied()
            .filter(|&c| c <= index)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_snapshot_restores_latest_checkpoint() {
        let mut s = RecordingSnapshot::default();
        s.snapshot_step(0);
        s.snapshot_step(4);
        s.snapshot_step(9);
        assert_eq!(s.backtrack_before_step(5), 4);
        assert_eq!(s.backtrack_before_step(0), 0);
        assert_eq!(s.restores, vec![5, 0]);
    }
}
