//! Exploration parameters.

/// Model checking configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelConfig {
    /// Recency bound: how many consecutive reads of the same write a thread
    /// may perform while a newer write was available (0 = unbounded).
    pub max_reads: u32,
    /// Maximum number of executions to explore (`None` = until exhausted).
    pub max_executions: Option<u64>,
    /// Maximum number of steps per execution before it is abandoned.
    pub max_steps: usize,
    /// Whether plain (non-atomic) accesses are checked for data races.
    pub check_data_races: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_reads: 0,
            max_executions: None,
            max_steps: 100_000,
            check_data_races: true,
        }
    }
}
