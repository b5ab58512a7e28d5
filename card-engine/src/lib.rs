pub mod error;
pub mod fusion;
pub mod metrics_consts;
pub mod topology;
pub mod view;

/// Outcome of a per-unit or per-card batch that isolates failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: u64,
    pub failed: u64,
}

impl BatchReport {
    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}
