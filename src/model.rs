/// Снимок счётчиков пула
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub workers: usize,
    pub queued_tasks: usize,
    pub submitted: usize,
    pub executed: usize,
    pub panicked: usize,
}

impl PoolMetrics {
    /// Задачи, которые приняты, но ещё не отработали
    pub fn pending(&self) -> usize {
        self.submitted.saturating_sub(self.executed)
    }

    pub fn success_rate(&self) -> f64 {
        if self.executed == 0 {
            return 1.0;
        }
        (self.executed - self.panicked) as f64 / self.executed as f64
    }
}
