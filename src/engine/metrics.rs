use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::models::SubmissionStatus;

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    submitted_total: AtomicU64,
    started_total: AtomicU64,
    completed_total: AtomicU64,
    runtime_error_total: AtomicU64,
    compilation_error_total: AtomicU64,
    timed_out_total: AtomicU64,
    error_total: AtomicU64,
    queue_depth: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) {
        self.submitted_total.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dequeued(&self) {
        self.decrement_queue_depth();
    }

    pub fn started(&self) {
        self.started_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finished(&self, status: SubmissionStatus) {
        let counter = match status {
            SubmissionStatus::Completed => &self.completed_total,
            SubmissionStatus::RuntimeError => &self.runtime_error_total,
            SubmissionStatus::CompilationError => &self.compilation_error_total,
            SubmissionStatus::TimedOut => &self.timed_out_total,
            SubmissionStatus::Error => &self.error_total,
            SubmissionStatus::InQueue | SubmissionStatus::Processing => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            concat!(
                "# TYPE submission_submitted_total counter\n",
                "submission_submitted_total {}\n",
                "# TYPE submission_started_total counter\n",
                "submission_started_total {}\n",
                "# TYPE submission_finished_total counter\n",
                "submission_finished_total{{status=\"completed\"}} {}\n",
                "submission_finished_total{{status=\"runtime_error\"}} {}\n",
                "submission_finished_total{{status=\"compilation_error\"}} {}\n",
                "submission_finished_total{{status=\"timed_out\"}} {}\n",
                "submission_finished_total{{status=\"error\"}} {}\n",
                "# TYPE submission_queue_depth gauge\n",
                "submission_queue_depth {}\n"
            ),
            self.submitted_total.load(Ordering::Relaxed),
            self.started_total.load(Ordering::Relaxed),
            self.completed_total.load(Ordering::Relaxed),
            self.runtime_error_total.load(Ordering::Relaxed),
            self.compilation_error_total.load(Ordering::Relaxed),
            self.timed_out_total.load(Ordering::Relaxed),
            self.error_total.load(Ordering::Relaxed),
            self.queue_depth.load(Ordering::Relaxed),
        )
    }

    fn decrement_queue_depth(&self) {
        let mut current = self.queue_depth.load(Ordering::Relaxed);
        while current > 0 {
            match self.queue_depth.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;
    use crate::engine::models::SubmissionStatus;

    #[test]
    fn queue_depth_does_not_underflow() {
        let metrics = MetricsRegistry::new();
        metrics.dequeued();
        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("submission_queue_depth 0"));
    }

    #[test]
    fn finished_counts_by_status() {
        let metrics = MetricsRegistry::new();
        metrics.finished(SubmissionStatus::CompilationError);
        metrics.finished(SubmissionStatus::Processing);
        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("submission_finished_total{status=\"compilation_error\"} 1"));
        assert!(rendered.contains("submission_finished_total{status=\"completed\"} 0"));
    }
}
