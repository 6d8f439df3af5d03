use std::time::{Duration, Instant};

/// Logs the elapsed time of a processing step when dropped.
#[derive(Debug)]
#[must_use = "the scope measures until it is dropped"]
pub struct PerfScope {
    name: &'static str,
    subject: String,
    started: Instant,
}

impl PerfScope {
    pub fn start(name: &'static str, subject: impl Into<String>) -> Self {
        Self {
            name,
            subject: subject.into(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for PerfScope {
    fn drop(&mut self) {
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            target: "perf",
            scope = self.name,
            subject = %self.subject,
            elapsed_ms,
            "scope finished"
        );
    }
}
