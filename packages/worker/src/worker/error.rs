use thiserror::Error;

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker is already running")]
    AlreadyRunning,
}

/// Per-user refill failure taxonomy. Every variant routes through the
/// backoff accounting; the distinction is what the run detail and the
/// activity log report.
#[derive(Debug, Error)]
pub enum RefillError {
    #[error("eligible count failed: {0}")]
    Count(String),

    #[error("failed to build generation request: {0}")]
    RequestBuild(String),

    #[error("AI stream failed: {0}")]
    Stream(String),

    #[error("provider returned no questions")]
    Empty,

    #[error("saved {saved}/{total} generated questions")]
    PartialSave { saved: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_save_reports_progress() {
        let err = RefillError::PartialSave { saved: 3, total: 5 };
        assert_eq!(err.to_string(), "saved 3/5 generated questions");
    }
}
