//! Cancellation and status reporting for long running support jobs.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SupportError};

/// Returns `true` when the job should stop.
pub type StopFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Receives a percentage and a message.
pub type StatusFn = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Hooks a synthesizer polls while it works. Both are optional.
#[derive(Clone, Default)]
pub struct JobController {
    stop: Option<StopFn>,
    status: Option<StatusFn>,
}

impl fmt::Debug for JobController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobController")
            .field("stop", &self.stop.is_some())
            .field("status", &self.status.is_some())
            .finish()
    }
}

impl JobController {
    /// A controller that never stops and reports nowhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stop condition.
    pub fn with_stop(mut self, stop: StopFn) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Set the status sink.
    pub fn with_status(mut self, status: StatusFn) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the job should stop.
    pub fn stopped(&self) -> bool {
        self.stop.as_ref().is_some_and(|f| f())
    }

    /// Fail with [`SupportError::Canceled`] when stopped.
    pub fn check(&self) -> Result<()> {
        if self.stopped() {
            Err(SupportError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Report progress.
    pub fn status(&self, percent: u32, message: &str) {
        if let Some(f) = &self.status {
            f(percent, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_stop_and_status_hooks() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (f, s) = (flag.clone(), seen.clone());
        let ctl = JobController::new()
            .with_stop(Arc::new(move || f.load(Ordering::Relaxed)))
            .with_status(Arc::new(move |pct, msg: &str| {
                s.lock().unwrap().push((pct, msg.to_string()))
            }));
        assert!(ctl.check().is_ok());
        ctl.status(10, "working");
        flag.store(true, Ordering::Relaxed);
        assert_eq!(ctl.check(), Err(SupportError::Canceled));
        assert_eq!(seen.lock().unwrap()[0], (10, "working".to_string()));
        assert!(!JobController::new().stopped());
    }
}
