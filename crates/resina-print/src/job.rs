//! Host capabilities the pipeline runs against: status, cancellation and
//! a way back to the caller's thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use resina_support::JobController;

/// A shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not canceled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a caller provides to drive a print.
pub trait JobControl: Send + Sync {
    /// Progress in percent with a user facing message.
    fn update_status(&self, percent: u32, message: &str);

    /// Polled between and inside steps.
    fn was_canceled(&self) -> bool;

    /// Run `f` on the caller's thread. Hosts without an event loop run it
    /// in place.
    fn call_on_main_thread(&self, f: Box<dyn FnOnce() + Send>) {
        f();
    }
}

type StatusCallback = Box<dyn Fn(u32, &str) + Send + Sync>;

/// A [`JobControl`] backed by a [`CancelToken`] and an optional status
/// callback.
#[derive(Default)]
pub struct SimpleJob {
    token: CancelToken,
    status: Option<StatusCallback>,
}

impl fmt::Debug for SimpleJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleJob")
            .field("token", &self.token)
            .field("status", &self.status.is_some())
            .finish()
    }
}

impl SimpleJob {
    /// A job that is never canceled and reports nowhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel through `token`.
    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    /// Report status to `f`.
    pub fn with_status(mut self, f: impl Fn(u32, &str) + Send + Sync + 'static) -> Self {
        self.status = Some(Box::new(f));
        self
    }

    /// The job's cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl JobControl for SimpleJob {
    fn update_status(&self, percent: u32, message: &str) {
        if let Some(f) = &self.status {
            f(percent, message);
        }
    }

    fn was_canceled(&self) -> bool {
        self.token.is_canceled()
    }
}

/// A support job controller reporting into `[base, base + span]` of the
/// host's progress. Sub-step messages are replaced by `label`.
pub(crate) fn support_controller(
    job: &Arc<dyn JobControl>,
    base: f64,
    span: f64,
    label: &'static str,
) -> JobController {
    let stop_job = Arc::clone(job);
    let status_job = Arc::clone(job);
    let last = Arc::new(AtomicU32::new(base.round() as u32));
    JobController::new()
        .with_stop(Arc::new(move || stop_job.was_canceled()))
        .with_status(Arc::new(move |percent, _message| {
            let current = (base + span * f64::from(percent.min(100)) / 100.0).round() as u32;
            if last.fetch_max(current, Ordering::Relaxed) < current {
                status_job.update_status(current, label);
            }
        }))
}
