//! Bounded worker pool for asynchronous transaction callbacks.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// A job queued after a transaction reaches its terminal state.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs async callbacks off the commit path with bounded concurrency.
///
/// One submission carries all of a transaction's async callbacks and runs
/// them in registration order; nothing is ordered across transactions.
#[derive(Clone)]
pub struct CallbackPool {
    handle: Handle,
    permits: Arc<Semaphore>,
}

impl CallbackPool {
    /// Pool over an explicit runtime handle.
    pub fn new(handle: Handle, max_in_flight: usize) -> Self {
        CallbackPool {
            handle,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Pool over the current tokio runtime.
    ///
    /// # Panics
    /// Panics outside a tokio runtime, like [`Handle::current`].
    pub fn current(max_in_flight: usize) -> Self {
        Self::new(Handle::current(), max_in_flight)
    }

    /// Submit one transaction's callback list, fire-and-forget.
    pub fn submit(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            if let Ok(_permit) = permits.acquire_owned().await {
                for job in jobs {
                    job();
                }
            }
        });
    }
}
