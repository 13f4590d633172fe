//! Tracked background work and drain-on-shutdown.
//!
//! # Design
//! - The outstanding count is a single atomic; launch never takes a lock.
//! - A guard owned by the spawned future decrements the count on every exit
//!   path, including panics and runtime teardown.
//! - Panics are caught, counted, and logged; they never reach the drain caller.
//! - Draining waits for the count to reach zero; tasks are never pre-empted.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bedrock_telemetry::Metrics;
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{PlatformError, PlatformResult};

/// Tracker for fire-and-forget background work.
#[derive(Clone)]
pub struct BackgroundTasks {
    inner: Arc<TasksInner>,
}

struct TasksInner {
    outstanding: AtomicUsize,
    draining: AtomicBool,
    idle: Notify,
    runtime: Handle,
    metrics: Metrics,
}

struct TaskGuard {
    inner: Arc<TasksInner>,
}

impl TaskGuard {
    fn acquire(inner: &Arc<TasksInner>) -> Self {
        inner.outstanding.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::clone(inner),
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl BackgroundTasks {
    /// Tracker spawning onto the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NoRuntime`] when called outside a runtime.
    pub fn new(metrics: Metrics) -> PlatformResult<Self> {
        let runtime = Handle::try_current().map_err(|source| PlatformError::NoRuntime { source })?;
        Ok(Self {
            inner: Arc::new(TasksInner {
                outstanding: AtomicUsize::new(0),
                draining: AtomicBool::new(false),
                idle: Notify::new(),
                runtime,
                metrics,
            }),
        })
    }

    /// Run `work` in the background.
    ///
    /// The task is counted before this returns and uncounted when it
    /// finishes or panics. The caller is never blocked.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::ShuttingDown`] once draining has begun.
    pub fn launch<F>(&self, work: F) -> PlatformResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.register()?;
        let metrics = self.inner.metrics.clone();
        metrics.task_launched();

        self.inner.runtime.spawn(async move {
            let _guard = guard;
            if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
                metrics.inc_task_panic();
                error!(panic = panic_message(&*panic), "background task panicked");
            }
            metrics.task_finished();
        });
        Ok(())
    }

    /// Run fallible `work` in the background, logging its error.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::ShuttingDown`] once draining has begun.
    pub fn launch_fallible<F, E>(&self, name: &'static str, work: F) -> PlatformResult<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.launch(async move {
            if let Err(err) = work.await {
                warn!(task = name, error = %err, "background task failed");
            }
        })
    }

    /// Tasks currently running.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Whether draining has begun.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Reject further launches and wait for every running task to finish.
    pub async fn drain(&self) {
        if !self.inner.draining.swap(true, Ordering::AcqRel) {
            info!(
                outstanding = self.outstanding(),
                "draining background tasks"
            );
        }
        self.wait_idle().await;
        debug!("background tasks drained");
    }

    /// Wait until no task is running, without rejecting new launches.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn register(&self) -> PlatformResult<TaskGuard> {
        if self.is_draining() {
            return Err(self.reject());
        }
        let guard = TaskGuard::acquire(&self.inner);
        // A drain that started between the check and the increment may
        // already have observed zero.
        if self.is_draining() {
            drop(guard);
            return Err(self.reject());
        }
        Ok(guard)
    }

    fn reject(&self) -> PlatformError {
        self.inner.metrics.inc_task_rejection();
        debug!("background task rejected during shutdown");
        PlatformError::ShuttingDown { operation: "launch" }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
