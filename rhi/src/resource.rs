//! Asynchronously loaded resources.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::MaterialError;

/// Load status of a [`Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    /// The first load has not finished yet.
    Loading,
    /// A value is available.
    Ready,
    /// The load failed; the error is kept for inspection.
    Failed,
}

impl ResourceStatus {
    /// Whether the status will not change without a reload.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Loading)
    }
}

#[derive(Debug)]
struct ResourceState<T> {
    status: ResourceStatus,
    value: Option<Arc<T>>,
    error: Option<Arc<MaterialError>>,
}

/// A handle to a value produced by a background load.
///
/// The handle exists from the moment the load is requested; threads that
/// need the value [`wait`](Self::wait) for it. A forced rebuild swaps the
/// value atomically, so readers see either the old or the new value.
#[derive(Debug)]
pub struct Resource<T> {
    path: String,
    started: AtomicBool,
    state: Mutex<ResourceState<T>>,
    cond: Condvar,
}

impl<T> Resource<T> {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            started: AtomicBool::new(false),
            state: Mutex::new(ResourceState {
                status: ResourceStatus::Loading,
                value: None,
                error: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Path the resource was requested with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current status.
    pub fn status(&self) -> ResourceStatus {
        self.state.lock().status
    }

    /// Whether a value is available.
    pub fn is_ready(&self) -> bool {
        self.status() == ResourceStatus::Ready
    }

    /// The current value, if ready.
    pub fn get(&self) -> Option<Arc<T>> {
        self.state.lock().value.clone()
    }

    /// The error of a failed load.
    pub fn error(&self) -> Option<Arc<MaterialError>> {
        self.state.lock().error.clone()
    }

    /// Block until the resource is ready or failed.
    pub fn wait(&self) -> ResourceStatus {
        let mut state = self.state.lock();
        while !state.status.is_terminal() {
            self.cond.wait(&mut state);
        }
        state.status
    }

    /// Block until the resource is ready or failed, or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> ResourceStatus {
        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            self.cond
                .wait_while_for(&mut state, |s| !s.status.is_terminal(), timeout);
        }
        state.status
    }

    /// Claim the right to run the load. Returns `true` exactly once.
    pub(crate) fn claim(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    /// Whether some thread claimed the load.
    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Publish a value, replacing any previous one.
    pub(crate) fn complete(&self, value: Arc<T>) {
        let mut state = self.state.lock();
        state.status = ResourceStatus::Ready;
        state.value = Some(value);
        state.error = None;
        self.cond.notify_all();
    }

    /// Mark the load failed. A resource that already holds a value keeps it
    /// and stays ready.
    pub(crate) fn fail(&self, error: MaterialError) {
        let mut state = self.state.lock();
        if state.value.is_none() {
            state.status = ResourceStatus::Failed;
        }
        state.error = Some(Arc::new(error));
        self.cond.notify_all();
    }
}
