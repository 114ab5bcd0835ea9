//! The render thread.
//!
//! Every [`GraphicsDevice`] call happens on one dedicated thread. Other
//! threads queue closures with [`RenderThread::run`] (fire and forget) or
//! [`RenderThread::submit`] (result delivered through a [`RenderHandle`]).
//! Closures run in the order they were queued.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::mpsc;
use std::task::{Context, Poll, Waker};
use std::thread::{JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;

/// Type-erased work closure sent to the render thread.
type RenderJob = Box<dyn FnOnce(&mut GraphicsDevice) + Send>;

/// Name of the spawned thread.
pub const RENDER_THREAD_NAME: &str = "render";

/// Count of queued jobs that have not finished yet.
#[derive(Default)]
struct PendingJobs {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingJobs {
    fn start(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// A thread owning the [`GraphicsDevice`] and executing queued closures
/// against it.
///
/// Blocking calls ([`run_wait`](Self::run_wait),
/// [`wait_for_all`](Self::wait_for_all)) made from the render thread itself
/// would never return, so they panic instead.
///
/// Dropping the `RenderThread` closes the queue, lets the thread finish the
/// jobs already queued, drops the device there and joins.
pub struct RenderThread {
    sender: Option<mpsc::Sender<RenderJob>>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    pending: Arc<PendingJobs>,
}

impl RenderThread {
    /// Move `device` onto a newly spawned render thread.
    pub fn spawn(device: GraphicsDevice) -> Result<Self, GraphicsError> {
        let (sender, receiver) = mpsc::channel::<RenderJob>();
        let pending = Arc::new(PendingJobs::default());
        let thread_pending = Arc::clone(&pending);

        let thread = std::thread::Builder::new()
            .name(RENDER_THREAD_NAME.to_string())
            .spawn(move || render_loop(device, receiver, thread_pending))
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!("Failed to spawn render thread: {e}"))
            })?;
        let thread_id = thread.thread().id();
        log::info!("RenderThread: started");

        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
            thread_id,
            pending,
        })
    }

    /// Whether the calling thread is the render thread.
    pub fn is_render_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Queue `job` without waiting for it.
    pub fn run<F>(&self, job: F)
    where
        F: FnOnce(&mut GraphicsDevice) + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            log::error!("RenderThread: job queued after shutdown");
            return;
        };
        self.pending.start();
        if sender.send(Box::new(job)).is_err() {
            log::error!("RenderThread: render thread has exited, job dropped");
            self.pending.finish();
        }
    }

    /// Queue `job` and return a handle to its result.
    pub fn submit<T, F>(&self, job: F) -> RenderHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut GraphicsDevice) -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let waker = Arc::new(Mutex::new(None));
        let result = ResultSender {
            sender,
            waker: Arc::clone(&waker),
        };
        self.run(move |device| {
            let _ = result.sender.send(job(device));
        });
        RenderHandle { receiver, waker }
    }

    /// Queue `job` and block until it has run.
    ///
    /// # Panics
    ///
    /// Panics when called from the render thread. A job that panicked on the
    /// render thread panics again here with the same message.
    pub fn run_wait<T, F>(&self, job: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut GraphicsDevice) -> T + Send + 'static,
    {
        assert!(
            !self.is_render_thread(),
            "RenderThread: run_wait called from the render thread"
        );
        let handle = self.submit(move |device| {
            panic::catch_unwind(AssertUnwindSafe(|| job(device)))
                .map_err(|payload| panic_message(payload.as_ref()).to_string())
        });
        match handle.recv() {
            Some(Ok(value)) => value,
            Some(Err(message)) => panic!("RenderThread: job panicked: {message}"),
            None => panic!("RenderThread: job did not produce a result"),
        }
    }

    /// Block until every job queued so far has run.
    ///
    /// # Panics
    ///
    /// Panics when called from the render thread.
    pub fn wait_for_all(&self) {
        assert!(
            !self.is_render_thread(),
            "RenderThread: wait_for_all called from the render thread"
        );
        self.pending.wait_idle();
    }

    /// Number of queued jobs that have not finished.
    pub fn pending_jobs(&self) -> usize {
        *self.pending.count.lock()
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.sender = None;
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.is_render_thread() {
            log::warn!("RenderThread: dropped on the render thread, not joining");
            return;
        }
        if thread.join().is_err() {
            log::error!("RenderThread: render thread panicked");
        }
        log::info!("RenderThread: stopped");
    }
}

impl std::fmt::Debug for RenderThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderThread")
            .field("thread_id", &self.thread_id)
            .field("pending_jobs", &self.pending_jobs())
            .finish()
    }
}

static_assertions::assert_impl_all!(RenderThread: Send, Sync);

fn render_loop(
    mut device: GraphicsDevice,
    receiver: mpsc::Receiver<RenderJob>,
    pending: Arc<PendingJobs>,
) {
    while let Ok(job) = receiver.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&mut device))) {
            log::error!(
                "RenderThread: job panicked: {}",
                panic_message(payload.as_ref())
            );
        }
        pending.finish();
    }
    drop(device);
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// Sending half of a [`RenderHandle`]. Wakes the awaiting task when dropped,
/// whether or not a value was sent.
struct ResultSender<T> {
    sender: mpsc::Sender<T>,
    waker: Arc<Mutex<Option<Waker>>>,
}

impl<T> Drop for ResultSender<T> {
    fn drop(&mut self) {
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }
}

/// Handle to the result of a closure queued on the render thread.
///
/// The result can be taken by blocking ([`recv`](Self::recv)), by polling
/// ([`try_recv`](Self::try_recv)) or by awaiting the handle. A job that
/// panicked yields `None`.
pub struct RenderHandle<T> {
    receiver: mpsc::Receiver<T>,
    waker: Arc<Mutex<Option<Waker>>>,
}

impl<T> RenderHandle<T> {
    /// Take the result if the job has completed.
    ///
    /// This consumes the value; subsequent calls return `None`.
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Block until the job completes and return its result.
    ///
    /// Returns `None` if the job was dropped without running or panicked.
    pub fn recv(self) -> Option<T> {
        self.receiver.recv().ok()
    }
}

impl<T> Future for RenderHandle<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        // Register before checking so a completion in between still wakes us.
        *self.waker.lock() = Some(cx.waker().clone());
        match self.receiver.try_recv() {
            Ok(value) => Poll::Ready(Some(value)),
            Err(mpsc::TryRecvError::Empty) => Poll::Pending,
            Err(mpsc::TryRecvError::Disconnected) => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::frame::FrameState;
    use crate::types::Extent2d;
    use std::task::{RawWaker, RawWakerVTable};

    fn noop_waker() -> Waker {
        fn noop(_: *const ()) {}
        fn clone(p: *const ()) -> RawWaker {
            RawWaker::new(p, &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    fn spawn() -> RenderThread {
        let device =
            GraphicsDevice::new(Arc::new(DummyBackend::new()), 2, Extent2d::new(8, 8)).unwrap();
        RenderThread::spawn(device).unwrap()
    }

    #[test]
    fn test_run_wait_returns_result() {
        let render = spawn();
        let frames = render.run_wait(|device| device.frames_in_flight());
        assert_eq!(frames, 2);
        assert!(!render.is_render_thread());
    }

    #[test]
    fn test_jobs_run_on_named_thread_in_order() {
        let render = spawn();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let order = Arc::clone(&order);
            render.run(move |_| order.lock().push(i));
        }
        let name = render.run_wait(|_| std::thread::current().name().map(str::to_owned));
        assert_eq!(name.as_deref(), Some(RENDER_THREAD_NAME));
        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_wait_for_all_drains_queue() {
        let render = spawn();
        let counter = Arc::new(Mutex::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            render.run(move |_| *counter.lock() += 1);
        }
        render.wait_for_all();
        assert_eq!(*counter.lock(), 16);
        assert_eq!(render.pending_jobs(), 0);
    }

    #[test]
    fn test_handle_polls_until_ready() {
        let render = spawn();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let job_gate = Arc::clone(&gate);
        let mut handle = render.submit(move |device| {
            let (open, cond) = &*job_gate;
            let mut open = open.lock();
            while !*open {
                cond.wait(&mut open);
            }
            device.frame_state()
        });

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut handle).poll(&mut cx).is_pending());

        *gate.0.lock() = true;
        gate.1.notify_all();
        render.wait_for_all();
        assert_eq!(
            Pin::new(&mut handle).poll(&mut cx),
            Poll::Ready(Some(FrameState::Idle))
        );
    }

    #[test]
    fn test_panicking_job_yields_none_and_thread_survives() {
        let render = spawn();
        let handle = render.submit(|_| -> u32 { panic!("boom") });
        assert_eq!(handle.recv(), None);
        assert_eq!(render.run_wait(|_| 5), 5);
    }

    #[test]
    #[should_panic(expected = "slot 3 is taken")]
    fn test_run_wait_reraises_job_panic() {
        let render = spawn();
        render.run_wait(|_| -> u32 { panic!("slot 3 is taken") });
    }

    #[test]
    fn test_thread_survives_reraised_panic() {
        let render = Arc::new(spawn());
        let inner = Arc::clone(&render);
        let result = std::thread::spawn(move || inner.run_wait(|_| -> u32 { panic!("boom") })).join();
        assert!(result.is_err());
        assert_eq!(render.run_wait(|_| 5), 5);
    }

    #[test]
    #[should_panic(expected = "run_wait called from the render thread")]
    fn test_blocking_from_render_thread_is_fatal() {
        let render = Arc::new(spawn());
        let inner = Arc::clone(&render);
        render.run_wait(move |_| inner.run_wait(|_| 1));
    }
}
