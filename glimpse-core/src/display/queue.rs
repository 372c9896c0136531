use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::MarshalError;

/// Work to run on the display thread.
pub type DisplayJob = Box<dyn FnOnce() + Send + 'static>;

/// How a job is ordered against other pending display work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Runs once the `Async` work pending at submission has run. Later
    /// `Async` work does not hold it back.
    WhenIdle,
    /// Runs in submission order with other `Async` work.
    Async,
}

/// Resolves once the submitted job has run.
///
/// Resolves to [`MarshalError::Closed`] if the job was dropped without
/// running, either because the queue shut down or because the job panicked.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<()>,
}

impl Completion {
    /// A completion and the sender that resolves it.
    pub fn channel() -> (oneshot::Sender<()>, Completion) {
        let (tx, rx) = oneshot::channel();
        (tx, Completion { rx })
    }

    pub async fn wait(self) -> Result<(), MarshalError> {
        self.rx.await.map_err(|_| MarshalError::Closed)
    }

    /// Block the calling thread. Must not be called from the display thread
    /// or from inside an async runtime.
    pub fn wait_blocking(self) -> Result<(), MarshalError> {
        self.rx.blocking_recv().map_err(|_| MarshalError::Closed)
    }
}

/// Hands work to a single serial display thread.
pub trait Marshal: Send + Sync {
    fn submit(&self, mode: Submission, job: DisplayJob) -> Completion;

    fn on_display_thread(&self) -> bool;
}

impl dyn Marshal {
    /// Schedule `job` behind the display work pending now, without blocking.
    pub fn run_when_idle(
        &self,
        job: impl FnOnce() + Send + 'static,
    ) -> Completion {
        self.submit(Submission::WhenIdle, Box::new(job))
    }

    /// Fire and forget.
    pub fn run_async(&self, job: impl FnOnce() + Send + 'static) -> Completion {
        self.submit(Submission::Async, Box::new(job))
    }

    /// Run `job` on the display thread and block until it returns its value.
    /// Runs inline when already on the display thread.
    pub fn run_and_wait<T: Send + 'static>(
        &self,
        job: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T, MarshalError> {
        if self.on_display_thread() {
            return Ok(job());
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        // The completion is redundant with the value channel.
        let _ = self.submit(
            Submission::Async,
            Box::new(move || {
                let _ = tx.send(job());
            }),
        );
        rx.recv().map_err(|_| MarshalError::Closed)
    }
}

struct Task {
    job: DisplayJob,
    done: oneshot::Sender<()>,
}

#[derive(Default)]
struct Queues {
    normal: VecDeque<Task>,
    // Each idle task carries the number of normal tasks that must have
    // started before it may run.
    idle: VecDeque<(u64, Task)>,
    normal_submitted: u64,
    normal_started: u64,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    queues: Mutex<Queues>,
    ready: Condvar,
}

/// A dedicated display thread draining a two-priority FIFO.
pub struct DisplayQueue {
    shared: Arc<Shared>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DisplayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayQueue")
            .field("thread_id", &self.thread_id)
            .field("pending", &self.pending())
            .finish()
    }
}

impl DisplayQueue {
    pub const THREAD_NAME: &'static str = "glimpse-display";

    pub fn spawn() -> std::io::Result<Arc<Self>> {
        let shared = Arc::new(Shared::default());
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(Self::THREAD_NAME.to_string())
            .spawn(move || run(worker))?;

        Ok(Arc::new(Self {
            shared,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn pending(&self) -> usize {
        let queues = self.shared.queues.lock();
        queues.normal.len() + queues.idle.len()
    }

    /// Stop accepting work, let already queued jobs run and join the thread.
    pub fn shutdown(&self) {
        self.close();
        if self.on_display_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take()
            && handle.join().is_err()
        {
            error!("display thread exited with a panic");
        }
    }

    fn close(&self) {
        self.shared.queues.lock().closed = true;
        self.shared.ready.notify_all();
    }
}

impl Marshal for DisplayQueue {
    fn submit(&self, mode: Submission, job: DisplayJob) -> Completion {
        let (done, completion) = Completion::channel();
        let mut queues = self.shared.queues.lock();
        if queues.closed {
            warn!(?mode, "display job submitted after shutdown; dropping");
            return completion;
        }
        let task = Task { job, done };
        match mode {
            Submission::Async => {
                queues.normal.push_back(task);
                queues.normal_submitted += 1;
            }
            Submission::WhenIdle => {
                let after = queues.normal_submitted;
                queues.idle.push_back((after, task));
            }
        }
        drop(queues);
        self.shared.ready.notify_one();
        completion
    }

    fn on_display_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for DisplayQueue {
    fn drop(&mut self) {
        self.close();
    }
}

fn next_task(shared: &Shared) -> Option<Task> {
    let mut queues = shared.queues.lock();
    loop {
        if let Some(&(after, _)) = queues.idle.front()
            && queues.normal_started >= after
        {
            return queues.idle.pop_front().map(|(_, task)| task);
        }
        if let Some(task) = queues.normal.pop_front() {
            queues.normal_started += 1;
            return Some(task);
        }
        if queues.closed {
            return None;
        }
        shared.ready.wait(&mut queues);
    }
}

fn run(shared: Arc<Shared>) {
    debug!("display thread started");
    while let Some(Task { job, done }) = next_task(&shared) {
        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => {
                let _ = done.send(());
            }
            Err(_) => error!("display job panicked"),
        }
    }
    debug!("display thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn marshal() -> (Arc<DisplayQueue>, Arc<dyn Marshal>) {
        let queue = DisplayQueue::spawn().unwrap();
        let marshal: Arc<dyn Marshal> = queue.clone();
        (queue, marshal)
    }

    #[test]
    fn run_and_wait_returns_value_from_display_thread() {
        let (queue, marshal) = marshal();
        let name = marshal
            .run_and_wait(|| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some(DisplayQueue::THREAD_NAME));
        assert!(!marshal.on_display_thread());
        queue.shutdown();
    }

    #[test]
    fn idle_work_waits_for_pending_async_work() {
        let (queue, marshal) = marshal();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = mpsc::channel::<()>();

        // Hold the display thread so everything below is queued together.
        let blocker = marshal.run_async(move || {
            let _ = gate_rx.recv();
        });
        let record = |label: &'static str| {
            let order = Arc::clone(&order);
            move || order.lock().push(label)
        };
        marshal.run_async(record("a"));
        marshal.run_async(record("b"));
        let idle = marshal.run_when_idle(record("idle"));
        marshal.run_async(record("c"));
        let last = marshal.run_async(record("d"));

        gate_tx.send(()).unwrap();
        blocker.wait_blocking().unwrap();
        last.wait_blocking().unwrap();
        idle.wait_blocking().unwrap();

        assert_eq!(*order.lock(), vec!["a", "b", "idle", "c", "d"]);
        queue.shutdown();
    }

    #[test]
    fn steady_async_work_does_not_starve_idle_work() {
        let (queue, marshal) = marshal();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let ran = Arc::new(Mutex::new(false));

        let blocker = marshal.run_async(move || {
            let _ = gate_rx.recv();
        });
        let flag = Arc::clone(&ran);
        let idle = marshal.run_when_idle(move || *flag.lock() = true);

        // Queued behind the idle job; each records whether it already ran.
        let observed: Arc<Mutex<Vec<bool>>> = Arc::default();
        for _ in 0..16 {
            let ran = Arc::clone(&ran);
            let observed = Arc::clone(&observed);
            marshal.run_async(move || observed.lock().push(*ran.lock()));
        }

        gate_tx.send(()).unwrap();
        blocker.wait_blocking().unwrap();
        idle.wait_blocking().unwrap();
        marshal.run_and_wait(|| ()).unwrap();

        assert_eq!(observed.lock().len(), 16);
        assert!(observed.lock().iter().all(|&ran| ran));
        queue.shutdown();
    }

    #[test]
    fn nested_run_and_wait_runs_inline() {
        let (queue, marshal) = marshal();
        let inner = Arc::clone(&marshal);
        let value = marshal
            .run_and_wait(move || inner.run_and_wait(|| 7).unwrap())
            .unwrap();
        assert_eq!(value, 7);
        queue.shutdown();
    }

    #[test]
    fn panicking_job_does_not_kill_the_thread() {
        let (queue, marshal) = marshal();
        let failed = marshal.run_async(|| panic!("boom"));
        assert_eq!(failed.wait_blocking(), Err(MarshalError::Closed));
        assert_eq!(marshal.run_and_wait(|| 1).unwrap(), 1);
        queue.shutdown();
    }

    #[test]
    fn submissions_after_shutdown_are_rejected() {
        let (queue, marshal) = marshal();
        queue.shutdown();
        assert_eq!(
            marshal.run_async(|| {}).wait_blocking(),
            Err(MarshalError::Closed)
        );
        assert_eq!(marshal.run_and_wait(|| 1), Err(MarshalError::Closed));
    }

    #[tokio::test]
    async fn completion_can_be_awaited() {
        let (queue, marshal) = marshal();
        marshal.run_when_idle(|| {}).wait().await.unwrap();
        queue.shutdown();
    }
}
