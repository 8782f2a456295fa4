//! Execution contexts for the worker loop.
//!
//! The loop itself is identical everywhere; a [`Spawn`] strategy only decides
//! where it runs and how teardown waits for it:
//! - [`DedicatedThread`]: a named OS thread owned by the timer
//! - [`TaskPool`]: a long-running task on a tokio runtime's blocking pool
//!
//! A spawner whose execution context can disappear underneath the timer (a
//! runtime shutting down) fires the [`StopSignal`] it was given, which
//! disposes the timer so the worker loop returns.

use std::sync::Arc;
use std::thread;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::error::DeferError;

/// Work handed to a spawner: the worker loop, boxed.
pub type WorkerTask = Box<dyn FnOnce() + Send + 'static>;

/// Disposes the timer that owns the worker, without joining it.
///
/// Cheap to clone. Firing it more than once, or after the timer was
/// dropped, does nothing.
#[derive(Clone)]
pub struct StopSignal(Arc<dyn Fn() + Send + Sync + 'static>);

impl StopSignal {
    pub(crate) fn new<F>(stop: F) -> Self
    where F: Fn() + Send + Sync + 'static {
        Self(Arc::new(stop))
    }

    /// Asks the worker loop to return.
    pub fn fire(&self) { (self.0)(); }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal").finish_non_exhaustive()
    }
}

/// Strategy for starting the worker loop.
pub trait Spawn: Send {
    /// Starts `task` as a long-running worker and returns a handle to join it.
    ///
    /// `stop` must be fired if the execution context shuts down while the
    /// worker is still running; the loop never returns on its own.
    ///
    /// # Errors
    ///
    /// Returns `DeferError::Spawn` if the worker could not be started.
    fn spawn(&self, name: &str, task: WorkerTask, stop: StopSignal) -> Result<WorkerHandle, DeferError>;
}

enum Joiner {
    Thread(thread::JoinHandle<()>),
    Task(tokio::task::JoinHandle<()>),
    Custom(Box<dyn FnOnce() -> Result<(), DeferError> + Send + 'static>),
}

/// Join handle for a running worker.
///
/// Dropping it without joining detaches the worker.
pub struct WorkerHandle {
    joiner: Option<Joiner>,
    /// Runtime-shutdown watcher of a task-pool worker.
    watcher: Option<AbortHandle>,
}

impl WorkerHandle {
    #[must_use]
    pub const fn from_thread(handle: thread::JoinHandle<()>) -> Self {
        Self { joiner: Some(Joiner::Thread(handle)), watcher: None }
    }

    #[must_use]
    pub const fn from_task(handle: tokio::task::JoinHandle<()>) -> Self {
        Self { joiner: Some(Joiner::Task(handle)), watcher: None }
    }

    /// Wraps a custom join routine for spawners outside this crate.
    #[must_use]
    pub fn from_fn<F>(join: F) -> Self
    where F: FnOnce() -> Result<(), DeferError> + Send + 'static {
        Self { joiner: Some(Joiner::Custom(Box::new(join))), watcher: None }
    }

    /// Blocks until the worker has returned.
    pub(crate) fn join(mut self) -> Result<(), DeferError> {
        let Some(joiner) = self.joiner.take() else {
            return Ok(());
        };

        match joiner {
            Joiner::Thread(handle) => handle.join().map_err(|_| DeferError::WorkerPanicked),
            Joiner::Task(handle) => match futures::executor::block_on(handle) {
                Ok(()) => Ok(()),
                Err(err) if err.is_panic() => Err(DeferError::WorkerPanicked),
                Err(err) => {
                    tracing::debug!(error = %err, "defer: worker task canceled by runtime shutdown");
                    Ok(())
                }
            },
            Joiner::Custom(join) => join(),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.joiner {
            Some(Joiner::Thread(_)) => "thread",
            Some(Joiner::Task(_)) => "task",
            Some(Joiner::Custom(_)) => "custom",
            None => "joined",
        };
        f.debug_struct("WorkerHandle").field("kind", &kind).finish()
    }
}

/// Runs the worker on its own named OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedicatedThread;

/// Thread name for a worker; NUL bytes are not allowed in thread names.
fn thread_name(name: &str) -> String { format!("restraint-{}", name.replace('\0', "")) }

impl Spawn for DedicatedThread {
    fn spawn(&self, name: &str, task: WorkerTask, _stop: StopSignal) -> Result<WorkerHandle, DeferError> {
        let thread_name = thread_name(name);

        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(task)
            .map(WorkerHandle::from_thread)
            .map_err(|err| {
                tracing::error!(thread = %thread_name, error = %err, "defer: failed to spawn thread");
                DeferError::Spawn(err)
            })
    }
}

/// Runs the worker as a long-running task on a tokio runtime's blocking pool.
///
/// The worker never outlives the runtime: when the runtime shuts down, the
/// timer is disposed and the runtime's shutdown completes. Any later
/// operation on that timer returns `DeferError::Disposed`.
#[derive(Debug, Clone)]
pub struct TaskPool {
    handle: Handle,
}

impl TaskPool {
    #[must_use]
    pub const fn new(handle: Handle) -> Self { Self { handle } }

    /// Uses the runtime the caller is currently running in, if any.
    #[must_use]
    pub fn current() -> Option<Self> { Handle::try_current().ok().map(Self::new) }
}

/// Fires its signal when dropped.
struct StopOnDrop(StopSignal);

impl Drop for StopOnDrop {
    fn drop(&mut self) { self.0.fire(); }
}

impl Spawn for TaskPool {
    fn spawn(&self, _name: &str, task: WorkerTask, stop: StopSignal) -> Result<WorkerHandle, DeferError> {
        // Runtime shutdown drops every async task before it waits for the
        // blocking pool, so this future's drop is the shutdown notification.
        let guard = StopOnDrop(stop);
        let watcher = self.handle.spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });

        let mut handle = WorkerHandle::from_task(self.handle.spawn_blocking(task));
        handle.watcher = Some(watcher.abort_handle());
        Ok(handle)
    }
}

/// Picks the task pool when called from inside a tokio runtime, a dedicated
/// thread otherwise.
pub(crate) fn default_spawner() -> Box<dyn Spawn> {
    TaskPool::current().map_or_else(
        || Box::new(DedicatedThread) as Box<dyn Spawn>,
        |pool| Box::new(pool) as Box<dyn Spawn>,
    )
}
