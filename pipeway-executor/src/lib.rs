//! # Pipeway Executor - Pinned Event Executors
//!
//! `pipeway-executor` provides the executor abstraction the pipeline core
//! pins its handler contexts to, plus a concrete single-threaded
//! implementation.
//!
//! ## Model
//!
//! Every pipeline stage is pinned to exactly one [`EventExecutor`]. The
//! executor promises serialized execution: tasks submitted to it run one at
//! a time on a single dedicated thread, in submission order. Code already
//! running on that thread can detect it via
//! [`in_event_loop`](EventExecutor::in_event_loop) and take the inline fast
//! path instead of queueing.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pipeway_executor::{EventExecutor, SingleThreadExecutor};
//!
//! let executor = SingleThreadExecutor::builder()
//!     .name("worker-0")
//!     .spawn()
//!     .unwrap();
//!
//! executor.execute(Box::new(|| {
//!     println!("running on worker-0");
//! }));
//! executor.shutdown();
//! ```
//!
//! ## CPU pinning
//!
//! ```rust,no_run
//! use core_affinity::CoreId;
//! use pipeway_executor::SingleThreadExecutor;
//!
//! let executor = SingleThreadExecutor::builder()
//!     .name("rx-loop")
//!     .core_id(CoreId { id: 0 })
//!     .spawn()
//!     .unwrap();
//! # executor.shutdown();
//! ```
//!
//! ## Groups
//!
//! [`ExecutorPool`] bundles several single-thread executors and hands them
//! out round-robin through [`EventExecutorGroup::next_child`]. A pipeline
//! asks the group once per group instance and then keeps reusing the same
//! child, so all stages of one connection that share a group land on the
//! same thread.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use core_affinity::{CoreId, set_for_current};
use log::warn;
use parking_lot::Mutex;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serialized task executor a pipeline stage can be pinned to.
///
/// Implementations must run submitted tasks one at a time, in submission
/// order, on a single thread.
pub trait EventExecutor: Send + Sync + 'static {
    /// Submits a task. Tasks submitted from the executor's own thread still
    /// queue behind the currently running task; `execute` never runs the
    /// task synchronously.
    fn execute(&self, task: Task);

    /// `true` when the calling thread is the executor's event loop thread.
    fn in_event_loop(&self) -> bool;
}

/// A set of executors that can be asked for a member.
///
/// The pipeline resolves a group to a concrete child once per group
/// instance and pins that child, so `next_child` is only consulted for the
/// first stage registered against the group.
pub trait EventExecutorGroup: Send + Sync + 'static {
    /// Picks a member executor.
    fn next_child(&self) -> Arc<dyn EventExecutor>;
}

enum Envelope {
    Run(Task),
    Shutdown,
}

/// A dedicated worker thread draining a task queue.
///
/// Construct through [`SingleThreadExecutor::builder`]. The thread keeps
/// running until [`shutdown`](SingleThreadExecutor::shutdown) is called or
/// the executor is dropped.
pub struct SingleThreadExecutor {
    name: String,
    tx: mpsc::Sender<Envelope>,
    thread_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
    self_ref: OnceLock<Weak<SingleThreadExecutor>>,
}

impl SingleThreadExecutor {
    /// Starts configuring a new executor.
    pub fn builder() -> SingleThreadExecutorBuilder {
        SingleThreadExecutorBuilder::default()
    }

    /// The thread name this executor was built with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the event loop after the tasks already queued have run, and
    /// joins the thread. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Envelope::Shutdown);
        if let Some(handle) = self.join.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl EventExecutor for SingleThreadExecutor {
    fn execute(&self, task: Task) {
        if self.tx.send(Envelope::Run(task)).is_err() {
            warn!("executor {} is shut down, task dropped", self.name);
        }
    }

    fn in_event_loop(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl EventExecutorGroup for SingleThreadExecutor {
    fn next_child(&self) -> Arc<dyn EventExecutor> {
        let weak = self
            .self_ref
            .get()
            .expect("executor was not built through the builder");
        weak.upgrade()
            .expect("executor group outlived its executor")
    }
}

impl Drop for SingleThreadExecutor {
    fn drop(&mut self) {
        let _ = self.tx.send(Envelope::Shutdown);
        if let Some(handle) = self.join.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// A factory for [`SingleThreadExecutor`]s: thread name plus an optional
/// CPU core to pin the event loop to.
#[derive(Debug, Default)]
pub struct SingleThreadExecutorBuilder {
    core_id: Option<CoreId>,
    name: String,
}

impl SingleThreadExecutorBuilder {
    /// Names the thread-to-be; shows up in panic messages and debuggers.
    pub fn name(mut self, name: &str) -> Self {
        self.name = String::from(name);
        self
    }

    /// Pins the event loop thread to the given CPU core.
    pub fn core_id(mut self, core_id: CoreId) -> Self {
        self.core_id = Some(core_id);
        self
    }

    /// Spawns the worker thread and returns the running executor.
    pub fn spawn(mut self) -> io::Result<Arc<SingleThreadExecutor>> {
        let mut core_id = self.core_id.take();
        let (tx, rx) = mpsc::channel::<Envelope>();
        let (id_tx, id_rx) = mpsc::channel::<ThreadId>();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                if let Some(core_id) = core_id.take() {
                    set_for_current(core_id);
                }
                let _ = id_tx.send(thread::current().id());

                while let Ok(envelope) = rx.recv() {
                    match envelope {
                        Envelope::Run(task) => task(),
                        Envelope::Shutdown => break,
                    }
                }
            })?;

        let thread_id = id_rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "executor thread died at startup"))?;

        let executor = Arc::new(SingleThreadExecutor {
            name: self.name,
            tx,
            thread_id,
            join: Mutex::new(Some(handle)),
            self_ref: OnceLock::new(),
        });
        let _ = executor.self_ref.set(Arc::downgrade(&executor));
        Ok(executor)
    }
}

/// A fixed pool of [`SingleThreadExecutor`]s handed out round-robin.
pub struct ExecutorPool {
    children: Vec<Arc<SingleThreadExecutor>>,
    next: AtomicUsize,
}

impl ExecutorPool {
    /// Spawns `size` executors named `{prefix}-{index}`.
    pub fn new(prefix: &str, size: usize) -> io::Result<Arc<ExecutorPool>> {
        assert!(size > 0, "executor pool must have at least one member");
        let mut children = Vec::with_capacity(size);
        for index in 0..size {
            children.push(
                SingleThreadExecutor::builder()
                    .name(&format!("{prefix}-{index}"))
                    .spawn()?,
            );
        }
        Ok(Arc::new(ExecutorPool {
            children,
            next: AtomicUsize::new(0),
        }))
    }

    /// Number of member executors.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// `true` when the pool has no members. Never true for pools built with
    /// [`ExecutorPool::new`].
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Shuts down every member executor.
    pub fn shutdown(&self) {
        for child in &self.children {
            child.shutdown();
        }
    }
}

impl EventExecutorGroup for ExecutorPool {
    fn next_child(&self) -> Arc<dyn EventExecutor> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.children.len();
        self.children[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn tasks_run_on_the_executor_thread() {
        let executor = SingleThreadExecutor::builder()
            .name("test-exec")
            .spawn()
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let inner = executor.clone();
        executor.execute(Box::new(move || {
            tx.send((thread::current().name().map(String::from), inner.in_event_loop()))
                .unwrap();
        }));

        let (name, in_loop) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-exec"));
        assert!(in_loop);
        assert!(!executor.in_event_loop());
        executor.shutdown();
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let executor = SingleThreadExecutor::builder()
            .name("ordered")
            .spawn()
            .unwrap();

        let (tx, rx) = mpsc::channel();
        for i in 0..100 {
            let tx = tx.clone();
            executor.execute(Box::new(move || {
                tx.send(i).unwrap();
            }));
        }
        let seen: Vec<i32> = (0..100)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        executor.shutdown();
    }

    #[test]
    fn shutdown_drains_queued_tasks() {
        let executor = SingleThreadExecutor::builder()
            .name("draining")
            .spawn()
            .unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        executor.execute(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        }));
        executor.shutdown();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn pool_hands_out_members_round_robin() {
        let pool = ExecutorPool::new("pool", 2).unwrap();
        let data_ptr = |executor: &Arc<dyn EventExecutor>| Arc::as_ptr(executor) as *const ();
        let a = pool.next_child();
        let b = pool.next_child();
        let c = pool.next_child();
        assert_ne!(data_ptr(&a), data_ptr(&b));
        assert_eq!(data_ptr(&a), data_ptr(&c));
        pool.shutdown();
    }
}
