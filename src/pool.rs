//! Fixed-size worker pool with FIFO job dispatch and order-preserving
//! completion handles.
//!
//! Submitting returns a [`JobHandle`] immediately; queueing the handles in
//! submission order (rather than the results in completion order) is what
//! lets the reader deliver batches in exact on-disk order regardless of
//! which worker finishes first.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};

enum PromiseState<T> {
    Pending,
    Ready(T),
    /// The job was dropped before it ran (pool shutdown).
    Abandoned,
}

struct Promise<T> {
    state: Mutex<PromiseState<T>>,
    cond: Condvar,
}

/// Completion handle for one submitted job. `wait` blocks until the job has
/// run; `None` means the job was cancelled by shutdown before it started.
pub struct JobHandle<T> {
    promise: Arc<Promise<T>>,
}

impl<T> JobHandle<T> {
    pub fn wait(self) -> Option<T> {
        let mut state = self.promise.state.lock();
        loop {
            match std::mem::replace(&mut *state, PromiseState::Pending) {
                PromiseState::Ready(value) => return Some(value),
                PromiseState::Abandoned => {
                    *state = PromiseState::Abandoned;
                    return None;
                }
                PromiseState::Pending => self.promise.cond.wait(&mut state),
            }
        }
    }
}

/// Write end of a promise, owned by the job closure. Fulfilling or dropping
/// it settles the handle and retires the job from the pending count, so a
/// job dropped unrun can never leave a waiter hanging.
struct Completion<T> {
    promise: Arc<Promise<T>>,
    pending: Arc<AtomicUsize>,
    fulfilled: bool,
}

impl<T> Completion<T> {
    fn fulfill(mut self, value: T) {
        *self.promise.state.lock() = PromiseState::Ready(value);
        self.promise.cond.notify_all();
        self.fulfilled = true;
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if !self.fulfilled {
            *self.promise.state.lock() = PromiseState::Abandoned;
            self.promise.cond.notify_all();
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
    shutting_down: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> WorkerPool {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..threads)
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("osmstream-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("spawning worker thread failed")
            })
            .collect();
        WorkerPool {
            sender: Some(sender),
            workers,
            pending: Arc::new(AtomicUsize::new(0)),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One worker per available core.
    pub fn with_default_threads() -> WorkerPool {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self::new(threads)
    }

    /// Jobs submitted but not yet finished (queued + running).
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Enqueues a job and returns its completion handle.
    pub fn submit<T, F>(&self, f: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let promise = Arc::new(Promise {
            state: Mutex::new(PromiseState::Pending),
            cond: Condvar::new(),
        });
        self.pending.fetch_add(1, Ordering::SeqCst);
        let completion = Completion {
            promise: promise.clone(),
            pending: self.pending.clone(),
            fulfilled: false,
        };

        let shutting_down = self.shutting_down.clone();
        let job: Job = Box::new(move || {
            if shutting_down.load(Ordering::SeqCst) {
                drop(completion); // queued but unstarted: cancel
            } else {
                completion.fulfill(f());
            }
        });

        if let Some(sender) = &self.sender {
            // a send error means the pool is gone; the boxed job is dropped
            // and the handle settles as abandoned
            let _ = sender.send(job);
        }
        JobHandle { promise }
    }

    /// Cancels queued jobs, lets in-flight jobs finish, and joins the
    /// workers. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
