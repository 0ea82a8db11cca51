//! Worker-pool collaborator. Two
//! flavors are used: a single-threaded, order-preserving queue for the
//! ZVOL minor-lifecycle dispatcher, and a small
//! multi-threaded pool for TRIM issue work where ordering across leaves
//! doesn't matter.

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single dedicated worker thread draining jobs in submission order.
/// Used where ordering matters, e.g. the per-pool minor-lifecycle
/// dispatcher: "execution order is preserved per pool".
pub struct SerialTaskq {
    tx: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl SerialTaskq {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })
            .expect("failed to spawn taskq worker");
        SerialTaskq { tx: Some(tx), handle: Some(handle) }
    }

    pub fn dispatch<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Box::new(job));
        }
    }
}

impl Drop for SerialTaskq {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A pool of worker threads sharing one job queue, used for TRIM issue
/// work where per-leaf workers run independently and concurrently.
pub struct PooledTaskq {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl PooledTaskq {
    pub fn new(name: impl Into<String>, threads: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = std::sync::Arc::new(std::sync::Mutex::new(rx));
        let name = name.into();
        let handles = (0..threads.max(1))
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || loop {
                        let job = {
                            let rx = rx.lock().unwrap();
                            rx.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn taskq worker")
            })
            .collect();
        PooledTaskq { tx: Some(tx), handles }
    }

    pub fn dispatch<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Box::new(job));
        }
    }
}

impl Drop for PooledTaskq {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
