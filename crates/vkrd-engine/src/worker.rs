use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use dashmap::DashMap;
use tracing::{debug, warn};
use vkrd_protocol::CaptureId;

struct Job {
    id: CaptureId,
    run: Box<dyn FnOnce() + Send>,
    done_tx: Sender<()>,
}

/// Bounded worker pool for asynchronous object creation.
///
/// `submit` enqueues a closure and returns immediately; the completion of
/// each job is tracked per capture id so that `wait` can block on exactly
/// the handle a later call needs. The submitting thread is expected to mark
/// the id busy in the object table before submitting and the closure to
/// clear it once the handle is published.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    completions: DashMap<CaptureId, Receiver<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let workers = (0..threads.max(1))
            .map(|n| {
                let rx = job_rx.clone();
                thread::Builder::new()
                    .name(format!("vkrd-worker-{n}"))
                    .spawn(move || worker_loop(rx))
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
            })
            .collect();
        Self {
            job_tx: Some(job_tx),
            workers,
            completions: DashMap::new(),
        }
    }

    /// Enqueue a creation closure for the given capture id.
    pub fn submit(&self, id: CaptureId, run: Box<dyn FnOnce() + Send>) {
        let (done_tx, done_rx) = bounded(1);
        self.completions.insert(id, done_rx);
        if let Some(tx) = &self.job_tx {
            if tx.send(Job { id, run, done_tx }).is_err() {
                warn!(id = id.0, "worker pool already shut down, dropping job");
                self.completions.remove(&id);
            }
        }
    }

    /// Block until the job submitted for `id` has completed. No-op when the
    /// id has no in-flight job (already drained or never submitted).
    pub fn wait(&self, id: CaptureId) {
        if let Some((_, rx)) = self.completions.remove(&id) {
            debug!(id = id.0, "blocking on in-flight async creation");
            let _ = rx.recv();
        }
    }

    /// Drop completion records for all finished jobs. Polled opportunistically
    /// between call-stream blocks.
    pub fn drain_completed(&self) {
        let done: Vec<CaptureId> = self
            .completions
            .iter()
            .filter(|e| e.value().try_recv().is_ok())
            .map(|e| *e.key())
            .collect();
        for id in done {
            self.completions.remove(&id);
        }
    }

    /// Block until every in-flight job has completed.
    pub fn wait_all(&self) {
        let ids: Vec<CaptureId> = self.completions.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.wait(id);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.completions.len()
    }
}

fn worker_loop(rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        (job.run)();
        // receiver may be gone if the pool was torn down mid-job
        let _ = job.done_tx.send(());
        debug!(id = job.id.0, "async creation completed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn wait_blocks_until_job_completes() {
        let pool = WorkerPool::new(2);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        pool.submit(
            CaptureId(1),
            Box::new(move || {
                thread::sleep(Duration::from_millis(30));
                flag.store(true, Ordering::SeqCst);
            }),
        );
        pool.wait(CaptureId(1));
        assert!(ran.load(Ordering::SeqCst));
        // waiting again on a drained id is a no-op
        pool.wait(CaptureId(1));
    }

    #[test]
    fn drain_removes_only_finished_jobs() {
        let pool = WorkerPool::new(1);
        let (gate_tx, gate_rx) = bounded::<()>(1);
        pool.submit(
            CaptureId(1),
            Box::new(move || {
                let _ = gate_rx.recv();
            }),
        );
        pool.submit(CaptureId(2), Box::new(|| {}));
        assert_eq!(pool.in_flight(), 2);
        pool.drain_completed();
        // job 1 is still gated, job 2 queued behind it
        assert_eq!(pool.in_flight(), 2);
        gate_tx.send(()).unwrap();
        pool.wait_all();
        assert_eq!(pool.in_flight(), 0);
    }
}
