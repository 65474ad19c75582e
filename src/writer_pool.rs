//! Ordered, bounded, multi-worker disk-writer pool. Grounded on
//! `PackQueue`/`disk_worker_main`/`init_worker_pool` in the original
//! transfer daemon: a single process-wide bounded queue feeds a fixed set
//! of worker threads, each enforcing per-session ordering via a
//! sequence-number barrier on the job's `ConnState`.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::pack;
use crate::session::SessionHandle;

pub struct PackJob {
    pub data: Vec<u8>,
    pub state: SessionHandle,
    pub seq: u64,
}

struct QueueInner {
    jobs: VecDeque<PackJob>,
    capacity: usize,
    closed: bool,
}

/// Bounded FIFO shared by every upload session. Producers (`Session::feed`)
/// block when full; consumers (writer threads) block when empty.
pub struct PackQueue {
    inner: Mutex<QueueInner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl PackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: VecDeque::new(),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Blocks until there is room, then pushes `job`. Returns `Err` if the
    /// queue has been closed (not used in normal operation; workers live
    /// for the process).
    pub fn push(&self, job: PackJob) -> Result<(), PackJob> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.closed {
                return Err(job);
            }
            if inner.jobs.len() < inner.capacity {
                break;
            }
            inner = self.not_full.wait(inner).unwrap();
        }
        inner.jobs.push_back(job);
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn pop(&self) -> Option<PackJob> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(job) = inner.jobs.pop_front() {
                self.not_full.notify_one();
                return Some(job);
            }
            if inner.closed {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }
}

/// Fixed pool of disk-writer threads consuming `PackJob`s from a shared
/// `PackQueue`.
pub struct WriterPool {
    queue: Arc<PackQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WriterPool {
    pub fn start(worker_count: usize, queue_depth: usize) -> Self {
        let queue = Arc::new(PackQueue::new(queue_depth));
        let workers = (0..worker_count)
            .map(|id| {
                let queue = Arc::clone(&queue);
                thread::Builder::new()
                    .name(format!("disk-writer-{id}"))
                    .spawn(move || disk_worker_main(queue))
                    .expect("failed to spawn disk-writer thread")
            })
            .collect();

        Self { queue, workers }
    }

    pub fn queue(&self) -> Arc<PackQueue> {
        Arc::clone(&self.queue)
    }
}

impl Drop for WriterPool {
    fn drop(&mut self) {
        // Workers live for the process in normal operation; dropping the
        // pool only matters for tests, where we join to avoid leaks.
        let mut inner = self.queue.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.queue.not_empty.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn disk_worker_main(queue: Arc<PackQueue>) {
    while let Some(job) = queue.pop() {
        let state = job.state.clone();
        let mut inner = state.inner.lock().unwrap();
        while job.seq != inner.next_seq {
            inner = state.cond.wait(inner).unwrap();
        }

        pack::apply_pack(&mut inner, &job.data);
        inner.next_seq += 1;
        if inner.pending > 0 {
            inner.pending -= 1;
        }
        state.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use tempfile::tempdir;

    #[test]
    fn test_per_session_ordering_preserved_under_concurrency() {
        let pool = WriterPool::start(4, 4);
        let dir = tempdir().unwrap();
        let session = Session::create(dir.path().to_path_buf(), pool.queue()).unwrap();

        // Pack #0 writes "a" with 64KiB, pack #1 writes "b" with 64KiB;
        // per-session ordering must guarantee "a" completes before "b"
        // starts, regardless of which worker picks up which job.
        let mut pack0 = Vec::new();
        pack0.extend_from_slice(&1u32.to_le_bytes());
        pack0.extend_from_slice(&1u16.to_le_bytes());
        pack0.extend_from_slice(b"a");
        let payload_a = vec![0xAAu8; 64 * 1024];
        pack0.extend_from_slice(&(payload_a.len() as u64).to_le_bytes());
        pack0.extend_from_slice(&payload_a);

        let mut pack1 = Vec::new();
        pack1.extend_from_slice(&1u32.to_le_bytes());
        pack1.extend_from_slice(&1u16.to_le_bytes());
        pack1.extend_from_slice(b"b");
        let payload_b = vec![0xBBu8; 64 * 1024];
        pack1.extend_from_slice(&(payload_b.len() as u64).to_le_bytes());
        pack1.extend_from_slice(&payload_b);

        session.enqueue_raw(pack0).unwrap();
        session.enqueue_raw(pack1).unwrap();
        session.wait_drained();

        assert!(dir.path().join("a").exists());
        assert!(dir.path().join("b").exists());
        assert_eq!(fs_len(&dir.path().join("a")), 64 * 1024);
        assert_eq!(fs_len(&dir.path().join("b")), 64 * 1024);
    }

    fn fs_len(path: &std::path::Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }
}
