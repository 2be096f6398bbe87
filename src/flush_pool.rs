//! Bounded worker pool that drains frozen memtables to the SSTable store.
//! Workers may finish batches out of order; submission order is still the
//! commit order, enforced with a barrier per batch.

use crate::error::Result;
use crate::memtable::MemtableHandle;
use crate::sstable::SsTableStore;
use crossbeam::channel::{self, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

const DEFAULT_WORKERS: usize = 4;

struct Job {
    memtable: Arc<MemtableHandle>,
    assigned_id: u64,
    sequence: u64,
}

/// Tracks the next sequence number allowed to commit, so batch N+1's
/// writer-visible effects never land before batch N's even if its worker
/// finishes first.
struct OrderBarrier {
    next_to_commit: u64,
}

pub struct FlushPool {
    sender: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    next_sequence: std::sync::atomic::AtomicU64,
    shutdown: Arc<AtomicBool>,
}

impl FlushPool {
    pub fn new(store: Arc<dyn SsTableStore>, after_commit: impl Fn(u64) + Send + Sync + 'static) -> Self {
        Self::with_workers(DEFAULT_WORKERS, store, after_commit)
    }

    pub fn with_workers(
        worker_count: usize,
        store: Arc<dyn SsTableStore>,
        after_commit: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        let (sender, receiver) = channel::unbounded::<Job>();
        let barrier = Arc::new((
            Mutex::new(OrderBarrier { next_to_commit: 0 }),
            Condvar::new(),
        ));
        let after_commit = Arc::new(after_commit);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count.max(1));
        for _ in 0..worker_count.max(1) {
            let receiver = receiver.clone();
            let store = store.clone();
            let barrier = barrier.clone();
            let after_commit = after_commit.clone();
            workers.push(std::thread::spawn(move || {
                while let Ok(job) = receiver.recv() {
                    let flushed = job.memtable.flush(job.assigned_id, store.as_ref());
                    let (lock, cond) = &*barrier;
                    let mut guard = lock.lock().unwrap();
                    while guard.next_to_commit != job.sequence {
                        guard = cond.wait(guard).unwrap();
                    }
                    if let Err(err) = flushed {
                        log::error!("flush of sstable {} failed: {err}", job.assigned_id);
                    } else {
                        after_commit(job.assigned_id);
                    }
                    guard.next_to_commit += 1;
                    cond.notify_all();
                }
            }));
        }

        Self {
            sender,
            workers,
            next_sequence: std::sync::atomic::AtomicU64::new(0),
            shutdown,
        }
    }

    /// Submits a frozen memtable for flushing under `assigned_id`. Tasks
    /// are not cancellable once submitted.
    pub fn submit(&self, memtable: Arc<MemtableHandle>, assigned_id: u64) -> Result<()> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.sender
            .send(Job {
                memtable,
                assigned_id,
                sequence,
            })
            .map_err(|_| {
                crate::error::StoreError::Other(anyhow::anyhow!("flush pool channel closed"))
            })
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for FlushPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(std::mem::replace(
            &mut self.sender,
            channel::unbounded().0,
        ));
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::record::Record;
    use crate::sstable::FileSsTableStore;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    #[test]
    fn batches_commit_in_submission_order() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn SsTableStore> = Arc::new(FileSsTableStore::new(dir.path()).unwrap());
        let committed = Arc::new(StdMutex::new(Vec::new()));
        let committed_clone = committed.clone();
        let pool = FlushPool::with_workers(4, store, move |id| {
            committed_clone.lock().unwrap().push(id);
        });

        let cfg = Config::default();
        for i in 0..8u64 {
            let mt = Arc::new(MemtableHandle::new(&cfg));
            mt.put(Record::new(&format!("k{i}"), b"v".to_vec(), i)).unwrap();
            pool.submit(mt, i).unwrap();
        }
        drop(pool);

        let order = committed.lock().unwrap().clone();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
    }
}
