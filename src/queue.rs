//! The shared job queue.
//!
//! One FIFO guarded by a single mutex with two condition variables:
//! `worker_cond` is signaled when work is added, `main_cond` whenever a
//! worker completes a job. A claim hands out either a whole job or the
//! next eligible part of a job that fanned out into a parallel download;
//! the job slot stays queued until explicitly removed so sibling workers
//! can keep claiming parts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::job::{Job, JobId};

/// One queued job. The job body is mutated only by its claimant; part
/// claims flip `Part::inuse` under the queue mutex.
#[derive(Debug)]
pub struct Slot {
    pub job: Mutex<Job>,
    claimed: AtomicBool,
}

/// What a worker got hold of.
#[derive(Debug)]
pub enum Claim {
    Whole(Arc<Slot>),
    Part { slot: Arc<Slot>, part: usize },
}

#[derive(Debug)]
struct Inner {
    fifo: Vec<Arc<Slot>>,
    next_id: JobId,
    input_alive: bool,
    terminate: bool,
}

#[derive(Debug)]
pub struct JobQueue {
    inner: Mutex<Inner>,
    worker_cond: Condvar,
    main_cond: Condvar,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> JobQueue {
        JobQueue {
            inner: Mutex::new(Inner {
                fifo: Vec::new(),
                next_id: 1,
                input_alive: false,
                terminate: false,
            }),
            worker_cond: Condvar::new(),
            main_cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Reserve a job id without queueing anything yet.
    pub fn next_id(&self) -> JobId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        id
    }

    /// Append a job and wake one waiting worker.
    pub fn add(&self, job: Job) -> JobId {
        let id = job.id;
        let mut inner = self.lock();
        inner.fifo.push(Arc::new(Slot {
            job: Mutex::new(job),
            claimed: AtomicBool::new(false),
        }));
        drop(inner);
        self.worker_cond.notify_one();
        id
    }

    /// Claim a whole job or the next eligible part, blocking on
    /// `worker_cond` while nothing is claimable. `None` means terminate.
    pub fn claim(&self) -> Option<Claim> {
        let mut inner = self.lock();
        loop {
            if inner.terminate {
                return None;
            }
            for slot in inner.fifo.iter() {
                let mut job = match slot.job.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(metalink) = job.metalink.as_mut() {
                    if let Some(part) =
                        metalink.parts.iter_mut().find(|p| !p.done && !p.inuse)
                    {
                        part.inuse = true;
                        let part = part.id;
                        drop(job);
                        return Some(Claim::Part { slot: Arc::clone(slot), part });
                    }
                } else if !slot.claimed.load(Ordering::Relaxed) {
                    slot.claimed.store(true, Ordering::Relaxed);
                    drop(job);
                    return Some(Claim::Whole(Arc::clone(slot)));
                }
            }
            // sit and wait for a job
            inner = match self.worker_cond.wait(inner) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Remove a completed job and signal the main thread.
    pub fn remove(&self, id: JobId) {
        let mut inner = self.lock();
        inner.fifo.retain(|slot| {
            let job = match slot.job.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            job.id != id
        });
        drop(inner);
        self.main_cond.notify_all();
    }

    /// Give a claimed job back to the queue (metalink fan-out) and wake
    /// every worker so parts get picked up.
    pub fn release(&self, slot: &Slot) {
        slot.claimed.store(false, Ordering::Relaxed);
        self.worker_cond.notify_all();
    }

    /// Un-claim a failed part so it is reloaded later.
    pub fn unclaim_part(&self, slot: &Slot, part: usize) {
        let _inner = self.lock();
        let mut job = match slot.job.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(metalink) = job.metalink.as_mut() {
            if let Some(part) = metalink.parts.get_mut(part) {
                part.inuse = false;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().fifo.is_empty()
    }

    pub fn set_input_alive(&self, alive: bool) {
        let mut inner = self.lock();
        inner.input_alive = alive;
        drop(inner);
        // EOF on the input producer may be the drain condition
        self.main_cond.notify_all();
    }

    /// Block the main thread until the queue drained (and the input
    /// producer finished) or termination was requested.
    pub fn wait_drained(&self) {
        let mut inner = self.lock();
        while !inner.terminate && (!inner.fifo.is_empty() || inner.input_alive) {
            inner = match self.main_cond.wait(inner) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Flip the termination flag; every `claim` returns `None` from here
    /// on and all workers drain.
    pub fn terminate(&self) {
        let mut inner = self.lock();
        inner.terminate = true;
        drop(inner);
        self.worker_cond.notify_all();
        self.main_cond.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Metalink;
    use crate::uri::Uri;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn job(queue: &JobQueue, url: &str) -> Job {
        Job::new(queue.next_id(), Arc::new(Uri::parse(url).unwrap()))
    }

    #[test]
    fn test_fifo_claim_order() {
        let queue = JobQueue::new();
        let a = queue.add(job(&queue, "http://example.com/a"));
        let b = queue.add(job(&queue, "http://example.com/b"));

        let Some(Claim::Whole(first)) = queue.claim() else { panic!() };
        assert_eq!(first.job.lock().unwrap().id, a);
        let Some(Claim::Whole(second)) = queue.claim() else { panic!() };
        assert_eq!(second.job.lock().unwrap().id, b);

        queue.remove(a);
        queue.remove(b);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_part_claims() {
        let queue = JobQueue::new();
        let mut j = job(&queue, "http://example.com/big");
        let uri = j.uri.clone();
        j.metalink = Some(Metalink::chunked(PathBuf::from("big"), uri, 300, 100));
        let id = queue.add(j);

        // three parts, claimed one by one, no whole-job claim
        for expect in 0..3usize {
            let Some(Claim::Part { part, .. }) = queue.claim() else { panic!() };
            assert_eq!(part, expect);
        }

        queue.terminate();
        assert!(queue.claim().is_none());
        queue.remove(id);
    }

    #[test]
    fn test_terminate_unblocks_workers() {
        let queue = Arc::new(JobQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.claim().is_none())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        queue.terminate();
        assert!(waiter.join().unwrap());
    }
}
