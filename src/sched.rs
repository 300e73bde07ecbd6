//! Scheduling substrate: precise single-shot timers on one worker thread.
//!
//! Jobs are kept in a deadline-ordered heap; the worker sleeps on a condvar
//! until the earliest deadline (or a new, earlier job arrives), pops every
//! due job and runs it outside the queue lock. Timers are armed once and
//! re-armed by their own callback, which keeps periodic devices
//! self-clocking against wall-clock drift.
//!
//! Shutdown cancels all pending jobs and joins the worker; scheduling after
//! shutdown is a silent no-op so device teardown order stays forgiving.

use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    due: Instant,
    id: u64,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // reversed so the BinaryHeap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.due.cmp(&self.due).then_with(|| other.id.cmp(&self.id))
    }
}

struct Queue {
    entries: BinaryHeap<Entry>,
    cancelled: HashSet<u64>,
    next_id: u64,
    shutdown: bool,
}

struct Inner {
    queue: Mutex<Queue>,
    wake: Condvar,
}

/// Handle to a scheduled single-shot job.
///
/// Dropping the handle does not cancel the job; call [`TimerHandle::cancel`]
/// explicitly. A handle outliving its scheduler is harmless.
pub struct TimerHandle {
    id: u64,
    inner: Weak<Inner>,
}

impl TimerHandle {
    /// Cancel the job if it has not fired yet.
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut queue = inner.queue.lock();
            queue.cancelled.insert(self.id);
            inner.wake.notify_one();
        }
    }
}

/// Single-threaded deadline scheduler.
pub struct Scheduler {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        let inner = Arc::new(Inner {
            queue: Mutex::new(Queue {
                entries: BinaryHeap::new(),
                cancelled: HashSet::new(),
                next_id: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("hearth-sched".to_owned())
            .spawn(move || run_worker(&worker_inner))
            .expect("failed to spawn scheduler thread");

        Arc::new(Self { inner, worker: Mutex::new(Some(worker)) })
    }

    /// Arm a single-shot job. After shutdown this is a no-op and the
    /// returned handle is inert.
    pub fn schedule(&self, delay: Duration, job: impl FnOnce() + Send + 'static) -> TimerHandle {
        let mut queue = self.inner.queue.lock();
        let id = queue.next_id;
        queue.next_id += 1;
        if queue.shutdown {
            debug!("scheduler is shut down, dropping job");
            return TimerHandle { id, inner: Weak::new() };
        }
        queue.entries.push(Entry { due: Instant::now() + delay, id, job: Box::new(job) });
        self.inner.wake.notify_one();
        TimerHandle { id, inner: Arc::downgrade(&self.inner) }
    }

    /// Number of pending (non-cancelled) jobs.
    pub fn pending(&self) -> usize {
        let queue = self.inner.queue.lock();
        queue.entries.iter().filter(|e| !queue.cancelled.contains(&e.id)).count()
    }

    /// Cancel everything and stop the worker thread.
    pub fn shutdown(&self) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
            queue.entries.clear();
            queue.cancelled.clear();
            self.inner.wake.notify_one();
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(inner: &Arc<Inner>) {
    let mut queue = inner.queue.lock();
    loop {
        if queue.shutdown {
            return;
        }

        // drop cancelled entries lazily as they reach the head
        while queue.entries.peek().is_some_and(|e| queue.cancelled.contains(&e.id)) {
            let entry = queue.entries.pop().expect("peeked entry");
            queue.cancelled.remove(&entry.id);
        }

        match queue.entries.peek().map(|e| e.due) {
            None => {
                inner.wake.wait(&mut queue);
            }
            Some(due) => {
                let now = Instant::now();
                if due > now {
                    let _ = inner.wake.wait_until(&mut queue, due);
                } else {
                    let entry = queue.entries.pop().expect("peeked entry");
                    drop(queue);
                    (entry.job)();
                    queue = inner.queue.lock();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_in_deadline_order() {
        let sched = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (label, delay_ms) in [("slow", 60_u64), ("fast", 10), ("mid", 30)] {
            let log = Arc::clone(&log);
            let _ = sched.schedule(Duration::from_millis(delay_ms), move || {
                log.lock().push(label);
            });
        }

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(*log.lock(), vec!["fast", "mid", "slow"]);
    }

    #[test]
    fn cancelled_jobs_do_not_fire() {
        let sched = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        let handle = sched.schedule(Duration::from_millis(30), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn jobs_can_rearm_themselves() {
        let sched = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        fn tick(sched: &Arc<Scheduler>, count: &Arc<AtomicUsize>) {
            let previous = count.fetch_add(1, Ordering::SeqCst);
            if previous < 2 {
                let sched_again = Arc::clone(sched);
                let count_again = Arc::clone(count);
                let _ = sched.schedule(Duration::from_millis(10), move || {
                    tick(&sched_again, &count_again);
                });
            }
        }

        tick(&sched, &count);
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn shutdown_drops_pending_jobs() {
        let sched = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        let _ = sched.schedule(Duration::from_millis(40), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        sched.shutdown();

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(sched.pending(), 0);
    }
}
