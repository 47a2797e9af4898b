/*
   Priority queue shared between the pricing workers.

   Workers block on `get_job` while the queue is empty but jobs are
   still in progress: a running job may be re-enqueued (escalated to
   exact pricing, or granted a larger limit) once its result has been
   recorded. Only when nothing is queued and nothing is running does
   `get_job` return None and the worker leaves the round.

   The in-progress counter lives under the same mutex as the heap so a
   waiting worker cannot miss the wake-up of the last `job_done`.
*/

use binary_heap_plus::BinaryHeap;
use compare::Compare;
use std::sync::{Condvar, Mutex};

struct QueueState<T, C>
where
    C: Compare<T>,
{
    heap: BinaryHeap<T, C>,
    in_progress: usize,
    closed: bool,
}

/// Thread-safe priority queue that blocks `get_job` on empty
/// as long as jobs are in progress
pub struct BlockingQueue<T, C>
where
    C: Compare<T> + Clone,
{
    state: Mutex<QueueState<T, C>>,
    condvar: Condvar,
    compare: C,
}

impl<T, C: Compare<T> + Clone> BlockingQueue<T, C> {
    /// Create empty blocking queue
    pub fn new(compare: C) -> Self {
        let heap = BinaryHeap::from_vec_cmp(Vec::new(), compare.clone());

        Self {
            state: Mutex::new(QueueState {
                heap,
                in_progress: 0,
                closed: false,
            }),
            condvar: Condvar::new(),
            compare,
        }
    }

    /// Drop everything queued and reopen the queue for a new round
    pub fn reset(&self) {
        let mut lq = self.state.lock().unwrap();
        lq.heap = BinaryHeap::from_vec_cmp(Vec::new(), self.compare.clone());
        lq.in_progress = 0;
        lq.closed = false;
    }

    /// push job into queue
    /// - ignored once the queue was closed for this round
    pub fn add_job(&self, t: T) -> bool {
        let mut lq = self.state.lock().unwrap();
        if lq.closed {
            return false;
        }
        lq.heap.push(t);
        self.condvar.notify_one();
        true
    }

    /// pop the highest priority job
    /// - waits while the queue is empty but other jobs are running
    pub fn get_job(&self) -> Option<T> {
        let mut lq = self.state.lock().unwrap();
        while lq.heap.is_empty() && lq.in_progress > 0 && !lq.closed {
            lq = self.condvar.wait(lq).unwrap();
        }

        if lq.closed {
            return None;
        }

        let job = lq.heap.pop();
        if job.is_some() {
            lq.in_progress += 1;
        }
        job
    }

    /// pop the highest priority job without waiting for running ones
    pub fn try_get_job(&self) -> Option<T> {
        let mut lq = self.state.lock().unwrap();
        if lq.closed {
            return None;
        }
        let job = lq.heap.pop();
        if job.is_some() {
            lq.in_progress += 1;
        }
        job
    }

    /// Signal that a job returned by `get_job` or `try_get_job` has been fully processed.
    /// Any re-enqueue of that job must happen before this call.
    pub fn job_done(&self) {
        let mut lq = self.state.lock().unwrap();
        debug_assert!(lq.in_progress > 0);
        lq.in_progress = lq.in_progress.saturating_sub(1);
        self.condvar.notify_all();
    }

    /// Stop handing out jobs. Running jobs still finish and report.
    /// Returns the jobs that were still pending.
    pub fn close(&self) -> Vec<T> {
        let mut lq = self.state.lock().unwrap();
        lq.closed = true;
        let pending = std::mem::replace(&mut lq.heap, BinaryHeap::from_vec_cmp(Vec::new(), self.compare.clone()));
        self.condvar.notify_all();
        pending.into_vec()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Pending jobs in pop order
    pub fn copy_of_queue(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut sorted = self.state.lock().unwrap().heap.clone().into_sorted_vec();
        sorted.reverse();
        sorted
    }

    pub fn in_progress(&self) -> usize {
        self.state.lock().unwrap().in_progress
    }

    /// return number of pending jobs
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compare::natural;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pops_in_priority_order() {
        let queue = BlockingQueue::new(natural());
        for v in [3, 9, 1, 7] {
            queue.add_job(v);
        }
        assert_eq!(queue.copy_of_queue(), vec![9, 7, 3, 1]);
        assert_eq!(queue.get_job(), Some(9));
        assert_eq!(queue.get_job(), Some(7));
        assert_eq!(queue.in_progress(), 2);
    }

    #[test]
    fn closed_queue_refuses_jobs() {
        let queue = BlockingQueue::new(natural());
        queue.add_job(1);
        queue.add_job(2);
        let mut pending = queue.close();
        pending.sort();
        assert_eq!(pending, vec![1, 2]);
        assert!(!queue.add_job(3));
        assert_eq!(queue.get_job(), None);

        queue.reset();
        assert!(queue.add_job(4));
        assert_eq!(queue.get_job(), Some(4));
    }

    #[test]
    fn waiting_worker_receives_requeued_job() {
        let queue = Arc::new(BlockingQueue::new(natural()));
        queue.add_job(1);
        assert_eq!(queue.get_job(), Some(1));

        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.get_job())
        };

        // requeue before marking the first job done
        queue.add_job(2);
        queue.job_done();

        assert_eq!(waiter.join().unwrap(), Some(2));
    }

    #[test]
    fn try_get_job_does_not_wait_for_running_jobs() {
        let queue = BlockingQueue::new(natural());
        queue.add_job(5);
        queue.add_job(6);
        assert_eq!(queue.try_get_job(), Some(6));
        assert_eq!(queue.try_get_job(), Some(5));
        assert_eq!(queue.in_progress(), 2);
        assert_eq!(queue.try_get_job(), None);
    }

    #[test]
    fn empty_queue_without_running_jobs_returns_none() {
        let queue: BlockingQueue<i32, _> = BlockingQueue::new(natural());
        assert_eq!(queue.get_job(), None);
    }
}
