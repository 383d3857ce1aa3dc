use std::collections::VecDeque;

use uuid::Uuid;

const DEFAULT_MAX_JOBS: usize = 10_000;

/// FIFO of job ids waiting for the device.
///
/// Only ids are queued; the records themselves live in the job table so the
/// queue lock never has to be held while a record is updated.
#[derive(Debug)]
pub struct JobQueue {
    pending: VecDeque<Uuid>,
    max_jobs: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            max_jobs,
        }
    }

    /// Append a job id. Returns false if the queue is at capacity.
    pub fn push(&mut self, id: Uuid) -> bool {
        if self.pending.len() >= self.max_jobs {
            return false;
        }
        self.pending.push_back(id);
        true
    }

    /// Return an id to the head of the queue. Capacity is not checked: the
    /// slot was held until the id was popped.
    pub fn push_front(&mut self, id: Uuid) {
        self.pending.push_front(id);
    }

    /// Take the oldest queued id
    pub fn pop(&mut self) -> Option<Uuid> {
        self.pending.pop_front()
    }

    /// Drop a queued id. Returns true if it was present.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        match self.pending.iter().position(|queued| queued == id) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.pending.contains(id)
    }

    /// Queued ids, head first
    pub fn ids(&self) -> Vec<Uuid> {
        self.pending.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.max_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut queue = JobQueue::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            assert!(queue.push(*id));
        }
        assert_eq!(queue.ids(), ids);
        assert_eq!(queue.pop(), Some(ids[0]));
        assert_eq!(queue.pop(), Some(ids[1]));
        assert_eq!(queue.pop(), Some(ids[2]));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut queue = JobQueue::with_capacity(2);
        assert!(queue.push(Uuid::new_v4()));
        assert!(queue.push(Uuid::new_v4()));
        assert!(queue.is_full());
        assert!(!queue.push(Uuid::new_v4()));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn push_front_jumps_the_line() {
        let mut queue = JobQueue::with_capacity(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        queue.push(a);
        queue.push(b);

        let popped = queue.pop().unwrap();
        queue.push_front(popped);
        assert_eq!(queue.ids(), vec![a, b]);
        assert!(queue.is_full());
    }

    #[test]
    fn remove_from_middle() {
        let mut queue = JobQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        queue.push(a);
        queue.push(b);
        queue.push(c);

        assert!(queue.remove(&b));
        assert!(!queue.remove(&b));
        assert!(!queue.contains(&b));
        assert_eq!(queue.ids(), vec![a, c]);
    }
}
