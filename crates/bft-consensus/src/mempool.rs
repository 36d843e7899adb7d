//! Command submission surface (supplement D): a bounded FIFO queue, not a
//! batching or prioritization policy. Fee markets, replacement and ordering
//! heuristics are out of scope; a full mempool is its own subsystem.

use bft_types::Command;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MempoolError {
    #[error("mempool is full ({0} commands)")]
    Full(usize),
}

pub struct Mempool {
    max_size: usize,
    queue: VecDeque<Command>,
}

impl Mempool {
    pub fn new(max_size: usize) -> Self {
        Self { max_size, queue: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueues `command`, rejecting it once the queue is at capacity rather
    /// than evicting an older one: a full mempool is backpressure the caller
    /// (the submitter) must observe, not something this type papers over.
    pub fn submit(&mut self, command: Command) -> Result<(), MempoolError> {
        if self.queue.len() >= self.max_size {
            return Err(MempoolError::Full(self.max_size));
        }
        self.queue.push_back(command);
        Ok(())
    }

    /// Pulls up to `count` commands off the front of the queue, FIFO, for a
    /// leader building its next proposal.
    pub fn take(&mut self, count: usize) -> Vec<Command> {
        let n = count.min(self.queue.len());
        self.queue.drain(..n).collect()
    }

    /// Drops `command` back onto the front of the queue — used when a
    /// proposal that took it never lands (e.g. the leader times out before
    /// broadcasting).
    pub fn requeue_front(&mut self, command: Command) {
        self.queue.push_front(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_respects_capacity() {
        let mut mempool = Mempool::new(2);
        mempool.submit(Command::new(b"a".to_vec())).unwrap();
        mempool.submit(Command::new(b"b".to_vec())).unwrap();
        assert_eq!(mempool.submit(Command::new(b"c".to_vec())), Err(MempoolError::Full(2)));
    }

    #[test]
    fn take_is_fifo_and_bounded_by_queue_length() {
        let mut mempool = Mempool::new(10);
        mempool.submit(Command::new(b"a".to_vec())).unwrap();
        mempool.submit(Command::new(b"b".to_vec())).unwrap();
        let taken = mempool.take(5);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0], Command::new(b"a".to_vec()));
        assert!(mempool.is_empty());
    }

    #[test]
    fn requeue_front_puts_command_back_at_head() {
        let mut mempool = Mempool::new(10);
        mempool.submit(Command::new(b"a".to_vec())).unwrap();
        let taken = mempool.take(1);
        mempool.requeue_front(taken.into_iter().next().unwrap());
        mempool.submit(Command::new(b"b".to_vec())).unwrap();
        let next = mempool.take(1);
        assert_eq!(next[0], Command::new(b"a".to_vec()));
    }
}
