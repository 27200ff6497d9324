//! Processes and their mailboxes.
//!
//! A process is a frame tree rooted at a `ProcessRoot` frame, wholly owned
//! by one worker. Only two things about a process are visible across
//! workers: its pid and its mailbox, published through the application
//! registry.

use parking_lot::Mutex;
use quill_core::{FunctionValue, Pid, Value};
use std::collections::VecDeque;
use std::sync::Arc;

/// FIFO message queue for one process. Cloning shares the queue.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    queue: Arc<Mutex<VecDeque<Value>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message. Arrival order from a single sender is preserved.
    pub fn push(&self, value: Value) {
        self.queue.lock().push_back(value);
    }

    /// Dequeue the oldest message, if any.
    pub fn pop(&self) -> Option<Value> {
        self.queue.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Registry entry for a live process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: Pid,
    pub mailbox: Mailbox,
}

/// A process waiting to be adopted by a worker.
#[derive(Debug)]
pub struct SpawnRequest {
    pub pid: Pid,
    pub function: FunctionValue,
    pub mailbox: Mailbox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_is_fifo() {
        let mb = Mailbox::new();
        mb.push(Value::Int(1));
        mb.push(Value::Int(2));
        mb.push(Value::Int(3));
        assert_eq!(mb.len(), 3);
        assert_eq!(mb.pop().unwrap().as_int(), Some(1));
        assert_eq!(mb.pop().unwrap().as_int(), Some(2));
        assert_eq!(mb.pop().unwrap().as_int(), Some(3));
        assert!(mb.pop().is_none());
    }

    #[test]
    fn test_clone_shares_queue() {
        let a = Mailbox::new();
        let b = a.clone();
        a.push(Value::Int(9));
        assert_eq!(b.pop().unwrap().as_int(), Some(9));
        assert!(a.is_empty());
    }
}
