// Fixed-capacity FIFO of integer identifiers
//
// Backs the run queue, the sleep queue and the process table allocator.
use core::fmt;
use crossbeam_queue::ArrayQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full,
    Empty,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueueError::Full => write!(f, "queue is full"),
            QueueError::Empty => write!(f, "queue is empty"),
        }
    }
}

#[derive(Debug)]
pub struct Queue {
    items: ArrayQueue<i32>,
}

impl Queue {
    /// Creates an empty queue holding at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity),
        }
    }

    /// Appends `id` at the back.
    pub fn enqueue(&mut self, id: i32) -> Result<(), QueueError> {
        self.items.push(id).map_err(|_| QueueError::Full)
    }

    /// Removes and returns the id at the front.
    pub fn dequeue(&mut self) -> Result<i32, QueueError> {
        self.items.pop().ok_or(QueueError::Empty)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Reports whether `id` is queued. Rotates the queue once, so order is
    /// unchanged afterwards.
    pub fn contains(&mut self, id: i32) -> bool {
        let mut found = false;
        for _ in 0..self.len() {
            if let Some(item) = self.items.pop() {
                found |= item == id;
                // a slot was just freed, so the push cannot fail
                let _ = self.items.push(item);
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_fifo_order() {
        let mut queue = Queue::new(4);
        assert!(queue.is_empty());
        queue.enqueue(3).unwrap();
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(), Ok(3));
        assert_eq!(queue.dequeue(), Ok(1));
        assert_eq!(queue.dequeue(), Ok(2));
        assert_eq!(queue.dequeue(), Err(QueueError::Empty));
    }

    #[test_case]
    fn test_full_queue_rejects() {
        let mut queue = Queue::new(2);
        queue.enqueue(0).unwrap();
        queue.enqueue(1).unwrap();
        assert_eq!(queue.enqueue(2), Err(QueueError::Full));
        assert_eq!(queue.len(), 2);
    }

    #[test_case]
    fn test_contains_keeps_order() {
        let mut queue = Queue::new(4);
        for id in [7, 8, 9] {
            queue.enqueue(id).unwrap();
        }
        assert!(queue.contains(8));
        assert!(!queue.contains(5));
        assert_eq!(queue.dequeue(), Ok(7));
        assert_eq!(queue.dequeue(), Ok(8));
        assert_eq!(queue.dequeue(), Ok(9));
    }
}
