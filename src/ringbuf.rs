// Fixed-capacity byte queue used for per-process buffered I/O
use crossbeam_queue::ArrayQueue;

#[derive(Debug)]
pub struct RingBuf {
    bytes: ArrayQueue<u8>,
}

impl RingBuf {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: ArrayQueue::new(capacity),
        }
    }

    /// Copies as much of `data` as fits. Returns the number of bytes stored.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let mut written = 0;
        for &byte in data {
            if self.bytes.push(byte).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    /// Moves up to `buf.len()` buffered bytes into `buf`. Never waits for data.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut read = 0;
        for slot in buf.iter_mut() {
            match self.bytes.pop() {
                Some(byte) => *slot = byte,
                None => break,
            }
            read += 1;
        }
        read
    }

    /// Discards everything buffered.
    pub fn flush(&mut self) {
        while self.bytes.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }
}
