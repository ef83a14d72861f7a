//! Thread-safe FIFO channel for task communication.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex};

use crate::core::value::Value;

struct ChannelInner {
    queue: VecDeque<Value>,
    closed: bool,
}

/// FIFO queue with a closed flag. Once closed, remaining items still drain;
/// after that, receivers observe `ok = false`.
pub struct Channel {
    inner: Mutex<ChannelInner>,
    recv_cv: Condvar,
    send_cv: Condvar,
    capacity: Option<usize>,
}

impl Channel {
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(ChannelInner {
                queue: VecDeque::new(),
                closed: false,
            }),
            recv_cv: Condvar::new(),
            send_cv: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues a value, blocking while a bounded channel is full.
    /// Returns `false` if the channel is closed.
    pub fn send(&self, value: Value) -> bool {
        let mut inner = self.inner.lock();
        if let Some(cap) = self.capacity {
            while inner.queue.len() >= cap && !inner.closed {
                self.send_cv.wait(&mut inner);
            }
        }
        if inner.closed {
            return false;
        }
        inner.queue.push_back(value);
        drop(inner);
        self.recv_cv.notify_one();
        true
    }

    /// Dequeues the next value, blocking while the channel is open and empty.
    /// `(Nil, false)` once the channel is closed and drained.
    pub fn receive(&self) -> (Value, bool) {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.queue.pop_front() {
                drop(inner);
                self.send_cv.notify_one();
                return (value, true);
            }
            if inner.closed {
                return (Value::Nil, false);
            }
            self.recv_cv.wait(&mut inner);
        }
    }

    /// Idempotent; unblocks every pending sender and receiver.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);
        self.recv_cv.notify_all();
        self.send_cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Channel")
            .field("len", &inner.queue.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved_across_close() {
        let ch = Channel::unbounded();
        for i in 0..4 {
            assert!(ch.send(Value::Int64(i)));
        }
        ch.close();
        for i in 0..4 {
            let (v, ok) = ch.receive();
            assert!(ok);
            assert_eq!(v.as_i64(), Some(i));
        }
        let (v, ok) = ch.receive();
        assert!(!ok);
        assert!(matches!(v, Value::Nil));
    }

    #[test]
    fn bounded_send_blocks_until_a_receiver_drains() {
        use std::sync::Arc;
        use std::time::Duration;

        let ch = Arc::new(Channel::with_capacity(Some(1)));
        assert!(ch.send(Value::Int64(1)));

        let receiver = {
            let ch = ch.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                ch.receive()
            })
        };

        // Full at capacity 1; this send parks until the receiver drains.
        assert!(ch.send(Value::Int64(2)));
        let (first, ok) = receiver.join().unwrap();
        assert!(ok);
        assert_eq!(first.as_i64(), Some(1));
        let (second, ok) = ch.receive();
        assert!(ok);
        assert_eq!(second.as_i64(), Some(2));
    }

    #[test]
    fn send_after_close_is_rejected() {
        let ch = Channel::unbounded();
        ch.close();
        ch.close(); // idempotent
        assert!(!ch.send(Value::Int64(1)));
    }
}
