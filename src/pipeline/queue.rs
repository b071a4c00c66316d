//! Bounded FIFO queues between the host and the workers
//!
//! A push never blocks: at capacity the item is handed back and the caller
//! decides whether to wait, retry or drop. Capacity is an atomic so
//! `reconfigure()` can change it while holding the lock, and the length is
//! mirrored in an atomic so depth reads never wait on that lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use super::packet::EncodedPacket;
use crate::video::frame::Frame;

/// Pending raw frames, in submission order
pub type FrameQueue = BoundedQueue<Frame>;

/// Completed packets awaiting the host, in decode order
pub type PacketQueue = BoundedQueue<EncodedPacket>;

/// Thread-safe bounded FIFO
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: AtomicUsize,
    /// Mirrors `items.len()`; written only under the lock
    len: AtomicUsize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue; a capacity of 0 is raised to 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: AtomicUsize::new(capacity),
            len: AtomicUsize::new(0),
        }
    }

    /// Append an item, or hand it back if the queue is full
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity() {
            return Err(item);
        }
        items.push_back(item);
        self.len.store(items.len(), Ordering::Release);
        Ok(())
    }

    /// Like [`try_push`](Self::try_push), but gives up and hands the item
    /// back if the lock cannot be taken by `deadline`
    pub fn try_push_until(&self, item: T, deadline: Instant) -> Result<(), T> {
        let Some(mut items) = self.items.try_lock_until(deadline) else {
            return Err(item);
        };
        if items.len() >= self.capacity() {
            return Err(item);
        }
        items.push_back(item);
        self.len.store(items.len(), Ordering::Release);
        Ok(())
    }

    /// Remove the front item without waiting; `None` if the queue is empty
    /// or its lock is held elsewhere
    pub fn try_pop_front(&self) -> Option<T> {
        let mut items = self.items.try_lock()?;
        let item = items.pop_front();
        self.len.store(items.len(), Ordering::Release);
        item
    }

    /// Remove and return the front item
    pub fn pop_front_if_any(&self) -> Option<T> {
        let mut items = self.items.lock();
        let item = items.pop_front();
        self.len.store(items.len(), Ordering::Release);
        item
    }

    /// Number of queued items
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether `size() >= capacity()`
    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity()
    }

    /// Maximum number of items
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Change the maximum; existing items above it stay queued
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity.max(1), Ordering::Release);
    }

    /// Drop every queued item, returning how many there were
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let n = items.len();
        items.clear();
        self.len.store(0, Ordering::Release);
        n
    }

    /// Hold the queue lock (reconfiguration); callers must not mutate
    /// through the guard
    pub(crate) fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock()
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// Clone of the front item, leaving it queued
    pub fn peek_front(&self) -> Option<T> {
        self.items.lock().front().cloned()
    }
}
