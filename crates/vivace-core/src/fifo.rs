//! Lock-free SPSC ring buffer and the spinlock used to widen it.
//!
//! [`SpscRing`] is the transport primitive of the whole engine: two
//! instances carry [`RtEvent`]s across the audio boundary, tracks use
//! private instances to buffer chain events, and the performance timer logs
//! through one.
//!
//! # Contract
//!
//! One producer thread, one consumer thread. `push` and `pop` take `&self`
//! so both ends can share an `Arc`; the single-producer/single-consumer
//! discipline is the caller's responsibility. Multi-producer use is widened
//! by serializing producers through a [`SpinLock`] (the performance timer
//! does this) or by funnelling through the dispatcher — never by relaxing
//! the ring itself.
//!
//! # Overflow policy
//!
//! Drop-newest: `push` returns the rejected value when the ring is full and
//! the producer decides what to do (count it, retry next tick). This policy
//! is uniform across the engine.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::rt_event::RtEvent;

/// Fifo carrying RT events across the audio boundary.
pub type RtEventFifo = SpscRing<RtEvent>;

#[repr(align(64))]
struct CursorCell(AtomicUsize);

/// Bounded single-producer/single-consumer ring with power-of-two capacity.
pub struct SpscRing<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Next slot the consumer will read. Written by the consumer only.
    head: CursorCell,
    /// Next slot the producer will write. Written by the producer only.
    tail: CursorCell,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Create a ring with the given capacity. `capacity` must be a power of
    /// two and at least 2.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity >= 2);
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
            head: CursorCell(AtomicUsize::new(0)),
            tail: CursorCell(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of elements currently queued. Exact only when called from one
    /// of the two endpoint threads.
    #[inline]
    pub fn len(&self) -> usize {
        self.tail
            .0
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a value. Returns `Err(value)` when the ring is full.
    ///
    /// Producer side only. Wait-free, no allocation.
    #[inline]
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == self.capacity() {
            return Err(value);
        }
        // Safety: the slot at `tail` is unoccupied (consumer has advanced
        // past it) and only this producer writes slots.
        unsafe {
            (*self.slots[tail & self.mask].get()).write(value);
        }
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pop a value, or `None` when the ring is empty.
    ///
    /// Consumer side only. Wait-free, no allocation.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // Safety: the slot at `head` was fully written by the producer
        // (release/acquire pair on `tail`) and only this consumer reads it.
        let value = unsafe { (*self.slots[head & self.mask].get()).assume_init_read() };
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for SpscRing<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscRing")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Test-and-set spinlock.
///
/// Only used to serialize multiple RT producers onto a single ring; the
/// critical section is one ring push. Not a general-purpose lock.
#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }
}

pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
