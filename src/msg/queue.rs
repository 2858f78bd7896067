//! Dual message FIFO and its counting semaphore
//!
//! The local and remote queues share one mutex and one semaphore. The
//! semaphore's value always equals the total number of messages across
//! both queues at rest: producers push under the mutex and post once per
//! message, the paint thread waits once per wake and decrements extra
//! for every additional message it batches under the same lock.

use crate::msg::Message;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Counting semaphore built on a mutex and condvar.
///
/// `std` has no semaphore; this is the minimal shape the queue
/// discipline needs: blocking acquire, non-blocking multi-acquire for
/// already-posted batch items, and a post of `n`.
#[derive(Debug, Default)]
pub struct Semaphore {
  count: Mutex<usize>,
  available: Condvar,
}

impl Semaphore {
  pub fn new(initial: usize) -> Self {
    Self {
      count: Mutex::new(initial),
      available: Condvar::new(),
    }
  }

  pub fn value(&self) -> usize {
    *self.count.lock()
  }

  pub fn post(&self, n: usize) {
    if n == 0 {
      return;
    }
    let mut count = self.count.lock();
    *count += n;
    if n == 1 {
      self.available.notify_one();
    } else {
      self.available.notify_all();
    }
  }

  /// Blocks until at least one permit is available, then takes it.
  pub fn acquire(&self) {
    let mut count = self.count.lock();
    while *count == 0 {
      self.available.wait(&mut count);
    }
    *count -= 1;
  }

  /// Takes `n` permits without blocking. Returns false (taking none)
  /// when fewer are available; callers use this for permits they know
  /// the producer already posted.
  pub fn try_acquire_many(&self, n: usize) -> bool {
    let mut count = self.count.lock();
    if *count < n {
      return false;
    }
    *count -= n;
    true
  }
}

/// The two intake FIFOs, guarded by one external mutex.
#[derive(Debug, Default)]
pub struct MessageFifos {
  pub local: VecDeque<Message>,
  pub remote: VecDeque<Message>,
}

impl MessageFifos {
  pub fn total(&self) -> usize {
    self.local.len() + self.remote.len()
  }

  pub fn stream(&mut self, local: bool) -> &mut VecDeque<Message> {
    if local {
      &mut self.local
    } else {
      &mut self.remote
    }
  }
}
