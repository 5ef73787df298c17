//! Pipelined transaction queue
//!
//! Requests that arrive before the response to an earlier request are
//! parked here until their own response shows up. Responses come back in
//! request order, so this is a plain FIFO:
//! - Fixed capacity, storage allocated on first use
//! - One slot is never filled so `front == back` always means empty
//! - Overflow and underflow are sticky: once the flow has lost track of
//!   request/response pairing it never trusts the queue again

use crate::transaction::{Transaction, TransactionHandle};
use log::trace;

/// Bounded ring of transactions awaiting a response
pub struct TransactionPipeline {
    /// Backing storage, `None` until the first push
    slots: Option<Box<[Option<TransactionHandle>]>>,
    capacity: usize,
    front: usize,
    back: usize,
    overflow: bool,
    underflow: bool,
}

impl TransactionPipeline {
    /// Create an empty pipeline holding at most `capacity - 1` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: None,
            capacity: capacity.max(crate::config::MIN_PIPELINE_DEPTH),
            front: 0,
            back: 0,
            overflow: false,
            underflow: false,
        }
    }

    /// Queue a request transaction behind the ones already waiting.
    ///
    /// Returns false and latches the overflow flag when the ring is full;
    /// the transaction is not stored and the caller has to pair it without
    /// the pipeline. Pushing after either fault flag is set is a bug in the
    /// caller.
    pub fn add(&mut self, transaction: TransactionHandle) -> bool {
        debug_assert!(
            !self.overflow && !self.underflow,
            "push to a faulted pipeline"
        );
        if self.overflow || self.underflow {
            return false;
        }

        let capacity = self.capacity;
        let slots = self
            .slots
            .get_or_insert_with(|| (0..capacity).map(|_| None).collect());

        let new_back = (self.back + 1) % capacity;
        if new_back == self.front {
            self.overflow = true;
            return false;
        }

        slots[self.back] = Some(transaction);
        self.back = new_back;
        true
    }

    /// Oldest waiting transaction, or `None` when no request is outstanding
    pub fn take(&mut self) -> Option<TransactionHandle> {
        debug_assert!(!self.underflow, "pop from an underflowed pipeline");

        if self.front == self.back {
            return None;
        }

        let slot = self.slots.as_mut()?[self.front].take();
        self.front = (self.front + 1) % self.capacity;
        slot
    }

    /// Record that a response arrived with nothing to pair it with
    pub fn mark_underflow(&mut self) {
        self.underflow = true;
    }

    /// Delete every queued transaction, oldest first, and free the storage.
    /// Returns how many were queued.
    pub fn clear(&mut self) -> usize {
        let Some(mut slots) = self.slots.take() else {
            return 0;
        };

        let mut drained = 0;
        let mut k = self.front;
        while k != self.back {
            Transaction::delete_transaction(slots[k].take());
            drained += 1;
            k = (k + 1) % self.capacity;
        }

        trace!("pipeline cleared, {} transaction(s) dropped", drained);
        self.front = 0;
        self.back = 0;
        drained
    }

    /// Number of queued transactions
    pub fn len(&self) -> usize {
        (self.back + self.capacity - self.front) % self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.front == self.back
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn front(&self) -> usize {
        self.front
    }

    pub fn back(&self) -> usize {
        self.back
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    pub fn underflow(&self) -> bool {
        self.underflow
    }

    /// Whether backing storage has been allocated
    pub fn is_allocated(&self) -> bool {
        self.slots.is_some()
    }
}

impl Drop for TransactionPipeline {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for TransactionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionPipeline")
            .field("capacity", &self.capacity)
            .field("front", &self.front)
            .field("back", &self.back)
            .field("overflow", &self.overflow)
            .field("underflow", &self.underflow)
            .finish()
    }
}
