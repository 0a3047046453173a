//! A bounded, per-category FIFO with an overflow policy and drop accounting.
//!
//! Every buffer is independent: no two buffers ever share a lock, which is
//! what lets the scheduler poll one category without blocking on another.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::category::{DataCategory, Priority};
use crate::client_report::{ClientReportAggregator, DropReason};

/// What to do when `offer` is called on a full buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room for the new one.
    DropOldest,
    /// Discard the new item, keeping the buffer's current contents.
    DropNewest,
    /// Never block and never evict: reject the new item outright. Distinct
    /// from `DropNewest` only in naming; both reject the incoming item. The
    /// variant exists because the spec's policy enum names it separately for
    /// callers that want to express "this buffer must never silently evict
    /// history" even though the behavior coincides with `DropNewest`.
    BlockNever,
}

/// The result of an `offer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Enqueued,
    Dropped,
}

/// A bounded FIFO for a single [`DataCategory`], guarded by a short-lived
/// `parking_lot::Mutex`. `T` is normally `Box<dyn TelemetryItem>` but is left
/// generic so tests can exercise the buffer with plain values.
pub struct CategoryBuffer<T> {
    category: DataCategory,
    priority: Priority,
    capacity: usize,
    policy: OverflowPolicy,
    items: Mutex<VecDeque<T>>,
    aggregator: Arc<ClientReportAggregator>,
}

impl<T> CategoryBuffer<T> {
    pub fn new(
        category: DataCategory,
        capacity: usize,
        policy: OverflowPolicy,
        aggregator: Arc<ClientReportAggregator>,
    ) -> Self {
        assert!(capacity > 0, "buffer capacity must be greater than zero");
        CategoryBuffer {
            category,
            priority: category.priority(),
            capacity,
            policy,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            aggregator,
        }
    }

    pub fn category(&self) -> DataCategory {
        self.category
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Enqueues `item`, applying the overflow policy if the buffer is full.
    /// Every path that rejects or evicts an item records exactly one
    /// `queue_overflow` outcome.
    pub fn offer(&self, item: T) -> Offer {
        let mut items = self.items.lock();
        if items.len() < self.capacity {
            items.push_back(item);
            return Offer::Enqueued;
        }

        match self.policy {
            OverflowPolicy::DropOldest => {
                items.pop_front();
                items.push_back(item);
                drop(items);
                self.aggregator
                    .record(DropReason::QueueOverflow, self.category, 1);
                Offer::Enqueued
            }
            OverflowPolicy::DropNewest | OverflowPolicy::BlockNever => {
                drop(items);
                self.aggregator
                    .record(DropReason::QueueOverflow, self.category, 1);
                Offer::Dropped
            }
        }
    }

    /// Removes and returns the head of the queue, or `None` if empty.
    pub fn poll(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Atomically removes and returns every queued item, in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        let mut items = self.items.lock();
        items.drain(..).collect()
    }
}
