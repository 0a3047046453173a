//! Counts dropped items by `(reason, category)` and, on demand, renders a
//! single `client_report` envelope item from the accumulated counts.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::category::DataCategory;
use crate::item::ItemHeader;

/// The closed set of reasons an item can be dropped for. Each becomes a
/// counted outcome in a client report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    QueueOverflow,
    RateLimitBackoff,
    NetworkError,
    BeforeSendRejected,
    SampleRate,
    ShutdownDiscarded,
}

impl DropReason {
    pub fn name(self) -> &'static str {
        match self {
            DropReason::QueueOverflow => "queue_overflow",
            DropReason::RateLimitBackoff => "rate_limit_backoff",
            DropReason::NetworkError => "network_error",
            DropReason::BeforeSendRejected => "before_send_rejected",
            DropReason::SampleRate => "sample_rate",
            DropReason::ShutdownDiscarded => "shutdown_discarded",
        }
    }
}

#[derive(Serialize)]
struct DiscardedEvent {
    reason: &'static str,
    category: &'static str,
    quantity: u64,
}

#[derive(Serialize)]
struct ClientReportPayload {
    timestamp: String,
    discarded_events: Vec<DiscardedEvent>,
}

/// Accumulates `(reason, category) -> count` under a single short-lived
/// mutex. No path ever holds this lock across an `.await`.
#[derive(Default)]
pub struct ClientReportAggregator {
    counts: Mutex<HashMap<(DropReason, DataCategory), u64>>,
}

impl ClientReportAggregator {
    pub fn new() -> Self {
        ClientReportAggregator {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Increments the `(reason, category)` counter by `quantity`.
    pub fn record(&self, reason: DropReason, category: DataCategory, quantity: u64) {
        if quantity == 0 {
            return;
        }
        let mut counts = self.counts.lock().unwrap();
        *counts.entry((reason, category)).or_insert(0) += quantity;
    }

    /// `true` if there is at least one non-zero outcome waiting to be sent.
    pub fn has_outcomes(&self) -> bool {
        !self.counts.lock().unwrap().is_empty()
    }

    /// Atomically snapshots and resets the map, returning a `client_report`
    /// item header and payload if anything was recorded, else `None`.
    pub fn take_envelope_item(&self) -> Option<(ItemHeader, Vec<u8>)> {
        let snapshot: HashMap<(DropReason, DataCategory), u64> = {
            let mut counts = self.counts.lock().unwrap();
            if counts.is_empty() {
                return None;
            }
            std::mem::take(&mut *counts)
        };

        let discarded_events = snapshot
            .into_iter()
            .map(|((reason, category), quantity)| DiscardedEvent {
                reason: reason.name(),
                category: category.name(),
                quantity,
            })
            .collect();

        let payload = ClientReportPayload {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            discarded_events,
        };

        let bytes = serde_json::to_vec(&payload).expect("client report payload always serializes");
        let header = ItemHeader::new("client_report", bytes.len());
        Some((header, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_aggregator_yields_nothing() {
        let aggregator = ClientReportAggregator::new();
        assert!(!aggregator.has_outcomes());
        assert!(aggregator.take_envelope_item().is_none());
    }

    #[test]
    fn records_are_additive_per_reason_and_category() {
        let aggregator = ClientReportAggregator::new();
        aggregator.record(DropReason::QueueOverflow, DataCategory::Error, 1);
        aggregator.record(DropReason::QueueOverflow, DataCategory::Error, 2);
        aggregator.record(DropReason::NetworkError, DataCategory::Session, 1);

        let (_, payload) = aggregator.take_envelope_item().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        let events = value["discarded_events"].as_array().unwrap();
        assert_eq!(events.len(), 2);

        let total: u64 = events
            .iter()
            .map(|e| e["quantity"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn take_resets_the_map() {
        let aggregator = ClientReportAggregator::new();
        aggregator.record(DropReason::ShutdownDiscarded, DataCategory::Span, 5);
        assert!(aggregator.take_envelope_item().is_some());
        assert!(aggregator.take_envelope_item().is_none());
    }
}
