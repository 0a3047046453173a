//! The weighted round-robin scheduler: the heart of the delivery core.
//!
//! A single worker task wakes up on a fixed tick, advances one step through
//! the priority cycle, and drains at most one item from each buffer at that
//! priority tier. `flush` and `stop` reuse the same per-buffer draining
//! logic synchronously from the caller's task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::CategoryBuffer;
use crate::category::DataCategory;
use crate::client_report::{ClientReportAggregator, DropReason};
use crate::config::DeliveryConfig;
use crate::dsn::Dsn;
use crate::envelope::{assemble, EnvelopeHeader};
use crate::item::BoxedItem;
use crate::transport::Transport;

/// One-shot lifecycle states. Transitions are one-way: `Created -> Running
/// -> Stopping -> Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

pub struct Scheduler {
    buffers: HashMap<DataCategory, Arc<CategoryBuffer<BoxedItem>>>,
    aggregator: Arc<ClientReportAggregator>,
    transport: Arc<dyn Transport>,
    dsn: Dsn,
    cycle: Vec<crate::category::Priority>,
    cycle_pos: AtomicUsize,
    tick_interval: Duration,
    client_report_interval: Duration,
    last_client_report: Mutex<Instant>,
    token: CancellationToken,
    /// Never cancelled. Passed to sends made during `flush`'s best-effort
    /// drain so a prior `token.cancel()` (which stops the worker loop) can't
    /// also poison those sends: cancellation and drain-time budget are two
    /// different signals and must not share one token.
    drain_cancellation: CancellationToken,
    state: Mutex<SchedulerState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    start_once: std::sync::atomic::AtomicBool,
    stop_once: std::sync::atomic::AtomicBool,
}

impl Scheduler {
    pub fn new(
        buffers: HashMap<DataCategory, Arc<CategoryBuffer<BoxedItem>>>,
        aggregator: Arc<ClientReportAggregator>,
        transport: Arc<dyn Transport>,
        config: &DeliveryConfig,
    ) -> Arc<Self> {
        let active: Vec<_> = buffers.values().map(|b| b.priority()).collect();
        let mut active_priorities = active;
        active_priorities.sort();
        active_priorities.dedup();
        let cycle = config.priority_weights.build_cycle(&active_priorities);

        Arc::new(Scheduler {
            buffers,
            aggregator,
            transport,
            dsn: config.dsn.clone(),
            cycle,
            cycle_pos: AtomicUsize::new(0),
            tick_interval: config.tick_interval,
            client_report_interval: config.client_report_interval,
            last_client_report: Mutex::new(Instant::now()),
            token: CancellationToken::new(),
            drain_cancellation: CancellationToken::new(),
            state: Mutex::new(SchedulerState::Created),
            worker: Mutex::new(None),
            start_once: std::sync::atomic::AtomicBool::new(false),
            stop_once: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Spawns the single worker task. Idempotent: subsequent calls are a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        if self.start_once.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = SchedulerState::Running;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.worker.lock() = Some(handle);
        tracing::info!("delivery scheduler started");
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.token.is_cancelled() {
                        break;
                    }
                    self.tick().await;
                }
                _ = self.token.cancelled() => break,
            }
        }
    }

    async fn tick(&self) {
        if self.cycle.is_empty() {
            return;
        }
        let pos = self.cycle_pos.fetch_add(1, Ordering::SeqCst) % self.cycle.len();
        let priority = self.cycle[pos];
        tracing::debug!(priority = %priority, "scheduler tick");

        for category in DataCategory::BUFFERED {
            if category.priority() != priority {
                continue;
            }
            if self.token.is_cancelled() {
                return;
            }
            self.drain_one(*category, true, &self.token).await;
        }

        self.maybe_send_standalone_client_report().await;
    }

    /// Attempts to send at most one item from `category`'s buffer.
    /// Respects the rate limit when `respect_rate_limit` is set; `flush` and
    /// `stop`'s final drain call this with `false` only for the
    /// already-rate-limit-filtered subset they compute themselves.
    ///
    /// `cancellation` is the signal passed to the transport: the live worker
    /// passes `self.token` so an in-flight send can be cut short the moment
    /// `stop` is called, while `flush`'s best-effort drain passes
    /// `self.drain_cancellation`, which is never cancelled, so a shutdown in
    /// progress doesn't also cancel the sends shutdown itself is trying to
    /// complete.
    async fn drain_one(
        &self,
        category: DataCategory,
        respect_rate_limit: bool,
        cancellation: &CancellationToken,
    ) {
        let buffer = match self.buffers.get(&category) {
            Some(buffer) => buffer,
            None => return,
        };

        if respect_rate_limit && self.transport.is_limited(category, Instant::now()) {
            return;
        }

        if buffer.is_empty() {
            return;
        }

        let item = match buffer.poll() {
            Some(item) => item,
            None => return,
        };

        let env_item = match item.to_envelope_item(&self.dsn) {
            Ok(env_item) => env_item,
            Err(_) => {
                self.aggregator
                    .record(DropReason::BeforeSendRejected, category, 1);
                return;
            }
        };

        let mut items = vec![env_item];
        if self.aggregator.has_outcomes() {
            if let Some(report_item) = self.aggregator.take_envelope_item() {
                items.push(report_item);
                *self.last_client_report.lock() = Instant::now();
            }
        }

        let header = EnvelopeHeader::new(chrono::Utc::now()).with_dsn(self.dsn.to_string());
        let bytes = assemble(&header, &items);

        match self.transport.send_envelope(bytes, cancellation).await {
            Ok(outcome) => {
                tracing::debug!(category = %category, outcome = ?outcome, "drained item");
            }
            Err(error) => {
                tracing::warn!(category = %category, %error, "envelope send failed");
                self.aggregator.record(DropReason::NetworkError, category, 1);
            }
        }
    }

    async fn maybe_send_standalone_client_report(&self) {
        let due = {
            let last = *self.last_client_report.lock();
            last.elapsed() >= self.client_report_interval
        };
        if !due || !self.aggregator.has_outcomes() {
            return;
        }

        if let Some(item) = self.aggregator.take_envelope_item() {
            *self.last_client_report.lock() = Instant::now();
            let header = EnvelopeHeader::new(chrono::Utc::now()).with_dsn(self.dsn.to_string());
            let bytes = assemble(&header, &[item]);
            if let Err(error) = self.transport.send_envelope(bytes, &self.token).await {
                tracing::warn!(%error, "standalone client report send failed");
            }
        }
    }

    /// Drains every buffer that is not currently rate-limited, one item at a
    /// time per round, until every such buffer is empty or `deadline`
    /// elapses. Returns `true` iff every non-rate-limited buffer ended up
    /// empty.
    pub async fn flush(&self, deadline: Duration) -> bool {
        let deadline_instant = Instant::now() + deadline;

        loop {
            let now = Instant::now();
            let drainable: Vec<DataCategory> = DataCategory::BUFFERED
                .iter()
                .copied()
                .filter(|c| !self.transport.is_limited(*c, now) && !self.buffers[c].is_empty())
                .collect();

            if drainable.is_empty() {
                return true;
            }

            for category in drainable {
                let remaining = deadline_instant.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return false;
                }
                if tokio::time::timeout(
                    remaining,
                    self.drain_one(category, true, &self.drain_cancellation),
                )
                .await
                .is_err()
                {
                    return false;
                }
            }
        }
    }

    /// Idempotent. Cancels the worker, waits for it to exit, then drains
    /// best-effort within `deadline`. Whatever remains in any buffer once
    /// the deadline has passed — including items still queued behind an
    /// active rate limit — is discarded and accounted as
    /// `shutdown_discarded`.
    pub async fn stop(&self, deadline: Duration) -> bool {
        let deadline_instant = Instant::now() + deadline;

        if !self.stop_once.swap(true, Ordering::SeqCst) {
            *self.state.lock() = SchedulerState::Stopping;
            self.token.cancel();
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.await;
            }
        }

        let remaining_budget = deadline_instant.saturating_duration_since(Instant::now());
        let completed = self.flush(remaining_budget).await;

        for category in DataCategory::BUFFERED {
            let remaining = self.buffers[category].drain();
            if !remaining.is_empty() {
                self.aggregator.record(
                    DropReason::ShutdownDiscarded,
                    *category,
                    remaining.len() as u64,
                );
            }
        }

        *self.state.lock() = SchedulerState::Stopped;
        completed
    }

    pub fn cycle(&self) -> &[crate::category::Priority] {
        &self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfigBuilder;
    use crate::item::test_support::JsonItem;
    use crate::transport::test_support::MockTransport;

    fn scheduler_with(
        buffers: HashMap<DataCategory, Arc<CategoryBuffer<BoxedItem>>>,
        transport: Arc<MockTransport>,
        config: &DeliveryConfig,
    ) -> Arc<Scheduler> {
        let aggregator = Arc::new(ClientReportAggregator::new());
        Scheduler::new(buffers, aggregator, transport, config)
    }

    fn config(tick_ms: u64) -> DeliveryConfig {
        DeliveryConfigBuilder::new()
            .dsn("https://key@host/1")
            .tick_interval_ms(tick_ms)
            .build()
            .unwrap()
    }

    fn buffer_for(
        category: DataCategory,
        capacity: usize,
        aggregator: &Arc<ClientReportAggregator>,
    ) -> Arc<CategoryBuffer<BoxedItem>> {
        Arc::new(CategoryBuffer::new(
            category,
            capacity,
            crate::buffer::OverflowPolicy::DropOldest,
            aggregator.clone(),
        ))
    }

    #[tokio::test]
    async fn s4_shutdown_immediately_discards_everything() {
        let cfg = config(100);
        let aggregator = Arc::new(ClientReportAggregator::new());
        let error_buf = buffer_for(DataCategory::Error, 10, &aggregator);
        for i in 0..10 {
            error_buf.offer(Box::new(JsonItem::new(
                DataCategory::Error,
                "event",
                serde_json::json!({ "i": i }),
            )));
        }
        let mut buffers = HashMap::new();
        buffers.insert(DataCategory::Error, error_buf);

        let transport = Arc::new(MockTransport::new());
        let scheduler = Scheduler::new(buffers, aggregator.clone(), transport.clone(), &cfg);
        scheduler.start();

        let completed = scheduler.stop(Duration::from_millis(0)).await;
        assert!(!completed);
        assert_eq!(transport.sent_count(), 0);

        let (_, payload) = aggregator.take_envelope_item().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        let events = value["discarded_events"].as_array().unwrap();
        assert_eq!(events[0]["reason"], "shutdown_discarded");
        assert_eq!(events[0]["quantity"].as_u64().unwrap(), 10);
    }

    #[tokio::test]
    async fn flush_drains_everything_not_rate_limited() {
        let cfg = config(100);
        let aggregator = Arc::new(ClientReportAggregator::new());
        let error_buf = buffer_for(DataCategory::Error, 10, &aggregator);
        for i in 0..5 {
            error_buf.offer(Box::new(JsonItem::new(
                DataCategory::Error,
                "event",
                serde_json::json!({ "i": i }),
            )));
        }
        let mut buffers = HashMap::new();
        buffers.insert(DataCategory::Error, error_buf.clone());

        let transport = Arc::new(MockTransport::new());
        let scheduler = scheduler_with(buffers, transport.clone(), &cfg);

        let completed = scheduler.flush(Duration::from_secs(1)).await;
        assert!(completed);
        assert!(error_buf.is_empty());
        assert_eq!(transport.sent_count(), 5);
    }

    #[tokio::test]
    async fn flush_leaves_rate_limited_buffers_queued() {
        let cfg = config(100);
        let aggregator = Arc::new(ClientReportAggregator::new());
        let error_buf = buffer_for(DataCategory::Error, 10, &aggregator);
        error_buf.offer(Box::new(JsonItem::new(
            DataCategory::Error,
            "event",
            serde_json::json!({}),
        )));
        let mut buffers = HashMap::new();
        buffers.insert(DataCategory::Error, error_buf.clone());

        let transport = Arc::new(MockTransport::new());
        transport
            .registry
            .update(&[DataCategory::Error], Instant::now() + Duration::from_secs(60));
        let scheduler = scheduler_with(buffers, transport.clone(), &cfg);

        let completed = scheduler.flush(Duration::from_millis(50)).await;
        assert!(completed);
        assert_eq!(error_buf.len(), 1);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn s6_client_report_piggybacks_on_next_send() {
        let cfg = config(100);
        let aggregator = Arc::new(ClientReportAggregator::new());
        aggregator.record(DropReason::QueueOverflow, DataCategory::Error, 1);

        let error_buf = buffer_for(DataCategory::Error, 10, &aggregator);
        error_buf.offer(Box::new(JsonItem::new(
            DataCategory::Error,
            "event",
            serde_json::json!({}),
        )));
        let mut buffers = HashMap::new();
        buffers.insert(DataCategory::Error, error_buf);

        let transport = Arc::new(MockTransport::new());
        let scheduler = Scheduler::new(buffers, aggregator.clone(), transport.clone(), &cfg);

        scheduler.flush(Duration::from_secs(1)).await;

        assert_eq!(transport.sent_count(), 1);
        let sent = transport.sent.lock()[0].clone();
        let parsed = crate::envelope::parse(&sent).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[1].0.ty, "client_report");
        assert!(aggregator.take_envelope_item().is_none());
    }

    #[tokio::test]
    async fn before_send_rejection_is_accounted_and_does_not_block_others() {
        let cfg = config(100);
        let aggregator = Arc::new(ClientReportAggregator::new());
        let error_buf = buffer_for(DataCategory::Error, 10, &aggregator);
        error_buf.offer(Box::new(JsonItem::failing(DataCategory::Error, "event")));
        error_buf.offer(Box::new(JsonItem::new(
            DataCategory::Error,
            "event",
            serde_json::json!({}),
        )));
        let mut buffers = HashMap::new();
        buffers.insert(DataCategory::Error, error_buf.clone());

        let transport = Arc::new(MockTransport::new());
        let scheduler = Scheduler::new(buffers, aggregator.clone(), transport.clone(), &cfg);

        scheduler.flush(Duration::from_secs(1)).await;

        assert_eq!(transport.sent_count(), 1);
        assert!(error_buf.is_empty());
    }
}
