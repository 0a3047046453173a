//! The `Client` facade: the only type most callers ever touch. Wires a
//! buffer per category, the rate-limit registry, the client-report
//! aggregator, a transport, and a scheduler into a single `capture` /
//! `flush` / `close` surface that never blocks the caller on network I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::CategoryBuffer;
use crate::category::DataCategory;
use crate::client_report::{ClientReportAggregator, DropReason};
use crate::config::DeliveryConfig;
use crate::dsn::Dsn;
use crate::item::BoxedItem;
use crate::rate_limit::RateLimitRegistry;
use crate::scheduler::Scheduler;
use crate::transport::{HttpTransport, Transport};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build the underlying http client: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The top-level delivery client. Cheap to clone: everything it owns is
/// already behind an `Arc`.
pub struct Client {
    dsn: Dsn,
    buffers: HashMap<DataCategory, Arc<CategoryBuffer<BoxedItem>>>,
    aggregator: Arc<ClientReportAggregator>,
    scheduler: Arc<Scheduler>,
    closed: AtomicBool,
}

impl Client {
    /// Builds a client wired to a real `HttpTransport`, starting its
    /// scheduler immediately.
    pub fn new(config: DeliveryConfig) -> Result<Arc<Self>, ClientError> {
        let registry = Arc::new(RateLimitRegistry::new());
        let transport = Arc::new(HttpTransport::new(
            config.dsn.clone(),
            config.sdk_name.clone(),
            config.sdk_version.clone(),
            Duration::from_secs(30),
            registry,
        )?);
        Ok(Self::with_transport(config, transport))
    }

    /// Builds a client around a caller-supplied transport. The production
    /// entry point (`new`) and tests both fold into this.
    pub fn with_transport(config: DeliveryConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let aggregator = Arc::new(ClientReportAggregator::new());

        let buffers: HashMap<DataCategory, Arc<CategoryBuffer<BoxedItem>>> = DataCategory::BUFFERED
            .iter()
            .map(|category| {
                let buffer = Arc::new(CategoryBuffer::new(
                    *category,
                    config.buffer_capacity_per_category,
                    config.overflow_policy,
                    aggregator.clone(),
                ));
                (*category, buffer)
            })
            .collect();

        let scheduler = Scheduler::new(buffers.clone(), aggregator.clone(), transport, &config);
        scheduler.start();

        Arc::new(Client {
            dsn: config.dsn,
            buffers,
            aggregator,
            scheduler,
            closed: AtomicBool::new(false),
        })
    }

    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }

    /// Enqueues `item` into its category's buffer. Never blocks and never
    /// fails visibly to the caller: a full buffer evicts or drops per the
    /// configured overflow policy and records the outcome, and a capture
    /// after `close` is accounted as `shutdown_discarded`.
    pub fn capture(&self, item: BoxedItem) {
        if self.closed.load(Ordering::SeqCst) {
            self.aggregator
                .record(DropReason::ShutdownDiscarded, item.category(), 1);
            return;
        }

        let category = item.category();
        match self.buffers.get(&category) {
            Some(buffer) => {
                buffer.offer(item);
            }
            None => {
                tracing::warn!(category = %category, "no buffer configured for category");
            }
        }
    }

    /// Blocks the calling task (not the whole process) until every buffer
    /// not currently under an active rate limit is empty, or `deadline`
    /// elapses. Returns whether it finished before the deadline.
    pub async fn flush(&self, deadline: Duration) -> bool {
        self.scheduler.flush(deadline).await
    }

    /// Stops the scheduler and disables further captures. At most one call
    /// does the actual work; later calls return immediately.
    pub async fn close(&self, deadline: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        self.scheduler.stop(deadline).await
    }

    pub fn buffer_len(&self, category: DataCategory) -> usize {
        self.buffers
            .get(&category)
            .map(|buffer| buffer.len())
            .unwrap_or(0)
    }
}
