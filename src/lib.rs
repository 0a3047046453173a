//! Telemetry delivery core: buffers telemetry items by category, schedules
//! their delivery by weighted priority, tracks server-imposed rate limits,
//! and reports what it had to drop.
//!
//! The only type most callers need is [`Client`]: construct one from a
//! [`DeliveryConfig`], call [`Client::capture`] for every outgoing item, and
//! [`Client::close`] at shutdown.

pub mod buffer;
pub mod category;
pub mod client_report;
pub mod config;
pub mod dsn;
pub mod envelope;
pub mod facade;
pub mod item;
pub mod rate_limit;
pub mod scheduler;
pub mod transport;

pub use buffer::{CategoryBuffer, Offer, OverflowPolicy};
pub use category::{DataCategory, Priority};
pub use client_report::{ClientReportAggregator, DropReason};
pub use config::{ConfigError, ConfigErrorKind, ConfigOverrides, DeliveryConfig, DeliveryConfigBuilder};
pub use dsn::{Dsn, DsnError};
pub use envelope::{assemble, parse, EnvelopeHeader, EnvelopeParseError, ParsedEnvelope};
pub use facade::{Client, ClientError};
pub use item::{ItemError, ItemHeader, TelemetryItem};
pub use rate_limit::RateLimitRegistry;
pub use scheduler::{Scheduler, SchedulerState};
pub use transport::{HttpTransport, SendOutcome, Transport, TransportError};
