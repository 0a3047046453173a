use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::category::DataCategory;
use crate::dsn::Dsn;

/// The header that precedes an item's payload on the wire. `length` is
/// authoritative; readers must not rely on payload framing beyond it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemHeader {
    #[serde(rename = "type")]
    pub ty: String,
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl ItemHeader {
    pub fn new(ty: impl Into<String>, length: usize) -> Self {
        ItemHeader {
            ty: ty.into(),
            length,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("item was rejected before it could be serialized")]
    Rejected,
    #[error("failed to serialize item payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A telemetry item's one capability: turning itself into a framed envelope
/// item. Every concrete telemetry type (error, span, log, ...) that the
/// event-construction and tracing pipelines produce implements this trait;
/// the delivery core only ever invokes it.
pub trait TelemetryItem: Send + Sync {
    /// The data category this item belongs to. Drives buffer selection,
    /// priority, and rate-limit scoping.
    fn category(&self) -> DataCategory;

    /// Serializes this item into its wire item header and payload.
    ///
    /// `dsn` is made available because some item types embed DSN-derived
    /// context (e.g. replay recording URLs); most implementations ignore it.
    fn to_envelope_item(&self, dsn: &Dsn) -> Result<(ItemHeader, Vec<u8>), ItemError>;
}

/// A boxed item as stored in a [`crate::buffer::CategoryBuffer`].
pub type BoxedItem = Box<dyn TelemetryItem>;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A trivial JSON-payload item used across the crate's unit and
    /// integration tests.
    pub struct JsonItem {
        pub category: DataCategory,
        pub ty: &'static str,
        pub payload: serde_json::Value,
        pub fail: bool,
    }

    impl JsonItem {
        pub fn new(category: DataCategory, ty: &'static str, payload: serde_json::Value) -> Self {
            JsonItem {
                category,
                ty,
                payload,
                fail: false,
            }
        }

        pub fn failing(category: DataCategory, ty: &'static str) -> Self {
            JsonItem {
                category,
                ty,
                payload: serde_json::Value::Null,
                fail: true,
            }
        }
    }

    impl TelemetryItem for JsonItem {
        fn category(&self) -> DataCategory {
            self.category
        }

        fn to_envelope_item(&self, _dsn: &Dsn) -> Result<(ItemHeader, Vec<u8>), ItemError> {
            if self.fail {
                return Err(ItemError::Rejected);
            }
            let bytes = serde_json::to_vec(&self.payload)?;
            Ok((ItemHeader::new(self.ty, bytes.len()), bytes))
        }
    }
}
