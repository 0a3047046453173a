//! Envelope framing: turns assembled item headers/payloads into the bit-exact
//! wire format Relay and sentry-rust agree on, one JSON header line followed
//! by repeating `item_header \n payload \n` pairs.

use serde::Serialize;

use crate::item::ItemHeader;

/// The envelope's shared header line.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EnvelopeHeader {
    pub sent_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
}

impl EnvelopeHeader {
    pub fn new(sent_at: chrono::DateTime<chrono::Utc>) -> Self {
        EnvelopeHeader {
            sent_at: sent_at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            event_id: None,
            dsn: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }
}

/// Serializes a header and a sequence of (header, payload) items into the
/// envelope wire format. This never fails: callers are expected to have
/// already dropped any item whose `to_envelope_item` call failed, accounting
/// it with `before_send_rejected` before reaching this point.
pub fn assemble(header: &EnvelopeHeader, items: &[(ItemHeader, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();

    serde_json::to_writer(&mut out, header).expect("envelope header is always serializable");
    out.push(b'\n');

    for (item_header, payload) in items {
        serde_json::to_writer(&mut out, item_header)
            .expect("item header is always serializable");
        out.push(b'\n');
        out.extend_from_slice(payload);
        out.push(b'\n');
    }

    out
}

/// Parses an envelope back into its header and items. Used by tests that
/// verify round-trip framing (scenario S5) and by any consumer that needs to
/// inspect what was about to be sent.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedEnvelope {
    pub header: serde_json::Value,
    pub items: Vec<(ItemHeader, Vec<u8>)>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeParseError {
    #[error("envelope is missing its header line")]
    MissingHeader,
    #[error("malformed header: {0}")]
    BadHeader(serde_json::Error),
    #[error("malformed item header: {0}")]
    BadItemHeader(serde_json::Error),
    #[error("item payload shorter than declared length")]
    TruncatedPayload,
}

/// Reads envelopes off a raw byte cursor rather than pre-splitting the whole
/// buffer on `\n`: a payload (e.g. profile or replay bytes) may itself
/// contain a `0x0A` byte, and `length` in the item header is authoritative,
/// not the next newline.
pub fn parse(bytes: &[u8]) -> Result<ParsedEnvelope, EnvelopeParseError> {
    let header_end = find_newline(bytes).ok_or(EnvelopeParseError::MissingHeader)?;
    let header: serde_json::Value =
        serde_json::from_slice(&bytes[..header_end]).map_err(EnvelopeParseError::BadHeader)?;
    let mut cursor = &bytes[header_end + 1..];

    let mut items = Vec::new();
    while !cursor.is_empty() {
        let header_end = find_newline(cursor).ok_or(EnvelopeParseError::TruncatedPayload)?;
        let item_header: ItemHeader = serde_json::from_slice(&cursor[..header_end])
            .map_err(EnvelopeParseError::BadItemHeader)?;
        cursor = &cursor[header_end + 1..];

        if cursor.len() < item_header.length {
            return Err(EnvelopeParseError::TruncatedPayload);
        }
        let payload = cursor[..item_header.length].to_vec();
        cursor = &cursor[item_header.length..];

        // The payload is followed by a newline in every envelope `assemble`
        // produces, but the last item's is tolerated as optional.
        if cursor.first() == Some(&b'\n') {
            cursor = &cursor[1..];
        }

        items.push((item_header, payload));
    }

    Ok(ParsedEnvelope { header, items })
}

fn find_newline(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|b| *b == b'\n')
}
