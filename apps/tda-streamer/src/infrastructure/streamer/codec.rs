//! Streamer Frame Codec
//!
//! Classifies inbound frames and decodes positional data payloads into
//! canonical records.
//!
//! # Classification
//!
//! A frame is a JSON object whose first recognised top-level key decides
//! its kind, checked in priority order `notify`, `response`, `data`.
//! Anything else (including invalid JSON) is [`Frame::Unknown`] and is
//! dropped; the streamer is known to add message kinds without notice.
//!
//! # Account Activity
//!
//! Account activity entries carry a message type and an XML document.
//! Only order lifecycle messages are kept; the type is mapped to an
//! [`OrderStatus`] and the order id is pulled from `Order/OrderKey` of the
//! document.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::messages::{ControlResponse, DataMessage};
use crate::domain::fields::{
    AccountField, Domain, Field, FieldValue, MalformedFieldError, coerce, resolve_by_index,
};
use crate::domain::record::{CanonicalRecord, OrderStatus};
use crate::infrastructure::metrics;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML decoding failed.
    #[error("XML codec error: {0}")]
    Xml(#[from] quick_xml::Error),
}

// =============================================================================
// Frames
// =============================================================================

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keep-alive notification.
    Heartbeat,
    /// Control acknowledgements.
    Response(Vec<ControlResponse>),
    /// Service payloads.
    Data(Vec<DataMessage>),
    /// Anything else.
    Unknown,
}

impl Frame {
    /// Classify a raw text frame. Never fails.
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        let object = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return Self::Unknown,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring undecodable frame");
                return Self::Unknown;
            }
        };

        if object.contains_key("notify") {
            Self::Heartbeat
        } else if let Some(responses) = object.get("response") {
            Self::Response(entries(responses))
        } else if let Some(data) = object.get("data") {
            Self::Data(entries(data))
        } else {
            Self::Unknown
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Response(_) => "response",
            Self::Data(_) => "data",
            Self::Unknown => "unknown",
        }
    }
}

/// Deserialize each array element independently, skipping the ones that
/// do not fit.
fn entries<T: DeserializeOwned>(value: &Value) -> Vec<T> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Data Decoding
// =============================================================================

/// Decode a data message, resolving its domain from the service tag.
///
/// Returns `None` for services outside the taxonomy.
#[must_use]
pub fn decode_message(message: &DataMessage) -> Option<(Domain, Vec<CanonicalRecord>)> {
    let domain = message.domain()?;
    Some((domain, decode_data(domain, &message.content)))
}

/// Decode a positional payload into canonical records.
///
/// `content` is an array of entries or a single entry. Entries with a
/// malformed field are dropped; the rest of the payload still decodes.
#[must_use]
pub fn decode_data(domain: Domain, content: &Value) -> Vec<CanonicalRecord> {
    let entries: Vec<&Map<String, Value>> = match content {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(entry) => vec![entry],
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| match decode_entry(domain, entry) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(domain = %domain, error = %e, "Dropping malformed record");
                metrics::record_malformed_record(domain);
                None
            }
        })
        .collect()
}

fn decode_entry(
    domain: Domain,
    entry: &Map<String, Value>,
) -> Result<Option<CanonicalRecord>, MalformedFieldError> {
    let mut record = CanonicalRecord::new(domain);
    for (key, raw) in entry {
        if raw.is_null() {
            continue;
        }
        let def = if key == "key" {
            Some(domain.key_field().definition())
        } else {
            resolve_by_index(domain, key).definition()
        };
        if let Some(def) = def {
            record.insert(def.field, coerce(&def, raw)?);
        }
    }

    if domain == Domain::AccountActivity {
        return Ok(account_activity(record));
    }
    Ok(Some(record))
}

fn account_activity(mut record: CanonicalRecord) -> Option<CanonicalRecord> {
    let message_type = record
        .get(Field::Account(AccountField::MessageType))
        .and_then(FieldValue::as_text)
        .unwrap_or_default();
    let Some(status) = OrderStatus::from_message_type(message_type) else {
        tracing::trace!(message_type, "Filtering account activity message");
        return None;
    };
    record.insert(
        Field::Account(AccountField::Status),
        FieldValue::Text(status.as_str().to_string()),
    );

    let order_id = record
        .get(Field::Account(AccountField::MessageData))
        .and_then(FieldValue::as_text)
        .map(order_key);
    match order_id {
        Some(Ok(Some(id))) => {
            record.insert(Field::Account(AccountField::OrderId), FieldValue::Text(id));
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Account activity message data is not valid XML");
        }
        Some(Ok(None)) | None => {}
    }
    Some(record)
}

/// Text of the `Order/OrderKey` element directly below the document root.
/// Namespace prefixes are ignored.
///
/// # Errors
///
/// Returns [`CodecError::Xml`] when the document is malformed.
pub fn order_key(xml: &str) -> Result<Option<String>, CodecError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<Vec<u8>> = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(element) => path.push(element.local_name().as_ref().to_vec()),
            Event::End(_) => {
                path.pop();
            }
            Event::Text(text) if is_order_key(&path) => {
                let text = text.unescape()?;
                return Ok(Some(text.trim().to_string()));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn is_order_key(path: &[Vec<u8>]) -> bool {
    path.len() == 3 && path[1] == b"Order" && path[2] == b"OrderKey"
}

// =============================================================================
// Tests
// =============================================================================
