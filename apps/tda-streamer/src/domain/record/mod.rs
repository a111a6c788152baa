//! Canonical Records
//!
//! The typed, domain-tagged value map every decoded payload converges to.
//! A record built from a name-keyed payload and one built from the
//! equivalent positional payload compare equal.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use super::fields::{
    AccountField, Domain, Field, FieldLookup, FieldValue, MalformedFieldError, coerce,
    resolve_by_name,
};

// =============================================================================
// Canonical Record
// =============================================================================

/// Decoded values of one event, keyed by field.
///
/// Absent fields are simply missing; nothing is defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    domain: Domain,
    values: BTreeMap<Field, FieldValue>,
}

impl CanonicalRecord {
    /// Create an empty record for a domain.
    #[must_use]
    pub const fn new(domain: Domain) -> Self {
        Self {
            domain,
            values: BTreeMap::new(),
        }
    }

    /// Build a record from a name-keyed payload.
    ///
    /// Unknown keys and `null` values are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFieldError`] when a known field cannot be coerced.
    pub fn from_named(
        domain: Domain,
        payload: &Map<String, Value>,
    ) -> Result<Self, MalformedFieldError> {
        let mut record = Self::new(domain);
        for (key, raw) in payload {
            if raw.is_null() {
                continue;
            }
            if let FieldLookup::Known(def) = resolve_by_name(domain, key) {
                record.values.insert(def.field, coerce(&def, raw)?);
            }
        }
        Ok(record)
    }

    /// The record's domain.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// Value of a field, if present.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    /// Whether a field is present.
    #[must_use]
    pub fn contains(&self, field: Field) -> bool {
        self.values.contains_key(&field)
    }

    /// Set a field, returning the previous value.
    ///
    /// Fields of another domain are ignored and `None` is returned.
    pub fn insert(&mut self, field: Field, value: FieldValue) -> Option<FieldValue> {
        if field.domain() != self.domain {
            return None;
        }
        self.values.insert(field, value)
    }

    /// Iterate over present fields in taxonomy order.
    pub fn iter(&self) -> impl Iterator<Item = (&Field, &FieldValue)> {
        self.values.iter()
    }

    /// Number of present fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no fields are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The instrument symbol or subscription key.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.get(self.domain.key_field()).and_then(FieldValue::as_text)
    }

    /// Order status of an account activity record.
    #[must_use]
    pub fn order_status(&self) -> Option<OrderStatus> {
        self.get(Field::Account(AccountField::Status))
            .and_then(FieldValue::as_text)
            .and_then(OrderStatus::from_label)
    }

    /// Render as a name-keyed JSON object.
    #[must_use]
    pub fn to_named_json(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(field, value)| (field.name().to_string(), value.to_json()))
            .collect();
        Value::Object(map)
    }
}

impl fmt::Display for CanonicalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.domain, self.to_named_json())
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Order lifecycle status derived from account activity messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    /// Order entry request accepted for submission.
    Queued,
    /// Order filled.
    Filled,
    /// Order canceled (`UROUT`).
    Canceled,
    /// Order rejected.
    Rejected,
}

impl OrderStatus {
    /// Map an account activity message type. Unrecognised types yield `None`.
    #[must_use]
    pub fn from_message_type(message_type: &str) -> Option<Self> {
        match message_type.trim().to_ascii_uppercase().as_str() {
            "ORDERENTRYREQUEST" => Some(Self::Queued),
            "ORDERFILL" => Some(Self::Filled),
            "UROUT" => Some(Self::Canceled),
            "ORDERREJECTION" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Label stored in the record.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        [Self::Queued, Self::Filled, Self::Canceled, Self::Rejected]
            .into_iter()
            .find(|s| s.as_str() == label)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
