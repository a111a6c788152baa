//! Typed field values and the coercion rules that produce them.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use super::{Field, FieldDef, ValueKind};

/// A decoded, typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Exact decimal price.
    Price(Decimal),
    /// Point in time, millisecond precision.
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer value.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Float content, if this is a float value.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Decimal content, if this is a price.
    #[must_use]
    pub const fn as_price(&self) -> Option<Decimal> {
        match self {
            Self::Price(v) => Some(*v),
            _ => None,
        }
    }

    /// Timestamp content, if this is a timestamp.
    #[must_use]
    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Epoch milliseconds, if this is a timestamp.
    #[must_use]
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.as_timestamp().map(|ts| ts.timestamp_millis())
    }

    /// JSON rendering, using the wire representation for timestamps.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Integer(v) => Value::from(*v),
            Self::Float(v) => Value::from(*v),
            Self::Price(v) => Value::String(v.to_string()),
            Self::Timestamp(ts) => Value::from(ts.timestamp_millis()),
        }
    }
}

/// A raw value could not be converted to its field's kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed value for {field}: {raw}")]
pub struct MalformedFieldError {
    /// The field being decoded.
    pub field: Field,
    /// The offending raw value, rendered as JSON.
    pub raw: String,
}

/// Convert a raw JSON value using the field's value kind.
///
/// Numeric kinds accept both JSON numbers and numeric strings, since the
/// streaming payloads are not consistent about quoting.
///
/// # Errors
///
/// Returns [`MalformedFieldError`] when the value cannot be represented in
/// the field's kind.
pub fn coerce(def: &FieldDef, raw: &Value) -> Result<FieldValue, MalformedFieldError> {
    let malformed = || MalformedFieldError {
        field: def.field,
        raw: raw.to_string(),
    };

    match def.kind {
        ValueKind::Text => match raw {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            _ => Err(malformed()),
        },
        ValueKind::Integer => integer(raw).map(FieldValue::Integer).ok_or_else(malformed),
        ValueKind::Float => numeric_text(raw)
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map(FieldValue::Float)
            .ok_or_else(malformed),
        ValueKind::Price => numeric_text(raw)
            .and_then(|s| {
                Decimal::from_str(&s)
                    .or_else(|_| Decimal::from_scientific(&s))
                    .ok()
            })
            .map(FieldValue::Price)
            .ok_or_else(malformed),
        ValueKind::TimestampMillis => integer(raw)
            .and_then(DateTime::from_timestamp_millis)
            .map(FieldValue::Timestamp)
            .ok_or_else(malformed),
    }
}

fn numeric_text(raw: &Value) -> Option<String> {
    match raw {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integer(raw: &Value) -> Option<i64> {
    if let Value::Number(n) = raw
        && let Some(v) = n.as_i64()
    {
        return Some(v);
    }
    let text = numeric_text(raw)?;
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    let float = text.parse::<f64>().ok()?;
    // Integral floats such as `100.0` are accepted; fractions are not.
    (float.is_finite() && float.fract() == 0.0 && float.abs() < 9.0e15).then_some(float as i64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;
    use crate::domain::fields::{ChartField, Domain, QuoteField, resolve_by_name};

    fn def(field: Field) -> FieldDef {
        field.definition()
    }

    #[test]
    fn price_accepts_numbers_and_strings() {
        let open = def(Field::Chart(ChartField::Open));
        let expected = FieldValue::Price(Decimal::new(100, 1));
        assert_eq!(coerce(&open, &json!("10.0")).unwrap(), expected);
        assert_eq!(coerce(&open, &json!(10.0)).unwrap(), expected);
        assert_eq!(coerce(&open, &json!(10)).unwrap(), expected);
    }

    #[test]
    fn price_accepts_scientific_notation() {
        let bid = def(Field::Quote(QuoteField::BidPrice));
        let value = coerce(&bid, &json!("1e-2")).unwrap();
        assert_eq!(value.as_price(), Some(Decimal::new(1, 2)));
    }

    #[test_case(json!(100) ; "number")]
    #[test_case(json!("100") ; "string")]
    #[test_case(json!(100.0) ; "integral float")]
    fn integer_accepts(raw: Value) {
        let volume = def(Field::Chart(ChartField::Volume));
        assert_eq!(coerce(&volume, &raw).unwrap(), FieldValue::Integer(100));
    }

    #[test_case(json!(1.5) ; "fraction")]
    #[test_case(json!("abc") ; "text")]
    #[test_case(json!(true) ; "bool")]
    #[test_case(json!([1]) ; "array")]
    #[test_case(json!("") ; "empty")]
    fn integer_rejects(raw: Value) {
        let volume = def(Field::Chart(ChartField::Volume));
        let err = coerce(&volume, &raw).unwrap_err();
        assert_eq!(err.field, Field::Chart(ChartField::Volume));
        assert_eq!(err.raw, raw.to_string());
    }

    #[test]
    fn timestamp_from_millis() {
        let datetime = def(Field::Chart(ChartField::Datetime));
        let value = coerce(&datetime, &json!(1_700_000_000_000_i64)).unwrap();
        assert_eq!(value.timestamp_millis(), Some(1_700_000_000_000));
        assert_eq!(value.to_json(), json!(1_700_000_000_000_i64));
    }

    #[test]
    fn float_rejects_non_finite() {
        let vol = resolve_by_name(Domain::Quote, "volatility")
            .definition()
            .unwrap();
        assert!(coerce(&vol, &json!("NaN")).is_err());
        assert_eq!(coerce(&vol, &json!(0.25)).unwrap(), FieldValue::Float(0.25));
    }

    #[test]
    fn text_accepts_numbers() {
        let symbol = def(Field::Quote(QuoteField::Symbol));
        assert_eq!(
            coerce(&symbol, &json!(123)).unwrap(),
            FieldValue::Text("123".to_string())
        );
        assert!(coerce(&symbol, &json!({"a": 1})).is_err());
    }
}
