//! Field Taxonomy Property Tests
//!
//! Name and index resolution agree with each other, and positional and
//! name-keyed payloads decode to the same canonical record.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::{Map, Value, json};

use tda_streamer::infrastructure::streamer::decode_data;
use tda_streamer::{
    CanonicalRecord, ChartField, Domain, Field, FieldLookup, FieldValue, resolve_by_index,
    resolve_by_name,
};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("payloads are objects"),
    }
}

#[test]
fn test_every_positional_field_resolves_both_ways() {
    for domain in Domain::ALL {
        for field in domain.positional_fields() {
            let def = field.definition();
            let index = def.index.unwrap().to_string();

            assert_eq!(resolve_by_index(domain, &index).field(), Some(field));
            assert_eq!(
                resolve_by_index(domain, &format!(" {index} ")).field(),
                Some(field)
            );
            assert_eq!(resolve_by_name(domain, def.name).field(), Some(field));
            assert_eq!(
                resolve_by_name(domain, &def.name.to_ascii_uppercase()).field(),
                Some(field)
            );
        }
    }
}

#[test]
fn test_default_stream_fields_are_subscribable() {
    for domain in Domain::ALL {
        let fields = domain.default_stream_fields();
        assert!(!fields.is_empty(), "{domain} has no default fields");
        assert!(fields.iter().all(|f| f.domain() == domain));
        assert!(fields.iter().all(|f| f.definition().index.is_some()));
    }
}

proptest! {
    #[test]
    fn prop_index_lookup_never_panics(domain in 0..5usize, raw in ".{0,8}") {
        let domain = Domain::ALL[domain];
        match resolve_by_index(domain, &raw) {
            FieldLookup::Known(def) => {
                prop_assert_eq!(def.field.domain(), domain);
                prop_assert_eq!(def.index, raw.trim().parse::<u16>().ok());
            }
            FieldLookup::Unsupported => {}
        }
    }

    #[test]
    fn prop_unknown_indices_are_unsupported(index in 200u16..) {
        for domain in Domain::ALL {
            prop_assert!(resolve_by_index(domain, &index.to_string()).is_unsupported());
        }
    }

    #[test]
    fn prop_positional_and_named_bars_agree(
        symbol in "[A-Z]{1,5}",
        open_cents in 0i64..100_000_000,
        volume in 0i64..1_000_000_000,
        sequence in 0i64..100_000,
        datetime in 946_684_800_000i64..4_102_444_800_000,
    ) {
        let open = format!("{}.{:02}", open_cents / 100, open_cents % 100);

        let positional = json!({
            "key": symbol,
            "1": open,
            "5": volume,
            "6": sequence,
            "7": datetime,
        });
        let named = object(json!({
            "symbol": symbol,
            "open": open,
            "volume": volume,
            "sequence": sequence,
            "datetime": datetime,
        }));

        let decoded = decode_data(Domain::ChartBar, &positional);
        let expected = CanonicalRecord::from_named(Domain::ChartBar, &named).unwrap();

        prop_assert_eq!(decoded.len(), 1);
        prop_assert_eq!(&decoded[0], &expected);
        prop_assert_eq!(
            decoded[0].get(Field::Chart(ChartField::Open)),
            Some(&FieldValue::Price(Decimal::new(open_cents, 2)))
        );
        prop_assert_eq!(
            decoded[0]
                .get(Field::Chart(ChartField::Datetime))
                .and_then(FieldValue::timestamp_millis),
            Some(datetime)
        );
    }

    #[test]
    fn prop_one_malformed_entry_spares_the_rest(good in 1usize..6, bad_at in 0usize..6) {
        let mut entries: Vec<Value> = (0..good)
            .map(|i| json!({"key": format!("S{i}"), "5": i}))
            .collect();
        let bad_at = bad_at.min(entries.len());
        entries.insert(bad_at, json!({"key": "BAD", "5": "lots"}));

        let decoded = decode_data(Domain::ChartBar, &Value::Array(entries));

        prop_assert_eq!(decoded.len(), good);
        prop_assert!(decoded.iter().all(|r| r.symbol() != Some("BAD")));
    }
}
