//! Property-based tests for the pure core components
//!
//! These tests use proptest to verify critical laws:
//! - Money parse/format round-trips through the wire format
//! - Currency conversion inverts within 2-dp rounding
//! - Cursors survive encode/decode and reject mutation
//! - Generated ids are strictly monotonic

use chrono::DateTime;
use ledger_core::cursor::{self, TransactionCursor};
use ledger_core::idgen::IdGenerator;
use ledger_core::money::MoneyValue;
use ledger_core::rates::RateTable;
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Strategy for positive amounts with two fractional digits
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..1_000_000_00u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

/// Strategy for a currency present in the stub snapshot
fn currency_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("USD"),
        Just("EUR"),
        Just("GBP"),
        Just("TRY"),
        Just("INR"),
        Just("JPY"),
    ]
}

/// Strategy for optional unix timestamps inside a plausible range
fn timestamp_strategy() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![Just(None), (1_600_000_000i64..1_900_000_000i64).prop_map(Some)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: the fixed-2 wire format parses back to the same value
    #[test]
    fn prop_money_format_round_trips(cents in amount_strategy()) {
        let value = MoneyValue::new(cents);
        let wire = value.to_fixed_string();
        let parsed = MoneyValue::parse(&wire).unwrap();
        prop_assert_eq!(parsed, value);
    }

    /// Property: parse accepts exactly the decimal-literal grammar
    #[test]
    fn prop_money_parse_never_panics(input in "\\PC*") {
        // any unicode input either parses or is rejected, never panics
        let _ = MoneyValue::parse(&input);
    }

    /// Property: converting there and back loses at most a rounding step
    #[test]
    fn prop_convert_round_trips(
        cents in amount_strategy(),
        from in currency_strategy(),
        to in currency_strategy(),
    ) {
        prop_assume!(from != to);
        let table = RateTable::stub();
        let value = MoneyValue::new(cents);

        let there = table.convert(value, from, to).unwrap();
        let back = table.convert(there, to, from).unwrap();

        let diff = (back.as_decimal() - value.as_decimal()).abs();
        prop_assert!(diff < Decimal::new(1, 2), "diff {} for {} {}->{}", diff, value, from, to);
    }

    /// Property: conversion of a positive amount is positive
    #[test]
    fn prop_convert_preserves_sign(
        cents in amount_strategy(),
        from in currency_strategy(),
        to in currency_strategy(),
    ) {
        prop_assume!(from != to);
        let table = RateTable::stub();
        let converted = table.convert(MoneyValue::new(cents), from, to).unwrap();
        prop_assert!(converted.is_positive());
    }

    /// Property: cursors round-trip through the sealed representation
    #[test]
    fn prop_cursor_round_trips(
        user_id in "[a-z0-9]{1,24}",
        min_secs in timestamp_strategy(),
        max_secs in timestamp_strategy(),
        before_id in 1i64..i64::MAX / 2,
    ) {
        let record = TransactionCursor {
            user_id,
            min_ts: min_secs.and_then(|s| DateTime::from_timestamp(s, 0)),
            max_ts: max_secs.and_then(|s| DateTime::from_timestamp(s, 0)),
            before_id,
        };
        let sealed = cursor::encode(&record).unwrap();
        prop_assert_eq!(cursor::decode(&sealed), Some(record));
    }

    /// Property: flipping any byte of a sealed cursor makes it unreadable
    #[test]
    fn prop_mutated_cursor_is_rejected(
        user_id in "[a-z0-9]{1,24}",
        before_id in 1i64..i64::MAX / 2,
        position in 0usize..32,
    ) {
        let record = TransactionCursor {
            user_id,
            min_ts: None,
            max_ts: None,
            before_id,
        };
        let sealed = cursor::encode(&record).unwrap();

        let mut chars: Vec<char> = sealed.chars().collect();
        let position = position % chars.len();
        chars[position] = if chars[position] == 'A' { 'B' } else { 'A' };
        let mutated: String = chars.into_iter().collect();
        prop_assume!(mutated != sealed);

        prop_assert_eq!(cursor::decode(&mutated), None);
    }

    /// Property: ids from one generator are strictly increasing
    #[test]
    fn prop_ids_strictly_monotonic(count in 2usize..512) {
        let ids = IdGenerator::new();
        let mut previous = 0i64;
        for _ in 0..count {
            let id = ids.generate();
            prop_assert!(id > previous);
            previous = id;
        }
    }
}
