//! Property tests for the bulk codecs.

use bytes::Bytes;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use oxidized_kv::{
    Boolean, Bulk, ByteString, Date, DateTime, DecodeError, Float, Integer, Json, Text, Tuple, TzDateTime,
};
use proptest::prelude::*;

fn date() -> impl Strategy<Value = NaiveDate> {
    (0i32..=9999, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn naive() -> impl Strategy<Value = NaiveDateTime> {
    (date(), 0u32..24, 0u32..60, 0u32..60, 0u32..1_000_000_000).prop_map(|(date, h, m, s, n)| {
        date.and_time(NaiveTime::from_hms_nano_opt(h, m, s, n).unwrap())
    })
}

fn aware() -> impl Strategy<Value = chrono::DateTime<FixedOffset>> {
    (naive(), -1439i32..=1439).prop_map(|(local, minutes)| {
        FixedOffset::east_opt(minutes * 60)
            .unwrap()
            .from_local_datetime(&local)
            .single()
            .unwrap()
    })
}

fn round_trip<C: Bulk>(codec: &C, value: &C::Value) -> C::Value {
    let bulk = codec.encode(value).unwrap();
    codec.decode(&bulk).unwrap()
}

proptest! {
    #[test]
    fn should_round_trip_byte_strings(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let value = Bytes::from(data);
        prop_assert_eq!(round_trip(&ByteString, &value), value);
    }

    #[test]
    fn should_round_trip_text(value in any::<String>()) {
        prop_assert_eq!(round_trip(&Text, &value), value);
    }

    #[test]
    fn should_round_trip_integers(value in any::<i64>()) {
        prop_assert_eq!(round_trip(&Integer, &value), value);
    }

    #[test]
    fn should_round_trip_booleans(value in any::<bool>()) {
        prop_assert_eq!(round_trip(&Boolean, &value), value);
    }

    #[test]
    fn should_round_trip_finite_floats(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        prop_assert_eq!(round_trip(&Float, &value).to_bits(), value.to_bits());
    }

    #[test]
    fn should_round_trip_dates(value in date()) {
        prop_assert_eq!(round_trip(&Date, &value), value);
    }

    #[test]
    fn should_round_trip_naive_date_times(value in naive()) {
        prop_assert_eq!(round_trip(&DateTime, &value), value);
    }

    #[test]
    fn should_keep_offset_of_aware_date_times(value in aware()) {
        let decoded = round_trip(&TzDateTime, &value);
        prop_assert_eq!(decoded, value);
        prop_assert_eq!(decoded.offset(), value.offset());
    }

    #[test]
    fn should_round_trip_tuples(a in any::<String>(), b in any::<i64>(), c in date()) {
        let codec = Tuple::new((Text, Integer, Date));
        let value = (a, b, c);
        prop_assert_eq!(round_trip(&codec, &value), value);
    }

    #[test]
    fn should_encode_tuples_deterministically(a in any::<String>(), b in any::<i64>()) {
        let codec = Tuple::new((Text, Integer));
        let value = (a, b);
        prop_assert_eq!(codec.encode(&value).unwrap(), codec.encode(&value).unwrap());
    }

    #[test]
    fn should_keep_distinct_tuples_distinct(
        a in proptest::collection::vec(any::<u8>(), 0..8),
        b in proptest::collection::vec(any::<u8>(), 0..8),
        c in proptest::collection::vec(any::<u8>(), 0..8),
        d in proptest::collection::vec(any::<u8>(), 0..8),
    ) {
        let codec = Tuple::new((ByteString, ByteString));
        let left = (Bytes::from(a), Bytes::from(b));
        let right = (Bytes::from(c), Bytes::from(d));
        prop_assume!(left != right);
        prop_assert_ne!(codec.encode(&left).unwrap(), codec.encode(&right).unwrap());
    }

    #[test]
    fn should_round_trip_json_maps(entries in proptest::collection::btree_map(any::<String>(), any::<i32>(), 0..8)) {
        let codec = Json::<std::collections::BTreeMap<String, i32>>::new();
        prop_assert_eq!(round_trip(&codec, &entries), entries);
    }
}

#[test]
fn sibling_temporal_codecs_report_type_mismatch() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let bulk = Date.encode(&date).unwrap();
    let err = DateTime.decode(&bulk).unwrap_err();
    assert!(
        matches!(err, DecodeError::TypeMismatch { codec: "datetime", found: "date", .. }),
        "{err}"
    );
}

#[test]
fn out_of_range_year_is_not_encoded() {
    let date = NaiveDate::from_ymd_opt(10_000, 1, 1).unwrap();
    assert!(Date.encode(&date).is_err());
}
