//! Wire normalisation for payload leaves.
//!
//! Timestamps always render as ISO-8601; UTC (and naive, assumed UTC) values
//! end in a literal `Z`, explicit non-UTC offsets are kept as-is. Object ids
//! render as 24 hex digits and decimals as floats.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Render a UTC instant as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A domain timestamp in any of the shapes callers hand us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    /// No zone information; treated as UTC.
    Naive(NaiveDateTime),
    Utc(DateTime<Utc>),
    Offset(DateTime<FixedOffset>),
}

impl Timestamp {
    pub fn now() -> Self {
        Self::Utc(Utc::now())
    }

    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Naive(naive) => format_utc(&naive.and_utc()),
            Self::Utc(ts) => format_utc(ts),
            Self::Offset(ts) if ts.offset().local_minus_utc() == 0 => {
                format_utc(&ts.with_timezone(&Utc))
            }
            Self::Offset(ts) => ts.to_rfc3339_opts(SecondsFormat::Micros, false),
        }
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(value: NaiveDateTime) -> Self {
        Self::Naive(value)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Utc(value)
    }
}

impl From<DateTime<FixedOffset>> for Timestamp {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::Offset(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire_string())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire_string())
    }
}

/// Error returned when a string is not a canonical object id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object id: {0:?}")]
pub struct InvalidObjectId(pub String);

static OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// 12-byte opaque identifier. Canonical form is 24 lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a fresh id: 4-byte big-endian seconds, 5 random bytes, 3-byte counter.
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let secs = Utc::now().timestamp() as u32;
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        rand::rng().fill(&mut bytes[4..9]);
        let count = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // hex::decode accepts uppercase; the canonical form does not
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(InvalidObjectId(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidObjectId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// `#[serde(serialize_with = "decimal_as_float")]` for `Decimal` fields.
pub fn decimal_as_float<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    match value.to_f64() {
        Some(float) => serializer.serialize_f64(float),
        None => serializer.serialize_str(&value.to_string()),
    }
}

/// Normalise any payload into a JSON value.
///
/// Serialisation failures (non-string map keys, failing custom impls) degrade
/// to the value's `Debug` text so a single bad field cannot abort a broadcast.
pub fn normalize<T>(value: &T) -> Value
where
    T: Serialize + fmt::Debug + ?Sized,
{
    match serde_json::to_value(value) {
        Ok(normalized) => normalized,
        Err(err) => {
            tracing::debug!(error = %err, "Payload not serializable, stringifying");
            Value::String(format!("{value:?}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::{HashMap, HashSet};

    fn naive() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(14, 5, 7, 250_000)
            .unwrap()
    }

    #[test]
    fn test_naive_timestamp_renders_with_z() {
        assert_eq!(
            Timestamp::from(naive()).to_wire_string(),
            "2024-03-09T14:05:07.250000Z"
        );
    }

    #[test]
    fn test_utc_timestamp_renders_with_z() {
        let ts = Utc.from_utc_datetime(&naive());
        let rendered = Timestamp::from(ts).to_wire_string();
        assert!(rendered.ends_with('Z'));
        assert!(!rendered.contains("+00:00"));
    }

    #[test]
    fn test_zero_offset_collapses_to_z() {
        let ts = FixedOffset::east_opt(0).unwrap().from_utc_datetime(&naive());
        assert_eq!(Timestamp::from(ts).to_wire_string(), "2024-03-09T14:05:07.250000Z");
    }

    #[test]
    fn test_non_utc_offset_preserved() {
        let ts = FixedOffset::east_opt(2 * 3600).unwrap().from_utc_datetime(&naive());
        assert_eq!(
            Timestamp::from(ts).to_wire_string(),
            "2024-03-09T16:05:07.250000+02:00"
        );
    }

    #[test]
    fn test_object_id_parse_and_display() {
        let id: ObjectId = "65f1c0ffee0123456789abcd".parse().unwrap();
        assert_eq!(id.to_string(), "65f1c0ffee0123456789abcd");
        assert_eq!(normalize(&id), Value::String("65f1c0ffee0123456789abcd".into()));
    }

    #[test]
    fn test_object_id_rejects_malformed() {
        for bad in ["", "lobby", "65f1c0ffee0123456789abc", "65F1C0FFEE0123456789ABCD", "zzf1c0ffee0123456789abcd"] {
            assert!(bad.parse::<ObjectId>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_generated_object_ids_are_distinct() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_hex().parse::<ObjectId>().unwrap(), a);
    }

    #[test]
    fn test_round_trip_through_json() {
        #[derive(Debug, Serialize)]
        struct Row {
            naive: Timestamp,
            aware: Timestamp,
            #[serde(serialize_with = "decimal_as_float")]
            price: Decimal,
        }

        let row = Row {
            naive: naive().into(),
            aware: Utc.from_utc_datetime(&naive()).into(),
            price: Decimal::new(1999, 2),
        };
        let text = serde_json::to_string(&normalize(&row)).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();

        assert!(parsed["naive"].as_str().unwrap().ends_with('Z'));
        assert!(parsed["aware"].as_str().unwrap().ends_with('Z'));
        assert!(parsed["price"].is_f64());
        assert!((parsed["price"].as_f64().unwrap() - 19.99).abs() < 1e-9);
    }

    #[test]
    fn test_sets_render_as_arrays() {
        let set: HashSet<&str> = ["a", "b"].into_iter().collect();
        let normalized = normalize(&set);
        let mut items: Vec<&str> = normalized
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        items.sort();
        assert_eq!(items, vec!["a", "b"]);
    }

    #[test]
    fn test_unserializable_value_is_stringified() {
        let mut odd = HashMap::new();
        odd.insert((1u8, 2u8), "tuple key");
        let normalized = normalize(&odd);
        assert!(normalized.as_str().unwrap().contains("tuple key"));
    }
}
