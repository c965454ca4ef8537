//! Lenient numeric deserializers.
//!
//! Catalog documents are inconsistent about numbers: `versionCode` is an
//! integer in one generation of the format and a string in another, and the
//! legacy XML format only has text. These helpers accept either.

use serde::Deserializer;
use serde::de::{self, Visitor};
use std::fmt;

struct IntVisitor;

impl<'de> Visitor<'de> for IntVisitor {
    type Value = Option<i64>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a numeric string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v).map(Some).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if v.fract() == 0.0 {
            Ok(Some(v as i64))
        } else {
            Err(E::invalid_value(de::Unexpected::Float(v), &self))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let v = v.trim();
        if v.is_empty() {
            return Ok(None);
        }
        v.parse::<i64>()
            .map(Some)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(IntVisitor)
    }
}

/// Integer that defaults to 0 when absent or null.
pub(crate) fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(d.deserialize_any(IntVisitor)?.unwrap_or(0))
}

/// Optional integer.
pub(crate) fn opt_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    d.deserialize_any(IntVisitor)
}

/// Optional non-negative integer.
pub(crate) fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    match d.deserialize_any(IntVisitor)? {
        Some(v) => u64::try_from(v).map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "super::int")]
        code: i64,
        #[serde(default, deserialize_with = "super::opt_u64")]
        size: Option<u64>,
    }

    #[test]
    fn accepts_numbers_and_numeric_strings() {
        let p: Probe = serde_json::from_str(r#"{"code": "42", "size": 1024}"#).unwrap();
        assert_eq!(p.code, 42);
        assert_eq!(p.size, Some(1024));

        let p: Probe = serde_json::from_str(r#"{"code": 7, "size": "12"}"#).unwrap();
        assert_eq!(p.code, 7);
        assert_eq!(p.size, Some(12));
    }

    #[test]
    fn absent_and_null_fall_back() {
        let p: Probe = serde_json::from_str(r#"{"size": null}"#).unwrap();
        assert_eq!(p.code, 0);
        assert_eq!(p.size, None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Probe>(r#"{"code": "abc"}"#).is_err());
        assert!(serde_json::from_str::<Probe>(r#"{"size": -1}"#).is_err());
    }
}
