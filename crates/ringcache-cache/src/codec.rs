//! Value encoding for stored cache entries.
//!
//! Integers are stored as bare ASCII decimal so they stay readable (and
//! `INCR`-able) by other clients. Everything else is the tag byte `!`
//! followed by a postcard-serialized body. Values written before tagging
//! existed decode through the integer parse or, failing that, as raw bytes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::CacheError;

/// Marks a serialized (non-integer) value.
pub const TAG: u8 = b'!';

/// A type that can be stored in the cache.
///
/// The serde bounds cover the structured path. The optional hooks cover
/// the untagged wire forms and null handling; the defaults opt out of all
/// of them.
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The value as a plain integer, when its type is exactly an integer.
    fn as_integer(&self) -> Option<i64> {
        None
    }

    /// Build a value from an untagged ASCII integer.
    fn from_integer(_n: i64) -> Option<Self> {
        None
    }

    /// Build a value from untagged, non-numeric legacy bytes.
    fn from_raw(_bytes: &[u8]) -> Option<Self> {
        None
    }

    /// Whether this is the "no value" value (`None`, unit).
    fn is_null(&self) -> bool {
        false
    }

    /// The "no value" value, if the type has one.
    fn null() -> Option<Self> {
        None
    }
}

macro_rules! integer_value {
    ($($t:ty),*) => {
        $(
            impl CacheValue for $t {
                fn as_integer(&self) -> Option<i64> {
                    i64::try_from(*self).ok()
                }

                fn from_integer(n: i64) -> Option<Self> {
                    <$t>::try_from(n).ok()
                }
            }
        )*
    };
}

integer_value!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

macro_rules! structured_value {
    ($($t:ty),*) => {
        $(impl CacheValue for $t {})*
    };
}

structured_value!(bool, char, f32, f64, Bytes);

impl CacheValue for () {
    fn is_null(&self) -> bool {
        true
    }

    fn null() -> Option<Self> {
        Some(())
    }
}

impl CacheValue for String {
    fn from_raw(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok().map(str::to_string)
    }
}

impl<T: CacheValue> CacheValue for Option<T> {
    fn from_integer(n: i64) -> Option<Self> {
        T::from_integer(n).map(Some)
    }

    fn from_raw(bytes: &[u8]) -> Option<Self> {
        T::from_raw(bytes).map(Some)
    }

    fn is_null(&self) -> bool {
        self.is_none()
    }

    fn null() -> Option<Self> {
        Some(None)
    }
}

impl<T: CacheValue> CacheValue for Vec<T> {}
impl<T: CacheValue + Ord> CacheValue for BTreeSet<T> {}
impl<T: CacheValue + Eq + Hash> CacheValue for HashSet<T> {}
impl<K: CacheValue + Ord, V: CacheValue> CacheValue for BTreeMap<K, V> {}
impl<K: CacheValue + Eq + Hash, V: CacheValue> CacheValue for HashMap<K, V> {}
impl<A: CacheValue, B: CacheValue> CacheValue for (A, B) {}
impl<A: CacheValue, B: CacheValue, C: CacheValue> CacheValue for (A, B, C) {}

/// Result of decoding stored bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// Nothing stored, or a tagged body that failed to deserialize.
    Missing,
    /// A decoded value.
    Value(T),
    /// Untagged, non-numeric bytes the type could not claim.
    Raw(Bytes),
}

impl<T: CacheValue> Decoded<T> {
    /// The value, giving the type a chance to claim raw bytes.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Missing => None,
            Self::Value(v) => Some(v),
            Self::Raw(bytes) => T::from_raw(&bytes),
        }
    }

    /// Whether nothing usable was stored.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Encode `value` for storage.
pub fn encode<T: CacheValue>(value: &T) -> Result<Bytes, CacheError> {
    if let Some(n) = value.as_integer() {
        return Ok(Bytes::from(n.to_string()));
    }
    let body = postcard::to_allocvec(value)?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(TAG);
    out.extend_from_slice(&body);
    Ok(Bytes::from(out))
}

/// Decode stored bytes; `None` or empty input means nothing is stored.
pub fn decode<T: CacheValue>(bytes: Option<&[u8]>) -> Decoded<T> {
    let Some(bytes) = bytes.filter(|b| !b.is_empty()) else {
        return Decoded::Missing;
    };

    if let Some(body) = bytes.strip_prefix(&[TAG]) {
        return match postcard::from_bytes::<T>(body) {
            Ok(value) => Decoded::Value(value),
            Err(e) => {
                debug!(error = %e, len = body.len(), "undecodable cache value treated as missing");
                Decoded::Missing
            }
        };
    }

    let parsed = std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(T::from_integer);
    match parsed {
        Some(value) => Decoded::Value(value),
        None => Decoded::Raw(Bytes::copy_from_slice(bytes)),
    }
}
