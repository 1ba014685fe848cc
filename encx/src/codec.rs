//! Canonical, type-directed byte encoding for annotated field values.
//!
//! Both the encrypt and hash paths operate on these bytes, so the encoding
//! decides equality semantics: integer `5` and string `"5"` must hash
//! differently, and a nil pointer must be distinguishable from the zero
//! value of its pointee.
//!
//! Encoding v1: one tag byte, then the payload.
//!
//! ```text
//! 0x00  none      (nil sentinel, no payload)
//! 0x01  string    (UTF-8 bytes)
//! 0x02  bool      (1 byte, 0 or 1)
//! 0x03  int       (all signed widths widened to i64, 8 bytes BE)
//! 0x04  uint      (all unsigned widths widened to u64, 8 bytes BE)
//! 0x05  float     (f32/f64 widened to f64, IEEE-754 bits, 8 bytes BE)
//! 0x06  bytes     (raw)
//! 0x07  time      (microseconds since Unix epoch, i64, 8 bytes BE)
//! 0x08  uuid      (16 raw bytes)
//! 0x09  json      (serde_json document, for container types)
//! ```
//!
//! The tag byte keeps distinct typed values from colliding; totality over
//! the supported primitives is covered by the trait impls below. Containers
//! go through the JSON helpers. This layout is part of the generator's
//! version tag: changing it is a breaking change for stored hashes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;

pub const TAG_NONE: u8 = 0x00;
pub const TAG_STRING: u8 = 0x01;
pub const TAG_BOOL: u8 = 0x02;
pub const TAG_INT: u8 = 0x03;
pub const TAG_UINT: u8 = 0x04;
pub const TAG_FLOAT: u8 = 0x05;
pub const TAG_BYTES: u8 = 0x06;
pub const TAG_TIME: u8 = 0x07;
pub const TAG_UUID: u8 = 0x08;
pub const TAG_JSON: u8 = 0x09;

fn decode_err(expected: &str) -> Error {
    Error::decrypt_failed(format!("canonical decoding: not a {} value", expected))
}

fn split_tag<'a>(bytes: &'a [u8], tag: u8, expected: &str) -> Result<&'a [u8], Error> {
    match bytes.split_first() {
        Some((&t, rest)) if t == tag => Ok(rest),
        _ => Err(decode_err(expected)),
    }
}

fn fixed8(payload: &[u8], expected: &str) -> Result<[u8; 8], Error> {
    payload.try_into().map_err(|_| decode_err(expected))
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A value with a total canonical byte encoding.
pub trait CanonicalValue: Sized {
    /// Encode to the tagged canonical form. Infallible for primitives.
    fn to_canonical(&self) -> Vec<u8>;

    /// Decode from the tagged canonical form.
    fn from_canonical(bytes: &[u8]) -> Result<Self, Error>;
}

fn tagged(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(tag);
    out.extend_from_slice(payload);
    out
}

// --- string ---------------------------------------------------------------

impl CanonicalValue for String {
    fn to_canonical(&self) -> Vec<u8> {
        tagged(TAG_STRING, self.as_bytes())
    }

    fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
        let payload = split_tag(bytes, TAG_STRING, "string")?;
        String::from_utf8(payload.to_vec()).map_err(|_| decode_err("string"))
    }
}

// --- bool -----------------------------------------------------------------

impl CanonicalValue for bool {
    fn to_canonical(&self) -> Vec<u8> {
        tagged(TAG_BOOL, &[u8::from(*self)])
    }

    fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
        match split_tag(bytes, TAG_BOOL, "bool")? {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(decode_err("bool")),
        }
    }
}

// --- integers -------------------------------------------------------------

macro_rules! impl_signed {
    ($($ty:ty),*) => {$(
        impl CanonicalValue for $ty {
            fn to_canonical(&self) -> Vec<u8> {
                tagged(TAG_INT, &(*self as i64).to_be_bytes())
            }

            fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
                let payload = split_tag(bytes, TAG_INT, "signed integer")?;
                let wide = i64::from_be_bytes(fixed8(payload, "signed integer")?);
                <$ty>::try_from(wide).map_err(|_| decode_err(stringify!($ty)))
            }
        }
    )*};
}

macro_rules! impl_unsigned {
    ($($ty:ty),*) => {$(
        impl CanonicalValue for $ty {
            fn to_canonical(&self) -> Vec<u8> {
                tagged(TAG_UINT, &(*self as u64).to_be_bytes())
            }

            fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
                let payload = split_tag(bytes, TAG_UINT, "unsigned integer")?;
                let wide = u64::from_be_bytes(fixed8(payload, "unsigned integer")?);
                <$ty>::try_from(wide).map_err(|_| decode_err(stringify!($ty)))
            }
        }
    )*};
}

impl_signed!(i8, i16, i32, i64, isize);
impl_unsigned!(u8, u16, u32, u64, usize);

// --- floats ---------------------------------------------------------------

impl CanonicalValue for f64 {
    fn to_canonical(&self) -> Vec<u8> {
        tagged(TAG_FLOAT, &self.to_bits().to_be_bytes())
    }

    fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
        let payload = split_tag(bytes, TAG_FLOAT, "float")?;
        Ok(f64::from_bits(u64::from_be_bytes(fixed8(payload, "float")?)))
    }
}

impl CanonicalValue for f32 {
    fn to_canonical(&self) -> Vec<u8> {
        // Widening f32 -> f64 is exact, so the roundtrip is lossless.
        (f64::from(*self)).to_canonical()
    }

    fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
        Ok(f64::from_canonical(bytes)? as f32)
    }
}

// --- bytes ----------------------------------------------------------------

impl CanonicalValue for Vec<u8> {
    fn to_canonical(&self) -> Vec<u8> {
        tagged(TAG_BYTES, self)
    }

    fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
        Ok(split_tag(bytes, TAG_BYTES, "bytes")?.to_vec())
    }
}

/// Fixed-size byte arrays share the bytes tag with `Vec<u8>`; byte content
/// decides equality, not the container. Decoding enforces the exact length.
impl<const N: usize> CanonicalValue for [u8; N] {
    fn to_canonical(&self) -> Vec<u8> {
        tagged(TAG_BYTES, self)
    }

    fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
        let payload = split_tag(bytes, TAG_BYTES, "bytes")?;
        payload
            .try_into()
            .map_err(|_| decode_err("fixed-length bytes"))
    }
}

// --- time -----------------------------------------------------------------

impl CanonicalValue for DateTime<Utc> {
    fn to_canonical(&self) -> Vec<u8> {
        tagged(TAG_TIME, &self.timestamp_micros().to_be_bytes())
    }

    fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
        let payload = split_tag(bytes, TAG_TIME, "time")?;
        let micros = i64::from_be_bytes(fixed8(payload, "time")?);
        DateTime::from_timestamp_micros(micros).ok_or_else(|| decode_err("time"))
    }
}

// --- uuid -----------------------------------------------------------------

impl CanonicalValue for Uuid {
    fn to_canonical(&self) -> Vec<u8> {
        tagged(TAG_UUID, self.as_bytes())
    }

    fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
        let payload = split_tag(bytes, TAG_UUID, "uuid")?;
        let raw: [u8; 16] = payload.try_into().map_err(|_| decode_err("uuid"))?;
        Ok(Uuid::from_bytes(raw))
    }
}

// --- option (nil pointers) ------------------------------------------------

/// `None` encodes as the bare nil sentinel; `Some(v)` encodes as `v`. Inner
/// encodings always begin with a nonzero tag, so the two never collide and
/// decrypt restores `None` rather than a zero value.
impl<T: CanonicalValue> CanonicalValue for Option<T> {
    fn to_canonical(&self) -> Vec<u8> {
        match self {
            None => vec![TAG_NONE],
            Some(value) => value.to_canonical(),
        }
    }

    fn from_canonical(bytes: &[u8]) -> Result<Self, Error> {
        if bytes == [TAG_NONE] {
            return Ok(None);
        }
        T::from_canonical(bytes).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Container path (JSON)
// ---------------------------------------------------------------------------

/// Canonical bytes for container types (slices, maps, nested structs).
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| Error::encrypt_failed(format!("json encoding: {}", e)))?;
    Ok(tagged(TAG_JSON, &payload))
}

/// Decode container bytes produced by [`to_canonical_json`].
pub fn from_canonical_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    let payload = split_tag(bytes, TAG_JSON, "json")?;
    serde_json::from_slice(payload)
        .map_err(|e| Error::decrypt_failed(format!("json decoding: {}", e)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
