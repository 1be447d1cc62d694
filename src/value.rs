//! Column value decoding for [`Row`](crate::row::Row) handles.

use crate::error::{Error, Result};
use crate::event::FormatCode;

/// Decode one column value of a row into a Rust type.
///
/// Values arrive either in text format (simple query protocol) or binary
/// format (extended protocol); the column's [`FormatCode`] picks the method.
pub trait FromValue<'a>: Sized {
    /// Decode SQL NULL. Fails unless the type can represent NULL.
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    /// Decode from text format bytes.
    fn from_text(bytes: &'a [u8]) -> Result<Self>;

    /// Decode from binary format bytes.
    fn from_binary(bytes: &'a [u8]) -> Result<Self> {
        let _ = bytes;
        Err(Error::Decode(
            "binary format not supported for this type".into(),
        ))
    }

    /// Decode a non-null value in the given format.
    fn decode(bytes: &'a [u8], format: FormatCode) -> Result<Self> {
        match format {
            FormatCode::Text => Self::from_text(bytes),
            FormatCode::Binary => Self::from_binary(bytes),
        }
    }
}

impl<'a, T: FromValue<'a>> FromValue<'a> for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_text(bytes: &'a [u8]) -> Result<Self> {
        T::from_text(bytes).map(Some)
    }

    fn from_binary(bytes: &'a [u8]) -> Result<Self> {
        T::from_binary(bytes).map(Some)
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

macro_rules! impl_numeric {
    ($($ty:ty => $len:literal),* $(,)?) => {$(
        impl FromValue<'_> for $ty {
            fn from_text(bytes: &[u8]) -> Result<Self> {
                utf8(bytes)?.parse().map_err(|e| {
                    Error::Decode(format!("invalid {}: {}", stringify!($ty), e))
                })
            }

            fn from_binary(bytes: &[u8]) -> Result<Self> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| {
                    Error::Decode(format!(
                        "invalid {} length: {}",
                        stringify!($ty),
                        bytes.len()
                    ))
                })?;
                Ok(<$ty>::from_be_bytes(arr))
            }
        }
    )*};
}

impl_numeric!(i16 => 2, i32 => 4, i64 => 8, u32 => 4, f32 => 4, f64 => 8);

impl FromValue<'_> for bool {
    fn from_text(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"t" | b"true" | b"TRUE" | b"1" => Ok(true),
            b"f" | b"false" | b"FALSE" | b"0" => Ok(false),
            _ => Err(Error::Decode(format!(
                "invalid boolean: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }

    fn from_binary(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [b] => Ok(*b != 0),
            _ => Err(Error::Decode(format!(
                "invalid boolean length: {}",
                bytes.len()
            ))),
        }
    }
}

impl<'a> FromValue<'a> for &'a str {
    fn from_text(bytes: &'a [u8]) -> Result<Self> {
        utf8(bytes)
    }

    fn from_binary(bytes: &'a [u8]) -> Result<Self> {
        utf8(bytes)
    }
}

impl FromValue<'_> for String {
    fn from_text(bytes: &[u8]) -> Result<Self> {
        utf8(bytes).map(str::to_string)
    }

    fn from_binary(bytes: &[u8]) -> Result<Self> {
        utf8(bytes).map(str::to_string)
    }
}

impl FromValue<'_> for Vec<u8> {
    /// Text-format bytea uses the hex form `\xDEADBEEF`.
    fn from_text(bytes: &[u8]) -> Result<Self> {
        match bytes.strip_prefix(b"\\x") {
            Some(hex) => decode_hex(hex),
            None => Ok(bytes.to_vec()),
        }
    }

    fn from_binary(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    fn nibble(b: u8) -> Result<u8> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(Error::Decode(format!("invalid hex digit: {}", b as char))),
        }
    }

    let pairs = hex.chunks_exact(2);
    if !pairs.remainder().is_empty() {
        return Err(Error::Decode("invalid hex length".into()));
    }
    pairs
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}
