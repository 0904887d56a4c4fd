//! Serialization helpers writing addresses and sizes as hex strings.
//!
//! Human readable formats (YAML, JSON) get `"0x1000"`, binary formats get
//! the plain integer.

use serde::{ser::SerializeStruct, Serializer};
use std::{fmt::LowerHex, ops::Range};

/// Unsigned integers which can be written either as hex text or natively.
pub(crate) trait HexUnsigned: LowerHex {
    fn serialize_native<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error>;
}

macro_rules! hex_unsigned {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl HexUnsigned for $ty {
                fn serialize_native<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.$method(*self)
                }
            }
        )*
    };
}

hex_unsigned!(u8 => serialize_u8, u16 => serialize_u16, u32 => serialize_u32, u64 => serialize_u64);

pub(crate) fn hex_u_int<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: HexUnsigned,
    S: Serializer,
{
    if serializer.is_human_readable() {
        serializer.serialize_str(&format!("{value:#x}"))
    } else {
        value.serialize_native(serializer)
    }
}

pub(crate) fn hex_option<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: HexUnsigned,
    S: Serializer,
{
    match value {
        Some(value) if serializer.is_human_readable() => {
            serializer.serialize_some(&format!("{value:#x}"))
        }
        Some(value) => serializer.serialize_some(&Native(value)),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn hex_range<S>(range: &Range<u64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let human_readable = serializer.is_human_readable();
    let mut state = serializer.serialize_struct("Range", 2)?;
    if human_readable {
        state.serialize_field("start", &format!("{:#x}", range.start))?;
        state.serialize_field("end", &format!("{:#x}", range.end))?;
    } else {
        state.serialize_field("start", &range.start)?;
        state.serialize_field("end", &range.end)?;
    }
    state.end()
}

struct Native<'a, T>(&'a T);

impl<T: HexUnsigned> serde::Serialize for Native<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize_native(serializer)
    }
}
