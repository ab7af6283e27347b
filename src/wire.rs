//! The type layer: the [`Encode`]/[`Decode`] pair generated code implements
//! for every IDL-declared record and enum, plus the primitive and sequence
//! impls every generated type is built from.
//!
//! Records compose these impls by encoding/decoding their fields strictly in
//! declaration order - there is no derive macro here (the generator that
//! would emit one is out of scope, see `spec.md` §1), but a record's
//! hand-written impl is nothing more than a straight-line sequence of calls
//! into this trait, exactly as [`Vec<T>`]'s blanket impl below does for the
//! sequence rule.

use crate::codec::{Reader, Writer};
use crate::Error;

/// Serialises a value into a [`Writer`].
pub trait Encode {
    /// Append `self`'s wire representation to `w`.
    fn encode_into(&self, w: &mut Writer);
}

/// Deserialises a value from a [`Reader`].
pub trait Decode: Sized {
    /// Consume exactly the bytes [`Encode::encode_into`] would have written
    /// and reconstruct the value, or fail with a malformed-message error.
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error>;
}

macro_rules! impl_primitive {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Encode for $ty {
            fn encode_into(&self, w: &mut Writer) {
                w.$write(*self);
            }
        }

        impl Decode for $ty {
            fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
                r.$read()
            }
        }
    };
}

impl_primitive!(i8, write_i8, read_i8);
impl_primitive!(u8, write_u8, read_u8);
impl_primitive!(i16, write_i16, read_i16);
impl_primitive!(u16, write_u16, read_u16);
impl_primitive!(i32, write_i32, read_i32);
impl_primitive!(u32, write_u32, read_u32);
impl_primitive!(i64, write_i64, read_i64);
impl_primitive!(u64, write_u64, read_u64);
impl_primitive!(f32, write_f32, read_f32);
impl_primitive!(f64, write_f64, read_f64);
impl_primitive!(bool, write_bool, read_bool);

impl Encode for String {
    fn encode_into(&self, w: &mut Writer) {
        w.write_string(self);
    }
}

impl Decode for String {
    /// Lossily tolerant of non-UTF-8 bytes (`spec.md` §4.1, §9): string
    /// validity is not enforced by the codec, so a malformed byte sequence
    /// round-trips as the Unicode replacement character rather than failing
    /// the whole message. Use [`StrictString`] where rejecting invalid UTF-8
    /// is actually wanted.
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        r.read_string_lossy()
    }
}

impl Encode for str {
    fn encode_into(&self, w: &mut Writer) {
        w.write_string(self);
    }
}

/// Opt-in strict string decoding (`spec.md` §9): rejects non-UTF-8 byte
/// sequences with [`Error::InvalidUtf8`] instead of the default lossy
/// replacement [`String`] uses. Encodes identically to `String`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StrictString(pub String);

impl Encode for StrictString {
    fn encode_into(&self, w: &mut Writer) {
        w.write_string(&self.0);
    }
}

impl Decode for StrictString {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self(r.read_string()?))
    }
}

/// Sequence rule: a `u32` count followed by that many element encodings,
/// applied recursively - `Vec<Vec<T>>` therefore "just works".
impl<T: Encode> Encode for Vec<T> {
    fn encode_into(&self, w: &mut Writer) {
        w.write_u32(self.len() as u32);
        for item in self {
            item.encode_into(w);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        let count = r.read_u32()? as usize;
        let mut out = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            out.push(T::decode_from(r)?);
        }
        Ok(out)
    }
}

/// Declares an IDL enum: a closed, ordered set of named variants whose wire
/// representation is the zero-based declaration index, encoded as `i32`.
///
/// Generated code implements this (and gets [`Encode`]/[`Decode`] for free
/// below) rather than hand-rolling the ordinal match twice.
pub trait WireEnum: Sized + Copy {
    /// The type's name, used only in [`Error::InvalidEnumOrdinal`] messages.
    const TYPE_NAME: &'static str;

    /// The number of declared variants.
    const VARIANT_COUNT: u32;

    /// This variant's zero-based declaration index.
    fn ordinal(&self) -> i32;

    /// Construct the variant for a given declaration index, or `None` if
    /// `ordinal` is outside `0..VARIANT_COUNT`.
    fn from_ordinal(ordinal: i32) -> Option<Self>;
}

impl<E: WireEnum> Encode for E {
    fn encode_into(&self, w: &mut Writer) {
        w.write_i32(self.ordinal());
    }
}

/// Blanket [`Decode`] for [`WireEnum`] implementors is not provided directly
/// because a blanket `impl<E: WireEnum> Decode for E` would conflict with
/// the primitive impls above under coherence; generated enum types call
/// [`decode_enum`] from their own `Decode::decode_from`.
pub fn decode_enum<E: WireEnum>(r: &mut Reader<'_>) -> Result<E, Error> {
    let ordinal = r.read_i32()?;
    E::from_ordinal(ordinal).ok_or(Error::InvalidEnumOrdinal {
        type_name: E::TYPE_NAME,
        ordinal,
        variant_count: E::VARIANT_COUNT,
    })
}
