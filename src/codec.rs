//! The byte-level codec: a growable buffer [`Writer`] and a bounded-slice
//! [`Reader`], each offering one operation per primitive width. Byte order is
//! big-endian for every multi-byte value; this module knows nothing about
//! messages, enums or records, only bytes.

use std::io::Write;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::Error;

/// An append-only, growable byte buffer.
///
/// Every `write_*` method is infallible: the only way encoding can fail is if
/// the caller hands it data that can't be represented (there is no such case
/// in the current primitive set), so `Writer` never returns a `Result`.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Construct an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a writer with `capacity` bytes pre-allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// The number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, returning the underlying buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Append a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a single signed byte.
    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    /// Append an 8-bit character, transparently as its byte value.
    pub fn write_char(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a boolean, `0x01` for true and `0x00` for false.
    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    /// Append a big-endian `u16`.
    pub fn write_u16(&mut self, v: u16) {
        self.buf.write_u16::<BigEndian>(v).expect("write to Vec");
    }

    /// Append a big-endian `i16`.
    pub fn write_i16(&mut self, v: i16) {
        self.buf.write_i16::<BigEndian>(v).expect("write to Vec");
    }

    /// Append a big-endian `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.buf.write_u32::<BigEndian>(v).expect("write to Vec");
    }

    /// Append a big-endian `i32`.
    pub fn write_i32(&mut self, v: i32) {
        self.buf.write_i32::<BigEndian>(v).expect("write to Vec");
    }

    /// Append a big-endian `u64`.
    pub fn write_u64(&mut self, v: u64) {
        self.buf.write_u64::<BigEndian>(v).expect("write to Vec");
    }

    /// Append a big-endian `i64`.
    pub fn write_i64(&mut self, v: i64) {
        self.buf.write_i64::<BigEndian>(v).expect("write to Vec");
    }

    /// Append the big-endian IEEE-754 bit pattern of a `f32`.
    pub fn write_f32(&mut self, v: f32) {
        self.buf.write_f32::<BigEndian>(v).expect("write to Vec");
    }

    /// Append the big-endian IEEE-754 bit pattern of a `f64`.
    pub fn write_f64(&mut self, v: f64) {
        self.buf.write_f64::<BigEndian>(v).expect("write to Vec");
    }

    /// Append raw bytes with no length prefix.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.write_all(v).expect("write to Vec");
    }

    /// Append a `u32` byte-length prefix followed by `v`'s UTF-8 bytes.
    pub fn write_string(&mut self, v: &str) {
        self.write_u32(v.len() as u32);
        self.write_bytes(v.as_bytes());
    }
}

/// A cursor over an immutable byte slice.
///
/// Every `read_*` method fails with [`Error::UnexpectedEof`] if it would
/// read past the end of the slice; on failure the cursor position is left at
/// the point of failure, matching the teacher's non-destructive-on-error
/// cursor discipline.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wrap `buf` for reading from its start.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// The number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True if at least `n` bytes remain to be read.
    pub fn can_read(&self, n: usize) -> bool {
        self.remaining() >= n
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if !self.can_read(n) {
            return Err(Error::UnexpectedEof {
                wanted: n,
                remaining: self.remaining(),
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    /// Read a single signed byte.
    pub fn read_i8(&mut self) -> Result<i8, Error> {
        Ok(self.take(1)?[0] as i8)
    }

    /// Read an 8-bit character, transparently as its byte value.
    pub fn read_char(&mut self) -> Result<u8, Error> {
        self.read_u8()
    }

    /// Read a boolean: `0x00` is false, any other byte is true.
    pub fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(self.take(2)?.read_u16::<BigEndian>().expect("slice len checked"))
    }

    /// Read a big-endian `i16`.
    pub fn read_i16(&mut self) -> Result<i16, Error> {
        Ok(self.take(2)?.read_i16::<BigEndian>().expect("slice len checked"))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(self.take(4)?.read_u32::<BigEndian>().expect("slice len checked"))
    }

    /// Read a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, Error> {
        Ok(self.take(4)?.read_i32::<BigEndian>().expect("slice len checked"))
    }

    /// Read a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(self.take(8)?.read_u64::<BigEndian>().expect("slice len checked"))
    }

    /// Read a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, Error> {
        Ok(self.take(8)?.read_i64::<BigEndian>().expect("slice len checked"))
    }

    /// Read the big-endian IEEE-754 bit pattern of a `f32`.
    pub fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(self.take(4)?.read_f32::<BigEndian>().expect("slice len checked"))
    }

    /// Read the big-endian IEEE-754 bit pattern of a `f64`.
    pub fn read_f64(&mut self) -> Result<f64, Error> {
        Ok(self.take(8)?.read_f64::<BigEndian>().expect("slice len checked"))
    }

    /// Read exactly `n` raw bytes with no length prefix.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        self.take(n)
    }

    /// Read a `u32` byte-length prefix, then that many bytes, interpreted as
    /// UTF-8 text, replacing any invalid sequences per
    /// [`String::from_utf8_lossy`].
    ///
    /// This is the default the [`crate::Decode`] impl for `String` uses:
    /// string validity is not enforced by the codec itself (`spec.md`
    /// §4.1), so a malformed payload round-trips instead of failing the
    /// whole message. Callers that want invalid UTF-8 rejected should use
    /// [`Reader::read_string`] via [`crate::wire::StrictString`] instead.
    pub fn read_string_lossy(&mut self) -> Result<String, Error> {
        let len = self.read_u32()? as usize;
        let raw = self.take(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    /// Like [`Reader::read_string_lossy`], but fails with
    /// [`Error::InvalidUtf8`] on invalid UTF-8 instead of substituting the
    /// replacement character - an opt-in strict mode (`spec.md` §9).
    pub fn read_string(&mut self) -> Result<String, Error> {
        let len = self.read_u32()? as usize;
        let raw = self.take(len)?;
        Ok(std::str::from_utf8(raw)?.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_big_endian_int32() {
        let mut w = Writer::new();
        w.write_i32(0x0102_0304);
        assert_eq!(w.as_slice(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_bool_encoding() {
        let mut w = Writer::new();
        w.write_bool(true);
        w.write_bool(false);
        assert_eq!(w.as_slice(), &[0x01, 0x00]);
    }

    #[test]
    fn test_empty_string_encoding() {
        let mut w = Writer::new();
        w.write_string("");
        assert_eq!(w.as_slice(), &[0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_read_past_end() {
        let mut r = Reader::new(&[0x01, 0x02]);
        assert!(matches!(
            r.read_u32(),
            Err(Error::UnexpectedEof {
                wanted: 4,
                remaining: 2
            })
        ));
    }

    #[test]
    fn test_cursor_left_at_failure_point() {
        let mut r = Reader::new(&[0x00, 0x00, 0x00, 0x01, 0xff]);
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.remaining(), 1);
        assert!(r.read_u32().is_err());
        // A failed read must not consume the byte that *was* available.
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut w = Writer::new();
        w.write_string("Hello World");
        let mut r = Reader::new(w.as_slice());
        assert_eq!(r.read_string().unwrap(), "Hello World");
    }

    proptest! {
        #[test]
        fn prop_primitive_round_trip(
            a in any::<i8>(), b in any::<u8>(), c in any::<i16>(), d in any::<u16>(),
            e in any::<i32>(), f in any::<u32>(), g in any::<i64>(), h in any::<u64>(),
            i in any::<f32>(), j in any::<f64>(), k in any::<bool>(), l in ".{0,64}",
        ) {
            let mut w = Writer::new();
            w.write_i8(a);
            w.write_u8(b);
            w.write_i16(c);
            w.write_u16(d);
            w.write_i32(e);
            w.write_u32(f);
            w.write_i64(g);
            w.write_u64(h);
            w.write_f32(i);
            w.write_f64(j);
            w.write_bool(k);
            w.write_string(&l);

            let mut r = Reader::new(w.as_slice());
            prop_assert_eq!(r.read_i8().unwrap(), a);
            prop_assert_eq!(r.read_u8().unwrap(), b);
            prop_assert_eq!(r.read_i16().unwrap(), c);
            prop_assert_eq!(r.read_u16().unwrap(), d);
            prop_assert_eq!(r.read_i32().unwrap(), e);
            prop_assert_eq!(r.read_u32().unwrap(), f);
            prop_assert_eq!(r.read_i64().unwrap(), g);
            prop_assert_eq!(r.read_u64().unwrap(), h);
            // NaN != NaN, so compare bit patterns for floats.
            prop_assert_eq!(r.read_f32().unwrap().to_bits(), i.to_bits());
            prop_assert_eq!(r.read_f64().unwrap().to_bits(), j.to_bits());
            prop_assert_eq!(r.read_bool().unwrap(), k);
            prop_assert_eq!(r.read_string().unwrap(), l);
            prop_assert_eq!(r.remaining(), 0);
        }
    }
}
