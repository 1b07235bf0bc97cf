//! Streaming MessagePack codec.
//!
//! Wire payloads are a *concatenation* of self-describing top-level values
//! in positional order, not a single array: `[method, arg0, arg1, ...]`
//! means the method string followed by each argument, back to back.
//! [`Packer`] appends values to one buffer; [`Unpacker`] reads them out in
//! the same order.
//!
//! Values use the compact representation: structs serialize as an ordered
//! tuple of their fields, with no field names on the wire.
//!
//! # Example
//!
//! ```
//! use wirecall::codec::{Packer, Unpacker};
//!
//! let mut packer = Packer::new();
//! packer.pack("add_integer").unwrap();
//! packer.pack(&-1i32).unwrap();
//! packer.pack(&-2i32).unwrap();
//!
//! let bytes = packer.into_vec();
//! let mut unpacker = Unpacker::new(&bytes);
//! assert_eq!(unpacker.unpack::<String>().unwrap(), "add_integer");
//! assert_eq!(unpacker.unpack::<i32>().unwrap(), -1);
//! assert_eq!(unpacker.unpack::<i32>().unwrap(), -2);
//! assert!(unpacker.is_at_end());
//! ```

use std::io::Cursor;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Incrementally encodes values into one payload buffer.
#[derive(Debug, Default)]
pub struct Packer {
    buf: Vec<u8>,
}

impl Packer {
    /// Create an empty packer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append one value in compact (positional) representation.
    pub fn pack<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        rmp_serde::encode::write(&mut self.buf, value)?;
        Ok(())
    }

    /// Append a return value. The unit value encodes to *nothing*, so a
    /// void reply stays `[error_code]` with no trailing nil.
    pub fn pack_return<T: Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        if is_unit(value) {
            return Ok(());
        }
        self.pack(value)
    }

    /// Bytes encoded so far.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the packer, returning the payload.
    #[inline]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads successive top-level values out of one payload buffer.
#[derive(Debug)]
pub struct Unpacker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    /// Wrap a payload buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Decode the next value and advance past it.
    pub fn unpack<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        let mut cursor = Cursor::new(&self.buf[self.pos..]);
        let value = {
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            T::deserialize(&mut de)?
        };
        self.pos += cursor.position() as usize;
        Ok(value)
    }

    /// Decode a return value. At end of input only the unit type succeeds,
    /// mirroring [`Packer::pack_return`]: a void reply carries no value.
    pub fn unpack_return<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        if self.is_at_end() {
            let de = serde::de::value::UnitDeserializer::<rmp_serde::decode::Error>::new();
            return T::deserialize(de).map_err(CodecError::Decode);
        }
        self.unpack()
    }

    /// Whether every value has been consumed.
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}

/// Serializer that accepts only the unit value; everything else fails.
/// Used to detect void returns without specialization.
struct UnitProbe;

#[derive(Debug)]
struct NotUnit;

impl std::fmt::Display for NotUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("not a unit value")
    }
}

impl std::error::Error for NotUnit {}

impl serde::ser::Error for NotUnit {
    fn custom<T: std::fmt::Display>(_msg: T) -> Self {
        NotUnit
    }
}

impl serde::Serializer for UnitProbe {
    type Ok = ();
    type Error = NotUnit;
    type SerializeSeq = serde::ser::Impossible<(), NotUnit>;
    type SerializeTuple = serde::ser::Impossible<(), NotUnit>;
    type SerializeTupleStruct = serde::ser::Impossible<(), NotUnit>;
    type SerializeTupleVariant = serde::ser::Impossible<(), NotUnit>;
    type SerializeMap = serde::ser::Impossible<(), NotUnit>;
    type SerializeStruct = serde::ser::Impossible<(), NotUnit>;
    type SerializeStructVariant = serde::ser::Impossible<(), NotUnit>;

    fn serialize_unit(self) -> Result<(), NotUnit> {
        Ok(())
    }

    fn serialize_bool(self, _: bool) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_i8(self, _: i8) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_i16(self, _: i16) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_i32(self, _: i32) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_i64(self, _: i64) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_u8(self, _: u8) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_u16(self, _: u16) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_u32(self, _: u32) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_u64(self, _: u64) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_f32(self, _: f32) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_f64(self, _: f64) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_char(self, _: char) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_str(self, _: &str) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_bytes(self, _: &[u8]) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_none(self) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, _: &T) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: &T,
    ) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<(), NotUnit> {
        Err(NotUnit)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq, NotUnit> {
        Err(NotUnit)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple, NotUnit> {
        Err(NotUnit)
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleStruct, NotUnit> {
        Err(NotUnit)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant, NotUnit> {
        Err(NotUnit)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap, NotUnit> {
        Err(NotUnit)
    }

    fn serialize_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStruct, NotUnit> {
        Err(NotUnit)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, NotUnit> {
        Err(NotUnit)
    }
}

fn is_unit<T: Serialize + ?Sized>(value: &T) -> bool {
    value.serialize(UnitProbe).is_ok()
}
