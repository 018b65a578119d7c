//! Encoder and decoder for RAS primitive values.
//!
//! Fixed-width numbers are big-endian. Two variable-length integer forms are
//! used on the wire:
//!
//! ```text
//! size           : 1ccccccc ... 0ccccccc          (base-128, low bits first)
//! nullable size  : NCpppppp [1ccccccc ...] 0ccccccc
//!                  N = null flag, C = continuation, p = low 6 payload bits
//! ```

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ticks between the protocol epoch and the UNIX epoch (10 ticks per millisecond).
pub const TICKS_EPOCH_OFFSET: i64 = 621_355_968_000_000;

/// Ticks per millisecond.
pub const TICKS_PER_MILLI: i64 = 10;

/// Encoded form of an empty string or empty map.
pub const NULL_BYTE: u8 = 0x00;

const CONTINUE_MASK: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7F;
const NULLABLE_NULL_FLAG: u8 = 0x80;
const NULLABLE_CONTINUE_FLAG: u8 = 0x40;
const NULLABLE_PAYLOAD_MASK: u8 = 0x3F;
const NULLABLE_SHIFT: u32 = 6;
const SIZE_SHIFT: u32 = 7;

/// Negotiated value codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    V1_0,
}

impl Codec {
    /// Wire version sent in the negotiation message.
    pub fn version(&self) -> u16 {
        match self {
            Codec::V1_0 => 256,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::V1_0 => "1.0",
        }
    }

    pub fn encoder(&self) -> Encoder {
        Encoder::new()
    }

    pub fn decoder(&self, buf: Bytes) -> Decoder {
        Decoder::new(buf)
    }
}

/// Self-describing value used in parameter maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedValue {
    Bool(bool),
    Byte(u8),
    Int(i32),
    Long(i64),
}

impl TypedValue {
    pub const BOOLEAN_TAG: u8 = 1;
    pub const BYTE_TAG: u8 = 2;
    pub const INT_TAG: u8 = 4;
    pub const LONG_TAG: u8 = 5;

    /// Returns the one-byte wire tag for this value.
    pub fn tag(&self) -> u8 {
        match self {
            TypedValue::Bool(_) => Self::BOOLEAN_TAG,
            TypedValue::Byte(_) => Self::BYTE_TAG,
            TypedValue::Int(_) => Self::INT_TAG,
            TypedValue::Long(_) => Self::LONG_TAG,
        }
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        TypedValue::Bool(value)
    }
}

impl From<u8> for TypedValue {
    fn from(value: u8) -> Self {
        TypedValue::Byte(value)
    }
}

impl From<i32> for TypedValue {
    fn from(value: i32) -> Self {
        TypedValue::Int(value)
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        TypedValue::Long(value)
    }
}

/// Ordered map of free-form parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap(Vec<(String, TypedValue)>);

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing an existing value with the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TypedValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&TypedValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Converts an optional timestamp to protocol ticks. `None` is tick 0.
pub fn time_to_ticks(time: Option<DateTime<Utc>>) -> i64 {
    match time {
        Some(t) => t.timestamp_millis() * TICKS_PER_MILLI + TICKS_EPOCH_OFFSET,
        None => 0,
    }
}

/// Converts protocol ticks back to a timestamp. Tick 0 is `None`.
pub fn ticks_to_time(ticks: i64) -> Result<Option<DateTime<Utc>>, ProtocolError> {
    if ticks == 0 {
        return Ok(None);
    }
    let millis = (ticks - TICKS_EPOCH_OFFSET) / TICKS_PER_MILLI;
    DateTime::from_timestamp_millis(millis)
        .map(Some)
        .ok_or(ProtocolError::TimestampOutOfRange(ticks))
}

/// Parses a plain size varint from the front of `buf` without consuming it.
///
/// Returns `Ok(None)` if the buffer ends before the varint does, otherwise
/// the decoded value and the number of bytes it occupies.
pub fn peek_size(buf: &[u8]) -> Result<Option<(u64, usize)>, ProtocolError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if shift >= u64::BITS {
            return Err(ProtocolError::VarintOverflow);
        }
        value |= u64::from(b & PAYLOAD_MASK) << shift;
        if b & CONTINUE_MASK == 0 {
            return Ok(Some((value, i + 1)));
        }
        shift += SIZE_SHIFT;
    }
    Ok(None)
}

/// Writes RAS primitive values into a growable buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder, returning the encoded bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_u32(value.to_bits());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.put_u64(value.to_bits());
    }

    pub fn put_null(&mut self) {
        self.buf.put_u8(NULL_BYTE);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Writes a string as a nullable-size byte count followed by UTF-8 bytes.
    pub fn put_string(&mut self, value: &str) {
        if value.is_empty() {
            self.put_null();
            return;
        }
        self.put_nullable_size(value.len() as u64);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn put_uuid(&mut self, value: &Uuid) {
        self.buf.put_slice(value.as_bytes());
    }

    pub fn put_time(&mut self, value: Option<DateTime<Utc>>) {
        self.put_i64(time_to_ticks(value));
    }

    /// Writes a plain base-128 varint.
    pub fn put_size(&mut self, mut value: u64) {
        loop {
            let byte = (value as u8) & PAYLOAD_MASK;
            value >>= SIZE_SHIFT;
            if value == 0 {
                self.buf.put_u8(byte);
                return;
            }
            self.buf.put_u8(byte | CONTINUE_MASK);
        }
    }

    /// Writes a nullable-size varint (never emits the null flag).
    pub fn put_nullable_size(&mut self, value: u64) {
        let mut rest = value >> NULLABLE_SHIFT;
        let first = (value as u8) & NULLABLE_PAYLOAD_MASK;
        if rest == 0 {
            self.buf.put_u8(first);
            return;
        }
        self.buf.put_u8(first | NULLABLE_CONTINUE_FLAG);
        loop {
            let byte = (rest as u8) & PAYLOAD_MASK;
            rest >>= SIZE_SHIFT;
            if rest == 0 {
                self.buf.put_u8(byte);
                return;
            }
            self.buf.put_u8(byte | CONTINUE_MASK);
        }
    }

    pub fn put_endpoint_id(&mut self, id: u64) {
        self.put_nullable_size(id);
    }

    /// Writes a type tag followed by the value in its natural encoding.
    pub fn put_typed_value(&mut self, value: &TypedValue) {
        self.buf.put_u8(value.tag());
        match *value {
            TypedValue::Bool(v) => self.put_bool(v),
            TypedValue::Byte(v) => self.put_u8(v),
            TypedValue::Int(v) => self.put_i32(v),
            TypedValue::Long(v) => self.put_i64(v),
        }
    }

    /// Writes a parameter map; an empty map is a single null byte.
    pub fn put_params(&mut self, params: &ParamMap) {
        if params.is_empty() {
            self.put_null();
            return;
        }
        self.put_nullable_size(params.len() as u64);
        for (key, value) in params.iter() {
            self.put_string(key);
            self.put_typed_value(value);
        }
    }
}

/// Reads RAS primitive values from a byte buffer.
///
/// Every read checks the remaining length first, so a truncated buffer
/// surfaces as [`ProtocolError::UnexpectedEof`] instead of a panic.
#[derive(Debug, Clone)]
pub struct Decoder {
    buf: Bytes,
}

impl Decoder {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    /// Returns the unread bytes, leaving the decoder empty.
    pub fn take_rest(&mut self) -> Bytes {
        self.buf.split_off(0)
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::UnexpectedEof {
                needed: needed - self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Reads a boolean. Only `1` is true, matching the server's reader.
    pub fn get_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.get_u8()? == 1)
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_i16(&mut self) -> Result<i16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn get_i32(&mut self) -> Result<i32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn get_i64(&mut self) -> Result<i64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn get_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_bits(self.get_u32()?))
    }

    pub fn get_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_bits(self.get_u64()?))
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn get_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.get_nullable_size()?;
        if len == 0 {
            return Ok(String::new());
        }
        let len = usize::try_from(len).map_err(|_| ProtocolError::UnexpectedEof {
            needed: usize::MAX,
        })?;
        let bytes = self.get_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn get_uuid(&mut self) -> Result<Uuid, ProtocolError> {
        self.ensure(16)?;
        let mut raw = [0u8; 16];
        self.buf.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes(raw))
    }

    pub fn get_time(&mut self) -> Result<Option<DateTime<Utc>>, ProtocolError> {
        let ticks = self.get_i64()?;
        ticks_to_time(ticks)
    }

    /// Reads a plain base-128 varint.
    pub fn get_size(&mut self) -> Result<u64, ProtocolError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let b = self.get_u8()?;
            if shift >= u64::BITS {
                return Err(ProtocolError::VarintOverflow);
            }
            value |= u64::from(b & PAYLOAD_MASK) << shift;
            if b & CONTINUE_MASK == 0 {
                return Ok(value);
            }
            shift += SIZE_SHIFT;
        }
    }

    /// Reads a nullable-size varint. A null encoding yields 0.
    pub fn get_nullable_size(&mut self) -> Result<u64, ProtocolError> {
        let first = self.get_u8()?;
        if first & NULLABLE_NULL_FLAG != 0 {
            if first & PAYLOAD_MASK != 0 {
                return Err(ProtocolError::NullFlagViolation(first));
            }
            return Ok(0);
        }

        let mut value = u64::from(first & NULLABLE_PAYLOAD_MASK);
        if first & NULLABLE_CONTINUE_FLAG == 0 {
            return Ok(value);
        }

        let mut shift = NULLABLE_SHIFT;
        loop {
            let b = self.get_u8()?;
            if shift >= u64::BITS {
                return Err(ProtocolError::VarintOverflow);
            }
            value |= u64::from(b & PAYLOAD_MASK) << shift;
            if b & CONTINUE_MASK == 0 {
                return Ok(value);
            }
            shift += SIZE_SHIFT;
        }
    }

    pub fn get_endpoint_id(&mut self) -> Result<u64, ProtocolError> {
        self.get_nullable_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn encode_size(value: u64) -> Bytes {
        let mut enc = Encoder::new();
        enc.put_size(value);
        enc.into_bytes()
    }

    fn encode_nullable(value: u64) -> Bytes {
        let mut enc = Encoder::new();
        enc.put_nullable_size(value);
        enc.into_bytes()
    }

    #[test]
    fn test_size_boundaries() {
        assert_eq!(encode_size(0).as_ref(), &[0x00]);
        assert_eq!(encode_size(127).as_ref(), &[0x7F]);
        assert_eq!(encode_size(128).as_ref(), &[0x80, 0x01]);
        assert_eq!(encode_size(300).as_ref(), &[0xAC, 0x02]);

        for value in [0u64, 63, 64, 127, 128, 16_383, 16_384, 2_097_152, u32::MAX as u64] {
            let mut dec = Decoder::new(encode_size(value));
            assert_eq!(dec.get_size().unwrap(), value);
            assert!(!dec.has_remaining());
        }
    }

    #[test]
    fn test_nullable_size_boundaries() {
        assert_eq!(encode_nullable(0).as_ref(), &[0x00]);
        assert_eq!(encode_nullable(63).as_ref(), &[0x3F]);
        assert_eq!(encode_nullable(64).as_ref(), &[0x40, 0x01]);
        assert_eq!(encode_nullable(127).as_ref(), &[0x7F, 0x01]);
        assert_eq!(encode_nullable(128).as_ref(), &[0x40, 0x02]);

        // 2^20 needs the first byte plus two continuation bytes
        let encoded = encode_nullable(1 << 20);
        assert_eq!(encoded.len(), 3);

        for value in [0u64, 1, 63, 64, 127, 128, 8_191, 8_192, 1 << 20, 1 << 27, u32::MAX as u64] {
            let mut dec = Decoder::new(encode_nullable(value));
            assert_eq!(dec.get_nullable_size().unwrap(), value);
            assert!(!dec.has_remaining());
        }
    }

    #[test]
    fn test_nullable_size_null_flag() {
        // Bare null flag decodes to zero
        let mut dec = Decoder::new(Bytes::from_static(&[0x80]));
        assert_eq!(dec.get_nullable_size().unwrap(), 0);

        // Null flag with payload bits is a protocol violation
        let mut dec = Decoder::new(Bytes::from_static(&[0x81]));
        assert!(matches!(
            dec.get_nullable_size(),
            Err(ProtocolError::NullFlagViolation(0x81))
        ));

        let mut dec = Decoder::new(Bytes::from_static(&[0xC0]));
        assert!(matches!(
            dec.get_nullable_size(),
            Err(ProtocolError::NullFlagViolation(0xC0))
        ));

        // Zero never collides with a positive value
        assert_ne!(encode_nullable(0), encode_nullable(1));
        assert_ne!(encode_nullable(0), encode_nullable(64));
    }

    #[test]
    fn test_short_read_is_error() {
        let mut dec = Decoder::new(Bytes::from_static(&[0x00, 0x01]));
        assert!(matches!(
            dec.get_i32(),
            Err(ProtocolError::UnexpectedEof { needed: 2 })
        ));

        // Continuation flag set but no more bytes
        let mut dec = Decoder::new(Bytes::from_static(&[0x80]));
        assert!(matches!(
            dec.get_size(),
            Err(ProtocolError::UnexpectedEof { .. })
        ));

        // String length claims more bytes than available
        let mut dec = Decoder::new(Bytes::from_static(&[0x05, b'a', b'b']));
        assert!(matches!(
            dec.get_string(),
            Err(ProtocolError::UnexpectedEof { needed: 3 })
        ));
    }

    #[test]
    fn test_string_encoding() {
        let mut enc = Encoder::new();
        enc.put_string("");
        enc.put_string("abc");
        let bytes = enc.into_bytes();
        assert_eq!(bytes.as_ref(), &[0x00, 0x03, b'a', b'b', b'c']);

        let mut dec = Decoder::new(bytes);
        assert_eq!(dec.get_string().unwrap(), "");
        assert_eq!(dec.get_string().unwrap(), "abc");
        assert!(!dec.has_remaining());
    }

    #[test]
    fn test_string_multibyte_and_long() {
        let long = "кластер".repeat(20);
        let mut enc = Encoder::new();
        enc.put_string(&long);
        let mut dec = Decoder::new(enc.into_bytes());
        assert_eq!(dec.get_string().unwrap(), long);
    }

    #[test]
    fn test_invalid_utf8() {
        let mut dec = Decoder::new(Bytes::from_static(&[0x02, 0xFF, 0xFE]));
        assert!(matches!(dec.get_string(), Err(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn test_fixed_width_big_endian() {
        let mut enc = Encoder::new();
        enc.put_i16(-2);
        enc.put_i32(0x0102_0304);
        enc.put_u64(1);
        enc.put_bool(true);
        enc.put_bool(false);
        let bytes = enc.into_bytes();
        assert_eq!(&bytes[..2], &[0xFF, 0xFE]);
        assert_eq!(&bytes[2..6], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[6..14], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&bytes[14..], &[0x01, 0x00]);
    }

    #[test]
    fn test_float_bits() {
        let mut enc = Encoder::new();
        enc.put_f64(1.5);
        enc.put_f32(-0.25);
        let mut dec = Decoder::new(enc.into_bytes());
        assert_eq!(dec.get_f64().unwrap(), 1.5);
        assert_eq!(dec.get_f32().unwrap(), -0.25);
    }

    #[test]
    fn test_uuid_raw_bytes() {
        let id = Uuid::parse_str("6d6958e1-a96c-4999-a995-698a0298161e").unwrap();
        let mut enc = Encoder::new();
        enc.put_uuid(&id);
        let bytes = enc.into_bytes();
        assert_eq!(bytes.as_ref(), id.as_bytes());
        assert_eq!(Decoder::new(bytes).get_uuid().unwrap(), id);
    }

    #[test]
    fn test_time_zero_and_epoch() {
        assert_eq!(time_to_ticks(None), 0);
        assert_eq!(ticks_to_time(0).unwrap(), None);

        let epoch = Utc.timestamp_millis_opt(0).unwrap();
        assert_eq!(time_to_ticks(Some(epoch)), TICKS_EPOCH_OFFSET);

        // Any non-zero tick value is a concrete time
        assert!(ticks_to_time(1).unwrap().is_some());
        assert!(ticks_to_time(TICKS_EPOCH_OFFSET).unwrap().is_some());
    }

    #[test]
    fn test_time_known_value() {
        let t = Utc.with_ymd_and_hms(2020, 10, 1, 7, 29, 57).unwrap();
        let mut enc = Encoder::new();
        enc.put_time(Some(t));
        let mut dec = Decoder::new(enc.into_bytes());
        assert_eq!(dec.get_time().unwrap(), Some(t));
    }

    #[test]
    fn test_typed_values_and_params() {
        let params = ParamMap::new()
            .with("connect.timeout", 2000i64)
            .with("flag", true);

        let mut enc = Encoder::new();
        enc.put_params(&params);
        let bytes = enc.into_bytes();

        let mut expected = vec![0x02];
        expected.push(15);
        expected.extend_from_slice(b"connect.timeout");
        expected.push(TypedValue::LONG_TAG);
        expected.extend_from_slice(&2000i64.to_be_bytes());
        expected.push(4);
        expected.extend_from_slice(b"flag");
        expected.push(TypedValue::BOOLEAN_TAG);
        expected.push(0x01);
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_empty_params_is_null_byte() {
        let mut enc = Encoder::new();
        enc.put_params(&ParamMap::new());
        assert_eq!(enc.into_bytes().as_ref(), &[NULL_BYTE]);
    }

    #[test]
    fn test_param_map_insert_replaces() {
        let mut params = ParamMap::new();
        params.insert("a", 1i32);
        params.insert("a", 2i32);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("a"), Some(&TypedValue::Int(2)));
    }

    #[test]
    fn test_peek_size() {
        assert_eq!(peek_size(&[]).unwrap(), None);
        assert_eq!(peek_size(&[0x80]).unwrap(), None);
        assert_eq!(peek_size(&[0x05, 0xFF]).unwrap(), Some((5, 1)));
        assert_eq!(peek_size(&[0xAC, 0x02, 0x00]).unwrap(), Some((300, 2)));
    }

    #[test]
    fn test_codec_version() {
        assert_eq!(Codec::V1_0.version(), 256);
        assert_eq!(Codec::default().name(), "1.0");
    }

    proptest! {
        #[test]
        fn prop_size_roundtrip(value in 0u64..=u64::MAX >> 1) {
            let mut dec = Decoder::new(encode_size(value));
            prop_assert_eq!(dec.get_size().unwrap(), value);
            prop_assert!(!dec.has_remaining());
        }

        #[test]
        fn prop_nullable_size_roundtrip(value in 0u64..=u64::MAX >> 2) {
            let mut dec = Decoder::new(encode_nullable(value));
            prop_assert_eq!(dec.get_nullable_size().unwrap(), value);
            prop_assert!(!dec.has_remaining());
        }

        #[test]
        fn prop_time_roundtrip(millis in 0i64..4_102_444_800_000) {
            let t = Utc.timestamp_millis_opt(millis).unwrap();
            let ticks = time_to_ticks(Some(t));
            prop_assert_eq!(ticks_to_time(ticks).unwrap(), Some(t));
        }
    }
}
