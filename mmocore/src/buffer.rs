//! Typed cursors over packet byte regions
//!
//! [`PacketReader`] and [`PacketWriter`] are the codec every packet type
//! decodes from and encodes into. The primitive shapes follow the wire
//! conventions of the protocol: `C` (1 byte), `H` (2 bytes LE), `D`
//! (4 bytes LE), `Q` (8 bytes LE), `S` (null-terminated UTF-16LE text)
//! and `B` (raw byte blocks).
//!
//! Cursors only ever advance. A read that needs more bytes than remain
//! fails with [`PacketError::BufferUnderflow`]; callers must treat that as
//! a corrupt or incomplete frame, never as an empty value.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::PacketError;

/// Forward-only read cursor over a framed payload.
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PacketReader { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        if self.remaining() < n {
            return Err(PacketError::underflow(n, self.remaining()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, PacketError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16, PacketError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, PacketError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64, PacketError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i64(&mut self) -> Result<i64, PacketError> {
        Ok(self.read_u64()? as i64)
    }

    /// Reads a null-terminated UTF-16LE string.
    pub fn read_string(&mut self) -> Result<String, PacketError> {
        let mut units = Vec::new();
        loop {
            let unit = self.read_u16().map_err(|_| {
                PacketError::Decode("unterminated string field".to_string())
            })?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units)
            .map_err(|_| PacketError::Decode("invalid UTF-16 in string field".to_string()))
    }

    /// Reads a raw byte block of caller-specified length.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        self.take(n)
    }
}

/// Append-only write cursor producing a framed payload.
///
/// The backing region grows as needed; [`PacketWriter::into_bytes`]
/// freezes the accumulated payload for enqueueing.
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        PacketWriter {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    /// Writes a null-terminated UTF-16LE string.
    pub fn write_string(&mut self, s: &str) {
        for unit in s.encode_utf16() {
            self.buf.put_u16_le(unit);
        }
        self.buf.put_u16_le(0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives_little_endian() {
        let data = [0x2A, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let mut r = PacketReader::new(&data);
        assert_eq!(r.read_u8().unwrap(), 0x2A);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0x12345678);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_every_primitive_underflows_on_short_input() {
        assert!(matches!(
            PacketReader::new(&[]).read_u8(),
            Err(PacketError::BufferUnderflow { .. })
        ));
        assert!(matches!(
            PacketReader::new(&[1]).read_u16(),
            Err(PacketError::BufferUnderflow { .. })
        ));
        assert!(matches!(
            PacketReader::new(&[1, 2, 3]).read_u32(),
            Err(PacketError::BufferUnderflow { .. })
        ));
        assert!(matches!(
            PacketReader::new(&[1, 2, 3, 4, 5, 6, 7]).read_u64(),
            Err(PacketError::BufferUnderflow { .. })
        ));
        assert!(matches!(
            PacketReader::new(&[1, 2]).read_bytes(3),
            Err(PacketError::BufferUnderflow { .. })
        ));
    }

    #[test]
    fn test_string_round_trip() {
        let mut w = PacketWriter::new();
        w.write_string("Alice");
        w.write_u8(7);
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "Alice");
        assert_eq!(r.read_u8().unwrap(), 7);
    }

    #[test]
    fn test_unterminated_string_is_decode_error() {
        // "ab" with no terminator
        let data = [0x61, 0x00, 0x62, 0x00];
        let mut r = PacketReader::new(&data);
        assert!(matches!(r.read_string(), Err(PacketError::Decode(_))));
    }

    #[test]
    fn test_no_implicit_seeking() {
        let data = [1, 2, 3, 4];
        let mut r = PacketReader::new(&data);
        assert_eq!(r.read_bytes(2).unwrap(), &[1, 2]);
        // cursor only moves forward
        assert_eq!(r.read_bytes(2).unwrap(), &[3, 4]);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_writer_grows_and_signed_round_trip() {
        let mut w = PacketWriter::new();
        w.write_i8(-1);
        w.write_i16(-2);
        w.write_i32(-3);
        w.write_i64(-4);
        w.write_bytes(&[0xAB; 100]);
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_i8().unwrap(), -1);
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_i32().unwrap(), -3);
        assert_eq!(r.read_i64().unwrap(), -4);
        assert_eq!(r.read_bytes(100).unwrap(), &[0xAB; 100][..]);
    }
}
