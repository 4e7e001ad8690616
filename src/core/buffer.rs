//! Big-endian primitive codec over in-memory byte buffers
//!
//! [`RBuffer`] and [`WBuffer`] carry a cursor and the first error they hit.
//! After an error every further read or write is a no-op that keeps the
//! original error, so a long run of field accesses can be checked once with
//! [`RBuffer::err`] / [`WBuffer::err`] at the end.
//!
//! Both buffers carry a displacement: the absolute position of byte 0 inside
//! the enclosing record. Object references in streamed payloads are expressed
//! relative to the start of the key record, not to the payload slice.

use crate::error::{Result, RootError};

/// Length marker announcing a 4-byte string length
const LONG_STRING: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Overrun {
    pos: usize,
    need: usize,
    len: usize,
}

impl From<Overrun> for RootError {
    fn from(o: Overrun) -> Self {
        RootError::BufferOverrun {
            pos: o.pos,
            need: o.need,
            len: o.len,
        }
    }
}

/// Number of bytes a length-prefixed string occupies on disk
pub fn tstring_sizeof(s: &str) -> i32 {
    let n = s.len() as i32;
    if n < LONG_STRING as i32 {
        n + 1
    } else {
        n + 5
    }
}

/// Read cursor over a borrowed byte slice
#[derive(Debug)]
pub struct RBuffer<'a> {
    data: &'a [u8],
    pos: usize,
    offset: i64,
    err: Option<Overrun>,
}

macro_rules! read_be {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> $ty {
            const N: usize = std::mem::size_of::<$ty>();
            match self.take(N) {
                Some(b) => {
                    let mut raw = [0u8; N];
                    raw.copy_from_slice(b);
                    <$ty>::from_be_bytes(raw)
                }
                None => 0,
            }
        }
    };
}

impl<'a> RBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_offset(data, 0)
    }

    /// Buffer whose first byte sits at absolute position `offset`
    pub fn with_offset(data: &'a [u8], offset: i64) -> Self {
        RBuffer {
            data,
            pos: 0,
            offset,
            err: None,
        }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.err.is_some() {
            return None;
        }
        if self.data.len() - self.pos < n {
            self.err = Some(Overrun {
                pos: self.pos,
                need: n,
                len: self.data.len(),
            });
            return None;
        }
        let b = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(b)
    }

    read_be!(read_u8, u8);
    read_be!(read_i8, i8);
    read_be!(read_u16, u16);
    read_be!(read_i16, i16);
    read_be!(read_u32, u32);
    read_be!(read_i32, i32);
    read_be!(read_u64, u64);
    read_be!(read_i64, i64);

    /// Read `n` raw bytes (empty once the buffer is in error)
    pub fn read_bytes(&mut self, n: usize) -> &'a [u8] {
        self.take(n).unwrap_or(&[])
    }

    pub fn read_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(b) = self.take(N) {
            out.copy_from_slice(b);
        }
        out
    }

    /// Length-prefixed string: 1-byte length, or 255 followed by a 4-byte length
    pub fn read_string(&mut self) -> String {
        let mut n = self.read_u8() as usize;
        if n == LONG_STRING as usize {
            n = self.read_i32().max(0) as usize;
        }
        String::from_utf8_lossy(self.read_bytes(n)).into_owned()
    }

    /// NUL-terminated string of at most `max` bytes
    pub fn read_cstring(&mut self, max: usize) -> String {
        if self.err.is_some() {
            return String::new();
        }
        let rest = &self.data[self.pos..];
        let limit = rest.len().min(max);
        match rest[..limit].iter().position(|&b| b == 0) {
            Some(n) => {
                let s = String::from_utf8_lossy(&rest[..n]).into_owned();
                self.pos += n + 1;
                s
            }
            None => {
                let s = String::from_utf8_lossy(&rest[..limit]).into_owned();
                self.pos += limit;
                s
            }
        }
    }

    pub fn skip(&mut self, n: usize) {
        self.take(n);
    }

    /// Cursor relative to the slice
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Cursor including the displacement
    pub fn abs_pos(&self) -> i64 {
        self.pos as i64 + self.offset
    }

    pub fn set_pos(&mut self, pos: usize) {
        if self.err.is_some() {
            return;
        }
        if pos > self.data.len() {
            self.err = Some(Overrun {
                pos: self.pos,
                need: pos - self.pos,
                len: self.data.len(),
            });
            return;
        }
        self.pos = pos;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// First error hit by this buffer, if any
    pub fn err(&self) -> Result<()> {
        match self.err {
            Some(o) => Err(o.into()),
            None => Ok(()),
        }
    }
}

/// Write cursor over an owned, optionally bounded, byte vector
#[derive(Debug, Default)]
pub struct WBuffer {
    buf: Vec<u8>,
    limit: Option<usize>,
    offset: i64,
    err: Option<Overrun>,
}

macro_rules! write_be {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, v: $ty) {
            self.put(&v.to_be_bytes());
        }
    };
}

impl WBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unbounded buffer whose first byte sits at absolute position `offset`
    pub fn with_offset(offset: i64) -> Self {
        WBuffer {
            offset,
            ..Self::default()
        }
    }

    /// Buffer that refuses to grow past `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        WBuffer {
            buf: Vec::with_capacity(limit),
            limit: Some(limit),
            ..Self::default()
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        if self.err.is_some() {
            return;
        }
        if let Some(limit) = self.limit {
            if self.buf.len() + bytes.len() > limit {
                self.err = Some(Overrun {
                    pos: self.buf.len(),
                    need: bytes.len(),
                    len: limit,
                });
                return;
            }
        }
        self.buf.extend_from_slice(bytes);
    }

    write_be!(write_u8, u8);
    write_be!(write_i8, i8);
    write_be!(write_u16, u16);
    write_be!(write_i16, i16);
    write_be!(write_u32, u32);
    write_be!(write_i32, i32);
    write_be!(write_u64, u64);
    write_be!(write_i64, i64);

    pub fn write_bytes(&mut self, b: &[u8]) {
        self.put(b);
    }

    pub fn write_string(&mut self, s: &str) {
        let n = s.len();
        if n < LONG_STRING as usize {
            self.write_u8(n as u8);
        } else {
            self.write_u8(LONG_STRING);
            self.write_i32(n as i32);
        }
        self.put(s.as_bytes());
    }

    pub fn write_cstring(&mut self, s: &str) {
        self.put(s.as_bytes());
        self.write_u8(0);
    }

    /// Overwrite four already-written bytes at `pos` (byte-count back-patching)
    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        if self.err.is_some() {
            return;
        }
        if pos + 4 > self.buf.len() {
            self.err = Some(Overrun {
                pos,
                need: 4,
                len: self.buf.len(),
            });
            return;
        }
        self.buf[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// Pad with zeros up to `len` bytes
    pub fn pad_to(&mut self, len: usize) {
        if self.buf.len() < len {
            let zeros = vec![0u8; len - self.buf.len()];
            self.put(&zeros);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn abs_pos(&self) -> i64 {
        self.buf.len() as i64 + self.offset
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn err(&self) -> Result<()> {
        match self.err {
            Some(o) => Err(o.into()),
            None => Ok(()),
        }
    }

    /// Written bytes, or the first error hit while writing them
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        self.err()?;
        Ok(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_reads() {
        let data = [0x00, 0x00, 0xEC, 0xB8, 0xFF, 0xFE, 0x01];
        let mut r = RBuffer::new(&data);

        assert_eq!(r.read_i32(), 60600);
        assert_eq!(r.read_i16(), -2);
        assert_eq!(r.read_u8(), 1);
        assert!(r.err().is_ok());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_sticky_read_error() {
        let data = [0x00, 0x01, 0x02];
        let mut r = RBuffer::new(&data);

        assert_eq!(r.read_u16(), 1);
        assert_eq!(r.read_i32(), 0); // only one byte left
        assert_eq!(r.pos(), 2);

        // Further reads are no-ops even though a byte is still available
        assert_eq!(r.read_u8(), 0);
        assert_eq!(r.pos(), 2);
        assert!(r.read_bytes(1).is_empty());

        match r.err() {
            Err(RootError::BufferOverrun { pos, need, len }) => {
                assert_eq!((pos, need, len), (2, 4, 3));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // The same error is reported every time
        assert!(matches!(r.err(), Err(RootError::BufferOverrun { pos: 2, .. })));
    }

    #[test]
    fn test_strings() {
        let mut w = WBuffer::new();
        w.write_string("hello");
        w.write_cstring("TList");
        let long = "x".repeat(300);
        w.write_string(&long);
        let bytes = w.into_bytes().unwrap();

        assert_eq!(bytes[0], 5);
        assert_eq!(bytes.len() as i32, tstring_sizeof("hello") + 6 + tstring_sizeof(&long));

        let mut r = RBuffer::new(&bytes);
        assert_eq!(r.read_string(), "hello");
        assert_eq!(r.read_cstring(80), "TList");
        assert_eq!(r.read_string(), long);
        assert!(r.err().is_ok());
    }

    #[test]
    fn test_bounded_write_is_sticky() {
        let mut w = WBuffer::with_limit(6);
        w.write_i32(7);
        w.write_i32(8); // does not fit
        w.write_u8(1); // would fit, but the buffer is already in error

        assert_eq!(w.len(), 4);
        assert!(matches!(w.err(), Err(RootError::BufferOverrun { pos: 4, need: 4, len: 6 })));
        assert!(w.into_bytes().is_err());
    }

    #[test]
    fn test_patch_and_displacement() {
        let mut w = WBuffer::with_offset(40);
        w.write_u32(0);
        w.write_i16(3);
        assert_eq!(w.abs_pos(), 46);
        w.patch_u32(0, 0x4000_0002);
        let bytes = w.into_bytes().unwrap();

        let mut r = RBuffer::with_offset(&bytes, 40);
        assert_eq!(r.abs_pos(), 40);
        assert_eq!(r.read_u32(), 0x4000_0002);
        assert_eq!(r.read_i16(), 3);
    }
}
