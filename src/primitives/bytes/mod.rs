#![forbid(unsafe_code)]
//! Encoding, varint, and cursor utilities for edge keys and staged values.
//!
//! Decoders here never panic: staged values are read back from storage after
//! a crash and must fail with a decode error instead.

pub mod ord {
    //! Order-preserving encoders for fixed-width key fields.

    use core::convert::TryInto;

    const SIGN_BIT_64: u64 = 1 << 63;
    const SIGN_BIT_32: u32 = 1 << 31;

    /// Appends a big-endian u32.
    pub fn push_u32_be(dst: &mut Vec<u8>, v: u32) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Decodes a big-endian u32 from the head of `src`.
    pub fn get_u32_be(src: &[u8]) -> Option<u32> {
        let head: [u8; 4] = src.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(head))
    }

    /// Appends an i32 with the sign bit flipped so negative values sort first.
    pub fn push_i32_be(dst: &mut Vec<u8>, v: i32) {
        push_u32_be(dst, (v as u32) ^ SIGN_BIT_32);
    }

    /// Decodes an order-preserving i32.
    pub fn get_i32_be(src: &[u8]) -> Option<i32> {
        get_u32_be(src).map(|raw| (raw ^ SIGN_BIT_32) as i32)
    }

    /// Appends an i64 with the sign bit flipped so negative values sort first.
    pub fn push_i64_be(dst: &mut Vec<u8>, v: i64) {
        dst.extend_from_slice(&((v as u64) ^ SIGN_BIT_64).to_be_bytes());
    }

    /// Decodes an order-preserving i64.
    pub fn get_i64_be(src: &[u8]) -> Option<i64> {
        let head: [u8; 8] = src.get(..8)?.try_into().ok()?;
        Some((u64::from_be_bytes(head) ^ SIGN_BIT_64) as i64)
    }

    /// Appends `bytes` zero padded to `width`. Returns false when `bytes` is wider.
    pub fn push_padded(dst: &mut Vec<u8>, bytes: &[u8], width: usize) -> bool {
        if bytes.len() > width {
            return false;
        }
        dst.extend_from_slice(bytes);
        dst.resize(dst.len() + (width - bytes.len()), 0);
        true
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Option<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src.get(*off)?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return None;
            }
            result |= payload << shift;
            if (byte & 0x80) == 0 {
                return Some(result);
            }
            shift += 7;
        }
        None
    }

    /// Encodes an i64 as a ZigZag-encoded varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        encode_u64(zigzag, out);
    }

    /// Decodes a ZigZag-encoded i64 varint from a slice, updating the offset.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Option<i64> {
        let zigzag = decode_u64(src, off)?;
        Some(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }

    /// Appends a varint length prefix followed by the bytes.
    pub fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
        encode_u64(bytes.len() as u64, out);
        out.extend_from_slice(bytes);
    }
}

pub mod buf {
    //! A slice-backed cursor for parsing staged values.

    use core::fmt;

    use super::var;
    use crate::error::{ChainError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .filter(|end| *end <= self.buf.len())
                .ok_or(ChainError::Decode("value truncated"))?;
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads an unsigned varint.
        pub fn varint(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off).ok_or(ChainError::Decode("bad varint"))
        }

        /// Reads a ZigZag varint.
        pub fn zigzag(&mut self) -> Result<i64> {
            var::decode_i64(self.buf, &mut self.off).ok_or(ChainError::Decode("bad varint"))
        }

        /// Reads a varint length prefix and that many bytes.
        pub fn bytes(&mut self) -> Result<&'a [u8]> {
            let len = usize::try_from(self.varint()?)
                .map_err(|_| ChainError::Decode("length overflow"))?;
            self.take(len)
        }

        /// Reads a length-prefixed UTF-8 string.
        pub fn string(&mut self) -> Result<String> {
            let raw = self.bytes()?;
            std::str::from_utf8(raw)
                .map(str::to_owned)
                .map_err(|_| ChainError::Decode("string not valid UTF-8"))
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Fails unless every byte was consumed.
        pub fn finish(self) -> Result<()> {
            if self.remaining() != 0 {
                return Err(ChainError::Decode("trailing bytes"));
            }
            Ok(())
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
