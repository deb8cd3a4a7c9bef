//! Blu-ray container parsers
//!
//! Pure functions from bytes to immutable trees:
//! - `index.bdmv` (disc index)
//! - `MovieObject.bdmv` (HDMV navigation programs)
//! - `*.mpls` (playlists)
//! - `*.clpi` (clip information, EP map)
//! - interactive / presentation graphics segments carried in the transport stream
//!   (`segment` framing, `ig` menus, `pg` subtitles)
//!
//! All multi-byte fields are big-endian. Declared lengths are never trusted
//! beyond the real buffer size.

pub mod clpi;
pub mod ig;
pub mod index;
pub mod mobj;
pub mod mpls;
pub mod pg;
pub mod segment;
pub mod stream_attrs;

use bytes::Buf;
use thiserror::Error;

/// Container format errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("truncated data: needed {needed} bits at bit offset {at}, {available} available")]
    Truncated {
        needed: usize,
        at: usize,
        available: usize,
    },

    #[error("bad signature {found:?}, expected {expected:?}")]
    BadSignature { expected: &'static str, found: String },

    #[error("unsupported version {0:?}")]
    UnsupportedVersion(String),

    #[error("invalid {what}: {value}")]
    Invalid { what: &'static str, value: u32 },

    #[error("offset {offset} outside of {len} byte buffer")]
    OffsetOutOfRange { offset: usize, len: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Versions accepted for all BDMV files
pub const KNOWN_VERSIONS: [&str; 3] = ["0100", "0200", "0300"];

// ============================================================================
// Bit Reader
// ============================================================================

/// Bounds-checked big-endian bit reader over a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Position in bits
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current byte offset (rounded down)
    pub fn byte_pos(&self) -> usize {
        self.pos / 8
    }

    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    pub fn remaining_bytes(&self) -> usize {
        self.remaining_bits() / 8
    }

    fn ensure(&self, bits: usize) -> ParseResult<()> {
        let available = self.remaining_bits();
        if bits > available {
            return Err(ParseError::Truncated {
                needed: bits,
                at: self.pos,
                available,
            });
        }
        Ok(())
    }

    /// Jump to an absolute byte offset
    pub fn seek_byte(&mut self, offset: usize) -> ParseResult<()> {
        if offset > self.data.len() {
            return Err(ParseError::OffsetOutOfRange {
                offset,
                len: self.data.len(),
            });
        }
        self.pos = offset * 8;
        Ok(())
    }

    pub fn skip_bits(&mut self, bits: usize) -> ParseResult<()> {
        self.ensure(bits)?;
        self.pos += bits;
        Ok(())
    }

    pub fn skip_bytes(&mut self, bytes: usize) -> ParseResult<()> {
        self.skip_bits(bytes * 8)
    }

    /// Read up to 32 bits
    pub fn read_bits(&mut self, bits: usize) -> ParseResult<u32> {
        debug_assert!(bits <= 32);
        self.ensure(bits)?;

        if self.pos % 8 == 0 && bits % 8 == 0 {
            let mut cursor = &self.data[self.pos / 8..];
            self.pos += bits;
            return Ok(match bits {
                0 => 0,
                8 => cursor.get_u8() as u32,
                16 => cursor.get_u16() as u32,
                24 => cursor.get_uint(3) as u32,
                _ => cursor.get_u32(),
            });
        }

        let mut value: u64 = 0;
        for _ in 0..bits {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | bit as u64;
            self.pos += 1;
        }
        Ok(value as u32)
    }

    /// Read up to 64 bits
    pub fn read_bits64(&mut self, bits: usize) -> ParseResult<u64> {
        if bits <= 32 {
            return self.read_bits(bits).map(u64::from);
        }
        let hi = self.read_bits(bits - 32)? as u64;
        let lo = self.read_bits(32)? as u64;
        Ok((hi << 32) | lo)
    }

    pub fn read_bool(&mut self) -> ParseResult<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn read_u8(&mut self) -> ParseResult<u8> {
        self.read_bits(8).map(|v| v as u8)
    }

    pub fn read_u16(&mut self) -> ParseResult<u16> {
        self.read_bits(16).map(|v| v as u16)
    }

    pub fn read_u32(&mut self) -> ParseResult<u32> {
        self.read_bits(32)
    }

    /// Read raw bytes. The reader must be byte aligned.
    pub fn read_bytes(&mut self, len: usize) -> ParseResult<&'a [u8]> {
        if self.pos % 8 != 0 {
            return Err(ParseError::Invalid {
                what: "unaligned byte read at bit",
                value: self.pos as u32,
            });
        }
        self.ensure(len * 8)?;
        let start = self.pos / 8;
        self.pos += len * 8;
        Ok(&self.data[start..start + len])
    }

    /// Fixed-length ASCII code (clip ids, language codes), NUL/space padding trimmed
    pub fn read_code(&mut self, len: usize) -> ParseResult<String> {
        let raw = self.read_bytes(len)?;
        let text: String = raw
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { ' ' })
            .collect();
        Ok(text.trim_end_matches([' ', '\0']).to_string())
    }
}

/// Check the 4-byte type indicator and 4-byte version of a BDMV file.
pub(crate) fn read_header(r: &mut BitReader<'_>, signature: &'static str) -> ParseResult<String> {
    let sig = r.read_bytes(4)?;
    if sig != signature.as_bytes() {
        return Err(ParseError::BadSignature {
            expected: signature,
            found: String::from_utf8_lossy(sig).into_owned(),
        });
    }
    let version = String::from_utf8_lossy(r.read_bytes(4)?).into_owned();
    if !KNOWN_VERSIONS.contains(&version.as_str()) {
        return Err(ParseError::UnsupportedVersion(version));
    }
    Ok(version)
}

/// Validate an absolute section offset taken from a file header.
pub(crate) fn section_offset(r: &BitReader<'_>, offset: u32) -> ParseResult<usize> {
    let offset = offset as usize;
    if offset > r.len() {
        return Err(ParseError::OffsetOutOfRange {
            offset,
            len: r.len(),
        });
    }
    Ok(offset)
}
