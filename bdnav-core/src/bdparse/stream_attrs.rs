//! Stream coding attributes shared by playlists (STN table) and clip info (program info).

use serde::Serialize;

use super::{BitReader, ParseResult};

// Stream coding types
pub const CODING_MPEG1_VIDEO: u8 = 0x01;
pub const CODING_MPEG2_VIDEO: u8 = 0x02;
pub const CODING_MPEG1_AUDIO: u8 = 0x03;
pub const CODING_MPEG2_AUDIO: u8 = 0x04;
pub const CODING_H264: u8 = 0x1B;
pub const CODING_H264_MVC: u8 = 0x20;
pub const CODING_HEVC: u8 = 0x24;
pub const CODING_VC1: u8 = 0xEA;
pub const CODING_LPCM: u8 = 0x80;
pub const CODING_AC3: u8 = 0x81;
pub const CODING_DTS: u8 = 0x82;
pub const CODING_TRUEHD: u8 = 0x83;
pub const CODING_AC3_PLUS: u8 = 0x84;
pub const CODING_DTS_HD: u8 = 0x85;
pub const CODING_DTS_HD_MASTER: u8 = 0x86;
pub const CODING_AC3_PLUS_SECONDARY: u8 = 0xA1;
pub const CODING_DTS_HD_SECONDARY: u8 = 0xA2;
pub const CODING_PG: u8 = 0x90;
pub const CODING_IG: u8 = 0x91;
pub const CODING_TEXT_SUBTITLE: u8 = 0x92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamKind {
    Video,
    Audio,
    PresentationGraphics,
    InteractiveGraphics,
    TextSubtitle,
    Unknown,
}

impl StreamKind {
    pub fn from_coding_type(coding_type: u8) -> Self {
        match coding_type {
            CODING_MPEG1_VIDEO | CODING_MPEG2_VIDEO | CODING_H264 | CODING_H264_MVC
            | CODING_HEVC | CODING_VC1 => Self::Video,
            CODING_MPEG1_AUDIO | CODING_MPEG2_AUDIO | CODING_LPCM | CODING_AC3 | CODING_DTS
            | CODING_TRUEHD | CODING_AC3_PLUS | CODING_DTS_HD | CODING_DTS_HD_MASTER
            | CODING_AC3_PLUS_SECONDARY | CODING_DTS_HD_SECONDARY => Self::Audio,
            CODING_PG => Self::PresentationGraphics,
            CODING_IG => Self::InteractiveGraphics,
            CODING_TEXT_SUBTITLE => Self::TextSubtitle,
            _ => Self::Unknown,
        }
    }
}

/// Coding attributes of one elementary stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamAttrs {
    pub coding_type: u8,
    /// Video format / audio channel layout
    pub format: u8,
    /// Frame rate / sample rate code
    pub rate: u8,
    /// Text subtitle character code
    pub char_code: u8,
    /// ISO 639-2 language, empty for video
    pub lang: String,
    pub dynamic_range: u8,
}

impl StreamAttrs {
    pub fn kind(&self) -> StreamKind {
        StreamKind::from_coding_type(self.coding_type)
    }

    /// Parse a length-prefixed attribute block; trailing bytes are skipped.
    pub fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let len = r.read_u8()? as usize;
        let start = r.byte_pos();
        let mut attrs = StreamAttrs::default();

        if len == 0 {
            return Ok(attrs);
        }

        attrs.coding_type = r.read_u8()?;
        match attrs.kind() {
            StreamKind::Video => {
                attrs.format = r.read_bits(4)? as u8;
                attrs.rate = r.read_bits(4)? as u8;
                if attrs.coding_type == CODING_HEVC {
                    attrs.dynamic_range = r.read_bits(4)? as u8;
                }
            }
            StreamKind::Audio => {
                attrs.format = r.read_bits(4)? as u8;
                attrs.rate = r.read_bits(4)? as u8;
                attrs.lang = r.read_code(3)?;
            }
            StreamKind::PresentationGraphics | StreamKind::InteractiveGraphics => {
                attrs.lang = r.read_code(3)?;
            }
            StreamKind::TextSubtitle => {
                attrs.char_code = r.read_u8()?;
                attrs.lang = r.read_code(3)?;
            }
            StreamKind::Unknown => {
                tracing::debug!("unrecognized stream coding type 0x{:02x}", attrs.coding_type);
            }
        }

        r.seek_byte(start + len)?;
        Ok(attrs)
    }
}
