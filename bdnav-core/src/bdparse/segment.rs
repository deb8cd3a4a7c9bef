//! Graphics segment framing shared by interactive and presentation graphics.
//!
//! A graphics PES payload is a run of segments: `type u8, length u16, body`.
//! Palettes and object bitmaps (run-length coded) have the same layout in
//! both stream kinds; compositions differ and live in `ig` / `pg`.

use serde::Serialize;

use super::{BitReader, ParseError, ParseResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SegmentType {
    /// PDS
    Palette,
    /// ODS
    Object,
    /// PCS
    PresentationComposition,
    /// WDS
    Window,
    /// ICS
    InteractiveComposition,
    End,
    Other(u8),
}

impl From<u8> for SegmentType {
    fn from(value: u8) -> Self {
        match value {
            0x14 => SegmentType::Palette,
            0x15 => SegmentType::Object,
            0x16 => SegmentType::PresentationComposition,
            0x17 => SegmentType::Window,
            0x18 => SegmentType::InteractiveComposition,
            0x80 => SegmentType::End,
            other => SegmentType::Other(other),
        }
    }
}

impl SegmentType {
    pub fn code(&self) -> u8 {
        match self {
            SegmentType::Palette => 0x14,
            SegmentType::Object => 0x15,
            SegmentType::PresentationComposition => 0x16,
            SegmentType::Window => 0x17,
            SegmentType::InteractiveComposition => 0x18,
            SegmentType::End => 0x80,
            SegmentType::Other(code) => *code,
        }
    }
}

/// One segment borrowed from a PES payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub kind: SegmentType,
    pub body: &'a [u8],
}

/// Split a PES payload into segments. A declared length running past the
/// payload is a format error.
pub fn split_segments(payload: &[u8]) -> ParseResult<Vec<Segment<'_>>> {
    let mut r = BitReader::new(payload);
    let mut segments = Vec::new();
    while r.remaining_bytes() >= 3 {
        let kind = SegmentType::from(r.read_u8()?);
        let len = r.read_u16()? as usize;
        let body = r.read_bytes(len)?;
        segments.push(Segment { kind, body });
    }
    Ok(segments)
}

// ============================================================================
// Palette (PDS)
// ============================================================================

/// YCrCb + transparency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PaletteEntry {
    pub y: u8,
    pub cr: u8,
    pub cb: u8,
    pub t: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Palette {
    pub id: u8,
    pub version: u8,
    /// Indexed by color id; entries not present in the segment stay fully transparent
    #[serde(skip)]
    pub entries: Box<[PaletteEntry; 256]>,
}

impl Palette {
    pub fn parse(body: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(body);
        let id = r.read_u8()?;
        let version = r.read_u8()?;
        let mut entries = Box::new([PaletteEntry::default(); 256]);
        while r.remaining_bytes() >= 5 {
            let index = r.read_u8()? as usize;
            entries[index] = PaletteEntry {
                y: r.read_u8()?,
                cr: r.read_u8()?,
                cb: r.read_u8()?,
                t: r.read_u8()?,
            };
        }
        Ok(Self {
            id,
            version,
            entries,
        })
    }
}

// ============================================================================
// Object (ODS)
// ============================================================================

/// One ODS segment. Large bitmaps are split across several segments;
/// only the first carries the dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFragment {
    pub id: u16,
    pub version: u8,
    pub first_in_seq: bool,
    pub last_in_seq: bool,
    /// Total RLE length (first fragment only)
    pub data_len: u32,
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

impl ObjectFragment {
    pub fn parse(body: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(body);
        let id = r.read_u16()?;
        let version = r.read_u8()?;
        let first_in_seq = r.read_bool()?;
        let last_in_seq = r.read_bool()?;
        r.skip_bits(6)?;

        let (mut data_len, mut width, mut height) = (0, 0, 0);
        if first_in_seq {
            // the declared length counts the 4 dimension bytes
            data_len = r.read_bits(24)?.saturating_sub(4);
            width = r.read_u16()?;
            height = r.read_u16()?;
        }
        let data = r.read_bytes(r.remaining_bytes())?.to_vec();

        Ok(Self {
            id,
            version,
            first_in_seq,
            last_in_seq,
            data_len,
            width,
            height,
            data,
        })
    }
}

/// A run of `len` pixels of palette index `color`; `len == 0` ends a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RleRun {
    pub len: u16,
    pub color: u8,
}

impl RleRun {
    pub const END_OF_LINE: RleRun = RleRun { len: 0, color: 0 };

    pub fn is_end_of_line(&self) -> bool {
        self.len == 0
    }
}

/// A complete, decoded object bitmap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectDefinition {
    pub id: u16,
    pub version: u8,
    pub width: u16,
    pub height: u16,
    #[serde(skip)]
    pub rle: Vec<RleRun>,
}

impl ObjectDefinition {
    /// Expand to palette indices, one byte per pixel
    pub fn to_indexed(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut out = vec![0u8; w * h];
        let (mut x, mut y) = (0usize, 0usize);
        for run in &self.rle {
            if run.is_end_of_line() {
                x = 0;
                y += 1;
                continue;
            }
            if y >= h {
                break;
            }
            let end = (x + run.len as usize).min(w);
            if x < end {
                out[y * w + x..y * w + end].fill(run.color);
            }
            x = end;
        }
        out
    }
}

/// Decode a PG/IG run-length coded bitmap.
pub fn decode_rle(data: &[u8]) -> ParseResult<Vec<RleRun>> {
    let mut r = BitReader::new(data);
    let mut runs = Vec::with_capacity(data.len() / 2);
    while r.remaining_bytes() > 0 {
        let byte = r.read_u8()?;
        if byte != 0 {
            runs.push(RleRun { len: 1, color: byte });
            continue;
        }
        let flags = r.read_u8()?;
        if flags == 0 {
            runs.push(RleRun::END_OF_LINE);
            continue;
        }
        let len = if flags & 0x40 != 0 {
            (((flags & 0x3F) as u16) << 8) | r.read_u8()? as u16
        } else {
            (flags & 0x3F) as u16
        };
        let color = if flags & 0x80 != 0 { r.read_u8()? } else { 0 };
        if len == 0 {
            return Err(ParseError::Invalid {
                what: "zero-length rle run",
                value: r.byte_pos() as u32,
            });
        }
        runs.push(RleRun { len, color });
    }
    Ok(runs)
}

/// Collects ODS fragments until the last one of a sequence arrives.
#[derive(Debug, Default)]
pub struct ObjectAssembler {
    pending: Option<ObjectFragment>,
}

impl ObjectAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the finished object on the last fragment.
    pub fn push(&mut self, fragment: ObjectFragment) -> ParseResult<Option<ObjectDefinition>> {
        let mut current = if fragment.first_in_seq {
            if self.pending.is_some() {
                tracing::debug!("object {} restarted before completion", fragment.id);
            }
            fragment
        } else {
            match self.pending.take() {
                Some(mut acc) if acc.id == fragment.id => {
                    acc.data.extend_from_slice(&fragment.data);
                    acc.last_in_seq = fragment.last_in_seq;
                    acc
                }
                _ => {
                    return Err(ParseError::Invalid {
                        what: "object continuation without start, id",
                        value: fragment.id as u32,
                    })
                }
            }
        };

        if !current.last_in_seq {
            self.pending = Some(current);
            return Ok(None);
        }

        if (current.data.len() as u32) < current.data_len {
            return Err(ParseError::Truncated {
                needed: current.data_len as usize * 8,
                at: 0,
                available: current.data.len() * 8,
            });
        }
        current.data.truncate(current.data_len as usize);
        let rle = decode_rle(&current.data)?;
        Ok(Some(ObjectDefinition {
            id: current.id,
            version: current.version,
            width: current.width,
            height: current.height,
            rle,
        }))
    }

    pub fn reset(&mut self) {
        self.pending = None;
    }
}

// ============================================================================
// Composition objects / windows (shared by PCS, WDS and IG effects)
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x
            && y >= self.y
            && (x as u32) < self.x as u32 + self.width as u32
            && (y as u32) < self.y as u32 + self.height as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompositionObject {
    pub object_id_ref: u16,
    pub window_id_ref: u8,
    pub forced_on: bool,
    pub x: u16,
    pub y: u16,
    pub crop: Option<Rect>,
}

impl CompositionObject {
    pub fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let object_id_ref = r.read_u16()?;
        let window_id_ref = r.read_u8()?;
        let cropped = r.read_bool()?;
        let forced_on = r.read_bool()?;
        r.skip_bits(6)?;
        let x = r.read_u16()?;
        let y = r.read_u16()?;
        let crop = if cropped {
            Some(parse_rect(r)?)
        } else {
            None
        };
        Ok(Self {
            object_id_ref,
            window_id_ref,
            forced_on,
            x,
            y,
            crop,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub id: u8,
    pub area: Rect,
}

impl Window {
    pub fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        Ok(Self {
            id: r.read_u8()?,
            area: parse_rect(r)?,
        })
    }
}

pub(crate) fn parse_rect(r: &mut BitReader<'_>) -> ParseResult<Rect> {
    Ok(Rect {
        x: r.read_u16()?,
        y: r.read_u16()?,
        width: r.read_u16()?,
        height: r.read_u16()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_segments_and_rejects_overrun() {
        let payload = [0x14, 0x00, 0x02, 0xAA, 0xBB, 0x80, 0x00, 0x00];
        let segs = split_segments(&payload).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].kind, SegmentType::Palette);
        assert_eq!(segs[0].body, &[0xAA, 0xBB]);
        assert_eq!(segs[1].kind, SegmentType::End);

        let bad = [0x15, 0x00, 0x10, 0x01];
        assert!(split_segments(&bad).is_err());
    }

    #[test]
    fn decodes_all_rle_forms() {
        // single pixel 7, 5 zeros, 300 x color 9, 3 x color 2, end of line
        let data = [7, 0x00, 0x05, 0x00, 0xC1, 0x2C, 9, 0x00, 0x83, 2, 0x00, 0x00];
        let runs = decode_rle(&data).unwrap();
        assert_eq!(
            runs,
            vec![
                RleRun { len: 1, color: 7 },
                RleRun { len: 5, color: 0 },
                RleRun { len: 300, color: 9 },
                RleRun { len: 3, color: 2 },
                RleRun::END_OF_LINE,
            ]
        );
    }

    #[test]
    fn truncated_rle_is_an_error() {
        assert!(decode_rle(&[0x00, 0xC1]).is_err());
    }

    #[test]
    fn assembles_fragmented_object() {
        // 2x2 bitmap: "1 1 EOL 2 2 EOL" split after the first line
        let line1 = vec![1u8, 1, 0, 0];
        let line2 = vec![2u8, 2, 0, 0];
        let mut asm = ObjectAssembler::new();
        let first = ObjectFragment {
            id: 3,
            version: 0,
            first_in_seq: true,
            last_in_seq: false,
            data_len: 8,
            width: 2,
            height: 2,
            data: line1,
        };
        assert_eq!(asm.push(first).unwrap(), None);
        let last = ObjectFragment {
            id: 3,
            version: 0,
            first_in_seq: false,
            last_in_seq: true,
            data_len: 0,
            width: 0,
            height: 0,
            data: line2,
        };
        let obj = asm.push(last).unwrap().expect("complete object");
        assert_eq!((obj.width, obj.height), (2, 2));
        assert_eq!(obj.to_indexed(), vec![1, 1, 2, 2]);
    }

    #[test]
    fn orphan_continuation_is_rejected() {
        let mut asm = ObjectAssembler::new();
        let frag = ObjectFragment {
            id: 1,
            version: 0,
            first_in_seq: false,
            last_in_seq: true,
            data_len: 0,
            width: 0,
            height: 0,
            data: vec![],
        };
        assert!(asm.push(frag).is_err());
    }

    #[test]
    fn parses_ods_header() {
        // id 5, version 1, first+last, len 4+2, 1x1, rle "7 EOL"
        let body = [0x00, 0x05, 0x01, 0xC0, 0x00, 0x00, 0x07, 0x00, 0x01, 0x00, 0x01, 7, 0x00, 0x00];
        let frag = ObjectFragment::parse(&body).unwrap();
        assert!(frag.first_in_seq && frag.last_in_seq);
        assert_eq!(frag.data_len, 3);
        assert_eq!((frag.width, frag.height), (1, 1));
        let obj = ObjectAssembler::new().push(frag).unwrap().unwrap();
        assert_eq!(obj.rle, vec![RleRun { len: 1, color: 7 }, RleRun::END_OF_LINE]);
    }

    #[test]
    fn parses_palette_entries() {
        let body = [0x02, 0x00, 0x05, 16, 128, 128, 255];
        let pal = Palette::parse(&body).unwrap();
        assert_eq!(pal.id, 2);
        assert_eq!(pal.entries[5], PaletteEntry { y: 16, cr: 128, cb: 128, t: 255 });
        assert_eq!(pal.entries[0].t, 0);
    }
}
