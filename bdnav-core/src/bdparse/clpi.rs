//! `*.clpi` clip information parser
//!
//! Clip info maps presentation time to source packet numbers through the
//! CPI entry-point (EP) map. Coarse and fine EP entries are combined at parse
//! time into a flat, ordered list of access points.

use serde::Serialize;

use super::stream_attrs::StreamAttrs;
use super::{read_header, section_offset, BitReader, ParseResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClipMeta {
    pub clip_stream_type: u8,
    pub application_type: u8,
    pub is_atc_delta: bool,
    /// Bytes per second
    pub ts_recording_rate: u32,
    pub num_source_packets: u32,
    /// "HDMV" for BD-ROM transport streams
    pub format_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StcSequence {
    pub pcr_pid: u16,
    pub spn_stc_start: u32,
    /// 45 kHz
    pub presentation_start_time: u32,
    /// 45 kHz
    pub presentation_end_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtcSequence {
    pub spn_atc_start: u32,
    pub offset_stc_id: u8,
    pub stc_seq: Vec<StcSequence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramStream {
    pub pid: u16,
    pub attrs: StreamAttrs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramSequence {
    pub spn_program_sequence_start: u32,
    pub program_map_pid: u16,
    pub num_groups: u8,
    pub streams: Vec<ProgramStream>,
}

/// One random access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EpPoint {
    /// 45 kHz
    pub pts: u32,
    pub spn: u32,
    /// Seamless angle change is allowed at this packet
    pub angle_change: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpStream {
    pub pid: u16,
    pub ep_stream_type: u8,
    pub points: Vec<EpPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cpi {
    pub cpi_type: u8,
    pub streams: Vec<EpStream>,
}

/// Parsed `*.clpi`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipInfo {
    pub version: String,
    pub clip: ClipMeta,
    pub atc_seq: Vec<AtcSequence>,
    pub programs: Vec<ProgramSequence>,
    pub cpi: Cpi,
}

impl ClipInfo {
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(data);
        let version = read_header(&mut r, "HDMV")?;
        let sequence_info_start = r.read_u32()?;
        let program_info_start = r.read_u32()?;
        let cpi_start = r.read_u32()?;
        let _clip_mark_start = r.read_u32()?;
        let _ext_start = r.read_u32()?;

        r.seek_byte(40)?;
        let clip = parse_clip_meta(&mut r)?;

        r.seek_byte(section_offset(&r, sequence_info_start)?)?;
        let atc_seq = parse_sequence_info(&mut r)?;

        r.seek_byte(section_offset(&r, program_info_start)?)?;
        let programs = parse_program_info(&mut r)?;

        r.seek_byte(section_offset(&r, cpi_start)?)?;
        let cpi = parse_cpi(&mut r)?;

        Ok(Self {
            version,
            clip,
            atc_seq,
            programs,
            cpi,
        })
    }

    /// Access points of the first EP stream (the video stream)
    pub fn ep_points(&self) -> &[EpPoint] {
        self.cpi
            .streams
            .first()
            .map(|s| s.points.as_slice())
            .unwrap_or(&[])
    }

    /// Packet range `[start, end)` of an STC sequence. Unknown ids cover the whole clip.
    fn stc_range(&self, stc_id: u8) -> (u32, u32) {
        let Some(atc) = self.atc_seq.first() else {
            return (0, u32::MAX);
        };
        let idx = stc_id.saturating_sub(atc.offset_stc_id) as usize;
        match atc.stc_seq.get(idx) {
            Some(stc) => {
                let end = atc
                    .stc_seq
                    .get(idx + 1)
                    .map(|next| next.spn_stc_start)
                    .unwrap_or(u32::MAX);
                (stc.spn_stc_start, end)
            }
            None => (0, u32::MAX),
        }
    }

    /// Packet number for a presentation time (45 kHz).
    ///
    /// `before`: last access point at or before `time` (start of a play window).
    /// Otherwise: first access point at or after `time` (exclusive end of a window).
    pub fn lookup_spn(&self, time: u32, before: bool, stc_id: u8) -> u32 {
        let (lo, hi) = self.stc_range(stc_id);
        let points: Vec<&EpPoint> = self
            .ep_points()
            .iter()
            .filter(|p| p.spn >= lo && p.spn < hi)
            .collect();

        if points.is_empty() {
            return if before { 0 } else { self.clip.num_source_packets };
        }

        // first index with pts > time
        let upper = points.partition_point(|p| p.pts <= time);
        if before {
            match upper {
                0 => points[0].spn,
                n => points[n - 1].spn,
            }
        } else {
            let first_ge = points.partition_point(|p| p.pts < time);
            points
                .get(first_ge)
                .map(|p| p.spn)
                .unwrap_or(self.clip.num_source_packets)
        }
    }

    /// Nearest access point to `pkt`.
    ///
    /// `next == false` returns the last point at or before `pkt`; `next == true`
    /// the first point at or after it. `angle_change` restricts the search to
    /// seamless angle change points.
    pub fn access_point(&self, pkt: u32, next: bool, angle_change: bool) -> Option<EpPoint> {
        let mut candidates = self
            .ep_points()
            .iter()
            .filter(|p| !angle_change || p.angle_change);
        if next {
            candidates.find(|p| p.spn >= pkt).copied()
        } else {
            candidates.take_while(|p| p.spn <= pkt).last().copied()
        }
    }

    /// Presentation time of an access point at packet `pkt`, if one exists there
    pub fn time_of_packet(&self, pkt: u32) -> Option<u32> {
        self.access_point(pkt, false, false).map(|p| p.pts)
    }

    /// Elementary stream attributes declared for a pid
    pub fn stream_attrs(&self, pid: u16) -> Option<&StreamAttrs> {
        self.programs
            .iter()
            .flat_map(|p| p.streams.iter())
            .find(|s| s.pid == pid)
            .map(|s| &s.attrs)
    }
}

fn parse_clip_meta(r: &mut BitReader<'_>) -> ParseResult<ClipMeta> {
    let len = r.read_u32()? as usize;
    let start = r.byte_pos();
    let mut meta = ClipMeta::default();

    r.skip_bits(16)?;
    meta.clip_stream_type = r.read_u8()?;
    meta.application_type = r.read_u8()?;
    r.skip_bits(31)?;
    meta.is_atc_delta = r.read_bool()?;
    meta.ts_recording_rate = r.read_u32()?;
    meta.num_source_packets = r.read_u32()?;
    r.skip_bytes(128)?;

    let type_info_len = r.read_u16()?;
    if type_info_len >= 5 {
        let _validity = r.read_u8()?;
        meta.format_id = r.read_code(4)?;
    }

    r.seek_byte(start + len)?;
    Ok(meta)
}

fn parse_sequence_info(r: &mut BitReader<'_>) -> ParseResult<Vec<AtcSequence>> {
    let len = r.read_u32()?;
    if len == 0 {
        return Ok(Vec::new());
    }
    r.skip_bits(8)?;
    let num_atc = r.read_u8()?;
    let mut atc_seq = Vec::with_capacity(num_atc as usize);
    for _ in 0..num_atc {
        let spn_atc_start = r.read_u32()?;
        let num_stc = r.read_u8()?;
        let offset_stc_id = r.read_u8()?;
        let mut stc_seq = Vec::with_capacity(num_stc as usize);
        for _ in 0..num_stc {
            stc_seq.push(StcSequence {
                pcr_pid: r.read_u16()?,
                spn_stc_start: r.read_u32()?,
                presentation_start_time: r.read_u32()?,
                presentation_end_time: r.read_u32()?,
            });
        }
        atc_seq.push(AtcSequence {
            spn_atc_start,
            offset_stc_id,
            stc_seq,
        });
    }
    Ok(atc_seq)
}

fn parse_program_info(r: &mut BitReader<'_>) -> ParseResult<Vec<ProgramSequence>> {
    let len = r.read_u32()?;
    if len == 0 {
        return Ok(Vec::new());
    }
    r.skip_bits(8)?;
    let num_prog = r.read_u8()?;
    let mut programs = Vec::with_capacity(num_prog as usize);
    for _ in 0..num_prog {
        let spn_program_sequence_start = r.read_u32()?;
        let program_map_pid = r.read_u16()?;
        let num_streams = r.read_u8()?;
        let num_groups = r.read_u8()?;
        let mut streams = Vec::with_capacity(num_streams as usize);
        for _ in 0..num_streams {
            let pid = r.read_u16()?;
            let attrs = StreamAttrs::parse(r)?;
            streams.push(ProgramStream { pid, attrs });
        }
        programs.push(ProgramSequence {
            spn_program_sequence_start,
            program_map_pid,
            num_groups,
            streams,
        });
    }
    Ok(programs)
}

struct EpStreamHeader {
    pid: u16,
    ep_stream_type: u8,
    num_coarse: usize,
    num_fine: usize,
    start_addr: usize,
}

struct CoarseEntry {
    ref_fine_id: usize,
    pts_ep: u32,
    spn_ep: u32,
}

struct FineEntry {
    angle_change: bool,
    pts_ep: u32,
    spn_ep: u32,
}

fn parse_cpi(r: &mut BitReader<'_>) -> ParseResult<Cpi> {
    let len = r.read_u32()?;
    if len == 0 {
        return Ok(Cpi::default());
    }
    r.skip_bits(12)?;
    let cpi_type = r.read_bits(4)? as u8;

    let ep_map_start = r.byte_pos();
    r.skip_bits(8)?;
    let num_stream_pid = r.read_u8()?;

    let mut headers = Vec::with_capacity(num_stream_pid as usize);
    for _ in 0..num_stream_pid {
        let pid = r.read_u16()?;
        r.skip_bits(10)?;
        let ep_stream_type = r.read_bits(4)? as u8;
        let num_coarse = r.read_u16()? as usize;
        let num_fine = r.read_bits(18)? as usize;
        let start_addr = r.read_u32()? as usize;
        headers.push(EpStreamHeader {
            pid,
            ep_stream_type,
            num_coarse,
            num_fine,
            start_addr,
        });
    }

    let mut streams = Vec::with_capacity(headers.len());
    for h in headers {
        let stream_start = ep_map_start + h.start_addr;
        r.seek_byte(stream_start)?;
        let fine_start = r.read_u32()? as usize;

        let mut coarse = Vec::with_capacity(h.num_coarse.min(r.remaining_bytes() / 8));
        for _ in 0..h.num_coarse {
            coarse.push(CoarseEntry {
                ref_fine_id: r.read_bits(18)? as usize,
                pts_ep: r.read_bits(14)?,
                spn_ep: r.read_u32()?,
            });
        }

        r.seek_byte(stream_start + fine_start)?;
        let mut fine = Vec::with_capacity(h.num_fine.min(r.remaining_bytes() / 4));
        for _ in 0..h.num_fine {
            let angle_change = r.read_bool()?;
            let _i_end_position_offset = r.read_bits(3)?;
            fine.push(FineEntry {
                angle_change,
                pts_ep: r.read_bits(11)?,
                spn_ep: r.read_bits(17)?,
            });
        }

        streams.push(EpStream {
            pid: h.pid,
            ep_stream_type: h.ep_stream_type,
            points: combine_ep_entries(&coarse, &fine),
        });
    }

    Ok(Cpi { cpi_type, streams })
}

/// Merge coarse and fine entries into absolute access points.
fn combine_ep_entries(coarse: &[CoarseEntry], fine: &[FineEntry]) -> Vec<EpPoint> {
    let mut points = Vec::with_capacity(fine.len());
    for (i, c) in coarse.iter().enumerate() {
        let end = coarse
            .get(i + 1)
            .map(|n| n.ref_fine_id)
            .unwrap_or(fine.len())
            .min(fine.len());
        let begin = c.ref_fine_id.min(end);
        for f in &fine[begin..end] {
            points.push(EpPoint {
                pts: ((c.pts_ep & !0x01) << 18) + (f.pts_ep << 8),
                spn: (c.spn_ep & !0x1FFFF) + f.spn_ep,
                angle_change: f.angle_change,
            });
        }
    }
    points
}
