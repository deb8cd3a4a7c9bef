//! `*.mpls` playlist parser
//!
//! A playlist is an ordered list of play items (clip + in/out window), the
//! stream number table of each item, optional sub-paths and a mark table
//! (chapters are entry marks).

use serde::Serialize;

use super::stream_attrs::StreamAttrs;
use super::{read_header, section_offset, BitReader, ParseResult};
use crate::uo_mask::UoMask;

/// Sub-path carrying an interactive-graphics menu outside the main TS
pub const SUB_PATH_IG_MENU: u8 = 3;
/// Sub-path carrying text subtitles
pub const SUB_PATH_TEXT_SUBTITLE: u8 = 4;

pub const PLAYBACK_SEQUENTIAL: u8 = 1;
pub const PLAYBACK_RANDOM: u8 = 2;
pub const PLAYBACK_SHUFFLE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarkType {
    /// Chapter start
    Entry,
    /// Link point (target of LINK_MK)
    Link,
    Other(u8),
}

impl From<u8> for MarkType {
    fn from(value: u8) -> Self {
        match value {
            1 => MarkType::Entry,
            2 => MarkType::Link,
            v => MarkType::Other(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StillMode {
    None,
    /// Hold the last frame for `still_time` seconds
    Time,
    Infinite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaylistAppInfo {
    pub playback_type: u8,
    pub playback_count: u16,
    pub uo_mask: UoMask,
    pub random_access_flag: bool,
    pub audio_mix_flag: bool,
    pub lossless_bypass_flag: bool,
}

/// Clip reference: 5-digit clip id plus codec id ("M2TS")
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipRef {
    pub clip_id: String,
    pub codec_id: String,
    pub stc_id: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamEntry {
    /// 1 = main path, 2 = sub-path (sub clip), 3/4 = sub-path (in-mux)
    pub stream_type: u8,
    pub pid: u16,
    pub subpath_id: u8,
    pub subclip_id: u8,
}

impl StreamEntry {
    fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let len = r.read_u8()? as usize;
        let start = r.byte_pos();
        let mut entry = StreamEntry::default();
        if len > 0 {
            entry.stream_type = r.read_u8()?;
            match entry.stream_type {
                1 => entry.pid = r.read_u16()?,
                2 => {
                    entry.subpath_id = r.read_u8()?;
                    entry.subclip_id = r.read_u8()?;
                    entry.pid = r.read_u16()?;
                }
                3 | 4 => {
                    entry.subpath_id = r.read_u8()?;
                    entry.pid = r.read_u16()?;
                }
                other => tracing::debug!("unrecognized stream entry type {}", other),
            }
        }
        r.seek_byte(start + len)?;
        Ok(entry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StnStream {
    pub entry: StreamEntry,
    pub attrs: StreamAttrs,
    /// Secondary audio: primary audio refs; secondary video: secondary audio refs
    pub refs: Vec<u8>,
    /// Secondary video only: PiP PG refs
    pub pip_pg_refs: Vec<u8>,
}

/// Stream number table. Stream numbers used by PSRs are 1-based indices into these lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StnTable {
    pub video: Vec<StnStream>,
    pub audio: Vec<StnStream>,
    /// PG streams followed by `num_pip_pg` picture-in-picture PG streams
    pub pg: Vec<StnStream>,
    pub num_pip_pg: u8,
    pub ig: Vec<StnStream>,
    pub secondary_audio: Vec<StnStream>,
    pub secondary_video: Vec<StnStream>,
}

impl StnTable {
    fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let len = r.read_u16()? as usize;
        let start = r.byte_pos();
        let mut stn = StnTable::default();
        if len == 0 {
            return Ok(stn);
        }

        r.skip_bits(16)?;
        let num_video = r.read_u8()?;
        let num_audio = r.read_u8()?;
        let num_pg = r.read_u8()?;
        let num_ig = r.read_u8()?;
        let num_secondary_audio = r.read_u8()?;
        let num_secondary_video = r.read_u8()?;
        stn.num_pip_pg = r.read_u8()?;
        r.skip_bytes(5)?;

        stn.video = parse_streams(r, num_video as usize)?;
        stn.audio = parse_streams(r, num_audio as usize)?;
        stn.pg = parse_streams(r, num_pg as usize + stn.num_pip_pg as usize)?;
        stn.ig = parse_streams(r, num_ig as usize)?;

        for _ in 0..num_secondary_audio {
            let mut stream = parse_stream(r)?;
            stream.refs = parse_refs(r)?;
            stn.secondary_audio.push(stream);
        }
        for _ in 0..num_secondary_video {
            let mut stream = parse_stream(r)?;
            stream.refs = parse_refs(r)?;
            stream.pip_pg_refs = parse_refs(r)?;
            stn.secondary_video.push(stream);
        }

        r.seek_byte(start + len)?;
        Ok(stn)
    }

    /// Primary PG streams (without PiP PG)
    pub fn primary_pg(&self) -> &[StnStream] {
        let n = self.pg.len().saturating_sub(self.num_pip_pg as usize);
        &self.pg[..n]
    }
}

fn parse_stream(r: &mut BitReader<'_>) -> ParseResult<StnStream> {
    let entry = StreamEntry::parse(r)?;
    let attrs = StreamAttrs::parse(r)?;
    Ok(StnStream {
        entry,
        attrs,
        refs: Vec::new(),
        pip_pg_refs: Vec::new(),
    })
}

fn parse_streams(r: &mut BitReader<'_>, count: usize) -> ParseResult<Vec<StnStream>> {
    (0..count).map(|_| parse_stream(r)).collect()
}

/// Reference list: count, reserved byte, ids, padding to 16 bits
fn parse_refs(r: &mut BitReader<'_>) -> ParseResult<Vec<u8>> {
    let count = r.read_u8()? as usize;
    r.skip_bits(8)?;
    let refs = r.read_bytes(count)?.to_vec();
    if count % 2 == 1 {
        r.skip_bits(8)?;
    }
    Ok(refs)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayItem {
    /// One clip per angle; angle 0 first
    pub clips: Vec<ClipRef>,
    pub is_multi_angle: bool,
    pub connection_condition: u8,
    /// 45 kHz
    pub in_time: u32,
    /// 45 kHz
    pub out_time: u32,
    pub uo_mask: UoMask,
    pub random_access_flag: bool,
    pub still_mode: StillMode,
    /// Seconds, for `StillMode::Time`
    pub still_time: u16,
    pub is_different_audio: bool,
    pub is_seamless_angle: bool,
    pub stn: StnTable,
}

impl PlayItem {
    fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let len = r.read_u16()? as usize;
        let start = r.byte_pos();

        let clip_id = r.read_code(5)?;
        let codec_id = r.read_code(4)?;
        r.skip_bits(11)?;
        let is_multi_angle = r.read_bool()?;
        let connection_condition = r.read_bits(4)? as u8;
        let stc_id = r.read_u8()?;
        let in_time = r.read_u32()?;
        let out_time = r.read_u32()?;
        let uo_mask = UoMask::parse(r)?;
        let random_access_flag = r.read_bool()?;
        r.skip_bits(7)?;
        let still_mode = match r.read_u8()? {
            0 => StillMode::None,
            1 => StillMode::Time,
            _ => StillMode::Infinite,
        };
        let still_time = r.read_u16()?;

        let mut clips = vec![ClipRef {
            clip_id,
            codec_id,
            stc_id,
        }];
        let mut is_different_audio = false;
        let mut is_seamless_angle = false;
        if is_multi_angle {
            let angle_count = r.read_u8()?.max(1);
            r.skip_bits(6)?;
            is_different_audio = r.read_bool()?;
            is_seamless_angle = r.read_bool()?;
            for _ in 1..angle_count {
                let clip_id = r.read_code(5)?;
                let codec_id = r.read_code(4)?;
                let stc_id = r.read_u8()?;
                clips.push(ClipRef {
                    clip_id,
                    codec_id,
                    stc_id,
                });
            }
        }

        let stn = StnTable::parse(r)?;
        r.seek_byte(start + len)?;

        Ok(Self {
            clips,
            is_multi_angle,
            connection_condition,
            in_time,
            out_time,
            uo_mask,
            random_access_flag,
            still_mode,
            still_time: if still_mode == StillMode::Time { still_time } else { 0 },
            is_different_audio,
            is_seamless_angle,
            stn,
        })
    }

    pub fn angle_count(&self) -> usize {
        self.clips.len()
    }

    /// Clip for an angle, falling back to angle 0 for items with fewer angles
    pub fn clip_for_angle(&self, angle: usize) -> &ClipRef {
        self.clips.get(angle).unwrap_or(&self.clips[0])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubPlayItem {
    pub clips: Vec<ClipRef>,
    pub connection_condition: u8,
    pub is_multi_clip: bool,
    pub in_time: u32,
    pub out_time: u32,
    pub sync_play_item_id: u16,
    pub sync_pts: u32,
}

impl SubPlayItem {
    fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let len = r.read_u16()? as usize;
        let start = r.byte_pos();

        let clip_id = r.read_code(5)?;
        let codec_id = r.read_code(4)?;
        r.skip_bits(27)?;
        let connection_condition = r.read_bits(4)? as u8;
        let is_multi_clip = r.read_bool()?;
        let stc_id = r.read_u8()?;
        let in_time = r.read_u32()?;
        let out_time = r.read_u32()?;
        let sync_play_item_id = r.read_u16()?;
        let sync_pts = r.read_u32()?;

        let mut clips = vec![ClipRef {
            clip_id,
            codec_id,
            stc_id,
        }];
        if is_multi_clip {
            let num_clips = r.read_u8()?.max(1);
            r.skip_bits(8)?;
            for _ in 1..num_clips {
                let clip_id = r.read_code(5)?;
                let codec_id = r.read_code(4)?;
                let stc_id = r.read_u8()?;
                clips.push(ClipRef {
                    clip_id,
                    codec_id,
                    stc_id,
                });
            }
        }

        r.seek_byte(start + len)?;
        Ok(Self {
            clips,
            connection_condition,
            is_multi_clip,
            in_time,
            out_time,
            sync_play_item_id,
            sync_pts,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubPath {
    pub sub_path_type: u8,
    pub is_repeat: bool,
    pub sub_play_items: Vec<SubPlayItem>,
}

impl SubPath {
    fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let len = r.read_u32()? as usize;
        let start = r.byte_pos();

        r.skip_bits(8)?;
        let sub_path_type = r.read_u8()?;
        r.skip_bits(15)?;
        let is_repeat = r.read_bool()?;
        r.skip_bits(8)?;
        let count = r.read_u8()?;
        let sub_play_items = (0..count)
            .map(|_| SubPlayItem::parse(r))
            .collect::<ParseResult<Vec<_>>>()?;

        r.seek_byte(start + len)?;
        Ok(Self {
            sub_path_type,
            is_repeat,
            sub_play_items,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistMark {
    pub mark_type: MarkType,
    pub play_item_ref: u16,
    /// 45 kHz, clip presentation time
    pub time: u32,
    pub entry_es_pid: u16,
    /// 45 kHz
    pub duration: u32,
}

/// Parsed `*.mpls`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub version: String,
    pub app_info: PlaylistAppInfo,
    pub play_items: Vec<PlayItem>,
    pub sub_paths: Vec<SubPath>,
    pub marks: Vec<PlaylistMark>,
}

impl Playlist {
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(data);
        let version = read_header(&mut r, "MPLS")?;
        let list_pos = r.read_u32()?;
        let mark_pos = r.read_u32()?;
        let _ext_pos = r.read_u32()?;

        r.seek_byte(40)?;
        let app_info = parse_app_info(&mut r)?;

        r.seek_byte(section_offset(&r, list_pos)?)?;
        let _len = r.read_u32()?;
        r.skip_bits(16)?;
        let num_play_items = r.read_u16()?;
        let num_sub_paths = r.read_u16()?;

        let play_items = (0..num_play_items)
            .map(|_| PlayItem::parse(&mut r))
            .collect::<ParseResult<Vec<_>>>()?;
        let sub_paths = (0..num_sub_paths)
            .map(|_| SubPath::parse(&mut r))
            .collect::<ParseResult<Vec<_>>>()?;

        r.seek_byte(section_offset(&r, mark_pos)?)?;
        let _len = r.read_u32()?;
        let num_marks = r.read_u16()?;
        let mut marks = Vec::with_capacity((num_marks as usize).min(r.remaining_bytes() / 14));
        for _ in 0..num_marks {
            r.skip_bits(8)?;
            let mark_type = MarkType::from(r.read_u8()?);
            let play_item_ref = r.read_u16()?;
            let time = r.read_u32()?;
            let entry_es_pid = r.read_u16()?;
            let duration = r.read_u32()?;
            marks.push(PlaylistMark {
                mark_type,
                play_item_ref,
                time,
                entry_es_pid,
                duration,
            });
        }

        Ok(Self {
            version,
            app_info,
            play_items,
            sub_paths,
            marks,
        })
    }

    /// Total presentation duration, 45 kHz
    pub fn duration(&self) -> u64 {
        self.play_items
            .iter()
            .map(|pi| pi.out_time.saturating_sub(pi.in_time) as u64)
            .sum()
    }

    pub fn chapter_marks(&self) -> impl Iterator<Item = &PlaylistMark> {
        self.marks.iter().filter(|m| m.mark_type == MarkType::Entry)
    }
}

fn parse_app_info(r: &mut BitReader<'_>) -> ParseResult<PlaylistAppInfo> {
    let len = r.read_u32()? as usize;
    let start = r.byte_pos();

    r.skip_bits(8)?;
    let playback_type = r.read_u8()?;
    let playback_count = r.read_u16()?;
    let uo_mask = UoMask::parse(r)?;
    let random_access_flag = r.read_bool()?;
    let audio_mix_flag = r.read_bool()?;
    let lossless_bypass_flag = r.read_bool()?;

    r.seek_byte(start + len)?;
    Ok(PlaylistAppInfo {
        playback_type,
        playback_count: if playback_type == PLAYBACK_RANDOM || playback_type == PLAYBACK_SHUFFLE {
            playback_count
        } else {
            0
        },
        uo_mask,
        random_access_flag,
        audio_mix_flag,
        lossless_bypass_flag,
    })
}
