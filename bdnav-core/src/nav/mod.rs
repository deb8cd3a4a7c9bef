//! Navigation model
//!
//! A `NavTitle` is the playable view of one playlist: its play items resolved
//! to clips with packet windows, chapters and marks placed on a title-wide
//! packet/time axis, and the search operations that map a requested position
//! to a clip and packet. Every search lands on an access point at or before
//! the request.

pub mod titles;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::bdparse::clpi::ClipInfo;
use crate::bdparse::mpls::{MarkType, PlayItem, Playlist, StillMode};
use crate::demux::{filter::StreamCounts, packet_to_byte, PACKET_SIZE};
use crate::disc_io::{self, DiscFs};
use crate::error::{NavError, NavResult};
use crate::uo_mask::UoMask;

pub use titles::{
    scan_titles, TitleListEntry, TITLES_ALL, TITLES_FILTER_DUP_CLIP, TITLES_FILTER_DUP_TITLE,
    TITLES_RELEVANT,
};

// ============================================================================
// Clips
// ============================================================================

/// One play item resolved for the current angle
#[derive(Debug, Clone)]
pub struct NavClip {
    /// Play item index
    pub index: usize,
    pub clip_id: String,
    pub angle: usize,
    pub stc_id: u8,
    /// Play window, 45 kHz clip time
    pub in_time: u32,
    pub out_time: u32,
    /// Play window in clip packets, `[start_pkt, end_pkt)`
    pub start_pkt: u32,
    pub end_pkt: u32,
    /// Title packet of `start_pkt`
    pub title_pkt: u32,
    /// Title time of `in_time`, 45 kHz
    pub title_time: u32,
    pub connection_condition: u8,
    pub still_mode: StillMode,
    pub still_time: u16,
    pub uo_mask: UoMask,
    pub stream_counts: StreamCounts,
    /// Missing for clips whose info file could not be read
    pub info: Option<Arc<ClipInfo>>,
}

impl NavClip {
    pub fn packets(&self) -> u32 {
        self.end_pkt.saturating_sub(self.start_pkt)
    }

    pub fn duration(&self) -> u32 {
        self.out_time.saturating_sub(self.in_time)
    }

    /// Title packet of a clip packet
    pub fn title_packet(&self, clip_pkt: u32) -> u32 {
        self.title_pkt + clip_pkt.saturating_sub(self.start_pkt)
    }

    /// Clip packet of the access point at or before `clip_pkt`, kept inside the window
    pub fn access_point_before(&self, clip_pkt: u32) -> u32 {
        let ap = self
            .info
            .as_ref()
            .and_then(|info| info.access_point(clip_pkt, false, false))
            .map(|p| p.spn)
            .unwrap_or(clip_pkt);
        ap.clamp(self.start_pkt, self.end_pkt.max(self.start_pkt))
    }

    /// Packet for a 45 kHz clip time, at or before it
    pub fn packet_for_time(&self, clip_time: u32) -> u32 {
        match &self.info {
            Some(info) => info
                .lookup_spn(clip_time, true, self.stc_id)
                .clamp(self.start_pkt, self.end_pkt.max(self.start_pkt)),
            None => self.start_pkt,
        }
    }

    /// Clip time of the access point at or before `clip_pkt`
    pub fn time_of_packet(&self, clip_pkt: u32) -> u32 {
        self.info
            .as_ref()
            .and_then(|info| info.time_of_packet(clip_pkt))
            .unwrap_or(self.in_time)
            .clamp(self.in_time, self.out_time.max(self.in_time))
    }

    pub fn is_still(&self) -> bool {
        self.still_mode != StillMode::None
    }
}

// ============================================================================
// Marks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavMark {
    /// Index into the playlist mark table
    pub number: usize,
    pub mark_type: MarkType,
    /// Play item the mark refers to
    pub clip: usize,
    pub clip_pkt: u32,
    pub title_pkt: u32,
    /// 45 kHz
    pub clip_time: u32,
    pub title_time: u32,
    /// Distance to the next mark of the same kind (or to the title end), 45 kHz
    pub duration: u32,
}

/// Resolved position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavPosition {
    pub clip: usize,
    pub clip_pkt: u32,
    pub title_pkt: u32,
}

#[derive(Debug, Clone)]
pub struct NavSubClip {
    pub clip_id: String,
    pub in_time: u32,
    pub out_time: u32,
}

#[derive(Debug, Clone)]
pub struct NavSubPath {
    pub sub_path_type: u8,
    pub is_repeat: bool,
    pub clips: Vec<NavSubClip>,
}

// ============================================================================
// Title
// ============================================================================

#[derive(Debug, Clone)]
pub struct NavTitle {
    pub playlist_id: u32,
    pub playlist: Playlist,
    /// 0-based
    pub angle: usize,
    pub angle_count: usize,
    pub clips: Vec<NavClip>,
    pub chapters: Vec<NavMark>,
    pub marks: Vec<NavMark>,
    pub sub_paths: Vec<NavSubPath>,
    /// Title length in packets and 45 kHz ticks
    pub packets: u32,
    pub duration: u32,
    pub uo_mask: UoMask,
    clip_info: HashMap<String, Arc<ClipInfo>>,
}

fn load_clip_info(disc: &dyn DiscFs, clip_id: &str) -> Option<Arc<ClipInfo>> {
    let path = disc_io::clip_info_path(clip_id);
    let data = match disc.read_file(&path) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("{}: {}", path, e);
            return None;
        }
    };
    match ClipInfo::parse(&data) {
        Ok(info) => Some(Arc::new(info)),
        Err(e) => {
            tracing::warn!("{}: {}", path, e);
            None
        }
    }
}

fn stream_counts(item: &PlayItem) -> StreamCounts {
    StreamCounts {
        video: item.stn.video.len() as u8,
        audio: item.stn.audio.len() as u8,
        pg: item.stn.primary_pg().len() as u8,
        ig: item.stn.ig.len() as u8,
    }
}

impl NavTitle {
    /// Open a playlist. An angle the title does not have falls back to angle 0.
    pub fn open(disc: &dyn DiscFs, playlist_id: u32, angle: usize) -> NavResult<Self> {
        let path = disc_io::playlist_path(playlist_id);
        let data = disc.read_file(&path).map_err(|e| match e {
            NavError::NotFound(_) => NavError::InvalidPlaylist(playlist_id),
            other => other,
        })?;
        let playlist = Playlist::parse(&data).map_err(|e| NavError::parse(path.clone(), e))?;
        if playlist.play_items.is_empty() {
            return Err(NavError::InvalidPlaylist(playlist_id));
        }

        let angle_count = playlist
            .play_items
            .iter()
            .map(PlayItem::angle_count)
            .max()
            .unwrap_or(1)
            .max(1);
        let angle = if angle < angle_count { angle } else { 0 };

        let sub_paths = playlist
            .sub_paths
            .iter()
            .map(|sp| NavSubPath {
                sub_path_type: sp.sub_path_type,
                is_repeat: sp.is_repeat,
                clips: sp
                    .sub_play_items
                    .iter()
                    .filter_map(|spi| {
                        spi.clips.first().map(|c| NavSubClip {
                            clip_id: c.clip_id.clone(),
                            in_time: spi.in_time,
                            out_time: spi.out_time,
                        })
                    })
                    .collect(),
            })
            .collect();

        let uo_mask = playlist.app_info.uo_mask;
        let mut title = Self {
            playlist_id,
            playlist,
            angle,
            angle_count,
            clips: Vec::new(),
            chapters: Vec::new(),
            marks: Vec::new(),
            sub_paths,
            packets: 0,
            duration: 0,
            uo_mask,
            clip_info: HashMap::new(),
        };
        title.resolve_clips(disc);

        tracing::info!(
            "opened playlist {:05}: {} clips, {} chapters, {} angles, {:.1}s",
            playlist_id,
            title.clips.len(),
            title.chapters.len(),
            angle_count,
            title.duration as f64 / 45_000.0
        );
        Ok(title)
    }

    fn clip_info_for(&mut self, disc: &dyn DiscFs, clip_id: &str) -> Option<Arc<ClipInfo>> {
        if let Some(info) = self.clip_info.get(clip_id) {
            return Some(info.clone());
        }
        let info = load_clip_info(disc, clip_id)?;
        self.clip_info.insert(clip_id.to_string(), info.clone());
        Some(info)
    }

    /// Resolve every play item for the current angle and lay out the title axis
    fn resolve_clips(&mut self, disc: &dyn DiscFs) {
        let mut clips = Vec::with_capacity(self.playlist.play_items.len());
        let mut title_pkt = 0u32;
        let mut title_time = 0u32;

        let items = self.playlist.play_items.clone();
        for (index, item) in items.iter().enumerate() {
            let clip_ref = item.clip_for_angle(self.angle);
            let info = self.clip_info_for(disc, &clip_ref.clip_id);
            let (start_pkt, end_pkt) = match &info {
                Some(info) => (
                    info.lookup_spn(item.in_time, true, clip_ref.stc_id),
                    info.lookup_spn(item.out_time, false, clip_ref.stc_id),
                ),
                None => (0, 0),
            };
            let end_pkt = end_pkt.max(start_pkt);

            let clip = NavClip {
                index,
                clip_id: clip_ref.clip_id.clone(),
                angle: self.angle.min(item.angle_count().saturating_sub(1)),
                stc_id: clip_ref.stc_id,
                in_time: item.in_time,
                out_time: item.out_time,
                start_pkt,
                end_pkt,
                title_pkt,
                title_time,
                connection_condition: item.connection_condition,
                still_mode: item.still_mode,
                still_time: item.still_time,
                uo_mask: item.uo_mask,
                stream_counts: stream_counts(item),
                info,
            };
            title_pkt = title_pkt.saturating_add(clip.packets());
            title_time = title_time.saturating_add(clip.duration());
            clips.push(clip);
        }

        self.clips = clips;
        self.packets = title_pkt;
        self.duration = title_time;
        self.resolve_marks();
    }

    fn resolve_marks(&mut self) {
        let mut marks = Vec::new();
        for (number, mark) in self.playlist.marks.iter().enumerate() {
            let Some(clip) = self.clips.get(mark.play_item_ref as usize) else {
                tracing::debug!("mark {} refers to missing play item {}", number, mark.play_item_ref);
                continue;
            };
            let clip_time = mark.time.clamp(clip.in_time, clip.out_time.max(clip.in_time));
            let clip_pkt = clip.packet_for_time(clip_time);
            marks.push(NavMark {
                number,
                mark_type: mark.mark_type,
                clip: clip.index,
                clip_pkt,
                title_pkt: clip.title_packet(clip_pkt),
                clip_time,
                title_time: clip.title_time + (clip_time - clip.in_time),
                duration: 0,
            });
        }

        let mut chapters: Vec<NavMark> = marks
            .iter()
            .filter(|m| m.mark_type == MarkType::Entry)
            .cloned()
            .collect();

        let end = self.duration;
        set_durations(&mut marks, end);
        set_durations(&mut chapters, end);
        self.marks = marks;
        self.chapters = chapters;
    }

    pub fn name(&self) -> String {
        format!("{:05}", self.playlist_id)
    }

    pub fn byte_size(&self) -> u64 {
        packet_to_byte(self.packets)
    }

    pub fn clip(&self, index: usize) -> Option<&NavClip> {
        self.clips.get(index)
    }

    // ------------------------------------------------------------------------
    // Searches
    // ------------------------------------------------------------------------

    /// Clip and packet for a title byte position
    pub fn packet_search(&self, title_pos: u64) -> NavPosition {
        let title_pkt = (title_pos / PACKET_SIZE as u64).min(u32::MAX as u64) as u32;
        for clip in &self.clips {
            if title_pkt < clip.title_pkt + clip.packets() {
                let clip_pkt = clip.access_point_before(clip.start_pkt + (title_pkt - clip.title_pkt));
                return NavPosition {
                    clip: clip.index,
                    clip_pkt,
                    title_pkt: clip.title_packet(clip_pkt),
                };
            }
        }
        self.end_position()
    }

    /// Position past the last packet of the title
    pub fn end_position(&self) -> NavPosition {
        match self.clips.last() {
            Some(clip) => NavPosition {
                clip: clip.index,
                clip_pkt: clip.end_pkt,
                title_pkt: self.packets,
            },
            None => NavPosition {
                clip: 0,
                clip_pkt: 0,
                title_pkt: 0,
            },
        }
    }

    pub fn chapter_search(&self, chapter: usize) -> NavResult<NavPosition> {
        let mark = self
            .chapters
            .get(chapter)
            .ok_or(NavError::InvalidChapter(chapter as u32))?;
        Ok(self.mark_position(mark))
    }

    pub fn mark_search(&self, mark: usize) -> NavResult<NavPosition> {
        let mark = self
            .marks
            .get(mark)
            .ok_or(NavError::InvalidMark(mark as u32))?;
        Ok(self.mark_position(mark))
    }

    fn mark_position(&self, mark: &NavMark) -> NavPosition {
        NavPosition {
            clip: mark.clip,
            clip_pkt: mark.clip_pkt,
            title_pkt: mark.title_pkt,
        }
    }

    /// Start of a play item
    pub fn clip_by_index(&self, play_item: usize) -> NavResult<NavPosition> {
        let clip = self
            .clips
            .get(play_item)
            .ok_or(NavError::InvalidPlayItem(play_item as u32))?;
        Ok(NavPosition {
            clip: clip.index,
            clip_pkt: clip.start_pkt,
            title_pkt: clip.title_pkt,
        })
    }

    pub fn play_item_search(&self, play_item: usize) -> NavResult<NavPosition> {
        self.clip_by_index(play_item)
    }

    /// Clip and packet for a 45 kHz title time
    pub fn time_search(&self, title_time: u32) -> NavPosition {
        for clip in &self.clips {
            if title_time < clip.title_time + clip.duration() {
                let clip_time = clip.in_time + (title_time - clip.title_time);
                let clip_pkt = clip.packet_for_time(clip_time);
                return NavPosition {
                    clip: clip.index,
                    clip_pkt,
                    title_pkt: clip.title_packet(clip_pkt),
                };
            }
        }
        self.end_position()
    }

    /// Title time (45 kHz) of a clip position
    pub fn title_time_of(&self, clip: usize, clip_pkt: u32) -> u32 {
        match self.clips.get(clip) {
            Some(c) => c.title_time + (c.time_of_packet(clip_pkt) - c.in_time),
            None => self.duration,
        }
    }

    /// Chapter (0-based) containing a title packet. A packet on a boundary
    /// belongs to the chapter that starts there.
    pub fn chapter_at(&self, title_pkt: u32) -> Option<usize> {
        last_at_or_before(&self.chapters, title_pkt)
    }

    pub fn mark_at(&self, title_pkt: u32) -> Option<usize> {
        last_at_or_before(&self.marks, title_pkt)
    }

    // ------------------------------------------------------------------------
    // Angles
    // ------------------------------------------------------------------------

    /// Switch angle. Returns true when the clip at `clip` changes file.
    pub fn set_angle(&mut self, disc: &dyn DiscFs, angle: usize, clip: usize) -> NavResult<bool> {
        if angle >= self.angle_count {
            return Err(NavError::InvalidAngle(angle as u32));
        }
        if angle == self.angle {
            return Ok(false);
        }
        let before = self.clips.get(clip).map(|c| c.clip_id.clone());
        self.angle = angle;
        self.resolve_clips(disc);
        let after = self.clips.get(clip).map(|c| c.clip_id.clone());
        tracing::debug!("angle {} selected", angle);
        Ok(before != after)
    }

    /// Next seamless angle change point at or after `clip_pkt`
    pub fn angle_change_search(&self, clip: usize, clip_pkt: u32) -> Option<u32> {
        let c = self.clips.get(clip)?;
        let point = c.info.as_ref()?.access_point(clip_pkt, true, true)?;
        (point.spn < c.end_pkt).then_some(point.spn)
    }

    pub fn is_multi_angle(&self, clip: usize) -> bool {
        self.playlist
            .play_items
            .get(clip)
            .map(|pi| pi.is_multi_angle && pi.angle_count() > 1)
            .unwrap_or(false)
    }

    pub fn sub_path(&self, sub_path_type: u8) -> Option<&NavSubPath> {
        self.sub_paths.iter().find(|sp| sp.sub_path_type == sub_path_type)
    }
}

fn set_durations(marks: &mut [NavMark], title_end: u32) {
    let starts: Vec<u32> = marks.iter().map(|m| m.title_time).collect();
    for (i, mark) in marks.iter_mut().enumerate() {
        let next = starts.get(i + 1).copied().unwrap_or(title_end);
        mark.duration = next.saturating_sub(mark.title_time);
    }
}

fn last_at_or_before(marks: &[NavMark], title_pkt: u32) -> Option<usize> {
    let n = marks.partition_point(|m| m.title_pkt <= title_pkt);
    n.checked_sub(1)
}
