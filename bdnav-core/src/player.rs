//! Playback session
//!
//! `Bluray` ties the disc index, the register bank, the HDMV VM, the graphics
//! controller and the main-path stream together. All of that sits behind one
//! lock; the overlay callback has its own so it can be replaced while
//! playback runs.
//!
//! Reading drives everything: each `read` hands out a pending event first,
//! then lets the VM and the menu logic settle, then delivers stream bytes.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::bdj::{BridgeError, ManagedRuntime, NoManagedRuntime, RuntimeEvent};
use crate::bdparse::index::{IndexFile, IndexObject};
use crate::bdparse::mobj::MovieObjects;
use crate::bdparse::mpls::{MarkType, StillMode, StnStream, SUB_PATH_IG_MENU};
use crate::config::PlayerConfig;
use crate::demux::{
    byte_to_packet, packet_to_byte, preload_clip, BdStream, GraphicsExtractor, GraphicsKind,
    GraphicsPes, StreamCounts, WindowFilter,
};
use crate::disc_io::{self, DirDisc, DiscFs};
use crate::error::{NavError, NavResult};
use crate::event::{BdEvent, ErrorKind};
use crate::graphics::{GcEvent, GraphicsController, OverlayProc, OverlaySink, UserKey};
use crate::hdmv::{HdmvEvent, HdmvVm};
use crate::nav::{scan_titles, NavMark, NavPosition, NavTitle, TitleListEntry, TITLES_RELEVANT};
use crate::register::{
    PsrEvent, PsrEventKind, RegisterBank, PG_DISPLAY_FLAG, PG_STREAM_MASK, PSR_ANGLE_NUMBER,
    PSR_CHAPTER, PSR_IG_STREAM_ID, PSR_PG_STREAM, PSR_PLAYITEM, PSR_PLAYLIST,
    PSR_PRIMARY_AUDIO_ID, PSR_SECONDARY_AUDIO_VIDEO, PSR_TIME, PSR_TITLE_NUMBER,
};
use crate::uo_mask::UoMask;

pub const TITLE_TOP_MENU: u32 = 0;
pub const TITLE_FIRST_PLAY: u32 = 0xffff;

pub const RATE_PAUSED: u32 = 0;
pub const RATE_NORMAL: u32 = 90_000;

// ============================================================================
// Disc & Title Info
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DiscInfo {
    pub first_play_supported: bool,
    pub top_menu_supported: bool,
    pub bdj_detected: bool,
    pub content_protected: bool,
    pub num_hdmv_titles: u32,
    pub num_bdj_titles: u32,
    pub num_unsupported_titles: u32,
    pub titles: Vec<IndexTitleInfo>,
}

/// Entry of the disc index; numbers start at 1
#[derive(Debug, Clone, Serialize)]
pub struct IndexTitleInfo {
    pub number: u32,
    pub hdmv: bool,
    pub interactive: bool,
    pub accessible: bool,
    pub hidden: bool,
    pub supported: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterInfo {
    /// 1-based
    pub number: u32,
    /// 90 kHz
    pub start: u64,
    pub duration: u64,
    /// Title byte offset
    pub offset: u64,
    pub clip_ref: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkInfo {
    pub number: u32,
    pub mark_type: MarkType,
    pub start: u64,
    pub duration: u64,
    pub offset: u64,
    pub clip_ref: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipSummary {
    pub clip_id: String,
    pub packets: u32,
    /// Title time of the play item start, 90 kHz
    pub start_time: u64,
    pub in_time: u64,
    pub out_time: u64,
    pub still_mode: StillMode,
    pub still_time: u16,
    pub streams: StreamCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleInfo {
    /// Position in the title list, when looked up through it
    pub index: Option<usize>,
    pub playlist: u32,
    /// 90 kHz
    pub duration: u64,
    pub angle_count: u32,
    pub chapters: Vec<ChapterInfo>,
    pub marks: Vec<MarkInfo>,
    pub clips: Vec<ClipSummary>,
}

impl TitleInfo {
    fn new(title: &NavTitle, index: Option<usize>) -> Self {
        let chapters = title
            .chapters
            .iter()
            .enumerate()
            .map(|(i, m)| ChapterInfo {
                number: i as u32 + 1,
                start: ticks_90k(m.title_time),
                duration: ticks_90k(m.duration),
                offset: packet_to_byte(m.title_pkt),
                clip_ref: m.clip as u32,
            })
            .collect();
        let marks = title.marks.iter().map(mark_info).collect();
        let clips = title
            .clips
            .iter()
            .map(|c| ClipSummary {
                clip_id: c.clip_id.clone(),
                packets: c.packets(),
                start_time: ticks_90k(c.title_time),
                in_time: ticks_90k(c.in_time),
                out_time: ticks_90k(c.out_time),
                still_mode: c.still_mode,
                still_time: c.still_time,
                streams: c.stream_counts,
            })
            .collect();

        Self {
            index,
            playlist: title.playlist_id,
            duration: ticks_90k(title.duration),
            angle_count: title.angle_count as u32,
            chapters,
            marks,
            clips,
        }
    }
}

fn mark_info(m: &NavMark) -> MarkInfo {
    MarkInfo {
        number: m.number as u32,
        mark_type: m.mark_type,
        start: ticks_90k(m.title_time),
        duration: ticks_90k(m.duration),
        offset: packet_to_byte(m.title_pkt),
        clip_ref: m.clip as u32,
    }
}

/// 45 kHz navigation time to 90 kHz
fn ticks_90k(t: u32) -> u64 {
    t as u64 * 2
}

// ============================================================================
// Public Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TitleType {
    /// Direct playlist playback or nothing selected
    Undefined,
    Hdmv,
    Bdj,
}

/// Outcome of one `read`: payload bytes and at most one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadResult {
    pub bytes: usize,
    pub event: Option<BdEvent>,
}

impl ReadResult {
    fn event(event: BdEvent) -> Self {
        Self {
            bytes: 0,
            event: Some(event),
        }
    }
}

/// Key codes handed to a managed title
fn key_code(key: UserKey) -> u32 {
    match key {
        UserKey::Digit(d) => d as u32,
        UserKey::Popup => 11,
        UserKey::Up => 12,
        UserKey::Down => 13,
        UserKey::Left => 14,
        UserKey::Right => 15,
        UserKey::Enter => 16,
        UserKey::MouseActivate => 17,
    }
}

fn runtime_event(psr: u32) -> Option<RuntimeEvent> {
    match psr {
        PSR_PLAYLIST => Some(RuntimeEvent::Playlist),
        PSR_PLAYITEM => Some(RuntimeEvent::PlayItem),
        PSR_CHAPTER => Some(RuntimeEvent::Chapter),
        PSR_TIME => Some(RuntimeEvent::PtsChanged),
        PSR_ANGLE_NUMBER => Some(RuntimeEvent::Angle),
        PSR_PRIMARY_AUDIO_ID => Some(RuntimeEvent::PrimaryAudio),
        PSR_PG_STREAM => Some(RuntimeEvent::Subtitle),
        PSR_SECONDARY_AUDIO_VIDEO => Some(RuntimeEvent::SecondaryStream),
        _ => None,
    }
}

/// Main-path pid of a 1-based stream number
fn main_path_pid(streams: &[StnStream], number: u32) -> Option<u16> {
    let stream = streams.get((number as usize).checked_sub(1)?)?;
    (stream.entry.stream_type == 1).then_some(stream.entry.pid)
}

fn load_movie_objects(disc: &dyn DiscFs) -> Option<Arc<MovieObjects>> {
    let data = match disc.read_file(disc_io::MOVIE_OBJECT_PATH) {
        Ok(data) => data,
        Err(e) => {
            warn!("{}: {}", disc_io::MOVIE_OBJECT_PATH, e);
            return None;
        }
    };
    match MovieObjects::parse(&data) {
        Ok(objects) => Some(Arc::new(objects)),
        Err(e) => {
            warn!("{}: {}", disc_io::MOVIE_OBJECT_PATH, e);
            None
        }
    }
}

// ============================================================================
// Player Core
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct PendingAngle {
    angle: usize,
    clip: usize,
    clip_pkt: u32,
}

#[derive(Debug, Clone, Copy)]
enum PlayTarget {
    Start,
    PlayItem(u32),
    Mark(u32),
}

struct PlayerCore {
    disc: Box<dyn DiscFs>,
    config: PlayerConfig,
    encrypted_threshold: u32,
    index: IndexFile,
    objects: Option<Arc<MovieObjects>>,
    regs: RegisterBank,
    /// Filled by the register listener, drained under the player lock
    psr_events: Arc<Mutex<VecDeque<PsrEvent>>>,
    vm: Option<HdmvVm>,
    gc: GraphicsController,
    runtime: Box<dyn ManagedRuntime>,
    title_type: TitleType,

    title: Option<NavTitle>,
    stream: Option<BdStream>,
    clip: usize,
    title_list: Option<Vec<TitleListEntry>>,

    events: VecDeque<BdEvent>,
    uo_mask: UoMask,
    end_of_title: bool,
    /// Holding at the end of a still play item
    clip_still: bool,
    /// Still requested by a navigation program
    hdmv_still: bool,
    pending_angle: Option<PendingAngle>,
    /// Next subtitle: pts and the clip packet at which it is due
    pg_wakeup: Option<(i64, u32)>,
    last_mark: Option<usize>,
    idle_reported: bool,
}

impl PlayerCore {
    fn new(
        disc: Box<dyn DiscFs>,
        config: PlayerConfig,
        runtime: Box<dyn ManagedRuntime>,
        overlay: Arc<OverlaySink>,
    ) -> NavResult<Self> {
        config.validate()?;

        let index_data = disc
            .read_file(disc_io::INDEX_PATH)
            .map_err(|e| match e {
                NavError::NotFound(path) => NavError::NotBluray(path),
                e => e,
            })?;
        let index = IndexFile::parse(&index_data)
            .map_err(|e| NavError::parse(disc_io::INDEX_PATH, e))?;
        let objects = load_movie_objects(disc.as_ref());

        let mut regs = RegisterBank::new();
        config.apply(&mut regs);
        let psr_events = Arc::new(Mutex::new(VecDeque::new()));
        let queue = psr_events.clone();
        regs.subscribe(move |ev: &PsrEvent| queue.lock().push_back(*ev));

        let limit = u32::try_from(config.vm_instruction_limit).unwrap_or(u32::MAX);
        let vm = objects.clone().map(|o| HdmvVm::new(o, limit));

        let encrypted_threshold = if disc.is_protected() {
            warn!("disc is protected and no keys are available");
            0
        } else {
            config.encrypted_unit_threshold
        };

        info!(
            "disc opened: {} titles, first play: {}, top menu: {}",
            index.titles.len(),
            index.first_play.is_some(),
            index.top_menu.is_some()
        );

        Ok(Self {
            disc,
            config,
            encrypted_threshold,
            index,
            objects,
            regs,
            psr_events,
            vm,
            gc: GraphicsController::new(overlay),
            runtime,
            title_type: TitleType::Undefined,
            title: None,
            stream: None,
            clip: 0,
            title_list: None,
            events: VecDeque::new(),
            uo_mask: UoMask::EMPTY,
            end_of_title: false,
            clip_still: false,
            hdmv_still: false,
            pending_angle: None,
            pg_wakeup: None,
            last_mark: None,
            idle_reported: false,
        })
    }

    fn queue(&mut self, event: BdEvent) {
        debug!("event {:?}", event);
        self.events.push_back(event);
    }

    fn set_psr(&mut self, psr: u32, value: u32) {
        if let Err(e) = self.regs.write(psr, value) {
            warn!("PSR{} = {}: {}", psr, value, e);
        }
    }

    fn pending_event(&mut self) -> Option<BdEvent> {
        self.process_psr_events();
        self.drain_gc_events();
        self.events.pop_front()
    }

    // ------------------------------------------------------------------------
    // Disc info
    // ------------------------------------------------------------------------

    fn object_supported(&self, object: &IndexObject) -> bool {
        match object {
            IndexObject::Hdmv { id_ref, .. } => self
                .objects
                .as_ref()
                .is_some_and(|o| (*id_ref as usize) < o.objects.len()),
            IndexObject::Bdj { .. } => self.config.bdj_enabled && self.runtime.is_available(),
        }
    }

    fn disc_info(&self) -> DiscInfo {
        let titles: Vec<IndexTitleInfo> = self
            .index
            .titles
            .iter()
            .enumerate()
            .map(|(i, t)| IndexTitleInfo {
                number: i as u32 + 1,
                hdmv: t.object.is_hdmv(),
                interactive: t.object.is_interactive(),
                accessible: t.is_accessible(),
                hidden: t.is_hidden(),
                supported: self.object_supported(&t.object),
            })
            .collect();
        let bdj_titles = titles.iter().filter(|t| !t.hdmv).count() as u32;
        let supported = |o: &Option<IndexObject>| o.as_ref().is_some_and(|o| self.object_supported(o));
        let bdj_first = matches!(self.index.first_play, Some(IndexObject::Bdj { .. }))
            || matches!(self.index.top_menu, Some(IndexObject::Bdj { .. }));

        DiscInfo {
            first_play_supported: supported(&self.index.first_play),
            top_menu_supported: supported(&self.index.top_menu),
            bdj_detected: bdj_titles > 0 || bdj_first,
            content_protected: self.disc.is_protected(),
            num_hdmv_titles: titles.len() as u32 - bdj_titles,
            num_bdj_titles: bdj_titles,
            num_unsupported_titles: titles.iter().filter(|t| !t.supported).count() as u32,
            titles,
        }
    }

    fn title_list(&mut self) -> NavResult<&[TitleListEntry]> {
        if self.title_list.is_none() {
            let list = scan_titles(self.disc.as_ref(), TITLES_RELEVANT, self.config.min_title_seconds)?;
            info!("{} titles listed", list.len());
            self.title_list = Some(list);
        }
        Ok(self.title_list.as_deref().unwrap_or(&[]))
    }

    fn playlist_info(&self, playlist: u32, index: Option<usize>) -> NavResult<TitleInfo> {
        if let Some(title) = self.title.as_ref().filter(|t| t.playlist_id == playlist) {
            return Ok(TitleInfo::new(title, index));
        }
        let title = NavTitle::open(self.disc.as_ref(), playlist, 0)?;
        Ok(TitleInfo::new(&title, index))
    }

    fn listed_playlist(&mut self, index: usize) -> NavResult<u32> {
        self.title_list()?
            .get(index)
            .map(|e| e.playlist_id)
            .ok_or(NavError::InvalidTitle(index as u32))
    }

    // ------------------------------------------------------------------------
    // Titles
    // ------------------------------------------------------------------------

    fn start_title(&mut self, number: u32) -> NavResult<()> {
        let object = match number {
            TITLE_FIRST_PLAY => self.index.first_play.clone(),
            TITLE_TOP_MENU => self.index.top_menu.clone(),
            n => self.index.title(n).map(|t| t.object.clone()),
        }
        .ok_or(NavError::InvalidTitle(number))?;

        self.stop_runtime();
        self.hdmv_still = false;
        self.idle_reported = false;
        self.set_psr(PSR_TITLE_NUMBER, number);

        match object {
            IndexObject::Hdmv { id_ref, .. } => {
                info!("title {}: movie object {}", number, id_ref);
                self.title_type = TitleType::Hdmv;
                let vm = self
                    .vm
                    .as_mut()
                    .ok_or_else(|| NavError::NotFound(disc_io::MOVIE_OBJECT_PATH.to_string()))?;
                vm.start_object(id_ref as u32)?;
            }
            IndexObject::Bdj { name, .. } => {
                info!("title {}: managed object {}", number, name);
                if let Some(vm) = self.vm.as_mut() {
                    vm.stop();
                }
                self.title_type = TitleType::Undefined;
                if !self.config.bdj_enabled {
                    self.queue(BdEvent::Error(ErrorKind::ManagedRuntime));
                    return Err(BridgeError::Unavailable.into());
                }
                if let Err(e) = self.runtime.start(number, &name) {
                    error!("managed title {}: {}", name, e);
                    self.queue(BdEvent::Error(ErrorKind::ManagedRuntime));
                    return Err(e.into());
                }
                self.title_type = TitleType::Bdj;
            }
        }
        self.update_uo_mask();
        Ok(())
    }

    /// Start a title on request of the application or a program
    fn play_title(&mut self, number: u32) -> NavResult<()> {
        self.close_playlist();
        match self.start_title(number) {
            Ok(()) => {
                self.run_dispatch();
                Ok(())
            }
            Err(e @ (NavError::InvalidTitle(_) | NavError::Bridge(_))) => Err(e),
            Err(e) => {
                error!("title {}: {}", number, e);
                self.title_fault(ErrorKind::Vm);
                Err(e)
            }
        }
    }

    fn stop_runtime(&mut self) {
        if self.title_type == TitleType::Bdj {
            if let Err(e) = self.runtime.stop() {
                warn!("managed runtime stop: {}", e);
            }
        }
    }

    fn deliver(&mut self, event: RuntimeEvent, param: u32) {
        if self.title_type != TitleType::Bdj {
            return;
        }
        if let Err(e) = self.runtime.deliver(event, param) {
            warn!("managed runtime: {}", e);
            self.title_fault(ErrorKind::ManagedRuntime);
        }
    }

    /// Stop the current title. `event` is the one notification describing why.
    fn stop_title(&mut self, event: BdEvent) {
        self.queue(event);
        if let Some(vm) = self.vm.as_mut() {
            vm.stop();
        }
        self.stop_runtime();
        self.title_type = TitleType::Undefined;
        self.stream = None;
        self.title = None;
        self.gc.reset();
        self.drain_gc_events();
        self.reset_playback_state();
        self.update_uo_mask();
    }

    fn title_fault(&mut self, kind: ErrorKind) {
        self.stop_title(BdEvent::Error(kind));
    }

    // ------------------------------------------------------------------------
    // Playlists
    // ------------------------------------------------------------------------

    fn reset_playback_state(&mut self) {
        self.clip = 0;
        self.end_of_title = false;
        self.clip_still = false;
        self.pending_angle = None;
        self.pg_wakeup = None;
        self.last_mark = None;
    }

    fn open_playlist(&mut self, playlist: u32) -> NavResult<()> {
        self.close_playlist();

        let angle = self.regs.read(PSR_ANGLE_NUMBER).saturating_sub(1) as usize;
        let title = NavTitle::open(self.disc.as_ref(), playlist, angle)?;
        info!(
            "playlist {}: {} clips, {} chapters, {} angles",
            title.name(),
            title.clips.len(),
            title.chapters.len(),
            title.angle_count
        );
        let angle = title.angle as u32 + 1;
        self.title = Some(title);
        self.reset_playback_state();
        self.idle_reported = false;
        self.set_psr(PSR_PLAYLIST, playlist);
        self.set_psr(PSR_ANGLE_NUMBER, angle);

        self.preload_menu();
        self.open_clip(0, None)?;
        Ok(())
    }

    /// Close the playlist; reports a stop unless it was played (nearly) to the end
    fn close_playlist(&mut self) {
        let Some(title) = self.title.as_ref() else {
            return;
        };
        let stopped = match self.stream.as_ref() {
            Some(stream) if !self.end_of_title => {
                self.clip + 1 < title.clips.len()
                    || stream.remaining_packets() >= self.config.stop_threshold_packets
            }
            _ => false,
        };
        debug!("playlist {} closed", title.name());
        if stopped {
            self.queue(BdEvent::PlaylistStop);
        }
        self.stream = None;
        self.title = None;
        self.gc.reset();
        self.reset_playback_state();
        self.update_uo_mask();
    }

    /// Menus carried in a sub-path are loaded whole when the playlist opens
    fn preload_menu(&mut self) {
        if self.title_type != TitleType::Hdmv {
            return;
        }
        let number = self.regs.read(PSR_IG_STREAM_ID) & 0xff;
        let Some(title) = self.title.as_ref() else {
            return;
        };
        let Some(entry) = title
            .playlist
            .play_items
            .first()
            .and_then(|item| item.stn.ig.get((number as usize).checked_sub(1)?))
            .map(|s| s.entry)
        else {
            return;
        };
        if entry.stream_type == 1 {
            return;
        }
        let Some(sub_path) = title.sub_paths.get(entry.subpath_id as usize) else {
            warn!("IG stream refers to missing sub-path {}", entry.subpath_id);
            return;
        };
        if sub_path.sub_path_type != SUB_PATH_IG_MENU {
            debug!("IG stream in sub-path of type {}", sub_path.sub_path_type);
        }
        let Some(clip_id) = sub_path
            .clips
            .get(entry.subclip_id as usize)
            .map(|c| c.clip_id.clone())
        else {
            return;
        };

        match preload_clip(
            self.disc.as_ref(),
            &clip_id,
            self.config.preload_ceiling,
            self.encrypted_threshold,
        ) {
            Ok(clip) => {
                let packets = clip.extract_pes(entry.pid);
                debug!("menu {}: {} PES packets preloaded", clip_id, packets.len());
                for pes in &packets {
                    if self.gc.feed_ig(pes, &mut self.regs).is_err() {
                        warn!("menu {}: rest of the sub-path skipped", clip_id);
                        break;
                    }
                }
            }
            Err(e) => warn!("menu sub-path {} not loaded: {}", clip_id, e),
        }
    }

    fn open_clip(&mut self, index: usize, clip_pkt: Option<u32>) -> NavResult<()> {
        let title = self.title.as_ref().ok_or(NavError::NoTitle)?;
        let clip = title
            .clips
            .get(index)
            .ok_or(NavError::InvalidPlayItem(index as u32))?;

        let mut stream = BdStream::open(
            self.disc.as_ref(),
            &clip.clip_id,
            clip.start_pkt,
            clip.end_pkt,
            self.encrypted_threshold,
        )?;
        if let Some(pkt) = clip_pkt {
            stream.seek(pkt);
        }
        stream.uo_mask = clip.uo_mask;
        stream.set_window_filter(Some(WindowFilter::new(
            clip.in_time,
            clip.out_time,
            clip.stream_counts,
        )));
        let start = stream.packet();
        debug!("clip {} opened at packet {}", clip.clip_id, start);

        self.clip = index;
        self.stream = Some(stream);
        self.clip_still = false;
        self.pg_wakeup = None;
        self.set_psr(PSR_PLAYITEM, index as u32);
        self.select_graphics_streams();
        self.update_position(start);
        self.update_uo_mask();
        Ok(())
    }

    /// Point the graphics extractor at the streams selected in PSR0/PSR2
    fn select_graphics_streams(&mut self) {
        let ig_number = self.regs.read(PSR_IG_STREAM_ID) & 0xff;
        let pg_reg = self.regs.read(PSR_PG_STREAM);
        let Some(item) = self
            .title
            .as_ref()
            .and_then(|t| t.playlist.play_items.get(self.clip))
        else {
            return;
        };

        let ig_pid = match self.title_type {
            TitleType::Hdmv => main_path_pid(&item.stn.ig, ig_number),
            _ => None,
        };
        let pg_pid = if pg_reg & PG_DISPLAY_FLAG != 0 {
            main_path_pid(item.stn.primary_pg(), pg_reg & PG_STREAM_MASK)
        } else {
            None
        };
        self.gc.set_pg_enabled(pg_pid.is_some());

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match stream.graphics_mut() {
            Some(extractor) => {
                extractor.set_ig_pid(ig_pid);
                extractor.set_pg_pid(pg_pid);
            }
            None if ig_pid.is_some() || pg_pid.is_some() => {
                stream.set_graphics(Some(GraphicsExtractor::new(ig_pid, pg_pid)));
            }
            None => {}
        }
    }

    fn next_clip(&mut self) -> NavResult<()> {
        let count = self.title.as_ref().map_or(0, |t| t.clips.len());
        if self.clip + 1 < count {
            self.open_clip(self.clip + 1, None)
        } else {
            self.finish_title();
            Ok(())
        }
    }

    fn finish_title(&mut self) {
        if self.end_of_title {
            return;
        }
        self.end_of_title = true;
        let playlist = self.title.as_ref().map_or(0, |t| t.playlist_id);
        info!("playlist {:05} finished", playlist);
        self.queue(BdEvent::EndOfTitle);
        match self.title_type {
            TitleType::Hdmv => {
                if let Some(vm) = self.vm.as_mut() {
                    vm.playback_finished();
                }
            }
            TitleType::Bdj => self.deliver(RuntimeEvent::EndOfPlaylist, playlist),
            TitleType::Undefined => {}
        }
    }

    /// Still at the end of the clip; false when the clip has none
    fn enter_clip_still(&mut self) -> bool {
        let Some(clip) = self.title.as_ref().and_then(|t| t.clips.get(self.clip)) else {
            return false;
        };
        let seconds = match clip.still_mode {
            StillMode::None => return false,
            StillMode::Time => clip.still_time as u32,
            StillMode::Infinite => 0,
        };
        self.clip_still = true;
        self.queue(BdEvent::StillTime(seconds));
        true
    }

    fn skip_still(&mut self) -> NavResult<()> {
        if self.hdmv_still {
            self.hdmv_still = false;
            self.queue(BdEvent::Still(false));
        }
        if self.clip_still {
            self.clip_still = false;
            self.next_clip()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    fn read(&mut self, buf: &mut [u8]) -> NavResult<ReadResult> {
        if let Some(event) = self.pending_event() {
            return Ok(ReadResult::event(event));
        }
        if self.title_type == TitleType::Hdmv {
            self.run_dispatch();
            if let Some(event) = self.pending_event() {
                return Ok(ReadResult::event(event));
            }
        }

        let bytes = self.read_stream(buf)?;
        if self.title_type == TitleType::Hdmv {
            self.run_dispatch();
        }

        let mut event = self.pending_event();
        if bytes == 0 && event.is_none() && !self.idle_reported && self.is_idle() {
            self.idle_reported = true;
            event = Some(BdEvent::Idle);
        }
        Ok(ReadResult { bytes, event })
    }

    fn is_idle(&self) -> bool {
        let vm_busy = self
            .vm
            .as_ref()
            .is_some_and(|vm| vm.is_running() || vm.is_waiting_for_playback());
        let playing = self.stream.is_some() && !self.end_of_title;
        self.title_type != TitleType::Bdj
            && !vm_busy
            && !playing
            && !self.clip_still
            && !self.hdmv_still
    }

    fn read_stream(&mut self, buf: &mut [u8]) -> NavResult<usize> {
        if buf.is_empty() || self.hdmv_still || self.clip_still {
            return Ok(0);
        }

        loop {
            let (eof, pos) = match self.stream.as_ref() {
                Some(s) => (s.is_eof(), s.clip_pos()),
                None => return Ok(0),
            };
            if eof {
                if self.end_of_title || self.enter_clip_still() {
                    return Ok(0);
                }
                self.next_clip()?;
                continue;
            }

            let mut len = buf.len();
            if let Some(pending) = self.pending_angle {
                let target = packet_to_byte(pending.clip_pkt);
                if pending.clip != self.clip {
                    self.pending_angle = None;
                } else if pos >= target {
                    self.pending_angle = None;
                    self.change_angle(pending.angle)?;
                    continue;
                } else {
                    len = len.min((target - pos) as usize);
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                return Ok(0);
            };
            let result = stream.read(&mut buf[..len]);
            let graphics = stream.take_graphics();
            let clip_pkt = stream.packet();
            let at_end = stream.is_eof();

            let read = match result {
                Ok(read) => read,
                Err(NavError::Encrypted) => {
                    error!("stream is encrypted, playback stopped");
                    self.stop_title(BdEvent::Encrypted);
                    return Ok(0);
                }
                Err(e) => return Err(e),
            };
            if read.corrupt_units > 0 {
                self.queue(BdEvent::ReadError(read.corrupt_units));
            }
            self.feed_graphics(graphics);

            if read.bytes == 0 {
                if at_end {
                    continue;
                }
                return Ok(0);
            }
            self.update_position(clip_pkt);
            return Ok(read.bytes);
        }
    }

    /// Hand extracted graphics to the controller. A malformed segment closes
    /// the clip's graphics filter; payload delivery carries on.
    fn feed_graphics(&mut self, graphics: Vec<GraphicsPes>) {
        for g in graphics {
            let result = match g.kind {
                GraphicsKind::Interactive => self.gc.feed_ig(&g.pes, &mut self.regs),
                GraphicsKind::Presentation => self.gc.feed_pg(&g.pes),
            };
            if result.is_err() {
                if let Some(stream) = self.stream.as_mut() {
                    stream.close_graphics();
                }
                return;
            }
        }
    }

    /// Chapter, time and mark registers for the current read position
    fn update_position(&mut self, clip_pkt: u32) {
        let Some(title) = self.title.as_ref() else {
            return;
        };
        let Some(clip) = title.clips.get(self.clip) else {
            return;
        };
        let title_pkt = clip.title_packet(clip_pkt);
        let chapter = title.chapter_at(title_pkt).map_or(0xffff, |c| c as u32 + 1);
        let time = clip.time_of_packet(clip_pkt);
        let mark = title.mark_at(title_pkt);

        self.set_psr(PSR_CHAPTER, chapter);
        self.set_psr(PSR_TIME, time);
        if mark > self.last_mark {
            if let Some(m) = mark {
                self.queue(BdEvent::PlayMark(m as u32));
                self.deliver(RuntimeEvent::Mark, m as u32);
            }
        }
        self.last_mark = mark;
        self.check_pg_wakeup(clip_pkt);
    }

    /// Present subtitles whose presentation time the read position has passed
    fn check_pg_wakeup(&mut self, clip_pkt: u32) {
        loop {
            let Some(pts) = self.gc.pg_wakeup() else {
                self.pg_wakeup = None;
                return;
            };
            let due = match self.pg_wakeup {
                Some((cached, pkt)) if cached == pts => pkt,
                _ => {
                    let clip_time = (pts.max(0) / 2).min(u32::MAX as i64) as u32;
                    let Some(clip) = self.title.as_ref().and_then(|t| t.clips.get(self.clip)) else {
                        return;
                    };
                    let pkt = clip.packet_for_time(clip_time);
                    self.pg_wakeup = Some((pts, pkt));
                    pkt
                }
            };
            if clip_pkt < due {
                return;
            }
            self.gc.update_time(pts);
        }
    }

    // ------------------------------------------------------------------------
    // Seeking
    // ------------------------------------------------------------------------

    fn title_ref(&self) -> NavResult<&NavTitle> {
        self.title.as_ref().ok_or(NavError::NoTitle)
    }

    fn seek_to(&mut self, pos: NavPosition) -> NavResult<u64> {
        self.last_mark = self.title.as_ref().and_then(|t| t.mark_at(pos.title_pkt));
        let same_clip = pos.clip == self.clip && self.stream.is_some();
        if same_clip {
            let mut pkt = pos.clip_pkt;
            if let Some(stream) = self.stream.as_mut() {
                stream.seek(pos.clip_pkt);
                pkt = stream.packet();
            }
            self.update_position(pkt);
        } else {
            self.open_clip(pos.clip, Some(pos.clip_pkt))?;
        }
        self.end_of_title = false;
        self.clip_still = false;
        self.pending_angle = None;
        self.pg_wakeup = None;
        self.idle_reported = false;
        self.gc.clear_pg();

        let offset = packet_to_byte(pos.title_pkt);
        debug!("seek to clip {} packet {} (title offset {})", pos.clip, pos.clip_pkt, offset);
        self.queue(BdEvent::Seek(offset));
        Ok(offset)
    }

    fn seek_play_item(&mut self, play_item: usize) -> NavResult<u64> {
        let pos = self.title_ref()?.play_item_search(play_item)?;
        self.seek_to(pos)
    }

    fn seek_mark(&mut self, mark: usize) -> NavResult<u64> {
        let pos = self.title_ref()?.mark_search(mark)?;
        self.seek_to(pos)
    }

    fn seek_chapter(&mut self, chapter: usize) -> NavResult<u64> {
        let pos = self.title_ref()?.chapter_search(chapter)?;
        self.seek_to(pos)
    }

    fn seek_time(&mut self, tick_90k: u64) -> NavResult<u64> {
        let time = (tick_90k / 2).min(u32::MAX as u64) as u32;
        let pos = self.title_ref()?.time_search(time);
        self.seek_to(pos)
    }

    fn seek(&mut self, offset: u64) -> NavResult<u64> {
        let pos = self.title_ref()?.packet_search(offset);
        self.seek_to(pos)
    }

    fn check_uo(&self, masked: bool, operation: &'static str) -> NavResult<()> {
        if masked {
            debug!("{} masked", operation);
            return Err(NavError::UserOperationMasked(operation));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Angles
    // ------------------------------------------------------------------------

    fn change_angle(&mut self, angle: usize) -> NavResult<()> {
        let clip = self.clip;
        let clip_pkt = self.stream.as_ref().map(|s| s.packet());
        let title = self.title.as_mut().ok_or(NavError::NoTitle)?;
        let reopen = title.set_angle(self.disc.as_ref(), angle, clip)?;
        let number = title.angle as u32 + 1;
        self.set_psr(PSR_ANGLE_NUMBER, number);
        if reopen {
            if let Some(pkt) = clip_pkt {
                self.open_clip(clip, Some(pkt))?;
            }
        }
        Ok(())
    }

    /// Change at the next seamless change point, or at once if the clip has none
    fn seamless_angle_change(&mut self, angle: usize) -> NavResult<()> {
        let title = self.title_ref()?;
        if angle >= title.angle_count {
            return Err(NavError::InvalidAngle(angle as u32));
        }
        if angle == title.angle {
            self.pending_angle = None;
            return Ok(());
        }
        let clip_pkt = self.stream.as_ref().map_or(0, |s| s.packet());
        match title.angle_change_search(self.clip, clip_pkt) {
            Some(point) => {
                debug!("angle {} pending at packet {}", angle, point);
                self.pending_angle = Some(PendingAngle {
                    angle,
                    clip: self.clip,
                    clip_pkt: point,
                });
                Ok(())
            }
            None => self.change_angle(angle),
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Let the VM and the graphics controller exchange requests until both are
    /// quiet. A title that keeps them busy without the movie object moving
    /// forward is stopped as live-locked.
    fn run_dispatch(&mut self) {
        let limit = self.config.livelock_iterations;
        let mut rounds = 0u32;
        // furthest command reached per movie object during this dispatch
        let mut reached: HashMap<u32, u32> = HashMap::new();
        if let Some((object, pc)) = self.vm.as_ref().and_then(|vm| vm.object_position()) {
            reached.insert(object, pc);
        }
        loop {
            self.process_psr_events();
            let mut busy = false;

            while let Some(ev) = self.gc.next_event() {
                busy = true;
                self.handle_gc_event(ev);
            }

            if self.title_type == TitleType::Hdmv {
                let result = match self.vm.as_mut() {
                    Some(vm) => {
                        busy |= vm.is_running();
                        vm.run(&mut self.regs)
                    }
                    None => Ok(()),
                };
                if let Err(e) = result {
                    error!("navigation program fault: {}", e);
                    self.title_fault(ErrorKind::Vm);
                    return;
                }
                while let Some(ev) = self.vm.as_mut().and_then(|vm| vm.next_event()) {
                    busy = true;
                    self.handle_hdmv_event(ev);
                }
            }

            if !busy {
                break;
            }
            if self.vm_progressed(&mut reached) {
                rounds = 0;
                continue;
            }
            rounds += 1;
            if rounds > limit {
                error!("menu logic made no progress after {} rounds, title stopped", limit);
                self.title_fault(ErrorKind::Livelock);
                return;
            }
        }
        self.process_psr_events();
        self.update_uo_mask();
    }

    /// True when the movie object reached a command it had not reached before.
    /// Bounded per dispatch, so a looping program still ends up counted.
    fn vm_progressed(&self, reached: &mut HashMap<u32, u32>) -> bool {
        if self.title_type != TitleType::Hdmv {
            return false;
        }
        let Some((object, pc)) = self.vm.as_ref().and_then(|vm| vm.object_position()) else {
            return false;
        };
        match reached.get(&object) {
            Some(&furthest) if pc <= furthest => false,
            _ => {
                reached.insert(object, pc);
                true
            }
        }
    }

    fn drain_gc_events(&mut self) {
        while let Some(ev) = self.gc.next_event() {
            self.handle_gc_event(ev);
        }
    }

    fn handle_gc_event(&mut self, ev: GcEvent) {
        match ev {
            GcEvent::Menu(open) => self.queue(BdEvent::Menu(open)),
            GcEvent::PopupAvailable(available) => self.queue(BdEvent::Popup(available)),
            GcEvent::Sound(id) => self.queue(BdEvent::SoundEffect(id)),
            GcEvent::RunButton(cmds) => {
                if self.title_type != TitleType::Hdmv {
                    return;
                }
                if let Some(vm) = self.vm.as_mut() {
                    vm.run_button_program(&cmds);
                }
            }
            GcEvent::UoMaskChanged(_) => self.update_uo_mask(),
        }
    }

    fn handle_hdmv_event(&mut self, ev: HdmvEvent) {
        debug!("HDMV {:?}", ev);
        match ev {
            HdmvEvent::Title(n) | HdmvEvent::CallTitle(n) => {
                self.close_playlist();
                match self.start_title(n) {
                    Ok(()) => {}
                    Err(NavError::Bridge(_)) => {}
                    Err(e) => {
                        error!("title {}: {}", n, e);
                        self.title_fault(ErrorKind::Vm);
                    }
                }
            }
            HdmvEvent::PlayPl { playlist } => self.vm_play(playlist, PlayTarget::Start),
            HdmvEvent::PlayPlPi {
                playlist,
                play_item,
            } => self.vm_play(playlist, PlayTarget::PlayItem(play_item)),
            HdmvEvent::PlayPlPm { playlist, mark } => self.vm_play(playlist, PlayTarget::Mark(mark)),
            HdmvEvent::PlayPi(play_item) => {
                if let Err(e) = self.seek_play_item(play_item as usize) {
                    error!("LINK_PI {}: {}", play_item, e);
                    self.title_fault(ErrorKind::Vm);
                }
            }
            HdmvEvent::PlayPm(mark) => {
                if let Err(e) = self.seek_mark(mark as usize) {
                    error!("LINK_MK {}: {}", mark, e);
                    self.title_fault(ErrorKind::Vm);
                }
            }
            HdmvEvent::PlayStop => self.close_playlist(),
            HdmvEvent::SetButtonPage {
                page,
                button,
                skip_out_effect,
            } => self
                .gc
                .set_button_page(page, button, skip_out_effect, &mut self.regs),
            HdmvEvent::EnableButton(id) => self.gc.enable_button(id, &mut self.regs),
            HdmvEvent::DisableButton(id) => self.gc.disable_button(id, &mut self.regs),
            HdmvEvent::PopupOff => self.gc.popup_off(),
            HdmvEvent::IgEnd => self.gc.ig_end(),
            HdmvEvent::StillOn => {
                self.hdmv_still = true;
                self.queue(BdEvent::Still(true));
            }
            HdmvEvent::StillOff => {
                if self.hdmv_still {
                    self.hdmv_still = false;
                    self.queue(BdEvent::Still(false));
                }
            }
            HdmvEvent::End => debug!("movie object finished"),
        }
    }

    fn vm_play(&mut self, playlist: u32, target: PlayTarget) {
        let result = self.open_playlist(playlist).and_then(|()| match target {
            PlayTarget::Start => Ok(0),
            PlayTarget::PlayItem(n) => self.seek_play_item(n as usize),
            PlayTarget::Mark(n) => self.seek_mark(n as usize),
        });
        if let Err(e) = result {
            error!("PLAY_PL {:05} ({:?}): {}", playlist, target, e);
            self.title_fault(ErrorKind::Vm);
        }
    }

    // ------------------------------------------------------------------------
    // Register events
    // ------------------------------------------------------------------------

    fn process_psr_events(&mut self) {
        loop {
            let Some(ev) = self.psr_events.lock().pop_front() else {
                break;
            };
            match ev.kind {
                PsrEventKind::Write => {}
                PsrEventKind::Change => self.register_changed(&ev),
                PsrEventKind::Restore => self.register_restored(&ev),
            }
        }
    }

    fn register_changed(&mut self, ev: &PsrEvent) {
        for event in BdEvent::from_psr_change(ev) {
            self.queue(event);
        }
        match ev.psr {
            PSR_IG_STREAM_ID | PSR_PG_STREAM => self.select_graphics_streams(),
            PSR_ANGLE_NUMBER => {
                let current = self.title.as_ref().map(|t| t.angle as u32 + 1);
                if current.is_some_and(|a| a != ev.new_val) {
                    if let Err(e) = self.change_angle(ev.new_val.saturating_sub(1) as usize) {
                        warn!("angle {}: {}", ev.new_val, e);
                    }
                }
            }
            _ => {}
        }
        if let Some(event) = runtime_event(ev.psr) {
            self.deliver(event, ev.new_val);
        }
    }

    /// Bring playback back to a state saved before a menu call
    fn register_restored(&mut self, ev: &PsrEvent) {
        let value = ev.new_val;
        let result = match ev.psr {
            PSR_TITLE_NUMBER => {
                self.queue(BdEvent::Title(value));
                Ok(())
            }
            PSR_PLAYLIST => self.open_playlist(value),
            PSR_PLAYITEM if self.title.is_some() => self.seek_play_item(value as usize).map(drop),
            PSR_TIME => {
                let pos = self.title.as_ref().and_then(|t| {
                    let clip = t.clips.get(self.clip)?;
                    let clip_pkt = clip.packet_for_time(value);
                    Some(NavPosition {
                        clip: self.clip,
                        clip_pkt,
                        title_pkt: clip.title_packet(clip_pkt),
                    })
                });
                match pos {
                    Some(pos) => self.seek_to(pos).map(drop),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("restoring PSR{} = {}: {}", ev.psr, value, e);
        }
    }

    fn update_uo_mask(&mut self) {
        let title_mask = match (self.title_type, self.vm.as_ref()) {
            (TitleType::Hdmv, Some(vm)) => vm.uo_mask(),
            _ => UoMask::EMPTY,
        };
        let playlist = self.title.as_ref().map_or(UoMask::EMPTY, |t| t.uo_mask);
        let clip = self.stream.as_ref().map_or(UoMask::EMPTY, |s| s.uo_mask);
        let mask = title_mask
            .combine(playlist)
            .combine(clip)
            .combine(self.gc.page_uo_mask());
        if mask != self.uo_mask {
            self.uo_mask = mask;
            self.queue(BdEvent::UoMaskChanged(mask));
        }
    }

    // ------------------------------------------------------------------------
    // Application requests
    // ------------------------------------------------------------------------

    fn play(&mut self) -> NavResult<()> {
        self.close_playlist();
        self.regs.reset_playback();
        if self.index.first_play.is_some() {
            self.play_title(TITLE_FIRST_PLAY)
        } else if self.index.top_menu.is_some() {
            self.play_title(TITLE_TOP_MENU)
        } else {
            Err(NavError::InvalidTitle(TITLE_FIRST_PLAY))
        }
    }

    /// Like `check_uo`, and a running managed title is told about the refusal
    fn check_navigation_uo(
        &mut self,
        masked: bool,
        operation: &'static str,
        field: u32,
    ) -> NavResult<()> {
        if masked {
            self.deliver(RuntimeEvent::UoMasked, field);
        }
        self.check_uo(masked, operation)
    }

    fn title_search(&mut self, number: u32) -> NavResult<()> {
        if number == TITLE_TOP_MENU {
            return self.menu_call();
        }
        let masked = self.uo_mask.title_search();
        self.check_navigation_uo(masked, "title search", UoMask::TITLE_SEARCH_INDEX)?;
        self.play_title(number)
    }

    fn menu_call(&mut self) -> NavResult<()> {
        let masked = self.uo_mask.menu_call();
        self.check_navigation_uo(masked, "menu call", UoMask::MENU_CALL_INDEX)?;
        if self.index.top_menu.is_none() {
            return Err(NavError::InvalidTitle(TITLE_TOP_MENU));
        }
        if self.title_type == TitleType::Hdmv {
            if let Some(vm) = self.vm.as_mut() {
                if vm.suspend_playback(&mut self.regs) {
                    debug!("playback state saved for resume");
                }
            }
        }
        self.play_title(TITLE_TOP_MENU)
    }

    fn user_input(&mut self, key: UserKey) -> NavResult<bool> {
        if key == UserKey::Popup {
            let masked = if self.gc.is_menu_open() {
                self.uo_mask.popup_off()
            } else {
                self.uo_mask.popup_on()
            };
            self.check_uo(masked, "popup")?;
        }
        match self.title_type {
            TitleType::Hdmv => {
                let used = self.gc.user_input(key, &mut self.regs);
                self.run_dispatch();
                Ok(used)
            }
            TitleType::Bdj => {
                self.deliver(RuntimeEvent::Key, key_code(key));
                Ok(true)
            }
            TitleType::Undefined => Ok(false),
        }
    }

    fn mouse_select(&mut self, x: u16, y: u16) -> bool {
        match self.title_type {
            TitleType::Hdmv => {
                let used = self.gc.mouse_select(x, y, &mut self.regs);
                self.run_dispatch();
                used
            }
            TitleType::Bdj => {
                self.deliver(RuntimeEvent::Mouse, (x as u32) << 16 | y as u32);
                true
            }
            TitleType::Undefined => false,
        }
    }

    fn set_scr(&mut self, pts: i64) {
        self.gc.update_time(pts);
        self.gc.animate();
        if self.title_type == TitleType::Hdmv {
            self.run_dispatch();
        }
    }

    fn set_rate(&mut self, rate: u32) -> NavResult<()> {
        if self.title.is_none() {
            return Err(NavError::NoTitle);
        }
        self.deliver(RuntimeEvent::Rate, rate);
        Ok(())
    }

    fn select_playlist(&mut self, playlist: u32) -> NavResult<()> {
        self.close_playlist();
        if let Some(vm) = self.vm.as_mut() {
            vm.stop();
        }
        self.stop_runtime();
        self.title_type = TitleType::Undefined;
        self.hdmv_still = false;
        self.open_playlist(playlist)
    }

    fn tell(&self) -> u64 {
        match (self.title.as_ref(), self.stream.as_ref()) {
            (Some(title), Some(stream)) => title
                .clips
                .get(self.clip)
                .map_or(0, |c| packet_to_byte(c.title_packet(stream.packet()))),
            _ => 0,
        }
    }

    fn tell_time(&self) -> u64 {
        match (self.title.as_ref(), self.stream.as_ref()) {
            (Some(title), Some(stream)) => ticks_90k(title.title_time_of(self.clip, stream.packet())),
            _ => 0,
        }
    }

    fn current_chapter(&self) -> Option<usize> {
        let title = self.title.as_ref()?;
        title.chapter_at(byte_to_packet(self.tell()))
    }

    fn close(&mut self) {
        self.close_playlist();
        if let Some(vm) = self.vm.as_mut() {
            vm.stop();
        }
        self.stop_runtime();
        self.title_type = TitleType::Undefined;
        self.gc.close();
        self.drain_gc_events();
        self.title_list = None;
    }
}

// ============================================================================
// Bluray
// ============================================================================

/// A disc opened for playback
pub struct Bluray {
    core: Mutex<PlayerCore>,
    overlay: Arc<OverlaySink>,
}

impl std::fmt::Debug for Bluray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.lock();
        f.debug_struct("Bluray")
            .field("title_type", &core.title_type)
            .field("playlist", &core.title.as_ref().map(|t| t.playlist_id))
            .field("clip", &core.clip)
            .field("overlay", &self.overlay)
            .finish()
    }
}

impl Bluray {
    pub fn open(disc: Box<dyn DiscFs>, config: PlayerConfig) -> NavResult<Self> {
        Self::with_runtime(disc, config, Box::new(NoManagedRuntime))
    }

    pub fn with_runtime(
        disc: Box<dyn DiscFs>,
        config: PlayerConfig,
        runtime: Box<dyn ManagedRuntime>,
    ) -> NavResult<Self> {
        let overlay = Arc::new(OverlaySink::new());
        let core = PlayerCore::new(disc, config, runtime, overlay.clone())?;
        Ok(Self {
            core: Mutex::new(core),
            overlay,
        })
    }

    /// Open a disc image unpacked into a directory (or a mounted disc)
    pub fn open_dir(root: impl AsRef<Path>, config: PlayerConfig) -> NavResult<Self> {
        let disc = DirDisc::open(root.as_ref())?;
        Self::open(Box::new(disc), config)
    }

    pub fn disc_info(&self) -> DiscInfo {
        self.core.lock().disc_info()
    }

    pub fn title_list(&self) -> NavResult<Vec<TitleListEntry>> {
        self.core.lock().title_list().map(|l| l.to_vec())
    }

    /// Info for an entry of `title_list`
    pub fn title_info(&self, index: usize) -> NavResult<TitleInfo> {
        let mut core = self.core.lock();
        let playlist = core.listed_playlist(index)?;
        core.playlist_info(playlist, Some(index))
    }

    pub fn playlist_info(&self, playlist: u32) -> NavResult<TitleInfo> {
        self.core.lock().playlist_info(playlist, None)
    }

    pub fn title_type(&self) -> TitleType {
        self.core.lock().title_type
    }

    // ------------------------------------------------------------------------
    // Direct playback
    // ------------------------------------------------------------------------

    /// Play a playlist without navigation programs
    pub fn select_playlist(&self, playlist: u32) -> NavResult<()> {
        self.core.lock().select_playlist(playlist)
    }

    /// Play an entry of `title_list`
    pub fn select_title(&self, index: usize) -> NavResult<()> {
        let mut core = self.core.lock();
        let playlist = core.listed_playlist(index)?;
        core.select_playlist(playlist)
    }

    /// 0-based; the switch happens at the current position
    pub fn select_angle(&self, angle: usize) -> NavResult<()> {
        let mut core = self.core.lock();
        core.check_uo(core.uo_mask.angle_change(), "angle change")?;
        core.pending_angle = None;
        core.change_angle(angle)
    }

    pub fn seamless_angle_change(&self, angle: usize) -> NavResult<()> {
        let mut core = self.core.lock();
        core.check_uo(core.uo_mask.angle_change(), "angle change")?;
        core.seamless_angle_change(angle)
    }

    pub fn angle(&self) -> Option<usize> {
        self.core.lock().title.as_ref().map(|t| t.angle)
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    /// Start the disc: first play, or the top menu when there is none
    pub fn play(&self) -> NavResult<()> {
        self.core.lock().play()
    }

    /// Jump to a title (1-based, `TITLE_TOP_MENU` for the menu)
    pub fn play_title(&self, number: u32) -> NavResult<()> {
        self.core.lock().title_search(number)
    }

    pub fn menu_call(&self) -> NavResult<()> {
        self.core.lock().menu_call()
    }

    /// Returns true when the key was used
    pub fn user_input(&self, key: UserKey) -> NavResult<bool> {
        self.core.lock().user_input(key)
    }

    pub fn mouse_select(&self, x: u16, y: u16) -> bool {
        self.core.lock().mouse_select(x, y)
    }

    /// Current presentation time (90 kHz); drives subtitles and menu animation
    pub fn set_scr(&self, pts: i64) {
        self.core.lock().set_scr(pts)
    }

    pub fn skip_still(&self) -> NavResult<()> {
        self.core.lock().skip_still()
    }

    /// Playback speed of the application (`RATE_NORMAL`, `RATE_PAUSED`); only
    /// managed titles act on it
    pub fn set_rate(&self, rate: u32) -> NavResult<()> {
        self.core.lock().set_rate(rate)
    }

    // ------------------------------------------------------------------------
    // Seeking
    // ------------------------------------------------------------------------

    /// Seek to a title byte offset; returns the offset actually reached
    pub fn seek(&self, offset: u64) -> NavResult<u64> {
        self.core.lock().seek(offset)
    }

    /// Seek to a 90 kHz title time
    pub fn seek_time(&self, tick: u64) -> NavResult<u64> {
        let mut core = self.core.lock();
        core.check_uo(core.uo_mask.time_search(), "time search")?;
        core.seek_time(tick)
    }

    /// 0-based
    pub fn seek_chapter(&self, chapter: usize) -> NavResult<u64> {
        let mut core = self.core.lock();
        core.check_uo(core.uo_mask.chapter_search(), "chapter search")?;
        core.seek_chapter(chapter)
    }

    pub fn seek_mark(&self, mark: usize) -> NavResult<u64> {
        self.core.lock().seek_mark(mark)
    }

    pub fn seek_playitem(&self, play_item: usize) -> NavResult<u64> {
        self.core.lock().seek_play_item(play_item)
    }

    // ------------------------------------------------------------------------
    // Reading & events
    // ------------------------------------------------------------------------

    pub fn read(&self, buf: &mut [u8]) -> NavResult<ReadResult> {
        self.core.lock().read(buf)
    }

    pub fn get_event(&self) -> Option<BdEvent> {
        self.core.lock().pending_event()
    }

    // ------------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------------

    pub fn psr(&self, psr: u32) -> NavResult<u32> {
        Ok(self.core.lock().regs.try_read(psr)?)
    }

    /// Change a player setting (language, region, capabilities)
    pub fn set_player_setting(&self, psr: u32, value: u32) -> NavResult<()> {
        let mut core = self.core.lock();
        core.regs.write_setting(psr, value)?;
        core.process_psr_events();
        Ok(())
    }

    pub fn gpr(&self, gpr: u32) -> NavResult<u32> {
        Ok(self.core.lock().regs.gpr(gpr)?)
    }

    pub fn set_gpr(&self, gpr: u32, value: u32) -> NavResult<()> {
        Ok(self.core.lock().regs.write_gpr(gpr, value)?)
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Install the overlay callback; the menu on screen is sent to it again
    pub fn register_overlay_proc(&self, proc_: Option<OverlayProc>) {
        self.overlay.register(proc_);
        self.core.lock().gc.redraw();
    }

    pub fn uo_mask(&self) -> UoMask {
        self.core.lock().uo_mask
    }

    /// 0-based chapter at the read position
    pub fn current_chapter(&self) -> Option<usize> {
        self.core.lock().current_chapter()
    }

    /// Title byte offset of the read position
    pub fn tell(&self) -> u64 {
        self.core.lock().tell()
    }

    /// Title time of the read position, 90 kHz
    pub fn tell_time(&self) -> u64 {
        self.core.lock().tell_time()
    }

    pub fn title_size(&self) -> u64 {
        self.core.lock().title.as_ref().map_or(0, |t| t.byte_size())
    }

    pub fn close(&self) {
        self.core.lock().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdparse::stream_attrs::{CODING_H264, CODING_IG};
    use crate::demux::{ALIGNED_UNIT_SIZE, PACKET_SIZE};
    use crate::disc_io::MemDisc;
    use crate::hdmv::{encode, Opcode};
    use crate::bdj::BridgeResult;
    use crate::test_support::{
        encrypted_unit, pad_to_units, pes_packets, two_clip_disc, ButtonSpec, ClpiBuilder,
        IcsBuilder, IndexBuilder, MobjBuilder, MplsBuilder, PlayItemSpec, StreamSpec,
    };

    fn open(disc: MemDisc) -> Bluray {
        Bluray::open(Box::new(disc), PlayerConfig::default()).unwrap()
    }

    fn drain(bd: &Bluray) -> Vec<BdEvent> {
        std::iter::from_fn(|| bd.get_event()).collect()
    }

    /// Read until the player has nothing more to say
    fn play_out(bd: &Bluray) -> (u64, Vec<BdEvent>) {
        let mut buf = vec![0u8; ALIGNED_UNIT_SIZE];
        let mut total = 0u64;
        let mut events = Vec::new();
        let mut quiet = 0;
        for _ in 0..200 {
            let r = bd.read(&mut buf).unwrap();
            let done = r.bytes == 0 && r.event.is_none();
            total += r.bytes as u64;
            events.extend(r.event);
            if done {
                quiet += 1;
                if quiet > 3 {
                    break;
                }
            }
        }
        events.extend(drain(bd));
        (total, events)
    }

    fn count(events: &[BdEvent], wanted: &BdEvent) -> usize {
        events.iter().filter(|e| *e == wanted).count()
    }

    #[derive(Default)]
    struct RecordingRuntime {
        delivered: Arc<Mutex<Vec<(RuntimeEvent, u32)>>>,
    }

    impl ManagedRuntime for RecordingRuntime {
        fn start(&mut self, _title: u32, _name: &str) -> BridgeResult<()> {
            Ok(())
        }

        fn stop(&mut self) -> BridgeResult<()> {
            Ok(())
        }

        fn deliver(&mut self, event: RuntimeEvent, param: u32) -> BridgeResult<()> {
            self.delivered.lock().push((event, param));
            Ok(())
        }
    }

    /// Title 1 plays playlist 2, whose one clip carries a menu with two pages
    /// whose auto-action buttons flip to each other forever
    fn ping_pong_disc() -> MemDisc {
        let to_page = |p: u32| encode(Opcode::ButtonPage, true, true, 0, 0x8000_0000 | p);
        let ics = IcsBuilder::new(false)
            .page(0, 0, 1, vec![vec![ButtonSpec::new(1).auto_action().cmds(&[to_page(1)])]])
            .page(1, 0, 2, vec![vec![ButtonSpec::new(2).auto_action().cmds(&[to_page(0)])]])
            .build_display_set();
        menu_disc(pad_to_units(pes_packets(0x1400, 0xBD, Some(0), &ics)))
    }

    /// Title 1 plays playlist 2: one clip with video and an IG stream on 0x1400
    fn menu_disc(stream: Vec<u8>) -> MemDisc {
        let packets = (stream.len() / PACKET_SIZE) as u32;

        let playlist = MplsBuilder::new()
            .play_item(
                PlayItemSpec::new("00010", 0, 4608)
                    .stream(StreamSpec::video(0x1011, CODING_H264))
                    .stream(StreamSpec::ig(0x1400, "eng")),
            )
            .mark(1, 0, 0)
            .build();
        let clip = ClpiBuilder::new(packets)
            .stream(0x1011, CODING_H264)
            .stream(0x1400, CODING_IG)
            .ep_points([(0, 0, false)])
            .build();
        let index = IndexBuilder::new().hdmv_title(0, false).build();
        let objects = MobjBuilder::new()
            .object(false, false, false, &[encode(Opcode::PlayPl, true, false, 2, 0)])
            .build();

        MemDisc::new()
            .with_file(disc_io::INDEX_PATH, index)
            .with_file(disc_io::MOVIE_OBJECT_PATH, objects)
            .with_file(disc_io::playlist_path(2), playlist)
            .with_file(disc_io::clip_info_path("00010"), clip)
            .with_file(disc_io::stream_path("00010"), stream)
    }

    #[test]
    fn title_plays_to_a_single_end_of_title() {
        let bd = open(two_clip_disc());
        bd.play_title(1).unwrap();
        assert_eq!(bd.title_type(), TitleType::Hdmv);
        assert_eq!(bd.psr(PSR_PLAYLIST).unwrap(), 1);

        bd.seek_mark(1).unwrap();
        let start = bd.tell();
        assert_eq!(start, packet_to_byte(96));

        let (total, events) = play_out(&bd);
        assert_eq!(total, bd.title_size() - start);
        assert_eq!(count(&events, &BdEvent::EndOfTitle), 1);
        assert!(events.contains(&BdEvent::Title(1)));
        assert!(!events.contains(&BdEvent::PlaylistStop));

        let mut buf = vec![0u8; ALIGNED_UNIT_SIZE];
        assert_eq!(bd.read(&mut buf).unwrap().bytes, 0);
    }

    #[test]
    fn direct_playlist_crosses_clips() {
        let bd = open(two_clip_disc());
        bd.select_playlist(1).unwrap();
        assert_eq!(bd.title_type(), TitleType::Undefined);
        assert_eq!(bd.title_size(), packet_to_byte(160));

        let (total, events) = play_out(&bd);
        assert_eq!(total, packet_to_byte(160));
        assert!(events.contains(&BdEvent::PlayItem(1)));
        assert!(events.contains(&BdEvent::Chapter(2)));
        assert_eq!(count(&events, &BdEvent::EndOfTitle), 1);
        assert_eq!(bd.current_chapter(), Some(1));
    }

    #[test]
    fn menu_ping_pong_is_stopped_as_livelock() {
        let bd = open(ping_pong_disc());
        bd.play_title(1).unwrap();

        let (_, events) = play_out(&bd);
        assert_eq!(count(&events, &BdEvent::Error(ErrorKind::Livelock)), 1);
        assert!(events.contains(&BdEvent::Menu(true)));
        assert_eq!(bd.title_type(), TitleType::Undefined);
        assert_eq!(bd.title_size(), 0);
    }

    #[test]
    fn long_linear_object_reaches_playback() {
        let mut disc = two_clip_disc();
        let mut cmds = vec![encode(Opcode::DisableButton, true, false, 1, 0); 120];
        cmds.push(encode(Opcode::PlayPl, true, false, 1, 0));
        let objects = MobjBuilder::new()
            .object(false, false, false, &cmds)
            .object(false, false, false, &[])
            .build();
        disc.insert(disc_io::MOVIE_OBJECT_PATH, objects);

        let bd = open(disc);
        bd.play_title(1).unwrap();
        let events = drain(&bd);
        assert!(!events.contains(&BdEvent::Error(ErrorKind::Livelock)));
        assert_eq!(bd.title_type(), TitleType::Hdmv);
        assert_eq!(bd.psr(PSR_PLAYLIST).unwrap(), 1);
        assert_eq!(bd.title_size(), packet_to_byte(160));
    }

    #[test]
    fn broken_menu_segment_closes_graphics_filter() {
        let broken = pes_packets(0x1400, 0xBD, Some(0), &[0x18, 0x10, 0x00, 1, 2]);
        let ics = IcsBuilder::new(false)
            .page(0, 0, 1, vec![vec![ButtonSpec::new(1)]])
            .build_display_set();
        let mut packets = broken;
        packets.extend(pes_packets(0x1400, 0xBD, Some(0), &ics));
        let bd = open(menu_disc(pad_to_units(packets)));
        bd.play_title(1).unwrap();

        let mut buf = vec![0u8; ALIGNED_UNIT_SIZE];
        let mut events = Vec::new();
        let mut bytes = 0;
        for _ in 0..20 {
            let r = bd.read(&mut buf).unwrap();
            events.extend(r.event);
            bytes = r.bytes;
            if bytes > 0 {
                break;
            }
        }
        assert_eq!(bytes, ALIGNED_UNIT_SIZE);
        {
            let mut core = bd.core.lock();
            let stream = core.stream.as_mut().unwrap();
            assert!(stream.graphics_mut().is_none());
        }

        events.extend(play_out(&bd).1);
        assert!(!events.contains(&BdEvent::Menu(true)));
        assert!(!events.contains(&BdEvent::ReadError(1)));
    }

    #[test]
    fn encrypted_clip_is_reported_once() {
        let mut disc = two_clip_disc();
        disc.insert(disc_io::stream_path("00001"), encrypted_unit().repeat(3));
        disc.set_protected(true);

        let bd = open(disc);
        bd.select_playlist(1).unwrap();
        let (total, events) = play_out(&bd);
        assert_eq!(total, 0);
        assert_eq!(count(&events, &BdEvent::Encrypted), 1);
        assert!(!events.contains(&BdEvent::PlaylistStop));
        assert_eq!(bd.title_size(), 0);
    }

    #[test]
    fn leaving_a_playlist_early_reports_stop() {
        let bd = open(two_clip_disc());
        bd.select_playlist(1).unwrap();
        drain(&bd);
        let mut buf = vec![0u8; ALIGNED_UNIT_SIZE];
        assert_eq!(bd.read(&mut buf).unwrap().bytes, ALIGNED_UNIT_SIZE);
        drain(&bd);

        bd.select_playlist(1).unwrap();
        assert_eq!(count(&drain(&bd), &BdEvent::PlaylistStop), 1);

        // inside the last clip and closer to the end than the stop threshold
        bd.seek_mark(1).unwrap();
        drain(&bd);
        bd.close();
        assert!(!drain(&bd).contains(&BdEvent::PlaylistStop));
    }

    #[test]
    fn managed_title_is_told_about_refusals_and_rate() {
        let mut disc = two_clip_disc();
        disc.insert(
            disc_io::INDEX_PATH,
            IndexBuilder::new().top_menu_hdmv(1).bdj_title("00001").build(),
        );
        let playlist = MplsBuilder::new()
            .uo_mask(UoMask::TITLE_SEARCH | UoMask::MENU_CALL)
            .play_item(PlayItemSpec::new("00001", 0, 3 * 4608).stream(StreamSpec::video(0x1011, CODING_H264)))
            .mark(1, 0, 0)
            .build();
        disc.insert(disc_io::playlist_path(1), playlist);

        let runtime = RecordingRuntime::default();
        let delivered = runtime.delivered.clone();
        let config = PlayerConfig {
            bdj_enabled: true,
            ..PlayerConfig::default()
        };
        let bd = Bluray::with_runtime(Box::new(disc), config, Box::new(runtime)).unwrap();
        bd.play_title(1).unwrap();
        assert_eq!(bd.title_type(), TitleType::Bdj);
        assert!(matches!(bd.set_rate(RATE_PAUSED), Err(NavError::NoTitle)));

        // the application starts a playlist that forbids navigation
        bd.core.lock().open_playlist(1).unwrap();
        assert!(bd.uo_mask().title_search());
        delivered.lock().clear();

        assert!(matches!(bd.play_title(1), Err(NavError::UserOperationMasked(_))));
        assert!(matches!(bd.menu_call(), Err(NavError::UserOperationMasked(_))));
        assert!(matches!(bd.play_title(TITLE_TOP_MENU), Err(NavError::UserOperationMasked(_))));
        bd.set_rate(RATE_PAUSED).unwrap();

        assert_eq!(
            *delivered.lock(),
            vec![
                (RuntimeEvent::UoMasked, UoMask::TITLE_SEARCH_INDEX),
                (RuntimeEvent::UoMasked, UoMask::MENU_CALL_INDEX),
                (RuntimeEvent::UoMasked, UoMask::MENU_CALL_INDEX),
                (RuntimeEvent::Rate, RATE_PAUSED),
            ]
        );
        assert_eq!(bd.title_type(), TitleType::Bdj);
    }

    #[test]
    fn masked_chapter_search_is_refused() {
        let mut disc = two_clip_disc();
        let playlist = MplsBuilder::new()
            .uo_mask(UoMask::CHAPTER_SEARCH)
            .play_item(PlayItemSpec::new("00001", 0, 3 * 4608).stream(StreamSpec::video(0x1011, CODING_H264)))
            .play_item(PlayItemSpec::new("00002", 0, 2 * 4608).stream(StreamSpec::video(0x1011, CODING_H264)))
            .mark(1, 0, 0)
            .mark(1, 1, 0)
            .build();
        disc.insert(disc_io::playlist_path(1), playlist);

        let bd = open(disc);
        bd.select_playlist(1).unwrap();
        assert!(bd.uo_mask().chapter_search());
        assert!(matches!(bd.seek_chapter(1), Err(NavError::UserOperationMasked(_))));
        assert!(bd.seek_mark(1).is_ok());
    }

    #[test]
    fn object_menu_call_mask_applies() {
        let mut disc = two_clip_disc();
        let objects = MobjBuilder::new()
            .object(false, true, false, &[encode(Opcode::PlayPl, true, false, 1, 0)])
            .object(false, false, false, &[])
            .build();
        disc.insert(disc_io::MOVIE_OBJECT_PATH, objects);

        let bd = open(disc);
        bd.play_title(1).unwrap();
        assert!(bd.uo_mask().menu_call());
        assert!(matches!(bd.menu_call(), Err(NavError::UserOperationMasked(_))));
    }

    #[test]
    fn unknown_and_managed_titles_are_refused() {
        let mut disc = two_clip_disc();
        disc.insert(
            disc_io::INDEX_PATH,
            IndexBuilder::new().hdmv_title(0, false).bdj_title("00001").build(),
        );
        let bd = open(disc);
        assert!(matches!(bd.play_title(5), Err(NavError::InvalidTitle(5))));

        assert!(matches!(bd.play_title(2), Err(NavError::Bridge(_))));
        let events = drain(&bd);
        assert_eq!(count(&events, &BdEvent::Error(ErrorKind::ManagedRuntime)), 1);
        assert_eq!(bd.title_type(), TitleType::Undefined);

        let info = bd.disc_info();
        assert_eq!(info.num_bdj_titles, 1);
        assert_eq!(info.num_unsupported_titles, 1);
        assert!(info.bdj_detected);
    }

    #[test]
    fn title_list_and_info() {
        let bd = open(two_clip_disc());
        let list = bd.title_list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].playlist_id, 1);

        let info = bd.title_info(0).unwrap();
        assert_eq!(info.playlist, 1);
        assert_eq!(info.clips.len(), 2);
        assert_eq!(info.chapters.len(), 2);
        assert_eq!(info.chapters[1].offset, packet_to_byte(96));
        assert_eq!(info.duration, 5 * 4608 * 2);
        assert!(bd.title_info(3).is_err());
    }

    #[test]
    fn seek_time_and_tell() {
        let bd = open(two_clip_disc());
        bd.select_playlist(1).unwrap();
        let offset = bd.seek_time(4 * 4608 * 2).unwrap();
        assert_eq!(offset, packet_to_byte(128));
        assert_eq!(bd.tell(), offset);
        assert_eq!(bd.tell_time(), 4 * 4608 * 2);
        assert!(drain(&bd).contains(&BdEvent::Seek(offset)));
    }

    #[test]
    fn missing_index_is_not_a_disc() {
        let err = Bluray::open(Box::new(MemDisc::new()), PlayerConfig::default()).unwrap_err();
        assert!(matches!(err, NavError::NotBluray(_)));
    }
}
