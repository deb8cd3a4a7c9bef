//! Stream demultiplexer
//!
//! Reads a clip (`.m2ts`) in aligned units of 32 source packets, validates
//! each unit, repairs what it can and hands the bytes to the caller. The
//! main path keeps one `BdStream`; sub-paths are preloaded into memory.
//!
//! Unit validation:
//! - all checked sync bytes intact: accept
//! - leading sync intact and copy permission indicator set: encrypted, skipped;
//!   fatal after more than the configured number of consecutive units
//! - anything else (including a short read inside the clip): corrupt, skip one unit

pub mod filter;
pub mod pes;
pub mod preload;

use std::io::{Read, Seek, SeekFrom};

use serde::Serialize;

use crate::disc_io::{self, DiscFs, StreamFile};
use crate::error::{NavError, NavResult};
use crate::uo_mask::UoMask;

pub use filter::{GraphicsExtractor, GraphicsKind, GraphicsPes, StreamCounts, WindowFilter};
pub use pes::{PesAssembler, PesPacket};
pub use preload::{preload_clip, PreloadedClip};

// ============================================================================
// Constants
// ============================================================================

/// Source packet: 4-byte TP_extra_header + 188-byte TS packet
pub const PACKET_SIZE: usize = 192;
pub const TS_PACKET_SIZE: usize = 188;
pub const PACKETS_PER_UNIT: usize = 32;
pub const ALIGNED_UNIT_SIZE: usize = PACKET_SIZE * PACKETS_PER_UNIT;
pub const TS_SYNC_BYTE: u8 = 0x47;

pub const PAT_PID: u16 = 0x0000;
pub const SIT_PID: u16 = 0x001F;
pub const PMT_PID: u16 = 0x0100;
pub const PCR_PID: u16 = 0x1001;
pub const NULL_PID: u16 = 0x1FFF;

/// Packets checked for the sync byte in every unit
const CHECKED_PACKETS: usize = 4;

pub fn packet_to_byte(pkt: u32) -> u64 {
    pkt as u64 * PACKET_SIZE as u64
}

pub fn byte_to_packet(pos: u64) -> u32 {
    (pos / PACKET_SIZE as u64) as u32
}

/// Tables that must precede payload after a seek
pub fn is_control_pid(pid: u16) -> bool {
    matches!(pid, PAT_PID | SIT_PID | PMT_PID | PCR_PID)
}

// ============================================================================
// Unit Validation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitStatus {
    Ok,
    Encrypted,
    Corrupt,
}

/// Copy permission indicator of the TP_extra_header
fn copy_permission(unit: &[u8]) -> bool {
    unit[0] & 0xC0 != 0
}

pub fn validate_unit(unit: &[u8]) -> UnitStatus {
    if unit.len() < ALIGNED_UNIT_SIZE {
        return UnitStatus::Corrupt;
    }

    let synced = (0..CHECKED_PACKETS).all(|i| unit[i * PACKET_SIZE + 4] == TS_SYNC_BYTE);
    if synced {
        return UnitStatus::Ok;
    }

    if unit[4] == TS_SYNC_BYTE && copy_permission(unit) {
        return UnitStatus::Encrypted;
    }

    UnitStatus::Corrupt
}

/// Read until `buf` is full or the file ends
pub(crate) fn read_full(file: &mut dyn StreamFile, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match file.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

// ============================================================================
// Stream Cursor
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub units_ok: u64,
    pub corrupt_units: u64,
    pub encrypted_units: u64,
    pub short_reads: u64,
    /// Packets neutralised by the in/out window filter
    pub filtered_packets: u64,
    pub bytes_delivered: u64,
}

/// Result of one `BdStream::read`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamRead {
    pub bytes: usize,
    /// Units skipped as corrupt during this read
    pub corrupt_units: u32,
}

enum Fill {
    Ready,
    Skipped(UnitStatus),
    Eof,
}

/// Cursor over one clip of the main path
pub struct BdStream {
    file: Box<dyn StreamFile>,
    clip_id: String,
    clip_size: u64,
    /// Byte position of the next byte handed out
    clip_pos: u64,
    /// Play window in bytes
    start_pos: u64,
    end_pos: u64,
    /// File position after the last read, to avoid redundant seeks
    file_pos: Option<u64>,
    unit: Box<[u8; ALIGNED_UNIT_SIZE]>,
    /// Offset of the next byte in `unit`; `ALIGNED_UNIT_SIZE` when empty
    int_buf_off: usize,
    seek_flag: bool,
    encrypted_run: u32,
    encrypted_threshold: u32,
    pub uo_mask: UoMask,
    window: Option<WindowFilter>,
    graphics: Option<GraphicsExtractor>,
    graphics_out: Vec<GraphicsPes>,
    stats: StreamStats,
}

impl std::fmt::Debug for BdStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BdStream")
            .field("clip_id", &self.clip_id)
            .field("clip_pos", &self.clip_pos)
            .field("int_buf_off", &self.int_buf_off)
            .field("stats", &self.stats)
            .finish()
    }
}

impl BdStream {
    /// Open a clip's stream file and position at `start_pkt`.
    ///
    /// `encrypted_threshold` is the number of consecutive encrypted units
    /// tolerated; a protected disc tolerates none.
    pub fn open(
        disc: &dyn DiscFs,
        clip_id: &str,
        start_pkt: u32,
        end_pkt: u32,
        encrypted_threshold: u32,
    ) -> NavResult<Self> {
        let file = disc.open_file(&disc_io::stream_path(clip_id))?;
        let clip_size = file.size();
        let threshold = if disc.is_protected() {
            0
        } else {
            encrypted_threshold
        };

        let mut stream = Self {
            file,
            clip_id: clip_id.to_string(),
            clip_size,
            clip_pos: 0,
            start_pos: packet_to_byte(start_pkt),
            end_pos: packet_to_byte(end_pkt),
            file_pos: None,
            unit: Box::new([0u8; ALIGNED_UNIT_SIZE]),
            int_buf_off: ALIGNED_UNIT_SIZE,
            seek_flag: false,
            encrypted_run: 0,
            encrypted_threshold: threshold,
            uo_mask: UoMask::EMPTY,
            window: None,
            graphics: None,
            graphics_out: Vec::new(),
            stats: StreamStats::default(),
        };
        stream.seek(start_pkt);

        tracing::debug!(
            "opened clip {} ({} bytes), packets {}..{}",
            clip_id,
            clip_size,
            start_pkt,
            end_pkt
        );
        Ok(stream)
    }

    pub fn clip_id(&self) -> &str {
        &self.clip_id
    }

    pub fn clip_size(&self) -> u64 {
        self.clip_size
    }

    /// Current clip byte position
    pub fn clip_pos(&self) -> u64 {
        self.clip_pos
    }

    /// Current clip packet
    pub fn packet(&self) -> u32 {
        byte_to_packet(self.clip_pos)
    }

    pub fn start_packet(&self) -> u32 {
        byte_to_packet(self.start_pos)
    }

    pub fn end_packet(&self) -> u32 {
        byte_to_packet(self.end_pos)
    }

    pub fn is_eof(&self) -> bool {
        self.clip_pos >= self.end_pos
    }

    /// Packets left before the end of the play window
    pub fn remaining_packets(&self) -> u32 {
        byte_to_packet(self.end_pos.saturating_sub(self.clip_pos))
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Buffered-unit offset; always below `ALIGNED_UNIT_SIZE` while a unit is held
    pub fn unit_offset(&self) -> usize {
        self.int_buf_off
    }

    /// Position at a clip packet. The next read delivers from the containing
    /// unit, rewound over control packets directly before `clip_pkt`.
    pub fn seek(&mut self, clip_pkt: u32) {
        let pos = packet_to_byte(clip_pkt).clamp(self.start_pos, self.end_pos.max(self.start_pos));
        self.clip_pos = pos;
        self.int_buf_off = ALIGNED_UNIT_SIZE;
        self.seek_flag = true;
        if let Some(window) = self.window.as_mut() {
            window.reset();
        }
        if let Some(graphics) = self.graphics.as_mut() {
            graphics.reset();
        }
        self.graphics_out.clear();
    }

    pub fn set_window_filter(&mut self, filter: Option<WindowFilter>) {
        self.window = filter;
    }

    pub fn set_graphics(&mut self, extractor: Option<GraphicsExtractor>) {
        self.graphics = extractor;
    }

    pub fn graphics_mut(&mut self) -> Option<&mut GraphicsExtractor> {
        self.graphics.as_mut()
    }

    /// Stop graphics extraction after a filter failure; payload reads continue.
    pub fn close_graphics(&mut self) {
        if self.graphics.take().is_some() {
            tracing::warn!("{}: graphics filter closed", self.clip_id);
        }
        self.graphics_out.clear();
    }

    /// Graphics PES packets extracted from units delivered so far
    pub fn take_graphics(&mut self) -> Vec<GraphicsPes> {
        std::mem::take(&mut self.graphics_out)
    }

    /// Copy validated payload in whole source packets: at most `out.len()`
    /// rounded down to a multiple of 192 bytes, so a buffer shorter than one
    /// packet reads nothing.
    ///
    /// Stops at the end of the play window or of the file. Corrupt units are
    /// skipped and counted; too many consecutive encrypted units fail with
    /// `Encrypted`.
    pub fn read(&mut self, out: &mut [u8]) -> NavResult<StreamRead> {
        let mut result = StreamRead::default();
        let want = out.len() - out.len() % PACKET_SIZE;

        while result.bytes < want && self.clip_pos < self.end_pos {
            if self.int_buf_off >= ALIGNED_UNIT_SIZE {
                match self.fill_unit()? {
                    Fill::Ready => {}
                    Fill::Skipped(UnitStatus::Corrupt) => {
                        result.corrupt_units += 1;
                        continue;
                    }
                    Fill::Skipped(_) => continue,
                    Fill::Eof => break,
                }
            }

            let unit_left = ALIGNED_UNIT_SIZE - self.int_buf_off;
            let window_left = (self.end_pos - self.clip_pos) as usize;
            let n = (want - result.bytes).min(unit_left).min(window_left);
            out[result.bytes..result.bytes + n]
                .copy_from_slice(&self.unit[self.int_buf_off..self.int_buf_off + n]);
            self.int_buf_off += n;
            self.clip_pos += n as u64;
            result.bytes += n;
        }

        self.stats.bytes_delivered += result.bytes as u64;
        Ok(result)
    }

    fn skip_unit(&mut self, block: u64) {
        self.clip_pos = block + ALIGNED_UNIT_SIZE as u64;
        self.int_buf_off = ALIGNED_UNIT_SIZE;
        self.file_pos = None;
    }

    fn fill_unit(&mut self) -> NavResult<Fill> {
        let unit_len = ALIGNED_UNIT_SIZE as u64;
        let block = self.clip_pos / unit_len * unit_len;
        if block >= self.end_pos {
            return Ok(Fill::Eof);
        }
        if block + unit_len > self.clip_size {
            // play window runs past the end of the file
            tracing::warn!(
                "{}: unit at {} past end of file ({} bytes)",
                self.clip_id,
                block,
                self.clip_size
            );
            self.clip_pos = self.end_pos;
            self.int_buf_off = ALIGNED_UNIT_SIZE;
            self.file_pos = None;
            return Ok(Fill::Eof);
        }

        if self.file_pos != Some(block) {
            self.file.seek(SeekFrom::Start(block))?;
        }
        let got = read_full(self.file.as_mut(), &mut self.unit[..])?;
        self.file_pos = Some(block + got as u64);

        if got < ALIGNED_UNIT_SIZE {
            self.stats.short_reads += 1;
            self.stats.corrupt_units += 1;
            self.encrypted_run = 0;
            tracing::warn!(
                "{}: short read at {} ({} of {} bytes), skipping unit",
                self.clip_id,
                block,
                got,
                ALIGNED_UNIT_SIZE
            );
            self.skip_unit(block);
            return Ok(Fill::Skipped(UnitStatus::Corrupt));
        }

        match validate_unit(&self.unit[..]) {
            UnitStatus::Ok => {
                self.encrypted_run = 0;
                self.stats.units_ok += 1;
            }
            UnitStatus::Encrypted => {
                self.encrypted_run += 1;
                self.stats.encrypted_units += 1;
                if self.encrypted_run > self.encrypted_threshold {
                    tracing::error!(
                        "{}: {} consecutive encrypted units, giving up",
                        self.clip_id,
                        self.encrypted_run
                    );
                    self.skip_unit(block);
                    return Err(NavError::Encrypted);
                }
                tracing::debug!("{}: encrypted unit at {} skipped", self.clip_id, block);
                self.skip_unit(block);
                return Ok(Fill::Skipped(UnitStatus::Encrypted));
            }
            UnitStatus::Corrupt => {
                self.encrypted_run = 0;
                self.stats.corrupt_units += 1;
                tracing::warn!("{}: corrupt unit at {}, skipping", self.clip_id, block);
                self.skip_unit(block);
                return Ok(Fill::Skipped(UnitStatus::Corrupt));
            }
        }

        self.run_filters();

        let mut off = (self.clip_pos - block) as usize;
        if self.seek_flag {
            self.seek_flag = false;
            let floor = self.start_pos.saturating_sub(block) as usize;
            while off >= PACKET_SIZE && off - PACKET_SIZE >= floor {
                let prev = &self.unit[off - PACKET_SIZE..off];
                match pes::packet_pid(prev) {
                    Some(pid) if is_control_pid(pid) => off -= PACKET_SIZE,
                    _ => break,
                }
            }
            self.clip_pos = block + off as u64;
        }
        self.int_buf_off = off;
        Ok(Fill::Ready)
    }

    fn run_filters(&mut self) {
        if let Some(window) = self.window.as_mut() {
            match window.apply(&mut self.unit[..]) {
                Ok(dropped) => self.stats.filtered_packets += dropped as u64,
                Err(e) => {
                    tracing::warn!("{}: window filter error: {}, filter closed", self.clip_id, e);
                    self.window = None;
                }
            }
        }
        if let Some(graphics) = self.graphics.as_mut() {
            graphics.feed_unit(&self.unit[..], &mut self.graphics_out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc_io::MemDisc;
    use crate::test_support::{encrypted_unit, m2ts_units, source_packet};

    fn disc_with(units: Vec<u8>) -> MemDisc {
        MemDisc::new().with_file(disc_io::stream_path("00001"), units)
    }

    fn unit_count(disc: &MemDisc) -> u32 {
        let size = disc.open_file(&disc_io::stream_path("00001")).unwrap().size();
        (size / PACKET_SIZE as u64) as u32
    }

    #[test]
    fn packet_byte_conversion_is_exact() {
        for pkt in [0u32, 1, 31, 32, 1_000_000, u32::MAX / 192] {
            assert_eq!(byte_to_packet(packet_to_byte(pkt)), pkt);
            assert_eq!(packet_to_byte(pkt), pkt as u64 * 192);
        }
    }

    #[test]
    fn validates_units() {
        let good = m2ts_units(1, 0x1011);
        assert_eq!(validate_unit(&good), UnitStatus::Ok);
        assert_eq!(validate_unit(&encrypted_unit()), UnitStatus::Encrypted);

        let mut bad = good.clone();
        bad[PACKET_SIZE * 2 + 4] = 0x00;
        assert_eq!(validate_unit(&bad), UnitStatus::Corrupt);

        // leading sync lost: corrupt even with the permission bits set
        let mut lost = encrypted_unit();
        lost[4] = 0;
        assert_eq!(validate_unit(&lost), UnitStatus::Corrupt);
    }

    #[test]
    fn reads_whole_clip() {
        let data = m2ts_units(3, 0x1011);
        let disc = disc_with(data.clone());
        let mut s = BdStream::open(&disc, "00001", 0, unit_count(&disc), 10).unwrap();
        let mut out = vec![0u8; data.len() + 100];
        let r = s.read(&mut out).unwrap();
        assert_eq!(r.bytes, data.len());
        assert_eq!(&out[..r.bytes], &data[..]);
        assert!(s.is_eof());
        assert_eq!(s.read(&mut out).unwrap().bytes, 0);
    }

    #[test]
    fn corrupt_unit_is_skipped_once() {
        let mut data = m2ts_units(3, 0x1011);
        // break unit 1
        data[ALIGNED_UNIT_SIZE + PACKET_SIZE + 4] = 0x00;
        let disc = disc_with(data.clone());
        let mut s = BdStream::open(&disc, "00001", 0, unit_count(&disc), 10).unwrap();

        let mut out = vec![0u8; ALIGNED_UNIT_SIZE * 3];
        let r = s.read(&mut out).unwrap();
        assert_eq!(r.corrupt_units, 1);
        assert_eq!(r.bytes, ALIGNED_UNIT_SIZE * 2);
        assert_eq!(&out[..ALIGNED_UNIT_SIZE], &data[..ALIGNED_UNIT_SIZE]);
        assert_eq!(&out[ALIGNED_UNIT_SIZE..r.bytes], &data[ALIGNED_UNIT_SIZE * 2..]);
        assert_eq!(s.stats().corrupt_units, 1);
    }

    #[test]
    fn eleventh_encrypted_unit_is_fatal() {
        let mut data = Vec::new();
        for _ in 0..11 {
            data.extend_from_slice(&encrypted_unit());
        }
        data.extend_from_slice(&m2ts_units(1, 0x1011));
        let disc = disc_with(data);
        let mut s = BdStream::open(&disc, "00001", 0, unit_count(&disc), 10).unwrap();

        // the first ten are skipped silently
        for _ in 0..10 {
            let status = s.fill_unit().unwrap();
            assert!(matches!(status, Fill::Skipped(UnitStatus::Encrypted)));
        }
        let mut out = vec![0u8; PACKET_SIZE];
        assert!(matches!(s.read(&mut out), Err(NavError::Encrypted)));
        assert_eq!(s.stats().encrypted_units, 11);
    }

    #[test]
    fn ten_encrypted_units_then_clear_data_recovers() {
        let mut data = Vec::new();
        for _ in 0..10 {
            data.extend_from_slice(&encrypted_unit());
        }
        let clear = m2ts_units(1, 0x1011);
        data.extend_from_slice(&clear);
        let disc = disc_with(data);
        let mut s = BdStream::open(&disc, "00001", 0, unit_count(&disc), 10).unwrap();
        let mut out = vec![0u8; ALIGNED_UNIT_SIZE * 11];
        let r = s.read(&mut out).unwrap();
        assert_eq!(r.bytes, ALIGNED_UNIT_SIZE);
        assert_eq!(&out[..r.bytes], &clear[..]);
    }

    #[test]
    fn protected_disc_fails_on_first_encrypted_unit() {
        let mut disc = disc_with(encrypted_unit());
        disc.set_protected(true);
        let mut s = BdStream::open(&disc, "00001", 0, unit_count(&disc), 10).unwrap();
        let mut out = vec![0u8; PACKET_SIZE];
        assert!(matches!(s.read(&mut out), Err(NavError::Encrypted)));
    }

    #[test]
    fn truncated_clip_ends_at_end_of_file() {
        let mut data = m2ts_units(2, 0x1011);
        data.truncate(ALIGNED_UNIT_SIZE + 1000);
        let disc = disc_with(data.clone());
        // play window claims far more than the file holds
        let mut s = BdStream::open(&disc, "00001", 0, 32_000, 10).unwrap();
        let mut out = vec![0u8; ALIGNED_UNIT_SIZE * 4];
        let r = s.read(&mut out).unwrap();
        assert_eq!(r.bytes, ALIGNED_UNIT_SIZE);
        assert_eq!(&out[..r.bytes], &data[..ALIGNED_UNIT_SIZE]);
        assert_eq!(r.corrupt_units, 0);
        assert!(s.is_eof());
        assert_eq!(s.stats().short_reads, 0);
        assert_eq!(s.read(&mut out).unwrap().bytes, 0);
    }

    #[test]
    fn reads_stop_on_packet_boundaries() {
        let data = m2ts_units(2, 0x1011);
        let disc = disc_with(data.clone());
        let mut s = BdStream::open(&disc, "00001", 0, 64, 10).unwrap();

        let mut small = vec![0u8; PACKET_SIZE - 1];
        assert_eq!(s.read(&mut small).unwrap().bytes, 0);
        assert_eq!(s.clip_pos(), 0);

        let mut out = vec![0u8; 1000];
        let r = s.read(&mut out).unwrap();
        assert_eq!(r.bytes, 5 * PACKET_SIZE);
        assert_eq!(s.clip_pos() % PACKET_SIZE as u64, 0);
        assert_eq!(s.packet(), 5);
        assert_eq!(&out[..r.bytes], &data[..5 * PACKET_SIZE]);
    }

    #[test]
    fn seek_rewinds_over_control_packets() {
        let mut data = m2ts_units(2, 0x1011);
        // packets 36 and 37 (unit 1) are PAT and PMT
        for (pkt, pid) in [(36usize, PAT_PID), (37, PMT_PID)] {
            let p = source_packet(pid, true, &[]);
            data[pkt * PACKET_SIZE..(pkt + 1) * PACKET_SIZE].copy_from_slice(&p);
        }
        let disc = disc_with(data.clone());
        let mut s = BdStream::open(&disc, "00001", 0, 64, 10).unwrap();

        s.seek(38);
        let mut out = vec![0u8; PACKET_SIZE];
        s.read(&mut out).unwrap();
        assert_eq!(&out[..], &data[36 * PACKET_SIZE..37 * PACKET_SIZE]);
        assert!(s.unit_offset() < ALIGNED_UNIT_SIZE);

        // no control packets before 40: delivered as requested
        s.seek(40);
        s.read(&mut out).unwrap();
        assert_eq!(&out[..], &data[40 * PACKET_SIZE..41 * PACKET_SIZE]);
        assert_eq!(s.packet(), 41);
    }

    #[test]
    fn seek_never_rewinds_before_window_start() {
        let mut data = m2ts_units(1, 0x1011);
        let pat = source_packet(PAT_PID, true, &[]);
        data[4 * PACKET_SIZE..5 * PACKET_SIZE].copy_from_slice(&pat);
        let disc = disc_with(data);
        let mut s = BdStream::open(&disc, "00001", 5, 32, 10).unwrap();
        let mut out = vec![0u8; PACKET_SIZE];
        s.read(&mut out).unwrap();
        assert_eq!(s.packet(), 6);
    }
}
