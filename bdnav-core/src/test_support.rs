//! Byte-level fixture builders for unit tests
//!
//! Everything here writes the on-disc formats the parsers read: transport
//! packets, index / movie object / playlist / clip info files and graphics
//! segments. Builders produce the smallest valid layout, not byte-exact
//! authoring tool output.

use bytes::BufMut;

use crate::bdparse::ig::NO_BUTTON;
use crate::bdparse::mobj::NavCommand;
use crate::bdparse::mpls::StillMode;
use crate::bdparse::stream_attrs::{StreamKind, CODING_H264, CODING_IG, CODING_PG};
use crate::demux::{ALIGNED_UNIT_SIZE, NULL_PID, PACKET_SIZE, PACKETS_PER_UNIT, TS_SYNC_BYTE};
use crate::disc_io::{self, MemDisc};

// ============================================================================
// Transport stream
// ============================================================================

/// One 192-byte source packet. The payload (at most 184 bytes) is placed at
/// the end of the packet after adaptation-field stuffing.
pub(crate) fn source_packet(pid: u16, pusi: bool, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 184, "payload too large for one packet");
    let mut p = Vec::with_capacity(PACKET_SIZE);
    p.put_u32(0);
    p.put_u8(TS_SYNC_BYTE);
    p.put_u16(((pusi as u16) << 14) | (pid & 0x1FFF));

    if payload.len() == 184 {
        p.put_u8(0x10);
    } else {
        p.put_u8(0x30);
        let af_len = 183 - payload.len();
        p.put_u8(af_len as u8);
        if af_len > 0 {
            p.put_u8(0x00);
            p.put_bytes(0xFF, af_len - 1);
        }
    }
    p.put_slice(payload);
    debug_assert_eq!(p.len(), PACKET_SIZE);
    p
}

/// 33-bit timestamp in PES header layout
pub(crate) fn encode_timestamp(prefix: u8, ts: i64) -> [u8; 5] {
    let ts = ts as u64;
    [
        (prefix << 4) | ((((ts >> 30) & 0x07) as u8) << 1) | 1,
        (ts >> 22) as u8,
        ((((ts >> 15) & 0x7F) as u8) << 1) | 1,
        (ts >> 7) as u8,
        (((ts & 0x7F) as u8) << 1) | 1,
    ]
}

/// A PES packet split into source packets, unit start on the first
pub(crate) fn pes_packets(pid: u16, stream_id: u8, pts: Option<i64>, payload: &[u8]) -> Vec<Vec<u8>> {
    let header_data_len = if pts.is_some() { 5 } else { 0 };
    let pes_len = 3 + header_data_len + payload.len();

    let mut pes = Vec::with_capacity(9 + header_data_len + payload.len());
    pes.put_slice(&[0x00, 0x00, 0x01, stream_id]);
    pes.put_u16(if pes_len > 0xFFFF { 0 } else { pes_len as u16 });
    pes.put_u8(0x80);
    pes.put_u8(if pts.is_some() { 0x80 } else { 0x00 });
    pes.put_u8(header_data_len as u8);
    if let Some(pts) = pts {
        pes.put_slice(&encode_timestamp(0x2, pts));
    }
    pes.put_slice(payload);

    pes.chunks(184)
        .enumerate()
        .map(|(i, chunk)| source_packet(pid, i == 0, chunk))
        .collect()
}

/// `n` clean aligned units of continuation packets on one pid
pub(crate) fn m2ts_units(n: usize, pid: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(n * ALIGNED_UNIT_SIZE);
    for i in 0..n * PACKETS_PER_UNIT {
        let mut p = source_packet(pid, false, &[(i % 251) as u8; 184]);
        // arrival time stamp, copy permission bits clear
        p[..4].copy_from_slice(&((i as u32 * 300) & 0x3FFF_FFFF).to_be_bytes());
        out.extend(p);
    }
    out
}

/// A unit whose payload is still scrambled: leading sync intact, copy
/// permission bits set, the rest noise
pub(crate) fn encrypted_unit() -> Vec<u8> {
    let mut unit: Vec<u8> = (0..ALIGNED_UNIT_SIZE).map(|i| (i * 7 + 3) as u8).collect();
    unit[0] = 0xC0;
    unit[4] = TS_SYNC_BYTE;
    for i in 1..PACKETS_PER_UNIT {
        if unit[i * PACKET_SIZE + 4] == TS_SYNC_BYTE {
            unit[i * PACKET_SIZE + 4] = 0x00;
        }
    }
    unit
}

/// Concatenate packets and pad with null packets to whole units
pub(crate) fn pad_to_units(packets: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out: Vec<u8> = packets.into_iter().flatten().collect();
    while out.len() % ALIGNED_UNIT_SIZE != 0 {
        out.extend(source_packet(NULL_PID, false, &[0xFF; 184]));
    }
    out
}

// ============================================================================
// Shared helpers
// ============================================================================

fn put_len32(out: &mut Vec<u8>, body: &[u8]) {
    out.put_u32(body.len() as u32);
    out.put_slice(body);
}

fn put_len16(out: &mut Vec<u8>, body: &[u8]) {
    out.put_u16(body.len() as u16);
    out.put_slice(body);
}

fn put_len8(out: &mut Vec<u8>, body: &[u8]) {
    out.put_u8(body.len() as u8);
    out.put_slice(body);
}

/// Fixed-width ASCII code, NUL padded
fn put_code(out: &mut Vec<u8>, code: &str, len: usize) {
    let bytes = code.as_bytes();
    let n = bytes.len().min(len);
    out.put_slice(&bytes[..n]);
    out.put_bytes(0, len - n);
}

fn header(signature: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.put_slice(signature.as_bytes());
    out.put_slice(b"0200");
    out
}

fn pad_to(out: &mut Vec<u8>, len: usize) {
    while out.len() < len {
        out.put_u8(0);
    }
}

fn set_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

/// Length-prefixed coding attributes block
fn stream_attrs(coding: u8, lang: &str) -> Vec<u8> {
    let mut body = vec![coding];
    match StreamKind::from_coding_type(coding) {
        StreamKind::Video => body.put_u8(0x61),
        StreamKind::Audio => {
            body.put_u8(0x31);
            put_code(&mut body, lang, 3);
        }
        StreamKind::TextSubtitle => {
            body.put_u8(0x01);
            put_code(&mut body, lang, 3);
        }
        StreamKind::PresentationGraphics | StreamKind::InteractiveGraphics => {
            put_code(&mut body, lang, 3)
        }
        StreamKind::Unknown => {}
    }
    let mut out = Vec::new();
    put_len8(&mut out, &body);
    out
}

// ============================================================================
// index.bdmv
// ============================================================================

fn hdmv_object(id: u16) -> [u8; 8] {
    let mut o = [0u8; 8];
    o[2..4].copy_from_slice(&id.to_be_bytes());
    o
}

pub(crate) struct IndexBuilder {
    first_play: Option<(u32, [u8; 8])>,
    top_menu: Option<(u32, [u8; 8])>,
    titles: Vec<(u32, u8, [u8; 8])>,
}

impl IndexBuilder {
    pub(crate) fn new() -> Self {
        Self {
            first_play: None,
            top_menu: None,
            titles: Vec::new(),
        }
    }

    pub(crate) fn first_play_hdmv(mut self, id: u16) -> Self {
        self.first_play = Some((1, hdmv_object(id)));
        self
    }

    pub(crate) fn top_menu_hdmv(mut self, id: u16) -> Self {
        self.top_menu = Some((1, hdmv_object(id)));
        self
    }

    pub(crate) fn hdmv_title(mut self, id: u16, hidden: bool) -> Self {
        let access = if hidden { 0x02 } else { 0x00 };
        self.titles.push((1, access, hdmv_object(id)));
        self
    }

    pub(crate) fn bdj_title(mut self, name: &str) -> Self {
        let mut o = [0u8; 8];
        o[0] = 0x80;
        let n = name.len().min(5);
        o[2..2 + n].copy_from_slice(&name.as_bytes()[..n]);
        self.titles.push((2, 0, o));
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut out = header("INDX");
        out.put_u32(0);
        out.put_u32(0);
        pad_to(&mut out, 40);
        put_len32(&mut out, &[0u8; 34]);

        let indexes_start = out.len() as u32;
        set_u32(&mut out, 8, indexes_start);

        let mut body = Vec::new();
        for obj in [&self.first_play, &self.top_menu] {
            match obj {
                Some((kind, o)) => {
                    body.put_u32(kind << 30);
                    body.put_slice(o);
                }
                None => body.put_bytes(0, 12),
            }
        }
        body.put_u16(self.titles.len() as u16);
        for (kind, access, o) in &self.titles {
            body.put_u32((kind << 30) | ((*access as u32) << 28));
            body.put_slice(o);
        }
        put_len32(&mut out, &body);
        out
    }
}

// ============================================================================
// MovieObject.bdmv
// ============================================================================

pub(crate) struct MobjBuilder {
    objects: Vec<(bool, bool, bool, Vec<NavCommand>)>,
}

impl MobjBuilder {
    pub(crate) fn new() -> Self {
        Self {
            objects: Vec::new(),
        }
    }

    pub(crate) fn object(
        mut self,
        resume: bool,
        menu_call_mask: bool,
        title_search_mask: bool,
        cmds: &[NavCommand],
    ) -> Self {
        self.objects
            .push((resume, menu_call_mask, title_search_mask, cmds.to_vec()));
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut out = header("MOBJ");
        out.put_u32(0);
        pad_to(&mut out, 40);

        let mut body = Vec::new();
        body.put_u32(0);
        body.put_u16(self.objects.len() as u16);
        for (resume, menu, title, cmds) in &self.objects {
            body.put_u16(((*resume as u16) << 15) | ((*menu as u16) << 14) | ((*title as u16) << 13));
            body.put_u16(cmds.len() as u16);
            for cmd in cmds {
                body.put_slice(&cmd.to_bytes());
            }
        }
        put_len32(&mut out, &body);
        out
    }
}

// ============================================================================
// *.mpls
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct StreamSpec {
    kind: StreamKind,
    pid: u16,
    coding: u8,
    lang: String,
}

impl StreamSpec {
    pub(crate) fn video(pid: u16, coding: u8) -> Self {
        Self {
            kind: StreamKind::Video,
            pid,
            coding,
            lang: String::new(),
        }
    }

    pub(crate) fn audio(pid: u16, coding: u8, lang: &str) -> Self {
        Self {
            kind: StreamKind::Audio,
            pid,
            coding,
            lang: lang.to_string(),
        }
    }

    pub(crate) fn pg(pid: u16, lang: &str) -> Self {
        Self {
            kind: StreamKind::PresentationGraphics,
            pid,
            coding: CODING_PG,
            lang: lang.to_string(),
        }
    }

    pub(crate) fn ig(pid: u16, lang: &str) -> Self {
        Self {
            kind: StreamKind::InteractiveGraphics,
            pid,
            coding: CODING_IG,
            lang: lang.to_string(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut entry = vec![1u8];
        entry.put_u16(self.pid);
        entry.put_bytes(0, 6);
        put_len8(out, &entry);
        out.put_slice(&stream_attrs(self.coding, &self.lang));
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PlayItemSpec {
    clip: String,
    in_time: u32,
    out_time: u32,
    angles: Vec<String>,
    streams: Vec<StreamSpec>,
    still_mode: StillMode,
    still_time: u16,
    uo_mask: u64,
    connection_condition: u8,
}

impl PlayItemSpec {
    pub(crate) fn new(clip: &str, in_time: u32, out_time: u32) -> Self {
        Self {
            clip: clip.to_string(),
            in_time,
            out_time,
            angles: Vec::new(),
            streams: Vec::new(),
            still_mode: StillMode::None,
            still_time: 0,
            uo_mask: 0,
            connection_condition: 1,
        }
    }

    pub(crate) fn stream(mut self, stream: StreamSpec) -> Self {
        self.streams.push(stream);
        self
    }

    /// Clips of angles 1..
    pub(crate) fn angles(mut self, clips: &[&str]) -> Self {
        self.angles = clips.iter().map(|c| c.to_string()).collect();
        self
    }

    pub(crate) fn still(mut self, mode: StillMode, seconds: u16) -> Self {
        self.still_mode = mode;
        self.still_time = seconds;
        self
    }

    pub(crate) fn uo_mask(mut self, mask: u64) -> Self {
        self.uo_mask = mask;
        self
    }

    fn stn(&self) -> Vec<u8> {
        let count = |kind| self.streams.iter().filter(|s| s.kind == kind).count() as u8;
        let mut body = Vec::new();
        body.put_u16(0);
        body.put_u8(count(StreamKind::Video));
        body.put_u8(count(StreamKind::Audio));
        body.put_u8(count(StreamKind::PresentationGraphics));
        body.put_u8(count(StreamKind::InteractiveGraphics));
        body.put_bytes(0, 3);
        body.put_bytes(0, 5);
        for kind in [
            StreamKind::Video,
            StreamKind::Audio,
            StreamKind::PresentationGraphics,
            StreamKind::InteractiveGraphics,
        ] {
            for s in self.streams.iter().filter(|s| s.kind == kind) {
                s.write(&mut body);
            }
        }
        let mut out = Vec::new();
        put_len16(&mut out, &body);
        out
    }

    fn write(&self, out: &mut Vec<u8>) {
        let multi = !self.angles.is_empty();
        let mut body = Vec::new();
        put_code(&mut body, &self.clip, 5);
        body.put_slice(b"M2TS");
        body.put_u16(((multi as u16) << 4) | self.connection_condition as u16);
        body.put_u8(0);
        body.put_u32(self.in_time);
        body.put_u32(self.out_time);
        body.put_u64(self.uo_mask);
        body.put_u8(0);
        body.put_u8(match self.still_mode {
            StillMode::None => 0,
            StillMode::Time => 1,
            StillMode::Infinite => 2,
        });
        body.put_u16(self.still_time);
        if multi {
            body.put_u8(self.angles.len() as u8 + 1);
            body.put_u8(0x01);
            for clip in &self.angles {
                put_code(&mut body, clip, 5);
                body.put_slice(b"M2TS");
                body.put_u8(0);
            }
        }
        body.put_slice(&self.stn());
        put_len16(out, &body);
    }
}

pub(crate) struct MplsBuilder {
    uo_mask: u64,
    items: Vec<PlayItemSpec>,
    sub_paths: Vec<(u8, String)>,
    marks: Vec<(u8, u16, u32)>,
}

impl MplsBuilder {
    pub(crate) fn new() -> Self {
        Self {
            uo_mask: 0,
            items: Vec::new(),
            sub_paths: Vec::new(),
            marks: Vec::new(),
        }
    }

    pub(crate) fn uo_mask(mut self, mask: u64) -> Self {
        self.uo_mask = mask;
        self
    }

    pub(crate) fn play_item(mut self, item: PlayItemSpec) -> Self {
        self.items.push(item);
        self
    }

    /// Single-clip sub-path
    pub(crate) fn sub_path(mut self, sub_path_type: u8, clip: &str) -> Self {
        self.sub_paths.push((sub_path_type, clip.to_string()));
        self
    }

    pub(crate) fn mark(mut self, mark_type: u8, play_item: u16, time: u32) -> Self {
        self.marks.push((mark_type, play_item, time));
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut out = header("MPLS");
        out.put_u32(0);
        out.put_u32(0);
        out.put_u32(0);
        pad_to(&mut out, 40);

        let mut app = Vec::new();
        app.put_u8(0);
        app.put_u8(1);
        app.put_u16(0);
        app.put_u64(self.uo_mask);
        app.put_u16(0);
        put_len32(&mut out, &app);

        let list_pos = out.len() as u32;
        let mut list = Vec::new();
        list.put_u16(0);
        list.put_u16(self.items.len() as u16);
        list.put_u16(self.sub_paths.len() as u16);
        for item in &self.items {
            item.write(&mut list);
        }
        for (sub_path_type, clip) in &self.sub_paths {
            let mut spi = Vec::new();
            put_code(&mut spi, clip, 5);
            spi.put_slice(b"M2TS");
            spi.put_u32(1 << 1);
            spi.put_u8(0);
            spi.put_u32(0);
            spi.put_u32(0);
            spi.put_u16(0);
            spi.put_u32(0);

            let mut sp = Vec::new();
            sp.put_u8(0);
            sp.put_u8(*sub_path_type);
            sp.put_u16(0);
            sp.put_u8(0);
            sp.put_u8(1);
            put_len16(&mut sp, &spi);
            put_len32(&mut list, &sp);
        }
        put_len32(&mut out, &list);

        let mark_pos = out.len() as u32;
        let mut marks = Vec::new();
        marks.put_u16(self.marks.len() as u16);
        for (mark_type, item, time) in &self.marks {
            marks.put_u8(0);
            marks.put_u8(*mark_type);
            marks.put_u16(*item);
            marks.put_u32(*time);
            marks.put_u16(0xFFFF);
            marks.put_u32(0);
        }
        put_len32(&mut out, &marks);

        set_u32(&mut out, 8, list_pos);
        set_u32(&mut out, 12, mark_pos);
        out
    }
}

// ============================================================================
// *.clpi
// ============================================================================

pub(crate) struct ClpiBuilder {
    packets: u32,
    streams: Vec<(u16, u8)>,
    points: Vec<(u32, u32, bool)>,
}

impl ClpiBuilder {
    pub(crate) fn new(num_source_packets: u32) -> Self {
        Self {
            packets: num_source_packets,
            streams: Vec::new(),
            points: Vec::new(),
        }
    }

    pub(crate) fn stream(mut self, pid: u16, coding: u8) -> Self {
        self.streams.push((pid, coding));
        self
    }

    /// Access points as `(pts 45 kHz, packet, angle change)`; pts must be
    /// multiples of 256 to survive the coarse/fine split
    pub(crate) fn ep_points(mut self, points: impl IntoIterator<Item = (u32, u32, bool)>) -> Self {
        self.points.extend(points);
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut out = header("HDMV");
        out.put_bytes(0, 20);
        pad_to(&mut out, 40);

        let mut clip = Vec::new();
        clip.put_u16(0);
        clip.put_u8(1);
        clip.put_u8(1);
        clip.put_u32(0);
        clip.put_u32(6_000_000);
        clip.put_u32(self.packets);
        clip.put_bytes(0, 128);
        let mut type_info = vec![0x80];
        type_info.put_slice(b"HDMV");
        type_info.put_bytes(0, 25);
        put_len16(&mut clip, &type_info);
        put_len32(&mut out, &clip);

        let sequence_start = out.len() as u32;
        let first = self.points.first().map(|p| p.0).unwrap_or(0);
        let last = self.points.last().map(|p| p.0).unwrap_or(0);
        let mut seq = Vec::new();
        seq.put_u8(0);
        seq.put_u8(1);
        seq.put_u32(0);
        seq.put_u8(1);
        seq.put_u8(0);
        seq.put_u16(0x1001);
        seq.put_u32(0);
        seq.put_u32(first);
        seq.put_u32(last);
        put_len32(&mut out, &seq);

        let program_start = out.len() as u32;
        let mut prog = Vec::new();
        prog.put_u8(0);
        prog.put_u8(1);
        prog.put_u32(0);
        prog.put_u16(0x0100);
        prog.put_u8(self.streams.len() as u8);
        prog.put_u8(0);
        for (pid, coding) in &self.streams {
            prog.put_u16(*pid);
            prog.put_slice(&stream_attrs(*coding, "eng"));
        }
        put_len32(&mut out, &prog);

        let cpi_start = out.len() as u32;
        if self.points.is_empty() {
            out.put_u32(0);
        } else {
            let ep_pid = self
                .streams
                .iter()
                .find(|(_, c)| StreamKind::from_coding_type(*c) == StreamKind::Video)
                .map(|(pid, _)| *pid)
                .unwrap_or(0x1011);
            let n = self.points.len() as u64;

            let mut cpi = Vec::new();
            cpi.put_u16(1);
            // ep map
            cpi.put_u8(0);
            cpi.put_u8(1);
            cpi.put_u16(ep_pid);
            cpi.put_uint((1u64 << 34) | (n << 18) | n, 6);
            cpi.put_u32(14);
            cpi.put_u32(4 + 8 * n as u32);
            for (i, (pts, spn, _)) in self.points.iter().enumerate() {
                cpi.put_u32(((i as u32) << 14) | ((pts >> 18) & 0x3FFF));
                cpi.put_u32(*spn);
            }
            for (pts, spn, angle) in &self.points {
                cpi.put_u32(((*angle as u32) << 31) | (((pts >> 8) & 0x7FF) << 17) | (spn & 0x1FFFF));
            }
            put_len32(&mut out, &cpi);
        }

        set_u32(&mut out, 8, sequence_start);
        set_u32(&mut out, 12, program_start);
        set_u32(&mut out, 16, cpi_start);
        out
    }
}

// ============================================================================
// Graphics segments
// ============================================================================

/// `type, length, body`
pub(crate) fn segment(kind: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![kind];
    put_len16(&mut out, body);
    out
}

/// Palette definition with `(index, y, cr, cb, t)` entries
pub(crate) fn palette_body(id: u8, entries: &[(u8, u8, u8, u8, u8)]) -> Vec<u8> {
    let mut out = vec![id, 0];
    for (index, y, cr, cb, t) in entries {
        out.put_slice(&[*index, *y, *cr, *cb, *t]);
    }
    out
}

/// Single-fragment object filled with one color
pub(crate) fn solid_object_body(id: u16, width: u16, height: u16, color: u8) -> Vec<u8> {
    let mut rle = Vec::new();
    for _ in 0..height {
        rle.put_u8(0);
        rle.put_u8(0xC0 | ((width >> 8) as u8 & 0x3F));
        rle.put_u8(width as u8);
        rle.put_u8(color);
        rle.put_u16(0);
    }
    let mut out = Vec::new();
    out.put_u16(id);
    out.put_u8(0);
    out.put_u8(0xC0);
    out.put_uint(rle.len() as u64 + 4, 3);
    out.put_u16(width);
    out.put_u16(height);
    out.put_slice(&rle);
    out
}

/// Presentation composition showing `objects` as `(object id, x, y)`
pub(crate) fn pcs_body(number: u16, palette: u8, objects: &[(u16, u16, u16)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u16(1920);
    out.put_u16(1080);
    out.put_u8(0x10);
    out.put_u16(number);
    out.put_u8(0x80);
    out.put_u8(0);
    out.put_u8(palette);
    out.put_u8(objects.len() as u8);
    for (id, x, y) in objects {
        out.put_u16(*id);
        out.put_u8(0);
        out.put_u8(0);
        out.put_u16(*x);
        out.put_u16(*y);
    }
    out
}

#[derive(Debug, Clone)]
pub(crate) struct ButtonSpec {
    id: u16,
    numeric: u16,
    auto_action: bool,
    x: u16,
    y: u16,
    neighbors: [u16; 4],
    normal: u16,
    selected: u16,
    activated: u16,
    cmds: Vec<NavCommand>,
}

impl ButtonSpec {
    pub(crate) fn new(id: u16) -> Self {
        Self {
            id,
            numeric: 0xFFFF,
            auto_action: false,
            x: 0,
            y: 0,
            neighbors: [id; 4],
            normal: 0xFFFF,
            selected: 0xFFFF,
            activated: 0xFFFF,
            cmds: Vec::new(),
        }
    }

    pub(crate) fn neighbors(mut self, upper: u16, lower: u16, left: u16, right: u16) -> Self {
        self.neighbors = [upper, lower, left, right];
        self
    }

    pub(crate) fn numeric(mut self, value: u16) -> Self {
        self.numeric = value;
        self
    }

    pub(crate) fn auto_action(mut self) -> Self {
        self.auto_action = true;
        self
    }

    pub(crate) fn at(mut self, x: u16, y: u16) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Object ids of the normal, selected and activated states (single frame each)
    pub(crate) fn objects(mut self, normal: u16, selected: u16, activated: u16) -> Self {
        self.normal = normal;
        self.selected = selected;
        self.activated = activated;
        self
    }

    pub(crate) fn cmds(mut self, cmds: &[NavCommand]) -> Self {
        self.cmds = cmds.to_vec();
        self
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.put_u16(self.id);
        out.put_u16(self.numeric);
        out.put_u8((self.auto_action as u8) << 7);
        out.put_u16(self.x);
        out.put_u16(self.y);
        for n in self.neighbors {
            out.put_u16(n);
        }
        out.put_u16(self.normal);
        out.put_u16(self.normal);
        out.put_u8(0);
        out.put_u8(0xFF);
        out.put_u16(self.selected);
        out.put_u16(self.selected);
        out.put_u8(0);
        out.put_u8(0xFF);
        out.put_u16(self.activated);
        out.put_u16(self.activated);
        out.put_u16(self.cmds.len() as u16);
        for cmd in &self.cmds {
            out.put_slice(&cmd.to_bytes());
        }
    }
}

struct PageSpec {
    id: u8,
    uo_mask: u64,
    default_selected: u16,
    bogs: Vec<Vec<ButtonSpec>>,
}

pub(crate) struct IcsBuilder {
    popup: bool,
    pages: Vec<PageSpec>,
}

impl IcsBuilder {
    pub(crate) fn new(popup: bool) -> Self {
        Self {
            popup,
            pages: Vec::new(),
        }
    }

    pub(crate) fn page(
        mut self,
        id: u8,
        uo_mask: u64,
        default_selected: u16,
        bogs: Vec<Vec<ButtonSpec>>,
    ) -> Self {
        self.pages.push(PageSpec {
            id,
            uo_mask,
            default_selected,
            bogs,
        });
        self
    }

    /// Complete ICS segment body: descriptors, sequence flags, composition
    pub(crate) fn build_segment_body(&self) -> Vec<u8> {
        let mut data = Vec::new();
        // preloaded stream model: no timeouts
        data.put_u8(0x80 | ((self.popup as u8) << 6));
        data.put_uint(0, 3);
        data.put_u8(self.pages.len() as u8);
        for page in &self.pages {
            data.put_u8(page.id);
            data.put_u8(0);
            data.put_u64(page.uo_mask);
            data.put_slice(&[0, 0, 0, 0]);
            data.put_u8(0);
            data.put_u16(page.default_selected);
            data.put_u16(NO_BUTTON);
            data.put_u8(0);
            data.put_u8(page.bogs.len() as u8);
            for bog in &page.bogs {
                data.put_u16(bog.first().map(|b| b.id).unwrap_or(NO_BUTTON));
                data.put_u8(bog.len() as u8);
                for button in bog {
                    button.write(&mut data);
                }
            }
        }

        let mut out = Vec::new();
        out.put_u16(1920);
        out.put_u16(1080);
        out.put_u8(0x10);
        out.put_u16(0);
        out.put_u8(0x80);
        out.put_u8(0xC0);
        out.put_uint(data.len() as u64, 3);
        out.put_slice(&data);
        out
    }

    /// Segments of a display set: ICS then END
    pub(crate) fn build_display_set(&self) -> Vec<u8> {
        let mut out = segment(0x18, &self.build_segment_body());
        out.extend(segment(0x80, &[]));
        out
    }
}

// ============================================================================
// Discs
// ============================================================================

/// Playlist 1: clip 00001 (96 packets) then clip 00002 (64 packets), one
/// access point every unit (4608 ticks), a chapter at the start of each clip.
/// Title 1 runs movie object 0, which plays the playlist.
pub(crate) fn two_clip_disc() -> MemDisc {
    use crate::hdmv::{encode, Opcode};

    let clip = |units: u32| {
        ClpiBuilder::new(units * 32)
            .stream(0x1011, CODING_H264)
            .ep_points((0..units).map(|i| (i * 4608, i * 32, true)))
            .build()
    };
    let playlist = MplsBuilder::new()
        .play_item(
            PlayItemSpec::new("00001", 0, 3 * 4608).stream(StreamSpec::video(0x1011, CODING_H264)),
        )
        .play_item(
            PlayItemSpec::new("00002", 0, 2 * 4608).stream(StreamSpec::video(0x1011, CODING_H264)),
        )
        .mark(1, 0, 0)
        .mark(1, 1, 0)
        .build();
    let index = IndexBuilder::new().top_menu_hdmv(1).hdmv_title(0, false).build();
    let objects = MobjBuilder::new()
        .object(false, false, false, &[encode(Opcode::PlayPl, true, false, 1, 0)])
        .object(false, false, false, &[])
        .build();

    MemDisc::new()
        .with_file(disc_io::INDEX_PATH, index)
        .with_file(disc_io::MOVIE_OBJECT_PATH, objects)
        .with_file(disc_io::playlist_path(1), playlist)
        .with_file(disc_io::clip_info_path("00001"), clip(3))
        .with_file(disc_io::clip_info_path("00002"), clip(2))
        .with_file(disc_io::stream_path("00001"), m2ts_units(3, 0x1011))
        .with_file(disc_io::stream_path("00002"), m2ts_units(2, 0x1011))
}
