// Packet filters applied to every accepted unit
//
// WindowFilter neutralises elementary-stream PES packets that fall outside
// the play item's in/out window (the demuxer downstream sees null packets).
// GraphicsExtractor reassembles the selected IG and PG streams.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use super::pes::{self, PesAssembler, PesPacket};
use super::{NULL_PID, PACKET_SIZE};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("pid 0x{pid:04x}: unit start without a PES header")]
    MissingPesHeader { pid: u16 },
}

// ============================================================================
// In/Out Window
// ============================================================================

/// Elementary stream counts of the play item, per type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamCounts {
    pub video: u8,
    pub audio: u8,
    pub pg: u8,
    pub ig: u8,
}

impl StreamCounts {
    /// Conventional PIDs of the primary streams
    pub fn pids(&self) -> Vec<u16> {
        let mut pids = Vec::new();
        pids.extend((0..self.video as u16).map(|i| 0x1011 + i));
        pids.extend((0..self.audio as u16).map(|i| 0x1100 + i));
        pids.extend((0..self.pg as u16).map(|i| 0x1200 + i));
        pids.extend((0..self.ig as u16).map(|i| 0x1400 + i));
        pids
    }
}

#[derive(Debug)]
pub struct WindowFilter {
    /// 90 kHz
    in_pts: i64,
    out_pts: i64,
    /// Per pid: currently inside a PES that is being dropped
    dropping: HashMap<u16, bool>,
}

impl WindowFilter {
    /// `in_time` and `out_time` are 45 kHz play item times
    pub fn new(in_time: u32, out_time: u32, counts: StreamCounts) -> Self {
        Self {
            in_pts: in_time as i64 * 2,
            out_pts: out_time as i64 * 2,
            dropping: counts.pids().into_iter().map(|pid| (pid, false)).collect(),
        }
    }

    pub fn reset(&mut self) {
        for state in self.dropping.values_mut() {
            *state = false;
        }
    }

    fn outside(&self, pts: i64) -> bool {
        pts < self.in_pts || pts >= self.out_pts
    }

    /// Rewrite packets of out-of-window PES to the null pid.
    /// Returns the number of packets neutralised.
    pub fn apply(&mut self, unit: &mut [u8]) -> Result<u32, FilterError> {
        let mut dropped = 0;
        for packet in unit.chunks_exact_mut(PACKET_SIZE) {
            let Some((header, payload)) = pes::split_packet(packet) else {
                continue;
            };
            let Some(&state) = self.dropping.get(&header.pid) else {
                continue;
            };

            let drop = if header.payload_unit_start {
                let pes = pes::parse_pes_header(payload)
                    .ok_or(FilterError::MissingPesHeader { pid: header.pid })?;
                let drop = pes.pts.map(|pts| self.outside(pts)).unwrap_or(state);
                self.dropping.insert(header.pid, drop);
                drop
            } else {
                state
            };

            if drop {
                pes::set_packet_pid(packet, NULL_PID);
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}

// ============================================================================
// Graphics Extraction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GraphicsKind {
    Interactive,
    Presentation,
}

#[derive(Debug, Clone)]
pub struct GraphicsPes {
    pub kind: GraphicsKind,
    pub pes: PesPacket,
}

/// Reassembles the selected IG and PG streams of the main path
#[derive(Debug, Default)]
pub struct GraphicsExtractor {
    ig: Option<PesAssembler>,
    pg: Option<PesAssembler>,
}

impl GraphicsExtractor {
    pub fn new(ig_pid: Option<u16>, pg_pid: Option<u16>) -> Self {
        Self {
            ig: ig_pid.map(PesAssembler::new),
            pg: pg_pid.map(PesAssembler::new),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ig.is_none() && self.pg.is_none()
    }

    pub fn ig_pid(&self) -> Option<u16> {
        self.ig.as_ref().map(PesAssembler::pid)
    }

    pub fn pg_pid(&self) -> Option<u16> {
        self.pg.as_ref().map(PesAssembler::pid)
    }

    /// Follow a stream selection change
    pub fn set_pg_pid(&mut self, pid: Option<u16>) {
        if self.pg_pid() != pid {
            self.pg = pid.map(PesAssembler::new);
        }
    }

    pub fn set_ig_pid(&mut self, pid: Option<u16>) {
        if self.ig_pid() != pid {
            self.ig = pid.map(PesAssembler::new);
        }
    }

    pub fn reset(&mut self) {
        if let Some(ig) = self.ig.as_mut() {
            ig.reset();
        }
        if let Some(pg) = self.pg.as_mut() {
            pg.reset();
        }
    }

    pub fn feed_unit(&mut self, unit: &[u8], out: &mut Vec<GraphicsPes>) {
        for packet in unit.chunks_exact(PACKET_SIZE) {
            self.feed_packet(packet, out);
        }
    }

    pub fn feed_packet(&mut self, packet: &[u8], out: &mut Vec<GraphicsPes>) {
        let Some(pid) = pes::packet_pid(packet) else {
            return;
        };
        for (kind, asm) in [
            (GraphicsKind::Interactive, self.ig.as_mut()),
            (GraphicsKind::Presentation, self.pg.as_mut()),
        ] {
            if let Some(asm) = asm.filter(|a| a.pid() == pid) {
                if let Some(pes) = asm.push(packet) {
                    out.push(GraphicsPes { kind, pes });
                }
            }
        }
    }
}
