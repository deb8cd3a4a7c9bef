// PES - Packetized Elementary Stream reassembly
//
// Source packets are 192 bytes: 4-byte TP_extra_header + 188-byte TS packet.
// Graphics streams (IG / PG) are reassembled here so the graphics controller
// sees whole segments; other streams are only inspected for their PTS.

use super::{PACKET_SIZE, TS_SYNC_BYTE};

// ============================================================================
// TS Packet Header
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub payload_exists: bool,
    pub continuity_counter: u8,
}

impl TsHeader {
    /// Parse the 4-byte TS header (without the M2TS extra header)
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 || data[0] != TS_SYNC_BYTE {
            return None;
        }

        Some(Self {
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            pid: ((data[1] as u16 & 0x1F) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            payload_exists: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }
}

/// PID of a 192-byte source packet, if the sync byte is in place
pub fn packet_pid(packet: &[u8]) -> Option<u16> {
    if packet.len() < 8 || packet[4] != TS_SYNC_BYTE {
        return None;
    }
    Some(((packet[5] as u16 & 0x1F) << 8) | packet[6] as u16)
}

/// Overwrite the PID of a source packet in place
pub fn set_packet_pid(packet: &mut [u8], pid: u16) {
    if packet.len() >= 8 {
        packet[5] = (packet[5] & 0xE0) | ((pid >> 8) as u8 & 0x1F);
        packet[6] = pid as u8;
    }
}

/// Header and payload slice of one source packet
pub fn split_packet(packet: &[u8]) -> Option<(TsHeader, &[u8])> {
    if packet.len() < PACKET_SIZE {
        return None;
    }
    let ts = &packet[4..PACKET_SIZE];
    let header = TsHeader::parse(ts)?;
    if !header.payload_exists {
        return Some((header, &[]));
    }
    let offset = if header.adaptation_field_exists {
        5 + ts[4] as usize
    } else {
        4
    };
    if offset >= ts.len() {
        return Some((header, &[]));
    }
    Some((header, &ts[offset..]))
}

// ============================================================================
// PES Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesPacket {
    pub pid: u16,
    pub stream_id: u8,
    /// 90 kHz
    pub pts: Option<i64>,
    /// 90 kHz
    pub dts: Option<i64>,
    pub data: Vec<u8>,
}

/// Streams without the optional PES header extension
fn has_pes_extension(stream_id: u8) -> bool {
    !matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF)
}

/// PES start: stream id, PTS, DTS, header length and declared packet length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub header_len: usize,
    /// Declared PES_packet_length (bytes after the length field); 0 = unbounded
    pub packet_len: usize,
}

pub fn parse_pes_header(data: &[u8]) -> Option<PesHeader> {
    if data.len() < 6 {
        return None;
    }

    // Check PES start code: 0x000001
    if data[0] != 0x00 || data[1] != 0x00 || data[2] != 0x01 {
        return None;
    }

    let stream_id = data[3];
    let packet_len = ((data[4] as usize) << 8) | data[5] as usize;

    if !has_pes_extension(stream_id) {
        return Some(PesHeader {
            stream_id,
            pts: None,
            dts: None,
            header_len: 6,
            packet_len,
        });
    }

    if data.len() < 9 {
        return None;
    }

    let pts_dts_flags = (data[7] >> 6) & 0x03;
    let header_data_length = data[8] as usize;
    let header_len = 9 + header_data_length;
    if header_len > data.len() {
        return None;
    }

    let mut pts = None;
    let mut dts = None;

    if pts_dts_flags >= 2 && header_data_length >= 5 {
        pts = Some(parse_timestamp(&data[9..14]));
    }

    if pts_dts_flags == 3 && header_data_length >= 10 {
        dts = Some(parse_timestamp(&data[14..19]));
    }

    Some(PesHeader {
        stream_id,
        pts,
        dts,
        header_len,
        packet_len,
    })
}

/// 33-bit timestamp encoded in 5 bytes, 90 kHz
pub fn parse_timestamp(data: &[u8]) -> i64 {
    (((data[0] as i64) >> 1) & 0x07) << 30
        | ((data[1] as i64) << 22)
        | (((data[2] as i64) >> 1) << 15)
        | ((data[3] as i64) << 7)
        | ((data[4] as i64) >> 1)
}

// ============================================================================
// PES Assembler
// ============================================================================

/// Reassembles PES packets of one PID from source packets.
#[derive(Debug)]
pub struct PesAssembler {
    pid: u16,
    buffer: Vec<u8>,
    started: bool,
    /// Largest PES accepted; a runaway packet is dropped
    max_len: usize,
}

impl PesAssembler {
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            buffer: Vec::new(),
            started: false,
            max_len: 1 << 20,
        }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    /// Feed one source packet. Returns a PES that was completed by this packet:
    /// either its declared length was reached or a new PES started.
    pub fn push(&mut self, packet: &[u8]) -> Option<PesPacket> {
        let (header, payload) = split_packet(packet)?;
        if header.pid != self.pid || header.transport_error {
            return None;
        }

        let mut finished = None;
        if header.payload_unit_start {
            if self.started {
                finished = self.finish();
            }
            self.buffer.clear();
            self.started = true;
        } else if !self.started {
            // joined mid-packet; wait for the next start
            return None;
        }

        self.buffer.extend_from_slice(payload);
        if self.buffer.len() > self.max_len {
            tracing::debug!("pid 0x{:04x}: oversized PES dropped", self.pid);
            self.reset();
            return finished;
        }

        if finished.is_none() && self.is_complete() {
            finished = self.finish();
        }
        finished
    }

    fn is_complete(&self) -> bool {
        match parse_pes_header(&self.buffer) {
            Some(h) if h.packet_len > 0 => self.buffer.len() >= 6 + h.packet_len,
            _ => false,
        }
    }

    fn finish(&mut self) -> Option<PesPacket> {
        self.started = false;
        let buffer = std::mem::take(&mut self.buffer);
        let header = parse_pes_header(&buffer)?;
        let end = if header.packet_len > 0 {
            (6 + header.packet_len).min(buffer.len())
        } else {
            buffer.len()
        };
        if header.header_len > end {
            return None;
        }
        Some(PesPacket {
            pid: self.pid,
            stream_id: header.stream_id,
            pts: header.pts,
            dts: header.dts,
            data: buffer[header.header_len..end].to_vec(),
        })
    }

    /// Flush a pending PES without a declared length
    pub fn flush(&mut self) -> Option<PesPacket> {
        if self.started {
            self.finish()
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{encode_timestamp, pes_packets, source_packet};

    #[test]
    fn parses_ts_header() {
        let pkt = source_packet(0x1200, true, &[]);
        let (h, _) = split_packet(&pkt).unwrap();
        assert_eq!(h.pid, 0x1200);
        assert!(h.payload_unit_start);
        assert_eq!(packet_pid(&pkt), Some(0x1200));
    }

    #[test]
    fn rewrites_pid_in_place() {
        let mut pkt = source_packet(0x1011, true, &[1, 2, 3]);
        set_packet_pid(&mut pkt, 0x1FFF);
        assert_eq!(packet_pid(&pkt), Some(0x1FFF));
        // flags in the same byte survive
        assert_eq!(pkt[5] & 0x40, 0x40);
    }

    #[test]
    fn timestamp_decoding() {
        for ts in [0i64, 1, 90_000, (1 << 33) - 1] {
            assert_eq!(parse_timestamp(&encode_timestamp(0x2, ts)), ts);
        }
    }

    #[test]
    fn reassembles_multi_packet_pes() {
        let payload: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
        let packets = pes_packets(0x1400, 0xBD, Some(180_000), &payload);
        assert!(packets.len() > 2);

        let mut asm = PesAssembler::new(0x1400);
        let mut out = Vec::new();
        for pkt in &packets {
            if let Some(pes) = asm.push(pkt) {
                out.push(pes);
            }
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pts, Some(180_000));
        assert_eq!(out[0].stream_id, 0xBD);
        assert_eq!(out[0].data, payload);
    }

    #[test]
    fn ignores_other_pids_and_mid_stream_join() {
        let packets = pes_packets(0x1400, 0xBD, None, &[9u8; 400]);
        let mut asm = PesAssembler::new(0x1400);
        // skip the start packet: nothing should come out
        for pkt in &packets[1..] {
            assert!(asm.push(pkt).is_none());
        }
        let other = source_packet(0x1011, true, &[0, 0, 1, 0xE0, 0, 0]);
        assert!(asm.push(&other).is_none());
    }
}
