// Sub-path clip preloading
//
// Menu and text sub-paths are small; they are read into memory in one go,
// through the same unit validation as the main path, and then demuxed on
// demand.

use serde::Serialize;

use super::pes::PesAssembler;
use super::{read_full, validate_unit, PesPacket, UnitStatus, ALIGNED_UNIT_SIZE, PACKET_SIZE};
use crate::disc_io::{self, DiscFs};
use crate::error::{NavError, NavResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadStats {
    pub units: u32,
    pub corrupt_units: u32,
    pub encrypted_units: u32,
}

/// A whole clip held in memory, validated unit by unit
#[derive(Debug, Clone)]
pub struct PreloadedClip {
    pub clip_id: String,
    pub data: Vec<u8>,
    pub stats: PreloadStats,
}

impl PreloadedClip {
    /// Complete PES packets of one pid, in stream order
    pub fn extract_pes(&self, pid: u16) -> Vec<PesPacket> {
        let mut asm = PesAssembler::new(pid);
        let mut out: Vec<PesPacket> = self
            .data
            .chunks_exact(PACKET_SIZE)
            .filter_map(|packet| asm.push(packet))
            .collect();
        out.extend(asm.flush());
        out
    }
}

/// Load a clip's stream file into memory.
///
/// Fails with `PreloadTooLarge` above `ceiling` bytes and with `Encrypted`
/// after more than `encrypted_threshold` consecutive encrypted units.
/// Corrupt units are dropped.
pub fn preload_clip(
    disc: &dyn DiscFs,
    clip_id: &str,
    ceiling: u64,
    encrypted_threshold: u32,
) -> NavResult<PreloadedClip> {
    let mut file = disc.open_file(&disc_io::stream_path(clip_id))?;
    let size = file.size();
    if size > ceiling {
        tracing::warn!("{}: {} bytes exceeds preload ceiling", clip_id, size);
        return Err(NavError::PreloadTooLarge {
            clip: clip_id.to_string(),
            size,
            limit: ceiling,
        });
    }

    let threshold = if disc.is_protected() {
        0
    } else {
        encrypted_threshold
    };
    let mut data = Vec::with_capacity(size as usize);
    let mut unit = vec![0u8; ALIGNED_UNIT_SIZE];
    let mut stats = PreloadStats::default();
    let mut encrypted_run = 0u32;

    loop {
        let got = read_full(file.as_mut(), &mut unit)?;
        if got == 0 {
            break;
        }
        stats.units += 1;

        let status = if got < ALIGNED_UNIT_SIZE {
            UnitStatus::Corrupt
        } else {
            validate_unit(&unit)
        };
        match status {
            UnitStatus::Ok => {
                encrypted_run = 0;
                data.extend_from_slice(&unit);
            }
            UnitStatus::Encrypted => {
                encrypted_run += 1;
                stats.encrypted_units += 1;
                if encrypted_run > threshold {
                    return Err(NavError::Encrypted);
                }
            }
            UnitStatus::Corrupt => {
                encrypted_run = 0;
                stats.corrupt_units += 1;
                tracing::warn!("{}: corrupt unit {} dropped", clip_id, stats.units - 1);
            }
        }

        if got < ALIGNED_UNIT_SIZE {
            break;
        }
    }

    tracing::debug!(
        "preloaded {} ({} bytes, {} units)",
        clip_id,
        data.len(),
        stats.units
    );
    Ok(PreloadedClip {
        clip_id: clip_id.to_string(),
        data,
        stats,
    })
}
