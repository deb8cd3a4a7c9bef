//! `MovieObject.bdmv` parser - HDMV navigation programs.

use serde::Serialize;

use super::{read_header, BitReader, ParseResult};

/// One raw 12-byte navigation command: opcode word + destination + source operands.
/// Decoded by `hdmv::Instruction`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct NavCommand {
    pub insn: u32,
    pub dst: u32,
    pub src: u32,
}

impl NavCommand {
    pub const SIZE: usize = 12;

    pub fn new(insn: u32, dst: u32, src: u32) -> Self {
        Self { insn, dst, src }
    }

    pub fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        Ok(Self {
            insn: r.read_u32()?,
            dst: r.read_u32()?,
            src: r.read_u32()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.insn.to_be_bytes());
        out[4..8].copy_from_slice(&self.dst.to_be_bytes());
        out[8..12].copy_from_slice(&self.src.to_be_bytes());
        out
    }
}

/// A movie object: program plus title-level user-operation flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MovieObject {
    /// Playback may resume here after a menu call
    pub resume_intention_flag: bool,
    /// Menu call is forbidden while this object runs
    pub menu_call_mask: bool,
    /// Title search is forbidden while this object runs
    pub title_search_mask: bool,
    pub cmds: Vec<NavCommand>,
}

/// Arena of movie objects; branch instructions address objects by index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MovieObjects {
    pub version: String,
    pub objects: Vec<MovieObject>,
}

impl MovieObjects {
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(data);
        let version = read_header(&mut r, "MOBJ")?;
        let _ext_start = r.read_u32()?;

        r.seek_byte(40)?;
        let _len = r.read_u32()?;
        r.skip_bits(32)?;
        let num_objects = r.read_u16()?;

        let mut objects = Vec::with_capacity((num_objects as usize).min(r.remaining_bytes() / 4));
        for _ in 0..num_objects {
            let resume_intention_flag = r.read_bool()?;
            let menu_call_mask = r.read_bool()?;
            let title_search_mask = r.read_bool()?;
            r.skip_bits(13)?;
            let num_cmds = r.read_u16()? as usize;
            let mut cmds = Vec::with_capacity(num_cmds.min(r.remaining_bytes() / NavCommand::SIZE));
            for _ in 0..num_cmds {
                cmds.push(NavCommand::parse(&mut r)?);
            }
            objects.push(MovieObject {
                resume_intention_flag,
                menu_call_mask,
                title_search_mask,
                cmds,
            });
        }

        Ok(Self { version, objects })
    }

    pub fn get(&self, id: u32) -> Option<&MovieObject> {
        self.objects.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
