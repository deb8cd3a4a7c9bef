//! Presentation graphics (subtitle) compositions: PCS and WDS.
//!
//! Palettes, objects and run-length decoding are shared with interactive
//! graphics and live in `segment`.

use serde::Serialize;

use super::segment::{CompositionObject, Window};
use super::{BitReader, ParseResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompositionState {
    Normal,
    AcquisitionPoint,
    EpochStart,
    EpochContinue,
}

impl CompositionState {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => CompositionState::Normal,
            1 => CompositionState::AcquisitionPoint,
            2 => CompositionState::EpochStart,
            _ => CompositionState::EpochContinue,
        }
    }

    /// The display set replaces all previously decoded state
    pub fn starts_epoch(&self) -> bool {
        matches!(self, CompositionState::EpochStart)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoDescriptor {
    pub width: u16,
    pub height: u16,
    pub frame_rate: u8,
}

impl VideoDescriptor {
    pub fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let width = r.read_u16()?;
        let height = r.read_u16()?;
        let frame_rate = r.read_bits(4)? as u8;
        r.skip_bits(4)?;
        Ok(Self {
            width,
            height,
            frame_rate,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompositionDescriptor {
    pub number: u16,
    pub state: CompositionState,
}

impl CompositionDescriptor {
    pub fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let number = r.read_u16()?;
        let state = CompositionState::from_bits(r.read_bits(2)?);
        r.skip_bits(6)?;
        Ok(Self { number, state })
    }
}

/// Presentation composition segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentationComposition {
    pub video: VideoDescriptor,
    pub composition: CompositionDescriptor,
    pub palette_update: bool,
    pub palette_id_ref: u8,
    pub objects: Vec<CompositionObject>,
}

impl PresentationComposition {
    pub fn parse(body: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(body);
        let video = VideoDescriptor::parse(&mut r)?;
        let composition = CompositionDescriptor::parse(&mut r)?;
        let palette_update = r.read_bool()?;
        r.skip_bits(7)?;
        let palette_id_ref = r.read_u8()?;
        let num_objects = r.read_u8()?;
        let objects = (0..num_objects)
            .map(|_| CompositionObject::parse(&mut r))
            .collect::<ParseResult<Vec<_>>>()?;
        Ok(Self {
            video,
            composition,
            palette_update,
            palette_id_ref,
            objects,
        })
    }

    /// An empty composition clears the subtitle plane
    pub fn is_clear(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Window definition segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowDefinition {
    pub windows: Vec<Window>,
}

impl WindowDefinition {
    pub fn parse(body: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(body);
        let num_windows = r.read_u8()?;
        let windows = (0..num_windows)
            .map(|_| Window::parse(&mut r))
            .collect::<ParseResult<Vec<_>>>()?;
        Ok(Self { windows })
    }
}
