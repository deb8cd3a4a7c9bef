//! Interactive graphics composition (ICS) parser - menu pages and buttons.
//!
//! An ICS may be split over several segments; each repeats the video,
//! composition and sequence descriptors and carries a slice of the body.
//! The first slice starts with the 24-bit total body length.

use serde::Serialize;

use super::mobj::NavCommand;
use super::pg::{CompositionDescriptor, VideoDescriptor};
use super::segment::{CompositionObject, Window};
use super::{BitReader, ParseError, ParseResult};
use crate::uo_mask::UoMask;

/// Buttons, objects and pages use 0xFFFF / 0xFF as "none"
pub const NO_BUTTON: u16 = 0xFFFF;
pub const NO_OBJECT: u16 = 0xFFFF;
pub const NO_SOUND: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UiModel {
    /// Menu is always shown
    AlwaysOn,
    /// Menu is toggled with the popup key
    Popup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Effect {
    /// 90 kHz
    pub duration: u32,
    pub palette_id_ref: u8,
    pub objects: Vec<CompositionObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectSequence {
    pub windows: Vec<Window>,
    pub effects: Vec<Effect>,
}

impl EffectSequence {
    fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let num_windows = r.read_u8()?;
        let windows = (0..num_windows)
            .map(|_| Window::parse(r))
            .collect::<ParseResult<Vec<_>>>()?;
        let num_effects = r.read_u8()?;
        let mut effects = Vec::with_capacity(num_effects as usize);
        for _ in 0..num_effects {
            let duration = r.read_bits(24)?;
            let palette_id_ref = r.read_u8()?;
            let num_objects = r.read_u8()?;
            let objects = (0..num_objects)
                .map(|_| CompositionObject::parse(r))
                .collect::<ParseResult<Vec<_>>>()?;
            effects.push(Effect {
                duration,
                palette_id_ref,
                objects,
            });
        }
        Ok(Self { windows, effects })
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Object id range animated for one button state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateObjects {
    pub start: u16,
    pub end: u16,
    pub repeat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Neighbors {
    pub upper: u16,
    pub lower: u16,
    pub left: u16,
    pub right: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub id: u16,
    /// 0xFFFF: not selectable by number
    pub numeric_select_value: u16,
    /// Activate as soon as selected
    pub auto_action: bool,
    pub x: u16,
    pub y: u16,
    pub neighbors: Neighbors,
    pub normal: StateObjects,
    pub selected_sound_id_ref: u8,
    pub selected: StateObjects,
    pub activated_sound_id_ref: u8,
    /// `repeat` is unused for the activated state
    pub activated: StateObjects,
    pub nav_cmds: Vec<NavCommand>,
}

impl Button {
    fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let id = r.read_u16()?;
        let numeric_select_value = r.read_u16()?;
        let auto_action = r.read_bool()?;
        r.skip_bits(7)?;
        let x = r.read_u16()?;
        let y = r.read_u16()?;
        let neighbors = Neighbors {
            upper: r.read_u16()?,
            lower: r.read_u16()?,
            left: r.read_u16()?,
            right: r.read_u16()?,
        };
        let normal = parse_state_objects(r, true)?;
        let selected_sound_id_ref = r.read_u8()?;
        let selected = parse_state_objects(r, true)?;
        let activated_sound_id_ref = r.read_u8()?;
        let activated = parse_state_objects(r, false)?;
        let num_cmds = r.read_u16()? as usize;
        let mut nav_cmds = Vec::with_capacity(num_cmds.min(r.remaining_bytes() / NavCommand::SIZE));
        for _ in 0..num_cmds {
            nav_cmds.push(NavCommand::parse(r)?);
        }
        Ok(Self {
            id,
            numeric_select_value,
            auto_action,
            x,
            y,
            neighbors,
            normal,
            selected_sound_id_ref,
            selected,
            activated_sound_id_ref,
            activated,
            nav_cmds,
        })
    }
}

fn parse_state_objects(r: &mut BitReader<'_>, has_repeat: bool) -> ParseResult<StateObjects> {
    let start = r.read_u16()?;
    let end = r.read_u16()?;
    let repeat = if has_repeat {
        let flag = r.read_bool()?;
        r.skip_bits(7)?;
        flag
    } else {
        false
    };
    Ok(StateObjects { start, end, repeat })
}

/// Button overlap group: at most one of its buttons is shown at a time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bog {
    pub default_valid_button_id_ref: u16,
    pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub id: u8,
    pub version: u8,
    pub uo_mask: UoMask,
    pub in_effects: EffectSequence,
    pub out_effects: EffectSequence,
    pub animation_frame_rate_code: u8,
    pub default_selected_button_id_ref: u16,
    pub default_activated_button_id_ref: u16,
    pub palette_id_ref: u8,
    pub bogs: Vec<Bog>,
}

impl Page {
    fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        let id = r.read_u8()?;
        let version = r.read_u8()?;
        let uo_mask = UoMask::parse(r)?;
        let in_effects = EffectSequence::parse(r)?;
        let out_effects = EffectSequence::parse(r)?;
        let animation_frame_rate_code = r.read_u8()?;
        let default_selected_button_id_ref = r.read_u16()?;
        let default_activated_button_id_ref = r.read_u16()?;
        let palette_id_ref = r.read_u8()?;
        let num_bogs = r.read_u8()?;
        let mut bogs = Vec::with_capacity(num_bogs as usize);
        for _ in 0..num_bogs {
            let default_valid_button_id_ref = r.read_u16()?;
            let num_buttons = r.read_u8()?;
            let buttons = (0..num_buttons)
                .map(|_| Button::parse(r))
                .collect::<ParseResult<Vec<_>>>()?;
            bogs.push(Bog {
                default_valid_button_id_ref,
                buttons,
            });
        }
        Ok(Self {
            id,
            version,
            uo_mask,
            in_effects,
            out_effects,
            animation_frame_rate_code,
            default_selected_button_id_ref,
            default_activated_button_id_ref,
            palette_id_ref,
            bogs,
        })
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.bogs.iter().flat_map(|bog| bog.buttons.iter())
    }

    pub fn button(&self, id: u16) -> Option<&Button> {
        self.buttons().find(|b| b.id == id)
    }

    /// Index of the overlap group containing a button
    pub fn bog_of(&self, id: u16) -> Option<usize> {
        self.bogs
            .iter()
            .position(|bog| bog.buttons.iter().any(|b| b.id == id))
    }
}

/// One ICS segment: descriptors plus a slice of the composition body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcsFragment {
    pub video: VideoDescriptor,
    pub composition: CompositionDescriptor,
    pub first_in_seq: bool,
    pub last_in_seq: bool,
    pub data: Vec<u8>,
}

impl IcsFragment {
    pub fn parse(body: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(body);
        let video = VideoDescriptor::parse(&mut r)?;
        let composition = CompositionDescriptor::parse(&mut r)?;
        let first_in_seq = r.read_bool()?;
        let last_in_seq = r.read_bool()?;
        r.skip_bits(6)?;
        let data = r.read_bytes(r.remaining_bytes())?.to_vec();
        Ok(Self {
            video,
            composition,
            first_in_seq,
            last_in_seq,
            data,
        })
    }
}

/// Interactive composition: the full menu
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractiveComposition {
    pub video: VideoDescriptor,
    pub composition: CompositionDescriptor,
    /// Multiplexed with the main stream (as opposed to preloaded)
    pub stream_model_multiplexed: bool,
    pub ui_model: UiModel,
    /// 90 kHz, multiplexed stream model only
    pub composition_timeout_pts: u64,
    pub selection_timeout_pts: u64,
    /// 90 kHz; 0 = no timeout
    pub user_timeout_duration: u32,
    pub pages: Vec<Page>,
}

impl InteractiveComposition {
    /// Parse a composition carried in a single segment
    pub fn parse(body: &[u8]) -> ParseResult<Self> {
        Self::from_fragments(&[IcsFragment::parse(body)?])
    }

    /// Join the body slices of a complete fragment sequence and parse it.
    pub fn from_fragments(fragments: &[IcsFragment]) -> ParseResult<Self> {
        let first = fragments.first().ok_or(ParseError::Invalid {
            what: "empty ics fragment list",
            value: 0,
        })?;
        if !first.first_in_seq {
            return Err(ParseError::Invalid {
                what: "ics sequence without first fragment, composition",
                value: first.composition.number as u32,
            });
        }

        let body: Vec<u8> = fragments.iter().flat_map(|f| f.data.iter().copied()).collect();
        let mut r = BitReader::new(&body);
        let data_len = r.read_bits(24)? as usize;
        if data_len > r.remaining_bytes() {
            return Err(ParseError::Truncated {
                needed: data_len * 8,
                at: r.byte_pos() * 8,
                available: r.remaining_bits(),
            });
        }

        let stream_model = r.read_bits(1)?;
        let ui_model = if r.read_bool()? {
            UiModel::Popup
        } else {
            UiModel::AlwaysOn
        };
        r.skip_bits(6)?;

        // stream model 0 is multiplexed: the timeouts are present
        let stream_model_multiplexed = stream_model == 0;
        let (mut composition_timeout_pts, mut selection_timeout_pts) = (0, 0);
        if stream_model_multiplexed {
            r.skip_bits(7)?;
            composition_timeout_pts = r.read_bits64(33)?;
            r.skip_bits(7)?;
            selection_timeout_pts = r.read_bits64(33)?;
        }
        let user_timeout_duration = r.read_bits(24)?;

        let num_pages = r.read_u8()?;
        let pages = (0..num_pages)
            .map(|_| Page::parse(&mut r))
            .collect::<ParseResult<Vec<_>>>()?;

        Ok(Self {
            video: first.video,
            composition: first.composition,
            stream_model_multiplexed,
            ui_model,
            composition_timeout_pts,
            selection_timeout_pts,
            user_timeout_duration,
            pages,
        })
    }

    pub fn page(&self, id: u8) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == id)
    }

    pub fn is_popup(&self) -> bool {
        self.ui_model == UiModel::Popup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ButtonSpec, IcsBuilder};

    fn sample_menu() -> Vec<u8> {
        IcsBuilder::new(true)
            .page(
                0,
                UoMask::MENU_CALL,
                1,
                vec![
                    vec![
                        ButtonSpec::new(1)
                            .neighbors(1, 2, 1, 2)
                            .numeric(1)
                            .cmds(&[NavCommand::new(0x2181_0000, 0, 1)]),
                        ButtonSpec::new(2).neighbors(1, 2, 1, 2).auto_action(),
                    ],
                    vec![ButtonSpec::new(3)],
                ],
            )
            .page(1, 0, 0xFFFF, vec![])
            .build_segment_body()
    }

    #[test]
    fn parses_pages_bogs_and_buttons() {
        let ics = InteractiveComposition::parse(&sample_menu()).expect("ics");
        assert!(ics.is_popup());
        assert!(!ics.stream_model_multiplexed);
        assert_eq!(ics.pages.len(), 2);

        let page = ics.page(0).unwrap();
        assert!(page.uo_mask.menu_call());
        assert_eq!(page.default_selected_button_id_ref, 1);
        assert_eq!(page.bogs.len(), 2);
        assert_eq!(page.buttons().count(), 3);

        let b1 = page.button(1).unwrap();
        assert_eq!(b1.neighbors.lower, 2);
        assert_eq!(b1.numeric_select_value, 1);
        assert_eq!(b1.nav_cmds, vec![NavCommand::new(0x2181_0000, 0, 1)]);
        assert!(page.button(2).unwrap().auto_action);
        assert_eq!(page.bog_of(3), Some(1));
        assert!(ics.page(1).unwrap().bogs.is_empty());
    }

    #[test]
    fn joins_fragmented_composition() {
        let body = sample_menu();
        // descriptors are the first 9 bytes; split the remainder in two
        let (head, rest) = body.split_at(9);
        let mid = rest.len() / 2;
        let mut first = head.to_vec();
        first[8] = 0x80;
        first.extend_from_slice(&rest[..mid]);
        let mut second = head.to_vec();
        second[8] = 0x40;
        second.extend_from_slice(&rest[mid..]);

        let frags = vec![
            IcsFragment::parse(&first).unwrap(),
            IcsFragment::parse(&second).unwrap(),
        ];
        let joined = InteractiveComposition::from_fragments(&frags).expect("joined ics");
        assert_eq!(joined, InteractiveComposition::parse(&body).unwrap());
    }

    #[test]
    fn rejects_declared_length_past_body() {
        let mut body = sample_menu();
        // body length field follows the 9 descriptor bytes
        body[9] = 0x7F;
        assert!(matches!(
            InteractiveComposition::parse(&body),
            Err(ParseError::Truncated { .. })
        ));
    }
}
