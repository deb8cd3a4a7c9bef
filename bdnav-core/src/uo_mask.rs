//! User-operation masks
//!
//! A set bit forbids the operation. Playlists, play items, movie objects and
//! interactive-graphics pages each contribute a mask; the mask the application
//! sees is their union.

use serde::Serialize;

use crate::bdparse::{BitReader, ParseResult};

/// Bit for the n-th field of the on-disc 64-bit mask (field 0 is the MSB).
const fn field(n: u32) -> u64 {
    1 << (63 - n)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct UoMask(pub u64);

impl UoMask {
    pub const MENU_CALL: u64 = field(0);
    pub const TITLE_SEARCH: u64 = field(1);
    pub const CHAPTER_SEARCH: u64 = field(2);
    pub const TIME_SEARCH: u64 = field(3);
    pub const SKIP_TO_NEXT_POINT: u64 = field(4);
    pub const SKIP_TO_PREV_POINT: u64 = field(5);
    pub const PLAY_FIRSTPLAY: u64 = field(6);
    pub const STOP: u64 = field(7);
    pub const PAUSE_ON: u64 = field(8);
    pub const PAUSE_OFF: u64 = field(9);
    pub const STILL_OFF: u64 = field(10);
    pub const FORWARD: u64 = field(11);
    pub const BACKWARD: u64 = field(12);
    pub const RESUME: u64 = field(13);
    pub const MOVE_UP: u64 = field(14);
    pub const MOVE_DOWN: u64 = field(15);
    pub const MOVE_LEFT: u64 = field(16);
    pub const MOVE_RIGHT: u64 = field(17);
    pub const SELECT_BUTTON: u64 = field(18);
    pub const ACTIVATE_BUTTON: u64 = field(19);
    pub const SELECT_AND_ACTIVATE: u64 = field(20);
    pub const PRIMARY_AUDIO_CHANGE: u64 = field(21);
    pub const ANGLE_CHANGE: u64 = field(23);
    pub const POPUP_ON: u64 = field(24);
    pub const POPUP_OFF: u64 = field(25);
    pub const PG_ENABLE_DISABLE: u64 = field(26);
    pub const PG_CHANGE: u64 = field(27);
    pub const SECONDARY_VIDEO_ENABLE_DISABLE: u64 = field(28);
    pub const SECONDARY_VIDEO_CHANGE: u64 = field(29);
    pub const SECONDARY_AUDIO_ENABLE_DISABLE: u64 = field(30);
    pub const SECONDARY_AUDIO_CHANGE: u64 = field(31);
    pub const PIP_PG_CHANGE: u64 = field(33);

    /// Field numbers reported to a managed title when an operation is refused
    pub const MENU_CALL_INDEX: u32 = 0;
    pub const TITLE_SEARCH_INDEX: u32 = 1;

    /// Bits that carry meaning; everything else is reserved
    const DEFINED: u64 = field(0)
        | field(1)
        | field(2)
        | field(3)
        | field(4)
        | field(5)
        | field(6)
        | field(7)
        | field(8)
        | field(9)
        | field(10)
        | field(11)
        | field(12)
        | field(13)
        | field(14)
        | field(15)
        | field(16)
        | field(17)
        | field(18)
        | field(19)
        | field(20)
        | field(21)
        | field(23)
        | field(24)
        | field(25)
        | field(26)
        | field(27)
        | field(28)
        | field(29)
        | field(30)
        | field(31)
        | field(33);

    pub const EMPTY: UoMask = UoMask(0);

    pub fn parse(r: &mut BitReader<'_>) -> ParseResult<Self> {
        Ok(Self(r.read_bits64(64)? & Self::DEFINED))
    }

    pub fn from_flags(menu_call: bool, title_search: bool) -> Self {
        let mut mask = 0;
        if menu_call {
            mask |= Self::MENU_CALL;
        }
        if title_search {
            mask |= Self::TITLE_SEARCH;
        }
        Self(mask)
    }

    pub fn combine(self, other: UoMask) -> UoMask {
        UoMask(self.0 | other.0)
    }

    pub fn is_masked(&self, op: u64) -> bool {
        self.0 & op != 0
    }

    pub fn menu_call(&self) -> bool {
        self.is_masked(Self::MENU_CALL)
    }

    pub fn title_search(&self) -> bool {
        self.is_masked(Self::TITLE_SEARCH)
    }

    pub fn chapter_search(&self) -> bool {
        self.is_masked(Self::CHAPTER_SEARCH)
    }

    pub fn time_search(&self) -> bool {
        self.is_masked(Self::TIME_SEARCH)
    }

    pub fn angle_change(&self) -> bool {
        self.is_masked(Self::ANGLE_CHANGE)
    }

    pub fn popup_on(&self) -> bool {
        self.is_masked(Self::POPUP_ON)
    }

    pub fn popup_off(&self) -> bool {
        self.is_masked(Self::POPUP_OFF)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}
