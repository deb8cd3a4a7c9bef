//! Player events handed to the application

use serde::Serialize;

use crate::register::{
    PsrEvent, PsrEventKind, PG_DISPLAY_FLAG, PG_STREAM_MASK, PSR_ANGLE_NUMBER, PSR_CHAPTER,
    PSR_IG_STREAM_ID, PSR_PG_STREAM, PSR_PLAYITEM, PSR_PLAYLIST, PSR_PRIMARY_AUDIO_ID,
    PSR_SECONDARY_AUDIO_VIDEO, PSR_TITLE_NUMBER,
};
use crate::uo_mask::UoMask;

/// Origin of a fatal `BdEvent::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Navigation program fault; the title was stopped
    Vm,
    /// Menu logic kept the VM and the graphics controller busy without end
    Livelock,
    /// Managed title could not be started
    ManagedRuntime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "value")]
pub enum BdEvent {
    Error(ErrorKind),
    /// Corrupt units skipped by the last read
    ReadError(u32),
    /// Stream cannot be read without decryption; playback stopped
    Encrypted,

    Title(u32),
    Playlist(u32),
    PlayItem(u32),
    /// 1-based
    Chapter(u32),
    PlayMark(u32),
    Angle(u32),
    EndOfTitle,
    /// Playlist closed before it was played to the end
    PlaylistStop,
    /// Read position jumped (title byte offset)
    Seek(u64),

    AudioStream(u32),
    IgStream(u32),
    PgStream(u32),
    PgDisplay(bool),
    SecondaryAudioStream(u32),
    SecondaryVideoStream(u32),
    SecondaryAudio(bool),
    SecondaryVideo(bool),

    /// Playback paused by a navigation program
    Still(bool),
    /// Still at the end of a play item; seconds, 0 for infinite
    StillTime(u32),
    Menu(bool),
    Popup(bool),
    SoundEffect(u8),
    UoMaskChanged(UoMask),
    /// Nothing to play until the application acts
    Idle,
}

impl BdEvent {
    /// Application events for a register change
    pub fn from_psr_change(ev: &PsrEvent) -> Vec<BdEvent> {
        if ev.kind != PsrEventKind::Change {
            return Vec::new();
        }
        let (old, new) = (ev.old_val, ev.new_val);
        match ev.psr {
            PSR_TITLE_NUMBER => vec![BdEvent::Title(new)],
            PSR_PLAYLIST => vec![BdEvent::Playlist(new)],
            PSR_PLAYITEM => vec![BdEvent::PlayItem(new)],
            PSR_CHAPTER if new != 0xffff => vec![BdEvent::Chapter(new)],
            PSR_ANGLE_NUMBER => vec![BdEvent::Angle(new)],
            PSR_PRIMARY_AUDIO_ID => vec![BdEvent::AudioStream(new)],
            PSR_IG_STREAM_ID => vec![BdEvent::IgStream(new)],
            PSR_PG_STREAM => {
                let mut out = Vec::new();
                if (old ^ new) & PG_STREAM_MASK != 0 {
                    out.push(BdEvent::PgStream(new & PG_STREAM_MASK));
                }
                if (old ^ new) & PG_DISPLAY_FLAG != 0 {
                    out.push(BdEvent::PgDisplay(new & PG_DISPLAY_FLAG != 0));
                }
                out
            }
            PSR_SECONDARY_AUDIO_VIDEO => {
                let mut out = Vec::new();
                let changed = old ^ new;
                if changed & 0xff != 0 {
                    out.push(BdEvent::SecondaryAudioStream(new & 0xff));
                }
                if changed & 0xff00 != 0 {
                    out.push(BdEvent::SecondaryVideoStream((new >> 8) & 0xff));
                }
                if changed & (1 << 30) != 0 {
                    out.push(BdEvent::SecondaryAudio(new & (1 << 30) != 0));
                }
                if changed & (1 << 31) != 0 {
                    out.push(BdEvent::SecondaryVideo(new & (1 << 31) != 0));
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// Fatal for the current title
    pub fn is_fatal(&self) -> bool {
        matches!(self, BdEvent::Error(_) | BdEvent::Encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(psr: u32, old_val: u32, new_val: u32) -> PsrEvent {
        PsrEvent {
            kind: PsrEventKind::Change,
            psr,
            old_val,
            new_val,
        }
    }

    #[test]
    fn pg_register_splits_stream_and_display() {
        let ev = change(PSR_PG_STREAM, 0x0000_0001, 0x8000_0002);
        assert_eq!(
            BdEvent::from_psr_change(&ev),
            vec![BdEvent::PgStream(2), BdEvent::PgDisplay(true)]
        );
    }

    #[test]
    fn plain_writes_and_cleared_chapter_are_silent() {
        let write = PsrEvent {
            kind: PsrEventKind::Write,
            ..change(PSR_PLAYLIST, 1, 1)
        };
        assert!(BdEvent::from_psr_change(&write).is_empty());
        assert!(BdEvent::from_psr_change(&change(PSR_CHAPTER, 2, 0xffff)).is_empty());
        assert_eq!(
            BdEvent::from_psr_change(&change(PSR_CHAPTER, 1, 2)),
            vec![BdEvent::Chapter(2)]
        );
    }

    #[test]
    fn serializes_with_tag() {
        let json = serde_json::to_string(&BdEvent::Chapter(3)).unwrap();
        assert_eq!(json, r#"{"event":"Chapter","value":3}"#);
    }
}
