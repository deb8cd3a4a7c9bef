//! Managed-runtime (BD-J) bridge
//!
//! Titles implemented as Java applications run in an external runtime. The
//! player only starts and stops it and forwards playback state changes; the
//! runtime itself is opaque. Without a runtime such titles are unsupported.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("No managed runtime available")]
    Unavailable,
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Notifications delivered to a running managed title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RuntimeEvent {
    Playlist,
    PlayItem,
    Chapter,
    Mark,
    /// PSR8, 45 kHz
    PtsChanged,
    Angle,
    PrimaryAudio,
    Subtitle,
    SecondaryStream,
    /// Playback rate set by the application; `RATE_NORMAL` or `RATE_PAUSED`
    Rate,
    Key,
    Mouse,
    /// A user operation was refused; the parameter is the mask field index
    UoMasked,
    EndOfPlaylist,
}

/// External runtime. Calls are made with the player lock held and must not
/// call back into the player.
pub trait ManagedRuntime: Send {
    /// Start the application of a title (`name` is the 5-character object id)
    fn start(&mut self, title: u32, name: &str) -> BridgeResult<()>;

    fn stop(&mut self) -> BridgeResult<()>;

    fn deliver(&mut self, event: RuntimeEvent, param: u32) -> BridgeResult<()>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Stand-in when no runtime is installed
#[derive(Debug, Default, Clone, Copy)]
pub struct NoManagedRuntime;

impl ManagedRuntime for NoManagedRuntime {
    fn start(&mut self, _title: u32, name: &str) -> BridgeResult<()> {
        tracing::warn!("managed title {} needs a runtime", name);
        Err(BridgeError::Unavailable)
    }

    fn stop(&mut self) -> BridgeResult<()> {
        Ok(())
    }

    fn deliver(&mut self, _event: RuntimeEvent, _param: u32) -> BridgeResult<()> {
        Err(BridgeError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}
