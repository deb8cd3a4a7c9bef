//! # bdnav Core
//!
//! Blu-ray playback navigation: disc structure parsing, title and playlist
//! navigation, the HDMV command interpreter, menu and subtitle graphics, and
//! a demultiplexer that hands out validated transport stream bytes.

// ============================================================================
// Disc Access & Formats
// ============================================================================
pub mod bdparse;
pub mod disc_io;
pub mod uo_mask;

// ============================================================================
// Navigation
// ============================================================================
pub mod nav;
pub mod register;
pub mod hdmv;
pub mod bdj;

// ============================================================================
// Stream & Graphics
// ============================================================================
pub mod demux;
pub mod graphics;

// ============================================================================
// Player
// ============================================================================
pub mod config;
pub mod error;
pub mod event;
pub mod player;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::PlayerConfig;
pub use disc_io::{DirDisc, DiscFs, MemDisc};
pub use error::{NavError, NavResult};
pub use event::{BdEvent, ErrorKind};
pub use graphics::{Overlay, OverlayCmd, OverlayPlane, UserKey};
pub use player::{Bluray, DiscInfo, ReadResult, TitleInfo, TitleType};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
