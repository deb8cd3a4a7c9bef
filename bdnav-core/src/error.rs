//! Navigation errors

use thiserror::Error;

use crate::bdj::BridgeError;
use crate::bdparse::ParseError;
use crate::config::ConfigError;
use crate::hdmv::VmError;
use crate::register::RegisterError;

#[derive(Debug, Error)]
pub enum NavError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: ParseError,
    },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a Blu-ray disc: {0}")]
    NotBluray(String),

    #[error("Invalid title number: {0}")]
    InvalidTitle(u32),

    #[error("Invalid playlist: {0:05}")]
    InvalidPlaylist(u32),

    #[error("Invalid angle: {0}")]
    InvalidAngle(u32),

    #[error("Invalid chapter: {0}")]
    InvalidChapter(u32),

    #[error("Invalid mark: {0}")]
    InvalidMark(u32),

    #[error("Invalid play item: {0}")]
    InvalidPlayItem(u32),

    #[error("No title is open")]
    NoTitle,

    #[error("Stream is encrypted")]
    Encrypted,

    #[error("VM error: {0}")]
    Vm(#[from] VmError),

    #[error("Managed runtime error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("User operation not permitted: {0}")]
    UserOperationMasked(&'static str),

    #[error("Clip {clip} too large to preload: {size} bytes (limit {limit})")]
    PreloadTooLarge { clip: String, size: u64, limit: u64 },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Register error: {0}")]
    Register(#[from] RegisterError),
}

pub type NavResult<T> = Result<T, NavError>;

impl NavError {
    pub fn parse(file: impl Into<String>, source: ParseError) -> Self {
        NavError::Parse {
            file: file.into(),
            source,
        }
    }

    /// Fatal for the current title (as opposed to a rejected request)
    pub fn is_fatal(&self) -> bool {
        matches!(self, NavError::Encrypted | NavError::Vm(_) | NavError::Io(_))
    }
}
