//! Player configuration
//!
//! Player-setting registers (region, languages, parental level, capabilities)
//! plus the limits used by the VM dispatch loop and the demultiplexer.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::register::{self, RegisterBank};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

pub const REGION_A: u32 = 1;
pub const REGION_B: u32 = 2;
pub const REGION_C: u32 = 4;

pub const PROFILE_2_V2_0: u32 = (0x03 << 16) | 0x0200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// PSR20 region bit (A=1, B=2, C=4)
    pub region: u32,
    /// PSR13, 0-21 years, 255 = no restriction
    pub parental_age: u32,
    /// ISO 639-2 codes
    pub audio_lang: String,
    pub pg_lang: String,
    pub menu_lang: String,
    /// ISO 3166-1 alpha-2
    pub country: String,
    /// PSR31
    pub player_profile: u32,
    /// PSR15
    pub audio_cap: u32,
    /// PSR29
    pub video_cap: u32,
    /// PSR21
    pub output_mode_pref: u32,
    /// PSR23
    pub display_cap: u32,

    /// Playlists shorter than this are left out of the title list
    pub min_title_seconds: u32,
    /// Instructions per VM run before it yields with an error
    pub vm_instruction_limit: usize,
    /// VM <-> graphics exchanges without progress before live-lock is assumed
    pub livelock_iterations: u32,
    /// Consecutive encrypted units tolerated before playback stops
    pub encrypted_unit_threshold: u32,
    /// Largest sub-path clip that is preloaded into memory
    pub preload_ceiling: u64,
    /// Closing a playlist with at least this many unread packets is a stop
    pub stop_threshold_packets: u32,
    /// Start managed-runtime titles through the bridge
    pub bdj_enabled: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            region: REGION_B,
            parental_age: 0xff,
            audio_lang: "eng".to_string(),
            pg_lang: "eng".to_string(),
            menu_lang: "eng".to_string(),
            country: "us".to_string(),
            player_profile: PROFILE_2_V2_0,
            audio_cap: 0xffff,
            video_cap: 0x03,
            output_mode_pref: 0,
            display_cap: 0,

            min_title_seconds: 0,
            vm_instruction_limit: 100_000,
            livelock_iterations: 100,
            encrypted_unit_threshold: 10,
            preload_ceiling: 512 * 1024 * 1024,
            stop_threshold_packets: 100,
            bdj_enabled: false,
        }
    }
}

impl PlayerConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: PlayerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!("Loaded player config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("audio_lang", &self.audio_lang),
            ("pg_lang", &self.pg_lang),
            ("menu_lang", &self.menu_lang),
        ] {
            if value.len() != 3 || !value.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(ConfigError::Invalid {
                    field,
                    value: value.clone(),
                });
            }
        }
        if self.country.len() != 2 || !self.country.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid {
                field: "country",
                value: self.country.clone(),
            });
        }
        if self.livelock_iterations == 0 || self.vm_instruction_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "vm limits",
                value: format!("{}/{}", self.vm_instruction_limit, self.livelock_iterations),
            });
        }
        Ok(())
    }

    /// Store the player settings in their registers.
    pub fn apply(&self, regs: &mut RegisterBank) {
        let settings = [
            (register::PSR_PARENTAL, self.parental_age),
            (register::PSR_AUDIO_CAP, self.audio_cap),
            (register::PSR_AUDIO_LANG, lang_code(&self.audio_lang)),
            (register::PSR_PG_AND_SUB_LANG, lang_code(&self.pg_lang)),
            (register::PSR_MENU_LANG, lang_code(&self.menu_lang)),
            (register::PSR_COUNTRY, country_code(&self.country)),
            (register::PSR_REGION, self.region),
            (register::PSR_OUTPUT_PREFER, self.output_mode_pref),
            (register::PSR_DISPLAY_CAP, self.display_cap),
            (register::PSR_VIDEO_CAP, self.video_cap),
            (register::PSR_PROFILE_VERSION, self.player_profile),
        ];
        for (psr, value) in settings {
            if let Err(e) = regs.write_setting(psr, value) {
                tracing::warn!("Failed to apply setting PSR{}: {}", psr, e);
            }
        }
    }
}

/// 3-letter language code packed as in PSR16-18
pub fn lang_code(lang: &str) -> u32 {
    lang.bytes()
        .take(3)
        .fold(0u32, |acc, b| (acc << 8) | b.to_ascii_lowercase() as u32)
}

/// 2-letter country code packed as in PSR19
pub fn country_code(country: &str) -> u32 {
    country
        .bytes()
        .take(2)
        .fold(0u32, |acc, b| (acc << 8) | b.to_ascii_lowercase() as u32)
}
