//! Player register bank
//!
//! 128 player status registers (PSRs) with write / change / restore
//! notifications, plus 4096 general purpose registers (GPRs) used by
//! navigation programs. Listeners are called synchronously, in subscription
//! order, after the new value is stored.

use once_cell::sync::Lazy;
use serde::Serialize;
use thiserror::Error;

pub const PSR_COUNT: usize = 128;
pub const GPR_COUNT: usize = 4096;

// ============================================================================
// Register numbers
// ============================================================================

pub const PSR_IG_STREAM_ID: u32 = 0;
pub const PSR_PRIMARY_AUDIO_ID: u32 = 1;
pub const PSR_PG_STREAM: u32 = 2;
pub const PSR_ANGLE_NUMBER: u32 = 3;
pub const PSR_TITLE_NUMBER: u32 = 4;
pub const PSR_CHAPTER: u32 = 5;
pub const PSR_PLAYLIST: u32 = 6;
pub const PSR_PLAYITEM: u32 = 7;
pub const PSR_TIME: u32 = 8;
pub const PSR_NAV_TIMER: u32 = 9;
pub const PSR_SELECTED_BUTTON_ID: u32 = 10;
pub const PSR_MENU_PAGE_ID: u32 = 11;
pub const PSR_STYLE: u32 = 12;
pub const PSR_PARENTAL: u32 = 13;
pub const PSR_SECONDARY_AUDIO_VIDEO: u32 = 14;
pub const PSR_AUDIO_CAP: u32 = 15;
pub const PSR_AUDIO_LANG: u32 = 16;
pub const PSR_PG_AND_SUB_LANG: u32 = 17;
pub const PSR_MENU_LANG: u32 = 18;
pub const PSR_COUNTRY: u32 = 19;
pub const PSR_REGION: u32 = 20;
pub const PSR_OUTPUT_PREFER: u32 = 21;
pub const PSR_3D_STATUS: u32 = 22;
pub const PSR_DISPLAY_CAP: u32 = 23;
pub const PSR_3D_CAP: u32 = 24;
pub const PSR_VIDEO_CAP: u32 = 29;
pub const PSR_TEXT_CAP: u32 = 30;
pub const PSR_PROFILE_VERSION: u32 = 31;
pub const PSR_BACKUP_PSR4: u32 = 36;
pub const PSR_BACKUP_PSR12: u32 = 44;

/// PG stream register: display flag
pub const PG_DISPLAY_FLAG: u32 = 0x8000_0000;
/// PG stream register: primary PG stream number
pub const PG_STREAM_MASK: u32 = 0x0000_0fff;

/// Registers replayed on restore, in this order
pub const RESTORE_ORDER: [u32; 9] = [
    PSR_ANGLE_NUMBER,
    PSR_TITLE_NUMBER,
    PSR_CHAPTER,
    PSR_PLAYLIST,
    PSR_PLAYITEM,
    PSR_TIME,
    PSR_SELECTED_BUTTON_ID,
    PSR_MENU_PAGE_ID,
    PSR_STYLE,
];

static DEFAULT_PSRS: Lazy<[u32; PSR_COUNT]> = Lazy::new(default_psrs);

fn default_psrs() -> [u32; PSR_COUNT] {
    let mut psr = [0u32; PSR_COUNT];
    psr[0] = 1;
    psr[1] = 0xff;
    psr[2] = 0x0fff_0fff;
    psr[3] = 1;
    psr[4] = 0xffff;
    psr[5] = 0xffff;
    psr[10] = 0xffff;
    psr[12] = 0xff;
    psr[13] = 0xff;
    psr[14] = 0xffff;
    psr[15] = 0xffff;
    psr[16] = 0xff_ffff;
    psr[17] = 0xff_ffff;
    psr[18] = 0xff_ffff;
    psr[19] = 0xffff;
    psr[20] = crate::config::REGION_B;
    psr[29] = 0x03;
    psr[30] = 0x1_ffff;
    psr[31] = crate::config::PROFILE_2_V2_0;
    psr[36] = 0xffff;
    psr[37] = 0xffff;
    psr[42] = 0xffff;
    psr[44] = 0xff;
    for v in &mut psr[48..=61] {
        *v = 0xffff_ffff;
    }
    psr
}

/// Player settings: only changed through `write_setting`
fn is_player_setting(psr: u32) -> bool {
    matches!(psr, 13 | 15..=21 | 23..=31 | 48..=61)
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PsrEventKind {
    /// Written with the value it already had
    Write,
    /// Written with a different value
    Change,
    /// Replayed after a saved session was restored
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PsrEvent {
    pub kind: PsrEventKind,
    pub psr: u32,
    pub old_val: u32,
    pub new_val: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("PSR{0} out of range")]
    InvalidPsr(u32),

    #[error("GPR{0} out of range")]
    InvalidGpr(u32),

    #[error("PSR{0} is a player setting")]
    ReadOnly(u32),
}

pub type ListenerId = u64;

type Listener = Box<dyn FnMut(&PsrEvent) + Send>;

// ============================================================================
// Register Bank
// ============================================================================

pub struct RegisterBank {
    psr: [u32; PSR_COUNT],
    gpr: Box<[u32; GPR_COUNT]>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: ListenerId,
}

impl std::fmt::Debug for RegisterBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterBank")
            .field("psr", &&self.psr[..32])
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank {
    pub fn new() -> Self {
        Self {
            psr: *DEFAULT_PSRS,
            gpr: Box::new([0; GPR_COUNT]),
            listeners: Vec::new(),
            next_listener: 1,
        }
    }

    /// Current PSR value; out-of-range registers read as 0
    pub fn read(&self, psr: u32) -> u32 {
        self.psr.get(psr as usize).copied().unwrap_or(0)
    }

    pub fn try_read(&self, psr: u32) -> Result<u32, RegisterError> {
        self.psr
            .get(psr as usize)
            .copied()
            .ok_or(RegisterError::InvalidPsr(psr))
    }

    /// Playback-state write. Player settings are rejected.
    pub fn write(&mut self, psr: u32, value: u32) -> Result<(), RegisterError> {
        self.check_psr(psr)?;
        if is_player_setting(psr) {
            tracing::warn!("write to read-only PSR{} ignored", psr);
            return Err(RegisterError::ReadOnly(psr));
        }
        self.store(psr, value);
        Ok(())
    }

    /// Replace only the bits set in `mask`
    pub fn write_masked(&mut self, psr: u32, value: u32, mask: u32) -> Result<(), RegisterError> {
        let old = self.try_read(psr)?;
        self.write(psr, (old & !mask) | (value & mask))
    }

    /// Configuration path: any PSR, including player settings
    pub fn write_setting(&mut self, psr: u32, value: u32) -> Result<(), RegisterError> {
        self.check_psr(psr)?;
        self.store(psr, value);
        Ok(())
    }

    pub fn gpr(&self, idx: u32) -> Result<u32, RegisterError> {
        self.gpr
            .get(idx as usize)
            .copied()
            .ok_or(RegisterError::InvalidGpr(idx))
    }

    pub fn write_gpr(&mut self, idx: u32, value: u32) -> Result<(), RegisterError> {
        let slot = self
            .gpr
            .get_mut(idx as usize)
            .ok_or(RegisterError::InvalidGpr(idx))?;
        *slot = value;
        Ok(())
    }

    /// Register a listener. It immediately receives `Restore` events for every
    /// register of the restore table that holds a non-default value.
    pub fn subscribe<F>(&mut self, mut listener: F) -> ListenerId
    where
        F: FnMut(&PsrEvent) + Send + 'static,
    {
        let defaults = &*DEFAULT_PSRS;
        for psr in RESTORE_ORDER {
            let value = self.psr[psr as usize];
            if value != defaults[psr as usize] {
                listener(&PsrEvent {
                    kind: PsrEventKind::Restore,
                    psr,
                    old_val: defaults[psr as usize],
                    new_val: value,
                });
            }
        }

        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Back up playback position registers before a menu call
    pub fn save_state(&mut self) {
        self.psr.copy_within(4..9, 36);
        self.psr.copy_within(10..13, 42);
        tracing::debug!(
            "saved playback state: title {} playlist {} time {}",
            self.psr[4],
            self.psr[6],
            self.psr[8]
        );
    }

    /// Restore registers backed up by `save_state`, reset the backups and
    /// replay the restore table to listeners.
    pub fn restore_state(&mut self) {
        let old = self.psr;
        let defaults = &*DEFAULT_PSRS;

        self.psr.copy_within(36..41, 4);
        self.psr.copy_within(42..45, 10);
        self.psr[36..45].copy_from_slice(&defaults[36..45]);

        for psr in RESTORE_ORDER {
            let event = PsrEvent {
                kind: PsrEventKind::Restore,
                psr,
                old_val: old[psr as usize],
                new_val: self.psr[psr as usize],
            };
            self.notify(&event);
        }
    }

    /// Whether a saved session exists (backup title register set)
    pub fn has_saved_state(&self) -> bool {
        self.psr[PSR_BACKUP_PSR4 as usize] != 0xffff
    }

    /// Reset playback registers to power-on defaults, keeping player settings and GPRs
    pub fn reset_playback(&mut self) {
        let defaults = &*DEFAULT_PSRS;
        for psr in 0..PSR_COUNT as u32 {
            if !is_player_setting(psr) {
                self.psr[psr as usize] = defaults[psr as usize];
            }
        }
    }

    pub fn snapshot(&self) -> [u32; PSR_COUNT] {
        self.psr
    }

    fn check_psr(&self, psr: u32) -> Result<(), RegisterError> {
        if (psr as usize) < PSR_COUNT {
            Ok(())
        } else {
            Err(RegisterError::InvalidPsr(psr))
        }
    }

    fn store(&mut self, psr: u32, value: u32) {
        let old_val = self.psr[psr as usize];
        self.psr[psr as usize] = value;
        let kind = if old_val == value {
            PsrEventKind::Write
        } else {
            PsrEventKind::Change
        };
        tracing::trace!("PSR{} 0x{:x} -> 0x{:x}", psr, old_val, value);
        self.notify(&PsrEvent {
            kind,
            psr,
            old_val,
            new_val: value,
        });
    }

    fn notify(&mut self, event: &PsrEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }
}
