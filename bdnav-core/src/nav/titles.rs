// Title list scanning
//
// Builds the list of playable titles from the PLAYLIST directory. Discs carry
// many decoy and helper playlists; the filters drop short ones, exact
// duplicates and clip loops, and the longest survivor is marked as the main
// title.

use std::collections::HashMap;

use serde::Serialize;

use crate::bdparse::mpls::Playlist;
use crate::disc_io::{self, DiscFs};
use crate::error::NavResult;

pub const TITLES_ALL: u8 = 0;
/// Drop playlists that repeat an earlier one
pub const TITLES_FILTER_DUP_TITLE: u8 = 0x01;
/// Drop playlists that play the same clip more than twice
pub const TITLES_FILTER_DUP_CLIP: u8 = 0x02;
pub const TITLES_RELEVANT: u8 = TITLES_FILTER_DUP_TITLE | TITLES_FILTER_DUP_CLIP;

const MAX_CLIP_REPEATS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleListEntry {
    pub playlist_id: u32,
    /// 45 kHz
    pub duration: u64,
    pub clip_ids: Vec<String>,
    pub chapters: usize,
    pub angles: usize,
    pub is_main: bool,
}

fn playlist_id_of(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(".mpls")?;
    if stem.len() != 5 {
        return None;
    }
    stem.parse().ok()
}

fn has_clip_loop(pl: &Playlist) -> bool {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for item in &pl.play_items {
        let Some(clip) = item.clips.first() else {
            continue;
        };
        let count = seen.entry(clip.clip_id.as_str()).or_default();
        *count += 1;
        if *count > MAX_CLIP_REPEATS {
            return true;
        }
    }
    false
}

/// Same clips with the same windows and the same chapter layout
fn same_title(a: &Playlist, b: &Playlist) -> bool {
    a.play_items.len() == b.play_items.len()
        && a.marks.len() == b.marks.len()
        && a.play_items.iter().zip(&b.play_items).all(|(x, y)| {
            x.in_time == y.in_time
                && x.out_time == y.out_time
                && x.clips.first().map(|c| &c.clip_id) == y.clips.first().map(|c| &c.clip_id)
        })
}

/// Scan `BDMV/PLAYLIST`. `flags` is a combination of the `TITLES_*` filters;
/// playlists shorter than `min_seconds` are skipped. Unreadable playlists are
/// logged and skipped.
pub fn scan_titles(disc: &dyn DiscFs, flags: u8, min_seconds: u32) -> NavResult<Vec<TitleListEntry>> {
    let names = disc.list_dir(disc_io::PLAYLIST_DIR)?;
    let min_ticks = min_seconds as u64 * 45_000;

    let mut kept: Vec<(u32, Playlist)> = Vec::new();
    for name in names {
        let Some(id) = playlist_id_of(&name) else {
            continue;
        };
        let data = match disc.read_file(&disc_io::playlist_path(id)) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("{}: {}", name, e);
                continue;
            }
        };
        let pl = match Playlist::parse(&data) {
            Ok(pl) => pl,
            Err(e) => {
                tracing::warn!("{}: {}", name, e);
                continue;
            }
        };

        if pl.play_items.is_empty() || pl.duration() < min_ticks {
            tracing::debug!("{}: too short", name);
            continue;
        }
        if flags & TITLES_FILTER_DUP_CLIP != 0 && has_clip_loop(&pl) {
            tracing::debug!("{}: clip loop", name);
            continue;
        }
        if flags & TITLES_FILTER_DUP_TITLE != 0 && kept.iter().any(|(_, k)| same_title(k, &pl)) {
            tracing::debug!("{}: duplicate", name);
            continue;
        }
        kept.push((id, pl));
    }

    let mut titles: Vec<TitleListEntry> = kept
        .iter()
        .map(|(id, pl)| TitleListEntry {
            playlist_id: *id,
            duration: pl.duration(),
            clip_ids: pl
                .play_items
                .iter()
                .filter_map(|pi| pi.clips.first().map(|c| c.clip_id.clone()))
                .collect(),
            chapters: pl.chapter_marks().count(),
            angles: pl.play_items.iter().map(|pi| pi.angle_count()).max().unwrap_or(1),
            is_main: false,
        })
        .collect();

    // longest wins; the first of equals keeps it
    let mut main: Option<usize> = None;
    for (i, t) in titles.iter().enumerate() {
        if main.map_or(true, |m| t.duration > titles[m].duration) {
            main = Some(i);
        }
    }
    if let Some(m) = main {
        titles[m].is_main = true;
    }

    tracing::info!("{} titles found", titles.len());
    Ok(titles)
}
