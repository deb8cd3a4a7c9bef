//! # bdnav
//!
//! Headless Blu-ray navigation front-end: lists titles, dumps disc
//! structure and movie objects, and plays titles through the navigation
//! engine, writing the transport stream to a file.

use anyhow::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bdnav_core::bdparse::mobj::MovieObjects;
use bdnav_core::disc_io::{self, DirDisc, DiscFs};
use bdnav_core::hdmv::disassemble;
use bdnav_core::{BdEvent, Bluray, PlayerConfig, UserKey};

/// Read size: 32 aligned units
const READ_SIZE: usize = 6144 * 32;

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Titles,
    Info { title: Option<usize> },
    Objects,
    Play(PlayOptions),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct PlayOptions {
    /// Index title number; navigation mode
    title: Option<u32>,
    /// Playlist number; direct mode
    playlist: Option<u32>,
    angle: Option<usize>,
    /// 1-based
    chapter: Option<usize>,
    out: Option<PathBuf>,
    /// Stop after this many bytes
    limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    disc: PathBuf,
    config: Option<PathBuf>,
    command: Command,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))
}

fn number<T: std::str::FromStr>(text: &str, flag: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    text.parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid value {} for {}: {}", text, flag, e))
}

fn parse_args(args: &[String]) -> Result<CliOptions> {
    let mut command: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut config: Option<PathBuf> = None;
    let mut play = PlayOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(value(args, i, "--config")?));
                i += 2;
            }
            "--title" | "-t" => {
                play.title = Some(number(value(args, i, "--title")?, "--title")?);
                i += 2;
            }
            "--playlist" | "-p" => {
                play.playlist = Some(number(value(args, i, "--playlist")?, "--playlist")?);
                i += 2;
            }
            "--angle" | "-a" => {
                play.angle = Some(number(value(args, i, "--angle")?, "--angle")?);
                i += 2;
            }
            "--chapter" => {
                play.chapter = Some(number(value(args, i, "--chapter")?, "--chapter")?);
                i += 2;
            }
            "--out" | "-o" => {
                play.out = Some(PathBuf::from(value(args, i, "--out")?));
                i += 2;
            }
            "--limit" => {
                play.limit = Some(number(value(args, i, "--limit")?, "--limit")?);
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => {
                return Err(anyhow::anyhow!("Unknown option {}", arg));
            }
            arg => {
                if command.is_none() {
                    command = Some(arg.to_string());
                } else {
                    positional.push(arg.to_string());
                }
                i += 1;
            }
        }
    }

    let command = command.ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("Missing command")
    })?;
    let disc = positional
        .first()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("Missing disc path"))?;

    let command = match command.as_str() {
        "titles" => Command::Titles,
        "info" => Command::Info {
            title: positional
                .get(1)
                .map(|t| number(t, "title"))
                .transpose()?,
        },
        "objects" => Command::Objects,
        "play" => Command::Play(play),
        other => return Err(anyhow::anyhow!("Unknown command {}", other)),
    };

    Ok(CliOptions {
        disc,
        config,
        command,
    })
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  \
         bdnav titles <disc>\n  \
         bdnav info <disc> [title]\n  \
         bdnav objects <disc>\n  \
         bdnav play <disc> [--title N | --playlist N] [--angle A] [--chapter C] [--out FILE] [--limit BYTES]\n\n\
         Options:\n  \
         --config FILE   player settings (JSON)\n"
    );
}

// ============================================================================
// Commands
// ============================================================================

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn list_titles(bd: &Bluray) -> Result<()> {
    let titles = bd.title_list()?;
    tracing::info!("{} titles", titles.len());
    print_json(&titles)
}

fn show_info(bd: &Bluray, title: Option<usize>) -> Result<()> {
    match title {
        Some(index) => print_json(&bd.title_info(index)?),
        None => print_json(&bd.disc_info()),
    }
}

fn show_objects(disc: &Path) -> Result<()> {
    let disc = DirDisc::open(disc)?;
    let data = disc.read_file(disc_io::MOVIE_OBJECT_PATH)?;
    let objects = MovieObjects::parse(&data)
        .map_err(|e| anyhow::anyhow!("{}: {}", disc_io::MOVIE_OBJECT_PATH, e))?;

    for (i, object) in objects.objects.iter().enumerate() {
        println!(
            "object {} ({} commands){}{}{}",
            i,
            object.cmds.len(),
            if object.resume_intention_flag { " resume" } else { "" },
            if object.menu_call_mask { " no-menu-call" } else { "" },
            if object.title_search_mask { " no-title-search" } else { "" },
        );
        for line in disassemble(&object.cmds) {
            println!("  {}", line);
        }
    }
    Ok(())
}

fn play(bd: &Bluray, options: &PlayOptions) -> Result<()> {
    match (options.title, options.playlist) {
        (Some(title), _) => bd.play_title(title)?,
        (None, Some(playlist)) => bd.select_playlist(playlist)?,
        (None, None) => bd.play()?,
    }
    if let Some(angle) = options.angle {
        bd.select_angle(angle)?;
    }
    if let Some(chapter) = options.chapter {
        bd.seek_chapter(chapter.saturating_sub(1))?;
    }

    let mut out = match &options.out {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };
    let limit = options.limit.unwrap_or(u64::MAX);
    let mut buf = vec![0u8; READ_SIZE];
    let mut total = 0u64;

    while total < limit {
        let result = bd.read(&mut buf)?;
        if result.bytes > 0 {
            total += result.bytes as u64;
            if let Some(out) = out.as_mut() {
                out.write_all(&buf[..result.bytes])?;
            }
        }
        let Some(event) = result.event else {
            continue;
        };
        println!("{}", serde_json::to_string(&event)?);
        match event {
            // no one is watching: take the default button
            BdEvent::Menu(true) => {
                bd.user_input(UserKey::Enter)?;
            }
            BdEvent::StillTime(_) | BdEvent::Still(true) => bd.skip_still()?,
            BdEvent::Idle => break,
            BdEvent::EndOfTitle if options.title.is_none() && options.playlist.is_some() => break,
            ref e if e.is_fatal() => {
                tracing::error!("playback stopped: {:?}", e);
                break;
            }
            _ => {}
        }
    }

    if let Some(out) = out.as_mut() {
        out.flush()?;
    }
    tracing::info!("{} bytes read, position {} / {}", total, bd.tell(), bd.title_size());
    bd.close();
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bdnav=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;

    tracing::info!("bdnav v{}", bdnav_core::VERSION);

    if options.command == Command::Objects {
        return show_objects(&options.disc);
    }

    let config = match &options.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    let bd = Bluray::open_dir(&options.disc, config)?;

    match &options.command {
        Command::Titles => list_titles(&bd),
        Command::Info { title } => show_info(&bd, *title),
        Command::Objects => Ok(()),
        Command::Play(play_options) => play(&bd, play_options),
    }
}
