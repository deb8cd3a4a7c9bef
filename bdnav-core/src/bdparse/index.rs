//! `index.bdmv` parser - the disc's title table.

use serde::Serialize;

use super::{read_header, section_offset, BitReader, ParseError, ParseResult};

const OBJECT_TYPE_HDMV: u32 = 1;
const OBJECT_TYPE_BDJ: u32 = 2;

/// Title may not be selected by the user
pub const ACCESS_PROHIBITED: u8 = 0x01;
/// Title is not shown in title lists
pub const ACCESS_HIDDEN: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HdmvPlaybackType {
    Movie,
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BdjPlaybackType {
    Movie,
    Interactive,
}

/// What a title (or first play / top menu) starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IndexObject {
    /// Interpreted movie object, by id
    Hdmv {
        playback_type: HdmvPlaybackType,
        id_ref: u16,
    },
    /// Managed-runtime object, by 5-character name
    Bdj {
        playback_type: BdjPlaybackType,
        name: String,
    },
}

impl IndexObject {
    pub fn is_hdmv(&self) -> bool {
        matches!(self, IndexObject::Hdmv { .. })
    }

    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            IndexObject::Hdmv {
                playback_type: HdmvPlaybackType::Interactive,
                ..
            } | IndexObject::Bdj {
                playback_type: BdjPlaybackType::Interactive,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexTitle {
    pub object: IndexObject,
    pub access_type: u8,
}

impl IndexTitle {
    pub fn is_hidden(&self) -> bool {
        self.access_type & ACCESS_HIDDEN != 0
    }

    pub fn is_accessible(&self) -> bool {
        self.access_type & ACCESS_PROHIBITED == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppInfo {
    pub initial_output_mode_preference: u8,
    pub content_exist_3d: bool,
    pub initial_dynamic_range_type: u8,
    pub video_format: u8,
    pub frame_rate: u8,
    #[serde(skip)]
    pub user_data: Vec<u8>,
}

/// Parsed `index.bdmv`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexFile {
    pub version: String,
    pub app_info: AppInfo,
    pub first_play: Option<IndexObject>,
    pub top_menu: Option<IndexObject>,
    pub titles: Vec<IndexTitle>,
}

impl IndexFile {
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(data);
        let version = read_header(&mut r, "INDX")?;
        let indexes_start = r.read_u32()?;
        let _extension_start = r.read_u32()?;

        r.seek_byte(40)?;
        let app_info = parse_app_info(&mut r)?;

        let indexes_start = section_offset(&r, indexes_start)?;
        r.seek_byte(indexes_start)?;
        let _index_len = r.read_u32()?;

        let first_play = parse_header_object(&mut r)?;
        let top_menu = parse_header_object(&mut r)?;

        let num_titles = r.read_u16()? as usize;
        // Each title entry is 12 bytes; don't pre-allocate more than the buffer holds
        let mut titles = Vec::with_capacity(num_titles.min(r.remaining_bytes() / 12));
        for i in 0..num_titles {
            let object_type = r.read_bits(2)?;
            let access_type = r.read_bits(2)? as u8;
            r.skip_bits(28)?;
            let object = parse_object(&mut r, object_type)?.ok_or(ParseError::Invalid {
                what: "title object type",
                value: object_type,
            })?;
            tracing::trace!("index title {}: {:?}", i + 1, object);
            titles.push(IndexTitle {
                object,
                access_type,
            });
        }

        Ok(Self {
            version,
            app_info,
            first_play,
            top_menu,
            titles,
        })
    }

    /// Title by 1-based title number
    pub fn title(&self, number: u32) -> Option<&IndexTitle> {
        let idx = number.checked_sub(1)? as usize;
        self.titles.get(idx)
    }
}

fn parse_app_info(r: &mut BitReader<'_>) -> ParseResult<AppInfo> {
    let len = r.read_u32()? as usize;
    let start = r.byte_pos();
    let mut info = AppInfo::default();

    if len >= 2 {
        r.skip_bits(1)?;
        info.initial_output_mode_preference = r.read_bits(1)? as u8;
        info.content_exist_3d = r.read_bool()?;
        r.skip_bits(1)?;
        info.initial_dynamic_range_type = r.read_bits(4)? as u8;
        info.video_format = r.read_bits(4)? as u8;
        info.frame_rate = r.read_bits(4)? as u8;
        let user = (len - 2).min(32).min(r.remaining_bytes());
        info.user_data = r.read_bytes(user)?.to_vec();
    }

    r.seek_byte(start + len.min(r.len() - start))?;
    Ok(info)
}

fn parse_header_object(r: &mut BitReader<'_>) -> ParseResult<Option<IndexObject>> {
    let object_type = r.read_bits(2)?;
    r.skip_bits(30)?;
    parse_object(r, object_type)
}

/// 8-byte object reference; unknown object types yield `None` after skipping the entry.
fn parse_object(r: &mut BitReader<'_>, object_type: u32) -> ParseResult<Option<IndexObject>> {
    match object_type {
        OBJECT_TYPE_HDMV => {
            let playback_type = match r.read_bits(2)? {
                0 => HdmvPlaybackType::Movie,
                _ => HdmvPlaybackType::Interactive,
            };
            r.skip_bits(14)?;
            let id_ref = r.read_u16()?;
            r.skip_bits(32)?;
            Ok(Some(IndexObject::Hdmv {
                playback_type,
                id_ref,
            }))
        }
        OBJECT_TYPE_BDJ => {
            let playback_type = match r.read_bits(2)? {
                2 => BdjPlaybackType::Movie,
                _ => BdjPlaybackType::Interactive,
            };
            r.skip_bits(14)?;
            let name = r.read_code(5)?;
            r.skip_bits(8)?;
            Ok(Some(IndexObject::Bdj {
                playback_type,
                name,
            }))
        }
        _ => {
            r.skip_bytes(8)?;
            Ok(None)
        }
    }
}
