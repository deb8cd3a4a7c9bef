//! Disc filesystem access
//!
//! The player reads the disc through `DiscFs`. `DirDisc` serves a BDMV tree
//! from a mounted disc or a backup directory; `MemDisc` keeps every file in
//! memory. Decryption is not done here: a disc whose content is protected
//! and for which no key database is available reports `is_protected`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{NavError, NavResult};

/// Random access stream over one on-disc file
pub trait StreamFile: Read + Seek + Send {
    fn size(&self) -> u64;
}

/// Filesystem collaborator. Paths are relative to the disc root and use `/`.
pub trait DiscFs: Send {
    fn open_file(&self, path: &str) -> NavResult<Box<dyn StreamFile>>;

    /// Read a whole (small) metadata file
    fn read_file(&self, path: &str) -> NavResult<Vec<u8>> {
        let mut file = self.open_file(path)?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// File names in a directory, sorted
    fn list_dir(&self, path: &str) -> NavResult<Vec<String>>;

    fn exists(&self, path: &str) -> bool;

    /// Content is copy-protected and cannot be read without decryption
    fn is_protected(&self) -> bool {
        false
    }
}

pub fn playlist_path(playlist: u32) -> String {
    format!("BDMV/PLAYLIST/{:05}.mpls", playlist)
}

pub fn clip_info_path(clip_id: &str) -> String {
    format!("BDMV/CLIPINF/{}.clpi", clip_id)
}

pub fn stream_path(clip_id: &str) -> String {
    format!("BDMV/STREAM/{}.m2ts", clip_id)
}

pub const INDEX_PATH: &str = "BDMV/index.bdmv";
pub const MOVIE_OBJECT_PATH: &str = "BDMV/MovieObject.bdmv";
pub const PLAYLIST_DIR: &str = "BDMV/PLAYLIST";

// ============================================================================
// Disc Type Detection
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DiscType {
    BluRay,
    /// UHD Blu-ray
    BluRay4K,
    BluRay3D,
    Unknown,
}

pub fn detect_disc_type(root: &Path) -> DiscType {
    let bdmv = root.join("BDMV");
    if !bdmv.join("index.bdmv").exists() {
        return DiscType::Unknown;
    }

    // UHD discs carry the AACS2 directory
    if root.join("AACS").join("DURD.DAT").exists() {
        return DiscType::BluRay4K;
    }

    if bdmv.join("STREAM").join("SSIF").exists() {
        return DiscType::BluRay3D;
    }

    DiscType::BluRay
}

// ============================================================================
// AACS Key Database
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionStatus {
    /// Disc carries an AACS directory
    pub aacs_present: bool,
    /// A KEYDB.cfg was found in one of the usual places
    pub aacs_keys: bool,
    pub bdplus_present: bool,
}

impl DecryptionStatus {
    /// No decryption collaborator can help with this disc
    pub fn unsupported(&self) -> bool {
        (self.aacs_present && !self.aacs_keys) || self.bdplus_present
    }
}

pub fn check_decryption(root: &Path) -> DecryptionStatus {
    let aacs_keys = keydb_paths().iter().any(|p| p.join("KEYDB.cfg").exists());
    DecryptionStatus {
        aacs_present: root.join("AACS").exists(),
        aacs_keys,
        bdplus_present: root.join("BDSVM").exists(),
    }
}

fn keydb_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = dirs::data_dir() {
            paths.push(appdata.join("aacs"));
        }
    }

    if let Some(config) = dirs::config_dir() {
        paths.push(config.join("aacs"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join("aacs"));
    }

    #[cfg(not(target_os = "windows"))]
    paths.push(PathBuf::from("/etc/aacs"));

    paths
}

// ============================================================================
// Directory-backed disc
// ============================================================================

struct DiskFile {
    file: File,
    size: u64,
}

impl Read for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for DiskFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl StreamFile for DiskFile {
    fn size(&self) -> u64 {
        self.size
    }
}

/// BDMV directory tree on a local filesystem
#[derive(Debug, Clone)]
pub struct DirDisc {
    root: PathBuf,
    disc_type: DiscType,
    protected: bool,
}

impl DirDisc {
    pub fn open(root: impl Into<PathBuf>) -> NavResult<Self> {
        let root = root.into();
        let disc_type = detect_disc_type(&root);
        if disc_type == DiscType::Unknown {
            return Err(NavError::NotBluray(root.display().to_string()));
        }
        let decryption = check_decryption(&root);
        if decryption.unsupported() {
            tracing::warn!(
                "{}: content protection present (AACS {}, BD+ {}), no usable keys",
                root.display(),
                decryption.aacs_present,
                decryption.bdplus_present
            );
        }
        tracing::info!("Opened {:?} disc at {}", disc_type, root.display());
        Ok(Self {
            root,
            disc_type,
            protected: decryption.unsupported(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn disc_type(&self) -> DiscType {
        self.disc_type
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !part.is_empty() && *part != "..")
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

impl DiscFs for DirDisc {
    fn open_file(&self, path: &str) -> NavResult<Box<dyn StreamFile>> {
        let full = self.resolve(path);
        let file = File::open(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NavError::NotFound(path.to_string()),
            _ => NavError::Io(e),
        })?;
        let size = file.metadata()?.len();
        Ok(Box::new(DiskFile { file, size }))
    }

    fn read_file(&self, path: &str) -> NavResult<Vec<u8>> {
        std::fs::read(self.resolve(path)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NavError::NotFound(path.to_string()),
            _ => NavError::Io(e),
        })
    }

    fn list_dir(&self, path: &str) -> NavResult<Vec<String>> {
        let dir = self.resolve(path);
        let entries = std::fs::read_dir(&dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NavError::NotFound(path.to_string()),
            _ => NavError::Io(e),
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn is_protected(&self) -> bool {
        self.protected
    }
}

// ============================================================================
// In-memory disc
// ============================================================================

struct MemFile {
    cursor: Cursor<Arc<[u8]>>,
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StreamFile for MemFile {
    fn size(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }
}

/// Disc image held in memory: synthetic discs and tests
#[derive(Debug, Clone, Default)]
pub struct MemDisc {
    files: BTreeMap<String, Arc<[u8]>>,
    protected: bool,
}

impl MemDisc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let data: Vec<u8> = data.into();
        self.files.insert(path.into(), Arc::from(data));
    }

    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data);
        self
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.files.remove(path).is_some()
    }

    pub fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }
}

impl DiscFs for MemDisc {
    fn open_file(&self, path: &str) -> NavResult<Box<dyn StreamFile>> {
        let data = self
            .files
            .get(path)
            .ok_or_else(|| NavError::NotFound(path.to_string()))?;
        Ok(Box::new(MemFile {
            cursor: Cursor::new(data.clone()),
        }))
    }

    fn read_file(&self, path: &str) -> NavResult<Vec<u8>> {
        self.files
            .get(path)
            .map(|d| d.to_vec())
            .ok_or_else(|| NavError::NotFound(path.to_string()))
    }

    fn list_dir(&self, path: &str) -> NavResult<Vec<String>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        // BTreeMap keys are already sorted
        Ok(self
            .files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn is_protected(&self) -> bool {
        self.protected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn detects_bluray_layouts() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_disc_type(dir.path()), DiscType::Unknown);

        fs::create_dir_all(dir.path().join("BDMV/STREAM")).unwrap();
        fs::write(dir.path().join("BDMV/index.bdmv"), b"INDX0200").unwrap();
        assert_eq!(detect_disc_type(dir.path()), DiscType::BluRay);

        fs::create_dir_all(dir.path().join("BDMV/STREAM/SSIF")).unwrap();
        assert_eq!(detect_disc_type(dir.path()), DiscType::BluRay3D);
    }

    #[test]
    fn dir_disc_reads_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("BDMV/PLAYLIST")).unwrap();
        fs::write(dir.path().join("BDMV/index.bdmv"), b"INDX0200").unwrap();
        fs::write(dir.path().join("BDMV/PLAYLIST/00002.mpls"), b"b").unwrap();
        fs::write(dir.path().join("BDMV/PLAYLIST/00001.mpls"), b"a").unwrap();

        let disc = DirDisc::open(dir.path()).unwrap();
        assert_eq!(disc.read_file(INDEX_PATH).unwrap(), b"INDX0200");
        assert_eq!(
            disc.list_dir(PLAYLIST_DIR).unwrap(),
            vec!["00001.mpls".to_string(), "00002.mpls".to_string()]
        );
        assert!(matches!(
            disc.read_file("BDMV/MovieObject.bdmv"),
            Err(NavError::NotFound(_))
        ));
        let file = disc.open_file(&playlist_path(1)).unwrap();
        assert_eq!(file.size(), 1);
    }

    #[test]
    fn dir_disc_rejects_non_bluray() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(DirDisc::open(dir.path()), Err(NavError::NotBluray(_))));
    }

    #[test]
    fn mem_disc_seeks_and_lists_one_level() {
        let disc = MemDisc::new()
            .with_file("BDMV/PLAYLIST/00001.mpls", vec![1, 2, 3, 4])
            .with_file("BDMV/PLAYLIST/sub/x", vec![0])
            .with_file("BDMV/index.bdmv", vec![0]);
        assert_eq!(disc.list_dir(PLAYLIST_DIR).unwrap(), vec!["00001.mpls"]);

        let mut file = disc.open_file(&playlist_path(1)).unwrap();
        file.seek(SeekFrom::Start(2)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);
    }

    #[test]
    fn path_helpers() {
        assert_eq!(playlist_path(7), "BDMV/PLAYLIST/00007.mpls");
        assert_eq!(clip_info_path("00012"), "BDMV/CLIPINF/00012.clpi");
        assert_eq!(stream_path("00012"), "BDMV/STREAM/00012.m2ts");
    }
}
