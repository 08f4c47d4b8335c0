//! In-memory HFS volume tree.
//!
//! A [`Volume`] is loaded from an image by [`super::hfs::read_volume`],
//! mutated freely, and serialized again by [`super::hfs_write::write_volume`].
//! Nodes carry the catalog metadata they were loaded with so that untouched
//! template content is written back the way it was found.

use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use super::macroman::{sort_key, utf8_to_mac_roman};

/// Root directory CNID on every HFS volume.
pub const ROOT_CNID: u32 = 2;
/// First CNID available to user files and folders.
pub const FIRST_USER_CNID: u32 = 16;
/// Maximum length of a volume name in bytes.
pub const MAX_VOLUME_NAME: usize = 27;
/// Maximum length of a file or folder name in bytes.
pub const MAX_NAME: usize = 31;

/// Seconds between the Mac epoch (1904-01-01) and the Unix epoch.
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Current time as a Mac timestamp.
pub fn mac_now() -> u32 {
    (chrono::Utc::now().timestamp() + MAC_EPOCH_OFFSET) as u32
}

/// A name as stored in a folder: keeps the display form, compares like HFS.
#[derive(Debug, Clone)]
pub struct CatalogName {
    display: String,
    key: Vec<u8>,
}

impl CatalogName {
    pub fn new(name: &str) -> Self {
        CatalogName {
            display: name.to_string(),
            key: sort_key(&utf8_to_mac_roman(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Mac Roman bytes as written to the catalog.
    pub fn encoded(&self) -> Vec<u8> {
        utf8_to_mac_roman(&self.display)
    }
}

impl PartialEq for CatalogName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CatalogName {}

impl PartialOrd for CatalogName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CatalogName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl From<&str> for CatalogName {
    fn from(s: &str) -> Self {
        CatalogName::new(s)
    }
}

impl fmt::Display for CatalogName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Four-character Mac OS type or creator code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const TEXT: FourCC = FourCC(*b"TEXT");

    /// Parse a code from 1-4 Mac Roman characters, padding with spaces.
    pub fn parse(s: &str) -> Option<Self> {
        let count = s.chars().count();
        if count == 0 || count > 4 {
            return None;
        }
        let mut code = [b' '; 4];
        for (i, c) in s.chars().enumerate() {
            code[i] = super::macroman::encode_char(c)?;
        }
        Some(FourCC(code))
    }
}

impl fmt::Display for FourCC {
    /// Non-printable bytes are shown as '.'.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Catalog metadata shared by files and folders.
#[derive(Debug, Clone, Default)]
pub struct CatalogInfo {
    /// CNID from the source image; `None` for nodes created in memory.
    pub cnid: Option<u32>,
    pub create_date: u32,
    pub modify_date: u32,
    pub backup_date: u32,
    /// FInfo / DInfo.
    pub finder_info: [u8; 16],
    /// FXInfo / DXInfo.
    pub ext_finder_info: [u8; 16],
    pub flags: u16,
}

impl CatalogInfo {
    /// Metadata for a node created during this run.
    pub fn fresh() -> Self {
        let now = mac_now();
        CatalogInfo {
            create_date: now,
            modify_date: now,
            ..Default::default()
        }
    }
}

/// A file with its two forks.
#[derive(Debug, Clone)]
pub struct File {
    pub data: Vec<u8>,
    pub rsrc: Vec<u8>,
    pub type_code: FourCC,
    pub creator: FourCC,
    pub info: CatalogInfo,
}

impl File {
    pub fn new(data: Vec<u8>, type_code: FourCC, creator: FourCC) -> Self {
        File {
            data,
            rsrc: Vec::new(),
            type_code,
            creator,
            info: CatalogInfo::fresh(),
        }
    }
}

/// A folder owning its children, keyed by HFS-compared name.
#[derive(Debug, Clone)]
pub struct Folder {
    children: BTreeMap<CatalogName, Node>,
    pub info: CatalogInfo,
}

impl Default for Folder {
    fn default() -> Self {
        Folder::new()
    }
}

impl Folder {
    pub fn new() -> Self {
        Folder {
            children: BTreeMap::new(),
            info: CatalogInfo::fresh(),
        }
    }

    pub(crate) fn with_info(info: CatalogInfo) -> Self {
        Folder {
            children: BTreeMap::new(),
            info,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.children.get(&CatalogName::new(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.get_mut(&CatalogName::new(name))
    }

    /// Insert `node` under `name`, returning whatever it replaced.
    ///
    /// A case-insensitive match replaces the old entry and its spelling.
    pub fn insert(&mut self, name: &str, node: Node) -> Option<Node> {
        let key = CatalogName::new(name);
        let old = self.children.remove(&key);
        self.children.insert(key, node);
        old
    }

    pub fn remove(&mut self, name: &str) -> Option<Node> {
        self.children.remove(&CatalogName::new(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(&CatalogName::new(name))
    }

    /// Children in catalog order.
    pub fn iter(&self) -> btree_map::Iter<'_, CatalogName, Node> {
        self.children.iter()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Files in this folder and all subfolders.
    pub fn file_count(&self) -> usize {
        self.children
            .values()
            .map(|n| match n {
                Node::File(_) => 1,
                Node::Folder(f) => f.file_count(),
            })
            .sum()
    }

    /// Subfolders of this folder, recursively.
    pub fn folder_count(&self) -> usize {
        self.children
            .values()
            .map(|n| match n {
                Node::File(_) => 0,
                Node::Folder(f) => 1 + f.folder_count(),
            })
            .sum()
    }
}

/// A catalog node: either a folder or a file.
#[derive(Debug, Clone)]
pub enum Node {
    Folder(Folder),
    File(File),
}

impl Node {
    pub fn is_folder(&self) -> bool {
        matches!(self, Node::Folder(_))
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Node::Folder(f) => Some(f),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Node::File(f) => Some(f),
            Node::Folder(_) => None,
        }
    }

    pub(crate) fn info(&self) -> &CatalogInfo {
        match self {
            Node::Folder(f) => &f.info,
            Node::File(f) => &f.info,
        }
    }
}

impl From<Folder> for Node {
    fn from(f: Folder) -> Self {
        Node::Folder(f)
    }
}

impl From<File> for Node {
    fn from(f: File) -> Self {
        Node::File(f)
    }
}

/// An entire single-partition HFS volume held in memory.
#[derive(Debug, Clone)]
pub struct Volume {
    pub name: String,
    pub root: Folder,
    /// Sectors 0-1 of the image.
    pub boot_blocks: Vec<u8>,
    pub create_date: u32,
    pub backup_date: u32,
    pub write_count: u32,
    /// Volume Finder info; word 0 is the blessed System Folder CNID.
    pub finder_info: [u8; 32],
    /// Lowest CNID that may be handed to a new node.
    pub next_cnid: u32,
}

impl Volume {
    /// An empty volume with no boot blocks.
    pub fn new(name: &str) -> Self {
        let mut root = Folder::new();
        root.info.cnid = Some(ROOT_CNID);
        Volume {
            name: name.to_string(),
            root,
            boot_blocks: vec![0u8; 1024],
            create_date: mac_now(),
            backup_date: 0,
            write_count: 0,
            finder_info: [0u8; 32],
            next_cnid: FIRST_USER_CNID,
        }
    }
}
