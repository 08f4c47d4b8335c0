//! Finder desktop file generation.
//!
//! The Finder keeps every application's bundle (signature, `BNDL`, `FREF`
//! and icon resources) and the folder each application lives in inside an
//! invisible `Desktop` resource file at the volume root. A fresh one lets
//! documents bind to their creators on first mount. `Desktop DB` and
//! `Desktop DF` are dropped so the System 7 Finder rebuilds its database
//! instead of trusting a stale one.

use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

use super::filesystem::FilesystemError;
use super::macroman::mac_roman_to_utf8;
use super::resource_fork::{Resource, ResourceFork};
use super::volume::{File, Folder, FourCC, Node};

pub const DESKTOP_FILE: &str = "Desktop";
pub const STALE_DESKTOP_FILES: [&str; 2] = ["Desktop DB", "Desktop DF"];

pub const FINDER_TYPE: FourCC = FourCC(*b"FNDR");
pub const FINDER_CREATOR: FourCC = FourCC(*b"ERIK");
const APPLICATION: FourCC = FourCC(*b"APPL");
const BUNDLE: FourCC = FourCC(*b"BNDL");

/// fdFlags bit 14.
pub const FLAG_INVISIBLE: u16 = 0x4000;
const FIRST_ID: i16 = 128;

/// An application found while laying out the volume.
pub struct DesktopApp<'a> {
    /// CNID of the folder holding the application.
    pub parent: u32,
    /// Mac Roman file name.
    pub name: &'a [u8],
    pub file: &'a File,
}

pub fn is_application(file: &File) -> bool {
    file.type_code == APPLICATION
}

/// A `BNDL` resource: owner signature plus local-to-actual id maps per type.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Bundle {
    signature: FourCC,
    signature_id: i16,
    groups: Vec<(FourCC, Vec<(i16, i16)>)>,
}

impl Bundle {
    fn parse(data: &[u8]) -> Result<Self, FilesystemError> {
        let short = || FilesystemError::Parse("BNDL resource truncated".into());
        let head = data.get(0..8).ok_or_else(short)?;
        let signature = FourCC([head[0], head[1], head[2], head[3]]);
        let signature_id = BigEndian::read_i16(&head[4..6]);
        // Both counts are stored minus one
        let type_count = BigEndian::read_u16(&head[6..8]).wrapping_add(1) as usize;

        let mut at = 8;
        let mut groups = Vec::with_capacity(type_count);
        for _ in 0..type_count {
            let entry = data.get(at..at + 6).ok_or_else(short)?;
            let kind = FourCC([entry[0], entry[1], entry[2], entry[3]]);
            let count = BigEndian::read_u16(&entry[4..6]).wrapping_add(1) as usize;
            at += 6;
            let mut pairs = Vec::with_capacity(count);
            for _ in 0..count {
                let pair = data.get(at..at + 4).ok_or_else(short)?;
                pairs.push((
                    BigEndian::read_i16(&pair[0..2]),
                    BigEndian::read_i16(&pair[2..4]),
                ));
                at += 4;
            }
            groups.push((kind, pairs));
        }
        Ok(Bundle {
            signature,
            signature_id,
            groups,
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.signature.0);
        out.extend_from_slice(&self.signature_id.to_be_bytes());
        out.extend_from_slice(&(self.groups.len() as u16).wrapping_sub(1).to_be_bytes());
        for (kind, pairs) in &self.groups {
            out.extend_from_slice(&kind.0);
            out.extend_from_slice(&(pairs.len() as u16).wrapping_sub(1).to_be_bytes());
            for (local, actual) in pairs {
                out.extend_from_slice(&local.to_be_bytes());
                out.extend_from_slice(&actual.to_be_bytes());
            }
        }
        out
    }
}

/// Hands out desktop resource ids, counting up per type.
#[derive(Default)]
struct IdAllocator(HashMap<FourCC, i16>);

impl IdAllocator {
    fn next(&mut self, kind: FourCC) -> i16 {
        let slot = self.0.entry(kind).or_insert(FIRST_ID);
        let id = *slot;
        *slot = slot.saturating_add(1);
        id
    }
}

/// Copy of `root` ready for desktop regeneration.
///
/// Stale database files are removed and an empty invisible `Desktop` file
/// takes its place at the root; its resource fork is produced by
/// [`build_desktop`] once CNIDs are known. An existing `Desktop` file keeps
/// its catalog metadata.
pub fn prepare_root(root: &Folder) -> Folder {
    let mut root = root.clone();
    for name in STALE_DESKTOP_FILES {
        if root.get(name).is_some_and(|n| !n.is_folder()) {
            root.remove(name);
            debug!("dropped stale '{name}'");
        }
    }

    let mut desktop = match root.remove(DESKTOP_FILE) {
        Some(Node::File(file)) => file,
        Some(folder) => {
            warn!("a folder named '{DESKTOP_FILE}' is in the volume root; no desktop file written");
            root.insert(DESKTOP_FILE, folder);
            return root;
        }
        None => File::new(Vec::new(), FINDER_TYPE, FINDER_CREATOR),
    };
    desktop.type_code = FINDER_TYPE;
    desktop.creator = FINDER_CREATOR;
    desktop.data.clear();
    desktop.rsrc.clear();
    let flags = BigEndian::read_u16(&desktop.info.finder_info[8..10]) | FLAG_INVISIBLE;
    BigEndian::write_u16(&mut desktop.info.finder_info[8..10], flags);
    root.insert(DESKTOP_FILE, desktop.into());
    root
}

/// Build the `Desktop` resource fork for the applications on a volume.
///
/// Every application gets an entry in the `APPL` resource (creator, parent
/// folder id, Pascal name padded to an even length). The first bundle seen
/// for each creator is copied with its resources renumbered.
pub fn build_desktop(apps: &[DesktopApp<'_>]) -> Vec<u8> {
    let mut desktop = ResourceFork::new();
    let mut ids = IdAllocator::default();
    let mut appl = Vec::new();
    let mut bundled: HashSet<FourCC> = HashSet::new();

    for app in apps {
        appl.extend_from_slice(&app.file.creator.0);
        appl.extend_from_slice(&app.parent.to_be_bytes());
        appl.push(app.name.len() as u8);
        appl.extend_from_slice(app.name);
        if appl.len() % 2 != 0 {
            appl.push(0);
        }

        let creator = app.file.creator;
        if bundled.contains(&creator) {
            debug!(
                "{}: bundle for '{creator}' already in desktop file",
                mac_roman_to_utf8(app.name)
            );
            continue;
        }
        match copy_bundle(app.file, &mut desktop, &mut ids) {
            Ok(true) => {
                bundled.insert(creator);
            }
            Ok(false) => {}
            Err(e) => warn!(
                "{}: bundle not copied to desktop file: {e}",
                mac_roman_to_utf8(app.name)
            ),
        }
    }

    if !appl.is_empty() {
        desktop.add(Resource::new(APPLICATION, 0, appl));
    }
    debug!("desktop file: {} resource(s)", desktop.len());
    desktop.to_bytes()
}

/// Copy an application's bundle into `desktop` under fresh ids.
///
/// Returns `false` when the application has no `BNDL`.
fn copy_bundle(
    file: &File,
    desktop: &mut ResourceFork,
    ids: &mut IdAllocator,
) -> Result<bool, FilesystemError> {
    let fork = ResourceFork::parse(&file.rsrc)?;
    let Some(bndl) = fork.of_kind(BUNDLE).next() else {
        return Ok(false);
    };
    let mut bundle = Bundle::parse(&bndl.data)?;

    for (kind, pairs) in &mut bundle.groups {
        let kind = *kind;
        // Mappings to resources the application lacks are dropped
        pairs.retain_mut(|(_, actual)| match fork.get(kind, *actual) {
            Some(res) => {
                let id = ids.next(kind);
                desktop.add(Resource { id, ..res.clone() });
                *actual = id;
                true
            }
            None => false,
        });
    }
    bundle.groups.retain(|(_, pairs)| !pairs.is_empty());

    if let Some(sig) = fork.get(bundle.signature, bundle.signature_id) {
        let id = ids.next(sig.kind);
        desktop.add(Resource { id, ..sig.clone() });
        bundle.signature_id = id;
    }

    let id = ids.next(BUNDLE);
    desktop.add(Resource {
        id,
        data: bundle.to_bytes(),
        ..bndl.clone()
    });
    Ok(true)
}
