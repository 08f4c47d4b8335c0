use std::io;
use std::path::{Component, Path};

use log::{debug, info, warn};
use walkdir::WalkDir;

use super::name::normalize;
use super::resolve::ensure_folder;
use crate::error::InjectError;
use crate::fs::volume::{File, Folder, FourCC, Node};

/// Settings for a mirror run.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Longest name written to the volume.
    pub max_name_len: usize,
    /// Type code stamped on every copied file.
    pub type_code: FourCC,
    /// Creator code stamped on every copied file.
    pub creator: FourCC,
}

/// Join `target` and the components of a path relative to the source root.
fn volume_path(target: &[String], rel: &Path) -> Vec<String> {
    target
        .iter()
        .cloned()
        .chain(rel.components().filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        }))
        .collect()
}

/// Copy every file under `source` into `root` below `target`.
///
/// Host directories become folders (empty ones included) and host files
/// become data-fork-only files tagged with the configured type and creator.
/// A file whose normalized name matches an existing entry replaces it.
///
/// Returns the number of files placed. Any unreadable entry aborts the run.
pub fn mirror(
    root: &mut Folder,
    target: &[String],
    source: &Path,
    opts: &MirrorOptions,
) -> Result<usize, InjectError> {
    mirror_with(root, target, source, opts, |path| std::fs::read(path))
}

/// [`mirror`] with the host file reader supplied by the caller.
pub(crate) fn mirror_with<F>(
    root: &mut Folder,
    target: &[String],
    source: &Path,
    opts: &MirrorOptions,
    mut read: F,
) -> Result<usize, InjectError>
where
    F: FnMut(&Path) -> io::Result<Vec<u8>>,
{
    ensure_folder(root, target, opts.max_name_len)?;

    let mut count = 0usize;
    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };

        if entry.file_type().is_dir() {
            ensure_folder(root, &volume_path(target, rel), opts.max_name_len)?;
            continue;
        }
        if !entry.file_type().is_file() {
            debug!("skipping special file {}", entry.path().display());
            continue;
        }

        let parent = volume_path(target, rel.parent().unwrap_or(Path::new("")));
        let folder = ensure_folder(root, &parent, opts.max_name_len)?;

        let data = read(entry.path()).map_err(|source| InjectError::ReadHost {
            path: entry.path().to_path_buf(),
            source,
        })?;
        let name = normalize(&entry.file_name().to_string_lossy(), opts.max_name_len);
        debug!(
            "{} -> {}:{name} ({} bytes)",
            rel.display(),
            parent.join(":"),
            data.len()
        );

        let file = File::new(data, opts.type_code, opts.creator);
        match folder.insert(&name, Node::File(file)) {
            Some(Node::Folder(_)) => warn!(
                "{} replaced folder '{name}' in {}",
                rel.display(),
                parent.join("/")
            ),
            Some(Node::File(_)) => warn!(
                "{} replaced existing file '{name}' in {}",
                rel.display(),
                parent.join("/")
            ),
            None => {}
        }
        count += 1;
    }

    info!(
        "mirrored {count} file(s) from {} into '{}'",
        source.display(),
        target.join("/")
    );
    Ok(count)
}
