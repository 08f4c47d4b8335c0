use std::io::Write;
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;

use crate::error::InjectError;

/// Write `image` to `path` atomically.
///
/// The bytes go to a temporary file beside the destination, which is renamed
/// into place only once fully written and synced. On error the destination
/// is left as it was.
pub fn write_image(path: &Path, image: &[u8]) -> Result<(), InjectError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(image)?;
    tmp.as_file().sync_all()?;
    debug!("persisting {} bytes to {}", image.len(), path.display());
    tmp.persist(path).map_err(|e| InjectError::Io(e.error))?;
    Ok(())
}
