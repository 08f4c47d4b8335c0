use clap::Parser;
use std::path::PathBuf;

use hfs_inject::fs::volume::MAX_NAME;
use hfs_inject::fs::{FourCC, WriteOptions};
use hfs_inject::inject::MirrorOptions;

pub const DEFAULT_TEMPLATE: &str = "images/Robot Warriors.dsk";
pub const DEFAULT_SOURCE: &str = "robots";
pub const DEFAULT_OUT: &str = "build/robot.dsk";
pub const DEFAULT_TARGET: &str = "Desktop Folder/Robot Warriors/robots";
pub const DEFAULT_IMAGE_SIZE: u64 = 8 * 1024 * 1024;
pub const DEFAULT_ALIGN: u64 = 2048;
/// Separator between target path components.
pub const TARGET_SEPARATOR: char = '/';

#[derive(Parser, Debug)]
#[command(
    name = "hfs-inject",
    version = env!("APP_VERSION"),
    about = "Mirror a directory tree into a classic HFS disk image",
    long_about = "Load a template HFS image, copy a host directory tree under a target folder, and write a new bootable image"
)]
pub struct Args {
    /// Path to the template HFS disk image
    #[arg(long, default_value = DEFAULT_TEMPLATE)]
    pub template: PathBuf,

    /// Directory to copy into the volume (recursive)
    #[arg(long, visible_alias = "robots-dir", default_value = DEFAULT_SOURCE)]
    pub source: PathBuf,

    /// Output disk image path
    #[arg(short, long, default_value = DEFAULT_OUT)]
    pub out: PathBuf,

    /// Target folder inside the volume ('/' between components)
    #[arg(short, long, default_value = DEFAULT_TARGET)]
    pub target: String,

    /// Output image size in bytes
    #[arg(long = "image-size", default_value_t = DEFAULT_IMAGE_SIZE)]
    pub image_size: u64,

    /// Alignment of the allocation area in bytes
    #[arg(long, default_value_t = DEFAULT_ALIGN)]
    pub align: u64,

    /// Type code for copied files
    #[arg(long = "type", default_value = "TEXT", value_parser = parse_fourcc)]
    pub type_code: FourCC,

    /// Creator code for copied files
    #[arg(long, default_value = "RWar", value_parser = parse_fourcc)]
    pub creator: FourCC,

    /// Rename the volume
    #[arg(long = "volume-name")]
    pub volume_name: Option<String>,

    /// Leave the boot blocks empty
    #[arg(long = "no-boot")]
    pub no_boot: bool,

    /// Keep the template's desktop files instead of regenerating them
    #[arg(long = "no-desktop-db")]
    pub no_desktop_db: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_fourcc(s: &str) -> Result<FourCC, String> {
    FourCC::parse(s).ok_or_else(|| format!("'{s}' is not a 1-4 character Mac Roman code"))
}

impl Args {
    /// Target path split into components; empty components are dropped.
    pub fn target_components(&self) -> Vec<String> {
        self.target
            .split(TARGET_SEPARATOR)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn mirror_options(&self) -> MirrorOptions {
        MirrorOptions {
            max_name_len: MAX_NAME,
            type_code: self.type_code,
            creator: self.creator,
        }
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            bootable: !self.no_boot,
            desktop_db: !self.no_desktop_db,
            ..WriteOptions::new(self.image_size, self.align)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["hfs-inject"]);
        assert_eq!(
            args.target_components(),
            vec!["Desktop Folder", "Robot Warriors", "robots"]
        );
        assert_eq!(args.image_size, 8 * 1024 * 1024);
        let opts = args.write_options();
        assert_eq!(opts.align, 2048);
        assert!(opts.bootable);
        assert!(opts.desktop_db);
        assert_eq!(args.mirror_options().creator, FourCC(*b"RWar"));
    }

    #[test]
    fn test_target_drops_empty_components() {
        let args = Args::parse_from(["hfs-inject", "--target", "/X//Y/"]);
        assert_eq!(args.target_components(), vec!["X", "Y"]);
    }

    #[test]
    fn test_bad_fourcc_rejected() {
        assert!(Args::try_parse_from(["hfs-inject", "--type", "TOOLONG"]).is_err());
        let args = Args::try_parse_from(["hfs-inject", "--creator", "ab"]).unwrap();
        assert_eq!(args.creator, FourCC(*b"ab  "));
    }

    #[test]
    fn test_robots_dir_alias() {
        let args = Args::parse_from(["hfs-inject", "--robots-dir", "bots", "--no-boot"]);
        assert_eq!(args.source, PathBuf::from("bots"));
        assert!(!args.write_options().bootable);
    }

    #[test]
    fn test_no_desktop_db_flag() {
        let args = Args::parse_from(["hfs-inject", "--no-desktop-db"]);
        let opts = args.write_options();
        assert!(!opts.desktop_db);
        assert!(opts.bootable);
    }
}
