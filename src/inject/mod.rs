//! Mirroring a host directory tree into an in-memory volume.

pub mod mirror;
pub mod name;
pub mod output;
pub mod resolve;

pub use mirror::{mirror, MirrorOptions};
pub use name::normalize;
pub use output::write_image;
pub use resolve::ensure_folder;
