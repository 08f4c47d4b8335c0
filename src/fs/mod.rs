pub mod desktop;
pub mod filesystem;
pub mod hfs;
pub mod hfs_write;
pub mod macroman;
pub mod resource_fork;
pub mod volume;

pub use filesystem::FilesystemError;
pub use hfs::read_volume;
pub use hfs_write::{write_volume, WriteOptions};
pub use resource_fork::{Resource, ResourceFork};
pub use volume::{CatalogName, File, Folder, FourCC, Node, Volume};
