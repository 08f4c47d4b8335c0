pub mod error;
pub mod fs;
pub mod inject;

pub use error::InjectError;
