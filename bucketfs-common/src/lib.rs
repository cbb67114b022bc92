pub mod config;
pub mod error;
pub mod filesystem;
pub mod path;

pub use config::{ConfigProvider, MapConfig};
pub use error::{FsError, FsResult, Operation};
pub use filesystem::{FileSystem, ListingPage, DEFAULT_LIST_LIMIT, DEFAULT_PRESIGN_EXPIRY};
