//! Object storage and local directory backends behind the
//! [`FileSystem`](bucketfs_common::FileSystem) trait.

pub mod adapter;
pub mod backend;
pub mod client;
pub mod config;
pub mod settings;
pub mod sign;

pub use adapter::ObjectFs;
pub use backend::directory::DirectoryFs;
pub use client::{ObjectStorageClient, StorageError};
