pub mod directory;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use anyhow::bail;
use bucketfs_common::config::keys;
use bucketfs_common::{ConfigProvider, FileSystem, MapConfig};

use self::directory::DirectoryFs;
use crate::adapter::ObjectFs;
use crate::settings::AppendMode;

/// Construct a filesystem for the backend named `kind` from its settings.
///
/// Object storage backends only check that the required settings are
/// present here; the client itself is built on first use.
pub fn from_config(kind: &str, config: MapConfig) -> anyhow::Result<Box<dyn FileSystem>> {
    match kind {
        "s3" | "oss" => {
            let missing = config.missing_required();
            if !missing.is_empty() {
                bail!("Missing settings for backend '{}': {}", kind, missing.join(", "));
            }
            Ok(Box::new(ObjectFs::new(Arc::new(with_default_append_mode(kind, config)))))
        }
        "local" | "directory" => {
            let Some(root) = config.get_non_empty(keys::ROOT) else {
                bail!("Backend '{}' requires the '{}' setting", kind, keys::ROOT);
            };
            let mut fs = DirectoryFs::new(root);
            if let Some(sub_path) = config.get_non_empty(keys::SUB_PATH) {
                fs = fs.with_sub_path(sub_path);
            }
            if let Some(base_url) = config.get_non_empty(keys::BASE_URL) {
                fs = fs.with_base_url(base_url);
            }
            Ok(Box::new(fs))
        }
        other => bail!("Unknown backend type: {}", other),
    }
}

/// OSS appends natively; other stores fall back to the client default.
fn with_default_append_mode(kind: &str, mut config: MapConfig) -> MapConfig {
    if kind == "oss" && config.get_non_empty(keys::APPEND_MODE).is_none() {
        config.set(keys::APPEND_MODE, AppendMode::Oss.as_str());
    }
    config
}
