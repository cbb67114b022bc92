use std::collections::HashMap;

/// Names of the settings a storage backend reads.
pub mod keys {
    pub const ACCESS_KEY_ID: &str = "accessKeyId";
    pub const ACCESS_KEY_SECRET: &str = "accessKeySecret";
    pub const ENDPOINT: &str = "endpoint";
    pub const BUCKET: &str = "bucket";
    pub const BASE_URL: &str = "base_url";
    pub const SUB_PATH: &str = "sub_path";
    pub const TIMEOUT: &str = "timeout";
    pub const CONNECT_TIMEOUT: &str = "connect_timeout";
    pub const MAX_TRIES: &str = "max_tries";
    pub const PROXY: &str = "proxy";
    pub const REGION: &str = "region";
    pub const PATH_STYLE: &str = "path_style";
    pub const VERIFY_SSL: &str = "verify_ssl";
    pub const APPEND_MODE: &str = "append_mode";
    /// Root directory of the local directory backend.
    pub const ROOT: &str = "root";

    /// Keys an object storage backend cannot start without.
    pub const REQUIRED: &[&str] = &[ACCESS_KEY_ID, ACCESS_KEY_SECRET, ENDPOINT, BUCKET, BASE_URL];
}

/// Read-only access to a backend's settings.
///
/// Values are plain strings; typed parsing happens where a setting is used.
/// Empty strings are treated the same as missing values by [`get_non_empty`].
///
/// [`get_non_empty`]: ConfigProvider::get_non_empty
pub trait ConfigProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<&str>;

    fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }
}

impl ConfigProvider for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<&str> {
        HashMap::get(self, name).map(String::as_str)
    }
}

/// Owned string map of settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Names of required keys that are missing or empty.
    pub fn missing_required(&self) -> Vec<&'static str> {
        keys::REQUIRED
            .iter()
            .copied()
            .filter(|k| self.get_non_empty(k).is_none())
            .collect()
    }
}

impl ConfigProvider for MapConfig {
    fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
