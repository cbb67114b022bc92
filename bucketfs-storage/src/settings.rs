use std::fmt;
use std::time::Duration;

use reqwest::Url;

use bucketfs_common::config::{keys, ConfigProvider};

use crate::client::StorageError;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// How `append_object` reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppendMode {
    /// Emulated append for stores without native support: read the current
    /// object and PUT it back with the new bytes attached.
    #[default]
    Rewrite,
    /// A PUT carrying `x-amz-write-offset-bytes`. Only stores that honour the
    /// header may use this; elsewhere the PUT replaces the object.
    Offset,
    /// OSS native append: `POST /{key}?append&position={n}`.
    Oss,
}

impl AppendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppendMode::Rewrite => "rewrite",
            AppendMode::Offset => "offset",
            AppendMode::Oss => "oss",
        }
    }
}

/// Everything needed to build a client, parsed and validated.
#[derive(Clone)]
pub struct ClientSettings {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Url,
    pub bucket: String,
    pub region: String,
    pub path_style: bool,
    pub verify_ssl: bool,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub max_tries: u32,
    pub proxy: Option<String>,
    pub append_mode: AppendMode,
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .field("verify_ssl", &self.verify_ssl)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_tries", &self.max_tries)
            .field("proxy", &self.proxy)
            .field("append_mode", &self.append_mode)
            .finish()
    }
}

impl ClientSettings {
    pub fn from_config(config: &dyn ConfigProvider) -> Result<Self, StorageError> {
        let missing: Vec<&str> = keys::REQUIRED
            .iter()
            .copied()
            .filter(|k| config.get_non_empty(k).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        let required = |name: &str| config.get_non_empty(name).unwrap_or_default().to_string();

        let endpoint_raw = required(keys::ENDPOINT);
        let endpoint = Url::parse(&endpoint_raw)
            .map_err(|e| StorageError::Config(format!("endpoint {:?}: {}", endpoint_raw, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.host_str().is_none() {
            return Err(StorageError::Config(format!(
                "endpoint must be an http(s) URL with a host: {}",
                endpoint_raw
            )));
        }

        let bucket = required(keys::BUCKET);
        if bucket.contains('/') {
            return Err(StorageError::Config(format!(
                "bucket name must not contain '/': {}",
                bucket
            )));
        }

        let max_tries = match config.get_non_empty(keys::MAX_TRIES) {
            Some(v) => parse_number::<u32>(keys::MAX_TRIES, v)?.max(1),
            None => DEFAULT_MAX_TRIES,
        };

        let append_mode = match config.get_non_empty(keys::APPEND_MODE) {
            None | Some("rewrite") => AppendMode::Rewrite,
            Some("offset") => AppendMode::Offset,
            Some("oss") => AppendMode::Oss,
            Some(other) => {
                return Err(StorageError::Config(format!(
                    "{} must be \"rewrite\", \"offset\" or \"oss\", got {:?}",
                    keys::APPEND_MODE,
                    other
                )))
            }
        };

        Ok(Self {
            access_key_id: required(keys::ACCESS_KEY_ID),
            secret_access_key: required(keys::ACCESS_KEY_SECRET),
            endpoint,
            bucket,
            region: config
                .get_non_empty(keys::REGION)
                .unwrap_or(DEFAULT_REGION)
                .to_string(),
            path_style: parse_flag(config, keys::PATH_STYLE, true)?,
            verify_ssl: parse_flag(config, keys::VERIFY_SSL, false)?,
            timeout: parse_seconds(config, keys::TIMEOUT)?,
            connect_timeout: parse_seconds(config, keys::CONNECT_TIMEOUT)?,
            max_tries,
            proxy: config.get_non_empty(keys::PROXY).map(str::to_string),
            append_mode,
        })
    }

    /// `host[:port]` of the endpoint, without the bucket.
    pub fn endpoint_host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Host the bucket's requests are addressed to.
    pub fn request_host(&self) -> String {
        if self.path_style {
            self.endpoint_host()
        } else {
            format!("{}.{}", self.bucket, self.endpoint_host())
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, StorageError> {
    value
        .parse::<T>()
        .map_err(|_| StorageError::Config(format!("{} must be a non-negative integer, got {:?}", name, value)))
}

fn parse_seconds(config: &dyn ConfigProvider, name: &str) -> Result<Option<Duration>, StorageError> {
    config
        .get_non_empty(name)
        .map(|v| parse_number::<u64>(name, v).map(Duration::from_secs))
        .transpose()
}

fn parse_flag(config: &dyn ConfigProvider, name: &str, default: bool) -> Result<bool, StorageError> {
    match config.get_non_empty(name).map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(other) => Err(StorageError::Config(format!(
            "{} must be a boolean, got {:?}",
            name, other
        ))),
    }
}
