//! S3-compatible object storage client.
//!
//! Speaks the S3 REST API over reqwest, signing each request with AWS
//! Signature V4. Works against AWS S3, MinIO, Aliyun OSS and other
//! S3-compatible services. Retries transport failures and 5xx responses up
//! to the configured number of tries.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{header, Body, Client, Method, Response, StatusCode};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use bucketfs_common::ListingPage;

use crate::client::{check_presign_expiry, content_type_for, ObjectMeta, ObjectStorageClient, StorageError};
use crate::settings::{AppendMode, ClientSettings};
use crate::sign::{self, CanonicalRequest, SigningKey};

const INITIAL_RETRY_DELAY_MS: u64 = 100;
const MAX_RETRY_DELAY_MS: u64 = 10_000;
const WRITE_OFFSET_HEADER: &str = "x-amz-write-offset-bytes";
const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";

pub struct S3Client {
    settings: ClientSettings,
    http: Client,
}

enum Payload<'a> {
    Empty,
    Bytes(Bytes),
    File(&'a Path),
}

struct S3Request<'a> {
    method: Method,
    /// `None` addresses the bucket itself.
    key: Option<&'a str>,
    query: Vec<(String, String)>,
    headers: Vec<(&'static str, String)>,
    payload: Payload<'a>,
}

impl<'a> S3Request<'a> {
    fn object(method: Method, key: &'a str) -> Self {
        Self {
            method,
            key: Some(key),
            query: Vec::new(),
            headers: Vec::new(),
            payload: Payload::Empty,
        }
    }

    fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn body(mut self, payload: Payload<'a>) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListEntry>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

impl S3Client {
    /// Build the HTTP client. Fails on settings reqwest cannot honour, such
    /// as an unparsable proxy URL.
    pub fn new(settings: ClientSettings) -> Result<Self, StorageError> {
        let mut builder = Client::builder().danger_accept_invalid_certs(!settings.verify_ssl);
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = settings.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(proxy) = &settings.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| StorageError::Config(format!("proxy {:?}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| StorageError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { settings, http })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Encoded request path for `key`, or for the bucket when `key` is `None`.
    fn canonical_uri(&self, key: Option<&str>) -> String {
        match (self.settings.path_style, key) {
            (true, Some(key)) => format!("/{}/{}", self.settings.bucket, sign::encode_key(key)),
            (true, None) => format!("/{}", self.settings.bucket),
            (false, Some(key)) => format!("/{}", sign::encode_key(key)),
            (false, None) => "/".to_string(),
        }
    }

    fn url(&self, uri: &str, query: &str) -> String {
        let mut url = format!(
            "{}://{}{}",
            self.settings.endpoint.scheme(),
            self.settings.request_host(),
            uri
        );
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    fn signing_key(&self) -> SigningKey<'_> {
        SigningKey {
            access_key_id: &self.settings.access_key_id,
            secret_access_key: &self.settings.secret_access_key,
            region: &self.settings.region,
        }
    }

    async fn send_once(&self, req: &S3Request<'_>) -> Result<Response, StorageError> {
        let now = Utc::now();
        let date_time = sign::amz_date(now);
        let host = self.settings.request_host();
        let uri = self.canonical_uri(req.key);

        let (body, payload_hash, content_length) = match &req.payload {
            Payload::Empty => (Body::from(Bytes::new()), sign::sha256_hex(b""), 0),
            Payload::Bytes(data) => (Body::from(data.clone()), sign::sha256_hex(data), data.len() as u64),
            Payload::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                let len = file.metadata().await?.len();
                (
                    Body::wrap_stream(ReaderStream::new(file)),
                    sign::UNSIGNED_PAYLOAD.to_string(),
                    len,
                )
            }
        };

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host);
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), date_time);
        for (name, value) in &req.headers {
            headers.insert(name.to_string(), value.clone());
        }

        let auth = sign::authorization(
            self.signing_key(),
            &CanonicalRequest {
                method: req.method.as_str(),
                uri: &uri,
                query: &req.query,
                headers: &headers,
                payload_hash: &payload_hash,
            },
            now,
        );

        let url = self.url(&uri, &sign::canonical_query(&req.query));
        let mut builder = self.http.request(req.method.clone(), &url);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if req.method == Method::PUT || req.method == Method::POST {
            builder = builder.header(header::CONTENT_LENGTH, content_length);
        }

        debug!(method = %req.method, url = %url, "S3 request");
        Ok(builder.header(header::AUTHORIZATION, auth).body(body).send().await?)
    }

    /// Send `req`, retrying transport errors and 5xx responses.
    async fn execute(&self, req: &S3Request<'_>) -> Result<Response, StorageError> {
        let max_tries = self.settings.max_tries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.send_once(req).await;
            let retry = match &outcome {
                Ok(resp) => resp.status().is_server_error(),
                Err(e) => e.is_retryable(),
            };
            if !retry || attempt >= max_tries {
                return outcome;
            }
            match &outcome {
                Ok(resp) => warn!(status = %resp.status(), attempt, max_tries, "S3 request failed, retrying"),
                Err(e) => warn!(error = %e, attempt, max_tries, "S3 request failed, retrying"),
            }
            tokio::time::sleep(retry_delay(attempt)).await;
        }
    }

    /// Execute and turn any non-success status into an error.
    async fn execute_ok(&self, req: &S3Request<'_>) -> Result<Response, StorageError> {
        let resp = self.execute(req).await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(error_from_response(resp, req.key.unwrap_or_default()).await)
        }
    }

    async fn rewrite_append(&self, key: &str, data: Bytes, position: u64) -> Result<(), StorageError> {
        let current = match self.get_object(key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => Bytes::new(),
            Err(e) => return Err(e),
        };
        if current.len() as u64 != position {
            return Err(StorageError::position_mismatch(key, position, current.len() as u64));
        }
        if current.is_empty() {
            return self.put_object(key, data).await;
        }
        let mut combined = Vec::with_capacity(current.len() + data.len());
        combined.extend_from_slice(&current);
        combined.extend_from_slice(&data);
        self.put_object(key, Bytes::from(combined)).await
    }
}

#[async_trait]
impl ObjectStorageClient for S3Client {
    fn bucket(&self) -> &str {
        &self.settings.bucket
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let req = S3Request::object(Method::PUT, key)
            .header("content-type", content_type_for(key))
            .body(Payload::Bytes(data));
        self.execute_ok(&req).await?;
        debug!(key = %key, "S3 put complete");
        Ok(())
    }

    async fn append_object(&self, key: &str, data: Bytes, position: u64) -> Result<(), StorageError> {
        let mut req = match self.settings.append_mode {
            AppendMode::Rewrite => return self.rewrite_append(key, data, position).await,
            AppendMode::Offset => S3Request::object(Method::PUT, key)
                .header(WRITE_OFFSET_HEADER, position.to_string()),
            AppendMode::Oss => S3Request::object(Method::POST, key)
                .query("append", "")
                .query("position", position.to_string()),
        }
        .body(Payload::Bytes(data));
        if position == 0 {
            req = req.header("content-type", content_type_for(key));
        }
        self.execute_ok(&req).await?;
        debug!(key = %key, position, mode = self.settings.append_mode.as_str(), "S3 append complete");
        Ok(())
    }

    async fn put_file(&self, key: &str, local: &Path) -> Result<(), StorageError> {
        let req = S3Request::object(Method::PUT, key)
            .header("content-type", content_type_for(key))
            .body(Payload::File(local));
        self.execute_ok(&req).await?;
        debug!(key = %key, local = %local.display(), "S3 upload complete");
        Ok(())
    }

    async fn copy_object(&self, source: &str, destination: &str) -> Result<(), StorageError> {
        let copy_source = format!("/{}/{}", self.settings.bucket, sign::encode_key(source));
        let req = S3Request::object(Method::PUT, destination).header(COPY_SOURCE_HEADER, copy_source);
        let resp = self.execute_ok(&req).await?;
        // A copy can fail after the 200 status line has been sent.
        let body = resp.text().await?;
        if body.contains("<Error>") {
            return Err(parse_error_body(200, &body));
        }
        debug!(source = %source, destination = %destination, "S3 copy complete");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let resp = self.execute(&S3Request::object(Method::DELETE, key)).await?;
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(error_from_response(resp, key).await);
        }
        debug!(key = %key, "S3 delete complete");
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        let resp = self.execute_ok(&S3Request::object(Method::HEAD, key)).await?;
        let headers = resp.headers();
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| StorageError::Malformed(format!("no Content-Length for {}", key)))?;
        let last_modified = headers
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StorageError::Malformed(format!("no Last-Modified for {}", key)))
            .and_then(parse_http_date)?;
        Ok(ObjectMeta {
            content_length,
            last_modified,
        })
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError> {
        let resp = self.execute_ok(&S3Request::object(Method::GET, key)).await?;
        Ok(resp.bytes().await?)
    }

    async fn list_objects(
        &self,
        prefix: &str,
        max_keys: usize,
        marker: Option<&str>,
    ) -> Result<ListingPage, StorageError> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), prefix.to_string()),
            ("max-keys".to_string(), max_keys.to_string()),
        ];
        if let Some(token) = marker {
            query.push(("continuation-token".to_string(), token.to_string()));
        }
        let req = S3Request {
            method: Method::GET,
            key: None,
            query,
            headers: Vec::new(),
            payload: Payload::Empty,
        };
        let body = self.execute_ok(&req).await?.text().await?;
        parse_list_page(&body)
    }

    fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        let expires_secs = check_presign_expiry(expires_in)?;
        let uri = self.canonical_uri(Some(key));
        let query = sign::presigned_query(
            self.signing_key(),
            &self.settings.request_host(),
            &uri,
            expires_secs,
            Utc::now(),
        );
        Ok(self.url(&uri, &query))
    }
}

/// Backoff before retry number `attempt`: 100 ms doubling, capped.
fn retry_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(INITIAL_RETRY_DELAY_MS.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
}

async fn error_from_response(resp: Response, key: &str) -> StorageError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND && !body.contains("NoSuchBucket") {
        return StorageError::NotFound(key.to_string());
    }
    parse_error_body(status.as_u16(), &body)
}

fn parse_error_body(status: u16, body: &str) -> StorageError {
    match quick_xml::de::from_str::<ErrorBody>(body) {
        Ok(err) => StorageError::Service {
            status,
            code: err.code,
            message: err.message,
        },
        Err(_) => StorageError::Service {
            status,
            code: format!("HTTP{}", status),
            message: body.trim().to_string(),
        },
    }
}

fn parse_list_page(xml: &str) -> Result<ListingPage, StorageError> {
    let result: ListBucketResult = quick_xml::de::from_str(xml)
        .map_err(|e| StorageError::Malformed(format!("ListObjectsV2 response: {}", e)))?;
    let next_marker = if result.is_truncated {
        result.next_continuation_token.filter(|t| !t.is_empty())
    } else {
        None
    };
    Ok(ListingPage {
        keys: result.contents.into_iter().map(|c| c.key).collect(),
        next_marker,
    })
}

fn parse_http_date(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc2822(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Malformed(format!("Last-Modified {:?}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{HeaderMap, Method as AxumMethod, StatusCode as AxumStatus, Uri};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::any;
    use axum::Router;
    use bucketfs_common::config::keys;
    use bucketfs_common::MapConfig;
    use parking_lot::Mutex;

    #[test]
    fn test_parse_list_page() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>media</Name>
  <Prefix>data/</Prefix>
  <KeyCount>2</KeyCount>
  <MaxKeys>2</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1ueGcxLPRx1Tr</NextContinuationToken>
  <Contents><Key>data/a.txt</Key><Size>5</Size></Contents>
  <Contents><Key>data/b.txt</Key><Size>7</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_page(xml).unwrap();
        assert_eq!(page.keys, vec!["data/a.txt", "data/b.txt"]);
        assert_eq!(page.next_marker.as_deref(), Some("1ueGcxLPRx1Tr"));
    }

    #[test]
    fn test_parse_empty_list_page() {
        let xml = r#"<ListBucketResult><Name>media</Name><IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let page = parse_list_page(xml).unwrap();
        assert!(page.keys.is_empty());
        assert_eq!(page.next_marker, None);
    }

    #[test]
    fn test_parse_error_body() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message><RequestId>4442587FB7D0A2F9</RequestId></Error>"#;
        match parse_error_body(403, xml) {
            StorageError::Service { status, code, message } => {
                assert_eq!(status, 403);
                assert_eq!(code, "AccessDenied");
                assert_eq!(message, "Access Denied");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse_error_body(502, "bad gateway"),
            StorageError::Service { status: 502, .. }
        ));
    }

    #[test]
    fn test_parse_http_date() {
        let date = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(date.timestamp(), 1445412480);
        assert!(parse_http_date("yesterday").is_err());
    }

    fn settings(endpoint: &str, extra: &[(&str, &str)]) -> ClientSettings {
        let mut config = MapConfig::new()
            .with(keys::ACCESS_KEY_ID, "AKIDEXAMPLE")
            .with(keys::ACCESS_KEY_SECRET, "secret")
            .with(keys::ENDPOINT, endpoint)
            .with(keys::BUCKET, "media")
            .with(keys::BASE_URL, "https://cdn.example.com");
        for (k, v) in extra {
            config.set(*k, *v);
        }
        ClientSettings::from_config(&config).unwrap()
    }

    #[test]
    fn test_presign_url_shape() {
        let client = S3Client::new(settings("http://127.0.0.1:9000", &[])).unwrap();
        let url = client.presign_get("data/a b.txt", Duration::from_secs(120)).unwrap();
        assert!(url.starts_with("http://127.0.0.1:9000/media/data/a%20b.txt?"), "{url}");
        assert!(url.contains("X-Amz-Expires=120"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(client.presign_get("k", Duration::ZERO).is_err());
    }

    #[test]
    fn test_virtual_host_addressing() {
        let client = S3Client::new(settings("https://s3.example.com", &[(keys::PATH_STYLE, "false")])).unwrap();
        let url = client.presign_get("a.txt", Duration::from_secs(60)).unwrap();
        assert!(url.starts_with("https://media.s3.example.com/a.txt?"), "{url}");
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let result = S3Client::new(settings("http://127.0.0.1:9000", &[(keys::PROXY, "http://proxy:99999")]));
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    /// Minimal in-test S3 endpoint: objects keyed by request path.
    #[derive(Default)]
    struct FakeS3 {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        /// Number of upcoming requests to answer with 503.
        fail_next: AtomicUsize,
        requests: AtomicUsize,
        seen_headers: Mutex<Vec<HeaderMap>>,
        seen_requests: Mutex<Vec<(AxumMethod, String)>>,
        /// Honour `x-amz-write-offset-bytes`; otherwise PUT always replaces.
        supports_write_offset: bool,
    }

    fn query_param<'a>(uri: &'a Uri, name: &str) -> Option<&'a str> {
        uri.query()?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == name).then_some(v)
        })
    }

    async fn handle(
        State(state): State<Arc<FakeS3>>,
        method: AxumMethod,
        uri: Uri,
        headers: HeaderMap,
        body: axum::body::Bytes,
    ) -> AxumResponse {
        state.requests.fetch_add(1, Ordering::SeqCst);
        state.seen_headers.lock().push(headers.clone());
        state
            .seen_requests
            .lock()
            .push((method.clone(), uri.path_and_query().map(|p| p.to_string()).unwrap_or_default()));
        if state
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return AxumStatus::SERVICE_UNAVAILABLE.into_response();
        }
        if !headers.contains_key("authorization") {
            return AxumStatus::FORBIDDEN.into_response();
        }
        let path = uri.path().to_string();
        let mut objects = state.objects.lock();
        match method {
            AxumMethod::POST if query_param(&uri, "append").is_some() => {
                let position: usize = query_param(&uri, "position").unwrap().parse().unwrap();
                let current = objects.entry(path).or_default();
                if current.len() != position {
                    return (AxumStatus::CONFLICT, "<Error><Code>PositionNotEqualToLength</Code><Message>Position is not equal to file length</Message></Error>").into_response();
                }
                current.extend_from_slice(&body);
                AxumStatus::OK.into_response()
            }
            AxumMethod::PUT => {
                let offset = headers
                    .get(WRITE_OFFSET_HEADER)
                    .filter(|_| state.supports_write_offset);
                if let Some(offset) = offset {
                    let offset: usize = offset.to_str().unwrap().parse().unwrap();
                    let current = objects.entry(path).or_default();
                    if current.len() != offset {
                        return (AxumStatus::BAD_REQUEST, "<Error><Code>InvalidWriteOffset</Code><Message>offset mismatch</Message></Error>").into_response();
                    }
                    current.extend_from_slice(&body);
                } else {
                    objects.insert(path, body.to_vec());
                }
                AxumStatus::OK.into_response()
            }
            AxumMethod::GET if uri.query().is_some_and(|q| q.contains("list-type=2")) => {
                let mut keys: Vec<&String> = objects.keys().collect();
                keys.sort();
                let contents: String = keys
                    .iter()
                    .map(|k| format!("<Contents><Key>{}</Key></Contents>", k.trim_start_matches("/media/")))
                    .collect();
                format!("<ListBucketResult><IsTruncated>false</IsTruncated>{}</ListBucketResult>", contents)
                    .into_response()
            }
            AxumMethod::GET => match objects.get(&path) {
                Some(data) => data.clone().into_response(),
                None => (AxumStatus::NOT_FOUND, "<Error><Code>NoSuchKey</Code><Message>gone</Message></Error>").into_response(),
            },
            AxumMethod::HEAD => match objects.get(&path) {
                // hyper derives Content-Length from the body and drops it for HEAD.
                Some(data) => (
                    [("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT")],
                    data.clone(),
                )
                    .into_response(),
                None => AxumStatus::NOT_FOUND.into_response(),
            },
            AxumMethod::DELETE => {
                objects.remove(&path);
                AxumStatus::NO_CONTENT.into_response()
            }
            _ => AxumStatus::METHOD_NOT_ALLOWED.into_response(),
        }
    }

    async fn serve(state: Arc<FakeS3>) -> String {
        let app = Router::new().route("/{*path}", any(handle)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_round_trip_against_fake_endpoint() {
        let state = Arc::new(FakeS3::default());
        let endpoint = serve(state.clone()).await;
        let client = S3Client::new(settings(&endpoint, &[])).unwrap();

        client.append_object("a/b.txt", Bytes::from("hello"), 0).await.unwrap();
        client.append_object("a/b.txt", Bytes::from(" world"), 5).await.unwrap();
        assert_eq!(client.get_object("a/b.txt").await.unwrap(), Bytes::from("hello world"));

        let meta = client.head_object("a/b.txt").await.unwrap();
        assert_eq!(meta.content_length, 11);
        assert_eq!(meta.last_modified.timestamp(), 1445412480);

        assert!(!client.object_exists("missing.txt").await.unwrap());
        assert!(matches!(
            client.get_object("missing.txt").await,
            Err(StorageError::NotFound(_))
        ));

        let page = client.list_objects("a/", 200, None).await.unwrap();
        assert_eq!(page.keys, vec!["a/b.txt"]);

        client.delete_object("a/b.txt").await.unwrap();
        client.delete_object("a/b.txt").await.unwrap();
        assert!(!client.object_exists("a/b.txt").await.unwrap());

        let signed = state.seen_headers.lock();
        assert!(signed.iter().all(|h| h.contains_key("x-amz-date")));
    }

    #[tokio::test]
    async fn test_wrong_offset_is_service_error() {
        let state = Arc::new(FakeS3 {
            supports_write_offset: true,
            ..Default::default()
        });
        let endpoint = serve(state).await;
        let client = S3Client::new(settings(&endpoint, &[(keys::APPEND_MODE, "offset")])).unwrap();

        client.append_object("log.txt", Bytes::from("abc"), 0).await.unwrap();
        client.append_object("log.txt", Bytes::from("de"), 3).await.unwrap();
        assert_eq!(client.get_object("log.txt").await.unwrap(), Bytes::from("abcde"));

        match client.append_object("log.txt", Bytes::from("d"), 1).await {
            Err(StorageError::Service { status, code, .. }) => {
                assert_eq!(status, 400);
                assert_eq!(code, "InvalidWriteOffset");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let state = Arc::new(FakeS3::default());
        state.fail_next.store(2, Ordering::SeqCst);
        let endpoint = serve(state.clone()).await;
        let client = S3Client::new(settings(&endpoint, &[(keys::MAX_TRIES, "3")])).unwrap();

        client.put_object("k.bin", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(state.requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_tries() {
        let state = Arc::new(FakeS3::default());
        state.fail_next.store(5, Ordering::SeqCst);
        let endpoint = serve(state.clone()).await;
        let client = S3Client::new(settings(&endpoint, &[(keys::MAX_TRIES, "2")])).unwrap();

        let err = client.put_object("k.bin", Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, StorageError::Service { status: 503, .. }), "{err:?}");
        assert_eq!(state.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_default_append_survives_store_without_offset_support() {
        let state = Arc::new(FakeS3::default());
        let endpoint = serve(state.clone()).await;
        let client = S3Client::new(settings(&endpoint, &[])).unwrap();

        client.append_object("k", Bytes::from("hello"), 0).await.unwrap();
        client.append_object("k", Bytes::from(" world"), 5).await.unwrap();
        assert_eq!(client.get_object("k").await.unwrap(), Bytes::from("hello world"));
    }

    #[tokio::test]
    async fn test_oss_append_mode() {
        let state = Arc::new(FakeS3::default());
        let endpoint = serve(state.clone()).await;
        let client = S3Client::new(settings(&endpoint, &[(keys::APPEND_MODE, "oss")])).unwrap();

        client.append_object("logs/app.log", Bytes::from("hello"), 0).await.unwrap();
        client.append_object("logs/app.log", Bytes::from(" world"), 5).await.unwrap();
        assert_eq!(
            client.get_object("logs/app.log").await.unwrap(),
            Bytes::from("hello world")
        );
        {
            let requests = state.seen_requests.lock();
            assert_eq!(requests[0].0, AxumMethod::POST);
            assert_eq!(requests[0].1, "/media/logs/app.log?append=&position=0");
            assert_eq!(requests[1].1, "/media/logs/app.log?append=&position=5");
        }

        match client.append_object("logs/app.log", Bytes::from("!"), 5).await {
            Err(StorageError::Service { status, code, .. }) => {
                assert_eq!(status, 409);
                assert_eq!(code, "PositionNotEqualToLength");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_retry_delay_is_capped() {
        assert_eq!(retry_delay(1), Duration::from_millis(100));
        assert_eq!(retry_delay(2), Duration::from_millis(200));
        assert_eq!(retry_delay(4), Duration::from_millis(800));
        assert_eq!(retry_delay(30), Duration::from_millis(MAX_RETRY_DELAY_MS));
        assert_eq!(retry_delay(u32::MAX), Duration::from_millis(MAX_RETRY_DELAY_MS));
    }

    #[tokio::test]
    async fn test_rewrite_append_mode() {
        let state = Arc::new(FakeS3::default());
        let endpoint = serve(state.clone()).await;
        let client = S3Client::new(settings(&endpoint, &[(keys::APPEND_MODE, "rewrite")])).unwrap();

        client.append_object("notes.txt", Bytes::from("hello"), 0).await.unwrap();
        client.append_object("notes.txt", Bytes::from(" world"), 5).await.unwrap();
        assert_eq!(client.get_object("notes.txt").await.unwrap(), Bytes::from("hello world"));
        assert!(state
            .seen_headers
            .lock()
            .iter()
            .all(|h| !h.contains_key(WRITE_OFFSET_HEADER)));

        let err = client.append_object("notes.txt", Bytes::from("!"), 3).await.unwrap_err();
        assert!(matches!(err, StorageError::Service { status: 409, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_put_file_streams_local_content() {
        let state = Arc::new(FakeS3::default());
        let endpoint = serve(state.clone()).await;
        let client = S3Client::new(settings(&endpoint, &[])).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("report.csv");
        std::fs::write(&local, "a,b\n1,2\n").unwrap();
        client.put_file("reports/report.csv", &local).await.unwrap();
        assert_eq!(
            client.get_object("reports/report.csv").await.unwrap(),
            Bytes::from("a,b\n1,2\n")
        );
    }
}
