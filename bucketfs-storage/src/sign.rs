//! AWS Signature Version 4 for S3 requests and presigned URLs.
//!
//! Signing is done by hand over hmac/sha2 so the HTTP client stays a plain
//! reqwest client with no SDK dependency.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SERVICE: &str = "s3";

/// Identity and scope used for every signature of one client.
#[derive(Clone, Copy)]
pub struct SigningKey<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
}

/// The parts of a request that go into its canonical form.
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Already URI-encoded absolute path.
    pub uri: &'a str,
    pub query: &'a [(String, String)],
    /// Lower-case header names.
    pub headers: &'a BTreeMap<String, String>,
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    fn render(&self) -> String {
        let canonical_headers: String = self
            .headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.uri,
            canonical_query(self.query),
            canonical_headers,
            signed_headers(self.headers),
            self.payload_hash
        )
    }
}

pub fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn short_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d").to_string()
}

/// Value of the `Authorization` header for `request` signed at `now`.
///
/// `request.headers` must already contain `host`, `x-amz-date` and
/// `x-amz-content-sha256`.
pub fn authorization(key: SigningKey<'_>, request: &CanonicalRequest<'_>, now: DateTime<Utc>) -> String {
    let scope = credential_scope(key.region, now);
    let signature = signature(key, &request.render(), &scope, now);
    format!(
        "{} Credential={}/{},SignedHeaders={},Signature={}",
        ALGORITHM,
        key.access_key_id,
        scope,
        signed_headers(request.headers),
        signature
    )
}

/// Query string (without leading `?`) of a presigned GET for `uri` on `host`.
pub fn presigned_query(
    key: SigningKey<'_>,
    host: &str,
    uri: &str,
    expires_secs: u64,
    now: DateTime<Utc>,
) -> String {
    let scope = credential_scope(key.region, now);
    let mut query = vec![
        ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{}", key.access_key_id, scope),
        ),
        ("X-Amz-Date".to_string(), amz_date(now)),
        ("X-Amz-Expires".to_string(), expires_secs.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    let mut headers = BTreeMap::new();
    headers.insert("host".to_string(), host.to_string());

    let request = CanonicalRequest {
        method: "GET",
        uri,
        query: &query,
        headers: &headers,
        payload_hash: UNSIGNED_PAYLOAD,
    };
    let signature = signature(key, &request.render(), &scope, now);
    query.push(("X-Amz-Signature".to_string(), signature));
    canonical_query(&query)
}

/// URI-encode an object key for use in a request path, keeping `/`.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sorted, encoded `name=value` pairs joined by `&`.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn signed_headers(headers: &BTreeMap<String, String>) -> String {
    headers.keys().cloned().collect::<Vec<_>>().join(";")
}

fn credential_scope(region: &str, now: DateTime<Utc>) -> String {
    format!("{}/{}/{}/aws4_request", short_date(now), region, SERVICE)
}

fn signature(key: SigningKey<'_>, canonical_request: &str, scope: &str, now: DateTime<Utc>) -> String {
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date(now),
        scope,
        sha256_hex(canonical_request.as_bytes())
    );
    let signing_key = derive_signing_key(key.secret_access_key, &short_date(now), key.region);
    hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()))
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length ok");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
