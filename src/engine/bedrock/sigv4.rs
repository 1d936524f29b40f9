//! AWS Signature Version 4 request signing
//!
//! Self-contained signer for the Bedrock data and control planes. Signing
//! happens after every other header mutation: the caller reduces the header
//! set first, then the signer derives the canonical request from exactly
//! what will go on the wire. The payload hash placed in
//! `x-amz-content-sha256` is computed over the buffered body bytes, so any
//! body rewrite must precede signing.

use std::env;

use axum::http::header::HeaderValue;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::super::ProxyRequest;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty string, used for body-less requests.
pub const EMPTY_PAYLOAD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Static AWS credential material resolved from the ambient chain.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Environment leg of the credential chain.
    pub fn from_env() -> Option<Self> {
        let access_key_id = env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        if access_key_id.trim().is_empty() || secret_access_key.trim().is_empty() {
            return None;
        }
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: env::var("AWS_SESSION_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }
}

/// Scope and time of one signature.
pub struct SigningParams<'a> {
    pub credentials: &'a AwsCredentials,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

/// Sign the request in place.
///
/// Injects `x-amz-date`, `x-amz-content-sha256`, `x-amz-security-token`
/// (when a session token is present) and `authorization`. The signed header
/// set is the injected headers plus `host` and any `content-type` already
/// on the request.
pub fn sign_request(req: &mut ProxyRequest, params: &SigningParams<'_>) {
    let payload_hash = if req.body.is_empty() {
        EMPTY_PAYLOAD_HASH.to_string()
    } else {
        hex_sha256(&req.body)
    };

    let amz_date = params.time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = params.time.format("%Y%m%d").to_string();

    if let Ok(v) = HeaderValue::from_str(&amz_date) {
        req.headers.insert("x-amz-date", v);
    }
    if let Ok(v) = HeaderValue::from_str(&payload_hash) {
        req.headers.insert("x-amz-content-sha256", v);
    }
    if let Some(token) = &params.credentials.session_token {
        if let Ok(v) = HeaderValue::from_str(token) {
            req.headers.insert("x-amz-security-token", v);
        }
    }

    let host = canonical_host(&req.url);
    let mut to_sign: Vec<(String, String)> = vec![("host".to_string(), host)];
    for name in ["content-type", "x-amz-content-sha256", "x-amz-date", "x-amz-security-token"] {
        if let Some(value) = req.headers.get(name) {
            if let Ok(v) = value.to_str() {
                to_sign.push((name.to_string(), v.trim().to_string()));
            }
        }
    }
    to_sign.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical = canonical_request(
        req.method.as_str(),
        req.url.path(),
        req.url.query().unwrap_or(""),
        &to_sign,
        &payload_hash,
    );

    let scope = format!("{date}/{}/{}/aws4_request", params.region, params.service);
    let sts = string_to_sign(&amz_date, &scope, &canonical);
    let key = derive_signing_key(
        &params.credentials.secret_access_key,
        &date,
        params.region,
        params.service,
    );
    let signature = hex::encode(hmac_sha256(&key, sts.as_bytes()));

    let signed_headers: Vec<&str> = to_sign.iter().map(|(n, _)| n.as_str()).collect();
    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
        params.credentials.access_key_id,
        signed_headers.join(";"),
    );
    if let Ok(v) = HeaderValue::from_str(&authorization) {
        req.headers.insert("authorization", v);
    }
}

/// Host component as it appears in the signed `Host` header.
fn canonical_host(url: &url::Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{h}:{p}"),
        (Some(h), None) => h.to_string(),
        _ => String::new(),
    }
}

/// Canonical request assembly. `headers` must be lowercase-named, trimmed
/// and sorted.
pub fn canonical_request(
    method: &str,
    path: &str,
    query: &str,
    headers: &[(String, String)],
    payload_hash: &str,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(n, v)| format!("{n}:{v}\n"))
        .collect();
    let signed_headers: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();

    format!(
        "{method}\n{}\n{}\n{canonical_headers}\n{}\n{payload_hash}",
        canonical_uri(path),
        canonical_query(query),
        signed_headers.join(";"),
    )
}

pub fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    )
}

/// Four-step HMAC key derivation: date, region, service, terminator.
pub fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> [u8; 32] {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// URI-encode the path, keeping `/` separators. AWS canonicalizes every
/// other non-unreserved byte, including `:` in Bedrock model ids.
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    uri_encode(path, true)
}

/// Sorted, strictly-encoded query string.
fn canonical_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let (k, v) = p.split_once('=').unwrap_or((p, ""));
            (uri_encode(k, false), uri_encode(v, false))
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use bytes::Bytes;
    use chrono::TimeZone;

    // Reference values from the AWS SigV4 documentation example
    // (GET iam.amazonaws.com/?Action=ListUsers&Version=2010-05-08).
    const DOC_SECRET: &str = "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY";

    #[test]
    fn signing_key_matches_documented_vector() {
        let key = derive_signing_key(DOC_SECRET, "20150830", "us-east-1", "iam");
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn signature_matches_documented_vector() {
        let headers = vec![
            (
                "content-type".to_string(),
                "application/x-www-form-urlencoded; charset=utf-8".to_string(),
            ),
            ("host".to_string(), "iam.amazonaws.com".to_string()),
            ("x-amz-date".to_string(), "20150830T123600Z".to_string()),
        ];
        let canonical = canonical_request(
            "GET",
            "/",
            "Action=ListUsers&Version=2010-05-08",
            &headers,
            EMPTY_PAYLOAD_HASH,
        );
        assert_eq!(
            hex_sha256(canonical.as_bytes()),
            "f536975d06c0309214f805bb90ccff089219ecd68b2577efef23edd43b7e1a59"
        );

        let sts = string_to_sign(
            "20150830T123600Z",
            "20150830/us-east-1/iam/aws4_request",
            &canonical,
        );
        let key = derive_signing_key(DOC_SECRET, "20150830", "us-east-1", "iam");
        assert_eq!(
            hex::encode(hmac_sha256(&key, sts.as_bytes())),
            "5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
    }

    #[test]
    fn sign_request_hashes_exact_body_bytes() {
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: DOC_SECRET.to_string(),
            session_token: None,
        };
        let body = Bytes::from_static(b"{\"messages\":[]}");
        let mut req = ProxyRequest {
            method: Method::POST,
            url: url::Url::parse(
                "https://bedrock-runtime.us-east-1.amazonaws.com/model/m/converse",
            )
            .unwrap(),
            headers: HeaderMap::new(),
            body: body.clone(),
            guard: None,
        };
        req.headers
            .insert("content-type", HeaderValue::from_static("application/json"));

        let params = SigningParams {
            credentials: &creds,
            region: "us-east-1",
            service: "bedrock",
            time: Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap(),
        };
        sign_request(&mut req, &params);

        let expected = hex::encode(Sha256::digest(&body));
        assert_eq!(
            req.headers.get("x-amz-content-sha256").unwrap().to_str().unwrap(),
            expected
        );
        assert_eq!(
            req.headers.get("x-amz-date").unwrap().to_str().unwrap(),
            "20240701T120000Z"
        );
        let auth = req.headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240701/us-east-1/bedrock/aws4_request"));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date"));
        assert!(auth.contains("Signature="));
    }

    #[test]
    fn empty_body_uses_well_known_hash() {
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: DOC_SECRET.to_string(),
            session_token: None,
        };
        let mut req = ProxyRequest {
            method: Method::GET,
            url: url::Url::parse("https://bedrock.us-east-1.amazonaws.com/foundation-models")
                .unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            guard: None,
        };
        let params = SigningParams {
            credentials: &creds,
            region: "us-east-1",
            service: "bedrock",
            time: Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap(),
        };
        sign_request(&mut req, &params);
        assert_eq!(
            req.headers.get("x-amz-content-sha256").unwrap().to_str().unwrap(),
            EMPTY_PAYLOAD_HASH
        );
    }

    #[test]
    fn session_token_is_signed_when_present() {
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: DOC_SECRET.to_string(),
            session_token: Some("the-token".to_string()),
        };
        let mut req = ProxyRequest {
            method: Method::GET,
            url: url::Url::parse("https://bedrock.us-east-1.amazonaws.com/foundation-models")
                .unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            guard: None,
        };
        let params = SigningParams {
            credentials: &creds,
            region: "us-east-1",
            service: "bedrock",
            time: Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap(),
        };
        sign_request(&mut req, &params);
        assert_eq!(
            req.headers.get("x-amz-security-token").unwrap().to_str().unwrap(),
            "the-token"
        );
        let auth = req.headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.contains("x-amz-security-token"));
    }

    #[test]
    fn canonical_uri_encodes_model_id_colon() {
        assert_eq!(
            canonical_uri("/model/anthropic.claude-3-haiku-20240307-v1:0/converse"),
            "/model/anthropic.claude-3-haiku-20240307-v1%3A0/converse"
        );
    }

    #[test]
    fn canonical_query_sorts_pairs() {
        assert_eq!(canonical_query("b=2&a=1"), "a=1&b=2");
        assert_eq!(canonical_query(""), "");
    }
}
