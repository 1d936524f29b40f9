//! Image-part resolution for translation targets
//!
//! Providers that take inline image bytes need `image_url` parts fetched
//! (or `data:` URIs decoded) and base64-encoded. A failed fetch drops the
//! part rather than failing the whole request.

use std::time::Duration;

use base64::Engine as _;

use crate::engine::EngineError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const FALLBACK_MIME: &str = "image/jpeg";

/// Resolved image content ready for provider attachment.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub mime_type: String,
    pub base64_data: String,
}

impl FetchedImage {
    /// Provider-facing short format (`jpeg`, `png`, ...) derived from the
    /// MIME type.
    pub fn format(&self) -> String {
        match self.mime_type.strip_prefix("image/") {
            Some(sub) if !sub.is_empty() => sub.to_string(),
            _ => "jpeg".to_string(),
        }
    }
}

/// Resolve an `image_url` part: decode `data:` URIs in place, fetch remote
/// URLs over HTTPS with a 30 s budget.
pub async fn resolve_image_url(
    http: &reqwest::Client,
    url: &str,
) -> Result<FetchedImage, EngineError> {
    if let Some(rest) = url.strip_prefix("data:") {
        return decode_data_uri(rest);
    }

    let resp = http
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| EngineError::Translation(format!("image fetch failed for {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(EngineError::Translation(format!(
            "image fetch for {url} returned status {}",
            resp.status()
        )));
    }

    let header_mime = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
        .filter(|v| !v.is_empty() && v != "application/octet-stream");

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| EngineError::Translation(format!("image read failed for {url}: {e}")))?;

    let mime_type = header_mime.unwrap_or_else(|| mime_from_extension(url));
    Ok(FetchedImage {
        mime_type,
        base64_data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    })
}

fn decode_data_uri(rest: &str) -> Result<FetchedImage, EngineError> {
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| EngineError::Translation("invalid data URI: missing comma".to_string()))?;

    let mime_type = header
        .split(';')
        .next()
        .filter(|m| m.contains('/'))
        .unwrap_or(FALLBACK_MIME)
        .to_string();

    if !header.contains(";base64") {
        return Err(EngineError::Translation(
            "data URI without base64 payload".to_string(),
        ));
    }

    Ok(FetchedImage {
        mime_type,
        base64_data: data.to_string(),
    })
}

/// MIME guess from a URL's file extension, query string stripped.
fn mime_from_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => FALLBACK_MIME,
    }
    .to_string()
}
