//! Image resolution: turn a stored image reference into raw bytes.
//!
//! Sessions hold references, not pixels. A reference is one of:
//!
//! * an `http://` / `https://` URL (object storage) — downloaded with a timeout
//! * a `data:image/…;base64,…` URL (inline upload) — decoded in place
//! * anything else — read as a local file path (CLI use)
//!
//! Every failure is a [`ModelError::Image`]: the page is dropped, the run
//! continues.

use crate::error::ModelError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::{debug, info};

/// Raw image bytes plus the MIME type declared by their source, if any.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub bytes: Vec<u8>,
    pub declared_mime: Option<String>,
}

/// Check if the reference looks like a URL.
pub fn is_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Check if the reference is an inline data URL.
pub fn is_data_url(reference: &str) -> bool {
    reference.starts_with("data:")
}

/// Resolve the reference to bytes.
pub async fn resolve_image(
    reference: &str,
    timeout_secs: u64,
) -> Result<ResolvedImage, ModelError> {
    let reference = reference.trim();
    if is_url(reference) {
        download_url(reference, timeout_secs).await
    } else if is_data_url(reference) {
        decode_data_url(reference)
    } else {
        read_local(reference).await
    }
}

fn image_error(reference: &str, detail: impl Into<String>) -> ModelError {
    ModelError::Image {
        reference: short_ref(reference),
        detail: detail.into(),
    }
}

/// Data URLs can be megabytes long; keep error messages readable.
fn short_ref(reference: &str) -> String {
    if reference.chars().count() > 80 {
        let head: String = reference.chars().take(79).collect();
        format!("{head}\u{2026}")
    } else {
        reference.to_string()
    }
}

/// Decode `data:image/png;base64,AAAA`.
fn decode_data_url(reference: &str) -> Result<ResolvedImage, ModelError> {
    let rest = &reference["data:".len()..];
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| image_error(reference, "malformed data URL"))?;
    let mime = header.split(';').next().unwrap_or_default();
    if !mime.starts_with("image/") {
        return Err(image_error(reference, format!("unsupported media type '{mime}'")));
    }
    if !header.ends_with(";base64") {
        return Err(image_error(reference, "data URL is not base64-encoded"));
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| image_error(reference, format!("invalid base64: {e}")))?;
    debug!("Decoded inline image: {} bytes ({})", bytes.len(), mime);
    Ok(ResolvedImage {
        bytes,
        declared_mime: Some(mime.to_string()),
    })
}

async fn read_local(reference: &str) -> Result<ResolvedImage, ModelError> {
    let path = Path::new(reference);
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => image_error(reference, "file not found"),
        std::io::ErrorKind::PermissionDenied => image_error(reference, "permission denied"),
        _ => image_error(reference, e.to_string()),
    })?;
    debug!("Read local image {}: {} bytes", path.display(), bytes.len());
    Ok(ResolvedImage {
        bytes,
        declared_mime: None,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedImage, ModelError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| image_error(url, e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            image_error(url, format!("download timed out after {timeout_secs}s"))
        } else {
            image_error(url, e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(image_error(url, format!("HTTP {}", response.status())));
    }

    let declared_mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|m| m.starts_with("image/"));

    let bytes = response
        .bytes()
        .await
        .map_err(|e| image_error(url, e.to_string()))?;

    debug!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(ResolvedImage {
        bytes: bytes.to_vec(),
        declared_mime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://res.example.com/notes/1.jpg"));
        assert!(is_url("http://example.com/1.png"));
        assert!(!is_url("/tmp/1.png"));
        assert!(!is_url("data:image/png;base64,AA=="));
        assert!(!is_url(""));
    }

    #[test]
    fn decode_valid_data_url() {
        let b64 = STANDARD.encode([1u8, 2, 3]);
        let img = decode_data_url(&format!("data:image/jpeg;base64,{b64}")).unwrap();
        assert_eq!(img.bytes, vec![1, 2, 3]);
        assert_eq!(img.declared_mime.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn reject_non_image_data_url() {
        let err = decode_data_url("data:text/plain;base64,aGk=").unwrap_err();
        assert!(matches!(err, ModelError::Image { .. }));
    }

    #[test]
    fn reject_malformed_data_url() {
        assert!(decode_data_url("data:image/png;base64").is_err());
        assert!(decode_data_url("data:image/png,rawbytes").is_err());
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn long_references_are_shortened() {
        let long = format!("data:image/png;base64,{}", "A".repeat(500));
        let s = short_ref(&long);
        assert_eq!(s.chars().count(), 80);
        assert!(s.ends_with('\u{2026}'));
    }

    #[tokio::test]
    async fn missing_local_file_is_image_error() {
        let err = resolve_image("/definitely/not/here.jpg", 5).await.unwrap_err();
        match err {
            ModelError::Image { detail, .. } => assert_eq!(detail, "file not found"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        std::fs::write(&path, [9u8, 8, 7]).unwrap();
        let img = resolve_image(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(img.bytes, vec![9, 8, 7]);
        assert!(img.declared_mime.is_none());
    }
}
