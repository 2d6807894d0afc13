//! Document retrieval: download a bill from a URL and work out its media type.
//!
//! One GET, one bounded timeout, no retries. The media type the vision model
//! sees is chosen in priority order:
//!
//! 1. the response `content-type` header,
//! 2. the suffix of the URL *path* (query strings on signed URLs are ignored),
//! 3. the magic bytes at the start of the body,
//! 4. `image/png`.

use crate::error::BillError;
use image::ImageFormat;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Media types the extraction call accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Png,
    Jpeg,
    Pdf,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Pdf => "application/pdf",
        }
    }

    /// Match a `content-type` header value (parameters such as `charset` allowed).
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("image/png") {
            Some(MediaType::Png)
        } else if ct.contains("image/jpeg") || ct.contains("image/jpg") {
            Some(MediaType::Jpeg)
        } else if ct.contains("application/pdf") {
            Some(MediaType::Pdf)
        } else {
            None
        }
    }

    /// Match a file name or path by extension.
    pub fn from_suffix(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".png") {
            Some(MediaType::Png)
        } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            Some(MediaType::Jpeg)
        } else if lower.ends_with(".pdf") {
            Some(MediaType::Pdf)
        } else {
            None
        }
    }

    /// Match the leading magic bytes of a document.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            return Some(MediaType::Pdf);
        }
        match image::guess_format(bytes) {
            Ok(ImageFormat::Png) => Some(MediaType::Png),
            Ok(ImageFormat::Jpeg) => Some(MediaType::Jpeg),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved document, ready for the extraction call.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub media_type: MediaType,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Pick the media type for a downloaded document.
pub fn infer_media_type(content_type: Option<&str>, url: &str, bytes: &[u8]) -> MediaType {
    content_type
        .and_then(MediaType::from_content_type)
        .or_else(|| url_path(url).and_then(|p| MediaType::from_suffix(&p)))
        .or_else(|| MediaType::sniff(bytes))
        .unwrap_or_default()
}

/// The path component of a URL, falling back to the raw string when it
/// does not parse.
fn url_path(url: &str) -> Option<String> {
    match reqwest::Url::parse(url) {
        Ok(parsed) => Some(parsed.path().to_string()),
        Err(_) => Some(url.split(['?', '#']).next()?.to_string()),
    }
}

/// Downloads bill documents over HTTP.
///
/// Holds one `reqwest::Client` for the life of the process so connection
/// pools are shared across requests.
#[derive(Debug, Clone)]
pub struct DocumentFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl DocumentFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, BillError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BillError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    /// Download `url` and infer its media type.
    pub async fn fetch(&self, url: &str) -> Result<FetchedDocument, BillError> {
        if !is_url(url) {
            return Err(BillError::DownloadFailed {
                url: url.to_string(),
                reason: "only http:// and https:// URLs are supported".into(),
            });
        }
        info!("Downloading document from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BillError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {status} for url ({url})"),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let media_type = infer_media_type(content_type.as_deref(), url, &bytes);
        debug!(
            "Downloaded {} bytes (content-type {:?}) → {}",
            bytes.len(),
            content_type,
            media_type
        );

        Ok(FetchedDocument {
            bytes: bytes.to_vec(),
            media_type,
        })
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> BillError {
        if e.is_timeout() {
            BillError::DownloadTimeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            BillError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// Read a bill from the local file system.
pub async fn read_local(path: impl AsRef<Path>) -> Result<FetchedDocument, BillError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        let reason = match e.kind() {
            std::io::ErrorKind::NotFound => "file not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
            _ => e.to_string(),
        };
        BillError::DownloadFailed {
            url: path.display().to_string(),
            reason: format!("{reason}: '{}'", path.display()),
        }
    })?;

    let media_type = MediaType::from_suffix(&path.to_string_lossy())
        .or_else(|| MediaType::sniff(&bytes))
        .unwrap_or_default();
    debug!("Read {} bytes from {} → {}", bytes.len(), path.display(), media_type);

    Ok(FetchedDocument { bytes, media_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff\xe0\0\x10JFIF\0";

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/bill.png"));
        assert!(is_url("http://example.com/bill.png"));
        assert!(!is_url("/tmp/bill.png"));
        assert!(!is_url("ftp://example.com/bill.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn header_wins_over_suffix() {
        let mt = infer_media_type(Some("image/jpeg"), "https://x.test/bill.png", b"");
        assert_eq!(mt, MediaType::Jpeg);
    }

    #[test]
    fn header_with_parameters() {
        let mt = infer_media_type(Some("application/pdf; qs=0.001"), "https://x.test/a", b"");
        assert_eq!(mt, MediaType::Pdf);
    }

    #[test]
    fn suffix_used_when_header_is_generic() {
        let mt = infer_media_type(
            Some("application/octet-stream"),
            "https://x.test/scan.JPEG",
            b"",
        );
        assert_eq!(mt, MediaType::Jpeg);
    }

    #[test]
    fn suffix_ignores_query_string() {
        let mt = infer_media_type(
            None,
            "https://blob.test/assets/sample_2.pdf?sv=2025-07-05&sig=abc%3D",
            b"",
        );
        assert_eq!(mt, MediaType::Pdf);
    }

    #[test]
    fn magic_bytes_before_default() {
        assert_eq!(
            infer_media_type(None, "https://x.test/download", JPEG_MAGIC),
            MediaType::Jpeg
        );
        assert_eq!(
            infer_media_type(None, "https://x.test/download", b"%PDF-1.7\n"),
            MediaType::Pdf
        );
        assert_eq!(
            infer_media_type(None, "https://x.test/download", PNG_MAGIC),
            MediaType::Png
        );
    }

    #[test]
    fn defaults_to_png() {
        assert_eq!(
            infer_media_type(None, "https://x.test/download", b"plain text"),
            MediaType::Png
        );
        assert_eq!(infer_media_type(Some("text/html"), "not a url", b""), MediaType::Png);
    }

    #[test]
    fn media_type_labels() {
        assert_eq!(MediaType::Png.to_string(), "image/png");
        assert_eq!(MediaType::Jpeg.as_str(), "image/jpeg");
        assert_eq!(MediaType::Pdf.as_str(), "application/pdf");
        assert_eq!(MediaType::from_content_type("IMAGE/JPG"), Some(MediaType::Jpeg));
    }

    #[tokio::test]
    async fn non_http_url_is_a_download_error() {
        let fetcher = DocumentFetcher::new(5).unwrap();
        let err = fetcher.fetch("file:///etc/passwd").await.unwrap_err();
        assert!(err.is_download());
        assert!(err.to_string().contains("http://"));
    }

    #[tokio::test]
    async fn read_local_missing_file() {
        let err = read_local("/definitely/not/a/real/bill.png").await.unwrap_err();
        assert!(err.is_download());
        assert!(err.to_string().contains("file not found"), "got: {err}");
    }

    #[tokio::test]
    async fn read_local_sniffs_extensionless_file() {
        let dir = std::env::temp_dir().join(format!("bill2json-fetch-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("scan");
        tokio::fs::write(&path, JPEG_MAGIC).await.unwrap();

        let doc = read_local(&path).await.unwrap();
        assert_eq!(doc.media_type, MediaType::Jpeg);
        assert_eq!(doc.bytes, JPEG_MAGIC);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
