//! Input handling: upload validation, and loading a document for the CLI.
//!
//! Submissions arrive as `(filename, bytes)`. [`validate_upload`] rejects
//! anything that is not a PDF before a task record is created. The CLI
//! additionally accepts a local path or an HTTP(S) URL; [`load_document`]
//! turns either into the same `(filename, bytes)` pair.

use crate::error::TaskError;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// A document ready for submission.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Accept only `.pdf` files whose content starts with `%PDF`.
pub fn validate_upload(filename: &str, bytes: &[u8]) -> Result<(), TaskError> {
    let reject = |reason: &str| TaskError::InvalidUpload {
        filename: filename.to_string(),
        reason: reason.to_string(),
    };

    let is_pdf_name = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if !is_pdf_name {
        return Err(reject("only .pdf files are accepted"));
    }
    if bytes.is_empty() {
        return Err(reject("file is empty"));
    }
    if !bytes.starts_with(b"%PDF") {
        return Err(reject("content is not a PDF (missing %PDF header)"));
    }
    Ok(())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local path or download a URL.
pub async fn load_document(input: &str, timeout: Duration) -> Result<LoadedDocument, TaskError> {
    if is_url(input) {
        download_url(input, timeout).await
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<LoadedDocument, TaskError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TaskError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => TaskError::Internal(format!("Cannot read '{}': {}", path.display(), e)),
    })?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf")
        .to_string();
    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(LoadedDocument { filename, bytes })
}

async fn download_url(url: &str, timeout: Duration) -> Result<LoadedDocument, TaskError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| TaskError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {}s", timeout.as_secs()))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());

    Ok(LoadedDocument {
        filename: filename_from_url(url),
        bytes: bytes.to_vec(),
    })
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn accepts_pdf_upload() {
        assert!(validate_upload("report.PDF", b"%PDF-1.7\n...").is_ok());
    }

    #[test]
    fn rejects_wrong_extension_and_content() {
        for (name, bytes) in [
            ("report.docx", &b"%PDF-1.7"[..]),
            ("report", &b"%PDF-1.7"[..]),
            ("report.pdf", &b""[..]),
            ("report.pdf", &b"PK\x03\x04"[..]),
        ] {
            assert!(
                matches!(validate_upload(name, bytes), Err(TaskError::InvalidUpload { .. })),
                "{name}"
            );
        }
    }

    #[test]
    fn filename_from_url_falls_back() {
        assert_eq!(filename_from_url("https://x.io/files/paper.pdf"), "paper.pdf");
        assert_eq!(filename_from_url("https://x.io/download"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn missing_local_file() {
        let err = load_document("/nonexistent/doc.pdf", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn reads_local_file_name_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4 body").unwrap();
        let doc = load_document(path.to_str().unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(doc.filename, "scan.pdf");
        assert!(doc.bytes.starts_with(b"%PDF"));
    }
}
