//! Page image file → base64 PNG wrapped in `ImageData` for vision OCR.
//!
//! Rasterisers leave one image file per page on disk. The vision engine
//! re-encodes it as PNG so the request is lossless regardless of what the
//! rasteriser wrote, and asks for `detail: "high"` so fine print survives
//! the provider's tiling.

use crate::error::OcrError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Encode an in-memory image as a base64 PNG.
pub fn encode_image(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Fail with `MissingImage` unless `path` is a regular file.
pub(crate) async fn require_page_file(path: &Path) -> Result<(), OcrError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(OcrError::MissingImage {
            path: path.to_path_buf(),
        }),
    }
}

/// Load a page image from disk and encode it.
///
/// Decoding is CPU-bound, so it runs on the blocking pool.
pub async fn encode_page_file(path: &Path) -> Result<ImageData, OcrError> {
    require_page_file(path).await?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let img = image::open(&path)
            .map_err(|e| OcrError::Engine(format!("cannot decode '{}': {e}", path.display())))?;
        encode_image(&img).map_err(|e| OcrError::Engine(format!("PNG encode failed: {e}")))
    })
    .await
    .map_err(|e| OcrError::Engine(format!("encode task failed: {e}")))?
}
