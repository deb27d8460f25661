//! PDF rasterisation: one image file per page, in page order.
//!
//! The OCR stage only needs page images on disk, so rasterisers write into a
//! scoped [`TempDir`] owned by the returned [`RasterizedDocument`]; the files
//! disappear when the document is dropped.
//!
//! Two backends:
//!
//! * [`PdfiumRasterizer`] renders in-process through `pdfium-render`.
//! * [`PdftoppmRasterizer`] shells out to poppler's `pdftoppm -png`.
//!
//! ## Why spawn_blocking?
//!
//! pdfium keeps thread-local state and rendering is CPU-heavy. Running it on
//! the blocking pool keeps the tokio workers free for network calls of other
//! tasks.

use crate::error::TaskError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

/// One rasterised page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 0-indexed page number.
    pub index: usize,
    pub path: PathBuf,
}

/// Ordered page images plus the directory that holds them.
#[derive(Debug)]
pub struct RasterizedDocument {
    pub pages: Vec<PageImage>,
    // Kept alive so the page files outlive OCR.
    _workdir: Option<TempDir>,
}

impl RasterizedDocument {
    /// Pages whose files are owned elsewhere.
    pub fn new(pages: Vec<PageImage>) -> Self {
        Self {
            pages,
            _workdir: None,
        }
    }

    /// Pages living in `workdir`, removed on drop.
    pub fn in_dir(pages: Vec<PageImage>, workdir: TempDir) -> Self {
        Self {
            pages,
            _workdir: Some(workdir),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Turns PDF bytes into ordered page images.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn rasterize(&self, pdf: &[u8]) -> Result<RasterizedDocument, TaskError>;
}

fn workdir() -> Result<TempDir, TaskError> {
    tempfile::Builder::new()
        .prefix("transflate-pages-")
        .tempdir()
        .map_err(|e| TaskError::Internal(format!("Cannot create page directory: {e}")))
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// In-process renderer backed by the pdfium library.
///
/// The library is looked up in `library_dir` if set, else in the directory
/// named by `PDFIUM_LIB_PATH`, else on the system library path.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    /// Longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,
    pub library_dir: Option<PathBuf>,
}

impl Default for PdfiumRasterizer {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            library_dir: None,
        }
    }
}

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(dir.into());
        self
    }

    pub fn with_max_rendered_pixels(mut self, px: u32) -> Self {
        self.max_rendered_pixels = px.max(100);
        self
    }
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf: &[u8]) -> Result<RasterizedDocument, TaskError> {
        let bytes = pdf.to_vec();
        let max_pixels = self.max_rendered_pixels;
        let library_dir = self
            .library_dir
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        tokio::task::spawn_blocking(move || {
            render_blocking(&bytes, max_pixels, library_dir.as_deref())
        })
        .await
        .map_err(|e| TaskError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn bind_pdfium(library_dir: Option<&Path>) -> Result<Pdfium, TaskError> {
    let bindings = match library_dir {
        Some(dir) => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| TaskError::RasterizerUnavailable(format!("pdfium: {:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn render_blocking(
    pdf: &[u8],
    max_pixels: u32,
    library_dir: Option<&Path>,
) -> Result<RasterizedDocument, TaskError> {
    let pdfium = bind_pdfium(library_dir)?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| TaskError::CorruptPdf {
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(TaskError::NoPages);
    }
    info!("PDF loaded: {} pages", total_pages);

    let dir = workdir()?;
    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let failed = |detail: String| TaskError::RasterisationFailed {
            page: idx + 1,
            detail,
        };
        let page = pages
            .get(idx as u16)
            .map_err(|e| failed(format!("{:?}", e)))?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{:?}", e)))?;

        let image = bitmap.as_image();
        let path = dir.path().join(format!("page-{:04}.png", idx + 1));
        image
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| failed(e.to_string()))?;
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        images.push(PageImage { index: idx, path });
    }

    Ok(RasterizedDocument::in_dir(images, dir))
}

// ── pdftoppm ─────────────────────────────────────────────────────────────

/// Renderer that runs poppler's `pdftoppm` binary.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    pub binary: PathBuf,
    /// Render resolution. Default: 150.
    pub dpi: u32,
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftoppm"),
            dpi: 150,
        }
    }
}

impl PdftoppmRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi.clamp(72, 600);
        self
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn rasterize(&self, pdf: &[u8]) -> Result<RasterizedDocument, TaskError> {
        let dir = workdir()?;
        let input = dir.path().join("input.pdf");
        tokio::fs::write(&input, pdf)
            .await
            .map_err(|e| TaskError::Internal(format!("Failed to write temp PDF: {}", e)))?;

        let output = Command::new(&self.binary)
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(&input)
            .arg(dir.path().join("page"))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                TaskError::RasterizerUnavailable(format!("{}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            return Err(TaskError::CorruptPdf {
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path())
            .await
            .map_err(|e| TaskError::Internal(format!("Cannot list page directory: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TaskError::Internal(format!("Cannot list page directory: {}", e)))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "png") {
                files.push(path);
            }
        }

        let pages = order_page_files(files);
        if pages.is_empty() {
            return Err(TaskError::NoPages);
        }
        info!("pdftoppm produced {} pages", pages.len());
        Ok(RasterizedDocument::in_dir(pages, dir))
    }
}

static RE_PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Page number embedded in a generated file name (`page-07.png` → 7).
fn page_number(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    RE_PAGE_NUMBER
        .find_iter(stem)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

/// Sort generated files by their embedded page number, not lexically, since
/// `pdftoppm` pads numbers to the width of the page count.
fn order_page_files(mut files: Vec<PathBuf>) -> Vec<PageImage> {
    files.retain(|p| page_number(p).is_some());
    files.sort_by_key(|p| page_number(p).unwrap_or(usize::MAX));
    files
        .into_iter()
        .enumerate()
        .map(|(index, path)| PageImage { index, path })
        .collect()
}
