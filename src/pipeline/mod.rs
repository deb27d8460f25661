//! Pipeline stages for PDF translation.
//!
//! Each submodule implements one step, so each is testable alone and a
//! backend (renderer, OCR engine, translator, storage) can be swapped
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ ocr ──▶ text ──▶ translate ──▶ publish
//! (bytes)   (pages)    (text)  (chunks) (LLM)         (link)
//! ```
//!
//! 1. [`input`]: validate uploads; load a path or URL for the CLI
//! 2. [`render`]: rasterise pages to image files (pdfium or pdftoppm)
//! 3. [`ocr`]: pooled OCR engines over a bounded worker pool
//! 4. [`text`]: merge, clean, chunk, and derive per-chunk context
//! 5. [`translate`]: concurrent chunk translation, re-assembled by index
//! 6. [`publish`]: store the result and return a download link
//!
//! [`encode`] turns page image files into the base64 payload the vision OCR
//! engine sends.

pub mod encode;
pub mod input;
pub mod ocr;
pub mod publish;
pub mod render;
pub mod text;
pub mod translate;
