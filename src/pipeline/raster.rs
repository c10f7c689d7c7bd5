use std::io::Cursor;
use std::path::PathBuf;

use image::{GenericImageView, ImageOutputFormat};
use pdfium_render::prelude::*;
use tracing::debug;

use super::types::{PageImage, PdfRasterizer};
use super::PipelineError;

/// Hard ceiling on either rendered dimension. Keeps a malformed page box
/// from turning into a multi-gigabyte bitmap.
const MAX_DIMENSION_PX: u32 = 4096;

/// PDF user space points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// PDFium-backed page renderer.
///
/// Stateless: PDFium handles are not `Send`, so every call binds the
/// library fresh instead of holding a handle across threads. The binding
/// itself is a cheap dlopen lookup once the library is resident.
pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    /// Probes for a usable PDFium library so a missing install fails at
    /// startup rather than on the first upload.
    pub fn new() -> Result<Self, PipelineError> {
        load_pdfium()?;
        Ok(Self)
    }
}

impl PdfRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<PageImage>, PipelineError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;

        let page_count = document.pages().len();
        if page_count == 0 {
            return Err(PipelineError::EmptyDocument);
        }

        let mut pages = Vec::with_capacity(page_count as usize);
        for index in 0..page_count {
            let page = document.pages().get(index).map_err(|e| {
                PipelineError::PdfRender(format!("failed to open page {index}: {e:?}"))
            })?;

            let (target_w, target_h) =
                compute_render_dimensions(page.width().value, page.height().value, dpi);
            let config = PdfRenderConfig::new()
                .set_target_width(target_w as i32)
                .set_maximum_height(target_h as i32);

            let bitmap = page.render_with_config(&config).map_err(|e| {
                PipelineError::PdfRender(format!("failed to render page {index}: {e:?}"))
            })?;
            let rendered = bitmap.as_image();
            let (width, height) = rendered.dimensions();

            let mut cursor = Cursor::new(Vec::new());
            rendered
                .write_to(&mut cursor, ImageOutputFormat::Png)
                .map_err(|e| {
                    PipelineError::PdfRender(format!("failed to encode page {index}: {e}"))
                })?;

            debug!(page = index, width, height, dpi, "Rendered PDF page");

            pages.push(PageImage {
                page_number: index as usize,
                png_bytes: cursor.into_inner(),
                width,
                height,
            });
        }

        Ok(pages)
    }

    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, PipelineError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;
        Ok(document.pages().len() as usize)
    }
}

/// Locate and bind the PDFium dynamic library.
///
/// Resolution order: `PDFIUM_DYNAMIC_LIB_PATH` (a directory), then the
/// executable's own directory and its `lib/` subdirectory, then the
/// system library path.
fn load_pdfium() -> Result<Pdfium, PipelineError> {
    if let Ok(dir) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        let bindings =
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)).map_err(
                |e| {
                    PipelineError::PdfEngineUnavailable(format!(
                        "failed to load PDFium from PDFIUM_DYNAMIC_LIB_PATH={dir}: {e:?}"
                    ))
                },
            )?;
        return Ok(Pdfium::new(bindings));
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.to_path_buf());
            candidates.push(dir.join("lib"));
        }
    }

    for dir in &candidates {
        if let Ok(bindings) =
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
        {
            debug!(dir = %dir.display(), "Loaded PDFium from application directory");
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library().map(Pdfium::new).map_err(|e| {
        PipelineError::PdfEngineUnavailable(format!(
            "no PDFium library found: {e:?}. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium"
        ))
    })
}

/// Encrypted PDFs are reported as unsupported rather than corrupt so the
/// reply can ask for an unprotected copy.
fn map_load_error(err: PdfiumError) -> PipelineError {
    let msg = format!("{err:?}");
    let lowered = msg.to_lowercase();
    if lowered.contains("password") || lowered.contains("encrypt") {
        PipelineError::UnsupportedDocument("password-protected PDF".to_string())
    } else {
        PipelineError::UnsupportedDocument(format!("not a readable PDF ({msg})"))
    }
}

/// Page size in pixels for a page box at the requested DPI, aspect ratio
/// preserved, both dimensions clamped to [1, MAX_DIMENSION_PX].
fn compute_render_dimensions(width_pts: f32, height_pts: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let mut w = (width_pts * scale).round().max(1.0);
    let mut h = (height_pts * scale).round().max(1.0);

    let largest = w.max(h);
    if largest > MAX_DIMENSION_PX as f32 {
        let shrink = MAX_DIMENSION_PX as f32 / largest;
        w = (w * shrink).round().max(1.0);
        h = (h * shrink).round().max(1.0);
    }

    (w as u32, h as u32)
}

/// Test double that renders `page_count` single-pixel pages.
pub struct MockPdfRasterizer {
    pub page_count: usize,
}

impl PdfRasterizer for MockPdfRasterizer {
    fn rasterize(&self, _pdf_bytes: &[u8], _dpi: u32) -> Result<Vec<PageImage>, PipelineError> {
        if self.page_count == 0 {
            return Err(PipelineError::EmptyDocument);
        }
        Ok((0..self.page_count)
            .map(|page_number| PageImage {
                page_number,
                png_bytes: minimal_png(),
                width: 1,
                height: 1,
            })
            .collect())
    }

    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, PipelineError> {
        Ok(self.page_count)
    }
}

/// Smallest valid PNG: one white RGB pixel. Enough for mocks and for
/// exercising decode paths without fixture files.
pub fn minimal_png() -> Vec<u8> {
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
        0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1
        0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, // 8-bit RGB
        0xDE, // IHDR CRC
        0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, // IDAT chunk
        0x08, 0xD7, 0x63, 0xF8, 0xFF, 0xFF, 0x3F, 0x00, // compressed
        0x05, 0xFE, 0x02, 0xFE, 0xDC, 0xCC, 0x59, 0xE7, // IDAT CRC
        0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, // IEND chunk
        0xAE, 0x42, 0x60, 0x82, // IEND CRC
    ]
}
