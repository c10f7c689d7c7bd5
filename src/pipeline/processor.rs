//! Document processing orchestrator.
//!
//! Single entry point that drives an upload end to end:
//! classify → rasterize → preprocess → OCR → parse into a roster.
//!
//! The native engines (PDFium, Tesseract) sit behind traits so the
//! orchestrator runs in tests with mock implementations.

use std::io::Cursor;

use tracing::{debug, info};

use super::parser::{ParseContext, ScheduleParser};
use super::preprocess::ImagePreprocessor;
use super::types::{DocumentKind, OcrEngine, PageImage, PdfRasterizer, RawDocument, RecognizedToken};
use super::PipelineError;
use crate::roster::Roster;

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one upload through the pipeline stages in order. Stateless
/// between calls; every request gets fresh engine work.
pub struct DocumentProcessor {
    rasterizer: Box<dyn PdfRasterizer>,
    preprocessor: ImagePreprocessor,
    ocr: Box<dyn OcrEngine>,
    parser: ScheduleParser,
    dpi: u32,
}

impl DocumentProcessor {
    pub fn new(
        rasterizer: Box<dyn PdfRasterizer>,
        preprocessor: ImagePreprocessor,
        ocr: Box<dyn OcrEngine>,
        dpi: u32,
    ) -> Self {
        Self {
            rasterizer,
            preprocessor,
            ocr,
            parser: ScheduleParser::new(),
            dpi,
        }
    }

    /// Process one uploaded document into a roster.
    ///
    /// 1. Classify the upload (PDF or image)
    /// 2. Rasterize PDF pages, or take the image as a single page
    /// 3. Preprocess every page for OCR
    /// 4. Recognize tokens per page
    /// 5. Parse the token geometry into records
    ///
    /// Per-page parse trouble never fails the call; it lands in the
    /// roster's notes and counters instead.
    pub fn process(
        &self,
        document: &RawDocument,
        context: &ParseContext,
    ) -> Result<Roster, PipelineError> {
        // Step 1: Classify
        let kind = document
            .kind()
            .ok_or_else(|| PipelineError::UnsupportedDocument(document.media_type.clone()))?;

        // Steps 2-3: page PNGs, cleaned up for recognition
        let pages = self.prepare_pages(document, kind)?;

        // Step 4: OCR every page
        let mut token_pages: Vec<Vec<RecognizedToken>> = Vec::with_capacity(pages.len());
        for page in &pages {
            token_pages.push(self.ocr.recognize(page)?);
        }

        // Step 5: Parse geometry into records
        let roster = self.parser.parse(&token_pages, context);
        info!(
            source_id = %context.source_id,
            pages = pages.len(),
            records = roster.records.len(),
            unparsed_rows = roster.confidence.unparsed_rows,
            unparsed_pages = roster.unparsed_page_count,
            "Document processed"
        );
        Ok(roster)
    }

    /// Page count without doing any heavy work, for sizing the request
    /// timeout up front. Unreadable documents count as one page; they
    /// will fail properly inside `process`.
    pub fn page_count_estimate(&self, document: &RawDocument) -> usize {
        match document.kind() {
            Some(DocumentKind::Pdf) => self
                .rasterizer
                .page_count(&document.bytes)
                .unwrap_or(1)
                .max(1),
            _ => 1,
        }
    }

    fn prepare_pages(
        &self,
        document: &RawDocument,
        kind: DocumentKind,
    ) -> Result<Vec<PageImage>, PipelineError> {
        match kind {
            DocumentKind::Pdf => {
                let rendered = self.rasterizer.rasterize(&document.bytes, self.dpi)?;
                let mut pages = Vec::with_capacity(rendered.len());
                for page in &rendered {
                    let png_bytes = self.preprocessor.preprocess(&page.png_bytes)?;
                    let (width, height) = png_dimensions(&png_bytes)?;
                    debug!(page = page.page_number, width, height, "Page prepared");
                    pages.push(PageImage {
                        page_number: page.page_number,
                        png_bytes,
                        width,
                        height,
                    });
                }
                Ok(pages)
            }
            DocumentKind::Image => {
                let png_bytes = self.preprocessor.preprocess(&document.bytes)?;
                let (width, height) = png_dimensions(&png_bytes)?;
                debug!(width, height, "Image upload prepared as single page");
                Ok(vec![PageImage {
                    page_number: 0,
                    png_bytes,
                    width,
                    height,
                }])
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read dimensions from the PNG header without decoding pixel data.
/// The preprocessor always emits PNG, so the format is known.
fn png_dimensions(png_bytes: &[u8]) -> Result<(u32, u32), PipelineError> {
    image::io::Reader::with_format(Cursor::new(png_bytes), image::ImageFormat::Png)
        .into_dimensions()
        .map_err(|e| PipelineError::InvalidImage(e.to_string()))
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build a processor with the production engines.
///
/// Probes PDFium and Tesseract up front so a broken install fails at
/// startup with a clear message, never on the first upload.
pub fn build_processor(
    config: &crate::config::BotConfig,
) -> Result<DocumentProcessor, PipelineError> {
    let rasterizer = Box::new(super::raster::PdfiumRasterizer::new()?);
    let ocr = Box::new(super::ocr::TesseractOcr::new(
        config.tessdata_dir.clone(),
        &config.ocr_languages,
        config.ocr_min_confidence,
    )?);
    let preprocessor = ImagePreprocessor::new(config.preprocess);
    Ok(DocumentProcessor::new(
        rasterizer,
        preprocessor,
        ocr,
        config.ocr_dpi,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
