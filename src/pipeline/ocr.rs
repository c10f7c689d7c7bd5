//! Tesseract-backed text recognition.
//!
//! Words come back from the engine's TSV output with pixel bounding
//! boxes, which downstream layout reconstruction depends on. Plain-text
//! output is never used.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use super::types::{BoundingBox, OcrEngine, PageImage, RecognizedToken};
use super::PipelineError;

/// Tesseract OCR engine configured for schedule documents.
///
/// Native Tesseract handles are not `Send`, so no handle is kept across
/// calls; each `recognize` initializes a fresh engine against the same
/// tessdata. Construction probes that initialization once so a broken
/// install fails at startup instead of on the first upload.
#[derive(Debug)]
pub struct TesseractOcr {
    tessdata_dir: Option<PathBuf>,
    languages: String,
    min_confidence: f32,
}

impl TesseractOcr {
    /// `tessdata_dir = None` uses the engine's compiled-in default path.
    /// `languages` is Tesseract syntax, e.g. "spa" or "spa+eng".
    pub fn new(
        tessdata_dir: Option<PathBuf>,
        languages: &str,
        min_confidence: f32,
    ) -> Result<Self, PipelineError> {
        if let Some(dir) = &tessdata_dir {
            for lang in languages.split('+') {
                let traineddata = dir.join(format!("{lang}.traineddata"));
                if !traineddata.is_file() {
                    return Err(PipelineError::OcrEngineUnavailable(format!(
                        "missing traineddata for '{}' in {}",
                        lang,
                        dir.display()
                    )));
                }
            }
        }

        let engine = Self {
            tessdata_dir,
            languages: languages.to_string(),
            min_confidence,
        };
        engine.init_handle()?;
        Ok(engine)
    }

    fn init_handle(&self) -> Result<tesseract::Tesseract, PipelineError> {
        let tessdata_str = match &self.tessdata_dir {
            Some(dir) => Some(dir.to_str().ok_or_else(|| {
                PipelineError::OcrEngineUnavailable("tessdata path is not valid UTF-8".to_string())
            })?),
            None => None,
        };

        tesseract::Tesseract::new(tessdata_str, Some(self.languages.as_str()))
            .map_err(|e| PipelineError::OcrEngineUnavailable(format!("{e:?}")))
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, page: &PageImage) -> Result<Vec<RecognizedToken>, PipelineError> {
        let tess = self.init_handle()?;

        // A page the engine cannot load is a degraded page, not a dead
        // engine; the document may still parse from its other pages.
        let mut tess = match tess.set_image_from_mem(&page.png_bytes) {
            Ok(t) => t,
            Err(e) => {
                warn!(
                    page = page.page_number,
                    error = ?e,
                    "Tesseract rejected page image, treating as empty"
                );
                return Ok(Vec::new());
            }
        };

        let mean_confidence = tess.mean_text_conf().max(0) as f32 / 100.0;

        let tsv = match tess.get_tsv_text(0) {
            Ok(t) => t,
            Err(e) => {
                warn!(
                    page = page.page_number,
                    error = ?e,
                    "Tesseract TSV output failed, treating page as empty"
                );
                return Ok(Vec::new());
            }
        };

        let tokens = parse_tsv_tokens(&tsv, page.page_number, self.min_confidence);
        debug!(
            page = page.page_number,
            tokens = tokens.len(),
            mean_confidence,
            "OCR complete"
        );
        Ok(tokens)
    }
}

/// Parse Tesseract TSV output into positioned tokens.
///
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence is 0-100, scaled to 0.0-1.0;
/// -1 (unscorable) maps to 0.0. Layout reconstruction needs geometry, so
/// words without a usable bounding box are dropped.
fn parse_tsv_tokens(tsv: &str, page_number: usize, min_confidence: f32) -> Vec<RecognizedToken> {
    let mut tokens = Vec::new();

    // First line is the header (or the page record, which is not a word
    // either); real word entries only ever appear after it.
    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // Level 5 = word
        let level: i32 = match fields[0].parse() {
            Ok(l) => l,
            Err(_) => continue,
        };
        if level != 5 {
            continue;
        }

        let conf: i32 = match fields[10].parse() {
            Ok(c) => c,
            Err(_) => continue,
        };

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        let bounding_box = match parse_bounding_box(fields[6], fields[7], fields[8], fields[9]) {
            Some(b) => b,
            None => continue,
        };
        if bounding_box.width == 0 || bounding_box.height == 0 {
            continue;
        }

        let confidence = if conf < 0 { 0.0 } else { conf as f32 / 100.0 };

        tokens.push(RecognizedToken {
            text: text.to_string(),
            bounding_box,
            page_number,
            confidence,
            low_confidence: confidence < min_confidence,
        });
    }

    tokens
}

/// Parse bounding box coordinates from TSV string fields.
/// Returns None if any field fails to parse.
fn parse_bounding_box(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    Some(BoundingBox {
        x: left.parse().ok()?,
        y: top.parse().ok()?,
        width: width.parse().ok()?,
        height: height.parse().ok()?,
    })
}

/// Mock OCR engine for unit testing without Tesseract.
pub struct MockOcrEngine {
    tokens: Vec<RecognizedToken>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    /// Engine that answers each page with the preset tokens whose
    /// `page_number` matches.
    pub fn new(tokens: Vec<RecognizedToken>) -> Self {
        Self {
            tokens,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Engine whose every call fails as unavailable.
    pub fn unavailable() -> Self {
        Self {
            tokens: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, page: &PageImage) -> Result<Vec<RecognizedToken>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::OcrEngineUnavailable(
                "mock engine down".to_string(),
            ));
        }
        Ok(self
            .tokens
            .iter()
            .filter(|t| t.page_number == page.page_number)
            .cloned()
            .collect())
    }
}
