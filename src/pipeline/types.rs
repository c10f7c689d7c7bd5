use serde::{Deserialize, Serialize};

use super::PipelineError;

/// An uploaded document exactly as received from the chat channel.
/// Immutable; consumed once by the pipeline and then dropped.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    /// Declared media type, e.g. "application/pdf" or "image/jpeg".
    pub media_type: String,
}

/// What the declared media type tells us to do with the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl RawDocument {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }

    /// Classify by declared media type, falling back to the `%PDF` magic
    /// prefix when the declaration is missing or unrecognized (attachment
    /// metadata is not always trustworthy). `None` means we cannot
    /// process it.
    pub fn kind(&self) -> Option<DocumentKind> {
        let media = self.media_type.trim().to_ascii_lowercase();
        if media == "application/pdf" {
            Some(DocumentKind::Pdf)
        } else if media.starts_with("image/") {
            Some(DocumentKind::Image)
        } else if self.bytes.starts_with(b"%PDF") {
            Some(DocumentKind::Pdf)
        } else {
            None
        }
    }
}

/// One rasterized page, held in memory as encoded PNG.
/// 1:1 for image uploads, 1:N for PDFs. Never persisted.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Zero-based page index within the source document.
    pub page_number: usize,
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Position of a recognized token in page-pixel coordinates.
/// Invariant: width and height are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn center_y(&self) -> f32 {
        self.y as f32 + self.height as f32 / 2.0
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }
}

/// One OCR-recognized text fragment with its position on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedToken {
    pub text: String,
    pub bounding_box: BoundingBox,
    /// Zero-based page index the token was read from.
    pub page_number: usize,
    /// Engine confidence in [0, 1].
    pub confidence: f32,
    /// Below the configured confidence threshold. Such tokens are kept,
    /// not discarded, but counted separately in the roster summary.
    pub low_confidence: bool,
}

/// PDF page rendering abstraction (allows mocking for tests).
pub trait PdfRasterizer: Send + Sync {
    /// Render every page of the PDF to a PNG image at the given DPI.
    ///
    /// Fails with `UnsupportedDocument` when the bytes are not a valid PDF
    /// and with `EmptyDocument` when the PDF has zero pages.
    fn rasterize(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<PageImage>, PipelineError>;

    /// Page count without rendering. Used to budget the request timeout.
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, PipelineError>;
}

/// OCR engine abstraction (allows mocking for tests).
///
/// A malformed page image degrades to an empty token list with a logged
/// warning; `Err` is reserved for the engine itself being unusable.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, page: &PageImage) -> Result<Vec<RecognizedToken>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_media_type_classifies_as_pdf() {
        let doc = RawDocument::new(vec![1, 2, 3], "application/pdf");
        assert_eq!(doc.kind(), Some(DocumentKind::Pdf));
    }

    #[test]
    fn image_media_types_classify_as_image() {
        for media in ["image/jpeg", "image/png", "IMAGE/TIFF", " image/webp "] {
            let doc = RawDocument::new(vec![], media);
            assert_eq!(doc.kind(), Some(DocumentKind::Image), "media {media}");
        }
    }

    #[test]
    fn unknown_media_type_is_unclassified() {
        for media in ["text/plain", "application/msword", "audio/ogg", ""] {
            let doc = RawDocument::new(vec![], media);
            assert_eq!(doc.kind(), None, "media {media}");
        }
    }

    #[test]
    fn pdf_magic_wins_over_missing_media_type() {
        let doc = RawDocument::new(b"%PDF-1.7 rest".to_vec(), "application/octet-stream");
        assert_eq!(doc.kind(), Some(DocumentKind::Pdf));
    }

    #[test]
    fn bounding_box_center_and_right() {
        let bb = BoundingBox {
            x: 10,
            y: 20,
            width: 30,
            height: 40,
        };
        assert!((bb.center_y() - 40.0).abs() < f32::EPSILON);
        assert_eq!(bb.right(), 40);
    }
}
