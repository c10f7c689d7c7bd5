pub mod types;
pub mod raster;
pub mod preprocess;
pub mod ocr;
pub mod dates;
pub mod parser;
pub mod processor;

pub use types::*;
pub use raster::*;
pub use preprocess::*;
pub use ocr::*;
pub use parser::*;
pub use processor::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The uploaded bytes are not a document we can process (not a valid
    /// PDF, unknown media type, password-protected, ...).
    #[error("unsupported document: {0}")]
    UnsupportedDocument(String),

    /// Structurally valid document with zero pages.
    #[error("document contains no pages")]
    EmptyDocument,

    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// PDFium could not be loaded. Startup-fatal, never per-request.
    #[error("PDF renderer unavailable: {0}")]
    PdfEngineUnavailable(String),

    #[error("PDF rendering failed: {0}")]
    PdfRender(String),

    /// Tesseract could not be invoked at all (missing traineddata or
    /// runtime). Startup-fatal, never per-request.
    #[error("OCR engine unavailable: {0}")]
    OcrEngineUnavailable(String),

    #[error("processing timed out after {0}s")]
    ProcessingTimeout(u64),
}
