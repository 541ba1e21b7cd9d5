//! Error types for the medpdf-instruct library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`QcError`] is **fatal**: the run cannot proceed at all (input file
//!   missing, unreadable PDF, provider not configured, invalid config).
//!   Returned as `Err(QcError)` from the top-level entry points.
//!
//! * [`SchemaError`]: a record could not be constructed because it breaks a
//!   shape invariant (inverted bbox, category values on a numeric variable,
//!   confidence outside `[0, 1]`). Raised while parsing, before any
//!   cross-field check runs.
//!
//! * [`AnnotationError`] is **non-fatal**: one region or one page batch failed
//!   (transient API error, unparseable reply) while the rest of the paper is
//!   fine. Stored alongside the results so a single bad region never costs the
//!   whole document.
//!
//! Data-quality findings are none of these: the consistency checker reports
//! them in a [`crate::quality::ValidationReport`] and never errors.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the medpdf-instruct library.
#[derive(Debug, Error)]
pub enum QcError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A record file could not be parsed at all (not JSON, not JSONL).
    #[error("Failed to parse '{path}': {detail}")]
    ParseFailed { path: PathBuf, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// Requested page index exceeds the page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium or install pdfium\n\
system-wide so it can be found by the dynamic loader.\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every page batch of a document failed; nothing to merge.
    #[error("All {total} page batches failed for '{paper_id}'.\nFirst error: {first_error}")]
    AllBatchesFailed {
        paper_id: String,
        total: usize,
        first_error: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O failure while reading inputs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation failure outside of per-line record parsing.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A record broke a shape invariant at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("bbox must satisfy 0 <= x1 < x2 and 0 <= y1 < y2, got [{x1}, {y1}, {x2}, {y2}]")]
    InvalidBBox { x1: i64, y1: i64, x2: i64, y2: i64 },

    #[error("page span must satisfy y2 > y1 >= 0, got y1={y1} y2={y2}")]
    InvalidPageSpan { y1: String, y2: String },

    #[error("section level must be 1-6, got {0}")]
    InvalidSectionLevel(u8),

    #[error("variable '{name}' with role '{role}' must not carry category_values")]
    CategoryValuesOnNumericRole { name: String, role: String },

    #[error("confidence_score must lie in [0, 1], got {0}")]
    ConfidenceOutOfRange(String),

    #[error("field '{field}' must not be empty")]
    EmptyField { field: &'static str },

    #[error("page dimensions must be positive, got {width}x{height}")]
    InvalidPageSize { width: u32, height: u32 },

    #[error("annotation for '{paper_id}' page {page_index} does not belong to page '{page_paper_id}' page {page_page_index}")]
    ForeignAnnotation {
        paper_id: String,
        page_index: usize,
        page_paper_id: String,
        page_page_index: usize,
    },
}

/// A non-fatal error for a single region or page batch.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum AnnotationError {
    /// The VLM call failed after every retry.
    #[error("{target}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        target: String,
        retries: u8,
        detail: String,
    },

    /// The VLM answered, but the reply was not a usable annotation.
    #[error("{target}: could not parse annotation reply: {detail}")]
    InvalidReply { target: String, detail: String },

    /// Cropping or encoding the region image failed.
    #[error("{target}: image preparation failed: {detail}")]
    ImageFailed { target: String, detail: String },
}

impl AnnotationError {
    /// Human-readable label of what failed (e.g. `PMC123 p4 region 2`).
    pub fn target(&self) -> &str {
        match self {
            AnnotationError::LlmFailed { target, .. }
            | AnnotationError::InvalidReply { target, .. }
            | AnnotationError::ImageFailed { target, .. } => target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_bbox_display() {
        let e = SchemaError::InvalidBBox {
            x1: 10,
            y1: 0,
            x2: 5,
            y2: 20,
        };
        assert!(e.to_string().contains("[10, 0, 5, 20]"), "got: {e}");
    }

    #[test]
    fn all_batches_failed_display() {
        let e = QcError::AllBatchesFailed {
            paper_id: "PMC42".into(),
            total: 3,
            first_error: "timeout".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("PMC42"));
        assert!(msg.contains("All 3"));
    }

    #[test]
    fn annotation_error_target() {
        let e = AnnotationError::InvalidReply {
            target: "PMC1 p2 region 0".into(),
            detail: "no JSON object".into(),
        };
        assert_eq!(e.target(), "PMC1 p2 region 0");
        assert!(e.to_string().contains("no JSON object"));
    }

    #[test]
    fn annotation_error_roundtrips_through_json() {
        let e = AnnotationError::LlmFailed {
            target: "PMC1 batch 1".into(),
            retries: 3,
            detail: "429".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: AnnotationError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.target(), "PMC1 batch 1");
    }
}
