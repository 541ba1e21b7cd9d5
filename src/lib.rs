//! # medpdf-instruct
//!
//! Build a multimodal instruction-tuning dataset from medical PDF literature:
//! annotate papers and their figures with a Vision Language Model, then
//! quality-control the annotations before they become training data.
//!
//! ## Why this crate?
//!
//! Annotations written by a VLM are semi-structured and occasionally wrong
//! in ways a schema alone cannot catch: a bbox that spills off the page, a
//! "key finding" that speculates, the same figure detected twice or the same
//! paper ingested from two mirrors. The [`quality`] module checks every record
//! on its own and then deduplicates the survivors, so only consistent,
//! unique records are handed to the [`dataset`] builder.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF + detected regions
//!  │
//!  ├─ 1. Render    rasterise pages via pdfium (spawn_blocking)
//!  ├─ 2. Crop      save each region under crops/, read nearby page text
//!  ├─ 3. VLM       region calls + overlapping page-batch calls, concurrent
//!  ├─ 4. Merge     batch documents → one DocumentAnnotation per paper
//!  ├─ 5. Check     ConsistencyChecker: accept / reject / clamp-and-recheck
//!  ├─ 6. Dedup     documents by id, title, abstract; regions by IoU, then
//!  │               perceptual hash across the corpus
//!  └─ 7. Build     conversation samples per task, drawn by a seeded
//!                  weighted sampler
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medpdf_instruct::{run_quality_control_files, QualityConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let report = run_quality_control_files(
//!         Path::new("annotations/documents.jsonl"),
//!         Path::new("annotations/bboxes.jsonl"),
//!         Path::new("annotations"),
//!         Path::new("dataset"),
//!         &QualityConfig::default(),
//!     )?;
//!     eprintln!("{} of {} documents kept", report.output.documents, report.input.documents);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `medpdf` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod annotate;
pub mod config;
pub mod dataset;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod quality;
pub mod run;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use annotate::{annotate_paper, AnnotationStats, PaperAnnotation};
pub use config::{
    AnnotationConfig, AnnotationConfigBuilder, CheckMode, QualityConfig, QualityConfigBuilder, SamplerConfig,
    SamplerConfigBuilder,
};
pub use dataset::{BuildReport, BuiltSample, DatasetSampler, SampleBuilder, SampleStats, TaskType};
pub use error::{AnnotationError, QcError, SchemaError};
pub use pipeline::detect::{load_detections, DetectedRegion};
pub use progress::{AnnotationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use quality::{
    CheckOutcome, ConsistencyChecker, DatasetDeduplicator, ImageDeduplicator, IssueCode, TextDeduplicator,
    ValidationReport,
};
pub use run::{
    build_samples_files, check_samples, check_samples_file, run_quality_control, run_quality_control_files,
    QcRunOutput, QcRunReport, SampleBuildRun, SampleCheckReport,
};
pub use schema::{BBox, BBoxAnnotation, BBoxPage, ConversationSample, DocumentAnnotation, FigureType};
