//! Quality control: per-record consistency checks and dataset deduplication.
//!
//! ```text
//! records ──▶ ConsistencyChecker ──▶ accepted ──▶ DatasetDeduplicator ──▶ dataset
//!             (stateless, per record)              (one run, in memory)
//! ```
//!
//! The checker reports; it never fails on data. The deduplicators only filter,
//! except that a dropped positional duplicate may lend its caption to the
//! record that survives it.

pub mod checker;
pub mod dataset;
pub mod image_dedup;
pub mod phash;
pub mod report;
pub mod text_dedup;

pub use checker::{ConsistencyChecker, RepairOutcome};
pub use dataset::{DatasetDeduplicator, DedupOutcome, DedupStats};
pub use image_dedup::{BBoxDedupReport, ImageDeduplicator};
pub use phash::{HashIndex, LinearHashIndex, Neighbor, PerceptualHasher};
pub use report::{CheckOutcome, Issue, IssueCode, StageCount, ValidationReport};
pub use text_dedup::{DocumentDedupReport, TextDeduplicator};
