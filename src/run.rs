//! One quality-control run over a batch of annotations.
//!
//! ```text
//! documents ──▶ check_document ──────────────┐
//!                                            ├──▶ deduplicate_dataset ──▶ output
//! bbox pages ─▶ check_bbox_with_repair ──────┘
//! ```
//!
//! Every record is checked on its own first; only accepted records reach
//! deduplication. The run never fails on data: rejections and duplicates are
//! counted in a [`QcRunReport`].

use crate::config::{CheckMode, QualityConfig, SamplerConfig};
use crate::dataset::{save_samples, BuildReport, DatasetSampler, SampleBuilder, SampleStats};
use crate::error::QcError;
use crate::io::{read_records, write_json, write_jsonl};
use crate::quality::{ConsistencyChecker, DatasetDeduplicator, DedupStats, IssueCode, ValidationReport};
use crate::schema::{BBoxAnnotation, BBoxPage, ConversationSample, DocumentAnnotation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Output file names inside the output directory.
pub const DOCUMENTS_FILE: &str = "documents.jsonl";
pub const BBOXES_FILE: &str = "bboxes.jsonl";
pub const REPORT_FILE: &str = "qc_report.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub documents: usize,
    pub bboxes: usize,
}

/// Everything one run counted; persisted as `qc_report.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcRunReport {
    pub mode: CheckMode,
    pub input: RecordCounts,
    pub accepted: RecordCounts,
    pub rejected: RecordCounts,
    /// Regions whose overflowing bbox was clamped (accepted or not).
    pub repaired_bboxes: usize,
    /// Repeated pages whose size disagreed with the first record of that page.
    #[serde(default)]
    pub page_size_conflicts: usize,
    pub error_count: usize,
    pub warning_count: usize,
    /// Errors and warnings per issue code, over all checked records.
    pub issue_counts: BTreeMap<IssueCode, usize>,
    pub dedup: DedupStats,
    pub output: RecordCounts,
    /// Input lines or array items that did not parse as records.
    pub skipped_records: usize,
}

impl QcRunReport {
    fn tally(&mut self, report: &ValidationReport) {
        self.error_count += report.errors.len();
        self.warning_count += report.warnings.len();
        for code in report.codes() {
            *self.issue_counts.entry(code).or_default() += 1;
        }
    }
}

/// Checked, deduplicated records plus the run report.
#[derive(Debug, Clone)]
pub struct QcRunOutput {
    pub documents: Vec<DocumentAnnotation>,
    /// Surviving regions regrouped per page, in input order.
    pub pages: Vec<BBoxPage>,
    pub report: QcRunReport,
}

/// Check every record, then deduplicate the accepted ones.
///
/// Crops are resolved under `image_dir` for perceptual dedup.
pub fn run_quality_control(
    documents: Vec<DocumentAnnotation>,
    pages: Vec<BBoxPage>,
    image_dir: &Path,
    config: &QualityConfig,
) -> QcRunOutput {
    let checker = ConsistencyChecker::new(config.clone());
    let mut report = QcRunReport {
        mode: config.mode,
        ..QcRunReport::default()
    };

    // ── Documents ────────────────────────────────────────────────────────
    report.input.documents = documents.len();
    let mut accepted_docs = Vec::with_capacity(documents.len());
    for doc in documents {
        let outcome = checker.check_document(&doc);
        report.tally(&outcome.report);
        if outcome.accepted {
            accepted_docs.push(doc);
        } else {
            warn!(paper_id = %doc.paper_id, "document rejected\n{}", outcome.report.render());
        }
    }
    report.accepted.documents = accepted_docs.len();
    report.rejected.documents = report.input.documents - accepted_docs.len();

    // ── Regions ──────────────────────────────────────────────────────────
    let mut page_sizes: HashMap<(String, usize), (u32, u32)> = HashMap::new();
    let mut page_order: Vec<(String, usize)> = Vec::new();
    let mut accepted_bboxes = Vec::new();

    for page in pages {
        let key = (page.paper_id.clone(), page.page_index);
        let size = (page.page_width(), page.page_height());
        // Regions are written back under the first size seen for their page,
        // so they are checked against that size too.
        let (width, height) = match page_sizes.get(&key) {
            Some(&first) => {
                if first != size {
                    warn!(
                        "{} p{}: page size {}x{} conflicts with earlier {}x{}, using the earlier",
                        key.0, key.1, size.0, size.1, first.0, first.1
                    );
                    report.page_size_conflicts += 1;
                }
                first
            }
            None => {
                page_sizes.insert(key.clone(), size);
                page_order.push(key);
                size
            }
        };

        for ann in page.annotations {
            report.input.bboxes += 1;
            let checked = checker.check_bbox_with_repair(ann, width, height);
            report.tally(&checked.outcome.report);
            if checked.repaired {
                report.repaired_bboxes += 1;
            }
            if checked.outcome.accepted {
                accepted_bboxes.push(checked.annotation);
            } else {
                warn!(
                    region = %checked.annotation.label(),
                    "region rejected\n{}",
                    checked.outcome.report.render()
                );
            }
        }
    }
    report.accepted.bboxes = accepted_bboxes.len();
    report.rejected.bboxes = report.input.bboxes - accepted_bboxes.len();

    // ── Dedup ────────────────────────────────────────────────────────────
    let dedup = DatasetDeduplicator::new(config).deduplicate_dataset(accepted_docs, accepted_bboxes, image_dir);
    report.dedup = dedup.stats;
    report.output = RecordCounts {
        documents: dedup.documents.len(),
        bboxes: dedup.bboxes.len(),
    };

    let pages = regroup_pages(dedup.bboxes, &page_order, &page_sizes);

    info!(
        documents_in = report.input.documents,
        documents_out = report.output.documents,
        bboxes_in = report.input.bboxes,
        bboxes_out = report.output.bboxes,
        repaired = report.repaired_bboxes,
        errors = report.error_count,
        warnings = report.warning_count,
        "quality control complete"
    );

    QcRunOutput {
        documents: dedup.documents,
        pages,
        report,
    }
}

/// Group regions back into their pages, pages in first-seen input order.
fn regroup_pages(
    bboxes: Vec<BBoxAnnotation>,
    page_order: &[(String, usize)],
    page_sizes: &HashMap<(String, usize), (u32, u32)>,
) -> Vec<BBoxPage> {
    let mut grouped: HashMap<(String, usize), Vec<BBoxAnnotation>> = HashMap::new();
    for ann in bboxes {
        grouped
            .entry((ann.paper_id.clone(), ann.page_index))
            .or_default()
            .push(ann);
    }

    let mut out = Vec::with_capacity(grouped.len());
    for key in page_order {
        let Some(annotations) = grouped.remove(key) else {
            continue;
        };
        let Some(&(width, height)) = page_sizes.get(key) else {
            continue;
        };
        match BBoxPage::new(key.0.clone(), key.1, width, height, annotations) {
            Ok(page) => out.push(page),
            Err(e) => warn!("{} p{}: page dropped: {}", key.0, key.1, e),
        }
    }
    out
}

/// File entry point: read `documents_path` and `bboxes_path` (JSON or
/// JSONL), run quality control, and write [`DOCUMENTS_FILE`],
/// [`BBOXES_FILE`] and [`REPORT_FILE`] into `output_dir`.
pub fn run_quality_control_files(
    documents_path: &Path,
    bboxes_path: &Path,
    image_dir: &Path,
    output_dir: &Path,
    config: &QualityConfig,
) -> Result<QcRunReport, QcError> {
    let documents = read_records::<DocumentAnnotation>(documents_path)?;
    let pages = read_records::<BBoxPage>(bboxes_path)?;
    info!(
        "Loaded {} documents and {} bbox pages ({} records skipped)",
        documents.records.len(),
        pages.records.len(),
        documents.skipped + pages.skipped
    );

    let mut out = run_quality_control(documents.records, pages.records, image_dir, config);
    out.report.skipped_records = documents.skipped + pages.skipped;

    write_jsonl(&output_dir.join(DOCUMENTS_FILE), &out.documents)?;
    write_jsonl(&output_dir.join(BBOXES_FILE), &out.pages)?;
    write_json(&output_dir.join(REPORT_FILE), &out.report)?;
    Ok(out.report)
}

// ── Dataset build ────────────────────────────────────────────────────────

/// Counts of one [`build_samples_files`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleBuildRun {
    pub build: BuildReport,
    pub skipped_records: usize,
    /// Spread of the samples written.
    pub written: SampleStats,
}

/// File entry point: turn checked records into conversation samples,
/// optionally draw `target` of them with `sampling`, and write them to
/// `output_path` as JSONL.
pub fn build_samples_files(
    documents_path: &Path,
    bboxes_path: &Path,
    image_dir: &Path,
    output_path: &Path,
    seed: Option<u64>,
    sampling: Option<(&SamplerConfig, usize)>,
) -> Result<SampleBuildRun, QcError> {
    let documents = read_records::<DocumentAnnotation>(documents_path)?;
    let pages = read_records::<BBoxPage>(bboxes_path)?;

    let mut builder = SampleBuilder::new(image_dir);
    if let Some(seed) = seed {
        builder = builder.with_seed(seed);
    }
    let (samples, build) = builder.build_from_records(&documents.records, &pages.records);
    info!(
        built = build.total(),
        missing_images = build.missing_images,
        rejected = build.rejected,
        "samples built"
    );

    let samples = match sampling {
        Some((config, target)) => DatasetSampler::new(config.clone()).sample(&samples, target),
        None => samples,
    };
    save_samples(output_path, &samples)?;

    Ok(SampleBuildRun {
        build,
        skipped_records: documents.skipped + pages.skipped,
        written: SampleStats::of(&samples),
    })
}

// ── Samples ──────────────────────────────────────────────────────────────

/// A sample that failed its checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedSample {
    pub id: String,
    pub report: ValidationReport,
}

/// Result of checking a file of conversation samples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCheckReport {
    pub total: usize,
    pub accepted: usize,
    pub skipped_records: usize,
    pub issue_counts: BTreeMap<IssueCode, usize>,
    pub rejected: Vec<RejectedSample>,
}

/// Check every sample; samples are always held to strict rules.
pub fn check_samples(samples: &[ConversationSample]) -> SampleCheckReport {
    let checker = ConsistencyChecker::default();
    let mut report = SampleCheckReport {
        total: samples.len(),
        ..SampleCheckReport::default()
    };

    for sample in samples {
        let outcome = checker.check_sample(sample);
        for code in outcome.report.codes() {
            *report.issue_counts.entry(code).or_default() += 1;
        }
        if outcome.accepted {
            report.accepted += 1;
        } else {
            report.rejected.push(RejectedSample {
                id: sample.id.clone(),
                report: outcome.report,
            });
        }
    }
    info!(
        total = report.total,
        accepted = report.accepted,
        "sample check complete"
    );
    report
}

/// Read a sample file (JSON or JSONL) and check it.
pub fn check_samples_file(path: &Path) -> Result<SampleCheckReport, QcError> {
    let file = read_records::<ConversationSample>(path)?;
    let mut report = check_samples(&file.records);
    report.skipped_records = file.skipped;
    Ok(report)
}
