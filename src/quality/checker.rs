//! Per-record consistency checks.
//!
//! The checker never fails on data: every finding lands in a
//! [`ValidationReport`] and the record is accepted or rejected according to
//! the configured [`CheckMode`]. Each call builds a fresh report, so one
//! checker can be shared across threads and records.

use super::report::{CheckOutcome, IssueCode, ValidationReport};
use crate::config::{CheckMode, QualityConfig};
use crate::schema::{BBoxAnnotation, ConversationSample, DocumentAnnotation, FigureType, Speaker, VariableRole};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::debug;

/// Errors a document may carry in lenient mode and still pass.
const LENIENT_DOCUMENT_ERRORS: usize = 3;
/// Errors a region may carry in lenient mode and still pass.
const LENIENT_BBOX_ERRORS: usize = 2;

static RE_PAPER_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(PMC\d+|arXiv:\d{4}\.\d{4,5}(v\d+)?|[a-zA-Z0-9_-]+)$").expect("static regex")
});

static RE_DOI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^10\.\d{4,9}/[-._;()/:a-zA-Z0-9]+$").expect("static regex"));

static RE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$").expect("static regex")
});

static RE_GROUNDING_BOX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<box>\[\[(\d+),(\d+),(\d+),(\d+)\]\]</box>").expect("static regex")
});

/// Speculative wording forbidden in key findings: `(word cited, pattern)`.
static HEDGE_WORDS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let cjk = ["可能", "也许", "或许", "大概", "推测", "猜测"]
        .into_iter()
        .map(|w| (w, regex::escape(w)));
    let latin = [
        ("might", r"(?i)\bmight\b"),
        ("maybe", r"(?i)\bmaybe\b"),
        ("perhaps", r"(?i)\bperhaps\b"),
        ("probably", r"(?i)\bprobably\b"),
        ("possibly", r"(?i)\bpossibly\b"),
        ("could be", r"(?i)\bcould\s+be\b"),
        ("may be", r"(?i)\bmay\s+be\b"),
        ("seems", r"(?i)\bseems\b"),
        ("appears", r"(?i)\bappears\b"),
    ]
    .into_iter()
    .map(|(w, p)| (w, p.to_string()));

    cjk.chain(latin)
        .map(|(w, p)| (w, Regex::new(&p).expect("static regex")))
        .collect()
});

/// Length of `s` with each CJK ideograph counted twice.
pub fn weighted_len(s: &str) -> usize {
    s.chars()
        .map(|c| if ('\u{4e00}'..='\u{9fa5}').contains(&c) { 2 } else { 1 })
        .sum()
}

/// Denylisted speculative words found in `s`, in denylist order.
pub fn find_hedge_words(s: &str) -> Vec<&'static str> {
    HEDGE_WORDS
        .iter()
        .filter(|(_, re)| re.is_match(s))
        .map(|(w, _)| *w)
        .collect()
}

/// `YYYY`, `YYYY-MM` or `YYYY-MM-DD` naming a real calendar date.
pub fn is_valid_date(s: &str) -> bool {
    let Some(caps) = RE_DATE.captures(s) else {
        return false;
    };
    let year: u32 = match caps[1].parse() {
        Ok(y) => y,
        Err(_) => return false,
    };
    let Some(month) = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()) else {
        return true;
    };
    if !(1..=12).contains(&month) {
        return false;
    }
    match caps.get(3).and_then(|d| d.as_str().parse::<u32>().ok()) {
        None => true,
        Some(day) => day >= 1 && day <= days_in_month(year, month),
    }
}

fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        2 if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn is_image_path(p: &str) -> bool {
    let lower = p.to_lowercase();
    let relative = !(Path::new(p).is_absolute() || p.starts_with('/') || p.starts_with('\\'));
    relative
        && [".png", ".jpg", ".jpeg"]
            .iter()
            .any(|ext| lower.ends_with(ext))
}

/// Result of [`ConsistencyChecker::check_bbox_with_repair`].
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    /// The record as checked: clamped to the page when `repaired`.
    pub annotation: BBoxAnnotation,
    pub outcome: CheckOutcome,
    pub repaired: bool,
}

/// Validates documents, region annotations and training samples.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyChecker {
    config: QualityConfig,
}

impl ConsistencyChecker {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Default thresholds in the given mode.
    pub fn with_mode(mode: CheckMode) -> Self {
        Self {
            config: QualityConfig {
                mode,
                ..QualityConfig::default()
            },
        }
    }

    pub fn mode(&self) -> CheckMode {
        self.config.mode
    }

    // ── Documents ────────────────────────────────────────────────────────

    pub fn check_document(&self, doc: &DocumentAnnotation) -> CheckOutcome {
        let mut report = ValidationReport::new();

        if !RE_PAPER_ID.is_match(&doc.paper_id) {
            report.error(
                IssueCode::InvalidPaperId,
                format!("invalid paper_id format: '{}'", doc.paper_id),
            );
        }

        let title_len = doc.title.trim().chars().count();
        if title_len < self.config.title_min_chars {
            report.error(
                IssueCode::TitleTooShort,
                format!(
                    "title has {title_len} characters, need at least {}",
                    self.config.title_min_chars
                ),
            );
        }
        let abstract_len = doc.abstract_text.trim().chars().count();
        if abstract_len < self.config.abstract_min_chars {
            report.error(
                IssueCode::AbstractTooShort,
                format!(
                    "abstract has {abstract_len} characters, need at least {}",
                    self.config.abstract_min_chars
                ),
            );
        }

        if doc.sections.is_empty() {
            report.error(IssueCode::MissingSections, "document has no sections");
        } else {
            check_section_levels(doc, &mut report);
        }

        if let (Some(authors), Some(affiliations)) = (&doc.authors, &doc.affiliations) {
            for author in authors {
                for &id in &author.affiliation_ids {
                    if id >= affiliations.len() {
                        report.error(
                            IssueCode::InvalidAffiliationRef,
                            format!(
                                "author '{}' references affiliation {id}, only {} exist",
                                author.name,
                                affiliations.len()
                            ),
                        );
                    }
                }
            }
        }

        if let Some(doi) = &doc.doi {
            if !RE_DOI.is_match(doi) {
                report.warn(IssueCode::InvalidDoi, format!("doi looks malformed: '{doi}'"));
            }
        }

        if let Some(date) = &doc.publication_date {
            if !is_valid_date(date) {
                report.error(
                    IssueCode::InvalidDate,
                    format!("publication_date must be YYYY, YYYY-MM or YYYY-MM-DD: '{date}'"),
                );
            }
        }

        let accepted = self.verdict(&report, LENIENT_DOCUMENT_ERRORS);
        debug!(
            paper_id = %doc.paper_id,
            accepted,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "document checked"
        );
        CheckOutcome { accepted, report }
    }

    // ── Regions ──────────────────────────────────────────────────────────

    pub fn check_bbox(&self, ann: &BBoxAnnotation, page_width: u32, page_height: u32) -> CheckOutcome {
        let mut report = ValidationReport::new();

        if !ann.bbox.fits_within(page_width, page_height) {
            report.error(
                IssueCode::BBoxOutOfPage,
                format!(
                    "bbox {} exceeds page {page_width}x{page_height}",
                    ann.bbox
                ),
            );
        }

        if let Some(caption) = &ann.caption {
            let lower = caption.to_lowercase();
            match ann.figure_type {
                FigureType::Table if lower.contains("figure") && !lower.contains("table") => {
                    report.warn(
                        IssueCode::CaptionTypeMismatch,
                        "annotated as table but caption mentions 'figure'",
                    );
                }
                FigureType::Figure if lower.contains("table") && !lower.contains("figure") => {
                    report.warn(
                        IssueCode::CaptionTypeMismatch,
                        "annotated as figure but caption mentions 'table'",
                    );
                }
                _ => {}
            }
        }

        if !is_image_path(&ann.crop_path) {
            report.error(
                IssueCode::InvalidCropPath,
                format!(
                    "crop_path must be a relative .png/.jpg/.jpeg path: '{}'",
                    ann.crop_path
                ),
            );
        }

        if let (Some(variables), Some(axis)) = (&ann.variables, &ann.axis) {
            for (label, role, axis_name) in [
                (&axis.x_label, VariableRole::X, "x"),
                (&axis.y_label, VariableRole::Y, "y"),
            ] {
                let Some(label) = label else { continue };
                let names: Vec<String> = variables
                    .iter()
                    .filter(|v| v.role() == role)
                    .map(|v| v.name().to_lowercase())
                    .collect();
                if names.is_empty() {
                    continue;
                }
                let label_lower = label.to_lowercase();
                if !names.iter().any(|n| label_lower.contains(n.as_str())) {
                    report.warn(
                        IssueCode::AxisLabelMismatch,
                        format!("{axis_name}-axis label '{label}' names none of its {role} variables"),
                    );
                }
            }
        }

        if let Some(findings) = &ann.key_findings {
            let len = weighted_len(findings);
            if len > self.config.key_findings_budget {
                report.error(
                    IssueCode::KeyFindingsTooLong,
                    format!(
                        "key_findings weighs {len}, limit is {}",
                        self.config.key_findings_budget
                    ),
                );
            }
            for word in find_hedge_words(findings) {
                report.error(
                    IssueCode::SpeculativeWording,
                    format!("key_findings contains speculative word '{word}'"),
                );
            }
        }

        let has_table_data = ann.table_csv.is_some() || ann.table_path.is_some();
        if ann.figure_type == FigureType::Table {
            if !has_table_data {
                report.warn(
                    IssueCode::MissingTableData,
                    "table without table_csv or table_path",
                );
            }
        } else if has_table_data {
            report.error(
                IssueCode::TableDataOnNonTable,
                format!("{} must not carry table_csv or table_path", ann.figure_type),
            );
        }

        let accepted = self.verdict(&report, LENIENT_BBOX_ERRORS);
        debug!(
            region = %ann.label(),
            accepted,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "region checked"
        );
        CheckOutcome { accepted, report }
    }

    /// Check, and if the box overflows the page, clamp it and check again.
    pub fn check_bbox_with_repair(
        &self,
        ann: BBoxAnnotation,
        page_width: u32,
        page_height: u32,
    ) -> RepairOutcome {
        let first = self.check_bbox(&ann, page_width, page_height);
        if !first.report.has_error(IssueCode::BBoxOutOfPage) {
            return RepairOutcome {
                annotation: ann,
                outcome: first,
                repaired: false,
            };
        }

        let original = ann.bbox;
        let mut repaired = ann;
        repaired.bbox = original.clamp_to(page_width, page_height);

        let mut outcome = self.check_bbox(&repaired, page_width, page_height);
        outcome.report.warn(
            IssueCode::BBoxClamped,
            format!("bbox {original} clamped to {}", repaired.bbox),
        );
        debug!(region = %repaired.label(), accepted = outcome.accepted, "region repaired");
        RepairOutcome {
            annotation: repaired,
            outcome,
            repaired: true,
        }
    }

    // ── Samples ──────────────────────────────────────────────────────────

    /// Samples are always checked strictly.
    pub fn check_sample(&self, sample: &ConversationSample) -> CheckOutcome {
        let mut report = ValidationReport::new();
        let text = sample.full_text();
        let image_count = sample.image_count();

        let tags = text.matches("<image>").count();
        if tags != image_count {
            report.error(
                IssueCode::ImageTagMismatch,
                format!("{tags} <image> tags for {image_count} images"),
            );
        }

        if sample.is_multi_image() {
            for (name, list) in [("width_list", &sample.width_list), ("height_list", &sample.height_list)] {
                let len = list.as_ref().map(Vec::len);
                if len != Some(image_count) {
                    report.error(
                        IssueCode::SizeListMismatch,
                        format!(
                            "{name} has {} entries for {image_count} images",
                            len.map_or_else(|| "no".to_string(), |n| n.to_string())
                        ),
                    );
                }
            }
        } else if sample.width.is_none() || sample.height.is_none() {
            report.error(
                IssueCode::MissingImageSize,
                "single-image sample lacks width/height",
            );
        }

        if !turns_alternate(sample) {
            report.error(
                IssueCode::BadTurnOrder,
                "turns must alternate human/gpt, starting with human and ending with gpt",
            );
        }

        let sizes = sample.image_sizes();
        for (i, caps) in RE_GROUNDING_BOX.captures_iter(&text).enumerate() {
            let Some(&(w, h)) = sizes.get(i.min(sizes.len().saturating_sub(1))) else {
                report.warn(
                    IssueCode::MissingImageSize,
                    format!("grounding box {i} has no image size to check against"),
                );
                continue;
            };
            let coords: Vec<u64> = (1..=4)
                .map(|g| caps[g].parse::<u64>().unwrap_or(u64::MAX))
                .collect();
            let (x1, y1, x2, y2) = (coords[0], coords[1], coords[2], coords[3]);
            if !(x1 < x2 && x2 <= u64::from(w) && y1 < y2 && y2 <= u64::from(h)) {
                report.error(
                    IssueCode::GroundingOutOfBounds,
                    format!("grounding box [{x1},{y1},{x2},{y2}] outside image {w}x{h}"),
                );
            }
        }

        let accepted = report.errors.is_empty();
        debug!(sample = %sample.id, accepted, "sample checked");
        CheckOutcome { accepted, report }
    }

    fn verdict(&self, report: &ValidationReport, lenient_limit: usize) -> bool {
        match self.config.mode {
            CheckMode::Strict => report.errors.is_empty(),
            CheckMode::Lenient => {
                !report.has_policy_error() && report.errors.len() < lenient_limit
            }
        }
    }
}

fn check_section_levels(doc: &DocumentAnnotation, report: &mut ValidationReport) {
    let levels: Vec<u8> = doc.sections.iter().map(|s| s.level()).collect();
    if levels.iter().min() != Some(&1) {
        report.warn(
            IssueCode::SectionLevelStart,
            format!("section levels should start at 1, lowest is {}", levels.iter().min().copied().unwrap_or(0)),
        );
    }
    for pair in levels.windows(2) {
        if pair[1] > pair[0] + 1 {
            report.warn(
                IssueCode::SectionLevelSkip,
                format!("section level jumps {} -> {}", pair[0], pair[1]),
            );
        }
    }
}

fn turns_alternate(sample: &ConversationSample) -> bool {
    let turns = &sample.conversations;
    if turns.is_empty() {
        return false;
    }
    let alternating = turns.iter().enumerate().all(|(i, t)| {
        let expected = if i % 2 == 0 { Speaker::Human } else { Speaker::Gpt };
        t.from == expected
    });
    alternating && turns.last().map(|t| t.from) == Some(Speaker::Gpt)
}
