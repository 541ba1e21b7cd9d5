//! Diagnostic reports produced by the consistency checker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable identity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    // ── Document ──
    InvalidPaperId,
    TitleTooShort,
    AbstractTooShort,
    MissingSections,
    SectionLevelStart,
    SectionLevelSkip,
    InvalidAffiliationRef,
    InvalidDoi,
    InvalidDate,

    // ── Region ──
    #[serde(rename = "bbox_out_of_page")]
    BBoxOutOfPage,
    #[serde(rename = "bbox_clamped")]
    BBoxClamped,
    CaptionTypeMismatch,
    InvalidCropPath,
    AxisLabelMismatch,
    KeyFindingsTooLong,
    SpeculativeWording,
    MissingTableData,
    TableDataOnNonTable,

    // ── Sample ──
    ImageTagMismatch,
    SizeListMismatch,
    MissingImageSize,
    BadTurnOrder,
    GroundingOutOfBounds,
}

impl IssueCode {
    /// Policy findings reject a record regardless of check mode.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            IssueCode::SpeculativeWording | IssueCode::TableDataOnNonTable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::InvalidPaperId => "invalid_paper_id",
            IssueCode::TitleTooShort => "title_too_short",
            IssueCode::AbstractTooShort => "abstract_too_short",
            IssueCode::MissingSections => "missing_sections",
            IssueCode::SectionLevelStart => "section_level_start",
            IssueCode::SectionLevelSkip => "section_level_skip",
            IssueCode::InvalidAffiliationRef => "invalid_affiliation_ref",
            IssueCode::InvalidDoi => "invalid_doi",
            IssueCode::InvalidDate => "invalid_date",
            IssueCode::BBoxOutOfPage => "bbox_out_of_page",
            IssueCode::BBoxClamped => "bbox_clamped",
            IssueCode::CaptionTypeMismatch => "caption_type_mismatch",
            IssueCode::InvalidCropPath => "invalid_crop_path",
            IssueCode::AxisLabelMismatch => "axis_label_mismatch",
            IssueCode::KeyFindingsTooLong => "key_findings_too_long",
            IssueCode::SpeculativeWording => "speculative_wording",
            IssueCode::MissingTableData => "missing_table_data",
            IssueCode::TableDataOnNonTable => "table_data_on_non_table",
            IssueCode::ImageTagMismatch => "image_tag_mismatch",
            IssueCode::SizeListMismatch => "size_list_mismatch",
            IssueCode::MissingImageSize => "missing_image_size",
            IssueCode::BadTurnOrder => "bad_turn_order",
            IssueCode::GroundingOutOfBounds => "grounding_out_of_bounds",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding: a code plus a message naming the offending value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: IssueCode,
    pub message: String,
}

/// Errors and warnings of a single check call, in the order they were found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, code: IssueCode, message: impl Into<String>) {
        self.errors.push(Issue {
            code,
            message: message.into(),
        });
    }

    pub fn warn(&mut self, code: IssueCode, message: impl Into<String>) {
        self.warnings.push(Issue {
            code,
            message: message.into(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    pub fn has_error(&self, code: IssueCode) -> bool {
        self.errors.iter().any(|i| i.code == code)
    }

    pub fn has_warning(&self, code: IssueCode) -> bool {
        self.warnings.iter().any(|i| i.code == code)
    }

    pub fn has_policy_error(&self) -> bool {
        self.errors.iter().any(|i| i.code.is_policy())
    }

    /// Every code in the report, errors first.
    pub fn codes(&self) -> impl Iterator<Item = IssueCode> + '_ {
        self.errors.iter().chain(&self.warnings).map(|i| i.code)
    }

    /// Human-readable dump, one finding per line.
    pub fn render(&self) -> String {
        let mut out = Vec::new();
        if !self.errors.is_empty() {
            out.push("=== Errors ===".to_string());
            out.extend(
                self.errors
                    .iter()
                    .map(|i| format!("✗ [{}] {}", i.code, i.message)),
            );
            out.push(String::new());
        }
        if !self.warnings.is_empty() {
            out.push("=== Warnings ===".to_string());
            out.extend(
                self.warnings
                    .iter()
                    .map(|i| format!("⚠ [{}] {}", i.code, i.message)),
            );
            out.push(String::new());
        }
        if self.is_clean() {
            out.push("✓ all checks passed".to_string());
        }
        out.join("\n")
    }
}

/// Verdict of one check call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub accepted: bool,
    pub report: ValidationReport,
}

/// Record counts on either side of one deduplication stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCount {
    pub before: usize,
    pub after: usize,
}

impl StageCount {
    pub fn new(before: usize, after: usize) -> Self {
        Self { before, after }
    }

    pub fn removed(&self) -> usize {
        self.before.saturating_sub(self.after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report_renders_pass_line() {
        let r = ValidationReport::new();
        assert!(r.is_clean());
        assert_eq!(r.render(), "✓ all checks passed");
    }

    #[test]
    fn render_lists_errors_before_warnings() {
        let mut r = ValidationReport::new();
        r.warn(IssueCode::InvalidDoi, "doi looks wrong: 11.1/x");
        r.error(IssueCode::InvalidDate, "publication_date not YYYY[-MM[-DD]]: 2023-13");
        let text = r.render();
        let e = text.find("invalid_date").unwrap();
        let w = text.find("invalid_doi").unwrap();
        assert!(e < w);
        assert_eq!(r.codes().collect::<Vec<_>>(), vec![IssueCode::InvalidDate, IssueCode::InvalidDoi]);
    }

    #[test]
    fn policy_codes() {
        assert!(IssueCode::SpeculativeWording.is_policy());
        assert!(IssueCode::TableDataOnNonTable.is_policy());
        assert!(!IssueCode::BBoxOutOfPage.is_policy());
    }

    #[test]
    fn serialised_code_matches_display() {
        for code in [IssueCode::BBoxOutOfPage, IssueCode::KeyFindingsTooLong] {
            let v = serde_json::to_value(code).unwrap();
            assert_eq!(v, code.as_str());
        }
    }
}
