//! Document-level records: one [`DocumentAnnotation`] per source paper.

use super::base::{strip_control, strip_control_keep_lines, strip_trailing_punct, PageSpan};
use crate::error::SchemaError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Keywords kept per document after normalisation.
pub const MAX_KEYWORDS: usize = 10;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

// ── Section ──────────────────────────────────────────────────────────────

/// A heading plus the merged text under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSection")]
pub struct Section {
    pub title: String,
    level: u8,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_spans: Option<Vec<PageSpan>>,
}

#[derive(Deserialize)]
struct RawSection {
    title: String,
    level: u8,
    #[serde(default)]
    text: String,
    #[serde(default)]
    page_spans: Option<Vec<PageSpan>>,
}

impl TryFrom<RawSection> for Section {
    type Error = SchemaError;

    fn try_from(raw: RawSection) -> Result<Self, Self::Error> {
        let mut section = Section::new(raw.title, raw.level, raw.text)?;
        section.page_spans = raw.page_spans.filter(|s| !s.is_empty());
        Ok(section)
    }
}

impl Section {
    /// Clean the title and text and check the level.
    pub fn new(
        title: impl Into<String>,
        level: u8,
        text: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        if !(1..=6).contains(&level) {
            return Err(SchemaError::InvalidSectionLevel(level));
        }
        let title = strip_trailing_punct(strip_control(&title.into()).trim());
        if title.is_empty() {
            return Err(SchemaError::EmptyField {
                field: "section.title",
            });
        }
        Ok(Self {
            title,
            level,
            text: strip_control_keep_lines(&text.into()),
            page_spans: None,
        })
    }

    /// Heading depth, 1–6.
    pub fn level(&self) -> u8 {
        self.level
    }
}

// ── People and references ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Affiliation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            department: None,
            city: None,
            country: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
    /// Indices into the owning document's `affiliations`.
    #[serde(default)]
    pub affiliation_ids: Vec<usize>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            orcid: None,
            affiliation_ids: Vec::new(),
        }
    }

    pub fn with_affiliations(mut self, ids: impl IntoIterator<Item = usize>) -> Self {
        self.affiliation_ids = ids.into_iter().collect();
        self
    }
}

/// A bibliography entry; `raw_text` is whitespace-collapsed on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawReference")]
pub struct Reference {
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
}

#[derive(Deserialize)]
struct RawReference {
    raw_text: String,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    pmid: Option<String>,
}

impl From<RawReference> for Reference {
    fn from(raw: RawReference) -> Self {
        let mut r = Reference::new(raw.raw_text);
        r.doi = raw.doi;
        r.pmid = raw.pmid;
        r
    }
}

impl Reference {
    pub fn new(raw_text: impl Into<String>) -> Self {
        let cleaned = strip_control_keep_lines(&raw_text.into());
        Self {
            raw_text: RE_WHITESPACE.replace_all(&cleaned, " ").trim().to_string(),
            doi: None,
            pmid: None,
        }
    }
}

// ── Document ─────────────────────────────────────────────────────────────

/// Structured metadata and body of one paper.
///
/// Deserialisation strips control characters, normalises keywords
/// (lower-cased, de-duplicated, at most [`MAX_KEYWORDS`]) and collapses empty
/// optional lists to `None`. Cross-field rules (affiliation indices, section
/// level progression, identifier formats) are left to
/// [`crate::quality::ConsistencyChecker::check_document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDocumentAnnotation")]
pub struct DocumentAnnotation {
    pub paper_id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    pub sections: Vec<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<Author>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliations: Option<Vec<Affiliation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Reference>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
}

#[derive(Deserialize)]
struct RawDocumentAnnotation {
    paper_id: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "abstract", default)]
    abstract_text: String,
    #[serde(default)]
    keywords: Option<Vec<String>>,
    #[serde(default)]
    sections: Vec<Section>,
    #[serde(default)]
    authors: Option<Vec<Author>>,
    #[serde(default)]
    affiliations: Option<Vec<Affiliation>>,
    #[serde(default)]
    references: Option<Vec<Reference>>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    journal: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
}

impl TryFrom<RawDocumentAnnotation> for DocumentAnnotation {
    type Error = SchemaError;

    fn try_from(raw: RawDocumentAnnotation) -> Result<Self, Self::Error> {
        let paper_id = raw.paper_id.trim().to_string();
        if paper_id.is_empty() {
            return Err(SchemaError::EmptyField { field: "paper_id" });
        }

        let mut doc = DocumentAnnotation::new(paper_id, raw.title, raw.abstract_text, raw.sections);
        doc.keywords = raw.keywords.map(normalise_keywords);
        doc.authors = raw.authors.map(|authors| {
            authors
                .into_iter()
                .map(|mut a| {
                    a.name = strip_control(&a.name);
                    a
                })
                .collect()
        });
        doc.affiliations = raw.affiliations.map(|affs| {
            affs.into_iter()
                .map(|mut a| {
                    a.name = strip_control(&a.name);
                    a.department = a.department.map(|s| strip_control(&s));
                    a.city = a.city.map(|s| strip_control(&s));
                    a.country = a.country.map(|s| strip_control(&s));
                    a
                })
                .collect()
        });
        doc.references = raw.references;
        doc.doi = raw.doi.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        doc.journal = raw.journal.map(|s| strip_control(&s));
        doc.publication_date = raw
            .publication_date
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(doc.collapse_empty())
    }
}

impl DocumentAnnotation {
    /// A document with only the required fields; optional metadata starts empty.
    pub fn new(
        paper_id: impl Into<String>,
        title: impl Into<String>,
        abstract_text: impl Into<String>,
        sections: Vec<Section>,
    ) -> Self {
        Self {
            paper_id: paper_id.into(),
            title: strip_control_keep_lines(&title.into()).trim().to_string(),
            abstract_text: strip_control_keep_lines(&abstract_text.into()),
            keywords: None,
            sections,
            authors: None,
            affiliations: None,
            references: None,
            doi: None,
            journal: None,
            publication_date: None,
        }
    }

    pub fn author_count(&self) -> usize {
        self.authors.as_ref().map_or(0, Vec::len)
    }

    pub fn reference_count(&self) -> usize {
        self.references.as_ref().map_or(0, Vec::len)
    }

    fn collapse_empty(mut self) -> Self {
        if self.keywords.as_ref().is_some_and(Vec::is_empty) {
            self.keywords = None;
        }
        if self.authors.as_ref().is_some_and(Vec::is_empty) {
            self.authors = None;
        }
        if self.affiliations.as_ref().is_some_and(Vec::is_empty) {
            self.affiliations = None;
        }
        if self.references.as_ref().is_some_and(Vec::is_empty) {
            self.references = None;
        }
        self
    }
}

fn normalise_keywords(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|k| strip_control(k.trim()).to_lowercase())
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .take(MAX_KEYWORDS)
        .collect()
}
