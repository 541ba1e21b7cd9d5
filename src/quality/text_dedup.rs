//! Document deduplication: identity, title collision, abstract similarity.

use super::report::StageCount;
use crate::config::QualityConfig;
use crate::schema::DocumentAnnotation;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::{debug, info, warn};

/// Words kept in an abstract fingerprint.
const FINGERPRINT_WORDS: usize = 100;

/// Jaccard similarity of two sets; zero when either is empty.
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Lower-case, keep only alphanumerics and whitespace, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hashes of the most frequent words (longer than two characters) of `text`.
///
/// Each feature is `word:count`, so two abstracts only share a hash when they
/// use a word equally often. Frequency ties keep first-occurrence order.
pub fn abstract_fingerprint(text: &str) -> HashSet<u32> {
    let mut order: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for word in text.to_lowercase().split_whitespace() {
        if word.chars().count() <= 2 {
            continue;
        }
        match index.get(word) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(word.to_string(), order.len());
                order.push((word.to_string(), 1));
            }
        }
    }

    order.sort_by(|a, b| b.1.cmp(&a.1));
    order
        .iter()
        .take(FINGERPRINT_WORDS)
        .map(|(word, count)| feature_hash(&format!("{word}:{count}")))
        .collect()
}

fn feature_hash(feature: &str) -> u32 {
    let digest = Sha256::digest(feature.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Points each document wins over the other on abstract length, section
/// count, author count and reference count. Ties score for neither.
fn completeness_points(a: &DocumentAnnotation, b: &DocumentAnnotation) -> (u8, u8) {
    let criteria = [
        (a.abstract_text.chars().count(), b.abstract_text.chars().count()),
        (a.sections.len(), b.sections.len()),
        (a.author_count(), b.author_count()),
        (a.reference_count(), b.reference_count()),
    ];
    criteria.iter().fold((0, 0), |(pa, pb), (x, y)| {
        if x > y {
            (pa + 1, pb)
        } else if y > x {
            (pa, pb + 1)
        } else {
            (pa, pb)
        }
    })
}

/// Per-stage counts of one [`TextDeduplicator::deduplicate_documents`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDedupReport {
    pub identity: StageCount,
    pub title: StageCount,
    pub abstract_similarity: StageCount,
}

impl DocumentDedupReport {
    pub fn total(&self) -> StageCount {
        StageCount::new(self.identity.before, self.abstract_similarity.after)
    }
}

/// Removes duplicate documents in three stages, each on the survivors of the
/// previous one.
#[derive(Debug, Clone)]
pub struct TextDeduplicator {
    similarity_threshold: f64,
    min_length: usize,
}

impl Default for TextDeduplicator {
    fn default() -> Self {
        Self::from_config(&QualityConfig::default())
    }
}

impl TextDeduplicator {
    pub fn new(similarity_threshold: f64, min_length: usize) -> Self {
        Self {
            similarity_threshold: similarity_threshold.clamp(0.0, 1.0),
            min_length,
        }
    }

    pub fn from_config(config: &QualityConfig) -> Self {
        Self::new(config.abstract_similarity, config.min_abstract_len)
    }

    pub fn deduplicate_documents(
        &self,
        documents: Vec<DocumentAnnotation>,
    ) -> (Vec<DocumentAnnotation>, DocumentDedupReport) {
        let mut report = DocumentDedupReport::default();

        // ── Stage 1: identity ──
        let before = documents.len();
        let docs = dedup_by_identity(documents);
        report.identity = StageCount::new(before, docs.len());

        // ── Stage 2: title collision ──
        let before = docs.len();
        let mut seen_titles = HashSet::new();
        let docs: Vec<_> = docs
            .into_iter()
            .filter(|doc| {
                let fresh = seen_titles.insert(normalize_title(&doc.title));
                if !fresh {
                    warn!(paper_id = %doc.paper_id, title = %doc.title, "duplicate title dropped");
                }
                fresh
            })
            .collect();
        report.title = StageCount::new(before, docs.len());

        // ── Stage 3: abstract similarity ──
        let before = docs.len();
        let mut accepted: Vec<HashSet<u32>> = Vec::new();
        let docs: Vec<_> = docs
            .into_iter()
            .filter(|doc| {
                if doc.abstract_text.chars().count() < self.min_length {
                    return true;
                }
                let fp = abstract_fingerprint(&doc.abstract_text);
                if let Some(sim) = accepted
                    .iter()
                    .map(|seen| jaccard(&fp, seen))
                    .find(|&s| s > self.similarity_threshold)
                {
                    warn!(paper_id = %doc.paper_id, similarity = sim, "near-duplicate abstract dropped");
                    return false;
                }
                accepted.push(fp);
                true
            })
            .collect();
        report.abstract_similarity = StageCount::new(before, docs.len());

        info!(
            before = report.identity.before,
            after = docs.len(),
            by_id = report.identity.removed(),
            by_title = report.title.removed(),
            by_abstract = report.abstract_similarity.removed(),
            "document dedup"
        );
        (docs, report)
    }
}

/// One record per `paper_id`, keeping the more complete one at the position
/// the id was first seen.
fn dedup_by_identity(documents: Vec<DocumentAnnotation>) -> Vec<DocumentAnnotation> {
    let mut kept: Vec<DocumentAnnotation> = Vec::with_capacity(documents.len());
    let mut slot: HashMap<String, usize> = HashMap::new();

    for doc in documents {
        match slot.get(&doc.paper_id) {
            Some(&i) => {
                let (new_pts, old_pts) = completeness_points(&doc, &kept[i]);
                if new_pts > old_pts {
                    debug!(paper_id = %doc.paper_id, new_pts, old_pts, "more complete duplicate replaces earlier record");
                    kept[i] = doc;
                } else {
                    debug!(paper_id = %doc.paper_id, new_pts, old_pts, "duplicate id dropped");
                }
            }
            None => {
                slot.insert(doc.paper_id.clone(), kept.len());
                kept.push(doc);
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Author, Section};

    fn doc(id: &str, title: &str, abstract_text: &str) -> DocumentAnnotation {
        DocumentAnnotation::new(
            id,
            title,
            abstract_text,
            vec![Section::new("Intro", 1, "x").unwrap()],
        )
    }

    const LONG: &str = "Randomised controlled trial comparing early antibiotic therapy against delayed therapy in adult sepsis patients admitted through emergency departments.";

    #[test]
    fn normalize_title_strips_punctuation_and_case() {
        assert_eq!(normalize_title("  COVID-19:  A Review!! "), "covid19 a review");
        assert_eq!(normalize_title("Über   Alles"), "über alles");
    }

    #[test]
    fn duplicate_id_keeps_longer_abstract() {
        let short = doc("PMC1", "Title one", "Short abstract about sepsis care in the ICU ward.");
        let long = doc("PMC1", "Title one", LONG);
        let (out, report) = TextDeduplicator::default().deduplicate_documents(vec![short, long]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].abstract_text, LONG);
        assert_eq!(report.identity, StageCount::new(2, 1));
    }

    #[test]
    fn identity_tie_keeps_first_seen() {
        let a = doc("PMC1", "First title", LONG);
        let mut b = doc("PMC1", "Second title", LONG);
        b.authors = Some(vec![Author::new("A")]);
        b.sections.clear();
        let (out, _) = TextDeduplicator::default().deduplicate_documents(vec![a, b]);
        assert_eq!(out[0].title, "First title");
    }

    #[test]
    fn replacement_keeps_first_position() {
        let a = doc("PMC1", "Alpha paper", "short");
        let b = doc("PMC2", "Beta paper", "short");
        let a2 = doc("PMC1", "Alpha paper", LONG);
        let (out, _) = TextDeduplicator::default().deduplicate_documents(vec![a, b, a2]);
        let ids: Vec<_> = out.iter().map(|d| d.paper_id.as_str()).collect();
        assert_eq!(ids, ["PMC1", "PMC2"]);
        assert_eq!(out[0].abstract_text, LONG);
    }

    #[test]
    fn title_collision_first_wins() {
        let a = doc("PMC1", "Sepsis outcomes", "a");
        let b = doc("PMC2", "SEPSIS  outcomes.", "b");
        let (out, report) = TextDeduplicator::default().deduplicate_documents(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].paper_id, "PMC1");
        assert_eq!(report.title.removed(), 1);
    }

    #[test]
    fn identical_abstracts_under_different_titles_collapse() {
        let a = doc("PMC1", "First", LONG);
        let b = doc("PMC2", "Second", LONG);
        let (out, report) = TextDeduplicator::default().deduplicate_documents(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(report.abstract_similarity.removed(), 1);
    }

    #[test]
    fn short_abstracts_are_never_compared() {
        let a = doc("PMC1", "First", "same short text");
        let b = doc("PMC2", "Second", "same short text");
        let (out, _) = TextDeduplicator::default().deduplicate_documents(vec![a, b]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn fingerprint_ignores_short_words_and_caps_size() {
        assert!(abstract_fingerprint("a an of to").is_empty());
        let many: String = (0..150).map(|i| format!("word{i} ")).collect();
        assert_eq!(abstract_fingerprint(&many).len(), FINGERPRINT_WORDS);
    }

    #[test]
    fn jaccard_basics() {
        let a: HashSet<u32> = [1, 2, 3].into();
        let b: HashSet<u32> = [2, 3, 4].into();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn dedup_is_idempotent() {
        let docs = vec![
            doc("PMC1", "One", LONG),
            doc("PMC1", "One", "short"),
            doc("PMC2", "one", "x"),
            doc("PMC3", "Three", LONG),
        ];
        let d = TextDeduplicator::default();
        let (once, _) = d.deduplicate_documents(docs);
        let (twice, _) = d.deduplicate_documents(once.clone());
        assert_eq!(once, twice);
    }
}
