//! Whole-dataset deduplication with referential integrity between documents
//! and their regions.

use super::image_dedup::{BBoxDedupReport, ImageDeduplicator};
use super::report::StageCount;
use super::text_dedup::{DocumentDedupReport, TextDeduplicator};
use crate::config::QualityConfig;
use crate::schema::{BBoxAnnotation, DocumentAnnotation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Counts for every stage of [`DatasetDeduplicator::deduplicate_dataset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    pub documents: DocumentDedupReport,
    /// Regions before and after dropping those whose paper did not survive.
    pub orphans: StageCount,
    pub bboxes: BBoxDedupReport,
}

/// Output of one dataset dedup run.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub documents: Vec<DocumentAnnotation>,
    pub bboxes: Vec<BBoxAnnotation>,
    pub stats: DedupStats,
}

#[derive(Debug, Default)]
pub struct DatasetDeduplicator {
    text: TextDeduplicator,
    image: ImageDeduplicator,
}

impl DatasetDeduplicator {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            text: TextDeduplicator::from_config(config),
            image: ImageDeduplicator::from_config(config),
        }
    }

    /// Dedup documents, drop regions of papers that did not survive, then
    /// dedup the remaining regions. Every returned region's `paper_id` names
    /// a returned document.
    pub fn deduplicate_dataset(
        &self,
        documents: Vec<DocumentAnnotation>,
        bboxes: Vec<BBoxAnnotation>,
        image_dir: &Path,
    ) -> DedupOutcome {
        let docs_before = documents.len();
        let bboxes_before = bboxes.len();

        let (documents, doc_report) = self.text.deduplicate_documents(documents);
        let surviving: HashSet<&str> = documents.iter().map(|d| d.paper_id.as_str()).collect();

        let bboxes: Vec<_> = bboxes
            .into_iter()
            .filter(|b| surviving.contains(b.paper_id.as_str()))
            .collect();
        let orphans = StageCount::new(bboxes_before, bboxes.len());

        let (bboxes, bbox_report) = self.image.deduplicate_bbox_annotations(bboxes, image_dir);

        info!(
            documents_before = docs_before,
            documents_after = documents.len(),
            bboxes_before,
            bboxes_after = bboxes.len(),
            orphans = orphans.removed(),
            "dataset dedup complete"
        );

        DedupOutcome {
            documents,
            bboxes,
            stats: DedupStats {
                documents: doc_report,
                orphans,
                bboxes: bbox_report,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BBox, FigureType, Section};

    fn doc(id: &str, title: &str) -> DocumentAnnotation {
        DocumentAnnotation::new(id, title, "short", vec![Section::new("Intro", 1, "").unwrap()])
    }

    fn region(id: &str) -> BBoxAnnotation {
        BBoxAnnotation::new(id, 0, BBox::new(0, 0, 50, 50).unwrap(), "crops/none.png", FigureType::Figure)
    }

    #[test]
    fn regions_of_dropped_papers_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let docs = vec![doc("PMC1", "Same title"), doc("PMC2", "Same title!")];
        let bboxes = vec![region("PMC1"), region("PMC2"), region("PMC9")];
        let out = DatasetDeduplicator::default().deduplicate_dataset(docs, bboxes, dir.path());

        assert_eq!(out.documents.len(), 1);
        assert_eq!(out.bboxes.len(), 1);
        assert_eq!(out.bboxes[0].paper_id, "PMC1");
        assert_eq!(out.stats.orphans, StageCount::new(3, 1));
        assert_eq!(out.stats.bboxes.unhashable, 1);
    }

    #[test]
    fn empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let out = DatasetDeduplicator::default().deduplicate_dataset(vec![], vec![], dir.path());
        assert!(out.documents.is_empty());
        assert!(out.bboxes.is_empty());
        assert_eq!(out.stats, DedupStats::default());
    }
}
