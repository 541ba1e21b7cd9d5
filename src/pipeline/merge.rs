//! Page batching for document annotation, and merging the partial
//! documents the batches produce.
//!
//! ```text
//!  pages:   0 1 2 3 4 5 6 7 8
//!  batch 1: [0 1 2 3 4]
//!  batch 2:         [4 5 6 7 8]      (overlap = 1)
//! ```
//!
//! A section cut by a batch boundary shows up in both batches; the merge
//! keeps one copy per `(title, level)`, preferring the longer text.

use crate::schema::{DocumentAnnotation, Section};
use std::collections::HashMap;
use tracing::debug;

/// Half-open page ranges `(start, end)` covering `0..page_count`.
///
/// Consecutive ranges share `overlap` pages. Planning stops once the next
/// start would fall inside the final overlap window, so the last batch is
/// never just a repeat of the previous batch's tail.
pub fn plan_page_batches(page_count: usize, batch_pages: usize, overlap: usize) -> Vec<(usize, usize)> {
    let batch_pages = batch_pages.max(1);
    let mut batches = Vec::new();
    let mut start = 0;

    while start < page_count {
        let end = (start + batch_pages).min(page_count);
        batches.push((start, end));

        let next = end.saturating_sub(overlap).max(start + 1);
        if next >= page_count.saturating_sub(overlap) {
            break;
        }
        start = next;
    }
    batches
}

/// One section per `(title, level)`, at the position of its first
/// occurrence; a later duplicate replaces the text only when it is longer.
pub fn merge_sections(sections: Vec<Section>) -> Vec<Section> {
    let mut merged: Vec<Section> = Vec::with_capacity(sections.len());
    let mut seen: HashMap<(String, u8), usize> = HashMap::new();

    for section in sections {
        let key = (section.title.clone(), section.level());
        match seen.get(&key) {
            Some(&i) => {
                if section.text.chars().count() > merged[i].text.chars().count() {
                    debug!(title = %section.title, "overlapping section replaced by longer copy");
                    merged[i] = section;
                }
            }
            None => {
                seen.insert(key, merged.len());
                merged.push(section);
            }
        }
    }
    merged
}

/// Combine the successful batches of one paper, in batch order.
///
/// Metadata (title, abstract, authors, …) comes from the first batch; the
/// sections of all batches are merged. References are dropped: they cluster
/// on the last pages and batch replies list them unreliably.
pub fn merge_document_batches(batches: Vec<DocumentAnnotation>) -> Option<DocumentAnnotation> {
    let mut iter = batches.into_iter();
    let mut merged = iter.next()?;

    let mut sections = std::mem::take(&mut merged.sections);
    for batch in iter {
        sections.extend(batch.sections);
    }
    merged.sections = merge_sections(sections);
    merged.references = None;
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Reference;

    #[test]
    fn batches_overlap_by_one_page() {
        assert_eq!(plan_page_batches(12, 5, 1), vec![(0, 5), (4, 9), (8, 12)]);
    }

    #[test]
    fn single_batch_for_short_documents() {
        assert_eq!(plan_page_batches(3, 5, 1), vec![(0, 3)]);
        assert_eq!(plan_page_batches(5, 5, 1), vec![(0, 5)]);
    }

    #[test]
    fn no_tail_batch_inside_overlap() {
        // (8, 9) would only repeat page 8
        assert_eq!(plan_page_batches(9, 5, 1), vec![(0, 5), (4, 9)]);
    }

    #[test]
    fn no_pages_no_batches() {
        assert!(plan_page_batches(0, 5, 1).is_empty());
    }

    #[test]
    fn every_page_is_covered() {
        for pages in 1..40 {
            for (batch, overlap) in [(5, 1), (3, 2), (4, 0), (1, 0)] {
                let plan = plan_page_batches(pages, batch, overlap);
                assert_eq!(plan[0].0, 0);
                assert_eq!(plan.last().unwrap().1, pages, "pages={pages} batch={batch}");
                for w in plan.windows(2) {
                    assert!(w[1].0 <= w[0].1, "gap in {plan:?}");
                    assert!(w[1].0 > w[0].0);
                }
            }
        }
    }

    #[test]
    fn longer_duplicate_section_wins_first_position_kept() {
        let merged = merge_sections(vec![
            Section::new("Introduction", 1, "short").unwrap(),
            Section::new("Methods", 1, "m").unwrap(),
            Section::new("Introduction", 1, "a much longer introduction").unwrap(),
            Section::new("Introduction", 2, "sub").unwrap(),
        ]);
        let titles: Vec<(&str, u8)> = merged.iter().map(|s| (s.title.as_str(), s.level())).collect();
        assert_eq!(titles, vec![("Introduction", 1), ("Methods", 1), ("Introduction", 2)]);
        assert_eq!(merged[0].text, "a much longer introduction");
    }

    #[test]
    fn metadata_from_first_batch_references_dropped() {
        let mut first = DocumentAnnotation::new(
            "PMC1",
            "Trial results",
            "abstract",
            vec![Section::new("Introduction", 1, "intro").unwrap()],
        );
        first.references = Some(vec![Reference::new("Smith 2020")]);
        let second = DocumentAnnotation::new(
            "PMC1",
            "Garbled title",
            "",
            vec![
                Section::new("Introduction", 1, "intro").unwrap(),
                Section::new("Results", 1, "r").unwrap(),
            ],
        );

        let merged = merge_document_batches(vec![first, second]).unwrap();
        assert_eq!(merged.title, "Trial results");
        assert_eq!(merged.sections.len(), 2);
        assert!(merged.references.is_none());
    }

    #[test]
    fn no_batches_no_document() {
        assert!(merge_document_batches(vec![]).is_none());
    }
}
