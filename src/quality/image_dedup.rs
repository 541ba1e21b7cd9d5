//! Region deduplication: geometric overlap per page, then perceptual hash
//! across the corpus.

use super::phash::{HashIndex, LinearHashIndex, PerceptualHasher};
use super::report::StageCount;
use super::text_dedup::jaccard;
use crate::config::QualityConfig;
use crate::schema::BBoxAnnotation;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Jaccard similarity of the lower-cased whitespace tokens of two captions;
/// zero when either is missing or blank.
pub fn caption_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    let tokens = |s: &str| -> HashSet<String> {
        s.to_lowercase().split_whitespace().map(str::to_string).collect()
    };
    match (a, b) {
        (Some(a), Some(b)) => jaccard(&tokens(a), &tokens(b)),
        _ => 0.0,
    }
}

/// Per-stage counts of one [`ImageDeduplicator::deduplicate_bbox_annotations`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBoxDedupReport {
    pub positional: StageCount,
    pub perceptual: StageCount,
    /// Kept records whose missing caption was filled from a dropped duplicate.
    pub captions_backfilled: usize,
    /// Crops that could not be loaded and were kept without comparison.
    pub unhashable: usize,
}

impl BBoxDedupReport {
    pub fn total(&self) -> StageCount {
        StageCount::new(self.positional.before, self.perceptual.after)
    }
}

#[derive(Debug)]
pub struct ImageDeduplicator {
    iou_threshold: f64,
    max_distance: u32,
    caption_threshold: f64,
    hasher: PerceptualHasher,
}

impl Default for ImageDeduplicator {
    fn default() -> Self {
        Self::from_config(&QualityConfig::default())
    }
}

impl ImageDeduplicator {
    pub fn from_config(config: &QualityConfig) -> Self {
        Self {
            iou_threshold: config.iou_threshold,
            max_distance: config.max_hash_distance,
            caption_threshold: config.caption_similarity,
            hasher: PerceptualHasher::new(config.hash_size),
        }
    }

    /// Positional then perceptual dedup; crops are resolved under `image_dir`.
    pub fn deduplicate_bbox_annotations(
        &self,
        annotations: Vec<BBoxAnnotation>,
        image_dir: &Path,
    ) -> (Vec<BBoxAnnotation>, BBoxDedupReport) {
        let mut report = BBoxDedupReport::default();

        let before = annotations.len();
        let (kept, backfilled) = self.deduplicate_by_position(annotations);
        report.positional = StageCount::new(before, kept.len());
        report.captions_backfilled = backfilled;

        let before = kept.len();
        let mut index = LinearHashIndex::new();
        let (kept, unhashable) = self.deduplicate_by_image_content(kept, image_dir, &mut index);
        report.perceptual = StageCount::new(before, kept.len());
        report.unhashable = unhashable;

        info!(
            before = report.positional.before,
            after = kept.len(),
            by_position = report.positional.removed(),
            by_image = report.perceptual.removed(),
            backfilled,
            unhashable,
            "region dedup"
        );
        (kept, report)
    }

    /// Within each `(paper_id, page_index)` group, largest and most confident
    /// first, drop a box that overlaps a kept box of the same kind by more
    /// than the IoU threshold.
    ///
    /// Groups keep first-seen order. Returns the survivors and the number of
    /// captions backfilled.
    pub fn deduplicate_by_position(
        &self,
        annotations: Vec<BBoxAnnotation>,
    ) -> (Vec<BBoxAnnotation>, usize) {
        let mut groups: Vec<Vec<BBoxAnnotation>> = Vec::new();
        let mut group_of: HashMap<(String, usize), usize> = HashMap::new();
        for ann in annotations {
            let key = (ann.paper_id.clone(), ann.page_index);
            let g = *group_of.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[g].push(ann);
        }

        let mut out = Vec::new();
        let mut backfilled = 0;
        for mut page in groups {
            page.sort_by(|a, b| {
                b.bbox.area().cmp(&a.bbox.area()).then_with(|| {
                    let (ca, cb) = (a.confidence_score().unwrap_or(0.0), b.confidence_score().unwrap_or(0.0));
                    cb.total_cmp(&ca)
                })
            });

            let mut kept: Vec<BBoxAnnotation> = Vec::with_capacity(page.len());
            for ann in page {
                let dup = kept.iter().position(|k| {
                    k.figure_type == ann.figure_type && ann.iou(k) > self.iou_threshold
                });
                match dup {
                    Some(i) => {
                        debug!(
                            dropped = %ann.label(),
                            kept = %kept[i].label(),
                            iou = ann.iou(&kept[i]),
                            "positional duplicate"
                        );
                        if kept[i].caption.is_none() && ann.caption.is_some() {
                            kept[i].caption = ann.caption;
                            backfilled += 1;
                        }
                    }
                    None => kept.push(ann),
                }
            }
            out.extend(kept);
        }
        (out, backfilled)
    }

    /// Drop a crop when any accepted hash lies within the distance limit and
    /// that record's caption closely matches the crop's caption.
    ///
    /// Crops that cannot be loaded are kept. Returns the survivors and the
    /// number of unloadable crops.
    pub fn deduplicate_by_image_content(
        &self,
        annotations: Vec<BBoxAnnotation>,
        image_dir: &Path,
        index: &mut dyn HashIndex,
    ) -> (Vec<BBoxAnnotation>, usize) {
        let mut kept: Vec<BBoxAnnotation> = Vec::with_capacity(annotations.len());
        let mut unhashable = 0;

        for ann in annotations {
            let path = image_dir.join(&ann.crop_path);
            let hash = match self.hasher.hash_file(&path) {
                Ok(h) => h,
                Err(e) => {
                    warn!(region = %ann.label(), error = %e, "crop not hashable, kept unchecked");
                    unhashable += 1;
                    kept.push(ann);
                    continue;
                }
            };

            let duplicate_of = index.within(&hash, self.max_distance).into_iter().find_map(|n| {
                let matched = &kept[n.id];
                let sim = caption_similarity(ann.caption.as_deref(), matched.caption.as_deref());
                (sim > self.caption_threshold).then_some((n, sim))
            });
            if let Some((n, sim)) = duplicate_of {
                debug!(
                    dropped = %ann.crop_path,
                    kept = %kept[n.id].crop_path,
                    distance = n.distance,
                    caption_similarity = sim,
                    "perceptual duplicate"
                );
                continue;
            }

            index.insert(hash, kept.len());
            kept.push(ann);
        }
        (kept, unhashable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BBox, FigureType};

    fn ann(page: usize, b: [u32; 4], kind: FigureType) -> BBoxAnnotation {
        BBoxAnnotation::new(
            "PMC1",
            page,
            BBox::from_array(b).unwrap(),
            format!("crops/PMC1_p{page:03}_{}_{}.png", b[0], b[1]),
            kind,
        )
    }

    #[test]
    fn smaller_overlapping_box_dropped() {
        let big = ann(0, [0, 0, 100, 100], FigureType::Figure);
        let small = ann(0, [2, 2, 98, 98], FigureType::Figure);
        let (out, _) = ImageDeduplicator::default().deduplicate_by_position(vec![small, big.clone()]);
        assert_eq!(out, vec![big]);
    }

    #[test]
    fn overlap_at_threshold_is_kept() {
        // IoU 0.81
        let big = ann(0, [0, 0, 100, 100], FigureType::Figure);
        let small = ann(0, [5, 5, 95, 95], FigureType::Figure);
        let (out, _) = ImageDeduplicator::default().deduplicate_by_position(vec![big.clone(), small.clone()]);
        assert_eq!(out.len(), 2);

        let config = QualityConfig::builder().iou_threshold(0.8).build().unwrap();
        let (out, _) = ImageDeduplicator::from_config(&config).deduplicate_by_position(vec![big.clone(), small]);
        assert_eq!(out, vec![big]);
    }

    #[test]
    fn different_kinds_never_collapse() {
        let a = ann(0, [0, 0, 100, 100], FigureType::Figure);
        let b = ann(0, [0, 0, 100, 100], FigureType::Table);
        let (out, _) = ImageDeduplicator::default().deduplicate_by_position(vec![a, b]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn different_pages_never_collapse() {
        let a = ann(0, [0, 0, 100, 100], FigureType::Figure);
        let b = ann(1, [0, 0, 100, 100], FigureType::Figure);
        let (out, _) = ImageDeduplicator::default().deduplicate_by_position(vec![a, b]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn caption_backfilled_from_dropped_duplicate() {
        let big = ann(0, [0, 0, 100, 100], FigureType::Figure);
        let small = ann(0, [2, 2, 99, 99], FigureType::Figure).with_caption("Figure 2: Survival curves");
        let (out, backfilled) = ImageDeduplicator::default().deduplicate_by_position(vec![big, small]);
        assert_eq!(out.len(), 1);
        assert_eq!(backfilled, 1);
        assert_eq!(out[0].caption.as_deref(), Some("Survival curves"));
    }

    #[test]
    fn equal_area_prefers_higher_confidence() {
        let low = ann(0, [0, 0, 100, 100], FigureType::Figure).with_confidence(0.2).unwrap();
        let mut high = ann(0, [1, 1, 101, 101], FigureType::Figure).with_confidence(0.9).unwrap();
        high.crop_path = "crops/high.png".into();
        let (out, _) = ImageDeduplicator::default().deduplicate_by_position(vec![low, high]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].crop_path, "crops/high.png");
    }

    #[test]
    fn unloadable_crops_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let a = ann(0, [0, 0, 10, 10], FigureType::Figure).with_caption("same");
        let b = ann(1, [0, 0, 10, 10], FigureType::Figure).with_caption("same");
        let mut index = LinearHashIndex::new();
        let (out, unhashable) =
            ImageDeduplicator::default().deduplicate_by_image_content(vec![a, b], dir.path(), &mut index);
        assert_eq!(out.len(), 2);
        assert_eq!(unhashable, 2);
        assert!(index.is_empty());
    }

    #[test]
    fn caption_similarity_tokens() {
        assert_eq!(caption_similarity(Some("A b"), Some("a B")), 1.0);
        assert_eq!(caption_similarity(None, Some("a")), 0.0);
        assert!((caption_similarity(Some("a b c"), Some("a b d")) - 0.5).abs() < 1e-9);
    }
}
