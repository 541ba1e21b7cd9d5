//! Detector output: candidate regions found on rendered pages.
//!
//! Detection itself happens upstream; this module only reads its JSON list
//! and orders the regions the way the annotator visits them.

use crate::error::QcError;
use crate::schema::{BBox, FigureType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One candidate region, in rendered-pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    pub page_index: usize,
    pub bbox: BBox,
    pub figure_type: FigureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

/// Read a detector output file: a JSON array of [`DetectedRegion`].
pub fn load_detections(path: &Path) -> Result<Vec<DetectedRegion>, QcError> {
    if !path.exists() {
        return Err(QcError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| QcError::ParseFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Regions grouped by page (ascending), each page sorted top-to-bottom then
/// left-to-right.
pub fn group_by_page(regions: Vec<DetectedRegion>) -> BTreeMap<usize, Vec<DetectedRegion>> {
    let mut grouped: BTreeMap<usize, Vec<DetectedRegion>> = BTreeMap::new();
    for region in regions {
        grouped.entry(region.page_index).or_default().push(region);
    }
    for page in grouped.values_mut() {
        page.sort_by_key(|r| (r.bbox.y1(), r.bbox.x1()));
    }
    grouped
}

/// Relative crop path of the `i`-th region on a page.
pub fn crop_file_name(paper_id: &str, page_index: usize, i: usize) -> String {
    format!("crops/{paper_id}_p{page_index:03}_fig{i:02}.png")
}

/// Where the full rendered page is saved, for grounding samples.
pub fn page_file_name(paper_id: &str, page_index: usize) -> String {
    format!("pages/{paper_id}_p{page_index:03}.png")
}
