//! Geometry and enum primitives shared by document and region records.

use crate::error::SchemaError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Bounding box ─────────────────────────────────────────────────────────

/// Axis-aligned pixel rectangle at the render DPI.
///
/// Construction guarantees `x1 < x2` and `y1 < y2`; coordinates are unsigned
/// so the `>= 0` half of the invariant is carried by the type. Whether the box
/// fits its page is a separate, page-dependent question answered by
/// [`BBox::fits_within`] (and by the consistency checker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBBox")]
pub struct BBox {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

#[derive(Deserialize)]
struct RawBBox {
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
}

impl TryFrom<RawBBox> for BBox {
    type Error = SchemaError;

    fn try_from(raw: RawBBox) -> Result<Self, Self::Error> {
        let err = SchemaError::InvalidBBox {
            x1: raw.x1,
            y1: raw.y1,
            x2: raw.x2,
            y2: raw.y2,
        };
        let to_u32 = |v: i64| u32::try_from(v).map_err(|_| err.clone());
        BBox::new(to_u32(raw.x1)?, to_u32(raw.y1)?, to_u32(raw.x2)?, to_u32(raw.y2)?)
    }
}

impl BBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self, SchemaError> {
        if x1 >= x2 || y1 >= y2 {
            return Err(SchemaError::InvalidBBox {
                x1: x1.into(),
                y1: y1.into(),
                x2: x2.into(),
                y2: y2.into(),
            });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Build from `[x1, y1, x2, y2]`.
    pub fn from_array(v: [u32; 4]) -> Result<Self, SchemaError> {
        Self::new(v[0], v[1], v[2], v[3])
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    pub fn to_array(&self) -> [u32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// True when `0 <= x1 < x2 <= page_width` and `0 <= y1 < y2 <= page_height`.
    pub fn fits_within(&self, page_width: u32, page_height: u32) -> bool {
        self.x2 <= page_width && self.y2 <= page_height
    }

    /// Intersection-over-union with `other`, in `[0, 1]`.
    ///
    /// Zero when the boxes only touch or do not overlap.
    pub fn iou(&self, other: &BBox) -> f64 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }

        let intersection = u64::from(ix2 - ix1) * u64::from(iy2 - iy1);
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }

    /// Clamp into a `page_width × page_height` page.
    ///
    /// The top-left corner is pulled into `[0, dim - 1]`, the bottom-right into
    /// `[1, dim]`; if that collapses an edge the box is widened to one pixel so
    /// the result is still a valid [`BBox`].
    pub fn clamp_to(&self, page_width: u32, page_height: u32) -> BBox {
        let w = page_width.max(1);
        let h = page_height.max(1);

        let x1 = self.x1.min(w - 1);
        let y1 = self.y1.min(h - 1);
        let mut x2 = self.x2.clamp(1, w);
        let mut y2 = self.y2.clamp(1, h);
        if x2 <= x1 {
            x2 = x1 + 1;
        }
        if y2 <= y1 {
            y2 = y1 + 1;
        }

        BBox { x1, y1, x2, y2 }
    }

    /// Grow by `margin` pixels on every side, staying inside the page.
    pub fn expand(&self, margin: u32, page_width: u32, page_height: u32) -> BBox {
        let grown = BBox {
            x1: self.x1.saturating_sub(margin),
            y1: self.y1.saturating_sub(margin),
            x2: self.x2.saturating_add(margin),
            y2: self.y2.saturating_add(margin),
        };
        grown.clamp_to(page_width, page_height)
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

// ── Page span ────────────────────────────────────────────────────────────

/// Vertical extent of a section on one page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPageSpan")]
pub struct PageSpan {
    page: usize,
    y1: f64,
    y2: f64,
}

#[derive(Deserialize)]
struct RawPageSpan {
    page: usize,
    y1: f64,
    y2: f64,
}

impl TryFrom<RawPageSpan> for PageSpan {
    type Error = SchemaError;

    fn try_from(raw: RawPageSpan) -> Result<Self, Self::Error> {
        PageSpan::new(raw.page, raw.y1, raw.y2)
    }
}

impl PageSpan {
    pub fn new(page: usize, y1: f64, y2: f64) -> Result<Self, SchemaError> {
        if !(y1 >= 0.0 && y2 > y1) {
            return Err(SchemaError::InvalidPageSpan {
                y1: y1.to_string(),
                y2: y2.to_string(),
            });
        }
        Ok(Self { page, y1, y2 })
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn y1(&self) -> f64 {
        self.y1
    }

    pub fn y2(&self) -> f64 {
        self.y2
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Kind of a detected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigureType {
    Figure,
    Table,
    Equation,
    Diagram,
    Flowchart,
    Other,
}

impl FigureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FigureType::Figure => "figure",
            FigureType::Table => "table",
            FigureType::Equation => "equation",
            FigureType::Diagram => "diagram",
            FigureType::Flowchart => "flowchart",
            FigureType::Other => "other",
        }
    }
}

impl fmt::Display for FigureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a plotted variable plays in a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableRole {
    X,
    Y,
    Group,
    Series,
    ConfidenceInterval,
    Legend,
}

impl VariableRole {
    /// Roles whose values are a finite set of categories.
    pub fn is_categorical(&self) -> bool {
        matches!(
            self,
            VariableRole::Group | VariableRole::Series | VariableRole::Legend
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableRole::X => "x",
            VariableRole::Y => "y",
            VariableRole::Group => "group",
            VariableRole::Series => "series",
            VariableRole::ConfidenceInterval => "confidence_interval",
            VariableRole::Legend => "legend",
        }
    }
}

impl fmt::Display for VariableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisScale {
    Linear,
    Log,
}

// ── Text normalisation ───────────────────────────────────────────────────

static RE_CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x1f\x7f-\x9f]").expect("static regex"));

static RE_CONTROL_KEEP_LINES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f-\x9f]").expect("static regex")
});

static RE_TRAILING_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[。，；：！？.,:;!?]+$").expect("static regex"));

/// Remove every C0/C1 control character.
pub(crate) fn strip_control(s: &str) -> String {
    RE_CONTROL.replace_all(s, "").into_owned()
}

/// Remove control characters but keep tabs and line breaks.
pub(crate) fn strip_control_keep_lines(s: &str) -> String {
    RE_CONTROL_KEEP_LINES.replace_all(s, "").into_owned()
}

/// Remove trailing ASCII or full-width punctuation (headings only).
pub(crate) fn strip_trailing_punct(s: &str) -> String {
    RE_TRAILING_PUNCT.replace(s, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(x1: u32, y1: u32, x2: u32, y2: u32) -> BBox {
        BBox::new(x1, y1, x2, y2).unwrap()
    }

    #[test]
    fn rejects_inverted_box() {
        assert!(BBox::new(10, 0, 10, 5).is_err());
        assert!(BBox::new(0, 9, 5, 3).is_err());
    }

    #[test]
    fn rejects_negative_coordinates_on_parse() {
        let r: Result<BBox, _> = serde_json::from_str(r#"{"x1":-1,"y1":0,"x2":5,"y2":5}"#);
        let msg = r.unwrap_err().to_string();
        assert!(msg.contains("0 <= x1 < x2"), "got: {msg}");
    }

    #[test]
    fn iou_identity_and_symmetry() {
        let a = bb(0, 0, 100, 100);
        let b = bb(5, 5, 95, 95);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), b.iou(&a));
        assert!((a.iou(&b) - 0.81).abs() < 1e-9);
    }

    #[test]
    fn iou_zero_for_touching_boxes() {
        let a = bb(0, 0, 10, 10);
        let b = bb(10, 0, 20, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn clamp_pulls_overflow_inside_page() {
        let b = bb(50, 40, 1210, 900);
        let c = b.clamp_to(1200, 800);
        assert_eq!(c.to_array(), [50, 40, 1200, 800]);
        assert!(c.fits_within(1200, 800));
    }

    #[test]
    fn clamp_keeps_box_valid_when_fully_outside() {
        let b = bb(1300, 900, 1400, 950);
        let c = b.clamp_to(1200, 800);
        assert_eq!(c.to_array(), [1199, 799, 1200, 800]);
    }

    #[test]
    fn expand_stays_on_page() {
        let b = bb(10, 10, 90, 90);
        assert_eq!(b.expand(50, 100, 100).to_array(), [0, 0, 100, 100]);
    }

    #[test]
    fn page_span_requires_positive_extent() {
        assert!(PageSpan::new(0, 10.0, 10.0).is_err());
        assert!(PageSpan::new(0, -1.0, 10.0).is_err());
        assert!(PageSpan::new(2, 0.0, 10.5).is_ok());
    }

    #[test]
    fn categorical_roles() {
        assert!(VariableRole::Group.is_categorical());
        assert!(VariableRole::Legend.is_categorical());
        assert!(!VariableRole::Y.is_categorical());
        assert!(!VariableRole::ConfidenceInterval.is_categorical());
    }

    #[test]
    fn trailing_punctuation_is_stripped() {
        assert_eq!(strip_trailing_punct("Methods."), "Methods");
        assert_eq!(strip_trailing_punct("结果："), "结果");
        assert_eq!(strip_control("a\u{0007}b"), "ab");
        assert_eq!(strip_control_keep_lines("a\nb\u{0000}"), "a\nb");
    }
}
