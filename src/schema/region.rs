//! Region-level records: one [`BBoxAnnotation`] per detected figure, table or
//! equation, grouped per page into a [`BBoxPage`].

use super::base::{strip_control, AxisScale, BBox, FigureType, VariableRole};
use crate::error::SchemaError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_CAPTION_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(Figure|Fig\.?|Table|Tab\.?|Equation|Eq\.?)\s*\d+[:.]?\s*")
        .expect("static regex")
});

/// Map common spellings of a unit onto one canonical symbol.
///
/// Lookup is case-insensitive; unknown units come back trimmed but otherwise
/// untouched. Blank input yields `None`.
pub fn standardize_unit(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let canonical = match trimmed.to_lowercase().as_str() {
        "ml" => "mL",
        "mg" => "mg",
        "ug" | "µg" | "μg" | "mcg" => "μg",
        "ng" => "ng",
        "pg" => "pg",
        "kg" => "kg",
        "g" => "g",
        "l" => "L",
        "dl" => "dL",
        "ul" | "µl" | "μl" => "μL",
        "mol" => "mol",
        "mmol" => "mmol",
        "umol" | "µmol" | "μmol" => "μmol",
        "nm" => "nm",
        "um" | "µm" | "μm" => "μm",
        "mm" => "mm",
        "cm" => "cm",
        "m" => "m",
        "h" | "hr" | "hour" => "h",
        "min" | "minute" => "min",
        "s" | "sec" | "second" => "s",
        "day" | "days" => "d",
        "week" | "weeks" => "week",
        "month" | "months" => "month",
        "year" | "years" => "year",
        "°c" | "℃" | "celsius" => "°C",
        "°f" | "℉" | "fahrenheit" => "°F",
        "k" | "kelvin" => "K",
        "%" | "percent" => "%",
        "pa" => "Pa",
        "kpa" => "kPa",
        "mmhg" => "mmHg",
        _ => return Some(trimmed.to_string()),
    };
    Some(canonical.to_string())
}

/// Strip a leading `Figure 3:` / `Tab. 2.` style numbering and control
/// characters; blank results collapse to `None`.
pub fn clean_caption(raw: &str) -> Option<String> {
    let without_prefix = RE_CAPTION_PREFIX.replace(raw.trim(), "");
    let cleaned = strip_control(&without_prefix).trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

// ── Variable ─────────────────────────────────────────────────────────────

/// A plotted quantity. Only categorical roles may enumerate category values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVariable")]
pub struct Variable {
    name: String,
    role: VariableRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_values: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct RawVariable {
    name: String,
    role: VariableRole,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    category_values: Option<Vec<String>>,
}

impl TryFrom<RawVariable> for Variable {
    type Error = SchemaError;

    fn try_from(raw: RawVariable) -> Result<Self, Self::Error> {
        Variable::new(raw.name, raw.role, raw.unit.as_deref(), raw.category_values)
    }
}

impl Variable {
    pub fn new(
        name: impl Into<String>,
        role: VariableRole,
        unit: Option<&str>,
        category_values: Option<Vec<String>>,
    ) -> Result<Self, SchemaError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(SchemaError::EmptyField {
                field: "variable.name",
            });
        }
        let category_values = category_values.filter(|v| !v.is_empty());
        if category_values.is_some() && !role.is_categorical() {
            return Err(SchemaError::CategoryValuesOnNumericRole {
                name,
                role: role.to_string(),
            });
        }
        Ok(Self {
            name,
            role,
            unit: unit.and_then(standardize_unit),
            category_values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> VariableRole {
        self.role
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn category_values(&self) -> Option<&[String]> {
        self.category_values.as_deref()
    }
}

// ── Axis ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawAxis")]
pub struct Axis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<AxisScale>,
}

#[derive(Deserialize)]
struct RawAxis {
    #[serde(default)]
    x_label: Option<String>,
    #[serde(default)]
    y_label: Option<String>,
    #[serde(default)]
    x_unit: Option<String>,
    #[serde(default)]
    y_unit: Option<String>,
    #[serde(default)]
    scale: Option<AxisScale>,
}

impl From<RawAxis> for Axis {
    fn from(raw: RawAxis) -> Self {
        let label = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Axis {
            x_label: label(raw.x_label),
            y_label: label(raw.y_label),
            x_unit: raw.x_unit.as_deref().and_then(standardize_unit),
            y_unit: raw.y_unit.as_deref().and_then(standardize_unit),
            scale: raw.scale,
        }
    }
}

// ── BBox annotation ──────────────────────────────────────────────────────

/// Structured description of one detected region.
///
/// `bbox` is in pixels of the page rendered at the configured DPI and
/// `crop_path` is relative to the dataset's image directory. Page containment,
/// path shape and key-finding wording are checked by
/// [`crate::quality::ConsistencyChecker::check_bbox`], not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBBoxAnnotation")]
pub struct BBoxAnnotation {
    pub paper_id: String,
    pub page_index: usize,
    pub bbox: BBox,
    pub crop_path: String,
    pub figure_type: FigureType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<Variable>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis: Option<Axis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_findings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence_score: Option<f64>,
}

#[derive(Deserialize)]
struct RawBBoxAnnotation {
    paper_id: String,
    page_index: usize,
    bbox: BBox,
    crop_path: String,
    figure_type: FigureType,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    variables: Option<Vec<Variable>>,
    #[serde(default)]
    axis: Option<Axis>,
    #[serde(default)]
    key_findings: Option<String>,
    #[serde(default)]
    table_csv: Option<String>,
    #[serde(default)]
    table_path: Option<String>,
    #[serde(default)]
    confidence_score: Option<f64>,
}

impl TryFrom<RawBBoxAnnotation> for BBoxAnnotation {
    type Error = SchemaError;

    fn try_from(raw: RawBBoxAnnotation) -> Result<Self, Self::Error> {
        if raw.paper_id.trim().is_empty() {
            return Err(SchemaError::EmptyField { field: "paper_id" });
        }
        let mut ann = BBoxAnnotation::new(
            raw.paper_id.trim(),
            raw.page_index,
            raw.bbox,
            raw.crop_path,
            raw.figure_type,
        );
        ann.caption = raw.caption.as_deref().and_then(clean_caption);
        ann.variables = raw.variables.filter(|v| !v.is_empty());
        ann.axis = raw.axis;
        ann.key_findings = raw
            .key_findings
            .map(|s| strip_control(&s).trim().to_string())
            .filter(|s| !s.is_empty());
        ann.table_csv = raw.table_csv.filter(|s| !s.trim().is_empty());
        ann.table_path = raw.table_path.filter(|s| !s.trim().is_empty());
        ann.set_confidence(raw.confidence_score)?;
        Ok(ann)
    }
}

impl BBoxAnnotation {
    pub fn new(
        paper_id: impl Into<String>,
        page_index: usize,
        bbox: BBox,
        crop_path: impl Into<String>,
        figure_type: FigureType,
    ) -> Self {
        Self {
            paper_id: paper_id.into(),
            page_index,
            bbox,
            crop_path: crop_path.into(),
            figure_type,
            caption: None,
            variables: None,
            axis: None,
            key_findings: None,
            table_csv: None,
            table_path: None,
            confidence_score: None,
        }
    }

    /// Detector metadata only, with zero confidence: what a region becomes
    /// when its annotation call fails.
    pub fn fallback(
        paper_id: impl Into<String>,
        page_index: usize,
        bbox: BBox,
        crop_path: impl Into<String>,
        figure_type: FigureType,
        caption: Option<&str>,
    ) -> Self {
        let mut ann = Self::new(paper_id, page_index, bbox, crop_path, figure_type);
        ann.caption = caption.and_then(clean_caption);
        ann.confidence_score = Some(0.0);
        ann
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.caption = clean_caption(caption);
        self
    }

    pub fn with_confidence(mut self, score: f64) -> Result<Self, SchemaError> {
        self.set_confidence(Some(score))?;
        Ok(self)
    }

    pub fn confidence_score(&self) -> Option<f64> {
        self.confidence_score
    }

    pub fn set_confidence(&mut self, score: Option<f64>) -> Result<(), SchemaError> {
        if let Some(s) = score {
            if !(0.0..=1.0).contains(&s) {
                return Err(SchemaError::ConfidenceOutOfRange(s.to_string()));
            }
        }
        self.confidence_score = score;
        Ok(())
    }

    /// Box IoU, or zero for regions of different pages or papers.
    pub fn iou(&self, other: &BBoxAnnotation) -> f64 {
        if self.paper_id != other.paper_id || self.page_index != other.page_index {
            return 0.0;
        }
        self.bbox.iou(&other.bbox)
    }

    /// `PMC123 p4 [x1, y1, x2, y2]`, for logs.
    pub fn label(&self) -> String {
        format!("{} p{} {}", self.paper_id, self.page_index, self.bbox)
    }
}

// ── Page ─────────────────────────────────────────────────────────────────

/// Every region annotation of one rendered page, with the page's pixel size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBBoxPage")]
pub struct BBoxPage {
    pub paper_id: String,
    pub page_index: usize,
    page_width: u32,
    page_height: u32,
    pub annotations: Vec<BBoxAnnotation>,
}

#[derive(Deserialize)]
struct RawBBoxPage {
    paper_id: String,
    page_index: usize,
    page_width: u32,
    page_height: u32,
    #[serde(default)]
    annotations: Vec<BBoxAnnotation>,
}

impl TryFrom<RawBBoxPage> for BBoxPage {
    type Error = SchemaError;

    fn try_from(raw: RawBBoxPage) -> Result<Self, Self::Error> {
        BBoxPage::new(
            raw.paper_id,
            raw.page_index,
            raw.page_width,
            raw.page_height,
            raw.annotations,
        )
    }
}

impl BBoxPage {
    /// Every annotation must name this page; containment is checked later.
    pub fn new(
        paper_id: impl Into<String>,
        page_index: usize,
        page_width: u32,
        page_height: u32,
        annotations: Vec<BBoxAnnotation>,
    ) -> Result<Self, SchemaError> {
        let paper_id = paper_id.into();
        if page_width == 0 || page_height == 0 {
            return Err(SchemaError::InvalidPageSize {
                width: page_width,
                height: page_height,
            });
        }
        if let Some(a) = annotations
            .iter()
            .find(|a| a.paper_id != paper_id || a.page_index != page_index)
        {
            return Err(SchemaError::ForeignAnnotation {
                paper_id: a.paper_id.clone(),
                page_index: a.page_index,
                page_paper_id: paper_id,
                page_page_index: page_index,
            });
        }
        Ok(Self {
            paper_id,
            page_index,
            page_width,
            page_height,
            annotations,
        })
    }

    pub fn page_width(&self) -> u32 {
        self.page_width
    }

    pub fn page_height(&self) -> u32 {
        self.page_height
    }
}
