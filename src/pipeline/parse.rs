//! Turn raw VLM replies into typed records.
//!
//! Models wrap JSON in code fences, prepend a sentence, or sprinkle
//! zero-width characters; the reply is cleaned and the outermost JSON object
//! extracted before anything is deserialised. A few shape slips that would
//! otherwise discard a whole reply are repaired on the JSON value:
//!
//! - detector metadata (paper id, page, bbox, crop path) always overrides
//!   what the model echoed back;
//! - an unknown or missing `figure_type` / `caption` falls back to the
//!   detector's;
//! - `category_values` on a numeric variable is dropped;
//! - `confidence_score` is clamped into `[0, 1]`;
//! - section levels are clamped into 1–6 and untitled sections dropped.
//!
//! Everything else goes through the schema's own validation.

use crate::schema::{BBox, BBoxAnnotation, DocumentAnnotation, FigureType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)\n?```").expect("static regex"));

/// Why a reply could not become a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    #[error("reply contains no JSON object")]
    NoJsonObject,

    #[error("reply is not valid JSON: {0}")]
    Json(String),

    #[error("reply does not fit the record shape: {0}")]
    Shape(String),
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

/// The JSON object inside a reply, with fences and surrounding prose removed.
pub fn extract_json_object(reply: &str) -> Result<Map<String, Value>, ReplyError> {
    let cleaned = remove_invisible_chars(reply);
    let body = match RE_FENCE.captures(&cleaned) {
        Some(caps) => caps[1].to_string(),
        None => cleaned,
    };

    let start = body.find('{').ok_or(ReplyError::NoJsonObject)?;
    let end = body.rfind('}').ok_or(ReplyError::NoJsonObject)?;
    if end < start {
        return Err(ReplyError::NoJsonObject);
    }

    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ReplyError::NoJsonObject),
        Err(e) => Err(ReplyError::Json(e.to_string())),
    }
}

/// Detector-side facts about a region, authoritative over the reply.
#[derive(Debug, Clone)]
pub struct RegionContext<'a> {
    pub paper_id: &'a str,
    pub page_index: usize,
    pub bbox: BBox,
    pub crop_path: &'a str,
    pub figure_type: FigureType,
    pub caption: Option<&'a str>,
}

/// Parse a region reply and merge it with the detector metadata.
pub fn parse_region_reply(reply: &str, ctx: &RegionContext<'_>) -> Result<BBoxAnnotation, ReplyError> {
    let mut obj = extract_json_object(reply)?;

    obj.insert("paper_id".into(), Value::from(ctx.paper_id));
    obj.insert("page_index".into(), Value::from(ctx.page_index));
    obj.insert(
        "bbox".into(),
        serde_json::to_value(ctx.bbox).map_err(|e| ReplyError::Shape(e.to_string()))?,
    );
    obj.insert("crop_path".into(), Value::from(ctx.crop_path));

    let known_type = obj
        .get("figure_type")
        .cloned()
        .and_then(|v| serde_json::from_value::<FigureType>(v).ok());
    if known_type.is_none() {
        obj.insert("figure_type".into(), Value::from(ctx.figure_type.as_str()));
    }

    let has_caption = obj
        .get("caption")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !has_caption {
        match ctx.caption {
            Some(c) => obj.insert("caption".into(), Value::from(c)),
            None => obj.remove("caption"),
        };
    }

    if let Some(Value::Array(vars)) = obj.get_mut("variables") {
        for var in vars.iter_mut().filter_map(Value::as_object_mut) {
            let categorical = matches!(
                var.get("role").and_then(Value::as_str),
                Some("group" | "series" | "legend")
            );
            if !categorical {
                var.remove("category_values");
            }
        }
    }

    match obj.get("confidence_score").map(Value::as_f64) {
        Some(Some(c)) => {
            obj.insert("confidence_score".into(), Value::from(c.clamp(0.0, 1.0)));
        }
        Some(None) => {
            obj.remove("confidence_score");
        }
        None => {}
    }

    serde_json::from_value(Value::Object(obj)).map_err(|e| ReplyError::Shape(e.to_string()))
}

/// Parse one document batch reply; `paper_id` overrides the model's.
pub fn parse_document_reply(reply: &str, paper_id: &str) -> Result<DocumentAnnotation, ReplyError> {
    let mut obj = extract_json_object(reply)?;
    obj.insert("paper_id".into(), Value::from(paper_id));

    if let Some(Value::Array(sections)) = obj.get_mut("sections") {
        sections.retain(|s| {
            s.get("title")
                .and_then(Value::as_str)
                .is_some_and(|t| !t.trim().is_empty())
        });
        for section in sections.iter_mut().filter_map(Value::as_object_mut) {
            let level = section.get("level").and_then(Value::as_i64).unwrap_or(1).clamp(1, 6);
            section.insert("level".into(), Value::from(level));
        }
    }

    serde_json::from_value(Value::Object(obj)).map_err(|e| ReplyError::Shape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::VariableRole;

    fn ctx() -> RegionContext<'static> {
        RegionContext {
            paper_id: "PMC9",
            page_index: 3,
            bbox: BBox::new(10, 20, 300, 400).unwrap(),
            crop_path: "crops/PMC9_p003_fig00.png",
            figure_type: FigureType::Figure,
            caption: Some("Figure 2. Overall survival"),
        }
    }

    #[test]
    fn fenced_reply_with_prose() {
        let reply = "Here you go:\n```json\n{\"a\": 1}\n```\nHope it helps";
        assert_eq!(extract_json_object(reply).unwrap()["a"], 1);
    }

    #[test]
    fn invisible_chars_removed() {
        let reply = "\u{FEFF}{\"a\":\u{200B} 2}";
        assert_eq!(extract_json_object(reply).unwrap()["a"], 2);
    }

    #[test]
    fn non_object_reply_rejected() {
        assert_eq!(extract_json_object("no json here"), Err(ReplyError::NoJsonObject));
        assert!(matches!(extract_json_object("{not json}"), Err(ReplyError::Json(_))));
    }

    #[test]
    fn detector_metadata_overrides_reply() {
        let reply = r#"{"paper_id": "wrong", "page_index": 0, "bbox": {"x1":0,"y1":0,"x2":1,"y2":1},
            "figure_type": "chart", "key_findings": "Arm A has longer survival", "confidence_score": 0.8}"#;
        let ann = parse_region_reply(reply, &ctx()).unwrap();
        assert_eq!(ann.paper_id, "PMC9");
        assert_eq!(ann.page_index, 3);
        assert_eq!(ann.bbox.to_array(), [10, 20, 300, 400]);
        assert_eq!(ann.figure_type, FigureType::Figure);
        assert_eq!(ann.caption.as_deref(), Some("Overall survival"));
        assert_eq!(ann.confidence_score(), Some(0.8));
    }

    #[test]
    fn model_caption_and_type_kept_when_valid() {
        let reply = r#"{"figure_type": "diagram", "caption": "Fig. 3: Study flow"}"#;
        let ann = parse_region_reply(reply, &ctx()).unwrap();
        assert_eq!(ann.figure_type, FigureType::Diagram);
        assert_eq!(ann.caption.as_deref(), Some("Study flow"));
    }

    #[test]
    fn shape_slips_repaired() {
        let reply = r#"{"variables": [
                {"name": "time", "role": "x", "unit": "hr", "category_values": ["a"]},
                {"name": "arm", "role": "group", "category_values": ["A", "B"]}],
            "confidence_score": 1.7}"#;
        let ann = parse_region_reply(reply, &ctx()).unwrap();
        let vars = ann.variables.as_ref().unwrap();
        assert!(vars[0].category_values().is_none());
        assert_eq!(vars[0].unit(), Some("h"));
        assert_eq!(vars[1].role(), VariableRole::Group);
        assert_eq!(ann.confidence_score(), Some(1.0));
    }

    #[test]
    fn document_reply_levels_clamped_and_id_forced() {
        let reply = r#"```json
        {"paper_id": "x", "title": "A trial", "abstract": "text",
         "sections": [{"title": "Intro", "level": 0, "text": "a"},
                      {"title": "  ", "level": 2, "text": "b"},
                      {"title": "Deep", "level": 9, "text": "c"}],
         "keywords": []}
        ```"#;
        let doc = parse_document_reply(reply, "PMC5").unwrap();
        assert_eq!(doc.paper_id, "PMC5");
        let levels: Vec<u8> = doc.sections.iter().map(|s| s.level()).collect();
        assert_eq!(levels, vec![1, 6]);
        assert!(doc.keywords.is_none());
    }

    #[test]
    fn document_reply_with_wrong_types_is_shape_error() {
        let reply = r#"{"title": 5, "sections": []}"#;
        assert!(matches!(parse_document_reply(reply, "PMC5"), Err(ReplyError::Shape(_))));
    }
}
