//! Prompts for region and document annotation.
//!
//! Every prompt lives here so wording changes never touch retry or parsing
//! code, and so tests can inspect them without a model.
//!
//! Replies are parsed by [`crate::pipeline::parse`], which tolerates code
//! fences and surrounding chatter; the prompts still ask for bare JSON.

use crate::schema::FigureType;

/// System message for region (figure/table/equation) annotation.
pub const REGION_SYSTEM_PROMPT: &str = "You are a meticulous analyst of figures and tables in \
medical research papers. You answer with a single JSON object that follows the requested \
shape exactly and nothing else.";

/// System message for document-structure annotation.
pub const DOCUMENT_SYSTEM_PROMPT: &str = "You are a meticulous analyst of medical research \
papers. You read page images and answer with a single JSON object that follows the requested \
shape exactly and nothing else.";

const REGION_SHAPE: &str = r#"{
  "figure_type": "figure | table | equation | diagram | flowchart | other",
  "caption": "string or null",
  "variables": [{"name": "string", "role": "x | y | group | series | confidence_interval | legend", "unit": "string or null", "category_values": ["string"]}],
  "axis": {"x_label": "string", "y_label": "string", "x_unit": "string", "y_unit": "string", "scale": "linear | log"},
  "key_findings": "string or null",
  "table_csv": "string or null",
  "confidence_score": 0.0
}"#;

const REGION_RULES: &str = "Rules:
1. Use only the fields shown; omit nothing required, add nothing else.
2. figure_type is one of: figure, table, equation, diagram, flowchart, other.
3. Strip numbering such as \"Figure 1:\" or \"Table 2.\" from the caption.
4. Write units in standard SI form (mL, μg, mmHg, °C, h).
5. key_findings states only what is directly visible, in at most 100 characters. No hedging or speculation (no \"may\", \"might\", \"suggests\", \"possibly\").
6. category_values is allowed only for group, series and legend variables.
7. table_csv is allowed only when figure_type is table.
8. All coordinates are integers.
9. confidence_score in [0, 1] reflects how legible the region is.";

const DOCUMENT_SHAPE: &str = r#"{
  "paper_id": "string",
  "title": "string",
  "abstract": "string",
  "keywords": ["string"],
  "sections": [{"title": "string", "level": 1, "text": "string"}],
  "authors": [{"name": "string", "email": "string or null", "orcid": "string or null", "affiliation_ids": [0]}],
  "affiliations": [{"name": "string", "department": "string or null", "city": "string or null", "country": "string or null"}],
  "references": [{"raw_text": "string", "doi": "string or null", "pmid": "string or null"}],
  "doi": "string or null",
  "journal": "string or null",
  "publication_date": "YYYY, YYYY-MM or YYYY-MM-DD"
}"#;

const DOCUMENT_RULES: &str = "Rules:
1. Use only the fields shown.
2. Remove control characters and redundant whitespace from all text.
3. Section titles carry no trailing punctuation; levels run 1-6 and start at 1.
4. Keywords are lower-case, unique, at most 10.
5. Merge consecutive paragraphs of the same section into one text.
6. Use null instead of an empty list.
7. affiliation_ids index into the affiliations list, starting at 0.
8. doi matches ^10\\.\\d{4,9}/[-._;()/:a-zA-Z0-9]+$ .
9. publication_date is YYYY-MM-DD, YYYY-MM or YYYY.";

/// Kind-specific guidance added to a region prompt.
pub fn region_kind_instructions(kind: FigureType) -> Option<&'static str> {
    match kind {
        FigureType::Table => Some("This region is a table: fill table_csv with its full contents."),
        FigureType::Figure => Some("This region is a chart: extract the axes and the plotted variables."),
        FigureType::Equation => Some("This region is an equation: give it in LaTeX in the caption."),
        _ => None,
    }
}

/// User text accompanying a region crop (and, when given, its page image).
pub fn region_prompt(
    kind: FigureType,
    bbox: [u32; 4],
    detected_caption: Option<&str>,
    anchor_text: Option<&str>,
    with_page_image: bool,
) -> String {
    let mut prompt = format!(
        "Analyse the attached region and return JSON of this shape:\n\n{REGION_SHAPE}\n\n\
Region position on the page (pixels x1, y1, x2, y2): {bbox:?}\n"
    );
    if with_page_image {
        prompt.push_str("The first image is the region; the second is the full page for context.\n");
    }
    if let Some(text) = anchor_text.filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!("Text printed around the region (reference only):\n\"\"\"{text}\"\"\"\n"));
    }
    prompt.push('\n');
    prompt.push_str(REGION_RULES);
    if let Some(extra) = region_kind_instructions(kind) {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }
    if let Some(caption) = detected_caption {
        prompt.push_str(&format!("\nDetected caption: {caption}"));
    }
    prompt.push_str("\n\nReturn the JSON object only.");
    prompt
}

/// User text accompanying the page images of one document batch.
///
/// `start` and `end` are the 0-based half-open page range of the batch.
pub fn document_batch_prompt(batch: usize, total: usize, start: usize, end: usize) -> String {
    let scope = if batch == 0 {
        format!(
            "This is batch 1 of {total}, pages {}-{end}. Extract the full metadata (title, \
authors, abstract, keywords, journal, dates) and the sections on these pages.",
            start + 1
        )
    } else {
        format!(
            "This is batch {} of {total}, pages {}-{end}. Extract only the sections on these \
pages; metadata was taken from an earlier batch. Keep section numbering continuous.",
            batch + 1,
            start + 1
        )
    };
    format!(
        "Analyse the attached pages of a research paper and return JSON of this shape:\n\n\
{DOCUMENT_SHAPE}\n\n{DOCUMENT_RULES}\n\n{scope}\n\nReturn the JSON object only."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_prompt_asks_for_csv() {
        let p = region_prompt(FigureType::Table, [1, 2, 3, 4], Some("Table 1 Baseline"), None, false);
        assert!(p.contains("table_csv with its full contents"));
        assert!(p.contains("Detected caption: Table 1 Baseline"));
        assert!(p.contains("[1, 2, 3, 4]"));
        assert!(!p.contains("second is the full page"));
    }

    #[test]
    fn anchor_text_included_when_present() {
        let p = region_prompt(FigureType::Figure, [0, 0, 9, 9], None, Some("Survival by arm"), true);
        assert!(p.contains("Survival by arm"));
        assert!(p.contains("second is the full page"));
        let p = region_prompt(FigureType::Figure, [0, 0, 9, 9], None, Some("   "), true);
        assert!(!p.contains("Text printed around"));
    }

    #[test]
    fn diagram_has_no_kind_instructions() {
        assert!(region_kind_instructions(FigureType::Diagram).is_none());
        assert!(region_kind_instructions(FigureType::Equation).unwrap().contains("LaTeX"));
    }

    #[test]
    fn first_batch_requests_metadata() {
        let p = document_batch_prompt(0, 3, 0, 5);
        assert!(p.contains("batch 1 of 3, pages 1-5"));
        assert!(p.contains("full metadata"));
        let p = document_batch_prompt(1, 3, 4, 9);
        assert!(p.contains("batch 2 of 3, pages 5-9"));
        assert!(p.contains("Extract only the sections"));
    }
}
