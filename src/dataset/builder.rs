//! Conversation samples for each training task, built from checked records.
//!
//! Region tasks use the crop as the image; grounding and abstract questions
//! use the saved page image (see [`page_file_name`]). Question wording is
//! drawn from a few variants with the builder's RNG, so a seeded builder
//! always produces the same samples.

use crate::error::QcError;
use crate::io::write_jsonl;
use crate::pipeline::detect::page_file_name;
use crate::quality::ConsistencyChecker;
use crate::schema::{BBox, BBoxAnnotation, BBoxPage, ConversationSample, DocumentAnnotation, FigureType, Turn, VariableRole};
use once_cell::sync::Lazy;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ── Task types ───────────────────────────────────────────────────────────

/// What a sample trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Locate a captioned region on the full page.
    PageGrounding,
    /// Describe one figure or table.
    FigureCaption,
    /// Name the plotted variables, their roles and units.
    VariableExtraction,
    /// Transcribe a table as CSV.
    TableReading,
    /// Compare several figures of one paper.
    MultiFigure,
    /// Answer from the abstract, shown the first page.
    AbstractQa,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::PageGrounding,
        TaskType::FigureCaption,
        TaskType::VariableExtraction,
        TaskType::TableReading,
        TaskType::MultiFigure,
        TaskType::AbstractQa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::PageGrounding => "page_grounding",
            TaskType::FigureCaption => "figure_caption",
            TaskType::VariableExtraction => "variable_extraction",
            TaskType::TableReading => "table_reading",
            TaskType::MultiFigure => "multi_figure",
            TaskType::AbstractQa => "abstract_qa",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Question variants ────────────────────────────────────────────────────

const FIGURE_CAPTION_QUESTIONS: &[&str] = &[
    "Summarise the main content of this {kind} in three to five sentences.",
    "What does this {kind} show? Briefly describe its variables, trends and main conclusion.",
    "Describe this {kind}, including what the axes mean and their units if any.",
];

const VARIABLE_QUESTIONS: &[&str] = &[
    "Which variables does this chart show, and what are their units?",
    "List every variable in the figure with its role and unit.",
    "What do the horizontal and vertical axes represent, and in which units?",
];

const TABLE_QUESTIONS: &[&str] = &[
    "Convert this table to CSV.",
    "Transcribe the contents of this table as CSV.",
];

const ABSTRACT_QUESTIONS: &[&str] = &[
    "What is the main research question of this paper?",
    "What are the core contributions of this paper?",
    "What methods does the study use, and what does it find?",
];

static RE_SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[。！？]|[.!?](?:\s+|$)").expect("static regex"));

fn kind_name(t: FigureType) -> &'static str {
    match t {
        FigureType::Figure => "chart",
        FigureType::Table => "table",
        FigureType::Equation => "equation",
        FigureType::Diagram => "diagram",
        FigureType::Flowchart => "flowchart",
        FigureType::Other => "image",
    }
}

fn role_name(r: VariableRole) -> &'static str {
    match r {
        VariableRole::X => "independent variable",
        VariableRole::Y => "dependent variable",
        VariableRole::Group => "grouping variable",
        VariableRole::Series => "series variable",
        VariableRole::ConfidenceInterval => "confidence interval",
        VariableRole::Legend => "legend entry",
    }
}

fn with_article(noun: &str) -> String {
    let an = noun.starts_with(['a', 'e', 'i', 'o', 'u']);
    format!("{} {noun}", if an { "an" } else { "a" })
}

/// First `n` characters, with `...` when something was cut.
fn truncate_chars(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    let cut: String = s.chars().take(n).collect();
    format!("{cut}...")
}

fn unit_suffix(unit: Option<&str>) -> String {
    unit.map(|u| format!(" ({u})")).unwrap_or_default()
}

// ── Answers ──────────────────────────────────────────────────────────────

/// Kind, plotted axes, axis labels and key findings; the caption fills in
/// when fewer than three of those are known. `None` when nothing beyond the
/// kind is known.
pub fn figure_caption_answer(ann: &BBoxAnnotation) -> Option<String> {
    let mut parts = vec![format!("This is {}.", with_article(kind_name(ann.figure_type)))];

    if let Some(vars) = &ann.variables {
        let plotted: Vec<String> = vars
            .iter()
            .filter_map(|v| {
                let axis = match v.role() {
                    VariableRole::X => "x-axis",
                    VariableRole::Y => "y-axis",
                    _ => return None,
                };
                Some(format!("{} on the {axis}{}", v.name(), unit_suffix(v.unit())))
            })
            .collect();
        if !plotted.is_empty() {
            parts.push(format!("It plots {}.", plotted.join(" against ")));
        }
    }

    if let Some(axis) = &ann.axis {
        let labels: Vec<String> = [
            ("x-axis", &axis.x_label, &axis.x_unit),
            ("y-axis", &axis.y_label, &axis.y_unit),
        ]
        .into_iter()
        .filter_map(|(name, label, unit)| {
            label
                .as_deref()
                .map(|l| format!("{name}: {l}{}", unit_suffix(unit.as_deref())))
        })
        .collect();
        if !labels.is_empty() {
            parts.push(format!("{}.", labels.join("; ")));
        }
    }

    if let Some(findings) = ann.key_findings.as_deref().filter(|f| !f.trim().is_empty()) {
        parts.push(findings.trim().to_string());
    }

    if parts.len() < 3 {
        if let Some(caption) = &ann.caption {
            parts.push(truncate_chars(caption, 80));
        }
    }

    (parts.len() > 1).then(|| parts.join(" "))
}

/// One line per variable, then the axis labels.
pub fn variable_answer(ann: &BBoxAnnotation) -> Option<String> {
    let mut lines = Vec::new();

    if let Some(vars) = ann.variables.as_ref().filter(|v| !v.is_empty()) {
        lines.push("The variables are:".to_string());
        for v in vars {
            let unit = v
                .unit()
                .map_or_else(|| "no unit".to_string(), |u| format!("unit {u}"));
            lines.push(format!("- {} ({}, {unit})", v.name(), role_name(v.role())));
        }
    }

    if let Some(axis) = &ann.axis {
        if let Some(l) = &axis.x_label {
            lines.push(format!("x-axis: {l}{}", unit_suffix(axis.x_unit.as_deref())));
        }
        if let Some(l) = &axis.y_label {
            lines.push(format!("y-axis: {l}{}", unit_suffix(axis.y_unit.as_deref())));
        }
    }

    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// The table's CSV in a fenced block; tables only.
pub fn table_answer(ann: &BBoxAnnotation) -> Option<String> {
    if ann.figure_type != FigureType::Table {
        return None;
    }
    let csv = ann.table_csv.as_deref().map(str::trim_end).filter(|c| !c.trim().is_empty())?;
    Some(format!("Table data as CSV:\n```csv\n{csv}\n```"))
}

/// Up to three abstract sentences longer than twenty characters.
pub fn abstract_answer(doc: &DocumentAnnotation) -> Option<String> {
    let text = doc.abstract_text.trim();
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in RE_SENTENCE_END.find_iter(text) {
        sentences.push(text[start..m.end()].trim());
        start = m.end();
    }
    if start < text.len() {
        sentences.push(text[start..].trim());
    }

    let key: Vec<&str> = sentences
        .into_iter()
        .filter(|s| s.chars().count() > 20)
        .take(3)
        .collect();
    (!key.is_empty()).then(|| key.join(" "))
}

/// Scale a page-pixel box into an image of another size, rounding outward.
fn scale_box(b: &BBox, page: (u32, u32), image: (u32, u32)) -> Option<[u32; 4]> {
    fn scale(v: u32, from: u32, to: u32, round_up: bool) -> u32 {
        let num = u64::from(v) * u64::from(to);
        let den = u64::from(from.max(1));
        let q = if round_up { num.div_ceil(den) } else { num / den };
        q.min(u64::from(to)) as u32
    }
    let x1 = scale(b.x1(), page.0, image.0, false);
    let y1 = scale(b.y1(), page.1, image.1, false);
    let x2 = scale(b.x2(), page.0, image.0, true);
    let y2 = scale(b.y2(), page.1, image.1, true);
    (x1 < x2 && y1 < y2).then_some([x1, y1, x2, y2])
}

// ── Built samples ────────────────────────────────────────────────────────

/// A conversation sample plus what the sampler needs to know about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltSample {
    pub task: TaskType,
    pub paper_id: String,
    /// Confidence of the source region, when it has one.
    pub confidence: Option<f64>,
    pub sample: ConversationSample,
}

/// Counts of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Accepted samples per task.
    pub built: BTreeMap<TaskType, usize>,
    /// Samples skipped because their image size could not be read.
    pub missing_images: usize,
    /// Samples that failed the sample checks.
    pub rejected: usize,
}

impl BuildReport {
    pub fn total(&self) -> usize {
        self.built.values().sum()
    }
}

/// Write the conversation samples, one JSON line each.
pub fn save_samples(path: &Path, samples: &[BuiltSample]) -> Result<(), QcError> {
    let lines: Vec<&ConversationSample> = samples.iter().map(|s| &s.sample).collect();
    write_jsonl(path, &lines)?;
    info!("Saved {} samples to {}", lines.len(), path.display());
    Ok(())
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builds samples from checked records; image paths are relative to
/// `image_dir`.
#[derive(Debug)]
pub struct SampleBuilder {
    image_dir: PathBuf,
    max_multi_figures: usize,
    seed: Option<u64>,
    checker: ConsistencyChecker,
}

impl SampleBuilder {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            max_multi_figures: 3,
            seed: None,
            checker: ConsistencyChecker::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Figures per comparison sample, 2–8. Default: 3.
    pub fn with_max_multi_figures(mut self, n: usize) -> Self {
        self.max_multi_figures = n.clamp(2, 8);
        self
    }

    /// Every task each record supports, in record order: per region the
    /// caption, variable, table and grounding samples, then one comparison
    /// per paper, then one abstract question per document.
    pub fn build_from_records(
        &self,
        documents: &[DocumentAnnotation],
        pages: &[BBoxPage],
    ) -> (Vec<BuiltSample>, BuildReport) {
        let rng = match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::seed_from_u64(rand::random()),
        };
        let mut run = BuildRun {
            builder: self,
            rng,
            sizes: HashMap::new(),
            samples: Vec::new(),
            report: BuildReport::default(),
        };

        let mut comparable: Vec<(String, Vec<(&BBoxAnnotation, (u32, u32))>)> = Vec::new();
        for page in pages {
            for (i, ann) in page.annotations.iter().enumerate() {
                let id = format!("{}_p{}_r{}", ann.paper_id, ann.page_index, i);
                if let Some(size) = run.region_samples(&id, ann) {
                    if ann.key_findings.is_some() || ann.caption.is_some() {
                        match comparable.iter_mut().find(|(p, _)| *p == ann.paper_id) {
                            Some((_, regions)) => regions.push((ann, size)),
                            None => comparable.push((ann.paper_id.clone(), vec![(ann, size)])),
                        }
                    }
                }
                run.grounding_sample(&id, page, ann);
            }
        }

        for (paper_id, regions) in &comparable {
            run.multi_figure_sample(paper_id, regions);
        }

        for doc in documents {
            let mut page_indices: Vec<usize> = pages
                .iter()
                .filter(|p| p.paper_id == doc.paper_id)
                .map(|p| p.page_index)
                .collect();
            page_indices.sort_unstable();
            page_indices.insert(0, 0);
            run.abstract_sample(doc, &page_indices);
        }

        info!(
            built = run.report.total(),
            missing_images = run.report.missing_images,
            rejected = run.report.rejected,
            "samples built"
        );
        (run.samples, run.report)
    }
}

struct BuildRun<'a> {
    builder: &'a SampleBuilder,
    rng: ChaCha8Rng,
    sizes: HashMap<String, Option<(u32, u32)>>,
    samples: Vec<BuiltSample>,
    report: BuildReport,
}

impl BuildRun<'_> {
    fn image_size(&mut self, rel: &str) -> Option<(u32, u32)> {
        if let Some(size) = self.sizes.get(rel) {
            return *size;
        }
        let size = match image::image_dimensions(self.builder.image_dir.join(rel)) {
            Ok(size) => Some(size),
            Err(e) => {
                debug!(image = rel, error = %e, "image size unreadable");
                None
            }
        };
        self.sizes.insert(rel.to_string(), size);
        size
    }

    fn pick(&mut self, variants: &[&'static str]) -> &'static str {
        variants.choose(&mut self.rng).copied().unwrap_or_default()
    }

    fn accept(&mut self, task: TaskType, paper_id: &str, confidence: Option<f64>, sample: ConversationSample) {
        let outcome = self.builder.checker.check_sample(&sample);
        if outcome.accepted {
            *self.report.built.entry(task).or_default() += 1;
            self.samples.push(BuiltSample {
                task,
                paper_id: paper_id.to_string(),
                confidence,
                sample,
            });
        } else {
            self.report.rejected += 1;
            warn!(sample = %sample.id, "built sample rejected\n{}", outcome.report.render());
        }
    }

    /// Crop-based tasks of one region. Returns the crop size when it could
    /// be read.
    fn region_samples(&mut self, id: &str, ann: &BBoxAnnotation) -> Option<(u32, u32)> {
        let mut tasks: Vec<(TaskType, String, String)> = Vec::new();
        if let Some(answer) = figure_caption_answer(ann) {
            let q = self.pick(FIGURE_CAPTION_QUESTIONS).replace("{kind}", kind_name(ann.figure_type));
            tasks.push((TaskType::FigureCaption, q, answer));
        }
        if ann.figure_type != FigureType::Table {
            if let Some(answer) = variable_answer(ann) {
                tasks.push((TaskType::VariableExtraction, self.pick(VARIABLE_QUESTIONS).to_string(), answer));
            }
        }
        if let Some(answer) = table_answer(ann) {
            tasks.push((TaskType::TableReading, self.pick(TABLE_QUESTIONS).to_string(), answer));
        }

        let Some((width, height)) = self.image_size(&ann.crop_path) else {
            self.report.missing_images += tasks.len();
            return None;
        };
        for (task, question, answer) in tasks {
            let sample = ConversationSample::single(
                format!("{id}_{task}"),
                ann.crop_path.clone(),
                width,
                height,
                vec![Turn::human(format!("<image>\n{question}")), Turn::gpt(answer)],
            );
            self.accept(task, &ann.paper_id, ann.confidence_score(), sample);
        }
        Some((width, height))
    }

    /// Find a captioned region on its page image.
    fn grounding_sample(&mut self, id: &str, page: &BBoxPage, ann: &BBoxAnnotation) {
        let Some(caption) = ann.caption.as_deref() else {
            return;
        };
        let page_path = page_file_name(&ann.paper_id, ann.page_index);
        let Some(size) = self.image_size(&page_path) else {
            self.report.missing_images += 1;
            return;
        };
        let Some([x1, y1, x2, y2]) = scale_box(&ann.bbox, (page.page_width(), page.page_height()), size) else {
            return;
        };

        let question = format!(
            "Find the {} \"{caption}\" on this page and mark its position.",
            kind_name(ann.figure_type)
        );
        let answer = format!("<ref>{caption}</ref><box>[[{x1},{y1},{x2},{y2}]]</box>");
        let sample = ConversationSample::single(
            format!("{id}_{}", TaskType::PageGrounding),
            page_path,
            size.0,
            size.1,
            vec![Turn::human(format!("<image>\n{question}")), Turn::gpt(answer)],
        );
        self.accept(TaskType::PageGrounding, &ann.paper_id, ann.confidence_score(), sample);
    }

    /// Compare a random handful of one paper's described regions.
    fn multi_figure_sample(&mut self, paper_id: &str, regions: &[(&BBoxAnnotation, (u32, u32))]) {
        if regions.len() < 2 {
            return;
        }
        let amount = regions.len().min(self.builder.max_multi_figures);
        let mut chosen = index::sample(&mut self.rng, regions.len(), amount).into_vec();
        chosen.sort_unstable();

        let mut images = Vec::with_capacity(chosen.len());
        let mut lines = Vec::with_capacity(chosen.len());
        for (n, &i) in chosen.iter().enumerate() {
            let (ann, (w, h)) = regions[i];
            let text = match (&ann.key_findings, &ann.caption) {
                (Some(findings), _) => findings.trim().to_string(),
                (None, Some(caption)) => truncate_chars(caption, 50),
                (None, None) => continue,
            };
            images.push((ann.crop_path.clone(), w, h));
            lines.push(format!("Figure {}: {text}", n + 1));
        }

        let tags = vec!["<image>"; images.len()].join("\n");
        let question = format!(
            "{tags}\nCompare these {} figures. What trends or differences do they show?",
            images.len()
        );
        let sample = ConversationSample::multi(
            format!("{paper_id}_{}", TaskType::MultiFigure),
            images,
            vec![Turn::human(question), Turn::gpt(lines.join("\n"))],
        );
        self.accept(TaskType::MultiFigure, paper_id, None, sample);
    }

    /// Ask about the abstract on the first saved page among `page_indices`.
    fn abstract_sample(&mut self, doc: &DocumentAnnotation, page_indices: &[usize]) {
        let Some(answer) = abstract_answer(doc) else {
            return;
        };
        let page = page_indices.iter().find_map(|&i| {
            let path = page_file_name(&doc.paper_id, i);
            self.image_size(&path).map(|size| (path, size))
        });
        let Some((path, (width, height))) = page else {
            self.report.missing_images += 1;
            return;
        };

        let question = self.pick(ABSTRACT_QUESTIONS);
        let sample = ConversationSample::single(
            format!("{}_{}", doc.paper_id, TaskType::AbstractQa),
            path,
            width,
            height,
            vec![Turn::human(format!("<image>\n{question}")), Turn::gpt(answer)],
        );
        self.accept(TaskType::AbstractQa, &doc.paper_id, None, sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Section, Variable};
    use image::{Rgb, RgbImage};

    const ABSTRACT: &str = "Short aim. Mortality fell from 30.5% to 21.0% with early lactate clearance. \
We enrolled two hundred adults across three intensive care units. Median age was sixty-four years \
in both arms. Results held in every subgroup.";

    fn write_png(dir: &Path, rel: &str, w: u32, h: u32) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(w, h, Rgb([200, 200, 200])).save(&path).unwrap();
    }

    fn records() -> (Vec<DocumentAnnotation>, Vec<BBoxPage>) {
        let mut chart = BBoxAnnotation::new(
            "PMC1",
            0,
            BBox::new(100, 200, 300, 400).unwrap(),
            "crops/PMC1_p000_fig00.png",
            FigureType::Figure,
        )
        .with_caption("Survival by arm")
        .with_confidence(0.9)
        .unwrap();
        chart.key_findings = Some("Survival was higher in arm A".into());
        chart.variables = Some(vec![
            Variable::new("Time", VariableRole::X, None, None).unwrap(),
            Variable::new("Survival", VariableRole::Y, None, None).unwrap(),
        ]);

        let mut table = BBoxAnnotation::new(
            "PMC1",
            0,
            BBox::new(100, 600, 900, 1000).unwrap(),
            "crops/PMC1_p000_fig01.png",
            FigureType::Table,
        )
        .with_caption("Baseline characteristics");
        table.table_csv = Some("arm,n\nA,10\nB,12\n".into());

        let page = BBoxPage::new("PMC1", 0, 1000, 1400, vec![chart, table]).unwrap();
        let doc = DocumentAnnotation::new(
            "PMC1",
            "Lactate clearance in septic shock",
            ABSTRACT,
            vec![Section::new("Introduction", 1, "Background.").unwrap()],
        );
        (vec![doc], vec![page])
    }

    fn fixture_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "pages/PMC1_p000.png", 500, 700);
        write_png(dir.path(), "crops/PMC1_p000_fig00.png", 200, 200);
        write_png(dir.path(), "crops/PMC1_p000_fig01.png", 400, 200);
        dir
    }

    #[test]
    fn every_supported_task_is_built() {
        let dir = fixture_dir();
        let (docs, pages) = records();
        let (samples, report) = SampleBuilder::new(dir.path()).with_seed(1).build_from_records(&docs, &pages);

        let count = |t: TaskType| report.built.get(&t).copied().unwrap_or(0);
        assert_eq!(count(TaskType::FigureCaption), 2);
        assert_eq!(count(TaskType::VariableExtraction), 1);
        assert_eq!(count(TaskType::TableReading), 1);
        assert_eq!(count(TaskType::PageGrounding), 2);
        assert_eq!(count(TaskType::MultiFigure), 1);
        assert_eq!(count(TaskType::AbstractQa), 1);
        assert_eq!(report.missing_images, 0);
        assert_eq!(report.rejected, 0);
        assert_eq!(samples.len(), report.total());

        let ids: std::collections::HashSet<&str> = samples.iter().map(|s| s.sample.id.as_str()).collect();
        assert_eq!(ids.len(), samples.len());
        let checker = ConsistencyChecker::default();
        assert!(samples.iter().all(|s| checker.check_sample(&s.sample).accepted));
    }

    #[test]
    fn grounding_box_is_scaled_to_the_page_image() {
        let dir = fixture_dir();
        let (docs, pages) = records();
        let (samples, _) = SampleBuilder::new(dir.path()).with_seed(1).build_from_records(&docs, &pages);

        let s = samples
            .iter()
            .find(|s| s.sample.id == "PMC1_p0_r0_page_grounding")
            .unwrap();
        assert_eq!(s.confidence, Some(0.9));
        assert_eq!((s.sample.width, s.sample.height), (Some(500), Some(700)));
        assert_eq!(
            s.sample.conversations[1].value,
            "<ref>Survival by arm</ref><box>[[50,100,150,200]]</box>"
        );
        assert!(s.sample.is_grounding());
    }

    #[test]
    fn unreadable_crops_yield_no_crop_samples() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "pages/PMC1_p000.png", 500, 700);
        let (docs, pages) = records();
        let (samples, report) = SampleBuilder::new(dir.path()).build_from_records(&docs, &pages);

        assert_eq!(report.missing_images, 4);
        let tasks: Vec<TaskType> = samples.iter().map(|s| s.task).collect();
        assert_eq!(
            tasks,
            vec![TaskType::PageGrounding, TaskType::PageGrounding, TaskType::AbstractQa]
        );
    }

    #[test]
    fn seeded_builds_repeat() {
        let dir = fixture_dir();
        let (docs, pages) = records();
        let a = SampleBuilder::new(dir.path()).with_seed(42).build_from_records(&docs, &pages);
        let b = SampleBuilder::new(dir.path()).with_seed(42).build_from_records(&docs, &pages);
        assert_eq!(a, b);
    }

    #[test]
    fn comparison_lists_findings_then_captions() {
        let dir = fixture_dir();
        let (docs, pages) = records();
        let (samples, _) = SampleBuilder::new(dir.path()).with_seed(3).build_from_records(&docs, &pages);

        let multi = samples.iter().find(|s| s.task == TaskType::MultiFigure).unwrap();
        assert_eq!(multi.sample.image_count(), 2);
        assert_eq!(multi.sample.width_list, Some(vec![200, 400]));
        assert_eq!(
            multi.sample.conversations[1].value,
            "Figure 1: Survival was higher in arm A\nFigure 2: Baseline characteristics"
        );
    }

    #[test]
    fn abstract_answer_keeps_long_sentences_whole() {
        let (docs, _) = records();
        let answer = abstract_answer(&docs[0]).unwrap();
        assert!(answer.starts_with("Mortality fell from 30.5% to 21.0%"), "got {answer}");
        assert!(!answer.contains("Short aim"));
        assert!(!answer.contains("subgroup"), "at most three sentences: {answer}");
    }

    #[test]
    fn answers_need_content() {
        let bare = BBoxAnnotation::new("PMC1", 0, BBox::new(0, 0, 10, 10).unwrap(), "crops/a.png", FigureType::Equation);
        assert_eq!(figure_caption_answer(&bare), None);
        assert_eq!(variable_answer(&bare), None);
        assert_eq!(table_answer(&bare), None);

        let captioned = bare.with_caption("Dose model");
        assert_eq!(
            figure_caption_answer(&captioned).as_deref(),
            Some("This is an equation. Dose model")
        );
    }

    #[test]
    fn table_answer_only_for_tables_with_data() {
        let (_, pages) = records();
        let table = &pages[0].annotations[1];
        assert_eq!(
            table_answer(table).as_deref(),
            Some("Table data as CSV:\n```csv\narm,n\nA,10\nB,12\n```")
        );
        let mut chart = pages[0].annotations[0].clone();
        chart.table_csv = Some("a,b".into());
        assert_eq!(table_answer(&chart), None);
    }

    #[test]
    fn box_scaling_rounds_outward_and_stays_inside() {
        let b = BBox::new(1, 1, 999, 1399).unwrap();
        assert_eq!(scale_box(&b, (1000, 1400), (500, 700)), Some([0, 0, 500, 700]));
        let same = BBox::new(10, 20, 30, 40).unwrap();
        assert_eq!(scale_box(&same, (100, 100), (100, 100)), Some([10, 20, 30, 40]));
    }
}
