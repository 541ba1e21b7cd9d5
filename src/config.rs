//! Configuration types for annotation and quality control.
//!
//! Two configs, one per half of the pipeline:
//!
//! * [`QualityConfig`] drives the consistency checker and the deduplicators.
//!   It is plain data, serde (de)serialisable, and can be loaded from a JSON
//!   file so a dataset build can pin its thresholds next to its outputs.
//! * [`AnnotationConfig`] drives rendering and the VLM calls. It carries a
//!   live provider handle and a progress callback, so it is not serialisable.
//! * [`SamplerConfig`] drives the selection of training samples.
//!
//! All are built through a builder whose setters clamp to sane ranges and
//! whose `build()` rejects combinations that cannot work.

use crate::dataset::TaskType;
use crate::error::QcError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

// ── Check mode ───────────────────────────────────────────────────────────

/// How many hard errors a record may carry and still be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Any error rejects the record. (default)
    #[default]
    Strict,
    /// Documents tolerate up to 2 errors, bboxes up to 1. Policy errors
    /// (speculative wording, table fields on non-tables) still reject.
    Lenient,
}

impl std::str::FromStr for CheckMode {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(CheckMode::Strict),
            "lenient" => Ok(CheckMode::Lenient),
            other => Err(QcError::InvalidConfig(format!(
                "unknown check mode '{other}' (expected strict or lenient)"
            ))),
        }
    }
}

// ── Quality config ───────────────────────────────────────────────────────

/// Thresholds for the consistency checker and the deduplicators.
///
/// # Example
/// ```rust
/// use medpdf_instruct::{CheckMode, QualityConfig};
///
/// let config = QualityConfig::builder()
///     .mode(CheckMode::Lenient)
///     .iou_threshold(0.85)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_hash_distance, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Strict or lenient acceptance. Default: strict.
    pub mode: CheckMode,

    /// Minimum trimmed title length in characters. Default: 5.
    pub title_min_chars: usize,

    /// Minimum abstract length in characters. Default: 50.
    pub abstract_min_chars: usize,

    /// Weighted length budget for `key_findings`; CJK ideographs weigh 2.
    /// Default: 100.
    pub key_findings_budget: usize,

    /// Abstract fingerprint Jaccard above which a document is a duplicate.
    /// Default: 0.95.
    pub abstract_similarity: f64,

    /// Abstracts shorter than this are never fingerprinted. Default: 50.
    pub min_abstract_len: usize,

    /// IoU above which two same-kind boxes on a page are duplicates.
    /// Default: 0.9.
    pub iou_threshold: f64,

    /// Side length of the average-hash grid. Default: 16 (256-bit hashes).
    pub hash_size: u32,

    /// Maximum Hamming distance for two crops to count as the same image.
    /// Default: 5.
    pub max_hash_distance: u32,

    /// Caption token Jaccard above which perceptually equal crops are dropped.
    /// Default: 0.8.
    pub caption_similarity: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            mode: CheckMode::Strict,
            title_min_chars: 5,
            abstract_min_chars: 50,
            key_findings_budget: 100,
            abstract_similarity: 0.95,
            min_abstract_len: 50,
            iou_threshold: 0.9,
            hash_size: 16,
            max_hash_distance: 5,
            caption_similarity: 0.8,
        }
    }
}

impl QualityConfig {
    pub fn builder() -> QualityConfigBuilder {
        QualityConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load from a JSON file; absent fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, QcError> {
        if !path.exists() {
            return Err(QcError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let config: QualityConfig =
            serde_json::from_str(&raw).map_err(|e| QcError::ParseFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no builder setter could have produced.
    pub fn validate(&self) -> Result<(), QcError> {
        for (name, v) in [
            ("abstract_similarity", self.abstract_similarity),
            ("iou_threshold", self.iou_threshold),
            ("caption_similarity", self.caption_similarity),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(QcError::InvalidConfig(format!(
                    "{name} must be within 0–1, got {v}"
                )));
            }
        }
        if !(4..=64).contains(&self.hash_size) {
            return Err(QcError::InvalidConfig(format!(
                "hash_size must be 4–64, got {}",
                self.hash_size
            )));
        }
        if self.max_hash_distance > self.hash_size * self.hash_size {
            return Err(QcError::InvalidConfig(format!(
                "max_hash_distance {} exceeds the {}-bit hash",
                self.max_hash_distance,
                self.hash_size * self.hash_size
            )));
        }
        Ok(())
    }
}

/// Builder for [`QualityConfig`].
#[derive(Debug)]
pub struct QualityConfigBuilder {
    config: QualityConfig,
}

impl QualityConfigBuilder {
    pub fn mode(mut self, mode: CheckMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn title_min_chars(mut self, n: usize) -> Self {
        self.config.title_min_chars = n;
        self
    }

    pub fn abstract_min_chars(mut self, n: usize) -> Self {
        self.config.abstract_min_chars = n;
        self
    }

    pub fn key_findings_budget(mut self, n: usize) -> Self {
        self.config.key_findings_budget = n.max(1);
        self
    }

    pub fn abstract_similarity(mut self, t: f64) -> Self {
        self.config.abstract_similarity = t.clamp(0.0, 1.0);
        self
    }

    pub fn min_abstract_len(mut self, n: usize) -> Self {
        self.config.min_abstract_len = n;
        self
    }

    pub fn iou_threshold(mut self, t: f64) -> Self {
        self.config.iou_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn hash_size(mut self, n: u32) -> Self {
        self.config.hash_size = n.clamp(4, 64);
        self
    }

    pub fn max_hash_distance(mut self, d: u32) -> Self {
        self.config.max_hash_distance = d;
        self
    }

    pub fn caption_similarity(mut self, t: f64) -> Self {
        self.config.caption_similarity = t.clamp(0.0, 1.0);
        self
    }

    pub fn build(self) -> Result<QualityConfig, QcError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Sampler config ───────────────────────────────────────────────────────

/// How training samples are drawn from everything the builder produced.
///
/// Tasks missing from `task_weights`, or weighted zero, are never drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Relative share of each task in the target size.
    pub task_weights: BTreeMap<TaskType, f64>,

    /// Cap per paper once papers are balanced. Default: 50.
    pub max_samples_per_paper: usize,

    /// Floor per task, when the task has that many samples. Default: 100.
    pub min_samples_per_task: usize,

    /// Apply `max_samples_per_paper`. Default: true.
    pub balance_papers: bool,

    /// Fixed seed for a reproducible draw. Default: none.
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        let task_weights = [
            (TaskType::PageGrounding, 0.15),
            (TaskType::FigureCaption, 0.40),
            (TaskType::VariableExtraction, 0.15),
            (TaskType::TableReading, 0.15),
            (TaskType::MultiFigure, 0.10),
            (TaskType::AbstractQa, 0.05),
        ]
        .into_iter()
        .collect();
        Self {
            task_weights,
            max_samples_per_paper: 50,
            min_samples_per_task: 100,
            balance_papers: true,
            seed: None,
        }
    }
}

impl SamplerConfig {
    pub fn builder() -> SamplerConfigBuilder {
        SamplerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load from a JSON file; absent fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, QcError> {
        if !path.exists() {
            return Err(QcError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let config: SamplerConfig =
            serde_json::from_str(&raw).map_err(|e| QcError::ParseFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn weight(&self, task: TaskType) -> f64 {
        self.task_weights.get(&task).copied().unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), QcError> {
        if let Some((task, w)) = self
            .task_weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(QcError::InvalidConfig(format!(
                "weight of {task} must be a non-negative number, got {w}"
            )));
        }
        if !self.task_weights.values().any(|w| *w > 0.0) {
            return Err(QcError::InvalidConfig(
                "at least one task needs a positive weight".into(),
            ));
        }
        if self.max_samples_per_paper == 0 {
            return Err(QcError::InvalidConfig(
                "max_samples_per_paper must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`SamplerConfig`].
#[derive(Debug)]
pub struct SamplerConfigBuilder {
    config: SamplerConfig,
}

impl SamplerConfigBuilder {
    /// Set one task's weight; negative weights become zero.
    pub fn task_weight(mut self, task: TaskType, weight: f64) -> Self {
        self.config.task_weights.insert(task, weight.max(0.0));
        self
    }

    /// Replace all weights; tasks not listed are never drawn.
    pub fn task_weights(mut self, weights: impl IntoIterator<Item = (TaskType, f64)>) -> Self {
        self.config.task_weights = weights.into_iter().map(|(t, w)| (t, w.max(0.0))).collect();
        self
    }

    pub fn max_samples_per_paper(mut self, n: usize) -> Self {
        self.config.max_samples_per_paper = n.max(1);
        self
    }

    pub fn min_samples_per_task(mut self, n: usize) -> Self {
        self.config.min_samples_per_task = n;
        self
    }

    pub fn balance_papers(mut self, on: bool) -> Self {
        self.config.balance_papers = on;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SamplerConfig, QcError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Annotation config ────────────────────────────────────────────────────

/// Configuration for rendering and VLM annotation of one or more papers.
///
/// Built via [`AnnotationConfig::builder()`] or [`AnnotationConfig::default()`].
#[derive(Clone)]
pub struct AnnotationConfig {
    /// Rendering DPI; bbox coordinates live in this pixel space. Range: 72–400.
    /// Default: 200.
    pub dpi: u32,

    /// Longest edge, in pixels, of a page image sent to the VLM. Default: 2000.
    ///
    /// Only the copy sent to the model is capped; crops and bbox coordinates
    /// always use the full-DPI render.
    pub max_rendered_pixels: u32,

    /// Number of concurrent VLM calls. Default: 5.
    pub concurrency: usize,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "mistral", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens per reply. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts after a failed VLM call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Pages per document-annotation batch. Default: 5.
    pub batch_pages: usize,

    /// Pages shared by consecutive batches. Must be below `batch_pages`.
    /// Default: 1.
    pub overlap_pages: usize,

    /// Send page text around each region, and the whole page image, with the
    /// crop. Default: true.
    pub use_anchor_text: bool,

    /// Margin in pixels around a region when extracting anchor text.
    /// Default: 50.
    pub anchor_margin: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Per-region and per-batch progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2000,
            concurrency: 5,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            batch_pages: 5,
            overlap_pages: 1,
            use_anchor_text: true,
            anchor_margin: 50,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnnotationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("batch_pages", &self.batch_pages)
            .field("overlap_pages", &self.overlap_pages)
            .field("use_anchor_text", &self.use_anchor_text)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl AnnotationConfig {
    pub fn builder() -> AnnotationConfigBuilder {
        AnnotationConfigBuilder {
            config: Self::default(),
        }
    }

    /// Pixels per PDF point at the configured DPI.
    pub fn scale(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

/// Builder for [`AnnotationConfig`].
#[derive(Debug)]
pub struct AnnotationConfigBuilder {
    config: AnnotationConfig,
}

impl AnnotationConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn batch_pages(mut self, n: usize) -> Self {
        self.config.batch_pages = n.max(1);
        self
    }

    pub fn overlap_pages(mut self, n: usize) -> Self {
        self.config.overlap_pages = n;
        self
    }

    pub fn use_anchor_text(mut self, v: bool) -> Self {
        self.config.use_anchor_text = v;
        self
    }

    pub fn anchor_margin(mut self, px: u32) -> Self {
        self.config.anchor_margin = px;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnnotationConfig, QcError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(QcError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(QcError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.overlap_pages >= c.batch_pages {
            return Err(QcError::InvalidConfig(format!(
                "overlap_pages ({}) must be smaller than batch_pages ({})",
                c.overlap_pages, c.batch_pages
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_defaults() {
        let c = QualityConfig::default();
        assert_eq!(c.mode, CheckMode::Strict);
        assert_eq!(c.iou_threshold, 0.9);
        assert_eq!(c.hash_size, 16);
        assert_eq!(c.max_hash_distance, 5);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn quality_builder_clamps() {
        let c = QualityConfig::builder()
            .iou_threshold(1.7)
            .hash_size(2)
            .build()
            .unwrap();
        assert_eq!(c.iou_threshold, 1.0);
        assert_eq!(c.hash_size, 4);
    }

    #[test]
    fn hash_distance_beyond_hash_bits_rejected() {
        let r = QualityConfig::builder()
            .hash_size(4)
            .max_hash_distance(17)
            .build();
        assert!(matches!(r, Err(QcError::InvalidConfig(_))));
    }

    #[test]
    fn quality_config_from_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc.json");
        std::fs::write(&path, r#"{"mode":"lenient","iou_threshold":0.8}"#).unwrap();
        let c = QualityConfig::from_json_file(&path).unwrap();
        assert_eq!(c.mode, CheckMode::Lenient);
        assert_eq!(c.iou_threshold, 0.8);
        assert_eq!(c.caption_similarity, 0.8);
    }

    #[test]
    fn quality_config_out_of_range_json_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc.json");
        std::fs::write(&path, r#"{"abstract_similarity":3.0}"#).unwrap();
        assert!(matches!(
            QualityConfig::from_json_file(&path),
            Err(QcError::InvalidConfig(_))
        ));
    }

    #[test]
    fn check_mode_from_str() {
        assert_eq!("Lenient".parse::<CheckMode>().unwrap(), CheckMode::Lenient);
        assert!("loose".parse::<CheckMode>().is_err());
    }

    #[test]
    fn sampler_defaults_cover_every_task() {
        let c = SamplerConfig::default();
        assert!(c.validate().is_ok());
        for task in TaskType::ALL {
            assert!(c.weight(task) > 0.0, "{task}");
        }
        let total: f64 = c.task_weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sampler_needs_a_positive_weight() {
        let r = SamplerConfig::builder()
            .task_weights([(TaskType::FigureCaption, 0.0), (TaskType::TableReading, -1.0)])
            .build();
        assert!(matches!(r, Err(QcError::InvalidConfig(_))));
    }

    #[test]
    fn sampler_config_from_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sampler.json");
        std::fs::write(&path, r#"{"task_weights":{"figure_caption":1.0},"seed":7}"#).unwrap();
        let c = SamplerConfig::from_json_file(&path).unwrap();
        assert_eq!(c.seed, Some(7));
        assert_eq!(c.weight(TaskType::FigureCaption), 1.0);
        assert_eq!(c.weight(TaskType::TableReading), 0.0);
        assert_eq!(c.max_samples_per_paper, 50);
    }

    #[test]
    fn annotation_defaults() {
        let c = AnnotationConfig::default();
        assert_eq!(c.dpi, 200);
        assert_eq!(c.batch_pages, 5);
        assert_eq!(c.overlap_pages, 1);
        assert!((c.scale() - 200.0 / 72.0).abs() < 1e-6);
    }

    #[test]
    fn annotation_builder_clamps_dpi() {
        let c = AnnotationConfig::builder().dpi(1000).build().unwrap();
        assert_eq!(c.dpi, 400);
    }

    #[test]
    fn overlap_must_be_below_batch_size() {
        let r = AnnotationConfig::builder()
            .batch_pages(2)
            .overlap_pages(2)
            .build();
        assert!(matches!(r, Err(QcError::InvalidConfig(_))));
    }
}
