//! Paper-level annotation: one PDF plus its detected regions in, one
//! [`DocumentAnnotation`] and its [`BBoxPage`]s out.
//!
//! ```text
//! render all pages ─┬─▶ crop + save each region ──▶ region calls ──▶ BBoxPage per page
//!                   └─▶ page batches ──▶ batch calls ──▶ merge ──▶ DocumentAnnotation
//! ```
//!
//! Region and batch calls share the concurrency limit of the config. A
//! failed region becomes a zero-confidence stub; a failed batch is skipped.
//! Only a paper whose every batch failed is an error.

use crate::config::AnnotationConfig;
use crate::error::{AnnotationError, QcError};
use crate::pipeline::detect::{crop_file_name, group_by_page, page_file_name, DetectedRegion};
use crate::pipeline::encode::{encode_image, save_png};
use crate::pipeline::llm::{annotate_document_batch, annotate_region, RegionImages};
use crate::pipeline::merge::{merge_document_batches, plan_page_batches};
use crate::pipeline::parse::RegionContext;
use crate::pipeline::render::{self, RenderedPage};
use crate::schema::{BBox, BBoxAnnotation, BBoxPage, DocumentAnnotation, FigureType};
use edgequake_llm::{ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counts and timings of one paper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationStats {
    pub total_pages: usize,
    pub regions: usize,
    /// Regions that ended up as fallback stubs.
    pub failed_regions: usize,
    /// Regions whose detector box overflowed the page and was clamped.
    pub clamped_regions: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything produced for one paper.
#[derive(Debug, Clone)]
pub struct PaperAnnotation {
    pub document: DocumentAnnotation,
    /// One entry per page that has at least one region, ascending.
    pub pages: Vec<BBoxPage>,
    /// Non-fatal failures, in no particular order.
    pub errors: Vec<AnnotationError>,
    pub stats: AnnotationStats,
}

impl PaperAnnotation {
    pub fn bbox_count(&self) -> usize {
        self.pages.iter().map(|p| p.annotations.len()).sum()
    }
}

struct RegionTask {
    page_index: usize,
    order: usize,
    bbox: BBox,
    figure_type: FigureType,
    caption: Option<String>,
    crop_path: String,
    images: Option<RegionImages>,
    prep_error: Option<AnnotationError>,
}

/// Annotate one paper. The paper id is the PDF file stem; crops are written
/// under `output_dir/crops/` and every page holding a region under
/// `output_dir/pages/`.
///
/// # Errors
/// Only fatal problems: unreadable PDF, no provider, or every page batch
/// failed. Per-region failures are reported in [`PaperAnnotation::errors`].
pub async fn annotate_paper(
    pdf_path: &Path,
    detections: Vec<DetectedRegion>,
    output_dir: &Path,
    config: &AnnotationConfig,
) -> Result<PaperAnnotation, QcError> {
    let total_start = Instant::now();
    let paper_id = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QcError::FileNotFound {
            path: pdf_path.to_path_buf(),
        })?;
    info!("Annotating {} ({} detected regions)", paper_id, detections.len());

    // ── Step 1: Provider and pages ───────────────────────────────────────
    render::check_pdf_file(pdf_path)?;
    let provider = resolve_provider(config).await?;

    let total_pages = render::page_count(pdf_path, config.password.as_deref()).await?;
    if total_pages == 0 {
        return Err(QcError::PageOutOfRange { page: 0, total: 0 });
    }

    let render_start = Instant::now();
    let all_pages: Vec<usize> = (0..total_pages).collect();
    let rendered = render::render_pages(pdf_path, config, &all_pages).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Rendered {} pages in {}ms", rendered.len(), render_duration_ms);

    let pages: BTreeMap<usize, RenderedPage> =
        rendered.into_iter().map(|p| (p.page_index, p)).collect();
    let page_images = encode_pages(&pages, config.max_rendered_pixels);

    // ── Step 2: Prepare region tasks ─────────────────────────────────────
    let (tasks, clamped) = prepare_regions(&paper_id, detections, &pages, &page_images, output_dir, config);
    let batches = plan_page_batches(total_pages, config.batch_pages, config.overlap_pages);

    if let Some(ref cb) = config.progress_callback {
        cb.on_paper_start(&paper_id, tasks.len(), batches.len());
    }

    // ── Step 3: Region calls ─────────────────────────────────────────────
    let llm_start = Instant::now();
    let total_regions = tasks.len();
    let done = AtomicUsize::new(0);
    let done = &done;
    let paper = paper_id.as_str();

    let mut results: Vec<(usize, usize, BBoxAnnotation, Option<AnnotationError>)> =
        stream::iter(tasks.into_iter().map(|task| {
            let provider = Arc::clone(&provider);
            async move {
                let target = format!("{paper} p{} region {}", task.page_index, task.order);
                let ctx = RegionContext {
                    paper_id: paper,
                    page_index: task.page_index,
                    bbox: task.bbox,
                    crop_path: &task.crop_path,
                    figure_type: task.figure_type,
                    caption: task.caption.as_deref(),
                };
                let (ann, err) = match task.images {
                    Some(images) => annotate_region(&provider, config, &ctx, images, &target).await,
                    None => (
                        BBoxAnnotation::fallback(
                            paper,
                            task.page_index,
                            task.bbox,
                            task.crop_path.clone(),
                            task.figure_type,
                            task.caption.as_deref(),
                        ),
                        task.prep_error,
                    ),
                };

                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(ref cb) = config.progress_callback {
                    if let Some(ref e) = err {
                        cb.on_region_error(paper, task.order, &e.to_string());
                    }
                    cb.on_region_complete(paper, n, total_regions, ann.confidence_score().unwrap_or(0.0));
                }
                (task.page_index, task.order, ann, err)
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;
    results.sort_by_key(|(page, order, _, _)| (*page, *order));

    let mut errors = Vec::new();
    let mut by_page: BTreeMap<usize, Vec<BBoxAnnotation>> = BTreeMap::new();
    for (page, _, ann, err) in results {
        errors.extend(err);
        by_page.entry(page).or_default().push(ann);
    }
    let failed_regions = errors.len();

    let mut bbox_pages = Vec::with_capacity(by_page.len());
    for (page_index, annotations) in by_page {
        let (width, height) = pages
            .get(&page_index)
            .map(|p| (p.width(), p.height()))
            .ok_or_else(|| QcError::Internal(format!("page {page_index} was not rendered")))?;
        let page = BBoxPage::new(paper, page_index, width, height, annotations)
            .map_err(|e| QcError::Internal(e.to_string()))?;
        bbox_pages.push(page);
    }

    // ── Step 4: Document batches ─────────────────────────────────────────
    let total_batches = batches.len();
    let mut batch_results: Vec<(usize, Result<DocumentAnnotation, AnnotationError>)> =
        stream::iter(batches.iter().copied().enumerate().map(|(i, (start, end))| {
            let provider = Arc::clone(&provider);
            let images: Vec<ImageData> = (start..end)
                .filter_map(|p| page_images.get(&p).cloned())
                .collect();
            async move {
                let result =
                    annotate_document_batch(&provider, config, paper, (i, total_batches), (start, end), images)
                        .await;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_batch_complete(paper, i + 1, total_batches, result.is_ok());
                }
                (i, result)
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;
    batch_results.sort_by_key(|(i, _)| *i);
    let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

    let mut successes = Vec::new();
    let mut failed_batches = 0;
    for (_, result) in batch_results {
        match result {
            Ok(doc) => successes.push(doc),
            Err(e) => {
                warn!("{}", e);
                failed_batches += 1;
                errors.push(e);
            }
        }
    }

    let document = merge_document_batches(successes).ok_or_else(|| QcError::AllBatchesFailed {
        paper_id: paper_id.clone(),
        total: total_batches,
        first_error: errors[failed_regions..]
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string()),
    })?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_paper_complete(&paper_id, total_regions, failed_regions);
    }

    let stats = AnnotationStats {
        total_pages,
        regions: total_regions,
        failed_regions,
        clamped_regions: clamped,
        batches: total_batches,
        failed_batches,
        render_duration_ms,
        llm_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Annotated {}: {} sections, {}/{} regions ok, {}/{} batches ok, {}ms",
        paper_id,
        document.sections.len(),
        total_regions - failed_regions,
        total_regions,
        total_batches - failed_batches,
        total_batches,
        stats.total_duration_ms
    );

    Ok(PaperAnnotation {
        document,
        pages: bbox_pages,
        errors,
        stats,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Encode every page once, capped for the model; failures drop the page.
fn encode_pages(pages: &BTreeMap<usize, RenderedPage>, max_pixels: u32) -> BTreeMap<usize, ImageData> {
    pages
        .iter()
        .filter_map(|(idx, page)| match encode_image(&page.image, Some(max_pixels)) {
            Ok(data) => Some((*idx, data)),
            Err(e) => {
                warn!("Failed to encode page {}: {}", idx, e);
                None
            }
        })
        .collect()
}

/// Save each page holding regions, then clamp, crop, save and encode each
/// region. Returns the tasks in page order and the number of clamped boxes.
fn prepare_regions(
    paper_id: &str,
    detections: Vec<DetectedRegion>,
    pages: &BTreeMap<usize, RenderedPage>,
    page_images: &BTreeMap<usize, ImageData>,
    output_dir: &Path,
    config: &AnnotationConfig,
) -> (Vec<RegionTask>, usize) {
    let mut tasks = Vec::new();
    let mut clamped = 0;

    for (page_index, regions) in group_by_page(detections) {
        let Some(page) = pages.get(&page_index) else {
            warn!(
                "{}: {} regions on page {} which does not exist",
                paper_id,
                regions.len(),
                page_index
            );
            continue;
        };

        if let Err(e) = save_png(&page.image, &output_dir.join(page_file_name(paper_id, page_index))) {
            warn!("{} p{}: page image not saved: {}", paper_id, page_index, e);
        }

        for (order, region) in regions.into_iter().enumerate() {
            let bbox = if region.bbox.fits_within(page.width(), page.height()) {
                region.bbox
            } else {
                clamped += 1;
                let fixed = region.bbox.clamp_to(page.width(), page.height());
                debug!("{} p{}: clamped {} to {}", paper_id, page_index, region.bbox, fixed);
                fixed
            };
            let crop_path = crop_file_name(paper_id, page_index, order);
            let target = format!("{paper_id} p{page_index} region {order}");

            let crop = page.crop(&bbox);
            let prepared = save_png(&crop, &output_dir.join(&crop_path))
                .and_then(|_| encode_image(&crop, None))
                .map_err(|e| AnnotationError::ImageFailed {
                    target: target.clone(),
                    detail: e.to_string(),
                });

            let (images, prep_error) = match prepared {
                Ok(crop_data) => {
                    let anchor_text = config.use_anchor_text.then(|| {
                        page.text_in(&bbox.expand(config.anchor_margin, page.width(), page.height()))
                    });
                    let page_data = if config.use_anchor_text {
                        page_images.get(&page_index).cloned()
                    } else {
                        None
                    };
                    (
                        Some(RegionImages {
                            crop: crop_data,
                            page: page_data,
                            anchor_text,
                        }),
                        None,
                    )
                }
                Err(e) => {
                    warn!("{}", e);
                    (None, Some(e))
                }
            };

            tasks.push(RegionTask {
                page_index,
                order,
                bbox,
                figure_type: region.figure_type,
                caption: region.caption,
                crop_path,
                images,
                prep_error,
            });
        }
    }
    (tasks, clamped)
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, QcError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        QcError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
pub async fn resolve_provider(config: &AnnotationConfig) -> Result<Arc<dyn LLMProvider>, QcError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| QcError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
