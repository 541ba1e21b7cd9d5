//! CLI binary for medpdf-instruct.
//!
//! A thin shim over the library crate: `annotate` maps flags to
//! `AnnotationConfig`, `qc` to `QualityConfig`, `build` to `SamplerConfig`,
//! and each prints a summary.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use medpdf_instruct::io::write_jsonl;
use medpdf_instruct::run::{BBOXES_FILE, DOCUMENTS_FILE, REPORT_FILE};
use medpdf_instruct::{
    annotate_paper, build_samples_files, check_samples_file, load_detections, run_quality_control_files,
    AnnotationConfig, AnnotationProgressCallback, BBoxPage, CheckMode, DocumentAnnotation, ProgressCallback,
    QualityConfig, SamplerConfig,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar per paper counting region and batch
/// calls, which complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    paper_start: std::sync::Mutex<Option<Instant>>,
    failed_batches: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            paper_start: std::sync::Mutex::new(None),
            failed_batches: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, paper_id: &str, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} calls  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(paper_id.to_string());
        self.bar.reset_eta();
    }
}

impl AnnotationProgressCallback for CliProgressCallback {
    fn on_paper_start(&self, paper_id: &str, total_regions: usize, total_batches: usize) {
        if let Ok(mut start) = self.paper_start.lock() {
            *start = Some(Instant::now());
        }
        self.failed_batches.store(0, Ordering::SeqCst);
        self.activate_bar(paper_id, total_regions + total_batches);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{paper_id}: {total_regions} regions, {total_batches} page batches"
            ))
        ));
    }

    fn on_region_complete(&self, _paper_id: &str, _done: usize, _total: usize, _confidence: f64) {
        self.bar.inc(1);
    }

    fn on_region_error(&self, _paper_id: &str, region: usize, error: &str) {
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} Region {:>3}  {}", red("✗"), region, red(&msg)));
    }

    fn on_batch_complete(&self, _paper_id: &str, batch: usize, total: usize, ok: bool) {
        if !ok {
            self.failed_batches.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} Batch {:>3}/{:<3}  {}",
                red("✗"),
                batch,
                total,
                red("failed")
            ));
        }
        self.bar.inc(1);
    }

    fn on_paper_complete(&self, paper_id: &str, regions: usize, failed_regions: usize) {
        let elapsed = self
            .paper_start
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let failed_batches = self.failed_batches.load(Ordering::SeqCst);
        let mark = if failed_regions == 0 && failed_batches == 0 {
            green("✓")
        } else {
            cyan("⚠")
        };
        self.bar.println(format!(
            "  {} {}  {}/{} regions  {}",
            mark,
            paper_id,
            regions - failed_regions,
            regions,
            dim(&format!("{elapsed:.1}s")),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Annotate two papers; detections are read from detections/<paper>.json
  medpdf annotate PMC1.pdf PMC2.pdf --detections detections -o annotations

  # Use a specific model, smaller batches
  medpdf annotate --model gpt-4.1 --provider openai --batch-pages 3 paper.pdf -o out

  # Quality-control the annotations into a dataset
  medpdf qc --documents annotations/documents.jsonl \
            --bboxes annotations/bboxes.jsonl -o dataset

  # Lenient mode with pinned thresholds
  medpdf qc --mode lenient --config qc.json \
            --documents docs.json --bboxes bboxes.json -o dataset

  # Build conversation samples and draw 5000 of them, reproducibly
  medpdf build --documents dataset/documents.jsonl \
               --bboxes dataset/bboxes.jsonl --image-dir annotations \
               --target 5000 --seed 42 -o samples.jsonl

  # Validate generated conversation samples
  medpdf check-samples samples.jsonl --json > sample_report.json

DETECTIONS FILE:
  A JSON array of regions in pixel coordinates at the rendering DPI:
  [{"page_index": 0, "bbox": {"x1": 100, "y1": 200, "x2": 600, "y2": 700},
    "figure_type": "figure",
    "caption": "Figure 1. ...", "confidence": 0.93}]

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Override the log filter (e.g. medpdf_instruct=debug)
"#;

/// Annotate medical PDFs with Vision LLMs and quality-control the results.
#[derive(Parser, Debug)]
#[command(
    name = "medpdf",
    version,
    about = "Annotate medical PDFs with Vision LLMs and quality-control the results",
    long_about = "Build a multimodal instruction-tuning dataset from medical literature: \
annotate papers and their detected figures and tables with a Vision Language Model, then \
check and deduplicate the annotations.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MEDPDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MEDPDF_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "MEDPDF_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Annotate PDFs and their detected regions with a VLM.
    Annotate(AnnotateArgs),
    /// Check and deduplicate annotation files into a dataset.
    Qc(QcArgs),
    /// Build conversation samples from checked annotations.
    Build(BuildArgs),
    /// Validate conversation samples.
    CheckSamples(SampleArgs),
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    /// PDF files; the file stem becomes the paper id.
    #[arg(required = true)]
    pdfs: Vec<PathBuf>,

    /// Directory holding one `<paper id>.json` detections file per PDF.
    /// Papers without one get a document annotation only.
    #[arg(long, env = "MEDPDF_DETECTIONS")]
    detections: Option<PathBuf>,

    /// Output directory for documents.jsonl, bboxes.jsonl and crops/.
    #[arg(short, long, env = "MEDPDF_OUTPUT", default_value = "annotations")]
    output: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400); detection boxes must use the same pixel space.
    #[arg(long, env = "MEDPDF_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Number of concurrent VLM API calls.
    #[arg(short, long, env = "MEDPDF_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Pages per document-annotation batch.
    #[arg(long, env = "MEDPDF_BATCH_PAGES", default_value_t = 5)]
    batch_pages: usize,

    /// Pages shared by consecutive batches.
    #[arg(long, env = "MEDPDF_OVERLAP_PAGES", default_value_t = 1)]
    overlap: usize,

    /// Send only the crop, without page text or the page image.
    #[arg(long, env = "MEDPDF_NO_ANCHOR_TEXT")]
    no_anchor_text: bool,

    /// Max LLM output tokens per call.
    #[arg(long, env = "MEDPDF_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "MEDPDF_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per call on LLM failure.
    #[arg(long, env = "MEDPDF_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "MEDPDF_PASSWORD")]
    password: Option<String>,
}

#[derive(Args, Debug)]
struct QcArgs {
    /// Document annotations (JSON array or JSONL).
    #[arg(long)]
    documents: PathBuf,

    /// Bbox pages (JSON array or JSONL).
    #[arg(long)]
    bboxes: PathBuf,

    /// Directory crop paths are relative to. Default: the bboxes file's directory.
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Output directory for the checked dataset and qc_report.json.
    #[arg(short, long, env = "MEDPDF_QC_OUTPUT", default_value = "dataset")]
    output: PathBuf,

    /// Acceptance mode: strict or lenient. Overrides the config file.
    #[arg(long, env = "MEDPDF_QC_MODE")]
    mode: Option<CheckMode>,

    /// JSON file with quality thresholds; absent fields keep their defaults.
    #[arg(long, env = "MEDPDF_QC_CONFIG")]
    config: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Checked document annotations (JSON array or JSONL).
    #[arg(long)]
    documents: PathBuf,

    /// Checked bbox pages (JSON array or JSONL).
    #[arg(long)]
    bboxes: PathBuf,

    /// Directory holding crops/ and pages/. Default: the bboxes file's directory.
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Output JSONL file of conversation samples.
    #[arg(short, long, env = "MEDPDF_SAMPLES_OUTPUT", default_value = "samples.jsonl")]
    output: PathBuf,

    /// Draw this many samples with the weighted sampler; all are kept when absent.
    #[arg(long)]
    target: Option<usize>,

    /// Seed for question wording and sampling.
    #[arg(long, env = "MEDPDF_SEED")]
    seed: Option<u64>,

    /// JSON file with task weights and sampling limits; absent fields keep their defaults.
    #[arg(long, env = "MEDPDF_SAMPLER_CONFIG")]
    sampler_config: Option<PathBuf>,

    /// Cap on samples drawn from one paper. Overrides the config file.
    #[arg(long)]
    max_per_paper: Option<usize>,

    /// Floor on samples drawn per task. Overrides the config file.
    #[arg(long)]
    min_per_task: Option<usize>,

    /// Print the build report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SampleArgs {
    /// Conversation samples (JSON array or JSONL).
    samples: PathBuf,

    /// Print the full report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Exit with an error when any sample is rejected.
    #[arg(long)]
    deny_rejected: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while annotating.
    let show_progress =
        !cli.quiet && !cli.no_progress && matches!(cli.command, Command::Annotate(_));
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Annotate(ref args) => run_annotate(args, cli.quiet, show_progress).await,
        Command::Qc(ref args) => run_qc(args, cli.quiet),
        Command::Build(ref args) => run_build(args, cli.quiet),
        Command::CheckSamples(ref args) => run_check_samples(args, cli.quiet),
    }
}

// ── annotate ─────────────────────────────────────────────────────────────────

async fn run_annotate(args: &AnnotateArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn AnnotationProgressCallback>)
    } else {
        None
    };
    let config = build_annotation_config(args, progress_cb)?;

    let start = Instant::now();
    let mut documents: Vec<DocumentAnnotation> = Vec::new();
    let mut pages: Vec<BBoxPage> = Vec::new();
    let mut failed_papers = Vec::new();
    let mut regions = 0usize;
    let mut failed_regions = 0usize;

    for pdf in &args.pdfs {
        let detections = match detections_for(args.detections.as_deref(), pdf)? {
            Some(path) => load_detections(&path)
                .with_context(|| format!("Failed to load detections from {}", path.display()))?,
            None => Vec::new(),
        };

        match annotate_paper(pdf, detections, &args.output, &config).await {
            Ok(paper) => {
                regions += paper.stats.regions;
                failed_regions += paper.stats.failed_regions;
                for e in &paper.errors {
                    tracing::warn!("{}: {}", e.target(), e);
                }
                documents.push(paper.document);
                pages.extend(paper.pages);
            }
            Err(e) => {
                if !quiet {
                    eprintln!("{} {}  {}", red("✘"), pdf.display(), red(&e.to_string()));
                }
                failed_papers.push(pdf.display().to_string());
            }
        }
    }

    let docs_path = args.output.join(DOCUMENTS_FILE);
    let bboxes_path = args.output.join(BBOXES_FILE);
    write_jsonl(&docs_path, &documents).context("Failed to write documents")?;
    write_jsonl(&bboxes_path, &pages).context("Failed to write bbox pages")?;

    if !quiet {
        eprintln!(
            "{}  {}/{} papers  {}/{} regions  {}ms  →  {}",
            if failed_papers.is_empty() && failed_regions == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            documents.len(),
            args.pdfs.len(),
            regions - failed_regions,
            regions,
            start.elapsed().as_millis(),
            bold(&args.output.display().to_string()),
        );
    }

    if documents.is_empty() {
        anyhow::bail!("No paper could be annotated ({} failed)", failed_papers.len());
    }
    Ok(())
}

/// Map CLI args to `AnnotationConfig`.
fn build_annotation_config(
    args: &AnnotateArgs,
    progress: Option<ProgressCallback>,
) -> Result<AnnotationConfig> {
    let mut builder = AnnotationConfig::builder()
        .dpi(args.dpi)
        .concurrency(args.concurrency)
        .batch_pages(args.batch_pages)
        .overlap_pages(args.overlap)
        .use_anchor_text(!args.no_anchor_text)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries);

    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `<dir>/<stem>.json` if it exists.
fn detections_for(dir: Option<&Path>, pdf: &Path) -> Result<Option<PathBuf>> {
    let Some(dir) = dir else {
        return Ok(None);
    };
    let stem = pdf
        .file_stem()
        .with_context(|| format!("Not a file name: {}", pdf.display()))?;
    let path = dir.join(format!("{}.json", stem.to_string_lossy()));
    Ok(path.exists().then_some(path))
}

// ── qc ───────────────────────────────────────────────────────────────────────

fn run_qc(args: &QcArgs, quiet: bool) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => QualityConfig::from_json_file(path)
            .with_context(|| format!("Failed to load quality config from {}", path.display()))?,
        None => QualityConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    let image_dir = image_dir_for(args.image_dir.as_deref(), &args.bboxes);

    let report =
        run_quality_control_files(&args.documents, &args.bboxes, &image_dir, &args.output, &config)
            .context("Quality control failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    }
    if !quiet {
        let d = &report.dedup.documents;
        let b = &report.dedup.bboxes;
        eprintln!(
            "{}  documents {} → {} accepted → {} unique",
            green("✔"),
            report.input.documents,
            report.accepted.documents,
            report.output.documents,
        );
        eprintln!(
            "   bboxes    {} → {} accepted → {} unique  {}",
            report.input.bboxes,
            report.accepted.bboxes,
            report.output.bboxes,
            dim(&format!("({} repaired)", report.repaired_bboxes)),
        );
        eprintln!(
            "   {} errors  /  {} warnings  /  {} unparseable records",
            dim(&report.error_count.to_string()),
            dim(&report.warning_count.to_string()),
            dim(&report.skipped_records.to_string()),
        );
        eprintln!(
            "   dedup: id {}  title {}  abstract {}  orphans {}  position {}  image {}",
            d.identity.removed(),
            d.title.removed(),
            d.abstract_similarity.removed(),
            report.dedup.orphans.removed(),
            b.positional.removed(),
            b.perceptual.removed(),
        );
        for (code, n) in &report.issue_counts {
            eprintln!("   {:>6}  {}", n, dim(&code.to_string()));
        }
        eprintln!("   →  {}", bold(&args.output.join(REPORT_FILE).display().to_string()));
    }
    Ok(())
}

/// `explicit`, else the directory of `bboxes`.
fn image_dir_for(explicit: Option<&Path>, bboxes: &Path) -> PathBuf {
    match explicit {
        Some(dir) => dir.to_path_buf(),
        None => bboxes
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

// ── build ────────────────────────────────────────────────────────────────────

/// Map CLI args to `SamplerConfig`.
fn build_sampler_config(args: &BuildArgs) -> Result<SamplerConfig> {
    let config = match args.sampler_config {
        Some(ref path) => SamplerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load sampler config from {}", path.display()))?,
        None => SamplerConfig::default(),
    };

    let mut builder = SamplerConfig::builder()
        .task_weights(config.task_weights)
        .max_samples_per_paper(args.max_per_paper.unwrap_or(config.max_samples_per_paper))
        .min_samples_per_task(args.min_per_task.unwrap_or(config.min_samples_per_task))
        .balance_papers(config.balance_papers);
    if let Some(seed) = args.seed.or(config.seed) {
        builder = builder.seed(seed);
    }
    builder.build().context("Invalid sampler configuration")
}

fn run_build(args: &BuildArgs, quiet: bool) -> Result<()> {
    let image_dir = image_dir_for(args.image_dir.as_deref(), &args.bboxes);
    let sampler = build_sampler_config(args)?;
    let sampling = args.target.map(|target| (&sampler, target));

    let run = build_samples_files(
        &args.documents,
        &args.bboxes,
        &image_dir,
        &args.output,
        sampler.seed,
        sampling,
    )
    .context("Sample build failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("Failed to serialise report")?
        );
    }
    if !quiet {
        eprintln!(
            "{}  {} built → {} written  {}",
            if run.build.rejected == 0 && run.build.missing_images == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            run.build.total(),
            run.written.total,
            dim(&format!(
                "({} missing images, {} rejected, {} unparseable)",
                run.build.missing_images, run.build.rejected, run.skipped_records
            )),
        );
        for (task, n) in &run.written.per_task {
            eprintln!("   {:>6}  {}", n, dim(&task.to_string()));
        }
        eprintln!(
            "   {} papers, {}–{} samples each",
            run.written.papers, run.written.min_per_paper, run.written.max_per_paper,
        );
        eprintln!("   →  {}", bold(&args.output.display().to_string()));
    }

    if run.written.total == 0 {
        anyhow::bail!("No sample could be built");
    }
    Ok(())
}

// ── check-samples ────────────────────────────────────────────────────────────

fn run_check_samples(args: &SampleArgs, quiet: bool) -> Result<()> {
    let report = check_samples_file(&args.samples)
        .with_context(|| format!("Failed to check {}", args.samples.display()))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !quiet {
        for rejected in &report.rejected {
            eprintln!("{} {}", red("✗"), bold(&rejected.id));
            eprintln!("{}", rejected.report.render());
        }
    }
    if !quiet {
        eprintln!(
            "{}  {}/{} samples accepted  {}",
            if report.rejected.is_empty() {
                green("✔")
            } else {
                cyan("⚠")
            },
            report.accepted,
            report.total,
            dim(&format!("({} unparseable)", report.skipped_records)),
        );
    }

    if args.deny_rejected && !report.rejected.is_empty() {
        anyhow::bail!("{} samples rejected", report.rejected.len());
    }
    Ok(())
}
