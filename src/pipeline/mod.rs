//! Pipeline stages that turn a PDF plus detector output into annotations.
//!
//! Each submodule implements one step, so each is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! detect ──▶ render ──▶ encode ──▶ llm ──▶ parse ──▶ merge
//! (regions)  (pdfium)   (base64)   (VLM)   (JSON)    (batches)
//! ```
//!
//! 1. [`detect`]: read detector output and order regions per page
//! 2. [`render`]: rasterise pages at the configured DPI and read their text
//!    layer; runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]: PNG-encode crops and pages for the multimodal request
//! 4. [`llm`]: drive the VLM call with retry/backoff; the only stage with
//!    network I/O
//! 5. [`parse`]: clean replies and merge them with detector metadata
//! 6. [`merge`]: plan overlapping page batches and merge their documents

pub mod detect;
pub mod encode;
pub mod llm;
pub mod merge;
pub mod parse;
pub mod render;
