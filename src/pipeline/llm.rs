//! VLM interaction: build vision messages, call the provider, parse replies.
//!
//! All prompt text lives in [`crate::prompts`] and all reply repair in
//! [`super::parse`]; this module owns only message layout, the retry loop
//! and the failure policy.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient and frequent under concurrent load.
//! Exponential backoff (`retry_backoff_ms * 2^attempt`) with 500 ms base and
//! 3 retries waits 500 ms → 1 s → 2 s. An unparseable reply is not retried.

use super::parse::{parse_document_reply, parse_region_reply, RegionContext};
use crate::config::AnnotationConfig;
use crate::error::AnnotationError;
use crate::prompts::{document_batch_prompt, region_prompt, DOCUMENT_SYSTEM_PROMPT, REGION_SYSTEM_PROMPT};
use crate::schema::{BBoxAnnotation, DocumentAnnotation};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Reply text of a successful call, with token accounting.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u8,
}

/// Send `messages`, retrying provider errors with exponential backoff.
///
/// `target` labels log lines and the returned error (e.g. `PMC1 p3 region 0`).
pub async fn chat_with_retry(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    config: &AnnotationConfig,
    target: &str,
) -> Result<CallResult, AnnotationError> {
    let start = Instant::now();
    let options = build_options(config);
    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                target, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match provider.chat(messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    target,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                return Ok(CallResult {
                    content: response.content,
                    input_tokens: response.prompt_tokens,
                    output_tokens: response.completion_tokens,
                    retries: attempt as u8,
                });
            }
            Err(e) => {
                let err_msg = format!("{e}");
                warn!("{}: attempt {} failed: {}", target, attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(AnnotationError::LlmFailed {
        target: target.to_string(),
        retries: config.max_retries as u8,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

/// Inputs of one region call besides the detector metadata.
#[derive(Debug, Clone)]
pub struct RegionImages {
    pub crop: ImageData,
    /// Whole page, sent after the crop for context.
    pub page: Option<ImageData>,
    pub anchor_text: Option<String>,
}

/// Annotate one region.
///
/// Always yields an annotation: when the call or the reply fails, the result
/// is [`BBoxAnnotation::fallback`] (detector metadata, confidence 0.0) and the
/// failure is returned next to it.
pub async fn annotate_region(
    provider: &Arc<dyn LLMProvider>,
    config: &AnnotationConfig,
    ctx: &RegionContext<'_>,
    images: RegionImages,
    target: &str,
) -> (BBoxAnnotation, Option<AnnotationError>) {
    let text = region_prompt(
        ctx.figure_type,
        ctx.bbox.to_array(),
        ctx.caption,
        images.anchor_text.as_deref(),
        images.page.is_some(),
    );
    let mut attachments = vec![images.crop];
    attachments.extend(images.page);

    let messages = vec![
        ChatMessage::system(REGION_SYSTEM_PROMPT),
        ChatMessage::user_with_images(text, attachments),
    ];

    let fallback = || {
        BBoxAnnotation::fallback(
            ctx.paper_id,
            ctx.page_index,
            ctx.bbox,
            ctx.crop_path,
            ctx.figure_type,
            ctx.caption,
        )
    };

    let reply = match chat_with_retry(provider, &messages, config, target).await {
        Ok(r) => r,
        Err(e) => return (fallback(), Some(e)),
    };

    match parse_region_reply(&reply.content, ctx) {
        Ok(ann) => (ann, None),
        Err(e) => {
            warn!("{}: unusable reply, using detector metadata: {}", target, e);
            (
                fallback(),
                Some(AnnotationError::InvalidReply {
                    target: target.to_string(),
                    detail: e.to_string(),
                }),
            )
        }
    }
}

/// Annotate one page batch of a paper into a partial document.
pub async fn annotate_document_batch(
    provider: &Arc<dyn LLMProvider>,
    config: &AnnotationConfig,
    paper_id: &str,
    (batch, total): (usize, usize),
    (start, end): (usize, usize),
    pages: Vec<ImageData>,
) -> Result<DocumentAnnotation, AnnotationError> {
    let target = format!("{paper_id} batch {}/{total}", batch + 1);
    let messages = vec![
        ChatMessage::system(DOCUMENT_SYSTEM_PROMPT),
        ChatMessage::user_with_images(document_batch_prompt(batch, total, start, end), pages),
    ];

    let reply = chat_with_retry(provider, &messages, config, &target).await?;
    parse_document_reply(&reply.content, paper_id).map_err(|e| AnnotationError::InvalidReply {
        target,
        detail: e.to_string(),
    })
}

/// Build `CompletionOptions` from the annotation config.
fn build_options(config: &AnnotationConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let config = AnnotationConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn build_options_follow_builder() {
        let config = AnnotationConfig::builder()
            .temperature(0.4)
            .max_tokens(1024)
            .build()
            .unwrap();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.4));
        assert_eq!(opts.max_tokens, Some(1024));
    }
}
