//! PDF rasterisation and text lookup via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Every public function here moves its work onto the blocking thread pool.
//!
//! ## Coordinate space
//!
//! Pages are rendered at `dpi / 72` pixels per PDF point. Detector boxes,
//! crops and the checker's page bounds all live in that pixel space, with the
//! origin at the top-left corner. Text positions reported by pdfium (points,
//! origin bottom-left) are converted into it once, at extraction time.

use crate::config::AnnotationConfig;
use crate::error::QcError;
use crate::schema::BBox;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One text segment of a page, in rendered-pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl TextSpan {
    fn centre(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// A page rendered at the configured DPI together with its text layer.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_index: usize,
    pub image: DynamicImage,
    pub spans: Vec<TextSpan>,
}

impl RenderedPage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Text of the segments whose centre falls inside `bbox`, in reading
    /// order of the text layer, joined by single spaces.
    pub fn text_in(&self, bbox: &BBox) -> String {
        let (x1, y1) = (bbox.x1() as f32, bbox.y1() as f32);
        let (x2, y2) = (bbox.x2() as f32, bbox.y2() as f32);
        self.spans
            .iter()
            .filter(|s| {
                let (cx, cy) = s.centre();
                cx >= x1 && cx <= x2 && cy >= y1 && cy <= y2
            })
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Cut `bbox` out of the page image. The box is clamped to the page
    /// first, so an overflowing detection still yields a non-empty crop.
    pub fn crop(&self, bbox: &BBox) -> DynamicImage {
        let b = bbox.clamp_to(self.width(), self.height());
        self.image.crop_imm(b.x1(), b.y1(), b.width(), b.height())
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` (a directory holding the platform
/// library) when set, otherwise the current directory, then the system
/// loader path.
pub fn bind_pdfium() -> Result<Pdfium, QcError> {
    let from_env = std::env::var("PDFIUM_LIB_PATH").ok().map(PathBuf::from);
    let bindings = match from_env {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| QcError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, QcError> {
    if !pdf_path.exists() {
        return Err(QcError::FileNotFound {
            path: pdf_path.to_path_buf(),
        });
    }
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.contains("Password") || err_str.contains("password") {
            QcError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        } else {
            QcError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

/// Fail early on a missing file or one that does not start with `%PDF`.
pub fn check_pdf_file(pdf_path: &Path) -> Result<(), QcError> {
    use std::io::Read;

    let path = pdf_path.to_path_buf();
    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(QcError::FileNotFound { path });
        }
        Err(e) => return Err(QcError::Io(e)),
    };
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
        return Err(QcError::NotAPdf { path, magic });
    }
    Ok(())
}

/// Number of pages in the document.
pub async fn page_count(pdf_path: &Path, password: Option<&str>) -> Result<usize, QcError> {
    check_pdf_file(pdf_path)?;
    let path = pdf_path.to_path_buf();
    let pwd = password.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, &path, pwd.as_deref())?;
        Ok(document.pages().len() as usize)
    })
    .await
    .map_err(|e| QcError::Internal(format!("Page count task panicked: {e}")))?
}

/// Render the given pages (0-based) at `config.dpi` and read their text
/// layers. Out-of-range indices are skipped with a warning.
pub async fn render_pages(
    pdf_path: &Path,
    config: &AnnotationConfig,
    page_indices: &[usize],
) -> Result<Vec<RenderedPage>, QcError> {
    let path = pdf_path.to_path_buf();
    let scale = config.scale();
    let password = config.password.clone();
    let indices = page_indices.to_vec();

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(&path, scale, password.as_deref(), &indices)
    })
    .await
    .map_err(|e| QcError::Internal(format!("Render task panicked: {e}")))?
}

fn render_pages_blocking(
    pdf_path: &Path,
    scale: f32,
    password: Option<&str>,
    page_indices: &[usize],
) -> Result<Vec<RenderedPage>, QcError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, password)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
    let mut results = Vec::with_capacity(page_indices.len());

    for &idx in page_indices {
        if idx >= total_pages {
            warn!("Skipping page {} (out of range, total={})", idx, total_pages);
            continue;
        }

        let page = pages
            .get(idx as u16)
            .map_err(|e| QcError::RasterisationFailed {
                page: idx,
                detail: format!("{e:?}"),
            })?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| QcError::RasterisationFailed {
                page: idx,
                detail: format!("{e:?}"),
            })?;
        let image = bitmap.as_image();

        let spans = match page.text() {
            Ok(text) => {
                let page_height = page.height().value;
                text.segments()
                    .iter()
                    .map(|segment| {
                        let bounds = segment.bounds();
                        let top = (page_height - bounds.top().value) * scale;
                        let bottom = (page_height - bounds.bottom().value) * scale;
                        TextSpan {
                            text: segment.text(),
                            x1: bounds.left().value * scale,
                            y1: top.min(bottom),
                            x2: bounds.right().value * scale,
                            y2: top.max(bottom),
                        }
                    })
                    .collect()
            }
            Err(e) => {
                warn!("Page {}: no text layer ({:?})", idx, e);
                Vec::new()
            }
        };

        debug!(
            "Rendered page {} → {}x{} px, {} text spans",
            idx,
            image.width(),
            image.height(),
            spans.len()
        );
        results.push(RenderedPage {
            page_index: idx,
            image,
            spans,
        });
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn page_with_spans(spans: Vec<TextSpan>) -> RenderedPage {
        RenderedPage {
            page_index: 0,
            image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255]))),
            spans,
        }
    }

    fn span(text: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> TextSpan {
        TextSpan {
            text: text.into(),
            x1,
            y1,
            x2,
            y2,
        }
    }

    #[test]
    fn text_in_keeps_spans_centred_inside() {
        let page = page_with_spans(vec![
            span("Figure 1.", 10.0, 10.0, 50.0, 20.0),
            span("Kaplan-Meier", 55.0, 10.0, 120.0, 20.0),
            span("footer", 10.0, 90.0, 60.0, 98.0),
        ]);
        let bbox = BBox::new(0, 0, 130, 40).unwrap();
        assert_eq!(page.text_in(&bbox), "Figure 1. Kaplan-Meier");
    }

    #[test]
    fn text_in_empty_when_nothing_inside() {
        let page = page_with_spans(vec![span("far", 150.0, 80.0, 190.0, 95.0)]);
        assert_eq!(page.text_in(&BBox::new(0, 0, 50, 50).unwrap()), "");
    }

    #[test]
    fn crop_clamps_to_page() {
        let page = page_with_spans(vec![]);
        let crop = page.crop(&BBox::new(150, 50, 400, 300).unwrap());
        assert_eq!((crop.width(), crop.height()), (50, 50));
    }

    #[tokio::test]
    async fn missing_pdf_is_reported() {
        let err = page_count(Path::new("/nonexistent/paper.pdf"), None).await.unwrap_err();
        assert!(matches!(err, QcError::FileNotFound { .. }), "got {err:?}");
    }

    #[test]
    fn non_pdf_rejected_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"<html>not a pdf</html>").unwrap();
        match check_pdf_file(&path) {
            Err(QcError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"<htm"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }
}
