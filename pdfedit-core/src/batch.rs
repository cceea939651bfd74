//! Whole-file operations that do not need a session: merge, split, extract
//! and building a document from an image.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::config::ImagePageConfig;
use crate::coords::{PdfRect, PDF_DPI};
use crate::draw::DrawOp;
use crate::pipeline::write_atomically;
use crate::{DocumentSource, PageDocument, PdfBackend};

/// Appends every page of every input, in order. Returns the output page count.
#[instrument(skip(backend, inputs), fields(inputs = inputs.len(), output = %output.display()))]
pub fn merge<B: PdfBackend>(backend: &B, inputs: &[PathBuf], output: &Path) -> Result<usize> {
    let mut merged = backend.create()?;
    for input in inputs {
        let document = backend
            .open(&DocumentSource::File(input.clone()))
            .with_context(|| format!("failed to open {:?}", input))?;
        for index in 0..document.page_count() {
            merged
                .copy_page_from(&document, index)
                .with_context(|| format!("failed to copy page {index} of {:?}", input))?;
        }
    }
    write_atomically(&merged, output)?;
    let page_count = merged.page_count();
    info!(page_count, "merged documents");
    Ok(page_count)
}

/// Writes each page to `<out_dir>/<stem>_page_<n>.pdf` (1-based `n`).
#[instrument(skip(backend), fields(input = %input.display()))]
pub fn split<B: PdfBackend>(backend: &B, input: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let document = backend
        .open(&DocumentSource::File(input.to_path_buf()))
        .with_context(|| format!("failed to open {:?}", input))?;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {:?}", out_dir))?;

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let mut written = Vec::with_capacity(document.page_count());
    for index in 0..document.page_count() {
        let mut single = backend.create()?;
        single
            .copy_page_from(&document, index)
            .with_context(|| format!("failed to copy page {index}"))?;
        let path = out_dir.join(format!("{stem}_page_{}.pdf", index + 1));
        write_atomically(&single, &path)?;
        written.push(path);
    }
    info!(pages = written.len(), "split document");
    Ok(written)
}

/// Copies the given 0-based pages, in the given order, into one output.
/// Out-of-range pages are skipped. Returns the output page count.
#[instrument(skip(backend), fields(input = %input.display(), output = %output.display()))]
pub fn extract<B: PdfBackend>(
    backend: &B,
    input: &Path,
    pages: &[usize],
    output: &Path,
) -> Result<usize> {
    let document = backend
        .open(&DocumentSource::File(input.to_path_buf()))
        .with_context(|| format!("failed to open {:?}", input))?;
    let mut extracted = backend.create()?;
    for &index in pages {
        if index >= document.page_count() {
            debug!(index, "skipping out-of-range page");
            continue;
        }
        extracted
            .copy_page_from(&document, index)
            .with_context(|| format!("failed to copy page {index}"))?;
    }
    write_atomically(&extracted, output)?;
    Ok(extracted.page_count())
}

/// Page size in points for an image of the given pixel size. Unvalidated
/// bounds are put in order first so an inverted or NaN pair cannot panic.
pub fn image_page_size(width_px: u32, height_px: u32, config: &ImagePageConfig) -> (f32, f32) {
    let low = config.min_points.min(config.max_points);
    let high = config.min_points.max(config.max_points);
    let to_points = |px: u32| (px as f32 * PDF_DPI / config.dpi).max(low).min(high);
    (to_points(width_px), to_points(height_px))
}

/// Builds a one-page document with the image stretched over the whole page.
/// Returns the page size in points.
#[instrument(skip(backend, config), fields(image = %image_path.display()))]
pub fn create_from_image<B: PdfBackend>(
    backend: &B,
    image_path: &Path,
    output: &Path,
    config: &ImagePageConfig,
) -> Result<(f32, f32)> {
    let image = image::open(image_path)
        .with_context(|| format!("failed to read image {:?}", image_path))?;
    let (width, height) = image_page_size(image.width(), image.height(), config);

    let mut document = backend.create()?;
    let page = document.add_blank_page(width, height)?;
    document.draw(
        page,
        &DrawOp::Image {
            rect: PdfRect::new(0.0, 0.0, width, height),
            image: Arc::new(image),
        },
    )?;
    write_atomically(&document, output)?;
    Ok((width, height))
}
