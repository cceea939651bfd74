//! Materialises pending edits into a new document.
//!
//! Stages run strictly in order: reorder, duplicate, then one content pass
//! (deletions, rotations, redactions, moved content, annotations) on a single
//! open document, and finally an atomic write. Intermediate documents live in
//! a scratch directory next to the target and are removed when it drops.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, instrument, warn};

use crate::coords::{
    normalize_rotation, screen_point_to_pdf, screen_rect_to_pdf, screen_to_pdf, PdfRect,
    ScreenPoint,
};
use crate::draw::{text_box_ops, DrawOp, Rgba, Stroke, TextBox, TEXT_PADDING};
use crate::edits::{
    adjust_page_index, ExtractedContent, ExtractedElement, ImageAnnotation, PendingEdits,
    ShapeAnnotation, ShapeKind, TextAnnotation, TextStyle,
};
use crate::error::{EditorError, SaveStage};
use crate::fonts::{DocumentFonts, FontResolver};
use crate::{DocumentSource, PageDocument, PdfBackend};

#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub path: PathBuf,
    pub page_count: usize,
    /// Edits dropped because their page was deleted or out of range, or
    /// because their content could not be read.
    pub skipped_edits: usize,
}

#[instrument(skip_all, fields(target = %target.display()))]
pub fn save_document<B: PdfBackend>(
    backend: &B,
    source: &DocumentSource,
    edits: &PendingEdits,
    fonts: &FontResolver,
    target: &Path,
) -> Result<SaveReport, EditorError> {
    let scratch = scratch_dir(target).map_err(EditorError::save(SaveStage::Write))?;
    let mut current = source.clone();

    if let Some(order) = edits.page_order() {
        let out = scratch.path().join("reordered.pdf");
        reorder_pages(backend, &current, order, &out)
            .map_err(EditorError::save(SaveStage::Reorder))?;
        current = DocumentSource::File(out);
    }

    if !edits.duplicated_pages().is_empty() {
        let out = scratch.path().join("duplicated.pdf");
        duplicate_pages(backend, &current, edits.duplicated_pages(), &out)
            .map_err(EditorError::save(SaveStage::Duplicate))?;
        current = DocumentSource::File(out);
    }

    let mut document = backend
        .open(&current)
        .context("failed to open the intermediate document")
        .map_err(EditorError::save(SaveStage::Content))?;
    let skipped = apply_content(&mut document, edits, fonts)
        .map_err(EditorError::save(SaveStage::Content))?;
    let page_count = document.page_count();

    write_atomically(&document, target).map_err(EditorError::save(SaveStage::Write))?;
    drop(document);

    if let Err(err) = scratch.close() {
        debug!("failed to remove scratch directory: {err}");
    }

    info!(page_count, skipped, "saved document");
    Ok(SaveReport {
        path: target.to_path_buf(),
        page_count,
        skipped_edits: skipped,
    })
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn scratch_dir(target: &Path) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(".pdfedit-")
        .tempdir_in(parent_dir(target))
        .or_else(|_| tempfile::tempdir())
        .context("failed to create a scratch directory")
}

/// Saves into a temporary file beside `target`, then renames it over
/// `target`. The previous file is untouched if anything fails first.
pub(crate) fn write_atomically<D: PageDocument>(document: &D, target: &Path) -> Result<()> {
    let temp = NamedTempFile::new_in(parent_dir(target))
        .with_context(|| format!("failed to create a temporary file next to {:?}", target))?;
    document.save_to(temp.path())?;
    temp.persist(target)
        .map_err(|err| anyhow!(err.error))
        .with_context(|| format!("failed to replace {:?}", target))?;
    Ok(())
}

#[instrument(skip_all, fields(pages = order.len()))]
fn reorder_pages<B: PdfBackend>(
    backend: &B,
    source: &DocumentSource,
    order: &[usize],
    out: &Path,
) -> Result<()> {
    let input = backend.open(source)?;
    let mut output = backend.create()?;
    let count = input.page_count();
    for &index in order {
        if index >= count {
            debug!(index, count, "skipping out-of-range page in order");
            continue;
        }
        output
            .copy_page_from(&input, index)
            .with_context(|| format!("failed to copy page {index}"))?;
    }
    output.save_to(out)
}

#[instrument(skip_all, fields(requests = duplicates.len()))]
fn duplicate_pages<B: PdfBackend>(
    backend: &B,
    source: &DocumentSource,
    duplicates: &[usize],
    out: &Path,
) -> Result<()> {
    let input = backend.open(source)?;
    let mut output = backend.create()?;
    for index in 0..input.page_count() {
        let copies = 1 + duplicates.iter().filter(|d| **d == index).count();
        for _ in 0..copies {
            output
                .copy_page_from(&input, index)
                .with_context(|| format!("failed to copy page {index}"))?;
        }
    }
    output.save_to(out)
}

/// Quarter turns only; anything else is snapped to the nearest one.
fn snap_rotation(degrees: i32) -> u16 {
    let normalized = u32::from(normalize_rotation(degrees));
    (((normalized + 45) / 90 * 90) % 360) as u16
}

struct ContentPass<'a, 'r, D> {
    document: &'a mut D,
    fonts: DocumentFonts<'r>,
    deleted: BTreeSet<usize>,
    skipped: usize,
}

impl<'a, 'r, D: PageDocument> ContentPass<'a, 'r, D> {
    /// Maps a pre-deletion page number to a live page index, counting a skip
    /// when the page is gone.
    fn target_page(&mut self, page: usize) -> Option<usize> {
        match adjust_page_index(page, &self.deleted) {
            Some(index) if index < self.document.page_count() => Some(index),
            _ => {
                debug!(page, "dropping edit for a missing page");
                self.skipped += 1;
                None
            }
        }
    }

    fn delete_pages(&mut self, requested: &BTreeSet<usize>) -> Result<()> {
        let count = self.document.page_count();
        self.deleted = requested.iter().copied().filter(|p| *p < count).collect();
        for &index in self.deleted.iter().rev() {
            self.document
                .delete_page(index)
                .with_context(|| format!("failed to delete page {index}"))?;
        }
        Ok(())
    }

    fn rotate(&mut self, page: usize, delta: u16) -> Result<()> {
        let Some(index) = self.target_page(page) else {
            return Ok(());
        };
        let existing = self.document.page_rotation(index)?;
        let rotation = snap_rotation(i32::from(existing) + i32::from(delta));
        self.document
            .set_page_rotation(index, rotation)
            .with_context(|| format!("failed to rotate page {index}"))
    }

    fn text(&mut self, page: usize, rect: PdfRect, text: &str, style: &TextStyle) -> Result<()> {
        let font = self.fonts.resolve(
            self.document,
            &style.font_family,
            style.bold,
            style.italic,
            Some(text),
        );
        let ops = text_box_ops(
            &*self.document,
            &TextBox {
                rect,
                text,
                font: font.handle,
                size: style.font_size,
                color: style.color,
                background: style.background,
                border: style.border.map(|border| Stroke {
                    color: border.color,
                    width: screen_to_pdf(border.width),
                }),
                underline: style.underline,
                alignment: style.alignment,
                padding: TEXT_PADDING,
            },
        );
        for op in &ops {
            self.document.draw(page, op)?;
        }
        Ok(())
    }

    fn moved(&mut self, element: &ExtractedElement) -> Result<()> {
        let Some(index) = self.target_page(element.page_number) else {
            return Ok(());
        };
        let op = match &element.content {
            ExtractedContent::Text { text, style } => {
                self.document.draw(index, &DrawOp::cover(element.original))?;
                return self.text(index, element.current, text, style);
            }
            ExtractedContent::Image { data } => match image::load_from_memory(data) {
                Ok(image) => DrawOp::Image {
                    rect: element.current,
                    image: Arc::new(image),
                },
                Err(err) => {
                    warn!(page = element.page_number, "moved image could not be decoded: {err}");
                    self.skipped += 1;
                    return Ok(());
                }
            },
        };
        self.document.draw(index, &DrawOp::cover(element.original))?;
        self.document.draw(index, &op)
    }

    fn text_annotation(&mut self, annotation: &TextAnnotation) -> Result<()> {
        let Some(index) = self.target_page(annotation.page_number) else {
            return Ok(());
        };
        let media = self.document.media_box(index)?;
        let rect = screen_rect_to_pdf(&media, &annotation.bounds);
        self.text(index, rect, &annotation.text, &annotation.style)
    }

    fn image_annotation(&mut self, annotation: &ImageAnnotation) -> Result<()> {
        let Some(index) = self.target_page(annotation.page_number) else {
            return Ok(());
        };
        let image = match image::open(&annotation.path) {
            Ok(image) => image,
            Err(err) => {
                warn!(path = %annotation.path.display(), "image annotation skipped: {err}");
                self.skipped += 1;
                return Ok(());
            }
        };
        let media = self.document.media_box(index)?;
        self.document.draw(
            index,
            &DrawOp::Image {
                rect: screen_rect_to_pdf(&media, &annotation.bounds),
                image: Arc::new(image),
            },
        )
    }

    fn shape_annotation(&mut self, shape: &ShapeAnnotation) -> Result<()> {
        let Some(index) = self.target_page(shape.page_number) else {
            return Ok(());
        };
        let media = self.document.media_box(index)?;
        let width = screen_to_pdf(shape.stroke_width);
        let stroke = shape.stroke.map(|color| Stroke { color, width });
        let op = match shape.kind {
            ShapeKind::Rectangle | ShapeKind::Ellipse => {
                if shape.fill.is_none() && stroke.is_none() {
                    debug!(page = shape.page_number, "shape has neither fill nor stroke");
                    return Ok(());
                }
                let rect = screen_rect_to_pdf(&media, &shape.bounds);
                if shape.kind == ShapeKind::Rectangle {
                    DrawOp::Rect {
                        rect,
                        fill: shape.fill,
                        stroke,
                    }
                } else {
                    DrawOp::Ellipse {
                        rect,
                        fill: shape.fill,
                        stroke,
                    }
                }
            }
            ShapeKind::Line => {
                let bounds = shape.bounds;
                let end = shape.line_end.unwrap_or(ScreenPoint::new(
                    bounds.x + bounds.width,
                    bounds.y + bounds.height,
                ));
                DrawOp::Line {
                    from: screen_point_to_pdf(&media, ScreenPoint::new(bounds.x, bounds.y)),
                    to: screen_point_to_pdf(&media, end),
                    stroke: stroke.unwrap_or(Stroke {
                        color: Rgba::BLACK,
                        width,
                    }),
                }
            }
        };
        self.document.draw(index, &op)
    }
}

/// Runs deletions, rotations and every drawing step on one open document.
/// Returns the number of edits that were dropped.
#[instrument(skip_all)]
fn apply_content<D: PageDocument>(
    document: &mut D,
    edits: &PendingEdits,
    resolver: &FontResolver,
) -> Result<usize> {
    let mut pass = ContentPass {
        document,
        fonts: DocumentFonts::new(resolver),
        deleted: BTreeSet::new(),
        skipped: 0,
    };

    pass.delete_pages(edits.deleted_pages())?;
    for (&page, &delta) in edits.rotations() {
        pass.rotate(page, delta)?;
    }
    for redaction in edits.redactions() {
        if let Some(index) = pass.target_page(redaction.page_number) {
            pass.document.draw(index, &DrawOp::cover(redaction.rect))?;
        }
    }
    for element in edits.moved_texts().iter().chain(edits.moved_images()) {
        pass.moved(element)?;
    }
    for annotation in edits.text_annotations() {
        pass.text_annotation(annotation)?;
    }
    for annotation in edits.image_annotations() {
        pass.image_annotation(annotation)?;
    }
    for shape in edits.shape_annotations() {
        pass.shape_annotation(shape)?;
    }

    Ok(pass.skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::tempdir;

    use crate::config::FontConfig;
    use crate::coords::ScreenRect;
    use crate::edits::{Annotation, AnnotationId, Redaction, TextStyle};
    use crate::fonts::FontTier;
    use crate::testing::{write_png, MemoryBackend, MemoryFile, RecordedOp};

    fn no_fonts() -> FontResolver {
        FontResolver::new(&FontConfig {
            bundled_dir: None,
            system_dirs: Some(Vec::new()),
        })
    }

    fn source(pages: usize) -> DocumentSource {
        DocumentSource::Bytes(MemoryFile::with_pages(pages).to_bytes().into())
    }

    fn text_on(page: usize, text: &str) -> Annotation {
        Annotation::Text(TextAnnotation {
            id: AnnotationId::new(),
            page_number: page,
            bounds: ScreenRect::new(96.0, 96.0, 200.0, 40.0),
            text: text.into(),
            style: TextStyle::default(),
        })
    }

    fn save(pages: usize, edits: &PendingEdits) -> (MemoryFile, SaveReport) {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.pdf");
        let report = save_document(
            &MemoryBackend::new(),
            &source(pages),
            edits,
            &no_fonts(),
            &target,
        )
        .unwrap();
        (MemoryFile::read(&target).unwrap(), report)
    }

    #[test]
    fn deletion_shifts_annotation_to_adjusted_page() {
        let mut edits = PendingEdits::new();
        edits.delete_page(1);
        edits.add_annotation(text_on(3, "moved down"));

        let (file, report) = save(5, &edits);
        assert_eq!(report.page_count, 4);
        assert_eq!(file.page_ids(), ["p0", "p2", "p3", "p4"]);
        assert_eq!(file.pages[2].texts(), ["moved down"]);
        assert_eq!(report.skipped_edits, 0);
    }

    #[test]
    fn edits_on_deleted_pages_are_dropped() {
        let mut edits = PendingEdits::new();
        edits.delete_page(1);
        edits.delete_page(3);
        edits.add_annotation(text_on(1, "gone"));
        edits.add_annotation(text_on(4, "kept"));
        edits.rotate_page(3, 90);
        edits.add_redaction(Redaction {
            page_number: 9,
            rect: PdfRect::new(0.0, 0.0, 10.0, 10.0),
        });

        let (file, report) = save(5, &edits);
        assert_eq!(file.page_ids(), ["p0", "p2", "p4"]);
        assert_eq!(file.pages[2].texts(), ["kept"]);
        assert!(file.pages.iter().all(|p| p.rotation == 0));
        assert_eq!(report.skipped_edits, 3);
    }

    #[test]
    fn out_of_range_structural_requests_are_ignored() {
        let mut edits = PendingEdits::new();
        edits.delete_page(7);
        edits.duplicate_page(12);
        edits.set_page_order(Some(vec![1, 5, 0]));

        let (file, _) = save(2, &edits);
        assert_eq!(file.page_ids(), ["p1", "p0"]);
    }

    #[test]
    fn reorder_runs_before_duplicate() {
        let mut edits = PendingEdits::new();
        edits.set_page_order(Some(vec![2, 0, 1]));
        edits.duplicate_page(0);
        edits.duplicate_page(0);

        let (file, _) = save(3, &edits);
        assert_eq!(file.page_ids(), ["p2", "p2", "p2", "p0", "p1"]);
    }

    #[test]
    fn rotation_adds_to_existing_page_rotation() {
        let mut file = MemoryFile::with_pages(2);
        file.pages[1].rotation = 90;
        let mut edits = PendingEdits::new();
        edits.rotate_page(1, 270);
        edits.rotate_page(0, 45);

        let dir = tempdir().unwrap();
        let target = dir.path().join("rotated.pdf");
        save_document(
            &MemoryBackend::new(),
            &DocumentSource::Bytes(file.to_bytes().into()),
            &edits,
            &no_fonts(),
            &target,
        )
        .unwrap();

        let saved = MemoryFile::read(&target).unwrap();
        assert_eq!(saved.pages[1].rotation, 0);
        assert_eq!(saved.pages[0].rotation, 90);
    }

    #[test]
    fn drawing_follows_stage_order() {
        let dir = tempdir().unwrap();
        let png = write_png(dir.path(), "stamp.png", 4, 4).unwrap();

        let mut edits = PendingEdits::new();
        edits.add_annotation(Annotation::Shape(ShapeAnnotation {
            id: AnnotationId::new(),
            page_number: 0,
            bounds: ScreenRect::new(0.0, 0.0, 96.0, 96.0),
            kind: ShapeKind::Line,
            line_end: Some(ScreenPoint::new(96.0, 0.0)),
            fill: None,
            stroke: None,
            stroke_width: 4.0,
        }));
        edits.add_annotation(Annotation::Image(ImageAnnotation {
            id: AnnotationId::new(),
            page_number: 0,
            bounds: ScreenRect::new(0.0, 0.0, 96.0, 48.0),
            path: png,
        }));
        edits.add_annotation(text_on(0, "label"));
        edits.add_redaction(Redaction {
            page_number: 0,
            rect: PdfRect::new(1.0, 2.0, 3.0, 4.0),
        });

        let (file, _) = save(1, &edits);
        let ops = &file.pages[0].ops;
        assert!(matches!(ops[0], RecordedOp::Rect { fill: Some(Rgba::WHITE), .. }));
        assert!(matches!(ops[1], RecordedOp::Text { .. }));
        assert!(matches!(ops[2], RecordedOp::Image { width: 4, height: 4, .. }));
        match &ops[3] {
            RecordedOp::Line { from, to, stroke } => {
                assert_eq!(*from, (0.0, 792.0));
                assert_eq!(*to, (72.0, 792.0));
                assert_eq!(stroke.width, 3.0);
                assert_eq!(stroke.color, Rgba::BLACK);
            }
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn moved_text_covers_original_bounds() {
        let mut edits = PendingEdits::new();
        edits.add_moved_text(ExtractedElement {
            page_number: 0,
            original: PdfRect::new(10.0, 10.0, 50.0, 12.0),
            current: PdfRect::new(100.0, 100.0, 50.0, 12.0),
            content: ExtractedContent::Text {
                text: "lifted".into(),
                style: TextStyle::default(),
            },
        });
        edits.add_moved_image(ExtractedElement {
            page_number: 0,
            original: PdfRect::new(0.0, 0.0, 5.0, 5.0),
            current: PdfRect::new(5.0, 5.0, 5.0, 5.0),
            content: ExtractedContent::Image {
                data: b"not an image".to_vec(),
            },
        });

        let (file, report) = save(1, &edits);
        let ops = &file.pages[0].ops;
        match &ops[0] {
            RecordedOp::Rect { rect, fill, .. } => {
                assert_eq!(rect.x, 10.0);
                assert_eq!(*fill, Some(Rgba::WHITE));
            }
            other => panic!("expected a cover, got {other:?}"),
        }
        match &ops[1] {
            RecordedOp::Text { x, text, .. } => {
                assert_eq!(text, "lifted");
                assert_eq!(*x, 100.0 + TEXT_PADDING);
            }
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(ops.len(), 2);
        assert_eq!(report.skipped_edits, 1);
    }

    #[test]
    fn thai_annotation_embeds_bundled_thai_font() {
        let fonts_dir = tempdir().unwrap();
        fs::write(fonts_dir.path().join("Sarabun-Regular.ttf"), b"sarabun").unwrap();
        let resolver = FontResolver::new(&FontConfig {
            bundled_dir: Some(fonts_dir.path().to_path_buf()),
            system_dirs: Some(Vec::new()),
        });
        let candidates = resolver.candidates("Arial", false, false, Some("สวัสดีครับ"));
        assert_eq!(candidates[0].tier, FontTier::BundledThai);

        let mut edits = PendingEdits::new();
        edits.add_annotation(text_on(0, "สวัสดีครับ"));
        let dir = tempdir().unwrap();
        let target = dir.path().join("thai.pdf");
        save_document(&MemoryBackend::new(), &source(1), &edits, &resolver, &target).unwrap();

        let saved = MemoryFile::read(&target).unwrap();
        match &saved.pages[0].ops[0] {
            RecordedOp::Text { font, .. } => assert_eq!(font, "embedded:sarabun"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn failed_save_leaves_target_untouched() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("existing.pdf");
        fs::write(&target, b"previous").unwrap();

        let err = save_document(
            &MemoryBackend::new(),
            &DocumentSource::Bytes(Arc::from(&b"garbage"[..])),
            &PendingEdits::new(),
            &no_fonts(),
            &target,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            EditorError::Save {
                stage: SaveStage::Content,
                ..
            }
        ));
        assert_eq!(fs::read(&target).unwrap(), b"previous");
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn rotation_snaps_to_quarter_turns() {
        assert_eq!(snap_rotation(0), 0);
        assert_eq!(snap_rotation(44), 0);
        assert_eq!(snap_rotation(45), 90);
        assert_eq!(snap_rotation(-90), 270);
        assert_eq!(snap_rotation(350), 0);
    }
}
