use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::config::EditorConfig;
use crate::coords::PdfRect;
use crate::edits::{
    Annotation, AnnotationEdit, AnnotationId, EditScript, ExtractedElement, ImageAnnotation,
    PendingEdits, Redaction, ShapeAnnotation, TextAnnotation,
};
use crate::error::EditorError;
use crate::fonts::FontResolver;
use crate::pipeline::{save_document, SaveReport};
use crate::render::{PageImage, PageRenderer};
use crate::{DocumentSource, PageDocument, PdfBackend};

/// Notifications for the view layer, drained by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    DocumentLoaded { page_count: usize },
    /// `None` means every page.
    RedrawNeeded { page: Option<usize> },
    Saved { path: PathBuf, page_count: usize },
    Closed,
}

/// One open document: its byte snapshot, pending edits and render caches.
///
/// Edit methods take `&mut self`, so the owner serialises them. Rendering
/// takes `&self` and may run from worker threads.
pub struct DocumentSession<B: PdfBackend> {
    renderer: PageRenderer<B>,
    fonts: Arc<FontResolver>,
    edits: PendingEdits,
    path: Option<PathBuf>,
    page_count: usize,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl<B: PdfBackend> DocumentSession<B> {
    pub fn new(backend: Arc<B>, config: &EditorConfig) -> Self {
        Self::with_fonts(backend, config, FontResolver::for_config(&config.fonts))
    }

    pub fn with_fonts(backend: Arc<B>, config: &EditorConfig, fonts: Arc<FontResolver>) -> Self {
        Self {
            renderer: PageRenderer::new(backend, config),
            fonts,
            edits: PendingEdits::new(),
            path: None,
            page_count: 0,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SessionEvent>>> {
        Arc::clone(&self.events)
    }

    fn emit(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }

    /// Reads the whole file into memory and replaces all session state.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load(&mut self, path: &Path) -> Result<usize, EditorError> {
        let bytes = fs::read(path).map_err(|err| EditorError::Load {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        self.load_bytes(bytes.into(), Some(path.to_path_buf()))
    }

    pub fn load_bytes(
        &mut self,
        bytes: Arc<[u8]>,
        path: Option<PathBuf>,
    ) -> Result<usize, EditorError> {
        let page_count = self
            .renderer
            .backend()
            .page_count(&bytes)
            .map_err(|source| EditorError::Load {
                path: path.clone().unwrap_or_default(),
                source,
            })?;

        self.renderer.set_document(Some(bytes));
        self.edits.clear();
        self.path = path;
        self.page_count = page_count;
        info!(page_count, "document loaded");
        self.emit(SessionEvent::DocumentLoaded { page_count });
        Ok(page_count)
    }

    pub fn close(&mut self) {
        self.renderer.set_document(None);
        self.edits.clear();
        self.path = None;
        self.page_count = 0;
        self.emit(SessionEvent::Closed);
    }

    pub fn is_loaded(&self) -> bool {
        self.renderer.snapshot().is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Page count of the loaded document, before pending structural edits.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn renderer(&self) -> &PageRenderer<B> {
        &self.renderer
    }

    pub fn render_page(&self, page_index: usize, scale: f32, rotation: u16) -> Option<PageImage> {
        self.renderer.render_page(page_index, scale, rotation)
    }

    pub fn render_thumbnail(&self, page_index: usize, rotation: u16) -> Option<PageImage> {
        self.renderer.render_thumbnail(page_index, rotation)
    }

    /// Width and height in points of the page's media box.
    pub fn page_size(&self, page_index: usize) -> Option<(f32, f32)> {
        let bytes = self.renderer.snapshot()?;
        let result = self
            .renderer
            .backend()
            .open(&DocumentSource::Bytes(bytes))
            .and_then(|document| document.media_box(page_index));
        match result {
            Ok(media) => Some((media.width, media.height)),
            Err(err) => {
                warn!(page_index, "failed to read page size: {err:#}");
                None
            }
        }
    }

    pub fn on_zoom_changed(&self) {
        self.renderer.clear_pages();
        self.emit(SessionEvent::RedrawNeeded { page: None });
    }

    pub fn edits(&self) -> &PendingEdits {
        &self.edits
    }

    pub fn has_pending_edits(&self) -> bool {
        !self.edits.is_empty()
    }

    pub fn delete_page(&mut self, page_index: usize) {
        if self.edits.delete_page(page_index) {
            self.structure_changed();
        }
    }

    pub fn duplicate_page(&mut self, page_index: usize) {
        self.edits.duplicate_page(page_index);
        self.structure_changed();
    }

    pub fn set_page_order(&mut self, order: Option<Vec<usize>>) {
        self.edits.set_page_order(order);
        self.structure_changed();
    }

    pub fn rotate_page(&mut self, page_index: usize, delta: i32) -> u16 {
        let rotation = self.edits.rotate_page(page_index, delta);
        self.renderer.invalidate_page(page_index);
        self.emit(SessionEvent::RedrawNeeded {
            page: Some(page_index),
        });
        rotation
    }

    fn structure_changed(&self) {
        self.renderer.clear_pages();
        self.emit(SessionEvent::RedrawNeeded { page: None });
    }

    pub fn add_annotation(&mut self, annotation: Annotation) -> AnnotationId {
        self.edits.add_annotation(annotation)
    }

    pub fn add_text(&mut self, annotation: TextAnnotation) -> AnnotationId {
        self.add_annotation(Annotation::Text(annotation))
    }

    pub fn add_image(&mut self, annotation: ImageAnnotation) -> AnnotationId {
        self.add_annotation(Annotation::Image(annotation))
    }

    pub fn add_shape(&mut self, annotation: ShapeAnnotation) -> AnnotationId {
        self.add_annotation(Annotation::Shape(annotation))
    }

    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.edits.annotation(id)
    }

    /// Returns the edit that undoes this one.
    pub fn update_annotation(
        &mut self,
        id: AnnotationId,
        edit: AnnotationEdit,
    ) -> Option<AnnotationEdit> {
        self.edits.update_annotation(id, edit)
    }

    pub fn remove_annotation(&mut self, id: AnnotationId) -> Option<Annotation> {
        self.edits.remove_annotation(id)
    }

    pub fn add_redaction(&mut self, page_number: usize, x: f32, y: f32, width: f32, height: f32) {
        self.edits.add_redaction(Redaction {
            page_number,
            rect: PdfRect::new(x, y, width, height),
        });
    }

    pub fn add_moved_text(&mut self, element: ExtractedElement) {
        self.edits.add_moved_text(element);
    }

    pub fn add_moved_image(&mut self, element: ExtractedElement) {
        self.edits.add_moved_image(element);
    }

    pub fn clear_annotations(&mut self) {
        self.edits.clear_annotations();
    }

    pub fn clear_redactions(&mut self) {
        self.edits.clear_redactions();
    }

    pub fn clear_edits(&mut self) {
        let structural = self.edits.has_structural_edits() || !self.edits.rotations().is_empty();
        self.edits.clear();
        if structural {
            self.structure_changed();
        }
    }

    pub fn apply_script(&mut self, script: EditScript) {
        let structural = !script.delete_pages.is_empty()
            || !script.duplicate_pages.is_empty()
            || !script.rotations.is_empty()
            || script.page_order.is_some();
        script.apply_to(&mut self.edits);
        if structural {
            self.structure_changed();
        }
    }

    /// Writes the edited document to `target`. On failure the pending edits
    /// are kept so the caller can retry.
    #[instrument(skip(self), fields(target = %target.display()))]
    pub fn save(&mut self, target: &Path) -> Result<SaveReport, EditorError> {
        let bytes = self.renderer.snapshot().ok_or(EditorError::NoDocument)?;
        let report = save_document(
            self.renderer.backend().as_ref(),
            &DocumentSource::Bytes(bytes),
            &self.edits,
            &self.fonts,
            target,
        )?;

        self.edits.clear();
        match fs::read(target) {
            Ok(saved) => self.renderer.set_document(Some(saved.into())),
            Err(err) => {
                self.renderer.set_document(None);
                self.path = None;
                self.page_count = 0;
                return Err(EditorError::Load {
                    path: target.to_path_buf(),
                    source: err.into(),
                });
            }
        }
        self.path = Some(target.to_path_buf());
        self.page_count = report.page_count;
        self.emit(SessionEvent::Saved {
            path: target.to_path_buf(),
            page_count: report.page_count,
        });
        Ok(report)
    }
}
