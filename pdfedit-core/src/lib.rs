use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use image::RgbaImage;

pub mod batch;
pub mod cache;
pub mod config;
pub mod coords;
pub mod draw;
pub mod edits;
pub mod error;
pub mod fonts;
pub mod pipeline;
pub mod render;
pub mod session;
pub mod stamp;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cache::{page_key, thumbnail_key, PageCache};
pub use config::EditorConfig;
pub use coords::{MediaBox, PdfRect, ScreenPoint, ScreenRect};
pub use draw::{DrawOp, FontHandle, Rgba, StandardFont, Stroke, TextAlignment};
pub use edits::{
    Annotation, AnnotationEdit, AnnotationId, EditScript, ExtractedContent, ExtractedElement,
    ImageAnnotation, PendingEdits, Redaction, ShapeAnnotation, ShapeKind, TextAnnotation,
    TextStyle,
};
pub use error::{EditorError, SaveStage};
pub use fonts::{FontResolver, FontTier, ResolvedFont};
pub use pipeline::SaveReport;
pub use render::{PageImage, PageRenderer};
pub use session::{DocumentSession, SessionEvent};
pub use stamp::{HeaderFooter, PageRange, StampLine};

/// Where a document is read from. In-memory bytes are an immutable snapshot
/// shared between the session and render workers.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Bytes(Arc<[u8]>),
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    /// `None` renders at the backend's native resolution.
    pub dpi: Option<f32>,
    /// Clockwise user rotation applied on top of the page's own /Rotate.
    pub rotation: u16,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: None,
            rotation: 0,
        }
    }
}

/// The PDF library seen as a black box: open, create, rasterise.
pub trait PdfBackend: Send + Sync {
    type Document<'a>: PageDocument
    where
        Self: 'a;

    fn open(&self, source: &DocumentSource) -> Result<Self::Document<'_>>;
    fn create(&self) -> Result<Self::Document<'_>>;
    fn page_count(&self, bytes: &[u8]) -> Result<usize>;
    fn render_page(
        &self,
        bytes: &[u8],
        page_index: usize,
        options: RenderOptions,
    ) -> Result<RgbaImage>;
}

/// An open read/write document. Page indices are 0-based.
pub trait PageDocument {
    fn page_count(&self) -> usize;
    /// Appends a copy of `source`'s page at the end of this document.
    fn copy_page_from(&mut self, source: &Self, source_index: usize) -> Result<()>;
    fn add_blank_page(&mut self, width: f32, height: f32) -> Result<usize>;
    fn delete_page(&mut self, index: usize) -> Result<()>;
    fn page_rotation(&self, index: usize) -> Result<u16>;
    fn set_page_rotation(&mut self, index: usize, degrees: u16) -> Result<()>;
    fn media_box(&self, index: usize) -> Result<MediaBox>;
    /// Embeds a complete TrueType/OpenType program with a Unicode-capable
    /// encoding.
    fn load_font(&mut self, data: &[u8]) -> Result<FontHandle>;
    fn standard_font(&mut self, font: StandardFont) -> FontHandle;
    fn measure_text(&self, font: FontHandle, size: f32, text: &str) -> Result<f32>;
    fn draw(&mut self, page_index: usize, op: &DrawOp) -> Result<()>;
    fn save_to(&self, path: &Path) -> Result<()>;
}
