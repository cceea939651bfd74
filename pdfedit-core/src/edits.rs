//! Pending, unsaved edits for one document.
//!
//! Page numbers stored here are 0-based and refer to the layout before any
//! pending deletion is applied. The save pipeline maps them through
//! [`adjust_page_index`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coords::{normalize_rotation, PdfRect, ScreenPoint, ScreenRect};
use crate::draw::{Rgba, Stroke, TextAlignment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(Uuid);

impl AnnotationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

fn default_font_family() -> String {
    "Arial".to_string()
}

fn default_font_size() -> f32 {
    12.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub font_family: String,
    /// Points, never rescaled by the screen ratio.
    pub font_size: f32,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub color: Rgba,
    pub background: Option<Rgba>,
    pub border: Option<Stroke>,
    pub alignment: TextAlignment,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: default_font_family(),
            font_size: default_font_size(),
            bold: false,
            italic: false,
            underline: false,
            color: Rgba::BLACK,
            background: None,
            border: None,
            alignment: TextAlignment::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnnotation {
    #[serde(default)]
    pub id: AnnotationId,
    pub page_number: usize,
    pub bounds: ScreenRect,
    pub text: String,
    #[serde(default)]
    pub style: TextStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnnotation {
    #[serde(default)]
    pub id: AnnotationId,
    pub page_number: usize,
    pub bounds: ScreenRect,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Rectangle,
    Ellipse,
    Line,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeAnnotation {
    #[serde(default)]
    pub id: AnnotationId,
    pub page_number: usize,
    /// For lines, `x`/`y` is the start point.
    pub bounds: ScreenRect,
    pub kind: ShapeKind,
    #[serde(default)]
    pub line_end: Option<ScreenPoint>,
    #[serde(default)]
    pub fill: Option<Rgba>,
    #[serde(default)]
    pub stroke: Option<Rgba>,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f32,
}

fn default_stroke_width() -> f32 {
    1.0
}

/// Placed content waiting to be drawn on save. Geometry is in screen pixels
/// relative to the page's top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    Text(TextAnnotation),
    Image(ImageAnnotation),
    Shape(ShapeAnnotation),
}

impl Annotation {
    pub fn id(&self) -> AnnotationId {
        match self {
            Annotation::Text(a) => a.id,
            Annotation::Image(a) => a.id,
            Annotation::Shape(a) => a.id,
        }
    }

    pub fn page_number(&self) -> usize {
        match self {
            Annotation::Text(a) => a.page_number,
            Annotation::Image(a) => a.page_number,
            Annotation::Shape(a) => a.page_number,
        }
    }

    pub fn bounds(&self) -> ScreenRect {
        match self {
            Annotation::Text(a) => a.bounds,
            Annotation::Image(a) => a.bounds,
            Annotation::Shape(a) => a.bounds,
        }
    }

    fn bounds_mut(&mut self) -> &mut ScreenRect {
        match self {
            Annotation::Text(a) => &mut a.bounds,
            Annotation::Image(a) => &mut a.bounds,
            Annotation::Shape(a) => &mut a.bounds,
        }
    }

    /// Applies `edit` and returns the value it replaced, or `None` if the
    /// property does not exist on this kind of annotation.
    pub fn apply(&mut self, edit: AnnotationEdit) -> Option<AnnotationEdit> {
        use std::mem::replace;

        match edit {
            AnnotationEdit::Position(to) => {
                let bounds = self.bounds_mut();
                let from = ScreenPoint::new(bounds.x, bounds.y);
                bounds.x = to.x;
                bounds.y = to.y;
                if let Annotation::Shape(shape) = self {
                    if let Some(end) = shape.line_end.as_mut() {
                        end.x += to.x - from.x;
                        end.y += to.y - from.y;
                    }
                }
                Some(AnnotationEdit::Position(from))
            }
            AnnotationEdit::Size { width, height } => {
                let bounds = self.bounds_mut();
                let previous = AnnotationEdit::Size {
                    width: bounds.width,
                    height: bounds.height,
                };
                bounds.width = width;
                bounds.height = height;
                Some(previous)
            }
            edit => match (self, edit) {
                (Annotation::Text(a), AnnotationEdit::Text(v)) => {
                    Some(AnnotationEdit::Text(replace(&mut a.text, v)))
                }
                (Annotation::Text(a), AnnotationEdit::FontFamily(v)) => {
                    Some(AnnotationEdit::FontFamily(replace(&mut a.style.font_family, v)))
                }
                (Annotation::Text(a), AnnotationEdit::FontSize(v)) => {
                    Some(AnnotationEdit::FontSize(replace(&mut a.style.font_size, v)))
                }
                (Annotation::Text(a), AnnotationEdit::Bold(v)) => {
                    Some(AnnotationEdit::Bold(replace(&mut a.style.bold, v)))
                }
                (Annotation::Text(a), AnnotationEdit::Italic(v)) => {
                    Some(AnnotationEdit::Italic(replace(&mut a.style.italic, v)))
                }
                (Annotation::Text(a), AnnotationEdit::Underline(v)) => {
                    Some(AnnotationEdit::Underline(replace(&mut a.style.underline, v)))
                }
                (Annotation::Text(a), AnnotationEdit::Color(v)) => {
                    Some(AnnotationEdit::Color(replace(&mut a.style.color, v)))
                }
                (Annotation::Text(a), AnnotationEdit::Background(v)) => {
                    Some(AnnotationEdit::Background(replace(&mut a.style.background, v)))
                }
                (Annotation::Text(a), AnnotationEdit::Border(v)) => {
                    Some(AnnotationEdit::Border(replace(&mut a.style.border, v)))
                }
                (Annotation::Text(a), AnnotationEdit::Alignment(v)) => {
                    Some(AnnotationEdit::Alignment(replace(&mut a.style.alignment, v)))
                }
                (Annotation::Shape(s), AnnotationEdit::Fill(v)) => {
                    Some(AnnotationEdit::Fill(replace(&mut s.fill, v)))
                }
                (Annotation::Shape(s), AnnotationEdit::Stroke(v)) => {
                    Some(AnnotationEdit::Stroke(replace(&mut s.stroke, v)))
                }
                (Annotation::Shape(s), AnnotationEdit::StrokeWidth(v)) => {
                    Some(AnnotationEdit::StrokeWidth(replace(&mut s.stroke_width, v)))
                }
                (Annotation::Shape(s), AnnotationEdit::LineEnd(v)) if s.kind == ShapeKind::Line => {
                    Some(AnnotationEdit::LineEnd(replace(&mut s.line_end, v)))
                }
                (Annotation::Image(i), AnnotationEdit::ImagePath(v)) => {
                    Some(AnnotationEdit::ImagePath(replace(&mut i.path, v)))
                }
                _ => None,
            },
        }
    }
}

/// A single typed property change on an annotation. Applying one yields the
/// edit that restores the previous value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "property", content = "value", rename_all = "snake_case")]
pub enum AnnotationEdit {
    Position(ScreenPoint),
    Size { width: f32, height: f32 },
    Text(String),
    FontFamily(String),
    FontSize(f32),
    Bold(bool),
    Italic(bool),
    Underline(bool),
    Color(Rgba),
    Background(Option<Rgba>),
    Border(Option<Stroke>),
    Alignment(TextAlignment),
    Fill(Option<Rgba>),
    Stroke(Option<Rgba>),
    StrokeWidth(f32),
    LineEnd(Option<ScreenPoint>),
    ImagePath(PathBuf),
}

/// White box over existing content, in absolute page points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Redaction {
    pub page_number: usize,
    pub rect: PdfRect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractedContent {
    Text {
        text: String,
        #[serde(default)]
        style: TextStyle,
    },
    Image {
        /// Encoded image bytes as lifted from the page.
        data: Vec<u8>,
    },
}

/// Existing page content lifted from `original` and redrawn at `current`,
/// both in absolute page points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedElement {
    pub page_number: usize,
    pub original: PdfRect,
    pub current: PdfRect,
    pub content: ExtractedContent,
}

/// Maps a page index from the pre-deletion layout to the post-deletion one.
/// Returns `None` when the page itself is deleted.
pub fn adjust_page_index(page: usize, deleted: &BTreeSet<usize>) -> Option<usize> {
    if deleted.contains(&page) {
        return None;
    }
    Some(page - deleted.range(..page).count())
}

#[derive(Debug, Clone, Default)]
pub struct PendingEdits {
    rotations: BTreeMap<usize, u16>,
    deleted: BTreeSet<usize>,
    duplicated: Vec<usize>,
    page_order: Option<Vec<usize>>,
    annotations: Vec<Annotation>,
    redactions: Vec<Redaction>,
    moved_texts: Vec<ExtractedElement>,
    moved_images: Vec<ExtractedElement>,
}

impl PendingEdits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates a rotation delta, normalized into `[0, 360)`. A page whose
    /// net rotation returns to zero has no pending rotation.
    pub fn rotate_page(&mut self, index: usize, delta: i32) -> u16 {
        let existing = self.rotations.get(&index).copied().unwrap_or(0);
        let rotation = normalize_rotation(i32::from(existing) + delta);
        if rotation == 0 {
            self.rotations.remove(&index);
        } else {
            self.rotations.insert(index, rotation);
        }
        rotation
    }

    pub fn rotation(&self, index: usize) -> u16 {
        self.rotations.get(&index).copied().unwrap_or(0)
    }

    pub fn rotations(&self) -> &BTreeMap<usize, u16> {
        &self.rotations
    }

    pub fn delete_page(&mut self, index: usize) -> bool {
        self.deleted.insert(index)
    }

    pub fn deleted_pages(&self) -> &BTreeSet<usize> {
        &self.deleted
    }

    pub fn duplicate_page(&mut self, index: usize) {
        self.duplicated.push(index);
    }

    pub fn duplicated_pages(&self) -> &[usize] {
        &self.duplicated
    }

    pub fn set_page_order(&mut self, order: Option<Vec<usize>>) {
        self.page_order = order;
    }

    pub fn page_order(&self) -> Option<&[usize]> {
        self.page_order.as_deref()
    }

    pub fn has_structural_edits(&self) -> bool {
        !self.deleted.is_empty() || !self.duplicated.is_empty() || self.page_order.is_some()
    }

    pub fn add_annotation(&mut self, annotation: Annotation) -> AnnotationId {
        let id = annotation.id();
        self.annotations.push(annotation);
        id
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id() == id)
    }

    pub fn update_annotation(
        &mut self,
        id: AnnotationId,
        edit: AnnotationEdit,
    ) -> Option<AnnotationEdit> {
        self.annotations
            .iter_mut()
            .find(|a| a.id() == id)
            .and_then(|a| a.apply(edit))
    }

    pub fn remove_annotation(&mut self, id: AnnotationId) -> Option<Annotation> {
        let position = self.annotations.iter().position(|a| a.id() == id)?;
        Some(self.annotations.remove(position))
    }

    pub fn text_annotations(&self) -> impl Iterator<Item = &TextAnnotation> {
        self.annotations.iter().filter_map(|a| match a {
            Annotation::Text(t) => Some(t),
            _ => None,
        })
    }

    pub fn image_annotations(&self) -> impl Iterator<Item = &ImageAnnotation> {
        self.annotations.iter().filter_map(|a| match a {
            Annotation::Image(i) => Some(i),
            _ => None,
        })
    }

    pub fn shape_annotations(&self) -> impl Iterator<Item = &ShapeAnnotation> {
        self.annotations.iter().filter_map(|a| match a {
            Annotation::Shape(s) => Some(s),
            _ => None,
        })
    }

    pub fn add_redaction(&mut self, redaction: Redaction) {
        self.redactions.push(redaction);
    }

    pub fn redactions(&self) -> &[Redaction] {
        &self.redactions
    }

    pub fn add_moved_text(&mut self, element: ExtractedElement) {
        self.moved_texts.push(element);
    }

    pub fn moved_texts(&self) -> &[ExtractedElement] {
        &self.moved_texts
    }

    pub fn add_moved_image(&mut self, element: ExtractedElement) {
        self.moved_images.push(element);
    }

    pub fn moved_images(&self) -> &[ExtractedElement] {
        &self.moved_images
    }

    pub fn clear_annotations(&mut self) {
        self.annotations.clear();
    }

    pub fn clear_redactions(&mut self) {
        self.redactions.clear();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
            && !self.has_structural_edits()
            && self.annotations.is_empty()
            && self.redactions.is_empty()
            && self.moved_texts.is_empty()
            && self.moved_images.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationEdit {
    pub page: usize,
    pub degrees: i32,
}

/// A batch of edits in JSON form, replayed in field order onto a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditScript {
    pub delete_pages: Vec<usize>,
    pub duplicate_pages: Vec<usize>,
    pub rotations: Vec<RotationEdit>,
    pub page_order: Option<Vec<usize>>,
    pub annotations: Vec<Annotation>,
    pub redactions: Vec<Redaction>,
    pub moved_texts: Vec<ExtractedElement>,
    pub moved_images: Vec<ExtractedElement>,
}

impl EditScript {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn apply_to(self, edits: &mut PendingEdits) {
        for page in self.delete_pages {
            edits.delete_page(page);
        }
        for page in self.duplicate_pages {
            edits.duplicate_page(page);
        }
        for rotation in self.rotations {
            edits.rotate_page(rotation.page, rotation.degrees);
        }
        if self.page_order.is_some() {
            edits.set_page_order(self.page_order);
        }
        for annotation in self.annotations {
            edits.add_annotation(annotation);
        }
        for redaction in self.redactions {
            edits.add_redaction(redaction);
        }
        for element in self.moved_texts {
            edits.add_moved_text(element);
        }
        for element in self.moved_images {
            edits.add_moved_image(element);
        }
    }
}
