use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use image::RgbaImage;
use pdfedit_core::{
    DocumentSource, DrawOp, FontHandle, MediaBox, PageDocument, PdfBackend, RenderOptions, Rgba,
    StandardFont, Stroke,
};
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

/// PDFium behind the editor's backend seam. Cheap to share; every document
/// borrows the same bindings.
pub struct PdfiumBackend {
    pdfium: Arc<Pdfium>,
}

impl PdfiumBackend {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_build_hint() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

impl PdfBackend for PdfiumBackend {
    type Document<'a> = PdfiumDocument<'a> where Self: 'a;

    #[instrument(skip(self, source))]
    fn open(&self, source: &DocumentSource) -> Result<PdfiumDocument<'_>> {
        let document = match source {
            DocumentSource::Bytes(bytes) => self
                .pdfium
                .load_pdf_from_byte_vec(bytes.to_vec(), None)
                .context("failed to parse document bytes")?,
            DocumentSource::File(path) => self
                .pdfium
                .load_pdf_from_file(path, None)
                .with_context(|| format!("failed to open {:?}", path))?,
        };
        Ok(PdfiumDocument::new(document))
    }

    fn create(&self) -> Result<PdfiumDocument<'_>> {
        let document = self
            .pdfium
            .create_new_pdf()
            .context("failed to create an empty document")?;
        Ok(PdfiumDocument::new(document))
    }

    fn page_count(&self, bytes: &[u8]) -> Result<usize> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .context("failed to parse document bytes")?;
        Ok(usize::try_from(document.pages().len()).unwrap_or_default())
    }

    #[instrument(skip(self, bytes))]
    fn render_page(
        &self,
        bytes: &[u8],
        page_index: usize,
        options: RenderOptions,
    ) -> Result<RgbaImage> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .context("failed to parse document bytes")?;
        let page = document
            .pages()
            .get(pdfium_index(page_index)?)
            .with_context(|| format!("page {} out of range", page_index))?;

        let scale = options.dpi.map(|dpi| dpi / 72.0).unwrap_or(1.0).max(0.1);
        let mut config = PdfRenderConfig::new().scale_page_by_factor(scale);
        if options.rotation != 0 {
            config = config.rotate(to_pdfium_rotation(options.rotation)?, true);
        }

        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", page_index))?;
        let image = rgba_from_raw(bitmap.width(), bitmap.height(), bitmap.as_rgba_bytes())
            .unwrap_or_else(|| {
                debug!(page_index, "bitmap size mismatch, converting through DynamicImage");
                bitmap.as_image().to_rgba8()
            });
        Ok(image)
    }
}

/// Wraps tightly packed RGBA bytes without re-encoding. `None` when the
/// buffer does not match the reported size.
fn rgba_from_raw(width: i32, height: i32, bytes: Vec<u8>) -> Option<RgbaImage> {
    let width = u32::try_from(width).ok()?;
    let height = u32::try_from(height).ok()?;
    RgbaImage::from_raw(width, height, bytes)
}

pub struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
    fonts: Vec<PdfFontToken>,
}

impl<'a> PdfiumDocument<'a> {
    fn new(document: PdfDocument<'a>) -> Self {
        Self {
            document,
            fonts: Vec::new(),
        }
    }

    fn page(&self, index: usize) -> Result<PdfPage<'a>> {
        self.document
            .pages()
            .get(pdfium_index(index)?)
            .with_context(|| format!("page {} out of range", index))
    }

    fn font(&self, handle: FontHandle) -> Result<PdfFontToken> {
        self.fonts
            .get(handle.0)
            .copied()
            .ok_or_else(|| anyhow!("unknown font handle {}", handle.0))
    }

    fn push_font(&mut self, token: PdfFontToken) -> FontHandle {
        self.fonts.push(token);
        FontHandle(self.fonts.len() - 1)
    }
}

impl<'a> PageDocument for PdfiumDocument<'a> {
    fn page_count(&self) -> usize {
        usize::try_from(self.document.pages().len()).unwrap_or_default()
    }

    fn copy_page_from(&mut self, source: &Self, source_index: usize) -> Result<()> {
        let destination = self.document.pages().len();
        self.document
            .pages_mut()
            .copy_page_from_document(&source.document, pdfium_index(source_index)?, destination)
            .with_context(|| format!("failed to copy page {}", source_index))
    }

    fn add_blank_page(&mut self, width: f32, height: f32) -> Result<usize> {
        self.document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(
                PdfPoints::new(width),
                PdfPoints::new(height),
            ))
            .with_context(|| format!("failed to add a {width}x{height} page"))?;
        Ok(self.page_count() - 1)
    }

    fn delete_page(&mut self, index: usize) -> Result<()> {
        self.page(index)?
            .delete()
            .with_context(|| format!("failed to delete page {}", index))
    }

    fn page_rotation(&self, index: usize) -> Result<u16> {
        let rotation = self
            .page(index)?
            .rotation()
            .with_context(|| format!("failed to read rotation of page {}", index))?;
        Ok(from_pdfium_rotation(rotation))
    }

    fn set_page_rotation(&mut self, index: usize, degrees: u16) -> Result<()> {
        let rotation = to_pdfium_rotation(degrees)?;
        self.page(index)?.set_rotation(rotation);
        Ok(())
    }

    fn media_box(&self, index: usize) -> Result<MediaBox> {
        let page = self.page(index)?;
        match page.boundaries().media() {
            Ok(boundary) => {
                let bounds = boundary.bounds;
                Ok(MediaBox::new(
                    bounds.left().value,
                    bounds.bottom().value,
                    bounds.width().value,
                    bounds.height().value,
                ))
            }
            Err(err) => {
                debug!(index, "no explicit media box ({err}); using page size");
                Ok(MediaBox::new(0.0, 0.0, page.width().value, page.height().value))
            }
        }
    }

    fn load_font(&mut self, data: &[u8]) -> Result<FontHandle> {
        if data.is_empty() {
            bail!("font program is empty");
        }
        let token = self
            .document
            .fonts_mut()
            .load_true_type_from_bytes(data, true)
            .context("failed to embed font program")?;
        Ok(self.push_font(token))
    }

    fn standard_font(&mut self, font: StandardFont) -> FontHandle {
        let fonts = self.document.fonts_mut();
        let token = match font {
            StandardFont::Helvetica => fonts.helvetica(),
            StandardFont::HelveticaBold => fonts.helvetica_bold(),
            StandardFont::HelveticaOblique => fonts.helvetica_oblique(),
            StandardFont::HelveticaBoldOblique => fonts.helvetica_bold_oblique(),
        };
        self.push_font(token)
    }

    fn measure_text(&self, font: FontHandle, size: f32, text: &str) -> Result<f32> {
        if text.is_empty() {
            return Ok(0.0);
        }
        let object =
            PdfPageTextObject::new(&self.document, text, self.font(font)?, PdfPoints::new(size))
                .context("failed to lay out text")?;
        Ok(object.width().context("failed to measure text")?.value)
    }

    fn draw(&mut self, page_index: usize, op: &DrawOp) -> Result<()> {
        let mut page = self.page(page_index)?;
        match op {
            DrawOp::Rect { rect, fill, stroke } => {
                let (stroke_color, stroke_width) = split_stroke(stroke);
                page.objects_mut()
                    .create_path_object_rect(
                        to_pdfium_rect(rect),
                        stroke_color,
                        stroke_width,
                        fill.map(to_pdfium_color),
                    )
                    .context("failed to draw rectangle")?;
            }
            DrawOp::Ellipse { rect, fill, stroke } => {
                let (stroke_color, stroke_width) = split_stroke(stroke);
                page.objects_mut()
                    .create_path_object_ellipse(
                        to_pdfium_rect(rect),
                        stroke_color,
                        stroke_width,
                        fill.map(to_pdfium_color),
                    )
                    .context("failed to draw ellipse")?;
            }
            DrawOp::Line { from, to, stroke } => {
                page.objects_mut()
                    .create_path_object_line(
                        PdfPoints::new(from.0),
                        PdfPoints::new(from.1),
                        PdfPoints::new(to.0),
                        PdfPoints::new(to.1),
                        to_pdfium_color(stroke.color),
                        PdfPoints::new(stroke.width),
                    )
                    .context("failed to draw line")?;
            }
            DrawOp::Text {
                x,
                baseline,
                text,
                font,
                size,
                color,
            } => {
                if text.is_empty() {
                    return Ok(());
                }
                let mut object = PdfPageTextObject::new(
                    &self.document,
                    text,
                    self.font(*font)?,
                    PdfPoints::new(*size),
                )
                .context("failed to lay out text")?;
                object.set_fill_color(to_pdfium_color(*color))?;
                object.translate(PdfPoints::new(*x), PdfPoints::new(*baseline))?;
                page.objects_mut()
                    .add_text_object(object)
                    .context("failed to place text")?;
            }
            DrawOp::Image { rect, image } => {
                page.objects_mut()
                    .create_image_object(
                        PdfPoints::new(rect.x),
                        PdfPoints::new(rect.y),
                        image,
                        Some(PdfPoints::new(rect.width)),
                        Some(PdfPoints::new(rect.height)),
                    )
                    .context("failed to place image")?;
            }
        }
        Ok(())
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        self.document
            .save_to_file(path)
            .with_context(|| format!("failed to write {:?}", path))
    }
}

fn pdfium_index(index: usize) -> Result<PdfPageIndex> {
    index
        .try_into()
        .map_err(|_| anyhow!("page {} is out of supported range", index))
}

fn to_pdfium_rotation(degrees: u16) -> Result<PdfPageRenderRotation> {
    Ok(match degrees % 360 {
        0 => PdfPageRenderRotation::None,
        90 => PdfPageRenderRotation::Degrees90,
        180 => PdfPageRenderRotation::Degrees180,
        270 => PdfPageRenderRotation::Degrees270,
        other => bail!("rotation {other} is not a multiple of 90"),
    })
}

fn from_pdfium_rotation(rotation: PdfPageRenderRotation) -> u16 {
    match rotation {
        PdfPageRenderRotation::None => 0,
        PdfPageRenderRotation::Degrees90 => 90,
        PdfPageRenderRotation::Degrees180 => 180,
        PdfPageRenderRotation::Degrees270 => 270,
    }
}

fn to_pdfium_rect(rect: &pdfedit_core::PdfRect) -> PdfRect {
    PdfRect::new_from_values(rect.y, rect.x, rect.top(), rect.right())
}

fn to_pdfium_color(color: Rgba) -> PdfColor {
    PdfColor::new(color.r, color.g, color.b, color.a)
}

fn split_stroke(stroke: &Option<Stroke>) -> (Option<PdfColor>, Option<PdfPoints>) {
    match stroke {
        Some(stroke) => (
            Some(to_pdfium_color(stroke.color)),
            Some(PdfPoints::new(stroke.width)),
        ),
        None => (None, None),
    }
}

fn bind_pdfium_from_build_hint() -> Option<Pdfium> {
    match option_env!("PDFEDIT_PDFIUM_LIBRARY_PATH") {
        Some(path) if !path.is_empty() => match Pdfium::bind_to_library(path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load PDFium staged at build time from {}: {}", path, err);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let local = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&local) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", local.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "no usable PDFium library found; install one or set PDFIUM_DYNAMIC_LIB_PATH ({})",
                errors.join(", ")
            ))
        }
    }
}
