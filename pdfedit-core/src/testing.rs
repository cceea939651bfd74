//! A backend that keeps documents as a JSON page model, for exercising the
//! pipeline and session without a native PDF library.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{anyhow, bail, Context, Result};
use image::{Rgba as Pixel, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::coords::{MediaBox, PdfRect};
use crate::draw::{DrawOp, FontHandle, Rgba, StandardFont, Stroke};
use crate::{DocumentSource, PageDocument, PdfBackend, RenderOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RecordedOp {
    Rect {
        rect: PdfRect,
        fill: Option<Rgba>,
        stroke: Option<Stroke>,
    },
    Ellipse {
        rect: PdfRect,
        fill: Option<Rgba>,
        stroke: Option<Stroke>,
    },
    Line {
        from: (f32, f32),
        to: (f32, f32),
        stroke: Stroke,
    },
    Text {
        x: f32,
        baseline: f32,
        text: String,
        font: String,
        size: f32,
        color: Rgba,
    },
    Image {
        rect: PdfRect,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPage {
    pub id: String,
    #[serde(default)]
    pub rotation: u16,
    #[serde(default)]
    pub media: MediaBox,
    #[serde(default)]
    pub ops: Vec<RecordedOp>,
}

impl MemoryPage {
    pub fn texts(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFile {
    pub pages: Vec<MemoryPage>,
    #[serde(default)]
    pub fonts: Vec<String>,
}

impl MemoryFile {
    /// Letter-sized pages with ids `p0`, `p1`, ...
    pub fn with_pages(count: usize) -> Self {
        Self {
            pages: (0..count)
                .map(|i| MemoryPage {
                    id: format!("p{i}"),
                    rotation: 0,
                    media: MediaBox::default(),
                    ops: Vec::new(),
                })
                .collect(),
            fonts: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("not a memory document")
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed to read {:?}", path))?;
        Self::from_bytes(&bytes)
    }

    pub fn page_ids(&self) -> Vec<&str> {
        self.pages.iter().map(|p| p.id.as_str()).collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    renders: AtomicUsize,
    fail_custom_renders: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails any render that asks for a specific DPI or rotation, so only the
    /// default-options retry succeeds.
    pub fn failing_custom_renders() -> Self {
        let backend = Self::default();
        backend.fail_custom_renders.store(true, Ordering::SeqCst);
        backend
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

pub struct MemoryDocument {
    file: MemoryFile,
}

impl MemoryDocument {
    pub fn file(&self) -> &MemoryFile {
        &self.file
    }

    pub fn font_names(&self) -> &[String] {
        &self.file.fonts
    }

    fn page(&self, index: usize) -> Result<&MemoryPage> {
        self.file
            .pages
            .get(index)
            .ok_or_else(|| anyhow!("page {index} out of range"))
    }

    fn font_name(&self, font: FontHandle) -> Result<&str> {
        self.file
            .fonts
            .get(font.0)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("unknown font handle {}", font.0))
    }
}

impl PdfBackend for MemoryBackend {
    type Document<'a> = MemoryDocument where Self: 'a;

    fn open(&self, source: &DocumentSource) -> Result<MemoryDocument> {
        let file = match source {
            DocumentSource::Bytes(bytes) => MemoryFile::from_bytes(bytes)?,
            DocumentSource::File(path) => MemoryFile::read(path)?,
        };
        Ok(MemoryDocument { file })
    }

    fn create(&self) -> Result<MemoryDocument> {
        Ok(MemoryDocument {
            file: MemoryFile::default(),
        })
    }

    fn page_count(&self, bytes: &[u8]) -> Result<usize> {
        Ok(MemoryFile::from_bytes(bytes)?.pages.len())
    }

    fn render_page(
        &self,
        bytes: &[u8],
        page_index: usize,
        options: RenderOptions,
    ) -> Result<RgbaImage> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.fail_custom_renders.load(Ordering::SeqCst) && options != RenderOptions::default()
        {
            bail!("custom render options are not supported");
        }
        let file = MemoryFile::from_bytes(bytes)?;
        let page = file
            .pages
            .get(page_index)
            .ok_or_else(|| anyhow!("page {page_index} out of range"))?;

        let factor = options.dpi.map(|dpi| dpi / 72.0).unwrap_or(1.0);
        let mut width = (page.media.width * factor).round().max(1.0) as u32;
        let mut height = (page.media.height * factor).round().max(1.0) as u32;
        if (page.rotation + options.rotation) % 180 == 90 {
            std::mem::swap(&mut width, &mut height);
        }
        Ok(RgbaImage::from_pixel(width, height, Pixel([255, 255, 255, 255])))
    }
}

impl PageDocument for MemoryDocument {
    fn page_count(&self) -> usize {
        self.file.pages.len()
    }

    fn copy_page_from(&mut self, source: &Self, source_index: usize) -> Result<()> {
        let page = source.page(source_index)?.clone();
        self.file.pages.push(page);
        Ok(())
    }

    fn add_blank_page(&mut self, width: f32, height: f32) -> Result<usize> {
        let index = self.file.pages.len();
        self.file.pages.push(MemoryPage {
            id: format!("blank{index}"),
            rotation: 0,
            media: MediaBox::new(0.0, 0.0, width, height),
            ops: Vec::new(),
        });
        Ok(index)
    }

    fn delete_page(&mut self, index: usize) -> Result<()> {
        self.page(index)?;
        self.file.pages.remove(index);
        Ok(())
    }

    fn page_rotation(&self, index: usize) -> Result<u16> {
        Ok(self.page(index)?.rotation)
    }

    fn set_page_rotation(&mut self, index: usize, degrees: u16) -> Result<()> {
        if degrees % 90 != 0 || degrees >= 360 {
            bail!("unsupported rotation {degrees}");
        }
        self.page(index)?;
        self.file.pages[index].rotation = degrees;
        Ok(())
    }

    fn media_box(&self, index: usize) -> Result<MediaBox> {
        Ok(self.page(index)?.media)
    }

    fn load_font(&mut self, data: &[u8]) -> Result<FontHandle> {
        if data.is_empty() {
            bail!("empty font program");
        }
        self.file
            .fonts
            .push(format!("embedded:{}", String::from_utf8_lossy(data)));
        Ok(FontHandle(self.file.fonts.len() - 1))
    }

    fn standard_font(&mut self, font: StandardFont) -> FontHandle {
        let name = format!("standard:{}", font.name());
        if let Some(index) = self.file.fonts.iter().position(|f| *f == name) {
            return FontHandle(index);
        }
        self.file.fonts.push(name);
        FontHandle(self.file.fonts.len() - 1)
    }

    fn measure_text(&self, font: FontHandle, size: f32, text: &str) -> Result<f32> {
        self.font_name(font)?;
        Ok(text.chars().count() as f32 * size * 0.5)
    }

    fn draw(&mut self, page_index: usize, op: &DrawOp) -> Result<()> {
        self.page(page_index)?;
        let recorded = match op {
            DrawOp::Rect { rect, fill, stroke } => RecordedOp::Rect {
                rect: *rect,
                fill: *fill,
                stroke: *stroke,
            },
            DrawOp::Ellipse { rect, fill, stroke } => RecordedOp::Ellipse {
                rect: *rect,
                fill: *fill,
                stroke: *stroke,
            },
            DrawOp::Line { from, to, stroke } => RecordedOp::Line {
                from: *from,
                to: *to,
                stroke: *stroke,
            },
            DrawOp::Text {
                x,
                baseline,
                text,
                font,
                size,
                color,
            } => RecordedOp::Text {
                x: *x,
                baseline: *baseline,
                text: text.clone(),
                font: self.font_name(*font)?.to_string(),
                size: *size,
                color: *color,
            },
            DrawOp::Image { rect, image } => RecordedOp::Image {
                rect: *rect,
                width: image.width(),
                height: image.height(),
            },
        };
        self.file.pages[page_index].ops.push(recorded);
        Ok(())
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.file)?;
        fs::write(path, bytes).with_context(|| format!("failed to write {:?}", path))
    }
}

/// Writes a small PNG and returns its path.
pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> Result<std::path::PathBuf> {
    let path = dir.join(name);
    RgbaImage::from_pixel(width, height, Pixel([200, 10, 10, 255]))
        .save(&path)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(path)
}
