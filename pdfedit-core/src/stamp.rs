//! Header and footer stamping over an already saved document.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::coords::{screen_rect_to_pdf, screen_to_pdf, MediaBox, PdfRect, ScreenRect};
use crate::draw::{
    text_box_ops, DrawOp, Rgba, Stroke, TextAlignment, TextBox, LINE_SPACING, TEXT_PADDING,
};
use crate::edits::TextStyle;
use crate::fonts::{DocumentFonts, FontResolver};
use crate::pipeline::write_atomically;
use crate::{DocumentSource, PageDocument, PdfBackend};

pub const DEFAULT_MARGIN: f32 = 36.0;

/// Which 1-based page numbers get stamped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageRange {
    #[default]
    All,
    Odd,
    Even,
    Span {
        first: usize,
        last: usize,
    },
    List {
        pages: Vec<usize>,
    },
}

impl PageRange {
    pub fn contains(&self, page_number: usize) -> bool {
        match self {
            PageRange::All => true,
            PageRange::Odd => page_number % 2 == 1,
            PageRange::Even => page_number % 2 == 0,
            PageRange::Span { first, last } => (*first..=*last).contains(&page_number),
            PageRange::List { pages } => pages.contains(&page_number),
        }
    }
}

impl FromStr for PageRange {
    type Err = anyhow::Error;

    /// `all`, `odd`, `even`, `3-7` or `1,4,9`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "all" => return Ok(PageRange::All),
            "odd" => return Ok(PageRange::Odd),
            "even" => return Ok(PageRange::Even),
            _ => {}
        }
        let number = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid page number {part:?} in range {s:?}"))
        };
        if let Some((first, last)) = s.split_once('-') {
            let (first, last) = (number(first)?, number(last)?);
            if first == 0 || last < first {
                bail!("invalid page span {s:?}");
            }
            return Ok(PageRange::Span { first, last });
        }
        let pages = s.split(',').map(number).collect::<Result<Vec<_>>>()?;
        Ok(PageRange::List { pages })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampLine {
    pub left: Option<String>,
    pub center: Option<String>,
    pub right: Option<String>,
}

impl StampLine {
    fn slots(&self) -> [(Option<&str>, TextAlignment); 3] {
        [
            (self.left.as_deref(), TextAlignment::Left),
            (self.center.as_deref(), TextAlignment::Center),
            (self.right.as_deref(), TextAlignment::Right),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampText {
    pub bounds: ScreenRect,
    pub text: String,
    #[serde(default)]
    pub style: TextStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampImage {
    pub bounds: ScreenRect,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderFooter {
    pub header: StampLine,
    pub footer: StampLine,
    pub font_family: String,
    pub font_size: f32,
    pub color: Rgba,
    /// Distance in points from the page edges.
    pub margin: f32,
    pub range: PageRange,
    pub text_boxes: Vec<StampText>,
    pub image_boxes: Vec<StampImage>,
}

impl Default for HeaderFooter {
    fn default() -> Self {
        Self {
            header: StampLine::default(),
            footer: StampLine::default(),
            font_family: "Arial".to_string(),
            font_size: 10.0,
            color: Rgba::BLACK,
            margin: DEFAULT_MARGIN,
            range: PageRange::All,
            text_boxes: Vec::new(),
            image_boxes: Vec::new(),
        }
    }
}

/// Values substituted into `{page}`, `{total}`, `{date}` and `{filename}`.
pub struct TemplateContext<'a> {
    pub page: usize,
    pub total: usize,
    pub date: &'a str,
    pub filename: &'a str,
}

pub fn expand_template(template: &str, context: &TemplateContext<'_>) -> String {
    template
        .replace("{page}", &context.page.to_string())
        .replace("{total}", &context.total.to_string())
        .replace("{date}", context.date)
        .replace("{filename}", context.filename)
}

/// Stamps `input` into `output`, which may be the same path. Returns the
/// number of pages stamped.
#[instrument(skip(backend, fonts, stamp), fields(input = %input.display()))]
pub fn apply_header_footer<B: PdfBackend>(
    backend: &B,
    fonts: &FontResolver,
    input: &Path,
    output: &Path,
    stamp: &HeaderFooter,
) -> Result<usize> {
    let bytes = fs::read(input).with_context(|| format!("failed to read {:?}", input))?;
    let mut document = backend
        .open(&DocumentSource::Bytes(bytes.into()))
        .with_context(|| format!("failed to open {:?}", input))?;

    let images: Vec<Option<Arc<DynamicImage>>> = stamp
        .image_boxes
        .iter()
        .map(|b| match image::open(&b.path) {
            Ok(image) => Some(Arc::new(image)),
            Err(err) => {
                warn!(path = %b.path.display(), "stamp image skipped: {err}");
                None
            }
        })
        .collect();

    let total = document.page_count();
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    let filename = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut fonts = DocumentFonts::new(fonts);
    let mut stamped = 0;

    for index in 0..total {
        let page = index + 1;
        if !stamp.range.contains(page) {
            continue;
        }
        let context = TemplateContext {
            page,
            total,
            date: &date,
            filename: &filename,
        };
        let media = document.media_box(index)?;
        let mut ops = Vec::new();

        let line_height = stamp.font_size * LINE_SPACING;
        let band = |y: f32| {
            PdfRect::new(
                media.left + stamp.margin,
                y,
                (media.width - 2.0 * stamp.margin).max(0.0),
                line_height,
            )
        };
        let header_band = band(media.top() - stamp.margin - line_height);
        let footer_band = band(media.bottom + stamp.margin);

        for (line, rect) in [(&stamp.header, header_band), (&stamp.footer, footer_band)] {
            for (template, alignment) in line.slots() {
                let Some(template) = template.filter(|t| !t.is_empty()) else {
                    continue;
                };
                let text = expand_template(template, &context);
                let style = TextStyle {
                    font_family: stamp.font_family.clone(),
                    font_size: stamp.font_size,
                    color: stamp.color,
                    alignment,
                    ..TextStyle::default()
                };
                ops.extend(styled_text(&mut document, &mut fonts, rect, &text, &style, 0.0));
            }
        }

        for text_box in &stamp.text_boxes {
            let text = expand_template(&text_box.text, &context);
            let rect = screen_rect_to_pdf(&media, &text_box.bounds);
            ops.extend(styled_text(
                &mut document,
                &mut fonts,
                rect,
                &text,
                &text_box.style,
                TEXT_PADDING,
            ));
        }

        ops.extend(image_ops(&media, &stamp.image_boxes, &images));

        for op in &ops {
            document.draw(index, op)?;
        }
        stamped += 1;
    }

    write_atomically(&document, output)?;
    info!(stamped, total, "applied header and footer");
    Ok(stamped)
}

fn styled_text<D: PageDocument>(
    document: &mut D,
    fonts: &mut DocumentFonts<'_>,
    rect: PdfRect,
    text: &str,
    style: &TextStyle,
    padding: f32,
) -> Vec<DrawOp> {
    let font = fonts.resolve(
        document,
        &style.font_family,
        style.bold,
        style.italic,
        Some(text),
    );
    text_box_ops(
        &*document,
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
            padding,
        },
    )
}

fn image_ops(
    media: &MediaBox,
    boxes: &[StampImage],
    images: &[Option<Arc<DynamicImage>>],
) -> Vec<DrawOp> {
    boxes
        .iter()
        .zip(images)
        .filter_map(|(b, image)| {
            image.as_ref().map(|image| DrawOp::Image {
                rect: screen_rect_to_pdf(media, &b.bounds),
                image: Arc::clone(image),
            })
        })
        .collect()
}
