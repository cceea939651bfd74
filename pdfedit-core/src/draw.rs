use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::coords::{baseline_y, PdfRect};
use crate::PageDocument;

/// Inner padding between a text box edge and its glyphs, in points.
pub const TEXT_PADDING: f32 = 2.0;
/// Distance between stacked baselines as a multiple of the font size.
pub const LINE_SPACING: f32 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default = "opaque")]
    pub a: u8,
}

fn opaque() -> u8 {
    255
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::BLACK
    }
}

impl FromStr for Rgba {
    type Err = anyhow::Error;

    /// Parses `#rrggbb` or `#rrggbbaa`.
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 && hex.len() != 8 {
            return Err(anyhow!("expected #rrggbb or #rrggbbaa, got {s:?}"));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| anyhow!("invalid colour {s:?}"))
        };
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: if hex.len() == 8 { channel(6)? } else { 255 },
        })
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub color: Rgba,
    pub width: f32,
}

/// A font embedded (or referenced) in one open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontHandle(pub usize);

/// Non-embedded base-14 faces used when nothing else can be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardFont {
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
}

impl StandardFont {
    pub fn for_style(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (false, false) => StandardFont::Helvetica,
            (true, false) => StandardFont::HelveticaBold,
            (false, true) => StandardFont::HelveticaOblique,
            (true, true) => StandardFont::HelveticaBoldOblique,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StandardFont::Helvetica => "Helvetica",
            StandardFont::HelveticaBold => "Helvetica-Bold",
            StandardFont::HelveticaOblique => "Helvetica-Oblique",
            StandardFont::HelveticaBoldOblique => "Helvetica-BoldOblique",
        }
    }
}

/// Drawing primitives in absolute page points (origin bottom-left).
#[derive(Debug, Clone)]
pub enum DrawOp {
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
        font: FontHandle,
        size: f32,
        color: Rgba,
    },
    Image {
        rect: PdfRect,
        image: Arc<DynamicImage>,
    },
}

impl DrawOp {
    pub fn cover(rect: PdfRect) -> Self {
        DrawOp::Rect {
            rect,
            fill: Some(Rgba::WHITE),
            stroke: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlignment {
    #[default]
    Left,
    Center,
    Right,
}

/// Everything needed to paint a fixed-size text box.
pub struct TextBox<'a> {
    pub rect: PdfRect,
    pub text: &'a str,
    pub font: FontHandle,
    pub size: f32,
    pub color: Rgba,
    pub background: Option<Rgba>,
    pub border: Option<Stroke>,
    pub underline: bool,
    pub alignment: TextAlignment,
    pub padding: f32,
}

/// Lays out a text box as background, border, one run per line and optional
/// underlines. Lines stack upward from the bottom baseline.
pub fn text_box_ops<D: PageDocument>(document: &D, text_box: &TextBox<'_>) -> Vec<DrawOp> {
    let mut ops = Vec::new();
    let rect = text_box.rect;

    if text_box.background.is_some() || text_box.border.is_some() {
        ops.push(DrawOp::Rect {
            rect,
            fill: text_box.background,
            stroke: text_box.border,
        });
    }

    let lines: Vec<&str> = text_box.text.lines().collect();
    let bottom = baseline_y(rect.y, text_box.padding, text_box.size);
    let line_height = text_box.size * LINE_SPACING;
    let inner_width = (rect.width - 2.0 * text_box.padding).max(0.0);

    for (row, line) in lines.iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        let from_bottom = (lines.len() - 1 - row) as f32;
        let baseline = bottom + from_bottom * line_height;
        let width = measure(document, text_box.font, text_box.size, line);
        let x = rect.x + text_box.padding + align_offset(text_box.alignment, inner_width, width);

        ops.push(DrawOp::Text {
            x,
            baseline,
            text: (*line).to_owned(),
            font: text_box.font,
            size: text_box.size,
            color: text_box.color,
        });

        if text_box.underline {
            let y = baseline - text_box.size * 0.1;
            ops.push(DrawOp::Line {
                from: (x, y),
                to: (x + width, y),
                stroke: Stroke {
                    color: text_box.color,
                    width: (text_box.size / 15.0).max(0.5),
                },
            });
        }
    }

    ops
}

pub fn align_offset(alignment: TextAlignment, available: f32, width: f32) -> f32 {
    match alignment {
        TextAlignment::Left => 0.0,
        TextAlignment::Center => ((available - width) / 2.0).max(0.0),
        TextAlignment::Right => (available - width).max(0.0),
    }
}

/// Text width from the backend, or a half-em-per-glyph estimate if it cannot
/// measure.
pub fn measure<D: PageDocument>(document: &D, font: FontHandle, size: f32, text: &str) -> f32 {
    match document.measure_text(font, size, text) {
        Ok(width) if width > 0.0 => width,
        _ => text.chars().count() as f32 * size * 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::MemoryBackend;
    use crate::PdfBackend;

    #[test]
    fn colour_parses_and_formats_hex() {
        let c: Rgba = "#ff8000".parse().unwrap();
        assert_eq!(c, Rgba::rgb(255, 128, 0));
        assert_eq!(c.to_string(), "#ff8000");

        let translucent: Rgba = "00000080".parse().unwrap();
        assert_eq!(translucent.a, 0x80);
        assert!("#fff".parse::<Rgba>().is_err());
    }

    #[test]
    fn alignment_offsets_stay_inside_box() {
        assert_eq!(align_offset(TextAlignment::Left, 100.0, 40.0), 0.0);
        assert_eq!(align_offset(TextAlignment::Center, 100.0, 40.0), 30.0);
        assert_eq!(align_offset(TextAlignment::Right, 100.0, 40.0), 60.0);
        assert_eq!(align_offset(TextAlignment::Right, 10.0, 40.0), 0.0);
    }

    #[test]
    fn text_box_stacks_lines_upward() {
        let backend = MemoryBackend::new();
        let mut document = backend.create().unwrap();
        let font = document.standard_font(StandardFont::Helvetica);

        let ops = text_box_ops(
            &document,
            &TextBox {
                rect: PdfRect::new(10.0, 100.0, 200.0, 50.0),
                text: "first\nsecond",
                font,
                size: 10.0,
                color: Rgba::BLACK,
                background: Some(Rgba::WHITE),
                border: None,
                underline: true,
                alignment: TextAlignment::Left,
                padding: TEXT_PADDING,
            },
        );

        assert!(matches!(ops[0], DrawOp::Rect { fill: Some(_), .. }));
        let baselines: Vec<(String, f32)> = ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, baseline, .. } => Some((text.clone(), *baseline)),
                _ => None,
            })
            .collect();
        assert_eq!(baselines.len(), 2);
        assert_eq!(baselines[1], ("second".to_string(), 104.5));
        assert!((baselines[0].1 - 116.5).abs() < 1e-3);
        assert_eq!(
            ops.iter()
                .filter(|op| matches!(op, DrawOp::Line { .. }))
                .count(),
            2
        );
    }
}
