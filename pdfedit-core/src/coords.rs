//! Conversions between screen pixels (96 per inch, Y down) and PDF points
//! (72 per inch, Y up, anchored to a page's media box).

use serde::{Deserialize, Serialize};

pub const SCREEN_DPI: f32 = 96.0;
pub const PDF_DPI: f32 = 72.0;

const SCREEN_TO_PDF: f32 = PDF_DPI / SCREEN_DPI;

/// Ascent approximation used to place a baseline inside a box. Tuned by eye,
/// it is not derived from font metrics.
pub const BASELINE_ASCENT_FACTOR: f32 = 0.25;

pub fn screen_to_pdf(value: f32) -> f32 {
    value * SCREEN_TO_PDF
}

pub fn pdf_to_screen(value: f32) -> f32 {
    value / SCREEN_TO_PDF
}

/// A page's coordinate space in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaBox {
    pub left: f32,
    pub bottom: f32,
    pub width: f32,
    pub height: f32,
}

impl MediaBox {
    pub fn new(left: f32, bottom: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            bottom,
            width,
            height,
        }
    }

    pub fn top(&self) -> f32 {
        self.bottom + self.height
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }
}

impl Default for MediaBox {
    fn default() -> Self {
        // US Letter
        Self::new(0.0, 0.0, 612.0, 792.0)
    }
}

/// Top-left anchored rectangle in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Bottom-left anchored rectangle in absolute PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PdfRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PdfRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// Bottom edge in points of a box whose top-left corner sits `y` screen pixels
/// below the top of the page and which is `height` screen pixels tall.
pub fn flip_y(media: &MediaBox, y: f32, height: f32) -> f32 {
    media.top() - screen_to_pdf(y) - screen_to_pdf(height)
}

/// Inverse of [`flip_y`]: screen-space top of a box given its PDF bottom edge.
pub fn unflip_y(media: &MediaBox, pdf_bottom: f32, height: f32) -> f32 {
    pdf_to_screen(media.top() - pdf_bottom - screen_to_pdf(height))
}

pub fn screen_x_to_pdf(media: &MediaBox, x: f32) -> f32 {
    media.left + screen_to_pdf(x)
}

pub fn screen_point_to_pdf(media: &MediaBox, point: ScreenPoint) -> (f32, f32) {
    (screen_x_to_pdf(media, point.x), flip_y(media, point.y, 0.0))
}

pub fn screen_rect_to_pdf(media: &MediaBox, rect: &ScreenRect) -> PdfRect {
    PdfRect {
        x: screen_x_to_pdf(media, rect.x),
        y: flip_y(media, rect.y, rect.height),
        width: screen_to_pdf(rect.width),
        height: screen_to_pdf(rect.height),
    }
}

/// Baseline of a single text line resting at the bottom of a box. Font size is
/// already in points and is not rescaled.
pub fn baseline_y(box_bottom: f32, padding: f32, font_size: f32) -> f32 {
    box_bottom + padding + font_size * BASELINE_ASCENT_FACTOR
}

/// Reduce any angle to the `[0, 360)` range.
pub fn normalize_rotation(degrees: i32) -> u16 {
    degrees.rem_euclid(360) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_pdf_round_trip() {
        for v in [0.0_f32, 1.0, 13.5, 96.0, 333.3, 1024.0, 4999.9, 5000.0] {
            let back = pdf_to_screen(screen_to_pdf(v));
            assert!((back - v).abs() < 1e-3, "{v} -> {back}");
        }
        assert_eq!(screen_to_pdf(96.0), 72.0);
    }

    #[test]
    fn y_flip_is_reversible() {
        let media = MediaBox::new(10.0, 20.0, 595.0, 842.0);
        for (y, h) in [(0.0, 0.0), (100.0, 40.0), (900.0, 120.5)] {
            let bottom = flip_y(&media, y, h);
            let y_back = unflip_y(&media, bottom, h);
            assert!((y_back - y).abs() < 1e-3);
        }
    }

    #[test]
    fn box_bottom_uses_media_top() {
        let media = MediaBox::new(0.0, 0.0, 612.0, 792.0);
        // 96px down, 96px tall -> 72pt + 72pt below the top edge
        assert_eq!(flip_y(&media, 96.0, 96.0), 792.0 - 144.0);

        let offset = MediaBox::new(0.0, 100.0, 612.0, 792.0);
        assert_eq!(flip_y(&offset, 96.0, 96.0), 892.0 - 144.0);
    }

    #[test]
    fn screen_rect_converts_every_dimension() {
        let media = MediaBox::new(5.0, 0.0, 600.0, 800.0);
        let rect = screen_rect_to_pdf(&media, &ScreenRect::new(40.0, 80.0, 200.0, 100.0));
        assert_eq!(rect.x, 35.0);
        assert_eq!(rect.width, 150.0);
        assert_eq!(rect.height, 75.0);
        assert_eq!(rect.y, 800.0 - 60.0 - 75.0);
    }

    #[test]
    fn baseline_does_not_scale_font_size() {
        assert_eq!(baseline_y(100.0, 2.0, 12.0), 105.0);
    }

    #[test]
    fn rotation_normalizes_negative_angles() {
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(360), 0);
        assert_eq!(normalize_rotation(450), 90);
    }
}
