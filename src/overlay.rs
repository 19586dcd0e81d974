//! Operator overlay.
//!
//! Rendering is split in two: `plan` turns detections and zones into a list
//! of pixel-space shapes, `render` rasterises that list onto a copy of the
//! frame. Tag outlines carry the detection quad unchanged.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::detect::Detection;
use crate::frame::Frame;
use crate::geometry::Point;
use crate::zones::ZoneSet;

const ZONE_COLOR: Rgb<u8> = Rgb([0, 128, 255]);
const TAG_COLOR: Rgb<u8> = Rgb([0, 220, 0]);
const LABEL_BG: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_FG: Rgb<u8> = Rgb([255, 255, 255]);
const ELLIPSIS: char = '…';
/// Text shown in the banner when nothing was read this cycle.
const EMPTY_BANNER: &str = "-";
/// Advance-width estimate used when no font is available.
const FALLBACK_CHAR_WIDTH: f32 = 0.6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerPosition {
    TopLeft,
    TopRight,
    #[default]
    BottomLeft,
    BottomRight,
}

impl BannerPosition {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "top_left" => Some(Self::TopLeft),
            "top_right" => Some(Self::TopRight),
            "bottom_left" => Some(Self::BottomLeft),
            "bottom_right" => Some(Self::BottomRight),
            _ => None,
        }
    }

    /// Top-left corner of a `w` x `h` box inset by `pad` in an image.
    fn anchor(&self, img_w: u32, img_h: u32, w: u32, h: u32, pad: u32) -> (i32, i32) {
        let (img_w, img_h, w, h, pad) = (img_w as i32, img_h as i32, w as i32, h as i32, pad as i32);
        match self {
            Self::TopLeft => (pad, pad),
            Self::TopRight => (img_w - w - pad, pad),
            Self::BottomLeft => (pad, img_h - h - pad),
            Self::BottomRight => (img_w - w - pad, img_h - h - pad),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OverlaySettings {
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub padding: u32,
    pub max_label_chars: usize,
    pub banner: bool,
    pub banner_position: BannerPosition,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            font_path: Some(PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")),
            font_size: 18.0,
            padding: 4,
            max_label_chars: 32,
            banner: true,
            banner_position: BannerPosition::default(),
        }
    }
}

/// Pixel rectangle already clipped to the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    /// Intersect `(x, y, w, h)` with a `img_w` x `img_h` image.
    pub fn clipped(x: i32, y: i32, w: u32, h: u32, img_w: u32, img_h: u32) -> Option<Self> {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x.saturating_add(w as i32)).min(img_w as i32);
        let y1 = (y.saturating_add(h as i32)).min(img_h as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            w: (x1 - x0) as u32,
            h: (y1 - y0) as u32,
        })
    }

    fn to_rect(self) -> Rect {
        Rect::at(self.x, self.y).of_size(self.w, self.h)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelRole {
    Zone,
    Tag,
    Banner,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    ZoneBox { name: String, rect: PixelRect },
    TagOutline { payload: String, points: [Point; 4] },
    /// Text on a filled background. `text_x`/`text_y` may lie outside `background`
    /// when the label was clipped at the image edge.
    Label {
        role: LabelRole,
        text: String,
        background: PixelRect,
        text_x: i32,
        text_y: i32,
    },
}

pub struct OverlayRenderer {
    settings: OverlaySettings,
    font: Option<FontVec>,
}

impl OverlayRenderer {
    /// Loads the configured font. A missing or unreadable font is reported
    /// once; labels are then drawn as background boxes without text.
    pub fn new(settings: OverlaySettings) -> Self {
        let font = settings.font_path.as_ref().and_then(|path| {
            match std::fs::read(path)
                .map_err(anyhow::Error::from)
                .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(anyhow::Error::from))
            {
                Ok(font) => Some(font),
                Err(err) => {
                    log::warn!(
                        "overlay font {} unavailable, labels drawn without text: {}",
                        path.display(),
                        err
                    );
                    None
                }
            }
        });
        Self { settings, font }
    }

    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Shapes in draw order: zones, then tags, then the status banner.
    pub fn plan(&self, dims: (u32, u32), detections: &[Detection], zones: &ZoneSet) -> Vec<Shape> {
        let (img_w, img_h) = dims;
        let pad = self.settings.padding;
        let mut shapes = Vec::new();

        for zone in zones.iter() {
            let x = zone.x1.floor() as i32;
            let y = zone.y1.floor() as i32;
            let w = (zone.x2 - zone.x1).ceil().max(1.0) as u32;
            let h = (zone.y2 - zone.y1).ceil().max(1.0) as u32;
            let Some(rect) = PixelRect::clipped(x, y, w, h, img_w, img_h) else {
                continue;
            };
            shapes.push(Shape::ZoneBox {
                name: zone.name.clone(),
                rect,
            });
            if let Some(label) = self.label(LabelRole::Zone, &zone.name, rect.x + 2, rect.y + 2, dims) {
                shapes.push(label);
            }
        }

        for det in detections {
            shapes.push(Shape::TagOutline {
                payload: det.payload.clone(),
                points: *det.quad.points(),
            });
            let text = match &det.zone {
                Some(zone) => format!("{} @ {}", det.payload, zone),
                None => det.payload.clone(),
            };
            let (_, text_h) = self.text_extent(&truncate_label(&text, self.settings.max_label_chars));
            let (min_x, min_y, _, max_y) = det.quad.bounds();
            let box_h = (text_h + 2 * pad) as i32;
            let mut y = min_y.floor() as i32 - box_h - 2;
            if y < 0 {
                y = max_y.ceil() as i32 + 2;
            }
            if let Some(label) = self.label(LabelRole::Tag, &text, min_x.floor() as i32, y, dims) {
                shapes.push(label);
            }
        }

        if self.settings.banner {
            let text = if detections.is_empty() {
                EMPTY_BANNER.to_string()
            } else {
                detections
                    .iter()
                    .map(|d| d.payload.as_str())
                    .collect::<Vec<_>>()
                    .join(" | ")
            };
            let text = truncate_label(&text, self.settings.max_label_chars.saturating_mul(2));
            let (tw, th) = self.text_extent(&text);
            let (x, y) = self.settings.banner_position.anchor(
                img_w,
                img_h,
                tw + 2 * pad,
                th + 2 * pad,
                pad,
            );
            if let Some(background) = PixelRect::clipped(x, y, tw + 2 * pad, th + 2 * pad, img_w, img_h) {
                shapes.push(Shape::Label {
                    role: LabelRole::Banner,
                    text,
                    background,
                    text_x: x + pad as i32,
                    text_y: y + pad as i32,
                });
            }
        }
        shapes
    }

    /// Draw the overlay on a copy of the frame.
    pub fn render(&self, frame: &Frame, detections: &[Detection], zones: &ZoneSet) -> RgbImage {
        let mut canvas = frame.image().clone();
        let shapes = self.plan((canvas.width(), canvas.height()), detections, zones);
        self.draw(&mut canvas, &shapes);
        canvas
    }

    pub fn draw(&self, canvas: &mut RgbImage, shapes: &[Shape]) {
        let scale = PxScale::from(self.settings.font_size);
        for shape in shapes {
            match shape {
                Shape::ZoneBox { rect, .. } => {
                    draw_hollow_rect_mut(canvas, rect.to_rect(), ZONE_COLOR);
                    if rect.w > 2 && rect.h > 2 {
                        let inner = Rect::at(rect.x + 1, rect.y + 1).of_size(rect.w - 2, rect.h - 2);
                        draw_hollow_rect_mut(canvas, inner, ZONE_COLOR);
                    }
                }
                Shape::TagOutline { points, .. } => {
                    for i in 0..4 {
                        let a = points[i];
                        let b = points[(i + 1) % 4];
                        draw_line_segment_mut(canvas, (a.x, a.y), (b.x, b.y), TAG_COLOR);
                        draw_line_segment_mut(canvas, (a.x + 1.0, a.y), (b.x + 1.0, b.y), TAG_COLOR);
                    }
                }
                Shape::Label {
                    text,
                    background,
                    text_x,
                    text_y,
                    ..
                } => {
                    draw_filled_rect_mut(canvas, background.to_rect(), LABEL_BG);
                    if let Some(font) = &self.font {
                        draw_text_mut(canvas, LABEL_FG, *text_x, *text_y, scale, font, text);
                    }
                }
            }
        }
    }

    fn label(&self, role: LabelRole, text: &str, x: i32, y: i32, dims: (u32, u32)) -> Option<Shape> {
        let text = truncate_label(text, self.settings.max_label_chars);
        let pad = self.settings.padding;
        let (tw, th) = self.text_extent(&text);
        let background = PixelRect::clipped(x, y, tw + 2 * pad, th + 2 * pad, dims.0, dims.1)?;
        Some(Shape::Label {
            role,
            text,
            background,
            text_x: x + pad as i32,
            text_y: y + pad as i32,
        })
    }

    fn text_extent(&self, text: &str) -> (u32, u32) {
        let size = self.settings.font_size.max(1.0);
        match &self.font {
            Some(font) => text_size(PxScale::from(size), font, text),
            None => {
                let chars = text.chars().count() as f32;
                ((chars * size * FALLBACK_CHAR_WIDTH).ceil() as u32, size.ceil() as u32)
            }
        }
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_label(text: &str, max_chars: usize) -> String {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push(ELLIPSIS);
    out
}
