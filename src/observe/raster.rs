//! 像素绘制：圆点、粗线、半透明混合、图层合成、缩放与 PNG 编码

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ColorType, ImageEncoder, Rgba, RgbaImage};

use crate::core::error::ObserveError;
use crate::observe::marks::{Color, Geometry, Mark, MarkKind, CURSOR_RING_COLOR};

const POINT_RADIUS: i64 = 10;
const CURSOR_RING_RADIUS: i64 = 14;
const PREVIOUS_CURSOR_RADIUS: i64 = 12;
const DRAG_THICKNESS: i64 = 4;

/// 0-1000 → 像素
pub fn norm(v: u16, extent: u32) -> i64 {
    ((v.min(1000) as f64 / 1000.0) * extent as f64) as i64
}

fn blend(px: &mut Rgba<u8>, c: Color) {
    if c.a == 255 {
        *px = Rgba([c.r, c.g, c.b, 255]);
        return;
    }
    let fa = c.a as f32 / 255.0;
    let inv = 1.0 - fa;
    let [r, g, b, a] = px.0;
    *px = Rgba([
        (c.r as f32 * fa + r as f32 * inv) as u8,
        (c.g as f32 * fa + g as f32 * inv) as u8,
        (c.b as f32 * fa + b as f32 * inv) as u8,
        (c.a as f32 + a as f32 * inv).min(255.0) as u8,
    ]);
}

fn put(img: &mut RgbaImage, x: i64, y: i64, c: Color) {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return;
    }
    blend(img.get_pixel_mut(x as u32, y as u32), c);
}

pub fn fill_circle(img: &mut RgbaImage, cx: i64, cy: i64, radius: i64, c: Color) {
    let r2 = radius * radius;
    for oy in -radius..=radius {
        for ox in -radius..=radius {
            if ox * ox + oy * oy <= r2 {
                put(img, cx + ox, cy + oy, c);
            }
        }
    }
}

/// Bresenham，按方形笔刷加粗
pub fn draw_line(img: &mut RgbaImage, from: (i64, i64), to: (i64, i64), c: Color, thickness: i64) {
    let (mut x, mut y) = from;
    let (x2, y2) = to;
    let dx = (x2 - x).abs();
    let dy = (y2 - y).abs();
    let sx = if x < x2 { 1 } else { -1 };
    let sy = if y < y2 { 1 } else { -1 };
    let mut err = dx - dy;
    let half = thickness / 2;
    loop {
        for oy in -half..=half {
            for ox in -half..=half {
                put(img, x + ox, y + oy, c);
            }
        }
        if x == x2 && y == y2 {
            break;
        }
        let e2 = err * 2;
        if e2 > -dy {
            err -= dy;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            y += sy;
        }
    }
}

pub fn draw_mark(img: &mut RgbaImage, mark: &Mark) {
    let (w, h) = img.dimensions();
    match (mark.kind, mark.geometry) {
        (MarkKind::Cursor, Geometry::Point { x, y }) => {
            let (px, py) = (norm(x, w), norm(y, h));
            fill_circle(img, px, py, CURSOR_RING_RADIUS, CURSOR_RING_COLOR);
            fill_circle(img, px, py, POINT_RADIUS, mark.color);
        }
        (MarkKind::PreviousCursor, Geometry::Point { x, y }) => {
            fill_circle(img, norm(x, w), norm(y, h), PREVIOUS_CURSOR_RADIUS, mark.color);
        }
        (_, Geometry::Point { x, y }) => {
            fill_circle(img, norm(x, w), norm(y, h), POINT_RADIUS, mark.color);
        }
        (_, Geometry::Line { x1, y1, x2, y2 }) => {
            draw_line(
                img,
                (norm(x1, w), norm(y1, h)),
                (norm(x2, w), norm(y2, h)),
                mark.color,
                DRAG_THICKNESS,
            );
        }
    }
}

/// 按给定顺序绘制；调用方负责把光标放在最后
pub fn draw_marks(img: &mut RgbaImage, marks: &[Mark]) {
    for mark in marks {
        draw_mark(img, mark);
    }
}

/// 把透明图层叠到底图上；尺寸不一致时跳过并返回 false
pub fn composite(base: &mut RgbaImage, layer: &RgbaImage) -> bool {
    if base.dimensions() != layer.dimensions() {
        return false;
    }
    for (dst, src) in base.pixels_mut().zip(layer.pixels()) {
        let [r, g, b, a] = src.0;
        if a > 0 {
            blend(dst, Color::rgba(r, g, b, a));
        }
    }
    true
}

/// 缩放到目标尺寸（0 表示保持原尺寸）并编码为 PNG
pub fn encode_png(img: &RgbaImage, width: u32, height: u32) -> Result<(Vec<u8>, u32, u32), ObserveError> {
    let (dw, dh) = if width == 0 || height == 0 {
        img.dimensions()
    } else {
        (width, height)
    };
    let resized;
    let src = if (dw, dh) != img.dimensions() {
        resized = image::imageops::resize(img, dw, dh, FilterType::Triangle);
        &resized
    } else {
        img
    };
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(src.as_raw(), dw, dh, ColorType::Rgba8.into())
        .map_err(|e| ObserveError::Encode(e.to_string()))?;
    Ok((buf, dw, dh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::marks::{PointerAction, CLICK_COLOR};

    fn black(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn test_norm_maps_full_range() {
        assert_eq!(norm(0, 1920), 0);
        assert_eq!(norm(500, 1920), 960);
        assert_eq!(norm(1000, 1920), 1920);
        assert_eq!(norm(5000, 100), 100);
    }

    #[test]
    fn test_click_mark_paints_center_and_clips_edges() {
        let mut img = black(100, 100);
        draw_mark(&mut img, &Mark::from_action(&PointerAction::Click { x: 500, y: 500 }));
        assert_eq!(img.get_pixel(50, 50).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
        // 贴边也不越界
        draw_mark(&mut img, &Mark::from_action(&PointerAction::Click { x: 1000, y: 1000 }));
    }

    #[test]
    fn test_drag_line_covers_endpoints() {
        let mut img = black(100, 100);
        draw_mark(
            &mut img,
            &Mark::from_action(&PointerAction::Drag {
                x1: 100,
                y1: 100,
                x2: 900,
                y2: 100,
            }),
        );
        assert_ne!(img.get_pixel(10, 10).0, [0, 0, 0, 255]);
        assert_ne!(img.get_pixel(90, 10).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(50, 50).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_composite_respects_transparency() {
        let mut base = black(4, 4);
        let mut layer = RgbaImage::new(4, 4);
        layer.put_pixel(1, 1, Rgba([CLICK_COLOR.r, CLICK_COLOR.g, CLICK_COLOR.b, 255]));
        assert!(composite(&mut base, &layer));
        assert_eq!(base.get_pixel(1, 1).0, [255, 255, 255, 255]);
        assert_eq!(base.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert!(!composite(&mut base, &RgbaImage::new(2, 2)));
    }

    #[test]
    fn test_encode_png_resizes() {
        let img = black(64, 36);
        let (png, w, h) = encode_png(&img, 32, 18).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!((w, h), (32, 18));
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 18));
    }
}
