use crate::render::font::SubtitleFont;
use crate::render::layout::{BoxShape, FrameLayout, PlacedWord, RectF};
use crate::render::style::{Paint, ResolvedStyle};
use ab_glyph::Font;
use image::{Rgba, RgbaImage};

/// Source-over blend of `src` onto `dst`, with `coverage` scaling the source alpha
pub fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, coverage: f32) {
    let src_a = (src[3] as f32 / 255.0) * coverage.clamp(0.0, 1.0);
    if src_a <= 0.0 {
        return;
    }

    let dst_a = dst[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);

    for c in 0..3 {
        let value = (src[c] as f32 * src_a + dst[c] as f32 * dst_a * (1.0 - src_a)) / out_a;
        dst[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

fn inside_rounded(px: f32, py: f32, rect: &RectF, radius: f32) -> bool {
    if px < rect.left || px > rect.right || py < rect.top || py > rect.bottom {
        return false;
    }
    if radius <= 0.0 {
        return true;
    }

    // Distance to the inner rectangle whose corners are the arc centres
    let cx = px.clamp(rect.left + radius, rect.right - radius);
    let cy = py.clamp(rect.top + radius, rect.bottom - radius);
    let (dx, dy) = (px - cx, py - cy);
    dx * dx + dy * dy <= radius * radius
}

/// Fill a rectangle with rounded corners.
///
/// The radius is clamped to half the shorter side; a pixel is painted when
/// its centre lies inside the shape.
pub fn fill_rounded_rect(img: &mut RgbaImage, rect: RectF, radius: f32, color: Rgba<u8>) {
    if rect.width() <= 0.0 || rect.height() <= 0.0 || color[3] == 0 {
        return;
    }

    let radius = radius.min(rect.width() / 2.0).min(rect.height() / 2.0).max(0.0);
    let (width, height) = img.dimensions();

    let x0 = rect.left.floor().max(0.0) as u32;
    let y0 = rect.top.floor().max(0.0) as u32;
    let x1 = (rect.right.ceil().max(0.0) as u32).min(width);
    let y1 = (rect.bottom.ceil().max(0.0) as u32).min(height);

    for y in y0..y1 {
        for x in x0..x1 {
            if inside_rounded(x as f32 + 0.5, y as f32 + 0.5, &rect, radius) {
                blend(img.get_pixel_mut(x, y), color, 1.0);
            }
        }
    }
}

fn fill_box(img: &mut RgbaImage, shape: &BoxShape) {
    fill_rounded_rect(img, shape.rect, shape.radius, shape.color);
}

/// Antialiased coverage of one rasterised word
struct WordMask {
    left: i32,
    top: i32,
    width: usize,
    height: usize,
    coverage: Vec<f32>,
}

impl WordMask {
    fn rasterize(font: &SubtitleFont, text: &str, px: f32, x: f32, y: f32) -> Option<Self> {
        let outlined: Vec<_> = font
            .layout_glyphs(text, px, x, y)
            .into_iter()
            .filter_map(|g| font.font().outline_glyph(g))
            .collect();

        let (min_x, min_y, max_x, max_y) = outlined
            .iter()
            .map(|o| {
                let b = o.px_bounds();
                (b.min.x, b.min.y, b.max.x, b.max.y)
            })
            .reduce(|a, b| (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3)))?;

        let left = min_x.floor() as i32;
        let top = min_y.floor() as i32;
        let width = (max_x.ceil() as i32 - left).max(0) as usize;
        let height = (max_y.ceil() as i32 - top).max(0) as usize;
        let mut coverage = vec![0.0f32; width * height];

        for glyph in &outlined {
            let bounds = glyph.px_bounds();
            let gx0 = bounds.min.x.floor() as i32 - left;
            let gy0 = bounds.min.y.floor() as i32 - top;
            glyph.draw(|gx, gy, c| {
                let mx = gx0 + gx as i32;
                let my = gy0 + gy as i32;
                if mx >= 0 && my >= 0 && (mx as usize) < width && (my as usize) < height {
                    let cell = &mut coverage[my as usize * width + mx as usize];
                    *cell = (*cell + c).min(1.0);
                }
            });
        }

        Some(Self {
            left,
            top,
            width,
            height,
            coverage,
        })
    }

    fn stamp(&self, img: &mut RgbaImage, dx: i32, dy: i32, color: Rgba<u8>) {
        let (img_w, img_h) = img.dimensions();
        for my in 0..self.height {
            let y = self.top + dy + my as i32;
            if y < 0 || y >= img_h as i32 {
                continue;
            }
            for mx in 0..self.width {
                let x = self.left + dx + mx as i32;
                if x < 0 || x >= img_w as i32 {
                    continue;
                }
                let c = self.coverage[my * self.width + mx];
                if c > 0.0 {
                    blend(img.get_pixel_mut(x as u32, y as u32), color, c);
                }
            }
        }
    }
}

/// Draw a word: outline copies at every offset within the thickness, then the fill
fn draw_word(img: &mut RgbaImage, font: &SubtitleFont, word: &PlacedWord, paint: Paint) {
    let Some(mask) = WordMask::rasterize(font, &word.text, word.px, word.x, word.y) else {
        return;
    };

    let t = paint.outline_thickness;
    if t > 0 && paint.outline[3] > 0 {
        for dx in -t..=t {
            for dy in -t..=t {
                if dx != 0 || dy != 0 {
                    mask.stamp(img, dx, dy, paint.outline);
                }
            }
        }
    }

    mask.stamp(img, 0, 0, paint.fill);
}

/// Paint a computed layout onto `img`
pub fn draw_layout(img: &mut RgbaImage, layout: &FrameLayout, style: &ResolvedStyle, font: &SubtitleFont) {
    if let Some(background) = &layout.background {
        fill_box(img, background);
    }

    for word in &layout.words {
        if let Some(highlight) = &word.highlight {
            fill_box(img, highlight);
        }
        draw_word(img, font, word, style.paint(word.active));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn black(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn test_blend() {
        let mut px = Rgba([0, 0, 0, 255]);
        blend(&mut px, Rgba([255, 255, 255, 255]), 1.0);
        assert_eq!(px, Rgba([255, 255, 255, 255]));

        let mut px = Rgba([0, 0, 0, 255]);
        blend(&mut px, Rgba([255, 255, 255, 128]), 1.0);
        assert_eq!(px, Rgba([128, 128, 128, 255]));

        let mut px = Rgba([0, 0, 0, 255]);
        blend(&mut px, Rgba([255, 255, 255, 255]), 0.5);
        assert_eq!(px[0], 128);

        let mut px = Rgba([10, 20, 30, 255]);
        blend(&mut px, Rgba([255, 255, 255, 0]), 1.0);
        assert_eq!(px, Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_blend_onto_transparent() {
        let mut px = Rgba([0, 0, 0, 0]);
        blend(&mut px, Rgba([200, 100, 50, 128]), 1.0);
        assert_eq!(px, Rgba([200, 100, 50, 128]));
    }

    #[test]
    fn test_square_rect_fills_exactly() {
        let mut img = black(10, 10);
        fill_rounded_rect(&mut img, RectF::new(2.0, 2.0, 6.0, 5.0), 0.0, RED);

        let filled = img.pixels().filter(|p| **p == RED).count();
        assert_eq!(filled, 4 * 3);
        assert_eq!(*img.get_pixel(2, 2), RED);
        assert_eq!(*img.get_pixel(5, 4), RED);
        assert_ne!(*img.get_pixel(6, 4), RED);
    }

    #[test]
    fn test_rounded_corners_are_cut() {
        let mut img = black(20, 20);
        fill_rounded_rect(&mut img, RectF::new(0.0, 0.0, 20.0, 20.0), 8.0, RED);

        assert_ne!(*img.get_pixel(0, 0), RED);
        assert_ne!(*img.get_pixel(19, 19), RED);
        assert_eq!(*img.get_pixel(10, 0), RED);
        assert_eq!(*img.get_pixel(10, 10), RED);
    }

    #[test]
    fn test_radius_is_clamped_to_half_the_short_side() {
        let mut clamped = black(30, 10);
        fill_rounded_rect(&mut clamped, RectF::new(0.0, 0.0, 30.0, 10.0), 100.0, RED);
        let mut pill = black(30, 10);
        fill_rounded_rect(&mut pill, RectF::new(0.0, 0.0, 30.0, 10.0), 5.0, RED);

        assert_eq!(clamped, pill);
        assert_eq!(*clamped.get_pixel(15, 0), RED);
    }

    #[test]
    fn test_rect_outside_frame_is_ignored() {
        let mut img = black(10, 10);
        fill_rounded_rect(&mut img, RectF::new(-20.0, -20.0, -5.0, -5.0), 0.0, RED);
        fill_rounded_rect(&mut img, RectF::new(8.0, 8.0, 40.0, 40.0), 0.0, RED);

        assert_eq!(img.pixels().filter(|p| **p == RED).count(), 4);
    }

    #[test]
    fn test_draw_layout_with_system_font() {
        let Some(font) = SubtitleFont::try_load(None) else {
            return;
        };
        let style = crate::render::style::SubtitleStyle::default().resolve().unwrap();
        let layout = FrameLayout {
            background: None,
            words: vec![PlacedWord {
                text: "Hello".to_string(),
                x: 10.0,
                y: 10.0,
                px: 32.0,
                active: false,
                highlight: None,
            }],
        };

        let mut img = black(200, 80);
        draw_layout(&mut img, &layout, &style, &font);
        assert!(img.pixels().any(|p| p[0] == 255 && p[1] == 255 && p[2] == 255));
    }
}
