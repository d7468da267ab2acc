use crate::render::draw::draw_layout;
use crate::render::font::SubtitleFont;
use crate::render::layout::layout_preview;
use crate::render::style::ResolvedStyle;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::Deserialize;
use std::io::Cursor;

pub const PREVIEW_TEXT: &str = "This is a sample subtitle line";
pub const PREVIEW_ACTIVE_WORD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Horizontal,
    Vertical,
}

impl Orientation {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Orientation::Horizontal => (640, 360),
            Orientation::Vertical => (360, 640),
        }
    }
}

/// Render the sample line on a black frame
pub fn render_preview(style: &ResolvedStyle, font: &SubtitleFont, orientation: Orientation) -> RgbaImage {
    let (width, height) = orientation.dimensions();
    let mut img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));

    let layout = layout_preview(PREVIEW_TEXT, PREVIEW_ACTIVE_WORD, style, font, width, height);
    draw_layout(&mut img, &layout, style, font);
    img
}

/// Encode as an RGB PNG
pub fn encode_png(img: RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgba8(img).to_rgb8();
    let mut bytes = Cursor::new(Vec::new());
    rgb.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}
