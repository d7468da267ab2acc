use ab_glyph::{Font, FontVec, Glyph, PxScale, ScaleFont, point};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum FontError {
    #[error("No suitable font found; set FONT_PATH")]
    NotFound,
    #[error("Failed to read font {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid font file: {0:?}")]
    Invalid(PathBuf),
}

/// Text measurement used by the layout step
pub trait TextMetrics {
    /// Horizontal advance of `text` at font size `px`
    fn advance(&self, text: &str, px: f32) -> f32;
    /// Height of the inked area of `text` at font size `px`
    fn ink_height(&self, text: &str, px: f32) -> f32;
    /// Left and right edge of the inked area of `text` drawn at `x`
    fn ink_span(&self, text: &str, px: f32, x: f32) -> (f32, f32) {
        (x, x + self.advance(text, px))
    }
}

#[cfg(target_os = "linux")]
fn candidate_fonts() -> Vec<PathBuf> {
    [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

#[cfg(target_os = "macos")]
fn candidate_fonts() -> Vec<PathBuf> {
    [
        "/Library/Fonts/Arial.ttf",
        "/System/Library/Fonts/Arial.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

#[cfg(target_os = "windows")]
fn candidate_fonts() -> Vec<PathBuf> {
    let windir = std::env::var("WINDIR").unwrap_or_else(|_| "C:\\Windows".to_string());
    vec![Path::new(&windir).join("Fonts").join("Arial.ttf")]
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn candidate_fonts() -> Vec<PathBuf> {
    Vec::new()
}

/// First existing system font from the platform's usual locations
pub fn find_system_font() -> Option<PathBuf> {
    candidate_fonts().into_iter().find(|p| p.is_file())
}

/// Font used for all subtitle text
pub struct SubtitleFont {
    font: FontVec,
}

impl SubtitleFont {
    /// Load the configured font, or fall back to a system font
    pub fn load(configured: Option<&Path>) -> Result<Self, FontError> {
        let path = match configured {
            Some(path) => path.to_path_buf(),
            None => find_system_font().ok_or(FontError::NotFound)?,
        };

        let data = std::fs::read(&path).map_err(|source| FontError::Io {
            path: path.clone(),
            source,
        })?;
        let font = FontVec::try_from_vec(data).map_err(|_| FontError::Invalid(path.clone()))?;

        info!("Loaded subtitle font {:?}", path);
        Ok(Self { font })
    }

    /// Like [`SubtitleFont::load`] but logs instead of failing
    pub fn try_load(configured: Option<&Path>) -> Option<Self> {
        match Self::load(configured) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!("Subtitle rendering disabled: {}", e);
                None
            }
        }
    }

    pub fn font(&self) -> &FontVec {
        &self.font
    }

    /// Scale where one em is `px` pixels tall
    pub fn scale(&self, px: f32) -> PxScale {
        self.font.pt_to_px_scale(px).unwrap_or(PxScale::from(px))
    }

    /// Position glyphs for `text` with the top-left (ascender line) at `(x, y)`
    pub fn layout_glyphs(&self, text: &str, px: f32, x: f32, y: f32) -> Vec<Glyph> {
        let scaled = self.font.as_scaled(self.scale(px));
        let baseline = y + scaled.ascent();

        let mut glyphs = Vec::with_capacity(text.len());
        let mut caret = x;
        let mut previous = None;

        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                caret += scaled.kern(prev, id);
            }
            glyphs.push(id.with_scale_and_position(scaled.scale(), point(caret, baseline)));
            caret += scaled.h_advance(id);
            previous = Some(id);
        }

        glyphs
    }
}

impl TextMetrics for SubtitleFont {
    fn advance(&self, text: &str, px: f32) -> f32 {
        let scaled = self.font.as_scaled(self.scale(px));
        let mut width = 0.0;
        let mut previous = None;

        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            previous = Some(id);
        }

        width
    }

    fn ink_height(&self, text: &str, px: f32) -> f32 {
        let bounds = self
            .layout_glyphs(text, px, 0.0, 0.0)
            .into_iter()
            .filter_map(|g| self.font.outline_glyph(g))
            .map(|o| {
                let b = o.px_bounds();
                (b.min.y, b.max.y)
            })
            .reduce(|(a0, a1), (b0, b1)| (a0.min(b0), a1.max(b1)));

        match bounds {
            Some((top, bottom)) => bottom - top,
            // Whitespace only: fall back to the font's line extent
            None => {
                let scaled = self.font.as_scaled(self.scale(px));
                scaled.ascent() - scaled.descent()
            }
        }
    }

    fn ink_span(&self, text: &str, px: f32, x: f32) -> (f32, f32) {
        self.layout_glyphs(text, px, x, 0.0)
            .into_iter()
            .filter_map(|g| self.font.outline_glyph(g))
            .map(|o| {
                let b = o.px_bounds();
                (b.min.x, b.max.x)
            })
            .reduce(|(a0, a1), (b0, b1)| (a0.min(b0), a1.max(b1)))
            .unwrap_or((x, x + self.advance(text, px)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_configured_font_is_an_io_error() {
        let result = SubtitleFont::load(Some(Path::new("/nonexistent/font.ttf")));
        assert!(matches!(result, Err(FontError::Io { .. })));
    }

    #[test]
    fn test_garbage_font_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ttf");
        std::fs::write(&path, b"not a font").unwrap();

        assert!(matches!(SubtitleFont::load(Some(&path)), Err(FontError::Invalid(_))));
        assert!(SubtitleFont::try_load(Some(&path)).is_none());
    }

    #[test]
    fn test_system_font_metrics_when_available() {
        let Some(font) = SubtitleFont::try_load(None) else {
            return;
        };

        let short = font.advance("Hi", 48.0);
        let long = font.advance("Hi there", 48.0);
        assert!(short > 0.0);
        assert!(long > short);
        assert!(font.advance("Hi", 96.0) > short * 1.9);
        assert!(font.ink_height("Tg", 48.0) > font.ink_height("o", 48.0));
    }
}
