//! Subtitle styling: colours, word case and the user-tunable style set.

use image::Rgba;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum StyleError {
    #[error("Invalid hex color format: {0}")]
    InvalidColor(String),
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

/// Convert `#RRGGBB` plus an opacity percentage to RGBA
pub fn hex_to_rgba(hex: &str, alpha_percent: u8) -> Result<Rgba<u8>, StyleError> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StyleError::InvalidColor(hex.to_string()));
    }

    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| StyleError::InvalidColor(hex.to_string()))
    };
    let alpha = (255.0 * (alpha_percent.min(100) as f64 / 100.0)) as u8;

    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

/// Case transformation applied to every rendered word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WordCase {
    #[default]
    #[serde(rename = "As Is", alias = "as_is")]
    AsIs,
    #[serde(rename = "UPPERCASE", alias = "upper")]
    Upper,
    #[serde(rename = "lowercase", alias = "lower")]
    Lower,
    #[serde(rename = "Title Case", alias = "title")]
    Title,
}

impl WordCase {
    pub fn apply(&self, text: &str) -> String {
        match self {
            WordCase::AsIs => text.to_string(),
            WordCase::Upper => text.to_uppercase(),
            WordCase::Lower => text.to_lowercase(),
            WordCase::Title => title_case(text),
        }
    }
}

/// Uppercase the first letter of each word, lowercase the rest.
/// Apostrophes stay inside a word ("don't" -> "Don't").
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;

    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = in_word && (c == '\'' || c == '\u{2019}');
        }
    }

    out
}

/// Text colour and outline of normal (not currently spoken) words
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub color: String,
    pub opacity: u8,
    pub outline_color: String,
    pub outline_opacity: u8,
    pub outline_thickness: u32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            color: "#FFFFFF".to_string(),
            opacity: 100,
            outline_color: "#000000".to_string(),
            outline_opacity: 100,
            outline_thickness: 3,
        }
    }
}

/// Box drawn behind the whole subtitle block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxStyle {
    pub color: String,
    pub opacity: u8,
    pub border_radius: u32,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            color: "#000000".to_string(),
            opacity: 0,
            border_radius: 0,
        }
    }
}

/// Look of the word being spoken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveStyle {
    pub color: String,
    pub opacity: u8,
    pub size_scale: f32,
    pub highlight_color: String,
    pub highlight_opacity: u8,
    pub highlight_radius: u32,
    pub outline_color: String,
    pub outline_opacity: u8,
    pub outline_thickness: u32,
}

impl Default for ActiveStyle {
    fn default() -> Self {
        Self {
            color: "#5096FF".to_string(),
            opacity: 100,
            size_scale: 1.0,
            highlight_color: "#34DD00".to_string(),
            highlight_opacity: 90,
            highlight_radius: 10,
            outline_color: "#000000".to_string(),
            outline_opacity: 100,
            outline_thickness: 3,
        }
    }
}

/// Every tunable rendering parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleStyle {
    pub font_size: u32,
    pub word_case: WordCase,
    /// Vertical centre of the block, in percent of the height from the bottom
    pub y_position_percent: u8,
    /// Horizontal shift of the block centre in pixels
    pub x_offset: i32,
    /// Maximum line width in percent of the frame width
    pub subtitle_area_width_percent: u8,
    pub normal: TextStyle,
    pub background: BoxStyle,
    pub active: ActiveStyle,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_size: 48,
            word_case: WordCase::AsIs,
            y_position_percent: 80,
            x_offset: 0,
            subtitle_area_width_percent: 80,
            normal: TextStyle::default(),
            background: BoxStyle::default(),
            active: ActiveStyle::default(),
        }
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), StyleError> {
    if value < min || value > max || value.is_nan() {
        return Err(StyleError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

impl SubtitleStyle {
    pub fn validate(&self) -> Result<(), StyleError> {
        check_range("font_size", self.font_size as f64, 8.0, 200.0)?;
        check_range("y_position_percent", self.y_position_percent as f64, 0.0, 100.0)?;
        check_range("x_offset", self.x_offset as f64, -300.0, 300.0)?;
        check_range(
            "subtitle_area_width_percent",
            self.subtitle_area_width_percent as f64,
            50.0,
            100.0,
        )?;

        check_range("normal.opacity", self.normal.opacity as f64, 0.0, 100.0)?;
        check_range("normal.outline_opacity", self.normal.outline_opacity as f64, 0.0, 100.0)?;
        check_range("normal.outline_thickness", self.normal.outline_thickness as f64, 0.0, 10.0)?;

        check_range("background.opacity", self.background.opacity as f64, 0.0, 100.0)?;
        check_range("background.border_radius", self.background.border_radius as f64, 0.0, 50.0)?;

        check_range("active.opacity", self.active.opacity as f64, 0.0, 100.0)?;
        check_range("active.size_scale", self.active.size_scale as f64, 0.5, 2.0)?;
        check_range("active.highlight_opacity", self.active.highlight_opacity as f64, 0.0, 100.0)?;
        check_range("active.highlight_radius", self.active.highlight_radius as f64, 0.0, 50.0)?;
        check_range("active.outline_opacity", self.active.outline_opacity as f64, 0.0, 100.0)?;
        check_range("active.outline_thickness", self.active.outline_thickness as f64, 0.0, 10.0)?;

        Ok(())
    }

    /// Validate and convert every colour once, ahead of drawing
    pub fn resolve(&self) -> Result<ResolvedStyle, StyleError> {
        self.validate()?;

        let normal_px = self.font_size as f32;
        let active_px = (self.font_size as f32 * self.active.size_scale).trunc().max(1.0);

        Ok(ResolvedStyle {
            word_case: self.word_case,
            normal_px,
            active_px,
            active_scale: self.active.size_scale,
            y_position_percent: self.y_position_percent,
            x_offset: self.x_offset,
            area_width_percent: self.subtitle_area_width_percent,
            normal: Paint {
                fill: hex_to_rgba(&self.normal.color, self.normal.opacity)?,
                outline: hex_to_rgba(&self.normal.outline_color, self.normal.outline_opacity)?,
                outline_thickness: self.normal.outline_thickness as i32,
            },
            active: Paint {
                fill: hex_to_rgba(&self.active.color, self.active.opacity)?,
                outline: hex_to_rgba(&self.active.outline_color, self.active.outline_opacity)?,
                outline_thickness: self.active.outline_thickness as i32,
            },
            background: (self.background.opacity > 0)
                .then(|| hex_to_rgba(&self.background.color, self.background.opacity))
                .transpose()?,
            background_radius: self.background.border_radius as f32,
            highlight: (self.active.highlight_opacity > 0)
                .then(|| hex_to_rgba(&self.active.highlight_color, self.active.highlight_opacity))
                .transpose()?,
            highlight_radius: self.active.highlight_radius as f32,
        })
    }
}

/// Fill and outline for one word state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub fill: Rgba<u8>,
    pub outline: Rgba<u8>,
    pub outline_thickness: i32,
}

/// A validated style with colours converted and font sizes computed
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStyle {
    pub word_case: WordCase,
    pub normal_px: f32,
    pub active_px: f32,
    pub active_scale: f32,
    pub y_position_percent: u8,
    pub x_offset: i32,
    pub area_width_percent: u8,
    pub normal: Paint,
    pub active: Paint,
    /// None when the background box is fully transparent
    pub background: Option<Rgba<u8>>,
    pub background_radius: f32,
    /// None when the active-word highlight is fully transparent
    pub highlight: Option<Rgba<u8>>,
    pub highlight_radius: f32,
}

impl ResolvedStyle {
    pub fn paint(&self, active: bool) -> Paint {
        if active { self.active } else { self.normal }
    }

    pub fn px(&self, active: bool) -> f32 {
        if active { self.active_px } else { self.normal_px }
    }
}
