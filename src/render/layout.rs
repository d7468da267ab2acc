//! Placement of subtitle words and boxes on a frame.
//!
//! Layout is pure: it only needs a [`TextMetrics`] implementation, so the
//! maths can be checked without a font or an image.

use crate::render::font::TextMetrics;
use crate::render::style::ResolvedStyle;
use crate::transcription::{Transcript, TranscriptSegment};
use image::Rgba;

/// Horizontal padding of the background box
const PADDING: f32 = 10.0;

const PREVIEW_MAX_FONT: u32 = 80;
const PREVIEW_MIN_FONT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectF {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RectF {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    fn clamp_to(self, width: u32, height: u32) -> Self {
        Self {
            left: self.left.max(0.0),
            top: self.top.max(0.0),
            right: self.right.min(width as f32),
            bottom: self.bottom.min(height as f32),
        }
    }
}

/// A filled, optionally rounded rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxShape {
    pub rect: RectF,
    pub radius: f32,
    pub color: Rgba<u8>,
}

/// One word ready to draw, `(x, y)` is its top-left corner
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedWord {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub px: f32,
    pub active: bool,
    /// Box drawn behind the word before its outline
    pub highlight: Option<BoxShape>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameLayout {
    pub background: Option<BoxShape>,
    pub words: Vec<PlacedWord>,
}

struct MeasuredWord {
    text: String,
    active: bool,
    px: f32,
    width: f32,
}

fn max_line_width(width: u32, percent: u8) -> f32 {
    (width as f64 * (percent as f64 / 100.0)).trunc() as f32
}

fn vertical_centre(height: u32, percent: u8) -> f32 {
    height as f32 - (height as f64 * (percent as f64 / 100.0)).trunc() as f32
}

fn horizontal_centre(width: u32, x_offset: i32) -> f32 {
    (width / 2) as f32 + x_offset as f32
}

/// Greedy wrap: a word moves to a new line when the line is non-empty and
/// the word plus a space would exceed `max_width`
fn wrap_words(words: &[MeasuredWord], space: f32, max_width: f32) -> Vec<Vec<usize>> {
    let mut lines = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_width = 0.0;

    for (i, word) in words.iter().enumerate() {
        if !current.is_empty() && current_width + space + word.width > max_width {
            lines.push(std::mem::take(&mut current));
            current_width = word.width;
        } else {
            if !current.is_empty() {
                current_width += space;
            }
            current_width += word.width;
        }
        current.push(i);
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Layout for the segment active at `t`, if any
pub fn layout_frame<M: TextMetrics + ?Sized>(
    transcript: &Transcript,
    t: f64,
    style: &ResolvedStyle,
    metrics: &M,
    width: u32,
    height: u32,
) -> Option<FrameLayout> {
    transcript
        .segment_at(t)
        .map(|segment| layout_segment(segment, t, style, metrics, width, height))
}

/// Wrap and place the words of `segment` as they look at time `t`
pub fn layout_segment<M: TextMetrics + ?Sized>(
    segment: &TranscriptSegment,
    t: f64,
    style: &ResolvedStyle,
    metrics: &M,
    width: u32,
    height: u32,
) -> FrameLayout {
    let normal_px = style.normal_px;
    let active_px = style.active_px;

    let active_index = segment.active_word(t);
    let words: Vec<MeasuredWord> = segment
        .words
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let active = active_index == Some(i);
            let px = style.px(active);
            let text = style.word_case.apply(w.text.trim());
            let width = metrics.advance(&text, px);
            MeasuredWord {
                text,
                active,
                px,
                width,
            }
        })
        .collect();

    if words.is_empty() {
        return FrameLayout::default();
    }

    let space = metrics.advance(" ", normal_px);
    let line_height = (normal_px * 1.2).max(metrics.ink_height("Tg", normal_px) + 5.0);
    let lines = wrap_words(&words, space, max_line_width(width, style.area_width_percent));

    let block_width = lines
        .iter()
        .map(|line| {
            let words_width: f32 = line.iter().map(|&i| words[i].width).sum();
            words_width + space * (line.len() as f32 - 1.0)
        })
        .fold(0.0f32, f32::max);
    let block_height = lines.len() as f32 * line_height;

    let centre_x = horizontal_centre(width, style.x_offset);
    let block_left = centre_x - (block_width / 2.0).floor();
    let block_top = vertical_centre(height, style.y_position_percent) - (block_height / 2.0).floor();

    let background = style.background.map(|color| BoxShape {
        rect: RectF::new(
            block_left - PADDING,
            block_top - 0.5 * PADDING,
            block_left + block_width + PADDING,
            block_top + block_height + 1.5 * PADDING,
        )
        .clamp_to(width, height),
        radius: style.background_radius,
        color,
    });

    let highlight_height = metrics.ink_height("Amy", active_px) * 1.2;
    let highlight_pad = metrics.advance(" ", active_px) * 0.5;

    let mut placed = Vec::with_capacity(words.len());
    let mut line_y = block_top + PADDING;

    for line in &lines {
        let line_width: f32 = line
            .iter()
            .map(|&i| words[i].width + metrics.advance(" ", words[i].px))
            .sum::<f32>()
            - space;
        let mut x = centre_x - (line_width / 2.0).floor();

        for &i in line {
            let word = &words[i];
            let highlight = match style.highlight {
                Some(color) if word.active => {
                    let (ink_left, ink_right) = metrics.ink_span(&word.text, word.px, x);
                    Some(BoxShape {
                        rect: RectF::new(
                            ink_left - highlight_pad,
                            line_y,
                            ink_right + highlight_pad,
                            line_y + highlight_height,
                        ),
                        radius: style.highlight_radius,
                        color,
                    })
                }
                _ => None,
            };

            placed.push(PlacedWord {
                text: word.text.clone(),
                x,
                y: line_y,
                px: word.px,
                active: word.active,
                highlight,
            });
            x += word.width + metrics.advance(" ", word.px);
        }

        line_y += line_height;
    }

    FrameLayout {
        background,
        words: placed,
    }
}

/// Largest size from 80 down to 10 at which `text` fits in `max_width`
pub fn fit_font_size<M: TextMetrics + ?Sized>(text: &str, max_width: f32, metrics: &M) -> u32 {
    let mut size = PREVIEW_MAX_FONT;
    while size > PREVIEW_MIN_FONT && metrics.advance(text, size as f32) > max_width {
        size -= 1;
    }
    size
}

/// Single-line layout of `text` with the word at `active_index` highlighted.
///
/// The font size in `style` is ignored; the text is sized to fit the
/// subtitle area instead.
pub fn layout_preview<M: TextMetrics + ?Sized>(
    text: &str,
    active_index: usize,
    style: &ResolvedStyle,
    metrics: &M,
    width: u32,
    height: u32,
) -> FrameLayout {
    let size = fit_font_size(text, max_line_width(width, style.area_width_percent), metrics);
    let normal_px = size as f32;
    let active_px = (normal_px * style.active_scale).trunc().max(1.0);

    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| style.word_case.apply(w))
        .collect();

    let space = metrics.advance(" ", normal_px);
    let total_width: f32 = words
        .iter()
        .map(|w| metrics.advance(w, normal_px) + space)
        .sum::<f32>()
        - space;

    let line_height = normal_px * 1.2;
    let y = vertical_centre(height, style.y_position_percent) - (line_height / 2.0).floor();
    let mut x = horizontal_centre(width, style.x_offset) - (total_width / 2.0).floor();

    let background = style.background.map(|color| BoxShape {
        rect: RectF::new(x - PADDING, y - 5.0, x + total_width + PADDING, y + line_height + 5.0),
        radius: style.background_radius,
        color,
    });

    let mut placed = Vec::with_capacity(words.len());
    for (i, word) in words.into_iter().enumerate() {
        let active = i == active_index;
        let px = if active { active_px } else { normal_px };

        let highlight = match style.highlight {
            Some(color) if active => {
                let (ink_left, ink_right) = metrics.ink_span(&word, px, x);
                Some(BoxShape {
                    rect: RectF::new(ink_left - 5.0, y, ink_right + 5.0, y + line_height),
                    radius: style.highlight_radius,
                    color,
                })
            }
            _ => None,
        };

        let advance = metrics.advance(&word, px) + metrics.advance(" ", px);
        placed.push(PlacedWord {
            text: word,
            x,
            y,
            px,
            active,
            highlight,
        });
        x += advance;
    }

    FrameLayout {
        background,
        words: placed,
    }
}
