mod draw;
mod font;
mod layout;
mod preview;
mod style;
mod video;

pub use font::SubtitleFont;
pub use preview::{Orientation, encode_png, render_preview};
pub use style::{ResolvedStyle, StyleError, SubtitleStyle};
pub use video::{VideoError, render_video};
