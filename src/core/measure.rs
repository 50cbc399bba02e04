//! Element measurement seam
//!
//! The host owns layout. The core only asks for a width/height per message.

use super::message::Segment;

/// Measured pixel size of a rendered message
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

/// Synchronous measurement primitive supplied by the rendering host
pub trait Measure {
    fn measure(&self, segments: &[Segment], font_size: f32) -> Size;
}

impl<F> Measure for F
where
    F: Fn(&[Segment], f32) -> Size,
{
    fn measure(&self, segments: &[Segment], font_size: f32) -> Size {
        self(segments, font_size)
    }
}

/// Monospace estimate used headless (CLI, tests) where no layout engine exists
#[derive(Debug, Clone, Copy)]
pub struct EstimateMeasure {
    /// Glyph advance as a fraction of font size
    pub char_width: f32,
    /// Emote box edge as a fraction of font size
    pub emote_size: f32,
}

impl Default for EstimateMeasure {
    fn default() -> Self {
        Self {
            char_width: 0.6,
            emote_size: 1.0,
        }
    }
}

impl Measure for EstimateMeasure {
    fn measure(&self, segments: &[Segment], font_size: f32) -> Size {
        let glyph = font_size * self.char_width;
        let width = segments
            .iter()
            .map(|segment| match segment {
                // "name: "
                Segment::Username { name, .. } => (name.chars().count() + 2) as f32 * glyph,
                Segment::Text { text } => text.chars().count() as f32 * glyph,
                Segment::Emote { .. } => font_size * self.emote_size,
            })
            .sum();
        Size {
            width,
            height: font_size.max(font_size * self.emote_size),
        }
    }
}
