//! Mapping from heat values to terminal glyphs
//!
//! Values are bucketed in steps of 24 along an eight-colour ramp. Bucket 0 is
//! left blank; anything hotter than 128 is drawn as a magenta `$`.

/// Ramp colours, independent of any terminal library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RampColor {
    Black,
    Red,
    Yellow,
    White,
    Cyan,
    Magenta,
    Blue,
}

/// Colour of each bucket, coolest first
pub const RAMP: [RampColor; 8] = [
    RampColor::Black,
    RampColor::Black,
    RampColor::Red,
    RampColor::Yellow,
    RampColor::White,
    RampColor::Cyan,
    RampColor::Magenta,
    RampColor::Blue,
];

/// Width of one ramp bucket
pub const BUCKET_SIZE: i32 = 24;

/// Values above this are drawn as [`OVERHEAT`]
pub const OVERHEAT_THRESHOLD: f32 = 128.0;

/// Glyph for values above [`OVERHEAT_THRESHOLD`]
pub const OVERHEAT: Glyph = Glyph {
    symbol: '$',
    color: RampColor::Magenta,
};

/// A coloured character cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Glyph {
    /// Character to draw
    pub symbol: char,
    /// Foreground colour
    pub color: RampColor,
}

/// Glyph for one heat value, `None` for a blank cell
///
/// Negative and NaN values are blank.
#[must_use]
pub fn classify(value: f32) -> Option<Glyph> {
    if value > OVERHEAT_THRESHOLD {
        return Some(OVERHEAT);
    }
    // Truncation towards zero; NaN casts to 0
    let bucket = value as i32 / BUCKET_SIZE;
    if bucket <= 0 {
        return None;
    }
    RAMP.get(bucket as usize).map(|&color| Glyph { symbol: '#', color })
}

/// Render a row-major grid as text, one line per row
#[must_use]
pub fn render_text(data: &[f32], width: usize) -> String {
    let mut out = String::with_capacity(data.len() + data.len() / width.max(1));
    for row in data.chunks(width.max(1)) {
        out.extend(row.iter().map(|&v| classify(v).map_or(' ', |g| g.symbol)));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_cells_are_blank() {
        assert_eq!(classify(0.0), None);
        assert_eq!(classify(23.9), None);
        assert_eq!(classify(-5.0), None);
        assert_eq!(classify(f32::NAN), None);
    }

    #[test]
    fn test_buckets_follow_ramp() {
        let glyph = |v| classify(v).unwrap();
        // Bucket 1 is black like bucket 0, but still drawn
        assert_eq!(glyph(24.0), Glyph { symbol: '#', color: RampColor::Black });
        assert_eq!(glyph(48.0).color, RampColor::Red);
        assert_eq!(glyph(72.0).color, RampColor::Yellow);
        assert_eq!(glyph(96.0).color, RampColor::White);
        assert_eq!(glyph(120.0).color, RampColor::Cyan);
        assert_eq!(glyph(128.0).color, RampColor::Cyan);
    }

    #[test]
    fn test_overheat() {
        assert_eq!(classify(128.5), Some(OVERHEAT));
        assert_eq!(classify(1.0e6), Some(OVERHEAT));
        assert_eq!(classify(f32::INFINITY), Some(OVERHEAT));
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&[0.0, 50.0, 200.0, 30.0], 2);
        assert_eq!(text, " #\n$#\n");
    }
}
