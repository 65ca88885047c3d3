//! Terminal rendering of the host snapshot

use fire_plasma_core::{classify, GridDims, RampColor};
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Paragraph, Widget};
use ratatui::Frame;

/// The fire grid, one cell per terminal character
pub struct FireView<'a> {
    data: &'a [f32],
    dims: GridDims,
}

impl<'a> FireView<'a> {
    pub fn new(data: &'a [f32], dims: GridDims) -> Self {
        Self { data, dims }
    }
}

impl Widget for FireView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Anything that does not fit the terminal is clipped
        let rows = u16::try_from(self.dims.height).unwrap_or(u16::MAX).min(area.height);
        let cols = u16::try_from(self.dims.width).unwrap_or(u16::MAX).min(area.width);
        for row in 0..rows {
            for col in 0..cols {
                let value = self.data[self.dims.index(row as usize, col as usize)];
                let Some(glyph) = classify(value) else {
                    continue;
                };
                if let Some(cell) = buf.cell_mut((area.x + col, area.y + row)) {
                    cell.set_char(glyph.symbol).set_fg(terminal_color(glyph.color));
                }
            }
        }
    }
}

fn terminal_color(color: RampColor) -> Color {
    match color {
        RampColor::Black => Color::Black,
        RampColor::Red => Color::Red,
        RampColor::Yellow => Color::Yellow,
        RampColor::White => Color::White,
        RampColor::Cyan => Color::Cyan,
        RampColor::Magenta => Color::Magenta,
        RampColor::Blue => Color::Blue,
    }
}

/// Draw the fire with a one-line status bar underneath
pub fn draw(frame: &mut Frame, view: FireView<'_>, status: &str) {
    let [fire_area, status_area] =
        Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(frame.area());
    frame.render_widget(view, fire_area);
    frame.render_widget(
        Paragraph::new(status).style(Style::new().fg(Color::DarkGray)),
        status_area,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_view_draws_glyphs() {
        let dims = GridDims::new(3, 1);
        let data = [0.0, 50.0, 200.0];
        let area = Rect::new(0, 0, 3, 1);
        let mut buf = Buffer::empty(area);
        FireView::new(&data, dims).render(area, &mut buf);

        assert_eq!(buf[(0, 0)].symbol(), " ");
        assert_eq!(buf[(1, 0)].symbol(), "#");
        assert_eq!(buf[(1, 0)].fg, Color::Red);
        assert_eq!(buf[(2, 0)].symbol(), "$");
        assert_eq!(buf[(2, 0)].fg, Color::Magenta);
    }

    #[test]
    fn test_fire_view_clips_to_area() {
        let dims = GridDims::new(4, 4);
        let data = [100.0; 16];
        let area = Rect::new(0, 0, 2, 2);
        let mut buf = Buffer::empty(area);
        FireView::new(&data, dims).render(area, &mut buf);
        assert_eq!(buf[(1, 1)].symbol(), "#");
    }
}
