//! Terminal display for the camera tools.
//!
//! Frames are drawn with Unicode half-block characters (two vertical pixels
//! per cell), between a title line and a caption/status footer.

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    MouseButton, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use image::{Rgb, RgbImage};
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::widgets::Widget;
use ratatui::Terminal;
use std::io::{self, stdout, Stdout};
use std::time::Duration;

/// Commands recognised by the capture loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Quit,
    Capture,
}

/// Everything drawn for one frame.
pub struct Screen<'a> {
    pub title: &'a str,
    pub image: &'a RgbImage,
    pub captions: &'a [(String, Rgb<u8>)],
    pub status: &'a str,
}

/// Raw-mode alternate screen, restored on drop.
pub struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    mouse: bool,
}

impl TerminalSession {
    pub fn start(mouse: bool) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut out = stdout();
        execute!(out, EnterAlternateScreen)?;
        if mouse {
            execute!(out, EnableMouseCapture)?;
        }
        let terminal = Terminal::new(CrosstermBackend::new(out))?;
        Ok(Self { terminal, mouse })
    }

    pub fn draw(&mut self, screen: &Screen<'_>) -> io::Result<()> {
        self.terminal.draw(|f| {
            let area = f.area();
            let footer = 2u16.min(area.height);
            let title_height = 1u16.min(area.height - footer);

            let title_area = Rect { height: title_height, ..area };
            let frame_area = Rect {
                y: area.y + title_height,
                height: area.height - title_height - footer,
                ..area
            };
            let captions_area = Rect {
                y: area.y + area.height.saturating_sub(2),
                height: footer.min(1),
                ..area
            };
            let status_area = Rect {
                y: area.y + area.height.saturating_sub(1),
                height: footer.saturating_sub(1),
                ..area
            };

            let title = TextLine {
                text: screen.title,
                fg: Color::Yellow,
                bg: Color::Reset,
            };
            let status = TextLine {
                text: screen.status,
                fg: Color::White,
                bg: Color::DarkGray,
            };
            f.render_widget(title, title_area);
            f.render_widget(FrameView { image: screen.image }, frame_area);
            f.render_widget(Captions { captions: screen.captions }, captions_area);
            f.render_widget(status, status_area);
        })?;
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        if self.mouse {
            let _ = execute!(self.terminal.backend_mut(), DisableMouseCapture);
        }
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Wait up to `timeout` for a key or mouse event.
pub fn poll_input(timeout: Duration) -> io::Result<Option<Input>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    Ok(map_event(&event::read()?))
}

pub fn map_event(ev: &Event) -> Option<Input> {
    match ev {
        Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Input::Quit)
            }
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(Input::Quit),
            KeyCode::Char(' ') | KeyCode::Char('c') | KeyCode::Enter => Some(Input::Capture),
            _ => None,
        },
        Event::Mouse(mouse) if mouse.kind == MouseEventKind::Down(MouseButton::Left) => {
            Some(Input::Capture)
        }
        _ => None,
    }
}

/// Renders an RGB image scaled to fit, preserving aspect ratio.
pub struct FrameView<'a> {
    pub image: &'a RgbImage,
}

impl Widget for FrameView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (fw, fh) = (self.image.width(), self.image.height());
        if fw == 0 || fh == 0 || area.width == 0 || area.height == 0 {
            return;
        }

        // Each cell shows 2 vertical pixels
        let frame_aspect = fw as f64 / fh as f64;
        let term_width = area.width as f64;
        let term_height = (area.height as f64) * 2.0;

        let (display_width, display_height) = if term_width / term_height > frame_aspect {
            let h = term_height;
            ((h * frame_aspect) as u16, (h / 2.0) as u16)
        } else {
            let w = term_width;
            (w as u16, (w / frame_aspect / 2.0) as u16)
        };
        let display_width = display_width.clamp(1, area.width);
        let display_height = display_height.clamp(1, area.height);

        let x_offset = area.x + (area.width - display_width) / 2;
        let y_offset = area.y + (area.height - display_height) / 2;
        let x_scale = fw as f64 / display_width as f64;
        let y_scale = fh as f64 / (display_height as f64 * 2.0);

        for ty in 0..display_height {
            for tx in 0..display_width {
                let src_x = ((tx as f64 * x_scale) as u32).min(fw - 1);
                let src_top = ((ty as f64 * 2.0 * y_scale) as u32).min(fh - 1);
                let src_bottom = (((ty as f64 * 2.0 + 1.0) * y_scale) as u32).min(fh - 1);

                if let Some(cell) = buf.cell_mut((x_offset + tx, y_offset + ty)) {
                    cell.set_char('▀');
                    cell.set_fg(to_color(self.image.get_pixel(src_x, src_top)));
                    cell.set_bg(to_color(self.image.get_pixel(src_x, src_bottom)));
                }
            }
        }
    }
}

fn to_color(p: &Rgb<u8>) -> Color {
    Color::Rgb(p.0[0], p.0[1], p.0[2])
}

/// Single line of text on a filled background.
struct TextLine<'a> {
    text: &'a str,
    fg: Color,
    bg: Color,
}

impl Widget for TextLine<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 {
            return;
        }
        let style = Style::default().fg(self.fg).bg(self.bg);
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_style(style);
            }
        }
        let text: String = self.text.chars().take(area.width as usize).collect();
        buf.set_string(area.x, area.y, text, style);
    }
}

/// Detection captions in their overlay colours, separated by two spaces.
struct Captions<'a> {
    captions: &'a [(String, Rgb<u8>)],
}

impl Widget for Captions<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 {
            return;
        }
        let mut x = area.x;
        let right = area.x + area.width;
        for (text, color) in self.captions {
            if x >= right {
                break;
            }
            let width = (right - x) as usize;
            let shown: String = text.chars().take(width).collect();
            let (next_x, _) =
                buf.set_stringn(x, area.y, &shown, width, Style::default().fg(to_color(color)));
            x = next_x.saturating_add(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, MouseEvent};

    #[test]
    fn keys_map_to_inputs() {
        let key = |code, modifiers| Event::Key(KeyEvent::new(code, modifiers));
        assert_eq!(map_event(&key(KeyCode::Char('q'), KeyModifiers::NONE)), Some(Input::Quit));
        assert_eq!(map_event(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)), Some(Input::Quit));
        assert_eq!(map_event(&key(KeyCode::Char('c'), KeyModifiers::NONE)), Some(Input::Capture));
        assert_eq!(map_event(&key(KeyCode::Char(' '), KeyModifiers::NONE)), Some(Input::Capture));
        assert_eq!(map_event(&key(KeyCode::Char('x'), KeyModifiers::NONE)), None);
    }

    #[test]
    fn left_click_captures() {
        let click = |kind| {
            Event::Mouse(MouseEvent {
                kind,
                column: 3,
                row: 4,
                modifiers: KeyModifiers::NONE,
            })
        };
        assert_eq!(map_event(&click(MouseEventKind::Down(MouseButton::Left))), Some(Input::Capture));
        assert_eq!(map_event(&click(MouseEventKind::Down(MouseButton::Right))), None);
        assert_eq!(map_event(&click(MouseEventKind::Moved)), None);
    }

    #[test]
    fn frame_view_uses_half_blocks() {
        let mut img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        for x in 0..4 {
            img.put_pixel(x, 1, Rgb([200, 0, 0]));
        }
        let area = Rect::new(0, 0, 4, 2);
        let mut buf = Buffer::empty(area);
        FrameView { image: &img }.render(area, &mut buf);

        let cell = &buf[(0, 0)];
        assert_eq!(cell.symbol(), "▀");
        assert_eq!(cell.fg, Color::Rgb(10, 20, 30));
        assert_eq!(cell.bg, Color::Rgb(200, 0, 0));
    }

    #[test]
    fn wide_frame_is_letterboxed() {
        let img = RgbImage::from_pixel(40, 10, Rgb([1, 2, 3]));
        let area = Rect::new(0, 0, 20, 10);
        let mut buf = Buffer::empty(area);
        FrameView { image: &img }.render(area, &mut buf);

        // 20 cols wide → 5 pixel rows → 2 cells, centred vertically
        assert_eq!(buf[(0, 3)].symbol(), " ");
        assert_eq!(buf[(0, 4)].symbol(), "▀");
        assert_eq!(buf[(19, 5)].symbol(), "▀");
        assert_eq!(buf[(0, 6)].symbol(), " ");
    }

    #[test]
    fn text_line_truncates() {
        let area = Rect::new(0, 0, 5, 1);
        let mut buf = Buffer::empty(area);
        TextLine { text: "FPS: 29.8 | Detector", fg: Color::White, bg: Color::DarkGray }
            .render(area, &mut buf);
        let line: String = (0..5).map(|x| buf[(x, 0)].symbol().to_string()).collect();
        assert_eq!(line, "FPS: ");
    }
}
