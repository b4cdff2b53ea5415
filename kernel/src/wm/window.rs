//! A single window (component K): the owning task, its title, geometry,
//! per-window RGBA surface, and event queue.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::ipc::MessageQueue;

use super::geometry::Rect;

pub const MAX_TITLE_LEN: usize = 255;

/// Message kinds, stable across builds: part of the syscall ABI.
pub const SYS_MSG_NULL: u32 = 0;
pub const SYS_MSG_KEYDOWN: u32 = 1;
pub const SYS_MSG_KEYUP: u32 = 2;
pub const SYS_MSG_SHOW: u32 = 3;
pub const SYS_MSG_HIDE: u32 = 4;
pub const SYS_MSG_REPAINT: u32 = 5;
pub const SYS_MSG_CLOSE: u32 = 6;
pub const SYS_MSG_MOVE: u32 = 7;
pub const SYS_MSG_RESIZE: u32 = 8;
pub const SYS_MSG_FOCUS_IN: u32 = 9;
pub const SYS_MSG_FOCUS_OUT: u32 = 10;
pub const SYS_MSG_MOUSEMOVE: u32 = 11;
pub const SYS_MSG_MOUSECLICK: u32 = 12;

/// A window: an owning task, its on-screen rectangle, z-order, and its own
/// RGBA backing surface the owner draws into before presenting.
pub struct Window {
    pub owner: u32,
    pub title: String,
    pub geometry: Rect,
    pub depth: u8,
    pub visible: bool,
    pub focus: bool,
    /// Packed `0x00RRGGBB` pixels, `width() * height()` long, resized on
    /// every geometry change so it always matches the current rectangle.
    pub surface: Vec<u32>,
    pub queue: MessageQueue,
}

impl Window {
    pub fn new(owner: u32, geometry: Rect, depth: u8) -> Self {
        let len = (geometry.width() * geometry.height()) as usize;
        Self {
            owner,
            title: String::new(),
            geometry,
            depth,
            visible: false,
            focus: false,
            surface: vec![0; len],
            queue: MessageQueue::new(),
        }
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.chars().take(MAX_TITLE_LEN).collect();
    }

    pub fn set_geometry(&mut self, geometry: Rect) {
        self.geometry = geometry;
        let len = (geometry.width() * geometry.height()) as usize;
        self.surface = vec![0; len];
    }

    fn in_bounds(&self, x: u32, y: u32) -> bool {
        x < self.geometry.width() && y < self.geometry.height()
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, color: u32) {
        if self.in_bounds(x, y) {
            let w = self.geometry.width();
            self.surface[(y * w + x) as usize] = color;
        }
    }

    pub fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u32) {
        // Bresenham, clipped per-pixel against the surface bounds.
        let (mut x0, mut y0) = (x0, y0);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            if x0 >= 0 && y0 >= 0 {
                self.put_pixel(x0 as u32, y0 as u32, color);
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    pub fn draw_rect(&mut self, x: i32, y: i32, w: u32, h: u32, color: u32) {
        self.draw_line(x, y, x + w as i32 - 1, y, color);
        self.draw_line(x, y + h as i32 - 1, x + w as i32 - 1, y + h as i32 - 1, color);
        self.draw_line(x, y, x, y + h as i32 - 1, color);
        self.draw_line(x + w as i32 - 1, y, x + w as i32 - 1, y + h as i32 - 1, color);
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, w: u32, h: u32, color: u32) {
        for row in y..y + h as i32 {
            for col in x..x + w as i32 {
                if row >= 0 && col >= 0 {
                    self.put_pixel(col as u32, row as u32, color);
                }
            }
        }
    }

    /// Draw each character of `text` as a fixed-size filled block; glyph
    /// rasterisation itself lives outside this core (see the PKF font
    /// rasteriser this crate hands blit surfaces to), so this paints
    /// placeholder cells sized like a monospace font.
    pub fn draw_text(&mut self, x: i32, y: i32, text: &str, color: u32) {
        const GLYPH_W: i32 = 8;
        const GLYPH_H: i32 = 8;
        for (i, ch) in text.chars().enumerate() {
            if ch == ' ' {
                continue;
            }
            self.fill_rect(x + i as i32 * GLYPH_W, y, GLYPH_W as u32 - 1, GLYPH_H as u32 - 1, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> Window {
        Window::new(1, Rect::from_pos_and_size(0, 0, 10, 10), 0)
    }

    #[test]
    fn title_is_capped_at_max_length() {
        let mut w = window();
        let long = "x".repeat(500);
        w.set_title(&long);
        assert_eq!(w.title.chars().count(), MAX_TITLE_LEN);
    }

    #[test]
    fn surface_resizes_with_geometry() {
        let mut w = window();
        assert_eq!(w.surface.len(), 100);
        w.set_geometry(Rect::from_pos_and_size(0, 0, 4, 4));
        assert_eq!(w.surface.len(), 16);
    }

    #[test]
    fn fill_rect_clips_to_surface_bounds() {
        let mut w = window();
        w.fill_rect(-2, -2, 5, 5, 0xff0000);
        assert_eq!(w.surface[0], 0xff0000);
    }
}
