//! The compositor (component K): owns the screen surface and depth buffer,
//! and every window lifecycle/geometry/focus operation the window_*
//! syscalls bottom out in.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::{GfxError, KernelError, KernelResult};
use crate::ipc::Message;

use super::geometry::Rect;
use super::window::{self, Window};

pub struct Compositor {
    screen_width: u32,
    screen_height: u32,
    screen: Vec<u32>,
    depth_buffer: Vec<u8>,
    windows: BTreeMap<u32, Window>,
    /// Creation order, used only to pick a fallback focus target.
    order: Vec<u32>,
    focus: Option<u32>,
    next_id: u32,
    next_depth: u8,
    cascade: (i32, i32),
}

impl Compositor {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        let pixels = (screen_width * screen_height) as usize;
        Self {
            screen_width,
            screen_height,
            screen: vec![0; pixels],
            depth_buffer: vec![0; pixels],
            windows: BTreeMap::new(),
            order: Vec::new(),
            focus: None,
            next_id: 1,
            next_depth: 1,
            cascade: (50, 50),
        }
    }

    fn owns(&self, id: u32, pid: u32) -> KernelResult<&Window> {
        self.windows
            .get(&id)
            .filter(|w| w.owner == pid)
            .ok_or(KernelError::GfxError(GfxError::InvalidWindow { id }))
    }

    fn owns_mut(&mut self, id: u32, pid: u32) -> KernelResult<&mut Window> {
        let owner_matches = self.windows.get(&id).map(|w| w.owner == pid).unwrap_or(false);
        if !owner_matches {
            return Err(GfxError::InvalidWindow { id }.into());
        }
        Ok(self.windows.get_mut(&id).unwrap())
    }

    pub fn create_window(&mut self, owner: u32, x: i32, y: i32, w: u32, h: u32) -> u32 {
        let geometry = Rect::resolve(x, y, w, h, self.screen_width, self.screen_height, self.cascade);
        let id = self.next_id;
        self.next_id += 1;
        let depth = self.next_depth;
        self.next_depth = self.next_depth.saturating_add(1);
        self.windows.insert(id, Window::new(owner, geometry, depth));
        self.order.push(id);
        self.cascade = (
            (self.cascade.0 + 30) % self.screen_width.max(1) as i32,
            (self.cascade.1 + 30) % self.screen_height.max(1) as i32,
        );
        id
    }

    pub fn destroy_window(&mut self, id: u32, pid: u32) -> KernelResult<()> {
        self.owns(id, pid)?;
        self.windows.remove(&id);
        self.order.retain(|&w| w != id);
        if self.focus == Some(id) {
            self.focus = None;
            if let Some(&next) = self.order.first() {
                self.focus_window(next);
            }
        }
        Ok(())
    }

    pub fn set_visibility(&mut self, id: u32, pid: u32, visible: bool) -> KernelResult<()> {
        self.owns(id, pid)?;
        let already = self.windows[&id].visible;
        if already == visible {
            return Ok(());
        }
        self.windows.get_mut(&id).unwrap().visible = visible;
        if visible {
            if self.focus.is_none() {
                self.focus_window(id);
            }
        } else if self.focus == Some(id) {
            self.unfocus_window(id);
        }
        let kind = if visible { window::SYS_MSG_SHOW } else { window::SYS_MSG_HIDE };
        self.post_message(id, kind, 0, 0);
        Ok(())
    }

    pub fn set_title(&mut self, id: u32, pid: u32, title: &str) -> KernelResult<()> {
        self.owns_mut(id, pid)?.set_title(title);
        Ok(())
    }

    pub fn set_geometry(&mut self, id: u32, pid: u32, x: i32, y: i32, w: u32, h: u32) -> KernelResult<()> {
        self.owns(id, pid)?;
        let rect = Rect::resolve(x, y, w, h, self.screen_width, self.screen_height, self.cascade);
        let old_rect = self.windows[&id].geometry;
        self.windows.get_mut(&id).unwrap().set_geometry(rect);

        let moved = old_rect.x() != rect.x() || old_rect.y() != rect.y();
        let resized = old_rect.width() != rect.width() || old_rect.height() != rect.height();
        if moved {
            self.post_message(id, window::SYS_MSG_MOVE, rect.x() as u64, rect.y() as u64);
        }
        if resized {
            self.post_message(id, window::SYS_MSG_RESIZE, rect.width() as u64, rect.height() as u64);
        }
        self.clear_background(old_rect);
        Ok(())
    }

    pub fn get_geometry(&self, id: u32, pid: u32) -> KernelResult<(i32, i32, u32, u32)> {
        let w = self.owns(id, pid)?;
        Ok((w.geometry.x(), w.geometry.y(), w.geometry.width(), w.geometry.height()))
    }

    pub fn with_window_mut<R>(&mut self, id: u32, pid: u32, f: impl FnOnce(&mut Window) -> R) -> KernelResult<R> {
        Ok(f(self.owns_mut(id, pid)?))
    }

    /// Blit a window's surface onto the screen with a per-pixel depth test,
    /// nearest-neighbour resampling if the surface size ever drifts from the
    /// window's screen rectangle.
    pub fn present(&mut self, id: u32, pid: u32) -> KernelResult<()> {
        self.owns(id, pid)?;
        let w = &self.windows[&id];
        if !w.visible {
            return Ok(());
        }
        let rect = w.geometry;
        let (src_w, src_h) = (rect.width().max(1), rect.height().max(1));
        let (dst_x, dst_y) = (rect.x().max(0) as u32, rect.y().max(0) as u32);
        let depth = w.depth;

        for row in 0..src_h {
            let screen_y = dst_y + row;
            if screen_y >= self.screen_height {
                break;
            }
            for col in 0..src_w {
                let screen_x = dst_x + col;
                if screen_x >= self.screen_width {
                    break;
                }
                let depth_idx = (screen_y * self.screen_width + screen_x) as usize;
                if self.depth_buffer[depth_idx] > depth {
                    continue;
                }
                let src_x = col * w.geometry.width().max(1) / src_w;
                let src_y = row * w.geometry.height().max(1) / src_h;
                let src_idx = (src_y * w.geometry.width() + src_x) as usize;
                self.screen[depth_idx] = w.surface.get(src_idx).copied().unwrap_or(0);
                self.depth_buffer[depth_idx] = depth;
            }
        }
        Ok(())
    }

    /// Reset the depth buffer over a window's vacated rect so whatever sits
    /// underneath becomes paintable again; the next `present()` pass repaints
    /// it. The rect is exactly where the window itself just painted, so its
    /// depth there is never 0 -- the reset must be unconditional.
    fn clear_background(&mut self, rect: Rect) {
        for y in rect.top().max(0)..rect.bottom().min(self.screen_height as i32) {
            for x in rect.left().max(0)..rect.right().min(self.screen_width as i32) {
                let idx = (y as u32 * self.screen_width + x as u32) as usize;
                self.depth_buffer[idx] = 0;
                self.screen[idx] = 0x00ff_ffff;
            }
        }
    }

    pub fn focus_window(&mut self, id: u32) {
        if self.focus == Some(id) {
            return;
        }
        if let Some(prev) = self.focus.take() {
            self.post_message(prev, window::SYS_MSG_FOCUS_OUT, 0, 0);
            if let Some(w) = self.windows.get_mut(&prev) {
                w.focus = false;
            }
        }
        self.focus = Some(id);
        if let Some(w) = self.windows.get_mut(&id) {
            w.focus = true;
        }
        self.post_message(id, window::SYS_MSG_FOCUS_IN, 0, 0);
    }

    fn unfocus_window(&mut self, id: u32) {
        if self.focus != Some(id) {
            return;
        }
        self.post_message(id, window::SYS_MSG_FOCUS_OUT, 0, 0);
        if let Some(w) = self.windows.get_mut(&id) {
            w.focus = false;
        }
        self.focus = None;
        if let Some(&next) = self.order.iter().find(|&&w| w != id && self.windows[&w].visible) {
            self.focus_window(next);
        }
    }

    pub fn focused_window(&self) -> Option<u32> {
        self.focus
    }

    pub fn post_message(&mut self, id: u32, kind: u32, param1: u64, param2: u64) {
        let timestamp = crate::timer::get_uptime_ms() as u64;
        if let Some(w) = self.windows.get(&id) {
            let _ = w.queue.enqueue(Message { kind, data: [timestamp, param1, param2, 0] });
        }
    }

    pub fn post_message_all(&mut self, kind: u32, param1: u64, param2: u64) {
        let timestamp = crate::timer::get_uptime_ms() as u64;
        for w in self.windows.values() {
            let _ = w.queue.enqueue(Message { kind, data: [timestamp, param1, param2, 0] });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_visible_window_gets_focus() {
        let mut c = Compositor::new(640, 480);
        let id = c.create_window(1, 0, 0, 100, 100);
        c.set_visibility(id, 1, true).unwrap();
        assert_eq!(c.focused_window(), Some(id));
    }

    #[test]
    fn destroying_focused_window_reassigns_focus() {
        let mut c = Compositor::new(640, 480);
        let a = c.create_window(1, 0, 0, 50, 50);
        let b = c.create_window(1, 0, 0, 50, 50);
        c.set_visibility(a, 1, true).unwrap();
        c.set_visibility(b, 1, true).unwrap();
        c.destroy_window(a, 1).unwrap();
        assert_eq!(c.focused_window(), Some(b));
    }

    #[test]
    fn other_owner_cannot_touch_window() {
        let mut c = Compositor::new(640, 480);
        let id = c.create_window(1, 0, 0, 50, 50);
        assert!(c.set_visibility(id, 2, true).is_err());
    }

    #[test]
    fn present_writes_into_the_depth_tested_screen() {
        let mut c = Compositor::new(4, 4);
        let id = c.create_window(1, 0, 0, 2, 2);
        c.set_visibility(id, 1, true).unwrap();
        c.with_window_mut(id, 1, |w| w.fill_rect(0, 0, 2, 2, 0xabcdef)).unwrap();
        c.present(id, 1).unwrap();
        assert_eq!(c.screen[0], 0xabcdef);
    }

    #[test]
    fn higher_depth_window_wins_the_pixel() {
        let mut c = Compositor::new(4, 4);
        let low = c.create_window(1, 0, 0, 2, 2);
        let high = c.create_window(1, 0, 0, 2, 2);
        c.set_visibility(low, 1, true).unwrap();
        c.set_visibility(high, 1, true).unwrap();
        c.with_window_mut(low, 1, |w| w.fill_rect(0, 0, 2, 2, 0x1)).unwrap();
        c.with_window_mut(high, 1, |w| w.fill_rect(0, 0, 2, 2, 0x2)).unwrap();
        c.present(high, 1).unwrap();
        c.present(low, 1).unwrap();
        assert_eq!(c.screen[0], 0x2);
    }
}
