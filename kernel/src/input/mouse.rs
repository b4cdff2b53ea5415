//! Mouse motion and button tracking.
//!
//! The driver delivers relative motion deltas and individual button
//! press/release events; this module only tracks which buttons are
//! currently held so a click event can report the full button mask
//! alongside the button that just changed.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MouseButtons: u8 {
        const LEFT   = 1 << 0;
        const RIGHT  = 1 << 1;
        const MIDDLE = 1 << 2;
    }
}

fn button_flag(button: u8) -> Option<MouseButtons> {
    match button {
        0 => Some(MouseButtons::LEFT),
        1 => Some(MouseButtons::RIGHT),
        2 => Some(MouseButtons::MIDDLE),
        _ => None,
    }
}

pub struct MouseState {
    buttons: MouseButtons,
}

impl MouseState {
    pub fn new() -> Self {
        Self { buttons: MouseButtons::empty() }
    }

    /// Record relative motion. The window manager attaches the delta
    /// straight to SYS_MSG_MOUSEMOVE; there's no cursor position tracked
    /// in the kernel since the compositor has no cursor sprite.
    pub fn apply_motion(&mut self, _dx: i32, _dy: i32) {}

    /// Record a button state change and return the full button mask to
    /// report, or `None` if `button` is out of range.
    pub fn apply_button(&mut self, button: u8, pressed: bool) -> Option<u8> {
        let flag = button_flag(button)?;
        self.buttons.set(flag, pressed);
        Some(self.buttons.bits())
    }
}

impl Default for MouseState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_mask_accumulates_held_buttons() {
        let mut m = MouseState::new();
        m.apply_button(0, true);
        let mask = m.apply_button(1, true).unwrap();
        assert_eq!(mask, MouseButtons::LEFT.bits() | MouseButtons::RIGHT.bits());
    }

    #[test]
    fn releasing_one_button_keeps_the_other() {
        let mut m = MouseState::new();
        m.apply_button(0, true);
        m.apply_button(1, true);
        let mask = m.apply_button(0, false).unwrap();
        assert_eq!(mask, MouseButtons::RIGHT.bits());
    }

    #[test]
    fn unknown_button_is_ignored() {
        let mut m = MouseState::new();
        assert!(m.apply_button(9, true).is_none());
    }
}
