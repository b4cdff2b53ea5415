//! Input routing (component J): keyboard and mouse drivers hand raw
//! scancodes and motion/button packets here, which translate them into
//! the window manager's message ABI and post the result to whichever
//! window currently has focus.
//!
//! Clock timestamps are attached by the window manager itself on
//! delivery (see [`crate::wm::compositor::Compositor::post_message`]),
//! so this module only needs to carry the keycode/modifier/button
//! payload.

pub mod keyboard;
pub mod mouse;

use spin::Mutex;

use crate::sync::GlobalState;

use keyboard::KeyboardState;
use mouse::MouseState;

static KEYBOARD: GlobalState<Mutex<KeyboardState>> = GlobalState::new();
static MOUSE: GlobalState<Mutex<MouseState>> = GlobalState::new();

/// Bring up the input subsystem. Must run before any driver delivers a
/// scancode or mouse packet; called once from
/// [`crate::arch::aarch64::boot::kernel_main`].
pub fn init() {
    let _ = KEYBOARD.init(Mutex::new(KeyboardState::new()));
    let _ = MOUSE.init(Mutex::new(MouseState::new()));
}

/// Feed a raw scancode and press/release flag from the keyboard driver.
/// Updates modifier/toggle state and posts SYS_MSG_KEYDOWN or
/// SYS_MSG_KEYUP, packed per the key-event encoding, to the focused
/// window.
pub fn handle_scancode(scancode: u16, pressed: bool) {
    let Some(event) = KEYBOARD.with_mut(|kb| kb.lock().handle_scancode(scancode, pressed)) else {
        return;
    };
    let kind = if pressed { crate::wm::SYS_MSG_KEYDOWN } else { crate::wm::SYS_MSG_KEYUP };
    crate::wm::post_to_focused(kind, event, 0);
}

/// Feed a relative motion packet from the mouse driver.
pub fn handle_motion(dx: i32, dy: i32) {
    MOUSE.with_mut(|m| m.lock().apply_motion(dx, dy));
    crate::wm::post_to_focused(crate::wm::window::SYS_MSG_MOUSEMOVE, dx as i64 as u64, dy as i64 as u64);
}

/// Feed a button press/release from the mouse driver.
pub fn handle_button(button: u8, pressed: bool) {
    let buttons = MOUSE.with_mut(|m| m.lock().apply_button(button, pressed));
    if let Some(buttons) = buttons {
        crate::wm::post_to_focused(crate::wm::window::SYS_MSG_MOUSECLICK, button as u64, buttons as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
