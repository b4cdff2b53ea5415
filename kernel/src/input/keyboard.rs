//! Keyboard scancode translation and modifier tracking.
//!
//! Scancodes arrive from a PS/2 or UART-tunnelled keyboard driver as a
//! raw code plus a press/release flag; set-1 make/break encoding (where
//! release = make | 0x80) is left to the driver, which is expected to
//! hand us a bare keycode and an explicit `pressed` bool instead.

bitflags::bitflags! {
    /// Modifier bits as packed into a key event (spec bit positions
    /// 20-25); `GUI` is tracked for completeness but has no bit in the
    /// packed encoding and is therefore not represented here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Modifiers: u32 {
        const CTRL   = 1 << 20;
        const SHIFT  = 1 << 21;
        const ALT    = 1 << 22;
        const NUM    = 1 << 23;
        const CAPS   = 1 << 24;
        const SCROLL = 1 << 25;
    }
}

const KEYCODE_MASK: u32 = 0xFFFF;
const PRESS_BIT: u32 = 1 << 30;
const RELEASE_BIT: u32 = 1 << 31;

/// Pack a keycode, modifier state, and press/release flag into a single
/// 64-bit key event per the spec's wire encoding.
pub fn pack_key_event(keycode: u16, modifiers: Modifiers, pressed: bool) -> u64 {
    let mut word = keycode as u32 & KEYCODE_MASK;
    word |= modifiers.bits();
    word |= if pressed { PRESS_BIT } else { RELEASE_BIT };
    word as u64
}

/// Which physical side (left/right) a modifier key reports, so the two
/// can be combined into one logical modifier without one side's release
/// clearing a modifier the other side is still holding down.
#[derive(Debug, Default, Clone, Copy)]
struct SidedCounter {
    left: bool,
    right: bool,
}

impl SidedCounter {
    fn set(&mut self, right_side: bool, held: bool) {
        if right_side {
            self.right = held;
        } else {
            self.left = held;
        }
    }

    fn active(&self) -> bool {
        self.left || self.right
    }
}

/// Keycodes this module recognizes as modifier keys, tagged with which
/// logical modifier and side they report. Anything else is an ordinary
/// key passed straight through as `keycode`.
fn modifier_key(keycode: u16) -> Option<(ModifierKind, bool)> {
    match keycode {
        0x1D => Some((ModifierKind::Ctrl, false)),
        0x9D => Some((ModifierKind::Ctrl, true)),
        0x2A => Some((ModifierKind::Shift, false)),
        0x36 => Some((ModifierKind::Shift, true)),
        0x38 => Some((ModifierKind::Alt, false)),
        0xB8 => Some((ModifierKind::Alt, true)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum ModifierKind {
    Ctrl,
    Shift,
    Alt,
}

const CAPS_LOCK_KEYCODE: u16 = 0x3A;
const NUM_LOCK_KEYCODE: u16 = 0x45;
const SCROLL_LOCK_KEYCODE: u16 = 0x46;

/// Tracks held modifier keys (with left/right combining) and the
/// caps/num/scroll toggle bits.
pub struct KeyboardState {
    ctrl: SidedCounter,
    shift: SidedCounter,
    alt: SidedCounter,
    caps: bool,
    num: bool,
    scroll: bool,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self {
            ctrl: SidedCounter::default(),
            shift: SidedCounter::default(),
            alt: SidedCounter::default(),
            caps: false,
            num: false,
            scroll: false,
        }
    }

    fn modifiers(&self) -> Modifiers {
        let mut m = Modifiers::empty();
        m.set(Modifiers::CTRL, self.ctrl.active());
        m.set(Modifiers::SHIFT, self.shift.active());
        m.set(Modifiers::ALT, self.alt.active());
        m.set(Modifiers::CAPS, self.caps);
        m.set(Modifiers::NUM, self.num);
        m.set(Modifiers::SCROLL, self.scroll);
        m
    }

    /// Update modifier/toggle state for `scancode` and return the packed
    /// key event to post, or `None` if the key is consumed purely as
    /// internal state (currently every key still produces an event; this
    /// stays `Option` so future driver-internal-only codes have a place
    /// to resolve to silence).
    pub fn handle_scancode(&mut self, keycode: u16, pressed: bool) -> Option<u64> {
        if let Some((kind, right_side)) = modifier_key(keycode) {
            let counter = match kind {
                ModifierKind::Ctrl => &mut self.ctrl,
                ModifierKind::Shift => &mut self.shift,
                ModifierKind::Alt => &mut self.alt,
            };
            counter.set(right_side, pressed);
        } else if pressed {
            match keycode {
                CAPS_LOCK_KEYCODE => self.caps = !self.caps,
                NUM_LOCK_KEYCODE => self.num = !self.num,
                SCROLL_LOCK_KEYCODE => self.scroll = !self.scroll,
                _ => {}
            }
        }
        Some(pack_key_event(keycode, self.modifiers(), pressed))
    }
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_key_has_no_modifiers() {
        let mut kb = KeyboardState::new();
        let event = kb.handle_scancode(0x1E, true).unwrap();
        assert_eq!(event & 0xFFFF, 0x1E);
        assert_ne!(event as u32 & (1 << 30), 0);
    }

    #[test]
    fn left_and_right_ctrl_combine() {
        let mut kb = KeyboardState::new();
        kb.handle_scancode(0x1D, true); // ctrl left down
        let event = kb.handle_scancode(0x9D, true).unwrap(); // ctrl right down
        assert_ne!(event as u32 & Modifiers::CTRL.bits(), 0);
        // releasing the right ctrl must not clear the modifier while left
        // is still held.
        let event = kb.handle_scancode(0x9D, false).unwrap();
        assert_ne!(event as u32 & Modifiers::CTRL.bits(), 0);
    }

    #[test]
    fn caps_lock_toggles_on_press_only() {
        let mut kb = KeyboardState::new();
        kb.handle_scancode(CAPS_LOCK_KEYCODE, true);
        assert!(kb.caps);
        kb.handle_scancode(CAPS_LOCK_KEYCODE, false);
        assert!(kb.caps, "release must not toggle caps lock again");
        kb.handle_scancode(CAPS_LOCK_KEYCODE, true);
        assert!(!kb.caps);
    }

    #[test]
    fn release_sets_release_bit_not_press_bit() {
        let mut kb = KeyboardState::new();
        let event = kb.handle_scancode(0x1E, false).unwrap();
        assert_eq!(event as u32 & (1 << 30), 0);
        assert_ne!(event as u32 & (1 << 31), 0);
    }
}
