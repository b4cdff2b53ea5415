//! Window manager (component K): a single framebuffer compositor shared by
//! every window-owning task, reached through the `window_*` syscalls.
//!
//! Screen geometry is normally handed to us by firmware through the
//! VideoCore mailbox interface rather than the device tree; probing that
//! mailbox is out of scope here, so [`init`] takes a best-effort look at a
//! `simple-framebuffer` node and otherwise falls back to a fixed default
//! resolution.

pub mod compositor;
pub mod geometry;
pub mod window;

use crate::dtb::DeviceTree;
use crate::error::KernelResult;
use crate::sync::GlobalState;

pub use compositor::Compositor;
pub use geometry::{Rect, MAX_HEIGHT, MAX_WIDTH, MIN_HEIGHT, MIN_WIDTH, POS_CENTERED, POS_DEFAULT};
pub use window::{
    Window, MAX_TITLE_LEN, SYS_MSG_CLOSE, SYS_MSG_FOCUS_IN, SYS_MSG_FOCUS_OUT, SYS_MSG_HIDE,
    SYS_MSG_KEYDOWN, SYS_MSG_KEYUP, SYS_MSG_MOUSECLICK, SYS_MSG_MOUSEMOVE, SYS_MSG_MOVE,
    SYS_MSG_NULL, SYS_MSG_REPAINT, SYS_MSG_RESIZE, SYS_MSG_SHOW,
};

const DEFAULT_SCREEN_WIDTH: u32 = 640;
const DEFAULT_SCREEN_HEIGHT: u32 = 480;

static WM: GlobalState<Compositor> = GlobalState::new();

/// Bring up the compositor. Looks for a `simple-framebuffer` node to size
/// the screen; falls back to [`DEFAULT_SCREEN_WIDTH`] x
/// [`DEFAULT_SCREEN_HEIGHT`] if the device tree carries none (the usual
/// case on a Pi, where the mailbox sets up the framebuffer after boot).
pub fn init(dt: &DeviceTree) -> KernelResult<()> {
    let (width, height) = probe_screen_size(dt).unwrap_or((DEFAULT_SCREEN_WIDTH, DEFAULT_SCREEN_HEIGHT));
    log::info!("window manager: {}x{} screen", width, height);
    let _ = WM.init(Compositor::new(width, height));
    Ok(())
}

fn probe_screen_size(dt: &DeviceTree) -> Option<(u32, u32)> {
    let fb = dt.find_compatible("simple-framebuffer")?;
    let width = fb.property("width")?.get_u32(0)?;
    let height = fb.property("height")?.get_u32(0)?;
    Some((width, height))
}

fn not_initialized<T>() -> KernelResult<T> {
    Err(crate::error::KernelError::NotInitialized { subsystem: "window manager" })
}

pub fn create_window(owner: u32, x: i32, y: i32, w: u32, h: u32) -> KernelResult<u32> {
    match WM.with_mut(|wm| wm.create_window(owner, x, y, w, h)) {
        Some(id) => Ok(id),
        None => not_initialized(),
    }
}

pub fn destroy_window(id: u32, pid: u32) -> KernelResult<()> {
    WM.with_mut(|wm| wm.destroy_window(id, pid)).unwrap_or_else(not_initialized)
}

pub fn set_visibility(id: u32, pid: u32, visible: bool) -> KernelResult<()> {
    WM.with_mut(|wm| wm.set_visibility(id, pid, visible)).unwrap_or_else(not_initialized)
}

pub fn set_title(id: u32, pid: u32, title: &str) -> KernelResult<()> {
    WM.with_mut(|wm| wm.set_title(id, pid, title)).unwrap_or_else(not_initialized)
}

pub fn set_geometry(id: u32, pid: u32, x: i32, y: i32, w: u32, h: u32) -> KernelResult<()> {
    WM.with_mut(|wm| wm.set_geometry(id, pid, x, y, w, h)).unwrap_or_else(not_initialized)
}

pub fn get_geometry(id: u32, pid: u32) -> KernelResult<(i32, i32, u32, u32)> {
    WM.with_mut(|wm| wm.get_geometry(id, pid)).unwrap_or_else(not_initialized)
}

pub fn present(id: u32, pid: u32) -> KernelResult<()> {
    WM.with_mut(|wm| wm.present(id, pid)).unwrap_or_else(not_initialized)
}

pub fn with_window_mut<R>(id: u32, pid: u32, f: impl FnOnce(&mut Window) -> R) -> KernelResult<R> {
    WM.with_mut(|wm| wm.with_window_mut(id, pid, f)).unwrap_or_else(not_initialized)
}

pub fn focus_window(id: u32) {
    WM.with_mut(|wm| wm.focus_window(id));
}

/// The window currently holding input focus, if any and if the compositor
/// has been brought up. Used by the gfx_draw_* syscalls, which paint onto
/// whichever window is focused rather than taking a window handle.
pub fn focused_window() -> Option<u32> {
    WM.with(|wm| wm.focused_window())?
}

/// Post a message to the currently focused window, if any. Used by the
/// input subsystem to deliver key and mouse events; a no-op if no window
/// has focus or the compositor has not been initialized yet.
pub fn post_to_focused(kind: u32, param1: u64, param2: u64) {
    WM.with_mut(|wm| {
        if let Some(id) = wm.focused_window() {
            wm.post_message(id, kind, param1, param2);
        }
    });
}
