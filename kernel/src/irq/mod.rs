//! Interrupt controller abstraction (component H): picks between the
//! BCM2711 GICv2 and the BCM2837 legacy controller based on what the
//! device tree's `interrupt-controller` node declares itself compatible
//! with, then exposes one board-independent enable/disable/dispatch API.

mod gic;
mod legacy;

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::dtb::DeviceTree;
use crate::error::{KernelError, KernelResult};
use crate::sync::GlobalState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqNumber(pub u32);

/// A registered handler reports whether it recognized and serviced the
/// interrupt. `dispatch_pending` stops walking an IRQ's handler list as
/// soon as one returns `true`.
pub type IrqHandler = fn(IrqNumber) -> bool;

/// Opaque token identifying one handler registration, returned by
/// [`register_handler`] so a caller can later unregister precisely that
/// registration without disturbing any other handler sharing the IRQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerHandle(u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

enum Controller {
    Gic(gic::Gic),
    Legacy(legacy::LegacyController),
}

impl Controller {
    fn enable(&self, id: u32) {
        match self {
            Self::Gic(g) => g.enable(id),
            Self::Legacy(l) => l.enable(id),
        }
    }

    fn disable(&self, id: u32) {
        match self {
            Self::Gic(g) => g.disable(id),
            Self::Legacy(l) => l.disable(id),
        }
    }

    fn acknowledge(&self) -> Option<u32> {
        match self {
            Self::Gic(g) => g.acknowledge(),
            Self::Legacy(l) => l.acknowledge(),
        }
    }

    fn eoi(&self, id: u32) {
        match self {
            Self::Gic(g) => g.eoi(id),
            Self::Legacy(l) => l.eoi(id),
        }
    }
}

struct IrqManager {
    controller: Controller,
    /// `{irq -> list of (handle, callback)}`. Many handlers may share an
    /// IRQ; dispatch walks the list in registration order and stops at the
    /// first one that reports the interrupt handled.
    #[cfg(feature = "alloc")]
    handlers: BTreeMap<u32, Vec<(HandlerHandle, IrqHandler)>>,
    dispatch_count: u64,
}

static IRQ_MANAGER: GlobalState<Mutex<IrqManager>> = GlobalState::new();

/// Probe the device tree for a GICv2 (`arm,gic-400`) or legacy
/// (`brcm,bcm2836-armctrl-ic`) interrupt controller and bring it up.
pub fn init(dt: &DeviceTree<'_>) -> KernelResult<()> {
    let controller = if let Some(node) = dt.find_compatible("arm,gic-400") {
        let gicd = node
            .property("reg")
            .and_then(|p| p.get_u64_or_u32(0))
            .ok_or(KernelError::DtbError(crate::error::DtbError::PropertyNotFound))? as usize;
        // GICv2's `reg` packs (GICD base, GICD size, GICC base, GICC size);
        // the second address cell pair starts after one (base, size) pair.
        let reg = node.property("reg").unwrap();
        let gicc = reg.get_u64_or_u32(2).unwrap_or((gicd + 0x1_0000) as u64) as usize;
        Controller::Gic(gic::Gic::init(gicd, gicc))
    } else if let Some(node) = dt.find_compatible("brcm,bcm2836-armctrl-ic") {
        let base = node
            .property("reg")
            .and_then(|p| p.get_u64_or_u32(0))
            .ok_or(KernelError::DtbError(crate::error::DtbError::PropertyNotFound))? as usize;
        Controller::Legacy(legacy::LegacyController::init(base))
    } else {
        return Err(KernelError::NotFound {
            resource: "interrupt controller",
        });
    };

    IRQ_MANAGER.init(Mutex::new(IrqManager {
        controller,
        #[cfg(feature = "alloc")]
        handlers: BTreeMap::new(),
        dispatch_count: 0,
    }));
    Ok(())
}

/// Append `handler` to `irq`'s handler list. Multiple handlers may share an
/// IRQ; all are tried, in registration order, until one reports handled.
/// Returns a handle identifying this specific registration.
#[cfg(feature = "alloc")]
pub fn register_handler(irq: IrqNumber, handler: IrqHandler) -> KernelResult<HandlerHandle> {
    let handle = HandlerHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
    IRQ_MANAGER
        .with_mut(|mtx| {
            mtx.lock().handlers.entry(irq.0).or_default().push((handle, handler));
        })
        .ok_or(KernelError::NotInitialized {
            subsystem: "irq manager",
        })?;
    Ok(handle)
}

/// Remove a single handler registration previously returned by
/// [`register_handler`], leaving any other handlers on the same IRQ intact.
#[cfg(feature = "alloc")]
pub fn unregister_handler(irq: IrqNumber, handle: HandlerHandle) -> KernelResult<()> {
    IRQ_MANAGER
        .with_mut(|mtx| {
            if let Some(list) = mtx.lock().handlers.get_mut(&irq.0) {
                list.retain(|(h, _)| *h != handle);
            }
        })
        .ok_or(KernelError::NotInitialized {
            subsystem: "irq manager",
        })
}

pub fn enable_irq(irq: IrqNumber) -> KernelResult<()> {
    IRQ_MANAGER
        .with(|mtx| mtx.lock().controller.enable(irq.0))
        .ok_or(KernelError::NotInitialized {
            subsystem: "irq manager",
        })
}

pub fn disable_irq(irq: IrqNumber) -> KernelResult<()> {
    IRQ_MANAGER
        .with(|mtx| mtx.lock().controller.disable(irq.0))
        .ok_or(KernelError::NotInitialized {
            subsystem: "irq manager",
        })
}

/// Acknowledge the highest-priority pending interrupt, invoke its
/// registered handlers in order until one reports the interrupt handled
/// (spurious or unregistered IRQs are silently dropped), and signal
/// end-of-interrupt. Called from [`crate::trap`] on every IRQ exception.
pub fn dispatch_pending() {
    IRQ_MANAGER.with_mut(|mtx| {
        let mut mgr = mtx.lock();
        let Some(id) = mgr.controller.acknowledge() else {
            return;
        };
        mgr.dispatch_count += 1;
        #[cfg(feature = "alloc")]
        if let Some(list) = mgr.handlers.get(&id) {
            for &(_, handler) in list.iter() {
                if handler(IrqNumber(id)) {
                    break;
                }
            }
        }
        mgr.controller.eoi(id);
    });
}

pub fn dispatch_count() -> u64 {
    IRQ_MANAGER.with(|mtx| mtx.lock().dispatch_count).unwrap_or(0)
}
