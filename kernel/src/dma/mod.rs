//! BCM DMA controller (component H): one global enable/channel-mask bank
//! plus up to seven independently programmable channels, each chained
//! through a linked list of control blocks describing a transfer.

use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::dtb::DeviceTree;
use crate::error::{KernelError, KernelResult};
use crate::mm::chunk::Buffer;
use crate::mm::KERNEL_BASE;
use crate::sync::GlobalState;

/// Per-channel register window size.
const CHANNEL_REGS_SIZE: usize = 0x100;
/// Global enable bits for every channel, relative to the controller base.
const ENABLE: usize = 0xFF0;

const CS_ACTIVE: u32 = 1 << 0;
const CS_ERROR: u32 = 1 << 8;
const CS_WAIT_FOR_WRITE: u32 = 1 << 28;
const CS_DIS_DEBUG: u32 = 1 << 29;
const CS_RESET: u32 = 1 << 31;
const CS_PANIC_PRIORITY_SHIFT: u32 = 20;
const CS_PRIORITY_SHIFT: u32 = 16;

const REG_CS: usize = 0x00;
const REG_CONBLK_AD: usize = 0x04;

const TI_TD_MODE: u32 = 1 << 1;
const TI_WAIT_RESP: u32 = 1 << 3;
const TI_DEST_INC: u32 = 1 << 4;
const TI_SRC_INC: u32 = 1 << 8;
const TI_NO_WIDE_BURSTS: u32 = 1 << 26;

/// A chainable DMA transfer descriptor. Must live in DMA-visible (bus
/// addressable) memory; allocate it inside a [`Buffer`].
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy)]
pub struct ControlBlock {
    transfer_info: u32,
    src: u32,
    dst: u32,
    length: u32,
    stride: u32,
    next_cb: u32,
    _reserved: [u32; 2],
}

impl ControlBlock {
    /// A flat, linear copy of `length` bytes.
    pub fn memcpy(src_bus: u32, dst_bus: u32, length: u32) -> Self {
        Self {
            transfer_info: TI_SRC_INC | TI_DEST_INC | TI_WAIT_RESP | TI_NO_WIDE_BURSTS,
            src: src_bus,
            dst: dst_bus,
            length,
            stride: 0,
            next_cb: 0,
            _reserved: [0; 2],
        }
    }

    /// A 2-D copy: `nb_lines` lines of `line_len` bytes each, advancing by
    /// `src_stride`/`dst_stride` bytes between the end of one line and the
    /// start of the next (not the pitch).
    pub fn memcpy_2d(
        src_bus: u32,
        dst_bus: u32,
        line_len: u16,
        nb_lines: u16,
        src_stride: u16,
        dst_stride: u16,
    ) -> Self {
        Self {
            transfer_info: TI_SRC_INC | TI_DEST_INC | TI_WAIT_RESP | TI_TD_MODE | TI_NO_WIDE_BURSTS,
            src: src_bus,
            dst: dst_bus,
            length: ((nb_lines as u32) << 16) | line_len as u32,
            stride: ((dst_stride as u32) << 16) | src_stride as u32,
            next_cb: 0,
            _reserved: [0; 2],
        }
    }

    /// Chain `next` after this block.
    pub fn link_to(&mut self, next_bus_addr: u32) {
        self.next_cb = next_bus_addr;
    }
}

struct DmaState {
    base: usize,
    /// Bit `i` set means channel `i` is free.
    free_channels: u32,
}

static DMA_STATE: GlobalState<DmaState> = GlobalState::new();

/// Probe the device tree for the `brcm,bcm2835-dma` controller and its
/// `brcm,dma-channel-mask` (channels the kernel, rather than firmware, is
/// allowed to claim).
pub fn init(dt: &DeviceTree<'_>) -> KernelResult<()> {
    let node = dt
        .find_compatible("brcm,bcm2835-dma")
        .ok_or(KernelError::NotFound { resource: "DMA controller" })?;
    let base = node
        .property("reg")
        .and_then(|p| p.get_u64_or_u32(0))
        .ok_or(KernelError::DtbError(crate::error::DtbError::PropertyNotFound))? as usize;
    let mask = node
        .property("brcm,dma-channel-mask")
        .and_then(|p| p.get_u32(0))
        .ok_or(KernelError::DtbError(crate::error::DtbError::PropertyNotFound))?;

    DMA_STATE
        .init(DmaState {
            base,
            free_channels: mask,
        })
        .map_err(|_| KernelError::AlreadyExists {
            resource: "dma controller",
            id: 0,
        })
}

fn reg_read(addr: usize) -> u32 {
    // SAFETY: `addr` always lands inside the DMA controller's MMIO window,
    // at an offset this module owns.
    unsafe { ptr::read_volatile(addr as *const u32) }
}

fn reg_write(addr: usize, value: u32) {
    // SAFETY: see `reg_read`.
    unsafe { ptr::write_volatile(addr as *mut u32, value) }
}

/// One claimed DMA channel. Dropping it disables and releases the channel
/// back to the free pool.
pub struct Channel {
    id: u8,
    base: usize,
    ctrl_base: usize,
}

/// Claim an unused channel, preferring the highest-numbered free one (the
/// lower-numbered channels are more likely to be claimed by firmware for
/// its own use, e.g. channels 0 and 2 for VideoCore).
pub fn allocate_channel() -> KernelResult<Channel> {
    DMA_STATE
        .with_mut(|state| {
            for i in (0..7u8).rev() {
                if state.free_channels & (1 << i) != 0 {
                    state.free_channels &= !(1 << i);
                    let chan = Channel {
                        id: i,
                        base: state.base,
                        ctrl_base: state.base + i as usize * CHANNEL_REGS_SIZE,
                    };
                    set_channel_enable(state.base, i, true);
                    chan.reset();
                    return Ok(chan);
                }
            }
            Err(KernelError::ResourceExhausted { resource: "dma channels" })
        })
        .unwrap_or(Err(KernelError::NotInitialized { subsystem: "dma" }))
}

fn set_channel_enable(ctrl_base: usize, id: u8, enable: bool) {
    let bit = 1u32 << id;
    let cur = reg_read(ctrl_base + ENABLE);
    if enable {
        reg_write(ctrl_base + ENABLE, cur | bit);
    } else {
        reg_write(ctrl_base + ENABLE, cur & !bit);
    }
}

impl Channel {
    /// Reset the channel and wait for the reset bit to self-clear.
    pub fn reset(&self) {
        let cs = reg_read(self.ctrl_base + REG_CS);
        reg_write(self.ctrl_base + REG_CS, cs | CS_RESET);
        while reg_read(self.ctrl_base + REG_CS) & CS_RESET != 0 {
            core::hint::spin_loop();
        }
    }

    /// Start executing the control block chain rooted at `cb_bus_addr`
    /// (the bus address of a [`ControlBlock`] living inside a [`Buffer`]).
    pub fn start(&self, cb_bus_addr: u32) {
        reg_write(self.ctrl_base + REG_CONBLK_AD, cb_bus_addr);
        reg_write(
            self.ctrl_base + REG_CS,
            CS_WAIT_FOR_WRITE | CS_DIS_DEBUG | CS_ACTIVE | (15 << CS_PANIC_PRIORITY_SHIFT) | (8 << CS_PRIORITY_SHIFT),
        );
    }

    pub fn is_busy(&self) -> bool {
        reg_read(self.ctrl_base + REG_CS) & CS_ACTIVE != 0
    }

    /// Spin until the channel's active bit clears, then report whether the
    /// controller flagged an error.
    pub fn wait(&self) -> KernelResult<()> {
        while self.is_busy() {
            core::hint::spin_loop();
        }
        if reg_read(self.ctrl_base + REG_CS) & CS_ERROR != 0 {
            Err(KernelError::Internal { msg: "dma transfer error" })
        } else {
            Ok(())
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        set_channel_enable(self.base, self.id, false);
        DMA_STATE.with_mut(|state| state.free_channels |= 1 << self.id);
    }
}

/// Allocate a DMA-visible buffer sized to hold one [`ControlBlock`] and
/// write `cb` into it, returning the buffer and its bus address.
///
/// Each call claims a fresh slot out of the control-block scratch range, so
/// a caller building a multi-block chain (via [`ControlBlock::link_to`])
/// can allocate several of these live at once without their mappings
/// colliding.
pub fn control_block_buffer(cb: ControlBlock) -> KernelResult<(Buffer, u32)> {
    let slot = CB_VA_CURSOR.fetch_add(1, Ordering::Relaxed) % CB_VA_SLOTS;
    let va = CB_VA_BASE + slot * CB_SLOT_SIZE;
    let buf = Buffer::alloc(core::mem::size_of::<ControlBlock>(), va)?;
    // SAFETY: the buffer was just allocated and is exclusively owned here.
    unsafe {
        (buf.as_ptr() as *mut ControlBlock).write(cb);
    }
    let bus = buf.bus_addr() as u32;
    Ok((buf, bus))
}

/// Scratch virtual range for short-lived control-block buffers, below the
/// DMA data buffer range. Slots are page-sized (a control block is 32
/// bytes but [`Buffer::alloc`] always maps whole pages) and handed out
/// round-robin; a caller holding more than [`CB_VA_SLOTS`] buffers alive
/// at once will reuse a mapping still in use by an older one.
const CB_VA_BASE: usize = KERNEL_BASE + 0x6000_0000;
const CB_SLOT_SIZE: usize = crate::mm::PAGE_SIZE;
const CB_VA_SLOTS: usize = 64;
static CB_VA_CURSOR: AtomicUsize = AtomicUsize::new(0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_block_memcpy_sets_increment_flags() {
        let cb = ControlBlock::memcpy(0x1000, 0x2000, 64);
        assert_eq!(cb.transfer_info & TI_SRC_INC, TI_SRC_INC);
        assert_eq!(cb.transfer_info & TI_DEST_INC, TI_DEST_INC);
        assert_eq!(cb.transfer_info & TI_TD_MODE, 0);
        assert_eq!(cb.length, 64);
    }

    #[test]
    fn control_block_2d_packs_length_and_stride() {
        let cb = ControlBlock::memcpy_2d(0x1000, 0x2000, 640, 480, 16, 32);
        assert_eq!(cb.transfer_info & TI_TD_MODE, TI_TD_MODE);
        assert_eq!(cb.length & 0xFFFF, 640);
        assert_eq!(cb.length >> 16, 480);
        assert_eq!(cb.stride & 0xFFFF, 16);
        assert_eq!(cb.stride >> 16, 32);
    }

    #[test]
    fn link_to_sets_next_cb() {
        let mut cb = ControlBlock::memcpy(0, 0, 1);
        cb.link_to(0xDEAD_0000);
        assert_eq!(cb.next_cb, 0xDEAD_0000);
    }
}
