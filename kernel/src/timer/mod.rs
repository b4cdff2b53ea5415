//! High-resolution timer management.
//!
//! This module provides a software timer wheel that sits above the BCM
//! system timer driver in [`crate::arch::aarch64::systimer`]. It supports
//! both one-shot and periodic timers with millisecond granularity, using a
//! hierarchical timer wheel with 256 slots for efficient O(1) insertion and
//! expiration.
//!
//! # Usage
//!
//! ```ignore
//! // Initialize the timer subsystem (called once during boot, after the
//! // device tree and interrupt controller are up)
//! timer::init(&dtb)?;
//!
//! // Create a one-shot timer that fires after 100ms
//! let id = timer::create_timer(TimerMode::OneShot, 100, TimeUnit::Milliseconds, my_callback)?;
//!
//! // Cancel a timer
//! timer::cancel_timer(id)?;
//!
//! // Called from the timer interrupt handler
//! timer::timer_tick(elapsed_ms);
//!
//! // Query monotonic uptime
//! let uptime = timer::get_uptime_ms();
//! ```

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::arch::aarch64::systimer::{Channel, SystemTimer};
use crate::dtb::DeviceTree;
use crate::irq::{self, IrqNumber};
use crate::{
    error::{KernelError, KernelResult},
    sync::once_lock::GlobalState,
};

/// Tick period driven into the software wheel by the hardware channel.
/// Public so callers that must convert a duration into ticks (the `sleep`
/// syscall takes microseconds; [`crate::sched::sleep`] takes ticks) don't
/// have to duplicate the constant.
pub const TICK_INTERVAL_US: u32 = 1000;

static HW_TIMER: GlobalState<Mutex<HwTimer>> = GlobalState::new();

struct HwTimer {
    dev: SystemTimer,
    channel: Channel,
}

fn timer_irq_handler(_irq: IrqNumber) -> bool {
    let fired = HW_TIMER
        .with(|mtx| {
            let hw = mtx.lock();
            let fired = hw.dev.is_pending(hw.channel);
            if fired {
                hw.dev.acknowledge(hw.channel);
                hw.dev.arm(hw.channel, TICK_INTERVAL_US);
            }
            fired
        })
        .unwrap_or(false);

    if fired {
        timer_tick(1);
        crate::sched::timer_tick();
    }
    fired
}

/// Number of slots in the timer wheel.
///
/// 256 provides a good balance between memory usage and timer resolution.
/// Timers are hashed into slots based on their expiration tick modulo this
/// value.
const TIMER_WHEEL_SLOTS: usize = 256;

/// Maximum number of timers that can be active simultaneously.
///
/// This is a fixed upper bound to avoid unbounded heap allocation in the
/// kernel. Each timer entry is small (~48 bytes), so 1024 entries use
/// roughly 48 KiB.
const MAX_TIMERS: usize = 1024;

/// Monotonically increasing counter for assigning unique timer IDs.
static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Global timer wheel instance, protected by a spin mutex.
static TIMER_WHEEL: GlobalState<Mutex<TimerWheel>> = GlobalState::new();

/// Monotonic uptime counter in milliseconds, updated on each tick.
static UPTIME_MS: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Unique identifier for a registered timer.
///
/// Wraps a `u64` value that is guaranteed unique for the lifetime of the
/// kernel (barring counter wrap at 2^64, which is practically impossible).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl TimerId {
    /// Allocate the next unique timer ID.
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Timer firing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once after the interval elapses, then auto-deactivate.
    OneShot,
    /// Fire repeatedly at the given interval until explicitly cancelled.
    Periodic,
}

/// Granularity a timer duration is expressed in. The wheel itself only
/// tracks whole milliseconds (matching the 1ms hardware tick), so finer
/// units round up to the nearest millisecond rather than being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    /// Convert `amount` in this unit to whole milliseconds, rounding up so a
    /// sub-millisecond request still reserves at least one wheel tick.
    fn to_millis(self, amount: u64) -> u64 {
        match self {
            TimeUnit::Nanoseconds => amount.div_ceil(1_000_000),
            TimeUnit::Microseconds => amount.div_ceil(1_000),
            TimeUnit::Milliseconds => amount,
            TimeUnit::Seconds => amount.saturating_mul(1000),
        }
    }
}

/// Type alias for timer callback functions.
///
/// Callbacks are plain function pointers (not closures) so they can be
/// stored in static data without requiring `alloc`. The [`TimerId`] of the
/// firing timer is passed so the callback can identify which timer expired.
pub type TimerCallback = fn(TimerId);

/// A single software timer entry.
#[derive(Debug, Clone, Copy)]
struct Timer {
    /// Unique identifier for this timer.
    id: TimerId,
    /// One-shot or periodic.
    mode: TimerMode,
    /// Interval in milliseconds (used for periodic reload).
    interval_ms: u64,
    /// Milliseconds remaining until this timer fires.
    remaining_ms: u64,
    /// Function to call when the timer expires.
    callback: TimerCallback,
    /// Whether this timer is currently active.
    active: bool,
}

// ---------------------------------------------------------------------------
// TimerWheel
// ---------------------------------------------------------------------------

/// Hierarchical timer wheel with 256 slots.
///
/// Each slot holds a fixed-size array of timer entries. On each tick the
/// wheel advances and fires any expired timers in the current slot, then
/// decrements remaining timers in other slots.
///
/// This design avoids heap allocation by using a flat array of timer
/// entries and a free-list encoded via the `active` flag.
struct TimerWheel {
    /// All timer entries (flat pool).
    timers: [Option<Timer>; MAX_TIMERS],
    /// Current wheel position (0..TIMER_WHEEL_SLOTS).
    current_slot: usize,
    /// Number of currently active timers.
    active_count: usize,
}

impl TimerWheel {
    /// Create a new, empty timer wheel.
    fn new() -> Self {
        // Initialize all slots to None using array init pattern
        const NONE_TIMER: Option<Timer> = None;
        Self {
            timers: [NONE_TIMER; MAX_TIMERS],
            current_slot: 0,
            active_count: 0,
        }
    }

    /// Register a new timer in the wheel.
    ///
    /// Returns the [`TimerId`] assigned to the new timer, or an error if
    /// the maximum number of timers has been reached.
    fn add_timer(
        &mut self,
        mode: TimerMode,
        interval_ms: u64,
        callback: TimerCallback,
    ) -> KernelResult<TimerId> {
        if interval_ms == 0 {
            return Err(KernelError::InvalidArgument {
                name: "interval_ms",
                value: "must be > 0",
            });
        }

        // Find a free slot in the timer pool.
        let slot =
            self.timers
                .iter()
                .position(|t| t.is_none())
                .ok_or(KernelError::ResourceExhausted {
                    resource: "timer slots",
                })?;

        let id = TimerId::next();

        self.timers[slot] = Some(Timer {
            id,
            mode,
            interval_ms,
            remaining_ms: interval_ms,
            callback,
            active: true,
        });

        self.active_count += 1;
        Ok(id)
    }

    /// Cancel an active timer by its ID.
    ///
    /// Returns `Ok(())` if the timer was found and removed, or an error
    /// if no timer with the given ID exists.
    fn cancel_timer(&mut self, id: TimerId) -> KernelResult<()> {
        for entry in self.timers.iter_mut() {
            if let Some(timer) = entry {
                if timer.id == id {
                    *entry = None;
                    self.active_count = self.active_count.saturating_sub(1);
                    return Ok(());
                }
            }
        }

        Err(KernelError::NotFound { resource: "timer" })
    }

    /// Advance all timers by `elapsed_ms` milliseconds.
    ///
    /// Any timer whose remaining time reaches zero is fired (its callback
    /// is invoked). One-shot timers are automatically removed after
    /// firing; periodic timers are reloaded with their original interval.
    fn tick(&mut self, elapsed_ms: u64) {
        // Advance the wheel position for bookkeeping.
        self.current_slot = (self.current_slot + elapsed_ms as usize) % TIMER_WHEEL_SLOTS;

        // Collect IDs and callbacks of timers that need to fire so we can
        // invoke callbacks outside the mutable borrow of self.timers.
        // Use a fixed-size buffer to avoid heap allocation.
        let mut fired: [(TimerId, TimerCallback); 64] = [(TimerId(0), noop_callback); 64];
        let mut fired_count = 0usize;

        for entry in self.timers.iter_mut() {
            if let Some(timer) = entry {
                if !timer.active {
                    continue;
                }

                if timer.remaining_ms <= elapsed_ms {
                    // Timer expired -- record it for firing.
                    if fired_count < fired.len() {
                        fired[fired_count] = (timer.id, timer.callback);
                        fired_count += 1;
                    }

                    match timer.mode {
                        TimerMode::OneShot => {
                            // Remove one-shot timers.
                            *entry = None;
                            self.active_count = self.active_count.saturating_sub(1);
                        }
                        TimerMode::Periodic => {
                            // Reload periodic timers, accounting for overshoot.
                            let overshoot = elapsed_ms.saturating_sub(timer.remaining_ms);
                            timer.remaining_ms = timer
                                .interval_ms
                                .saturating_sub(overshoot % timer.interval_ms);
                        }
                    }
                } else {
                    timer.remaining_ms -= elapsed_ms;
                }
            }
        }

        // Fire callbacks after releasing the mutable borrow on timer entries.
        for &(id, cb) in fired.iter().take(fired_count) {
            (cb)(id);
        }
    }

    /// Return the number of currently active (pending) timers.
    fn pending_count(&self) -> usize {
        self.active_count
    }
}

/// No-op callback used as a placeholder in the fired-timers buffer.
fn noop_callback(_id: TimerId) {}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Initialize the timer subsystem: the software wheel, and the BCM system
/// timer channel that drives it.
///
/// Probes the device tree for a `brcm,bcm2835-system-timer` node, claims
/// the first compare channel not already latched by firmware (VideoCore
/// firmware reserves channels 0 and 2 on every Pi board), and arms it for
/// a 1ms tick. Must be called once during kernel boot, after
/// [`crate::irq::init`]. Repeated calls return an error.
pub fn init(dt: &DeviceTree<'_>) -> KernelResult<()> {
    TIMER_WHEEL
        .init(Mutex::new(TimerWheel::new()))
        .map_err(|_| KernelError::AlreadyExists {
            resource: "timer wheel",
            id: 0,
        })?;

    let node = dt
        .find_compatible("brcm,bcm2835-system-timer")
        .ok_or(KernelError::NotFound {
            resource: "system timer",
        })?;
    let reg = node
        .property("reg")
        .ok_or(KernelError::DtbError(crate::error::DtbError::PropertyNotFound))?;
    let base = reg
        .get_u64_or_u32(0)
        .ok_or(KernelError::DtbError(crate::error::DtbError::PropertyNotFound))? as usize;
    let dev = SystemTimer::init(base);

    let channel = (0..4u8)
        .map(Channel)
        .find(|ch| !dev.channel_claimed_by_firmware(*ch))
        .ok_or(KernelError::ResourceExhausted {
            resource: "system timer channels",
        })?;

    let irq = irq_for_channel(&node, channel)?;
    dev.arm(channel, TICK_INTERVAL_US);

    HW_TIMER
        .init(Mutex::new(HwTimer { dev, channel }))
        .map_err(|_| KernelError::AlreadyExists {
            resource: "hardware timer",
            id: 0,
        })?;

    #[cfg(feature = "alloc")]
    irq::register_handler(irq, timer_irq_handler)?;
    irq::enable_irq(irq)?;

    Ok(())
}

/// Resolve the IRQ number for one of the timer's four compare channels
/// from its node's `interrupts` property. The cell width per entry (1 for
/// the legacy BCM controller's direct hwirq numbers, 3 for a GICv2 parent's
/// `<type number flags>` triples) is inferred from the property's total
/// length, since there are always exactly four entries, one per channel.
fn irq_for_channel(node: &crate::dtb::Node<'_, '_>, channel: Channel) -> KernelResult<IrqNumber> {
    let prop = node
        .property("interrupts")
        .ok_or(KernelError::DtbError(crate::error::DtbError::PropertyNotFound))?;
    let total_cells = prop.data.len() / 4;
    let cells_per_entry = total_cells / 4;
    if cells_per_entry == 0 {
        return Err(KernelError::DtbError(crate::error::DtbError::PropertyNotFound));
    }

    let entry = channel.0 as usize * cells_per_entry;
    let id = if cells_per_entry == 1 {
        prop.get_u32(entry)
            .ok_or(KernelError::DtbError(crate::error::DtbError::PropertyNotFound))?
    } else {
        // <type number flags>; type 0 is SPI, hwirq = number + 32.
        let irq_type = prop.get_u32(entry).unwrap_or(0);
        let number = prop
            .get_u32(entry + 1)
            .ok_or(KernelError::DtbError(crate::error::DtbError::PropertyNotFound))?;
        if irq_type == 0 {
            number + 32
        } else {
            number + 16
        }
    };
    Ok(IrqNumber(id))
}

/// Create and register a new timer.
///
/// # Arguments
/// * `mode` -- [`TimerMode::OneShot`] or [`TimerMode::Periodic`].
/// * `amount` -- Duration until (each) expiration, expressed in `unit`.
///   Converted to whole milliseconds, rounding up; must resolve to a value
///   greater than zero.
/// * `unit` -- Granularity `amount` is expressed in: nanoseconds,
///   microseconds, milliseconds, or seconds.
/// * `callback` -- Function to invoke when the timer fires.
///
/// # Returns
/// The [`TimerId`] of the newly created timer.
pub fn create_timer(
    mode: TimerMode,
    amount: u64,
    unit: TimeUnit,
    callback: TimerCallback,
) -> KernelResult<TimerId> {
    let interval_ms = unit.to_millis(amount);
    TIMER_WHEEL
        .with_mut(|wheel| {
            let mut wheel = wheel.lock();
            wheel.add_timer(mode, interval_ms, callback)
        })
        .unwrap_or(Err(KernelError::NotInitialized { subsystem: "timer" }))
}

/// Cancel an active timer.
///
/// Returns `Ok(())` if the timer was found and removed, or a
/// [`KernelError::NotFound`] if no such timer exists.
pub fn cancel_timer(id: TimerId) -> KernelResult<()> {
    TIMER_WHEEL
        .with_mut(|wheel| {
            let mut wheel = wheel.lock();
            wheel.cancel_timer(id)
        })
        .unwrap_or(Err(KernelError::NotInitialized { subsystem: "timer" }))
}

/// Advance all timers by `elapsed_ms` milliseconds and fire expired ones.
///
/// This function should be called from the timer interrupt handler (or a
/// periodic scheduler tick) with the number of milliseconds that have
/// elapsed since the last call.
pub fn timer_tick(elapsed_ms: u64) {
    // Update monotonic uptime counter.
    UPTIME_MS.fetch_add(elapsed_ms, Ordering::Relaxed);

    TIMER_WHEEL.with_mut(|wheel| {
        let mut wheel = wheel.lock();
        wheel.tick(elapsed_ms);
    });
}

/// Return the monotonic uptime in milliseconds since [`init`] was called.
///
/// This counter is incremented by [`timer_tick`] and is independent of
/// wall-clock time. It will not wrap for over 584 million years at
/// millisecond granularity.
pub fn get_uptime_ms() -> u64 {
    UPTIME_MS.load(Ordering::Relaxed)
}

/// Return the number of currently pending (active) timers.
pub fn pending_timer_count() -> usize {
    TIMER_WHEEL
        .with(|wheel| {
            let wheel = wheel.lock();
            wheel.pending_count()
        })
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtb::Property;

    /// Dummy callback that does nothing (used in tests).
    fn test_callback(_id: TimerId) {}

    fn fake_node<'a>(data: &'a [u8]) -> Property<'a> {
        Property {
            name: "interrupts",
            data,
        }
    }

    #[test]
    fn irq_cells_legacy_single_cell_per_channel() {
        // Four entries, one cell each: hwirq 0..3.
        let data = [0u32, 1, 2, 3];
        let bytes: alloc::vec::Vec<u8> = data.iter().flat_map(|v| v.to_be_bytes()).collect();
        let prop = fake_node(&bytes);
        let total_cells = prop.data.len() / 4;
        assert_eq!(total_cells / 4, 1);
        assert_eq!(prop.get_u32(2), Some(2));
    }

    #[test]
    fn irq_cells_gic_triple_per_channel() {
        // Four entries, three cells each: <type number flags>.
        let data = [0u32, 96, 4, 0, 97, 4, 0, 98, 4, 0, 99, 4];
        let bytes: alloc::vec::Vec<u8> = data.iter().flat_map(|v| v.to_be_bytes()).collect();
        let prop = fake_node(&bytes);
        let total_cells = prop.data.len() / 4;
        assert_eq!(total_cells / 4, 3);
        // Channel 2's entry starts at cell 6: type=0, number=98.
        assert_eq!(prop.get_u32(6), Some(0));
        assert_eq!(prop.get_u32(7), Some(98));
    }

    #[test]
    fn test_timer_wheel_add_and_cancel() {
        let mut wheel = TimerWheel::new();

        let id = wheel
            .add_timer(TimerMode::OneShot, 100, test_callback)
            .unwrap();
        assert_eq!(wheel.pending_count(), 1);

        wheel.cancel_timer(id).unwrap();
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn test_timer_wheel_cancel_nonexistent() {
        let mut wheel = TimerWheel::new();
        let result = wheel.cancel_timer(TimerId(999));
        assert!(result.is_err());
    }

    #[test]
    fn test_timer_wheel_one_shot_fires_and_removes() {
        let mut wheel = TimerWheel::new();
        let _id = wheel
            .add_timer(TimerMode::OneShot, 50, test_callback)
            .unwrap();
        assert_eq!(wheel.pending_count(), 1);

        // Tick past the expiry.
        wheel.tick(60);
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn test_timer_wheel_periodic_reloads() {
        let mut wheel = TimerWheel::new();
        let _id = wheel
            .add_timer(TimerMode::Periodic, 100, test_callback)
            .unwrap();
        assert_eq!(wheel.pending_count(), 1);

        // Tick past the first expiry.
        wheel.tick(110);
        // Periodic timer should still be active.
        assert_eq!(wheel.pending_count(), 1);
    }

    #[test]
    fn test_timer_wheel_zero_interval_rejected() {
        let mut wheel = TimerWheel::new();
        let result = wheel.add_timer(TimerMode::OneShot, 0, test_callback);
        assert!(result.is_err());
    }

    #[test]
    fn create_timer_converts_units_to_millis() {
        assert_eq!(TimeUnit::Nanoseconds.to_millis(2_500_000), 3);
        assert_eq!(TimeUnit::Microseconds.to_millis(1_500), 2);
        assert_eq!(TimeUnit::Milliseconds.to_millis(7), 7);
        assert_eq!(TimeUnit::Seconds.to_millis(2), 2000);
    }

    #[test]
    fn create_timer_public_api_registers_and_cancels() {
        TIMER_WHEEL.init(Mutex::new(TimerWheel::new())).ok();

        let id = create_timer(TimerMode::OneShot, 500, TimeUnit::Microseconds, test_callback).unwrap();
        assert_eq!(pending_timer_count(), 1);
        cancel_timer(id).unwrap();
        assert_eq!(pending_timer_count(), 0);

        let id = create_timer(TimerMode::Periodic, 1, TimeUnit::Seconds, test_callback).unwrap();
        assert_eq!(pending_timer_count(), 1);
        cancel_timer(id).unwrap();
    }

    #[test]
    fn test_timer_id_uniqueness() {
        let id1 = TimerId::next();
        let id2 = TimerId::next();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_uptime_counter() {
        // Reset the counter for this test.
        UPTIME_MS.store(0, Ordering::Relaxed);
        assert_eq!(get_uptime_ms(), 0);
        UPTIME_MS.fetch_add(42, Ordering::Relaxed);
        assert_eq!(get_uptime_ms(), 42);
    }
}
