//! `log` crate backend: forwards to both the UART sink and the in-memory
//! ring buffer in [`crate::log_service`].

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::log_service::{self, LogLevel};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

fn level_to_log_level(level: Level) -> LogLevel {
    match level {
        Level::Error => LogLevel::Error,
        Level::Warn => LogLevel::Warn,
        Level::Info => LogLevel::Info,
        Level::Debug => LogLevel::Debug,
        Level::Trace => LogLevel::Trace,
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::println!("[{:>5}] {}: {}", record.level(), record.target(), record.args());

        // The formatted message may exceed log_service's fixed buffer; it is
        // truncated there, which is acceptable for a diagnostic ring buffer.
        let mut buf = heapless_message_buf::Buf::new();
        let _ = core::fmt::write(&mut buf, format_args!("{}", record.args()));
        log_service::klog(level_to_log_level(record.level()), record.target(), buf.as_str());
    }

    fn flush(&self) {}
}

/// A tiny fixed-capacity `fmt::Write` sink, since the logger runs before any
/// heap allocator is guaranteed to be installed.
mod heapless_message_buf {
    use core::fmt;

    const CAP: usize = 128;

    pub struct Buf {
        bytes: [u8; CAP],
        len: usize,
    }

    impl Buf {
        pub const fn new() -> Self {
            Self { bytes: [0; CAP], len: 0 }
        }

        pub fn as_str(&self) -> &str {
            core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
        }
    }

    impl fmt::Write for Buf {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let remaining = CAP - self.len;
            let take = s.len().min(remaining);
            self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
            self.len += take;
            Ok(())
        }
    }
}

/// Install the kernel logger as the `log` crate's global backend.
///
/// Must be called exactly once, early in [`crate::arch::aarch64::boot`]'s
/// init sequence, before any other subsystem calls `log::info!` and friends.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Trace))
        .expect("logger installed twice");
}
