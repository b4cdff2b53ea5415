//! `print!`/`println!` macros, routed to the PL011 serial sink.
//!
//! There is no VGA text buffer on this target; both macros and the `log`
//! backend in [`crate::logger`] end up at the same UART.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::serial::_serial_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
