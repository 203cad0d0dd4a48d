//! HD44780 character LCD module, driven over the 8-bit parallel interface
//! (register select, read/write, enable strobe and eight data lines).
//!
//! See the [Hd44780Driver](driver::Hd44780Driver) trait for the operation
//! contract and [GpioHd44780Driver](driver::GpioHd44780Driver) for the GPIO
//! implementation with the documented power-on timing and busy-flag
//! handshake.

pub mod driver;
