mod gpio;

use crate::{PinError, PinResult};
pub use gpio::*;
use log::warn;
use std::fmt::Debug;

/// Direction used by the entry mode and the shift commands.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    /// Towards lower addresses.
    Left,
    /// Towards higher addresses.
    Right,
}

/// Policy for the busy-flag handshake that acknowledges every transaction.
///
/// The default spins until the controller reports ready, which is the
/// correct behavior with a known-present module: the controller *will*
/// clear the flag, and a timeout would only mask a wiring fault. With
/// possibly-absent hardware, [BusyWait::Bounded] caps the number of busy
/// samples and surfaces [PinError::BusyTimeout] instead of hanging.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BusyWait {
    /// Poll the busy flag until it clears, however long that takes.
    #[default]
    Unbounded,
    /// Give up after observing the flag busy `max_polls` times.
    Bounded { max_polls: u32 },
}

/// Builds the display-control instruction byte from the three flags.
///
/// Command: `00001DCB`.
/// `D` is `1` for display on, `C` for cursor shown, `B` for cursor blink.
pub fn display_control_byte(display_on: bool, cursor_on: bool, blink_on: bool) -> u8 {
    let mut command = 0b00001000;
    if display_on {
        command |= 0b00000100;
    }
    if cursor_on {
        command |= 0b00000010;
    }
    if blink_on {
        command |= 0b00000001;
    }
    command
}

/// The operation contract of an HD44780-class controller.
///
/// The high-level operations are default methods that build the command
/// bytes and go through [Hd44780Driver::send_command] /
/// [Hd44780Driver::send_data]; an implementation provides the four
/// low-level transaction methods plus [Hd44780Driver::init]. Every send
/// is acknowledged by the busy-flag handshake before it returns, so a
/// returned `Ok` means the controller has latched the byte.
pub trait Hd44780Driver: Debug {
    /// Runs the documented power-on initialization sequence, leaving the
    /// display cleared and on, cursor shown, blink off.
    ///
    /// Must be called exactly once, before any other operation. The
    /// controller ends up in an undefined mode if the sequence is
    /// reordered, so implementations keep its order and settle times
    /// fixed.
    fn init(&mut self, two_lines: bool, alt_font: bool) -> PinResult<()>;

    /// Clears the display and homes the cursor.
    ///
    /// Command: `00000001`. Takes the controller much longer than the
    /// other commands; the handshake covers that.
    fn clear_display(&mut self) -> PinResult<()> {
        self.send_command(0b00000001)
    }

    /// Homes the cursor without clearing the display.
    ///
    /// Command: `00000010`.
    fn return_home(&mut self) -> PinResult<()> {
        self.send_command(0b00000010)
    }

    /// Sets the cursor advance direction and whether the display shifts
    /// on every write.
    ///
    /// Command: `000001IS`.
    fn set_entry_mode(&mut self, cursor_direction: CursorDirection, shift: bool) -> PinResult<()> {
        let mut command = 0b00000100;
        if cursor_direction == CursorDirection::Right {
            command |= 0b00000010;
        }
        if shift {
            command |= 0b00000001;
        }
        self.send_command(command)
    }

    /// Sets display on/off, cursor visibility, and cursor blinking.
    fn set_display_control(
        &mut self,
        display_on: bool,
        cursor_on: bool,
        blink_on: bool,
    ) -> PinResult<()> {
        self.send_command(display_control_byte(display_on, cursor_on, blink_on))
    }

    /// Turns the display on with the requested cursor visibility and
    /// blink mode.
    fn turn_on(&mut self, cursor_on: bool, blink_on: bool) -> PinResult<()> {
        self.set_display_control(true, cursor_on, blink_on)
    }

    /// Turns the display off. The contents stay in DDRAM and reappear on
    /// the next [Hd44780Driver::turn_on].
    fn turn_off(&mut self) -> PinResult<()> {
        self.set_display_control(false, false, false)
    }

    /// Moves the cursor or shifts the whole display by one position.
    ///
    /// Command: `0001DR00`.
    /// `D` is `1` for display shift, `0` for cursor move.
    /// `R` is `1` for right, `0` for left.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> PinResult<()> {
        let mut command = 0b00010000;
        if display_shift {
            command |= 0b00001000;
        }
        if direction == CursorDirection::Right {
            command |= 0b00000100;
        }
        self.send_command(command)
    }

    /// Moves the cursor one position without writing.
    fn shift_cursor(&mut self, direction: CursorDirection) -> PinResult<()> {
        self.cursor_shift(false, direction)
    }

    /// Shifts the whole display one position; the cursor follows.
    fn shift_display(&mut self, direction: CursorDirection) -> PinResult<()> {
        self.cursor_shift(true, direction)
    }

    /// Sets the number of display lines and the glyph font.
    ///
    /// Command: `0011NF00` — the data-length bit is always set, the bus
    /// is eight lines wide.
    fn function_set(&mut self, two_lines: bool, alt_font: bool) -> PinResult<()> {
        let mut command = 0b00110000;
        if two_lines {
            command |= 0b00001000;
        }
        if alt_font {
            command |= 0b00000100;
        }
        self.send_command(command)
    }

    /// Sets the CGRAM address (custom glyph memory).
    ///
    /// The address is a 6-bit value; out of bounds returns
    /// [PinError::InvalidArgument].
    fn set_cgram_address(&mut self, address: u8) -> PinResult<()> {
        if address > 0b00111111 {
            return Err(PinError::InvalidArgument);
        }
        self.send_command(0b01000000 | address)
    }

    /// Sets the DDRAM address (cursor position).
    ///
    /// The address is a 7-bit value; out of bounds returns
    /// [PinError::InvalidArgument].
    fn set_ddram_address(&mut self, address: u8) -> PinResult<()> {
        if address > 0b01111111 {
            return Err(PinError::InvalidArgument);
        }
        self.send_command(0b10000000 | address)
    }

    /// Moves the cursor to the given row and column.
    ///
    /// Rows start at DDRAM addresses `0x00` and `0x40`, 40 columns each.
    /// Out-of-range coordinates are rejected instead of being encoded
    /// into a malformed address instruction.
    fn set_cursor(&mut self, row: u8, column: u8) -> PinResult<()> {
        if row >= 2 || column >= 40 {
            return Err(PinError::InvalidArgument);
        }
        self.set_ddram_address(column + 0x40 * row)
    }

    /// Uploads a 5x8 glyph into one of the eight CGRAM slots; the glyph
    /// prints as the character with the slot's code.
    ///
    /// Leaves the address counter inside CGRAM, so reposition with
    /// [Hd44780Driver::set_cursor] before printing again.
    fn define_glyph(&mut self, slot: u8, pattern: &[u8; 8]) -> PinResult<()> {
        if slot > 7 {
            return Err(PinError::InvalidArgument);
        }
        self.set_cgram_address(slot << 3)?;
        for row in pattern {
            self.send_data(row & 0b00011111)?;
        }
        Ok(())
    }

    /// Prints one character at the cursor position.
    ///
    /// The character ROM is ASCII-compatible; anything else prints as `?`.
    fn print_char(&mut self, c: char) -> PinResult<()> {
        if c.is_ascii() {
            self.send_data(c as u8)
        } else {
            warn!("Non-ASCII character: {}", c);
            self.send_data(b'?')
        }
    }

    /// Prints a string, one character transaction at a time, in order.
    /// An empty string touches the bus not at all.
    fn print(&mut self, s: &str) -> PinResult<()> {
        for c in s.chars() {
            self.print_char(c)?;
        }
        Ok(())
    }

    /// Reads the busy flag and address counter.
    fn busy_flag_and_address(&mut self) -> PinResult<(bool, u8)> {
        let status = self.read_command()?;
        let busy = status & 0b10000000 != 0;
        let address = status & 0b01111111;
        Ok((busy, address))
    }

    // Low-level transactions, implemented by the driver implementation.

    /// Sends an instruction byte (RS low) and waits for the
    /// acknowledgment.
    fn send_command(&mut self, command: u8) -> PinResult<()>;

    /// Sends a data byte (RS high) and waits for the acknowledgment.
    fn send_data(&mut self, data: u8) -> PinResult<()>;

    /// Reads the status byte (RS low): busy flag and address counter.
    fn read_command(&mut self) -> PinResult<u8>;

    /// Reads a data byte (RS high) from the current address.
    fn read_data(&mut self) -> PinResult<u8>;
}
