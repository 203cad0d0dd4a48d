pub mod gpiod;
pub mod lcd;
pub mod mmio;
pub mod sim;

use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum PinError {
    #[error("line already claimed")]
    AlreadyClaimed,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the feature is not supported on this backend")]
    NotSupported,
    #[error("busy flag did not clear within the poll budget")]
    BusyTimeout,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
    #[error("error: {0}")]
    Other(String),
}

impl From<std::io::Error> for PinError {
    fn from(err: std::io::Error) -> Self {
        PinError::Io(err.kind())
    }
}

pub type PinResult<T> = Result<T, PinError>;

/// A GPIO backend: a set of physical lines that can be claimed one at a
/// time or as an ordered bus.
///
/// Claiming marks the lines as used for the lifetime of the returned
/// handle; claiming a line twice fails with [PinError::AlreadyClaimed].
pub trait PinDriver: Debug {
    /// Gets the amount of lines this backend exposes.
    fn line_count(&self) -> PinResult<usize>;

    /// Claims exclusive access to the line at the given index.
    fn claim_line(&self, index: usize) -> PinResult<Box<dyn Pin + '_>>;

    /// Claims exclusive access to the lines at the given indices as an
    /// ordered bus.
    fn claim_bus<const N: usize>(
        &self,
        indices: [usize; N],
    ) -> PinResult<Box<dyn PinBus<N> + '_>>;
}

/// A claimed line whose direction has not been selected yet.
///
/// Selecting a direction reprograms the physical line every time it is
/// called; protocols that multiplex a line between driving and sampling
/// (like the LCD data bus) rely on that.
pub trait Pin: Debug {
    /// Programs the line as an input, allowing reading its state.
    fn as_input(&mut self) -> PinResult<Box<dyn PinInput + '_>>;
    /// Programs the line as an output, allowing writing its state.
    fn as_output(&mut self) -> PinResult<Box<dyn PinOutput + '_>>;
}

pub trait PinInput: Debug {
    /// Reads the state of the line.
    fn read(&self) -> PinResult<bool>;
}

pub trait PinOutput: Debug {
    /// Writes the state of the line.
    fn write(&self, value: bool) -> PinResult<()>;
}

/// A claimed, ordered group of lines that changes direction as a unit.
pub trait PinBus<const N: usize>: Debug {
    /// Programs every line of the bus as an input.
    fn as_input(&mut self) -> PinResult<Box<dyn PinBusInput<N> + '_>>;
    /// Programs every line of the bus as an output.
    fn as_output(&mut self) -> PinResult<Box<dyn PinBusOutput<N> + '_>>;
}

pub trait PinBusInput<const N: usize>: Debug {
    /// Reads the states of all lines in the bus, index 0 first.
    fn read(&self) -> PinResult<[bool; N]>;
}

impl dyn PinBusInput<8> + '_ {
    /// Reads the bus as a byte, LSb first (line 0 carries bit 0).
    pub fn read_byte(&self) -> PinResult<u8> {
        let values = self.read()?;
        let mut byte = 0u8;
        for (i, &value) in values.iter().enumerate() {
            if value {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }
}

pub trait PinBusOutput<const N: usize>: Debug {
    /// Writes the states of all lines in the bus, index 0 first.
    fn write(&self, values: &[bool; N]) -> PinResult<()>;
}

impl dyn PinBusOutput<8> + '_ {
    /// Writes a byte to the bus, LSb first (bit 0 drives line 0).
    pub fn write_byte(&self, value: u8) -> PinResult<()> {
        let mut values = [false; 8];
        for (i, slot) in values.iter_mut().enumerate() {
            *slot = (value & (1 << i)) != 0;
        }
        self.write(&values)
    }
}
