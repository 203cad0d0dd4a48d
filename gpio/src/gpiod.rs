//! GPIO backend over the Linux GPIO character device, using the gpiod
//! library. Works on any kernel with `/dev/gpiochipN`, at the cost of a
//! line request per direction change.

use crate::{
    Pin, PinBus, PinBusInput, PinBusOutput, PinDriver, PinError, PinInput, PinOutput, PinResult,
};
use bitvec::vec::BitVec;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::atomic::AtomicU8;

/// GPIO backend managing the lines of one gpiod chip.
pub struct GpiodDriver {
    chip: gpiod::Chip,
    used_lines: BitVec<AtomicU8>,
}

impl GpiodDriver {
    pub fn new(chip: gpiod::Chip) -> Self {
        let count = chip.num_lines() as usize;
        Self {
            chip,
            used_lines: BitVec::repeat(false, count),
        }
    }

    /// Opens the chip at the given character-device path, e.g.
    /// `/dev/gpiochip0`.
    pub fn open(path: impl AsRef<Path>) -> PinResult<Self> {
        Ok(Self::new(gpiod::Chip::new(path.as_ref())?))
    }

    fn claim_indices(&self, indices: &[usize]) -> PinResult<()> {
        let count = self.used_lines.len();
        if indices.iter().any(|&index| index >= count) {
            return Err(PinError::InvalidArgument);
        }

        for (n, &index) in indices.iter().enumerate() {
            if self.used_lines[index] {
                for &claimed in &indices[..n] {
                    self.used_lines.set_aliased(claimed, false);
                }
                return Err(PinError::AlreadyClaimed);
            }
            self.used_lines.set_aliased(index, true);
        }
        Ok(())
    }
}

impl Debug for GpiodDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})", self.chip.name())
    }
}

impl PinDriver for GpiodDriver {
    fn line_count(&self) -> PinResult<usize> {
        Ok(self.used_lines.len())
    }

    fn claim_line(&self, index: usize) -> PinResult<Box<dyn Pin + '_>> {
        self.claim_indices(&[index])?;
        Ok(Box::new(GpiodPin {
            driver: self,
            index,
        }))
    }

    fn claim_bus<const N: usize>(&self, indices: [usize; N]) -> PinResult<Box<dyn PinBus<N> + '_>> {
        self.claim_indices(&indices)?;
        Ok(Box::new(GpiodBus {
            driver: self,
            indices,
        }))
    }
}

struct GpiodPin<'a> {
    driver: &'a GpiodDriver,
    index: usize,
}

impl Debug for GpiodPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.driver, self.index)
    }
}

impl Pin for GpiodPin<'_> {
    fn as_input(&mut self) -> PinResult<Box<dyn PinInput + '_>> {
        let lines = self.driver.chip.request_lines(
            gpiod::Options::input([self.index as u32]).consumer(env!("CARGO_PKG_NAME")),
        )?;
        Ok(Box::new(GpiodPinInput { pin: self, lines }))
    }

    fn as_output(&mut self) -> PinResult<Box<dyn PinOutput + '_>> {
        let lines = self.driver.chip.request_lines(
            gpiod::Options::output([self.index as u32]).consumer(env!("CARGO_PKG_NAME")),
        )?;
        Ok(Box::new(GpiodPinOutput { pin: self, lines }))
    }
}

impl Drop for GpiodPin<'_> {
    fn drop(&mut self) {
        self.driver.used_lines.set_aliased(self.index, false);
    }
}

struct GpiodPinInput<'a> {
    pin: &'a GpiodPin<'a>,
    lines: gpiod::Lines<gpiod::Input>,
}

impl Debug for GpiodPinInput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.pin)
    }
}

impl PinInput for GpiodPinInput<'_> {
    fn read(&self) -> PinResult<bool> {
        let values = self.lines.get_values([false])?;
        Ok(values[0])
    }
}

struct GpiodPinOutput<'a> {
    pin: &'a GpiodPin<'a>,
    lines: gpiod::Lines<gpiod::Output>,
}

impl Debug for GpiodPinOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.pin)
    }
}

impl PinOutput for GpiodPinOutput<'_> {
    fn write(&self, value: bool) -> PinResult<()> {
        self.lines.set_values([value])?;
        Ok(())
    }
}

struct GpiodBus<'a, const N: usize> {
    driver: &'a GpiodDriver,
    indices: [usize; N],
}

impl<const N: usize> Debug for GpiodBus<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}", self.driver, self.indices)
    }
}

impl<const N: usize> GpiodBus<'_, N> {
    fn line_ids(&self) -> Vec<u32> {
        self.indices.iter().map(|&index| index as u32).collect()
    }
}

impl<const N: usize> PinBus<N> for GpiodBus<'_, N> {
    fn as_input(&mut self) -> PinResult<Box<dyn PinBusInput<N> + '_>> {
        let lines = self
            .driver
            .chip
            .request_lines(gpiod::Options::input(self.line_ids()).consumer(env!("CARGO_PKG_NAME")))?;
        Ok(Box::new(GpiodBusInput { bus: self, lines }))
    }

    fn as_output(&mut self) -> PinResult<Box<dyn PinBusOutput<N> + '_>> {
        let lines = self
            .driver
            .chip
            .request_lines(gpiod::Options::output(self.line_ids()).consumer(env!("CARGO_PKG_NAME")))?;
        Ok(Box::new(GpiodBusOutput { bus: self, lines }))
    }
}

impl<const N: usize> Drop for GpiodBus<'_, N> {
    fn drop(&mut self) {
        for &index in &self.indices {
            self.driver.used_lines.set_aliased(index, false);
        }
    }
}

struct GpiodBusInput<'a, const N: usize> {
    bus: &'a GpiodBus<'a, N>,
    lines: gpiod::Lines<gpiod::Input>,
}

impl<const N: usize> Debug for GpiodBusInput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.bus)
    }
}

impl<const N: usize> PinBusInput<N> for GpiodBusInput<'_, N> {
    fn read(&self) -> PinResult<[bool; N]> {
        let values = self.lines.get_values([false; N])?;
        Ok(values)
    }
}

struct GpiodBusOutput<'a, const N: usize> {
    bus: &'a GpiodBus<'a, N>,
    lines: gpiod::Lines<gpiod::Output>,
}

impl<const N: usize> Debug for GpiodBusOutput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.bus)
    }
}

impl<const N: usize> PinBusOutput<N> for GpiodBusOutput<'_, N> {
    fn write(&self, values: &[bool; N]) -> PinResult<()> {
        self.lines.set_values(*values)?;
        Ok(())
    }
}
