//! Memory-mapped GPIO backend for the BCM2711 (Raspberry Pi 4).
//!
//! Pokes the GPIO register page directly, so it needs no kernel GPIO
//! support beyond `/dev/gpiomem` (or `/dev/mem` when running as root).
//! Line direction changes are a single register write, which keeps the
//! per-transaction direction flipping of the LCD bus cheap.

use crate::{
    Pin, PinBus, PinBusInput, PinBusOutput, PinDriver, PinError, PinInput, PinOutput, PinResult,
};
use bitvec::vec::BitVec;
use memmap2::{MmapOptions, MmapRaw};
use std::fmt::{Debug, Formatter};
use std::fs::OpenOptions;
use std::sync::atomic::AtomicU8;

/// GPIO backend over the BCM2711 register page.
pub struct MmioDriver {
    mmap: MmapRaw,
    used_lines: BitVec<AtomicU8>,
}

impl MmioDriver {
    /// Physical address of the GPIO registers on the BCM2711.
    const GPIO_BASE: u64 = 0xFE200000;

    /// The BCM2711 exposes 58 GPIO lines.
    const LINE_COUNT: usize = 58;

    // Register banks, as byte offsets into the GPIO page.
    const GPFSEL0: usize = 0x00;
    const GPSET0: usize = 0x1C;
    const GPCLR0: usize = 0x28;
    const GPLEV0: usize = 0x34;

    const FUNCTION_INPUT: u32 = 0b000;
    const FUNCTION_OUTPUT: u32 = 0b001;

    fn map(path: &str, offset: u64) -> PinResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mmap = MmapOptions::new().offset(offset).len(4096).map_raw(&file)?;

        Ok(MmioDriver {
            mmap,
            used_lines: BitVec::repeat(false, Self::LINE_COUNT),
        })
    }

    /// Maps the GPIO page through `/dev/gpiomem` (no root required).
    pub fn new_gpiomem() -> PinResult<Self> {
        Self::map("/dev/gpiomem", 0)
    }

    /// Maps the GPIO page through `/dev/mem` at the physical base.
    pub fn new_mem() -> PinResult<Self> {
        Self::map("/dev/mem", Self::GPIO_BASE)
    }

    fn register(&self, byte_offset: usize) -> *mut u32 {
        let base = self.mmap.as_mut_ptr() as *mut u32;
        unsafe { base.add(byte_offset / 4) }
    }

    /// Programs the function-select field of a claimed line.
    fn set_function(&self, line: usize, function: u32) {
        let register = self.register(Self::GPFSEL0 + 4 * (line / 10));
        let shift = (line % 10) * 3;

        let mut value = unsafe { register.read_volatile() };
        value &= !(0b111 << shift);
        value |= function << shift;
        unsafe { register.write_volatile(value) };
    }

    /// Drives a claimed output line through the set/clear banks.
    fn set_level(&self, line: usize, high: bool) {
        let bank = if high { Self::GPSET0 } else { Self::GPCLR0 };
        let register = self.register(bank + 4 * (line / 32));
        unsafe { register.write_volatile(1 << (line % 32)) };
    }

    /// Samples the level of a claimed line.
    fn level(&self, line: usize) -> bool {
        let register = self.register(Self::GPLEV0 + 4 * (line / 32));
        let value = unsafe { register.read_volatile() };
        (value >> (line % 32)) & 1 != 0
    }

    fn claim_indices(&self, indices: &[usize]) -> PinResult<()> {
        if indices.iter().any(|&index| index >= Self::LINE_COUNT) {
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
            self.set_function(index, Self::FUNCTION_INPUT);
        }
        Ok(())
    }

    /// Parks the line as an input and releases the claim.
    fn release(&self, line: usize) {
        self.set_function(line, Self::FUNCTION_INPUT);
        self.used_lines.set_aliased(line, false);
    }
}

impl Debug for MmioDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MmioDriver({:?})", self.mmap.as_ptr().addr())
    }
}

impl PinDriver for MmioDriver {
    fn line_count(&self) -> PinResult<usize> {
        Ok(Self::LINE_COUNT)
    }

    fn claim_line(&self, index: usize) -> PinResult<Box<dyn Pin + '_>> {
        self.claim_indices(&[index])?;
        Ok(Box::new(MmioPin {
            driver: self,
            index,
        }))
    }

    fn claim_bus<const N: usize>(&self, indices: [usize; N]) -> PinResult<Box<dyn PinBus<N> + '_>> {
        self.claim_indices(&indices)?;
        Ok(Box::new(MmioBus {
            driver: self,
            indices,
        }))
    }
}

struct MmioPin<'a> {
    driver: &'a MmioDriver,
    index: usize,
}

impl Debug for MmioPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.driver, self.index)
    }
}

impl Pin for MmioPin<'_> {
    fn as_input(&mut self) -> PinResult<Box<dyn PinInput + '_>> {
        self.driver
            .set_function(self.index, MmioDriver::FUNCTION_INPUT);
        Ok(Box::new(MmioPinInput { pin: self }))
    }

    fn as_output(&mut self) -> PinResult<Box<dyn PinOutput + '_>> {
        self.driver
            .set_function(self.index, MmioDriver::FUNCTION_OUTPUT);
        Ok(Box::new(MmioPinOutput { pin: self }))
    }
}

impl Drop for MmioPin<'_> {
    fn drop(&mut self) {
        self.driver.release(self.index);
    }
}

struct MmioPinInput<'a> {
    pin: &'a MmioPin<'a>,
}

impl Debug for MmioPinInput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.pin)
    }
}

impl PinInput for MmioPinInput<'_> {
    fn read(&self) -> PinResult<bool> {
        Ok(self.pin.driver.level(self.pin.index))
    }
}

struct MmioPinOutput<'a> {
    pin: &'a MmioPin<'a>,
}

impl Debug for MmioPinOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.pin)
    }
}

impl PinOutput for MmioPinOutput<'_> {
    fn write(&self, value: bool) -> PinResult<()> {
        self.pin.driver.set_level(self.pin.index, value);
        Ok(())
    }
}

struct MmioBus<'a, const N: usize> {
    driver: &'a MmioDriver,
    indices: [usize; N],
}

impl<const N: usize> Debug for MmioBus<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}", self.driver, self.indices)
    }
}

impl<const N: usize> PinBus<N> for MmioBus<'_, N> {
    fn as_input(&mut self) -> PinResult<Box<dyn PinBusInput<N> + '_>> {
        for &index in &self.indices {
            self.driver.set_function(index, MmioDriver::FUNCTION_INPUT);
        }
        Ok(Box::new(MmioBusInput { bus: self }))
    }

    fn as_output(&mut self) -> PinResult<Box<dyn PinBusOutput<N> + '_>> {
        for &index in &self.indices {
            self.driver.set_function(index, MmioDriver::FUNCTION_OUTPUT);
        }
        Ok(Box::new(MmioBusOutput { bus: self }))
    }
}

impl<const N: usize> Drop for MmioBus<'_, N> {
    fn drop(&mut self) {
        for &index in &self.indices {
            self.driver.release(index);
        }
    }
}

struct MmioBusInput<'a, const N: usize> {
    bus: &'a MmioBus<'a, N>,
}

impl<const N: usize> Debug for MmioBusInput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.bus)
    }
}

impl<const N: usize> PinBusInput<N> for MmioBusInput<'_, N> {
    fn read(&self) -> PinResult<[bool; N]> {
        let mut values = [false; N];
        for (i, &index) in self.bus.indices.iter().enumerate() {
            values[i] = self.bus.driver.level(index);
        }
        Ok(values)
    }
}

struct MmioBusOutput<'a, const N: usize> {
    bus: &'a MmioBus<'a, N>,
}

impl<const N: usize> Debug for MmioBusOutput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.bus)
    }
}

impl<const N: usize> PinBusOutput<N> for MmioBusOutput<'_, N> {
    fn write(&self, values: &[bool; N]) -> PinResult<()> {
        for (i, &index) in self.bus.indices.iter().enumerate() {
            self.bus.driver.set_level(index, values[i]);
        }
        Ok(())
    }
}
