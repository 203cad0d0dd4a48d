//! Simulated GPIO backend.
//!
//! Implements the pin capability traits against an in-memory panel bus
//! instead of hardware: every direction change, write and read is recorded
//! in order with a timestamp, and reads can be scripted per line. This is
//! what the LCD protocol tests run against, and it doubles as a dry-run
//! backend on machines without a GPIO header.

use crate::{
    Pin, PinBus, PinBusInput, PinBusOutput, PinDriver, PinError, PinInput, PinOutput, PinResult,
};
use bitvec::vec::BitVec;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::AtomicU8;
use std::time::Instant;

/// One recorded bus event.
#[derive(Copy, Clone, Debug)]
pub struct SimEvent {
    /// The line the event happened on.
    pub line: usize,
    /// What happened.
    pub kind: SimEventKind,
    /// When it happened, for checking settle gaps between transitions.
    pub at: Instant,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimEventKind {
    /// The line was programmed as an input.
    SetInput,
    /// The line was programmed as an output.
    SetOutput,
    /// The line was driven to the given level.
    Write(bool),
    /// The line was sampled and observed at the given level.
    Read(bool),
}

#[derive(Default)]
struct SimLine {
    level: bool,
    reads: VecDeque<bool>,
}

/// Simulated GPIO backend recording every line state transition.
pub struct SimDriver {
    lines: RefCell<Vec<SimLine>>,
    events: RefCell<Vec<SimEvent>>,
    used_lines: BitVec<AtomicU8>,
}

impl SimDriver {
    pub fn new(line_count: usize) -> Self {
        let mut lines = Vec::new();
        lines.resize_with(line_count, SimLine::default);
        Self {
            lines: RefCell::new(lines),
            events: RefCell::new(Vec::new()),
            used_lines: BitVec::repeat(false, line_count),
        }
    }

    /// Queues the values successive reads of the given line will observe.
    ///
    /// Once the queue runs dry, reads sample low ("ready" for a busy
    /// flag), so unscripted polls terminate instead of spinning.
    pub fn script_reads(&self, line: usize, samples: impl IntoIterator<Item = bool>) {
        self.lines.borrow_mut()[line].reads.extend(samples);
    }

    /// Returns a copy of the recorded event log.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.borrow().clone()
    }

    /// Returns the recorded event log and starts a fresh one.
    pub fn take_events(&self) -> Vec<SimEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// The level the given line was last driven to.
    pub fn level(&self, line: usize) -> bool {
        self.lines.borrow()[line].level
    }

    fn record(&self, line: usize, kind: SimEventKind) {
        self.events.borrow_mut().push(SimEvent {
            line,
            kind,
            at: Instant::now(),
        });
    }

    fn set_direction(&self, line: usize, output: bool) {
        self.record(
            line,
            if output {
                SimEventKind::SetOutput
            } else {
                SimEventKind::SetInput
            },
        );
    }

    fn write_line(&self, line: usize, value: bool) {
        self.lines.borrow_mut()[line].level = value;
        self.record(line, SimEventKind::Write(value));
    }

    fn read_line(&self, line: usize) -> bool {
        let value = self.lines.borrow_mut()[line]
            .reads
            .pop_front()
            .unwrap_or(false);
        self.record(line, SimEventKind::Read(value));
        value
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

    fn release(&self, index: usize) {
        self.used_lines.set_aliased(index, false);
    }
}

impl Debug for SimDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDriver({} lines)", self.used_lines.len())
    }
}

impl PinDriver for SimDriver {
    fn line_count(&self) -> PinResult<usize> {
        Ok(self.used_lines.len())
    }

    fn claim_line(&self, index: usize) -> PinResult<Box<dyn Pin + '_>> {
        self.claim_indices(&[index])?;
        Ok(Box::new(SimPin {
            driver: self,
            index,
        }))
    }

    fn claim_bus<const N: usize>(&self, indices: [usize; N]) -> PinResult<Box<dyn PinBus<N> + '_>> {
        self.claim_indices(&indices)?;
        Ok(Box::new(SimBus {
            driver: self,
            indices,
        }))
    }
}

struct SimPin<'a> {
    driver: &'a SimDriver,
    index: usize,
}

impl Debug for SimPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.driver, self.index)
    }
}

impl Pin for SimPin<'_> {
    fn as_input(&mut self) -> PinResult<Box<dyn PinInput + '_>> {
        self.driver.set_direction(self.index, false);
        Ok(Box::new(SimPinInput { pin: self }))
    }

    fn as_output(&mut self) -> PinResult<Box<dyn PinOutput + '_>> {
        self.driver.set_direction(self.index, true);
        Ok(Box::new(SimPinOutput { pin: self }))
    }
}

impl Drop for SimPin<'_> {
    fn drop(&mut self) {
        self.driver.release(self.index);
    }
}

struct SimPinInput<'a> {
    pin: &'a SimPin<'a>,
}

impl Debug for SimPinInput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.pin)
    }
}

impl PinInput for SimPinInput<'_> {
    fn read(&self) -> PinResult<bool> {
        Ok(self.pin.driver.read_line(self.pin.index))
    }
}

struct SimPinOutput<'a> {
    pin: &'a SimPin<'a>,
}

impl Debug for SimPinOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.pin)
    }
}

impl PinOutput for SimPinOutput<'_> {
    fn write(&self, value: bool) -> PinResult<()> {
        self.pin.driver.write_line(self.pin.index, value);
        Ok(())
    }
}

struct SimBus<'a, const N: usize> {
    driver: &'a SimDriver,
    indices: [usize; N],
}

impl<const N: usize> Debug for SimBus<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}", self.driver, self.indices)
    }
}

impl<const N: usize> PinBus<N> for SimBus<'_, N> {
    fn as_input(&mut self) -> PinResult<Box<dyn PinBusInput<N> + '_>> {
        for &index in &self.indices {
            self.driver.set_direction(index, false);
        }
        Ok(Box::new(SimBusInput { bus: self }))
    }

    fn as_output(&mut self) -> PinResult<Box<dyn PinBusOutput<N> + '_>> {
        for &index in &self.indices {
            self.driver.set_direction(index, true);
        }
        Ok(Box::new(SimBusOutput { bus: self }))
    }
}

impl<const N: usize> Drop for SimBus<'_, N> {
    fn drop(&mut self) {
        for &index in &self.indices {
            self.driver.release(index);
        }
    }
}

struct SimBusInput<'a, const N: usize> {
    bus: &'a SimBus<'a, N>,
}

impl<const N: usize> Debug for SimBusInput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.bus)
    }
}

impl<const N: usize> PinBusInput<N> for SimBusInput<'_, N> {
    fn read(&self) -> PinResult<[bool; N]> {
        let mut values = [false; N];
        for (i, &index) in self.bus.indices.iter().enumerate() {
            values[i] = self.bus.driver.read_line(index);
        }
        Ok(values)
    }
}

struct SimBusOutput<'a, const N: usize> {
    bus: &'a SimBus<'a, N>,
}

impl<const N: usize> Debug for SimBusOutput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.bus)
    }
}

impl<const N: usize> PinBusOutput<N> for SimBusOutput<'_, N> {
    fn write(&self, values: &[bool; N]) -> PinResult<()> {
        for (i, &index) in self.bus.indices.iter().enumerate() {
            self.bus.driver.write_line(index, values[i]);
        }
        Ok(())
    }
}
