use crate::lcd::hd44780::driver::{BusyWait, CursorDirection, Hd44780Driver};
use crate::{PinBus, PinError, PinOutput, PinResult};
use log::trace;
use std::thread::sleep;
use std::time::Duration;

/// HD44780 driver over eleven GPIO lines: RS, R/W, E and the eight data
/// lines (`db0` first).
///
/// Owns the lines for its whole lifetime. The data bus changes direction
/// per transaction: outputs while a byte is driven out, inputs while the
/// busy flag is polled back. Every send is followed by the busy-flag
/// handshake, so steady-state operation needs no tuned delays; the fixed
/// settle times only appear in [Hd44780Driver::init], where the protocol
/// mandates them.
#[derive(Debug)]
pub struct GpioHd44780Driver<'a> {
    pin_rs: &'a dyn PinOutput,
    pin_rw: &'a dyn PinOutput,
    pin_en: &'a dyn PinOutput,
    data_bus: &'a mut dyn PinBus<8>,
    busy_wait: BusyWait,
}

impl<'a> GpioHd44780Driver<'a> {
    /// Settle time after power-on before the first instruction.
    const POWER_ON_SETTLE: Duration = Duration::from_millis(40);
    /// Settle time after the first synchronization instruction.
    const SYNC_SETTLE_FIRST: Duration = Duration::from_micros(4100);
    /// Settle time after the second synchronization instruction.
    const SYNC_SETTLE_SECOND: Duration = Duration::from_micros(100);
    /// Hold time for each edge of the enable strobe.
    const ENABLE_HOLD: Duration = Duration::from_micros(1);
    /// Processing settle folded into the tail of the strobe, covering
    /// sends that are not followed by a handshake.
    const ENABLE_SETTLE: Duration = Duration::from_micros(100);

    /// Function set, 8-bit bus: the synchronization instruction the init
    /// sequence sends three times.
    const SYNC_FUNCTION_SET: u8 = 0b00110000;

    /// Wires up a driver on the given output lines and data bus.
    ///
    /// Parks the enable line low so the first strobe has a clean edge;
    /// the data lines are not touched until the first transaction.
    pub fn new(
        pin_rs: &'a dyn PinOutput,
        pin_rw: &'a dyn PinOutput,
        pin_en: &'a dyn PinOutput,
        data_bus: &'a mut dyn PinBus<8>,
    ) -> PinResult<Self> {
        pin_en.write(false)?;
        Ok(GpioHd44780Driver {
            pin_rs,
            pin_rw,
            pin_en,
            data_bus,
            busy_wait: BusyWait::default(),
        })
    }

    /// Replaces the default unbounded busy-flag poll with the given
    /// policy.
    pub fn with_busy_wait(mut self, busy_wait: BusyWait) -> Self {
        self.busy_wait = busy_wait;
        self
    }

    fn pulse_enable(pin: &dyn PinOutput) -> PinResult<()> {
        pin.write(false)?;
        sleep(Self::ENABLE_HOLD);
        pin.write(true)?;
        sleep(Self::ENABLE_HOLD);
        pin.write(false)?;
        sleep(Self::ENABLE_SETTLE);
        Ok(())
    }

    /// Drives one byte onto the bus and strobes it in. Does not wait for
    /// completion; callers follow up with [Self::wait] where the protocol
    /// requires the acknowledgment.
    fn send(&mut self, value: u8, rs: bool) -> PinResult<()> {
        trace!("Sending {:08b}, RS: {}", value, rs);

        let bus = self.data_bus.as_output()?;

        self.pin_rs.write(rs)?;
        self.pin_rw.write(false)?;

        bus.write_byte(value)?;

        Self::pulse_enable(self.pin_en)
    }

    /// The busy-flag handshake: polls data line 7 until the controller
    /// reports ready.
    fn wait(&mut self) -> PinResult<()> {
        // The flag comes back on data line 7, so the bus flips to input.
        let input = self.data_bus.as_input()?;

        self.pin_rs.write(false)?;
        self.pin_rw.write(true)?;

        let mut polls = 0u32;
        loop {
            self.pin_en.write(true)?;
            sleep(Self::ENABLE_HOLD);
            let busy = input.read()?[7];
            self.pin_en.write(false)?;

            if !busy {
                break;
            }

            polls += 1;
            if let BusyWait::Bounded { max_polls } = self.busy_wait {
                if polls >= max_polls {
                    self.pin_rw.write(false)?;
                    return Err(PinError::BusyTimeout);
                }
            }
        }

        self.pin_rw.write(false)?;
        Ok(())
    }

    /// Reads one byte back from the controller during an enable pulse.
    fn read(&mut self, rs: bool) -> PinResult<u8> {
        let input = self.data_bus.as_input()?;

        self.pin_rs.write(rs)?;
        self.pin_rw.write(true)?;
        sleep(Self::ENABLE_HOLD);

        self.pin_en.write(true)?;
        sleep(Self::ENABLE_HOLD);
        let value = input.read_byte()?;
        self.pin_en.write(false)?;
        sleep(Self::ENABLE_HOLD);

        self.pin_rw.write(false)?;

        trace!("Read {:08b}, RS: {}", value, rs);

        Ok(value)
    }
}

impl Hd44780Driver for GpioHd44780Driver<'_> {
    /// The documented power-on sequence:
    ///
    /// 1. ≥ 40 ms power-on settle;
    /// 2. function set `00110000`, ≥ 4100 µs settle;
    /// 3. the same again, ≥ 100 µs settle;
    /// 4. the same again, busy-flag handshake from here on;
    /// 5. function set with the requested line count and font;
    /// 6. display off;
    /// 7. clear;
    /// 8. entry mode: increment, no display shift;
    /// 9. display on, cursor shown, blink off.
    ///
    /// The first two settles are fixed delays: the busy flag cannot be
    /// read before the controller is synchronized to the 8-bit bus.
    fn init(&mut self, two_lines: bool, alt_font: bool) -> PinResult<()> {
        sleep(Self::POWER_ON_SETTLE);

        self.send(Self::SYNC_FUNCTION_SET, false)?;
        sleep(Self::SYNC_SETTLE_FIRST);

        self.send(Self::SYNC_FUNCTION_SET, false)?;
        sleep(Self::SYNC_SETTLE_SECOND);

        self.send_command(Self::SYNC_FUNCTION_SET)?;

        self.function_set(two_lines, alt_font)?;
        self.turn_off()?;
        self.clear_display()?;
        self.set_entry_mode(CursorDirection::Right, false)?;
        self.turn_on(true, false)?;

        Ok(())
    }

    fn send_command(&mut self, command: u8) -> PinResult<()> {
        self.send(command, false)?;
        self.wait()
    }

    fn send_data(&mut self, data: u8) -> PinResult<()> {
        self.send(data, true)?;
        self.wait()
    }

    fn read_command(&mut self) -> PinResult<u8> {
        self.read(false)
    }

    fn read_data(&mut self) -> PinResult<u8> {
        self.read(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PinDriver;
    use crate::sim::{SimDriver, SimEvent, SimEventKind};
    use std::time::Instant;

    const RS: usize = 0;
    const RW: usize = 1;
    const EN: usize = 2;
    const DATA: [usize; 8] = [3, 4, 5, 6, 7, 8, 9, 10];
    const BUSY_LINE: usize = DATA[7];

    /// Claims the eleven panel lines from `$sim` and wires `$lcd` up to
    /// them, like the binary does against real hardware.
    macro_rules! setup_panel {
        ($sim:ident, $lcd:ident) => {
            setup_panel!($sim, $lcd, BusyWait::default());
        };
        ($sim:ident, $lcd:ident, $busy_wait:expr) => {
            let mut rs_pin = $sim.claim_line(RS).unwrap();
            let rs_out = rs_pin.as_output().unwrap();
            let mut rw_pin = $sim.claim_line(RW).unwrap();
            let rw_out = rw_pin.as_output().unwrap();
            let mut en_pin = $sim.claim_line(EN).unwrap();
            let en_out = en_pin.as_output().unwrap();
            let mut data_bus = $sim.claim_bus(DATA).unwrap();
            let mut $lcd = GpioHd44780Driver::new(&*rs_out, &*rw_out, &*en_out, &mut *data_bus)
                .unwrap()
                .with_busy_wait($busy_wait);
        };
    }

    /// What the simulated panel saw, one entry per committed transaction
    /// (enable falling edge in write mode) or busy-flag sample.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    enum BusActivity {
        Commit { rs: bool, data: u8 },
        Poll { busy: bool },
    }

    fn cmd(data: u8) -> BusActivity {
        BusActivity::Commit { rs: false, data }
    }

    fn dat(data: u8) -> BusActivity {
        BusActivity::Commit { rs: true, data }
    }

    fn poll(busy: bool) -> BusActivity {
        BusActivity::Poll { busy }
    }

    fn decode(events: &[SimEvent]) -> Vec<BusActivity> {
        let mut levels = [false; 11];
        let mut activity = Vec::new();

        for event in events {
            match event.kind {
                SimEventKind::Write(level) => {
                    let previous = levels[event.line];
                    levels[event.line] = level;
                    if event.line == EN && previous && !level && !levels[RW] {
                        let mut data = 0u8;
                        for (bit, &line) in DATA.iter().enumerate() {
                            if levels[line] {
                                data |= 1 << bit;
                            }
                        }
                        activity.push(BusActivity::Commit {
                            rs: levels[RS],
                            data,
                        });
                    }
                }
                SimEventKind::Read(value) if event.line == BUSY_LINE => {
                    activity.push(BusActivity::Poll { busy: value });
                }
                _ => {}
            }
        }

        activity
    }

    /// Instants of the enable falling edges that commit a write.
    fn commit_instants(events: &[SimEvent]) -> Vec<Instant> {
        let mut en = false;
        let mut rw = false;
        let mut instants = Vec::new();

        for event in events {
            if let SimEventKind::Write(level) = event.kind {
                if event.line == RW {
                    rw = level;
                } else if event.line == EN {
                    if en && !level && !rw {
                        instants.push(event.at);
                    }
                    en = level;
                }
            }
        }

        instants
    }

    fn position(events: &[SimEvent], pred: impl Fn(&SimEvent) -> bool) -> usize {
        events.iter().position(pred).unwrap()
    }

    fn rposition(events: &[SimEvent], pred: impl Fn(&SimEvent) -> bool) -> usize {
        events.iter().rposition(pred).unwrap()
    }

    #[test]
    fn test_send_programs_outputs_before_driving() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);
        sim.take_events();

        lcd.send_command(0b01010101).unwrap();

        let events = sim.events();
        let last_output_flip = rposition(&events, |e| {
            DATA.contains(&e.line) && e.kind == SimEventKind::SetOutput
        });
        let first_data_drive = position(&events, |e| {
            DATA.contains(&e.line) && matches!(e.kind, SimEventKind::Write(_))
        });
        assert!(last_output_flip < first_data_drive);

        let rs_set = position(&events, |e| e.line == RS);
        let rw_set = position(&events, |e| e.line == RW);
        let strobe_rise = position(&events, |e| e.line == EN && e.kind == SimEventKind::Write(true));
        assert!(rs_set < strobe_rise);
        assert!(rw_set < strobe_rise);
    }

    #[test]
    fn test_wait_flips_bus_to_inputs_and_polls_until_ready() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);
        sim.script_reads(BUSY_LINE, [true, true, false]);
        sim.take_events();

        lcd.send_command(0b00000001).unwrap();

        assert_eq!(
            decode(&sim.events()),
            vec![cmd(0b00000001), poll(true), poll(true), poll(false)],
        );

        let events = sim.events();
        let last_input_flip = rposition(&events, |e| {
            DATA.contains(&e.line) && e.kind == SimEventKind::SetInput
        });
        let first_sample = position(&events, |e| matches!(e.kind, SimEventKind::Read(_)));
        assert!(last_input_flip < first_sample);

        // R/W goes high for the status reads and back low afterwards.
        let read_mode = position(&events, |e| e.line == RW && e.kind == SimEventKind::Write(true));
        let write_mode = rposition(&events, |e| {
            e.line == RW && e.kind == SimEventKind::Write(false)
        });
        assert!(read_mode < first_sample);
        let last_sample = rposition(&events, |e| matches!(e.kind, SimEventKind::Read(_)));
        assert!(write_mode > last_sample);
    }

    #[test]
    fn test_init_runs_the_documented_sequence() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);
        sim.script_reads(BUSY_LINE, [true, false].repeat(6));
        sim.take_events();

        let before_init = Instant::now();
        lcd.init(true, false).unwrap();

        assert_eq!(
            decode(&sim.events()),
            vec![
                // Three sync sends; the first two settle on fixed delays.
                cmd(0b00110000),
                cmd(0b00110000),
                cmd(0b00110000),
                poll(true),
                poll(false),
                // Function set: 8-bit bus, two lines, 5x8 font.
                cmd(0b00111000),
                poll(true),
                poll(false),
                // Display off.
                cmd(0b00001000),
                poll(true),
                poll(false),
                // Clear.
                cmd(0b00000001),
                poll(true),
                poll(false),
                // Entry mode: increment, no shift.
                cmd(0b00000110),
                poll(true),
                poll(false),
                // Display on, cursor shown, blink off.
                cmd(0b00001110),
                poll(true),
                poll(false),
            ],
        );

        // The mandated settle times separate the first three commits.
        let commits = commit_instants(&sim.events());
        assert!(commits[0] - before_init >= Duration::from_millis(40));
        assert!(commits[1] - commits[0] >= Duration::from_micros(4100));
        assert!(commits[2] - commits[1] >= Duration::from_micros(100));
    }

    #[test]
    fn test_print_is_one_acknowledged_transaction_per_character() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);
        sim.take_events();

        lcd.print("HI").unwrap();
        assert_eq!(
            decode(&sim.events()),
            vec![dat(b'H'), poll(false), dat(b'I'), poll(false)],
        );

        sim.take_events();
        lcd.print("").unwrap();
        assert!(sim.events().is_empty());

        lcd.print_char('é').unwrap();
        assert_eq!(decode(&sim.events()), vec![dat(b'?'), poll(false)]);
    }

    #[test]
    fn test_set_cursor_addressing() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);
        sim.take_events();

        lcd.set_cursor(0, 5).unwrap();
        lcd.set_cursor(1, 3).unwrap();

        // Cursor moves are acknowledged like every other instruction.
        assert_eq!(
            decode(&sim.events()),
            vec![cmd(0b10000101), poll(false), cmd(0b11000011), poll(false)],
        );

        sim.take_events();
        assert_eq!(lcd.set_cursor(2, 0), Err(PinError::InvalidArgument));
        assert_eq!(lcd.set_cursor(0, 40), Err(PinError::InvalidArgument));
        // Nothing reached the bus.
        assert!(sim.events().is_empty());
    }

    #[test]
    fn test_display_control_ops_are_single_transactions() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);

        sim.take_events();
        lcd.clear_display().unwrap();
        assert_eq!(decode(&sim.events()), vec![cmd(0b00000001), poll(false)]);

        sim.take_events();
        lcd.turn_off().unwrap();
        assert_eq!(decode(&sim.events()), vec![cmd(0b00001000), poll(false)]);

        sim.take_events();
        lcd.turn_on(true, false).unwrap();
        assert_eq!(decode(&sim.events()), vec![cmd(0b00001110), poll(false)]);

        sim.take_events();
        lcd.turn_on(false, true).unwrap();
        assert_eq!(decode(&sim.events()), vec![cmd(0b00001101), poll(false)]);
    }

    #[test]
    fn test_shift_operations_encode_direction_and_target() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);
        sim.take_events();

        lcd.shift_cursor(CursorDirection::Left).unwrap();
        lcd.shift_cursor(CursorDirection::Right).unwrap();
        lcd.shift_display(CursorDirection::Left).unwrap();
        lcd.shift_display(CursorDirection::Right).unwrap();

        assert_eq!(
            decode(&sim.events()),
            vec![
                cmd(0b00010000),
                poll(false),
                cmd(0b00010100),
                poll(false),
                cmd(0b00011000),
                poll(false),
                cmd(0b00011100),
                poll(false),
            ],
        );
    }

    #[test]
    fn test_define_glyph_uploads_cgram_rows() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);
        sim.take_events();

        let arrow = [
            0b00100, 0b01110, 0b10101, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000,
        ];
        lcd.define_glyph(2, &arrow).unwrap();

        let mut expected = vec![cmd(0b01010000), poll(false)];
        for row in arrow {
            expected.push(dat(row));
            expected.push(poll(false));
        }
        assert_eq!(decode(&sim.events()), expected);

        sim.take_events();
        assert_eq!(
            lcd.define_glyph(8, &arrow),
            Err(PinError::InvalidArgument),
        );
        assert!(sim.events().is_empty());
    }

    #[test]
    fn test_busy_flag_and_address_read_back() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);

        // Status byte 0b00101101: ready, address counter at 0x2D.
        for bit in [0, 2, 3, 5] {
            sim.script_reads(DATA[bit], [true]);
        }

        assert_eq!(lcd.busy_flag_and_address().unwrap(), (false, 0x2D));
    }

    #[test]
    fn test_bounded_busy_wait_times_out() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd, BusyWait::Bounded { max_polls: 3 });
        sim.script_reads(BUSY_LINE, vec![true; 10]);
        sim.take_events();

        assert_eq!(lcd.send_command(0b00000001), Err(PinError::BusyTimeout));

        // Exactly the poll budget was spent before giving up.
        assert_eq!(
            decode(&sim.events()),
            vec![cmd(0b00000001), poll(true), poll(true), poll(true)],
        );
    }

    #[test]
    fn test_init_then_print_scenario() {
        let sim = SimDriver::new(11);
        setup_panel!(sim, lcd);
        sim.script_reads(BUSY_LINE, [true, false].repeat(8));
        sim.take_events();

        lcd.init(true, false).unwrap();
        lcd.print("HI").unwrap();

        let activity = decode(&sim.events());
        let commits: Vec<_> = activity
            .iter()
            .filter(|a| matches!(a, BusActivity::Commit { .. }))
            .copied()
            .collect();
        assert_eq!(
            commits,
            vec![
                cmd(0b00110000),
                cmd(0b00110000),
                cmd(0b00110000),
                cmd(0b00111000),
                cmd(0b00001000),
                cmd(0b00000001),
                cmd(0b00000110),
                cmd(0b00001110),
                dat(b'H'),
                dat(b'I'),
            ],
        );

        // Every data transaction ends with a not-busy acknowledgment.
        let mut last = None;
        for a in &activity {
            if let BusActivity::Poll { busy } = a {
                last = Some(*busy);
            }
        }
        assert_eq!(last, Some(false));
    }
}
