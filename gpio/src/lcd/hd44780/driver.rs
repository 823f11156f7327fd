//! The HD44780 bus-protocol engine.
//!
//! One [Hd44780] node per attached controller. The node owns its
//! [PinBackend] outright, so the physical lines cannot be driven from a
//! second call site; callers wanting shared access must serialize it
//! themselves.
//!
//! The bus may run 8 data lines (one enable cycle per byte) or 4 (two
//! nibble cycles, high nibble first). Which encoder a byte goes through is
//! decided per transfer: the controller switches its own interpretation
//! width when it sees a function-set instruction, so the driver watches
//! outgoing instruction bytes and flips its active-width state in step.
//!
//! Instead of sleeping a fixed worst-case interval after every command, the
//! node tracks the monotonic deadline of the previous command and, when the
//! RW line is wired, polls the busy flag on DB7.

use crate::lcd::hd44780::{FN_SET_4BIT, FN_SET_8BIT};
use crate::timing::{self, Deadline, DelayClass};
use crate::{
    GpioError, GpioNode, GpioResult, PSEUDO_PIN_BASE, PinBackend, PinFault, PinId, PinMode, Pull,
};
use log::{debug, error, trace};

/// Bus width the node was wired for, fixed at setup.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum BusWidth {
    FourBit,
    EightBit,
}

/// Pin assignment and capabilities of one display.
#[derive(Copy, Clone, Debug)]
pub struct Hd44780Config {
    /// First pseudo pin of the node's range (two pins wide).
    pub pin_base: PinId,
    /// Enables the read path and the RW pin. When unset, the chip's RW pin
    /// should be tied to ground.
    pub read_enabled: bool,
    /// Enables the 8-bit data bus and pins DB0-DB3. When unset, the chip's
    /// DB0-DB3 pins should be tied to ground.
    pub mode8_enabled: bool,
    /// Register select pin.
    pub pin_rs: PinId,
    /// Read/write pin. Ignored unless `read_enabled`.
    pub pin_rw: PinId,
    /// Enable/strobe pin.
    pub pin_e: PinId,
    /// Data bus pins DB0-DB7. Indices 0-3 are ignored unless
    /// `mode8_enabled`.
    pub pin_db: [PinId; 8],
}

/// One attached HD44780 controller.
#[derive(Debug)]
pub struct Hd44780<B> {
    gpio: B,
    pin_base: PinId,
    read_enabled: bool,
    mode8_enabled: bool,
    pin_rs: PinId,
    pin_rw: PinId,
    pin_e: PinId,
    pin_db: [PinId; 8],
    bus: BusWidth,
    /// Whether the bus is currently transferring eight bits per cycle pair.
    /// Never true unless `mode8_enabled`.
    mode8: bool,
    deadline: Deadline,
}

impl<B: PinBackend> Hd44780<B> {
    /// Validates the pin assignment, puts every used pin into a safe idle
    /// state, primes a 4-bit bus, and returns the ready node.
    ///
    /// Validation is exhaustive: every offending parameter is collected
    /// (and logged) before the call fails, and a failed call performs no
    /// pin writes at all.
    pub fn setup(gpio: B, cfg: &Hd44780Config) -> GpioResult<Self> {
        let mut faults: Vec<PinFault> = Vec::new();
        {
            let mut check = |name: &'static str, pin: PinId| {
                if pin < 0 || (pin >= PSEUDO_PIN_BASE && !gpio.has_pseudo_pin(pin)) {
                    error!("invalid pin number for {name}: {pin}");
                    faults.push(PinFault { name, pin });
                }
            };

            check("pinRS", cfg.pin_rs);
            if cfg.read_enabled {
                check("pinRW", cfg.pin_rw);
            }
            check("pinE", cfg.pin_e);

            check("pinDB7", cfg.pin_db[7]);
            check("pinDB6", cfg.pin_db[6]);
            check("pinDB5", cfg.pin_db[5]);
            check("pinDB4", cfg.pin_db[4]);

            if cfg.mode8_enabled {
                check("pinDB3", cfg.pin_db[3]);
                check("pinDB2", cfg.pin_db[2]);
                check("pinDB1", cfg.pin_db[1]);
                check("pinDB0", cfg.pin_db[0]);
            }
        }
        if !faults.is_empty() {
            return Err(GpioError::InvalidPins(faults));
        }

        let mut node = Hd44780 {
            gpio,
            pin_base: cfg.pin_base,
            read_enabled: cfg.read_enabled,
            mode8_enabled: cfg.mode8_enabled,
            pin_rs: cfg.pin_rs,
            pin_rw: cfg.pin_rw,
            pin_e: cfg.pin_e,
            pin_db: cfg.pin_db,
            bus: if cfg.mode8_enabled {
                BusWidth::EightBit
            } else {
                BusWidth::FourBit
            },
            mode8: cfg.mode8_enabled,
            deadline: Deadline::idle(),
        };

        node.idle_pin(node.pin_rs)?;
        if node.read_enabled {
            node.idle_pin(node.pin_rw)?;
        }
        node.idle_pin(node.pin_e)?;

        node.idle_pin(node.pin_db[7])?;
        node.idle_pin(node.pin_db[6])?;
        node.idle_pin(node.pin_db[5])?;
        node.idle_pin(node.pin_db[4])?;

        if node.mode8_enabled {
            node.idle_pin(node.pin_db[3])?;
            node.idle_pin(node.pin_db[2])?;
            node.idle_pin(node.pin_db[1])?;
            node.idle_pin(node.pin_db[0])?;
        } else {
            // One strobe with only DB5 high forces the controller into the
            // 4-bit state, whatever its power-on state was.
            node.write_cycle_start()?;
            node.gpio.digital_write(node.pin_db[5], true)?;
            node.write_cycle_end()?;
            node.gpio.digital_write(node.pin_db[5], false)?;
            timing::delay_micros(37);
        }

        debug!(
            "hd44780 node at pin base {}: {:?} bus, read {}",
            node.pin_base,
            node.bus,
            if node.read_enabled { "enabled" } else { "disabled" },
        );

        Ok(node)
    }

    /// Writes one byte into CGRAM/DDRAM at the current address counter.
    pub fn write_data(&mut self, byte: u8) -> GpioResult<()> {
        self.write(true, byte)
    }

    /// Sends a control instruction (see [super::cmd]).
    pub fn write_command(&mut self, byte: u8) -> GpioResult<()> {
        self.write(false, byte)
    }

    /// Reads one byte from CGRAM/DDRAM at the current address counter.
    /// Waits for the controller to become ready first.
    pub fn read_data(&mut self) -> GpioResult<u8> {
        self.read(true)
    }

    /// Reads the busy flag (bit 7) and address counter (bits 0-6). Never
    /// waits; observing the busy condition is its purpose.
    pub fn read_status(&mut self) -> GpioResult<u8> {
        self.read(false)
    }

    /// [Self::read_status], split into its two fields.
    pub fn busy_flag_and_address(&mut self) -> GpioResult<(bool, u8)> {
        let status = self.read_status()?;
        Ok((status & 0x80 != 0, status & 0x7F))
    }

    /// Whether the bus is currently in its 8-bit state.
    pub fn is_mode8_active(&self) -> bool {
        self.mode8
    }

    /// Releases the node and hands the pin backend back.
    pub fn into_gpio(self) -> B {
        self.gpio
    }

    fn write(&mut self, rs: bool, byte: u8) -> GpioResult<()> {
        trace!("sending {byte:08b}, RS {rs}");
        match self.bus {
            BusWidth::FourBit => self.write_byte_4(rs, byte),
            BusWidth::EightBit => {
                if !self.mode8 {
                    if !rs && byte & 0xF0 == FN_SET_8BIT {
                        // the controller switches interpretation width
                        // starting with this instruction
                        self.mode8 = true;
                    }
                    return self.write_byte_4(rs, byte);
                }
                if !rs && byte & 0xF0 == FN_SET_4BIT {
                    self.mode8 = false;
                }
                self.write_byte_8(rs, byte)
            }
        }
    }

    fn read(&mut self, rs: bool) -> GpioResult<u8> {
        if !self.read_enabled {
            return Err(GpioError::NotSupported);
        }
        let byte = match self.bus {
            BusWidth::FourBit => self.read_byte_4(rs),
            BusWidth::EightBit => {
                if self.mode8 {
                    self.read_byte_8(rs)
                } else {
                    self.read_byte_4(rs)
                }
            }
        }?;
        trace!("read {byte:08b}, RS {rs}");
        Ok(byte)
    }

    fn write_byte_8(&mut self, rs: bool, byte: u8) -> GpioResult<()> {
        self.wait_while_busy_8()?;

        self.set_status_pins(rs, false)?;
        self.write_cycle_start()?;
        for i in 0..8 {
            self.gpio.digital_write(self.pin_db[i], byte >> i & 1 != 0)?;
        }
        self.write_cycle_end()?;

        self.deadline.record(DelayClass::classify(rs, byte));
        Ok(())
    }

    fn write_byte_4(&mut self, rs: bool, byte: u8) -> GpioResult<()> {
        self.wait_while_busy_4()?;

        self.set_status_pins(rs, false)?;
        self.write_cycle_start()?;
        for i in 4..8 {
            self.gpio.digital_write(self.pin_db[i], byte >> i & 1 != 0)?;
        }
        self.write_cycle_end()?;
        self.write_cycle_start()?;
        for i in 4..8 {
            self.gpio
                .digital_write(self.pin_db[i], byte >> (i - 4) & 1 != 0)?;
        }
        self.write_cycle_end()?;

        self.deadline.record(DelayClass::classify(rs, byte));
        Ok(())
    }

    fn read_byte_8(&mut self, rs: bool) -> GpioResult<u8> {
        if rs {
            // CGRAM/DDRAM read; the status read never waits
            self.wait_while_busy_8()?;
            self.set_status_pins(true, true)?;
        } else {
            self.set_status_pins(false, true)?;
        }

        for i in 0..8 {
            self.gpio.pin_mode(self.pin_db[i], PinMode::Input)?;
        }

        self.read_cycle_start()?;
        let mut byte = 0u8;
        for i in (0..8).rev() {
            byte = byte << 1 | self.gpio.digital_read(self.pin_db[i])? as u8;
        }
        self.read_cycle_end()?;

        for i in 0..8 {
            self.gpio.pin_mode(self.pin_db[i], PinMode::Output)?;
        }

        Ok(byte)
    }

    fn read_byte_4(&mut self, rs: bool) -> GpioResult<u8> {
        for i in 4..8 {
            self.gpio.pin_mode(self.pin_db[i], PinMode::Input)?;
        }

        if rs {
            self.wait_while_busy_4()?;
            self.set_status_pins(true, true)?;
        } else {
            self.set_status_pins(false, true)?;
        }

        let mut byte = 0u8;
        self.read_cycle_start()?;
        for i in (4..8).rev() {
            byte = byte << 1 | self.gpio.digital_read(self.pin_db[i])? as u8;
        }
        self.read_cycle_end()?;

        self.read_cycle_start()?;
        for i in (4..8).rev() {
            byte = byte << 1 | self.gpio.digital_read(self.pin_db[i])? as u8;
        }
        self.read_cycle_end()?;

        for i in 4..8 {
            self.gpio.pin_mode(self.pin_db[i], PinMode::Output)?;
        }

        Ok(byte)
    }

    /// Blocks until the controller can accept the next transfer, polling
    /// the busy flag on DB7 with single-cycle reads.
    fn wait_while_busy_8(&mut self) -> GpioResult<()> {
        if !self.read_enabled {
            self.deadline.sleep_until();
            return Ok(());
        }

        if self.deadline.remaining() > timing::POLL_SLEEP_THRESHOLD {
            // a wait this long only follows the reset-class instructions;
            // sleeping to the deadline beats spinning through poll cycles
            self.deadline.sleep_until();
        }

        self.gpio.pin_mode(self.pin_db[7], PinMode::Input)?;
        self.set_status_pins(false, true)?;
        self.read_cycle_start()?;

        while self.gpio.digital_read(self.pin_db[7])? {
            self.read_cycle_end()?;
            self.read_cycle_start()?;
        }

        self.gpio.pin_mode(self.pin_db[7], PinMode::Output)?;
        self.read_cycle_end()
    }

    /// The 4-bit variant of [Self::wait_while_busy_8]. Every poll carries a
    /// second, ignored nibble cycle; one more follows after the flag
    /// clears. Dropping either desynchronizes the nibble phase of the next
    /// transfer.
    fn wait_while_busy_4(&mut self) -> GpioResult<()> {
        if !self.read_enabled {
            self.deadline.sleep_until();
            return Ok(());
        }

        if self.deadline.remaining() > timing::POLL_SLEEP_THRESHOLD {
            self.deadline.sleep_until();
        }

        self.gpio.pin_mode(self.pin_db[7], PinMode::Input)?;
        self.set_status_pins(false, true)?;
        self.read_cycle_start()?;

        while self.gpio.digital_read(self.pin_db[7])? {
            self.read_cycle_end()?;

            // full cycle, ignoring the second data nibble
            self.read_cycle_start()?;
            self.read_cycle_end()?;

            self.read_cycle_start()?;
        }

        self.gpio.pin_mode(self.pin_db[7], PinMode::Output)?;
        self.read_cycle_end()?;

        // full cycle, ignoring the second data nibble
        self.read_cycle_start()?;
        self.read_cycle_end()
    }

    fn set_status_pins(&mut self, rs: bool, rw: bool) -> GpioResult<()> {
        self.gpio.digital_write(self.pin_rs, rs)?;
        if self.read_enabled {
            self.gpio.digital_write(self.pin_rw, rw)?;
        }
        timing::delay_nanos(timing::STATUS_SETUP_NS);
        Ok(())
    }

    fn write_cycle_start(&mut self) -> GpioResult<()> {
        self.gpio.digital_write(self.pin_e, true)
    }

    fn write_cycle_end(&mut self) -> GpioResult<()> {
        timing::delay_nanos(timing::ENABLE_PULSE_NS);
        self.gpio.digital_write(self.pin_e, false)?;
        timing::delay_nanos(timing::ENABLE_PULSE_NS);
        Ok(())
    }

    fn read_cycle_start(&mut self) -> GpioResult<()> {
        self.gpio.digital_write(self.pin_e, true)?;
        timing::delay_nanos(timing::ENABLE_PULSE_NS);
        Ok(())
    }

    fn read_cycle_end(&mut self) -> GpioResult<()> {
        self.gpio.digital_write(self.pin_e, false)?;
        timing::delay_nanos(timing::ENABLE_PULSE_NS);
        Ok(())
    }

    fn idle_pin(&mut self, pin: PinId) -> GpioResult<()> {
        self.gpio.pull_control(pin, Pull::Up)?;
        self.gpio.pin_mode(pin, PinMode::Output)?;
        self.gpio.digital_write(pin, false)
    }
}

impl<B: PinBackend> GpioNode for Hd44780<B> {
    fn pin_base(&self) -> PinId {
        self.pin_base
    }

    fn num_pins(&self) -> usize {
        2
    }

    /// `base` writes CGRAM/DDRAM, `base + 1` sends an instruction.
    fn digital_write(&mut self, pin: PinId, value: u8) -> GpioResult<()> {
        self.write(pin == self.pin_base, value)
    }

    /// `base` reads CGRAM/DDRAM, `base + 1` the busy flag and address
    /// counter.
    fn digital_read(&mut self, pin: PinId) -> GpioResult<u8> {
        self.read(pin == self.pin_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcd::hd44780::cmd;
    use std::cell::RefCell;
    use std::rc::Rc;

    const PIN_RS: PinId = 7;
    const PIN_RW: PinId = 8;
    const PIN_E: PinId = 9;
    const PIN_DB: [PinId; 8] = [10, 11, 12, 13, 14, 15, 16, 17];
    const PIN_BASE: PinId = 64;

    const NPINS: usize = 32;

    /// Simulated HD44780 on the other end of the wires. Latches written
    /// nibbles/bytes on the enable falling edge and drives the data lines
    /// on the rising edge of read cycles, tracking its own interface width
    /// from the function-set instructions it receives.
    #[derive(Debug)]
    struct LcdState {
        levels: [bool; NPINS],
        modes: [PinMode; NPINS],
        pulls: [Pull; NPINS],
        touched: [bool; NPINS],
        /// The controller's own interface width.
        mode8: bool,
        /// Pending high nibble of a 4-bit write transfer.
        write_nibble: Option<u8>,
        /// Pending low nibble of a 4-bit read transfer.
        read_nibble: Option<u8>,
        addr: usize,
        memory: [u8; 128],
        /// Status polls that will still report the busy flag set.
        busy_polls: u32,
        /// Total enable rising edges seen.
        e_cycles: usize,
        /// Committed transfers: (rs, byte, received over the 8-bit bus).
        committed: Vec<(bool, u8, bool)>,
    }

    impl LcdState {
        fn new(mode8: bool) -> Self {
            LcdState {
                levels: [false; NPINS],
                modes: [PinMode::Input; NPINS],
                pulls: [Pull::Off; NPINS],
                touched: [false; NPINS],
                mode8,
                write_nibble: None,
                read_nibble: None,
                addr: 0,
                memory: [0; 128],
                busy_polls: 0,
                e_cycles: 0,
                committed: Vec::new(),
            }
        }

        fn pin(&self, pin: PinId) -> usize {
            pin as usize
        }

        fn db(&self, i: usize) -> bool {
            self.levels[PIN_DB[i] as usize]
        }

        fn set_db(&mut self, i: usize, level: bool) {
            self.levels[PIN_DB[i] as usize] = level;
        }

        fn status_byte(&self) -> u8 {
            let busy = if self.busy_polls > 0 { 0x80 } else { 0x00 };
            busy | self.addr as u8 & 0x7F
        }

        fn consume_busy_poll(&mut self) {
            if self.busy_polls > 0 {
                self.busy_polls -= 1;
            }
        }

        fn on_e_rise(&mut self) {
            self.e_cycles += 1;
            if !self.levels[PIN_RW as usize] {
                return;
            }
            let rs = self.levels[PIN_RS as usize];
            if self.mode8 {
                let byte = if rs {
                    let b = self.memory[self.addr];
                    self.addr = (self.addr + 1) % 128;
                    b
                } else {
                    let b = self.status_byte();
                    self.consume_busy_poll();
                    b
                };
                for i in 0..8 {
                    self.set_db(i, byte >> i & 1 != 0);
                }
            } else if let Some(low) = self.read_nibble {
                for i in 0..4 {
                    self.set_db(4 + i, low >> i & 1 != 0);
                }
                self.read_nibble = None;
                if rs {
                    self.addr = (self.addr + 1) % 128;
                }
            } else {
                let byte = if rs {
                    self.memory[self.addr]
                } else {
                    let b = self.status_byte();
                    self.consume_busy_poll();
                    b
                };
                for i in 0..4 {
                    self.set_db(4 + i, byte >> (4 + i) & 1 != 0);
                }
                self.read_nibble = Some(byte & 0x0F);
            }
        }

        fn on_e_fall(&mut self) {
            if self.levels[PIN_RW as usize] {
                return;
            }
            let rs = self.levels[PIN_RS as usize];
            if self.mode8 {
                let mut byte = 0u8;
                for i in 0..8 {
                    byte |= (self.db(i) as u8) << i;
                }
                self.commit(rs, byte, true);
            } else {
                let mut nibble = 0u8;
                for i in 0..4 {
                    nibble |= (self.db(4 + i) as u8) << i;
                }
                match self.write_nibble.take() {
                    None => self.write_nibble = Some(nibble),
                    Some(high) => self.commit(rs, high << 4 | nibble, false),
                }
            }
        }

        fn commit(&mut self, rs: bool, byte: u8, eight_bit: bool) {
            self.committed.push((rs, byte, eight_bit));
            if rs {
                self.memory[self.addr] = byte;
                self.addr = (self.addr + 1) % 128;
                return;
            }
            if byte & 0xF0 == FN_SET_8BIT {
                self.mode8 = true;
                self.write_nibble = None;
            } else if byte & 0xF0 == FN_SET_4BIT {
                self.mode8 = false;
                self.write_nibble = None;
            } else if byte >= 0x80 {
                self.addr = (byte & 0x7F) as usize;
            } else if byte == 0x01 {
                self.memory = [0; 128];
                self.addr = 0;
            } else if byte == 0x02 {
                self.addr = 0;
            }
        }
    }

    #[derive(Debug)]
    struct MockLcd(Rc<RefCell<LcdState>>);

    impl MockLcd {
        fn new(mode8: bool) -> (Self, Rc<RefCell<LcdState>>) {
            let state = Rc::new(RefCell::new(LcdState::new(mode8)));
            (MockLcd(state.clone()), state)
        }
    }

    impl PinBackend for MockLcd {
        fn pin_count(&self) -> usize {
            NPINS
        }

        fn pin_mode(&mut self, pin: PinId, mode: PinMode) -> GpioResult<()> {
            let mut st = self.0.borrow_mut();
            let idx = st.pin(pin);
            st.touched[idx] = true;
            st.modes[idx] = mode;
            Ok(())
        }

        fn pull_control(&mut self, pin: PinId, pull: Pull) -> GpioResult<()> {
            let mut st = self.0.borrow_mut();
            let idx = st.pin(pin);
            st.touched[idx] = true;
            st.pulls[idx] = pull;
            Ok(())
        }

        fn digital_write(&mut self, pin: PinId, level: bool) -> GpioResult<()> {
            let mut st = self.0.borrow_mut();
            let idx = st.pin(pin);
            st.touched[idx] = true;
            let prev = st.levels[idx];
            st.levels[idx] = level;
            if pin == PIN_E {
                if level && !prev {
                    st.on_e_rise();
                } else if !level && prev {
                    st.on_e_fall();
                }
            }
            Ok(())
        }

        fn digital_read(&mut self, pin: PinId) -> GpioResult<bool> {
            let st = self.0.borrow();
            Ok(st.levels[pin as usize])
        }
    }

    fn config(read_enabled: bool, mode8_enabled: bool) -> Hd44780Config {
        Hd44780Config {
            pin_base: PIN_BASE,
            read_enabled,
            mode8_enabled,
            pin_rs: PIN_RS,
            pin_rw: PIN_RW,
            pin_e: PIN_E,
            pin_db: PIN_DB,
        }
    }

    #[test]
    fn setup_4bit_primes_the_bus() {
        let (gpio, state) = MockLcd::new(true);
        let node = Hd44780::setup(gpio, &config(true, false)).unwrap();

        let st = state.borrow();
        // the priming strobe arrives as a single 8-bit latch of 0b0010_0000
        assert_eq!(st.committed, vec![(false, 0x20, true)]);
        assert_eq!(st.e_cycles, 1);
        assert!(!st.mode8);
        assert!(!node.is_mode8_active());
        // used pins idle low as outputs with pull-ups
        for pin in [PIN_RS, PIN_RW, PIN_E, PIN_DB[4], PIN_DB[5], PIN_DB[6], PIN_DB[7]] {
            assert_eq!(st.modes[pin as usize], PinMode::Output);
            assert_eq!(st.pulls[pin as usize], Pull::Up);
            assert!(!st.levels[pin as usize]);
        }
    }

    #[test]
    fn setup_8bit_does_not_prime() {
        let (gpio, state) = MockLcd::new(true);
        let node = Hd44780::setup(gpio, &config(true, true)).unwrap();

        let st = state.borrow();
        assert!(st.committed.is_empty());
        assert_eq!(st.e_cycles, 0);
        assert!(node.is_mode8_active());
    }

    #[test]
    fn setup_read_disabled_leaves_rw_and_low_data_lines_alone() {
        let (gpio, state) = MockLcd::new(true);
        Hd44780::setup(gpio, &config(false, false)).unwrap();

        let st = state.borrow();
        assert!(!st.touched[PIN_RW as usize]);
        for i in 0..4 {
            assert!(!st.touched[PIN_DB[i] as usize]);
        }
    }

    #[test]
    fn setup_rejects_invalid_pins_without_side_effects() {
        let (gpio, state) = MockLcd::new(true);
        let mut cfg = config(true, false);
        cfg.pin_rs = -1;
        cfg.pin_db[6] = 99; // pseudo-pin space, nothing registered there

        let err = Hd44780::setup(gpio, &cfg).unwrap_err();
        let GpioError::InvalidPins(faults) = err else {
            panic!("expected InvalidPins, got {err:?}");
        };
        assert_eq!(
            faults,
            vec![
                PinFault {
                    name: "pinRS",
                    pin: -1
                },
                PinFault {
                    name: "pinDB6",
                    pin: 99
                },
            ]
        );

        let st = state.borrow();
        assert!(st.touched.iter().all(|&touched| !touched));
    }

    #[test]
    fn four_bit_writes_round_trip_through_the_decoder() {
        let (gpio, state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, false)).unwrap();

        node.write_command(cmd::set_ddram(0x00)).unwrap();
        node.write_data(0x5A).unwrap();
        node.write_data(0xA5).unwrap();
        node.write_command(cmd::set_ddram(0x00)).unwrap();

        assert_eq!(node.read_data().unwrap(), 0x5A);
        assert_eq!(node.read_data().unwrap(), 0xA5);

        let st = state.borrow();
        // everything after the priming strobe went over the 4-bit bus
        assert!(st.committed[1..].iter().all(|&(_, _, eight)| !eight));
        assert_eq!(st.committed[2], (true, 0x5A, false));
        assert_eq!(st.committed[3], (true, 0xA5, false));
    }

    #[test]
    fn eight_bit_writes_round_trip() {
        let (gpio, _state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, true)).unwrap();

        node.write_command(cmd::set_ddram(0x10)).unwrap();
        node.write_data(b'G').unwrap();
        node.write_command(cmd::set_ddram(0x10)).unwrap();

        assert_eq!(node.read_data().unwrap(), b'G');
    }

    #[test]
    fn width_switch_routes_the_next_write_through_the_8bit_encoder() {
        let (gpio, state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, true)).unwrap();
        assert!(node.is_mode8_active());

        // drop to 4-bit; the switching byte itself still goes out 8-bit
        node.write_command(cmd::function_set(false, true, false))
            .unwrap();
        assert!(!node.is_mode8_active());

        // back to 8-bit; this byte goes out over the 4-bit bus, the state
        // flips before it is transmitted
        node.write_command(cmd::function_set(true, true, false))
            .unwrap();
        assert!(node.is_mode8_active());

        // and the very next write uses the 8-bit encoder
        node.write_command(cmd::on_off(true, false, false)).unwrap();

        let widths: Vec<bool> = state
            .borrow()
            .committed
            .iter()
            .map(|&(_, _, eight)| eight)
            .collect();
        assert_eq!(widths, vec![true, false, true]);
    }

    #[test]
    fn width_switch_is_idempotent() {
        let (gpio, _state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, true)).unwrap();

        node.write_command(cmd::function_set(false, true, false))
            .unwrap();
        assert!(!node.is_mode8_active());
        node.write_command(cmd::function_set(false, true, false))
            .unwrap();
        assert!(!node.is_mode8_active());

        node.write_command(cmd::function_set(true, true, false))
            .unwrap();
        assert!(node.is_mode8_active());
        node.write_command(cmd::function_set(true, true, false))
            .unwrap();
        assert!(node.is_mode8_active());
    }

    #[test]
    fn memory_writes_never_negotiate() {
        let (gpio, _state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, true)).unwrap();

        // same bit pattern as a function-set instruction, but RS is up
        node.write_data(0x28).unwrap();
        assert!(node.is_mode8_active());
    }

    #[test]
    fn four_bit_only_nodes_never_negotiate() {
        let (gpio, state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, false)).unwrap();

        // an 8-bit function set on a 4-bit-only node still goes out as two
        // nibble cycles and flips nothing in the driver
        node.write_command(cmd::function_set(true, true, false))
            .unwrap();
        assert!(!node.is_mode8_active());

        let st = state.borrow();
        assert_eq!(st.committed[1], (false, 0x38, false));
    }

    #[test]
    fn busy_poll_8bit_finishes_one_cycle_after_the_flag_clears() {
        let (gpio, state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, true)).unwrap();
        node.write_command(cmd::on_off(true, false, false)).unwrap();

        let before = {
            let mut st = state.borrow_mut();
            st.busy_polls = 2;
            st.e_cycles
        };
        node.write_data(b'x').unwrap();

        let st = state.borrow();
        // three polls (busy, busy, clear) and the data strobe itself
        assert_eq!(st.e_cycles - before, 3 + 1);
        assert_eq!(st.committed.last(), Some(&(true, b'x', true)));
        // deadline reflects the completed write, ready for the next op
        assert!(node.deadline.remaining() <= DelayClass::Extended.recovery());
    }

    #[test]
    fn busy_poll_4bit_consumes_the_dummy_nibble_cycles() {
        let (gpio, state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, false)).unwrap();
        node.write_command(cmd::on_off(true, false, false)).unwrap();

        let before = {
            let mut st = state.borrow_mut();
            st.busy_polls = 2;
            st.e_cycles
        };
        node.write_data(b'x').unwrap();

        let st = state.borrow();
        // three polls, two in-loop dummy cycles, one closing dummy cycle,
        // then the two nibble strobes of the write
        assert_eq!(st.e_cycles - before, 3 + 2 + 1 + 2);
        assert_eq!(st.committed.last(), Some(&(true, b'x', false)));
        // the nibble phase stayed aligned: the byte arrived intact
        assert_eq!(st.read_nibble, None);
        assert_eq!(st.write_nibble, None);
    }

    #[test]
    fn status_read_reports_busy_flag_and_address() {
        let (gpio, state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, false)).unwrap();

        node.write_command(cmd::set_ddram(0x40)).unwrap();
        state.borrow_mut().busy_polls = 1;

        assert_eq!(node.busy_flag_and_address().unwrap(), (true, 0x40));
        assert_eq!(node.busy_flag_and_address().unwrap(), (false, 0x40));
    }

    #[test]
    fn reads_require_the_read_capability() {
        let (gpio, _state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(false, false)).unwrap();
        assert_eq!(node.read_status().unwrap_err(), GpioError::NotSupported);
        assert_eq!(node.read_data().unwrap_err(), GpioError::NotSupported);
    }

    #[test]
    fn read_disabled_writes_blind_sleep_to_the_deadline() {
        let (gpio, state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(false, false)).unwrap();

        node.write_data(b'a').unwrap();
        node.write_data(b'b').unwrap();

        let st = state.borrow();
        assert_eq!(st.committed[1], (true, b'a', false));
        assert_eq!(st.committed[2], (true, b'b', false));
        // no status polls happened: two nibble strobes per byte, plus the
        // priming strobe
        assert_eq!(st.e_cycles, 1 + 2 + 2);
    }

    #[test]
    fn pseudo_pin_dispatch_maps_base_and_base_plus_one() {
        let (gpio, state) = MockLcd::new(true);
        let mut node = Hd44780::setup(gpio, &config(true, false)).unwrap();

        GpioNode::digital_write(&mut node, PIN_BASE + 1, cmd::set_ddram(0x08)).unwrap();
        GpioNode::digital_write(&mut node, PIN_BASE, b'Q').unwrap();

        {
            let st = state.borrow();
            assert_eq!(st.committed[1], (false, cmd::set_ddram(0x08), false));
            assert_eq!(st.committed[2], (true, b'Q', false));
        }

        // base + 1 reads the address counter, base reads memory
        let status = GpioNode::digital_read(&mut node, PIN_BASE + 1).unwrap();
        assert_eq!(status, 0x09);
        GpioNode::digital_write(&mut node, PIN_BASE + 1, cmd::set_ddram(0x08)).unwrap();
        assert_eq!(GpioNode::digital_read(&mut node, PIN_BASE).unwrap(), b'Q');

        assert_eq!(node.pin_base(), PIN_BASE);
        assert_eq!(node.num_pins(), 2);
    }
}
