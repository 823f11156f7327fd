//! GPIO backend on top of the `gpiod` character-device interface.
//!
//! Line requests through `/dev/gpiochipN` are noticeably slower than the
//! memory-mapped path, so this backend is mostly useful on boards where
//! `/dev/gpiomem` is unavailable or when the raw register layout differs.

use crate::{GpioError, GpioResult, PinBackend, PinId, PinMode, Pull};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

pub struct GpiodBackend {
    chip: gpiod::Chip,
    lines: HashMap<PinId, Line>,
    pulls: HashMap<PinId, Pull>,
}

enum Line {
    Input(gpiod::Lines<gpiod::Input>),
    /// Output request plus the last level written to it. The character
    /// device cannot read back an output line, so reads return the cache.
    Output(gpiod::Lines<gpiod::Output>, bool),
}

impl GpiodBackend {
    pub fn new(chip: gpiod::Chip) -> Self {
        Self {
            chip,
            lines: HashMap::new(),
            pulls: HashMap::new(),
        }
    }

    fn check_pin(&self, pin: PinId) -> GpioResult<u32> {
        if pin < 0 || pin as u32 >= self.chip.num_lines() {
            return Err(GpioError::InvalidArgument);
        }
        Ok(pin as u32)
    }

    fn bias(&self, pin: PinId) -> gpiod::Bias {
        self.pulls.get(&pin).copied().unwrap_or_default().into()
    }

    /// Ensures the pin is held as an input request.
    fn request_input(&mut self, pin: PinId) -> GpioResult<()> {
        let offset = self.check_pin(pin)?;

        if !matches!(self.lines.get(&pin), Some(Line::Input(_))) {
            // Release any previous request on the line before re-requesting.
            self.lines.remove(&pin);
            let line = self.chip.request_lines(
                gpiod::Options::input([offset])
                    .consumer(env!("CARGO_PKG_NAME"))
                    .bias(self.bias(pin)),
            )?;
            self.lines.insert(pin, Line::Input(line));
        }
        Ok(())
    }

    /// Ensures the pin is held as an output request.
    fn request_output(&mut self, pin: PinId) -> GpioResult<()> {
        let offset = self.check_pin(pin)?;

        if !matches!(self.lines.get(&pin), Some(Line::Output(..))) {
            self.lines.remove(&pin);
            let line = self.chip.request_lines(
                gpiod::Options::output([offset])
                    .consumer(env!("CARGO_PKG_NAME"))
                    .bias(self.bias(pin)),
            )?;
            self.lines.insert(pin, Line::Output(line, false));
        }
        Ok(())
    }

    fn write_output(&mut self, pin: PinId, level: bool) -> GpioResult<()> {
        match self.lines.get_mut(&pin) {
            Some(Line::Output(line, cached)) => {
                line.set_values([level])?;
                *cached = level;
                Ok(())
            }
            _ => Err(GpioError::InvalidArgument),
        }
    }
}

impl Debug for GpiodBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodBackend({})", self.chip.name())
    }
}

impl From<Pull> for gpiod::Bias {
    fn from(pull: Pull) -> Self {
        match pull {
            Pull::Off => gpiod::Bias::Disable,
            Pull::Up => gpiod::Bias::PullUp,
            Pull::Down => gpiod::Bias::PullDown,
        }
    }
}

impl PinBackend for GpiodBackend {
    fn pin_count(&self) -> usize {
        self.chip.num_lines() as usize
    }

    fn pin_mode(&mut self, pin: PinId, mode: PinMode) -> GpioResult<()> {
        match mode {
            PinMode::Input => self.request_input(pin),
            PinMode::Output => self.request_output(pin),
        }
    }

    fn pull_control(&mut self, pin: PinId, pull: Pull) -> GpioResult<()> {
        self.check_pin(pin)?;
        self.pulls.insert(pin, pull);

        // An already-requested line has to be re-requested for the bias to
        // take effect. Note the previous request's direction and level,
        // then drop it before requesting again.
        let previous = self.lines.remove(&pin);
        let direction = previous.as_ref().map(|line| match line {
            Line::Input(_) => None,
            Line::Output(_, level) => Some(*level),
        });
        drop(previous);

        match direction {
            Some(None) => self.request_input(pin),
            Some(Some(level)) => {
                self.request_output(pin)?;
                self.write_output(pin, level)
            }
            None => Ok(()),
        }
    }

    fn digital_write(&mut self, pin: PinId, level: bool) -> GpioResult<()> {
        self.request_output(pin)?;
        self.write_output(pin, level)
    }

    fn digital_read(&mut self, pin: PinId) -> GpioResult<bool> {
        self.check_pin(pin)?;
        if let Some(Line::Output(_, level)) = self.lines.get(&pin) {
            return Ok(*level);
        }

        self.request_input(pin)?;
        match self.lines.get(&pin) {
            Some(Line::Input(line)) => {
                let values = line.get_values([false])?;
                Ok(values[0])
            }
            _ => Err(GpioError::InvalidArgument),
        }
    }
}
