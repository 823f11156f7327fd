//! Memory-mapped GPIO backend for BCM283x-based boards.
//!
//! Programs the GPFSEL/GPSET/GPCLR/GPLEV/GPIO_PUP_PDN_CNTRL registers
//! directly through `/dev/gpiomem` (or `/dev/mem`), so pin writes are a
//! single volatile store. That is what makes the sub-microsecond strobe
//! timing of the LCD bus workable.

use crate::{GpioError, GpioResult, PinBackend, PinId, PinMode, Pull};
use memmap2::{MmapOptions, MmapRaw};
use std::fmt::{Debug, Formatter};
use std::fs::OpenOptions;

pub struct RawGpio {
    mmap: MmapRaw,
}

impl RawGpio {
    const GPIO_BASE: u32 = 0x3F200000;

    const PIN_COUNT: usize = 58;

    fn create(path: &str) -> GpioResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mmap = MmapOptions::new()
            .offset(Self::GPIO_BASE as u64)
            .len(4096)
            .map_raw(&file)?;

        Ok(RawGpio { mmap })
    }

    /// Maps the GPIO block through `/dev/gpiomem` (no root required).
    pub fn new_gpiomem() -> GpioResult<Self> {
        Self::create("/dev/gpiomem")
    }

    /// Maps the GPIO block through `/dev/mem`.
    pub fn new_mem() -> GpioResult<Self> {
        Self::create("/dev/mem")
    }

    fn pin_index(pin: PinId) -> GpioResult<usize> {
        if pin < 0 || pin as usize >= Self::PIN_COUNT {
            return Err(GpioError::InvalidArgument);
        }
        Ok(pin as usize)
    }

    fn set_pin_function(&self, pin_index: usize, function: u32) {
        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        // GPFSELn register
        let register_ptr = unsafe { mmap.add(pin_index / 10) };
        let shift = (pin_index % 10) * 3;

        let mut register_value = unsafe { register_ptr.read_volatile() };
        register_value &= !(0b111 << shift);
        register_value |= function << shift;
        unsafe { register_ptr.write_volatile(register_value) };
    }
}

impl Debug for RawGpio {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawGpio({:?})", self.mmap.as_ptr().addr())
    }
}

impl PinBackend for RawGpio {
    fn pin_count(&self) -> usize {
        Self::PIN_COUNT
    }

    fn pin_mode(&mut self, pin: PinId, mode: PinMode) -> GpioResult<()> {
        let pin_index = Self::pin_index(pin)?;
        let function = match mode {
            PinMode::Input => 0,
            PinMode::Output => 1,
        };
        self.set_pin_function(pin_index, function);
        Ok(())
    }

    fn pull_control(&mut self, pin: PinId, pull: Pull) -> GpioResult<()> {
        let pin_index = Self::pin_index(pin)?;
        let pull_value: u32 = match pull {
            Pull::Off => 0b00,
            Pull::Up => 0b01,
            Pull::Down => 0b10,
        };

        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        // GPIO_PUP_PDN_CNTRL_REGn register
        let register_ptr = unsafe { mmap.add(0xE4 / 4 + pin_index / 16) };
        let shift = (pin_index % 16) * 2;

        let mut register_value = unsafe { register_ptr.read_volatile() };
        register_value &= !(0b11 << shift);
        register_value |= pull_value << shift;
        unsafe { register_ptr.write_volatile(register_value) };

        Ok(())
    }

    fn digital_write(&mut self, pin: PinId, level: bool) -> GpioResult<()> {
        let pin_index = Self::pin_index(pin)?;

        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        // GPSETn/GPCLRn register
        let register_ptr = unsafe {
            mmap.add(if level { 0x1C / 4 } else { 0x28 / 4 } + pin_index / 32)
        };
        let shift = pin_index % 32;

        unsafe { register_ptr.write_volatile(1 << shift) };

        Ok(())
    }

    fn digital_read(&mut self, pin: PinId) -> GpioResult<bool> {
        let pin_index = Self::pin_index(pin)?;

        let mmap = self.mmap.as_ptr() as *const u32;
        // GPLEVn register
        let register_ptr = unsafe { mmap.add(0x34 / 4 + pin_index / 32) };
        let shift = pin_index % 32;

        let register_value = unsafe { register_ptr.read_volatile() };
        Ok((register_value >> shift) & 1 != 0)
    }
}
