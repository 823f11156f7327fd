use crate::{GpioError, GpioResult};
use memmap2::MmapRaw;
use std::fmt::{Debug, Formatter};

/// A volatile `u32` register block.
///
/// Accesses are bounds-checked against the mapped length and addressed by
/// byte offset, the same way the datasheets list the registers.
pub struct PwmRegisters {
    ptr: *mut u32,
    len_words: usize,
    _backing: Backing,
}

enum Backing {
    Mmap(MmapRaw),
    Buffer(Box<[u32]>),
}

impl PwmRegisters {
    /// Wraps a raw memory mapping of the peripheral.
    pub fn from_mmap(mmap: MmapRaw) -> Self {
        let ptr = mmap.as_mut_ptr() as *mut u32;
        let len_words = mmap.len() / 4;
        Self {
            ptr,
            len_words,
            _backing: Backing::Mmap(mmap),
        }
    }

    /// Backs the block with an owned zeroed buffer instead of hardware.
    pub fn buffer(len_words: usize) -> Self {
        let mut buffer = vec![0u32; len_words].into_boxed_slice();
        let ptr = buffer.as_mut_ptr();
        Self {
            ptr,
            len_words,
            _backing: Backing::Buffer(buffer),
        }
    }

    fn word_index(&self, offset: usize) -> GpioResult<usize> {
        if offset % 4 != 0 || offset / 4 >= self.len_words {
            return Err(GpioError::InvalidArgument);
        }
        Ok(offset / 4)
    }

    /// Reads the whole register at a byte offset.
    pub fn read(&self, offset: usize) -> GpioResult<u32> {
        let index = self.word_index(offset)?;
        Ok(unsafe { self.ptr.add(index).read_volatile() })
    }

    /// Writes the whole register at a byte offset.
    pub fn write(&self, offset: usize, value: u32) -> GpioResult<()> {
        let index = self.word_index(offset)?;
        unsafe { self.ptr.add(index).write_volatile(value) };
        Ok(())
    }

    /// Reads a named field.
    pub fn get(&self, field: Field) -> GpioResult<u32> {
        let register_value = self.read(field.offset)?;
        Ok((register_value & field.mask()) >> field.shift)
    }

    /// Read-modify-writes a named field. Rejects values wider than the
    /// field.
    pub fn set(&self, field: Field, value: u32) -> GpioResult<()> {
        if value > field.mask() >> field.shift {
            return Err(GpioError::InvalidArgument);
        }
        let mut register_value = self.read(field.offset)?;
        register_value &= !field.mask();
        register_value |= value << field.shift;
        self.write(field.offset, register_value)
    }
}

impl Debug for PwmRegisters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PwmRegisters({} words)", self.len_words)
    }
}

/// A bit field inside a register, addressed by register byte offset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Field {
    pub offset: usize,
    pub shift: u32,
    pub width: u32,
}

impl Field {
    pub const fn new(offset: usize, shift: u32, width: u32) -> Self {
        Self {
            offset,
            shift,
            width,
        }
    }

    pub const fn mask(&self) -> u32 {
        (u32::MAX >> (32 - self.width)) << self.shift
    }
}

/// PWM block of the BCM2835/BCM2836/BCM2837/BCM2711 and RP3A0 SoCs.
///
/// Channels are numbered 0 and 1 here; the Broadcom documentation calls
/// them 1 and 2.
pub mod bcm {
    use super::Field;

    pub const CTRL: usize = 0x00;
    pub const STATUS: usize = 0x04;
    pub const DMA_CONF: usize = 0x08;
    pub const CHAN0_RANGE: usize = 0x0C;
    pub const CHAN0_DATA: usize = 0x10;
    pub const FIFO_IN: usize = 0x14;
    pub const CHAN1_RANGE: usize = 0x18;
    pub const CHAN1_DATA: usize = 0x1C;

    pub const fn chan_range(chan: usize) -> usize {
        CHAN0_RANGE + chan * 0x0C
    }

    pub const fn chan_data(chan: usize) -> usize {
        CHAN0_DATA + chan * 0x0C
    }

    // CTRL packs the two channels into the low and high byte.
    const fn chan_ctrl_field(chan: usize, bit: u32) -> Field {
        Field::new(CTRL, chan as u32 * 8 + bit, 1)
    }

    pub const fn chan_enable(chan: usize) -> Field {
        chan_ctrl_field(chan, 0)
    }

    pub const fn chan_mode(chan: usize) -> Field {
        chan_ctrl_field(chan, 1)
    }

    pub const fn chan_repeat(chan: usize) -> Field {
        chan_ctrl_field(chan, 2)
    }

    pub const fn chan_silence(chan: usize) -> Field {
        chan_ctrl_field(chan, 3)
    }

    pub const fn chan_polarity(chan: usize) -> Field {
        chan_ctrl_field(chan, 4)
    }

    pub const fn chan_use_fifo(chan: usize) -> Field {
        chan_ctrl_field(chan, 5)
    }

    pub const fn chan_ms_enable(chan: usize) -> Field {
        chan_ctrl_field(chan, 7)
    }

    /// Bit 6 is CLRF on channel 0 and reserved on channel 1.
    pub const CLEAR_FIFO: Field = Field::new(CTRL, 6, 1);

    pub const FIFO_FULL: Field = Field::new(STATUS, 0, 1);
    pub const FIFO_EMPTY: Field = Field::new(STATUS, 1, 1);
    pub const FIFO_WRITE_ERR: Field = Field::new(STATUS, 2, 1);
    pub const FIFO_READ_ERR: Field = Field::new(STATUS, 3, 1);
    pub const BUS_ERR: Field = Field::new(STATUS, 8, 1);

    pub const fn chan_gap(chan: usize) -> Field {
        Field::new(STATUS, 4 + chan as u32, 1)
    }

    pub const fn chan_state(chan: usize) -> Field {
        Field::new(STATUS, 9 + chan as u32, 1)
    }

    pub const DMA_DREQ: Field = Field::new(DMA_CONF, 0, 8);
    pub const DMA_PANIC: Field = Field::new(DMA_CONF, 8, 8);
    pub const DMA_ENABLE: Field = Field::new(DMA_CONF, 31, 1);
}

/// PWM block of the RP1 southbridge (Raspberry Pi 5 class boards).
pub mod rp1 {
    use super::Field;

    pub const GLOBAL_CTRL: usize = 0x00;
    pub const FIFO_CTRL: usize = 0x04;
    pub const COMMON_RANGE: usize = 0x08;
    pub const COMMON_DUTY: usize = 0x0C;
    pub const DUTY_FIFO: usize = 0x10;
    pub const INTR: usize = 0x54;
    pub const INTE: usize = 0x58;
    pub const INTF: usize = 0x5C;
    pub const INTS: usize = 0x60;

    pub const fn chan_ctrl(chan: usize) -> usize {
        0x14 + chan * 0x10
    }

    pub const fn chan_range(chan: usize) -> usize {
        chan_ctrl(chan) + 0x04
    }

    pub const fn chan_phase(chan: usize) -> usize {
        chan_ctrl(chan) + 0x08
    }

    pub const fn chan_duty(chan: usize) -> usize {
        chan_ctrl(chan) + 0x0C
    }

    pub const fn chan_enable(chan: usize) -> Field {
        Field::new(GLOBAL_CTRL, chan as u32, 1)
    }

    pub const SET_UPDATE: Field = Field::new(GLOBAL_CTRL, 31, 1);

    pub const FIFO_LEVEL: Field = Field::new(FIFO_CTRL, 0, 5);
    pub const FIFO_FLUSH: Field = Field::new(FIFO_CTRL, 5, 1);
    pub const FIFO_FLUSH_DONE: Field = Field::new(FIFO_CTRL, 6, 1);
    pub const FIFO_THRESHOLD: Field = Field::new(FIFO_CTRL, 11, 5);
    pub const FIFO_DWELL_TIME: Field = Field::new(FIFO_CTRL, 16, 5);
    pub const FIFO_DREQ_EN: Field = Field::new(FIFO_CTRL, 31, 1);

    pub const fn chan_mode(chan: usize) -> Field {
        Field::new(chan_ctrl(chan), 0, 3)
    }

    pub const fn chan_invert(chan: usize) -> Field {
        Field::new(chan_ctrl(chan), 3, 1)
    }

    /// Binds the channel to the common range and duty/FIFO registers.
    pub const fn chan_bind(chan: usize) -> Field {
        Field::new(chan_ctrl(chan), 4, 1)
    }

    pub const fn chan_use_fifo(chan: usize) -> Field {
        Field::new(chan_ctrl(chan), 5, 1)
    }

    pub const fn chan_sdm(chan: usize) -> Field {
        Field::new(chan_ctrl(chan), 6, 1)
    }

    pub const fn chan_dither(chan: usize) -> Field {
        Field::new(chan_ctrl(chan), 7, 1)
    }

    pub const fn chan_fifo_pop_mask(chan: usize) -> Field {
        Field::new(chan_ctrl(chan), 8, 1)
    }

    pub const fn chan_sdm_bandwidth(chan: usize) -> Field {
        Field::new(chan_ctrl(chan), 12, 4)
    }

    pub const fn chan_sdm_bias(chan: usize) -> Field {
        Field::new(chan_ctrl(chan), 16, 16)
    }

    // The four interrupt registers share one bit assignment; `register` is
    // INTR, INTE, INTF or INTS.
    pub const fn fifo_underflow(register: usize) -> Field {
        Field::new(register, 0, 1)
    }

    pub const fn fifo_overflow(register: usize) -> Field {
        Field::new(register, 1, 1)
    }

    pub const fn fifo_empty(register: usize) -> Field {
        Field::new(register, 2, 1)
    }

    pub const fn fifo_full(register: usize) -> Field {
        Field::new(register, 3, 1)
    }

    pub const fn dreq_active(register: usize) -> Field {
        Field::new(register, 4, 1)
    }

    pub const fn chan_reload(register: usize, chan: usize) -> Field {
        Field::new(register, 5 + chan as u32, 1)
    }
}
