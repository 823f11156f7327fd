//! GPIO-driven dot-matrix LCD support for Raspberry Pi class boards.
//!
//! The crate is split into the pin-level seam ([PinBackend]), concrete
//! backends ([raw::RawGpio] for `/dev/gpiomem`, [gpiod::GpiodBackend] for the
//! character device), the HD44780 bus-protocol engine under [lcd::hd44780],
//! and the PWM peripheral register layout under [pwm].

pub mod gpiod;
pub mod lcd;
pub mod pwm;
pub mod raw;
pub mod timing;

use std::fmt;
use std::fmt::Debug;
use thiserror::Error;

/// Logical pin identifier.
///
/// Non-negative ids below [PSEUDO_PIN_BASE] address hardware pins; ids at or
/// above it belong to pseudo-pin ranges claimed by drivers. Negative ids are
/// never valid.
pub type PinId = i32;

/// First pin number available to pseudo-pin ranges.
pub const PSEUDO_PIN_BASE: PinId = 64;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the operation is not supported on this backend or node")]
    NotSupported,
    #[error("invalid pin assignments: {}", format_faults(.0))]
    InvalidPins(Vec<PinFault>),
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

/// One rejected setup parameter: the parameter's name and the offending id.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PinFault {
    pub name: &'static str,
    pub pin: PinId,
}

impl fmt::Display for PinFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.pin)
    }
}

fn format_faults(faults: &[PinFault]) -> String {
    faults
        .iter()
        .map(PinFault::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Direction of a GPIO pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinMode {
    Input,
    Output,
}

/// Pull resistor configuration of a GPIO pin.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Pull {
    #[default]
    Off,
    Down,
    Up,
}

/// Single-pin GPIO primitives consumed by the drivers in this crate.
///
/// A backend is exclusively owned by whatever driver it is handed to, so
/// implementations do not need to serialize access themselves.
pub trait PinBackend: Debug {
    /// Number of hardware pins the backend exposes.
    fn pin_count(&self) -> usize;

    /// Sets the direction of a pin.
    fn pin_mode(&mut self, pin: PinId, mode: PinMode) -> GpioResult<()>;

    /// Configures the pull resistor of a pin.
    fn pull_control(&mut self, pin: PinId, pull: Pull) -> GpioResult<()>;

    /// Drives a pin high or low.
    fn digital_write(&mut self, pin: PinId, level: bool) -> GpioResult<()>;

    /// Reads the current level of a pin.
    fn digital_read(&mut self, pin: PinId) -> GpioResult<bool>;

    /// Registry lookup for pseudo-pin ranges claimed by other drivers.
    ///
    /// Consulted during setup validation for ids at or above
    /// [PSEUDO_PIN_BASE]. Backends without a node registry keep the default.
    fn has_pseudo_pin(&self, _pin: PinId) -> bool {
        false
    }
}

/// A driver installed on a pseudo-pin range.
///
/// The registry that dispatches `digital_write`/`digital_read` calls on
/// pseudo pins to the owning node lives outside this crate; drivers only
/// implement the handler surface.
pub trait GpioNode: Debug {
    /// First pseudo pin of the claimed range.
    fn pin_base(&self) -> PinId;

    /// Number of pseudo pins in the claimed range.
    fn num_pins(&self) -> usize;

    /// Handles a byte-valued write to a pseudo pin of the range.
    fn digital_write(&mut self, pin: PinId, value: u8) -> GpioResult<()>;

    /// Handles a byte-valued read from a pseudo pin of the range.
    fn digital_read(&mut self, pin: PinId) -> GpioResult<u8>;
}
