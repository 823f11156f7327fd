//! Register layout of the Raspberry Pi PWM peripheral.
//!
//! Covers both hardware generations: the BCM283x/BCM2711 block and the RP1
//! block found on Pi 5 class boards. This module only describes the layout;
//! it does not sequence the peripheral.

mod registers;

pub use registers::*;
