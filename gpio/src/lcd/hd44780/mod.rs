//! HD44780 dot-matrix LCD controller.
//!
//! [driver] holds the bus-protocol engine; [cmd] builds the instruction
//! bytes it transfers. The command constructors are pure, so higher layers
//! can compose instructions without touching a node.

pub mod driver;

/// High-nibble pattern of a function-set instruction requesting the 8-bit
/// bus.
pub const FN_SET_8BIT: u8 = 0x30;

/// High-nibble pattern of a function-set instruction requesting the 4-bit
/// bus.
pub const FN_SET_4BIT: u8 = 0x20;

/// Instruction-byte constructors.
///
/// Each returns the byte for the stated operation; send it with
/// [driver::Hd44780::write_command].
pub mod cmd {
    /// Clears the entire display and sets DDRAM address 0 in the address
    /// counter.
    pub const fn clear() -> u8 {
        0x01
    }

    /// Sets DDRAM address 0 and undoes any display shift. DDRAM contents
    /// remain unchanged.
    pub const fn home() -> u8 {
        0x02
    }

    /// Sets the cursor move direction and whether the display shifts on
    /// data transfers.
    pub const fn entry_mode(decrement: bool, shift: bool) -> u8 {
        0x04 | (decrement as u8) << 1 | shift as u8
    }

    /// Switches the display, cursor, and cursor blinking on or off.
    pub const fn on_off(display: bool, cursor: bool, blink: bool) -> u8 {
        0x08 | (display as u8) << 2 | (cursor as u8) << 1 | blink as u8
    }

    /// Moves the cursor (`display_shift` false) or shifts the display
    /// (`display_shift` true), to the right when `right` is set.
    pub const fn shift(display_shift: bool, right: bool) -> u8 {
        0x10 | (display_shift as u8) << 3 | (right as u8) << 2
    }

    /// Sets the interface data length, display line count, and font height.
    pub const fn function_set(eight_bit: bool, two_lines: bool, tall_font: bool) -> u8 {
        0x20 | (eight_bit as u8) << 4 | (two_lines as u8) << 3 | (tall_font as u8) << 2
    }

    /// Sets the CGRAM address (0x00-0x3F).
    pub const fn set_cgram(address: u8) -> u8 {
        0x40 | (address & 0x3F)
    }

    /// Sets the DDRAM address (0x00-0x7F).
    pub const fn set_ddram(address: u8) -> u8 {
        0x80 | (address & 0x7F)
    }
}
