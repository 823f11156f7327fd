//! LCD controller drivers.

pub mod hd44780;
