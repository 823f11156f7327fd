//! Hardware smoke test: drives a 4-bit HD44780 display wired to the
//! default demo pins and prints one line of text.

use dotenv::dotenv;
use lcdpi_gpio::PSEUDO_PIN_BASE;
use lcdpi_gpio::lcd::hd44780::cmd;
use lcdpi_gpio::lcd::hd44780::driver::{Hd44780, Hd44780Config};
use lcdpi_gpio::raw::RawGpio;
use log::info;

fn main() -> eyre::Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    let gpio = RawGpio::new_gpiomem()?;

    let mut lcd = Hd44780::setup(
        gpio,
        &Hd44780Config {
            pin_base: PSEUDO_PIN_BASE,
            read_enabled: true,
            mode8_enabled: false,
            pin_rs: 22,
            pin_rw: 27,
            pin_e: 17,
            // 4-bit bus: only DB4-DB7 are wired
            pin_db: [-1, -1, -1, -1, 26, 16, 20, 21],
        },
    )?;

    lcd.write_command(cmd::function_set(false, true, false))?;
    lcd.write_command(cmd::on_off(true, false, false))?;
    lcd.write_command(cmd::entry_mode(false, false))?;
    lcd.write_command(cmd::clear())?;

    for byte in "Hello, HD44780!".bytes() {
        lcd.write_data(byte)?;
    }

    let (busy, address) = lcd.busy_flag_and_address()?;
    info!("done; busy {busy}, address counter {address:#04x}");

    Ok(())
}
