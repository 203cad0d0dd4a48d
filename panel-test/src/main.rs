use dotenv::dotenv;
use log::{debug, info};
use marquee_gpio::PinDriver;
use marquee_gpio::gpiod::GpiodDriver;
use marquee_gpio::lcd::hd44780::driver::{CursorDirection, GpioHd44780Driver, Hd44780Driver};
use marquee_gpio::mmio::MmioDriver;
use std::env::var;
use std::thread::sleep;
use std::time::Duration;

fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 8]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Invalid number of data pins"))
}

fn pin_from_env(name: &str, default: usize) -> eyre::Result<usize> {
    match var(name) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    info!("Marquee panel test starting...");

    let rs_pin_no = pin_from_env("MARQUEE_LCD_PIN_RS", 22)?;
    let rw_pin_no = pin_from_env("MARQUEE_LCD_PIN_RW", 27)?;
    let en_pin_no = pin_from_env("MARQUEE_LCD_PIN_E", 17)?;
    // Data bus pins, DB0 first.
    let data_pin_nos: [usize; 8] = match var("MARQUEE_LCD_PINS_DATA") {
        Ok(value) => parse_pin_bus(&value)?,
        Err(_) => [26, 16, 20, 21, 5, 6, 13, 19],
    };

    info!(
        "LCD @ E: {}, RW: {}, RS: {}, Data: {:?}",
        en_pin_no, rw_pin_no, rs_pin_no, data_pin_nos
    );

    if var("MARQUEE_RAW_GPIO").is_ok() {
        debug!("Initializing raw register GPIO driver...");
        let gpio = MmioDriver::new_gpiomem()?;
        debug!("{:?} initialized.", gpio);
        exercise_panel(&gpio, rs_pin_no, rw_pin_no, en_pin_no, data_pin_nos)
    } else {
        let chip_path = var("MARQUEE_GPIO_CHIP").unwrap_or_else(|_| "/dev/gpiochip0".to_string());
        debug!("Initializing gpiod driver on {}...", chip_path);
        let gpio = GpiodDriver::open(&chip_path)?;
        debug!("{:?} initialized.", gpio);
        exercise_panel(&gpio, rs_pin_no, rw_pin_no, en_pin_no, data_pin_nos)
    }
}

fn exercise_panel(
    gpio: &impl PinDriver,
    rs_pin_no: usize,
    rw_pin_no: usize,
    en_pin_no: usize,
    data_pin_nos: [usize; 8],
) -> eyre::Result<()> {
    debug!("Claiming panel lines...");
    let mut rs_pin = gpio.claim_line(rs_pin_no)?;
    let rs_out = rs_pin.as_output()?;
    let mut rw_pin = gpio.claim_line(rw_pin_no)?;
    let rw_out = rw_pin.as_output()?;
    let mut en_pin = gpio.claim_line(en_pin_no)?;
    let en_out = en_pin.as_output()?;
    let mut data_bus = gpio.claim_bus(data_pin_nos)?;

    let mut lcd = GpioHd44780Driver::new(&*rs_out, &*rw_out, &*en_out, &mut *data_bus)?;

    debug!("Initializing LCD...");
    lcd.init(true, false)?;
    debug!("{:?} initialized.", lcd);

    // A speaker glyph in CGRAM slot 0, to prove glyph uploads work.
    lcd.define_glyph(
        0,
        &[
            0b00001, 0b00011, 0b11111, 0b11111, 0b11111, 0b00011, 0b00001, 0b00000,
        ],
    )?;

    lcd.set_cursor(0, 0)?;
    lcd.print("MARQUEE ")?;
    lcd.send_data(0)?;

    const VERSION_LINE: &str = concat!("v.", env!("CARGO_PKG_VERSION"));
    lcd.set_cursor(1, (16 - VERSION_LINE.len()) as u8)?;
    lcd.print(VERSION_LINE)?;

    info!("Panel initialized, scrolling...");

    for _ in 0..16 {
        sleep(Duration::from_millis(400));
        lcd.shift_display(CursorDirection::Left)?;
    }

    sleep(Duration::from_secs(1));
    lcd.clear_display()?;
    lcd.return_home()?;
    lcd.print("DONE")?;

    let (busy, address) = lcd.busy_flag_and_address()?;
    debug!("Busy: {}, address counter: {:#04x}", busy, address);

    info!("Panel test finished.");

    Ok(())
}
