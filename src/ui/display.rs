//! SSD1306 OLED display wrapper.

use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::{MonoTextStyle, MonoTextStyleBuilder};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::I2CDisplayInterface;
use ssd1306::Ssd1306;

use super::{Display, Screen};
use crate::error::{Error, Result};

/// Concrete display driver, generic over the HAL's I²C peripheral.
pub type Oled<I2C> =
    Ssd1306<I2CInterface<I2C>, DisplaySize128x64, BufferedGraphicsMode<DisplaySize128x64>>;

/// Characters per row with the 6×10 font.
const COLUMNS: usize = 21;

pub struct OledDisplay<I2C> {
    oled: Oled<I2C>,
}

impl<I2C> OledDisplay<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    /// Initialise the panel and clear the screen.
    pub fn new(i2c: I2C) -> Result<Self> {
        let interface = I2CDisplayInterface::new(i2c);
        let mut oled = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        oled.init().map_err(|_| Error::Display)?;
        oled.clear_buffer();
        oled.flush().map_err(|_| Error::Display)?;
        Ok(Self { oled })
    }

    fn line(&mut self, row: i32, text: &str) {
        let _ = Text::new(text, Point::new(0, 10 + row * 12), text_style()).draw(&mut self.oled);
    }

    fn draw_home(&mut self, status: &str) {
        self.line(0, "knob");
        self.line(2, if status.is_empty() { "Ready" } else { status });
    }

    fn draw_connecting(&mut self) {
        self.line(0, "WiFi");
        self.line(2, "Connecting...");
    }

    /// `text` is `"ssid|password"`.
    fn draw_ap_mode(&mut self, text: &str) {
        let (ssid, password) = text.split_once('|').unwrap_or((text, ""));
        self.line(0, "WiFi setup");
        self.line(1, "Join network:");
        self.line(2, ssid);
        self.line(3, "Password:");
        self.line(4, password);
    }

    fn draw_setup_url(&mut self, url: &str) {
        self.line(0, "Connected!");
        self.line(1, "Open in browser:");
        // Wrap the URL over the remaining rows.
        let mut rest = url;
        let mut row = 2;
        while !rest.is_empty() && row < 5 {
            let cut = rest
                .char_indices()
                .nth(COLUMNS)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            self.line(row, &rest[..cut]);
            rest = &rest[cut..];
            row += 1;
        }
    }

    fn draw_error(&mut self) {
        self.line(0, "ERROR");
        self.line(2, "WiFi setup failed");
        self.line(3, "Hold knob 3s to reset");
    }
}

fn text_style() -> MonoTextStyle<'static, BinaryColor> {
    MonoTextStyleBuilder::new()
        .font(&FONT_6X10)
        .text_color(BinaryColor::On)
        .build()
}

impl<I2C> Display for OledDisplay<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    fn render(&mut self, screen: Screen, text: &str) -> Result<()> {
        self.oled.clear_buffer();
        match screen {
            Screen::Blank => {}
            Screen::Home => self.draw_home(text),
            Screen::Connecting => self.draw_connecting(),
            Screen::ApMode => self.draw_ap_mode(text),
            Screen::SetupUrl => self.draw_setup_url(text),
            Screen::WifiError => self.draw_error(),
        }
        self.oled.flush().map_err(|_| Error::Display)
    }

    fn set_brightness(&mut self, level: u8) -> Result<()> {
        // Contrast carries the level; precharge stays at the panel default.
        self.oled
            .set_brightness(Brightness::custom(0x2, level))
            .map_err(|_| Error::Display)
    }
}
