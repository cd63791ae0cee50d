//! `smart-leds` adapter for the LED ring.

use smart_leds::{brightness, SmartLedsWrite, RGB8};

use super::LedRing;
use crate::config::LED_COUNT;
use crate::error::{Error, Result};

/// Buffers one frame and writes it through any `SmartLedsWrite` driver
/// (RMT, SPI, bit-banged) with global brightness applied in software.
pub struct SmartLedRing<W> {
    writer: W,
    pixels: [RGB8; LED_COUNT],
    level: u8,
}

impl<W> SmartLedRing<W>
where
    W: SmartLedsWrite<Color = RGB8>,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pixels: [RGB8::default(); LED_COUNT],
            level: 255,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> LedRing for SmartLedRing<W>
where
    W: SmartLedsWrite<Color = RGB8>,
{
    fn set_pixel(&mut self, index: usize, color: RGB8) {
        if let Some(px) = self.pixels.get_mut(index) {
            *px = color;
        }
    }

    fn set_global_brightness(&mut self, level: u8) {
        self.level = level;
    }

    fn show(&mut self) -> Result<()> {
        self.writer
            .write(brightness(self.pixels.iter().copied(), self.level))
            .map_err(|_| Error::Led)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        frames: Vec<Vec<RGB8>>,
    }

    impl SmartLedsWrite for Capture {
        type Error = ();
        type Color = RGB8;

        fn write<T, I>(&mut self, iterator: T) -> core::result::Result<(), ()>
        where
            T: IntoIterator<Item = I>,
            I: Into<Self::Color>,
        {
            self.frames.push(iterator.into_iter().map(Into::into).collect());
            Ok(())
        }
    }

    #[test]
    fn writes_scaled_frame() {
        let mut ring = SmartLedRing::new(Capture::default());
        ring.set_pixel(0, RGB8 { r: 200, g: 100, b: 0 });
        ring.set_pixel(99, RGB8 { r: 1, g: 1, b: 1 });
        ring.set_global_brightness(128);
        ring.show().unwrap();

        let cap = ring.into_inner();
        assert_eq!(cap.frames.len(), 1);
        let frame = &cap.frames[0];
        assert_eq!(frame.len(), LED_COUNT);
        assert!(frame[0].r < 200 && frame[0].r > 90);
        assert_eq!(frame[1], RGB8::default());
    }

    #[test]
    fn full_brightness_is_identity() {
        let mut ring = SmartLedRing::new(Capture::default());
        let c = RGB8 { r: 10, g: 20, b: 30 };
        ring.set_pixel(3, c);
        ring.show().unwrap();
        assert_eq!(ring.into_inner().frames[0][3], c);
    }
}
