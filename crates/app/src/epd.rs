//! Driver for the 2.9" UC8151 black and white e-paper panel.
//!
//! The panel is mounted in landscape. Drawing happens in a frame buffer in RAM that is
//! sent to the panel on [`Display::update`].

use core::convert::Infallible;

use embedded_graphics::mono_font::ascii::{FONT_10X20, FONT_6X10, FONT_8X13};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use embedded_graphics::text::{Baseline, Text};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use log::debug;
use temperature_node_core::devices::{Display, DrawingParams, Pen, UpdateSpeed};
use thiserror::Error;

/// Display width in pixels, landscape
pub const WIDTH: u32 = 296;
/// Display height in pixels, landscape
pub const HEIGHT: u32 = 128;
/// Buffer size: 1 bit per pixel
pub const BUFFER_SIZE: usize = (WIDTH as usize * HEIGHT as usize) / 8;

/// Longest time the panel may stay busy
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Controller commands
#[derive(Clone, Copy)]
#[repr(u8)]
enum Command {
    PanelSetting = 0x00,
    PowerSetting = 0x01,
    PowerOff = 0x02,
    PowerOn = 0x04,
    BoosterSoftStart = 0x06,
    DataStartTransmission2 = 0x13,
    DisplayRefresh = 0x12,
    PllControl = 0x30,
    VcomDataInterval = 0x50,
    Resolution = 0x61,
}

#[derive(Debug, Error)]
pub enum Error<E> {
    #[error("The SPI transfer failed: {0:?}")]
    Spi(E),

    #[error("The panel stayed busy.")]
    BusyTimeout,
}

/// The frame buffer, in the panel's native portrait layout
struct Frame {
    buffer: [u8; BUFFER_SIZE],
}

impl Frame {
    fn fill(&mut self, color: BinaryColor) {
        let byte = if color.is_on() { 0xff } else { 0x00 };
        self.buffer.fill(byte);
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: BinaryColor) {
        if x >= WIDTH || y >= HEIGHT {
            return;
        }

        // Landscape columns are native rows of HEIGHT pixels each
        let index = (x * (HEIGHT / 8) + y / 8) as usize;
        let bit = 0x80 >> (y % 8);
        if color.is_on() {
            self.buffer[index] |= bit;
        } else {
            self.buffer[index] &= !bit;
        }
    }
}

impl OriginDimensions for Frame {
    fn size(&self) -> Size {
        Size::new(WIDTH, HEIGHT)
    }
}

impl DrawTarget for Frame {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(point.x as u32, point.y as u32, color);
            }
        }
        Ok(())
    }
}

/// Ink is "on"
fn pen_color(pen: Pen) -> BinaryColor {
    match pen {
        Pen::Black => BinaryColor::On,
        Pen::White => BinaryColor::Off,
    }
}

/// The font used for a text size
fn font(size: u8) -> &'static MonoFont<'static> {
    match size {
        0..=1 => &FONT_6X10,
        2 => &FONT_8X13,
        _ => &FONT_10X20,
    }
}

/// Frame rate setting per refresh speed
fn pll(speed: UpdateSpeed) -> u8 {
    match speed {
        UpdateSpeed::Normal => 0x3c,
        UpdateSpeed::Medium => 0x3a,
        UpdateSpeed::Fast => 0x29,
    }
}

pub struct Uc8151<SPI, BUSY, DC, RST, DELAY> {
    spi: SPI,
    busy: BUSY,
    dc: DC,
    rst: RST,
    delay: DELAY,
    frame: Frame,
    params: DrawingParams,
}

impl<SPI, BUSY, DC, RST, DELAY> Uc8151<SPI, BUSY, DC, RST, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
    DELAY: DelayNs,
{
    /// Create the driver. The panel is only touched on the first update.
    pub fn new(spi: SPI, busy: BUSY, dc: DC, rst: RST, delay: DELAY) -> Self {
        Self {
            spi,
            busy,
            dc,
            rst,
            delay,
            frame: Frame {
                buffer: [0; BUFFER_SIZE],
            },
            params: DrawingParams::default(),
        }
    }

    fn hardware_reset(&mut self) {
        let _ = self.rst.set_low();
        self.delay.delay_ms(10);
        let _ = self.rst.set_high();
        self.delay.delay_ms(10);
    }

    /// Wait for the panel to become idle (BUSY pin high)
    fn wait_until_idle(&mut self) -> Result<(), Error<SPI::Error>> {
        let mut waited = 0;
        while self.busy.is_low().unwrap_or(true) {
            if waited >= BUSY_TIMEOUT_MS {
                return Err(Error::BusyTimeout);
            }
            self.delay.delay_ms(10);
            waited += 10;
        }
        Ok(())
    }

    fn command(&mut self, command: Command, data: &[u8]) -> Result<(), Error<SPI::Error>> {
        let _ = self.dc.set_low();
        self.spi.write(&[command as u8]).map_err(Error::Spi)?;

        if !data.is_empty() {
            let _ = self.dc.set_high();
            self.spi.write(data).map_err(Error::Spi)?;
        }
        Ok(())
    }

    fn init(&mut self) -> Result<(), Error<SPI::Error>> {
        self.hardware_reset();
        self.wait_until_idle()?;

        // 128x296, black and white, LUT from OTP, booster on
        self.command(Command::PanelSetting, &[0x9f])?;
        self.command(Command::PowerSetting, &[0x03, 0x00, 0x2b, 0x2b, 0x1e])?;
        self.command(Command::BoosterSoftStart, &[0x17, 0x17, 0x17])?;
        self.command(Command::PllControl, &[pll(self.params.speed)])?;
        self.command(Command::Resolution, &[0x80, 0x01, 0x28])?;
        self.command(Command::VcomDataInterval, &[0x97])?;

        self.command(Command::PowerOn, &[])?;
        self.wait_until_idle()
    }
}

impl<SPI, BUSY, DC, RST, DELAY> Display for Uc8151<SPI, BUSY, DC, RST, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
    DELAY: DelayNs,
{
    type Error = Error<SPI::Error>;

    fn size(&self) -> (u32, u32) {
        (WIDTH, HEIGHT)
    }

    fn set_drawing_params(&mut self, params: DrawingParams) {
        self.params = params;
    }

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.frame.fill(pen_color(self.params.pen));
        Ok(())
    }

    fn draw_text(
        &mut self,
        content: &str,
        x: i32,
        y: i32,
        bound_width: u32,
        size: u8,
    ) -> Result<(), Self::Error> {
        let font = font(size);
        let style = MonoTextStyle::new(font, pen_color(self.params.pen));
        let bounds = Rectangle::new(
            Point::new(x, y),
            Size::new(bound_width, font.character_size.height),
        );

        let mut clipped = self.frame.clipped(&bounds);
        let _ = Text::with_baseline(content, Point::new(x, y), style, Baseline::Top)
            .draw(&mut clipped);
        Ok(())
    }

    fn measure_text(&self, content: &str, size: u8) -> u32 {
        let font = font(size);
        let advance = font.character_size.width + font.character_spacing;
        content.chars().count() as u32 * advance
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        self.init()?;

        let _ = self.dc.set_low();
        self.spi
            .write(&[Command::DataStartTransmission2 as u8])
            .map_err(Error::Spi)?;
        let _ = self.dc.set_high();
        self.spi.write(&self.frame.buffer).map_err(Error::Spi)?;

        self.command(Command::DisplayRefresh, &[])?;
        self.wait_until_idle()?;

        self.command(Command::PowerOff, &[])?;
        debug!("Panel refreshed at {:?} speed", self.params.speed);
        Ok(())
    }
}
