//! The fixed four field layout of the e-ink display.

use core::fmt::{self, Debug, Write};

use heapless::String;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::checkpoint::Checkpoint;
use crate::devices::{Display, DrawingParams, Pen, UpdateSpeed};

/// Text size of the temperature
const TEMPERATURE_SIZE: u8 = 5;

/// Text size of every other field
const FIELD_SIZE: u8 = 2;

/// Height in pixels of a line of text at the given size
pub const fn text_height(size: u8) -> u32 {
    8 * size as u32
}

/// The values shown on the display
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Readout {
    /// Degrees Celsius
    pub temperature: f64,

    /// Volts
    pub supply_voltage: f32,

    /// Packed error record, hidden when zero
    pub error_record: u32,

    /// Checkpoint reached before the last watchdog reset, hidden when zero
    pub watchdog_checkpoint: u8,

    /// Local date and time
    pub local_time: PrimitiveDateTime,
}

/// Errors while rendering
#[derive(Debug, Error)]
pub enum RenderError<E: Debug> {
    /// The display driver failed
    #[error("The display failed: {0:?}")]
    Display(E),

    /// A field did not fit into the text buffer
    #[error("A display field could not be formatted.")]
    Format,
}

impl<E: Debug> From<fmt::Error> for RenderError<E> {
    fn from(_: fmt::Error) -> Self {
        Self::Format
    }
}

/// Draw the readout and refresh the panel.
///
/// `checkpoint` is called before each group of drawing operations, so a hang inside
/// the display driver can be told apart from one in the refresh.
pub fn render<D, F>(
    display: &mut D,
    readout: &Readout,
    mut checkpoint: F,
) -> Result<(), RenderError<D::Error>>
where
    D: Display,
    F: FnMut(Checkpoint),
{
    let (width, height) = display.size();

    checkpoint(Checkpoint::RenderPrepared);
    display.set_drawing_params(DrawingParams {
        speed: UpdateSpeed::Medium,
        pen: Pen::White,
    });
    display.clear().map_err(RenderError::Display)?;
    display.set_drawing_params(DrawingParams {
        speed: UpdateSpeed::Medium,
        pen: Pen::Black,
    });

    let mut text: String<32> = String::new();

    write!(text, "{:.1} C", readout.temperature)?;
    let text_width = display.measure_text(&text, TEMPERATURE_SIZE);
    let x = width.saturating_sub(text_width) / 2;
    let y = height.saturating_sub(text_height(TEMPERATURE_SIZE)) / 2;
    display
        .draw_text(&text, x as i32, y as i32, width - x, TEMPERATURE_SIZE)
        .map_err(RenderError::Display)?;

    text.clear();
    write!(text, "{:.2} V", readout.supply_voltage)?;
    draw_right_aligned(display, &text, 0, width)?;

    let bottom = height.saturating_sub(text_height(FIELD_SIZE)) as i32;
    if readout.error_record != 0 {
        text.clear();
        write!(text, "E {:08x}", readout.error_record)?;
        draw_left_aligned(display, &text, bottom, width)?;
    }

    if readout.watchdog_checkpoint != 0 {
        text.clear();
        write!(text, "F {:08x}", readout.watchdog_checkpoint)?;
        draw_right_aligned(display, &text, bottom, width)?;
    }

    checkpoint(Checkpoint::RenderFieldsDrawn);
    let time = readout.local_time;

    text.clear();
    write!(
        text,
        "{:04}/{:02}/{:02}",
        time.year(),
        u8::from(time.month()),
        time.day()
    )?;
    draw_left_aligned(display, &text, 0, width)?;

    text.clear();
    write!(
        text,
        "{:02}:{:02}:{:02}",
        time.hour(),
        time.minute(),
        time.second()
    )?;
    draw_left_aligned(display, &text, text_height(FIELD_SIZE) as i32, width)?;

    checkpoint(Checkpoint::RenderCommit);
    display.update().map_err(RenderError::Display)
}

fn draw_left_aligned<D: Display>(
    display: &mut D,
    text: &str,
    y: i32,
    width: u32,
) -> Result<(), RenderError<D::Error>> {
    display
        .draw_text(text, 0, y, width, FIELD_SIZE)
        .map_err(RenderError::Display)
}

fn draw_right_aligned<D: Display>(
    display: &mut D,
    text: &str,
    y: i32,
    width: u32,
) -> Result<(), RenderError<D::Error>> {
    let text_width = display.measure_text(text, FIELD_SIZE);
    let x = width.saturating_sub(text_width) as i32;
    display
        .draw_text(text, x, y, width, FIELD_SIZE)
        .map_err(RenderError::Display)
}
