//! WS2812 strip abstraction shared by all LED zones.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use log::warn;
use smart_leds::{RGB8, SmartLedsWrite};

use crate::BoardError;

/// Pixel-level strip driver
pub trait LedStrip {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_pixel(&mut self, index: usize, color: RGB8) -> Result<(), BoardError>;

    /// Push the pixel buffer to the LEDs
    fn refresh(&mut self) -> Result<(), BoardError>;

    fn fill(&mut self, color: RGB8) -> Result<(), BoardError> {
        for index in 0..self.len() {
            self.set_pixel(index, color)?;
        }
        Ok(())
    }

    /// Turn every LED off immediately
    fn clear(&mut self) -> Result<(), BoardError> {
        self.fill(RGB8::default())?;
        self.refresh()
    }
}

/// Strip handle shared between a renderer task and whoever reinitialises the driver
pub type SharedStrip<S> = Mutex<CriticalSectionRawMutex, S>;

/// Run `f` against the strip if it is free.
///
/// Returns `Ok(false)` when the handle is busy; the frame is skipped rather
/// than waited for.
pub fn try_render<S, F>(strip: &SharedStrip<S>, tag: &str, f: F) -> Result<bool, BoardError>
where
    S: LedStrip,
    F: FnOnce(&mut S) -> Result<(), BoardError>,
{
    match strip.try_lock() {
        Ok(mut guard) => f(&mut *guard).map(|_| true),
        Err(_) => {
            warn!("[{}] LED strip busy, skipping frame", tag);
            Ok(false)
        }
    }
}

/// Frame buffer in front of any `smart-leds` writer.
///
/// On hardware the writer is the RMT `SmartLedsAdapter`.
pub struct BufferedStrip<W, const N: usize> {
    writer: W,
    pixels: [RGB8; N],
    refresh_count: u32,
}

impl<W, const N: usize> BufferedStrip<W, N>
where
    W: SmartLedsWrite<Color = RGB8>,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pixels: [RGB8::default(); N],
            refresh_count: 0,
        }
    }

    pub fn pixel(&self, index: usize) -> Option<RGB8> {
        self.pixels.get(index).copied()
    }

    pub fn pixels(&self) -> &[RGB8] {
        &self.pixels
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_count
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<W, const N: usize> LedStrip for BufferedStrip<W, N>
where
    W: SmartLedsWrite<Color = RGB8>,
{
    fn len(&self) -> usize {
        N
    }

    fn set_pixel(&mut self, index: usize, color: RGB8) -> Result<(), BoardError> {
        let pixel = self
            .pixels
            .get_mut(index)
            .ok_or(BoardError::InvalidArgument)?;
        *pixel = color;
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), BoardError> {
        self.writer
            .write(self.pixels.iter().copied())
            .map_err(|_| BoardError::InvalidState)?;
        self.refresh_count = self.refresh_count.wrapping_add(1);
        Ok(())
    }
}
