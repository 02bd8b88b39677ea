//! 32x32 LED matrix frame buffer and color calibration.

use libm::{fabsf, fmodf};
use log::{info, warn};
use smart_leds::RGB8;

use crate::BoardError;
use crate::config::{MATRIX_HEIGHT, MATRIX_WIDTH};
use crate::ws2812::LedStrip;

/// Frame buffer mapped row-major onto a WS2812 strip
pub struct LedMatrix<S> {
    strip: S,
    grid: [[RGB8; MATRIX_WIDTH]; MATRIX_HEIGHT],
    enabled: bool,
}

impl<S: LedStrip> LedMatrix<S> {
    pub fn new(strip: S) -> Result<Self, BoardError> {
        if strip.len() < MATRIX_WIDTH * MATRIX_HEIGHT {
            warn!(
                "[MATRIX] strip has {} LEDs, need {}",
                strip.len(),
                MATRIX_WIDTH * MATRIX_HEIGHT
            );
            return Err(BoardError::InvalidArgument);
        }
        info!("[MATRIX] {}x{} matrix ready", MATRIX_WIDTH, MATRIX_HEIGHT);
        Ok(Self {
            strip,
            grid: [[RGB8::default(); MATRIX_WIDTH]; MATRIX_HEIGHT],
            enabled: true,
        })
    }

    /// Out-of-range coordinates are ignored
    pub fn set_pixel(&mut self, x: usize, y: usize, color: RGB8) {
        if x < MATRIX_WIDTH && y < MATRIX_HEIGHT {
            self.grid[y][x] = color;
        }
    }

    /// Out-of-range coordinates read as black
    pub fn pixel(&self, x: usize, y: usize) -> RGB8 {
        if x < MATRIX_WIDTH && y < MATRIX_HEIGHT {
            self.grid[y][x]
        } else {
            RGB8::default()
        }
    }

    pub fn fill(&mut self, color: RGB8) {
        for row in self.grid.iter_mut() {
            row.fill(color);
        }
    }

    /// Blank the buffer and the LEDs
    pub fn clear(&mut self) -> Result<(), BoardError> {
        self.fill(RGB8::default());
        self.strip.clear()
    }

    /// Push the buffer through color correction to the strip
    pub fn refresh(&mut self) -> Result<(), BoardError> {
        if !self.enabled {
            return Ok(());
        }
        for (y, row) in self.grid.iter().enumerate() {
            for (x, color) in row.iter().enumerate() {
                self.strip
                    .set_pixel(y * MATRIX_WIDTH + x, color_correct(*color))?;
            }
        }
        self.strip.refresh()
    }

    /// Disabling blanks the LEDs; the buffer is kept
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), BoardError> {
        self.enabled = enabled;
        if enabled {
            Ok(())
        } else {
            self.strip.clear()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn strip(&self) -> &S {
        &self.strip
    }
}

const MIN_WHITE: [f32; 3] = [5.0, 4.0, 3.0];
const MAX_WHITE: [f32; 3] = [168.0, 112.0, 76.0];
const INPUT_MIN: f32 = 5.0;
const INPUT_MAX: f32 = 255.0;

/// Map full-scale RGB onto the panel's measured white point
pub fn color_correct(color: RGB8) -> RGB8 {
    let input = [color.r as f32, color.g as f32, color.b as f32];
    let near_black = color.r <= 5 && color.g <= 5 && color.b <= 5;

    let mut out = [0u8; 3];
    for channel in 0..3 {
        let value = if near_black {
            input[channel] * (MIN_WHITE[channel] / INPUT_MIN)
        } else {
            let slope = (MAX_WHITE[channel] - MIN_WHITE[channel]) / (INPUT_MAX - INPUT_MIN);
            let intercept = MIN_WHITE[channel] - slope * INPUT_MIN;
            input[channel] * slope + intercept
        };
        out[channel] = (value.clamp(0.0, MAX_WHITE[channel]) + 0.5) as u8;
    }
    RGB8::new(out[0], out[1], out[2])
}

const BRIGHTNESS_FACTOR: f32 = 0.476;
const SATURATION_FACTOR: f32 = 1.520875;

/// Dim by a fixed factor, then boost HSL saturation
pub fn adjust_brightness_saturation(color: RGB8) -> RGB8 {
    let dim = |c: u8| (c as f32 * BRIGHTNESS_FACTOR).clamp(0.0, 255.0) as u8;
    let (h, s, l) = rgb_to_hsl(RGB8::new(dim(color.r), dim(color.g), dim(color.b)));
    hsl_to_rgb(h, (s * SATURATION_FACTOR).min(1.0), l)
}

/// Hue in degrees, saturation and lightness in 0..=1
pub fn rgb_to_hsl(color: RGB8) -> (f32, f32, f32) {
    let r = color.r as f32 / 255.0;
    let g = color.g as f32 / 255.0;
    let b = color.b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let l = (max + min) / 2.0;

    if delta == 0.0 {
        return (0.0, 0.0, l);
    }

    let s = if l > 0.5 {
        delta / (2.0 - max - min)
    } else {
        delta / (max + min)
    };
    let h = if max == r {
        (g - b) / delta + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    (h * 60.0, s, l)
}

pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> RGB8 {
    let c = (1.0 - fabsf(2.0 * l - 1.0)) * s;
    let x = c * (1.0 - fabsf(fmodf(h / 60.0, 2.0) - 1.0));
    let m = l - c / 2.0;

    let (r, g, b) = match h {
        h if (0.0..60.0).contains(&h) => (c, x, 0.0),
        h if (60.0..120.0).contains(&h) => (x, c, 0.0),
        h if (120.0..180.0).contains(&h) => (0.0, c, x),
        h if (180.0..240.0).contains(&h) => (0.0, x, c),
        h if (240.0..300.0).contains(&h) => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_u8 = |v: f32| ((v + m) * 255.0 + 0.5) as u8;
    RGB8::new(to_u8(r), to_u8(g), to_u8(b))
}
