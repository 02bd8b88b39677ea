//! Parametric strip effects.
//!
//! Every effect is a pure function of the time elapsed since the effect
//! started, so controllers recompute the color each tick instead of carrying
//! animation state between frames.

use core::f32::consts::PI;

use heapless::Vec;
use smart_leds::RGB8;

use crate::config;

/// Named colors used by the strip controllers
pub mod colors {
    use smart_leds::RGB8;

    pub const OFF: RGB8 = RGB8::new(0, 0, 0);
    pub const WHITE: RGB8 = RGB8::new(255, 255, 255);
    pub const BLUE: RGB8 = RGB8::new(0, 0, 255);
    pub const YELLOW: RGB8 = RGB8::new(255, 255, 0);
    /// User-host warning color
    pub const MAGENTA: RGB8 = RGB8::new(255, 0, 255);
    pub const ORANGE: RGB8 = RGB8::new(243, 112, 34);
    pub const RED: RGB8 = RGB8::new(255, 0, 0);
    pub const PURPLE: RGB8 = RGB8::new(128, 0, 128);
}

/// On/off toggle period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkSpeed {
    Slow,
    Normal,
    Fast,
    VeryFast,
}

impl BlinkSpeed {
    pub fn interval_ms(self) -> u64 {
        match self {
            BlinkSpeed::Slow => 1000,
            BlinkSpeed::Normal => 500,
            BlinkSpeed::Fast => 200,
            BlinkSpeed::VeryFast => 100,
        }
    }
}

/// Full sine period of a breathing effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreathSpeed {
    Slow,
    Normal,
    Fast,
}

impl BreathSpeed {
    pub fn period_ms(self) -> u64 {
        match self {
            BreathSpeed::Slow => 3000,
            BreathSpeed::Normal => 2000,
            BreathSpeed::Fast => 1000,
        }
    }
}

/// A strip effect and its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Off,
    Solid(RGB8),
    Blink { color: RGB8, speed: BlinkSpeed },
    Breath { color: RGB8, speed: BreathSpeed },
    /// Cycles through `colors`, each shown lit then dark for one slot
    RoundRobin { colors: Vec<RGB8, 4> },
}

impl Effect {
    /// Color to display `elapsed_ms` after the effect started
    pub fn color_at(&self, elapsed_ms: u64) -> RGB8 {
        match self {
            Effect::Off => colors::OFF,
            Effect::Solid(color) => *color,
            Effect::Blink { color, speed } => {
                if blink_is_on(elapsed_ms, speed.interval_ms()) {
                    *color
                } else {
                    colors::OFF
                }
            }
            Effect::Breath { color, speed } => {
                scale(*color, breath_level(elapsed_ms, speed.period_ms()))
            }
            Effect::RoundRobin { colors } => round_robin(colors, elapsed_ms),
        }
    }
}

/// First half-period on, second half off
pub fn blink_is_on(elapsed_ms: u64, interval_ms: u64) -> bool {
    if interval_ms == 0 {
        return true;
    }
    (elapsed_ms / interval_ms) % 2 == 0
}

/// Sine brightness in 0..=255 over `period_ms`, starting at mid level
pub fn breath_level(elapsed_ms: u64, period_ms: u64) -> u8 {
    if period_ms == 0 {
        return u8::MAX;
    }
    let progress = (elapsed_ms % period_ms) as f32 / period_ms as f32;
    let factor = (libm::sinf(progress * 2.0 * PI) + 1.0) / 2.0;
    (factor * 255.0) as u8
}

/// Multi-color round robin with a blink overlay.
///
/// Slot `n` lasts [`config::MULTI_ERROR_SLOT_MS`]; even slots light color
/// `n / 2`, odd slots are dark, so every color gets an on phase.
pub fn round_robin(palette: &[RGB8], elapsed_ms: u64) -> RGB8 {
    if palette.is_empty() {
        return colors::WHITE;
    }
    let slot = elapsed_ms / config::MULTI_ERROR_SLOT_MS;
    if slot % 2 != 0 {
        return colors::OFF;
    }
    palette[((slot / 2) as usize) % palette.len()]
}

/// Scale every channel by `level / 255`
pub fn scale(color: RGB8, level: u8) -> RGB8 {
    let apply = |c: u8| ((c as u16 * level as u16) / 255) as u8;
    RGB8::new(apply(color.r), apply(color.g), apply(color.b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blink_alternates_every_interval() {
        let effect = Effect::Blink {
            color: colors::YELLOW,
            speed: BlinkSpeed::Normal,
        };
        assert_eq!(effect.color_at(0), colors::YELLOW);
        assert_eq!(effect.color_at(499), colors::YELLOW);
        assert_eq!(effect.color_at(500), colors::OFF);
        assert_eq!(effect.color_at(1000), colors::YELLOW);
    }

    #[test]
    fn breath_follows_sine() {
        assert_eq!(breath_level(0, 1000), 127);
        assert_eq!(breath_level(250, 1000), 255);
        assert!(breath_level(750, 1000) <= 1);
        // restarts each period
        assert_eq!(breath_level(1250, 1000), breath_level(250, 1000));
    }

    #[test]
    fn round_robin_shows_every_color() {
        let palette = [colors::BLUE, colors::YELLOW];
        assert_eq!(round_robin(&palette, 0), colors::BLUE);
        assert_eq!(round_robin(&palette, 500), colors::OFF);
        assert_eq!(round_robin(&palette, 1000), colors::YELLOW);
        assert_eq!(round_robin(&palette, 1500), colors::OFF);
        assert_eq!(round_robin(&palette, 2000), colors::BLUE);
        assert_eq!(round_robin(&[], 0), colors::WHITE);
    }

    #[test]
    fn scale_is_linear() {
        assert_eq!(scale(colors::ORANGE, 255), colors::ORANGE);
        assert_eq!(scale(colors::WHITE, 0), colors::OFF);
        assert_eq!(scale(RGB8::new(200, 100, 50), 128), RGB8::new(100, 50, 25));
    }
}
