//! Stored matrix animations and the diagonal flash renderer.
//!
//! Each animation is a sparse set of lit points. Every frame the lit points
//! are drawn with their calibrated base color, then a diagonal band sweeping
//! from the main diagonal toward the (31,0) corner boosts pixels near it by
//! up to 2.5x.

use alloc::vec::Vec;
use core::cell::RefCell;
use core::f32::consts::{PI, SQRT_2};
use core::fmt::Write;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::String;
use libm::{cosf, fabsf};
use log::{info, warn};
use smart_leds::RGB8;

use crate::BoardError;
use crate::config::{
    ANIMATION_SPEED, FLASH_WIDTH, MATRIX_HEIGHT, MATRIX_WIDTH, MAX_ANIMATION_NAME_LEN,
    MAX_ANIMATION_POINTS, MAX_ANIMATIONS,
};
use crate::led_matrix::{LedMatrix, adjust_brightness_saturation};
use crate::ws2812::LedStrip;

pub type AnimationName = String<MAX_ANIMATION_NAME_LEN>;

/// Maximum multiplicative boost at the center of the flash band, minus one
const FLASH_BOOST: f32 = 1.5;

/// What the system-state display controller needs from the renderer
pub trait AnimationSelector: Send + Sync {
    fn select(&self, index: usize) -> Result<(), BoardError>;

    /// Number of loaded slots, including deleted ones
    fn count(&self) -> usize;

    fn name(&self, index: usize) -> Option<AnimationName>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationPoint {
    pub x: u8,
    pub y: u8,
    pub color: RGB8,
}

struct StoredAnimation {
    name: AnimationName,
    points: heapless::Vec<AnimationPoint, MAX_ANIMATION_POINTS>,
    valid: bool,
}

struct AnimationStore {
    animations: Vec<StoredAnimation>,
    current: usize,
    flash_position: u32,
    running: bool,
    speed: u8,
}

impl AnimationStore {
    fn current(&self) -> Option<&StoredAnimation> {
        self.animations.get(self.current).filter(|a| a.valid)
    }

    fn current_mut(&mut self) -> Option<&mut StoredAnimation> {
        self.animations.get_mut(self.current).filter(|a| a.valid)
    }

    fn select(&mut self, index: usize) -> Result<(), BoardError> {
        let animation = self.animations.get(index).ok_or_else(|| {
            warn!(
                "[MATRIX] invalid animation index {} (loaded: {})",
                index,
                self.animations.len()
            );
            BoardError::InvalidArgument
        })?;
        if !animation.valid {
            warn!("[MATRIX] animation {} was deleted", index);
            return Err(BoardError::InvalidState);
        }
        info!("[MATRIX] switched to animation {} ({})", animation.name, index);
        self.current = index;
        self.flash_position = 0;
        Ok(())
    }

    /// Select the nearest valid slot after (or before) the current one
    fn step(&mut self, forward: bool) -> Result<(), BoardError> {
        let len = self.animations.len();
        if len == 0 {
            warn!("[MATRIX] no animations loaded");
            return Err(BoardError::InvalidState);
        }
        let target = (1..=len)
            .map(|offset| {
                if forward {
                    (self.current + offset) % len
                } else {
                    (self.current + len * 2 - offset) % len
                }
            })
            .find(|&index| self.animations[index].valid)
            .ok_or(BoardError::InvalidState)?;
        self.select(target)
    }
}

/// Thread-safe store of matrix animations
pub struct MatrixAnimator {
    store: Mutex<CriticalSectionRawMutex, RefCell<AnimationStore>>,
}

impl Default for MatrixAnimator {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixAnimator {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(RefCell::new(AnimationStore {
                animations: Vec::with_capacity(MAX_ANIMATIONS),
                current: 0,
                flash_position: 0,
                running: true,
                speed: ANIMATION_SPEED,
            })),
        }
    }

    fn with_store<R>(&self, f: impl FnOnce(&mut AnimationStore) -> R) -> Result<R, BoardError> {
        self.store.lock(|cell| {
            let mut store = cell.try_borrow_mut().map_err(|_| BoardError::Timeout)?;
            Ok(f(&mut store))
        })
    }

    /// Allocate a new empty animation slot and return its index
    pub fn create_new(&self, name: &str) -> Result<usize, BoardError> {
        self.with_store(|store| {
            if store.animations.len() >= MAX_ANIMATIONS {
                warn!("[MATRIX] animation storage full");
                return Err(BoardError::NoMemory);
            }
            let index = store.animations.len();
            let mut stored_name = AnimationName::new();
            if name.is_empty() {
                let _ = write!(stored_name, "animation{}", index);
            } else {
                for ch in name.chars() {
                    if stored_name.push(ch).is_err() {
                        break;
                    }
                }
            }
            info!("[MATRIX] created animation {} ({})", stored_name, index);
            store.animations.push(StoredAnimation {
                name: stored_name,
                points: heapless::Vec::new(),
                valid: true,
            });
            Ok(index)
        })?
    }

    pub fn next(&self) -> Result<(), BoardError> {
        self.with_store(|store| store.step(true))?
    }

    pub fn previous(&self) -> Result<(), BoardError> {
        self.with_store(|store| store.step(false))?
    }

    /// Mark a slot deleted; if it was current, move to the first valid one
    pub fn delete(&self, index: usize) -> Result<(), BoardError> {
        self.with_store(|store| {
            let animation = store
                .animations
                .get_mut(index)
                .ok_or(BoardError::InvalidArgument)?;
            animation.valid = false;
            animation.points.clear();
            if store.current == index {
                match store.animations.iter().position(|a| a.valid) {
                    Some(first) => store.current = first,
                    None => {
                        store.current = 0;
                        warn!("[MATRIX] deleted last animation, matrix goes dark");
                    }
                }
                store.flash_position = 0;
            }
            info!("[MATRIX] deleted animation {}", index);
            Ok(())
        })?
    }

    pub fn clear_all(&self) -> Result<(), BoardError> {
        self.with_store(|store| {
            store.animations.clear();
            store.current = 0;
            store.flash_position = 0;
            info!("[MATRIX] cleared all animations");
        })
    }

    pub fn current_index(&self) -> Result<usize, BoardError> {
        self.with_store(|store| store.current)
    }

    /// Light a point on the current animation, replacing its color if already lit
    pub fn set_point(&self, x: usize, y: usize, color: RGB8) -> Result<(), BoardError> {
        if x >= MATRIX_WIDTH || y >= MATRIX_HEIGHT {
            return Err(BoardError::InvalidArgument);
        }
        self.with_store(|store| {
            let animation = store.current_mut().ok_or(BoardError::InvalidState)?;
            let (x, y) = (x as u8, y as u8);
            if let Some(point) = animation.points.iter_mut().find(|p| p.x == x && p.y == y) {
                point.color = color;
                return Ok(());
            }
            animation
                .points
                .push(AnimationPoint { x, y, color })
                .map_err(|_| BoardError::NoMemory)
        })?
    }

    /// Recolor an already lit point of the current animation
    pub fn update_point(&self, x: usize, y: usize, color: RGB8) -> Result<(), BoardError> {
        self.with_store(|store| {
            let animation = store.current_mut().ok_or(BoardError::InvalidState)?;
            let point = animation
                .points
                .iter_mut()
                .find(|p| p.x as usize == x && p.y as usize == y)
                .ok_or(BoardError::NotFound)?;
            point.color = color;
            Ok(())
        })?
    }

    pub fn clear_points(&self) -> Result<(), BoardError> {
        self.with_store(|store| {
            if let Some(animation) = store.current_mut() {
                animation.points.clear();
            }
        })
    }

    pub fn point_count(&self, index: usize) -> Option<usize> {
        self.with_store(|store| {
            store
                .animations
                .get(index)
                .filter(|a| a.valid)
                .map(|a| a.points.len())
        })
        .ok()
        .flatten()
    }

    pub fn set_running(&self, running: bool) -> Result<(), BoardError> {
        self.with_store(|store| store.running = running)
    }

    pub fn is_running(&self) -> bool {
        self.with_store(|store| store.running).unwrap_or(false)
    }

    pub fn set_speed(&self, speed: u8) -> Result<(), BoardError> {
        self.with_store(|store| store.speed = speed)
    }

    pub fn speed(&self) -> u8 {
        self.with_store(|store| store.speed).unwrap_or(ANIMATION_SPEED)
    }

    pub fn flash_position(&self) -> u32 {
        self.with_store(|store| store.flash_position).unwrap_or(0)
    }

    /// Draw one frame of the current animation and refresh the matrix.
    ///
    /// Paused animations leave the matrix untouched. With no valid animation
    /// the matrix is blanked.
    pub fn render_frame<S: LedStrip>(&self, matrix: &mut LedMatrix<S>) -> Result<(), BoardError> {
        let frame = self.with_store(|store| {
            if !store.running {
                return None;
            }
            store.flash_position += store.speed as u32;
            if store.flash_position as f32 > (MATRIX_WIDTH + MATRIX_HEIGHT) as f32 + FLASH_WIDTH {
                store.flash_position = 0;
            }
            let points = store
                .current()
                .map(|animation| animation.points.clone())
                .unwrap_or_default();
            Some((store.flash_position, points))
        })?;
        let Some((position, points)) = frame else {
            return Ok(());
        };

        matrix.fill(RGB8::default());
        for point in points.iter() {
            let base = adjust_brightness_saturation(point.color);
            let flash = flash_brightness(point.x as usize, point.y as usize, position);
            let color = if flash > 0.0 {
                boost(base, 1.0 + flash * FLASH_BOOST)
            } else {
                base
            };
            matrix.set_pixel(point.x as usize, point.y as usize, color);
        }
        matrix.refresh()
    }

    /// Load the built-in set: demo, startup, link error, high temperature, computing
    pub fn load_builtin(&self) -> Result<(), BoardError> {
        self.clear_all()?;
        for (name, draw) in BUILTIN_ANIMATIONS {
            let index = self.create_new(name)?;
            self.with_store(|store| store.current = index)?;
            draw(self)?;
        }
        self.select(0)
    }
}

impl AnimationSelector for MatrixAnimator {
    fn select(&self, index: usize) -> Result<(), BoardError> {
        self.with_store(|store| store.select(index))?
    }

    fn count(&self) -> usize {
        self.with_store(|store| store.animations.len()).unwrap_or(0)
    }

    fn name(&self, index: usize) -> Option<AnimationName> {
        self.with_store(|store| {
            store
                .animations
                .get(index)
                .filter(|a| a.valid)
                .map(|a| a.name.clone())
        })
        .ok()
        .flatten()
    }
}

/// Flash intensity in 0..=1 for a pixel, by distance from the line x - y = position
fn flash_brightness(x: usize, y: usize, position: u32) -> f32 {
    let distance = fabsf(y as f32 - x as f32 + position as f32) / SQRT_2;
    if distance < FLASH_WIDTH {
        cosf(distance * PI / (2.0 * FLASH_WIDTH))
    } else {
        0.0
    }
}

fn boost(color: RGB8, factor: f32) -> RGB8 {
    let apply = |c: u8| (c as f32 * factor).min(255.0) as u8;
    RGB8::new(apply(color.r), apply(color.g), apply(color.b))
}

type DrawFn = fn(&MatrixAnimator) -> Result<(), BoardError>;

const BUILTIN_ANIMATIONS: [(&str, DrawFn); 5] = [
    ("demo", draw_border),
    ("startup", draw_square),
    ("link_error", draw_cross),
    ("high_temp", draw_disc),
    ("computing", draw_bars),
];

fn draw_border(animator: &MatrixAnimator) -> Result<(), BoardError> {
    let last = MATRIX_WIDTH - 1;
    for i in 0..MATRIX_WIDTH {
        let shade = (i * 255 / last) as u8;
        let color = RGB8::new(shade, 64, 255 - shade);
        animator.set_point(i, 0, color)?;
        animator.set_point(i, last, color)?;
        if i > 0 && i < last {
            animator.set_point(0, i, color)?;
            animator.set_point(last, i, color)?;
        }
    }
    Ok(())
}

fn draw_square(animator: &MatrixAnimator) -> Result<(), BoardError> {
    let (lo, hi) = (8, 23);
    for i in lo..=hi {
        animator.set_point(i, lo, RGB8::new(243, 112, 34))?;
        animator.set_point(i, hi, RGB8::new(243, 112, 34))?;
        animator.set_point(lo, i, RGB8::new(255, 255, 255))?;
        animator.set_point(hi, i, RGB8::new(255, 255, 255))?;
    }
    Ok(())
}

fn draw_cross(animator: &MatrixAnimator) -> Result<(), BoardError> {
    let last = MATRIX_WIDTH - 1;
    for i in 0..MATRIX_WIDTH {
        animator.set_point(i, i, RGB8::new(255, 255, 0))?;
        animator.set_point(last - i, i, RGB8::new(255, 255, 0))?;
    }
    Ok(())
}

fn draw_disc(animator: &MatrixAnimator) -> Result<(), BoardError> {
    let center = 15.5f32;
    for y in 0..MATRIX_HEIGHT {
        for x in 0..MATRIX_WIDTH {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            if dx * dx + dy * dy <= 7.0 * 7.0 {
                animator.set_point(x, y, RGB8::new(255, 0, 0))?;
            }
        }
    }
    Ok(())
}

fn draw_bars(animator: &MatrixAnimator) -> Result<(), BoardError> {
    for row in [6, 15, 24] {
        for x in 0..MATRIX_WIDTH {
            animator.set_point(x, row, RGB8::new(0, 128, 255))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led_matrix::color_correct;

    #[test]
    fn create_select_and_cycle() {
        let animator = MatrixAnimator::new();
        assert_eq!(animator.create_new("a"), Ok(0));
        assert_eq!(animator.create_new(""), Ok(1));
        assert_eq!(animator.name(1).unwrap().as_str(), "animation1");

        animator.select(1).unwrap();
        animator.next().unwrap();
        assert_eq!(animator.current_index(), Ok(0));
        animator.previous().unwrap();
        assert_eq!(animator.current_index(), Ok(1));
        assert_eq!(animator.select(5), Err(BoardError::InvalidArgument));
    }

    #[test]
    fn storage_is_bounded() {
        let animator = MatrixAnimator::new();
        for _ in 0..MAX_ANIMATIONS {
            animator.create_new("x").unwrap();
        }
        assert_eq!(animator.create_new("overflow"), Err(BoardError::NoMemory));
    }

    #[test]
    fn delete_current_moves_to_first_valid() {
        let animator = MatrixAnimator::new();
        for name in ["a", "b", "c"] {
            animator.create_new(name).unwrap();
        }
        animator.select(0).unwrap();
        animator.delete(0).unwrap();
        assert_eq!(animator.current_index(), Ok(1));
        assert_eq!(animator.select(0), Err(BoardError::InvalidState));
        assert!(animator.name(0).is_none());
        // deleted slots still count as loaded
        assert_eq!(animator.count(), 3);
        animator.next().unwrap();
        assert_eq!(animator.current_index(), Ok(2));
        animator.next().unwrap();
        assert_eq!(animator.current_index(), Ok(1));
    }

    #[test]
    fn points_are_bounded_per_animation() {
        let animator = MatrixAnimator::new();
        animator.create_new("full").unwrap();
        for i in 0..MAX_ANIMATION_POINTS {
            animator
                .set_point(i % MATRIX_WIDTH, i / MATRIX_WIDTH, RGB8::new(1, 1, 1))
                .unwrap();
        }
        // relighting an existing point is still allowed
        animator.set_point(0, 0, RGB8::new(2, 2, 2)).unwrap();
        assert_eq!(
            animator.set_point(31, 31, RGB8::new(1, 1, 1)),
            Err(BoardError::NoMemory)
        );
        assert_eq!(
            animator.update_point(31, 31, RGB8::new(1, 1, 1)),
            Err(BoardError::NotFound)
        );
        assert_eq!(
            animator.set_point(32, 0, RGB8::new(1, 1, 1)),
            Err(BoardError::InvalidArgument)
        );
    }

    #[test]
    fn flash_peaks_on_the_sweep_line() {
        assert!((flash_brightness(7, 2, 5) - 1.0).abs() < 1e-6);
        assert!((flash_brightness(4, 4, 0) - 1.0).abs() < 1e-6);
        assert_eq!(flash_brightness(0, 0, 10), 0.0);
        // the anti-diagonal is not on the sweep line
        assert_eq!(flash_brightness(2, 7, 5), 0.0);
        let near = flash_brightness(6, 2, 5);
        assert!(near > 0.0 && near < 1.0);
    }

    struct GridStrip {
        pixels: Vec<RGB8>,
        refreshes: u32,
    }

    impl LedStrip for GridStrip {
        fn len(&self) -> usize {
            self.pixels.len()
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
            self.refreshes += 1;
            Ok(())
        }
    }

    fn matrix() -> LedMatrix<GridStrip> {
        LedMatrix::new(GridStrip {
            pixels: alloc::vec![RGB8::default(); MATRIX_WIDTH * MATRIX_HEIGHT],
            refreshes: 0,
        })
        .unwrap()
    }

    fn led(matrix: &LedMatrix<GridStrip>, x: usize, y: usize) -> RGB8 {
        matrix.strip().pixels[y * MATRIX_WIDTH + x]
    }

    #[test]
    fn frame_draws_corrected_points_and_flash() {
        let animator = MatrixAnimator::new();
        animator.create_new("dots").unwrap();
        let color = RGB8::new(0, 128, 255);
        // far from the sweep line at position 1
        animator.set_point(0, 31, color).unwrap();
        // on the sweep line at position 1
        animator.set_point(1, 0, color).unwrap();

        let mut matrix = matrix();
        matrix.set_pixel(5, 5, RGB8::new(9, 9, 9));
        animator.render_frame(&mut matrix).unwrap();

        let base = adjust_brightness_saturation(color);
        assert_eq!(animator.flash_position(), 1);
        assert_eq!(matrix.pixel(0, 31), base);
        assert_eq!(led(&matrix, 0, 31), color_correct(base));
        assert_eq!(matrix.pixel(1, 0), boost(base, 1.0 + FLASH_BOOST));
        assert_eq!(led(&matrix, 1, 0), color_correct(boost(base, 1.0 + FLASH_BOOST)));
        // unlit pixels are blanked every frame
        assert_eq!(matrix.pixel(5, 5), RGB8::default());
        assert_eq!(matrix.strip().refreshes, 1);
    }

    #[test]
    fn flash_position_wraps_after_full_sweep() {
        let animator = MatrixAnimator::new();
        animator.create_new("empty").unwrap();
        let mut matrix = matrix();

        let sweep = MATRIX_WIDTH + MATRIX_HEIGHT + FLASH_WIDTH as usize;
        for _ in 0..sweep {
            animator.render_frame(&mut matrix).unwrap();
        }
        assert_eq!(animator.flash_position(), sweep as u32);

        animator.render_frame(&mut matrix).unwrap();
        assert_eq!(animator.flash_position(), 0);
        assert_eq!(matrix.strip().refreshes, sweep as u32 + 1);

        animator.set_speed(3).unwrap();
        animator.render_frame(&mut matrix).unwrap();
        assert_eq!(animator.flash_position(), 3);
    }

    #[test]
    fn paused_animation_leaves_matrix_untouched() {
        let animator = MatrixAnimator::new();
        animator.create_new("dots").unwrap();
        animator.set_point(3, 3, RGB8::new(255, 0, 0)).unwrap();
        animator.set_running(false).unwrap();

        let mut matrix = matrix();
        matrix.set_pixel(5, 5, RGB8::new(9, 9, 9));
        animator.render_frame(&mut matrix).unwrap();

        assert_eq!(matrix.pixel(5, 5), RGB8::new(9, 9, 9));
        assert_eq!(matrix.pixel(3, 3), RGB8::default());
        assert_eq!(matrix.strip().refreshes, 0);
        assert_eq!(animator.flash_position(), 0);
    }

    #[test]
    fn no_valid_animation_blanks_matrix() {
        let animator = MatrixAnimator::new();
        animator.create_new("gone").unwrap();
        animator.set_point(3, 3, RGB8::new(255, 0, 0)).unwrap();
        animator.delete(0).unwrap();

        let mut matrix = matrix();
        matrix.set_pixel(5, 5, RGB8::new(9, 9, 9));
        animator.render_frame(&mut matrix).unwrap();

        assert_eq!(matrix.pixel(5, 5), RGB8::default());
        assert_eq!(matrix.pixel(3, 3), RGB8::default());
        assert_eq!(led(&matrix, 5, 5), RGB8::default());
        assert_eq!(matrix.strip().refreshes, 1);
    }

    #[test]
    fn builtin_set_fits_limits() {
        let animator = MatrixAnimator::new();
        animator.load_builtin().unwrap();
        assert_eq!(animator.count(), 5);
        assert_eq!(animator.current_index(), Ok(0));
        for index in 0..5 {
            let points = animator.point_count(index).unwrap();
            assert!(points > 0 && points <= MAX_ANIMATION_POINTS);
        }
        assert_eq!(animator.name(4).unwrap().as_str(), "computing");
    }
}
