#![cfg_attr(not(test), no_std)]

//! RM-01 ESP32-S3 Board Support Library
//!
//! This library implements the system-state determination and LED display stack
//! of the RM-01 carrier board: a state manager that classifies machine health,
//! three display controllers (board ring, touch pixel, 32x32 matrix) and a
//! unified status interface with caching and event fan-out.

extern crate alloc;

pub mod animation;
pub mod board_display;
pub mod context;
pub mod display_controller;
pub mod led_matrix;
pub mod matrix_animation;
pub mod network_monitor;
pub mod power;
pub mod state_manager;
pub mod status_interface;
pub mod touch_display;
pub mod ws2812;

pub use context::{BoardContext, Clock, ManualClock, SystemClock};

/// Project version information
pub const VERSION: &str = "0.1.0-dev";

/// Default configuration constants
pub mod config {
    /// Onboard WS2812 ring data pin
    pub const BOARD_LED_PIN: u8 = 42;

    /// Number of LEDs on the onboard ring
    pub const BOARD_LED_COUNT: usize = 28;

    /// LED matrix data pin
    pub const MATRIX_LED_PIN: u8 = 9;

    pub const MATRIX_WIDTH: usize = 32;
    pub const MATRIX_HEIGHT: usize = 32;
    pub const MATRIX_LED_COUNT: usize = MATRIX_WIDTH * MATRIX_HEIGHT;

    /// Touch button WS2812 data pin
    pub const TOUCH_LED_PIN: u8 = 45;

    /// Number of LEDs behind the touch button
    pub const TOUCH_LED_COUNT: usize = 1;

    /// Monitored network targets
    /// Read from environment variables at compile time
    pub const COMPUTING_MODULE_IP: &str = env!("RM01_COMPUTING_IP");
    pub const APPLICATION_MODULE_IP: &str = env!("RM01_APPLICATION_IP");
    pub const USER_HOST_IP: &str = env!("RM01_USER_HOST_IP");
    pub const INTERNET_IP: &str = env!("RM01_INTERNET_IP");

    /// State manager detection period in milliseconds
    pub const STATE_CHECK_INTERVAL_MS: u64 = 2000;

    /// Maximum number of state observers
    pub const MAX_STATE_OBSERVERS: usize = 5;

    pub const TEMP_THRESHOLD_HIGH_1: f32 = 85.0;
    pub const TEMP_THRESHOLD_HIGH_2: f32 = 95.0;

    /// Recovery temperature. Not read by the decision table; reserved for hysteresis.
    pub const TEMP_THRESHOLD_NORMAL: f32 = 80.0;

    /// Power-chip wattage above which the system counts as under high compute load
    pub const HIGH_COMPUTE_POWER_W: f32 = 50.0;

    /// Touch display tick period in milliseconds
    pub const TOUCH_UPDATE_INTERVAL_MS: u64 = 50;

    /// Minimum interval between two network cache refreshes
    pub const NETWORK_CACHE_REFRESH_MS: u64 = 1000;

    /// Duration of one color slot in the multi-error round robin
    pub const MULTI_ERROR_SLOT_MS: u64 = 500;

    pub const BOARD_TEMP_THRESHOLD: f32 = 85.0;
    pub const BOARD_POWER_THRESHOLD_MW: f32 = 15000.0;
    pub const BOARD_MEMORY_THRESHOLD: f32 = 90.0;

    /// Board recovery thresholds. Not read by the decision table; reserved for hysteresis.
    pub const BOARD_TEMP_RECOVERY: f32 = 80.0;
    pub const BOARD_POWER_RECOVERY_MW: f32 = 12000.0;
    pub const BOARD_MEMORY_RECOVERY: f32 = 85.0;

    /// Maximum number of stored matrix animations
    pub const MAX_ANIMATIONS: usize = 10;

    /// Maximum number of lit points per matrix animation
    pub const MAX_ANIMATION_POINTS: usize = 200;

    /// Maximum animation name length in bytes
    pub const MAX_ANIMATION_NAME_LEN: usize = 63;

    /// Half-width of the diagonal flash band, in pixels
    pub const FLASH_WIDTH: f32 = 2.0;

    /// Default flash sweep advance per frame
    pub const ANIMATION_SPEED: u8 = 1;

    /// Matrix frame period in milliseconds (~33 FPS)
    pub const MATRIX_FRAME_INTERVAL_MS: u64 = 30;

    /// Status event queue depth
    pub const EVENT_QUEUE_SIZE: usize = 16;

    /// Maximum number of status listeners
    pub const MAX_STATUS_LISTENERS: usize = 8;

    /// Maximum number of network status observers
    pub const MAX_NETWORK_OBSERVERS: usize = 4;

    /// Cache age accepted by the health check
    pub const HEALTH_CACHE_MAX_AGE_MS: u64 = 5000;
}

/// Error types for the board support library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    /// Bad enum value, index or argument
    InvalidArgument,
    /// Operation on a component in the wrong lifecycle state
    InvalidState,
    /// Lock or queue wait exceeded
    Timeout,
    /// Slot table or storage exhausted
    NoMemory,
    /// Lookup miss, e.g. unregistering an unknown observer
    NotFound,
}

impl core::fmt::Display for BoardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            BoardError::InvalidArgument => "invalid argument",
            BoardError::InvalidState => "invalid state",
            BoardError::Timeout => "timed out",
            BoardError::NoMemory => "out of slots",
            BoardError::NotFound => "not found",
        };
        f.write_str(msg)
    }
}
