//! Board WS2812 ring controller, driven by host metrics.

use alloc::sync::Arc;
use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Timer};
use log::{debug, info, warn};
use smart_leds::RGB8;

use crate::BoardError;
use crate::animation::{BlinkSpeed, BreathSpeed, Effect, colors, scale};
use crate::config::{BOARD_MEMORY_THRESHOLD, BOARD_POWER_THRESHOLD_MW, BOARD_TEMP_THRESHOLD};
use crate::context::BoardContext;
use crate::ws2812::{LedStrip, SharedStrip, try_render};

const TAG: &str = "BOARD";

/// Host metrics scraped from the module Prometheus exporters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemMetrics {
    pub n305_cpu_temp: f32,
    pub jetson_cpu_temp: f32,
    pub jetson_gpu_temp: f32,
    pub jetson_power_mw: f32,
    pub jetson_memory_total: f32,
    pub jetson_memory_used: f32,
    pub jetson_memory_usage: f32,
    pub n305_data_valid: bool,
    pub jetson_data_valid: bool,
    pub last_update_time: u64,
}

impl SystemMetrics {
    /// Overlay the sources that `fresh` reports valid; stale sources keep their last values
    pub fn merge(&mut self, fresh: &SystemMetrics) {
        if fresh.n305_data_valid {
            self.n305_cpu_temp = fresh.n305_cpu_temp;
            self.n305_data_valid = true;
        }
        if fresh.jetson_data_valid {
            self.jetson_cpu_temp = fresh.jetson_cpu_temp;
            self.jetson_gpu_temp = fresh.jetson_gpu_temp;
            self.jetson_power_mw = fresh.jetson_power_mw;
            self.jetson_memory_total = fresh.jetson_memory_total;
            self.jetson_memory_used = fresh.jetson_memory_used;
            self.jetson_memory_usage = fresh.jetson_memory_usage;
            self.jetson_data_valid = true;
        }
        self.last_update_time = fresh.last_update_time;
    }
}

/// Periodic metrics fetcher; `None` when nothing could be read
pub trait MetricsSource: Send + Sync {
    fn fetch(&self) -> Option<SystemMetrics>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardDisplayMode {
    Off,
    HighTemp,
    HighPower,
    MemoryHighUsage,
}

impl BoardDisplayMode {
    pub fn name(self) -> &'static str {
        match self {
            BoardDisplayMode::Off => "OFF",
            BoardDisplayMode::HighTemp => "HIGH_TEMP",
            BoardDisplayMode::HighPower => "HIGH_POWER",
            BoardDisplayMode::MemoryHighUsage => "MEMORY_HIGH_USAGE",
        }
    }

    pub fn effect(self) -> Effect {
        match self {
            BoardDisplayMode::Off => Effect::Off,
            BoardDisplayMode::HighTemp => Effect::Breath {
                color: colors::RED,
                speed: BreathSpeed::Slow,
            },
            BoardDisplayMode::HighPower => Effect::Breath {
                color: colors::PURPLE,
                speed: BreathSpeed::Fast,
            },
            BoardDisplayMode::MemoryHighUsage => Effect::Breath {
                color: colors::PURPLE,
                speed: BreathSpeed::Slow,
            },
        }
    }
}

impl core::fmt::Display for BoardDisplayMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

pub struct BoardRule {
    pub applies: fn(&SystemMetrics) -> bool,
    pub mode: BoardDisplayMode,
}

/// Evaluated top to bottom, first match wins. Invalid sources never match.
pub const BOARD_RULES: [BoardRule; 4] = [
    BoardRule {
        applies: |m| m.n305_data_valid && m.n305_cpu_temp > BOARD_TEMP_THRESHOLD,
        mode: BoardDisplayMode::HighTemp,
    },
    BoardRule {
        applies: |m| {
            m.jetson_data_valid
                && (m.jetson_cpu_temp > BOARD_TEMP_THRESHOLD
                    || m.jetson_gpu_temp > BOARD_TEMP_THRESHOLD)
        },
        mode: BoardDisplayMode::HighTemp,
    },
    BoardRule {
        applies: |m| m.jetson_data_valid && m.jetson_power_mw > BOARD_POWER_THRESHOLD_MW,
        mode: BoardDisplayMode::HighPower,
    },
    BoardRule {
        applies: |m| m.jetson_data_valid && m.jetson_memory_usage > BOARD_MEMORY_THRESHOLD,
        mode: BoardDisplayMode::MemoryHighUsage,
    },
];

pub fn determine_board_mode(metrics: &SystemMetrics) -> BoardDisplayMode {
    BOARD_RULES
        .iter()
        .find(|rule| (rule.applies)(metrics))
        .map(|rule| rule.mode)
        .unwrap_or(BoardDisplayMode::Off)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub auto_mode_enabled: bool,
    pub debug_mode: bool,
    pub brightness: u8,
    pub update_interval_ms: u64,
    pub metrics_update_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_mode_enabled: true,
            debug_mode: false,
            brightness: 255,
            update_interval_ms: 200,
            metrics_update_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardDisplayStatus {
    pub current_mode: BoardDisplayMode,
    pub previous_mode: BoardDisplayMode,
    pub mode_change_count: u32,
    pub time_in_current_mode: u64,
    pub is_active: bool,
    pub manual_mode: bool,
    pub metrics: SystemMetrics,
    pub system_uptime_ms: u64,
}

struct BoardState {
    config: Config,
    current_mode: BoardDisplayMode,
    previous_mode: BoardDisplayMode,
    mode_change_count: u32,
    mode_start: u64,
    started_at: u64,
    active: bool,
    manual_mode: bool,
    manual_effect: Option<Effect>,
    metrics: SystemMetrics,
}

impl BoardState {
    fn switch_mode(&mut self, mode: BoardDisplayMode, now: u64) {
        self.previous_mode = self.current_mode;
        self.current_mode = mode;
        self.mode_change_count = self.mode_change_count.wrapping_add(1);
        self.mode_start = now;
    }
}

pub struct BoardDisplay<S> {
    ctx: BoardContext,
    strip: Arc<SharedStrip<S>>,
    state: Mutex<CriticalSectionRawMutex, RefCell<BoardState>>,
    running: AtomicBool,
}

impl<S: LedStrip> BoardDisplay<S> {
    pub fn new(ctx: BoardContext, strip: Arc<SharedStrip<S>>, config: Option<Config>) -> Self {
        let config = config.unwrap_or_default();
        let now = ctx.now_ms();
        info!(
            "[BOARD] Board display initialized (auto: {}, update: {} ms, metrics: {} ms)",
            config.auto_mode_enabled, config.update_interval_ms, config.metrics_update_interval_ms
        );
        Self {
            ctx,
            strip,
            state: Mutex::new(RefCell::new(BoardState {
                config,
                current_mode: BoardDisplayMode::Off,
                previous_mode: BoardDisplayMode::Off,
                mode_change_count: 0,
                mode_start: now,
                started_at: now,
                active: false,
                manual_mode: false,
                manual_effect: None,
                metrics: SystemMetrics::default(),
            })),
            running: AtomicBool::new(false),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut BoardState) -> R) -> Result<R, BoardError> {
        self.state.lock(|cell| {
            let mut state = cell.try_borrow_mut().map_err(|_| BoardError::Timeout)?;
            Ok(f(&mut state))
        })
    }

    pub fn start(&self) -> Result<(), BoardError> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("[BOARD] Board display already running");
            return Ok(());
        }
        let now = self.ctx.now_ms();
        self.with_state(|state| {
            state.active = true;
            state.started_at = now;
        })?;
        info!("[BOARD] Board display started");
        self.tick()
    }

    /// Stop updating and blank the ring
    pub fn stop(&self) -> Result<(), BoardError> {
        self.running.store(false, Ordering::Release);
        self.with_state(|state| state.active = false)?;
        try_render(&self.strip, TAG, |strip| strip.clear())?;
        info!("[BOARD] Board display stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn tick(&self) -> Result<(), BoardError> {
        if !self.is_running() {
            return Ok(());
        }
        self.update()?;
        self.render()
    }

    /// Display task loop
    pub async fn run(&self) -> ! {
        loop {
            if let Err(e) = self.tick() {
                warn!("[BOARD] Display update failed: {}", e);
            }
            let interval = self
                .config()
                .map(|config| config.update_interval_ms)
                .unwrap_or(Config::default().update_interval_ms);
            Timer::after(Duration::from_millis(interval)).await;
        }
    }

    /// Metrics task loop
    pub async fn run_metrics(&self, source: &dyn MetricsSource) -> ! {
        loop {
            match source.fetch() {
                Some(metrics) => {
                    if let Err(e) = self.update_metrics(metrics) {
                        warn!("[BOARD] Metrics update failed: {}", e);
                    }
                }
                None => warn!("[BOARD] Metrics unavailable, keeping last values"),
            }
            let interval = self
                .config()
                .map(|config| config.metrics_update_interval_ms)
                .unwrap_or(Config::default().metrics_update_interval_ms);
            Timer::after(Duration::from_millis(interval)).await;
        }
    }

    /// Merge a fresh sample into the cached metrics
    pub fn update_metrics(&self, fresh: SystemMetrics) -> Result<(), BoardError> {
        let now = self.ctx.now_ms();
        let merged = self.with_state(|state| {
            let mut fresh = fresh;
            fresh.last_update_time = now;
            state.metrics.merge(&fresh);
            state.metrics
        })?;
        debug!(
            "[BOARD] Metrics: N305 {:.1} C, Jetson CPU {:.1} C GPU {:.1} C, {:.0} mW, mem {:.1}%",
            merged.n305_cpu_temp,
            merged.jetson_cpu_temp,
            merged.jetson_gpu_temp,
            merged.jetson_power_mw,
            merged.jetson_memory_usage
        );
        Ok(())
    }

    pub fn metrics(&self) -> Result<SystemMetrics, BoardError> {
        self.with_state(|state| state.metrics)
    }

    fn update(&self) -> Result<(), BoardError> {
        let now = self.ctx.now_ms();
        let change = self.with_state(|state| {
            if state.manual_mode || !state.config.auto_mode_enabled {
                return None;
            }
            let mode = determine_board_mode(&state.metrics);
            if state.config.debug_mode {
                debug!("[BOARD] metrics {:?} -> {}", state.metrics, mode);
            }
            if mode == state.current_mode {
                return None;
            }
            let old = state.current_mode;
            state.switch_mode(mode, now);
            Some((old, mode))
        })?;
        if let Some((old, new)) = change {
            info!("[BOARD] Mode change [{}] -> [{}]", old, new);
        }
        Ok(())
    }

    fn render(&self) -> Result<(), BoardError> {
        let now = self.ctx.now_ms();
        let color = self.with_state(|state| {
            let effect = state
                .manual_effect
                .clone()
                .unwrap_or_else(|| state.current_mode.effect());
            scale(
                effect.color_at(now.saturating_sub(state.mode_start)),
                state.config.brightness,
            )
        })?;
        try_render(&self.strip, TAG, |strip| {
            strip.fill(color)?;
            strip.refresh()
        })
        .map(|_| ())
    }

    /// Force a mode until `resume_auto`
    pub fn set_mode(&self, mode: BoardDisplayMode) -> Result<(), BoardError> {
        let now = self.ctx.now_ms();
        self.with_state(|state| {
            state.manual_mode = true;
            state.manual_effect = None;
            state.switch_mode(mode, now);
        })?;
        info!("[BOARD] Manual mode {}", mode);
        self.render()
    }

    fn set_effect(&self, effect: Effect) -> Result<(), BoardError> {
        let now = self.ctx.now_ms();
        self.with_state(|state| {
            state.manual_mode = true;
            state.manual_effect = Some(effect);
            state.mode_start = now;
        })?;
        self.render()
    }

    pub fn set_color(&self, color: RGB8) -> Result<(), BoardError> {
        info!("[BOARD] Manual color ({}, {}, {})", color.r, color.g, color.b);
        self.set_effect(Effect::Solid(color))
    }

    pub fn set_blink(&self, color: RGB8, speed: BlinkSpeed) -> Result<(), BoardError> {
        self.set_effect(Effect::Blink { color, speed })
    }

    pub fn set_breath(&self, color: RGB8, speed: BreathSpeed) -> Result<(), BoardError> {
        self.set_effect(Effect::Breath { color, speed })
    }

    pub fn resume_auto(&self) -> Result<(), BoardError> {
        self.with_state(|state| {
            state.manual_mode = false;
            state.manual_effect = None;
        })?;
        info!("[BOARD] Automatic display resumed");
        self.update()?;
        self.render()
    }

    pub fn set_auto_mode(&self, enabled: bool) -> Result<(), BoardError> {
        self.with_state(|state| state.config.auto_mode_enabled = enabled)
    }

    pub fn set_brightness(&self, brightness: u8) -> Result<(), BoardError> {
        self.with_state(|state| state.config.brightness = brightness)?;
        info!("[BOARD] Brightness {}", brightness);
        Ok(())
    }

    pub fn set_debug_mode(&self, enabled: bool) -> Result<(), BoardError> {
        self.with_state(|state| state.config.debug_mode = enabled)
    }

    pub fn config(&self) -> Result<Config, BoardError> {
        self.with_state(|state| state.config)
    }

    pub fn status(&self) -> Result<BoardDisplayStatus, BoardError> {
        let now = self.ctx.now_ms();
        self.with_state(|state| BoardDisplayStatus {
            current_mode: state.current_mode,
            previous_mode: state.previous_mode,
            mode_change_count: state.mode_change_count,
            time_in_current_mode: now.saturating_sub(state.mode_start),
            is_active: state.active,
            manual_mode: state.manual_mode,
            metrics: state.metrics,
            system_uptime_ms: if state.active {
                now.saturating_sub(state.started_at)
            } else {
                0
            },
        })
    }

    pub fn print_status(&self) {
        let status = match self.status() {
            Ok(status) => status,
            Err(e) => {
                warn!("[BOARD] Status unavailable: {}", e);
                return;
            }
        };
        let m = &status.metrics;
        info!("[BOARD] ===== Board display =====");
        info!(
            "[BOARD] active: {}  manual: {}  mode: {}  previous: {}  changes: {}",
            status.is_active,
            status.manual_mode,
            status.current_mode,
            status.previous_mode,
            status.mode_change_count
        );
        info!(
            "[BOARD] in mode: {} ms  uptime: {} ms",
            status.time_in_current_mode, status.system_uptime_ms
        );
        if m.n305_data_valid {
            info!("[BOARD] N305 CPU: {:.1} C", m.n305_cpu_temp);
        } else {
            info!("[BOARD] N305: no data");
        }
        if m.jetson_data_valid {
            info!(
                "[BOARD] Jetson CPU: {:.1} C  GPU: {:.1} C  power: {:.0} mW",
                m.jetson_cpu_temp, m.jetson_gpu_temp, m.jetson_power_mw
            );
            info!(
                "[BOARD] Jetson memory: {:.0}/{:.0} MB ({:.1}%)",
                m.jetson_memory_used, m.jetson_memory_total, m.jetson_memory_usage
            );
        } else {
            info!("[BOARD] Jetson: no data");
        }
    }
}
