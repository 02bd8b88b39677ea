//! Touch WS2812 display controller.
//!
//! The touch LED reflects boot progress and module reachability. The mode is
//! a pure function of the time since the controller started plus four
//! cached link flags, re-evaluated every tick; it does not follow the
//! `SystemState`.

use alloc::sync::Arc;
use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Timer};
use heapless::Vec;
use log::{debug, info, warn};
use smart_leds::RGB8;

use crate::BoardError;
use crate::animation::{BlinkSpeed, BreathSpeed, Effect, colors, scale};
use crate::config::{NETWORK_CACHE_REFRESH_MS, TOUCH_UPDATE_INTERVAL_MS};
use crate::context::BoardContext;
use crate::network_monitor::NetworkTarget;
use crate::ws2812::{LedStrip, SharedStrip, try_render};

const TAG: &str = "TOUCH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchDisplayMode {
    Init,
    N305Error,
    JetsonError,
    UserHostWarning,
    Startup,
    StandbyNoInternet,
    StandbyWithInternet,
    MultiError,
    InternetOnly,
}

impl TouchDisplayMode {
    pub const COUNT: usize = 9;

    pub fn name(self) -> &'static str {
        match self {
            TouchDisplayMode::Init => "INIT",
            TouchDisplayMode::N305Error => "N305_ERROR",
            TouchDisplayMode::JetsonError => "JETSON_ERROR",
            TouchDisplayMode::UserHostWarning => "USER_HOST_WARNING",
            TouchDisplayMode::Startup => "STARTUP",
            TouchDisplayMode::StandbyNoInternet => "STANDBY_NO_INTERNET",
            TouchDisplayMode::StandbyWithInternet => "STANDBY_WITH_INTERNET",
            TouchDisplayMode::MultiError => "MULTI_ERROR",
            TouchDisplayMode::InternetOnly => "INTERNET_ONLY",
        }
    }
}

impl core::fmt::Display for TouchDisplayMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub auto_mode_enabled: bool,
    pub init_duration_ms: u64,
    pub error_timeout_ms: u64,
    pub standby_delay_ms: u64,
    pub debug_mode: bool,
    pub brightness: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_mode_enabled: true,
            init_duration_ms: 3000,
            error_timeout_ms: 60_000,
            standby_delay_ms: 240_000,
            debug_mode: false,
            brightness: 255,
        }
    }
}

/// Cached reachability of the four monitored targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub n305: bool,
    pub jetson: bool,
    pub user_host: bool,
    pub internet: bool,
}

impl LinkStatus {
    fn error_count(&self) -> usize {
        [self.n305, self.jetson, self.user_host]
            .iter()
            .filter(|up| !**up)
            .count()
    }
}

/// Mode for `elapsed_ms` after start with the given links.
///
/// Before `error_timeout_ms` any error combined with internet access is a
/// multi-error; after it only two or more errors are.
pub fn determine_display_mode(
    elapsed_ms: u64,
    links: &LinkStatus,
    config: &Config,
) -> TouchDisplayMode {
    if elapsed_ms < config.init_duration_ms {
        return TouchDisplayMode::Init;
    }

    let errors = links.error_count();
    let within_timeout = elapsed_ms < config.error_timeout_ms;

    if within_timeout && links.internet && errors > 0 {
        return TouchDisplayMode::MultiError;
    }
    if errors >= 2 {
        return TouchDisplayMode::MultiError;
    }
    if !links.n305 {
        return TouchDisplayMode::N305Error;
    }
    if !links.jetson {
        return TouchDisplayMode::JetsonError;
    }
    if !links.user_host {
        return TouchDisplayMode::UserHostWarning;
    }

    // both modules are up from here on
    if within_timeout || elapsed_ms < config.standby_delay_ms {
        TouchDisplayMode::Startup
    } else if links.internet {
        TouchDisplayMode::StandbyWithInternet
    } else {
        TouchDisplayMode::StandbyNoInternet
    }
}

/// One entry per unreachable target, plus orange when the internet is up
pub fn multi_error_palette(links: &LinkStatus) -> Vec<RGB8, 4> {
    let mut palette = Vec::new();
    for (up, color) in [
        (!links.n305, colors::BLUE),
        (!links.jetson, colors::YELLOW),
        (!links.user_host, colors::MAGENTA),
        (links.internet, colors::ORANGE),
    ] {
        if up {
            // capacity matches the candidate count
            let _ = palette.push(color);
        }
    }
    palette
}

/// Rendering of each mode
pub fn mode_effect(mode: TouchDisplayMode, links: &LinkStatus) -> Effect {
    let accent = if links.internet {
        colors::ORANGE
    } else {
        colors::WHITE
    };
    match mode {
        TouchDisplayMode::Init => Effect::Solid(colors::WHITE),
        TouchDisplayMode::N305Error => Effect::Blink {
            color: colors::BLUE,
            speed: BlinkSpeed::Normal,
        },
        TouchDisplayMode::JetsonError => Effect::Blink {
            color: colors::YELLOW,
            speed: BlinkSpeed::Normal,
        },
        TouchDisplayMode::UserHostWarning => Effect::Blink {
            color: colors::MAGENTA,
            speed: BlinkSpeed::Normal,
        },
        TouchDisplayMode::Startup => Effect::Breath {
            color: accent,
            speed: BreathSpeed::Fast,
        },
        TouchDisplayMode::StandbyNoInternet => Effect::Breath {
            color: colors::WHITE,
            speed: BreathSpeed::Slow,
        },
        TouchDisplayMode::StandbyWithInternet => Effect::Breath {
            color: colors::ORANGE,
            speed: BreathSpeed::Slow,
        },
        TouchDisplayMode::MultiError => Effect::RoundRobin {
            colors: multi_error_palette(links),
        },
        TouchDisplayMode::InternetOnly => Effect::Blink {
            color: colors::ORANGE,
            speed: BlinkSpeed::Normal,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchDisplayStatus {
    pub current_mode: TouchDisplayMode,
    pub previous_mode: TouchDisplayMode,
    pub mode_change_count: u32,
    pub time_in_current_mode: u64,
    pub is_active: bool,
    pub manual_mode: bool,
    pub n305_connected: bool,
    pub jetson_connected: bool,
    pub user_host_connected: bool,
    pub internet_connected: bool,
    /// Time since `start`
    pub system_uptime_ms: u64,
}

struct TouchState {
    config: Config,
    current_mode: TouchDisplayMode,
    previous_mode: TouchDisplayMode,
    mode_change_count: u32,
    mode_start: u64,
    started_at: u64,
    active: bool,
    manual_mode: bool,
    manual_effect: Option<Effect>,
    links: LinkStatus,
    last_network_check: Option<u64>,
}

impl TouchState {
    fn switch_mode(&mut self, mode: TouchDisplayMode, now: u64) {
        self.previous_mode = self.current_mode;
        self.current_mode = mode;
        self.mode_change_count = self.mode_change_count.wrapping_add(1);
        self.mode_start = now;
    }
}

pub struct TouchDisplay<S> {
    ctx: BoardContext,
    strip: Arc<SharedStrip<S>>,
    state: Mutex<CriticalSectionRawMutex, RefCell<TouchState>>,
    running: AtomicBool,
}

impl<S: LedStrip> TouchDisplay<S> {
    pub fn new(ctx: BoardContext, strip: Arc<SharedStrip<S>>, config: Option<Config>) -> Self {
        let config = config.unwrap_or_default();
        let now = ctx.now_ms();
        info!(
            "[TOUCH] Touch display initialized (auto: {}, brightness: {}, init: {} ms)",
            config.auto_mode_enabled, config.brightness, config.init_duration_ms
        );
        Self {
            ctx,
            strip,
            state: Mutex::new(RefCell::new(TouchState {
                config,
                current_mode: TouchDisplayMode::Init,
                previous_mode: TouchDisplayMode::Init,
                mode_change_count: 0,
                mode_start: now,
                started_at: now,
                active: false,
                manual_mode: false,
                manual_effect: None,
                links: LinkStatus::default(),
                last_network_check: None,
            })),
            running: AtomicBool::new(false),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TouchState) -> R) -> Result<R, BoardError> {
        self.state.lock(|cell| {
            let mut state = cell.try_borrow_mut().map_err(|_| BoardError::Timeout)?;
            Ok(f(&mut state))
        })
    }

    /// Begin the boot sequence at INIT; elapsed time counts from here
    pub fn start(&self) -> Result<(), BoardError> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("[TOUCH] Touch display already running");
            return Ok(());
        }
        let now = self.ctx.now_ms();
        self.with_state(|state| {
            state.active = true;
            state.current_mode = TouchDisplayMode::Init;
            state.previous_mode = TouchDisplayMode::Init;
            state.started_at = now;
            state.mode_start = now;
            state.last_network_check = None;
        })?;
        info!("[TOUCH] Touch display started");
        self.render()
    }

    /// Stop updating and switch the LED off
    pub fn stop(&self) -> Result<(), BoardError> {
        self.running.store(false, Ordering::Release);
        self.with_state(|state| state.active = false)?;
        try_render(&self.strip, TAG, |strip| strip.clear())?;
        info!("[TOUCH] Touch display stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// One display cycle: refresh links, re-evaluate the mode, render
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
                warn!("[TOUCH] Display update failed: {}", e);
            }
            Timer::after(Duration::from_millis(TOUCH_UPDATE_INTERVAL_MS)).await;
        }
    }

    fn refresh_links(&self, now: u64) -> Result<(), BoardError> {
        let due = self.with_state(|state| match state.last_network_check {
            Some(last) => now.saturating_sub(last) >= NETWORK_CACHE_REFRESH_MS,
            None => true,
        })?;
        if !due {
            return Ok(());
        }

        let network = &self.ctx.network;
        let links = LinkStatus {
            n305: network.is_up(NetworkTarget::ApplicationModule.ip()),
            jetson: network.is_up(NetworkTarget::ComputingModule.ip()),
            user_host: network.is_up(NetworkTarget::UserHost.ip()),
            internet: network.is_up(NetworkTarget::Internet.ip()),
        };
        self.with_state(|state| {
            if state.config.debug_mode && state.links.internet != links.internet {
                debug!("[TOUCH] Internet link now {}", links.internet);
            }
            state.links = links;
            state.last_network_check = Some(now);
        })
    }

    fn update(&self) -> Result<(), BoardError> {
        let auto = self.with_state(|state| !state.manual_mode && state.config.auto_mode_enabled)?;
        if !auto {
            return Ok(());
        }

        let now = self.ctx.now_ms();
        self.refresh_links(now)?;
        let change = self.with_state(|state| {
            let elapsed = now.saturating_sub(state.started_at);
            let mode = determine_display_mode(elapsed, &state.links, &state.config);
            if state.config.debug_mode {
                debug!(
                    "[TOUCH] t={} ms links={:?} -> {}",
                    elapsed, state.links, mode
                );
            }
            if mode == state.current_mode {
                return None;
            }
            let old = state.current_mode;
            state.switch_mode(mode, now);
            Some((old, mode))
        })?;
        if let Some((old, new)) = change {
            info!("[TOUCH] Mode change [{}] -> [{}]", old, new);
        }
        Ok(())
    }

    fn render(&self) -> Result<(), BoardError> {
        let now = self.ctx.now_ms();
        let color = self.with_state(|state| {
            let effect = match &state.manual_effect {
                Some(effect) => effect.clone(),
                None => mode_effect(state.current_mode, &state.links),
            };
            let color = effect.color_at(now.saturating_sub(state.mode_start));
            scale(color, state.config.brightness)
        })?;
        try_render(&self.strip, TAG, |strip| {
            strip.fill(color)?;
            strip.refresh()
        })
        .map(|_| ())
    }

    /// Force a mode and enter manual mode
    pub fn set_mode(&self, mode: TouchDisplayMode) -> Result<(), BoardError> {
        let now = self.ctx.now_ms();
        self.with_state(|state| {
            state.manual_mode = true;
            state.manual_effect = None;
            state.switch_mode(mode, now);
        })?;
        info!("[TOUCH] Manual mode {}", mode);
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

    /// Solid color until `resume_auto`
    pub fn set_color(&self, color: RGB8) -> Result<(), BoardError> {
        info!("[TOUCH] Manual color ({}, {}, {})", color.r, color.g, color.b);
        self.set_effect(Effect::Solid(color))
    }

    pub fn set_blink(&self, color: RGB8, speed: BlinkSpeed) -> Result<(), BoardError> {
        self.set_effect(Effect::Blink { color, speed })
    }

    pub fn set_breath(&self, color: RGB8, speed: BreathSpeed) -> Result<(), BoardError> {
        self.set_effect(Effect::Breath { color, speed })
    }

    /// Leave manual mode and recompute the mode right away
    pub fn resume_auto(&self) -> Result<(), BoardError> {
        self.with_state(|state| {
            state.manual_mode = false;
            state.manual_effect = None;
            state.last_network_check = None;
        })?;
        info!("[TOUCH] Automatic display resumed");
        self.update()?;
        self.render()
    }

    pub fn set_auto_mode(&self, enabled: bool) -> Result<(), BoardError> {
        self.with_state(|state| state.config.auto_mode_enabled = enabled)?;
        info!("[TOUCH] Auto mode {}", enabled);
        Ok(())
    }

    pub fn set_brightness(&self, brightness: u8) -> Result<(), BoardError> {
        self.with_state(|state| state.config.brightness = brightness)?;
        info!("[TOUCH] Brightness {}", brightness);
        Ok(())
    }

    pub fn set_debug_mode(&self, enabled: bool) -> Result<(), BoardError> {
        self.with_state(|state| state.config.debug_mode = enabled)
    }

    pub fn config(&self) -> Result<Config, BoardError> {
        self.with_state(|state| state.config)
    }

    pub fn status(&self) -> Result<TouchDisplayStatus, BoardError> {
        let now = self.ctx.now_ms();
        self.with_state(|state| TouchDisplayStatus {
            current_mode: state.current_mode,
            previous_mode: state.previous_mode,
            mode_change_count: state.mode_change_count,
            time_in_current_mode: now.saturating_sub(state.mode_start),
            is_active: state.active,
            manual_mode: state.manual_mode,
            n305_connected: state.links.n305,
            jetson_connected: state.links.jetson,
            user_host_connected: state.links.user_host,
            internet_connected: state.links.internet,
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
                warn!("[TOUCH] Status unavailable: {}", e);
                return;
            }
        };
        info!("[TOUCH] ===== Touch display =====");
        info!(
            "[TOUCH] active: {}  manual: {}",
            status.is_active, status.manual_mode
        );
        info!(
            "[TOUCH] mode: {}  previous: {}  changes: {}",
            status.current_mode, status.previous_mode, status.mode_change_count
        );
        info!(
            "[TOUCH] in mode: {} ms  uptime: {} ms",
            status.time_in_current_mode, status.system_uptime_ms
        );
        info!(
            "[TOUCH] N305: {}  Jetson: {}  user host: {}  internet: {}",
            status.n305_connected,
            status.jetson_connected,
            status.user_host_connected,
            status.internet_connected
        );
    }
}
