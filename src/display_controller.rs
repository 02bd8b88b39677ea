//! System-state driven display controller.
//!
//! Bridges the abstract [`SystemState`] to a concrete matrix animation: each
//! state maps to an animation index, and every state-manager notification
//! selects the mapped animation unless the controller is in manual mode.

use alloc::sync::Arc;
use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, info, warn};

use crate::BoardError;
use crate::context::Clock;
use crate::matrix_animation::AnimationSelector;
use crate::state_manager::{ObserverId, StateManager, StateObserver, SystemState};

/// Indices of the built-in matrix animations
pub mod animation_index {
    pub const DEMO: usize = 0;
    pub const STARTUP: usize = 1;
    pub const LINK_ERROR: usize = 2;
    pub const HIGH_TEMP: usize = 3;
    pub const COMPUTING: usize = 4;
}

/// Default `SystemState -> animation` table, indexed by [`SystemState::index`]
pub const DEFAULT_STATE_MAPPING: [usize; SystemState::COUNT] = [
    animation_index::DEMO,       // Standby
    animation_index::STARTUP,    // Startup0
    animation_index::STARTUP,    // Startup1
    animation_index::STARTUP,    // Startup2
    animation_index::STARTUP,    // Startup3
    animation_index::HIGH_TEMP,  // HighTemp1
    animation_index::HIGH_TEMP,  // HighTemp2
    animation_index::LINK_ERROR, // UserHostDisconnected
    animation_index::COMPUTING,  // HighComputeLoad
    animation_index::COMPUTING,  // GpuHighUsage
    animation_index::COMPUTING,  // MemoryHighUsage
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub auto_switch_enabled: bool,
    pub debug_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_switch_enabled: true,
            debug_mode: false,
        }
    }
}

/// Runtime status of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayControlStatus {
    pub total_switches: u32,
    pub last_switch_time: u64,
    /// Last state reported by the state manager
    pub current_state: SystemState,
    pub current_animation_index: usize,
    pub controller_active: bool,
    pub manual_mode: bool,
}

struct ControllerInner {
    config: Config,
    mapping: [usize; SystemState::COUNT],
    status: DisplayControlStatus,
    observer: Option<ObserverId>,
}

pub struct DisplayController {
    selector: Arc<dyn AnimationSelector>,
    clock: Arc<dyn Clock>,
    inner: Mutex<CriticalSectionRawMutex, RefCell<ControllerInner>>,
    started: AtomicBool,
}

impl DisplayController {
    pub fn new(
        selector: Arc<dyn AnimationSelector>,
        clock: Arc<dyn Clock>,
        config: Option<Config>,
    ) -> Self {
        let config = config.unwrap_or_default();
        info!(
            "[DISPLAY] Display controller initialized (auto switch: {})",
            config.auto_switch_enabled
        );
        Self {
            selector,
            clock,
            inner: Mutex::new(RefCell::new(ControllerInner {
                config,
                mapping: DEFAULT_STATE_MAPPING,
                status: DisplayControlStatus {
                    total_switches: 0,
                    last_switch_time: 0,
                    current_state: SystemState::Standby,
                    current_animation_index: animation_index::DEMO,
                    controller_active: false,
                    manual_mode: false,
                },
                observer: None,
            })),
            started: AtomicBool::new(false),
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut ControllerInner) -> R) -> Result<R, BoardError> {
        self.inner.lock(|cell| {
            let mut inner = cell.try_borrow_mut().map_err(|_| BoardError::Timeout)?;
            Ok(f(&mut inner))
        })
    }

    /// Subscribe to the state manager and show the current state
    pub fn start(self: &Arc<Self>, manager: &StateManager) -> Result<(), BoardError> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("[DISPLAY] Display controller already started");
            return Ok(());
        }
        let id = match manager.register_observer(self.clone()) {
            Ok(id) => id,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };
        let state = manager.current_state_or_default();
        self.with_inner(|inner| {
            inner.observer = Some(id);
            inner.status.controller_active = true;
            inner.status.current_state = state;
        })?;
        info!("[DISPLAY] Display controller started in state {}", state);
        self.update_display();
        Ok(())
    }

    pub fn stop(&self, manager: &StateManager) -> Result<(), BoardError> {
        let observer = self.with_inner(|inner| {
            inner.status.controller_active = false;
            inner.observer.take()
        })?;
        self.started.store(false, Ordering::Release);
        if let Some(id) = observer {
            manager.unregister_observer(id)?;
        }
        info!("[DISPLAY] Display controller stopped");
        Ok(())
    }

    /// Re-apply the mapping for the last known state, unless manual or auto switching is off
    pub fn update_display(&self) {
        let target = self.with_inner(|inner| {
            let auto = inner.status.controller_active
                && !inner.status.manual_mode
                && inner.config.auto_switch_enabled;
            auto.then(|| inner.status.current_state)
        });
        if let Ok(Some(state)) = target {
            if let Err(e) = self.show_state(state) {
                warn!("[DISPLAY] Display update failed: {}", e);
            }
        }
    }

    fn show_state(&self, state: SystemState) -> Result<(), BoardError> {
        let (index, debug) =
            self.with_inner(|inner| (inner.mapping[state.index()], inner.config.debug_mode))?;
        if debug {
            debug!("[DISPLAY] State {} -> animation {}", state, index);
        }
        self.select(index)
    }

    fn select(&self, index: usize) -> Result<(), BoardError> {
        self.selector.select(index)?;
        let now = self.clock.now_ms();
        self.with_inner(|inner| {
            inner.status.total_switches = inner.status.total_switches.wrapping_add(1);
            inner.status.last_switch_time = now;
            inner.status.current_animation_index = index;
        })
    }

    /// Point `state` at a different animation
    pub fn set_state_mapping(&self, state: SystemState, index: usize) -> Result<(), BoardError> {
        if index >= self.selector.count() {
            warn!(
                "[DISPLAY] Animation index {} out of range (count: {})",
                index,
                self.selector.count()
            );
            return Err(BoardError::InvalidArgument);
        }
        self.with_inner(|inner| inner.mapping[state.index()] = index)?;
        info!("[DISPLAY] Mapping {} -> animation {}", state, index);
        Ok(())
    }

    pub fn state_mapping(&self, state: SystemState) -> Result<usize, BoardError> {
        self.with_inner(|inner| inner.mapping[state.index()])
    }

    /// Manually show an animation; notifications are ignored until [`Self::resume_auto`]
    pub fn switch_to_animation(&self, index: usize) -> Result<(), BoardError> {
        self.select(index)?;
        self.with_inner(|inner| inner.status.manual_mode = true)?;
        info!("[DISPLAY] Manual animation {}", index);
        Ok(())
    }

    /// Manually show the animation mapped to `state`
    pub fn set_display_state(&self, state: SystemState) -> Result<(), BoardError> {
        let index = self.state_mapping(state)?;
        self.switch_to_animation(index)
    }

    /// Leave manual mode and show the last known state again
    pub fn resume_auto(&self) -> Result<(), BoardError> {
        self.with_inner(|inner| inner.status.manual_mode = false)?;
        info!("[DISPLAY] Automatic switching resumed");
        self.update_display();
        Ok(())
    }

    pub fn set_auto_switch(&self, enabled: bool) -> Result<(), BoardError> {
        self.with_inner(|inner| inner.config.auto_switch_enabled = enabled)
    }

    pub fn set_debug_mode(&self, enabled: bool) -> Result<(), BoardError> {
        self.with_inner(|inner| inner.config.debug_mode = enabled)
    }

    pub fn status(&self) -> Result<DisplayControlStatus, BoardError> {
        self.with_inner(|inner| inner.status)
    }

    pub fn is_active(&self) -> bool {
        self.with_inner(|inner| inner.status.controller_active)
            .unwrap_or(false)
    }

    pub fn print_status(&self) {
        let Ok((status, config)) = self.with_inner(|inner| (inner.status, inner.config)) else {
            warn!("[DISPLAY] Status unavailable");
            return;
        };
        let name = self.selector.name(status.current_animation_index);
        info!("[DISPLAY] ===== Display controller =====");
        info!(
            "[DISPLAY] active: {}  manual: {}  auto switch: {}",
            status.controller_active, status.manual_mode, config.auto_switch_enabled
        );
        info!(
            "[DISPLAY] state: {}  animation: {} ({})",
            status.current_state,
            status.current_animation_index,
            name.as_deref().unwrap_or("-")
        );
        info!(
            "[DISPLAY] switches: {}  last switch: {} ms",
            status.total_switches, status.last_switch_time
        );
    }
}

impl StateObserver for DisplayController {
    fn on_transition(&self, old: SystemState, new: SystemState) {
        let proceed = self.with_inner(|inner| {
            if !inner.status.controller_active {
                return false;
            }
            inner.status.current_state = new;
            !inner.status.manual_mode && inner.config.auto_switch_enabled
        });
        if proceed == Ok(true) {
            info!("[DISPLAY] State change {} -> {}", old, new);
            if let Err(e) = self.show_state(new) {
                warn!("[DISPLAY] Display update failed: {}", e);
            }
        }
    }
}
