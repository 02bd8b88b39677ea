//! Unified status interface.
//!
//! Aggregates the state manager, network links, power data and the display
//! controller into one [`UnifiedSystemStatus`] snapshot. Snapshots are served
//! from a TTL cache that any state or network change invalidates, and change
//! events are queued and fanned out to registered listeners by a dedicated
//! task.

use alloc::sync::Arc;
use core::cell::RefCell;
use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use heapless::{String, Vec};
use log::{debug, info, warn};

use crate::BoardError;
use crate::config::{EVENT_QUEUE_SIZE, HEALTH_CACHE_MAX_AGE_MS, MAX_STATUS_LISTENERS};
use crate::context::BoardContext;
use crate::display_controller::{DisplayControlStatus, DisplayController};
use crate::network_monitor::{NetworkObserver, NetworkStatus, NetworkTarget};
use crate::state_manager::{ObserverId, StateManager, StateObserver, SystemState};

const SOURCE: &str = "status_interface";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkConnectionStatus {
    pub computing_module_connected: bool,
    pub application_module_connected: bool,
    pub user_host_connected: bool,
    pub internet_connected: bool,
    /// Number of link changes reported by the monitor
    pub network_change_count: u32,
    pub last_network_change_time: u64,
}

impl NetworkConnectionStatus {
    pub fn any_module_connected(&self) -> bool {
        self.computing_module_connected
            || self.application_module_connected
            || self.user_host_connected
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemPerformanceStatus {
    pub current_temperature: f32,
    pub high_compute_load: bool,
    /// Watts, 0 when the power chip has no valid sample
    pub current_power_consumption: f32,
    pub main_voltage: f32,
    pub aux_12v_voltage: f32,
}

/// Flattened read model; rebuilt on demand, never the source of truth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnifiedSystemStatus {
    pub current_state: SystemState,
    pub previous_state: SystemState,
    pub state_change_count: u32,
    /// Seconds
    pub time_in_current_state: u32,
    pub system_uptime_seconds: u32,
    pub network: NetworkConnectionStatus,
    pub performance: SystemPerformanceStatus,
    pub display: DisplayControlStatus,
    pub status_timestamp: u64,
    pub status_valid: bool,
    pub status_source: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    StateChanged,
    NetworkChanged,
    DisplayChanged,
    PerformanceChanged,
    ErrorOccurred,
}

impl EventType {
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            EventType::StateChanged => "STATE_CHANGED",
            EventType::NetworkChanged => "NETWORK_CHANGED",
            EventType::DisplayChanged => "DISPLAY_CHANGED",
            EventType::PerformanceChanged => "PERFORMANCE_CHANGED",
            EventType::ErrorOccurred => "ERROR_OCCURRED",
        }
    }
}

/// Event-type bitmask values for [`WatchConfig::event_mask`]
pub mod event_mask {
    use super::EventType;

    pub const STATE_CHANGED: u8 = EventType::StateChanged.bit();
    pub const NETWORK_CHANGED: u8 = EventType::NetworkChanged.bit();
    pub const DISPLAY_CHANGED: u8 = EventType::DisplayChanged.bit();
    pub const PERFORMANCE_CHANGED: u8 = EventType::PerformanceChanged.bit();
    pub const ERROR_OCCURRED: u8 = EventType::ErrorOccurred.bit();
    pub const ALL: u8 = STATE_CHANGED
        | NETWORK_CHANGED
        | DISPLAY_CHANGED
        | PERFORMANCE_CHANGED
        | ERROR_OCCURRED;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventData {
    None,
    StateChange { old: SystemState, new: SystemState },
    Network { target: NetworkTarget, status: NetworkStatus },
    ManualDisplay(SystemState),
    Animation(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEvent {
    pub event_type: EventType,
    pub timestamp: u64,
    pub source_component: &'static str,
    pub data: EventData,
}

pub trait StatusListener: Send + Sync {
    fn on_event(&self, event: &StatusEvent);
}

/// Which events a listener receives and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    pub event_mask: u8,
    /// Minimum time between two deliveries to the same listener
    pub min_change_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            event_mask: event_mask::STATE_CHANGED | event_mask::NETWORK_CHANGED,
            min_change_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u32);

struct ListenerSlot {
    id: ListenerId,
    listener: Arc<dyn StatusListener>,
    watch: WatchConfig,
    last_trigger_time: Option<u64>,
}

impl ListenerSlot {
    fn should_trigger(&self, event: &StatusEvent, now: u64) -> bool {
        if self.watch.event_mask & event.event_type.bit() == 0 {
            return false;
        }
        match self.last_trigger_time {
            Some(last) => now.saturating_sub(last) >= self.watch.min_change_interval_ms,
            None => true,
        }
    }
}

struct ListenerTable {
    slots: Vec<ListenerSlot, MAX_STATUS_LISTENERS>,
    next_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub cache_ttl_ms: u64,
    pub auto_refresh_enabled: bool,
    pub auto_refresh_interval_ms: u64,
    pub enable_performance_monitoring: bool,
    pub debug_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 1000,
            auto_refresh_enabled: true,
            auto_refresh_interval_ms: 5000,
            enable_performance_monitoring: true,
            debug_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusInterfaceStats {
    pub total_queries: u32,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub total_query_time_us: u64,
    pub event_notifications_sent: u32,
    pub error_count: u32,
}

impl StatusInterfaceStats {
    pub fn average_query_time_us(&self) -> u64 {
        if self.total_queries == 0 {
            0
        } else {
            self.total_query_time_us / self.total_queries as u64
        }
    }
}

struct StatusCache {
    status: Option<UnifiedSystemStatus>,
    timestamp: u64,
    valid: bool,
}

#[derive(Default)]
struct NetworkActivity {
    change_count: u32,
    last_change_time: u64,
}

pub struct StatusInterface {
    ctx: BoardContext,
    state_manager: Arc<StateManager>,
    display: Arc<DisplayController>,
    config: Mutex<CriticalSectionRawMutex, RefCell<Config>>,
    cache: Mutex<CriticalSectionRawMutex, RefCell<StatusCache>>,
    stats: Mutex<CriticalSectionRawMutex, RefCell<StatusInterfaceStats>>,
    listeners: Mutex<CriticalSectionRawMutex, RefCell<ListenerTable>>,
    network_activity: Mutex<CriticalSectionRawMutex, RefCell<NetworkActivity>>,
    events: Channel<CriticalSectionRawMutex, StatusEvent, EVENT_QUEUE_SIZE>,
    observer: Mutex<CriticalSectionRawMutex, RefCell<Option<ObserverId>>>,
    active: AtomicBool,
}

fn borrow<T, R>(
    mutex: &Mutex<CriticalSectionRawMutex, RefCell<T>>,
    f: impl FnOnce(&mut T) -> R,
) -> Result<R, BoardError> {
    mutex.lock(|cell| {
        let mut value = cell.try_borrow_mut().map_err(|_| BoardError::Timeout)?;
        Ok(f(&mut value))
    })
}

impl StatusInterface {
    pub fn new(
        ctx: BoardContext,
        state_manager: Arc<StateManager>,
        display: Arc<DisplayController>,
        config: Option<Config>,
    ) -> Self {
        let config = config.unwrap_or_default();
        info!(
            "[STATUS] Status interface initialized (ttl: {} ms, auto refresh: {})",
            config.cache_ttl_ms, config.auto_refresh_enabled
        );
        Self {
            ctx,
            state_manager,
            display,
            config: Mutex::new(RefCell::new(config)),
            cache: Mutex::new(RefCell::new(StatusCache {
                status: None,
                timestamp: 0,
                valid: false,
            })),
            stats: Mutex::new(RefCell::new(StatusInterfaceStats::default())),
            listeners: Mutex::new(RefCell::new(ListenerTable {
                slots: Vec::new(),
                next_id: 1,
            })),
            network_activity: Mutex::new(RefCell::new(NetworkActivity::default())),
            events: Channel::new(),
            observer: Mutex::new(RefCell::new(None)),
            active: AtomicBool::new(false),
        }
    }

    /// Subscribe to state changes and prime the cache
    pub fn start(self: &Arc<Self>) -> Result<(), BoardError> {
        if self.active.swap(true, Ordering::AcqRel) {
            warn!("[STATUS] Status interface already running");
            return Ok(());
        }
        match self.state_manager.register_observer(self.clone()) {
            Ok(id) => borrow(&self.observer, |slot| *slot = Some(id))?,
            Err(e) => warn!("[STATUS] State observer registration failed: {}", e),
        }
        let status = self.collect_system_status();
        self.store_cache(status)?;
        info!("[STATUS] Status interface started");
        Ok(())
    }

    /// Unsubscribe and drop queued events
    pub fn stop(&self) -> Result<(), BoardError> {
        if !self.active.swap(false, Ordering::AcqRel) {
            warn!("[STATUS] Status interface not running");
            return Ok(());
        }
        if let Some(id) = borrow(&self.observer, |slot| slot.take())? {
            self.state_manager.unregister_observer(id)?;
        }
        while self.events.try_receive().is_ok() {}
        info!("[STATUS] Status interface stopped");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn config(&self) -> Result<Config, BoardError> {
        borrow(&self.config, |config| *config)
    }

    pub fn set_config(&self, config: Config) -> Result<(), BoardError> {
        borrow(&self.config, |current| *current = config)?;
        info!(
            "[STATUS] Cache ttl {} ms, auto refresh {} every {} ms",
            config.cache_ttl_ms, config.auto_refresh_enabled, config.auto_refresh_interval_ms
        );
        Ok(())
    }

    fn collect_system_status(&self) -> UnifiedSystemStatus {
        let now = self.ctx.now_ms();
        let info = self.state_manager.info();
        let network = &self.ctx.network;
        let (change_count, last_change_time) =
            borrow(&self.network_activity, |a| (a.change_count, a.last_change_time))
                .unwrap_or((0, 0));
        let power = self.ctx.power.latest_power_chip_data();
        let power_w = if power.valid { power.power } else { 0.0 };
        let display = self.display.status();

        UnifiedSystemStatus {
            current_state: info
                .map(|i| i.current_state)
                .unwrap_or(SystemState::Standby),
            previous_state: info
                .map(|i| i.previous_state)
                .unwrap_or(SystemState::Standby),
            state_change_count: info.map(|i| i.state_change_count).unwrap_or(0),
            time_in_current_state: info.map(|i| i.time_in_current_state).unwrap_or(0),
            system_uptime_seconds: (now / 1000) as u32,
            network: NetworkConnectionStatus {
                computing_module_connected: network.is_up(NetworkTarget::ComputingModule.ip()),
                application_module_connected: network
                    .is_up(NetworkTarget::ApplicationModule.ip()),
                user_host_connected: network.is_up(NetworkTarget::UserHost.ip()),
                internet_connected: network.is_up(NetworkTarget::Internet.ip()),
                network_change_count: change_count,
                last_network_change_time: last_change_time,
            },
            performance: SystemPerformanceStatus {
                current_temperature: info.map(|i| i.current_temperature).unwrap_or(0.0),
                high_compute_load: self.state_manager.is_high_compute_load(),
                current_power_consumption: power_w,
                main_voltage: self.ctx.power.main_voltage(),
                aux_12v_voltage: self.ctx.power.aux_12v_voltage(),
            },
            display: display.unwrap_or(DisplayControlStatus {
                total_switches: 0,
                last_switch_time: 0,
                current_state: SystemState::Standby,
                current_animation_index: 0,
                controller_active: false,
                manual_mode: false,
            }),
            status_timestamp: now,
            // partial data when a component lock was contended
            status_valid: info.is_ok() && display.is_ok(),
            status_source: SOURCE,
        }
    }

    /// Count one query started at `started_us`; returns its duration
    fn record_query(&self, cache_hit: bool, started_us: u64) -> u64 {
        let elapsed_us = self.ctx.now_us().saturating_sub(started_us);
        let enabled = self
            .config()
            .map(|c| c.enable_performance_monitoring)
            .unwrap_or(true);
        if !enabled {
            return elapsed_us;
        }
        let _ = borrow(&self.stats, |stats| {
            stats.total_queries = stats.total_queries.wrapping_add(1);
            stats.total_query_time_us = stats.total_query_time_us.wrapping_add(elapsed_us);
            if cache_hit {
                stats.cache_hits = stats.cache_hits.wrapping_add(1);
            } else {
                stats.cache_misses = stats.cache_misses.wrapping_add(1);
            }
        });
        elapsed_us
    }

    fn store_cache(&self, status: UnifiedSystemStatus) -> Result<(), BoardError> {
        let now = self.ctx.now_ms();
        borrow(&self.cache, |cache| {
            cache.status = Some(status);
            cache.timestamp = now;
            cache.valid = true;
        })
    }

    /// Build a fresh snapshot, bypassing the cache
    pub fn get_system_status(&self) -> UnifiedSystemStatus {
        let started = self.ctx.now_us();
        let status = self.collect_system_status();
        self.record_query(false, started);
        status
    }

    /// Serve from the cache when it is valid and at most `max_age_ms` old
    pub fn get_system_status_cached(&self, max_age_ms: u64) -> UnifiedSystemStatus {
        let started = self.ctx.now_us();
        let now = self.ctx.now_ms();
        let cached = borrow(&self.cache, |cache| match cache.status {
            Some(status) if cache.valid && now.saturating_sub(cache.timestamp) <= max_age_ms => {
                Some(status)
            }
            _ => None,
        });

        let (status, hit) = match cached {
            Ok(Some(status)) => (status, true),
            Ok(None) => {
                let status = self.collect_system_status();
                if let Err(e) = self.store_cache(status) {
                    warn!("[STATUS] Cache update skipped: {}", e);
                }
                (status, false)
            }
            // cache busy; answer directly
            Err(_) => (self.collect_system_status(), false),
        };
        let elapsed_us = self.record_query(hit, started);

        if self.config().map(|c| c.debug_mode).unwrap_or(false) {
            debug!(
                "[STATUS] Cached query {} in {} us",
                if hit { "hit" } else { "miss" },
                elapsed_us
            );
        }
        status
    }

    /// Cached snapshot with the configured TTL
    pub fn cached_status(&self) -> UnifiedSystemStatus {
        let ttl = self
            .config()
            .map(|c| c.cache_ttl_ms)
            .unwrap_or(Config::default().cache_ttl_ms);
        self.get_system_status_cached(ttl)
    }

    pub fn invalidate_cache(&self) {
        if borrow(&self.cache, |cache| cache.valid = false).is_err() {
            warn!("[STATUS] Cache invalidation skipped, cache busy");
        }
    }

    /// Run a detection cycle now and rebuild the cache
    pub fn force_status_refresh(&self) -> Result<UnifiedSystemStatus, BoardError> {
        info!("[STATUS] Forcing status refresh");
        self.invalidate_cache();
        self.state_manager.update_now();
        let status = self.collect_system_status();
        self.store_cache(status)?;
        Ok(status)
    }

    /// Queue an event; a full queue drops it and counts an error
    pub fn publish(&self, event_type: EventType, data: EventData, source: &'static str) {
        let event = StatusEvent {
            event_type,
            timestamp: self.ctx.now_ms(),
            source_component: source,
            data,
        };
        if self.events.try_send(event).is_err() {
            warn!("[STATUS] Event queue full, dropping {}", event_type.name());
            let _ = borrow(&self.stats, |stats| {
                stats.error_count = stats.error_count.wrapping_add(1)
            });
        }
    }

    pub fn register_status_listener(
        &self,
        listener: Arc<dyn StatusListener>,
    ) -> Result<ListenerId, BoardError> {
        self.register_conditional_listener(WatchConfig::default(), listener)
    }

    pub fn register_conditional_listener(
        &self,
        watch: WatchConfig,
        listener: Arc<dyn StatusListener>,
    ) -> Result<ListenerId, BoardError> {
        let id = borrow(&self.listeners, |table| {
            let id = ListenerId(table.next_id);
            table
                .slots
                .push(ListenerSlot {
                    id,
                    listener,
                    watch,
                    last_trigger_time: None,
                })
                .map_err(|_| BoardError::NoMemory)?;
            table.next_id = table.next_id.wrapping_add(1);
            Ok(id)
        })?;
        match id {
            Ok(id) => info!("[STATUS] Registered listener {}", id.0),
            Err(_) => warn!(
                "[STATUS] Listener table full ({} max)",
                MAX_STATUS_LISTENERS
            ),
        }
        id
    }

    pub fn unregister_status_listener(&self, id: ListenerId) -> Result<(), BoardError> {
        let removed = borrow(&self.listeners, |table| {
            let pos = table.slots.iter().position(|slot| slot.id == id)?;
            Some(table.slots.remove(pos))
        })?;
        if removed.is_none() {
            warn!("[STATUS] Listener {} not registered", id.0);
            return Err(BoardError::NotFound);
        }
        info!("[STATUS] Unregistered listener {}", id.0);
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        borrow(&self.listeners, |table| table.slots.len()).unwrap_or(0)
    }

    fn dispatch(&self, event: &StatusEvent) {
        let now = self.ctx.now_ms();
        let targets = borrow(&self.listeners, |table| {
            let mut targets: Vec<Arc<dyn StatusListener>, MAX_STATUS_LISTENERS> = Vec::new();
            for slot in table.slots.iter_mut() {
                if slot.should_trigger(event, now) {
                    slot.last_trigger_time = Some(now);
                    // bounded by the table capacity
                    let _ = targets.push(slot.listener.clone());
                }
            }
            targets
        });
        let Ok(targets) = targets else {
            warn!("[STATUS] Listener table busy, dropping {}", event.event_type.name());
            return;
        };

        for listener in targets.iter() {
            listener.on_event(event);
        }
        if !targets.is_empty() {
            let _ = borrow(&self.stats, |stats| {
                stats.event_notifications_sent =
                    stats.event_notifications_sent.wrapping_add(targets.len() as u32)
            });
        }
    }

    /// Drain the queue and notify listeners; returns the number of events handled
    pub fn process_events(&self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_receive() {
            self.dispatch(&event);
            handled += 1;
        }
        handled
    }

    /// Event task loop
    pub async fn run_events(&self) -> ! {
        loop {
            let event = self.events.receive().await;
            if self.is_active() {
                self.dispatch(&event);
            }
        }
    }

    /// Auto-refresh task loop
    pub async fn run_auto_refresh(&self) -> ! {
        loop {
            let config = self.config().unwrap_or_default();
            if self.is_active() && config.auto_refresh_enabled {
                let status = self.collect_system_status();
                if let Err(e) = self.store_cache(status) {
                    warn!("[STATUS] Auto refresh skipped: {}", e);
                }
            }
            Timer::after(Duration::from_millis(config.auto_refresh_interval_ms)).await;
        }
    }

    /// Show the animation mapped to `state` in manual mode
    pub fn set_display_mode(&self, state: SystemState) -> Result<(), BoardError> {
        self.display.set_display_state(state)?;
        self.publish(
            EventType::DisplayChanged,
            EventData::ManualDisplay(state),
            SOURCE,
        );
        self.invalidate_cache();
        Ok(())
    }

    pub fn set_animation(&self, index: usize) -> Result<(), BoardError> {
        self.display.switch_to_animation(index)?;
        self.publish(EventType::DisplayChanged, EventData::Animation(index), SOURCE);
        self.invalidate_cache();
        Ok(())
    }

    /// Hand the matrix back to state-driven selection
    pub fn resume_auto_display(&self) -> Result<(), BoardError> {
        self.display.resume_auto()?;
        self.publish(EventType::DisplayChanged, EventData::None, SOURCE);
        self.invalidate_cache();
        Ok(())
    }

    /// Any module reachable, display controller running and not overheating
    pub fn is_system_healthy(&self) -> bool {
        let status = self.get_system_status_cached(HEALTH_CACHE_MAX_AGE_MS);
        status.network.any_module_connected()
            && status.display.controller_active
            && !status.current_state.is_high_temp()
    }

    pub fn stats(&self) -> Result<StatusInterfaceStats, BoardError> {
        borrow(&self.stats, |stats| *stats)
    }

    pub fn reset_stats(&self) -> Result<(), BoardError> {
        borrow(&self.stats, |stats| *stats = StatusInterfaceStats::default())
    }

    /// One-line summary, e.g. for a console prompt
    pub fn status_summary(&self) -> Result<String<128>, BoardError> {
        let status = self.cached_status();
        let flag = |up: bool| if up { "UP" } else { "DOWN" };
        let mut out = String::new();
        write!(
            out,
            "State: {} | Net C:{} A:{} U:{} I:{} | Power: {:.1}W | Display: {}",
            status.current_state,
            flag(status.network.computing_module_connected),
            flag(status.network.application_module_connected),
            flag(status.network.user_host_connected),
            flag(status.network.internet_connected),
            status.performance.current_power_consumption,
            if status.display.controller_active {
                "active"
            } else {
                "inactive"
            },
        )
        .map_err(|_| BoardError::NoMemory)?;
        Ok(out)
    }

    pub fn print_status_report(&self) {
        let s = self.get_system_status();
        let link = |up: bool| if up { "connected" } else { "disconnected" };
        info!("[STATUS] ========== System status ==========");
        info!("[STATUS] uptime: {} s", s.system_uptime_seconds);
        info!(
            "[STATUS] state: {}  previous: {}  changes: {}  in state: {} s",
            s.current_state, s.previous_state, s.state_change_count, s.time_in_current_state
        );
        info!(
            "[STATUS] computing: {}  application: {}",
            link(s.network.computing_module_connected),
            link(s.network.application_module_connected)
        );
        info!(
            "[STATUS] user host: {}  internet: {}",
            link(s.network.user_host_connected),
            link(s.network.internet_connected)
        );
        info!(
            "[STATUS] temperature: {:.1} C  power: {:.1} W  high load: {}",
            s.performance.current_temperature,
            s.performance.current_power_consumption,
            s.performance.high_compute_load
        );
        info!(
            "[STATUS] animation: {}  switches: {}  manual: {}  controller active: {}",
            s.display.current_animation_index,
            s.display.total_switches,
            s.display.manual_mode,
            s.display.controller_active
        );
        if let Ok(stats) = self.stats() {
            info!(
                "[STATUS] queries: {}  hits: {}  misses: {}  avg: {} us  events: {}  errors: {}",
                stats.total_queries,
                stats.cache_hits,
                stats.cache_misses,
                stats.average_query_time_us(),
                stats.event_notifications_sent,
                stats.error_count
            );
        }
    }
}

impl StateObserver for StatusInterface {
    fn on_transition(&self, old: SystemState, new: SystemState) {
        self.publish(
            EventType::StateChanged,
            EventData::StateChange { old, new },
            "state_manager",
        );
        self.invalidate_cache();
    }
}

impl NetworkObserver for StatusInterface {
    fn on_status_change(&self, target: NetworkTarget, status: NetworkStatus) {
        let now = self.ctx.now_ms();
        let _ = borrow(&self.network_activity, |activity| {
            activity.change_count = activity.change_count.wrapping_add(1);
            activity.last_change_time = now;
        });
        self.publish(
            EventType::NetworkChanged,
            EventData::Network { target, status },
            "network_monitor",
        );
        self.invalidate_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Clock, ManualClock};
    use core::sync::atomic::AtomicU64;
    use crate::matrix_animation::MatrixAnimator;
    use crate::network_monitor::StaticNetworkMonitor;
    use crate::power::StaticPowerSource;
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec as StdVec;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<StdVec<StatusEvent>>,
    }

    impl StatusListener for Recorder {
        fn on_event(&self, event: &StatusEvent) {
            self.events.lock().unwrap().push(*event);
        }
    }

    struct Fixture {
        network: Arc<StaticNetworkMonitor>,
        clock: Arc<ManualClock>,
        manager: Arc<StateManager>,
        status: Arc<StatusInterface>,
    }

    fn fixture() -> Fixture {
        let network = Arc::new(StaticNetworkMonitor::new());
        let clock = Arc::new(ManualClock::new(0));
        let ctx = BoardContext::new(
            network.clone(),
            Arc::new(StaticPowerSource::new()),
            clock.clone(),
        );
        let animator = Arc::new(MatrixAnimator::new());
        animator.load_builtin().unwrap();
        let manager = Arc::new(StateManager::new(ctx.clone()));
        let display = Arc::new(DisplayController::new(animator, clock.clone(), None));
        display.start(&manager).unwrap();
        let status = Arc::new(StatusInterface::new(
            ctx,
            manager.clone(),
            display,
            None,
        ));
        status.start().unwrap();
        network.register_observer(status.clone()).unwrap();
        Fixture {
            network,
            clock,
            manager,
            status,
        }
    }

    #[test]
    fn snapshot_reflects_components() {
        let f = fixture();
        f.network.update(NetworkTarget::UserHost, NetworkStatus::Up);
        f.manager.update_now();
        let s = f.status.get_system_status();
        assert_eq!(s.current_state, SystemState::Startup0);
        assert!(s.network.user_host_connected);
        assert_eq!(s.network.network_change_count, 1);
        assert!(s.display.controller_active);
        assert!(s.status_valid);
        assert_eq!(s.status_source, "status_interface");
    }

    #[test]
    fn cache_hits_within_ttl_and_expires_after() {
        let f = fixture();
        f.status.reset_stats().unwrap();
        let first = f.status.get_system_status_cached(1000);
        f.clock.set(1000);
        let second = f.status.get_system_status_cached(1000);
        assert_eq!(first, second);
        assert_eq!(f.status.stats().unwrap().cache_hits, 2);

        f.clock.set(1001);
        let third = f.status.get_system_status_cached(1000);
        assert_eq!(third.status_timestamp, 1001);
        assert_eq!(f.status.stats().unwrap().cache_misses, 1);
    }

    #[test]
    fn state_change_invalidates_cache() {
        let f = fixture();
        let before = f.status.get_system_status_cached(10_000);
        f.manager.force_set_state(SystemState::HighTemp1).unwrap();
        let hits = f.status.stats().unwrap().cache_hits;
        let after = f.status.get_system_status_cached(10_000);
        assert_ne!(before.current_state, after.current_state);
        assert_eq!(after.current_state, SystemState::HighTemp1);
        assert_eq!(f.status.stats().unwrap().cache_hits, hits);
    }

    #[test]
    fn listeners_filtered_by_mask_and_debounced() {
        let f = fixture();
        let all = Arc::new(Recorder::default());
        let display_only = Arc::new(Recorder::default());
        f.status.register_status_listener(all.clone()).unwrap();
        f.status
            .register_conditional_listener(
                WatchConfig {
                    event_mask: event_mask::DISPLAY_CHANGED,
                    min_change_interval_ms: 0,
                },
                display_only.clone(),
            )
            .unwrap();

        f.manager.force_set_state(SystemState::Startup3).unwrap();
        f.manager.force_set_state(SystemState::Startup2).unwrap();
        f.status.set_animation(2).unwrap();
        assert_eq!(f.status.process_events(), 3);

        // second state event falls inside the 100 ms debounce window
        assert_eq!(all.events.lock().unwrap().len(), 1);
        assert_eq!(
            all.events.lock().unwrap()[0].data,
            EventData::StateChange {
                old: SystemState::Standby,
                new: SystemState::Startup3
            }
        );
        assert_eq!(display_only.events.lock().unwrap().len(), 1);
        assert_eq!(f.status.stats().unwrap().event_notifications_sent, 2);

        f.clock.set(100);
        f.manager.force_set_state(SystemState::Startup1).unwrap();
        f.status.process_events();
        assert_eq!(all.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let f = fixture();
        for _ in 0..EVENT_QUEUE_SIZE + 3 {
            f.status
                .publish(EventType::ErrorOccurred, EventData::None, "test");
        }
        assert_eq!(f.status.stats().unwrap().error_count, 3);
        assert_eq!(f.status.process_events(), EVENT_QUEUE_SIZE);
    }

    #[test]
    fn listener_table_is_bounded() {
        let f = fixture();
        let mut ids = StdVec::new();
        for _ in 0..MAX_STATUS_LISTENERS {
            ids.push(
                f.status
                    .register_status_listener(Arc::new(Recorder::default()))
                    .unwrap(),
            );
        }
        assert_eq!(
            f.status
                .register_status_listener(Arc::new(Recorder::default()))
                .err(),
            Some(BoardError::NoMemory)
        );
        f.status.unregister_status_listener(ids[0]).unwrap();
        assert_eq!(
            f.status.unregister_status_listener(ids[0]),
            Err(BoardError::NotFound)
        );
    }

    #[test]
    fn health_requires_link_display_and_normal_temp() {
        let f = fixture();
        assert!(!f.status.is_system_healthy());

        f.network.update(NetworkTarget::ComputingModule, NetworkStatus::Up);
        assert!(f.status.is_system_healthy());

        f.manager.force_set_state(SystemState::HighTemp2).unwrap();
        assert!(!f.status.is_system_healthy());
    }

    #[test]
    fn summary_fits() {
        let f = fixture();
        let summary = f.status.status_summary().unwrap();
        assert!(summary.starts_with("State: STANDBY"));
        assert!(summary.ends_with("Display: active"));
    }

    #[test]
    fn stop_unsubscribes_and_clears_queue() {
        let f = fixture();
        f.status.publish(EventType::ErrorOccurred, EventData::None, "test");
        f.status.stop().unwrap();
        assert_eq!(f.status.process_events(), 0);
        assert_eq!(f.manager.observer_count(), 1);
    }

    /// Frozen millisecond clock whose microsecond reading steps on every call
    struct SteppingClock {
        us: AtomicU64,
    }

    impl Clock for SteppingClock {
        fn now_ms(&self) -> u64 {
            0
        }

        fn now_us(&self) -> u64 {
            self.us.fetch_add(250, Ordering::Relaxed)
        }
    }

    #[test]
    fn query_time_comes_from_injected_clock() {
        let clock = Arc::new(SteppingClock {
            us: AtomicU64::new(0),
        });
        let ctx = BoardContext::new(
            Arc::new(StaticNetworkMonitor::new()),
            Arc::new(StaticPowerSource::new()),
            clock.clone(),
        );
        let animator = Arc::new(MatrixAnimator::new());
        animator.load_builtin().unwrap();
        let manager = Arc::new(StateManager::new(ctx.clone()));
        let display = Arc::new(DisplayController::new(animator, clock, None));
        let status = StatusInterface::new(ctx, manager, display, None);

        status.get_system_status();
        status.get_system_status_cached(1000);
        status.get_system_status_cached(1000);

        let stats = status.stats().unwrap();
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.total_query_time_us, 750);
        assert_eq!(stats.average_query_time_us(), 250);
    }
}
