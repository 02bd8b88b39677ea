//! 系统状态管理模块
//!
//! 根据网络连通性、温度和算力负载，按固定优先级判定唯一的系统状态，
//! 状态变化时在锁外按注册顺序同步通知所有观察者。

use alloc::sync::Arc;
use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Timer};
use heapless::Vec;
use log::{info, warn};

use crate::BoardError;
use crate::config::{
    HIGH_COMPUTE_POWER_W, MAX_STATE_OBSERVERS, STATE_CHECK_INTERVAL_MS, TEMP_THRESHOLD_HIGH_1,
    TEMP_THRESHOLD_HIGH_2,
};
use crate::context::BoardContext;
use crate::network_monitor::NetworkTarget;

/// 系统状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemState {
    /// 待机
    Standby,
    /// 两个模组都未连接
    Startup0,
    /// 仅算力模组连接
    Startup1,
    /// 仅应用模组连接
    Startup2,
    /// 两个模组都已连接
    Startup3,
    /// 一级高温
    HighTemp1,
    /// 二级高温
    HighTemp2,
    /// 用户主机断开
    UserHostDisconnected,
    /// 高算力负载
    HighComputeLoad,
    /// GPU高使用率（预留）
    GpuHighUsage,
    /// 内存高使用率（预留）
    MemoryHighUsage,
}

impl SystemState {
    pub const COUNT: usize = 11;

    pub const ALL: [SystemState; Self::COUNT] = [
        SystemState::Standby,
        SystemState::Startup0,
        SystemState::Startup1,
        SystemState::Startup2,
        SystemState::Startup3,
        SystemState::HighTemp1,
        SystemState::HighTemp2,
        SystemState::UserHostDisconnected,
        SystemState::HighComputeLoad,
        SystemState::GpuHighUsage,
        SystemState::MemoryHighUsage,
    ];

    /// 状态名称
    pub fn name(self) -> &'static str {
        match self {
            SystemState::Standby => "STANDBY",
            SystemState::Startup0 => "STARTUP_0",
            SystemState::Startup1 => "STARTUP_1",
            SystemState::Startup2 => "STARTUP_2",
            SystemState::Startup3 => "STARTUP_3",
            SystemState::HighTemp1 => "HIGH_TEMP_1",
            SystemState::HighTemp2 => "HIGH_TEMP_2",
            SystemState::UserHostDisconnected => "USER_HOST_DISCONNECTED",
            SystemState::HighComputeLoad => "HIGH_COMPUTE_LOAD",
            SystemState::GpuHighUsage => "GPU_HIGH_USAGE",
            SystemState::MemoryHighUsage => "MEMORY_HIGH_USAGE",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_high_temp(self) -> bool {
        matches!(self, SystemState::HighTemp1 | SystemState::HighTemp2)
    }
}

impl TryFrom<u8> for SystemState {
    type Error = BoardError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SystemState::ALL
            .get(value as usize)
            .copied()
            .ok_or(BoardError::InvalidArgument)
    }
}

impl core::fmt::Display for SystemState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// 一次判定使用的输入
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DetectionInputs {
    pub computing_module_connected: bool,
    pub application_module_connected: bool,
    pub user_host_connected: bool,
    pub high_compute_load: bool,
    /// 摄氏度
    pub current_temperature: f32,
}

/// 优先级表中的一条规则
pub struct StateRule {
    pub applies: fn(&DetectionInputs) -> bool,
    pub state: SystemState,
}

/// 状态判定优先级表，自上而下，首个命中的规则生效
pub const STATE_RULES: [StateRule; 8] = [
    StateRule {
        applies: |i| i.current_temperature > TEMP_THRESHOLD_HIGH_2,
        state: SystemState::HighTemp2,
    },
    StateRule {
        applies: |i| i.current_temperature > TEMP_THRESHOLD_HIGH_1,
        state: SystemState::HighTemp1,
    },
    StateRule {
        applies: |i| i.high_compute_load,
        state: SystemState::HighComputeLoad,
    },
    StateRule {
        applies: |i| !i.user_host_connected,
        state: SystemState::UserHostDisconnected,
    },
    StateRule {
        applies: |i| !i.computing_module_connected && !i.application_module_connected,
        state: SystemState::Startup0,
    },
    StateRule {
        applies: |i| i.computing_module_connected && !i.application_module_connected,
        state: SystemState::Startup1,
    },
    StateRule {
        applies: |i| !i.computing_module_connected && i.application_module_connected,
        state: SystemState::Startup2,
    },
    StateRule {
        applies: |i| i.computing_module_connected && i.application_module_connected,
        state: SystemState::Startup3,
    },
];

/// 纯函数：按优先级表判定系统状态
pub fn determine_system_state(inputs: &DetectionInputs) -> SystemState {
    STATE_RULES
        .iter()
        .find(|rule| (rule.applies)(inputs))
        .map(|rule| rule.state)
        .unwrap_or(SystemState::Standby)
}

/// 状态变化观察者
pub trait StateObserver: Send + Sync {
    fn on_transition(&self, old: SystemState, new: SystemState);
}

/// 观察者注册句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u32);

/// 状态快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSnapshot {
    pub current_state: SystemState,
    pub previous_state: SystemState,
    pub state_change_count: u32,
    /// 最近一次状态切换的时间（毫秒）
    pub state_start_time: u64,
    pub inputs: DetectionInputs,
}

/// 对外状态信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateInfo {
    pub current_state: SystemState,
    pub previous_state: SystemState,
    pub state_change_count: u32,
    /// 当前状态持续时间（秒）
    pub time_in_current_state: u32,
    pub computing_module_connected: bool,
    pub application_module_connected: bool,
    pub user_host_connected: bool,
    pub high_compute_load: bool,
    pub current_temperature: f32,
}

struct ManagerState {
    snapshot: StateSnapshot,
    observers: Vec<(ObserverId, Arc<dyn StateObserver>), MAX_STATE_OBSERVERS>,
    next_observer_id: u32,
}

type ObserverList = Vec<Arc<dyn StateObserver>, MAX_STATE_OBSERVERS>;

/// 系统状态管理器
pub struct StateManager {
    ctx: BoardContext,
    state: Mutex<CriticalSectionRawMutex, RefCell<ManagerState>>,
    monitoring: AtomicBool,
}

impl StateManager {
    /// 创建状态管理器，初始状态为待机
    pub fn new(ctx: BoardContext) -> Self {
        let now = ctx.now_ms();
        info!("[STATE] State manager initialized");
        Self {
            ctx,
            state: Mutex::new(RefCell::new(ManagerState {
                snapshot: StateSnapshot {
                    current_state: SystemState::Standby,
                    previous_state: SystemState::Standby,
                    state_change_count: 0,
                    state_start_time: now,
                    inputs: DetectionInputs::default(),
                },
                observers: Vec::new(),
                next_observer_id: 1,
            })),
            monitoring: AtomicBool::new(false),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ManagerState) -> R) -> Result<R, BoardError> {
        self.state.lock(|cell| {
            let mut state = cell.try_borrow_mut().map_err(|_| BoardError::Timeout)?;
            Ok(f(&mut state))
        })
    }

    /// 开始周期检测（幂等）
    pub fn start_monitoring(&self) {
        if self.monitoring.swap(true, Ordering::AcqRel) {
            warn!("[STATE] Monitoring already running");
        } else {
            info!(
                "[STATE] Monitoring started, period {} ms",
                STATE_CHECK_INTERVAL_MS
            );
        }
    }

    /// 停止周期检测（幂等）
    pub fn stop_monitoring(&self) {
        if self.monitoring.swap(false, Ordering::AcqRel) {
            info!("[STATE] Monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Acquire)
    }

    /// 检测任务主循环
    pub async fn run(&self) -> ! {
        loop {
            if self.is_monitoring() {
                self.update_now();
            }
            Timer::after(Duration::from_millis(STATE_CHECK_INTERVAL_MS)).await;
        }
    }

    /// 采集输入；数据源不可用时退化为 0W / 0°C
    pub fn sample_inputs(&self) -> DetectionInputs {
        let network = &self.ctx.network;
        let power = self.ctx.power.latest_power_chip_data();
        DetectionInputs {
            computing_module_connected: network.is_up(NetworkTarget::ComputingModule.ip()),
            application_module_connected: network.is_up(NetworkTarget::ApplicationModule.ip()),
            user_host_connected: network.is_up(NetworkTarget::UserHost.ip()),
            high_compute_load: self.is_high_compute_load(),
            current_temperature: if power.valid { power.temperature } else { 0.0 },
        }
    }

    /// 电源芯片数据有效且功率超过阈值
    pub fn is_high_compute_load(&self) -> bool {
        let data = self.ctx.power.latest_power_chip_data();
        data.valid && data.power > HIGH_COMPUTE_POWER_W
    }

    /// 立即执行一次检测，返回检测后的状态
    pub fn update_now(&self) -> SystemState {
        let inputs = self.sample_inputs();
        let new_state = determine_system_state(&inputs);
        match self.apply(new_state, Some(inputs)) {
            Ok(state) => state,
            Err(e) => {
                warn!("[STATE] Detection cycle skipped: {}", e);
                new_state
            }
        }
    }

    /// 强制切换状态，与自然切换走同一通知路径
    pub fn force_set_state(&self, state: SystemState) -> Result<(), BoardError> {
        info!("[STATE] Forcing state {}", state);
        self.apply(state, None).map(|_| ())
    }

    fn apply(
        &self,
        new_state: SystemState,
        inputs: Option<DetectionInputs>,
    ) -> Result<SystemState, BoardError> {
        let now = self.ctx.now_ms();
        let transition = self.with_state(|state| {
            let snapshot = &mut state.snapshot;
            if let Some(inputs) = inputs {
                snapshot.inputs = inputs;
            }
            if snapshot.current_state == new_state {
                return None;
            }
            let old_state = snapshot.current_state;
            snapshot.previous_state = old_state;
            snapshot.current_state = new_state;
            snapshot.state_change_count = snapshot.state_change_count.wrapping_add(1);
            snapshot.state_start_time = now;

            let observers: ObserverList = state.observers.iter().map(|(_, o)| o.clone()).collect();
            Some((old_state, observers))
        })?;

        if let Some((old_state, observers)) = transition {
            info!("[STATE] {} -> {}", old_state, new_state);
            for observer in observers.iter() {
                observer.on_transition(old_state, new_state);
            }
        }
        Ok(new_state)
    }

    /// 获取当前状态；锁被占用时返回 `Timeout`，由调用方决定退化策略
    pub fn get_current_state(&self) -> Result<SystemState, BoardError> {
        self.with_state(|state| state.snapshot.current_state)
    }

    /// 获取当前状态，锁被占用时退化为待机
    pub fn current_state_or_default(&self) -> SystemState {
        self.get_current_state().unwrap_or_else(|_| {
            warn!("[STATE] State lock busy, reporting STANDBY");
            SystemState::Standby
        })
    }

    pub fn snapshot(&self) -> Result<StateSnapshot, BoardError> {
        self.with_state(|state| state.snapshot)
    }

    /// 获取状态信息
    pub fn info(&self) -> Result<StateInfo, BoardError> {
        let snapshot = self.snapshot()?;
        let elapsed_ms = self.ctx.now_ms().saturating_sub(snapshot.state_start_time);
        Ok(StateInfo {
            current_state: snapshot.current_state,
            previous_state: snapshot.previous_state,
            state_change_count: snapshot.state_change_count,
            time_in_current_state: (elapsed_ms / 1000) as u32,
            computing_module_connected: snapshot.inputs.computing_module_connected,
            application_module_connected: snapshot.inputs.application_module_connected,
            user_host_connected: snapshot.inputs.user_host_connected,
            high_compute_load: snapshot.inputs.high_compute_load,
            current_temperature: snapshot.inputs.current_temperature,
        })
    }

    /// 注册观察者，槽位已满返回 `NoMemory`
    pub fn register_observer(
        &self,
        observer: Arc<dyn StateObserver>,
    ) -> Result<ObserverId, BoardError> {
        self.with_state(|state| {
            let id = ObserverId(state.next_observer_id);
            state
                .observers
                .push((id, observer))
                .map_err(|_| BoardError::NoMemory)?;
            state.next_observer_id = state.next_observer_id.wrapping_add(1);
            Ok(id)
        })?
    }

    /// 注销观察者，未注册返回 `NotFound`
    pub fn unregister_observer(&self, id: ObserverId) -> Result<(), BoardError> {
        self.with_state(|state| {
            let position = state
                .observers
                .iter()
                .position(|(registered, _)| *registered == id)
                .ok_or(BoardError::NotFound)?;
            state.observers.remove(position);
            Ok(())
        })?
    }

    pub fn observer_count(&self) -> usize {
        self.with_state(|state| state.observers.len()).unwrap_or(0)
    }

    /// 打印状态报告
    pub fn print_status(&self) {
        match self.info() {
            Ok(info) => {
                info!("[STATE] ===== System state =====");
                info!(
                    "[STATE] current: {}  previous: {}",
                    info.current_state, info.previous_state
                );
                info!(
                    "[STATE] changes: {}  time in state: {} s",
                    info.state_change_count, info.time_in_current_state
                );
                info!(
                    "[STATE] computing: {}  application: {}  user host: {}",
                    info.computing_module_connected,
                    info.application_module_connected,
                    info.user_host_connected
                );
                info!(
                    "[STATE] high load: {}  temperature: {:.1} C  monitoring: {}",
                    info.high_compute_load,
                    info.current_temperature,
                    self.is_monitoring()
                );
            }
            Err(e) => warn!("[STATE] Status unavailable: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ManualClock;
    use crate::network_monitor::{NetworkStatus, StaticNetworkMonitor};
    use crate::power::StaticPowerSource;
    use alloc::vec::Vec as StdVec;
    use std::sync::Mutex as StdMutex;

    fn inputs(temp: f32, load: bool, host: bool, comp: bool, app: bool) -> DetectionInputs {
        DetectionInputs {
            computing_module_connected: comp,
            application_module_connected: app,
            user_host_connected: host,
            high_compute_load: load,
            current_temperature: temp,
        }
    }

    struct Fixture {
        network: Arc<StaticNetworkMonitor>,
        power: Arc<StaticPowerSource>,
        clock: Arc<ManualClock>,
        manager: StateManager,
    }

    fn fixture() -> Fixture {
        let network = Arc::new(StaticNetworkMonitor::new());
        let power = Arc::new(StaticPowerSource::new());
        let clock = Arc::new(ManualClock::new(0));
        let ctx = BoardContext::new(network.clone(), power.clone(), clock.clone());
        Fixture {
            network,
            power,
            clock,
            manager: StateManager::new(ctx),
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<StdVec<(SystemState, SystemState)>>,
    }

    impl StateObserver for Recorder {
        fn on_transition(&self, old: SystemState, new: SystemState) {
            self.seen.lock().unwrap().push((old, new));
        }
    }

    #[test]
    fn priority_table_exhaustive() {
        for temp in [20.0, 85.0, 85.01, 95.0, 95.01] {
            for bits in 0..16u8 {
                let load = bits & 1 != 0;
                let host = bits & 2 != 0;
                let comp = bits & 4 != 0;
                let app = bits & 8 != 0;
                let expected = if temp > 95.0 {
                    SystemState::HighTemp2
                } else if temp > 85.0 {
                    SystemState::HighTemp1
                } else if load {
                    SystemState::HighComputeLoad
                } else if !host {
                    SystemState::UserHostDisconnected
                } else {
                    match (comp, app) {
                        (false, false) => SystemState::Startup0,
                        (true, false) => SystemState::Startup1,
                        (false, true) => SystemState::Startup2,
                        (true, true) => SystemState::Startup3,
                    }
                };
                assert_eq!(
                    determine_system_state(&inputs(temp, load, host, comp, app)),
                    expected
                );
            }
        }
    }

    #[test]
    fn thresholds_are_strict() {
        let at = inputs(85.0, false, true, true, true);
        assert_eq!(determine_system_state(&at), SystemState::Startup3);
        let above = inputs(85.01, false, true, true, true);
        assert_eq!(determine_system_state(&above), SystemState::HighTemp1);
    }

    #[test]
    fn compute_load_requires_valid_data_above_50w() {
        let f = fixture();
        f.power.set_power(50.0, 0);
        assert!(!f.manager.is_high_compute_load());
        f.power.set_power(50.5, 0);
        assert!(f.manager.is_high_compute_load());
        f.power.invalidate();
        assert!(!f.manager.is_high_compute_load());
    }

    #[test]
    fn change_count_moves_only_on_transition() {
        let f = fixture();
        f.network.update(NetworkTarget::UserHost, NetworkStatus::Up);

        assert_eq!(f.manager.update_now(), SystemState::Startup0);
        assert_eq!(f.manager.snapshot().unwrap().state_change_count, 1);
        f.manager.update_now();
        assert_eq!(f.manager.snapshot().unwrap().state_change_count, 1);

        f.network.update(NetworkTarget::ComputingModule, NetworkStatus::Up);
        assert_eq!(f.manager.update_now(), SystemState::Startup1);
        let snapshot = f.manager.snapshot().unwrap();
        assert_eq!(snapshot.state_change_count, 2);
        assert_eq!(snapshot.previous_state, SystemState::Startup0);
    }

    #[test]
    fn observers_notified_in_order_and_removable() {
        let f = fixture();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let id = f.manager.register_observer(first.clone()).unwrap();
        f.manager.register_observer(second.clone()).unwrap();

        f.manager.force_set_state(SystemState::HighTemp1).unwrap();
        assert_eq!(
            first.seen.lock().unwrap().as_slice(),
            &[(SystemState::Standby, SystemState::HighTemp1)]
        );
        assert_eq!(second.seen.lock().unwrap().len(), 1);

        f.manager.unregister_observer(id).unwrap();
        assert_eq!(f.manager.unregister_observer(id), Err(BoardError::NotFound));
        f.manager.force_set_state(SystemState::Standby).unwrap();
        assert_eq!(first.seen.lock().unwrap().len(), 1);
        assert_eq!(second.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn observer_slots_are_bounded() {
        let f = fixture();
        for _ in 0..MAX_STATE_OBSERVERS {
            f.manager
                .register_observer(Arc::new(Recorder::default()))
                .unwrap();
        }
        assert_eq!(
            f.manager.register_observer(Arc::new(Recorder::default())),
            Err(BoardError::NoMemory)
        );
    }

    #[test]
    fn forced_state_to_same_value_is_silent() {
        let f = fixture();
        let recorder = Arc::new(Recorder::default());
        f.manager.register_observer(recorder.clone()).unwrap();
        f.manager.force_set_state(SystemState::Standby).unwrap();
        assert!(recorder.seen.lock().unwrap().is_empty());
        assert_eq!(f.manager.snapshot().unwrap().state_change_count, 0);
    }

    #[test]
    fn raw_state_index_is_validated() {
        assert_eq!(SystemState::try_from(8), Ok(SystemState::HighComputeLoad));
        assert_eq!(SystemState::try_from(11), Err(BoardError::InvalidArgument));
    }

    #[test]
    fn info_reports_seconds_in_state() {
        let f = fixture();
        f.manager.force_set_state(SystemState::Startup3).unwrap();
        f.clock.advance(4_500);
        let info = f.manager.info().unwrap();
        assert_eq!(info.current_state, SystemState::Startup3);
        assert_eq!(info.time_in_current_state, 4);
        assert_eq!(info.current_temperature, 0.0);
    }

    #[test]
    fn monitoring_toggle_is_idempotent() {
        let f = fixture();
        f.manager.start_monitoring();
        f.manager.start_monitoring();
        assert!(f.manager.is_monitoring());
        f.manager.stop_monitoring();
        f.manager.stop_monitoring();
        assert!(!f.manager.is_monitoring());
    }
}
