//! Network reachability inputs.
//!
//! The ICMP prober itself lives outside this crate. It reports results into a
//! [`StaticNetworkMonitor`], which the state machines read through the
//! [`NetworkMonitor`] trait.

use alloc::sync::Arc;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Vec;
use log::info;

use crate::BoardError;
use crate::config;

/// Reachability of one monitored target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    #[default]
    Unknown,
    Up,
    Down,
}

impl NetworkStatus {
    pub fn name(self) -> &'static str {
        match self {
            NetworkStatus::Unknown => "UNKNOWN",
            NetworkStatus::Up => "UP",
            NetworkStatus::Down => "DOWN",
        }
    }
}

/// The four fixed probe targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTarget {
    /// Compute module (Jetson)
    ComputingModule,
    /// Application module (N305)
    ApplicationModule,
    UserHost,
    Internet,
}

impl NetworkTarget {
    pub const ALL: [NetworkTarget; 4] = [
        NetworkTarget::ComputingModule,
        NetworkTarget::ApplicationModule,
        NetworkTarget::UserHost,
        NetworkTarget::Internet,
    ];

    pub fn ip(self) -> &'static str {
        match self {
            NetworkTarget::ComputingModule => config::COMPUTING_MODULE_IP,
            NetworkTarget::ApplicationModule => config::APPLICATION_MODULE_IP,
            NetworkTarget::UserHost => config::USER_HOST_IP,
            NetworkTarget::Internet => config::INTERNET_IP,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NetworkTarget::ComputingModule => "computing module",
            NetworkTarget::ApplicationModule => "application module",
            NetworkTarget::UserHost => "user host",
            NetworkTarget::Internet => "internet",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_ip(ip: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.ip() == ip)
    }
}

/// Read side of the reachability prober
pub trait NetworkMonitor: Send + Sync {
    /// Last known status of `ip`; unmonitored addresses report `Unknown`
    fn status(&self, ip: &str) -> NetworkStatus;

    fn is_up(&self, ip: &str) -> bool {
        self.status(ip) == NetworkStatus::Up
    }

    fn target_status(&self, target: NetworkTarget) -> NetworkStatus {
        self.status(target.ip())
    }
}

/// Receives per-target status changes
pub trait NetworkObserver: Send + Sync {
    fn on_status_change(&self, target: NetworkTarget, status: NetworkStatus);
}

struct MonitorInner {
    statuses: [NetworkStatus; 4],
    observers: Vec<Arc<dyn NetworkObserver>, { config::MAX_NETWORK_OBSERVERS }>,
}

/// Last-known status table fed by the prober
pub struct StaticNetworkMonitor {
    inner: Mutex<CriticalSectionRawMutex, RefCell<MonitorInner>>,
}

impl Default for StaticNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticNetworkMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(MonitorInner {
                statuses: [NetworkStatus::Unknown; 4],
                observers: Vec::new(),
            })),
        }
    }

    /// Record a probe result and notify observers when the status changed
    pub fn update(&self, target: NetworkTarget, status: NetworkStatus) {
        let observers = self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            let slot = &mut inner.statuses[target.index()];
            if *slot == status {
                return None;
            }
            *slot = status;
            Some(inner.observers.clone())
        });

        if let Some(observers) = observers {
            info!(
                "[NET] {} ({}) -> {}",
                target.name(),
                target.ip(),
                status.name()
            );
            for observer in observers.iter() {
                observer.on_status_change(target, status);
            }
        }
    }

    /// Set every target at once, e.g. after a full probe cycle
    pub fn update_all(&self, statuses: [NetworkStatus; 4]) {
        for (target, status) in NetworkTarget::ALL.into_iter().zip(statuses) {
            self.update(target, status);
        }
    }

    pub fn register_observer(&self, observer: Arc<dyn NetworkObserver>) -> Result<(), BoardError> {
        self.inner.lock(|cell| {
            cell.borrow_mut()
                .observers
                .push(observer)
                .map_err(|_| BoardError::NoMemory)
        })
    }
}

impl NetworkMonitor for StaticNetworkMonitor {
    fn status(&self, ip: &str) -> NetworkStatus {
        match NetworkTarget::from_ip(ip) {
            Some(target) => self.inner.lock(|cell| cell.borrow().statuses[target.index()]),
            None => NetworkStatus::Unknown,
        }
    }
}
