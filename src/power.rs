//! Power and rail-voltage inputs.
//!
//! ADC sampling and the UART power-chip protocol run outside this crate and
//! push their readings into a [`StaticPowerSource`].

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// Last sample negotiated with the power chip
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerChipData {
    /// Volts
    pub voltage: f32,
    /// Amperes
    pub current: f32,
    /// Watts
    pub power: f32,
    /// Degrees Celsius. The fitted chip has no sensor and reports 0.
    pub temperature: f32,
    pub timestamp: u64,
    pub valid: bool,
}

pub trait PowerSource: Send + Sync {
    /// Cached power-chip sample; `valid == false` when nothing was received yet
    fn latest_power_chip_data(&self) -> PowerChipData;

    fn main_voltage(&self) -> f32;

    fn aux_12v_voltage(&self) -> f32;
}

#[derive(Debug, Clone, Copy, Default)]
struct Readings {
    chip: PowerChipData,
    main_voltage: f32,
    aux_12v_voltage: f32,
}

/// Holds the latest readings reported by the ADC and UART tasks
pub struct StaticPowerSource {
    readings: Mutex<CriticalSectionRawMutex, Cell<Readings>>,
}

impl Default for StaticPowerSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticPowerSource {
    pub const fn new() -> Self {
        Self {
            readings: Mutex::new(Cell::new(Readings {
                chip: PowerChipData {
                    voltage: 0.0,
                    current: 0.0,
                    power: 0.0,
                    temperature: 0.0,
                    timestamp: 0,
                    valid: false,
                },
                main_voltage: 0.0,
                aux_12v_voltage: 0.0,
            })),
        }
    }

    pub fn update_chip_data(&self, data: PowerChipData) {
        self.readings.lock(|cell| {
            let mut readings = cell.get();
            readings.chip = data;
            cell.set(readings);
        });
    }

    /// Convenience for a valid sample carrying only a wattage
    pub fn set_power(&self, watts: f32, timestamp: u64) {
        self.update_chip_data(PowerChipData {
            power: watts,
            timestamp,
            valid: true,
            ..PowerChipData::default()
        });
    }

    pub fn set_voltages(&self, main_voltage: f32, aux_12v_voltage: f32) {
        self.readings.lock(|cell| {
            let mut readings = cell.get();
            readings.main_voltage = main_voltage;
            readings.aux_12v_voltage = aux_12v_voltage;
            cell.set(readings);
        });
    }

    /// Drop the cached chip sample, e.g. when the UART link is lost
    pub fn invalidate(&self) {
        self.readings.lock(|cell| {
            let mut readings = cell.get();
            readings.chip.valid = false;
            cell.set(readings);
        });
    }
}

impl PowerSource for StaticPowerSource {
    fn latest_power_chip_data(&self) -> PowerChipData {
        self.readings.lock(|cell| cell.get().chip)
    }

    fn main_voltage(&self) -> f32 {
        self.readings.lock(|cell| cell.get().main_voltage)
    }

    fn aux_12v_voltage(&self) -> f32 {
        self.readings.lock(|cell| cell.get().aux_12v_voltage)
    }
}
