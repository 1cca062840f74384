//! JSON status report built from a `QPIGS` reply.

use serde::Serialize;
use skymax_client::ReportConfig;
use skymax_core::OperatingMode;
use std::str::FromStr;
use thiserror::Error;

/// Leading `QPIGS` fields used by the report, in reply order.
const STATUS_FIELDS: [&str; 16] = [
    "grid_voltage",
    "grid_frequency",
    "out_voltage",
    "out_frequency",
    "load_va",
    "load_watt",
    "load_percent",
    "bus_voltage",
    "battery_voltage",
    "battery_charge_current",
    "battery_capacity",
    "heatsink_temperature",
    "pv_input_current",
    "pv_input_voltage",
    "scc_voltage",
    "battery_discharge_current",
];

/// Errors turning a status payload into a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("status reply has {found} fields, missing {name} (field {index})")]
    MissingField {
        name: &'static str,
        index: usize,
        found: usize,
    },

    #[error("status field {name} is not a number: {value:?}")]
    InvalidField { name: &'static str, value: String },
}

/// One report line, keyed the way downstream consumers expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    #[serde(rename = "Inverter_mode")]
    pub inverter_mode: u8,
    #[serde(rename = "AC_grid_voltage")]
    pub ac_grid_voltage: f32,
    #[serde(rename = "AC_grid_frequency")]
    pub ac_grid_frequency: f32,
    #[serde(rename = "AC_out_voltage")]
    pub ac_out_voltage: f32,
    #[serde(rename = "AC_out_frequency")]
    pub ac_out_frequency: f32,
    #[serde(rename = "PV_in_voltage")]
    pub pv_in_voltage: f32,
    #[serde(rename = "PV_in_current")]
    pub pv_in_current: f32,
    #[serde(rename = "PV_in_watts")]
    pub pv_in_watts: f32,
    #[serde(rename = "PV_in_watthour")]
    pub pv_in_watthour: f32,
    #[serde(rename = "Load_pct")]
    pub load_pct: i32,
    #[serde(rename = "Load_watt")]
    pub load_watt: i32,
    #[serde(rename = "Load_watthour")]
    pub load_watthour: f32,
    #[serde(rename = "Load_va")]
    pub load_va: i32,
    #[serde(rename = "Bus_voltage")]
    pub bus_voltage: i32,
    #[serde(rename = "Heatsink_temperature")]
    pub heatsink_temperature: i32,
    #[serde(rename = "Battery_capacity")]
    pub battery_capacity: i32,
    #[serde(rename = "Battery_voltage")]
    pub battery_voltage: f32,
    #[serde(rename = "Battery_charge_current")]
    pub battery_charge_current: i32,
    #[serde(rename = "Battery_discharge_current")]
    pub battery_discharge_current: i32,
}

impl Report {
    /// Builds a report from a `QPIGS` payload and the current mode.
    ///
    /// PV current is scaled by the amperage factor and PV power by the watt
    /// factor. Watt-hours cover one run interval. Load watt-hours are only
    /// counted while running on battery.
    pub fn from_status(
        status: &str,
        mode: OperatingMode,
        factors: &ReportConfig,
    ) -> Result<Self, ReportError> {
        let fields: Vec<&str> = status.split_whitespace().collect();
        let f = |index: usize| parse_field::<f32>(&fields, index);
        let i = |index: usize| parse_field::<i32>(&fields, index);

        let pv_in_voltage = f(13)?;
        let pv_in_current = f(12)? * factors.amperage_factor;
        let pv_in_watts = pv_in_voltage * pv_in_current * factors.watt_factor;

        // Whole run intervals per hour
        let periods = (3600 / factors.run_interval_secs.clamp(1, 3600)) as f32;
        let load_watt = i(5)?;
        let load_watthour = if mode == OperatingMode::Battery {
            load_watt as f32 / periods
        } else {
            0.0
        };

        Ok(Self {
            inverter_mode: mode.code(),
            ac_grid_voltage: f(0)?,
            ac_grid_frequency: f(1)?,
            ac_out_voltage: f(2)?,
            ac_out_frequency: f(3)?,
            pv_in_voltage,
            pv_in_current: round(pv_in_current, 1),
            pv_in_watts: round(pv_in_watts, 1),
            pv_in_watthour: round(pv_in_watts / periods, 4),
            load_pct: i(6)?,
            load_watt,
            load_watthour: round(load_watthour, 4),
            load_va: i(4)?,
            bus_voltage: i(7)?,
            heatsink_temperature: i(11)?,
            battery_capacity: i(10)?,
            battery_voltage: f(8)?,
            battery_charge_current: i(9)?,
            battery_discharge_current: i(15)?,
        })
    }
}

fn parse_field<T: FromStr>(fields: &[&str], index: usize) -> Result<T, ReportError> {
    let name = STATUS_FIELDS[index];
    let value = fields.get(index).ok_or(ReportError::MissingField {
        name,
        index,
        found: fields.len(),
    })?;
    value.parse().map_err(|_| ReportError::InvalidField {
        name,
        value: value.to_string(),
    })
}

fn round(value: f32, places: i32) -> f32 {
    let scale = 10f32.powi(places);
    (value * scale).round() / scale
}
