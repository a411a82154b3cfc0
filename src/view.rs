//! Toolkit-independent view model of the dashboard.
//!
//! Built from [`AppState`] on every refresh tick and handed to a renderer.
//! Holds display-ready strings and colours only; no widget handles.

use std::fmt;
use time::OffsetDateTime;

use crate::models::{Color, Sensor, SensorStatus};
use crate::state::AppState;
use crate::utils::{format_datetime, format_value};

const NOT_AVAILABLE: &str = "N/A";
const GREEN: Color = Color { r: 0x00, g: 0x80, b: 0x00 };
const RED: Color = Color { r: 0xFF, g: 0x00, b: 0x00 };

#[derive(Debug, Clone, PartialEq)]
pub struct SensorRow {
    pub unique_tag: String,
    pub label: String,
    pub value: String,
    pub min: String,
    pub max: String,
    pub status: SensorStatus,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRow {
    pub label: String,
    pub sensors: Vec<SensorRow>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionIndicator {
    pub connected: bool,
}

impl ConnectionIndicator {
    pub fn text(&self) -> &'static str {
        if self.connected {
            "Connected"
        } else {
            "Not connected"
        }
    }

    pub fn color(&self) -> Color {
        if self.connected {
            GREEN
        } else {
            RED
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sidebar {
    pub database: ConnectionIndicator,
    pub arduino: ConnectionIndicator,
    pub since_last_packet: String,
    /// Arrival time of the newest packet
    pub last_packet_at: String,
    pub uptime: String,
}

/// Details of the selected sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDetail {
    pub label: String,
    pub unit: String,
    pub parent_label: String,
    pub lower_critical_bound: String,
    pub lower_bound: String,
    pub upper_bound: String,
    pub upper_critical_bound: String,
    pub min: String,
    pub max: String,
}

/// Line series of the selected sensor's history
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub title: String,
    /// (milliseconds since epoch, value), oldest first
    pub points: Vec<(i64, f64)>,
    pub x_range: Option<(i64, i64)>,
    pub y_range: Option<(f64, f64)>,
    pub tick_count: usize,
}

impl ChartSeries {
    fn from_sensor(sensor: &Sensor, tick_count: usize) -> Self {
        let points: Vec<(i64, f64)> = sensor
            .history()
            .rev()
            .map(|(timestamp, value)| ((timestamp.unix_timestamp_nanos() / 1_000_000) as i64, *value))
            .collect();

        let x_range = points
            .iter()
            .map(|(x, _)| *x)
            .min()
            .zip(points.iter().map(|(x, _)| *x).max());

        let y_range = points
            .iter()
            .map(|(_, y)| *y)
            .reduce(f64::min)
            .zip(points.iter().map(|(_, y)| *y).reduce(f64::max))
            .map(|(min, max)| {
                let margin = (max - min) / 10.0;
                (min - margin, max + margin)
            });

        ChartSeries {
            title: sensor.label.clone(),
            points,
            x_range,
            y_range,
            tick_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub modules: Vec<ModuleRow>,
    pub sidebar: Sidebar,
    pub detail: Option<SensorDetail>,
    pub chart: Option<ChartSeries>,
}

fn recorded_or_sentinel(value: Option<f64>, unit: &str) -> String {
    format_value(value.unwrap_or(crate::models::SENTINEL_VALUE), unit)
}

fn sensor_row(sensor: &Sensor) -> SensorRow {
    let status = sensor.status();
    SensorRow {
        unique_tag: sensor.unique_tag.clone(),
        label: sensor.label.clone(),
        value: format_value(sensor.value, &sensor.unit),
        min: recorded_or_sentinel(sensor.lowest_recorded_value, &sensor.unit),
        max: recorded_or_sentinel(sensor.highest_recorded_value, &sensor.unit),
        status,
        color: status.color(),
    }
}

fn sensor_detail(sensor: &Sensor) -> SensorDetail {
    SensorDetail {
        label: sensor.label.clone(),
        unit: sensor.unit.clone(),
        parent_label: sensor.parent_label.clone(),
        lower_critical_bound: sensor.bounds.lower_critical.to_string(),
        lower_bound: sensor.bounds.lower.to_string(),
        upper_bound: sensor.bounds.upper.to_string(),
        upper_critical_bound: sensor.bounds.upper_critical.to_string(),
        min: recorded_or_sentinel(sensor.lowest_recorded_value, &sensor.unit),
        max: recorded_or_sentinel(sensor.highest_recorded_value, &sensor.unit),
    }
}

impl DashboardView {
    /// Snapshot the state. `selected` is the unique tag of the sensor whose
    /// details and chart are shown; module tags and unknown tags show none.
    pub fn build(
        state: &AppState,
        selected: Option<&str>,
        now: OffsetDateTime,
        chart_ticks: usize,
    ) -> Self {
        let modules = state
            .registry
            .modules()
            .iter()
            .map(|module| ModuleRow {
                label: module.label.clone(),
                sensors: module.sensors.iter().map(sensor_row).collect(),
            })
            .collect();

        let (since_last_packet, uptime) = match state.seconds_since_last_packet(now) {
            Some(seconds) => (
                format!("{} seconds", seconds),
                state
                    .arduino_uptime
                    .map(|uptime| format!("{} seconds", uptime))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            ),
            None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
        };

        let last_packet_at = state
            .last_packet_at
            .as_ref()
            .map(format_datetime)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let sidebar = Sidebar {
            database: ConnectionIndicator {
                connected: state.database_connected,
            },
            arduino: ConnectionIndicator {
                connected: state.arduino_connected,
            },
            since_last_packet,
            last_packet_at,
            uptime,
        };

        let selected_sensor = selected.and_then(|tag| state.registry.sensor(tag));

        DashboardView {
            modules,
            sidebar,
            detail: selected_sensor.map(sensor_detail),
            chart: selected_sensor.map(|sensor| ChartSeries::from_sensor(sensor, chart_ticks)),
        }
    }
}

impl fmt::Display for DashboardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<28} {:>14} {:>14} {:>14}  {}",
            "Sensor", "Value", "Min", "Max", "Status"
        )?;
        for module in &self.modules {
            writeln!(f, "{}", module.label)?;
            for row in &module.sensors {
                writeln!(
                    f,
                    "  {:<26} {:>14} {:>14} {:>14}  {}",
                    row.label,
                    row.value,
                    row.min,
                    row.max,
                    row.status.label()
                )?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Database: {}", self.sidebar.database.text())?;
        writeln!(f, "Arduino: {}", self.sidebar.arduino.text())?;
        writeln!(
            f,
            "Last packet: {} ({})",
            self.sidebar.since_last_packet, self.sidebar.last_packet_at
        )?;
        writeln!(f, "Uptime: {}", self.sidebar.uptime)?;

        if let Some(detail) = &self.detail {
            writeln!(f)?;
            writeln!(f, "{} ({}) [{}]", detail.label, detail.parent_label, detail.unit)?;
            writeln!(
                f,
                "  bounds: {} < {} < {} < {}",
                detail.lower_critical_bound,
                detail.lower_bound,
                detail.upper_bound,
                detail.upper_critical_bound
            )?;
            writeln!(f, "  min: {}  max: {}", detail.min, detail.max)?;
        }

        if let Some(chart) = &self.chart {
            writeln!(f, "  history: {} points", chart.points.len())?;
        }

        Ok(())
    }
}
