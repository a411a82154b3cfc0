use std::collections::VecDeque;
use std::fmt;
use time::OffsetDateTime;

use crate::error::DbError;

/// Marks "no reading yet" or a failed reading
pub const SENTINEL_VALUE: f64 = -9999.0;

/// Schema/table address of a sensor in the database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorAddress {
    pub schema: String,
    pub table: String,
}

impl SensorAddress {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        SensorAddress {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Split a `module.sensor` unique tag
    pub fn parse(unique_tag: &str) -> Result<Self, DbError> {
        match unique_tag.split_once('.') {
            Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
                Ok(SensorAddress::new(schema, table))
            }
            _ => Err(DbError::Address(unique_tag.to_string())),
        }
    }

    pub fn unique_tag(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

impl fmt::Display for SensorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Thresholds, all exclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower_critical: f64,
    pub lower: f64,
    pub upper: f64,
    pub upper_critical: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStatus {
    Normal,
    Warning,
    Critical,
    Error,
}

/// RGB display colour of a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl SensorStatus {
    /// Classify a value against its bounds.
    ///
    /// Checked in order: normal band, warning band, sentinel, then critical.
    /// A value sitting exactly on a bound falls through to the stricter class.
    pub fn classify(value: f64, bounds: &Bounds) -> Self {
        if bounds.lower < value && value < bounds.upper {
            SensorStatus::Normal
        } else if bounds.lower_critical < value && value < bounds.upper_critical {
            SensorStatus::Warning
        } else if value == SENTINEL_VALUE {
            SensorStatus::Error
        } else {
            SensorStatus::Critical
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorStatus::Normal => "Normal",
            SensorStatus::Warning => "Warning",
            SensorStatus::Critical => "Critical",
            SensorStatus::Error => "Error",
        }
    }

    pub fn color(&self) -> Color {
        match self {
            SensorStatus::Normal => Color { r: 0xFF, g: 0xFF, b: 0xFF },
            SensorStatus::Warning => Color { r: 0xFF, g: 0x8C, b: 0x00 },
            SensorStatus::Critical => Color { r: 0xFF, g: 0x00, b: 0x00 },
            SensorStatus::Error => Color { r: 0x80, g: 0x00, b: 0x00 },
        }
    }
}

/// A single measured quantity; one database table
#[derive(Debug, Clone)]
pub struct Sensor {
    pub tag: String,
    pub label: String,
    pub parent_tag: String,
    pub parent_label: String,
    pub unique_tag: String,
    pub bounds: Bounds,
    pub unit: String,
    pub value: f64,
    pub lowest_recorded_value: Option<f64>,
    pub highest_recorded_value: Option<f64>,
    /// Newest first
    value_cache: VecDeque<(OffsetDateTime, f64)>,
}

impl Sensor {
    pub fn new(
        tag: &str,
        label: &str,
        parent_tag: &str,
        parent_label: &str,
        bounds: Bounds,
        unit: &str,
    ) -> Self {
        Sensor {
            tag: tag.to_string(),
            label: label.to_string(),
            parent_tag: parent_tag.to_string(),
            parent_label: parent_label.to_string(),
            unique_tag: format!("{}.{}", parent_tag, tag),
            bounds,
            unit: unit.to_string(),
            value: SENTINEL_VALUE,
            lowest_recorded_value: None,
            highest_recorded_value: None,
            value_cache: VecDeque::new(),
        }
    }

    pub fn address(&self) -> SensorAddress {
        SensorAddress::new(&self.parent_tag, &self.tag)
    }

    pub fn status(&self) -> SensorStatus {
        SensorStatus::classify(self.value, &self.bounds)
    }

    /// Store a new reading, keeping at most `cap` entries in the history.
    /// Eviction is by insertion order only.
    pub fn record(&mut self, timestamp: OffsetDateTime, value: f64, cap: usize) {
        self.value = value;

        if value != SENTINEL_VALUE {
            self.lowest_recorded_value = Some(match self.lowest_recorded_value {
                Some(lowest) => lowest.min(value),
                None => value,
            });
            self.highest_recorded_value = Some(match self.highest_recorded_value {
                Some(highest) => highest.max(value),
                None => value,
            });
        }

        self.value_cache.push_front((timestamp, value));
        self.value_cache.truncate(cap);
    }

    /// Newest reading, or the sentinel stamped now when nothing is cached
    pub fn latest(&self) -> (OffsetDateTime, f64) {
        self.value_cache
            .front()
            .copied()
            .unwrap_or_else(|| (OffsetDateTime::now_utc(), SENTINEL_VALUE))
    }

    pub fn history(&self) -> impl DoubleEndedIterator<Item = &(OffsetDateTime, f64)> {
        self.value_cache.iter()
    }

    pub fn history_len(&self) -> usize {
        self.value_cache.len()
    }
}

/// Schema-level group of sensors
#[derive(Debug, Clone)]
pub struct Module {
    pub tag: String,
    pub label: String,
    pub sensors: Vec<Sensor>,
}

/// One persisted row of a sensor table
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub id: i32,
    pub timestamp: OffsetDateTime,
    pub value: f64,
}

/// A value headed for one sensor table
#[derive(Debug, Clone, PartialEq)]
pub struct SensorWrite {
    pub target: SensorAddress,
    pub value: f64,
}
