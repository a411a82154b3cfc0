use log::debug;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_SETTINGS_PATH: &str = "settings.txt";
const DEFAULT_PARAMETERS_PATH: &str = "Parameters.xml";
const DEFAULT_DATABASE_HOST: &str = "localhost";
const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 1000;

/// Linear voltage-to-charge calibration for one battery
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeCalibration {
    /// Voltage at 0% charge
    pub offset: f64,
    /// Voltage span between 0% and 100%
    pub slope: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub main_battery: ChargeCalibration,
    pub aux_battery: ChargeCalibration,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            main_battery: ChargeCalibration {
                offset: 46.04,
                slope: 4.88,
            },
            aux_battery: ChargeCalibration {
                offset: 11.51,
                slope: 1.22,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub name: String,
    pub role: String,
    pub password: String,
    pub host: String,
    pub port: Option<u16>,
    pub connection_attempts: u32,
    pub retry_delay: Duration,
    /// DATABASE_URL from the environment; wins over the fields above
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub usb_serial_number: String,
    pub baud_rate: u32,
}

#[derive(Debug, Clone)]
pub struct PathSettings {
    pub parameters: PathBuf,
    pub export: PathBuf,
    pub backup: PathBuf,
    pub postgres_binaries: Option<PathBuf>,
    pub data_cluster: Option<PathBuf>,
}

/// Typed view of settings.txt
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub serial: SerialSettings,
    /// Readings kept per sensor
    pub packet_cache_size: usize,
    /// Tick count of the chart time axis
    pub data_cache_size: usize,
    pub refresh_interval: Duration,
    pub calibration: Calibration,
    pub paths: PathSettings,
}

impl Settings {
    /// Load settings from a file, then apply .env / environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let raw = RawSettings::parse(&content)?;
        debug!("Loaded {} settings from {}", raw.len(), path.display());

        let mut settings = Settings::from_raw(&raw)?;
        if let Ok(url) = env::var("DATABASE_URL") {
            debug!("DATABASE_URL set, overriding database settings");
            settings.database.url = Some(url);
        }

        Ok(settings)
    }

    pub fn from_raw(raw: &RawSettings) -> Result<Self, ConfigError> {
        let calibration_defaults = Calibration::default();

        let database = DatabaseSettings {
            name: raw.required("DatabaseName")?.to_string(),
            role: raw.required("DatabaseRole")?.to_string(),
            password: raw.required("DatabasePassword")?.to_string(),
            host: raw
                .get("DatabaseHost")
                .unwrap_or(DEFAULT_DATABASE_HOST)
                .to_string(),
            port: raw.parse_optional("DatabasePort")?,
            connection_attempts: raw.parse_required("DatabaseConnectionAttempts")?,
            retry_delay: Duration::from_secs(
                raw.parse_or("DatabaseRetryDelay", DEFAULT_RETRY_DELAY_SECS)?,
            ),
            url: None,
        };

        let serial = SerialSettings {
            usb_serial_number: raw.required("ArduinoUSBUID")?.to_string(),
            baud_rate: raw.parse_or("ArduinoBaudRate", DEFAULT_BAUD_RATE)?,
        };

        let calibration = Calibration {
            main_battery: ChargeCalibration {
                offset: raw.parse_checked(
                    "MainBatteryChargeOffset",
                    calibration_defaults.main_battery.offset,
                    |offset: &f64| offset.is_finite(),
                )?,
                slope: raw.parse_checked(
                    "MainBatteryChargeSlope",
                    calibration_defaults.main_battery.slope,
                    usable_slope,
                )?,
            },
            aux_battery: ChargeCalibration {
                offset: raw.parse_checked(
                    "AuxBatteryChargeOffset",
                    calibration_defaults.aux_battery.offset,
                    |offset: &f64| offset.is_finite(),
                )?,
                slope: raw.parse_checked(
                    "AuxBatteryChargeSlope",
                    calibration_defaults.aux_battery.slope,
                    usable_slope,
                )?,
            },
        };

        let paths = PathSettings {
            parameters: raw
                .path("ParametersPath")
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PARAMETERS_PATH)),
            export: raw
                .path("export_path")
                .ok_or_else(|| ConfigError::Missing("export_path".into()))?,
            backup: raw
                .path("backup_path")
                .ok_or_else(|| ConfigError::Missing("backup_path".into()))?,
            postgres_binaries: raw.path("postgres_binary_path"),
            data_cluster: raw.path("data_cluster_path"),
        };

        Ok(Settings {
            database,
            serial,
            packet_cache_size: raw.parse_required("PacketCacheSize")?,
            data_cache_size: raw.parse_required("DataCacheSize")?,
            refresh_interval: Duration::from_millis(raw.parse_checked(
                "RefreshInterval",
                DEFAULT_REFRESH_INTERVAL_MS,
                |ms: &u64| *ms > 0,
            )?),
            calibration,
            paths,
        })
    }
}

/// Untyped key=value pairs as they appear in the settings file
#[derive(Debug, Clone, Default)]
pub struct RawSettings {
    values: HashMap<String, String>,
}

impl RawSettings {
    /// Parse `key=value` lines. Splits on the first '='; blank lines and
    /// lines starting with '#' are skipped.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    values.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => {
                    return Err(ConfigError::Malformed {
                        line: index + 1,
                        content: line.to_string(),
                    })
                }
            }
        }

        Ok(RawSettings { values })
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn required(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    /// Path-valued setting with '/' normalized to the platform separator
    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(normalize_separators)
    }

    fn parse_value<T: FromStr>(&self, key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn parse_required<T: FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.required(key)?;
        self.parse_value(key, value)
    }

    pub fn parse_optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|value| self.parse_value(key, value))
            .transpose()
    }

    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_optional(key)?.unwrap_or(default))
    }

    /// Like [`RawSettings::parse_or`], but a present value must also pass `valid`
    pub fn parse_checked<T, F>(&self, key: &str, default: T, valid: F) -> Result<T, ConfigError>
    where
        T: FromStr,
        F: Fn(&T) -> bool,
    {
        let value = self.parse_or(key, default)?;
        if valid(&value) {
            Ok(value)
        } else {
            Err(ConfigError::Invalid {
                key: key.to_string(),
                value: self.get(key).unwrap_or_default().to_string(),
            })
        }
    }
}

/// Charge is divided by the slope, so zero and non-finite values are unusable
fn usable_slope(slope: &f64) -> bool {
    slope.is_finite() && *slope != 0.0
}

fn normalize_separators(value: &str) -> PathBuf {
    PathBuf::from(value.replace('/', std::path::MAIN_SEPARATOR_STR))
}
