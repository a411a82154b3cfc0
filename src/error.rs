//! Error types for every layer of the telemetry pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Problems loading `settings.txt`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed settings line {line}: '{content}' (expected key=value)")]
    Malformed { line: usize, content: String },

    #[error("Required setting '{0}' is missing")]
    Missing(String),

    #[error("Setting '{key}' has invalid value '{value}'")]
    Invalid { key: String, value: String },
}

/// Problems loading the XML parameter (topology) file
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Failed to read parameter file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Section '{0}' not found in parameter file")]
    MissingSection(String),

    #[error("Element '{element}' is missing attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },

    #[error("Attribute '{attribute}' of '{element}' is not a number: '{value}'")]
    InvalidBound {
        element: String,
        attribute: String,
        value: String,
    },

    #[error("Sensor '{0}' is defined more than once")]
    DuplicateSensor(String),
}

/// Reasons a serial line is rejected by the packet decoder
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PacketError {
    #[error("Expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("Field {index} is not a number: '{value}'")]
    InvalidField { index: usize, value: String },
}

/// Serial device discovery and I/O failures
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("No serial device with USB serial number '{0}' found")]
    DeviceNotFound(String),

    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(String),

    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database gateway failures
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Invalid connection settings: {0}")]
    Settings(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Connection failed after {attempts} attempt(s): {source}")]
    Connect {
        attempts: u32,
        source: tokio_postgres::Error,
    },

    #[error("Query on {target} failed: {source}")]
    Query {
        target: String,
        source: tokio_postgres::Error,
    },

    #[error("Invalid sensor address '{0}' (expected schema.table)")]
    Address(String),
}

/// Admin tool failures (backup, restore, export, daemon control)
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Setting '{0}' is required for this command")]
    MissingSetting(&'static str),

    #[error("Expected exactly one backup in {dir}, found {count}")]
    StagedBackupCount { dir: PathBuf, count: usize },

    #[error("Command '{command}' failed: {status}")]
    CommandFailed { command: String, status: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Database(#[from] DbError),
}

/// Top-level error type gathering every layer
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Parameters(#[from] ParameterError),

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Admin(#[from] AdminError),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
