//! # Serial Communication Module
//!
//! Handles the USB serial link to the Arduino.
//!
//! This module handles:
//! - Finding the Arduino among enumerated ports by USB serial number
//! - Opening the port at 9600 baud, 8N1
//! - Framing the byte stream into lines ([`codec`])
//! - Decoding lines into telemetry packets ([`packet`])

pub mod codec;
pub mod packet;

use log::{debug, info};
use tokio_serial::{SerialPortBuilderExt, SerialPortType};

use crate::config::SerialSettings;
use crate::error::SerialError;

pub use packet::{PacketDecoder, TelemetryPacket};

/// Open serial link to the Arduino
pub struct ArduinoSerial {
    port: tokio_serial::SerialStream,
    device_path: String,
}

impl std::fmt::Debug for ArduinoSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArduinoSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl ArduinoSerial {
    /// Locate the device whose USB serial number matches the settings and
    /// open it
    pub fn open(settings: &SerialSettings) -> Result<Self, SerialError> {
        let device_path = find_device(&settings.usb_serial_number)?;
        let port = Self::open_port(&device_path, settings.baud_rate)?;
        info!("Opened Arduino at {}", device_path);

        Ok(ArduinoSerial { port, device_path })
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream, SerialError> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| SerialError::Open {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Hand over the raw port, e.g. to [`crate::ingest::run_ingest`]
    pub fn into_port(self) -> tokio_serial::SerialStream {
        self.port
    }
}

/// Find the port path of the USB device with the given serial number
pub fn find_device(usb_serial_number: &str) -> Result<String, SerialError> {
    let ports =
        tokio_serial::available_ports().map_err(|e| SerialError::Enumerate(e.to_string()))?;

    let candidates = ports.iter().map(|port| {
        let serial_number = match &port.port_type {
            SerialPortType::UsbPort(usb) => usb.serial_number.as_deref(),
            _ => None,
        };
        debug!("Found port {} (USB serial {:?})", port.port_name, serial_number);
        (port.port_name.as_str(), serial_number)
    });

    select_port(candidates, usb_serial_number)
        .ok_or_else(|| SerialError::DeviceNotFound(usb_serial_number.to_string()))
}

/// First port whose USB serial number equals `wanted`
fn select_port<'a>(
    candidates: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    wanted: &str,
) -> Option<String> {
    candidates
        .into_iter()
        .find(|(_, serial_number)| *serial_number == Some(wanted))
        .map(|(name, _)| name.to_string())
}
