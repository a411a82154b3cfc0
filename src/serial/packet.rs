/// Decoding of Arduino telemetry packets
///
/// One packet is one ASCII line of comma-separated numbers:
/// - Field 0: Main battery voltage (V)
/// - Field 1: Main battery amperage (A)
/// - Field 2: Aux battery voltage (V)
/// - Field 3: DHT11 temperature
/// - Field 4: Arduino uptime (s)
/// - Field 5: RFM95 signal strength (dBm)
///
/// Each packet fans out to six sensor tables; uptime only feeds the status
/// display.
use crate::config::{Calibration, ChargeCalibration};
use crate::error::PacketError;
use crate::models::{SensorAddress, SensorWrite};

pub const PACKET_FIELD_COUNT: usize = 6;

// Destination tables for the six persisted values
const MAIN_BATTERY_VOLTAGE: (&str, &str) = ("main_battery", "voltage");
const MAIN_BATTERY_AMPERAGE: (&str, &str) = ("main_battery", "amperage");
const MAIN_BATTERY_CHARGE: (&str, &str) = ("main_battery", "amp_hours");
const AUX_BATTERY_VOLTAGE: (&str, &str) = ("aux_battery", "voltage");
const TEMPERATURE: (&str, &str) = ("dht11", "temperature");
const SIGNAL_STRENGTH: (&str, &str) = ("rfm95", "rssi");

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPacket {
    pub main_battery_voltage: f64,
    pub main_battery_amperage: f64,
    pub aux_battery_voltage: f64,
    pub temperature: f64,
    pub uptime: f64,
    pub rssi: f64,
    pub main_battery_charge: f64,
    /// Computed but not persisted
    pub aux_battery_charge: f64,
}

impl TelemetryPacket {
    /// The six table writes for this packet, in packet order
    pub fn writes(&self) -> Vec<SensorWrite> {
        [
            (MAIN_BATTERY_VOLTAGE, self.main_battery_voltage),
            (MAIN_BATTERY_AMPERAGE, self.main_battery_amperage),
            (MAIN_BATTERY_CHARGE, self.main_battery_charge),
            (AUX_BATTERY_VOLTAGE, self.aux_battery_voltage),
            (TEMPERATURE, self.temperature),
            (SIGNAL_STRENGTH, self.rssi),
        ]
        .into_iter()
        .map(|((schema, table), value)| SensorWrite {
            target: SensorAddress::new(schema, table),
            value,
        })
        .collect()
    }
}

/// Estimate state of charge from voltage, truncated (not rounded) to two
/// decimal places
pub fn charge_percentage(voltage: f64, calibration: &ChargeCalibration) -> f64 {
    let percentage = ((voltage - calibration.offset) / calibration.slope) * 100.0;
    (percentage * 100.0).trunc() / 100.0
}

#[derive(Debug, Clone, Default)]
pub struct PacketDecoder {
    calibration: Calibration,
}

impl PacketDecoder {
    pub fn new(calibration: Calibration) -> Self {
        PacketDecoder { calibration }
    }

    pub fn decode(&self, line: &str) -> Result<TelemetryPacket, PacketError> {
        let fields: Vec<&str> = line.trim().split(',').collect();
        if fields.len() != PACKET_FIELD_COUNT {
            return Err(PacketError::FieldCount {
                expected: PACKET_FIELD_COUNT,
                actual: fields.len(),
            });
        }

        let mut values = [0.0f64; PACKET_FIELD_COUNT];
        for (index, field) in fields.iter().enumerate() {
            values[index] = parse_field(index, field)?;
        }

        let [main_voltage, main_amperage, aux_voltage, temperature, uptime, rssi] = values;

        Ok(TelemetryPacket {
            main_battery_voltage: main_voltage,
            main_battery_amperage: main_amperage,
            aux_battery_voltage: aux_voltage,
            temperature,
            uptime,
            rssi,
            main_battery_charge: charge_percentage(main_voltage, &self.calibration.main_battery),
            aux_battery_charge: charge_percentage(aux_voltage, &self.calibration.aux_battery),
        })
    }
}

fn parse_field(index: usize, field: &str) -> Result<f64, PacketError> {
    let invalid = || PacketError::InvalidField {
        index,
        value: field.to_string(),
    };

    let value: f64 = field.trim().parse().map_err(|_| invalid())?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid())
    }
}
