use chrono::{DateTime, Utc};

use crate::calibration::UnitConverter;

/// One row of a published batch, as sent by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    /// Adc board the reading comes from.
    pub sensor_group: u32,

    /// Input line on the adc board.
    pub channel: u32,

    pub timestamp: DateTime<Utc>,

    /// Adc code, in device resolution units.
    pub raw_value: i64,
}

/// A `Reading` with its raw value replaced by millivolts.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedReading {
    pub sensor_group: u32,
    pub channel: u32,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Reading {
    pub fn new(sensor_group: u32, channel: u32, timestamp: DateTime<Utc>, raw_value: i64) -> Self {
        Self {
            sensor_group,
            channel,
            timestamp,
            raw_value,
        }
    }

    pub fn convert(&self, converter: &UnitConverter) -> ConvertedReading {
        ConvertedReading {
            sensor_group: self.sensor_group,
            channel: self.channel,
            timestamp: self.timestamp,
            value: converter.to_physical_units(self.raw_value),
        }
    }
}
