//! Conversion from raw adc codes to physical units.
//!
//! The ingest path only needs [`UnitConverter`], a fixed millivolts-per-bit
//! factor. Everything else in this module is the set of per-sensor formulas,
//! each of them a [`map_range`] call with four constants of its own.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoEnumIterator};

use crate::error::CalibrationError;

/// Resolution of the adc boards, in bits.
pub const ADC_RESOLUTION_BITS: u32 = 16;

/// Highest code of an unsigned 16 bit conversion.
pub const ADC_FULL_RANGE: f64 = ((1u32 << ADC_RESOLUTION_BITS) - 1) as f64;

/// Millivolts per bit for a 16 bit signed conversion at gain 1 (+/-4.096 V).
pub const DEFAULT_SCALE_FACTOR: f64 = 0.125;

/// Map `value` linearly from `[src_min, src_max]` onto `[dst_min, dst_max]`.
///
/// Values outside the source range are extrapolated, not clamped.
pub fn map_range(
    value: f64,
    src_min: f64,
    src_max: f64,
    dst_min: f64,
    dst_max: f64,
) -> Result<f64, CalibrationError> {
    for x in [value, src_min, src_max, dst_min, dst_max] {
        if !x.is_finite() {
            return Err(CalibrationError::NonFinite(x));
        }
    }

    if src_max == src_min {
        return Err(CalibrationError::DegenerateRange(src_min));
    }

    Ok((value - src_min) / (src_max - src_min) * (dst_max - dst_min) + dst_min)
}

/// Converts raw adc codes into millivolts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConverter {
    scale_factor: f64,
}

impl Default for UnitConverter {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
        }
    }
}

impl UnitConverter {
    pub fn new(scale_factor: f64) -> Result<Self, CalibrationError> {
        if !scale_factor.is_finite() {
            return Err(CalibrationError::NonFinite(scale_factor));
        }

        Ok(Self { scale_factor })
    }

    /// Derive the factor from the device resolution and the full-scale voltage.
    ///
    /// A signed conversion of `resolution_bits` bits spans `2^(bits-1)` codes on
    /// each side of zero, so 16 bits at 4096 mV gives 0.125 mV per bit.
    pub fn from_adc(resolution_bits: u32, full_scale_mv: f64) -> Result<Self, CalibrationError> {
        if resolution_bits == 0 || resolution_bits > 32 {
            return Err(CalibrationError::DegenerateRange(resolution_bits as f64));
        }

        let codes = (1u64 << (resolution_bits - 1)) as f64;
        Self::new(full_scale_mv / codes)
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Raw adc code to millivolts.
    #[inline]
    pub fn to_physical_units(&self, raw_value: i64) -> f64 {
        raw_value as f64 * self.scale_factor
    }
}

/// Analog sensors wired to the adc boards.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumCount,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// MQ131 ozone sensor.
    Mq131,
    /// MQ9 carbon monoxide and combustible gas sensor.
    Mq9,
    Magnetometer,
    SoilPh,
    WaterPh,
    SoilConductivity,
    WaterConductivity,
}

/// Output voltage range of a sensor and the physical range it corresponds to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorProfile {
    pub voltage_min: f64,
    pub voltage_max: f64,
    pub unit_min: f64,
    pub unit_max: f64,
    pub unit: &'static str,
}

// Only the gas sensors have datasheet values, the rest are placeholders
// until the boards are characterised.
const MQ131: SensorProfile = SensorProfile {
    voltage_min: 0.0,
    voltage_max: 5.0,
    unit_min: 0.01,
    unit_max: 2.0,
    unit: "ppm",
};

const MQ9: SensorProfile = SensorProfile {
    voltage_min: 0.0,
    voltage_max: 5.0,
    unit_min: 10.0,
    unit_max: 1000.0,
    unit: "ppm",
};

const MAGNETOMETER: SensorProfile = SensorProfile {
    voltage_min: 0.0,
    voltage_max: 3.0,
    unit_min: 0.0,
    unit_max: 1.0,
    unit: "T",
};

const PH: SensorProfile = SensorProfile {
    voltage_min: 0.0,
    voltage_max: 3.0,
    unit_min: 0.0,
    unit_max: 14.0,
    unit: "pH",
};

const CONDUCTIVITY: SensorProfile = SensorProfile {
    voltage_min: 0.0,
    voltage_max: 3.0,
    unit_min: 0.0,
    unit_max: 1000.0,
    unit: "uS/cm",
};

impl SensorKind {
    pub fn profile(&self) -> SensorProfile {
        match self {
            SensorKind::Mq131 => MQ131,
            SensorKind::Mq9 => MQ9,
            SensorKind::Magnetometer => MAGNETOMETER,
            SensorKind::SoilPh | SensorKind::WaterPh => PH,
            SensorKind::SoilConductivity | SensorKind::WaterConductivity => CONDUCTIVITY,
        }
    }

    pub fn all() -> impl Iterator<Item = SensorKind> {
        SensorKind::iter()
    }
}

impl SensorProfile {
    /// Sensor output voltage to the adc code it reads as, truncated toward zero.
    ///
    /// Voltages outside the sensor range give codes outside `[0, ADC_FULL_RANGE]`,
    /// they are not clamped.
    pub fn voltage_to_adc(&self, voltage: f64) -> Result<i64, CalibrationError> {
        if !voltage.is_finite() {
            return Err(CalibrationError::NonFinite(voltage));
        }
        if self.voltage_max == 0.0 {
            return Err(CalibrationError::DegenerateRange(self.voltage_max));
        }

        let code = ADC_FULL_RANGE / self.voltage_max * voltage;
        Ok(code.trunc() as i64)
    }

    /// Adc code to the physical unit.
    pub fn adc_to_unit(&self, adc: f64) -> Result<f64, CalibrationError> {
        map_range(adc, 0.0, ADC_FULL_RANGE, self.unit_min, self.unit_max)
    }

    /// Adc code back to the sensor output voltage.
    pub fn adc_to_voltage(&self, adc: f64) -> Result<f64, CalibrationError> {
        map_range(adc, 0.0, ADC_FULL_RANGE, 0.0, self.voltage_max)
    }

    /// Sensor output voltage straight to the physical unit.
    pub fn voltage_to_unit(&self, voltage: f64) -> Result<f64, CalibrationError> {
        map_range(
            voltage,
            self.voltage_min,
            self.voltage_max,
            self.unit_min,
            self.unit_max,
        )
    }
}
