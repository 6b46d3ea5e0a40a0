//! Microchip MCP9808 digital temperature sensor, default configuration.

use core::fmt::Debug;

use embedded_hal::i2c::I2c;
use log::{debug, info};
use thiserror::Error;
use uom::si::f64::ThermodynamicTemperature as Temperature;
use uom::si::thermodynamic_temperature::degree_celsius;

use crate::devices::TemperatureSensor;

/// Address with A0 to A2 tied low
pub const DEFAULT_ADDRESS: u8 = 0x18;

const REG_AMBIENT_TEMPERATURE: u8 = 0x05;
const REG_MANUFACTURER_ID: u8 = 0x06;
const REG_DEVICE_ID: u8 = 0x07;

const MANUFACTURER_ID: u16 = 0x0054;
const DEVICE_ID: u16 = 0x0400;

/// Ambient temperature bits, without the alert flags
const TEMPERATURE_MASK: u16 = 0x1fff;
const SIGN_BIT: u16 = 0x1000;

/// Errors of the MCP9808 driver
#[derive(Debug, Error)]
pub enum Mcp9808Error<E: Debug> {
    /// Error from I²C bus
    #[error("I2C error: {0:?}")]
    I2c(E),

    /// The device at the address is not made by Microchip
    #[error("Unexpected manufacturer ID 0x{0:04x}.")]
    UnexpectedManufacturer(u16),

    /// The device at the address is not an MCP9808
    #[error("Unexpected device ID 0x{0:04x}.")]
    UnexpectedDevice(u16),
}

/// The MCP9808 temperature sensor
pub struct Mcp9808<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Mcp9808<I> {
    /// Connect to the sensor and verify its identity
    pub fn new(i2c: I, address: u8) -> Result<Self, Mcp9808Error<I::Error>> {
        let mut sensor = Self { i2c, address };

        let manufacturer = sensor.read_register(REG_MANUFACTURER_ID)?;
        if manufacturer != MANUFACTURER_ID {
            return Err(Mcp9808Error::UnexpectedManufacturer(manufacturer));
        }

        let device = sensor.read_register(REG_DEVICE_ID)?;
        if device != DEVICE_ID {
            return Err(Mcp9808Error::UnexpectedDevice(device));
        }

        info!("Found MCP9808 at 0x{address:02x}");
        Ok(sensor)
    }

    pub fn release(self) -> I {
        self.i2c
    }

    fn read_register(&mut self, register: u8) -> Result<u16, Mcp9808Error<I::Error>> {
        let mut bytes = [0_u8; 2];
        self.i2c
            .write_read(self.address, &[register], &mut bytes)
            .map_err(Mcp9808Error::I2c)?;
        Ok(u16::from_be_bytes(bytes))
    }
}

/// Convert the ambient temperature register to degrees Celsius.
///
/// The lower 13 bits hold a two's complement value in sixteenths of a degree.
pub fn raw_to_celsius(raw: u16) -> f64 {
    let value = raw & TEMPERATURE_MASK;
    if value & SIGN_BIT != 0 {
        f64::from(value & 0x0fff) / 16.0 - 256.0
    } else {
        f64::from(value) / 16.0
    }
}

impl<I: I2c> TemperatureSensor for Mcp9808<I> {
    type Error = Mcp9808Error<I::Error>;

    fn read(&mut self) -> Result<Temperature, Self::Error> {
        let raw = self.read_register(REG_AMBIENT_TEMPERATURE)?;
        let celsius = raw_to_celsius(raw);
        debug!("MCP9808 raw 0x{raw:04x} is {celsius:.4} C");
        Ok(Temperature::new::<degree_celsius>(celsius))
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;

    use super::*;
    use crate::drivers::fake_bus::FakeBus;

    fn genuine() -> FakeBus {
        FakeBus::new(DEFAULT_ADDRESS)
            .with(REG_MANUFACTURER_ID, &[0x00, 0x54])
            .with(REG_DEVICE_ID, &[0x04, 0x00])
    }

    #[test]
    fn test_positive_temperatures() {
        assert!(approx_eq!(f64, raw_to_celsius(0x0194), 25.25, ulps = 2));
        assert!(approx_eq!(f64, raw_to_celsius(0x0000), 0.0, ulps = 2));
        assert!(approx_eq!(f64, raw_to_celsius(0x0001), 0.0625, ulps = 2));
    }

    #[test]
    fn test_negative_temperatures() {
        assert!(approx_eq!(f64, raw_to_celsius(0x1ff0), -1.0, ulps = 2));
        assert!(approx_eq!(f64, raw_to_celsius(0x1e00), -32.0, ulps = 2));
    }

    #[test]
    fn test_alert_flags_are_ignored() {
        assert!(approx_eq!(f64, raw_to_celsius(0xe194), 25.25, ulps = 2));
    }

    #[test]
    fn test_read_returns_celsius() {
        let bus = genuine().with(REG_AMBIENT_TEMPERATURE, &[0xc1, 0x41]);
        let mut sensor = Mcp9808::new(bus, DEFAULT_ADDRESS).unwrap();

        let temperature = sensor.read().unwrap().get::<degree_celsius>();

        assert!(approx_eq!(f64, temperature, 20.0625, epsilon = 0.0001));
    }

    #[test]
    fn test_wrong_manufacturer_is_rejected() {
        let bus = genuine().with(REG_MANUFACTURER_ID, &[0x00, 0x55]);
        assert!(matches!(
            Mcp9808::new(bus, DEFAULT_ADDRESS),
            Err(Mcp9808Error::UnexpectedManufacturer(0x0055))
        ));
    }

    #[test]
    fn test_wrong_device_is_rejected() {
        let bus = genuine().with(REG_DEVICE_ID, &[0x04, 0x01]);
        assert!(matches!(
            Mcp9808::new(bus, DEFAULT_ADDRESS),
            Err(Mcp9808Error::UnexpectedDevice(0x0401))
        ));
    }

    #[test]
    fn test_missing_device_is_a_bus_error() {
        assert!(matches!(
            Mcp9808::new(genuine(), 0x19),
            Err(Mcp9808Error::I2c(_))
        ));
    }
}
