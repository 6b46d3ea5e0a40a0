//! NXP PCF85063A real time clock: BCD date and time, a daily alarm and one byte of
//! battery backed RAM.

use core::fmt::Debug;

use embedded_hal::i2c::I2c;
use log::debug;
use thiserror::Error;
use time::{Date, Month, PrimitiveDateTime, Time};

use crate::devices::BackupClock;

pub const ADDRESS: u8 = 0x51;

const REG_CONTROL_1: u8 = 0x00;
const REG_CONTROL_2: u8 = 0x01;
const REG_RAM_BYTE: u8 = 0x03;
const REG_SECONDS: u8 = 0x04;
const REG_SECOND_ALARM: u8 = 0x0b;
const REG_TIMER_MODE: u8 = 0x11;

/// Control_2: alarm interrupt enable
const AIE: u8 = 0x80;
/// Control_2: alarm flag
const AF: u8 = 0x40;
/// Timer_mode: timer interrupt enable
const TIE: u8 = 0x02;
/// Seconds: oscillator stopped
const OS: u8 = 0x80;
/// Alarm registers: alarm disabled for this field
const ALARM_DISABLED: u8 = 0x80;

/// Errors of the PCF85063A driver
#[derive(Debug, Error)]
pub enum Pcf85063aError<E: Debug> {
    /// Error from I²C bus
    #[error("I2C error: {0:?}")]
    I2c(E),

    /// The time registers do not hold a valid date and time
    #[error("The clock does not hold a valid date and time.")]
    InvalidDateTime,
}

/// The PCF85063A clock
pub struct Pcf85063a<I> {
    i2c: I,
}

impl<I: I2c> Pcf85063a<I> {
    /// Take over the clock, make sure it is running and disable its timer interrupt
    pub fn new(i2c: I) -> Result<Self, Pcf85063aError<I::Error>> {
        let mut clock = Self { i2c };
        clock.write_register(REG_CONTROL_1, 0x00)?;

        let timer_mode = clock.read_register(REG_TIMER_MODE)?;
        clock.write_register(REG_TIMER_MODE, timer_mode & !TIE)?;
        Ok(clock)
    }

    pub fn release(self) -> I {
        self.i2c
    }

    fn read_register(&mut self, register: u8) -> Result<u8, Pcf85063aError<I::Error>> {
        let mut value = [0_u8];
        self.i2c
            .write_read(ADDRESS, &[register], &mut value)
            .map_err(Pcf85063aError::I2c)?;
        Ok(value[0])
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Pcf85063aError<I::Error>> {
        self.i2c
            .write(ADDRESS, &[register, value])
            .map_err(Pcf85063aError::I2c)
    }

    fn update_control_2(
        &mut self,
        update: impl FnOnce(u8) -> u8,
    ) -> Result<(), Pcf85063aError<I::Error>> {
        let control = self.read_register(REG_CONTROL_2)?;
        self.write_register(REG_CONTROL_2, update(control))
    }
}

fn from_bcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0f)
}

fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Decode the seven time registers, seconds first
fn decode_datetime(registers: &[u8; 7]) -> Option<PrimitiveDateTime> {
    let second = from_bcd(registers[0] & 0x7f);
    let minute = from_bcd(registers[1] & 0x7f);
    let hour = from_bcd(registers[2] & 0x3f);
    let day = from_bcd(registers[3] & 0x3f);
    let month = Month::try_from(from_bcd(registers[5] & 0x1f)).ok()?;
    let year = 2000 + i32::from(from_bcd(registers[6]));

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

/// Encode a date and time into the seven time registers. Years are kept modulo 100.
fn encode_datetime(datetime: PrimitiveDateTime) -> [u8; 7] {
    [
        to_bcd(datetime.second()),
        to_bcd(datetime.minute()),
        to_bcd(datetime.hour()),
        to_bcd(datetime.day()),
        datetime.weekday().number_days_from_sunday(),
        to_bcd(u8::from(datetime.month())),
        to_bcd(datetime.year().rem_euclid(100) as u8),
    ]
}

impl<I: I2c> BackupClock for Pcf85063a<I> {
    type Error = Pcf85063aError<I::Error>;

    fn read_datetime(&mut self) -> Result<PrimitiveDateTime, Self::Error> {
        let mut registers = [0_u8; 7];
        self.i2c
            .write_read(ADDRESS, &[REG_SECONDS], &mut registers)
            .map_err(Pcf85063aError::I2c)?;

        if registers[0] & OS != 0 {
            debug!("PCF85063A oscillator was stopped, time is not reliable");
        }
        decode_datetime(&registers).ok_or(Pcf85063aError::InvalidDateTime)
    }

    fn write_datetime(&mut self, datetime: PrimitiveDateTime) -> Result<(), Self::Error> {
        let mut frame = [0_u8; 8];
        frame[0] = REG_SECONDS;
        frame[1..].copy_from_slice(&encode_datetime(datetime));
        self.i2c.write(ADDRESS, &frame).map_err(Pcf85063aError::I2c)
    }

    fn set_alarm(&mut self, second: u8, minute: u8, hour: u8) -> Result<(), Self::Error> {
        let frame = [
            REG_SECOND_ALARM,
            to_bcd(second),
            to_bcd(minute),
            to_bcd(hour),
            ALARM_DISABLED,
            ALARM_DISABLED,
        ];
        self.i2c.write(ADDRESS, &frame).map_err(Pcf85063aError::I2c)
    }

    fn clear_alarm_flag(&mut self) -> Result<(), Self::Error> {
        self.update_control_2(|control| control & !AF)
    }

    fn enable_alarm_interrupt(&mut self, enable: bool) -> Result<(), Self::Error> {
        self.update_control_2(|control| if enable { control | AIE } else { control & !AIE })
    }

    fn get_byte(&mut self) -> Result<u8, Self::Error> {
        self.read_register(REG_RAM_BYTE)
    }

    fn set_byte(&mut self, value: u8) -> Result<(), Self::Error> {
        self.write_register(REG_RAM_BYTE, value)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::drivers::fake_bus::FakeBus;

    fn clock() -> Pcf85063a<FakeBus> {
        let bus = FakeBus::new(ADDRESS)
            .with(REG_CONTROL_2, &[0x00])
            .with(REG_TIMER_MODE, &[0x1f]);
        Pcf85063a::new(bus).unwrap()
    }

    #[test]
    fn test_new_starts_clock_and_disables_timer_interrupt() {
        let bus = clock().release();
        assert_eq!(bus.register(REG_CONTROL_1), &[0x00]);
        assert_eq!(bus.register(REG_TIMER_MODE), &[0x1d]);
    }

    #[test]
    fn test_bcd() {
        assert_eq!(to_bcd(59), 0x59);
        assert_eq!(from_bcd(0x59), 59);
        assert_eq!(to_bcd(7), 0x07);
    }

    #[test]
    fn test_reads_registers_as_datetime() {
        let mut clock = clock();
        clock
            .i2c
            .registers
            .insert(REG_SECONDS, vec![0x31, 0x27, 0x14, 0x09, 0x06, 0x03, 0x24]);

        assert_eq!(clock.read_datetime().unwrap(), datetime!(2024-03-09 14:27:31));
    }

    #[test]
    fn test_oscillator_stop_flag_is_masked() {
        let mut clock = clock();
        clock
            .i2c
            .registers
            .insert(REG_SECONDS, vec![0x80, 0x00, 0x00, 0x01, 0x06, 0x01, 0x00]);

        assert_eq!(clock.read_datetime().unwrap(), datetime!(2000-01-01 00:00:00));
    }

    #[test]
    fn test_garbage_registers_are_invalid() {
        let mut clock = clock();
        clock
            .i2c
            .registers
            .insert(REG_SECONDS, vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

        assert!(matches!(
            clock.read_datetime(),
            Err(Pcf85063aError::InvalidDateTime)
        ));
    }

    #[test]
    fn test_written_datetime_reads_back() {
        let mut clock = clock();
        let written = datetime!(2031-12-31 23:59:58);

        clock.write_datetime(written).unwrap();

        assert_eq!(
            clock.i2c.register(REG_SECONDS),
            &[0x58, 0x59, 0x23, 0x31, 0x03, 0x12, 0x31]
        );
        assert_eq!(clock.read_datetime().unwrap(), written);
    }

    #[test]
    fn test_alarm_matches_second_minute_and_hour_only() {
        let mut clock = clock();

        clock.set_alarm(0, 45, 7).unwrap();

        assert_eq!(
            clock.i2c.register(REG_SECOND_ALARM),
            &[0x00, 0x45, 0x07, 0x80, 0x80]
        );
    }

    #[test]
    fn test_alarm_flag_and_interrupt_bits() {
        let mut clock = clock();
        clock.i2c.registers.insert(REG_CONTROL_2, vec![AF | 0x01]);

        clock.clear_alarm_flag().unwrap();
        assert_eq!(clock.i2c.register(REG_CONTROL_2), &[0x01]);

        clock.enable_alarm_interrupt(true).unwrap();
        assert_eq!(clock.i2c.register(REG_CONTROL_2), &[AIE | 0x01]);

        clock.enable_alarm_interrupt(false).unwrap();
        assert_eq!(clock.i2c.register(REG_CONTROL_2), &[0x01]);
    }

    #[test]
    fn test_ram_byte_holds_checkpoint() {
        let mut clock = clock();

        clock.set_byte(0x0b).unwrap();

        assert_eq!(clock.get_byte().unwrap(), 0x0b);
    }
}
