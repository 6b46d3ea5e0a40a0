//! Adapters from the ESP32-C6 peripherals to the node's device interfaces.

use core::convert::Infallible;

use esp_hal::analog::adc::{Adc, AdcCalScheme, AdcPin};
use esp_hal::gpio::{Input, Output};
use esp_hal::peripherals::ADC1;
use esp_hal::reset::{self, SocResetReason};
use esp_hal::rtc_cntl::{Rtc, RwdtStage};
use esp_hal::time::{now, Duration};
use log::{debug, info};
use scopeguard::defer;
use temperature_node_core::devices::{PowerControl, PrimaryClock, SupplyMonitor};
use temperature_node_core::watchdog::WatchdogTimer;
use temperature_node_core::ResetReason;
use thiserror::Error;
use time::{OffsetDateTime, PrimitiveDateTime};
use uom::si::electric_potential::volt;
use uom::si::f32::ElectricPotential;

/// Full scale of the 12 bit ADC at 11 dB attenuation, in volts
const ADC_FULL_SCALE_VOLTS: f32 = 3.3;

/// Largest raw ADC reading
const ADC_MAX: f32 = 4095.0;

/// Ratio of the supply voltage divider
const SUPPLY_DIVIDER: f32 = 2.0;

/// Time for the divider to settle after it has been switched in
const DIVIDER_SETTLE: Duration = Duration::millis(2);

/// The RTC watchdog. It survives a CPU reset, so a hang always ends in a reboot.
pub struct RtcWatchdog {
    rtc: Rtc<'static>,
    timeout: Duration,
}

impl RtcWatchdog {
    pub fn new(rtc: Rtc<'static>, timeout_ms: u32) -> Self {
        Self {
            rtc,
            timeout: Duration::millis(u64::from(timeout_ms)),
        }
    }
}

impl WatchdogTimer for RtcWatchdog {
    fn enable(&mut self) {
        self.rtc.rwdt.set_timeout(RwdtStage::Stage0, self.timeout);
        self.rtc.rwdt.enable();
    }

    fn disable(&mut self) {
        self.rtc.rwdt.disable();
    }

    fn feed(&mut self) {
        self.rtc.rwdt.feed();
    }

    fn reset_reason(&self) -> ResetReason {
        match reset::reset_reason() {
            Some(SocResetReason::ChipPowerOn) => ResetReason::PowerOn,
            Some(
                SocResetReason::CoreMwdt0
                | SocResetReason::CoreMwdt1
                | SocResetReason::CoreRtcWdt
                | SocResetReason::Cpu0Mwdt0
                | SocResetReason::Cpu0Mwdt1
                | SocResetReason::Cpu0RtcWdt
                | SocResetReason::SysRtcWdt
                | SocResetReason::SysSuperWdt,
            ) => ResetReason::Watchdog,
            Some(SocResetReason::CoreSw | SocResetReason::Cpu0Sw) => ResetReason::Software,
            _ => ResetReason::Other,
        }
    }
}

/// The processor clock: the time since boot plus the offset set from a real clock
#[derive(Default)]
pub struct SystemClock {
    /// Unix time in microseconds at boot
    epoch_micros: i64,
}

impl PrimaryClock for SystemClock {
    type Error = Infallible;

    fn now(&self) -> PrimitiveDateTime {
        let micros = self.epoch_micros + now().ticks() as i64;
        let utc = OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        PrimitiveDateTime::new(utc.date(), utc.time())
    }

    fn set(&mut self, datetime: PrimitiveDateTime) -> Result<(), Self::Error> {
        let micros = datetime.assume_utc().unix_timestamp_nanos() / 1_000;
        self.epoch_micros = micros as i64 - now().ticks() as i64;
        debug!("System clock set to {datetime}");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SupplyError {
    #[error("The ADC conversion failed.")]
    Conversion,
}

/// Measures the supply through a divider that is only switched in while reading
pub struct SupplyAdc<PIN, CS> {
    adc: Adc<'static, ADC1>,
    pin: AdcPin<PIN, ADC1, CS>,
    enable: Output<'static>,
}

impl<PIN, CS> SupplyAdc<PIN, CS> {
    pub fn new(adc: Adc<'static, ADC1>, pin: AdcPin<PIN, ADC1, CS>, enable: Output<'static>) -> Self {
        Self { adc, pin, enable }
    }
}

impl<PIN, CS> SupplyMonitor for SupplyAdc<PIN, CS>
where
    PIN: esp_hal::analog::adc::AdcChannel,
    CS: AdcCalScheme<ADC1>,
{
    type Error = SupplyError;

    fn read(&mut self) -> Result<ElectricPotential, Self::Error> {
        let Self { adc, pin, enable } = self;

        enable.set_high();
        defer! {
            enable.set_low();
        }

        let deadline = now() + DIVIDER_SETTLE;
        while now() < deadline {}

        let raw = nb::block!(adc.read_oneshot(pin)).map_err(|_| SupplyError::Conversion)?;
        let volts = f32::from(raw) / ADC_MAX * ADC_FULL_SCALE_VOLTS * SUPPLY_DIVIDER;
        Ok(ElectricPotential::new::<volt>(volts))
    }
}

/// The power latch and the wake buttons
pub struct PowerLatch {
    latch: Output<'static>,
    buttons: [Input<'static>; 2],
}

impl PowerLatch {
    /// Takes over the latch and holds the power on
    pub fn new(mut latch: Output<'static>, buttons: [Input<'static>; 2]) -> Self {
        latch.set_high();
        Self { latch, buttons }
    }
}

impl PowerControl for PowerLatch {
    fn power_off(&mut self) {
        info!("Releasing the power latch");
        self.latch.set_low();
    }

    fn wake_requested(&mut self) -> bool {
        self.buttons.iter().any(|button| button.is_high())
    }

    fn restart(&mut self) -> ! {
        reset::software_reset();

        loop {
            // Trick the compiler into thinking we're still here ...
        }
    }
}
