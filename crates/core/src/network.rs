//! Bringing the network interface up and down within a bounded budget.

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::devices::{Hardware, LinkStatus, NetworkInterface};
use crate::error_record::FailureCause;
use crate::session::{CycleError, Session};

impl<H: Hardware> Session<H> {
    /// Activate the interface and wait for it to associate.
    ///
    /// The status is polled at most `association_attempts` times. Anything but
    /// [`LinkStatus::Up`] at the end fails the cycle.
    pub(crate) fn bring_network_up(&mut self) -> Result<(), CycleError> {
        let settings = &self.config.network;
        let (ssid, password) = (settings.ssid, settings.password);
        let (attempts, poll_ms) = (settings.association_attempts, settings.association_poll_ms);

        self.checkpoint(Checkpoint::NetworkActivate);
        if let Err(error) = self.network.activate(ssid, password) {
            warn!("Could not activate the network interface: {error:?}");
            return Err(self.fail(FailureCause::NetworkConnect));
        }
        self.checkpoint(Checkpoint::NetworkAssociate);

        let mut status = self.network.status();
        let mut remaining = attempts;
        while !status.is_settled() && remaining > 0 {
            remaining -= 1;
            self.checkpoint(Checkpoint::NetworkWait);
            self.delay.delay_ms(poll_ms);
            status = self.network.status();
            debug!("Network status {status:?}");
        }
        self.checkpoint(Checkpoint::NetworkStatus);

        if status != LinkStatus::Up {
            warn!("Could not join {ssid}: {status:?}");
            return Err(self.fail(FailureCause::NetworkConnect));
        }

        info!("Joined {ssid}");
        Ok(())
    }

    /// Disassociate and power down the radio
    pub(crate) fn bring_network_down(&mut self) -> Result<(), CycleError> {
        match self.network.deactivate() {
            Ok(()) => {
                debug!("Network interface down");
                Ok(())
            }
            Err(error) => {
                warn!("Could not deactivate the network interface: {error:?}");
                Err(self.fail(FailureCause::NetworkDisconnect))
            }
        }
    }
}
