//! GNSS-only steps.

use embedded_hal_1::delay::DelayNs;

use super::{Role, SubsystemController, BOOT_FROM_DDR};
use crate::chip::ChipId;
use crate::handshake::SharedBootHandshake;
use crate::platform::Diagnostics;
use crate::regs::map::{wcn_aon_apb, wcn_gnss_ahb};
use crate::regs::{RegisterBlock, RegisterIoError};
use crate::Error;

impl SubsystemController<'_> {
    /// DDR boot with the GNSS window offset relative to BTWF's base.
    pub(super) fn gnss_boot_from_ddr(&self) -> Result<(), RegisterIoError> {
        use wcn_gnss_ahb::boot_ctrl as reg;

        let ddr_offset = self.config.ddr_offset;
        RegisterBlock::new(self.regs, wcn_gnss_ahb::BLOCK).modify(reg::OFFSET, |v| {
            let v = reg::BOOT_SOURCE.replace(v, BOOT_FROM_DDR);
            reg::DDR_OFFSET.replace(v, ddr_offset)
        })?;
        Ok(())
    }

    /// Forced deep sleep through GNSS's own control bit.
    ///
    /// There is nothing behind this fallback: if it fails the firmware is
    /// wedged and a dump is requested.
    pub(super) fn gnss_force_deep_sleep<D: DelayNs>(
        &self,
        delay: &mut D,
        diagnostics: &dyn Diagnostics,
        reason: &'static str,
    ) -> Result<(), Error> {
        use wcn_aon_apb::gnss_ctrl as ctrl;

        warn!("{}, forcing GNSS deep sleep", reason);
        self.set_ctrl(ctrl::FORCE_DEEP_SLEEP.mask(), true)?;

        let confirmed = self.poll_deepsleep(delay).and_then(|_| self.poll_shutdown(delay));
        match confirmed {
            Ok(_) => Ok(()),
            Err(err) if err.is_timeout() => {
                error!("GNSS forced deep sleep failed: {}", reason);
                diagnostics.request_assert(Role::Gnss, reason);
                Err(Error::Fatal { role: Role::Gnss, reason })
            }
            Err(err) => Err(err),
        }
    }

    /// The firmware selects its variant from the platform chip id.
    pub(super) fn gnss_pre_boot(&self, handshake: &SharedBootHandshake<'_>, chip: ChipId) -> Result<(), Error> {
        debug!("Passing chip id {} to GNSS", chip);
        handshake.write_chip_id(&chip)?;
        Ok(())
    }

    pub(super) fn gnss_post_boot(&self) {
        if !self.is_calibrated() {
            info!("GNSS calibration done");
            self.update(|s| s.calibrated = true);
        }
    }
}
