//! BTWF-only steps.

use embedded_hal_1::delay::DelayNs;

use super::{SubsystemController, BOOT_FROM_DDR};
use crate::handshake::{magic, SharedBootHandshake, CALI_BLOB_LEN};
use crate::platform::CalibrationStore;
use crate::regs::map::wcn_btwf_ahb;
use crate::regs::{RegisterBlock, RegisterIoError};
use crate::Error;

impl SubsystemController<'_> {
    pub(super) fn btwf_boot_from_ddr(&self) -> Result<(), RegisterIoError> {
        use wcn_btwf_ahb::boot_ctrl as reg;

        RegisterBlock::new(self.regs, wcn_btwf_ahb::BLOCK).modify(reg::OFFSET, |v| {
            reg::BOOT_SOURCE.replace(v, BOOT_FROM_DDR)
        })?;
        Ok(())
    }

    /// AON-top forced deep sleep. BTWF shutdown goes ahead whatever happens.
    pub(super) fn btwf_force_deep_sleep<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        warn!("BTWF did not reach deep sleep, forcing it from AON top");
        self.aon().set_btwf_force_deep_sleep(true)?;
        if let Err(err) = self.poll_deepsleep(delay) {
            if !err.is_timeout() {
                return Err(err);
            }
            warn!("BTWF forced deep sleep not confirmed, continuing shutdown");
        }
        Ok(())
    }

    /// AON-top forced shutdown. Best effort, like the deep-sleep fallback.
    pub(super) fn btwf_force_shutdown<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        warn!("BTWF did not shut down, forcing it from AON top");
        self.aon().set_btwf_force_shutdown(true)?;
        if let Err(err) = self.poll_shutdown(delay) {
            if !err.is_timeout() {
                return Err(err);
            }
            warn!("BTWF forced shutdown not confirmed, continuing");
        }
        Ok(())
    }

    /// Hand the saved WiFi calibration to the firmware on the first boot.
    pub(super) fn btwf_pre_boot(
        &self,
        handshake: &SharedBootHandshake<'_>,
        calibration: &dyn CalibrationStore,
    ) -> Result<(), Error> {
        if self.is_calibrated() {
            return Ok(());
        }

        let mut blob = [0u8; CALI_BLOB_LEN];
        if !calibration.load(&mut blob) {
            debug!("No saved WiFi calibration, firmware starts from scratch");
        }
        handshake.write_wifi_calibration(&blob)?;
        handshake.set_wifi_cali_flag(magic::WIFI_CALI_REQUEST)?;
        debug!("WiFi calibration requested");
        Ok(())
    }

    /// Persist fresh calibration results and acknowledge the boot.
    pub(super) fn btwf_post_boot(
        &self,
        handshake: &SharedBootHandshake<'_>,
        calibration: &dyn CalibrationStore,
    ) -> Result<(), Error> {
        if !self.is_calibrated() {
            let mut blob = [0u8; CALI_BLOB_LEN];
            handshake.read_wifi_calibration(&mut blob)?;
            calibration.save(&blob);
            handshake.set_wifi_cali_flag(magic::WIFI_CALI_CLEAR)?;
            self.update(|s| s.calibrated = true);
            info!("WiFi calibration saved");
        }
        handshake.set_init_status(magic::INIT_SUCCESS)?;
        Ok(())
    }
}
