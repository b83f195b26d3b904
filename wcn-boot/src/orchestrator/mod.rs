//! The externally callable start/stop surface.
//!
//! [`BootOrchestrator`] serializes every transition through `&mut self`,
//! keeps the per-subsystem feature masks, and decides when the shared
//! domain and rails go up or down. Physical actions only happen on the
//! empty ↔ non-empty edges of a feature mask.
//!
//! ```no_run
//! use wcn_boot::{BootOrchestrator, Config, Feature, Role};
//! # fn example(
//! #     platform: wcn_boot::Platform<'_>,
//! #     delay: impl embedded_hal_1::delay::DelayNs,
//! # ) -> Result<(), wcn_boot::Error> {
//! let mut wcn = BootOrchestrator::new(platform, delay, Config::new());
//! wcn.start(Role::Btwf, Feature::Wifi)?;
//! wcn.start(Role::Btwf, Feature::Bluetooth)?;
//! wcn.stop(Role::Btwf, Feature::Wifi)?;
//! wcn.stop(Role::Btwf, Feature::Bluetooth)?;
//! # Ok(()) }
//! ```

mod system;

pub use system::WcnSystem;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal_1::delay::DelayNs;

use crate::aon::Aon;
use crate::chip::ChipId;
use crate::feature::{Feature, FeatureMask};
use crate::firmware::ImageId;
use crate::platform::Platform;
use crate::poll::PollConfig;
use crate::power::{DomainState, PowerTiming};
use crate::regs::RegisterIoError;
use crate::subsys::{BootConfig, BootStatus, PowerState, Role, SubsystemConfig};
use crate::Error;

/// Orchestrator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub btwf: SubsystemConfig,
    pub gnss: SubsystemConfig,
    /// Register poll budget.
    pub poll: PollConfig,
    /// Firmware handshake window.
    pub boot: BootConfig,
    pub timing: PowerTiming,
    /// The board carries a GNSS subsystem.
    pub gnss_present: bool,
    /// Run the one-time GNSS calibration cycle before the first start.
    pub first_run_gnss_calibration: bool,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            btwf: SubsystemConfig::btwf(),
            gnss: SubsystemConfig::gnss(),
            poll: PollConfig::new(),
            boot: BootConfig::new(),
            timing: PowerTiming::new(),
            gnss_present: true,
            first_run_gnss_calibration: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// [`BootOrchestrator`] shared between tasks.
pub type SharedOrchestrator<'d, D> = embassy_sync::mutex::Mutex<CriticalSectionRawMutex, BootOrchestrator<'d, D>>;

/// Start/stop of subsystem features.
pub struct BootOrchestrator<'d, D: DelayNs> {
    system: WcnSystem<'d>,
    delay: D,
    config: Config,
    first_run_pending: bool,
}

impl<'d, D: DelayNs> BootOrchestrator<'d, D> {
    pub fn new(platform: Platform<'d>, delay: D, config: Config) -> Self {
        Self {
            system: WcnSystem::new(platform, &config),
            delay,
            first_run_pending: config.first_run_gnss_calibration,
            config,
        }
    }

    pub fn system(&self) -> &WcnSystem<'d> {
        &self.system
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The one-time GNSS calibration cycle has not run yet.
    pub fn first_run_pending(&self) -> bool {
        self.first_run_pending
    }

    //=========================================================================
    // Start / stop
    //=========================================================================

    /// Open `feature` on `role`, powering and booting the subsystem if it
    /// had no open feature.
    ///
    /// A [`Error::BootTimeout`] still records the feature as open: failed
    /// starts require a matching [`stop`](Self::stop) to unwind the hardware.
    pub fn start(&mut self, role: Role, feature: Feature) -> Result<(), Error> {
        self.check_request(role, feature)?;
        self.refuse_if_busy()?;
        self.show_status("before start");

        if self.first_run_pending {
            self.first_run(role)?;
        }

        let sub = self.system.subsystem(role);
        if !sub.open_features().is_empty() {
            sub.update(|s| s.open_features = s.open_features.with(feature));
            debug!("{} already up, {} joins", role.name(), feature.name());
            self.show_status("after start");
            return Ok(());
        }

        let result = self.bring_up(role, image_for(feature));
        if matches!(result, Ok(()) | Err(Error::BootTimeout { .. })) {
            self.system
                .subsystem(role)
                .update(|s| s.open_features = s.open_features.with(feature));
        }

        self.show_status("after start");
        result
    }

    /// Close `feature` on `role`, powering the subsystem down when it was the
    /// last one, and the shared domain when both subsystems are closed.
    ///
    /// The feature is closed even if the power-down reports an error; the
    /// subsystem is left off and its rail references are released.
    pub fn stop(&mut self, role: Role, feature: Feature) -> Result<(), Error> {
        self.check_request(role, feature)?;
        self.refuse_if_busy()?;
        self.show_status("before stop");

        let sub = self.system.subsystem(role);
        if !sub.open_features().contains(feature) {
            error!("{} not open on {}", feature.name(), role.name());
            return Err(Error::FeatureNotOpen { role, feature });
        }

        let remaining = sub.update(|s| {
            s.open_features = s.open_features.without(feature);
            s.open_features
        });
        if !remaining.is_empty() {
            debug!("{} still needed by {:?}", role.name(), remaining);
            self.show_status("after stop");
            return Ok(());
        }

        let result = self.tear_down(role);
        self.show_status("after stop");
        result
    }

    /// Close every open feature of both subsystems.
    pub fn power_off_all(&mut self) -> Result<(), Error> {
        info!("Powering off all subsystems");
        let mut result = Ok(());

        for role in Role::ALL {
            let sub = self.system.subsystem(role);
            if sub.open_features().is_empty() {
                continue;
            }
            sub.update(|s| s.open_features = FeatureMask::EMPTY);
            if let Err(err) = self.tear_down(role) {
                error!("{} power-off failed: {:?}", role.name(), err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Emergency power-off, e.g. after a dump: force the domain down,
    /// switch every rail off and forget all open features.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned.
    pub fn chip_power_off(&mut self) -> Result<(), Error> {
        warn!("Emergency WCN chip power-off");
        let domain = self.system.domain();

        let result = domain.force_deep_to_shutdown(&mut self.delay);
        if let Err(err) = &result {
            error!("Forcing WCN-SYS down failed: {:?}", err);
        }
        domain.release_all_rails();

        for role in Role::ALL {
            self.system.subsystem(role).reset_state();
        }
        result
    }

    //=========================================================================
    // Status
    //=========================================================================

    /// Cached software view of the shared domain.
    pub fn domain_power_state(&self) -> DomainState {
        self.system.domain().state()
    }

    /// Debounced hardware view of the shared domain.
    pub fn domain_hw_powered(&self) -> Result<bool, RegisterIoError> {
        self.system.domain().hw_powered()
    }

    pub fn power_state(&self, role: Role) -> PowerState {
        self.system.subsystem(role).power_state()
    }

    pub fn open_features(&self, role: Role) -> FeatureMask {
        self.system.subsystem(role).open_features()
    }

    pub fn boot_status(&self, role: Role) -> BootStatus {
        self.system.subsystem(role).boot_status()
    }

    pub fn chip_id(&self) -> Result<ChipId, RegisterIoError> {
        self.system.chip_id()
    }

    fn show_status(&self, when: &'static str) {
        debug!(
            "{}: btwf {:?} {:?}, gnss {:?} {:?}",
            when,
            self.power_state(Role::Btwf),
            self.open_features(Role::Btwf),
            self.power_state(Role::Gnss),
            self.open_features(Role::Gnss)
        );
    }

    //=========================================================================
    // Internals
    //=========================================================================

    fn check_request(&self, role: Role, feature: Feature) -> Result<(), Error> {
        if feature.role() != role {
            return Err(Error::FeatureRoleMismatch { role, feature });
        }
        if role == Role::Gnss && !self.config.gnss_present {
            return Err(Error::NotPresent { role });
        }
        Ok(())
    }

    fn refuse_if_busy(&self) -> Result<(), Error> {
        let diagnostics = self.system.platform().diagnostics;
        if diagnostics.dump_in_progress() {
            error!("Dump or reset in progress");
            return Err(Error::Busy);
        }
        if diagnostics.loopcheck_unrecoverable() {
            error!("Loopcheck reports an unrecoverable state");
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// GNSS firmware only calibrates on its first power cycle, so the first
    /// start of anything cycles GNSS once. When GNSS is the first request,
    /// BTWF is cycled too so that its calibration and firmware init also
    /// happen on the first start.
    ///
    /// A failure leaves the step pending for the next start; a finished
    /// GNSS calibration is not repeated.
    fn first_run(&mut self, role: Role) -> Result<(), Error> {
        let btwf = self.system.subsystem(Role::Btwf).handshake();

        if !self.config.gnss_present {
            info!("No GNSS on this board, skipping first-run calibration");
            btwf.set_include_gnss(false)?;
            self.first_run_pending = false;
            return Ok(());
        }

        btwf.set_include_gnss(true)?;
        if !self.system.subsystem(Role::Gnss).is_calibrated() {
            info!("First start: running GNSS calibration cycle");
            btwf.clear_gnss_cali_flag()?;
            self.system.subsystem(Role::Gnss).handshake().clear_gnss_cali_flag()?;
            self.transient_cycle(Role::Gnss, ImageId::Gnss)?;
            info!("First-run GNSS calibration done");
        }

        if role == Role::Gnss {
            info!("First start: running BTWF init cycle");
            self.transient_cycle(Role::Btwf, ImageId::Btwf)?;
        }

        self.first_run_pending = false;
        Ok(())
    }

    /// Boot `role` with no feature open, then power it straight back down.
    fn transient_cycle(&mut self, role: Role, image: ImageId) -> Result<(), Error> {
        match self.bring_up(role, image) {
            Ok(()) => {}
            Err(err @ Error::BootTimeout { .. }) => {
                if self.tear_down(role).is_err() {
                    warn!("Unwinding the {} first-run cycle failed", role.name());
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        }
        self.tear_down(role)
    }

    /// Load, power and boot one subsystem. Feature masks are not touched.
    ///
    /// Anything but a boot timeout leaves the hardware as it was found.
    fn bring_up(&mut self, role: Role, image: ImageId) -> Result<(), Error> {
        let sys = &self.system;
        let sub = sys.subsystem(role);
        let domain = sys.domain();
        let platform = *sys.platform();

        // The image goes in before anything else is touched.
        if let Err(err) = sys.loader().load(&mut self.delay, image, &sub.window()) {
            error!("{} image load failed: {:?}", role.name(), err);
            sub.update(|s| s.boot_status = BootStatus::ImageLoadError);
            return Err(err.into());
        }

        let chip = ChipId::read(platform.regs)?;

        domain.acquire_shared_power(&mut self.delay, role == Role::Btwf)?;

        let powered_domain = domain.state() == DomainState::Off;
        if powered_domain {
            if let Err(err) = self.domain_bring_up(role) {
                error!("WCN-SYS bring-up failed: {:?}", err);
                self.unwind_power(role, true);
                return Err(err);
            }
        }

        let sub = self.system.subsystem(role);
        match sub.boot_sync(&mut self.delay, platform.calibration, chip) {
            Ok(()) => Ok(()),
            Err(err @ Error::BootTimeout { .. }) => {
                if role == Role::Btwf {
                    platform.diagnostics.request_assert(role, "btwf boot cp timeout");
                }
                Err(err)
            }
            Err(err) => {
                error!("{} bring-up failed: {:?}", role.name(), err);
                if sub.hold_in_reset().is_err() {
                    warn!("Could not put {} back into reset", role.name());
                }
                sub.update(|s| s.power_state = PowerState::Off);
                self.unwind_power(role, powered_domain);
                Err(err)
            }
        }
    }

    /// First subsystem up: take the shared domain out of shutdown.
    fn domain_bring_up(&mut self, role: Role) -> Result<(), Error> {
        let domain = self.system.domain();
        let aon = Aon::new(self.system.platform().regs);

        // Both subsystems stay powered until the domain has settled.
        aon.set_force_unshutdown(true)?;
        domain.domain_power_up(&mut self.delay)?;
        domain.program_pll_stable_time()?;
        domain.allow_deep_sleep()?;

        // An idle GNSS would keep the domain out of deep sleep.
        if role == Role::Btwf {
            self.system.subsystem(Role::Gnss).force_deep_to_shutdown()?;
        }
        aon.set_force_unshutdown(false)?;
        Ok(())
    }

    /// Best-effort undo of a failed bring-up.
    fn unwind_power(&mut self, role: Role, powered_domain: bool) {
        let domain = self.system.domain();

        if powered_domain {
            if Aon::new(self.system.platform().regs).set_force_unshutdown(false).is_err() {
                warn!("Could not clear force-unshutdown");
            }
            if domain.domain_power_down(&mut self.delay).is_err() {
                warn!("WCN-SYS did not power down while unwinding");
            }
        }
        if domain.release_shared_power(&mut self.delay, role == Role::Btwf).is_err() {
            warn!("Releasing shared power failed while unwinding");
        }
    }

    /// Power one subsystem down; the domain and rails follow when both
    /// subsystems are closed.
    ///
    /// Every step runs even if an earlier one fails, so the subsystem always
    /// ends up off with its rail references released. The first failure is
    /// returned.
    fn tear_down(&mut self, role: Role) -> Result<(), Error> {
        let platform = *self.system.platform();
        let aon = Aon::new(platform.regs);
        let domain = self.system.domain();
        let sub = self.system.subsystem(role);
        let mut result = Ok(());

        if role == Role::Btwf && !platform.diagnostics.dump_in_progress() {
            if let Err(err) = platform.at.request_sleep(role) {
                warn!("BTWF ignored the sleep request: {:?}", err);
            }
        }

        // Subsystem registers are only reachable while the domain is awake.
        keep_first(&mut result, "Forbidding deep sleep", domain.forbid_deep_sleep(&mut self.delay));

        if let Err(err) = sub.power_down(&mut self.delay, platform.diagnostics) {
            if sub.hold_in_reset().is_err() {
                warn!("Could not put {} back into reset", role.name());
            }
            sub.update(|s| s.power_state = PowerState::Off);
            keep_first(&mut result, "Subsystem power-down", Err(err));
        }

        if self.system.all_closed() {
            if role == Role::Gnss {
                // forbid_deep_sleep woke BTWF; send it back down with the domain.
                keep_first(&mut result, "Releasing IP sleep", aon.ip_allow_sleep(false));
                keep_first(
                    &mut result,
                    "Shutting BTWF down",
                    self.system.subsystem(Role::Btwf).force_deep_to_shutdown(),
                );
            }
            if let Err(err) = domain.domain_power_down(&mut self.delay) {
                if !err.is_timeout() {
                    keep_first(&mut result, "WCN-SYS power-down", Err(err));
                }
                warn!("WCN-SYS did not shut down, forcing it");
                keep_first(&mut result, "Forcing WCN-SYS down", domain.force_deep_to_shutdown(&mut self.delay));
            }
        } else {
            keep_first(&mut result, "Allowing deep sleep", domain.allow_deep_sleep());
        }

        keep_first(
            &mut result,
            "Releasing shared power",
            domain.release_shared_power(&mut self.delay, role == Role::Btwf),
        );

        if role == Role::Btwf {
            keep_first(&mut result, "Clearing BTWF deep sleep force", aon.set_btwf_force_deep_sleep(false));
            keep_first(&mut result, "Clearing BTWF shutdown force", aon.set_btwf_force_shutdown(false));
        }
        result
    }
}

/// Record a failed step unless an earlier failure is already recorded.
fn keep_first<E: Into<Error>>(result: &mut Result<(), Error>, what: &'static str, step: Result<(), E>) {
    if let Err(err) = step {
        let err = err.into();
        error!("{} failed: {:?}", what, err);
        if result.is_ok() {
            *result = Err(err);
        }
    }
}

/// Image booted for the feature that triggers a bring-up.
fn image_for(feature: Feature) -> ImageId {
    match feature {
        Feature::GpsBd => ImageId::GnssBd,
        Feature::Gps => ImageId::Gnss,
        _ => ImageId::Btwf,
    }
}
