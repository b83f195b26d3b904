//! Per-subsystem power sequencing and firmware boot-sync.
//!
//! One [`SubsystemController`] exists per [`Role`]. It owns the subsystem's
//! software state (power state, open features, boot status) behind its own
//! lock, and drives the subsystem-local registers: CPU reset, sleep control,
//! boot source and sync address.
//!
//! GNSS has no force-exit-deep-sleep line of its own. Its power-up and
//! power-down borrow BTWF's override in `AON_APB`, so the shared domain is
//! guaranteed awake while GNSS registers are touched.

mod btwf;
mod gnss;

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal_1::delay::DelayNs;

use crate::aon::Aon;
use crate::chip::ChipId;
use crate::feature::FeatureMask;
use crate::firmware::DdrWindow;
use crate::handshake::{magic, PhysAddr, SharedBootHandshake, SharedMemory};
use crate::platform::{CalibrationStore, Diagnostics};
use crate::poll::{PollConfig, Poller};
use crate::power::PowerTiming;
use crate::regs::map::{wcn_aon_ahb, wcn_aon_apb};
use crate::regs::{RegisterBlock, RegisterIoError, RegisterSpace};
use crate::Error;

//=============================================================================
// Configuration
//=============================================================================

/// AP physical base of the BTWF DDR arena.
pub const BTWF_BASE_ADDR: PhysAddr = 0x8780_0000;

/// Size of the BTWF window.
pub const BTWF_WINDOW_LEN: usize = 0x60_0000;

/// Handshake offset inside the BTWF window, also its CP-side sync address.
pub const BTWF_SYNC_ADDR: u32 = 0x0017_0000;

/// GNSS window offset relative to the BTWF base.
pub const GNSS_DDR_OFFSET: u32 = 0x60_0000;

/// Size of the GNSS window.
pub const GNSS_WINDOW_LEN: usize = 0x20_0000;

/// Handshake offset inside the GNSS window.
pub const GNSS_HANDSHAKE_OFFSET: u32 = 0x0015_0000;

/// Wall-clock bound on the firmware boot handshake.
pub const BOOT_TIMEOUT_MS: u32 = 20_000;

/// Interval between two handshake reads.
pub const BOOT_POLL_INTERVAL_MS: u32 = 20;

/// Boot source field value selecting DDR.
const BOOT_FROM_DDR: u32 = 0x3;

/// Where one subsystem lives in DDR and how its CP finds the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubsystemConfig {
    /// AP physical base of the window.
    pub base_addr: PhysAddr,
    pub window_len: usize,
    /// Offset of the [`HandshakeLayout`](crate::handshake::HandshakeLayout) in the window.
    pub handshake_offset: u32,
    /// Value written to the CP sync-address register.
    pub sync_addr: u32,
    /// Window offset relative to the BTWF base, encoded into the GNSS boot
    /// register. Unused for BTWF.
    pub ddr_offset: u32,
}

impl SubsystemConfig {
    pub const fn btwf() -> Self {
        Self {
            base_addr: BTWF_BASE_ADDR,
            window_len: BTWF_WINDOW_LEN,
            handshake_offset: BTWF_SYNC_ADDR,
            sync_addr: BTWF_SYNC_ADDR,
            ddr_offset: 0,
        }
    }

    pub const fn gnss() -> Self {
        Self {
            base_addr: BTWF_BASE_ADDR + GNSS_DDR_OFFSET as PhysAddr,
            window_len: GNSS_WINDOW_LEN,
            handshake_offset: GNSS_HANDSHAKE_OFFSET,
            sync_addr: 0,
            ddr_offset: GNSS_DDR_OFFSET,
        }
    }

    /// Default layout for `role`.
    pub const fn for_role(role: Role) -> Self {
        match role {
            Role::Btwf => Self::btwf(),
            Role::Gnss => Self::gnss(),
        }
    }

    pub const fn window(&self) -> DdrWindow {
        DdrWindow::new(self.base_addr, self.window_len)
    }

    pub const fn handshake_addr(&self) -> PhysAddr {
        self.base_addr + self.handshake_offset as PhysAddr
    }
}

/// Firmware boot-sync window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootConfig {
    pub timeout_ms: u32,
    pub interval_ms: u32,
}

impl BootConfig {
    pub const fn new() -> Self {
        Self {
            timeout_ms: BOOT_TIMEOUT_MS,
            interval_ms: BOOT_POLL_INTERVAL_MS,
        }
    }

    pub const fn poll_config(&self) -> PollConfig {
        PollConfig::window(self.timeout_ms, self.interval_ms)
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::new()
    }
}

//=============================================================================
// State
//=============================================================================

/// Subsystem identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Bluetooth/WiFi/FM/debug.
    Btwf,
    Gnss,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Btwf, Role::Gnss];

    pub const fn name(self) -> &'static str {
        match self {
            Role::Btwf => "btwf",
            Role::Gnss => "gnss",
        }
    }

    pub const fn sibling(self) -> Role {
        match self {
            Role::Btwf => Role::Gnss,
            Role::Gnss => Role::Btwf,
        }
    }

    pub(crate) const fn wakeup_label(self) -> &'static str {
        match self {
            Role::Btwf => "btwf wakeup",
            Role::Gnss => "gnss wakeup",
        }
    }

    pub(crate) const fn poweron_label(self) -> &'static str {
        match self {
            Role::Btwf => "btwf poweron",
            Role::Gnss => "gnss poweron",
        }
    }

    const fn deepsleep_label(self) -> &'static str {
        match self {
            Role::Btwf => "btwf deepsleep",
            Role::Gnss => "gnss deepsleep",
        }
    }

    const fn shutdown_label(self) -> &'static str {
        match self {
            Role::Btwf => "btwf shutdown",
            Role::Gnss => "gnss shutdown",
        }
    }

    const fn boot_label(self) -> &'static str {
        match self {
            Role::Btwf => "btwf boot magic",
            Role::Gnss => "gnss boot magic",
        }
    }
}

/// Software view of a subsystem's power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Off,
    PoweringUp,
    Running,
    ShuttingDown,
}

/// Outcome of the last bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootStatus {
    Ok,
    ImageLoadError,
    BootTimeout,
}

/// Everything guarded by the per-subsystem lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubsystemState {
    pub power_state: PowerState,
    pub open_features: FeatureMask,
    pub boot_status: BootStatus,
    /// Firmware calibration has completed once this power-on cycle of the
    /// AP (WiFi calibration for BTWF, first-fix calibration for GNSS).
    pub calibrated: bool,
}

impl SubsystemState {
    pub const fn new() -> Self {
        Self {
            power_state: PowerState::Off,
            open_features: FeatureMask::EMPTY,
            boot_status: BootStatus::Ok,
            calibrated: false,
        }
    }
}

impl Default for SubsystemState {
    fn default() -> Self {
        Self::new()
    }
}

//=============================================================================
// Controller
//=============================================================================

/// Power and boot sequencing for one subsystem.
pub struct SubsystemController<'d> {
    role: Role,
    regs: &'d dyn RegisterSpace,
    mem: &'d dyn SharedMemory,
    config: SubsystemConfig,
    poller: Poller,
    boot_poller: Poller,
    force_exit_settle_us: u32,
    state: Mutex<CriticalSectionRawMutex, Cell<SubsystemState>>,
}

impl<'d> SubsystemController<'d> {
    pub fn new(
        role: Role,
        regs: &'d dyn RegisterSpace,
        mem: &'d dyn SharedMemory,
        config: SubsystemConfig,
        poll: PollConfig,
        boot: BootConfig,
        timing: &PowerTiming,
    ) -> Self {
        Self {
            role,
            regs,
            mem,
            config,
            poller: Poller::new(poll),
            boot_poller: Poller::new(boot.poll_config()),
            force_exit_settle_us: timing.force_exit_settle_us,
            state: Mutex::new(Cell::new(SubsystemState::new())),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &SubsystemConfig {
        &self.config
    }

    pub fn window(&self) -> DdrWindow {
        self.config.window()
    }

    pub fn handshake(&self) -> SharedBootHandshake<'d> {
        SharedBootHandshake::new(self.mem, self.config.handshake_addr())
    }

    //-------------------------------------------------------------------------
    // Software state
    //-------------------------------------------------------------------------

    pub fn state(&self) -> SubsystemState {
        self.state.lock(|s| s.get())
    }

    pub fn power_state(&self) -> PowerState {
        self.state().power_state
    }

    pub fn open_features(&self) -> FeatureMask {
        self.state().open_features
    }

    pub fn boot_status(&self) -> BootStatus {
        self.state().boot_status
    }

    pub fn is_calibrated(&self) -> bool {
        self.state().calibrated
    }

    /// Update the guarded state in one critical section.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SubsystemState) -> R) -> R {
        self.state.lock(|cell| {
            let mut state = cell.get();
            let ret = f(&mut state);
            cell.set(state);
            ret
        })
    }

    fn set_power_state(&self, power_state: PowerState) {
        self.update(|s| s.power_state = power_state);
    }

    /// Forget everything but the calibration status.
    pub(crate) fn reset_state(&self) {
        self.update(|s| {
            *s = SubsystemState {
                calibrated: s.calibrated,
                ..SubsystemState::new()
            }
        });
    }

    //-------------------------------------------------------------------------
    // Register helpers
    //-------------------------------------------------------------------------

    fn aon(&self) -> Aon<'d> {
        Aon::new(self.regs)
    }

    fn wcn_ahb(&self) -> RegisterBlock<'d> {
        RegisterBlock::new(self.regs, wcn_aon_ahb::BLOCK)
    }

    fn wcn_apb(&self) -> RegisterBlock<'d> {
        RegisterBlock::new(self.regs, wcn_aon_apb::BLOCK)
    }

    /// CPU, cache and bus-monitor reset bits of this role.
    fn reset_mask(&self) -> u32 {
        use wcn_aon_ahb::reset_ctrl as reg;

        match self.role {
            Role::Btwf => {
                reg::BTWF_CPU.mask() | reg::BTWF_SYS.mask() | reg::BTWF_CACHE.mask() | reg::BTWF_BUSMON.mask()
            }
            Role::Gnss => reg::GNSS_CPU.mask() | reg::GNSS_CACHE.mask(),
        }
    }

    /// Sleep-control register of this role. Both share one field layout.
    fn ctrl_offset(&self) -> u32 {
        match self.role {
            Role::Btwf => wcn_aon_apb::btwf_ctrl::OFFSET,
            Role::Gnss => wcn_aon_apb::gnss_ctrl::OFFSET,
        }
    }

    fn set_ctrl(&self, mask: u32, on: bool) -> Result<(), RegisterIoError> {
        let offset = self.ctrl_offset();
        self.wcn_apb().modify(offset, |v| if on { v | mask } else { v & !mask })?;
        Ok(())
    }

    /// Keep the CPU from executing.
    pub fn hold_in_reset(&self) -> Result<(), RegisterIoError> {
        use wcn_aon_ahb::reset_ctrl as reg;

        let mask = self.reset_mask();
        self.wcn_ahb().modify(reg::OFFSET, |v| v | mask)?;
        Ok(())
    }

    fn release_reset(&self) -> Result<(), RegisterIoError> {
        use wcn_aon_ahb::reset_ctrl as reg;

        let mask = self.reset_mask();
        self.wcn_ahb().modify(reg::OFFSET, |v| v & !mask)?;
        Ok(())
    }

    /// Push this subsystem into deep sleep and arm auto-shutdown.
    pub fn force_deep_to_shutdown(&self) -> Result<(), RegisterIoError> {
        use wcn_aon_apb::btwf_ctrl as ctrl;

        info!("Forcing {} deep sleep to shutdown", self.role.name());
        self.set_ctrl(ctrl::FORCE_DEEP_SLEEP.mask(), true)?;
        self.set_ctrl(ctrl::AUTO_SHUTDOWN.mask(), true)
    }

    //-------------------------------------------------------------------------
    // Hardware status
    //-------------------------------------------------------------------------

    pub fn is_awake(&self) -> Result<bool, RegisterIoError> {
        self.poller.check(|| self.aon().is_awake(self.role))
    }

    pub fn is_poweron(&self) -> Result<bool, RegisterIoError> {
        self.poller.check(|| self.aon().is_poweron(self.role))
    }

    pub fn is_deepsleep(&self) -> Result<bool, RegisterIoError> {
        self.poller.check(|| self.aon().is_deepsleep(self.role))
    }

    pub fn is_shutdown(&self) -> Result<bool, RegisterIoError> {
        self.poller.check(|| self.aon().is_shutdown(self.role))
    }

    fn poll_deepsleep<D: DelayNs>(&self, delay: &mut D) -> Result<u32, Error> {
        let aon = self.aon();
        self.poller
            .poll_debounced(delay, self.role.deepsleep_label(), || Ok::<_, Error>(aon.is_deepsleep(self.role)?))
    }

    fn poll_shutdown<D: DelayNs>(&self, delay: &mut D) -> Result<u32, Error> {
        let aon = self.aon();
        self.poller
            .poll_debounced(delay, self.role.shutdown_label(), || Ok::<_, Error>(aon.is_shutdown(self.role)?))
    }

    //-------------------------------------------------------------------------
    // Power sequencing
    //-------------------------------------------------------------------------

    /// Bring the subsystem out of reset and let its CPU run from DDR.
    ///
    /// The shared domain must already be up. On failure the CPU is held in
    /// reset again and the force-exit override is restored.
    pub fn power_up<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        info!("Powering up {}", self.role.name());
        self.set_power_state(PowerState::PoweringUp);

        let result = self.power_up_steps(delay);
        if let Err(err) = result {
            error!("{} power-up failed: {:?}", self.role.name(), err);
            if self.hold_in_reset().is_err() {
                warn!("Could not put {} back into reset", self.role.name());
            }
            if self.aon().restore_deep_sleep_override().is_err() {
                warn!("Could not restore the force-exit override");
            }
            self.set_power_state(PowerState::Off);
            return Err(err);
        }

        self.set_power_state(PowerState::Running);
        info!("{} CPU released", self.role.name());
        Ok(())
    }

    fn power_up_steps<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        use wcn_aon_apb::btwf_ctrl as ctrl;

        let aon = self.aon();

        // 1. GNSS depends on BTWF's escape hatch to keep the domain awake.
        debug!("Step 1: Forcing WCN-SYS out of deep sleep");
        aon.force_exit_deep_sleep(delay, self.force_exit_settle_us)?;
        if self.role == Role::Gnss {
            self.poller.poll_debounced(delay, Role::Btwf.wakeup_label(), || {
                Ok::<_, Error>(aon.is_awake(Role::Btwf)?)
            })?;
        }

        // 2. Before any sleep bit, or the CPU runs against a stale handshake.
        debug!("Step 2: Holding {} CPU in reset", self.role.name());
        self.hold_in_reset()?;

        debug!("Step 3: Clearing force deep sleep and auto shutdown");
        self.set_ctrl(ctrl::FORCE_DEEP_SLEEP.mask(), false)?;
        self.set_ctrl(ctrl::AUTO_SHUTDOWN.mask(), false)?;
        self.poller.poll_debounced(delay, self.role.poweron_label(), || {
            Ok::<_, Error>(aon.is_awake(self.role)? && aon.is_poweron(self.role)?)
        })?;

        debug!("Step 4: Selecting DDR boot");
        match self.role {
            Role::Btwf => self.btwf_boot_from_ddr()?,
            Role::Gnss => self.gnss_boot_from_ddr()?,
        }

        debug!("Step 5: Sync address 0x{:08x}", self.config.sync_addr);
        let sync = match self.role {
            Role::Btwf => wcn_aon_ahb::btwf_sync_addr::OFFSET,
            Role::Gnss => wcn_aon_ahb::gnss_sync_addr::OFFSET,
        };
        self.wcn_ahb().write(sync, self.config.sync_addr)?;

        debug!("Step 6: Releasing {} CPU", self.role.name());
        self.release_reset()?;

        debug!("Step 7: Restoring force-exit override");
        aon.restore_deep_sleep_override()?;
        Ok(())
    }

    /// Shut the subsystem down and put its CPU back into reset.
    ///
    /// Deep-sleep and shutdown timeouts fall back to forced overrides. For
    /// BTWF a failed fallback is logged and ignored; for GNSS it raises an
    /// assert through `diagnostics` and returns [`Error::Fatal`].
    pub fn power_down<D: DelayNs>(&self, delay: &mut D, diagnostics: &dyn Diagnostics) -> Result<(), Error> {
        use wcn_aon_apb::{btwf_ctrl as ctrl, vol_adjust};

        info!("Powering down {}", self.role.name());
        self.set_power_state(PowerState::ShuttingDown);

        debug!("Step 1: Arming {} auto shutdown", self.role.name());
        self.set_ctrl(ctrl::AUTO_SHUTDOWN.mask(), true)?;

        debug!("Step 2: Waiting for {} deep sleep", self.role.name());
        if let Err(err) = self.poll_deepsleep(delay) {
            if !err.is_timeout() {
                return Err(err);
            }
            match self.role {
                Role::Btwf => self.btwf_force_deep_sleep(delay)?,
                Role::Gnss => self.gnss_force_deep_sleep(delay, diagnostics, "gnss sys deepsleep fail")?,
            }
        }

        debug!("Step 3: Waiting for {} shutdown", self.role.name());
        if let Err(err) = self.poll_shutdown(delay) {
            if !err.is_timeout() {
                return Err(err);
            }
            match self.role {
                Role::Btwf => self.btwf_force_shutdown(delay)?,
                Role::Gnss => self.gnss_force_deep_sleep(delay, diagnostics, "gnss sys shutdown fail")?,
            }
        }

        debug!("Step 4: Holding {} CPU in reset", self.role.name());
        self.hold_in_reset()?;

        // 5. BTWF: bypass so the domain can reach deep sleep.
        //    GNSS: no bypass, saves power while off.
        let bypass = self.role == Role::Btwf;
        debug!("Step 5: Voltage-adjust bypass {}", bypass);
        let apb = self.wcn_apb();
        if bypass {
            apb.set_bits(vol_adjust::OFFSET, vol_adjust::BYPASS.mask())?;
        } else {
            apb.clear_bits(vol_adjust::OFFSET, vol_adjust::BYPASS.mask())?;
        }

        self.set_power_state(PowerState::Off);
        info!("{} is off", self.role.name());
        Ok(())
    }

    //-------------------------------------------------------------------------
    // Boot handshake
    //-------------------------------------------------------------------------

    /// Arm the handshake, power the subsystem up and wait for its firmware.
    ///
    /// The image must already be in the window and the shared domain up.
    /// A timeout records [`BootStatus::BootTimeout`] and leaves the hardware
    /// running so that a later stop can unwind it.
    pub fn boot_sync<D: DelayNs>(
        &self,
        delay: &mut D,
        calibration: &dyn CalibrationStore,
        chip: ChipId,
    ) -> Result<(), Error> {
        let handshake = self.handshake();
        handshake.prepare_boot()?;

        match self.role {
            Role::Btwf => self.btwf_pre_boot(&handshake, calibration)?,
            Role::Gnss => self.gnss_pre_boot(&handshake, chip)?,
        }

        self.power_up(delay)?;

        let expected = self.ready_magic();
        debug!("Waiting for {} magic 0x{:08x}", self.role.name(), expected);
        let result = self.boot_poller.poll_until(delay, self.role.boot_label(), || {
            Ok::<_, Error>(handshake.init_status()? == expected)
        });

        match result {
            Ok(attempts) => {
                debug!("{} firmware ready after {} polls", self.role.name(), attempts);
                match self.role {
                    Role::Btwf => self.btwf_post_boot(&handshake, calibration)?,
                    Role::Gnss => self.gnss_post_boot(),
                }
                self.update(|s| s.boot_status = BootStatus::Ok);
                info!("{} firmware is up", self.role.name());
                Ok(())
            }
            Err(Error::PollTimeout(_)) => {
                error!("{} boot cp timeout", self.role.name());
                if self.role == Role::Btwf && handshake.set_init_status(magic::INIT_FAILED).is_err() {
                    warn!("Could not mark the BTWF handshake failed");
                }
                self.update(|s| s.boot_status = BootStatus::BootTimeout);
                Err(Error::BootTimeout { role: self.role })
            }
            Err(err) => Err(err),
        }
    }

    fn ready_magic(&self) -> u32 {
        match self.role {
            Role::Btwf => magic::INIT_READY,
            Role::Gnss if self.is_calibrated() => magic::GNSS_BOOT_DONE,
            Role::Gnss => magic::GNSS_CALI_DONE,
        }
    }
}
