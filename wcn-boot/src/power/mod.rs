//! Shared analog resources and the WCN-SYS power domain.
//!
//! BTWF and GNSS sit behind one power/clock domain fed by the DCXO 1V8 and
//! VDDCON regulators plus the "merlion" power island; BTWF additionally
//! needs the WiFi PA rail. Every rail has its own reference count and is
//! only switched on the 0→1 / 1→0 edges.
//!
//! ```no_run
//! use wcn_boot::power::{PowerDomainController, PowerTiming, PowerRails};
//! use wcn_boot::poll::PollConfig;
//! # fn example(
//! #     regs: &dyn wcn_boot::regs::RegisterSpace,
//! #     rails: &dyn PowerRails,
//! #     delay: &mut impl embedded_hal_1::delay::DelayNs,
//! # ) -> Result<(), wcn_boot::Error> {
//! let domain = PowerDomainController::new(regs, rails, PollConfig::new(), PowerTiming::new());
//! domain.acquire_shared_power(delay, true)?;
//! domain.domain_power_up(delay)?;
//! # Ok(()) }
//! ```

use core::cell::Cell;
use core::sync::atomic::{AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal_1::delay::DelayNs;

use crate::aon::{state, Aon};
use crate::poll::{PollConfig, Poller};
use crate::regs::map::{pmu_apb, wcn_aon_apb};
use crate::regs::{RegisterBlock, RegisterIoError, RegisterSpace};
use crate::subsys::Role;
use crate::Error;

//=============================================================================
// Configuration
//=============================================================================

/// Settling time after each of DCXO1V8, VDDCON and merlion.
pub const RAIL_SETTLE_US: u32 = 10;

/// Minimum gap between the base rails and the WiFi PA rail.
pub const WIFI_PA_GAP_US: u32 = 10_000;

/// PLL lock time after the domain wakes.
pub const PLL_LOCK_US: u32 = 8_000;

/// Settling time after forcing the domain out of deep sleep.
pub const FORCE_EXIT_SETTLE_US: u32 = 8_000;

/// Tuned PLL/XTL stabilization delay counts for `wcn_sys_cfg`.
const XTL_PLL_DELAY_COUNTS: u32 = 0x0204;

/// Tuned stable-time counts (32 kHz cycles) for the WCN PLLs and crystal.
const PLL_WAIT_COUNT: u32 = 0x1458;
const XTLBUF_WAIT_COUNT: u32 = 0x37;
const XTL_WAIT_COUNT: u32 = 0x7;

/// Upper bound on concurrent users of one rail.
pub const MAX_RAIL_USERS: u8 = 8;

/// Load-bearing delays of the power sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerTiming {
    pub rail_settle_us: u32,
    pub wifi_pa_gap_us: u32,
    pub pll_lock_us: u32,
    pub force_exit_settle_us: u32,
}

impl PowerTiming {
    pub const fn new() -> Self {
        Self {
            rail_settle_us: RAIL_SETTLE_US,
            wifi_pa_gap_us: WIFI_PA_GAP_US,
            pll_lock_us: PLL_LOCK_US,
            force_exit_settle_us: FORCE_EXIT_SETTLE_US,
        }
    }
}

impl Default for PowerTiming {
    fn default() -> Self {
        Self::new()
    }
}

//=============================================================================
// Rails
//=============================================================================

/// Shared regulators and power islands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rail {
    Dcxo1v8,
    Vddcon,
    /// The merlion power island.
    Merlion,
    /// WiFi power amplifier, BTWF only.
    WifiPa,
}

impl Rail {
    pub const fn name(self) -> &'static str {
        match self {
            Rail::Dcxo1v8 => "dcxo1v8",
            Rail::Vddcon => "vddcon",
            Rail::Merlion => "merlion",
            Rail::WifiPa => "vddwifipa",
        }
    }
}

/// A regulator or power island refused to switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RailError {
    pub rail: Rail,
}

/// Regulator driver collaborator.
pub trait PowerRails {
    fn set_enabled(&self, rail: Rail, enabled: bool) -> Result<(), RailError>;
}

//=============================================================================
// Reference counting
//=============================================================================

/// Enable count of one rail.
pub struct RailCounter {
    rail: Rail,
    count: AtomicU8,
}

impl RailCounter {
    pub const fn new(rail: Rail) -> Self {
        Self {
            rail,
            count: AtomicU8::new(0),
        }
    }

    pub fn count(&self) -> u8 {
        self.count.load(Ordering::Relaxed)
    }

    /// Increment and return the previous count.
    fn increment(&self) -> Result<u8, Error> {
        let rail = self.rail;
        critical_section::with(|_| {
            let count = self.count.load(Ordering::Relaxed);
            if count >= MAX_RAIL_USERS {
                return Err(Error::RefCountOverflow { rail });
            }
            self.count.store(count + 1, Ordering::Relaxed);
            Ok(count)
        })
    }

    /// Decrement and return the previous count. Zero stays zero.
    fn decrement(&self) -> u8 {
        critical_section::with(|_| {
            let count = self.count.load(Ordering::Relaxed);
            if count > 0 {
                self.count.store(count - 1, Ordering::Relaxed);
            }
            count
        })
    }

    fn reset(&self) -> u8 {
        critical_section::with(|_| self.count.swap(0, Ordering::Relaxed))
    }
}

/// One [`RailCounter`] per shared rail.
pub struct SharedResourceCounters {
    pub dcxo1v8: RailCounter,
    pub vddcon: RailCounter,
    pub merlion: RailCounter,
    pub wifi_pa: RailCounter,
}

impl SharedResourceCounters {
    pub const fn new() -> Self {
        Self {
            dcxo1v8: RailCounter::new(Rail::Dcxo1v8),
            vddcon: RailCounter::new(Rail::Vddcon),
            merlion: RailCounter::new(Rail::Merlion),
            wifi_pa: RailCounter::new(Rail::WifiPa),
        }
    }

    pub fn get(&self, rail: Rail) -> &RailCounter {
        match rail {
            Rail::Dcxo1v8 => &self.dcxo1v8,
            Rail::Vddcon => &self.vddcon,
            Rail::Merlion => &self.merlion,
            Rail::WifiPa => &self.wifi_pa,
        }
    }
}

impl Default for SharedResourceCounters {
    fn default() -> Self {
        Self::new()
    }
}

//=============================================================================
// Domain controller
//=============================================================================

/// Software view of the shared WCN-SYS domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DomainState {
    Off,
    On,
}

/// Base rails in power-up order.
const BASE_RAILS: [Rail; 3] = [Rail::Dcxo1v8, Rail::Vddcon, Rail::Merlion];

/// Reference-counted rails plus the WCN-SYS power/clock state machine.
pub struct PowerDomainController<'d> {
    regs: &'d dyn RegisterSpace,
    rails: &'d dyn PowerRails,
    counters: SharedResourceCounters,
    state: Mutex<CriticalSectionRawMutex, Cell<DomainState>>,
    poller: Poller,
    timing: PowerTiming,
}

impl<'d> PowerDomainController<'d> {
    pub fn new(regs: &'d dyn RegisterSpace, rails: &'d dyn PowerRails, poll: PollConfig, timing: PowerTiming) -> Self {
        Self {
            regs,
            rails,
            counters: SharedResourceCounters::new(),
            state: Mutex::new(Cell::new(DomainState::Off)),
            poller: Poller::new(poll),
            timing,
        }
    }

    pub fn state(&self) -> DomainState {
        self.state.lock(|s| s.get())
    }

    pub fn counters(&self) -> &SharedResourceCounters {
        &self.counters
    }

    fn set_state(&self, state: DomainState) {
        self.state.lock(|s| s.set(state));
    }

    fn pmu(&self) -> RegisterBlock<'d> {
        RegisterBlock::new(self.regs, pmu_apb::BLOCK)
    }

    fn wcn_apb(&self) -> RegisterBlock<'d> {
        RegisterBlock::new(self.regs, wcn_aon_apb::BLOCK)
    }

    fn aon(&self) -> Aon<'d> {
        Aon::new(self.regs)
    }

    //-------------------------------------------------------------------------
    // Shared rails
    //-------------------------------------------------------------------------

    /// Take a reference on the base rails (and the WiFi PA when asked).
    ///
    /// Rails are only switched on their 0→1 edge. On failure every count
    /// taken by this call is given back.
    pub fn acquire_shared_power<D: DelayNs>(&self, delay: &mut D, needs_wifi_pa: bool) -> Result<(), Error> {
        for (i, &rail) in BASE_RAILS.iter().enumerate() {
            if let Err(err) = self.acquire_rail(delay, rail, self.timing.rail_settle_us) {
                error!("Enabling {} failed, unwinding", rail.name());
                for &taken in BASE_RAILS[..i].iter().rev() {
                    self.release_rail(delay, taken, self.timing.rail_settle_us);
                }
                return Err(err);
            }
        }

        if needs_wifi_pa {
            if let Err(err) = self.acquire_wifi_pa(delay) {
                error!("Enabling vddwifipa failed, unwinding");
                for &taken in BASE_RAILS.iter().rev() {
                    self.release_rail(delay, taken, self.timing.rail_settle_us);
                }
                return Err(err);
            }
        }

        debug!(
            "Shared power acquired (base users: {}, wifipa users: {})",
            self.counters.merlion.count(),
            self.counters.wifi_pa.count()
        );
        Ok(())
    }

    /// Give back a reference taken by [`acquire_shared_power`](Self::acquire_shared_power).
    ///
    /// Mirror image of the acquire path; every rail is attempted even if an
    /// earlier one fails, and the first failure is reported.
    pub fn release_shared_power<D: DelayNs>(&self, delay: &mut D, had_wifi_pa: bool) -> Result<(), Error> {
        let mut result = Ok(());

        if had_wifi_pa && self.counters.wifi_pa.decrement() == 1 {
            if let Err(err) = self.rails.set_enabled(Rail::WifiPa, false) {
                warn!("Disabling vddwifipa failed");
                result = Err(err.into());
            }
            delay.delay_us(self.timing.wifi_pa_gap_us);
        }

        for &rail in BASE_RAILS.iter().rev() {
            if let Err(err) = self.release_rail_checked(delay, rail, self.timing.rail_settle_us) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        debug!(
            "Shared power released (base users: {}, wifipa users: {})",
            self.counters.merlion.count(),
            self.counters.wifi_pa.count()
        );
        result
    }

    fn acquire_rail<D: DelayNs>(&self, delay: &mut D, rail: Rail, settle_us: u32) -> Result<(), Error> {
        let counter = self.counters.get(rail);
        let prev = counter.increment()?;
        if prev == 0 {
            if let Err(err) = self.rails.set_enabled(rail, true) {
                counter.decrement();
                return Err(err.into());
            }
            debug!("{} enabled", rail.name());
            if settle_us > 0 {
                delay.delay_us(settle_us);
            }
        }
        Ok(())
    }

    fn acquire_wifi_pa<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        // VDDWIFIPA may only follow VDDCON after the inter-rail gap.
        if self.counters.wifi_pa.count() == 0 {
            delay.delay_us(self.timing.wifi_pa_gap_us);
        }
        self.acquire_rail(delay, Rail::WifiPa, 0)
    }

    fn release_rail_checked<D: DelayNs>(&self, delay: &mut D, rail: Rail, settle_us: u32) -> Result<(), Error> {
        if self.counters.get(rail).decrement() == 1 {
            self.rails.set_enabled(rail, false)?;
            debug!("{} disabled", rail.name());
            delay.delay_us(settle_us);
        }
        Ok(())
    }

    fn release_rail<D: DelayNs>(&self, delay: &mut D, rail: Rail, settle_us: u32) {
        if let Err(err) = self.release_rail_checked(delay, rail, settle_us) {
            warn!("Releasing {} failed: {:?}", rail.name(), err);
        }
    }

    /// Switch every rail off and zero all counts, whatever their value.
    pub fn release_all_rails(&self) {
        for rail in [Rail::WifiPa, Rail::Merlion, Rail::Vddcon, Rail::Dcxo1v8] {
            if self.counters.get(rail).reset() > 0 && self.rails.set_enabled(rail, false).is_err() {
                warn!("Forcing {} off failed", rail.name());
            }
        }
    }

    //-------------------------------------------------------------------------
    // WCN-SYS power/clock state machine
    //-------------------------------------------------------------------------

    /// Bring the shared domain out of shutdown and wait for it to wake.
    pub fn domain_power_up<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        use pmu_apb::{wcn_sys_cfg as cfg, wcn_sys_sleep_ctrl as sleep_ctrl};

        info!("Powering up WCN-SYS domain");
        let pmu = self.pmu();

        // 1. PLL/XTL delay counts. Written as clear-then-set, never as one value.
        debug!("Step 1: Programming XTL/PLL delay counts");
        pmu.clear_bits(cfg::OFFSET, cfg::XTL_PLL_DELAY.mask())?;
        pmu.set_bits(cfg::OFFSET, cfg::XTL_PLL_DELAY.prepare(XTL_PLL_DELAY_COUNTS))?;

        // 2. Auto-shutdown first, then force-shutdown.
        debug!("Step 2: Clearing auto/force shutdown");
        pmu.clear_bits(cfg::OFFSET, cfg::AUTO_SHUTDOWN.mask())?;
        pmu.clear_bits(cfg::OFFSET, cfg::FORCE_SHUTDOWN.mask())?;

        debug!("Step 3: Waiting for WCN-SYS power-on");
        self.poller.poll_debounced(delay, "wcn sys poweron", || Ok::<_, Error>(self.is_poweron()?))?;

        debug!("Step 4: Clearing force deep sleep");
        pmu.clear_bits(sleep_ctrl::OFFSET, sleep_ctrl::FORCE_DEEP_SLEEP.mask())?;
        self.poller.poll_debounced(delay, "wcn sys wakeup", || Ok::<_, Error>(self.is_awake()?))?;

        debug!("Step 5: Waiting {}us for PLL lock", self.timing.pll_lock_us);
        delay.delay_us(self.timing.pll_lock_us);

        // 6. The domain status alone has been seen to lead the subsystems.
        debug!("Step 6: Confirming BTWF/GNSS wakeup and poweron");
        let aon = self.aon();
        for role in [Role::Btwf, Role::Gnss] {
            self.poller
                .poll_debounced(delay, role.wakeup_label(), || Ok::<_, Error>(aon.is_awake(role)?))?;
            self.poller
                .poll_debounced(delay, role.poweron_label(), || Ok::<_, Error>(aon.is_poweron(role)?))?;
        }

        self.set_state(DomainState::On);
        info!("WCN-SYS domain is up");
        Ok(())
    }

    /// Let the domain shut down once both subsystems are off.
    pub fn domain_power_down<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        use pmu_apb::wcn_sys_cfg as cfg;

        info!("Powering down WCN-SYS domain");
        self.pmu().set_bits(cfg::OFFSET, cfg::AUTO_SHUTDOWN.mask())?;
        // The domain state machine waits on the IP-stopped sentinel.
        self.aon().ip_allow_sleep(true)?;

        let result = self
            .poller
            .poll_debounced(delay, "wcn sys shutdown", || Ok::<_, Error>(self.is_shutdown()?));
        // Whatever the poll says, nothing may touch WCN registers any more.
        self.set_state(DomainState::Off);
        result?;

        info!("WCN-SYS domain is down");
        Ok(())
    }

    /// Program PLL and crystal stable times; once per domain power cycle.
    pub fn program_pll_stable_time(&self) -> Result<(), RegisterIoError> {
        use wcn_aon_apb::{pll0_wait, pll1_wait, pll2_wait, xtl_wait, xtlbuf_wait};

        debug!("Programming PLL/XTL stable time");
        let apb = self.wcn_apb();
        apb.write_field(pll1_wait::OFFSET, pll1_wait::COUNT, PLL_WAIT_COUNT)?;
        apb.write_field(pll0_wait::OFFSET, pll0_wait::COUNT, PLL_WAIT_COUNT)?;
        apb.write_field(pll2_wait::OFFSET, pll2_wait::COUNT, PLL_WAIT_COUNT)?;
        apb.write_field(xtlbuf_wait::OFFSET, xtlbuf_wait::COUNT, XTLBUF_WAIT_COUNT)?;
        apb.write_field(xtl_wait::OFFSET, xtl_wait::COUNT, XTL_WAIT_COUNT)
    }

    /// Let WCN-SYS signal deep sleep to the PMU.
    ///
    /// Registers must only be touched while the domain is awake.
    pub fn allow_deep_sleep(&self) -> Result<(), RegisterIoError> {
        use wcn_aon_apb::sys_lv_ctrl as reg;

        debug!("Allowing WCN-SYS deep sleep");
        self.wcn_apb().modify(reg::OFFSET, |v| v | reg::CORE_LV_EN.mask())?;
        self.aon().ip_allow_sleep(true)
    }

    /// Keep WCN-SYS awake so a shutdown sequence can reach subsystem registers.
    pub fn forbid_deep_sleep<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        debug!("Forbidding WCN-SYS deep sleep");
        let aon = self.aon();

        aon.set_btwf_force_deep_sleep(false)?;
        aon.force_exit_deep_sleep(delay, self.timing.force_exit_settle_us)?;

        let result = self.confirm_awake_for_shutdown(delay);
        if result.is_ok() {
            aon.ip_allow_sleep(false)?;
        }
        aon.restore_deep_sleep_override()?;
        result
    }

    fn confirm_awake_for_shutdown<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        let aon = self.aon();

        // BTWF may legitimately be off here; only the domain is mandatory.
        if self
            .poller
            .poll_debounced(delay, "btwf wakeup", || Ok::<_, Error>(aon.is_awake(Role::Btwf)?))
            .is_err()
        {
            debug!("BTWF not awake while forbidding deep sleep");
        }
        if self
            .poller
            .poll_debounced(delay, "wcn sys wakeup", || Ok::<_, Error>(self.is_awake()?))
            .is_err()
        {
            warn!("WCN-SYS did not report wakeup");
        }
        self.poller
            .poll_debounced(delay, "wcn sys poweron", || Ok::<_, Error>(self.is_poweron()?))?;
        Ok(())
    }

    /// Emergency: push the whole domain through deep sleep into shutdown.
    pub fn force_deep_to_shutdown<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        use pmu_apb::{wcn_sys_cfg as cfg, wcn_sys_sleep_ctrl as sleep_ctrl};

        warn!("Forcing WCN-SYS deep sleep to shutdown");
        let pmu = self.pmu();
        pmu.set_bits(cfg::OFFSET, cfg::AUTO_SHUTDOWN.mask())?;
        pmu.set_bits(sleep_ctrl::OFFSET, sleep_ctrl::FORCE_DEEP_SLEEP.mask())?;
        self.aon().ip_allow_sleep(true)?;

        let result = self
            .poller
            .poll_debounced(delay, "wcn sys deepsleep", || Ok::<_, Error>(self.is_deepsleep()?))
            .and_then(|_| {
                self.poller
                    .poll_debounced(delay, "wcn sys shutdown", || Ok::<_, Error>(self.is_shutdown()?))
            });
        self.set_state(DomainState::Off);
        result.map(|_| ())
    }

    //-------------------------------------------------------------------------
    // Status
    //-------------------------------------------------------------------------

    fn sleep_state(&self) -> Result<u32, RegisterIoError> {
        use pmu_apb::wcn_sys_sleep_status as reg;
        self.pmu().read_field(reg::OFFSET, reg::STATE)
    }

    fn power_state(&self) -> Result<u32, RegisterIoError> {
        use pmu_apb::wcn_sys_pwr_status as reg;
        self.pmu().read_field(reg::OFFSET, reg::STATE)
    }

    pub fn is_poweron(&self) -> Result<bool, RegisterIoError> {
        Ok(self.power_state()? == state::PWR_ON)
    }

    pub fn is_shutdown(&self) -> Result<bool, RegisterIoError> {
        Ok(self.power_state()? == state::PWR_SHUTDOWN)
    }

    pub fn is_awake(&self) -> Result<bool, RegisterIoError> {
        Ok(self.sleep_state()? == state::SLEEP_AWAKE)
    }

    pub fn is_deepsleep(&self) -> Result<bool, RegisterIoError> {
        Ok(self.sleep_state()? == state::SLEEP_DEEP)
    }

    /// Debounced hardware view of "domain powered on".
    pub fn hw_powered(&self) -> Result<bool, RegisterIoError> {
        self.poller.check(|| self.is_poweron())
    }
}

#[cfg(test)]
mod tests;
