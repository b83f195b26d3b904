//! Always-on register helpers shared by the domain and subsystem controllers.
//!
//! The AP-side `AON_APB` block mirrors the WCN sleep/power state machines and
//! owns the override bits used to force the shared domain in or out of deep
//! sleep. Only BTWF has a force-exit-deep-sleep line wired into `AON_APB`;
//! GNSS borrows it.

use embedded_hal_1::delay::DelayNs;

use crate::regs::map::{aon_apb, wcn_aon_ahb};
use crate::regs::{RegisterBlock, RegisterIoError, RegisterSpace};
use crate::subsys::Role;

/// Encodings of the sleep/power state fields.
pub mod state {
    /// Sleep state machine: awake.
    pub const SLEEP_AWAKE: u32 = 6;
    /// Sleep state machine: deep sleep.
    pub const SLEEP_DEEP: u32 = 0;
    /// Power state machine: powered on.
    pub const PWR_ON: u32 = 0;
    /// Power state machine: shut down.
    pub const PWR_SHUTDOWN: u32 = 7;
}

/// "IP stopped" sentinel: every IP inside WCN-SYS may sleep.
pub const IP_STOP_ALL: u32 = 0xffff_ffff;

/// View over the always-on registers.
#[derive(Clone, Copy)]
pub struct Aon<'d> {
    aon: RegisterBlock<'d>,
    wcn_ahb: RegisterBlock<'d>,
}

impl<'d> Aon<'d> {
    pub fn new(space: &'d dyn RegisterSpace) -> Self {
        Self {
            aon: RegisterBlock::new(space, aon_apb::BLOCK),
            wcn_ahb: RegisterBlock::new(space, wcn_aon_ahb::BLOCK),
        }
    }

    /// Force the shared domain out of deep sleep through BTWF's override and
    /// give the PLLs time to settle.
    pub fn force_exit_deep_sleep<D: DelayNs>(&self, delay: &mut D, settle_us: u32) -> Result<(), RegisterIoError> {
        use aon_apb::btwf_sleep_override as reg;

        self.aon.clear_bits(reg::OFFSET, reg::FORCE_EXIT_DEEP_SLEEP_N.mask())?;
        delay.delay_us(settle_us);
        Ok(())
    }

    /// Return the force-exit override to its default (not forced).
    pub fn restore_deep_sleep_override(&self) -> Result<(), RegisterIoError> {
        use aon_apb::btwf_sleep_override as reg;

        self.aon.set_bits(reg::OFFSET, reg::FORCE_EXIT_DEEP_SLEEP_N.mask())
    }

    pub fn force_exit_asserted(&self) -> Result<bool, RegisterIoError> {
        use aon_apb::btwf_sleep_override as reg;

        Ok(self.aon.read_field(reg::OFFSET, reg::FORCE_EXIT_DEEP_SLEEP_N)? == 0)
    }

    /// AON-top forced deep sleep of BTWF.
    pub fn set_btwf_force_deep_sleep(&self, on: bool) -> Result<(), RegisterIoError> {
        use aon_apb::aon_top_force as reg;

        self.set_or_clear(reg::OFFSET, reg::BTWF_FORCE_DEEP_SLEEP.mask(), on)
    }

    /// AON-top forced shutdown of BTWF.
    pub fn set_btwf_force_shutdown(&self, on: bool) -> Result<(), RegisterIoError> {
        use aon_apb::aon_top_force as reg;

        self.set_or_clear(reg::OFFSET, reg::BTWF_FORCE_SHUTDOWN.mask(), on)
    }

    /// Keep both subsystems powered while the domain comes up.
    pub fn set_force_unshutdown(&self, on: bool) -> Result<(), RegisterIoError> {
        use aon_apb::subsys_pwr_status as reg;

        self.set_or_clear(reg::OFFSET, reg::FORCE_UNSHUTDOWN.mask(), on)
    }

    /// Write or clear the "IP stopped" sentinel.
    pub fn ip_allow_sleep(&self, allow: bool) -> Result<(), RegisterIoError> {
        let value = if allow { IP_STOP_ALL } else { 0 };
        debug!("ip_stop <= 0x{:08x}", value);
        self.wcn_ahb.write(wcn_aon_ahb::ip_stop::OFFSET, value)
    }

    /// Raw sleep state of one subsystem.
    pub fn sleep_state(&self, role: Role) -> Result<u32, RegisterIoError> {
        use aon_apb::subsys_sleep_status as reg;

        let field = match role {
            Role::Btwf => reg::BTWF_STATE,
            Role::Gnss => reg::GNSS_STATE,
        };
        self.aon.read_field(reg::OFFSET, field)
    }

    /// Raw power state of one subsystem.
    pub fn power_state(&self, role: Role) -> Result<u32, RegisterIoError> {
        use aon_apb::subsys_pwr_status as reg;

        let field = match role {
            Role::Btwf => reg::BTWF_STATE,
            Role::Gnss => reg::GNSS_STATE,
        };
        self.aon.read_field(reg::OFFSET, field)
    }

    pub fn is_awake(&self, role: Role) -> Result<bool, RegisterIoError> {
        Ok(self.sleep_state(role)? == state::SLEEP_AWAKE)
    }

    pub fn is_deepsleep(&self, role: Role) -> Result<bool, RegisterIoError> {
        Ok(self.sleep_state(role)? == state::SLEEP_DEEP)
    }

    pub fn is_poweron(&self, role: Role) -> Result<bool, RegisterIoError> {
        Ok(self.power_state(role)? == state::PWR_ON)
    }

    pub fn is_shutdown(&self, role: Role) -> Result<bool, RegisterIoError> {
        Ok(self.power_state(role)? == state::PWR_SHUTDOWN)
    }

    fn set_or_clear(&self, offset: u32, mask: u32, on: bool) -> Result<(), RegisterIoError> {
        if on {
            self.aon.set_bits(offset, mask)
        } else {
            self.aon.clear_bits(offset, mask)
        }
    }
}
