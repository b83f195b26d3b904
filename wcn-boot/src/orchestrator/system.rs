use crate::chip::ChipId;
use crate::firmware::FirmwareLoader;
use crate::platform::Platform;
use crate::power::PowerDomainController;
use crate::regs::RegisterIoError;
use crate::subsys::{Role, SubsystemController};

use super::Config;

/// The whole coprocessor: shared domain, both subsystems, collaborators.
///
/// Built once per chip and borrowed by the [`BootOrchestrator`](super::BootOrchestrator).
pub struct WcnSystem<'d> {
    platform: Platform<'d>,
    domain: PowerDomainController<'d>,
    btwf: SubsystemController<'d>,
    gnss: SubsystemController<'d>,
}

impl<'d> WcnSystem<'d> {
    pub fn new(platform: Platform<'d>, config: &Config) -> Self {
        let subsystem = move |role: Role, sub_config| {
            SubsystemController::new(
                role,
                platform.regs,
                platform.memory,
                sub_config,
                config.poll,
                config.boot,
                &config.timing,
            )
        };

        Self {
            platform,
            domain: PowerDomainController::new(platform.regs, platform.rails, config.poll, config.timing),
            btwf: subsystem(Role::Btwf, config.btwf),
            gnss: subsystem(Role::Gnss, config.gnss),
        }
    }

    pub fn platform(&self) -> &Platform<'d> {
        &self.platform
    }

    pub fn domain(&self) -> &PowerDomainController<'d> {
        &self.domain
    }

    pub fn subsystem(&self, role: Role) -> &SubsystemController<'d> {
        match role {
            Role::Btwf => &self.btwf,
            Role::Gnss => &self.gnss,
        }
    }

    pub fn loader(&self) -> FirmwareLoader<'d> {
        FirmwareLoader::new(self.platform.images, self.platform.memory, self.platform.verifier)
    }

    /// Both feature masks are empty.
    pub fn all_closed(&self) -> bool {
        Role::ALL.iter().all(|&role| self.subsystem(role).open_features().is_empty())
    }

    pub fn chip_id(&self) -> Result<ChipId, RegisterIoError> {
        ChipId::read(self.platform.regs)
    }
}
