//! Crate-level error type.

use crate::feature::Feature;
use crate::firmware::ImageLoadError;
use crate::handshake::MemoryError;
use crate::poll::PollTimeout;
use crate::power::{Rail, RailError};
use crate::regs::RegisterIoError;
use crate::subsys::Role;

/// Errors returned by the power-lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A register block mapping is unavailable.
    RegisterIo(RegisterIoError),

    /// A hardware state never reached the expected value within the poll budget.
    PollTimeout(PollTimeout),

    /// Firmware never wrote its ready magic within the boot window.
    BootTimeout { role: Role },

    /// The firmware image could not be read, verified or placed.
    ImageLoad(ImageLoadError),

    /// A dump/reset is in flight or the loopcheck collaborator gave up.
    Busy,

    /// A regulator refused to switch.
    Rail(RailError),

    /// The shared DDR window is not accessible.
    Memory(MemoryError),

    /// Too many users of a shared rail.
    RefCountOverflow { rail: Rail },

    /// `stop` for a feature that is not open.
    FeatureNotOpen { role: Role, feature: Feature },

    /// The feature does not belong to the requested subsystem.
    FeatureRoleMismatch { role: Role, feature: Feature },

    /// The board has no such subsystem.
    NotPresent { role: Role },

    /// A forced fallback failed; the diagnostics collaborator has been notified.
    Fatal { role: Role, reason: &'static str },
}

impl Error {
    /// `true` for both poll and boot timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::PollTimeout(_) | Error::BootTimeout { .. })
    }
}

impl From<RegisterIoError> for Error {
    fn from(err: RegisterIoError) -> Self {
        Self::RegisterIo(err)
    }
}

impl From<PollTimeout> for Error {
    fn from(err: PollTimeout) -> Self {
        Self::PollTimeout(err)
    }
}

impl From<ImageLoadError> for Error {
    fn from(err: ImageLoadError) -> Self {
        Self::ImageLoad(err)
    }
}

impl From<RailError> for Error {
    fn from(err: RailError) -> Self {
        Self::Rail(err)
    }
}

impl From<MemoryError> for Error {
    fn from(err: MemoryError) -> Self {
        Self::Memory(err)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::RegisterIo(e) => write!(f, "{} register 0x{:04x} unavailable", e.block.name(), e.offset),
            Error::PollTimeout(t) => write!(f, "timed out waiting for {} after {} polls", t.what, t.attempts),
            Error::BootTimeout { role } => write!(f, "{} firmware did not report ready", role.name()),
            Error::ImageLoad(e) => write!(f, "image load failed: {:?}", e),
            Error::Busy => f.write_str("dump or reset in progress"),
            Error::Rail(e) => write!(f, "rail {} failed to switch", e.rail.name()),
            Error::Memory(e) => write!(f, "shared memory at 0x{:x} unavailable", e.addr),
            Error::RefCountOverflow { rail } => write!(f, "too many users of rail {}", rail.name()),
            Error::FeatureNotOpen { role, feature } => {
                write!(f, "{} feature {} is not open", role.name(), feature.name())
            }
            Error::FeatureRoleMismatch { role, feature } => {
                write!(f, "feature {} does not belong to {}", feature.name(), role.name())
            }
            Error::NotPresent { role } => write!(f, "{} is not present", role.name()),
            Error::Fatal { role, reason } => write!(f, "{}: {}", role.name(), reason),
        }
    }
}
