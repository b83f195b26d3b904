#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod aon;
pub mod chip;
mod error;
pub mod feature;
pub mod firmware;
pub mod handshake;
pub mod orchestrator;
pub mod platform;
pub mod poll;
pub mod power;
pub mod regs;
pub mod subsys;

#[cfg(test)]
mod testing;

// Reexports
pub use chip::ChipId;
pub use error::Error;
pub use feature::{Feature, FeatureMask};
pub use orchestrator::{BootOrchestrator, Config, SharedOrchestrator, WcnSystem};
pub use platform::Platform;
pub use power::DomainState;
pub use subsys::{BootStatus, PowerState, Role};
