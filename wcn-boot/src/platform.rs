//! External collaborators.
//!
//! Everything the orchestrator needs from the rest of the system is reached
//! through the traits here (plus [`RegisterSpace`], [`SharedMemory`],
//! [`PowerRails`], [`ImageSource`] and [`SecureVerifier`]), bundled into one
//! [`Platform`] of borrowed trait objects.

use crate::firmware::{ImageSource, SecureVerifier};
use crate::handshake::{SharedMemory, CALI_BLOB_LEN};
use crate::power::PowerRails;
use crate::regs::RegisterSpace;
use crate::subsys::Role;

/// Dump/assert collaborator.
pub trait Diagnostics {
    /// A full-chip dump or reset is in flight.
    fn dump_in_progress(&self) -> bool;

    /// The debug loopcheck has declared the firmware unrecoverable.
    fn loopcheck_unrecoverable(&self) -> bool;

    /// Unrecoverable hardware failure; collect a dump.
    fn request_assert(&self, role: Role, reason: &'static str);
}

/// The firmware did not accept an AT command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AtError;

/// AT-command transport to running firmware.
pub trait AtCommand {
    /// Ask the firmware to enter its cooperative low-power mode.
    fn request_sleep(&self, role: Role) -> Result<(), AtError>;
}

/// Persistent storage for the WiFi calibration blob.
pub trait CalibrationStore {
    /// Fill `blob` with saved data. Returns `false` when nothing is saved.
    fn load(&self, blob: &mut [u8; CALI_BLOB_LEN]) -> bool;

    fn save(&self, blob: &[u8; CALI_BLOB_LEN]);
}

/// Borrowed collaborators for one WCN instance.
#[derive(Clone, Copy)]
pub struct Platform<'d> {
    pub regs: &'d dyn RegisterSpace,
    pub memory: &'d dyn SharedMemory,
    pub rails: &'d dyn PowerRails,
    /// Image sources, tried in order.
    pub images: &'d [&'d dyn ImageSource],
    pub verifier: Option<&'d dyn SecureVerifier>,
    pub at: &'d dyn AtCommand,
    pub diagnostics: &'d dyn Diagnostics,
    pub calibration: &'d dyn CalibrationStore,
}
