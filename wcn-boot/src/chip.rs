//! Chip identification.
//!
//! The two AON chip-id words identify the platform. GNSS firmware reads them
//! back from its handshake block to pick its variant.
//!
//! ```no_run
//! use wcn_boot::chip::ChipId;
//!
//! # fn example(regs: &dyn wcn_boot::regs::RegisterSpace) -> Result<(), wcn_boot::regs::RegisterIoError> {
//! let chip = ChipId::read(regs)?;
//! let _rev = chip.revision();
//! # Ok(()) }
//! ```

use core::fmt;

use crate::regs::map::aon_apb;
use crate::regs::{RegisterBlock, RegisterIoError, RegisterSpace};

/// Raw AON chip-id words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChipId {
    /// `chip_id0`: product code (bits[31:16]) and variant (bits[15:0]).
    pub aon_id0: u32,
    /// `chip_id1`: metal revision in bits[7:0].
    pub aon_id1: u32,
}

impl ChipId {
    pub const fn from_raw(aon_id0: u32, aon_id1: u32) -> Self {
        Self { aon_id0, aon_id1 }
    }

    /// Read both words from `AON_APB`.
    pub fn read(regs: &dyn RegisterSpace) -> Result<Self, RegisterIoError> {
        let aon = RegisterBlock::new(regs, aon_apb::BLOCK);
        Ok(Self {
            aon_id0: aon.read(aon_apb::chip_id0::OFFSET)?,
            aon_id1: aon.read(aon_apb::chip_id1::OFFSET)?,
        })
    }

    #[inline]
    pub const fn product(&self) -> u16 {
        (self.aon_id0 >> 16) as u16
    }

    #[inline]
    pub const fn variant(&self) -> u16 {
        self.aon_id0 as u16
    }

    #[inline]
    pub const fn revision(&self) -> ChipRevision {
        ChipRevision(self.aon_id1 as u8)
    }
}

/// Metal revision; displayed as `AA`, `AB`, ... `BA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChipRevision(pub u8);

impl ChipRevision {
    /// Major (all-layer) and minor (metal) revision numbers.
    pub const fn split(self) -> (u8, u8) {
        (self.0 >> 4, self.0 & 0x0f)
    }
}

impl fmt::Display for ChipRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor) = self.split();
        write!(f, "{}{}", (b'A' + major) as char, (b'A' + minor) as char)
    }
}

/// Identification string, e.g. `9620-0000 AB`.
impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}-{:04x} {}", self.product(), self.variant(), self.revision())
    }
}
