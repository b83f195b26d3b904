//! Register space access.
//!
//! The AP reaches the coprocessor through a handful of register blocks
//! ([`BlockKind`]). Platforms implement [`RegisterSpace`] over their own
//! mapping; drivers in this crate only ever talk to a [`RegisterBlock`] view.
//!
//! ```no_run
//! use wcn_boot::regs::{map::pmu_apb, RegisterBlock, RegisterSpace};
//!
//! # fn example(space: &dyn RegisterSpace) -> Result<(), wcn_boot::regs::RegisterIoError> {
//! let pmu = RegisterBlock::new(space, pmu_apb::BLOCK);
//! pmu.clear_bits(pmu_apb::wcn_sys_cfg::OFFSET, pmu_apb::wcn_sys_cfg::FORCE_SHUTDOWN.mask())?;
//! # Ok(()) }
//! ```

include!(concat!(env!("OUT_DIR"), "/_generated.rs"));

/// Offset added to a register address to reach its write-1-to-set alias.
pub const SET_ALIAS_OFFSET: u32 = 0x1000;

/// Offset added to a register address to reach its write-1-to-clear alias.
pub const CLEAR_ALIAS_OFFSET: u32 = 0x2000;

/// The physical mapping behind a register block is unavailable.
///
/// Fatal for the operation in progress; never retried by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterIoError {
    pub block: BlockKind,
    pub offset: u32,
}

/// Raw 32-bit register access over named blocks.
///
/// Writes are posted: a successful `write` says nothing about whether the
/// hardware state machine has acted on it yet.
pub trait RegisterSpace {
    fn read(&self, block: BlockKind, offset: u32) -> Result<u32, RegisterIoError>;
    fn write(&self, block: BlockKind, offset: u32, value: u32) -> Result<(), RegisterIoError>;
}

impl<T: RegisterSpace + ?Sized> RegisterSpace for &T {
    fn read(&self, block: BlockKind, offset: u32) -> Result<u32, RegisterIoError> {
        (**self).read(block, offset)
    }

    fn write(&self, block: BlockKind, offset: u32, value: u32) -> Result<(), RegisterIoError> {
        (**self).write(block, offset, value)
    }
}

/// Bit field within a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Field {
    pub offset: u8,
    pub width: u8,
}

impl Field {
    pub const fn new(offset: u8, width: u8) -> Self {
        Self { offset, width }
    }

    /// Mask of the field, already shifted into place.
    pub const fn mask(self) -> u32 {
        let bits = if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        };
        bits << self.offset
    }

    /// Extract the field value from a raw register value.
    pub const fn get(self, raw: u32) -> u32 {
        (raw & self.mask()) >> self.offset
    }

    /// Shift `value` into place, truncating it to the field width.
    pub const fn prepare(self, value: u32) -> u32 {
        (value << self.offset) & self.mask()
    }

    /// Replace the field inside `raw` with `value`.
    pub const fn replace(self, raw: u32, value: u32) -> u32 {
        (raw & !self.mask()) | self.prepare(value)
    }
}

/// A borrowed view of one register block.
#[derive(Clone, Copy)]
pub struct RegisterBlock<'d> {
    space: &'d dyn RegisterSpace,
    kind: BlockKind,
}

impl<'d> RegisterBlock<'d> {
    pub fn new(space: &'d dyn RegisterSpace, kind: BlockKind) -> Self {
        Self { space, kind }
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    #[inline]
    pub fn read(&self, offset: u32) -> Result<u32, RegisterIoError> {
        self.space.read(self.kind, offset)
    }

    #[inline]
    pub fn write(&self, offset: u32, value: u32) -> Result<(), RegisterIoError> {
        trace!("{} [0x{:04x}] <= 0x{:08x}", self.kind.name(), offset, value);
        self.space.write(self.kind, offset, value)
    }

    /// Read-modify-write. Returns the value written.
    pub fn modify(&self, offset: u32, f: impl FnOnce(u32) -> u32) -> Result<u32, RegisterIoError> {
        let value = f(self.read(offset)?);
        self.write(offset, value)?;
        Ok(value)
    }

    /// Set `mask` bits, through the set alias when the block has one.
    pub fn set_bits(&self, offset: u32, mask: u32) -> Result<(), RegisterIoError> {
        if self.kind.has_set_clear_alias() {
            self.write(offset + SET_ALIAS_OFFSET, mask)
        } else {
            self.modify(offset, |v| v | mask).map(|_| ())
        }
    }

    /// Clear `mask` bits, through the clear alias when the block has one.
    pub fn clear_bits(&self, offset: u32, mask: u32) -> Result<(), RegisterIoError> {
        if self.kind.has_set_clear_alias() {
            self.write(offset + CLEAR_ALIAS_OFFSET, mask)
        } else {
            self.modify(offset, |v| v & !mask).map(|_| ())
        }
    }

    pub fn read_field(&self, offset: u32, field: Field) -> Result<u32, RegisterIoError> {
        Ok(field.get(self.read(offset)?))
    }

    /// Program a multi-bit field with a read-modify-write.
    pub fn write_field(&self, offset: u32, field: Field, value: u32) -> Result<(), RegisterIoError> {
        self.modify(offset, |v| field.replace(v, value)).map(|_| ())
    }
}
