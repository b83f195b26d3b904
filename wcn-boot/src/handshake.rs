//! AP/CP boot handshake in shared DDR.
//!
//! Each subsystem's DDR window carries a [`HandshakeLayout`] at a fixed
//! offset. The AP writes it before releasing the CPU, the firmware overwrites
//! `init_status` once it is alive, and the AP polls for that.

use core::mem::size_of;

use crate::chip::ChipId;

/// Physical address in the AP view of DDR.
pub type PhysAddr = u64;

/// The DDR window could not be mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryError {
    pub addr: PhysAddr,
}

/// Physical-to-virtual DDR access collaborator.
pub trait SharedMemory {
    fn read(&self, addr: PhysAddr, buf: &mut [u8]) -> Result<(), MemoryError>;
    fn write(&self, addr: PhysAddr, data: &[u8]) -> Result<(), MemoryError>;

    /// Fill `len` bytes at `addr` with `value`.
    fn fill(&self, addr: PhysAddr, len: usize, value: u8) -> Result<(), MemoryError> {
        let chunk = [value; 64];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(chunk.len());
            self.write(addr + done as PhysAddr, &chunk[..n])?;
            done += n;
        }
        Ok(())
    }

    fn read_u32(&self, addr: PhysAddr) -> Result<u32, MemoryError> {
        let mut word = [0u8; 4];
        self.read(addr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    fn write_u32(&self, addr: PhysAddr, value: u32) -> Result<(), MemoryError> {
        self.write(addr, &value.to_le_bytes())
    }
}

/// Magic values exchanged through [`HandshakeLayout`].
pub mod magic {
    pub const INIT_NONE: u32 = 0;
    pub const INIT_START: u32 = 0x5a5a_5a5a;
    pub const INIT_READY: u32 = 0xabab_baba;
    pub const INIT_SUCCESS: u32 = 0x1357_9bdf;
    pub const INIT_FAILED: u32 = 0x8888_8888;

    pub const WIFI_CALI_REQUEST: u32 = 0xefef_fefe;
    pub const WIFI_CALI_CLEAR: u32 = 0x8888_8888;

    /// GNSS finished its first-power-cycle self calibration.
    pub const GNSS_CALI_DONE: u32 = 0x0131_4520;
    /// GNSS booted without calibrating.
    pub const GNSS_BOOT_DONE: u32 = 0x1234_5678;

    pub const INCLUDE_GNSS: u32 = 0xabcd_0001;
    pub const NO_GNSS: u32 = 0;
}

/// Size of the WiFi calibration blob.
pub const CALI_BLOB_LEN: usize = 512;

/// Shared-memory handshake block.
#[repr(C)]
pub struct HandshakeLayout {
    pub init_status: u32,
    pub sleep_status: u32,
    pub sleep_flag: u32,
    /// BTWF only: whether GNSS takes part in this power cycle.
    pub include_gnss: u32,
    /// BTWF only: GNSS calibration done flag.
    pub gnss_cali_flag: u32,
    /// BTWF only: calibration request / clear.
    pub wifi_cali_flag: u32,
    /// GNSS only: AON chip id echo.
    pub chip_id: [u32; 2],
    /// BTWF only: RF calibration data, in and out.
    pub wifi_calibration: [u8; CALI_BLOB_LEN],
}

impl HandshakeLayout {
    pub const SIZE: usize = size_of::<Self>();
}

mod field {
    use core::mem::offset_of;

    use super::HandshakeLayout;

    pub const INIT_STATUS: u64 = offset_of!(HandshakeLayout, init_status) as u64;
    pub const SLEEP_STATUS: u64 = offset_of!(HandshakeLayout, sleep_status) as u64;
    pub const SLEEP_FLAG: u64 = offset_of!(HandshakeLayout, sleep_flag) as u64;
    pub const INCLUDE_GNSS: u64 = offset_of!(HandshakeLayout, include_gnss) as u64;
    pub const GNSS_CALI_FLAG: u64 = offset_of!(HandshakeLayout, gnss_cali_flag) as u64;
    pub const WIFI_CALI_FLAG: u64 = offset_of!(HandshakeLayout, wifi_cali_flag) as u64;
    pub const CHIP_ID: u64 = offset_of!(HandshakeLayout, chip_id) as u64;
    pub const WIFI_CALIBRATION: u64 = offset_of!(HandshakeLayout, wifi_calibration) as u64;
}

/// Accessor for one subsystem's handshake block.
#[derive(Clone, Copy)]
pub struct SharedBootHandshake<'d> {
    mem: &'d dyn SharedMemory,
    base: PhysAddr,
}

impl<'d> SharedBootHandshake<'d> {
    pub fn new(mem: &'d dyn SharedMemory, base: PhysAddr) -> Self {
        Self { mem, base }
    }

    pub fn base(&self) -> PhysAddr {
        self.base
    }

    pub fn init_status(&self) -> Result<u32, MemoryError> {
        self.mem.read_u32(self.base + field::INIT_STATUS)
    }

    pub fn set_init_status(&self, value: u32) -> Result<(), MemoryError> {
        self.mem.write_u32(self.base + field::INIT_STATUS, value)
    }

    /// Arm the handshake before the CPU is released.
    pub fn prepare_boot(&self) -> Result<(), MemoryError> {
        self.set_init_status(magic::INIT_START)?;
        self.mem.write_u32(self.base + field::SLEEP_STATUS, 0)?;
        self.mem.write_u32(self.base + field::SLEEP_FLAG, 0)
    }

    pub fn sleep_status(&self) -> Result<u32, MemoryError> {
        self.mem.read_u32(self.base + field::SLEEP_STATUS)
    }

    pub fn set_include_gnss(&self, include: bool) -> Result<(), MemoryError> {
        let value = if include { magic::INCLUDE_GNSS } else { magic::NO_GNSS };
        self.mem.write_u32(self.base + field::INCLUDE_GNSS, value)
    }

    pub fn clear_gnss_cali_flag(&self) -> Result<(), MemoryError> {
        self.mem.write_u32(self.base + field::GNSS_CALI_FLAG, 0)
    }

    pub fn wifi_cali_flag(&self) -> Result<u32, MemoryError> {
        self.mem.read_u32(self.base + field::WIFI_CALI_FLAG)
    }

    pub fn set_wifi_cali_flag(&self, value: u32) -> Result<(), MemoryError> {
        self.mem.write_u32(self.base + field::WIFI_CALI_FLAG, value)
    }

    pub fn write_wifi_calibration(&self, blob: &[u8]) -> Result<(), MemoryError> {
        let len = blob.len().min(CALI_BLOB_LEN);
        self.mem.write(self.base + field::WIFI_CALIBRATION, &blob[..len])
    }

    pub fn read_wifi_calibration(&self, blob: &mut [u8; CALI_BLOB_LEN]) -> Result<(), MemoryError> {
        self.mem.read(self.base + field::WIFI_CALIBRATION, blob)
    }

    pub fn write_chip_id(&self, chip: &ChipId) -> Result<(), MemoryError> {
        self.mem.write_u32(self.base + field::CHIP_ID, chip.aon_id0)?;
        self.mem.write_u32(self.base + field::CHIP_ID + 4, chip.aon_id1)
    }
}

/// Offset of `init_status` inside [`HandshakeLayout`].
pub const INIT_STATUS_OFFSET: u64 = field::INIT_STATUS;

/// Offset of `wifi_cali_flag` inside [`HandshakeLayout`].
pub const WIFI_CALI_FLAG_OFFSET: u64 = field::WIFI_CALI_FLAG;

/// Offset of the calibration blob inside [`HandshakeLayout`].
pub const WIFI_CALIBRATION_OFFSET: u64 = field::WIFI_CALIBRATION;
