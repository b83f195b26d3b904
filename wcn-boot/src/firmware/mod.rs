//! Firmware image loading.
//!
//! Images are streamed from the first [`ImageSource`] that has them into the
//! subsystem's DDR window. Signed images carry a [`ImageHeader`]; once the
//! header checks out and the verifier accepts the signed region, the payload
//! is moved down to the window base and the signature tail is zeroed.
//!
//! Loading never touches a register, so a failure here leaves the hardware
//! exactly as it was.
//!
//! ```no_run
//! use wcn_boot::firmware::{DdrWindow, FirmwareLoader, ImageId};
//! # fn example(
//! #     sources: &[&dyn wcn_boot::firmware::ImageSource],
//! #     mem: &dyn wcn_boot::handshake::SharedMemory,
//! #     delay: &mut impl embedded_hal_1::delay::DelayNs,
//! # ) -> Result<(), wcn_boot::firmware::ImageLoadError> {
//! let loader = FirmwareLoader::new(sources, mem, None);
//! let window = DdrWindow::new(0x8780_0000, 0x60_0000);
//! let image = loader.load(delay, ImageId::Btwf, &window)?;
//! # let _ = image;
//! # Ok(()) }
//! ```

mod source;

pub use source::{ImageFs, ImagePartition, ImagePath, ReaderImageSource, Slot, StorageImageSource, IMAGE_PATH_MAX};

use embedded_hal_1::delay::DelayNs;

use crate::handshake::{MemoryError, PhysAddr, SharedMemory};
use crate::subsys::Role;

//=============================================================================
// Configuration
//=============================================================================

/// Size of the signed-image header.
pub const IMAGE_HEADER_LEN: usize = 512;

/// Magic number of a signed image.
pub const SEC_IMAGE_MAGIC: u32 = 0x5555_aaaa;

/// BTWF clears this much of its window before every load.
pub const BTWF_ZERO_LEN: usize = 8 * 0x4000;

/// Retries of a transient source read.
pub const IMAGE_READ_RETRIES: u32 = 10;

/// Delay between two read retries.
pub const IMAGE_RETRY_DELAY_MS: u32 = 200;

const COPY_CHUNK: usize = 256;

//=============================================================================
// Image identity
//=============================================================================

/// Firmware image kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageId {
    Btwf,
    /// GNSS, GPS constellation.
    Gnss,
    /// GNSS, GPS + BeiDou constellations.
    GnssBd,
}

impl ImageId {
    pub const fn role(self) -> Role {
        match self {
            ImageId::Btwf => Role::Btwf,
            ImageId::Gnss | ImageId::GnssBd => Role::Gnss,
        }
    }

    /// File stem without slot suffix or extension.
    pub const fn stem(self) -> &'static str {
        match self {
            ImageId::Btwf => "wcnmodem",
            ImageId::Gnss => "gnssmodem",
            ImageId::GnssBd => "gnssbdmodem",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ImageId::Btwf => "wcnmodem.bin",
            ImageId::Gnss => "gnssmodem.bin",
            ImageId::GnssBd => "gnssbdmodem.bin",
        }
    }
}

/// DDR region an image is loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DdrWindow {
    pub base: PhysAddr,
    pub len: usize,
}

impl DdrWindow {
    pub const fn new(base: PhysAddr, len: usize) -> Self {
        Self { base, len }
    }
}

//=============================================================================
// Error types
//=============================================================================

/// Image source failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SourceError {
    /// This source does not carry the image; try the next one.
    NotFound,
    /// Transient read failure; worth retrying.
    Io,
}

/// The signature service rejected the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VerifyError;

/// Image loading error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ImageLoadError {
    /// No source carries the image.
    NotFound { image: ImageId },
    /// Reads kept failing.
    Read { image: ImageId, offset: usize },
    /// Image has zero length.
    Empty { image: ImageId },
    /// Image does not fit the DDR window.
    TooLarge { image: ImageId, size: usize, max: usize },
    /// Signed-image header sizes are inconsistent.
    BadHeader {
        image: ImageId,
        real_size: u32,
        signed_size: u32,
        image_len: usize,
    },
    /// The secure verifier rejected the signed region.
    VerifyFailed { image: ImageId },
    /// DDR window not accessible.
    Memory(MemoryError),
}

impl From<MemoryError> for ImageLoadError {
    fn from(err: MemoryError) -> Self {
        Self::Memory(err)
    }
}

//=============================================================================
// Collaborators
//=============================================================================

/// Provider of firmware image bytes.
pub trait ImageSource {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn image_len(&self, image: ImageId) -> Result<usize, SourceError>;

    /// Read up to `buf.len()` bytes at `offset`. Returns the count read.
    fn read_at(&self, image: ImageId, offset: usize, buf: &mut [u8]) -> Result<usize, SourceError>;
}

/// Trusted-execution signature check of a loaded, still-signed image.
pub trait SecureVerifier {
    fn verify(&self, role: Role, addr: PhysAddr, signed_size: u32) -> Result<(), VerifyError>;
}

//=============================================================================
// Signed image header
//=============================================================================

/// Leading words of a signed image header (little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageHeader {
    pub magic: u32,
    pub version: u32,
    /// Payload size after the header.
    pub real_size: u32,
    /// Size covered by the signature, header included.
    pub signed_size: u32,
}

impl ImageHeader {
    /// Bytes needed by [`parse`](Self::parse).
    pub const PARSE_LEN: usize = 16;

    /// Parse the header; `None` when the image is not signed.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::PARSE_LEN {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let header = Self {
            magic: word(0),
            version: word(4),
            real_size: word(8),
            signed_size: word(12),
        };
        (header.magic == SEC_IMAGE_MAGIC).then_some(header)
    }

    /// Check the declared sizes against each other and the image length.
    pub fn validate(&self, image: ImageId, image_len: usize) -> Result<(), ImageLoadError> {
        let payload_end = IMAGE_HEADER_LEN as u64 + self.real_size as u64;
        if self.real_size == 0 || payload_end >= self.signed_size as u64 || image_len < self.signed_size as usize {
            return Err(ImageLoadError::BadHeader {
                image,
                real_size: self.real_size,
                signed_size: self.signed_size,
                image_len,
            });
        }
        Ok(())
    }
}

//=============================================================================
// Loader
//=============================================================================

/// Result of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadedImage {
    pub image: ImageId,
    /// Bytes read from the source.
    pub len: usize,
    /// Bytes of executable payload now at the window base.
    pub payload_len: usize,
    pub signed: bool,
    /// Name of the source that supplied the image.
    pub source: &'static str,
}

/// Streams images from their sources into DDR.
pub struct FirmwareLoader<'d> {
    sources: &'d [&'d dyn ImageSource],
    mem: &'d dyn SharedMemory,
    verifier: Option<&'d dyn SecureVerifier>,
}

impl<'d> FirmwareLoader<'d> {
    pub fn new(
        sources: &'d [&'d dyn ImageSource],
        mem: &'d dyn SharedMemory,
        verifier: Option<&'d dyn SecureVerifier>,
    ) -> Self {
        Self { sources, mem, verifier }
    }

    /// Load `image` into `window`.
    pub fn load<D: DelayNs>(&self, delay: &mut D, image: ImageId, window: &DdrWindow) -> Result<LoadedImage, ImageLoadError> {
        info!("Loading {} into 0x{:x}", image.name(), window.base);

        let (source, len) = self.find(delay, image)?;

        // 1. Size checks before anything is written.
        if len == 0 {
            return Err(ImageLoadError::Empty { image });
        }
        if len > window.len {
            error!("{} too large: {} bytes (max {} bytes)", image.name(), len, window.len);
            return Err(ImageLoadError::TooLarge {
                image,
                size: len,
                max: window.len,
            });
        }

        // 2. BTWF expects a clean head region.
        if image.role() == Role::Btwf {
            debug!("Clearing BTWF head region");
            self.mem.fill(window.base, BTWF_ZERO_LEN.min(window.len), 0)?;
        }

        // 3. Copy the whole image.
        let mut head = [0u8; ImageHeader::PARSE_LEN];
        self.copy(delay, source, image, 0, len, window.base, Some(&mut head))?;

        // 4. Signed images: verify, then move the payload down.
        let Some(header) = ImageHeader::parse(&head) else {
            debug!("{} is not signed (magic 0x{:08x})", image.name(), u32::from_le_bytes([head[0], head[1], head[2], head[3]]));
            info!("Loaded {} ({} bytes) from {}", image.name(), len, source.name());
            return Ok(LoadedImage {
                image,
                len,
                payload_len: len,
                signed: false,
                source: source.name(),
            });
        };

        header.validate(image, len)?;

        match self.verifier {
            Some(verifier) => verifier
                .verify(image.role(), window.base, header.signed_size)
                .map_err(|_| {
                    error!("{} signature rejected", image.name());
                    ImageLoadError::VerifyFailed { image }
                })?,
            None => warn!("No secure verifier, trusting {} header", image.name()),
        }

        let real = header.real_size as usize;
        let signed = header.signed_size as usize;
        self.mem.fill(window.base + real as PhysAddr, signed - real, 0)?;
        self.copy(delay, source, image, IMAGE_HEADER_LEN, real, window.base, None)?;

        info!("Loaded signed {} ({} payload bytes) from {}", image.name(), real, source.name());
        Ok(LoadedImage {
            image,
            len,
            payload_len: real,
            signed: true,
            source: source.name(),
        })
    }

    /// First source that carries `image`, with its length.
    fn find<D: DelayNs>(&self, delay: &mut D, image: ImageId) -> Result<(&'d dyn ImageSource, usize), ImageLoadError> {
        let mut last_err = ImageLoadError::NotFound { image };

        for &source in self.sources {
            match retry(delay, || source.image_len(image)) {
                Ok(len) => return Ok((source, len)),
                Err(SourceError::NotFound) => {
                    debug!("{} not in {}", image.name(), source.name());
                }
                Err(SourceError::Io) => {
                    warn!("Reading {} from {} kept failing", image.name(), source.name());
                    last_err = ImageLoadError::Read { image, offset: 0 };
                }
            }
        }

        error!("No source could provide {}", image.name());
        Err(last_err)
    }

    /// Copy `len` bytes starting at `src_offset` to `dst`.
    #[allow(clippy::too_many_arguments)]
    fn copy<D: DelayNs>(
        &self,
        delay: &mut D,
        source: &dyn ImageSource,
        image: ImageId,
        src_offset: usize,
        len: usize,
        dst: PhysAddr,
        mut head: Option<&mut [u8; ImageHeader::PARSE_LEN]>,
    ) -> Result<(), ImageLoadError> {
        let mut buf = [0u8; COPY_CHUNK];
        let mut done = 0;

        while done < len {
            let want = (len - done).min(COPY_CHUNK);
            let offset = src_offset + done;
            let n = retry(delay, || source.read_at(image, offset, &mut buf[..want]))
                .map_err(|_| ImageLoadError::Read { image, offset })?;
            if n == 0 {
                return Err(ImageLoadError::Read { image, offset });
            }

            if let Some(head) = head.as_deref_mut() {
                if done < head.len() {
                    let take = (head.len() - done).min(n);
                    head[done..done + take].copy_from_slice(&buf[..take]);
                }
            }

            self.mem.write(dst + done as PhysAddr, &buf[..n])?;
            done += n;
        }
        Ok(())
    }
}

/// Retry transient source failures; `NotFound` is returned at once.
fn retry<T, D: DelayNs>(delay: &mut D, mut op: impl FnMut() -> Result<T, SourceError>) -> Result<T, SourceError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(SourceError::Io) if attempt + 1 < IMAGE_READ_RETRIES => {
                attempt += 1;
                delay.delay_ms(IMAGE_RETRY_DELAY_MS);
            }
            other => return other,
        }
    }
}
