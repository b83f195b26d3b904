//! Concrete [`ImageSource`]s.

use core::cell::RefCell;
use core::fmt::{self, Write as _};

use embedded_io::{ErrorKind, Read, Seek, SeekFrom};
use embedded_storage::ReadStorage;

use super::{ImageId, ImageSource, SourceError};

/// Longest image path a [`ReaderImageSource`] can build.
pub const IMAGE_PATH_MAX: usize = 128;

/// A/B slot suffix appended to partition names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    #[default]
    None,
    A,
    B,
}

impl Slot {
    pub const fn suffix(self) -> &'static str {
        match self {
            Slot::None => "",
            Slot::A => "_a",
            Slot::B => "_b",
        }
    }
}

//=============================================================================
// Packaged images in raw storage
//=============================================================================

/// Location of one image inside a storage device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImagePartition {
    pub image: ImageId,
    pub offset: u32,
    pub len: u32,
}

/// Images packaged at fixed offsets of a [`ReadStorage`] device.
pub struct StorageImageSource<'d, S: ReadStorage> {
    storage: RefCell<S>,
    table: &'d [ImagePartition],
}

impl<'d, S: ReadStorage> StorageImageSource<'d, S> {
    pub fn new(storage: S, table: &'d [ImagePartition]) -> Self {
        Self {
            storage: RefCell::new(storage),
            table,
        }
    }

    pub fn into_inner(self) -> S {
        self.storage.into_inner()
    }

    fn entry(&self, image: ImageId) -> Result<&ImagePartition, SourceError> {
        self.table.iter().find(|p| p.image == image).ok_or(SourceError::NotFound)
    }
}

impl<S: ReadStorage> ImageSource for StorageImageSource<'_, S> {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn image_len(&self, image: ImageId) -> Result<usize, SourceError> {
        let entry = self.entry(image)?;
        let capacity = self.storage.borrow().capacity();
        if entry.offset as usize + entry.len as usize > capacity {
            warn!("{} partition exceeds storage capacity {}", image.name(), capacity);
            return Err(SourceError::NotFound);
        }
        Ok(entry.len as usize)
    }

    fn read_at(&self, image: ImageId, offset: usize, buf: &mut [u8]) -> Result<usize, SourceError> {
        let entry = self.entry(image)?;
        let len = entry.len as usize;
        if offset >= len {
            return Ok(0);
        }
        let n = buf.len().min(len - offset);
        let mut storage = self.storage.try_borrow_mut().map_err(|_| SourceError::Io)?;
        storage
            .read(entry.offset + offset as u32, &mut buf[..n])
            .map_err(|_| SourceError::Io)?;
        Ok(n)
    }
}

//=============================================================================
// Images on a filesystem
//=============================================================================

/// Minimal filesystem access for [`ReaderImageSource`].
pub trait ImageFs {
    type File: Read + Seek;

    fn open(&self, path: &str) -> Result<Self::File, ErrorKind>;
}

/// Images read from a filesystem, either as raw partitions
/// (`<dir>/<stem><slot>`) or as firmware files (`<dir>/<stem>.bin`).
pub struct ReaderImageSource<'d, F: ImageFs> {
    fs: &'d F,
    dir: &'d str,
    slot: Slot,
    raw_partitions: bool,
    length_limit: Option<usize>,
    name: &'static str,
}

impl<'d, F: ImageFs> ReaderImageSource<'d, F> {
    /// Raw partition nodes, e.g. `/dev/block/by-name/wcnmodem_a`.
    pub fn partitions(fs: &'d F, dir: &'d str, slot: Slot) -> Self {
        Self {
            fs,
            dir,
            slot,
            raw_partitions: true,
            length_limit: None,
            name: "partition",
        }
    }

    /// Plain firmware files, e.g. `/vendor/firmware/gnssmodem.bin`.
    pub fn files(fs: &'d F, dir: &'d str) -> Self {
        Self {
            fs,
            dir,
            slot: Slot::None,
            raw_partitions: false,
            length_limit: None,
            name: "firmware-dir",
        }
    }

    /// Cap the reported image length. Raw partitions are usually larger
    /// than the image they hold.
    pub fn with_length_limit(mut self, limit: usize) -> Self {
        self.length_limit = Some(limit);
        self
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Path of `image` in this source.
    pub fn path(&self, image: ImageId) -> Result<ImagePath, SourceError> {
        let mut path = ImagePath::new();
        let res = if self.raw_partitions {
            write!(path, "{}/{}{}", self.dir.trim_end_matches('/'), image.stem(), self.slot.suffix())
        } else {
            write!(path, "{}/{}", self.dir.trim_end_matches('/'), image.name())
        };
        res.map_err(|_| SourceError::NotFound)?;
        Ok(path)
    }

    fn open(&self, image: ImageId) -> Result<F::File, SourceError> {
        let path = self.path(image)?;
        trace!("Opening {}", path.as_str());
        self.fs.open(path.as_str()).map_err(|kind| match kind {
            ErrorKind::NotFound => SourceError::NotFound,
            _ => SourceError::Io,
        })
    }
}

impl<F: ImageFs> ImageSource for ReaderImageSource<'_, F> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn image_len(&self, image: ImageId) -> Result<usize, SourceError> {
        let mut file = self.open(image)?;
        let len = file.seek(SeekFrom::End(0)).map_err(|_| SourceError::Io)? as usize;
        Ok(match self.length_limit {
            Some(limit) => len.min(limit),
            None => len,
        })
    }

    fn read_at(&self, image: ImageId, offset: usize, buf: &mut [u8]) -> Result<usize, SourceError> {
        let mut file = self.open(image)?;
        file.seek(SeekFrom::Start(offset as u64)).map_err(|_| SourceError::Io)?;
        let want = match self.length_limit {
            Some(limit) if offset >= limit => return Ok(0),
            Some(limit) => buf.len().min(limit - offset),
            None => buf.len(),
        };
        file.read(&mut buf[..want]).map_err(|_| SourceError::Io)
    }
}

/// Fixed-capacity image path.
pub struct ImagePath {
    buf: [u8; IMAGE_PATH_MAX],
    len: usize,
}

impl ImagePath {
    const fn new() -> Self {
        Self {
            buf: [0; IMAGE_PATH_MAX],
            len: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only ever filled from `&str` pieces.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl fmt::Write for ImagePath {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > IMAGE_PATH_MAX {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

impl fmt::Debug for ImagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}
