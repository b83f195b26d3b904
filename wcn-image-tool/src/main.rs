//! Host-side checks for WCN firmware images
//!
//! Usage:
//!   wcn-image-tool inspect wcnmodem.bin                 # Print the signed header
//!   wcn-image-tool inspect gnssmodem.bin --kind gnss
//!   wcn-image-tool layout board.hjson                   # Check images against DDR windows

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use wcn_boot::firmware::{ImageHeader, ImageId, IMAGE_HEADER_LEN};
use wcn_boot::handshake::{HandshakeLayout, PhysAddr};
use wcn_boot::subsys::{Role, SubsystemConfig};

/// Inspect WCN firmware images and board DDR layouts
#[derive(Parser)]
#[command(name = "wcn-image-tool")]
#[command(about = "Inspect WCN firmware images and board DDR layouts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate the header of one image
    Inspect {
        image: PathBuf,

        /// Which subsystem the image is for
        #[arg(long, value_enum, default_value_t = Kind::Btwf)]
        kind: Kind,
    },

    /// Check that a board's images fit their DDR windows
    Layout {
        /// Board description (hjson)
        board: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Btwf,
    Gnss,
    GnssBd,
}

impl From<Kind> for ImageId {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Btwf => ImageId::Btwf,
            Kind::Gnss => ImageId::Gnss,
            Kind::GnssBd => ImageId::GnssBd,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { image, kind } => cmd_inspect(&image, kind.into()),
        Commands::Layout { board } => cmd_layout(&board),
    }
}

//=============================================================================
// Images
//=============================================================================

/// What an image occupies once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImageInfo {
    len: usize,
    header: Option<ImageHeader>,
    /// Bytes of the window the loader writes.
    footprint: usize,
}

fn image_info(image: ImageId, bytes: &[u8]) -> Result<ImageInfo> {
    if bytes.is_empty() {
        bail!("{} is empty", image.name());
    }

    match ImageHeader::parse(bytes) {
        Some(header) => {
            header
                .validate(image, bytes.len())
                .map_err(|err| anyhow!("{}: {:?}", image.name(), err))?;
            Ok(ImageInfo {
                len: bytes.len(),
                header: Some(header),
                // The payload moves to the window base; the tail up to the
                // signed size is zeroed.
                footprint: header.signed_size as usize,
            })
        }
        None => Ok(ImageInfo {
            len: bytes.len(),
            header: None,
            footprint: bytes.len(),
        }),
    }
}

fn read_image(path: &Path, image: ImageId) -> Result<ImageInfo> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    image_info(image, &bytes).with_context(|| format!("Invalid image {}", path.display()))
}

fn cmd_inspect(path: &Path, image: ImageId) -> Result<()> {
    let info = read_image(path, image)?;

    println!("{} ({})", path.display(), image.name());
    println!("  file size:   {}", info.len);
    match info.header {
        Some(header) => {
            let payload_end = IMAGE_HEADER_LEN + header.real_size as usize;
            println!("  signed:      yes");
            println!("  magic:       0x{:08x}", header.magic);
            println!("  version:     {}", header.version);
            println!("  real size:   {}", header.real_size);
            println!("  signed size: {}", header.signed_size);
            println!("  payload:     0x{:x}..0x{:x}", IMAGE_HEADER_LEN, payload_end);
        }
        None => println!("  signed:      no"),
    }
    println!("  footprint:   {}", info.footprint);
    Ok(())
}

//=============================================================================
// Board layout
//=============================================================================

/// A number written either as an hjson integer or as a `0x` string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Number {
    Int(u64),
    Text(String),
}

impl Number {
    fn value(&self) -> Result<u64> {
        match self {
            Number::Int(v) => Ok(*v),
            Number::Text(s) => {
                let s = s.trim().replace('_', "");
                match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => s.parse(),
                }
                .with_context(|| format!("Invalid number {:?}", s))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Board {
    #[serde(default)]
    btwf_base: Option<Number>,
    #[serde(default)]
    btwf_window_len: Option<Number>,
    /// GNSS window start relative to the BTWF base.
    #[serde(default)]
    gnss_offset: Option<Number>,
    #[serde(default)]
    gnss_window_len: Option<Number>,
    images: BoardImages,
}

#[derive(Debug, Deserialize)]
struct BoardImages {
    btwf: PathBuf,
    #[serde(default)]
    gnss: Option<PathBuf>,
    #[serde(default)]
    gnss_bd: Option<PathBuf>,
}

impl BoardImages {
    fn iter(&self) -> impl Iterator<Item = (ImageId, &Path)> {
        [
            (ImageId::Btwf, Some(self.btwf.as_path())),
            (ImageId::Gnss, self.gnss.as_deref()),
            (ImageId::GnssBd, self.gnss_bd.as_deref()),
        ]
        .into_iter()
        .filter_map(|(image, path)| path.map(|p| (image, p)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    base: PhysAddr,
    len: u64,
    /// Handshake block offset in the window.
    handshake: u64,
}

impl Window {
    fn end(&self) -> PhysAddr {
        self.base + self.len
    }

    fn overlaps(&self, other: &Window) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    btwf: Window,
    gnss: Window,
}

impl Layout {
    fn from_board(board: &Board) -> Result<Self> {
        let btwf = SubsystemConfig::btwf();
        let gnss = SubsystemConfig::gnss();
        let value_or = |n: &Option<Number>, default: u64| n.as_ref().map_or(Ok(default), Number::value);

        let base = value_or(&board.btwf_base, btwf.base_addr)?;
        let gnss_offset = value_or(&board.gnss_offset, gnss.ddr_offset as u64)?;
        let layout = Self {
            btwf: Window {
                base,
                len: value_or(&board.btwf_window_len, btwf.window_len as u64)?,
                handshake: btwf.handshake_offset as u64,
            },
            gnss: Window {
                base: base
                    .checked_add(gnss_offset)
                    .context("GNSS window base overflows")?,
                len: value_or(&board.gnss_window_len, gnss.window_len as u64)?,
                handshake: gnss.handshake_offset as u64,
            },
        };

        // Window ends are computed unchecked from here on.
        for role in Role::ALL {
            let window = layout.window(role);
            if window.base.checked_add(window.len).is_none() {
                bail!(
                    "{} window 0x{:x} + 0x{:x} overflows the address space",
                    role.name(),
                    window.base,
                    window.len
                );
            }
        }
        Ok(layout)
    }

    fn window(&self, role: Role) -> &Window {
        match role {
            Role::Btwf => &self.btwf,
            Role::Gnss => &self.gnss,
        }
    }
}

/// One line of the layout report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Row {
    image: ImageId,
    start: PhysAddr,
    end: PhysAddr,
    /// Bytes left before the handshake block.
    headroom: u64,
}

fn check_layout(layout: &Layout, images: &[(ImageId, ImageInfo)]) -> Result<Vec<Row>> {
    if layout.btwf.overlaps(&layout.gnss) {
        bail!(
            "BTWF window 0x{:x}..0x{:x} overlaps GNSS window 0x{:x}..0x{:x}",
            layout.btwf.base,
            layout.btwf.end(),
            layout.gnss.base,
            layout.gnss.end()
        );
    }

    for role in Role::ALL {
        let window = layout.window(role);
        if window.handshake + HandshakeLayout::SIZE as u64 > window.len {
            bail!(
                "{} handshake block at +0x{:x} does not fit a 0x{:x} byte window",
                role.name(),
                window.handshake,
                window.len
            );
        }
    }

    let mut rows = Vec::new();
    for &(image, info) in images {
        let window = layout.window(image.role());
        let footprint = info.footprint as u64;
        if footprint > window.len {
            bail!(
                "{} needs {} bytes, window holds {}",
                image.name(),
                footprint,
                window.len
            );
        }
        if footprint > window.handshake {
            bail!(
                "{} ends at +0x{:x}, past the handshake block at +0x{:x}",
                image.name(),
                footprint,
                window.handshake
            );
        }
        rows.push(Row {
            image,
            start: window.base,
            end: window.base + footprint,
            headroom: window.handshake - footprint,
        });
    }
    Ok(rows)
}

fn parse_board(text: &str) -> Result<Board> {
    serde_hjson::from_str(text).map_err(|err| anyhow!("Invalid board description: {}", err))
}

fn cmd_layout(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let board = parse_board(&text)?;
    let layout = Layout::from_board(&board)?;

    // Image paths are relative to the board file.
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut images = Vec::new();
    for (image, rel) in board.images.iter() {
        images.push((image, read_image(&dir.join(rel), image)?));
    }

    let rows = check_layout(&layout, &images)?;

    println!("{:<16} {:>12} {:>12} {:>10}", "image", "start", "end", "headroom");
    for row in &rows {
        println!(
            "{:<16} {:>#12x} {:>#12x} {:>10}",
            row.image.name(),
            row.start,
            row.end,
            row.headroom
        );
    }
    println!();
    println!("Layout OK");
    Ok(())
}
