//! Firmware update engine for flash-resident bootloaders.
//!
//! The crate decides whether a gzip update artifact differs from the image installed in flash,
//! streams it into flash through a bounded-memory DEFLATE decoder once a dry run has proven it
//! intact, and validates the installed ROM image before it is booted.
//!
//! # Examples
//!
//! ```no_run
//! use otaboot::artifact::DirStore;
//! use otaboot::flash::RamFlash;
//! use otaboot::{update, BootConfig};
//!
//! let mut flash = RamFlash::load("flash.bin")?;
//! let mut artifacts = DirStore::new("/var/lib/otaboot");
//!
//! let rom_addr = update::boot(&mut flash, &mut artifacts, &BootConfig::default())?;
//! println!("Booting rom at {:#010x}", rom_addr);
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod artifact;
pub mod config;
pub mod crc32;
mod error;
pub mod flash;
pub mod gzip;
pub mod image;
pub mod inflate;
pub mod update;

pub use config::BootConfig;
pub use error::Error;
pub use flash::{BlockStorage, FlashWriter, RamFlash};
pub use image::{check_image, ImageError};
pub use inflate::{Digest, Sink};
