use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use structopt::StructOpt;

use otaboot::artifact::DirStore;
use otaboot::flash::{RamFlash, SECTOR_SIZE};
use otaboot::{gzip, image, inflate, update, Sink};

mod cli;

use cli::{Command, InflateOpts, Opts};

/// Forwards decompressed output to a writer
struct WriteSink<W: Write>(W);

impl<W: Write> Sink for WriteSink<W> {
    fn consume(&mut self, data: &[u8]) -> Result<(), otaboot::Error> {
        self.0.write_all(data)?;

        Ok(())
    }
}

fn load_flash(path: &Path) -> Result<RamFlash, anyhow::Error> {
    RamFlash::load(path)
        .with_context(|| format!("Failed to load flash dump '{}'", path.display()))
}

fn save_flash(flash: &RamFlash, path: &Path) -> Result<(), anyhow::Error> {
    flash
        .save(path)
        .with_context(|| format!("Failed to save flash dump '{}'", path.display()))
}

fn check(opts: &Opts) -> Result<(), anyhow::Error> {
    let mut flash = load_flash(&opts.flash)?;
    let rom_addr = image::check_image(&mut flash, opts.boot_offset)
        .with_context(|| format!("No valid rom image at {:#010x}", opts.boot_offset))?;

    println!("Valid rom image at {:#010x}", rom_addr);

    Ok(())
}

fn need_update(opts: &Opts) -> Result<(), anyhow::Error> {
    let mut flash = load_flash(&opts.flash)?;
    let mut artifacts = DirStore::new(&opts.artifacts);

    if update::need_update(&mut flash, &mut artifacts, &opts.boot_config())? {
        println!("Update needed");
    } else {
        println!("Update not needed");
    }

    Ok(())
}

fn install(opts: &Opts, force: bool) -> Result<(), anyhow::Error> {
    let mut flash = load_flash(&opts.flash)?;
    let mut artifacts = DirStore::new(&opts.artifacts);
    let config = opts.boot_config();

    let installed = if force {
        update::perform_update(&mut flash, &mut artifacts, &config).map(Some)
    } else {
        update::update_if_needed(&mut flash, &mut artifacts, &config)
    }
    .with_context(|| format!("Failed to install update file '{}'", config.update_file))?;

    match installed {
        Some(digest) => {
            save_flash(&flash, &opts.flash)?;

            println!(
                "Installed {} bytes (crc32 {:#010x}) at {:#010x}",
                digest.length, digest.crc32, config.boot_offset
            );
        }
        None => println!("Installed image is up to date"),
    }

    Ok(())
}

fn boot(opts: &Opts) -> Result<(), anyhow::Error> {
    let mut flash = load_flash(&opts.flash)?;
    let mut artifacts = DirStore::new(&opts.artifacts);
    let config = opts.boot_config();

    let booted = update::boot(&mut flash, &mut artifacts, &config);

    // An update may have been installed even when nothing is bootable
    save_flash(&flash, &opts.flash)?;

    let rom_addr =
        booted.with_context(|| format!("No bootable rom found at {:#010x}", config.boot_offset))?;

    println!("Booting rom at {:#010x}", rom_addr);

    // Merge the sector-sized chunks back into whole sections
    let mut sections: Vec<(u32, usize)> = Vec::new();
    let record = |target: u32, data: &[u8]| -> Result<(), otaboot::Error> {
        let merged = match sections.last_mut() {
            Some((start, len)) if start.wrapping_add(*len as u32) == target => {
                *len += data.len();
                true
            }
            _ => false,
        };

        if !merged {
            sections.push((target, data.len()));
        }

        Ok(())
    };
    let entry = image::load_rom(&mut flash, rom_addr, record)?;

    for (target, len) in sections {
        println!("  {:#010x} {:>8} bytes", target, len);
    }

    println!("Entry point {:#010x}", entry);

    Ok(())
}

fn inflate_file(opts: &InflateOpts) -> Result<(), anyhow::Error> {
    let input = File::open(&opts.input)
        .with_context(|| format!("Failed to open '{}'", opts.input.display()))?;
    let output = File::create(&opts.output)
        .with_context(|| format!("Failed to create '{}'", opts.output.display()))?;

    let mut sink = WriteSink(BufWriter::new(output));
    let mut chunk = vec![0u8; SECTOR_SIZE as usize];
    let input = BufReader::new(input);

    let digest = if opts.raw {
        inflate::inflate(input, &mut sink, &mut chunk)
    } else {
        gzip::decompress(input, &mut sink, &mut chunk)
    }
    .with_context(|| format!("Failed to inflate '{}'", opts.input.display()))?;

    sink.0.flush()?;

    println!(
        "Inflated {} bytes (crc32 {:#010x}) to {}",
        digest.length,
        digest.crc32,
        opts.output.display()
    );

    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    // Create a logger with a timestamp, filtered through RUST_LOG
    pretty_env_logger::init_timed();

    // Parse the command-line arguments
    let opts = Opts::from_args();

    match &opts.command {
        Command::Check => check(&opts)?,
        Command::NeedUpdate => need_update(&opts)?,
        Command::Update { force } => install(&opts, *force)?,
        Command::Boot => boot(&opts)?,
        Command::Inflate(inflate_opts) => inflate_file(inflate_opts)?,
    }

    Ok(())
}
