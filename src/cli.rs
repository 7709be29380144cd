use std::num::ParseIntError;
use std::path::PathBuf;

use structopt::StructOpt;

use otaboot::BootConfig;

/// Parses a flash address given either in decimal or as `0x`-prefixed hex
pub fn parse_address(src: &str) -> Result<u32, ParseIntError> {
    match src.strip_prefix("0x").or_else(|| src.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => src.parse(),
    }
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Validate the rom image at the boot offset
    Check,
    /// Check whether the update file differs from the installed image
    NeedUpdate,
    /// Install the update file at the boot offset
    Update {
        /// Install even when the installed image already matches
        #[structopt(long)]
        force: bool,
    },
    /// Run the boot sequence and print the section map of the booted rom
    Boot,
    /// Decompress a gzip file with the streaming decoder
    Inflate(InflateOpts),
}

#[derive(StructOpt, Debug)]
pub struct InflateOpts {
    /// The compressed input file
    pub input: PathBuf,
    /// Where to write the decompressed output
    pub output: PathBuf,
    /// Treat the input as a raw DEFLATE stream without gzip framing
    #[structopt(long)]
    pub raw: bool,
}

#[derive(StructOpt, Debug)]
#[structopt(about = "Streaming gzip firmware updater and ROM image validator")]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,

    /// The flash dump to operate on
    #[structopt(
        env = "FLASH_IMAGE",
        short = "f",
        long = "flash",
        default_value = "flash.bin"
    )]
    pub flash: PathBuf,
    /// Flash address of the installed image
    #[structopt(
        env = "BOOT_OFFSET",
        short = "o",
        long = "boot-offset",
        default_value = "0xA0000",
        parse(try_from_str = parse_address)
    )]
    pub boot_offset: u32,
    /// The directory update files are looked up in
    #[structopt(
        env = "ARTIFACT_DIR",
        short = "a",
        long = "artifacts",
        default_value = "."
    )]
    pub artifacts: PathBuf,
    /// The name of the update file
    #[structopt(
        env = "UPDATE_FILE",
        short = "u",
        long = "update-file",
        default_value = "testload.gz"
    )]
    pub update_file: String,
}

impl Opts {
    pub fn boot_config(&self) -> BootConfig {
        BootConfig {
            boot_offset: self.boot_offset,
            update_file: self.update_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_parse_decimal_and_hex_addresses() {
        assert_eq!(parse_address("655360").unwrap(), 0xA0000);
        assert_eq!(parse_address("0xA0000").unwrap(), 0xA0000);
        assert_eq!(parse_address("0X2000").unwrap(), 0x2000);
        assert!(parse_address("0x").is_err());
        assert!(parse_address("boot").is_err());
    }

    #[test]
    fn it_should_default_to_the_standard_layout() {
        let opts = Opts::from_iter(&["otaboot-cli", "check"]);

        assert_eq!(opts.boot_config(), BootConfig::default());
        assert!(matches!(opts.command, Command::Check));
    }

    #[test]
    fn it_should_parse_the_inflate_command() {
        let opts = Opts::from_iter(&[
            "otaboot-cli",
            "--boot-offset",
            "0x2000",
            "inflate",
            "--raw",
            "in.deflate",
            "out.bin",
        ]);

        assert_eq!(opts.boot_offset, 0x2000);

        match opts.command {
            Command::Inflate(InflateOpts { input, output, raw }) => {
                assert_eq!(input, PathBuf::from("in.deflate"));
                assert_eq!(output, PathBuf::from("out.bin"));
                assert!(raw);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
