/// The flash offset the boot image is installed at, unless configured otherwise
pub const DEFAULT_BOOT_OFFSET: u32 = 0xA0000;

/// The artifact name an update is looked for under, unless configured otherwise
pub const DEFAULT_UPDATE_FILE: &str = "testload.gz";

/// Where the bootloader looks for its image and for updates to it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BootConfig {
    /// Flash address of the installed image's first header
    pub boot_offset: u32,
    /// Name of the gzip artifact in the artifact store
    pub update_file: String,
}

impl Default for BootConfig {
    fn default() -> BootConfig {
        BootConfig {
            boot_offset: DEFAULT_BOOT_OFFSET,
            update_file: DEFAULT_UPDATE_FILE.to_string(),
        }
    }
}
