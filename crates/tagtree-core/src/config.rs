//! Tree configuration.
//!
//! Arena growth policy, compression level and decoder limits. Loaded from a
//! TOML file; anything missing or unreadable falls back to the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::arena::{FILE_PAGE_SIZE, REGION_PAGE_SIZE};
use crate::decode::MAX_DEPTH;

/// Configuration file name.
pub const CONFIG_FILE: &str = "tagtree.toml";

/// Parameters used when decoding and saving trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    // === Arena ===
    /// Growth granularity for standalone files, in bytes
    pub file_page_size: usize,
    /// Growth granularity for region entries, in bytes
    pub region_page_size: usize,
    /// Bytes reserved up front when decoding a region entry
    pub region_initial_capacity: usize,

    // === Codec ===
    /// zlib/gzip level used on save (0-9)
    pub compression_level: u32,
    /// Place chunk section tables at fixed offsets
    pub section_layout: bool,
    /// Nesting limit for compounds and lists
    pub max_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            file_page_size: FILE_PAGE_SIZE,
            region_page_size: REGION_PAGE_SIZE,
            region_initial_capacity: 100 * 1024,

            compression_level: 9,
            section_layout: true,
            max_depth: MAX_DEPTH,
        }
    }
}

impl TreeConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match fs::File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}");
                    return Self::default();
                }

                match toml::from_str::<Self>(&contents) {
                    Ok(mut config) => {
                        config.validate();
                        info!("Loaded config from {}", path.display());
                        config
                    },
                    Err(e) => {
                        warn!("Failed to parse config file: {e}");
                        Self::default()
                    },
                }
            },
            Err(e) => {
                warn!("Failed to open config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp values to usable ranges.
    pub fn validate(&mut self) {
        // Pages must keep allocations 4-byte aligned
        self.file_page_size = self.file_page_size.clamp(64, 1 << 20).next_multiple_of(4);
        self.region_page_size = self.region_page_size.clamp(64, 1 << 20).next_multiple_of(4);
        self.region_initial_capacity = self.region_initial_capacity.min(64 << 20);

        self.compression_level = self.compression_level.min(9);
        self.max_depth = self.max_depth.clamp(1, MAX_DEPTH);
    }
}
