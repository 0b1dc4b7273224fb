//! Bridge configuration.
//!
//! All constants here are externally supplied: the bridge never computes
//! them. Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`VCOSIM_TIMEOUT_CYCLES`, etc.)
//! 2. Project-local config file (`./vcosim.toml`)
//! 3. User config file (`~/.config/vcosim/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # vcosim.toml
//!
//! # Watchdog window in DUT cycles
//! timeout_cycles = 10000
//!
//! # Outstanding reference instructions the queue may hold
//! queue_capacity = 8
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bridge configuration constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum outstanding reference instructions (pending-event queue depth).
    pub queue_capacity: usize,

    /// Watchdog window: cycles without a commit before the run is a hang.
    pub timeout_cycles: u64,

    /// Number of independently-ordered bus ports to track.
    pub channel_banks: usize,

    /// Negotiated maximum bytes one bus transaction may transfer.
    pub burst_bytes: u32,

    /// Bus width: bytes one beat may carry, and the natural write granule of
    /// the memory side; partial writes below this need a muxin read before
    /// committing.
    pub granule_bytes: u32,

    /// Bytes per architectural vector register (flat VRF stride).
    pub vrf_bytes_per_register: u32,

    /// Fixed memory latency applied to every transaction.
    pub memory_latency_cycles: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            timeout_cycles: 10_000,
            channel_banks: 2,
            burst_bytes: 64,
            granule_bytes: 8,
            vrf_bytes_per_register: 128,
            memory_latency_cycles: 4,
        }
    }
}

/// Partial configuration as it appears in a TOML file or the environment.
/// Only fields that are present override the base.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigOverlay {
    queue_capacity: Option<usize>,
    timeout_cycles: Option<u64>,
    channel_banks: Option<usize>,
    burst_bytes: Option<u32>,
    granule_bytes: Option<u32>,
    vrf_bytes_per_register: Option<u32>,
    memory_latency_cycles: Option<u64>,
}

impl BridgeConfig {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `vcosim.toml`
    /// 3. User config `~/.config/vcosim/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user) = Self::load_user_overlay() {
            config.merge(user);
        }
        if let Some(local) = Self::load_overlay_from(Path::new("vcosim.toml")) {
            config.merge(local);
        }
        config.apply_env_overrides();

        config
    }

    /// Load configuration from a specific TOML file on top of defaults.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let overlay = Self::load_overlay_from(path)?;
        let mut config = Self::default();
        config.merge(overlay);
        Some(config)
    }

    fn load_user_overlay() -> Option<ConfigOverlay> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("vcosim").join("config.toml");
        Self::load_overlay_from(&config_path)
    }

    fn load_overlay_from(path: &Path) -> Option<ConfigOverlay> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(overlay) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(overlay)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn merge(&mut self, overlay: ConfigOverlay) {
        if let Some(v) = overlay.queue_capacity {
            self.queue_capacity = v;
        }
        if let Some(v) = overlay.timeout_cycles {
            self.timeout_cycles = v;
        }
        if let Some(v) = overlay.channel_banks {
            self.channel_banks = v;
        }
        if let Some(v) = overlay.burst_bytes {
            self.burst_bytes = v;
        }
        if let Some(v) = overlay.granule_bytes {
            self.granule_bytes = v;
        }
        if let Some(v) = overlay.vrf_bytes_per_register {
            self.vrf_bytes_per_register = v;
        }
        if let Some(v) = overlay.memory_latency_cycles {
            self.memory_latency_cycles = v;
        }
    }

    fn apply_env_overrides(&mut self) {
        fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
            match std::env::var(name) {
                Ok(raw) => match raw.parse() {
                    Ok(v) => {
                        log::info!("Using {} from environment: {}", name, raw);
                        Some(v)
                    }
                    Err(_) => {
                        log::warn!("Ignoring unparseable {}={}", name, raw);
                        None
                    }
                },
                Err(_) => None,
            }
        }

        if let Some(v) = parse_env("VCOSIM_QUEUE_CAPACITY") {
            self.queue_capacity = v;
        }
        if let Some(v) = parse_env("VCOSIM_TIMEOUT_CYCLES") {
            self.timeout_cycles = v;
        }
        if let Some(v) = parse_env("VCOSIM_CHANNEL_BANKS") {
            self.channel_banks = v;
        }
        if let Some(v) = parse_env("VCOSIM_BURST_BYTES") {
            self.burst_bytes = v;
        }
        if let Some(v) = parse_env("VCOSIM_MEMORY_LATENCY") {
            self.memory_latency_cycles = v;
        }
    }

    /// Instant-memory variant for fast functional runs: no bus latency,
    /// generous watchdog.
    pub fn instant() -> Self {
        Self {
            memory_latency_cycles: 0,
            timeout_cycles: 1_000_000,
            ..Self::default()
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("vcosim").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# vcosim configuration
# Place this file at ~/.config/vcosim/config.toml or ./vcosim.toml

# Pending-event queue depth (how far the reference may run ahead)
queue_capacity = 8

# Watchdog window in DUT cycles
timeout_cycles = 10000

# Independently-ordered bus ports on the DUT memory interface
channel_banks = 2

# Negotiated maximum bytes per bus transaction
burst_bytes = 64

# Bus width / natural write granule of the memory side
granule_bytes = 8

# Bytes per architectural vector register
vrf_bytes_per_register = 128

# Fixed memory latency in cycles
memory_latency_cycles = 4
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.channel_banks, 2);
        assert_eq!(config.burst_bytes, 64);
    }

    #[test]
    fn test_instant() {
        let config = BridgeConfig::instant();
        assert_eq!(config.memory_latency_cycles, 0);
        assert!(config.timeout_cycles > BridgeConfig::default().timeout_cycles);
    }

    #[test]
    fn test_overlay_merge() {
        let mut base = BridgeConfig::default();
        let overlay: ConfigOverlay =
            toml::from_str("timeout_cycles = 42\nburst_bytes = 16").unwrap();
        base.merge(overlay);

        assert_eq!(base.timeout_cycles, 42);
        assert_eq!(base.burst_bytes, 16);
        // Untouched fields keep their defaults
        assert_eq!(base.queue_capacity, 8);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = BridgeConfig::sample_config();
        let parsed: BridgeConfig = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(parsed, BridgeConfig::default());
    }
}
