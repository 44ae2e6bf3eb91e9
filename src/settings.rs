// src/settings.rs
//
// On-disk device profiles. Connection parameters and the command alphabet are
// configuration, stored as TOML, so a different firmware build only needs a
// different profile file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::CommandSet;
use crate::connection::{SerialConfig, DEFAULT_BAUD_RATE};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout in seconds. 0 means no timeout at all, an explicit opt-in
    /// to unbounded reads.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Command alphabet: single-character key, value is whether the command
    /// elicits one reply line.
    #[serde(default = "default_commands")]
    pub commands: HashMap<String, bool>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout_secs() -> u64 {
    2
}

fn default_commands() -> HashMap<String, bool> {
    [("r", false), ("g", false), ("b", false), ("o", false), ("t", true)]
        .into_iter()
        .map(|(c, reply)| (c.to_string(), reply))
        .collect()
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud_rate(),
            read_timeout_secs: default_read_timeout_secs(),
            commands: default_commands(),
        }
    }
}

impl DeviceProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to encode profile: {}", e)))?;
        std::fs::write(path, raw)
            .map_err(|e| Error::Config(format!("failed to write {}: {}", path.display(), e)))
    }

    /// Connection parameters carried by this profile.
    pub fn serial_config(&self) -> SerialConfig {
        let read_timeout = if self.read_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.read_timeout_secs))
        };
        SerialConfig::new(&self.port)
            .with_baud_rate(self.baud_rate)
            .with_read_timeout(read_timeout)
    }

    /// The profile's command alphabet. Keys must be single ASCII characters.
    pub fn command_set(&self) -> Result<CommandSet> {
        let mut set = CommandSet::default();
        for (key, expects_reply) in &self.commands {
            let mut chars = key.chars();
            let command = match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() => c,
                _ => {
                    return Err(Error::Config(format!(
                        "command key '{}' must be a single ASCII character",
                        key
                    )));
                }
            };
            set.insert(command, *expects_reply);
        }
        Ok(set)
    }
}
