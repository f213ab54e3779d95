//! `Section:Key` configuration loader.
//!
//! The on-disk config format predates TOML and isn't expressible as one:
//! bare `Key = Value` pairs grouped under `[Section]` headers, looked up
//! by a flattened `Section:Key` name. A console-variable registry would
//! solve the same "named, typed, defaulted setting" problem for a single
//! flat namespace, but doesn't fit a surface with repeated per-listener
//! and per-arena blocks, so this is a small hand-rolled parser instead:
//! plain `Result`-returning lookups with typed defaults, no generic
//! deserialization framework pulled in for a handful of sections.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("{section}:{key} is not a valid {expected}: {value:?}")]
    BadValue { section: String, key: String, expected: &'static str, value: String },
    #[error("listener {0} is missing a required Port")]
    MissingPort(String),
    #[error("no listener could be configured; at least one is required")]
    NoListeners,
}

/// Flat `Section:Key → raw string value` table, parsed once at startup.
pub struct RawConfig {
    values: HashMap<(String, String), String>,
}

impl RawConfig {
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        let mut section = String::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert((section.clone(), key.trim().to_string()), value.trim().to_string());
            }
        }
        Self { values }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Ok(Self::parse(&text))
    }

    fn raw(&self, section: &str, key: &str) -> Option<&str> {
        self.values.get(&(section.to_string(), key.to_string())).map(String::as_str)
    }

    pub fn str_or(&self, section: &str, key: &str, default: &str) -> String {
        self.raw(section, key).unwrap_or(default).to_string()
    }

    pub fn u64_or(&self, section: &str, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.raw(section, key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::BadValue {
                section: section.into(),
                key: key.into(),
                expected: "integer",
                value: v.into(),
            }),
        }
    }

    pub fn u16_or(&self, section: &str, key: &str, default: u16) -> Result<u16, ConfigError> {
        match self.raw(section, key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::BadValue {
                section: section.into(),
                key: key.into(),
                expected: "port number",
                value: v.into(),
            }),
        }
    }

    pub fn bool_or(&self, section: &str, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(section, key) {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::BadValue {
                    section: section.into(),
                    key: key.into(),
                    expected: "boolean",
                    value: v.into(),
                }),
            },
        }
    }

    fn sections_matching(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> =
            self.values.keys().map(|(section, _)| section.clone()).filter(|s| s.starts_with(prefix)).collect();
        names.sort();
        names.dedup();
        names
    }
}

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub drop_timeout_ms: u64,
    pub max_outlist_size: u64,
    pub max_retries: u64,
    pub per_packet_overhead: u64,
    pub ping_data_refresh_ms: u64,
    pub reliable_threads: u64,
    pub presized_queue_threshold: u64,
    pub presized_queue_packets: u64,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub name: String,
    pub port: u16,
    pub bind_address: IpAddr,
    pub allow_vie: bool,
    pub allow_cont: bool,
    pub connect_as: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub message_reliable: bool,
    pub flood_limit: u64,
    pub flood_shutup_secs: u64,
    pub command_limit: u64,
}

#[derive(Debug, Clone)]
pub struct ZoneConfig {
    pub net: NetConfig,
    pub listeners: Vec<ListenerConfig>,
    pub chat: ChatConfig,
    pub team_spectator_frequency: u64,
}

impl ZoneConfig {
    pub fn from_raw(raw: &RawConfig) -> Result<Self, ConfigError> {
        let net = NetConfig {
            drop_timeout_ms: raw.u64_or("Net", "DropTimeout", 3000)?,
            max_outlist_size: raw.u64_or("Net", "MaxOutlistSize", 200)?,
            max_retries: raw.u64_or("Net", "MaxRetries", 15)?,
            per_packet_overhead: raw.u64_or("Net", "PerPacketOverhead", 28)?,
            ping_data_refresh_ms: raw.u64_or("Net", "PingDataRefreshTime", 200)?,
            reliable_threads: raw.u64_or("Net", "ReliableThreads", 1)?,
            presized_queue_threshold: raw.u64_or("Net", "PresizedQueueThreshold", 5)?,
            presized_queue_packets: raw.u64_or("Net", "PresizedQueuePackets", 25)?,
        };

        let chat = ChatConfig {
            message_reliable: raw.bool_or("Chat", "MessageReliable", true)?,
            flood_limit: raw.u64_or("Chat", "FloodLimit", 10)?,
            flood_shutup_secs: raw.u64_or("Chat", "FloodShutup", 60)?,
            command_limit: raw.u64_or("Chat", "CommandLimit", 5)?,
        };

        let team_spectator_frequency = raw.u64_or("Team", "SpectatorFrequency", 8025)?;

        let mut listeners = Vec::new();
        for section in raw.sections_matching("Listen") {
            if !(section == "Listen" || section.strip_prefix("Listen").is_some_and(|n| n.parse::<u32>().is_ok())) {
                continue;
            }
            let port_str = raw.str_or(&section, "Port", "");
            if port_str.is_empty() {
                tracing::warn!(section = %section, "listener block has no Port, skipping");
                continue;
            }
            let port = raw.u16_or(&section, "Port", 0)?;
            let bind_str = raw.str_or(&section, "BindAddress", "0.0.0.0");
            let bind_address: IpAddr = bind_str.parse().map_err(|_| ConfigError::BadValue {
                section: section.clone(),
                key: "BindAddress".into(),
                expected: "IP address",
                value: bind_str.clone(),
            })?;
            listeners.push(ListenerConfig {
                name: section.clone(),
                port,
                bind_address,
                allow_vie: raw.bool_or(&section, "AllowVIE", true)?,
                allow_cont: raw.bool_or(&section, "AllowCont", true)?,
                connect_as: {
                    let v = raw.str_or(&section, "ConnectAs", "");
                    if v.is_empty() {
                        None
                    } else {
                        Some(v)
                    }
                },
            });
        }

        if listeners.is_empty() {
            return Err(ConfigError::NoListeners);
        }

        Ok(Self { net, listeners, chat, team_spectator_frequency })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_section_is_absent() {
        let raw = RawConfig::parse("");
        assert_eq!(raw.u64_or("Net", "DropTimeout", 3000).unwrap(), 3000);
    }

    #[test]
    fn explicit_value_overrides_default() {
        let raw = RawConfig::parse("[Net]\nDropTimeout = 5000\n");
        assert_eq!(raw.u64_or("Net", "DropTimeout", 3000).unwrap(), 5000);
    }

    #[test]
    fn missing_port_causes_listener_to_be_skipped_not_fatal() {
        let raw = RawConfig::parse("[Listen]\nBindAddress = 127.0.0.1\n\n[Listen1]\nPort = 5001\n");
        let config = ZoneConfig::from_raw(&raw).unwrap();
        assert_eq!(config.listeners.len(), 1);
        assert_eq!(config.listeners[0].port, 5001);
    }

    #[test]
    fn zero_listeners_is_a_fatal_config_error() {
        let raw = RawConfig::parse("[Net]\nDropTimeout = 1000\n");
        assert!(matches!(ZoneConfig::from_raw(&raw), Err(ConfigError::NoListeners)));
    }

    #[test]
    fn booleans_accept_common_spellings() {
        let raw = RawConfig::parse("[Listen]\nPort = 5000\nAllowVIE = no\n");
        let config = ZoneConfig::from_raw(&raw).unwrap();
        assert!(!config.listeners[0].allow_vie);
    }
}
