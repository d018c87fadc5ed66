//! Server configuration: a TOML file created with defaults on first run.
//!
//! The device UUID is generated once and written back, so the identity a
//! control point has cached keeps resolving across restarts.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_ip_address() -> String {
    "any".to_string()
}

fn default_doc_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_announce_as() -> String {
    "YADA".to_string()
}

fn default_samsung_extensions() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Local interface to bind; `"any"` means the first available.
    #[serde(default = "default_ip_address")]
    pub ip_address: String,
    /// TCP port; 0 lets the kernel choose an ephemeral one.
    #[serde(default)]
    pub port: u16,
    /// Directory served at `/` for paths that are not media items.
    #[serde(default = "default_doc_root")]
    pub doc_root_path: PathBuf,
    /// Device UUID; generated on first run when empty.
    #[serde(default)]
    pub uuid: String,
    /// The friendlyName shown by control points.
    #[serde(default = "default_announce_as")]
    pub announce_as: String,
    /// Answer the vendor index-lookup action.
    #[serde(default = "default_samsung_extensions")]
    pub samsung_extensions: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            ip_address: default_ip_address(),
            port: 0,
            doc_root_path: default_doc_root(),
            uuid: String::new(),
            announce_as: default_announce_as(),
            samsung_extensions: default_samsung_extensions(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Peers allowed to talk to us, when enforced.
    #[serde(default)]
    pub allowed_ips: Vec<IpAddr>,
    #[serde(default)]
    pub enforce: bool,
}

impl Config {
    /// Load the configuration, creating the file with defaults when it
    /// does not exist. A missing UUID is generated and persisted either way.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            Config {
                server: ServerConfig::default(),
                access: AccessConfig::default(),
            }
        };

        let mut dirty = !path.exists();
        if config.server.uuid.is_empty() {
            config.server.uuid = Uuid::new_v4().to_string();
            dirty = true;
        }
        if dirty {
            config.save(path)?;
        }
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let content = toml::to_string_pretty(self).context("failed to serialize configuration")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// The address to bind and advertise. `"any"` resolves to the primary
    /// outbound interface, falling back to loopback.
    pub fn bind_ip(&self) -> IpAddr {
        if self.server.ip_address.is_empty() || self.server.ip_address == "any" {
            detect_local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        } else {
            self.server
                .ip_address
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        }
    }

    /// Whether a peer may talk to us at all.
    pub fn peer_allowed(&self, peer: IpAddr) -> bool {
        !self.access.enforce || self.access.allowed_ips.contains(&peer)
    }
}

/// Find the interface the OS would route multicast through, without
/// sending anything: a connected UDP socket reveals the chosen source
/// address.
pub fn detect_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("239.255.255.250:1900").ok()?;
    let local = socket.local_addr().ok()?.ip();
    if local.is_unspecified() {
        None
    } else {
        Some(local)
    }
}
