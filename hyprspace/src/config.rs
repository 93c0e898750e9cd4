//! Configuration file loading (spec §6 "Configuration file (JSON)"), grounded
//! on `original_source/config/config.go`'s `Read`, translated from the
//! original's YAML+peer.ID shape to the JSON document spec.md names.

use hyprspace_core::{Membership, PeerRecord, ServiceConfig};
use ip_network::IpNetwork;
use libp2p::{identity, Multiaddr, PeerId};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("parsing config file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("privateKey is not valid multibase: {0}")]
    PrivateKeyEncoding(multibase::Error),
    #[error("privateKey does not decode to a valid keypair: {0}")]
    PrivateKeyFormat(String),
    #[error("peer id {0:?} is not a valid peer id: {1}")]
    InvalidPeerId(String, String),
    #[error("listen address {0:?} is not a valid multiaddr: {1}")]
    InvalidMultiaddr(String, String),
    #[error("route {0:?} is not a valid CIDR: {1}")]
    InvalidCidr(String, String),
    #[error("service target {0:?} is not a valid multiaddr: {1}")]
    InvalidServiceTarget(String, String),
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "privateKey")]
    private_key: String,
    #[serde(rename = "listenAddresses")]
    listen_addresses: Vec<String>,
    peers: Vec<RawPeer>,
    #[serde(default)]
    services: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawPeer {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    routes: Vec<RawRoute>,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    net: String,
}

/// Everything derived from the configuration file: the node's own keypair,
/// the closed membership set, where to listen, and the locally registered
/// services.
pub struct LoadedConfig {
    pub keypair: identity::Keypair,
    pub membership: Membership,
    pub listen_addrs: Vec<Multiaddr>,
    pub services: Vec<ServiceConfig>,
}

pub fn load(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let raw: RawConfig =
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;

    let (_, key_bytes) =
        multibase::decode(&raw.private_key).map_err(ConfigError::PrivateKeyEncoding)?;
    let keypair = identity::Keypair::from_protobuf_encoding(&key_bytes)
        .map_err(|e| ConfigError::PrivateKeyFormat(e.to_string()))?;
    let local_id = PeerId::from(keypair.public());

    let listen_addrs = raw
        .listen_addresses
        .iter()
        .map(|a| {
            a.parse::<Multiaddr>()
                .map_err(|e| ConfigError::InvalidMultiaddr(a.clone(), e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let peers = raw
        .peers
        .into_iter()
        .map(|p| {
            let id = p
                .id
                .parse::<PeerId>()
                .map_err(|e| ConfigError::InvalidPeerId(p.id.clone(), e.to_string()))?;
            let routes = p
                .routes
                .iter()
                .map(|r| {
                    r.net
                        .parse::<IpNetwork>()
                        .map_err(|e| ConfigError::InvalidCidr(r.net.clone(), e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PeerRecord::new(id, p.name, routes, Vec::new()))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let membership = Membership {
        local_id,
        peers,
    };

    let services = raw
        .services
        .into_iter()
        .map(|(name, target)| {
            let target = target
                .parse::<Multiaddr>()
                .map_err(|e| ConfigError::InvalidServiceTarget(target.clone(), e.to_string()))?;
            Ok(ServiceConfig { name, target })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(LoadedConfig {
        keypair,
        membership,
        listen_addrs,
        services,
    })
}

/// Default config path for `interface`, mirroring `cli/up.go`'s
/// `/etc/hyprspace/<name>.json` fallback.
pub fn default_path(interface: &str) -> PathBuf {
    PathBuf::from(format!("/etc/hyprspace/{interface}.json"))
}

/// PID lockfile path next to the config, per spec §6 "Persisted state".
pub fn lockfile_path(config_path: &Path, interface: &str) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{interface}.lock"))
}
