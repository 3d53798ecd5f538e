//! TOML configuration surface: node identity, virtual interface, peers
//! with their routed prefixes, and the radio parameters.

use anyhow::Context;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;

fn default_queue_size() -> usize {
    8
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub general: General,
    #[serde(default)]
    pub peers: Vec<Peer>,
    pub radio: Radio,
}

#[derive(Clone, Debug, Deserialize)]
pub struct General {
    pub callsign: String,
    #[serde(default = "default_queue_size")]
    pub tx_queue_size: usize,
    #[serde(default = "default_queue_size")]
    pub rx_queue_size: usize,
    pub net_if: NetIf,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NetIf {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mtu: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Peer {
    pub callsign: String,
    pub ip: Ipv4Addr,
    #[serde(default)]
    pub routes: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Radio {
    pub device: String,
    pub tx_frequency: u64,
    pub rx_frequency: u64,
    pub k_mod: f32,
    #[serde(default)]
    pub ppm: f32,
}

/// An IPv4 prefix in CIDR notation; a bare address routes a single host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Route {
    pub network: Ipv4Addr,
    pub mask_len: u8,
}

impl Route {
    fn mask(&self) -> u32 {
        if self.mask_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.mask_len)
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (u32::from(ip) & self.mask()) == u32::from(self.network)
    }
}

impl FromStr for Route {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => {
                let len: u8 = len
                    .parse()
                    .with_context(|| format!("invalid mask length in route {s:?}"))?;
                (addr, len)
            }
            None => (s, 32),
        };
        if len > 32 {
            anyhow::bail!("mask length {len} out of range in route {s:?}");
        }
        let ip: Ipv4Addr = addr
            .parse()
            .with_context(|| format!("invalid network address in route {s:?}"))?;
        let masked = if len == 0 {
            0
        } else {
            u32::from(ip) & (u32::MAX << (32 - len))
        };
        Ok(Route {
            network: Ipv4Addr::from(masked),
            mask_len: len,
        })
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read config file {path}"))?;
        let cfg: Config = toml::from_str(&content).context("parse config toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        crate::callsign::encode(&self.general.callsign)
            .context("general.callsign is not a valid callsign")?;
        for peer in &self.peers {
            crate::callsign::encode(&peer.callsign)
                .with_context(|| format!("peer {:?} has an invalid callsign", peer.callsign))?;
            for route in &peer.routes {
                route
                    .parse::<Route>()
                    .with_context(|| format!("peer {:?}", peer.callsign))?;
            }
        }
        Ok(())
    }
}
