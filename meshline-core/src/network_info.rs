//! Advisory network metadata passed into `estimate_success` and `create`.
//!
//! `NetworkInfo` is deliberately a loose, partially-populated bag of hints
//! rather than a strict struct with required fields: the environment probe
//! fills in what it can observe locally, the application may supply
//! additional known facts about the remote peer (its IP, its HTTP base
//! URL), and every factory treats absent fields as `unknown`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Lan,
    Wifi,
    Internet,
    Unknown,
}

impl Default for NetworkType {
    fn default() -> Self {
        NetworkType::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatType {
    Open,
    Cone,
    Symmetric,
    Blocked,
    Unknown,
}

impl Default for NatType {
    fn default() -> Self {
        NatType::Unknown
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub peer_ip: Option<String>,
    pub peer_http_url: Option<String>,
    #[serde(default)]
    pub network_type: NetworkType,
    #[serde(default)]
    pub nat_type: NatType,
    pub local_ip: Option<String>,
}

impl NetworkInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer_ip(mut self, peer_ip: impl Into<String>) -> Self {
        self.peer_ip = Some(peer_ip.into());
        self
    }

    pub fn with_peer_http_url(mut self, url: impl Into<String>) -> Self {
        self.peer_http_url = Some(url.into());
        self
    }

    pub fn with_network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    pub fn with_nat_type(mut self, nat_type: NatType) -> Self {
        self.nat_type = nat_type;
        self
    }

    pub fn with_local_ip(mut self, local_ip: impl Into<String>) -> Self {
        self.local_ip = Some(local_ip.into());
        self
    }
}
