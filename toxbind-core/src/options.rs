//! Configuration builder: user-facing options to the engine's fixed-layout
//! options record.
//!
//! Proxy parsing is permissive. A proxy string or table that does not name an
//! HTTP or SOCKS5 proxy resolves to "no proxy" and is never an error.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ffi::{
    RawOptions, MAX_PROXY_ADDRESS_LEN, PROXY_TYPE_HTTP, PROXY_TYPE_NONE, PROXY_TYPE_SOCKS5,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks5,
}

impl ProxyKind {
    /// Case-insensitive; `socks` is an alias for `socks5`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "socks" | "socks5" => Some(Self::Socks5),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Self::Http => PROXY_TYPE_HTTP,
            Self::Socks5 => PROXY_TYPE_SOCKS5,
        }
    }
}

/// Outbound proxy. The address always fits the engine's 256-byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    kind: ProxyKind,
    address: String,
    port: u16,
}

impl ProxySpec {
    /// Truncates `address` at the first NUL and to at most 255 bytes.
    pub fn new(kind: ProxyKind, address: &str, port: u16) -> Self {
        Self {
            kind,
            address: fit_address(address).to_owned(),
            port,
        }
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn fit_address(address: &str) -> &str {
    let address = match address.find('\0') {
        Some(i) => &address[..i],
        None => address,
    };
    if address.len() <= MAX_PROXY_ADDRESS_LEN {
        return address;
    }
    let mut end = MAX_PROXY_ADDRESS_LEN;
    while !address.is_char_boundary(end) {
        end -= 1;
    }
    &address[..end]
}

/// Parse `scheme://host:port`. Returns `None` for anything else.
pub fn parse_proxy_url(s: &str) -> Option<ProxySpec> {
    let (scheme, rest) = s.trim().split_once("://")?;
    let kind = ProxyKind::parse(scheme)?;
    let rest = rest.trim_end_matches('/');
    let (host, port) = rest.rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some(ProxySpec::new(kind, host, port))
}

/// Structured proxy as given in a config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTable {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
    pub port: u16,
}

/// Proxy as supplied by the user: a `type://host:port` string or a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxyOption {
    Url(String),
    Table(ProxyTable),
}

impl ProxyOption {
    pub fn resolve(&self) -> Option<ProxySpec> {
        let spec = match self {
            ProxyOption::Url(s) => parse_proxy_url(s),
            ProxyOption::Table(t) => {
                ProxyKind::parse(&t.kind).map(|kind| ProxySpec::new(kind, &t.address, t.port))
            }
        };
        if spec.is_none() {
            debug!(proxy = ?self, "unrecognized proxy; continuing without one");
        }
        spec
    }
}

impl From<&str> for ProxyOption {
    fn from(s: &str) -> Self {
        ProxyOption::Url(s.to_owned())
    }
}

/// User-supplied engine options. Missing fields take engine defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub ipv6: bool,
    pub udp: bool,
    pub proxy: Option<ProxyOption>,
    pub port_range: Option<(u16, u16)>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            ipv6: false,
            udp: true,
            proxy: None,
            port_range: None,
        }
    }
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ipv6(mut self, enable: bool) -> Self {
        self.ipv6 = enable;
        self
    }

    pub fn with_udp(mut self, enable: bool) -> Self {
        self.udp = enable;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<ProxyOption>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = Some((start, end));
        self
    }
}

/// Resolved configuration handed to the engine at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfiguration {
    pub ipv6_enabled: bool,
    pub udp_enabled: bool,
    pub proxy: Option<ProxySpec>,
    pub port_range: Option<(u16, u16)>,
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        build(&BuildOptions::default())
    }
}

impl EngineConfiguration {
    pub fn to_raw(&self) -> RawOptions {
        let mut raw = RawOptions::zeroed();
        raw.ipv6_enabled = u8::from(self.ipv6_enabled);
        raw.udp_disabled = u8::from(!self.udp_enabled);
        match &self.proxy {
            Some(p) => {
                raw.proxy_type = p.kind.as_raw();
                let bytes = p.address.as_bytes();
                raw.proxy_address[..bytes.len()].copy_from_slice(bytes);
                raw.proxy_port = p.port;
            }
            None => raw.proxy_type = PROXY_TYPE_NONE,
        }
        if let Some((start, end)) = self.port_range {
            raw.start_port = start;
            raw.end_port = end;
        }
        raw
    }
}

/// Pure transform from user options to an [`EngineConfiguration`].
pub fn build(options: &BuildOptions) -> EngineConfiguration {
    EngineConfiguration {
        ipv6_enabled: options.ipv6,
        udp_enabled: options.udp,
        proxy: options.proxy.as_ref().and_then(ProxyOption::resolve),
        port_range: options.port_range.and_then(normalize_port_range),
    }
}

fn normalize_port_range((start, end): (u16, u16)) -> Option<(u16, u16)> {
    if start == 0 {
        return None;
    }
    if start > end {
        Some((end, start))
    } else {
        Some((start, end))
    }
}
