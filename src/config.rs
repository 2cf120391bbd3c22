//! Server configuration, usually loaded from a TOML file.
//!
//! ```toml
//! address = "127.0.0.1"
//! udp_port = 5353
//! tcp_port = 5353
//! dot_port = 0
//! doh_port = 0
//! upstreams = ["udp://1.1.1.1", "https://dns.google/dns-query"]
//!
//! [[zones]]
//! file = "example.com.zone"
//! origin = "example.com."
//! ```
use crate::Error;
use crate::Result;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::{Host, Url};

/// Everything the [`Server`](crate::server::Server) needs to run. Every
/// field has a default, so an empty file is a valid (if unexciting) config.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The IP to listen on.
    pub address: IpAddr,

    /// Ports for each listener. Zero disables the listener.
    pub udp_port: u16,
    pub tcp_port: u16,
    pub dot_port: u16,
    pub doh_port: u16,

    /// PEM encoded certificate chain and private key, for the DoT and DoH
    /// listeners.
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,

    /// Upstream resolvers, see [`Upstream`].
    pub upstreams: Vec<String>,

    /// Don't verify upstream certificates.
    pub insecure_skip_verify: bool,

    pub timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub keepalive_secs: u64,

    /// Bound of each forward queue.
    pub queue_size: usize,

    pub prune_delay_secs: u64,
    pub prune_threshold_secs: u64,

    /// Most upstream answers to keep. Zero is unlimited.
    pub max_entries: usize,

    /// Where the cache is saved on stop, and loaded from on start.
    pub cache_file: Option<PathBuf>,

    pub zones: Vec<ZoneConfig>,
}

/// A zone file to serve.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub file: PathBuf,
    pub origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: 53,
            tcp_port: 53,
            dot_port: 853,
            doh_port: 443,
            tls_cert: None,
            tls_key: None,
            upstreams: Vec::new(),
            insecure_skip_verify: false,
            timeout_secs: 5,
            retry_delay_secs: 5,
            keepalive_secs: 30,
            queue_size: 1024,
            prune_delay_secs: 60,
            prune_threshold_secs: 3600,
            max_entries: 0,
            cache_file: None,
            zones: Vec::new(),
        }
    }
}

impl FromStr for ServerConfig {
    type Err = Error;

    /// Parses a TOML config.
    fn from_str(s: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl ServerConfig {
    /// Reads and parses the TOML config at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        s.parse()
    }

    /// Checks the fields make sense together.
    pub fn validate(&self) -> Result<()> {
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(Error::Config(
                "tls_cert and tls_key must be given together".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(Error::Config("queue_size must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 || self.prune_delay_secs == 0 || self.keepalive_secs == 0 {
            return Err(Error::Config(
                "timeout_secs, keepalive_secs and prune_delay_secs must be non-zero".to_string(),
            ));
        }

        self.upstreams()?;
        Ok(())
    }

    /// True if the DoT and DoH listeners have a certificate to use.
    pub fn has_tls(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// The parsed upstreams.
    pub fn upstreams(&self) -> Result<Vec<Upstream>> {
        self.upstreams.iter().map(|u| u.parse()).collect()
    }

    /// The address to listen on for `port`, or `None` if it is disabled.
    pub fn listen_addr(&self, port: u16) -> Option<SocketAddr> {
        match port {
            0 => None,
            port => Some(SocketAddr::new(self.address, port)),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn prune_delay(&self) -> Duration {
        Duration::from_secs(self.prune_delay_secs)
    }

    pub fn prune_threshold(&self) -> Duration {
        Duration::from_secs(self.prune_threshold_secs)
    }
}

/// An upstream resolver, parsed from a URI:
///
/// * `udp://ip[:port]` and `tcp://ip[:port]`, port 53 by default.
/// * `tls://host[:port]`, port 853 by default.
/// * `https://ip[:port]` (no path) is also DNS-over-TLS.
/// * `https://host/path` is DNS-over-HTTPS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Upstream {
    Udp(SocketAddr),
    Tcp(SocketAddr),
    Tls { host: String, port: u16 },
    Https(Url),
}

impl Upstream {
    /// True for the upstreams that are happy to take TCP originated queries,
    /// which may need answers larger than fit in a UDP response.
    pub fn is_stream(&self) -> bool {
        !matches!(self, Upstream::Udp(_))
    }
}

fn ip_of(url: &Url) -> Option<IpAddr> {
    match url.host()? {
        Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
        Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
        // Non-special schemes (udp, tcp, tls) leave IPv4 addresses as opaque domains.
        Host::Domain(domain) => domain.parse().ok(),
    }
}

impl FromStr for Upstream {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Config(format!("upstream '{}': {}", s, reason));

        let url = Url::parse(s).map_err(|e| invalid(&e.to_string()))?;
        let bare = matches!(url.path(), "" | "/") && url.query().is_none();

        match url.scheme() {
            "udp" | "tcp" => {
                let ip = ip_of(&url).ok_or_else(|| invalid("host must be an IP address"))?;
                let addr = SocketAddr::new(ip, url.port().unwrap_or(53));
                Ok(match url.scheme() {
                    "udp" => Upstream::Udp(addr),
                    _ => Upstream::Tcp(addr),
                })
            }
            "tls" => match url.host_str() {
                Some(host) if !host.is_empty() => Ok(Upstream::Tls {
                    host: host.to_string(),
                    port: url.port().unwrap_or(853),
                }),
                _ => Err(invalid("missing host")),
            },
            "https" => match ip_of(&url) {
                Some(ip) if bare => Ok(Upstream::Tls {
                    host: ip.to_string(),
                    port: url.port().unwrap_or(853),
                }),
                _ if url.host_str().is_none() => Err(invalid("missing host")),
                _ => Ok(Upstream::Https(url)),
            },
            scheme => Err(invalid(&format!("unsupported scheme '{}'", scheme))),
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Udp(addr) => write!(f, "udp://{}", addr),
            Upstream::Tcp(addr) => write!(f, "tcp://{}", addr),
            Upstream::Tls { host, port } if host.contains(':') => write!(f, "tls://[{}]:{}", host, port),
            Upstream::Tls { host, port } => write!(f, "tls://{}:{}", host, port),
            Upstream::Https(url) => url.fmt(f),
        }
    }
}
