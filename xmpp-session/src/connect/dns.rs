use std::fmt;
use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;

/// Default port for client-to-server connections.
pub const DEFAULT_CLIENT_PORT: u16 = 5222;

/// Where to connect to
#[derive(Clone, Debug)]
pub enum DnsConfig {
    /// Connect to the A/AAAA records of the JID's domain
    Domain {
        /// Server port
        port: u16,
    },

    /// Manually define server host and port
    NoSrv {
        /// Server host name
        host: String,
        /// Server port
        port: u16,
    },

    /// Manually define IP: port
    Addr {
        /// IP:port
        addr: String,
    },
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self::Domain {
            port: DEFAULT_CLIENT_PORT,
        }
    }
}

impl fmt::Display for DnsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain { port } => write!(f, "<domain>:{}", port),
            Self::NoSrv { host, port } => write!(f, "{}:{}", host, port),
            Self::Addr { addr } => write!(f, "{}", addr),
        }
    }
}

impl DnsConfig {
    /// Constructor for DnsConfig::NoSrv variant
    pub fn no_srv(host: &str, port: u16) -> Self {
        Self::NoSrv {
            host: host.to_string(),
            port,
        }
    }

    /// Constructor for DnsConfig::Addr variant
    pub fn addr(addr: &str) -> Self {
        Self::Addr {
            addr: addr.to_string(),
        }
    }

    /// Try resolve the DnsConfig to a TcpStream for `domain`
    pub async fn resolve(&self, domain: &str) -> io::Result<TcpStream> {
        match self {
            Self::Domain { port } => Self::resolve_no_srv(domain, *port).await,
            Self::NoSrv { host, port } => Self::resolve_no_srv(host, *port).await,
            Self::Addr { addr } => {
                let addr: SocketAddr = addr
                    .parse()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                log::debug!("Attempting connection to {addr}");
                TcpStream::connect(addr).await
            }
        }
    }

    async fn resolve_no_srv(host: &str, port: u16) -> io::Result<TcpStream> {
        log::debug!("Attempting connection to {host}:{port}");
        // tokio tries every resolved address in turn.
        TcpStream::connect((host, port)).await
    }
}
