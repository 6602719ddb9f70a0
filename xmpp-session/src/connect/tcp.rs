//! `tcp::TcpServerConnector` provides a `ServerConnector` for plaintext TCP connections

use std::io;

use crate::connect::{BoxedStream, DnsConfig, ServerConnector};

/// Connect via insecure plaintext TCP to an XMPP server
/// This should only be used over localhost or otherwise when you know what you are doing
#[derive(Debug, Clone, Default)]
pub struct TcpServerConnector(pub DnsConfig);

impl From<DnsConfig> for TcpServerConnector {
    fn from(dns_config: DnsConfig) -> TcpServerConnector {
        Self(dns_config)
    }
}

impl ServerConnector for TcpServerConnector {
    async fn connect(&self, domain: &str) -> io::Result<BoxedStream> {
        let stream = self.0.resolve(domain).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
