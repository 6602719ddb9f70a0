//! `starttls::StartTlsServerConnector` provides a `ServerConnector` for
//! connections upgraded with `<starttls/>`

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use tokio_rustls::{
    client::TlsStream,
    rustls::pki_types::{InvalidDnsNameError, ServerName},
    rustls::{ClientConfig, Error as TlsError, ProtocolVersion, RootCertStore},
    TlsConnector,
};

use crate::connect::{BoxedStream, DnsConfig, ServerConnector};

/// Connect via TCP+StartTLS to an XMPP server
#[derive(Debug, Clone, Default)]
pub struct StartTlsServerConnector(pub DnsConfig);

impl From<DnsConfig> for StartTlsServerConnector {
    fn from(dns_config: DnsConfig) -> StartTlsServerConnector {
        Self(dns_config)
    }
}

impl ServerConnector for StartTlsServerConnector {
    async fn connect(&self, domain: &str) -> io::Result<BoxedStream> {
        let stream = self.0.resolve(domain).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn supports_encryption(&self) -> bool {
        true
    }

    async fn start_tls(
        &self,
        stream: BoxedStream,
        domain: &str,
    ) -> io::Result<(BoxedStream, Option<Vec<u8>>)> {
        let tls_stream = get_tls_stream(stream, domain).await?;
        let binding = channel_binding(&tls_stream)?;
        Ok((Box::new(tls_stream), binding))
    }
}

async fn get_tls_stream(stream: BoxedStream, domain: &str) -> io::Result<TlsStream<BoxedStream>> {
    let domain = ServerName::try_from(domain.to_owned()).map_err(StartTlsError::DnsNameError)?;
    let mut root_store = RootCertStore::empty();
    #[cfg(feature = "webpki-roots")]
    {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    #[cfg(feature = "rustls-native-certs")]
    {
        root_store.add_parsable_certificates(rustls_native_certs::load_native_certs()?);
    }
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
        .connect(domain, stream)
        .await
}

/// `tls-exporter` channel binding (RFC 9266) for TLS 1.3 connections.
fn channel_binding(stream: &TlsStream<BoxedStream>) -> io::Result<Option<Vec<u8>>> {
    let (_, connection) = stream.get_ref();
    match connection.protocol_version() {
        // TODO: Add support for tls-unique on TLS 1.2 and earlier.
        Some(ProtocolVersion::TLSv1_3) => {
            let data = vec![0u8; 32];
            let data = connection
                .export_keying_material(data, b"EXPORTER-Channel-Binding", None)
                .map_err(StartTlsError::Tls)?;
            Ok(Some(data))
        }
        _ => Ok(None),
    }
}

/// StartTLS ServerConnector Error
#[derive(Debug)]
pub enum StartTlsError {
    /// TLS error
    Tls(TlsError),
    /// DNS name parsing error
    DnsNameError(InvalidDnsNameError),
}

impl fmt::Display for StartTlsError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tls(e) => write!(fmt, "TLS error: {}", e),
            Self::DnsNameError(e) => write!(fmt, "DNS name error: {}", e),
        }
    }
}

impl StdError for StartTlsError {}

impl From<StartTlsError> for io::Error {
    fn from(e: StartTlsError) -> Self {
        let kind = match e {
            StartTlsError::Tls(_) => io::ErrorKind::InvalidData,
            StartTlsError::DnsNameError(_) => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, e)
    }
}
