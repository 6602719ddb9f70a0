//! `ServerConnector` provides byte streams for the session driver.
//!
//! Connectors only establish the raw connection and, on request, upgrade it
//! to TLS. Everything happening on top of the bytes, including the
//! `<starttls/>` exchange itself, is driven by the
//! [`SessionNegotiator`][`crate::stanzastream::SessionNegotiator`].

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(feature = "tls-rust")]
pub mod starttls;
#[cfg(feature = "tls-rust")]
pub use starttls::StartTlsServerConnector;

#[cfg(feature = "insecure-tcp")]
pub mod tcp;
#[cfg(feature = "insecure-tcp")]
pub use tcp::TcpServerConnector;

mod dns;
pub use dns::{DnsConfig, DEFAULT_CLIENT_PORT};

/// Stream type handled by the driver.
pub trait AsyncReadAndWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadAndWrite for T {}

/// A connection as produced by a [`ServerConnector`].
pub type BoxedStream = Box<dyn AsyncReadAndWrite + 'static>;

/// Trait called to connect to an XMPP server, perhaps called multiple times
pub trait ServerConnector: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Open a connection to the server responsible for `domain`.
    fn connect(
        &self,
        domain: &str,
    ) -> impl core::future::Future<Output = io::Result<BoxedStream>> + Send;

    /// Whether [`start_tls`][`Self::start_tls`] is implemented.
    fn supports_encryption(&self) -> bool {
        false
    }

    /// Run a TLS handshake on `stream`, verifying the certificate against
    /// `domain`.
    ///
    /// Returns the encrypted stream and, if available, the
    /// `tls-exporter` channel binding data.
    fn start_tls(
        &self,
        stream: BoxedStream,
        domain: &str,
    ) -> impl core::future::Future<Output = io::Result<(BoxedStream, Option<Vec<u8>>)>> + Send
    {
        let _ = (stream, domain);
        async {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "this connector cannot start TLS",
            ))
        }
    }
}
