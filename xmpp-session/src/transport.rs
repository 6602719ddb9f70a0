//! The byte transport seen by the session engine.
//!
//! The engine never performs I/O itself. It hands outgoing bytes and
//! control requests (start TLS, disconnect) to a [`Transport`], and is told
//! about incoming bytes and transport state changes by its driver.

use bytes::{Bytes, BytesMut};
use sasl::common::ChannelBinding;

/// Capabilities of the underlying connection.
pub trait Transport {
    /// Queue bytes for transmission. Returns `false` if the transport is not
    /// connected.
    fn send_data(&mut self, data: &[u8]) -> bool;

    /// Whether the connection is up.
    fn is_connected(&self) -> bool;

    /// Whether the connection is protected by TLS.
    fn is_encrypted(&self) -> bool;

    /// Whether [`start_encryption`][`Self::start_encryption`] can work.
    fn supports_encryption(&self) -> bool;

    /// Begin the TLS handshake on the existing connection.
    ///
    /// The driver reports completion back to the engine with
    /// [`SessionNegotiator::handle_encrypted`][`crate::stanzastream::SessionNegotiator::handle_encrypted`].
    fn start_encryption(&mut self);

    /// Close the connection after flushing everything queued so far.
    fn disconnect(&mut self);

    /// Channel binding data for SCRAM-PLUS mechanisms.
    fn channel_binding(&self) -> ChannelBinding {
        ChannelBinding::None
    }
}

/// A [`Transport`] which buffers outgoing data and control requests for a
/// driver to act upon.
#[derive(Debug, Default)]
pub struct BufferedTransport {
    tx: BytesMut,
    connected: bool,
    encrypted: bool,
    supports_encryption: bool,
    tls_requested: bool,
    close_requested: bool,
    tls_exporter: Option<Vec<u8>>,
}

impl BufferedTransport {
    /// A disconnected transport.
    pub fn new(supports_encryption: bool) -> Self {
        Self {
            supports_encryption,
            ..Default::default()
        }
    }

    /// A connected plaintext transport without TLS support.
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    /// Mark the connection as established, clearing any stale state.
    pub fn set_connected(&mut self, encrypted: bool) {
        self.tx.clear();
        self.connected = true;
        self.encrypted = encrypted;
        self.tls_requested = false;
        self.close_requested = false;
        self.tls_exporter = None;
    }

    /// Mark the connection as gone.
    pub fn set_disconnected(&mut self) {
        self.connected = false;
        self.encrypted = false;
        self.tls_requested = false;
        self.tls_exporter = None;
    }

    /// Mark the TLS handshake as completed.
    pub fn set_encrypted(&mut self, tls_exporter: Option<Vec<u8>>) {
        self.encrypted = true;
        self.tls_exporter = tls_exporter;
    }

    /// Set whether this transport can start TLS.
    pub fn set_supports_encryption(&mut self, supported: bool) {
        self.supports_encryption = supported;
    }

    /// Take everything queued for transmission.
    pub fn take_outgoing(&mut self) -> Bytes {
        self.tx.split().freeze()
    }

    /// Whether data is waiting to be transmitted.
    pub fn has_outgoing(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Whether a TLS handshake was requested since the last call.
    pub fn take_tls_request(&mut self) -> bool {
        core::mem::take(&mut self.tls_requested)
    }

    /// Whether a disconnect was requested since the last call.
    pub fn take_close_request(&mut self) -> bool {
        core::mem::take(&mut self.close_requested)
    }
}

impl Transport for BufferedTransport {
    fn send_data(&mut self, data: &[u8]) -> bool {
        if !self.connected {
            return false;
        }
        self.tx.extend_from_slice(data);
        true
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn supports_encryption(&self) -> bool {
        self.supports_encryption
    }

    fn start_encryption(&mut self) {
        self.tls_requested = true;
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.close_requested = true;
        }
        self.connected = false;
    }

    fn channel_binding(&self) -> ChannelBinding {
        match self.tls_exporter {
            Some(ref data) => ChannelBinding::TlsExporter(data.clone()),
            None => ChannelBinding::None,
        }
    }
}
