// Copyright (c) 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! tokio driver for the [`SessionNegotiator`].

use core::pin::Pin;
use core::task::{Context, Poll};

use futures::{ready, Stream};
use minidom::Element;
use tokio::sync::{mpsc, oneshot};
use xmpp_parsers::jid::Jid;

use crate::{
    connect::ServerConnector,
    error::Error,
    event::Event,
    stanzastream::{RequestHandle, SessionNegotiator},
};

#[cfg(any(feature = "tls-rust", feature = "insecure-tcp"))]
use crate::{config::SessionConfig, connect::DnsConfig};
#[cfg(feature = "tls-rust")]
use crate::connect::StartTlsServerConnector;
#[cfg(feature = "insecure-tcp")]
use crate::connect::TcpServerConnector;

mod worker;


use self::worker::{ClientWorker, Command};

/// Cloneable handle to send commands to a running [`Client`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ClientHandle {
    fn command(&self, command: Command) -> Result<(), Error> {
        self.commands.send(command).map_err(|_| Error::Disconnected)
    }

    /// Send a stanza.
    ///
    /// While the session is suspended and resumable, the stanza is buffered
    /// and sent after resumption. Fails with [`Error::Disconnected`] if the
    /// session can take no stanzas.
    pub async fn send_stanza(&self, stanza: Element) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::SendStanza(stanza, tx))?;
        match rx.await {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(Error::Disconnected),
        }
    }

    /// Send an IQ `get` or `set` and obtain a handle for its response.
    pub async fn send_request(&self, request: Element) -> Result<RequestHandle, Error> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::SendRequest(request, tx))?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Close the session cleanly.
    ///
    /// A [`Event::Disconnected`] without error follows once the peer
    /// closed its side of the stream.
    pub fn disconnect(&self) -> Result<(), Error> {
        self.command(Command::Disconnect)
    }

    /// Connect again after a disconnect.
    ///
    /// A suspended session is resumed if the server still holds it.
    pub fn reconnect(&self) -> Result<(), Error> {
        self.command(Command::Reconnect)
    }
}

/// XMPP client connection and state
///
/// This implements the `futures` crate's [`Stream`](#impl-Stream) to receive
/// session events as well as stanzas received via the stream.
///
/// The session runs in a task of its own; the client and any
/// [`ClientHandle`] only exchange messages with it. Dropping every handle
/// closes the session.
pub struct Client {
    events: mpsc::UnboundedReceiver<Event>,
    handle: ClientHandle,
    bound_jid: Option<Jid>,
}

impl Client {
    /// Start a client driving `negotiator` over connections from
    /// `connector`.
    ///
    /// Must be called within a tokio runtime. Connecting begins
    /// immediately.
    pub fn new_with_connector<C: ServerConnector>(
        negotiator: SessionNegotiator,
        connector: C,
    ) -> Self {
        let (commands, events) = ClientWorker::spawn(negotiator, connector);
        Self {
            events,
            handle: ClientHandle { commands },
            bound_jid: None,
        }
    }

    /// Get the client's bound JID (the one reported by the XMPP
    /// server).
    pub fn bound_jid(&self) -> Option<&Jid> {
        self.bound_jid.as_ref()
    }

    /// A handle for use from other tasks.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// See [`ClientHandle::send_stanza`].
    pub async fn send_stanza(&self, stanza: Element) -> Result<(), Error> {
        self.handle.send_stanza(stanza).await
    }

    /// See [`ClientHandle::send_request`].
    pub async fn send_request(&self, request: Element) -> Result<RequestHandle, Error> {
        self.handle.send_request(request).await
    }

    /// See [`ClientHandle::disconnect`].
    pub fn disconnect(&self) -> Result<(), Error> {
        self.handle.disconnect()
    }

    /// See [`ClientHandle::reconnect`].
    pub fn reconnect(&self) -> Result<(), Error> {
        self.handle.reconnect()
    }
}

#[cfg(feature = "tls-rust")]
impl Client {
    /// Start a new XMPP client using StartTLS transport
    ///
    /// Start polling the returned instance so that it will connect
    /// and yield events.
    pub fn new(config: SessionConfig) -> Self {
        Self::new_starttls(config, DnsConfig::default())
    }

    /// Start a new XMPP client with StartTLS transport and specific DNS config
    pub fn new_starttls(config: SessionConfig, dns_config: DnsConfig) -> Self {
        Self::new_with_connector(
            SessionNegotiator::new(config),
            StartTlsServerConnector::from(dns_config),
        )
    }
}

#[cfg(feature = "insecure-tcp")]
impl Client {
    /// Start a new XMPP client with plaintext insecure connection and specific DNS config
    pub fn new_plaintext(config: SessionConfig, dns_config: DnsConfig) -> Self {
        Self::new_with_connector(
            SessionNegotiator::new(config),
            TcpServerConnector::from(dns_config),
        )
    }
}

/// Incoming XMPP events
///
/// In an `async fn` you may want to use this with `use
/// futures::stream::StreamExt;`
impl Stream for Client {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let event = ready!(self.events.poll_recv(cx));
        match event {
            Some(Event::Online(ref info)) => self.bound_jid = info.bound_jid.clone(),
            Some(Event::Disconnected {
                can_resume: false, ..
            }) => self.bound_jid = None,
            _ => (),
        }
        Poll::Ready(event)
    }
}
