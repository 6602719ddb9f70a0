// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::fmt;
use std::io;

use minidom::Element;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::{mpsc, oneshot},
    time::Instant,
};

use crate::connect::{BoxedStream, ServerConnector};
use crate::error::{Error, TimeoutKind};
use crate::event::Event;
use crate::stanzastream::{RequestHandle, SessionNegotiator, SessionPhase};
use crate::transport::BufferedTransport;

const READ_BUFFER_SIZE: usize = 4096;

pub(super) enum Command {
    SendStanza(Element, oneshot::Sender<bool>),
    SendRequest(Element, oneshot::Sender<Result<RequestHandle, Error>>),
    Disconnect,
    Reconnect,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SendStanza(..) => f.write_str("SendStanza"),
            Command::SendRequest(..) => f.write_str("SendRequest"),
            Command::Disconnect => f.write_str("Disconnect"),
            Command::Reconnect => f.write_str("Reconnect"),
        }
    }
}

/// Owns the negotiator and the connection; runs as a single task.
pub(super) struct ClientWorker<C: ServerConnector> {
    negotiator: SessionNegotiator,
    transport: BufferedTransport,
    connector: C,
    stream: Option<BoxedStream>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<Event>,
}

async fn read_from(stream: &mut Option<BoxedStream>, buf: &mut [u8]) -> io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => core::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => core::future::pending().await,
    }
}

impl<C: ServerConnector> ClientWorker<C> {
    pub(super) fn spawn(
        negotiator: SessionNegotiator,
        connector: C,
    ) -> (
        mpsc::UnboundedSender<Command>,
        mpsc::UnboundedReceiver<Event>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = BufferedTransport::new(connector.supports_encryption());
        let worker = Self {
            negotiator,
            transport,
            connector,
            stream: None,
            commands: command_rx,
            events: event_tx,
        };
        tokio::spawn(worker.run());
        (command_tx, event_rx)
    }

    async fn run(mut self) {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut handles_dropped = false;
        self.connect().await;
        loop {
            if handles_dropped && self.stream.is_none() {
                break;
            }
            let deadline = self.negotiator.next_deadline();
            tokio::select! {
                result = read_from(&mut self.stream, &mut buf) => match result {
                    Ok(0) => self.connection_lost(None),
                    Ok(n) => {
                        log::trace!("read {} bytes", n);
                        self.negotiator
                            .handle_data(&buf[..n], &mut self.transport, Instant::now());
                    }
                    Err(e) => self.connection_lost(Some(e.into())),
                },
                command = self.commands.recv(), if !handles_dropped => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        log::debug!("all client handles dropped, closing session");
                        handles_dropped = true;
                        self.negotiator
                            .disconnect(&mut self.transport, Instant::now());
                    }
                },
                _ = sleep_until(deadline) => {
                    self.negotiator
                        .handle_timeout(&mut self.transport, Instant::now());
                }
            }
            self.flush().await;
        }
        log::debug!("client worker finished");
    }

    async fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::SendStanza(stanza, reply) => {
                let sent = self
                    .negotiator
                    .send_stanza(stanza, &mut self.transport, now);
                let _ = reply.send(sent);
            }
            Command::SendRequest(request, reply) => {
                let result = self
                    .negotiator
                    .send_request(request, &mut self.transport, now);
                let _ = reply.send(result);
            }
            Command::Disconnect => self.negotiator.disconnect(&mut self.transport, now),
            Command::Reconnect => {
                if self.stream.is_some() {
                    log::warn!("reconnect requested while connected, ignoring");
                } else {
                    self.connect().await;
                }
            }
        }
    }

    async fn connect(&mut self) {
        let domain = self.negotiator.config().domain().to_owned();
        let limit = self.negotiator.config().timeouts.negotiation;
        let result = match tokio::time::timeout(limit, self.connector.connect(&domain)).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout(TimeoutKind::Negotiation(
                SessionPhase::Disconnected,
            ))),
        };
        match result {
            Ok(stream) => {
                log::debug!("connected to {}", domain);
                self.stream = Some(stream);
                self.transport.set_connected(false);
                self.negotiator
                    .handle_connected(&mut self.transport, Instant::now());
            }
            Err(e) => {
                log::warn!("failed to connect to {}: {}", domain, e);
                let _ = self.events.send(Event::Disconnected {
                    error: Some(e),
                    can_resume: self.negotiator.can_resume(),
                });
            }
        }
        self.flush().await;
    }

    fn connection_lost(&mut self, error: Option<Error>) {
        match error {
            Some(ref e) => log::debug!("connection failed: {}", e),
            None => log::debug!("connection closed by peer"),
        }
        self.stream = None;
        self.transport.set_disconnected();
        self.negotiator
            .handle_disconnected(error, &mut self.transport, Instant::now());
    }

    /// Act on everything the negotiator queued.
    async fn flush(&mut self) {
        loop {
            if self.transport.has_outgoing() {
                let data = self.transport.take_outgoing();
                if let Some(ref mut stream) = self.stream {
                    let result = match stream.write_all(&data).await {
                        Ok(()) => stream.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = result {
                        self.connection_lost(Some(e.into()));
                    }
                } else {
                    log::debug!("dropping {} bytes queued while disconnected", data.len());
                }
                continue;
            }
            if self.transport.take_tls_request() {
                self.start_tls().await;
                continue;
            }
            if self.transport.take_close_request() {
                if let Some(mut stream) = self.stream.take() {
                    if let Err(e) = stream.shutdown().await {
                        log::debug!("error while closing connection: {}", e);
                    }
                }
                self.transport.set_disconnected();
                continue;
            }
            break;
        }
        while let Some(event) = self.negotiator.poll_event() {
            if self.events.send(event).is_err() {
                log::trace!("event dropped, client is gone");
            }
        }
    }

    async fn start_tls(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let domain = self.negotiator.config().domain().to_owned();
        let limit = self.negotiator.config().timeouts.negotiation;
        match tokio::time::timeout(limit, self.connector.start_tls(stream, &domain)).await {
            Ok(Ok((stream, channel_binding))) => {
                self.stream = Some(stream);
                self.transport.set_encrypted(channel_binding);
                self.negotiator
                    .handle_encrypted(&mut self.transport, Instant::now());
            }
            Ok(Err(e)) => {
                log::warn!("TLS handshake with {} failed: {}", domain, e);
                self.connection_lost(Some(e.into()));
            }
            Err(_) => {
                log::warn!("TLS handshake with {} did not finish in {:?}", domain, limit);
                self.connection_lost(Some(Error::Timeout(TimeoutKind::Negotiation(
                    SessionPhase::Securing,
                ))));
            }
        }
    }
}
