// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Client session negotiation and maintenance
//!
//! This module provides the [`SessionNegotiator`], which takes a freshly
//! connected byte transport through the RFC 6120 login sequence (STARTTLS,
//! SASL, resource binding) and then keeps the resulting session alive.
//!
//! The negotiator knows how to resume a broken session using
//! [XEP-0198 (Stream Management)](https://xmpp.org/extensions/xep-0198.html),
//! and prefers [XEP-0388 (SASL2)](https://xmpp.org/extensions/xep-0388.html)
//! with inline binding and resumption where the server offers it.
//!
//! The negotiator performs no I/O. Its driver feeds it received bytes,
//! transport state changes and the passage of time, and the negotiator
//! writes to the [`Transport`] it is handed on each call. Results come out
//! of [`SessionNegotiator::poll_event`].

use core::mem;
use std::collections::VecDeque;
use std::io;

use minidom::Element;
use tokio::time::Instant;
use xmpp_parsers::jid::Jid;

use crate::config::SessionConfig;
use crate::error::{Error, ProtocolError, TimeoutKind};
use crate::event::{make_id, Event, SessionInfo};
use crate::extension::{Extension, Outbound};
use crate::proto::{sm, stanza, stanza::StanzaKind, stream_error};
use crate::transport::Transport;
use crate::xmlstream::{FramerEvent, XmlFramer, STREAM_FOOTER};

mod auth;
mod iq;
mod negotiation;
mod stream_management;
#[cfg(test)]
mod tests;

use self::negotiation::Step;
pub use self::iq::{OutgoingRequestManager, RequestHandle};
pub use self::stream_management::{ResumptionToken, SendMode, StanzaSink, StreamAckManager};

/// Externally visible state of a [`SessionNegotiator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No connection.
    Disconnected,
    /// Stream headers exchanged, waiting for or processing features.
    StreamOpened,
    /// TLS negotiation in progress.
    Securing,
    /// SASL exchange in progress.
    Authenticating,
    /// Binding a resource or resuming a previous session.
    BindingOrResuming,
    /// Stanzas flow.
    Active,
    /// Our stream is closed, waiting for the peer to close its own.
    Closing,
}

/// Login and session state machine for one account.
pub struct SessionNegotiator {
    config: SessionConfig,
    step: Step,
    framer: XmlFramer,
    acks: StreamAckManager,
    requests: OutgoingRequestManager,
    extensions: Vec<Box<dyn Extension>>,
    events: VecDeque<Event>,

    /// XEP-0198 resumption data of the current (or suspended) session.
    token: Option<ResumptionToken>,

    /// While suspended: instant after which the session is given up.
    resumable_until: Option<Instant>,

    bound_jid: Option<Jid>,
    stream_id: Option<String>,

    /// Deadline of the current negotiation step, or of the shutdown.
    phase_deadline: Option<Instant>,

    next_ping: Option<Instant>,
    ping_id: Option<String>,

    /// Stanzas which arrived before the session became active.
    deferred: Vec<Element>,

    /// `on_session_begin` was delivered and `on_session_end` is owed.
    session_started: bool,
}

impl SessionNegotiator {
    /// Create a disconnected negotiator.
    pub fn new(config: SessionConfig) -> Self {
        let framer = XmlFramer::new(config.max_stanza_size);
        Self {
            config,
            step: Step::Idle,
            framer,
            acks: StreamAckManager::new(),
            requests: OutgoingRequestManager::new(),
            extensions: Vec::new(),
            events: VecDeque::new(),
            token: None,
            resumable_until: None,
            bound_jid: None,
            stream_id: None,
            phase_deadline: None,
            next_ping: None,
            ping_id: None,
            deferred: Vec::new(),
            session_started: false,
        }
    }

    /// Add an extension. Extensions see stanzas in registration order.
    pub fn register_extension<E: Extension + 'static>(&mut self, extension: E) {
        self.extensions.push(Box::new(extension));
    }

    /// The configuration this negotiator was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.step.phase()
    }

    /// Whether stanzas currently reach the peer.
    pub fn is_active(&self) -> bool {
        matches!(self.step, Step::Active)
    }

    /// JID of the current session, if a resource was bound.
    pub fn bound_jid(&self) -> Option<&Jid> {
        self.bound_jid.as_ref()
    }

    /// Id the server assigned to its current stream.
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// XEP-0198 state.
    pub fn stream_management(&self) -> &StreamAckManager {
        &self.acks
    }

    /// Pending requests.
    pub fn requests(&self) -> &OutgoingRequestManager {
        &self.requests
    }

    /// Whether a suspended session waits to be resumed on the next
    /// connection.
    pub fn can_resume(&self) -> bool {
        matches!(self.step, Step::Idle) && self.token.is_some() && self.acks.is_enabled()
    }

    /// Take the next event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// The earliest instant at which
    /// [`handle_timeout`][`Self::handle_timeout`] has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let ping = match self.step {
            Step::Active => self.next_ping,
            _ => None,
        };
        let expiry = match self.step {
            Step::Idle => self.resumable_until,
            _ => None,
        };
        [self.phase_deadline, self.requests.next_deadline(), ping, expiry]
            .into_iter()
            .flatten()
            .min()
    }

    /// The transport connected: open the stream.
    pub fn handle_connected(&mut self, transport: &mut dyn Transport, now: Instant) {
        if !matches!(self.step, Step::Idle) {
            log::warn!("ignoring connect notification in phase {:?}", self.phase());
            return;
        }
        if self.resumable_until.is_some_and(|until| until <= now) {
            self.expire_suspended_session();
        }
        log::debug!("connected, opening stream to {}", self.config.domain());
        self.open_stream(negotiation::Stage::Initial, transport, now);
    }

    /// The TLS handshake requested via
    /// [`Transport::start_encryption`] completed.
    pub fn handle_encrypted(&mut self, transport: &mut dyn Transport, now: Instant) {
        if !matches!(self.step, Step::AwaitingEncryption) {
            log::warn!("ignoring TLS completion in phase {:?}", self.phase());
            return;
        }
        log::debug!("TLS established, restarting stream");
        self.open_stream(negotiation::Stage::Encrypted, transport, now);
    }

    /// Bytes arrived from the peer.
    pub fn handle_data(&mut self, data: &[u8], transport: &mut dyn Transport, now: Instant) {
        if matches!(self.step, Step::Idle) {
            log::warn!("ignoring {} bytes received while disconnected", data.len());
            return;
        }
        self.framer.feed(data);
        if matches!(self.step, Step::Active) && self.ping_id.is_none() {
            self.schedule_keepalive(now);
        }
        while !matches!(self.step, Step::Idle | Step::AwaitingEncryption) {
            match self.framer.next_event() {
                Ok(None) => break,
                Ok(Some(FramerEvent::StreamOpen(open))) => {
                    self.handle_stream_open(&open, transport, now)
                }
                Ok(Some(FramerEvent::Stanza(elem))) => self.handle_element(elem, transport, now),
                Ok(Some(FramerEvent::StreamClose)) => self.handle_stream_close(transport, now),
                Err(e) => self.fail(e.into(), transport, now),
            }
        }
        self.check_ping(now);
    }

    /// The transport broke or was closed.
    pub fn handle_disconnected(
        &mut self,
        error: Option<Error>,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        match self.step {
            Step::Idle => (),
            Step::AwaitingFooter => self.terminate(None, transport, now),
            _ => {
                let error = error.unwrap_or_else(|| {
                    Error::Transport(io::Error::from(io::ErrorKind::UnexpectedEof).into())
                });
                log::info!("connection lost: {}", error);
                self.terminate(Some(error), transport, now);
            }
        }
    }

    /// Act on all deadlines which passed by `now`.
    pub fn handle_timeout(&mut self, transport: &mut dyn Transport, now: Instant) {
        let expired = self.requests.expire(now);
        if let Some(ping_id) = self.ping_id.take() {
            if expired.contains(&ping_id) {
                log::warn!("keepalive ping {:?} went unanswered", ping_id);
                return self.fail(Error::Timeout(TimeoutKind::Keepalive), transport, now);
            }
            self.ping_id = Some(ping_id);
        }
        self.check_ping(now);

        if self.phase_deadline.is_some_and(|deadline| deadline <= now) {
            self.phase_deadline = None;
            match self.step {
                Step::Idle => (),
                Step::AwaitingFooter => {
                    log::debug!("peer did not close its stream in time");
                    self.terminate(
                        Some(Error::Timeout(TimeoutKind::Shutdown)),
                        transport,
                        now,
                    );
                }
                _ => {
                    let phase = self.phase();
                    log::warn!("negotiation timed out in phase {:?}", phase);
                    self.fail(
                        Error::Timeout(TimeoutKind::Negotiation(phase)),
                        transport,
                        now,
                    );
                }
            }
            return;
        }

        match self.step {
            Step::Active => {
                if self.ping_id.is_none() && self.next_ping.is_some_and(|at| at <= now) {
                    self.send_ping(transport, now);
                }
            }
            Step::Idle => {
                if self.resumable_until.is_some_and(|until| until <= now) {
                    self.expire_suspended_session();
                }
            }
            _ => (),
        }
    }

    /// Send a stanza or nonza on the session.
    ///
    /// On a suspended, resumable session, stanzas are buffered and sent
    /// once the session is resumed. Returns whether the element was sent or
    /// buffered.
    pub fn send_stanza(
        &mut self,
        stanza: Element,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> bool {
        self.outbound(transport, now).send_stanza(stanza)
    }

    /// Send an IQ request and track its response, with the configured
    /// default deadline.
    pub fn send_request(
        &mut self,
        request: Element,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<RequestHandle, Error> {
        self.outbound(transport, now).send_request(request)
    }

    /// Close the session in an orderly fashion.
    ///
    /// A suspended session is given up. An established one is closed with
    /// our stream footer; the negotiator then waits for the peer's footer or
    /// the shutdown timeout.
    pub fn disconnect(&mut self, transport: &mut dyn Transport, now: Instant) {
        match self.step {
            Step::Idle => {
                if self.token.is_some() || self.acks.is_enabled() {
                    log::info!("giving up suspended session");
                    self.expire_suspended_session();
                }
                return;
            }
            Step::AwaitingFooter => return,
            _ => (),
        }
        log::debug!("closing stream");
        transport.send_data(STREAM_FOOTER.as_bytes());
        self.requests.cancel_all(&Error::Disconnected);
        self.acks.disable();
        self.token = None;
        self.resumable_until = None;
        self.next_ping = None;
        self.ping_id = None;
        self.step = Step::AwaitingFooter;
        self.phase_deadline = Some(now + self.config.timeouts.shutdown);
    }

    fn send_mode(&self) -> SendMode {
        match self.step {
            Step::Active => SendMode::Transmit,
            Step::AwaitingFooter => SendMode::Refuse,
            _ if self.acks.is_enabled() && self.token.is_some() => SendMode::Enqueue,
            _ => SendMode::Refuse,
        }
    }

    fn outbound<'a>(&'a mut self, transport: &'a mut dyn Transport, now: Instant) -> Outbound<'a> {
        let mode = self.send_mode();
        let deadline = self.config.timeouts.request.map(|timeout| now + timeout);
        Outbound::new(
            StanzaSink::with_mode(&mut self.acks, transport, mode),
            &mut self.requests,
            deadline,
        )
    }

    fn schedule_keepalive(&mut self, now: Instant) {
        self.next_ping = self
            .config
            .timeouts
            .keepalive_interval
            .map(|interval| now + interval);
    }

    fn check_ping(&mut self, now: Instant) {
        let answered = match self.ping_id {
            Some(ref id) => !self.requests.is_pending(id),
            None => false,
        };
        if answered {
            self.ping_id = None;
            if matches!(self.step, Step::Active) {
                self.schedule_keepalive(now);
            }
        }
    }

    fn send_ping(&mut self, transport: &mut dyn Transport, now: Instant) {
        let deadline = now + self.config.timeouts.keepalive_timeout;
        let ping = stanza::ping(&make_id());
        self.next_ping = None;
        match self
            .outbound(transport, now)
            .send_request_with_deadline(ping, Some(deadline))
        {
            Ok(handle) => {
                log::trace!("sent keepalive ping {:?}", handle.id());
                self.ping_id = Some(handle.id().to_owned());
            }
            Err(e) => log::warn!("failed to send keepalive ping: {}", e),
        }
    }

    /// Forget a suspended session for good.
    fn expire_suspended_session(&mut self) {
        log::info!("suspended session can no longer be resumed");
        self.token = None;
        self.resumable_until = None;
        self.bound_jid = None;
        self.acks.disable();
        self.requests.cancel_all(&Error::Disconnected);
    }

    fn handle_stream_close(&mut self, transport: &mut dyn Transport, now: Instant) {
        match self.step {
            Step::AwaitingFooter => {
                log::debug!("peer closed its stream");
                self.terminate(None, transport, now);
            }
            _ => {
                log::info!("peer closed the stream");
                transport.send_data(STREAM_FOOTER.as_bytes());
                self.terminate(
                    Some(Error::Protocol(ProtocolError::StreamClosed)),
                    transport,
                    now,
                );
            }
        }
    }

    /// Handle an element once the session is established.
    fn handle_session_element(
        &mut self,
        elem: Element,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        match sm::parse(&elem) {
            Ok(Some(sm::SmNonza::Ack(ack))) => {
                if let Err(e) = self.acks.handle_ack(ack.h) {
                    self.fail(e.into(), transport, now);
                }
                return;
            }
            Ok(Some(sm::SmNonza::Request(_))) => {
                self.acks.handle_ack_request(transport);
                return;
            }
            Ok(Some(_)) => return self.unexpected(&elem, transport, now),
            Ok(None) => (),
            Err(e) => return self.fail(e.into(), transport, now),
        }
        if StanzaKind::of(&elem).is_none() {
            return self.unexpected(&elem, transport, now);
        }
        self.acks.handle_incoming_stanza();
        self.dispatch_stanza(elem, transport, now);
    }

    /// Route a received stanza: request responses first, then extensions,
    /// then the consumer.
    fn dispatch_stanza(&mut self, elem: Element, transport: &mut dyn Transport, now: Instant) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("RECV {}", String::from(&elem));
        }
        if self.requests.handle_response(&elem) {
            return;
        }

        let mut extensions = mem::take(&mut self.extensions);
        let handled = {
            let mut outbound = self.outbound(transport, now);
            extensions
                .iter_mut()
                .any(|extension| extension.handle_stanza(&elem, &mut outbound))
        };
        self.extensions = extensions;
        if handled {
            return;
        }

        if stanza::is_iq_request(&elem) {
            log::debug!(
                "no handler for IQ {:?} from {:?}, replying service-unavailable",
                elem.attr("id"),
                elem.attr("from")
            );
            let reply = stanza::error_reply(
                &elem,
                stanza::DefinedCondition::ServiceUnavailable,
                stanza::ErrorType::Cancel,
            );
            self.outbound(transport, now).send_stanza(reply);
            return;
        }
        self.events.push_back(Event::Stanza(elem));
    }

    /// Enter the active phase.
    fn enter_active(
        &mut self,
        resumed: bool,
        inline_bind: bool,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        self.step = Step::Active;
        self.phase_deadline = None;
        self.resumable_until = None;
        self.schedule_keepalive(now);
        let info = SessionInfo {
            bound_jid: self.bound_jid.clone(),
            resumed,
            stream_management: self.acks.is_enabled(),
            inline_bind,
        };
        log::info!(
            "session {} as {:?} (stream management: {})",
            if resumed { "resumed" } else { "established" },
            info.bound_jid,
            info.stream_management
        );
        self.events.push_back(Event::Online(info.clone()));
        self.session_started = true;

        let mut extensions = mem::take(&mut self.extensions);
        {
            let mut outbound = self.outbound(transport, now);
            for extension in extensions.iter_mut() {
                extension.on_session_begin(&info, &mut outbound);
            }
        }
        self.extensions = extensions;

        for elem in mem::take(&mut self.deferred) {
            if !matches!(self.step, Step::Active) {
                break;
            }
            self.dispatch_stanza(elem, transport, now);
        }
    }

    fn unexpected(&mut self, elem: &Element, transport: &mut dyn Transport, now: Instant) {
        let error = ProtocolError::UnexpectedElement {
            phase: self.phase(),
            name: elem.name().to_owned(),
            ns: elem.ns(),
        };
        self.fail(error.into(), transport, now);
    }

    /// Tear the session down because of `error`, telling the peer why where
    /// the stream still works.
    fn fail(&mut self, error: Error, transport: &mut dyn Transport, now: Instant) {
        log::warn!("session failed in phase {:?}: {}", self.phase(), error);
        // Closing the stream would end a session we may still resume.
        if transport.is_connected() && !error.can_resume() {
            if let Some(condition) = error.stream_condition() {
                let application = match &error {
                    Error::Protocol(ProtocolError::HandledCountTooHigh { h, send_count }) => {
                        Some(sm::handled_count_too_high(*h, *send_count))
                    }
                    _ => None,
                };
                let xml = stream_error::to_xml(condition, application.as_ref());
                transport.send_data(xml.as_bytes());
            }
            transport.send_data(STREAM_FOOTER.as_bytes());
        }
        self.terminate(Some(error), transport, now);
    }

    /// Drop the connection and report the end of the session.
    fn terminate(&mut self, error: Option<Error>, transport: &mut dyn Transport, now: Instant) {
        let can_resume = match error {
            Some(ref error) => {
                error.can_resume()
                    && self.config.resume
                    && self.token.is_some()
                    && self.acks.is_enabled()
            }
            None => false,
        };

        transport.disconnect();
        self.framer.reset();
        self.step = Step::Idle;
        self.stream_id = None;
        self.phase_deadline = None;
        self.next_ping = None;
        self.ping_id = None;
        self.deferred.clear();
        let reason = error.clone().unwrap_or(Error::Disconnected);
        self.requests.cancel_all(&reason);

        if can_resume {
            let grace = self.config.resume_grace_period;
            let grace = match self.token.as_ref().and_then(|token| token.max) {
                Some(max) => grace.min(max),
                None => grace,
            };
            let until = *self.resumable_until.get_or_insert(now + grace);
            log::info!(
                "session suspended with {} unacknowledged stanzas, resumable for {:?}",
                self.acks.unacked_len(),
                until.saturating_duration_since(now)
            );
        } else {
            self.token = None;
            self.resumable_until = None;
            self.bound_jid = None;
            self.acks.disable();
        }

        if mem::take(&mut self.session_started) {
            for extension in self.extensions.iter_mut() {
                extension.on_session_end(can_resume);
            }
        }
        self.events
            .push_back(Event::Disconnected { error, can_resume });
    }
}
