// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::mem;
use std::borrow::Cow;

use minidom::Element;
use ::sasl::common::ChannelBinding;
use tokio::time::Instant;
use xmpp_parsers::jid::Jid;

use crate::config::{SessionConfig, StreamSecurityMode};
use crate::error::{AuthError, BindError, ProtocolError};
use crate::event::make_id;
use crate::proto::features::{Sasl2Feature, StreamFeatures};
use crate::proto::sasl::{self, SaslReply};
use crate::proto::stanza::{self, StanzaKind};
use crate::proto::tls::{self, StartTlsReply};
use crate::proto::{bind, ns, sm, stream_error};
use crate::transport::Transport;
use crate::xmlstream::{StreamHeader, StreamOpen};

use super::auth::{self, InlineRequests, SaslExchange, SaslVersion};
use super::stream_management::ResumptionToken;
use super::{SessionNegotiator, SessionPhase};

/// Which stream the features we wait for belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Stage {
    /// The first stream on a connection.
    Initial,
    /// The stream after STARTTLS.
    Encrypted,
    /// The stream after authentication.
    Authenticated,
}

pub(super) enum Step {
    /// No connection.
    Idle,

    /// Placeholder while an element is being handled.
    Processing(SessionPhase),

    /// Stream header sent, waiting for the peer's header and features.
    AwaitingFeatures(Stage),

    /// `<starttls/>` sent.
    AwaitingProceed,

    /// The driver performs the TLS handshake.
    AwaitingEncryption,

    /// SASL exchange in progress.
    Authenticating(SaslExchange),

    /// `<resume/>` sent.
    AwaitingResumed {
        /// Resource binding is offered, should resumption fail.
        can_bind: bool,
    },

    /// Bind request sent.
    AwaitingBind {
        /// Id of the bind request.
        id: String,
        /// Stream management may be enabled once bound.
        sm_offered: bool,
    },

    /// `<enable/>` sent.
    AwaitingEnabled,

    /// The session is established.
    Active,

    /// Our stream footer was sent.
    AwaitingFooter,
}

impl Step {
    pub(super) fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle => SessionPhase::Disconnected,
            Self::Processing(phase) => *phase,
            Self::AwaitingFeatures(Stage::Authenticated) => SessionPhase::BindingOrResuming,
            Self::AwaitingFeatures(_) => SessionPhase::StreamOpened,
            Self::AwaitingProceed | Self::AwaitingEncryption => SessionPhase::Securing,
            Self::Authenticating(_) => SessionPhase::Authenticating,
            Self::AwaitingResumed { .. } | Self::AwaitingBind { .. } | Self::AwaitingEnabled => {
                SessionPhase::BindingOrResuming
            }
            Self::Active => SessionPhase::Active,
            Self::AwaitingFooter => SessionPhase::Closing,
        }
    }
}

fn send_element(transport: &mut dyn Transport, elem: &Element) {
    let xml = String::from(elem);
    log::trace!("SEND {}", xml);
    transport.send_data(xml.as_bytes());
}

fn max_resumption_secs(config: &SessionConfig) -> Option<u32> {
    if !config.resume {
        return None;
    }
    Some(u32::try_from(config.resume_grace_period.as_secs()).unwrap_or(u32::MAX))
}

impl SessionNegotiator {
    fn arm_phase_timer(&mut self, now: Instant) {
        self.phase_deadline = Some(now + self.config.timeouts.negotiation);
    }

    /// Send a fresh stream header and wait for the peer's features.
    pub(super) fn open_stream(
        &mut self,
        stage: Stage,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        self.framer.reset();
        self.stream_id = None;
        let header = StreamHeader::to_domain(self.config.domain()).to_xml(ns::JABBER_CLIENT);
        log::trace!("SEND {}", header);
        transport.send_data(header.as_bytes());
        self.step = Step::AwaitingFeatures(stage);
        self.arm_phase_timer(now);
    }

    pub(super) fn handle_stream_open(
        &mut self,
        open: &StreamOpen,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        match StreamHeader::from_stream_open(open, ns::JABBER_CLIENT) {
            Ok(header) => {
                log::debug!("peer opened stream {:?}", header.id);
                self.stream_id = header.id.map(Cow::into_owned);
            }
            Err(e) => self.fail(e.into(), transport, now),
        }
    }

    pub(super) fn handle_element(
        &mut self,
        elem: Element,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        if let Some(error) = stream_error::parse(&elem) {
            return self.fail(error.into(), transport, now);
        }
        let phase = self.step.phase();
        match mem::replace(&mut self.step, Step::Processing(phase)) {
            Step::AwaitingFeatures(stage) => self.handle_features(stage, &elem, transport, now),
            Step::AwaitingProceed => self.handle_proceed(&elem, transport, now),
            Step::Authenticating(exchange) => self.handle_sasl(exchange, &elem, transport, now),
            Step::AwaitingResumed { can_bind } => {
                self.handle_resume_reply(can_bind, &elem, transport, now)
            }
            Step::AwaitingBind { id, sm_offered } => {
                self.handle_bind_reply(id, sm_offered, elem, transport, now)
            }
            Step::AwaitingEnabled => self.handle_enable_reply(elem, transport, now),
            step @ (Step::Active | Step::AwaitingFooter) => {
                self.step = step;
                self.handle_session_element(elem, transport, now);
            }
            step @ (Step::Idle | Step::Processing(_) | Step::AwaitingEncryption) => {
                log::warn!("dropping <{}/> received in phase {:?}", elem.name(), phase);
                self.step = step;
            }
        }
    }

    /// Decide whether to start TLS now.
    fn wants_tls(
        &self,
        features: &StreamFeatures,
        transport: &dyn Transport,
    ) -> Result<bool, ProtocolError> {
        let mode = self.config.security;
        if features.starttls.is_some()
            && transport.supports_encryption()
            && mode != StreamSecurityMode::TlsDisabled
        {
            return Ok(true);
        }
        if mode == StreamSecurityMode::TlsRequired || features.tls_required() {
            return Err(ProtocolError::NoTls);
        }
        Ok(false)
    }

    fn handle_features(
        &mut self,
        stage: Stage,
        elem: &Element,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        if !elem.is("features", ns::STREAM) {
            return self.unexpected(elem, transport, now);
        }
        let features = match StreamFeatures::parse(elem) {
            Ok(features) => features,
            Err(e) => return self.fail(e.into(), transport, now),
        };
        log::debug!("stream features: {:?}", features);

        if stage == Stage::Authenticated {
            return self.resume_or_bind(&features, transport, now);
        }
        if !transport.is_encrypted() {
            match self.wants_tls(&features, &*transport) {
                Ok(true) => {
                    log::debug!("requesting STARTTLS");
                    send_element(transport, &tls::request());
                    self.step = Step::AwaitingProceed;
                    self.arm_phase_timer(now);
                    return;
                }
                Ok(false) => log::debug!("continuing without TLS"),
                Err(e) => return self.fail(e.into(), transport, now),
            }
        }
        self.start_authentication(&features, transport, now);
    }

    fn handle_proceed(&mut self, elem: &Element, transport: &mut dyn Transport, now: Instant) {
        match tls::parse_reply(elem) {
            Some(StartTlsReply::Proceed) => {
                self.step = Step::AwaitingEncryption;
                self.arm_phase_timer(now);
                transport.start_encryption();
            }
            Some(StartTlsReply::Failure) => {
                self.fail(ProtocolError::TlsFailure.into(), transport, now)
            }
            None => self.unexpected(elem, transport, now),
        }
    }

    fn start_authentication(
        &mut self,
        features: &StreamFeatures,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        let channel_binding = transport.channel_binding();
        if self.config.sasl2 {
            if let Some(ref sasl2) = features.sasl2 {
                return self.start_sasl2(sasl2, channel_binding, transport, now);
            }
        }
        let mut mechanism =
            match auth::select_mechanism(&self.config, &features.sasl_mechanisms, channel_binding)
            {
                Ok(mechanism) => mechanism,
                Err(e) => return self.fail(e.into(), transport, now),
            };
        let initial = mechanism.initial();
        let auth = match sasl::auth(mechanism.name(), &initial) {
            Ok(auth) => auth,
            Err(e) => return self.fail(e.into(), transport, now),
        };
        send_element(transport, &auth);
        self.step = Step::Authenticating(SaslExchange {
            mechanism,
            version: SaslVersion::Sasl1,
        });
        self.arm_phase_timer(now);
    }

    fn start_sasl2(
        &mut self,
        offer: &Sasl2Feature,
        channel_binding: ChannelBinding,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        let mut mechanism =
            match auth::select_mechanism(&self.config, &offer.mechanisms, channel_binding) {
                Ok(mechanism) => mechanism,
                Err(e) => return self.fail(e.into(), transport, now),
            };

        let mut inline = InlineRequests::default();
        let mut payloads = Vec::new();
        match (self.token.as_ref(), offer.bind2.as_ref()) {
            (Some(token), _) if offer.inline_sm && self.config.resume => {
                log::debug!("attempting inline resumption of {:?}", token.id);
                payloads.push(sm::resume(&token.id, self.acks.inbound_ctr()));
                inline.resume = true;
            }
            (_, Some(bind2)) => {
                let mut bind_payloads = Vec::new();
                if self.config.stream_management
                    && bind2.inline_features.iter().any(|feature| feature == ns::SM)
                {
                    bind_payloads.push(sm::enable(
                        self.config.resume,
                        max_resumption_secs(&self.config),
                    ));
                    inline.enable = true;
                }
                let tag = self
                    .config
                    .jid
                    .resource()
                    .map(|resource| resource.as_str().to_owned())
                    .or_else(|| self.config.user_agent.software.clone());
                payloads.push(bind::bind2(tag.as_deref(), bind_payloads));
                inline.bind = true;
            }
            _ => (),
        }

        let initial = mechanism.initial();
        send_element(
            transport,
            &sasl::authenticate(
                mechanism.name(),
                &initial,
                &self.config.user_agent,
                payloads,
            ),
        );
        self.step = Step::Authenticating(SaslExchange {
            mechanism,
            version: SaslVersion::Sasl2(inline),
        });
        self.arm_phase_timer(now);
    }

    fn handle_sasl(
        &mut self,
        mut exchange: SaslExchange,
        elem: &Element,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        let reply = match exchange.version {
            SaslVersion::Sasl1 => sasl::parse_reply(elem),
            SaslVersion::Sasl2(_) => sasl::parse_reply2(elem),
        };
        let reply = match reply {
            Ok(Some(reply)) => reply,
            Ok(None) => return self.unexpected(elem, transport, now),
            Err(e) => return self.fail(e.into(), transport, now),
        };
        match reply {
            SaslReply::Challenge(data) => match exchange.mechanism.response(&data) {
                Ok(response) => {
                    let response = match exchange.version {
                        SaslVersion::Sasl1 => sasl::response(&response),
                        SaslVersion::Sasl2(_) => sasl::response2(&response),
                    };
                    send_element(transport, &response);
                    self.step = Step::Authenticating(exchange);
                    self.arm_phase_timer(now);
                }
                Err(e) => self.fail(AuthError::Sasl(e.to_string()).into(), transport, now),
            },
            SaslReply::Success {
                additional_data,
                authorization_identifier,
                payloads,
            } => {
                if let Err(e) = exchange.mechanism.success(&additional_data) {
                    return self.fail(AuthError::Sasl(e.to_string()).into(), transport, now);
                }
                log::info!("authenticated using {}", exchange.mechanism.name());
                match exchange.version {
                    SaslVersion::Sasl1 => {
                        self.open_stream(Stage::Authenticated, transport, now);
                    }
                    SaslVersion::Sasl2(inline) => self.handle_sasl2_success(
                        inline,
                        authorization_identifier,
                        &payloads,
                        transport,
                        now,
                    ),
                }
            }
            SaslReply::Failure { condition, text } => {
                log::warn!("authentication failed: {} ({:?})", condition, text);
                self.fail(AuthError::Fail { condition, text }.into(), transport, now)
            }
            SaslReply::Continue => self.fail(
                AuthError::Sasl("SASL2 tasks are not supported".to_owned()).into(),
                transport,
                now,
            ),
        }
    }

    fn handle_sasl2_success(
        &mut self,
        inline: InlineRequests,
        authorization_identifier: Option<String>,
        payloads: &[Element],
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        for payload in payloads.iter().filter(|payload| payload.ns() == ns::SM) {
            match sm::parse(payload) {
                Ok(Some(sm::SmNonza::Resumed(resumed))) if inline.resume => {
                    return self.complete_resume(resumed.h, transport, now);
                }
                Ok(Some(sm::SmNonza::Failed(failed))) if inline.resume => {
                    self.resumption_failed(failed.h);
                }
                Ok(_) => log::debug!("ignoring inline <{}/>", payload.name()),
                Err(e) => return self.fail(e.into(), transport, now),
            }
        }

        let bound = payloads
            .iter()
            .find(|payload| payload.is("bound", ns::BIND2));
        match bound {
            Some(bound) if inline.bind => {
                let jid = match authorization_identifier.as_deref().map(str::parse::<Jid>) {
                    Some(Ok(jid)) => jid,
                    Some(Err(e)) => {
                        return self.fail(
                            BindError::InvalidResponse(format!("invalid bound JID: {}", e))
                                .into(),
                            transport,
                            now,
                        )
                    }
                    None => {
                        return self.fail(
                            BindError::InvalidResponse(
                                "no authorization identifier with inline bind".to_owned(),
                            )
                            .into(),
                            transport,
                            now,
                        )
                    }
                };
                self.set_bound_jid(jid);

                let mut sm_result = None;
                for child in bound.children().filter(|child| child.ns() == ns::SM) {
                    match sm::parse(child) {
                        Ok(Some(
                            nonza @ (sm::SmNonza::Enabled(_) | sm::SmNonza::Failed(_)),
                        )) => sm_result = Some(nonza),
                        Ok(_) => (),
                        Err(e) => return self.fail(e.into(), transport, now),
                    }
                }
                match sm_result {
                    Some(sm::SmNonza::Enabled(enabled)) => {
                        self.stream_management_enabled(&enabled, transport)
                    }
                    Some(_) => {
                        log::warn!("server refused to enable stream management");
                        self.stream_management_unavailable();
                    }
                    None => {
                        if inline.enable {
                            log::warn!("no answer to inline stream management request");
                        }
                        self.stream_management_unavailable();
                    }
                }
                self.enter_active(false, true, transport, now);
            }
            _ => {
                // Nothing was done inline: the server sends fresh features on
                // the same stream.
                self.step = Step::AwaitingFeatures(Stage::Authenticated);
                self.arm_phase_timer(now);
            }
        }
    }

    fn resume_or_bind(
        &mut self,
        features: &StreamFeatures,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        if let Some(token) = self.token.as_ref() {
            if features.stream_management && self.config.resume {
                log::debug!("attempting to resume session {:?}", token.id);
                send_element(transport, &sm::resume(&token.id, self.acks.inbound_ctr()));
                self.step = Step::AwaitingResumed {
                    can_bind: features.bind,
                };
                self.arm_phase_timer(now);
                return;
            }
            log::warn!("peer no longer offers stream management, dropping resumption state");
            self.token = None;
            self.resumable_until = None;
        }
        self.start_bind(features.bind, features.stream_management, transport, now);
    }

    fn start_bind(
        &mut self,
        can_bind: bool,
        sm_offered: bool,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        if !can_bind {
            return self.fail(BindError::Unsupported.into(), transport, now);
        }
        let id = make_id();
        let resource = self.config.jid.resource().map(|resource| resource.as_str());
        send_element(transport, &bind::request(&id, resource));
        self.step = Step::AwaitingBind { id, sm_offered };
        self.arm_phase_timer(now);
    }

    fn handle_resume_reply(
        &mut self,
        can_bind: bool,
        elem: &Element,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        match sm::parse(elem) {
            Ok(Some(sm::SmNonza::Resumed(resumed))) => {
                self.complete_resume(resumed.h, transport, now)
            }
            Ok(Some(sm::SmNonza::Failed(failed))) => {
                self.resumption_failed(failed.h);
                // A failed resumption leaves the stream where it was after
                // authentication.
                self.start_bind(can_bind, true, transport, now);
            }
            Ok(_) => self.unexpected(elem, transport, now),
            Err(e) => self.fail(e.into(), transport, now),
        }
    }

    fn complete_resume(&mut self, h: u32, transport: &mut dyn Transport, now: Instant) {
        if let Err(e) = self.acks.handle_ack(h) {
            return self.fail(e.into(), transport, now);
        }
        self.acks.enable(false, transport);
        self.enter_active(true, false, transport, now);
    }

    fn resumption_failed(&mut self, h: Option<u32>) {
        log::warn!("session resumption failed, binding a new session");
        if let Some(h) = h {
            if let Err(e) = self.acks.handle_ack(h) {
                log::warn!("ignoring bogus counter on <failed/>: {}", e);
            }
        }
        self.token = None;
        self.resumable_until = None;
        self.bound_jid = None;
    }

    fn set_bound_jid(&mut self, jid: Jid) {
        log::debug!("bound to {}", jid);
        self.requests.set_local_jid(&jid);
        self.bound_jid = Some(jid);
    }

    fn stream_management_enabled(&mut self, enabled: &sm::Enabled, transport: &mut dyn Transport) {
        self.token = if self.config.resume && enabled.resume == sm::ResumeAttr::True {
            ResumptionToken::from_enabled(enabled)
        } else {
            None
        };
        self.acks.enable(true, transport);
    }

    fn stream_management_unavailable(&mut self) {
        self.token = None;
        self.acks.disable();
    }

    fn handle_bind_reply(
        &mut self,
        id: String,
        sm_offered: bool,
        elem: Element,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        let is_reply = matches!(stanza::iq_type(&elem), Some("result" | "error"))
            && elem.attr("id") == Some(id.as_str());
        if !is_reply {
            return self.unexpected(&elem, transport, now);
        }
        let jid = match bind::parse_response(&elem) {
            Ok(jid) => jid,
            Err(e) => return self.fail(e.into(), transport, now),
        };
        self.set_bound_jid(jid);
        if sm_offered && self.config.stream_management {
            send_element(
                transport,
                &sm::enable(self.config.resume, max_resumption_secs(&self.config)),
            );
            self.step = Step::AwaitingEnabled;
            self.arm_phase_timer(now);
        } else {
            self.stream_management_unavailable();
            self.enter_active(false, false, transport, now);
        }
    }

    fn handle_enable_reply(&mut self, elem: Element, transport: &mut dyn Transport, now: Instant) {
        match sm::parse(&elem) {
            Ok(Some(sm::SmNonza::Enabled(enabled))) => {
                self.stream_management_enabled(&enabled, transport);
                self.enter_active(false, false, transport, now);
            }
            Ok(Some(sm::SmNonza::Failed(_))) => {
                log::warn!("server refused to enable stream management");
                self.stream_management_unavailable();
                self.enter_active(false, false, transport, now);
            }
            Ok(_) if StanzaKind::of(&elem).is_some() => {
                self.deferred.push(elem);
                self.step = Step::AwaitingEnabled;
            }
            Ok(_) => self.unexpected(&elem, transport, now),
            Err(e) => self.fail(e.into(), transport, now),
        }
    }
}
