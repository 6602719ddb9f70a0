// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::time::Duration;
use std::sync::{Arc, Mutex};

use minidom::Element;
use tokio::time::Instant;

use super::*;
use crate::config::{SessionConfig, StreamSecurityMode, Timeouts};
use crate::error::{AuthError, RequestError};
use crate::proto::ns;
use crate::transport::BufferedTransport;

const SERVER_HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0' from='example.org' id='s1'>";

const PLAIN_FEATURES: &str = "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms></stream:features>";

const TLS_FEATURES: &str = "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls></stream:features>";

const BIND_FEATURES: &str = "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/><sm xmlns='urn:xmpp:sm:3'/></stream:features>";

const SASL2_FEATURES: &str = "<stream:features><authentication xmlns='urn:xmpp:sasl:2'><mechanism>PLAIN</mechanism><inline><sm xmlns='urn:xmpp:sm:3'/><bind xmlns='urn:xmpp:bind:0'><inline><feature var='urn:xmpp:sm:3'/></inline></bind></inline></authentication></stream:features>";

const SUCCESS: &str = "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>";

const ENABLED: &str = "<enabled xmlns='urn:xmpp:sm:3' id='sm-1' resume='true' max='600'/>";

#[derive(Debug)]
enum Sent {
    Header,
    Element(Element),
    Footer,
}

struct Harness {
    negotiator: SessionNegotiator,
    transport: BufferedTransport,
    /// Parses what the client sends, as a server would.
    server: XmlFramer,
    now: Instant,
}

fn config() -> SessionConfig {
    SessionConfig::new("juliet@example.org/balcony".parse().unwrap(), "secret")
}

fn message(id: &str) -> Element {
    Element::builder("message", ns::JABBER_CLIENT)
        .attr("id", id)
        .attr("to", "romeo@example.net")
        .build()
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            negotiator: SessionNegotiator::new(config),
            transport: BufferedTransport::new(false),
            server: XmlFramer::default(),
            now: Instant::now(),
        }
    }

    fn connect(&mut self) {
        self.transport.set_connected(false);
        self.negotiator
            .handle_connected(&mut self.transport, self.now);
    }

    fn recv(&mut self, xml: &str) {
        self.negotiator
            .handle_data(xml.as_bytes(), &mut self.transport, self.now);
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
        self.negotiator.handle_timeout(&mut self.transport, self.now);
    }

    fn send(&mut self, stanza: Element) -> bool {
        self.negotiator
            .send_stanza(stanza, &mut self.transport, self.now)
    }

    fn drop_connection(&mut self) {
        self.transport.set_disconnected();
        self.negotiator
            .handle_disconnected(None, &mut self.transport, self.now);
    }

    fn sent(&mut self) -> Vec<Sent> {
        let data = self.transport.take_outgoing();
        if data.starts_with(b"<?xml") {
            self.server.reset();
        }
        self.server.feed(&data);
        let mut result = Vec::new();
        while let Some(event) = self.server.next_event().unwrap() {
            result.push(match event {
                FramerEvent::StreamOpen(_) => Sent::Header,
                FramerEvent::Stanza(elem) => Sent::Element(elem),
                FramerEvent::StreamClose => Sent::Footer,
            });
        }
        result
    }

    fn sent_elements(&mut self) -> Vec<Element> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Element(elem) => Some(elem),
                _ => None,
            })
            .collect()
    }

    fn events(&mut self) -> Vec<Event> {
        core::iter::from_fn(|| self.negotiator.poll_event()).collect()
    }

    fn disconnected(&mut self) -> (Option<Error>, bool) {
        for event in self.events() {
            if let Event::Disconnected { error, can_resume } = event {
                return (error, can_resume);
            }
        }
        panic!("no disconnect event");
    }

    fn online(&mut self) -> SessionInfo {
        for event in self.events() {
            if let Event::Online(info) = event {
                return info;
            }
        }
        panic!("no online event");
    }

    /// Run PLAIN authentication up to the post-authentication features.
    fn authenticate(&mut self, features: &str) {
        self.connect();
        self.recv(SERVER_HEADER);
        self.recv(PLAIN_FEATURES);
        self.sent();
        self.recv(SUCCESS);
        self.recv(SERVER_HEADER);
        self.recv(features);
    }

    fn bind_request_id(&mut self) -> String {
        let bind = self
            .sent_elements()
            .into_iter()
            .find(|elem| elem.get_child("bind", ns::BIND).is_some())
            .expect("bind request");
        bind.attr("id").unwrap().to_owned()
    }

    fn answer_bind(&mut self, id: &str) {
        self.recv(&format!(
            "<iq type='result' id='{}'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>juliet@example.org/balcony</jid></bind></iq>",
            id
        ));
    }

    /// Full login with bind and resumable stream management.
    fn login(&mut self) -> SessionInfo {
        self.authenticate(BIND_FEATURES);
        let id = self.bind_request_id();
        self.answer_bind(&id);
        self.sent();
        self.recv(ENABLED);
        self.sent();
        self.online()
    }
}

fn is_stream_error(elem: &Element, condition: &str) -> bool {
    elem.is("error", ns::STREAM) && elem.get_child(condition, ns::XMPP_STREAMS).is_some()
}

#[test]
fn plain_login_with_bind_and_stream_management() {
    let mut h = Harness::new(config());
    h.connect();
    assert!(matches!(h.sent()[..], [Sent::Header]));
    assert_eq!(h.negotiator.phase(), SessionPhase::StreamOpened);

    h.recv(SERVER_HEADER);
    assert_eq!(h.negotiator.stream_id(), Some("s1"));
    h.recv(PLAIN_FEATURES);
    let auth = h.sent_elements();
    assert!(auth[0].is("auth", ns::SASL));
    assert_eq!(auth[0].attr("mechanism"), Some("PLAIN"));
    assert_eq!(auth[0].text(), "AGp1bGlldABzZWNyZXQ=");
    assert_eq!(h.negotiator.phase(), SessionPhase::Authenticating);

    h.recv(SUCCESS);
    assert!(matches!(h.sent()[..], [Sent::Header]));
    h.recv(SERVER_HEADER);
    h.recv(BIND_FEATURES);
    assert_eq!(h.negotiator.phase(), SessionPhase::BindingOrResuming);
    let bind = h.sent_elements();
    assert_eq!(bind[0].attr("type"), Some("set"));
    assert_eq!(
        bind[0]
            .get_child("bind", ns::BIND)
            .and_then(|bind| bind.get_child("resource", ns::BIND))
            .map(|resource| resource.text()),
        Some("balcony".to_owned())
    );
    let id = bind[0].attr("id").unwrap().to_owned();

    h.answer_bind(&id);
    let enable = h.sent_elements();
    assert!(enable[0].is("enable", ns::SM));
    assert_eq!(enable[0].attr("resume"), Some("true"));

    h.recv(ENABLED);
    let info = h.online();
    assert_eq!(
        info.bound_jid,
        Some("juliet@example.org/balcony".parse().unwrap())
    );
    assert!(info.stream_management);
    assert!(!info.resumed);
    assert!(!info.inline_bind);
    assert!(h.negotiator.is_active());
    assert_eq!(h.negotiator.phase(), SessionPhase::Active);
}

#[test]
fn starttls_is_negotiated_when_offered() {
    let mut h = Harness::new(config());
    h.transport.set_supports_encryption(true);
    h.connect();
    h.recv(SERVER_HEADER);
    h.recv(TLS_FEATURES);
    let sent = h.sent_elements();
    assert!(sent[0].is("starttls", ns::TLS));
    assert_eq!(h.negotiator.phase(), SessionPhase::Securing);

    h.recv("<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>");
    assert!(h.transport.take_tls_request());
    assert_eq!(h.negotiator.phase(), SessionPhase::Securing);

    h.transport.set_encrypted(None);
    h.negotiator.handle_encrypted(&mut h.transport, h.now);
    assert!(matches!(h.sent()[..], [Sent::Header]));
    h.recv(SERVER_HEADER);
    h.recv(PLAIN_FEATURES);
    assert!(h.sent_elements()[0].is("auth", ns::SASL));
}

#[test]
fn required_tls_without_support_fails() {
    let mut h = Harness::new(config());
    h.connect();
    h.recv(SERVER_HEADER);
    h.recv(TLS_FEATURES);
    let (error, can_resume) = h.disconnected();
    assert!(matches!(error, Some(Error::Protocol(ProtocolError::NoTls))));
    assert!(!can_resume);
    assert!(h.transport.take_close_request());
    assert_eq!(h.negotiator.phase(), SessionPhase::Disconnected);
}

#[test]
fn local_tls_requirement_is_enforced() {
    let mut h = Harness::new(config().with_security(StreamSecurityMode::TlsRequired));
    h.transport.set_supports_encryption(true);
    h.connect();
    h.recv(SERVER_HEADER);
    h.recv(PLAIN_FEATURES);
    let (error, _) = h.disconnected();
    assert!(matches!(error, Some(Error::Protocol(ProtocolError::NoTls))));
}

#[test]
fn authentication_failure_is_reported() {
    let mut h = Harness::new(config());
    h.connect();
    h.recv(SERVER_HEADER);
    h.recv(PLAIN_FEATURES);
    h.recv("<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>");
    let (error, can_resume) = h.disconnected();
    match error {
        Some(Error::Auth(AuthError::Fail { condition, .. })) => {
            assert_eq!(condition, "not-authorized")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!can_resume);
}

#[test]
fn no_common_mechanism() {
    let mut h = Harness::new(config());
    h.connect();
    h.recv(SERVER_HEADER);
    h.recv("<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>EXTERNAL</mechanism></mechanisms></stream:features>");
    let (error, _) = h.disconnected();
    assert!(matches!(error, Some(Error::Auth(AuthError::NoMechanism))));
}

#[test]
fn unexpected_element_during_negotiation() {
    let mut h = Harness::new(config());
    h.connect();
    h.recv(SERVER_HEADER);
    h.sent();
    h.recv("<message id='early'/>");
    let sent = h.sent();
    match &sent[..] {
        [Sent::Element(error), Sent::Footer] => {
            assert!(is_stream_error(error, "unsupported-stanza-type"))
        }
        other => panic!("unexpected output: {:?}", other),
    }
    let (error, _) = h.disconnected();
    match error {
        Some(Error::Protocol(ProtocolError::UnexpectedElement { phase, name, .. })) => {
            assert_eq!(phase, SessionPhase::StreamOpened);
            assert_eq!(name, "message");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn malformed_input_is_not_well_formed() {
    let mut h = Harness::new(config());
    h.connect();
    h.recv(SERVER_HEADER);
    h.sent();
    h.recv("<stream:features><a></b></stream:features>");
    let sent = h.sent();
    assert!(matches!(&sent[..], [Sent::Element(error), Sent::Footer] if is_stream_error(error, "not-well-formed")));
    let (error, _) = h.disconnected();
    assert!(matches!(error, Some(Error::Xml(_))));
}

#[test]
fn negotiation_step_times_out() {
    let mut h = Harness::new(config());
    h.connect();
    h.recv(SERVER_HEADER);
    h.sent();
    assert!(h.negotiator.next_deadline().is_some());
    h.advance(Duration::from_secs(29));
    assert_eq!(h.negotiator.phase(), SessionPhase::StreamOpened);
    h.advance(Duration::from_secs(2));
    let sent = h.sent();
    assert!(matches!(&sent[..], [Sent::Element(error), Sent::Footer] if is_stream_error(error, "connection-timeout")));
    let (error, can_resume) = h.disconnected();
    assert!(matches!(
        error,
        Some(Error::Timeout(TimeoutKind::Negotiation(
            SessionPhase::StreamOpened
        )))
    ));
    assert!(!can_resume);
}

#[test]
fn peer_stream_error_ends_session() {
    let mut h = Harness::new(config());
    h.login();
    h.recv("<stream:error><conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>");
    assert!(matches!(h.sent()[..], [Sent::Footer]));
    let (error, can_resume) = h.disconnected();
    match error {
        Some(Error::Protocol(ProtocolError::StreamError { condition, .. })) => {
            assert_eq!(condition, "conflict")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!can_resume);
    assert!(!h.negotiator.can_resume());
}

#[test]
fn inbound_stanzas_are_counted_and_acknowledged() {
    let mut h = Harness::new(config());
    h.login();
    h.recv("<message from='romeo@example.net/orchard' id='m1'><body>Hi</body></message>");
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].as_stanza().unwrap().attr("id"), Some("m1"));
    assert_eq!(h.negotiator.stream_management().inbound_ctr(), 1);

    h.recv("<r xmlns='urn:xmpp:sm:3'/>");
    let sent = h.sent_elements();
    assert!(sent[0].is("a", ns::SM));
    assert_eq!(sent[0].attr("h"), Some("1"));
}

#[test]
fn outbound_stanzas_are_acknowledged() {
    let mut h = Harness::new(config());
    h.login();
    assert!(h.send(message("out-1")));
    let sent = h.sent_elements();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].attr("id"), Some("out-1"));
    assert!(sent[1].is("r", ns::SM));
    assert_eq!(h.negotiator.stream_management().unacked_len(), 1);

    h.recv("<a xmlns='urn:xmpp:sm:3' h='1'/>");
    assert_eq!(h.negotiator.stream_management().unacked_len(), 0);
    assert!(h.events().is_empty());
}

#[test]
fn ack_beyond_sent_count_is_fatal() {
    let mut h = Harness::new(config());
    h.login();
    h.recv("<a xmlns='urn:xmpp:sm:3' h='5'/>");
    let sent = h.sent();
    match &sent[..] {
        [Sent::Element(error), Sent::Footer] => {
            assert!(is_stream_error(error, "undefined-condition"));
            let detail = error
                .get_child("handled-count-too-high", ns::SM)
                .unwrap();
            assert_eq!(detail.attr("h"), Some("5"));
            assert_eq!(detail.attr("send-count"), Some("0"));
        }
        other => panic!("unexpected output: {:?}", other),
    }
    let (error, can_resume) = h.disconnected();
    assert!(matches!(
        error,
        Some(Error::Protocol(ProtocolError::HandledCountTooHigh {
            h: 5,
            send_count: 0
        }))
    ));
    assert!(!can_resume);
}

#[test]
fn unhandled_iq_gets_service_unavailable() {
    let mut h = Harness::new(config());
    h.login();
    h.recv("<iq type='get' id='v1' from='example.org' to='juliet@example.org/balcony'><query xmlns='jabber:iq:version'/></iq>");
    assert!(h.events().is_empty());
    let sent = h.sent_elements();
    let reply = &sent[0];
    assert_eq!(reply.attr("type"), Some("error"));
    assert_eq!(reply.attr("id"), Some("v1"));
    assert_eq!(reply.attr("to"), Some("example.org"));
    assert!(reply
        .get_child("error", ns::JABBER_CLIENT)
        .and_then(|error| error.get_child("service-unavailable", ns::XMPP_STANZAS))
        .is_some());
}

#[test]
fn responses_complete_requests() {
    let mut h = Harness::new(config());
    h.login();
    let request = Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "get")
        .attr("id", "roster-1")
        .append(Element::builder("query", "jabber:iq:roster").build())
        .build();
    let mut handle = h
        .negotiator
        .send_request(request, &mut h.transport, h.now)
        .unwrap();
    assert!(handle.try_result().is_none());
    h.recv("<iq type='result' id='roster-1'><query xmlns='jabber:iq:roster'/></iq>");
    assert!(matches!(handle.try_result(), Some(Ok(_))));
    assert!(h.events().is_empty());
    assert!(h.negotiator.requests().is_empty());
}

#[test]
fn pending_requests_are_cancelled_on_disconnect() {
    let mut h = Harness::new(config());
    h.login();
    let request = Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "get")
        .append(Element::builder("query", "jabber:iq:roster").build())
        .build();
    let mut handle = h
        .negotiator
        .send_request(request, &mut h.transport, h.now)
        .unwrap();
    h.drop_connection();
    assert!(matches!(
        handle.try_result(),
        Some(Err(RequestError::Cancelled(Error::Transport(_))))
    ));
}

struct Recorder {
    name: &'static str,
    claims: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Extension for Recorder {
    fn handle_stanza(&mut self, stanza: &Element, _outbound: &mut Outbound<'_>) -> bool {
        let id = stanza.attr("id").unwrap_or_default();
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, id));
        id == self.claims
    }

    fn on_session_begin(&mut self, info: &SessionInfo, _outbound: &mut Outbound<'_>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:begin:{}", self.name, info.resumed));
    }

    fn on_session_end(&mut self, can_resume: bool) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:end:{}", self.name, can_resume));
    }
}

#[test]
fn extensions_are_offered_stanzas_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut h = Harness::new(config());
    h.negotiator.register_extension(Recorder {
        name: "first",
        claims: "a",
        log: log.clone(),
    });
    h.negotiator.register_extension(Recorder {
        name: "second",
        claims: "b",
        log: log.clone(),
    });
    h.login();
    h.recv("<message id='a'/>");
    h.recv("<message id='b'/>");
    h.recv("<message id='c'/>");
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].as_stanza().unwrap().attr("id"), Some("c"));
    h.drop_connection();

    assert_eq!(
        *log.lock().unwrap(),
        [
            "first:begin:false",
            "second:begin:false",
            "first:a",
            "first:b",
            "second:b",
            "first:c",
            "second:c",
            "first:end:true",
            "second:end:true",
        ]
    );
}

struct Greeter;

impl Extension for Greeter {
    fn handle_stanza(&mut self, _stanza: &Element, _outbound: &mut Outbound<'_>) -> bool {
        false
    }

    fn on_session_begin(&mut self, _info: &SessionInfo, outbound: &mut Outbound<'_>) {
        outbound.send_stanza(Element::builder("presence", ns::JABBER_CLIENT).build());
    }
}

#[test]
fn extensions_may_send_on_session_begin() {
    let mut h = Harness::new(config());
    h.negotiator.register_extension(Greeter);
    h.authenticate(BIND_FEATURES);
    let id = h.bind_request_id();
    h.answer_bind(&id);
    h.sent();
    h.recv(ENABLED);
    let sent = h.sent_elements();
    assert!(sent[0].is("presence", ns::JABBER_CLIENT));
    assert!(sent[1].is("r", ns::SM));
    assert_eq!(h.negotiator.stream_management().unacked_len(), 1);
}

#[test]
fn stanzas_before_enabled_are_delivered_uncounted() {
    let mut h = Harness::new(config());
    h.authenticate(BIND_FEATURES);
    let id = h.bind_request_id();
    h.answer_bind(&id);
    h.sent();
    h.recv("<message id='early'/>");
    assert!(h.events().is_empty());
    h.recv(ENABLED);
    let events = h.events();
    assert!(events[0].is_online());
    assert_eq!(events[1].as_stanza().unwrap().attr("id"), Some("early"));
    assert_eq!(h.negotiator.stream_management().inbound_ctr(), 0);
}

#[test]
fn session_without_stream_management() {
    let mut h = Harness::new(config().with_stream_management(false));
    h.authenticate(BIND_FEATURES);
    let id = h.bind_request_id();
    h.answer_bind(&id);
    let info = h.online();
    assert!(!info.stream_management);
    assert!(h.send(message("plain")));
    let sent = h.sent_elements();
    assert_eq!(sent.len(), 1);
    h.drop_connection();
    let (_, can_resume) = h.disconnected();
    assert!(!can_resume);
    assert!(!h.send(message("lost")));
}

#[test]
fn bind_rejection_is_fatal() {
    let mut h = Harness::new(config());
    h.authenticate(BIND_FEATURES);
    let id = h.bind_request_id();
    h.recv(&format!(
        "<iq type='error' id='{}'><error type='cancel'><conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>",
        id
    ));
    let (error, _) = h.disconnected();
    assert!(matches!(error, Some(Error::Bind(_))));
}

#[test]
fn resume_after_connection_loss() {
    let mut h = Harness::new(config());
    h.login();
    assert!(h.send(message("before")));
    h.sent();
    h.drop_connection();
    let (error, can_resume) = h.disconnected();
    assert!(matches!(error, Some(Error::Transport(_))));
    assert!(can_resume);
    assert!(h.negotiator.can_resume());

    // Stanzas sent while suspended are kept for the resumed session.
    assert!(h.send(message("while-away")));
    assert_eq!(h.negotiator.stream_management().unacked_len(), 2);

    h.authenticate(BIND_FEATURES);
    let sent = h.sent_elements();
    assert!(sent[0].is("resume", ns::SM));
    assert_eq!(sent[0].attr("previd"), Some("sm-1"));
    assert_eq!(sent[0].attr("h"), Some("0"));
    assert_eq!(h.negotiator.phase(), SessionPhase::BindingOrResuming);

    h.recv("<resumed xmlns='urn:xmpp:sm:3' previd='sm-1' h='0'/>");
    let sent = h.sent_elements();
    let ids: Vec<_> = sent.iter().map(|elem| elem.attr("id")).collect();
    assert_eq!(ids, [Some("before"), Some("while-away"), None]);
    assert!(sent[2].is("r", ns::SM));
    let info = h.online();
    assert!(info.resumed);
    assert_eq!(
        info.bound_jid,
        Some("juliet@example.org/balcony".parse().unwrap())
    );
}

#[test]
fn resume_prunes_acknowledged_stanzas() {
    let mut h = Harness::new(config());
    h.login();
    h.send(message("one"));
    h.send(message("two"));
    h.sent();
    h.drop_connection();
    h.events();

    h.authenticate(BIND_FEATURES);
    h.sent();
    h.recv("<resumed xmlns='urn:xmpp:sm:3' previd='sm-1' h='1'/>");
    let sent = h.sent_elements();
    assert_eq!(sent[0].attr("id"), Some("two"));
    assert_eq!(
        h.negotiator
            .stream_management()
            .unacked_sequence_numbers()
            .collect::<Vec<_>>(),
        [2]
    );
}

#[test]
fn failed_resumption_binds_new_session_and_replays() {
    let mut h = Harness::new(config());
    h.login();
    h.send(message("one"));
    h.send(message("two"));
    h.sent();
    h.drop_connection();
    h.events();

    h.authenticate(BIND_FEATURES);
    h.sent();
    h.recv("<failed xmlns='urn:xmpp:sm:3' h='1'><item-not-found xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></failed>");
    let id = h.bind_request_id();
    h.answer_bind(&id);
    assert!(h.sent_elements()[0].is("enable", ns::SM));
    h.recv("<enabled xmlns='urn:xmpp:sm:3' id='sm-2' resume='true'/>");

    // The stanza the old session did not confirm goes out again, numbered
    // for the new session.
    let sent = h.sent_elements();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].attr("id"), Some("two"));
    assert!(sent[1].is("r", ns::SM));
    assert_eq!(
        h.negotiator
            .stream_management()
            .unacked_sequence_numbers()
            .collect::<Vec<_>>(),
        [1]
    );
    let info = h.online();
    assert!(!info.resumed);
}

#[test]
fn suspended_session_expires() {
    let mut h = Harness::new(config().with_resume_grace_period(Duration::from_secs(60)));
    h.login();
    h.drop_connection();
    h.events();
    let request = Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "get")
        .append(Element::builder("query", "jabber:iq:roster").build())
        .build();
    let mut handle = h
        .negotiator
        .send_request(request, &mut h.transport, h.now)
        .unwrap();

    assert_eq!(
        h.negotiator.next_deadline(),
        Some(h.now + Duration::from_secs(60))
    );
    h.advance(Duration::from_secs(59));
    assert!(h.negotiator.can_resume());
    h.advance(Duration::from_secs(2));
    assert!(!h.negotiator.can_resume());
    assert!(matches!(
        handle.try_result(),
        Some(Err(RequestError::Cancelled(Error::Disconnected)))
    ));

    // A new session is negotiated from scratch.
    h.authenticate(BIND_FEATURES);
    assert!(h.sent_elements()[0].get_child("bind", ns::BIND).is_some());
}

#[test]
fn sasl2_with_inline_bind() {
    let mut h = Harness::new(config());
    h.connect();
    h.recv(SERVER_HEADER);
    h.recv(SASL2_FEATURES);
    let sent = h.sent_elements();
    let authenticate = &sent[0];
    assert!(authenticate.is("authenticate", ns::SASL2));
    assert_eq!(authenticate.attr("mechanism"), Some("PLAIN"));
    let bind = authenticate.get_child("bind", ns::BIND2).unwrap();
    assert_eq!(
        bind.get_child("tag", ns::BIND2).map(|tag| tag.text()),
        Some("balcony".to_owned())
    );
    assert!(bind.get_child("enable", ns::SM).is_some());
    assert!(authenticate.get_child("resume", ns::SM).is_none());

    h.recv("<success xmlns='urn:xmpp:sasl:2'><authorization-identifier>juliet@example.org/balcony.4f2a</authorization-identifier><bound xmlns='urn:xmpp:bind:0'><enabled xmlns='urn:xmpp:sm:3' id='sm-2' resume='true'/></bound></success>");
    // No stream restart with SASL2.
    assert!(h.sent().is_empty());
    let info = h.online();
    assert!(info.inline_bind);
    assert!(info.stream_management);
    assert_eq!(
        info.bound_jid,
        Some("juliet@example.org/balcony.4f2a".parse().unwrap())
    );
}

#[test]
fn sasl2_with_inline_resumption() {
    let mut h = Harness::new(config());
    h.connect();
    h.recv(SERVER_HEADER);
    h.recv(SASL2_FEATURES);
    h.sent();
    h.recv("<success xmlns='urn:xmpp:sasl:2'><authorization-identifier>juliet@example.org/balcony</authorization-identifier><bound xmlns='urn:xmpp:bind:0'><enabled xmlns='urn:xmpp:sm:3' id='sm-2' resume='true'/></bound></success>");
    h.online();
    h.send(message("pending"));
    h.sent();
    h.drop_connection();
    h.events();

    h.connect();
    h.recv(SERVER_HEADER);
    h.recv(SASL2_FEATURES);
    let sent = h.sent_elements();
    let authenticate = &sent[0];
    let resume = authenticate.get_child("resume", ns::SM).unwrap();
    assert_eq!(resume.attr("previd"), Some("sm-2"));
    assert!(authenticate.get_child("bind", ns::BIND2).is_none());

    h.recv("<success xmlns='urn:xmpp:sasl:2'><authorization-identifier>juliet@example.org</authorization-identifier><resumed xmlns='urn:xmpp:sm:3' previd='sm-2' h='0'/></success>");
    let sent = h.sent_elements();
    assert_eq!(sent[0].attr("id"), Some("pending"));
    let info = h.online();
    assert!(info.resumed);
}

#[test]
fn sasl2_is_not_used_when_disabled() {
    let mut h = Harness::new(config().with_sasl2(false));
    h.connect();
    h.recv(SERVER_HEADER);
    h.recv("<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms><authentication xmlns='urn:xmpp:sasl:2'><mechanism>PLAIN</mechanism></authentication></stream:features>");
    assert!(h.sent_elements()[0].is("auth", ns::SASL));
}

#[test]
fn unanswered_keepalive_suspends_session() {
    let mut h = Harness::new(config().with_timeouts(Timeouts::tight()));
    h.login();
    h.advance(Duration::from_secs(59));
    assert!(h.sent().is_empty());
    h.advance(Duration::from_secs(2));
    let sent = h.sent_elements();
    assert!(sent[0].get_child("ping", ns::PING).is_some());

    h.advance(Duration::from_secs(6));
    let (error, can_resume) = h.disconnected();
    assert!(matches!(error, Some(Error::Timeout(TimeoutKind::Keepalive))));
    assert!(can_resume);
}

#[test]
fn answered_keepalive_keeps_session() {
    let mut h = Harness::new(config().with_timeouts(Timeouts::tight()));
    h.login();
    h.advance(Duration::from_secs(61));
    let sent = h.sent_elements();
    let id = sent[0].attr("id").unwrap().to_owned();
    h.recv(&format!("<iq type='result' id='{}' from='example.org'/>", id));
    h.advance(Duration::from_secs(6));
    assert!(h.events().is_empty());
    assert!(h.negotiator.is_active());
}

#[test]
fn orderly_disconnect() {
    let mut h = Harness::new(config());
    h.login();
    h.negotiator.disconnect(&mut h.transport, h.now);
    assert!(matches!(h.sent()[..], [Sent::Footer]));
    assert_eq!(h.negotiator.phase(), SessionPhase::Closing);
    assert!(!h.send(message("too-late")));

    h.recv("</stream:stream>");
    let (error, can_resume) = h.disconnected();
    assert!(error.is_none());
    assert!(!can_resume);
    assert!(h.transport.take_close_request());
    assert!(!h.negotiator.can_resume());
}

#[test]
fn disconnect_times_out_without_peer_footer() {
    let mut h = Harness::new(config());
    h.login();
    h.negotiator.disconnect(&mut h.transport, h.now);
    h.advance(Duration::from_secs(11));
    let (error, can_resume) = h.disconnected();
    assert!(matches!(error, Some(Error::Timeout(TimeoutKind::Shutdown))));
    assert!(!can_resume);
}

#[test]
fn peer_closing_the_stream_ends_session() {
    let mut h = Harness::new(config());
    h.login();
    h.recv("</stream:stream>");
    assert!(matches!(h.sent()[..], [Sent::Footer]));
    let (error, can_resume) = h.disconnected();
    assert!(matches!(
        error,
        Some(Error::Protocol(ProtocolError::StreamClosed))
    ));
    assert!(!can_resume);
}
