// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use minidom::Element;

use super::*;
use crate::error::XmlError;
use crate::proto::ns;

const HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' id='abc' from='example.org' version='1.0'>";

fn drain(framer: &mut XmlFramer) -> Vec<FramerEvent> {
    let mut events = Vec::new();
    while let Some(ev) = framer.next_event().expect("framing error") {
        events.push(ev);
    }
    events
}

fn stanzas(events: &[FramerEvent]) -> Vec<&Element> {
    events
        .iter()
        .filter_map(|ev| match ev {
            FramerEvent::Stanza(el) => Some(el),
            _ => None,
        })
        .collect()
}

#[test]
fn test_stream_open_exposes_header_and_namespaces() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    let events = drain(&mut framer);
    assert_eq!(events.len(), 1);
    let FramerEvent::StreamOpen(ref open) = events[0] else {
        panic!("expected stream open, got {:?}", events[0]);
    };
    assert!(open.header.is("stream", ns::STREAM));
    assert_eq!(open.header.attr("id"), Some("abc"));
    assert_eq!(open.namespaces.default_ns(), Some(ns::JABBER_CLIENT));
    assert_eq!(open.namespaces.resolve_prefix("stream"), Some(ns::STREAM));
    assert_eq!(open.namespaces.root_name(), "stream:stream");
    assert!(framer.is_open());

    let header = StreamHeader::from_stream_open(open, ns::JABBER_CLIENT).unwrap();
    assert_eq!(header.id.as_deref(), Some("abc"));
    assert_eq!(header.from.as_deref(), Some("example.org"));
}

#[test]
fn test_header_declarations_expand_references() {
    let mut framer = XmlFramer::default();
    framer.feed(b"<stream:stream xmlns='jabber&#x3A;client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0'>");
    let Some(FramerEvent::StreamOpen(open)) = framer.next_event().unwrap() else {
        panic!("expected stream open");
    };
    assert_eq!(open.namespaces.default_ns(), Some(ns::JABBER_CLIENT));
    assert!(StreamHeader::from_stream_open(&open, ns::JABBER_CLIENT).is_ok());

    framer.feed(b"<message><body>hi</body></message>");
    let Some(FramerEvent::Stanza(message)) = framer.next_event().unwrap() else {
        panic!("expected a stanza");
    };
    assert!(message.is("message", ns::JABBER_CLIENT));
}

#[test]
fn test_stream_prefix_may_be_rebound() {
    let mut framer = XmlFramer::default();
    framer.feed(b"<s:stream xmlns='jabber:client' xmlns:s='http://etherx.jabber.org/streams' version='1.0'><s:features/></s:stream>");
    let events = drain(&mut framer);
    assert_eq!(events.len(), 3);
    let FramerEvent::StreamOpen(ref open) = events[0] else {
        panic!("expected stream open");
    };
    assert_eq!(open.namespaces.root_name(), "s:stream");
    assert_eq!(open.namespaces.resolve_prefix("s"), Some(ns::STREAM));
    assert!(stanzas(&events)[0].is("features", ns::STREAM));
    assert_eq!(events[2], FramerEvent::StreamClose);
}

#[test]
fn test_element_split_across_chunks() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    drain(&mut framer);

    framer.feed(b"<message><bo");
    assert_eq!(framer.next_event().unwrap(), None);
    framer.feed(b"dy>hi</body></message>");
    let events = drain(&mut framer);
    assert_eq!(events.len(), 1);
    let FramerEvent::Stanza(ref message) = events[0] else {
        panic!("expected a stanza, got {:?}", events[0]);
    };
    assert!(message.is("message", ns::JABBER_CLIENT));
    assert_eq!(
        message.get_child("body", ns::JABBER_CLIENT).unwrap().text(),
        "hi"
    );
}

#[test]
fn test_prefixed_elements_resolve_against_header() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    framer.feed(b"<stream:features><sm xmlns='urn:xmpp:sm:3'/></stream:features>");
    let events = drain(&mut framer);
    let features = stanzas(&events);
    assert_eq!(features.len(), 1);
    assert!(features[0].is("features", ns::STREAM));
    assert!(features[0].get_child("sm", ns::SM).is_some());
}

#[test]
fn test_stream_close() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    framer.feed(b"<presence/>\n</stream:stream>");
    let events = drain(&mut framer);
    assert_eq!(events.len(), 3);
    assert!(matches!(events[1], FramerEvent::Stanza(_)));
    assert_eq!(events[2], FramerEvent::StreamClose);
    assert!(framer.is_closed());

    // Nothing is framed after the footer.
    framer.feed(b"<message/>");
    assert_eq!(framer.next_event().unwrap(), None);
}

#[test]
fn test_self_closed_stream() {
    let mut framer = XmlFramer::default();
    framer.feed(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' version='1.0'/>");
    let events = drain(&mut framer);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], FramerEvent::StreamOpen(_)));
    assert_eq!(events[1], FramerEvent::StreamClose);
}

#[test]
fn test_chunking_is_invisible() {
    let input = format!(
        "{}\n<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms></stream:features> <message to='juliet@example.org' id='a&gt;b'><body>x &lt; y > z</body><x xmlns='urn:example'><![CDATA[<not-an-element/>]]></x></message><iq type='result' id='1'/><presence><status>caf\u{e9} \u{1F600}</status></presence></stream:stream>",
        HEADER
    );
    let bytes = input.as_bytes();

    let mut whole = XmlFramer::default();
    whole.feed(bytes);
    let expected = drain(&mut whole);
    assert_eq!(expected.len(), 6);

    for split in 1..bytes.len() {
        let mut framer = XmlFramer::default();
        let mut events = Vec::new();
        framer.feed(&bytes[..split]);
        events.extend(drain(&mut framer));
        framer.feed(&bytes[split..]);
        events.extend(drain(&mut framer));
        assert_eq!(events, expected, "split at {}", split);
    }

    let mut framer = XmlFramer::default();
    let mut events = Vec::new();
    for byte in bytes {
        framer.feed(core::slice::from_ref(byte));
        events.extend(drain(&mut framer));
    }
    assert_eq!(events, expected);
}

#[test]
fn test_cdata_and_quoted_angle_brackets() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    framer.feed(b"<message id='x>y'><body><![CDATA[</message>]]></body></message>");
    let events = drain(&mut framer);
    let message = stanzas(&events);
    assert_eq!(message.len(), 1);
    assert_eq!(message[0].attr("id"), Some("x>y"));
    assert_eq!(
        message[0].get_child("body", ns::JABBER_CLIENT).unwrap().text(),
        "</message>"
    );
}

#[test]
fn test_whitespace_keepalives_are_skipped() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    drain(&mut framer);
    framer.feed(b" \r\n\t ");
    assert_eq!(framer.next_event().unwrap(), None);
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn test_text_at_stream_level_is_rejected() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    drain(&mut framer);
    framer.feed(b"hello");
    assert_eq!(framer.next_event(), Err(XmlError::UnexpectedText));
}

#[test]
fn test_comments_are_rejected() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    drain(&mut framer);
    framer.feed(b"<message><!-- hi --></message>");
    assert_eq!(framer.next_event(), Err(XmlError::Forbidden("comments")));
}

#[test]
fn test_doctype_is_rejected() {
    let mut framer = XmlFramer::default();
    framer.feed(b"<?xml version='1.0'?><!DOCTYPE foo>");
    assert!(framer.next_event().is_err());
}

#[test]
fn test_processing_instructions_are_rejected() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    drain(&mut framer);
    framer.feed(b"<?foo bar?>");
    assert_eq!(
        framer.next_event(),
        Err(XmlError::Forbidden("processing instructions"))
    );
}

#[test]
fn test_malformed_element_is_rejected() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    drain(&mut framer);
    framer.feed(b"<message><body></message></body>");
    assert!(framer.next_event().is_err());
}

#[test]
fn test_undeclared_prefix_is_rejected() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    drain(&mut framer);
    framer.feed(b"<foo:bar/>");
    assert!(matches!(framer.next_event(), Err(XmlError::Parser(_))));
}

#[test]
fn test_first_element_must_be_stream_header() {
    let mut framer = XmlFramer::default();
    framer.feed(b"<message xmlns='jabber:client'/>");
    assert_eq!(framer.next_event(), Err(XmlError::NotAStream));
}

#[test]
fn test_oversized_element_is_rejected() {
    let mut framer = XmlFramer::new(32);
    framer.feed(HEADER.as_bytes());
    drain(&mut framer);
    framer.feed(b"<message><body>");
    assert_eq!(framer.next_event().unwrap(), None);
    framer.feed(&[b'a'; 64]);
    assert!(matches!(
        framer.next_event(),
        Err(XmlError::StanzaTooLarge { .. })
    ));
}

#[test]
fn test_invalid_utf8_is_rejected() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    drain(&mut framer);
    framer.feed(b"<message><body>\xff\xfe</body></message>");
    assert_eq!(framer.next_event(), Err(XmlError::InvalidUtf8));
}

#[test]
fn test_reset_starts_a_new_document() {
    let mut framer = XmlFramer::default();
    framer.feed(HEADER.as_bytes());
    framer.feed(b"<message><bo");
    drain(&mut framer);
    framer.reset();
    assert!(!framer.is_open());
    assert_eq!(framer.buffered(), 0);
    framer.feed(HEADER.as_bytes());
    let events = drain(&mut framer);
    assert!(matches!(events[..], [FramerEvent::StreamOpen(_)]));
}

#[test]
fn test_header_serialisation() {
    let mut header = StreamHeader::to_domain("example.org");
    header.lang = Some("en".into());
    let xml = header.to_xml(ns::JABBER_CLIENT);
    assert!(xml.starts_with("<?xml version='1.0'?><stream:stream "));
    assert!(xml.contains(" to='example.org'"));
    assert!(xml.contains(" xml:lang='en'"));
    assert!(xml.contains(" version='1.0'"));

    // What we send must be framed by what we receive.
    let mut framer = XmlFramer::default();
    framer.feed(xml.as_bytes());
    framer.feed(STREAM_FOOTER.as_bytes());
    let events = drain(&mut framer);
    let FramerEvent::StreamOpen(ref open) = events[0] else {
        panic!("expected stream open");
    };
    let parsed = StreamHeader::from_stream_open(open, ns::JABBER_CLIENT).unwrap();
    assert_eq!(parsed.to.as_deref(), Some("example.org"));
    assert_eq!(events[1], FramerEvent::StreamClose);
}

#[test]
fn test_header_validation() {
    let mut framer = XmlFramer::default();
    framer.feed(b"<stream:stream xmlns='jabber:server' xmlns:stream='http://etherx.jabber.org/streams' version='1.0'>");
    let Some(FramerEvent::StreamOpen(open)) = framer.next_event().unwrap() else {
        panic!("expected stream open");
    };
    assert!(StreamHeader::from_stream_open(&open, ns::JABBER_CLIENT).is_err());

    let mut framer = XmlFramer::default();
    framer.feed(b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>");
    let Some(FramerEvent::StreamOpen(open)) = framer.next_event().unwrap() else {
        panic!("expected stream open");
    };
    assert!(StreamHeader::from_stream_open(&open, ns::JABBER_CLIENT).is_err());
}
