//! RFC 6120 STARTTLS negotiation elements.

use minidom::Element;

use super::ns;

/// The `<starttls/>` request.
pub fn request() -> Element {
    Element::builder("starttls", ns::TLS).build()
}

/// Answer of the peer to `<starttls/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTlsReply {
    /// `<proceed/>`: the TLS handshake may start.
    Proceed,
    /// `<failure/>`: the peer will close the stream.
    Failure,
}

/// Classify an element as a STARTTLS reply.
pub fn parse_reply(elem: &Element) -> Option<StartTlsReply> {
    if elem.is("proceed", ns::TLS) {
        Some(StartTlsReply::Proceed)
    } else if elem.is("failure", ns::TLS) {
        Some(StartTlsReply::Failure)
    } else {
        None
    }
}
