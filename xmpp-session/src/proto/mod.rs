//! Stream-level elements ("nonzas") exchanged while negotiating and
//! maintaining a client session.
//!
//! Everything in here works on [`minidom::Element`]. Builders produce
//! elements ready for serialisation, parsers classify elements received
//! from the peer.

pub mod bind;
pub mod features;
pub mod sasl;
pub mod sm;
pub mod stanza;
pub mod stream_error;
pub mod tls;

use crate::error::ProtocolError;

/// XML namespaces used by this crate.
pub mod ns {
    /// RFC 6120 stream namespace
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    /// RFC 6120 client-to-server default namespace
    pub const JABBER_CLIENT: &str = "jabber:client";
    /// RFC 6120 stream error conditions
    pub const XMPP_STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
    /// RFC 6120 stanza error conditions
    pub const XMPP_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    /// RFC 6120 STARTTLS
    pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
    /// RFC 6120 SASL
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    /// RFC 6120 resource binding
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    /// XEP-0198 stream management
    pub const SM: &str = "urn:xmpp:sm:3";
    /// XEP-0199 XMPP ping
    pub const PING: &str = "urn:xmpp:ping";
    /// XEP-0388 extensible SASL profile
    pub const SASL2: &str = "urn:xmpp:sasl:2";
    /// XEP-0386 Bind 2
    pub const BIND2: &str = "urn:xmpp:bind:0";
}

/// Parse an unsigned 32 bit counter attribute.
pub(crate) fn parse_u32_attr(
    elem: &minidom::Element,
    name: &str,
) -> Result<Option<u32>, ProtocolError> {
    match elem.attr(name) {
        None => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| {
            ProtocolError::MalformedElement(format!(
                "attribute {} of <{}/> is not a valid counter: {:?}",
                name,
                elem.name(),
                v
            ))
        }),
    }
}

/// Parse an `xs:boolean` attribute, defaulting to `false`.
pub(crate) fn parse_bool_attr(elem: &minidom::Element, name: &str) -> bool {
    matches!(elem.attr(name), Some("true") | Some("1"))
}
