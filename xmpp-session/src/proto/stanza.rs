//! Helpers for the three RFC 6120 stanza kinds.

use std::collections::BTreeMap;

use minidom::Element;
use xmpp_parsers::iq::Iq;
use xmpp_parsers::jid::Jid;
use xmpp_parsers::ping::Ping;
pub use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

use super::ns;

/// The stanza kinds counted by stream management.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    /// `<message/>`
    Message,
    /// `<presence/>`
    Presence,
    /// `<iq/>`
    Iq,
}

impl StanzaKind {
    /// Classify an element. Nonzas yield `None`.
    pub fn of(elem: &Element) -> Option<Self> {
        if elem.ns() != ns::JABBER_CLIENT {
            return None;
        }
        match elem.name() {
            "message" => Some(Self::Message),
            "presence" => Some(Self::Presence),
            "iq" => Some(Self::Iq),
            _ => None,
        }
    }
}

/// The `type` of an IQ, or `None` if `elem` is not an IQ.
pub fn iq_type(elem: &Element) -> Option<&str> {
    if elem.is("iq", ns::JABBER_CLIENT) {
        elem.attr("type")
    } else {
        None
    }
}

/// Whether `elem` is an IQ request (`get` or `set`).
pub fn is_iq_request(elem: &Element) -> bool {
    matches!(iq_type(elem), Some("get") | Some("set"))
}

/// The name of the defined condition carried by `error`.
pub(crate) fn condition_name(error: &StanzaError) -> String {
    Element::from(error.defined_condition.clone())
        .name()
        .to_owned()
}

/// Build the error reply to an IQ request.
pub fn error_reply(
    request: &Element,
    condition: DefinedCondition,
    error_type: ErrorType,
) -> Element {
    let error = StanzaError {
        type_: error_type,
        by: None,
        defined_condition: condition,
        texts: BTreeMap::new(),
        other: None,
        alternate_address: None,
    };
    let mut reply = Iq::from_error(request.attr("id").unwrap_or_default(), error);
    reply.to = request.attr("from").and_then(|from| from.parse::<Jid>().ok());
    reply.from = request.attr("to").and_then(|to| to.parse::<Jid>().ok());
    reply.into()
}

/// XEP-0199 ping to the server.
pub fn ping(id: &str) -> Element {
    Iq::from_get(id, Ping).into()
}
