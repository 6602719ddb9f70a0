//! RFC 6120 SASL and XEP-0388 SASL2 elements.
//!
//! RFC 6120 elements are the [`xmpp_parsers::sasl`] types. SASL2 has no
//! counterpart there and is handled on [`minidom`] directly.

use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use minidom::{Element, Node};
use xmpp_parsers::sasl::{Auth, Challenge, Failure, Mechanism, Response, Success};

use super::ns;
use crate::config::UserAgentInfo;
use crate::error::{AuthError, ProtocolError};

/// RFC 6120 6.4.2: zero-length data is sent as a single equals sign.
const EMPTY: &str = "=";

fn is_empty_marker(elem: &Element) -> bool {
    elem.text().trim() == EMPTY
}

fn encode(data: &[u8]) -> String {
    if data.is_empty() {
        EMPTY.to_owned()
    } else {
        BASE64.encode(data)
    }
}

fn decode(elem: &Element) -> Result<Vec<u8>, ProtocolError> {
    let text = elem.text();
    let text = text.trim();
    if text.is_empty() || text == EMPTY {
        return Ok(Vec::new());
    }
    BASE64.decode(text).map_err(|e| {
        ProtocolError::MalformedElement(format!("invalid base64 in <{}/>: {}", elem.name(), e))
    })
}

fn with_data(name: &str, namespace: &str, data: &[u8]) -> Element {
    Element::builder(name, namespace)
        .append(Node::Text(encode(data)))
        .build()
}

/// RFC 6120 `<auth/>` with the mechanism's initial response.
pub fn auth(mechanism: &str, initial: &[u8]) -> Result<Element, AuthError> {
    let mechanism = Mechanism::from_str(mechanism)
        .map_err(|e| AuthError::Sasl(format!("cannot announce {}: {}", mechanism, e)))?;
    let mut elem: Element = Auth {
        mechanism,
        data: initial.to_vec(),
    }
    .into();
    if initial.is_empty() {
        elem.append_text_node(EMPTY);
    }
    Ok(elem)
}

/// RFC 6120 `<response/>`.
pub fn response(data: &[u8]) -> Element {
    Response {
        data: data.to_vec(),
    }
    .into()
}

/// XEP-0388 `<authenticate/>`.
///
/// `payloads` are inline requests (Bind 2, resumption) the server should
/// process once authentication succeeds.
pub fn authenticate(
    mechanism: &str,
    initial: &[u8],
    user_agent: &UserAgentInfo,
    payloads: Vec<Element>,
) -> Element {
    let mut agent = Element::builder("user-agent", ns::SASL2)
        .attr("id", user_agent.id.to_string());
    if let Some(ref software) = user_agent.software {
        agent = agent.append(
            Element::builder("software", ns::SASL2)
                .append(Node::Text(software.clone()))
                .build(),
        );
    }
    if let Some(ref device) = user_agent.device {
        agent = agent.append(
            Element::builder("device", ns::SASL2)
                .append(Node::Text(device.clone()))
                .build(),
        );
    }
    let mut builder = Element::builder("authenticate", ns::SASL2).attr("mechanism", mechanism);
    if !initial.is_empty() {
        builder = builder.append(with_data("initial-response", ns::SASL2, initial));
    }
    builder.append(agent.build()).append_all(payloads).build()
}

/// XEP-0388 `<response/>`.
pub fn response2(data: &[u8]) -> Element {
    with_data("response", ns::SASL2, data)
}

/// Answer of the peer during a SASL exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum SaslReply {
    /// Server challenge, to be fed to the mechanism.
    Challenge(Vec<u8>),
    /// Authentication succeeded.
    Success {
        /// Additional data with success, to be verified by the mechanism.
        additional_data: Vec<u8>,
        /// XEP-0388: the identity the session is authorized as. This is the
        /// full JID if an inline bind took place.
        authorization_identifier: Option<String>,
        /// XEP-0388: results of inline requests.
        payloads: Vec<Element>,
    },
    /// Authentication failed.
    Failure {
        /// Defined condition, e.g. `not-authorized`.
        condition: String,
        /// Optional human-readable text.
        text: Option<String>,
    },
    /// XEP-0388 `<continue/>`: the server wants additional tasks.
    Continue,
}

fn parse_failure2(elem: &Element) -> SaslReply {
    let condition = elem
        .children()
        .find(|child| child.ns() == ns::SASL && child.name() != "text")
        .map(|child| child.name().to_owned())
        .unwrap_or_else(|| "undefined-condition".to_owned());
    let text = elem
        .children()
        .find(|child| child.name() == "text")
        .map(|child| child.text());
    SaslReply::Failure { condition, text }
}

/// Classify an RFC 6120 SASL reply. Returns `None` for anything else.
pub fn parse_reply(elem: &Element) -> Result<Option<SaslReply>, ProtocolError> {
    if elem.ns() != ns::SASL {
        return Ok(None);
    }
    let reply = match elem.name() {
        "challenge" if is_empty_marker(elem) => SaslReply::Challenge(Vec::new()),
        "challenge" => SaslReply::Challenge(Challenge::try_from(elem.clone())?.data),
        "success" => SaslReply::Success {
            additional_data: if is_empty_marker(elem) {
                Vec::new()
            } else {
                Success::try_from(elem.clone())?.data
            },
            authorization_identifier: None,
            payloads: Vec::new(),
        },
        "failure" => {
            let failure = Failure::try_from(elem.clone())?;
            SaslReply::Failure {
                condition: Element::from(failure.defined_condition).name().to_owned(),
                text: failure.texts.into_values().next(),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(reply))
}

/// Classify a XEP-0388 reply. Returns `None` for anything else.
pub fn parse_reply2(elem: &Element) -> Result<Option<SaslReply>, ProtocolError> {
    if elem.is("challenge", ns::SASL2) {
        Ok(Some(SaslReply::Challenge(decode(elem)?)))
    } else if elem.is("success", ns::SASL2) {
        let additional_data = match elem.get_child("additional-data", ns::SASL2) {
            Some(data) => decode(data)?,
            None => Vec::new(),
        };
        let authorization_identifier = elem
            .get_child("authorization-identifier", ns::SASL2)
            .map(|id| id.text().trim().to_owned());
        let payloads = elem
            .children()
            .filter(|child| child.ns() != ns::SASL2)
            .cloned()
            .collect();
        Ok(Some(SaslReply::Success {
            additional_data,
            authorization_identifier,
            payloads,
        }))
    } else if elem.is("failure", ns::SASL2) {
        Ok(Some(parse_failure2(elem)))
    } else if elem.is("continue", ns::SASL2) {
        Ok(Some(SaslReply::Continue))
    } else {
        Ok(None)
    }
}
