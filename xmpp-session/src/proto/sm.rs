//! XEP-0198 stream management nonzas.
//!
//! The elements themselves are [`xmpp_parsers::sm`] types; this module
//! classifies received elements and builds the ones the negotiator sends.

use minidom::Element;
pub use xmpp_parsers::sm::{Enabled, Failed, ResumeAttr, Resumed, StreamId, A, R};
use xmpp_parsers::sm::{Enable, Resume};

use super::ns;
use crate::error::ProtocolError;

/// `<a h='…'/>`
pub fn ack(h: u32) -> Element {
    A::new(h).into()
}

/// `<r/>`
pub fn request() -> Element {
    R.into()
}

/// `<enable/>`, optionally asking for a resumable session.
pub fn enable(resume: bool, max: Option<u32>) -> Element {
    let mut enable = Enable::new();
    if resume {
        enable = enable.with_resume();
        if let Some(max) = max {
            enable = enable.with_max(max);
        }
    }
    enable.into()
}

/// `<resume previd='…' h='…'/>`
pub fn resume(previd: &str, h: u32) -> Element {
    Resume {
        h,
        previd: StreamId(previd.to_owned()),
    }
    .into()
}

/// A stream management nonza received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum SmNonza {
    /// `<a h/>`
    Ack(A),
    /// `<r/>`
    Request(R),
    /// `<enabled/>`
    Enabled(Enabled),
    /// `<resumed/>`
    Resumed(Resumed),
    /// `<failed/>`
    Failed(Failed),
}

/// Classify a stream management nonza. Returns `None` for anything else.
pub fn parse(elem: &Element) -> Result<Option<SmNonza>, ProtocolError> {
    if elem.ns() != ns::SM {
        return Ok(None);
    }
    let nonza = match elem.name() {
        "a" => SmNonza::Ack(A::try_from(elem.clone())?),
        "r" => SmNonza::Request(R::try_from(elem.clone())?),
        "enabled" => SmNonza::Enabled(Enabled::try_from(elem.clone())?),
        "resumed" => SmNonza::Resumed(Resumed::try_from(elem.clone())?),
        "failed" => SmNonza::Failed(Failed::try_from(elem.clone())?),
        _ => return Ok(None),
    };
    Ok(Some(nonza))
}

/// XEP-0198 `<handled-count-too-high/>` application condition.
pub fn handled_count_too_high(h: u32, send_count: u32) -> Element {
    Element::builder("handled-count-too-high", ns::SM)
        .attr("h", h.to_string())
        .attr("send-count", send_count.to_string())
        .build()
}
