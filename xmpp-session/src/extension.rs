//! Pluggable handlers for incoming stanzas.
//!
//! Extensions are offered every stanza which is not a response to one of
//! our own requests, in registration order, until one claims it.

use bytes::Bytes;
use minidom::Element;
use tokio::time::Instant;

use crate::error::Error;
use crate::event::SessionInfo;
use crate::proto::stanza::StanzaKind;
use crate::stanzastream::{OutgoingRequestManager, RequestHandle, StanzaSink};

/// Outgoing side of the session as seen by an [`Extension`].
pub struct Outbound<'a> {
    sink: StanzaSink<'a>,
    requests: &'a mut OutgoingRequestManager,
    default_deadline: Option<Instant>,
}

impl<'a> Outbound<'a> {
    pub(crate) fn new(
        sink: StanzaSink<'a>,
        requests: &'a mut OutgoingRequestManager,
        default_deadline: Option<Instant>,
    ) -> Self {
        Self {
            sink,
            requests,
            default_deadline,
        }
    }

    /// Send a stanza or nonza.
    ///
    /// Messages, presences and IQs are subject to stream management. Returns
    /// whether the element was sent or, on a suspended session, buffered for
    /// retransmission.
    pub fn send_stanza(&mut self, stanza: Element) -> bool {
        let data = Bytes::from(String::from(&stanza));
        if StanzaKind::of(&stanza).is_some() {
            self.sink.send(data)
        } else {
            self.sink.send_nonza(data)
        }
    }

    /// Send an IQ request with the session's default deadline.
    pub fn send_request(&mut self, request: Element) -> Result<RequestHandle, Error> {
        self.requests
            .send(request, self.default_deadline, &mut self.sink)
    }

    /// Send an IQ request with an explicit deadline (`None` for none).
    pub fn send_request_with_deadline(
        &mut self,
        request: Element,
        deadline: Option<Instant>,
    ) -> Result<RequestHandle, Error> {
        self.requests.send(request, deadline, &mut self.sink)
    }
}

/// A collaborator which consumes incoming stanzas and follows the session
/// lifecycle.
pub trait Extension: Send {
    /// Offer a received stanza. Return `true` to consume it.
    fn handle_stanza(&mut self, stanza: &Element, outbound: &mut Outbound<'_>) -> bool;

    /// The session became active.
    fn on_session_begin(&mut self, info: &SessionInfo, outbound: &mut Outbound<'_>) {
        let _ = (info, outbound);
    }

    /// The session ended. With `can_resume`, it may still be resumed and
    /// state tied to it should be kept.
    fn on_session_end(&mut self, can_resume: bool) {
        let _ = can_resume;
    }
}
