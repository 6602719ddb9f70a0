// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::BTreeMap;

use bytes::Bytes;
use minidom::Element;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::Instant;
use xmpp_parsers::{jid::Jid, stanza_error::StanzaError};

use super::stream_management::StanzaSink;
use crate::error::{Error, ProtocolError, RequestError};
use crate::event::make_id;
use crate::proto::{ns, stanza};

type RequestResult = Result<Element, RequestError>;

struct ResponseSink {
    inner: oneshot::Sender<RequestResult>,
}

impl ResponseSink {
    fn complete(self, result: RequestResult) {
        // The handle may have been dropped, nobody is interested then.
        let _: Result<_, _> = self.inner.send(result);
    }
}

struct PendingRequest {
    to: Option<String>,
    deadline: Option<Instant>,
    sink: ResponseSink,
}

pin_project_lite::pin_project! {
    /// Handle for awaiting the response to a request.
    ///
    /// The `RequestHandle` can be awaited and will generate a result once
    /// the response has been received, the request timed out or the session
    /// ended. An `Ok(_)` result is the `type="result"` response itself.
    ///
    /// Dropping a `RequestHandle` does not cancel the request; the response
    /// is discarded when it arrives.
    pub struct RequestHandle {
        id: String,
        #[pin]
        inner: oneshot::Receiver<RequestResult>,
    }
}

impl RequestHandle {
    /// Id of the request.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take the result without waiting, if it is available.
    ///
    /// Returns `None` while the request is pending. The result can only be
    /// taken once.
    pub fn try_result(&mut self) -> Option<RequestResult> {
        match self.inner.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(RequestError::Cancelled(Error::Disconnected))),
        }
    }
}

impl Future for RequestHandle {
    type Output = RequestResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(v)) => Poll::Ready(v),
            Poll::Ready(Err(_)) => {
                log::warn!("RequestHandle oneshot::Receiver returned receive error!");
                Poll::Ready(Err(RequestError::Cancelled(Error::Disconnected)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Tracks IQ requests until their response arrives.
///
/// Every request is completed exactly once: by its response, by its
/// deadline passing, or by [`cancel_all`][`Self::cancel_all`].
#[derive(Default)]
pub struct OutgoingRequestManager {
    requests: BTreeMap<String, PendingRequest>,
    /// JIDs responses from which count as coming from our own account.
    local_identities: Vec<String>,
}

impl OutgoingRequestManager {
    /// Create a new empty request manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests awaiting a response.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether no request is pending.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Whether the request with `id` is still pending.
    pub fn is_pending(&self, id: &str) -> bool {
        self.requests.contains_key(id)
    }

    /// Remember the bound JID.
    ///
    /// Responses to requests sent without `to` must come from the server on
    /// behalf of the account: without `from`, or from the account's bare
    /// JID, full JID or domain.
    pub fn set_local_jid(&mut self, jid: &Jid) {
        self.local_identities = vec![
            jid.to_string(),
            jid.to_bare().to_string(),
            jid.domain().as_str().to_owned(),
        ];
    }

    fn generate_id(&self) -> String {
        loop {
            let id = make_id();
            if !self.requests.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register and transmit an IQ request.
    ///
    /// A missing or empty `id` is replaced by a fresh unique one. A request
    /// whose `id` is already pending is rejected without being sent.
    pub fn send(
        &mut self,
        mut request: Element,
        deadline: Option<Instant>,
        sink: &mut StanzaSink<'_>,
    ) -> Result<RequestHandle, Error> {
        if !stanza::is_iq_request(&request) {
            return Err(ProtocolError::InvalidRequest(format!(
                "<{}/> is not an IQ get or set",
                request.name()
            ))
            .into());
        }
        if !sink.is_open() {
            return Err(Error::Disconnected);
        }
        let id = match request.attr("id") {
            Some(id) if !id.is_empty() => {
                if self.requests.contains_key(id) {
                    return Err(Error::DuplicateRequestId(id.to_owned()));
                }
                id.to_owned()
            }
            _ => {
                let id = self.generate_id();
                request.set_attr("id", id.as_str());
                id
            }
        };
        let (tx, rx) = oneshot::channel();
        self.requests.insert(
            id.clone(),
            PendingRequest {
                to: request.attr("to").map(str::to_owned),
                deadline,
                sink: ResponseSink { inner: tx },
            },
        );
        sink.send(Bytes::from(String::from(&request)));
        Ok(RequestHandle { id, inner: rx })
    }

    fn origin_matches(&self, to: Option<&str>, from: Option<&str>) -> bool {
        match (to, from) {
            (Some(to), Some(from)) => to == from,
            (None, None) => true,
            (Some(addr), None) | (None, Some(addr)) => {
                self.local_identities.is_empty()
                    || self.local_identities.iter().any(|local| local == addr)
            }
        }
    }

    /// Attempt to handle a stanza as response to a pending request.
    ///
    /// Returns `true` if the stanza was consumed.
    pub fn handle_response(&mut self, elem: &Element) -> bool {
        let is_error = match stanza::iq_type(elem) {
            Some("result") => false,
            Some("error") => true,
            _ => return false,
        };
        let Some(id) = elem.attr("id") else {
            return false;
        };
        let Some(pending) = self.requests.get(id) else {
            log::trace!("not handling IQ response with id {:?}: no such request", id);
            return false;
        };
        if !self.origin_matches(pending.to.as_deref(), elem.attr("from")) {
            log::warn!(
                "ignoring IQ response with id {:?} from {:?}: request was sent to {:?}",
                id,
                elem.attr("from"),
                pending.to
            );
            return false;
        }
        let Some(pending) = self.requests.remove(id) else {
            return false;
        };
        let result = if is_error {
            Err(parse_error(elem))
        } else {
            Ok(elem.clone())
        };
        pending.sink.complete(result);
        true
    }

    /// Fail every pending request with `reason`.
    pub fn cancel_all(&mut self, reason: &Error) {
        if self.requests.is_empty() {
            return;
        }
        log::debug!("cancelling {} pending requests: {}", self.requests.len(), reason);
        for (_, pending) in core::mem::take(&mut self.requests) {
            pending
                .sink
                .complete(Err(RequestError::Cancelled(reason.clone())));
        }
    }

    /// Fail every request whose deadline is at or before `now`.
    ///
    /// Returns the ids of the expired requests.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .requests
            .iter()
            .filter(|(_, pending)| pending.deadline.map_or(false, |deadline| deadline <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired.iter() {
            if let Some(pending) = self.requests.remove(id) {
                log::debug!("request {:?} timed out", id);
                pending.sink.complete(Err(RequestError::Timeout));
            }
        }
        expired
    }

    /// Earliest deadline of any pending request.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.requests
            .values()
            .filter_map(|pending| pending.deadline)
            .min()
    }
}

fn parse_error(elem: &Element) -> RequestError {
    match elem.get_child("error", ns::JABBER_CLIENT) {
        Some(error) => match StanzaError::try_from(error.clone()) {
            Ok(error) => RequestError::Stanza(error),
            Err(e) => RequestError::MalformedResponse(e.to_string()),
        },
        None => RequestError::MalformedResponse("error response without <error/>".to_owned()),
    }
}
