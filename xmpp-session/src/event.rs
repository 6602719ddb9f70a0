// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use minidom::Element;
use rand::{thread_rng, Rng};
use xmpp_parsers::jid::Jid;

use crate::Error;

pub(crate) fn make_id() -> String {
    let id: u64 = thread_rng().gen();
    format!("{}", id)
}

/// Facts about a session which just became active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// The JID the session is bound to.
    pub bound_jid: Option<Jid>,
    /// The session continues a previous one via XEP-0198 resumption.
    pub resumed: bool,
    /// XEP-0198 stream management is active.
    pub stream_management: bool,
    /// The resource was bound as part of a XEP-0388 authentication.
    pub inline_bind: bool,
}

/// High-level event on the session.
#[derive(Debug)]
pub enum Event {
    /// The session is ready for stanzas.
    Online(SessionInfo),
    /// The session ended.
    Disconnected {
        /// Cause, or `None` for an orderly shutdown.
        error: Option<Error>,
        /// The session may be resumed by reconnecting before the
        /// resumption grace period runs out.
        can_resume: bool,
    },
    /// A stanza which nothing else consumed.
    Stanza(Element),
}

impl Event {
    /// `Online` event?
    pub fn is_online(&self) -> bool {
        matches!(self, Event::Online(_))
    }

    /// Get the stanza of a `Stanza` event.
    pub fn as_stanza(&self) -> Option<&Element> {
        match self {
            Event::Stanza(stanza) => Some(stanza),
            _ => None,
        }
    }

    /// If this is a `Stanza` event, unwrap into its data
    pub fn into_stanza(self) -> Option<Element> {
        match self {
            Event::Stanza(stanza) => Some(stanza),
            _ => None,
        }
    }
}
