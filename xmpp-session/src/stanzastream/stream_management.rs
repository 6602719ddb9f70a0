// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::fmt;
use core::time::Duration;
use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::proto::sm;
use crate::transport::Transport;

/// Information needed to resume a XEP-0198 session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumptionToken {
    /// XEP-0198 stream ID
    pub id: String,

    /// Preferred IP and port for resumption as indicated by the peer.
    pub location: Option<String>,

    /// Maximum resumption time announced by the peer.
    pub max: Option<Duration>,
}

impl ResumptionToken {
    /// Extract the resumption information from `<enabled/>`.
    pub fn from_enabled(enabled: &sm::Enabled) -> Option<Self> {
        if enabled.resume != sm::ResumeAttr::True {
            return None;
        }
        match enabled.id {
            Some(ref id) => Some(Self {
                id: id.0.clone(),
                location: enabled.location.clone(),
                max: enabled.max.map(|max| Duration::new(max.into(), 0)),
            }),
            None => {
                log::warn!("peer replied with <enable resume='true'/>, but without an ID! cannot make this stream resumable.");
                None
            }
        }
    }
}

/// RFC 1982 comparison: whether `a` is at or before `b`.
fn serial_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= u32::MAX / 2
}

/// XEP-0198 acknowledgement bookkeeping.
///
/// While enabled, every counted outgoing stanza gets the next sequence
/// number and stays in a retransmission buffer until the peer acknowledges
/// it. Received stanzas are counted so that `<r/>` can be answered and the
/// session resumed.
///
/// All counters are mod 2^32.
pub struct StreamAckManager {
    enabled: bool,

    /// Sequence number of the most recently sent stanza.
    last_outgoing: u32,

    /// Counter for received stanzas
    inbound_ctr: u32,

    /// Unacked stanzas in the order they were sent
    // We use a VecDeque here because that has better performance
    // characteristics with the ringbuffer-type usage we're seeing here:
    // we push stuff to the back, and then drain it from the front.
    unacked_stanzas: VecDeque<(u32, Bytes)>,
}

impl fmt::Debug for StreamAckManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StreamAckManager")
            .field("enabled", &self.enabled)
            .field("last_outgoing", &self.last_outgoing)
            .field("inbound_ctr", &self.inbound_ctr)
            .field("len(unacked_stanzas)", &self.unacked_stanzas.len())
            .finish()
    }
}

impl Default for StreamAckManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAckManager {
    /// A disabled manager with zeroed counters.
    pub fn new() -> Self {
        Self {
            enabled: false,
            last_outgoing: 0,
            inbound_ctr: 0,
            unacked_stanzas: VecDeque::new(),
        }
    }

    /// Whether stream management is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get the current inbound counter.
    #[inline(always)]
    pub fn inbound_ctr(&self) -> u32 {
        self.inbound_ctr
    }

    /// Sequence number of the most recently sent stanza.
    pub fn last_outgoing(&self) -> u32 {
        self.last_outgoing
    }

    /// Number of stanzas awaiting acknowledgement.
    pub fn unacked_len(&self) -> usize {
        self.unacked_stanzas.len()
    }

    /// Sequence numbers awaiting acknowledgement, oldest first.
    pub fn unacked_sequence_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.unacked_stanzas.iter().map(|(seq, _)| *seq)
    }

    /// Activate stream management.
    ///
    /// With `reset_sequence_numbers`, this is a fresh XEP-0198 session: the
    /// counters restart at zero and everything still buffered from a
    /// previous session is renumbered and retransmitted, each followed by
    /// `<r/>`. Without it, this completes a resumption: the buffer (already
    /// pruned by the peer's `h`) is retransmitted with its numbering intact,
    /// followed by a single `<r/>`.
    pub fn enable(&mut self, reset_sequence_numbers: bool, transport: &mut dyn Transport) {
        self.enabled = true;
        if reset_sequence_numbers {
            self.last_outgoing = 0;
            self.inbound_ctr = 0;
            let buffered = core::mem::take(&mut self.unacked_stanzas);
            if !buffered.is_empty() {
                log::debug!(
                    "retransmitting {} stanzas from the previous session",
                    buffered.len()
                );
            }
            for (_, data) in buffered {
                self.last_outgoing = self.last_outgoing.wrapping_add(1);
                self.unacked_stanzas
                    .push_back((self.last_outgoing, data.clone()));
                transport.send_data(&data);
                self.request_ack(transport);
            }
        } else if !self.unacked_stanzas.is_empty() {
            log::debug!(
                "retransmitting {} stanzas after resumption",
                self.unacked_stanzas.len()
            );
            for (_, data) in self.unacked_stanzas.iter() {
                transport.send_data(data);
            }
            self.request_ack(transport);
        }
    }

    /// Deactivate stream management and drop the retransmission buffer.
    pub fn disable(&mut self) {
        if !self.unacked_stanzas.is_empty() {
            log::warn!(
                "discarding {} unacknowledged stanzas",
                self.unacked_stanzas.len()
            );
        }
        self.enabled = false;
        self.unacked_stanzas.clear();
        self.last_outgoing = 0;
        self.inbound_ctr = 0;
    }

    /// Mark a stanza as sent and keep it in the stream management queue,
    /// without transmitting it.
    ///
    /// Used while the session is suspended: the stanza goes out with the
    /// retransmission after resumption.
    pub fn enqueue(&mut self, data: Bytes) -> u32 {
        debug_assert!(self.enabled);
        self.last_outgoing = self.last_outgoing.wrapping_add(1);
        self.unacked_stanzas.push_back((self.last_outgoing, data));
        log::trace!(
            "Stored stanza {}. We are now at {} unacked stanzas.",
            self.last_outgoing,
            self.unacked_stanzas.len()
        );
        self.last_outgoing
    }

    /// Transmit a counted stanza.
    ///
    /// When enabled, the stanza is buffered under the next sequence number
    /// and followed by `<r/>`. Returns whether the transport accepted the
    /// stanza.
    pub fn send_stanza(&mut self, data: Bytes, transport: &mut dyn Transport) -> bool {
        if !self.enabled {
            return transport.send_data(&data);
        }
        self.enqueue(data.clone());
        let sent = transport.send_data(&data);
        self.request_ack(transport);
        sent
    }

    /// Send `<r/>`.
    pub fn request_ack(&self, transport: &mut dyn Transport) -> bool {
        transport.send_data(String::from(&sm::request()).as_bytes())
    }

    /// Process remote `<a/>`.
    ///
    /// Drops every buffered stanza up to and including `h`. Acks for
    /// stanzas that were already dropped are ignored, but acking stanzas
    /// that were never sent is a protocol violation.
    pub fn handle_ack(&mut self, h: u32) -> Result<(), ProtocolError> {
        if !self.enabled {
            return Ok(());
        }
        log::trace!("handle_ack: {self:?}::handle_ack({h})");
        if !serial_le(h, self.last_outgoing) {
            return Err(ProtocolError::HandledCountTooHigh {
                h,
                send_count: self.last_outgoing,
            });
        }
        let before = self.unacked_stanzas.len();
        while let Some(&(seq, _)) = self.unacked_stanzas.front() {
            if !serial_le(seq, h) {
                break;
            }
            self.unacked_stanzas.pop_front();
        }
        let dropped = before - self.unacked_stanzas.len();
        if dropped > 0 {
            log::debug!("handle_ack: remote acked {dropped} stanzas");
        }
        Ok(())
    }

    /// Process remote `<r/>`: answer with the inbound counter.
    pub fn handle_ack_request(&self, transport: &mut dyn Transport) -> bool {
        if !self.enabled {
            return false;
        }
        transport.send_data(String::from(&sm::ack(self.inbound_ctr)).as_bytes())
    }

    /// Count a received stanza.
    pub fn handle_incoming_stanza(&mut self) {
        if self.enabled {
            self.inbound_ctr = self.inbound_ctr.wrapping_add(1);
        }
    }
}

/// How counted stanzas reach the peer in the current session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// The session is active: transmit now.
    Transmit,
    /// The session is suspended but resumable: buffer for retransmission.
    Enqueue,
    /// There is no session to send on.
    Refuse,
}

/// Outlet for counted stanzas, routing them through the
/// [`StreamAckManager`].
pub struct StanzaSink<'a> {
    acks: &'a mut StreamAckManager,
    transport: &'a mut dyn Transport,
    mode: SendMode,
}

impl<'a> StanzaSink<'a> {
    /// A sink which transmits immediately.
    pub fn new(acks: &'a mut StreamAckManager, transport: &'a mut dyn Transport) -> Self {
        Self::with_mode(acks, transport, SendMode::Transmit)
    }

    pub(crate) fn with_mode(
        acks: &'a mut StreamAckManager,
        transport: &'a mut dyn Transport,
        mode: SendMode,
    ) -> Self {
        Self {
            acks,
            transport,
            mode,
        }
    }

    /// Whether stanzas are accepted at all.
    pub fn is_open(&self) -> bool {
        self.mode != SendMode::Refuse
    }

    /// Send serialised stanza `data`.
    ///
    /// Returns whether the stanza was transmitted or buffered for
    /// retransmission.
    pub fn send(&mut self, data: Bytes) -> bool {
        match self.mode {
            SendMode::Transmit => {
                if let Ok(text) = core::str::from_utf8(&data) {
                    log::trace!("SEND {}", text);
                }
                self.acks.send_stanza(data, self.transport)
            }
            SendMode::Enqueue => {
                log::debug!("session suspended, buffering stanza for retransmission");
                self.acks.enqueue(data);
                true
            }
            SendMode::Refuse => false,
        }
    }

    /// Send serialised `data` which is not counted by stream management.
    ///
    /// Nonzas are tied to the live stream, so they are never buffered.
    pub fn send_nonza(&mut self, data: Bytes) -> bool {
        match self.mode {
            SendMode::Transmit => self.transport.send_data(&data),
            SendMode::Enqueue | SendMode::Refuse => false,
        }
    }
}
