// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Incremental framing of an XML stream into top-level elements.
//!
//! The [`XmlFramer`] is fed arbitrary chunks of bytes and yields
//! [`FramerEvent`]s. The bytes are run through an [`rxml::RawParser`], which
//! treats the whole stream as one document rooted at `<stream:stream>`, and
//! the resulting events are assembled into [`minidom`] elements by a
//! [`TreeBuilder`]. Each direct child of the stream root is handed out as
//! soon as its end tag has been parsed.
//!
//! Chunk boundaries are invisible: the parser keeps partial tokens to itself
//! and reports that it needs more input.

use std::collections::BTreeMap;
use std::io;

use bytes::{Buf, BytesMut};
use minidom::tree_builder::TreeBuilder;
use minidom::Element;
use rxml::{Parse, RawEvent, RawParser};

use crate::error::XmlError;
use crate::proto::ns;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Namespace declarations of the stream root, in scope for every
/// top-level element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceContext {
    default_ns: Option<String>,
    prefixes: BTreeMap<String, String>,
    root_name: String,
}

impl NamespaceContext {
    /// Default namespace declared on the stream root.
    pub fn default_ns(&self) -> Option<&str> {
        self.default_ns.as_deref()
    }

    /// Namespace bound to `prefix` on the stream root.
    pub fn resolve_prefix(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    /// Qualified name of the stream root, e.g. `stream:stream`.
    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    fn declare(&mut self, prefix: Option<&str>, value: String) {
        match prefix {
            None => self.default_ns = Some(value),
            Some(prefix) => {
                self.prefixes.insert(prefix.to_owned(), value);
            }
        }
    }
}

/// The peer's stream header.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOpen {
    /// The header as a childless element.
    pub header: Element,
    /// Namespace declarations for the rest of the stream.
    pub namespaces: NamespaceContext,
}

/// Output of the [`XmlFramer`].
#[derive(Debug, Clone, PartialEq)]
pub enum FramerEvent {
    /// The stream header was received.
    StreamOpen(StreamOpen),
    /// A complete top-level element was received.
    Stanza(Element),
    /// The stream footer was received.
    StreamClose,
}

#[derive(Debug)]
enum State {
    /// Collecting the namespace declarations of the root element header.
    AwaitingHeader(NamespaceContext),
    Open(NamespaceContext),
    Closed,
}

fn is_xml_whitespace(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
}

impl From<rxml::Error> for XmlError {
    fn from(e: rxml::Error) -> Self {
        match e {
            rxml::Error::InvalidUtf8Byte(_) => XmlError::InvalidUtf8,
            rxml::Error::RestrictedXml(what) => XmlError::Forbidden(what),
            other => XmlError::Syntax(other.to_string()),
        }
    }
}

/// Incremental XML stream framer.
///
/// Feed received bytes with [`feed`][`Self::feed`] and drain events with
/// [`next_event`][`Self::next_event`] until it returns `Ok(None)`. After an
/// error, the framer must be [`reset`][`Self::reset`] before reuse.
pub struct XmlFramer {
    buffer: BytesMut,
    parser: RawParser,
    builder: TreeBuilder,
    state: State,
    /// Bytes consumed by the parser since the current top-level element
    /// started.
    element_size: usize,
    max_stanza_size: usize,
}

impl std::fmt::Debug for XmlFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlFramer")
            .field("buffered", &self.buffer.len())
            .field("state", &self.state)
            .field("depth", &self.builder.depth())
            .field("element_size", &self.element_size)
            .field("max_stanza_size", &self.max_stanza_size)
            .finish_non_exhaustive()
    }
}

impl Default for XmlFramer {
    fn default() -> Self {
        Self::new(10 * 1024 * 1024)
    }
}

impl XmlFramer {
    /// Create a framer which rejects top-level elements larger than
    /// `max_stanza_size` bytes.
    pub fn new(max_stanza_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            parser: RawParser::new(),
            builder: TreeBuilder::new(),
            state: State::AwaitingHeader(NamespaceContext::default()),
            element_size: 0,
            max_stanza_size,
        }
    }

    /// Append received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Forget all state, for a stream restart or a new connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.parser = RawParser::new();
        self.builder = TreeBuilder::new();
        self.state = State::AwaitingHeader(NamespaceContext::default());
        self.element_size = 0;
    }

    /// Whether the stream header has been received and the footer has not.
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    /// Whether the stream footer has been received.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Namespace context of the open stream.
    pub fn namespaces(&self) -> Option<&NamespaceContext> {
        match self.state {
            State::Open(ref ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Bytes received but not yet consumed by the parser.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Produce the next event, or `None` if more input is needed.
    pub fn next_event(&mut self) -> Result<Option<FramerEvent>, XmlError> {
        loop {
            if self.is_closed() {
                return Ok(None);
            }
            let Some(event) = self.read_event()? else {
                return Ok(None);
            };
            if let Some(framed) = self.process(event)? {
                return Ok(Some(framed));
            }
        }
    }

    /// Pull one raw event out of the buffer.
    fn read_event(&mut self) -> Result<Option<RawEvent>, XmlError> {
        if matches!(self.state, State::AwaitingHeader(_)) && self.builder.depth() == 0 {
            if self.buffer.starts_with(UTF8_BOM) {
                self.buffer.advance(UTF8_BOM.len());
            } else if !self.buffer.is_empty() && UTF8_BOM.starts_with(&self.buffer) {
                return Ok(None);
            }
        }
        let mut input = &self.buffer[..];
        let result = self.parser.parse(&mut input, false);
        let consumed = self.buffer.len() - input.len();
        self.buffer.advance(consumed);
        if self.builder.depth() > 1 {
            self.element_size += consumed;
            if self.element_size > self.max_stanza_size {
                return Err(XmlError::StanzaTooLarge {
                    limit: self.max_stanza_size,
                });
            }
        }
        match result {
            Ok(Some(event)) => Ok(Some(event)),
            // The document only ends with the stream footer, which is
            // handled before the parser gets to see it.
            Ok(None) => Err(XmlError::Syntax("unexpected end of stream".to_owned())),
            Err(rxml::Error::IO(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn process(&mut self, event: RawEvent) -> Result<Option<FramerEvent>, XmlError> {
        let depth = self.builder.depth();
        match event {
            RawEvent::XmlDeclaration(..) => Ok(None),
            RawEvent::ElementHeadOpen(_, (ref prefix, ref name)) if depth == 0 => {
                if let State::AwaitingHeader(ref mut ctx) = self.state {
                    ctx.root_name = match prefix {
                        Some(prefix) => format!("{}:{}", prefix.as_str(), name.as_str()),
                        None => name.as_str().to_owned(),
                    };
                }
                self.builder.process_event(event)?;
                Ok(None)
            }
            RawEvent::ElementHeadOpen(..) => {
                if depth == 1 {
                    self.element_size = 0;
                }
                self.builder.process_event(event)?;
                Ok(None)
            }
            RawEvent::Attribute(_, (ref prefix, ref name), ref value) if depth == 0 => {
                if let State::AwaitingHeader(ref mut ctx) = self.state {
                    match prefix {
                        None if name.as_str() == "xmlns" => ctx.declare(None, value.to_string()),
                        Some(xmlns) if xmlns.as_str() == "xmlns" => {
                            ctx.declare(Some(name.as_str()), value.to_string())
                        }
                        _ => (),
                    }
                }
                self.builder.process_event(event)?;
                Ok(None)
            }
            RawEvent::ElementHeadClose(_) if depth == 0 => {
                self.builder.process_event(event)?;
                self.open_stream().map(Some)
            }
            RawEvent::ElementFoot(_) if depth == 1 => {
                log::trace!("RECV </{}>", self.root_name());
                self.state = State::Closed;
                Ok(Some(FramerEvent::StreamClose))
            }
            RawEvent::ElementFoot(_) if depth == 2 => {
                self.builder.process_event(event)?;
                let stanza = self.builder.unshift_child().ok_or_else(|| {
                    XmlError::Syntax("top-level element went missing".to_owned())
                })?;
                self.element_size = 0;
                Ok(Some(FramerEvent::Stanza(stanza)))
            }
            RawEvent::Text(_, ref text) if depth == 1 => {
                if is_xml_whitespace(text.as_str()) {
                    Ok(None)
                } else {
                    Err(XmlError::UnexpectedText)
                }
            }
            other => {
                self.builder.process_event(other)?;
                Ok(None)
            }
        }
    }

    fn open_stream(&mut self) -> Result<FramerEvent, XmlError> {
        let header = self
            .builder
            .top()
            .cloned()
            .ok_or_else(|| XmlError::Syntax("stream header went missing".to_owned()))?;
        if !header.is("stream", ns::STREAM) {
            return Err(XmlError::NotAStream);
        }
        let namespaces = match std::mem::replace(&mut self.state, State::Closed) {
            State::AwaitingHeader(ctx) => ctx,
            _ => return Err(XmlError::Syntax("duplicate stream header".to_owned())),
        };
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("RECV {}", String::from(&header));
        }
        self.state = State::Open(namespaces.clone());
        Ok(FramerEvent::StreamOpen(StreamOpen { header, namespaces }))
    }

    fn root_name(&self) -> &str {
        match self.state {
            State::AwaitingHeader(ref ctx) | State::Open(ref ctx) => ctx.root_name(),
            State::Closed => "",
        }
    }
}
