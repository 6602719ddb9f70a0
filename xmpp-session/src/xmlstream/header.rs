// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::error::ProtocolError;
use crate::proto::ns;

use super::framer::StreamOpen;

/// Closing tag of the stream, sent on orderly shutdown.
pub const STREAM_FOOTER: &str = "</stream:stream>";

fn escape_attr(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '\'', '"']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Contains metadata from an XML stream header
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamHeader<'x> {
    /// The optional `from` attribute.
    pub from: Option<Cow<'x, str>>,

    /// The optional `to` attribute.
    pub to: Option<Cow<'x, str>>,

    /// The optional `id` attribute.
    pub id: Option<Cow<'x, str>>,

    /// The optional `xml:lang` attribute.
    pub lang: Option<Cow<'x, str>>,
}

impl<'x> StreamHeader<'x> {
    /// Header for a client stream to `domain`.
    pub fn to_domain(domain: &'x str) -> Self {
        Self {
            to: Some(Cow::Borrowed(domain)),
            ..Default::default()
        }
    }

    /// Take the contents and return them as new object.
    ///
    /// `self` will be left with all its parts set to `None`.
    pub fn take(&mut self) -> Self {
        Self {
            from: self.from.take(),
            to: self.to.take(),
            id: self.id.take(),
            lang: self.lang.take(),
        }
    }

    /// Serialise the XML declaration and the opening stream tag with
    /// `stream_ns` as default namespace.
    pub fn to_xml(&self, stream_ns: &str) -> String {
        let mut xml = String::from("<?xml version='1.0'?><stream:stream");
        // Writing into a String cannot fail.
        let _ = write!(
            xml,
            " xmlns='{}' xmlns:stream='{}' version='1.0'",
            escape_attr(stream_ns),
            ns::STREAM
        );
        for (name, value) in [
            ("from", &self.from),
            ("to", &self.to),
            ("id", &self.id),
            ("xml:lang", &self.lang),
        ] {
            if let Some(value) = value {
                let _ = write!(xml, " {}='{}'", name, escape_attr(value));
            }
        }
        xml.push('>');
        xml
    }
}

impl StreamHeader<'static> {
    /// Validate the peer's stream header.
    ///
    /// The header must declare `stream_ns` as default namespace and
    /// version 1.0.
    pub fn from_stream_open(open: &StreamOpen, stream_ns: &str) -> Result<Self, ProtocolError> {
        let header = &open.header;
        match header.attr("version") {
            Some("1.0") => (),
            Some(v) => {
                return Err(ProtocolError::InvalidStreamHeader(format!(
                    "unsupported stream version: {}",
                    v
                )))
            }
            None => {
                return Err(ProtocolError::InvalidStreamHeader(
                    "required `version` attribute missing".to_owned(),
                ))
            }
        }
        if open.namespaces.default_ns() != Some(stream_ns) {
            return Err(ProtocolError::InvalidStreamHeader(format!(
                "unexpected default namespace {:?}",
                open.namespaces.default_ns()
            )));
        }
        let attr = |name: &str| header.attr(name).map(|v| Cow::Owned(v.to_owned()));
        Ok(StreamHeader {
            from: attr("from"),
            to: attr("to"),
            id: attr("id"),
            lang: attr("xml:lang"),
        })
    }
}
