// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # RFC 6120 XML Streams
//!
//! **Note:** The XML stream is a low-level API which you should probably not
//! use directly.
//!
//! An XMPP stream is a single, never-ending XML document. The
//! [`XmlFramer`] turns the bytes of the receiving half into a sequence of
//! [`FramerEvent`]s: the stream header, complete top-level elements and the
//! stream footer. The sending half is produced directly:
//! [`StreamHeader::to_xml`] opens a stream, elements are serialised one by
//! one and [`STREAM_FOOTER`] closes it.
//!
//! Every stream restart (after TLS and after SASL) begins a new document, so
//! the framer must be [`reset`][`XmlFramer::reset`] at that point.

mod framer;
mod header;
#[cfg(test)]
mod tests;

pub use self::framer::{FramerEvent, NamespaceContext, StreamOpen, XmlFramer};
pub use self::header::{StreamHeader, STREAM_FOOTER};
