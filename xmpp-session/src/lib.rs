//! Client-side [XMPP](https://xmpp.org/) session engine with a driver for [tokio](https://tokio.rs/).
//!
//! # Getting started
//!
//! The heart of the crate is the [`SessionNegotiator`][`stanzastream::SessionNegotiator`],
//! a sans-I/O state machine which turns bytes received from the server into
//! [`Event`]s and queues bytes to send on a [`transport::Transport`]. It
//! negotiates STARTTLS, SASL (or SASL2 with Bind 2), resource binding and
//! XEP-0198 stream management, and keeps the session alive.
//!
//! Most applications want the [`Client`] instead, which runs the negotiator
//! in a tokio task on top of a TCP connection and yields its events as a
//! `futures::Stream`.
//!
//! # Features
//!
//! - [x] RFC 6120 stream negotiation: STARTTLS, SASL, resource binding
//! - [x] XEP-0198 stream management with acknowledgements and resumption
//! - [x] XEP-0388 SASL2 with inline resumption or XEP-0386 Bind 2
//! - [x] IQ request tracking with per-request deadlines
//! - [x] XEP-0199 keepalive pings
//! - [x] Custom connectors via the [`connect::ServerConnector`] trait
//! - [ ] SRV resolution
//! - [ ] Automatic reconnection

#![deny(unsafe_code, missing_docs, bare_trait_objects)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod config;
pub mod connect;
pub mod extension;
pub mod proto;
pub mod stanzastream;
pub mod transport;
pub mod xmlstream;

mod event;
pub use event::{Event, SessionInfo};

mod client;
pub use client::{Client, ClientHandle};

/// Detailed error types
pub mod error;

#[doc(inline)]
/// Generic session error
pub use crate::error::Error;

pub use config::SessionConfig;
pub use stanzastream::{RequestHandle, SessionNegotiator};

// Re-exports
pub use minidom;
pub use xmpp_parsers as parsers;
pub use xmpp_parsers::jid;
