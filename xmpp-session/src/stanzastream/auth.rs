// Copyright (c) 2026 The xmpp-session authors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use sasl::client::mechanisms::{Anonymous, Plain, Scram};
use sasl::client::Mechanism;
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::{ChannelBinding, Credentials};

use crate::config::{SaslMechanism, SessionConfig};
use crate::error::AuthError;

/// Inline requests sent along with a XEP-0388 `<authenticate/>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct InlineRequests {
    /// `<resume/>` was included.
    pub resume: bool,
    /// A Bind 2 `<bind/>` was included.
    pub bind: bool,
    /// The Bind 2 request asked for stream management.
    pub enable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SaslVersion {
    /// RFC 6120: success requires a stream restart.
    Sasl1,
    /// XEP-0388: success continues on the same stream.
    Sasl2(InlineRequests),
}

/// A SASL exchange in progress.
pub(super) struct SaslExchange {
    pub mechanism: Box<dyn Mechanism + Send>,
    pub version: SaslVersion,
}

fn sasl_error<E: core::fmt::Display>(e: E) -> AuthError {
    AuthError::Sasl(e.to_string())
}

/// Pick the first configured mechanism the peer offers.
///
/// ANONYMOUS is only considered for JIDs without a local part, everything
/// else only for JIDs with one.
pub(super) fn select_mechanism(
    config: &SessionConfig,
    offered: &[String],
    channel_binding: ChannelBinding,
) -> Result<Box<dyn Mechanism + Send>, AuthError> {
    let node = config.jid.node().map(|node| node.as_str().to_owned());
    for choice in config.mechanisms.iter() {
        let mechanism: Box<dyn Mechanism + Send> = match (choice, &node) {
            (SaslMechanism::Anonymous, None) => Box::new(Anonymous::new()),
            (SaslMechanism::Anonymous, Some(_)) | (_, None) => continue,
            (choice, Some(node)) => {
                let creds = Credentials::default()
                    .with_username(node.clone())
                    .with_password(config.password.clone())
                    .with_channel_binding(channel_binding.clone());
                match choice {
                    SaslMechanism::ScramSha256 => {
                        Box::new(Scram::<Sha256>::from_credentials(creds).map_err(sasl_error)?)
                    }
                    SaslMechanism::ScramSha1 => {
                        Box::new(Scram::<Sha1>::from_credentials(creds).map_err(sasl_error)?)
                    }
                    SaslMechanism::Plain => {
                        Box::new(Plain::from_credentials(creds).map_err(sasl_error)?)
                    }
                    SaslMechanism::Anonymous => continue,
                }
            }
        };
        if offered.iter().any(|name| name == mechanism.name()) {
            log::debug!("selected SASL mechanism {}", mechanism.name());
            return Ok(mechanism);
        }
    }
    log::debug!("no usable SASL mechanism among {:?}", offered);
    Err(AuthError::NoMechanism)
}
