//! Session configuration.

use core::fmt;
use core::time::Duration;

use uuid::Uuid;
use xmpp_parsers::jid::{BareJid, Jid};

/// Policy for STARTTLS negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamSecurityMode {
    /// Use TLS if the peer offers it and the transport can do it.
    #[default]
    TlsEnabled,
    /// Never start TLS.
    TlsDisabled,
    /// Abort unless TLS can be negotiated.
    TlsRequired,
}

/// Locally supported SASL mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    /// SCRAM-SHA-256 (RFC 7677)
    ScramSha256,
    /// SCRAM-SHA-1 (RFC 5802)
    ScramSha1,
    /// PLAIN (RFC 4616)
    Plain,
    /// ANONYMOUS (RFC 4505); only used for JIDs without a local part
    Anonymous,
}

/// XEP-0388 user agent description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentInfo {
    /// Stable identifier of this installation.
    pub id: Uuid,
    /// Name of the client software.
    pub software: Option<String>,
    /// Name of the device.
    pub device: Option<String>,
}

impl Default for UserAgentInfo {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            software: Some(env!("CARGO_PKG_NAME").to_owned()),
            device: None,
        }
    }
}

/// Configuration for timeouts on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time a single negotiation step may take.
    pub negotiation: Duration,

    /// Deadline for requests submitted without an explicit deadline.
    ///
    /// `None` lets such requests wait until the session ends.
    pub request: Option<Duration>,

    /// Idle time after which a ping is sent to the server.
    ///
    /// `None` disables keepalive pings.
    pub keepalive_interval: Option<Duration>,

    /// Time the server gets to answer a keepalive ping.
    pub keepalive_timeout: Duration,

    /// Time the peer gets to close its stream after we closed ours.
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            negotiation: Duration::new(30, 0),
            request: Some(Duration::new(120, 0)),
            keepalive_interval: Some(Duration::new(300, 0)),
            keepalive_timeout: Duration::new(30, 0),
            shutdown: Duration::new(10, 0),
        }
    }
}

impl Timeouts {
    /// Tight timeouts suitable for communicating on a fast LAN or localhost.
    pub fn tight() -> Self {
        Self {
            negotiation: Duration::new(5, 0),
            request: Some(Duration::new(10, 0)),
            keepalive_interval: Some(Duration::new(60, 0)),
            keepalive_timeout: Duration::new(5, 0),
            shutdown: Duration::new(2, 0),
        }
    }
}

/// Everything a [`SessionNegotiator`][`crate::stanzastream::SessionNegotiator`]
/// needs to know to log in.
#[derive(Clone)]
pub struct SessionConfig {
    /// Account JID. A resource, if present, is requested when binding.
    pub jid: Jid,
    /// Account password.
    pub password: String,
    /// STARTTLS policy.
    pub security: StreamSecurityMode,
    /// Negotiate XEP-0198 stream management if offered.
    pub stream_management: bool,
    /// Ask for resumable XEP-0198 sessions.
    pub resume: bool,
    /// How long a broken session stays resumable locally. Clamped to the
    /// maximum announced by the server.
    pub resume_grace_period: Duration,
    /// Prefer XEP-0388 SASL2 over RFC 6120 SASL.
    pub sasl2: bool,
    /// XEP-0388 user agent.
    pub user_agent: UserAgentInfo,
    /// Mechanisms to try, in order of preference.
    pub mechanisms: Vec<SaslMechanism>,
    /// Largest single element accepted from the peer, in bytes.
    pub max_stanza_size: usize,
    /// Timeouts.
    pub timeouts: Timeouts,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("security", &self.security)
            .field("stream_management", &self.stream_management)
            .field("resume", &self.resume)
            .field("resume_grace_period", &self.resume_grace_period)
            .field("sasl2", &self.sasl2)
            .field("user_agent", &self.user_agent)
            .field("mechanisms", &self.mechanisms)
            .field("max_stanza_size", &self.max_stanza_size)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl SessionConfig {
    /// Configuration with defaults for the given account.
    pub fn new<P: Into<String>>(jid: Jid, password: P) -> Self {
        Self {
            jid,
            password: password.into(),
            security: StreamSecurityMode::default(),
            stream_management: true,
            resume: true,
            resume_grace_period: Duration::new(300, 0),
            sasl2: true,
            user_agent: UserAgentInfo::default(),
            mechanisms: vec![
                SaslMechanism::ScramSha256,
                SaslMechanism::ScramSha1,
                SaslMechanism::Plain,
                SaslMechanism::Anonymous,
            ],
            max_stanza_size: 10 * 1024 * 1024,
            timeouts: Timeouts::default(),
        }
    }

    /// Set the STARTTLS policy.
    pub fn with_security(mut self, security: StreamSecurityMode) -> Self {
        self.security = security;
        self
    }

    /// Enable or disable XEP-0198.
    pub fn with_stream_management(mut self, enabled: bool) -> Self {
        self.stream_management = enabled;
        self
    }

    /// Enable or disable XEP-0198 resumption.
    pub fn with_resume(mut self, enabled: bool) -> Self {
        self.resume = enabled;
        self
    }

    /// Set the local resumption grace period.
    pub fn with_resume_grace_period(mut self, period: Duration) -> Self {
        self.resume_grace_period = period;
        self
    }

    /// Enable or disable XEP-0388.
    pub fn with_sasl2(mut self, enabled: bool) -> Self {
        self.sasl2 = enabled;
        self
    }

    /// Set the XEP-0388 user agent.
    pub fn with_user_agent(mut self, user_agent: UserAgentInfo) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Set the SASL mechanisms to try, in order of preference.
    pub fn with_mechanisms(mut self, mechanisms: Vec<SaslMechanism>) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    /// Set the largest element accepted from the peer.
    pub fn with_max_stanza_size(mut self, size: usize) -> Self {
        self.max_stanza_size = size;
        self
    }

    /// Set the timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Bare account JID.
    pub fn bare_jid(&self) -> BareJid {
        self.jid.to_bare()
    }

    /// Domain the stream is opened to.
    pub fn domain(&self) -> &str {
        self.jid.domain().as_str()
    }
}
