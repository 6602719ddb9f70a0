use std::error::Error as StdError;
use std::fmt;
use std::io;

use xmpp_parsers::stanza_error::StanzaError;
use xso::error::FromElementError;

use crate::stanzastream::SessionPhase;

/// Cloneable snapshot of an [`io::Error`].
///
/// Transport errors are handed to every pending request on disconnect,
/// so the top-level [`Error`] has to be `Clone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueIoError {
    kind: io::ErrorKind,
    message: String,
}

impl OpaqueIoError {
    /// Kind of the original I/O error.
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }

    /// Rebuild an [`io::Error`] with the same kind and message.
    pub fn to_io_error(&self) -> io::Error {
        io::Error::new(self.kind, self.message.clone())
    }
}

impl From<io::Error> for OpaqueIoError {
    fn from(other: io::Error) -> Self {
        <Self as From<&io::Error>>::from(&other)
    }
}

impl From<&io::Error> for OpaqueIoError {
    fn from(other: &io::Error) -> Self {
        Self {
            kind: other.kind(),
            message: other.to_string(),
        }
    }
}

impl fmt::Display for OpaqueIoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for OpaqueIoError {}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte transport failed or was closed.
    Transport,
    /// The peer sent malformed XML.
    Xml,
    /// The peer violated the stream protocol.
    Protocol,
    /// SASL authentication failed.
    Authentication,
    /// Resource binding failed.
    Bind,
    /// A deadline elapsed.
    Timeout,
    /// A request was submitted with an id which is still pending.
    DuplicateRequestId,
    /// The session was closed.
    Disconnected,
    /// An operation was attempted in a state where it makes no sense.
    InvalidState,
}

/// Top-level error type
#[derive(Debug, Clone)]
pub enum Error {
    /// Transport (I/O) error
    Transport(OpaqueIoError),
    /// Malformed XML on the wire
    Xml(XmlError),
    /// Protocol-level error
    Protocol(ProtocolError),
    /// Authentication error
    Auth(AuthError),
    /// Resource binding error
    Bind(BindError),
    /// A negotiation, keepalive or shutdown deadline elapsed
    Timeout(TimeoutKind),
    /// A request id collides with a request which is still pending
    DuplicateRequestId(String),
    /// Connection closed
    Disconnected,
    /// Should never happen
    InvalidState,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) => ErrorKind::Transport,
            Error::Xml(_) => ErrorKind::Xml,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Auth(_) => ErrorKind::Authentication,
            Error::Bind(_) => ErrorKind::Bind,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::DuplicateRequestId(_) => ErrorKind::DuplicateRequestId,
            Error::Disconnected => ErrorKind::Disconnected,
            Error::InvalidState => ErrorKind::InvalidState,
        }
    }

    /// Whether a session torn down by this error may be resumed later.
    ///
    /// Only a lost transport or a silent peer leave the server-side session
    /// intact. Everything else ends the session for good.
    pub fn can_resume(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Timeout(TimeoutKind::Keepalive)
        )
    }

    /// Stream error condition to report to the peer before closing, if any.
    pub(crate) fn stream_condition(&self) -> Option<&'static str> {
        match self {
            Error::Xml(XmlError::StanzaTooLarge { .. }) => Some("policy-violation"),
            Error::Xml(XmlError::InvalidUtf8) => Some("unsupported-encoding"),
            Error::Xml(XmlError::Forbidden(_)) => Some("restricted-xml"),
            Error::Xml(_) => Some("not-well-formed"),
            Error::Protocol(ProtocolError::UnexpectedElement { .. }) => {
                Some("unsupported-stanza-type")
            }
            Error::Protocol(ProtocolError::InvalidStreamHeader(_)) => Some("invalid-namespace"),
            Error::Protocol(ProtocolError::HandledCountTooHigh { .. }) => {
                Some("undefined-condition")
            }
            Error::Timeout(TimeoutKind::Negotiation(_)) => Some("connection-timeout"),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(fmt, "transport error: {}", e),
            Error::Xml(e) => write!(fmt, "XML error: {}", e),
            Error::Protocol(e) => write!(fmt, "protocol error: {}", e),
            Error::Auth(e) => write!(fmt, "authentication error: {}", e),
            Error::Bind(e) => write!(fmt, "resource binding error: {}", e),
            Error::Timeout(e) => write!(fmt, "timeout: {}", e),
            Error::DuplicateRequestId(id) => {
                write!(fmt, "a request with id {:?} is already pending", id)
            }
            Error::Disconnected => write!(fmt, "disconnected"),
            Error::InvalidState => write!(fmt, "invalid state"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            Error::Xml(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Auth(e) => Some(e),
            Error::Bind(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Transport(e.into())
    }
}

impl From<XmlError> for Error {
    fn from(e: XmlError) -> Self {
        Error::Xml(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

impl From<BindError> for Error {
    fn from(e: BindError) -> Self {
        Error::Bind(e)
    }
}

/// Errors raised while framing the incoming byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
    /// The markup is not well-formed.
    Syntax(String),
    /// A fragment is not valid UTF-8.
    InvalidUtf8,
    /// A construct which XMPP forbids (comments, processing instructions,
    /// document type declarations).
    Forbidden(&'static str),
    /// Character data directly below the stream root.
    UnexpectedText,
    /// The first element is not a `<stream:stream/>` header.
    NotAStream,
    /// A single element grew past the configured limit.
    StanzaTooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },
    /// The XML parser rejected a complete fragment.
    Parser(String),
}

impl fmt::Display for XmlError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            XmlError::Syntax(e) => write!(fmt, "syntax error: {}", e),
            XmlError::InvalidUtf8 => write!(fmt, "invalid UTF-8"),
            XmlError::Forbidden(what) => write!(fmt, "{} not allowed in XMPP streams", what),
            XmlError::UnexpectedText => write!(fmt, "text at stream level"),
            XmlError::NotAStream => write!(fmt, "first element is not a stream header"),
            XmlError::StanzaTooLarge { limit } => {
                write!(fmt, "element exceeds the size limit of {} bytes", limit)
            }
            XmlError::Parser(e) => write!(fmt, "XML parser error: {}", e),
        }
    }
}

impl StdError for XmlError {}

impl From<minidom::Error> for XmlError {
    fn from(e: minidom::Error) -> Self {
        XmlError::Parser(e.to_string())
    }
}

/// XMPP protocol-level error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An element which is not part of the exchange expected in the
    /// current phase.
    UnexpectedElement {
        /// Phase the session was in.
        phase: SessionPhase,
        /// Local name of the element.
        name: String,
        /// Namespace of the element.
        ns: String,
    },
    /// The peer sent `<stream:error/>`.
    StreamError {
        /// Defined condition, e.g. `conflict`.
        condition: String,
        /// Optional human-readable text.
        text: Option<String>,
    },
    /// The peer's stream header is invalid.
    InvalidStreamHeader(String),
    /// A known element with invalid contents.
    MalformedElement(String),
    /// TLS is required by policy but cannot be negotiated.
    NoTls,
    /// The peer refused to start TLS.
    TlsFailure,
    /// The peer acknowledged more stanzas than were sent.
    HandledCountTooHigh {
        /// The received acknowledgement count.
        h: u32,
        /// Number of stanzas sent so far.
        send_count: u32,
    },
    /// A request which is neither an IQ get nor an IQ set.
    InvalidRequest(String),
    /// The peer closed the stream.
    StreamClosed,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::UnexpectedElement { phase, name, ns } => write!(
                fmt,
                "unexpected element {{{}}}{} during {:?}",
                ns, name, phase
            ),
            ProtocolError::StreamError { condition, text } => match text {
                Some(text) => write!(fmt, "stream error {}: {}", condition, text),
                None => write!(fmt, "stream error {}", condition),
            },
            ProtocolError::InvalidStreamHeader(e) => write!(fmt, "invalid stream header: {}", e),
            ProtocolError::MalformedElement(e) => write!(fmt, "malformed element: {}", e),
            ProtocolError::NoTls => write!(fmt, "no TLS available"),
            ProtocolError::TlsFailure => write!(fmt, "peer refused to start TLS"),
            ProtocolError::HandledCountTooHigh { h, send_count } => write!(
                fmt,
                "peer acked {} stanzas, but only {} were sent",
                h, send_count
            ),
            ProtocolError::InvalidRequest(e) => write!(fmt, "invalid request: {}", e),
            ProtocolError::StreamClosed => write!(fmt, "peer closed the stream"),
        }
    }
}

impl StdError for ProtocolError {}

impl From<FromElementError> for ProtocolError {
    fn from(e: FromElementError) -> Self {
        ProtocolError::MalformedElement(e.to_string())
    }
}

/// Authentication error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No matching SASL mechanism available
    NoMechanism,
    /// Local SASL implementation error
    Sasl(String),
    /// Failure from server
    Fail {
        /// Defined SASL condition, e.g. `not-authorized`.
        condition: String,
        /// Optional human-readable text.
        text: Option<String>,
    },
}

impl StdError for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(fmt, "no matching SASL mechanism available"),
            AuthError::Sasl(s) => write!(fmt, "local SASL implementation error: {}", s),
            AuthError::Fail { condition, text } => match text {
                Some(text) => write!(fmt, "failure from the server: {} ({})", condition, text),
                None => write!(fmt, "failure from the server: {}", condition),
            },
        }
    }
}

/// Resource binding error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The server offers no way to bind a resource.
    Unsupported,
    /// The server rejected the bind request.
    Rejected {
        /// Stanza error condition, if one could be extracted.
        condition: Option<String>,
    },
    /// The bind result does not contain a usable JID.
    InvalidResponse(String),
}

impl StdError for BindError {}

impl fmt::Display for BindError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BindError::Unsupported => write!(fmt, "server does not support resource binding"),
            BindError::Rejected {
                condition: Some(condition),
            } => write!(fmt, "bind request rejected: {}", condition),
            BindError::Rejected { condition: None } => write!(fmt, "bind request rejected"),
            BindError::InvalidResponse(e) => write!(fmt, "invalid response to resource binding: {}", e),
        }
    }
}

/// The deadline which elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// A negotiation step did not complete in time.
    Negotiation(SessionPhase),
    /// The peer did not answer a keepalive ping.
    Keepalive,
    /// The peer did not close its stream after we closed ours.
    Shutdown,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimeoutKind::Negotiation(phase) => write!(fmt, "negotiation stalled in {:?}", phase),
            TimeoutKind::Keepalive => write!(fmt, "peer did not answer keepalive"),
            TimeoutKind::Shutdown => write!(fmt, "peer did not close its stream"),
        }
    }
}

/// Failure of an individual request.
#[derive(Debug, Clone)]
pub enum RequestError {
    /// The peer answered with `type="error"`.
    Stanza(StanzaError),
    /// The peer answered with an error whose payload could not be parsed.
    MalformedResponse(String),
    /// No response arrived before the request's deadline.
    Timeout,
    /// The session ended before a response arrived.
    Cancelled(Error),
}

impl fmt::Display for RequestError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RequestError::Stanza(e) => write!(fmt, "error response: {:?}", e.defined_condition),
            RequestError::MalformedResponse(e) => write!(fmt, "malformed error response: {}", e),
            RequestError::Timeout => write!(fmt, "request timed out"),
            RequestError::Cancelled(e) => write!(fmt, "request cancelled: {}", e),
        }
    }
}

impl StdError for RequestError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RequestError::Cancelled(e) => Some(e),
            _ => None,
        }
    }
}
