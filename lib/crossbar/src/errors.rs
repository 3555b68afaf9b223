use std::error::Error;
use std::fmt;
use std::io;

use crate::codes::Code;

pub type LinkResult<T> = Result<T, LinkError>;

/// Error taxonomy of the link layer. All variants carry a stable identity so
/// callers can test for them.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LinkError {
    /// No locator was configured for an operation that needs one.
    MissingLocator,
    NotFoundRoute,
    NotFoundEvent,
    NotFoundEndpoint,
    /// A route exists but has no endpoint to pick from.
    NoEndpoint,
    /// The locator has no record for the user in the given group.
    NotFoundUserLocation,
    /// A gate-side session lookup came up empty.
    NotFoundSession,
    InvalidMessage,
    InvalidNid,
    /// An internal route was invoked from a gate instance.
    IllegalRequest,
    ConnectionClosed,
    /// A sequence number collided with a call already in flight.
    SeqInUse,
    Timeout,
    Canceled,
    /// A non-OK status code returned by the remote peer.
    Remote(Code),
    Io(io::ErrorKind),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkError::MissingLocator => write!(f, "no locator configured"),
            LinkError::NotFoundRoute => write!(f, "route not found"),
            LinkError::NotFoundEvent => write!(f, "event not found"),
            LinkError::NotFoundEndpoint => write!(f, "endpoint not found"),
            LinkError::NoEndpoint => write!(f, "no endpoint available"),
            LinkError::NotFoundUserLocation => write!(f, "user location not found"),
            LinkError::NotFoundSession => write!(f, "session not found"),
            LinkError::InvalidMessage => write!(f, "invalid message"),
            LinkError::InvalidNid => write!(f, "invalid node instance id"),
            LinkError::IllegalRequest => write!(f, "illegal request"),
            LinkError::ConnectionClosed => write!(f, "connection closed"),
            LinkError::SeqInUse => write!(f, "sequence number already in use"),
            LinkError::Timeout => write!(f, "operation timed out"),
            LinkError::Canceled => write!(f, "operation canceled"),
            LinkError::Remote(code) => write!(f, "remote error: code {}", code.to_u16()),
            LinkError::Io(kind) => write!(f, "io error: {:?}", kind),
        }
    }
}

impl Error for LinkError {}

impl From<io::Error> for LinkError {
    #[inline]
    fn from(err: io::Error) -> Self {
        LinkError::Io(err.kind())
    }
}
