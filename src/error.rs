use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use crate::types::SubType;

/// Boxed error returned by application handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Malformed subscription shape or parameters, rejected before any network traffic
    Validation,
    /// No processor recognizes the requested subtype
    UnsupportedSubType,
    /// Operation requires a live or pending connection and there is none
    Disconnected,
    /// Error related to WebSocket connections
    WebSocket,
    /// Error raised by an application handler while dispatching a message
    Handler,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<BoxError>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self::from_boxed(kind, Box::new(source))
    }

    pub(crate) fn from_boxed(kind: Kind, source: BoxError) -> Self {
        Self {
            kind,
            source: Some(source),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn unsupported_subtype<S: Into<String>>(subtype: S) -> Self {
        UnsupportedSubType {
            subtype: subtype.into(),
        }
        .into()
    }

    pub fn disconnected<S: Into<String>>(endpoint: S) -> Self {
        Disconnected {
            endpoint: endpoint.into(),
        }
        .into()
    }

    pub(crate) fn handler(subtype: SubType, source: BoxError) -> Self {
        HandlerFailed { subtype, source }.into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid subscription parameters: {}", self.reason)
    }
}

impl StdError for Validation {}

#[non_exhaustive]
#[derive(Debug)]
pub struct UnsupportedSubType {
    pub subtype: String,
}

impl fmt::Display for UnsupportedSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subtype `{}` is not supported", self.subtype)
    }
}

impl StdError for UnsupportedSubType {}

/// The stream has neither an open socket nor a connection attempt in flight.
#[non_exhaustive]
#[derive(Debug)]
pub struct Disconnected {
    pub endpoint: String,
}

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream {} is not connected", self.endpoint)
    }
}

impl StdError for Disconnected {}

/// An application handler returned an error while receiving a payload.
#[non_exhaustive]
#[derive(Debug)]
pub struct HandlerFailed {
    pub subtype: SubType,
    pub source: BoxError,
}

impl fmt::Display for HandlerFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} handler failed: {}", self.subtype, self.source)
    }
}

impl StdError for HandlerFailed {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<UnsupportedSubType> for Error {
    fn from(err: UnsupportedSubType) -> Self {
        Error::with_source(Kind::UnsupportedSubType, err)
    }
}

impl From<Disconnected> for Error {
    fn from(err: Disconnected) -> Self {
        Error::with_source(Kind::Disconnected, err)
    }
}

impl From<HandlerFailed> for Error {
    fn from(err: HandlerFailed) -> Self {
        Error::with_source(Kind::Handler, err)
    }
}
