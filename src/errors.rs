use std::error::Error as StdError;
use std::fmt;

/// Identifies the backend family an error originated from.
///
/// Two errors compare equal iff they carry the same domain and the same
/// numeric code, which makes error values usable as stable identities
/// across the backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    /// Backend-independent core: codecs, configuration, the SMF layer.
    Core,
    Alsa,
    CoreMidi,
    WinMm,
    PipeWire,
    Jack,
    Network,
    /// The in-process software loopback backend.
    Loopback,
}

impl ErrorDomain {
    pub fn name(self) -> &'static str {
        match self {
            ErrorDomain::Core => "core",
            ErrorDomain::Alsa => "alsa",
            ErrorDomain::CoreMidi => "coremidi",
            ErrorDomain::WinMm => "winmm",
            ErrorDomain::PipeWire => "pipewire",
            ErrorDomain::Jack => "jack",
            ErrorDomain::Network => "network",
            ErrorDomain::Loopback => "loopback",
        }
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The kind of failure, shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested API is not compiled in or its runtime library is missing.
    BackendUnavailable,
    /// The configuration record does not match the selected API.
    ApiConfigMismatch,
    /// Port id is not present in the current session.
    InvalidPort,
    /// Port is already opened exclusively.
    PortBusy,
    /// The operation requires an open port.
    NotConnected,
    /// The backend cannot perform this operation (e.g. UMP on a byte API).
    UnsupportedOperation,
    /// Stream or codec parse failure.
    Malformed,
    /// End of stream in the middle of a message.
    Truncated,
    /// A user callback requested abort.
    Aborted,
    /// Output queue full and retries exhausted.
    NoBufferSpace,
    /// An underlying OS error, carried verbatim.
    SystemError(i32),
}

impl ErrorKind {
    /// Numeric identity of this kind within its domain.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::BackendUnavailable => 1,
            ErrorKind::ApiConfigMismatch => 2,
            ErrorKind::InvalidPort => 3,
            ErrorKind::PortBusy => 4,
            ErrorKind::NotConnected => 5,
            ErrorKind::UnsupportedOperation => 6,
            ErrorKind::Malformed => 7,
            ErrorKind::Truncated => 8,
            ErrorKind::Aborted => 9,
            ErrorKind::NoBufferSpace => 10,
            ErrorKind::SystemError(code) => code,
        }
    }

    fn message(self) -> &'static str {
        match self {
            ErrorKind::BackendUnavailable => "MIDI backend not available",
            ErrorKind::ApiConfigMismatch => "configuration does not match the requested API",
            ErrorKind::InvalidPort => "invalid port",
            ErrorKind::PortBusy => "port is already in use",
            ErrorKind::NotConnected => "no port is open",
            ErrorKind::UnsupportedOperation => "operation not supported by this backend",
            ErrorKind::Malformed => "malformed MIDI data",
            ErrorKind::Truncated => "truncated MIDI data",
            ErrorKind::Aborted => "operation aborted by callback",
            ErrorKind::NoBufferSpace => "no buffer space available",
            ErrorKind::SystemError(_) => "system error",
        }
    }
}

/// An error value carrying a backend domain and a numeric code.
#[derive(Debug, Clone, Copy)]
pub struct Error {
    domain: ErrorDomain,
    kind: ErrorKind,
}

impl Error {
    pub fn new(domain: ErrorDomain, kind: ErrorKind) -> Error {
        Error { domain, kind }
    }

    /// Shorthand for an error in the backend-independent core domain.
    pub fn core(kind: ErrorKind) -> Error {
        Error::new(ErrorDomain::Core, kind)
    }

    pub fn domain(&self) -> ErrorDomain {
        self.domain
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        self.domain == other.domain && self.code() == other.code()
    }
}

impl Eq for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ErrorKind::SystemError(code) => {
                write!(f, "{}: system error {}", self.domain, code)
            }
            kind => write!(f, "{}: {}", self.domain, kind.message()),
        }
    }
}

impl StdError for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_domain_and_code() {
        let a = Error::new(ErrorDomain::Loopback, ErrorKind::PortBusy);
        let b = Error::new(ErrorDomain::Loopback, ErrorKind::PortBusy);
        let c = Error::new(ErrorDomain::Alsa, ErrorKind::PortBusy);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, Error::new(ErrorDomain::Loopback, ErrorKind::NotConnected));
    }

    #[test]
    fn system_error_carries_os_code() {
        let err = Error::new(ErrorDomain::Alsa, ErrorKind::SystemError(-32));
        assert_eq!(err.code(), -32);
        assert_eq!(err.to_string(), "alsa: system error -32");
    }
}
