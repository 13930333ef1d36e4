//! Server address resolution.
//!
//! A connection's `server` string selects the IPC method from its form:
//!
//! | form                         | method                  |
//! |------------------------------|-------------------------|
//! | empty / absent               | client library default  |
//! | `.` (Windows only)           | named pipe              |
//! | path to a usable socket file | Unix domain socket      |
//! | `host[:port-or-service]`     | TCP/IP                  |
//!
//! IPv6 literals must be bracketed when followed by a port or service,
//! e.g. `[::1]:3306`.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::services::lookup_tcp_service;

/// Characters that can never appear in a host name or address literal.
const BAD_ADDRESS_CHARS: &str = " !\"#$%&'()*+,/;<=>?@\\^`{|}~";

/// Why a server string could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AddressError {
    /// Bracketed IPv6 literal not followed by `:service`, or stray brackets.
    #[error("Malformed IPv6 [address]:service combination")]
    MalformedIpv6,

    /// More than one `:` outside brackets.
    #[error("IPv6 literal needs brackets if using service name or port number")]
    UnbracketedIpv6,

    /// Service name not found in the services database.
    #[error("Failed to look up TCP service {0}")]
    UnknownService(String),

    /// Numeric port outside 0..=65535.
    #[error("Bad port number {0}")]
    BadPort(String),

    /// Host part contains characters no host name can have.
    #[error("Bad address {0}")]
    BadAddress(String),

    /// Socket path does not exist.
    #[error("{} does not exist", .0.display())]
    SocketMissing(PathBuf),

    /// Socket path exists but is not readable and writable.
    #[error("Don't have read-write permission for {}", .0.display())]
    SocketAccess(PathBuf),

    /// Socket path could not be examined.
    #[error("Failed to get information for {}", .0.display())]
    SocketStat(PathBuf),

    /// Path exists but is some other kind of file.
    #[error("{} is not a Unix domain socket", .0.display())]
    NotASocket(PathBuf),

    /// This platform has no Unix domain sockets.
    #[error("Unix domain sockets only work on POSIX systems")]
    SocketsUnsupported,
}

/// How to reach the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcMethod {
    /// Let the client library pick (usually the default local socket).
    Default,
    /// Windows named pipe on the local machine.
    NamedPipe,
    /// Unix domain socket at this path.
    UnixSocket(PathBuf),
    /// TCP/IP.
    Tcp {
        /// Host name or address literal, without brackets.
        host: String,
        /// Port; 0 means the backend's default.
        port: u16,
    },
}

impl IpcMethod {
    /// Pick the IPC method for a server string.
    ///
    /// A nonzero `port` overrides any port or service given in `server`.
    pub fn resolve(server: Option<&str>, port: u16) -> Result<Self, AddressError> {
        let server = match server.map(str::trim) {
            None | Some("") => return Ok(Self::Default),
            Some(server) => server,
        };

        if is_named_pipe(server) {
            return Ok(Self::NamedPipe);
        }

        match is_socket(server) {
            Ok(()) => return Ok(Self::UnixSocket(PathBuf::from(server))),
            // Only something that looks like a path gets the socket diagnosis.
            Err(e) if server.contains('/') => return Err(e),
            Err(_) => {}
        }

        let (host, embedded) = parse_address(server, 0)?;
        let port = if port != 0 { port } else { embedded };
        Ok(Self::Tcp { host, port })
    }
}

/// Split `host[:port-or-service]` into a host and a port.
///
/// `default_port` is returned when no port or service is given. A service
/// name is resolved through the platform services database.
///
/// ```
/// use tabula_client::parse_address;
///
/// assert_eq!(parse_address("db.example.com:3307", 0).unwrap(), ("db.example.com".into(), 3307));
/// assert_eq!(parse_address("[::1]:telnet", 0).unwrap(), ("::1".into(), 23));
/// assert!(parse_address("::1", 0).is_err());
/// ```
pub fn parse_address(spec: &str, default_port: u16) -> Result<(String, u16), AddressError> {
    let (addr, service) = if let Some(rest) = spec.strip_prefix('[') {
        let (addr, after) = rest.split_once(']').ok_or(AddressError::MalformedIpv6)?;
        let service = after
            .strip_prefix(':')
            .ok_or(AddressError::MalformedIpv6)?;
        if service.contains(['[', ']']) {
            return Err(AddressError::MalformedIpv6);
        }
        (addr, service)
    } else {
        match spec.split_once(':') {
            Some((_, service)) if service.contains(':') => {
                return Err(AddressError::UnbracketedIpv6);
            }
            Some((addr, service)) => (addr, service),
            None => (spec, ""),
        }
    };

    if addr.contains(|c: char| BAD_ADDRESS_CHARS.contains(c)) {
        return Err(AddressError::BadAddress(addr.to_owned()));
    }

    let port = if service.is_empty() {
        default_port
    } else if service.bytes().all(|b| b.is_ascii_digit()) {
        service
            .parse()
            .map_err(|_| AddressError::BadPort(service.to_owned()))?
    } else {
        lookup_tcp_service(service)
            .ok_or_else(|| AddressError::UnknownService(service.to_owned()))?
    };

    Ok((addr.to_owned(), port))
}

/// Check that `path` names a Unix domain socket this process can use.
///
/// The error says what is wrong: missing, not readable and writable, or
/// some other kind of file.
#[cfg(unix)]
pub fn is_socket(path: impl AsRef<Path>) -> Result<(), AddressError> {
    use std::fs;
    use std::io::ErrorKind;
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    let path = path.as_ref();
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AddressError::SocketMissing(path.to_owned()));
        }
        Err(_) => return Err(AddressError::SocketStat(path.to_owned())),
    };

    let mode = meta.permissions().mode();
    if mode & 0o444 == 0 || mode & 0o222 == 0 {
        return Err(AddressError::SocketAccess(path.to_owned()));
    }

    if meta.file_type().is_socket() {
        Ok(())
    } else {
        Err(AddressError::NotASocket(path.to_owned()))
    }
}

/// Check that `path` names a Unix domain socket this process can use.
#[cfg(not(unix))]
pub fn is_socket(_path: impl AsRef<Path>) -> Result<(), AddressError> {
    Err(AddressError::SocketsUnsupported)
}

/// Whether `server` asks for a local named pipe.
///
/// Only `"."` on Windows qualifies.
#[must_use]
pub fn is_named_pipe(server: &str) -> bool {
    cfg!(windows) && server == "."
}
