use std::io;

use crate::registry::Descriptor;

/// Errors returned by [`Epoll`][`crate::Epoll`] operations.
///
/// Every variant maps onto a POSIX error code through [`Error::errno()`], which is what the
/// [`compat`][`crate::compat`] facade reports.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The descriptor is not mapped to a socket.
    #[error("descriptor {0} does not refer to a known socket")]
    BadDescriptor(Descriptor),

    /// The instance is closed or closing.
    #[error("the epoll instance is closed")]
    InvalidInstance,

    /// An argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Modify or delete on a descriptor that has no registered interest.
    #[error("descriptor {0} is not registered")]
    NotRegistered(Descriptor),

    /// Add on a descriptor that already has a registered interest.
    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(Descriptor),

    /// The native notification primitive rejected a registration.
    #[error("the socket registration was rejected")]
    InvalidRegistration(#[source] io::Error),

    /// A descriptor or the notification group could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// No output buffer was supplied.
    #[error("no output buffer")]
    Fault,

    /// Retrieving completions from the notification group failed.
    #[error("cannot retrieve notifications")]
    Io(#[source] io::Error),
}

impl Error {
    /// Returns the POSIX error code for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::BadDescriptor(_) => libc::EBADF,
            Error::InvalidInstance
            | Error::InvalidArgument(_)
            | Error::InvalidRegistration(_)
            | Error::Io(_) => libc::EINVAL,
            Error::NotRegistered(_) => libc::ENOENT,
            Error::AlreadyRegistered(_) => libc::EEXIST,
            Error::ResourceExhausted(_) => libc::ENOMEM,
            Error::Fault => libc::EFAULT,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match &err {
            Error::InvalidRegistration(e) | Error::Io(e) => e.kind(),
            Error::NotRegistered(_) => io::ErrorKind::NotFound,
            Error::AlreadyRegistered(_) => io::ErrorKind::AlreadyExists,
            Error::ResourceExhausted(_) => io::ErrorKind::OutOfMemory,
            Error::BadDescriptor(_)
            | Error::InvalidInstance
            | Error::InvalidArgument(_)
            | Error::Fault => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}

/// The result type of this crate.
pub type Result<T> = std::result::Result<T, Error>;
