//! Mapping between caller-visible descriptors and native sockets.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// A native socket handle.
#[cfg(unix)]
pub type RawSocket = std::os::unix::io::RawFd;

/// A native socket handle.
#[cfg(windows)]
pub type RawSocket = std::os::windows::io::RawSocket;

/// An opaque integer standing in for a native socket.
///
/// Descriptors are handed out by [`Epoll::descriptor_for()`][`crate::Epoll::descriptor_for()`]
/// and are only meaningful for the instance that allocated them. Allocated descriptors are
/// always positive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Descriptor(i32);

impl Descriptor {
    /// Wraps a raw descriptor value.
    pub const fn from_raw(raw: i32) -> Descriptor {
        Descriptor(raw)
    }

    /// Returns the raw descriptor value.
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Bidirectional descriptor ↔ socket table.
#[derive(Debug)]
pub(crate) struct Registry {
    sockets: HashMap<Descriptor, RawSocket>,
    descriptors: HashMap<RawSocket, Descriptor>,

    /// The most recently allocated descriptor value.
    last: i32,

    /// Allocation wraps back to 1 after this value.
    max: i32,
}

impl Registry {
    pub(crate) fn new(max: i32) -> Registry {
        Registry {
            sockets: HashMap::new(),
            descriptors: HashMap::new(),
            last: 0,
            max: max.max(1),
        }
    }

    /// Returns the descriptor of `socket`, allocating one if it has none.
    pub(crate) fn descriptor_for(&mut self, socket: RawSocket) -> Result<Descriptor> {
        if let Some(&fd) = self.descriptors.get(&socket) {
            return Ok(fd);
        }
        if self.sockets.len() >= self.max as usize {
            return Err(Error::ResourceExhausted("no free descriptors"));
        }

        // The table is not full, so a free value exists within one lap.
        let fd = loop {
            self.last = if self.last >= self.max { 1 } else { self.last + 1 };
            let fd = Descriptor(self.last);
            if !self.sockets.contains_key(&fd) {
                break fd;
            }
        };

        self.sockets.insert(fd, socket);
        self.descriptors.insert(socket, fd);
        Ok(fd)
    }

    pub(crate) fn socket_for(&self, fd: Descriptor) -> Option<RawSocket> {
        self.sockets.get(&fd).copied()
    }

    /// Frees `fd` and forgets its socket.
    pub(crate) fn release(&mut self, fd: Descriptor) -> Option<RawSocket> {
        let socket = self.sockets.remove(&fd)?;
        self.descriptors.remove(&socket);
        Some(socket)
    }

    pub(crate) fn clear(&mut self) {
        self.sockets.clear();
        self.descriptors.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.sockets.len()
    }
}
