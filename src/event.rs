//! Event flags, events, and control operations.

use bitflags::bitflags;

use crate::registry::Descriptor;

bitflags! {
    /// Readiness conditions and trigger modifiers.
    ///
    /// The bit layout follows the native socket-notification API, so the base bits can be handed
    /// to it unchanged. [`ET`][`EpollFlags::ET`] and [`ONESHOT`][`EpollFlags::ONESHOT`] are
    /// modifiers: they select how a registration is armed and are not kept in the stored mask.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EpollFlags: u32 {
        /// The socket is readable.
        const IN = 0x01;
        /// The socket is writable.
        const OUT = 0x02;
        /// The peer hung up.
        const HUP = 0x04;
        /// Disarm the registration after one notification.
        const ONESHOT = 0x08;
        /// Edge-triggered notification.
        const ET = 0x10;
        /// An error condition is pending on the socket.
        const ERR = 0x40;

        /// Same as [`IN`][`EpollFlags::IN`].
        const RDNORM = Self::IN.bits();
        /// Readable or hung up.
        const RDHUP = Self::IN.bits() | Self::HUP.bits();
        /// Same as [`OUT`][`EpollFlags::OUT`].
        const WRNORM = Self::OUT.bits();
    }
}

impl EpollFlags {
    /// The trigger modifiers.
    pub const MODIFIERS: EpollFlags = EpollFlags::ET.union(EpollFlags::ONESHOT);

    /// Bits the native primitive accepts as a registration filter.
    pub(crate) const FILTER: EpollFlags = EpollFlags::IN
        .union(EpollFlags::OUT)
        .union(EpollFlags::HUP);

    /// Returns the flags without the trigger modifiers.
    pub fn base(self) -> EpollFlags {
        self.difference(EpollFlags::MODIFIERS)
    }

    /// Returns `true` if edge triggering was requested.
    pub fn is_edge(self) -> bool {
        self.contains(EpollFlags::ET)
    }

    /// Returns `true` if one-shot delivery was requested.
    pub fn is_oneshot(self) -> bool {
        self.contains(EpollFlags::ONESHOT)
    }
}

/// An interest on input, a readiness notification on output.
///
/// When registering, only `events` and `data` are read. [`Epoll::wait()`][`crate::Epoll::wait()`]
/// fills in all three fields: `data` is returned verbatim from the registration and `fd` names
/// the ready descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Event {
    /// Requested or reported conditions.
    pub events: EpollFlags,

    /// Opaque user payload.
    pub data: u64,

    /// The descriptor the notification is for.
    pub fd: Descriptor,
}

impl Event {
    /// Creates an interest in `events` carrying `data`.
    pub fn new(events: EpollFlags, data: u64) -> Event {
        Event {
            events,
            data,
            fd: Descriptor::default(),
        }
    }
}

/// Operations accepted by [`Epoll::ctl()`][`crate::Epoll::ctl()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EpollOp {
    /// Register a new interest.
    Add = 1,
    /// Replace an existing interest and re-arm it.
    Modify = 2,
    /// Remove an existing interest.
    Delete = 3,
}

impl EpollOp {
    /// Converts an `EPOLL_CTL_*` code.
    pub fn from_raw(op: i32) -> Option<EpollOp> {
        match op {
            1 => Some(EpollOp::Add),
            2 => Some(EpollOp::Modify),
            3 => Some(EpollOp::Delete),
            _ => None,
        }
    }
}
