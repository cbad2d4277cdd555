//! Notification groups: the native completion object behind each instance.
//!
//! Every backend exposes the same `NotificationGroup` type:
//!
//! - `submit()` hands one registration (enable or remove) to the native primitive.
//! - `post()` enqueues a completion directly, without any socket activity.
//! - `retrieve()` blocks for up to a deadline and drains a bounded batch of completions.
//!
//! On Windows the group is an I/O completion port driven by `ProcessSocketNotifications`. On
//! other targets it is a `polling::Poller` paired with a queue of posted completions.

#[cfg(not(any(unix, windows)))]
compile_error!("psn-epoll does not support this target OS");

use crate::event::EpollFlags;
use crate::interest::Interest;
use crate::registry::RawSocket;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use self::windows::NotificationGroup;

#[cfg(not(windows))]
mod poller;
#[cfg(not(windows))]
pub(crate) use self::poller::NotificationGroup;

/// What a completion was queued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tag {
    /// Readiness (real or synthesized) of one registration.
    ///
    /// Keys are never reused within an instance, so completions left over from a deleted
    /// registration cannot be mistaken for a later one on the same descriptor.
    Registration(usize),

    /// Wakes a waiter; never reported to callers.
    Wake,
}

/// One entry drained from a notification group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Completion {
    pub(crate) tag: Tag,

    /// Conditions reported by the native primitive. May be empty.
    pub(crate) events: EpollFlags,

    /// Set on the acknowledgement of a removed registration.
    pub(crate) removed: bool,
}

impl Completion {
    pub(crate) fn ready(key: usize, events: EpollFlags) -> Completion {
        Completion {
            tag: Tag::Registration(key),
            events,
            removed: false,
        }
    }

    pub(crate) fn wake() -> Completion {
        Completion {
            tag: Tag::Wake,
            events: EpollFlags::empty(),
            removed: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trigger {
    Level,
    Edge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    /// Registers the socket, or re-arms an existing registration.
    Enable,
    Remove,
}

/// A single request for the native registration primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Registration {
    pub(crate) socket: RawSocket,
    pub(crate) operation: Operation,
    pub(crate) trigger: Trigger,
    pub(crate) oneshot: bool,
    pub(crate) filter: EpollFlags,

    /// Completions for this socket carry this key.
    pub(crate) key: usize,
}

impl Registration {
    pub(crate) fn enable(socket: RawSocket, interest: &Interest) -> Registration {
        Registration {
            socket,
            operation: Operation::Enable,
            trigger: interest.trigger,
            oneshot: interest.oneshot,
            filter: interest.events & EpollFlags::FILTER,
            key: interest.key,
        }
    }

    pub(crate) fn remove(socket: RawSocket, key: usize) -> Registration {
        Registration {
            socket,
            operation: Operation::Remove,
            trigger: Trigger::Level,
            oneshot: false,
            filter: EpollFlags::empty(),
            key,
        }
    }

    /// Whether a writable notification has to be synthesized after this registration.
    ///
    /// Edge-triggered registrations are not signalled for a socket that is already writable, so
    /// the first writable event is posted by hand.
    pub(crate) fn primes_write(&self) -> bool {
        self.operation == Operation::Enable
            && self.trigger == Trigger::Edge
            && self.filter.contains(EpollFlags::OUT)
    }
}
