//! C-style facade over [`Epoll`].
//!
//! Instances are named by integer handles and failures are reported as `-1` with the POSIX
//! error code available from [`errno()`], which is per thread.
//!
//! # Examples
//!
//! ```
//! use psn_epoll::compat::{self, EPOLL_CTL_ADD};
//! use psn_epoll::{EpollFlags, Event};
//!
//! let epfd = compat::epoll_create1(0);
//! assert!(epfd > 0);
//!
//! // Descriptor 42 was never mapped to a socket.
//! let ev = Event::new(EpollFlags::IN, 0);
//! assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_ADD, 42, Some(&ev)), -1);
//! assert_eq!(compat::errno(), libc::EBADF);
//!
//! assert_eq!(compat::epoll_close(epfd), 0);
//! ```

use std::cell::Cell;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use once_cell::sync::Lazy;

use crate::epoll::Epoll;
use crate::error::Error;
use crate::event::{EpollOp, Event};
use crate::registry::{Descriptor, RawSocket};

/// Register a new interest.
pub const EPOLL_CTL_ADD: i32 = 1;
/// Replace an existing interest.
pub const EPOLL_CTL_MOD: i32 = 2;
/// Remove an existing interest.
pub const EPOLL_CTL_DEL: i32 = 3;

static INSTANCES: Lazy<Mutex<HashMap<i32, Arc<Epoll>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

thread_local! {
    static LAST_ERROR: Cell<i32> = Cell::new(0);
}

/// Returns the error code of the last failed call on this thread.
pub fn errno() -> i32 {
    LAST_ERROR.with(|e| e.get())
}

fn fail(code: i32) -> i32 {
    log::trace!("compat: failed with errno {}", code);
    LAST_ERROR.with(|e| e.set(code));
    -1
}

fn lookup(epfd: i32) -> Option<Arc<Epoll>> {
    INSTANCES.lock_blocking().get(&epfd).cloned()
}

/// Creates an instance and returns its handle.
///
/// Fails with `EINVAL` if `size` is zero.
pub fn epoll_create(size: i32) -> i32 {
    let size_hint = match usize::try_from(size) {
        Ok(size) => size,
        Err(_) => return fail(libc::EINVAL),
    };
    let epoll = match Epoll::new(size_hint) {
        Ok(epoll) => epoll,
        Err(err) => return fail(err.errno()),
    };
    let epfd = match i32::try_from(epoll.id()) {
        Ok(epfd) => epfd,
        Err(_) => return fail(libc::ENOMEM),
    };

    INSTANCES.lock_blocking().insert(epfd, Arc::new(epoll));
    epfd
}

/// Same as `epoll_create(1)`; `flags` is ignored.
pub fn epoll_create1(flags: i32) -> i32 {
    let _ = flags;
    epoll_create(1)
}

/// Adds, modifies, or deletes the interest of `fd`.
///
/// Returns `0` on success.
pub fn epoll_ctl(epfd: i32, op: i32, fd: i32, event: Option<&Event>) -> i32 {
    let epoll = match lookup(epfd) {
        Some(epoll) => epoll,
        None => return fail(libc::EINVAL),
    };
    let op = match EpollOp::from_raw(op) {
        Some(op) => op,
        None => return fail(libc::EINVAL),
    };

    match epoll.ctl(op, Descriptor::from_raw(fd), event) {
        Ok(()) => 0,
        Err(err) => fail(err.errno()),
    }
}

/// Waits for readiness and fills at most `maxevents` entries of `events`.
///
/// A negative `timeout` waits forever. Returns the number of events written, or `0` on timeout
/// and for a closed instance.
pub fn epoll_wait(epfd: i32, events: Option<&mut [Event]>, maxevents: i32, timeout: i32) -> i32 {
    let epoll = match lookup(epfd) {
        Some(epoll) => epoll,
        None => return fail(libc::EINVAL),
    };
    if epoll.is_closed() {
        return 0;
    }
    let events = match events {
        Some(events) => events,
        None => return fail(Error::Fault.errno()),
    };
    let max = match usize::try_from(maxevents) {
        Ok(max) if max >= 1 => max.min(events.len()),
        _ => return fail(libc::EINVAL),
    };
    let timeout = u64::try_from(timeout).ok().map(Duration::from_millis);

    match epoll.wait(&mut events[..max], timeout) {
        Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
        Err(err) => fail(err.errno()),
    }
}

/// Closes an instance and forgets its handle.
///
/// Returns `0` on success, or `-1` with `EINVAL` for an unknown handle.
pub fn epoll_close(epfd: i32) -> i32 {
    let epoll = match INSTANCES.lock_blocking().remove(&epfd) {
        Some(epoll) => epoll,
        None => return fail(libc::EINVAL),
    };
    epoll.close();
    0
}

/// Returns the descriptor for `socket` within instance `epfd`.
pub fn epoll_sock2fd(epfd: i32, socket: RawSocket) -> i32 {
    let epoll = match lookup(epfd) {
        Some(epoll) => epoll,
        None => return fail(libc::EINVAL),
    };
    match epoll.descriptor_for(socket) {
        Ok(fd) => fd.as_raw(),
        Err(err) => fail(err.errno()),
    }
}

/// Returns the socket behind `fd` within instance `epfd`.
///
/// Sets `EINVAL` for an unknown handle and `EBADF` for an unknown descriptor.
pub fn epoll_fd2sock(epfd: i32, fd: i32) -> Option<RawSocket> {
    let epoll = match lookup(epfd) {
        Some(epoll) => epoll,
        None => {
            fail(libc::EINVAL);
            return None;
        }
    };
    let socket = epoll.socket_for(Descriptor::from_raw(fd));
    if socket.is_none() {
        fail(libc::EBADF);
    }
    socket
}

/// Wakes a pending [`epoll_wait()`] on `epfd` and marks the instance as closing.
pub fn epoll_postqueued(epfd: i32) -> i32 {
    let epoll = match lookup(epfd) {
        Some(epoll) => epoll,
        None => return fail(libc::EINVAL),
    };
    match epoll.wake() {
        Ok(()) => 0,
        Err(err) => fail(err.errno()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_distinct() {
        let a = epoll_create(1);
        let b = epoll_create1(0);
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
        assert_eq!(epoll_close(a), 0);
        assert_eq!(epoll_close(b), 0);
    }

    #[test]
    fn zero_size() {
        assert_eq!(epoll_create(0), -1);
        assert_eq!(errno(), libc::EINVAL);
        assert_eq!(epoll_create(-3), -1);
        assert_eq!(errno(), libc::EINVAL);
    }

    #[test]
    fn unknown_handle() {
        assert_eq!(epoll_close(-1), -1);
        assert_eq!(errno(), libc::EINVAL);
        assert_eq!(epoll_postqueued(-1), -1);
        assert_eq!(epoll_fd2sock(-1, 1), None);
        assert_eq!(errno(), libc::EINVAL);
    }

    #[test]
    fn bad_op() {
        let epfd = epoll_create(1);
        assert_eq!(epoll_ctl(epfd, 9, 1, None), -1);
        assert_eq!(errno(), libc::EINVAL);
        epoll_close(epfd);
    }
}
