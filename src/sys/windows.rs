//! I/O completion port driven by `ProcessSocketNotifications`.

use std::convert::TryInto;
use std::ffi::c_void;
use std::fmt;
use std::io;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_NOT_FOUND, ERROR_SUCCESS, HANDLE, INVALID_HANDLE_VALUE, WAIT_TIMEOUT,
};
use windows_sys::Win32::Networking::WinSock::{
    ProcessSocketNotifications, SOCKET, SOCK_NOTIFY_EVENT_REMOVE, SOCK_NOTIFY_OP_ENABLE,
    SOCK_NOTIFY_OP_REMOVE, SOCK_NOTIFY_REGISTRATION, SOCK_NOTIFY_TRIGGER_EDGE,
    SOCK_NOTIFY_TRIGGER_LEVEL, SOCK_NOTIFY_TRIGGER_ONESHOT, SOCK_NOTIFY_TRIGGER_PERSISTENT,
};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, PostQueuedCompletionStatus, OVERLAPPED_ENTRY,
};
use windows_sys::Win32::System::Threading::INFINITE;

use super::{Completion, Operation, Registration, Tag, Trigger};
use crate::event::EpollFlags;

pub(crate) struct NotificationGroup {
    port: HANDLE,
}

// The completion port handle may be used from any thread.
unsafe impl Send for NotificationGroup {}
unsafe impl Sync for NotificationGroup {}

impl fmt::Debug for NotificationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NotificationGroup")
            .field(&(self.port as *const c_void))
            .finish()
    }
}

impl NotificationGroup {
    pub(crate) fn new() -> io::Result<NotificationGroup> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, ptr::null_mut(), 0, 0) };
        if port.is_null() {
            return Err(io::Error::last_os_error());
        }
        log::trace!("new: port={:?}", port);
        Ok(NotificationGroup { port })
    }

    pub(crate) fn submit(&self, reg: &Registration) -> io::Result<()> {
        log::trace!("submit: port={:?}, registration={:?}", self.port, reg);

        let mut registration = SOCK_NOTIFY_REGISTRATION {
            socket: reg.socket as SOCKET,
            completionKey: encode(Tag::Registration(reg.key)) as *mut c_void,
            eventFilter: 0,
            operation: SOCK_NOTIFY_OP_REMOVE as u8,
            triggerFlags: 0,
            registrationResult: 0,
        };
        if reg.operation == Operation::Enable {
            registration.operation = SOCK_NOTIFY_OP_ENABLE as u8;
            registration.eventFilter = reg.filter.bits() as u16;
            let lifetime = if reg.oneshot {
                SOCK_NOTIFY_TRIGGER_ONESHOT
            } else {
                SOCK_NOTIFY_TRIGGER_PERSISTENT
            };
            let trigger = match reg.trigger {
                Trigger::Level => SOCK_NOTIFY_TRIGGER_LEVEL,
                Trigger::Edge => SOCK_NOTIFY_TRIGGER_EDGE,
            };
            registration.triggerFlags = (lifetime | trigger) as u8;
        }

        let code = unsafe {
            ProcessSocketNotifications(
                self.port,
                1,
                &mut registration,
                0,
                0,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        let code = if code == ERROR_SUCCESS {
            registration.registrationResult
        } else {
            code
        };

        match code {
            ERROR_SUCCESS => Ok(()),
            // Already consumed by a one-shot delivery or closed by the owner.
            ERROR_NOT_FOUND if reg.operation == Operation::Remove => Ok(()),
            code => Err(io::Error::from_raw_os_error(code as i32)),
        }
    }

    pub(crate) fn post(&self, completion: Completion) -> io::Result<()> {
        log::trace!("post: port={:?}, completion={:?}", self.port, completion);
        let res = unsafe {
            PostQueuedCompletionStatus(
                self.port,
                completion.events.bits(),
                encode(completion.tag),
                ptr::null(),
            )
        };
        if res == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Retrieves up to `max` completions into `out`, blocking until at least one arrives or the
    /// timeout expires.
    ///
    /// Returns the number of completions appended.
    pub(crate) fn retrieve(
        &self,
        out: &mut Vec<Completion>,
        max: usize,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        log::trace!(
            "retrieve: port={:?}, max={}, timeout={:?}",
            self.port,
            max,
            timeout
        );

        let mut entries: Vec<OVERLAPPED_ENTRY> = Vec::with_capacity(max);
        let mut received = 0u32;
        let code = unsafe {
            ProcessSocketNotifications(
                self.port,
                0,
                ptr::null_mut(),
                timeout_ms(timeout),
                max.try_into().unwrap_or(u32::MAX),
                entries.as_mut_ptr(),
                &mut received,
            )
        };

        match code {
            ERROR_SUCCESS => {}
            WAIT_TIMEOUT => return Ok(0),
            code => return Err(io::Error::from_raw_os_error(code as i32)),
        }

        // The first `received` entries were written by the call above.
        unsafe { entries.set_len(received as usize) };

        out.extend(entries.iter().map(|entry| {
            let bits = retrieve_events(entry);
            Completion {
                tag: decode(entry.lpCompletionKey),
                events: EpollFlags::from_bits_truncate(bits),
                removed: bits & SOCK_NOTIFY_EVENT_REMOVE as u32 != 0,
            }
        }));
        Ok(entries.len())
    }
}

impl Drop for NotificationGroup {
    fn drop(&mut self) {
        log::trace!("drop: port={:?}", self.port);
        unsafe {
            CloseHandle(self.port);
        }
    }
}

/// The `SOCK_NOTIFY_EVENT_*` bits of a notification travel in its byte count.
fn retrieve_events(entry: &OVERLAPPED_ENTRY) -> u32 {
    entry.dwNumberOfBytesTransferred
}

/// Completion keys: zero wakes a waiter, anything else is a registration.
fn encode(tag: Tag) -> usize {
    match tag {
        Tag::Wake => 0,
        Tag::Registration(key) => key,
    }
}

fn decode(key: usize) -> Tag {
    match key {
        0 => Tag::Wake,
        key => Tag::Registration(key),
    }
}

/// Converts a timeout into milliseconds, rounding up.
fn timeout_ms(timeout: Option<Duration>) -> u32 {
    match timeout {
        Some(timeout) => {
            let mut ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
            if Duration::from_millis(ms) < timeout {
                ms = ms.saturating_add(1);
            }
            // `INFINITE` is reserved for waits without a deadline.
            ms.min(u64::from(INFINITE - 1)) as u32
        }
        None => INFINITE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags() {
        assert_eq!(decode(encode(Tag::Wake)), Tag::Wake);
        assert_eq!(decode(encode(Tag::Registration(17))), Tag::Registration(17));
    }

    #[test]
    fn writable_notification() {
        use crate::event::Event;
        use crate::interest::Interest;
        use std::net::UdpSocket;
        use std::os::windows::io::AsRawSocket;

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let group = NotificationGroup::new().unwrap();

        let mut interest = Interest::new(&Event::new(EpollFlags::OUT | EpollFlags::ONESHOT, 0));
        interest.key = 42;
        group
            .submit(&Registration::enable(socket.as_raw_socket(), &interest))
            .unwrap();

        let mut out = Vec::new();
        let n = group
            .retrieve(&mut out, 4, Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].tag, Tag::Registration(42));
        assert!(out[0].events.contains(EpollFlags::OUT));
    }

    #[test]
    fn timeouts() {
        assert_eq!(timeout_ms(None), INFINITE);
        assert_eq!(timeout_ms(Some(Duration::from_millis(0))), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(1500))), 2);
    }
}
