//! Software notification group on top of epoll/kqueue/event ports.
//!
//! Socket readiness comes from a [`Poller`] whose trigger modes match the native registration
//! flags. Posted completions wait in a channel and are handed out ahead of socket events; posting
//! interrupts a blocked `wait` through [`Poller::notify()`].

use std::io;
use std::num::NonZeroUsize;
use std::os::unix::io::BorrowedFd;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use async_io::Timer;
use async_lock::Mutex;
use futures_lite::future;
use polling::{Event, Events, PollMode, Poller};

use super::{Completion, Operation, Registration, Trigger};
use crate::event::EpollFlags;

#[derive(Debug)]
pub(crate) struct NotificationGroup {
    poller: Poller,

    /// Completions queued by `post()`.
    sender: Sender<Completion>,
    posted: Receiver<Completion>,

    /// Held while blocked in `Poller::wait()`.
    ///
    /// A poller lets only one thread wait at a time and returns immediately for the others, so
    /// concurrent waiters queue up here instead of spinning. Queued waiters still honor their
    /// own deadline.
    waiting: Mutex<()>,
}

impl NotificationGroup {
    pub(crate) fn new() -> io::Result<NotificationGroup> {
        let poller = Poller::new()?;
        let (sender, posted) = async_channel::unbounded();
        log::trace!("new: poller={:?}", poller);
        Ok(NotificationGroup {
            poller,
            sender,
            posted,
            waiting: Mutex::new(()),
        })
    }

    pub(crate) fn submit(&self, reg: &Registration) -> io::Result<()> {
        log::trace!("submit: registration={:?}", reg);

        // The socket stays open for as long as it is registered.
        let source = unsafe { BorrowedFd::borrow_raw(reg.socket) };

        match reg.operation {
            Operation::Enable => {
                let interest = Event::new(
                    reg.key,
                    reg.filter.contains(EpollFlags::IN),
                    reg.filter.contains(EpollFlags::OUT),
                );
                let mode = match (reg.trigger, reg.oneshot) {
                    (Trigger::Level, false) => PollMode::Level,
                    (Trigger::Level, true) => PollMode::Oneshot,
                    (Trigger::Edge, false) => PollMode::Edge,
                    (Trigger::Edge, true) => PollMode::EdgeOneshot,
                };

                match unsafe { self.poller.add_with_mode(reg.socket, interest, mode) } {
                    // Already registered: this is a re-arm.
                    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                        self.poller.modify_with_mode(source, interest, mode)
                    }
                    res => res,
                }
            }
            Operation::Remove => match self.poller.delete(source) {
                // The socket may be gone already.
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                res => res,
            },
        }
    }

    pub(crate) fn post(&self, completion: Completion) -> io::Result<()> {
        log::trace!("post: completion={:?}", completion);
        self.sender
            .try_send(completion)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "notification group is closed"))?;
        self.poller.notify()
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
        log::trace!("retrieve: max={}, timeout={:?}", max, timeout);
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let start = out.len();
        let limit = start + max;

        let _waiting = match deadline {
            None => self.waiting.lock_blocking(),
            Some(deadline) => {
                let acquired = async_io::block_on(future::or(
                    async { Some(self.waiting.lock().await) },
                    async {
                        Timer::at(deadline).await;
                        None
                    },
                ));
                match acquired {
                    Some(guard) => guard,
                    None => {
                        // Timed out behind another waiter; take what was posted meanwhile.
                        self.drain_posted(out, limit);
                        return Ok(out.len() - start);
                    }
                }
            }
        };

        loop {
            self.drain_posted(out, limit);

            if let Some(room) = NonZeroUsize::new(limit - out.len()) {
                // Posted completions are returned along with whatever is ready right now.
                let timeout = if out.len() > start {
                    Some(Duration::from_secs(0))
                } else {
                    deadline.map(|d| d.saturating_duration_since(Instant::now()))
                };

                let mut events = Events::with_capacity(room);
                match self.poller.wait(&mut events, timeout) {
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => return Err(err),
                }
                out.extend(
                    events
                        .iter()
                        .map(|ev| Completion::ready(ev.key, flags(&ev))),
                );

                // A `post()` may have been what woke us up.
                self.drain_posted(out, limit);
            }

            let received = out.len() - start;
            if received > 0 {
                return Ok(received);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(0);
                }
            }
        }
    }

    fn drain_posted(&self, out: &mut Vec<Completion>, limit: usize) {
        while out.len() < limit {
            match self.posted.try_recv() {
                Ok(completion) => out.push(completion),
                Err(_) => break,
            }
        }
    }
}

impl Drop for NotificationGroup {
    fn drop(&mut self) {
        log::trace!("drop: poller={:?}", self.poller);
        self.sender.close();
    }
}

/// Converts a readiness event into native-layout flags.
fn flags(ev: &Event) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if ev.readable {
        flags |= EpollFlags::IN;
    }
    if ev.writable {
        flags |= EpollFlags::OUT;
    }
    if ev.is_interrupt() {
        flags |= EpollFlags::HUP;
    }
    if ev.is_err() == Some(true) {
        flags |= EpollFlags::ERR;
    }
    flags
}
