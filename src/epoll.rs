//! The emulated epoll instance.
//!
//! An [`Epoll`] owns one notification group plus two tables: the descriptor registry and the
//! interest store. Registrations translate the caller's flags into native registrations tagged
//! with the descriptor; waits drain native completions and resolve them against the interest
//! store.
//!
//! Locking: the notification group sits behind a read-write lock so that teardown can release it
//! once every waiter has left, and the tables sit behind a mutex. When both are needed the group
//! is always locked first.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_lock::{Mutex, RwLock, RwLockReadGuard};

use crate::error::{Error, Result};
use crate::event::{EpollFlags, EpollOp, Event};
use crate::interest::{Interest, InterestStore};
use crate::registry::{Descriptor, RawSocket, Registry};
use crate::sys::{Completion, NotificationGroup, Registration, Tag};

/// Descriptors wrap around after this value unless configured otherwise.
pub const DEFAULT_MAX_DESCRIPTORS: i32 = 2_000_000;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Configures and creates an [`Epoll`].
///
/// # Examples
///
/// ```
/// use psn_epoll::Epoll;
///
/// let epoll = Epoll::builder().max_descriptors(1024).build()?;
/// # Ok::<(), psn_epoll::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct Builder {
    size_hint: usize,
    max_descriptors: i32,
}

impl Default for Builder {
    fn default() -> Builder {
        Builder {
            size_hint: 1,
            max_descriptors: DEFAULT_MAX_DESCRIPTORS,
        }
    }
}

impl Builder {
    /// Creates a builder with default settings.
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Sets the size hint.
    ///
    /// The hint must be nonzero and is otherwise ignored.
    pub fn size_hint(mut self, size_hint: usize) -> Builder {
        self.size_hint = size_hint;
        self
    }

    /// Sets the largest descriptor value handed out before allocation wraps around.
    ///
    /// This also bounds the number of sockets the instance can map at once.
    pub fn max_descriptors(mut self, max: i32) -> Builder {
        self.max_descriptors = max;
        self
    }

    /// Creates the instance and its notification group.
    pub fn build(self) -> Result<Epoll> {
        if self.size_hint == 0 {
            return Err(Error::InvalidArgument("size hint must be nonzero"));
        }
        if self.max_descriptors < 1 {
            return Err(Error::InvalidArgument("descriptor limit must be positive"));
        }

        let group = NotificationGroup::new().map_err(|err| {
            log::warn!("cannot create a notification group: {}", err);
            Error::ResourceExhausted("cannot create a notification group")
        })?;

        static ID_GENERATOR: AtomicUsize = AtomicUsize::new(1);
        let id = ID_GENERATOR.fetch_add(1, Ordering::Relaxed);
        log::trace!("new: epoll={}, group={:?}", id, group);

        Ok(Epoll {
            id,
            group: RwLock::new(Some(group)),
            tables: Mutex::new(Tables {
                registry: Registry::new(self.max_descriptors),
                interests: InterestStore::new(),
            }),
            state: AtomicU8::new(OPEN),
            waiters: AtomicUsize::new(0),
        })
    }
}

/// An epoll instance.
///
/// Sockets are first mapped to a [`Descriptor`] with [`Epoll::descriptor_for()`], then registered
/// with [`Epoll::add()`] (or [`Epoll::ctl()`]), and readiness is collected with
/// [`Epoll::wait()`]. All methods take `&self`; share the instance between threads with an
/// [`Arc`].
///
/// Event flags:
///
/// - Without [`EpollFlags::ET`] the registration is level-triggered.
/// - With [`EpollFlags::ONESHOT`] the registration is disarmed after one notification until it is
///   re-armed by [`Epoll::modify()`].
/// - An edge-triggered registration that includes [`EpollFlags::OUT`] always produces one
///   writable event on the next wait after it is armed, reported as `OUT | ET`.
pub struct Epoll {
    id: usize,

    /// Released on teardown once all waiters have returned.
    group: RwLock<Option<NotificationGroup>>,

    tables: Mutex<Tables>,

    /// One of `OPEN`, `CLOSING`, `CLOSED`.
    state: AtomicU8,

    /// Number of threads inside `wait()`.
    waiters: AtomicUsize,
}

struct Tables {
    registry: Registry,
    interests: InterestStore,
}

impl Tables {
    /// Translates completions into caller-visible events.
    ///
    /// A descriptor appears at most once per batch; further completions for it are merged into
    /// its entry. One-shot interests are disarmed by the first event they produce.
    fn dispatch(&mut self, completions: &[Completion], events: &mut [Event]) -> usize {
        let mut count = 0;

        for completion in completions {
            if completion.removed {
                continue;
            }
            let key = match completion.tag {
                Tag::Registration(key) => key,
                Tag::Wake => continue,
            };
            // The registration may have been deleted after the completion was queued.
            let (fd, interest) = match self.interests.resolve(key) {
                Some(found) => found,
                None => continue,
            };
            let reported = if completion.events.is_empty() {
                interest.events
            } else {
                completion.events
            };

            if let Some(ev) = events[..count].iter_mut().find(|ev| ev.fd == fd) {
                ev.events |= reported;
                continue;
            }
            if !interest.armed || count == events.len() {
                continue;
            }
            if interest.oneshot {
                interest.armed = false;
            }

            events[count] = Event {
                events: reported,
                data: interest.data,
                fd,
            };
            count += 1;
        }

        count
    }
}

impl Epoll {
    /// Creates an instance.
    ///
    /// `size_hint` must be nonzero and is otherwise ignored.
    pub fn new(size_hint: usize) -> Result<Epoll> {
        Builder::new().size_hint(size_hint).build()
    }

    /// Creates an instance with the default size hint. `flags` is ignored.
    pub fn create_default(flags: i32) -> Result<Epoll> {
        let _ = flags;
        Epoll::new(1)
    }

    /// Returns a [`Builder`].
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Returns the process-unique identifier of this instance.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns `true` once [`Epoll::close()`] or [`Epoll::wake()`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) != OPEN
    }

    /// Returns the descriptor for `socket`, allocating one on first use.
    ///
    /// Repeated calls with the same socket return the same descriptor until the descriptor is
    /// freed by [`Epoll::delete()`] or teardown.
    pub fn descriptor_for(&self, socket: RawSocket) -> Result<Descriptor> {
        let mut tables = self.tables.lock_blocking();
        self.ensure_open()?;
        let fd = tables.registry.descriptor_for(socket)?;
        log::trace!("descriptor_for: epoll={}, socket={:?}, fd={}", self.id, socket, fd);
        Ok(fd)
    }

    /// Returns the socket behind `fd`, or `None` if the descriptor is unknown.
    pub fn socket_for(&self, fd: Descriptor) -> Option<RawSocket> {
        self.tables.lock_blocking().registry.socket_for(fd)
    }

    /// Adds, modifies, or deletes the interest of `fd`.
    ///
    /// `event` is required for [`EpollOp::Add`] and [`EpollOp::Modify`] and ignored for
    /// [`EpollOp::Delete`].
    pub fn ctl(&self, op: EpollOp, fd: Descriptor, event: Option<&Event>) -> Result<()> {
        match (op, event) {
            (EpollOp::Add, Some(event)) => self.add(fd, *event),
            (EpollOp::Modify, Some(event)) => self.modify(fd, *event),
            (EpollOp::Delete, _) => self.delete(fd),
            (_, None) => {
                self.ensure_open()?;
                Err(Error::InvalidArgument("missing event"))
            }
        }
    }

    /// Registers interest in `event.events` on `fd`.
    pub fn add(&self, fd: Descriptor, event: Event) -> Result<()> {
        log::trace!("add: epoll={}, fd={}, events={:?}", self.id, fd, event.events);
        let group = self.group.read_blocking();
        let mut tables = self.tables.lock_blocking();
        let group = self.open_group(&group)?;

        let socket = tables
            .registry
            .socket_for(fd)
            .ok_or(Error::BadDescriptor(fd))?;
        let interest = tables.interests.insert(fd, Interest::new(&event))?;

        let registration = Registration::enable(socket, &interest);
        if let Err(err) = group.submit(&registration) {
            log::warn!("add: epoll={}, fd={}, rolled back: {}", self.id, fd, err);
            let _ = tables.interests.remove(fd);
            return Err(Error::InvalidRegistration(err));
        }
        if let Err(err) = prime_write(group, &registration) {
            log::warn!("add: epoll={}, fd={}, rolled back: {}", self.id, fd, err);
            let _ = group.submit(&Registration::remove(socket, interest.key));
            let _ = tables.interests.remove(fd);
            return Err(Error::InvalidRegistration(err));
        }
        Ok(())
    }

    /// Replaces the interest of `fd` and re-arms its registration.
    pub fn modify(&self, fd: Descriptor, event: Event) -> Result<()> {
        log::trace!("modify: epoll={}, fd={}, events={:?}", self.id, fd, event.events);
        let group = self.group.read_blocking();
        let mut tables = self.tables.lock_blocking();
        let group = self.open_group(&group)?;

        if !tables.interests.contains(fd) {
            return Err(Error::NotRegistered(fd));
        }
        let socket = tables
            .registry
            .socket_for(fd)
            .ok_or(Error::BadDescriptor(fd))?;
        let previous = tables.interests.replace(fd, Interest::new(&event))?;
        let interest = Interest {
            key: previous.key,
            ..Interest::new(&event)
        };

        let registration = Registration::enable(socket, &interest);
        if let Err(err) = group.submit(&registration) {
            log::warn!("modify: epoll={}, fd={}, rolled back: {}", self.id, fd, err);
            let _ = tables.interests.replace(fd, previous);
            return Err(Error::InvalidRegistration(err));
        }
        if let Err(err) = prime_write(group, &registration) {
            log::warn!("modify: epoll={}, fd={}, rolled back: {}", self.id, fd, err);
            let _ = group.submit(&Registration::enable(socket, &previous));
            let _ = tables.interests.replace(fd, previous);
            return Err(Error::InvalidRegistration(err));
        }
        Ok(())
    }

    /// Removes the interest of `fd` and frees the descriptor.
    ///
    /// Pending notifications for `fd` are dropped. Call [`Epoll::descriptor_for()`] again to
    /// register the socket anew.
    pub fn delete(&self, fd: Descriptor) -> Result<()> {
        log::trace!("delete: epoll={}, fd={}", self.id, fd);
        let group = self.group.read_blocking();
        let mut tables = self.tables.lock_blocking();
        let group = self.open_group(&group)?;

        if !tables.interests.contains(fd) {
            return Err(Error::NotRegistered(fd));
        }
        let socket = tables
            .registry
            .socket_for(fd)
            .ok_or(Error::BadDescriptor(fd))?;
        let interest = tables.interests.remove(fd)?;
        tables.registry.release(fd);

        group
            .submit(&Registration::remove(socket, interest.key))
            .map_err(Error::InvalidRegistration)
    }

    /// Waits for readiness and fills `events`.
    ///
    /// At most `events.len()` events are returned; the rest stay queued for the next call. A
    /// timeout of `None` waits forever. Returns the number of events written, which is zero on
    /// timeout and when the instance is closed before or during the wait.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use psn_epoll::{Epoll, EpollFlags, Event};
    /// use std::net::TcpStream;
    /// use std::os::unix::io::AsRawFd;
    /// use std::time::Duration;
    ///
    /// let epoll = Epoll::new(1)?;
    /// let stream = TcpStream::connect("127.0.0.1:8000")?;
    ///
    /// let fd = epoll.descriptor_for(stream.as_raw_fd())?;
    /// epoll.add(fd, Event::new(EpollFlags::IN, 7))?;
    ///
    /// let mut events = [Event::default(); 16];
    /// let n = epoll.wait(&mut events, Some(Duration::from_secs(1)))?;
    /// for ev in &events[..n] {
    ///     assert_eq!(ev.data, 7);
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn wait(&self, events: &mut [Event], timeout: Option<Duration>) -> Result<usize> {
        log::trace!(
            "wait: epoll={}, max={}, timeout={:?}",
            self.id,
            events.len(),
            timeout
        );

        // Registered before the state check so that teardown cannot miss this waiter.
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let group = self.group.read_blocking();
        let group = match (*group).as_ref() {
            Some(group) if !self.is_closed() => group,
            _ => {
                self.waiters.fetch_sub(1, Ordering::SeqCst);
                return Ok(0);
            }
        };
        if events.is_empty() {
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::InvalidArgument("no room for events"));
        }

        let mut completions = Vec::with_capacity(events.len());
        let retrieved = group.retrieve(&mut completions, events.len(), timeout);
        let others = self.waiters.fetch_sub(1, Ordering::SeqCst) - 1;

        if self.is_closed() {
            // Each wake-up releases one waiter; pass it on to the next one.
            if others > 0 {
                let _ = group.post(Completion::wake());
            }
            return Ok(0);
        }
        retrieved.map_err(Error::Io)?;

        let mut tables = self.tables.lock_blocking();
        if self.is_closed() {
            return Ok(0);
        }
        let count = tables.dispatch(&completions, events);
        log::trace!(
            "wait: epoll={}, completions={}, events={}",
            self.id,
            completions.len(),
            count
        );
        Ok(count)
    }

    /// Waits for readiness on the blocking thread pool.
    ///
    /// Same as [`Epoll::wait()`] with a buffer of `max_events` entries, returning the filled
    /// events.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures_lite::future;
    /// use psn_epoll::Epoll;
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let epoll = Arc::new(Epoll::new(1)?);
    /// let events = future::block_on(epoll.wait_async(8, Some(Duration::from_millis(10))))?;
    /// assert!(events.is_empty());
    /// # Ok::<(), psn_epoll::Error>(())
    /// ```
    pub fn wait_async(
        self: &Arc<Self>,
        max_events: usize,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<Event>>> + Send + 'static {
        let epoll = self.clone();
        blocking::unblock(move || {
            let mut events = vec![Event::default(); max_events];
            let count = epoll.wait(&mut events, timeout)?;
            events.truncate(count);
            Ok(events)
        })
    }

    /// Makes a pending [`Epoll::wait()`] return immediately and marks the instance as closing.
    ///
    /// Later waits return no events and registrations fail with [`Error::InvalidInstance`].
    pub fn wake(&self) -> Result<()> {
        log::trace!("wake: epoll={}", self.id);
        let _ = self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::SeqCst, Ordering::SeqCst);

        match (*self.group.read_blocking()).as_ref() {
            Some(group) => group.post(Completion::wake()).map_err(Error::Io),
            None => Ok(()),
        }
    }

    /// Closes the instance.
    ///
    /// Blocked waiters return with no events, all descriptors and interests are dropped, and the
    /// notification group is released. Calling this more than once has no effect.
    pub fn close(&self) {
        if self.state.swap(CLOSED, Ordering::SeqCst) == CLOSED {
            return;
        }
        log::debug!("close: epoll={}", self.id);

        if let Some(group) = (*self.group.read_blocking()).as_ref() {
            if let Err(err) = group.post(Completion::wake()) {
                log::warn!("close: epoll={}, cannot wake waiters: {}", self.id, err);
            }
        }

        {
            let mut tables = self.tables.lock_blocking();
            log::trace!(
                "close: epoll={}, dropping {} descriptors and {} interests",
                self.id,
                tables.registry.len(),
                tables.interests.len()
            );
            tables.registry.clear();
            tables.interests.clear();
        }

        // Waits until every waiter has let go of the group.
        self.group.write_blocking().take();
        log::trace!("close: epoll={}, released", self.id);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::InvalidInstance)
        } else {
            Ok(())
        }
    }

    fn open_group<'a>(
        &self,
        group: &'a RwLockReadGuard<'_, Option<NotificationGroup>>,
    ) -> Result<&'a NotificationGroup> {
        self.ensure_open()?;
        (**group).as_ref().ok_or(Error::InvalidInstance)
    }
}

impl fmt::Debug for Epoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::SeqCst) {
            OPEN => "open",
            CLOSING => "closing",
            _ => "closed",
        };
        f.debug_struct("Epoll")
            .field("id", &self.id)
            .field("state", &state)
            .finish()
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        self.close();
    }
}

/// Queues the writable notification an edge-triggered registration would otherwise miss.
fn prime_write(group: &NotificationGroup, registration: &Registration) -> std::io::Result<()> {
    if registration.primes_write() {
        group.post(Completion::ready(
            registration.key,
            EpollFlags::OUT | EpollFlags::ET,
        ))?;
    }
    Ok(())
}
