//! Linux epoll semantics on top of completion-port socket notifications.
//!
//! An [`Epoll`] maps sockets to small integer [`Descriptor`]s, keeps one interest per
//! descriptor, and reports readiness as batches of [`Event`]s. Level-triggered, edge-triggered
//! and one-shot registrations are supported.
//!
//! On Windows every instance is backed by an I/O completion port fed by
//! `ProcessSocketNotifications`. On other platforms a `polling::Poller` with matching trigger
//! modes stands in for it, so the same code runs everywhere.
//!
//! The [`compat`] module offers the C-style interface with integer handles and error codes.
//!
//! # Examples
//!
//! Wait until a connected socket becomes readable:
//!
//! ```no_run
//! use psn_epoll::{Epoll, EpollFlags, Event};
//! use std::io::Write;
//! use std::net::{TcpListener, TcpStream};
//! # #[cfg(unix)]
//! use std::os::unix::io::AsRawFd;
//! # #[cfg(windows)]
//! # use std::os::windows::io::AsRawSocket as AsRawFd;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:0")?;
//!     let mut client = TcpStream::connect(listener.local_addr()?)?;
//!     let (server, _) = listener.accept()?;
//!
//!     let epoll = Epoll::new(1)?;
//!     # #[cfg(unix)]
//!     let fd = epoll.descriptor_for(server.as_raw_fd())?;
//!     # #[cfg(windows)]
//!     # let fd = epoll.descriptor_for(server.as_raw_socket())?;
//!     epoll.add(fd, Event::new(EpollFlags::IN, 1))?;
//!
//!     client.write_all(b"hello")?;
//!
//!     let mut events = [Event::default(); 8];
//!     let n = epoll.wait(&mut events, None)?;
//!     assert_eq!(events[..n][0].data, 1);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

mod epoll;
mod error;
mod event;
mod interest;
mod registry;
mod sys;

pub mod compat;

pub use crate::epoll::{Builder, Epoll, DEFAULT_MAX_DESCRIPTORS};
pub use crate::error::{Error, Result};
pub use crate::event::{EpollFlags, EpollOp, Event};
pub use crate::registry::{Descriptor, RawSocket};
