//! Registered interests, one per descriptor.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::event::{EpollFlags, Event};
use crate::registry::Descriptor;
use crate::sys::Trigger;

/// The last interest registered for a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    /// Requested conditions, without the trigger modifiers.
    pub(crate) events: EpollFlags,

    /// User payload, returned verbatim with every event.
    pub(crate) data: u64,

    pub(crate) trigger: Trigger,
    pub(crate) oneshot: bool,

    /// Cleared once a one-shot interest has been reported, set again on modify.
    pub(crate) armed: bool,

    /// Completion key of the native registration. Assigned by the store.
    pub(crate) key: usize,
}

impl Interest {
    pub(crate) fn new(event: &Event) -> Interest {
        Interest {
            events: event.events.base(),
            data: event.data,
            trigger: if event.events.is_edge() {
                Trigger::Edge
            } else {
                Trigger::Level
            },
            oneshot: event.events.is_oneshot(),
            armed: true,
            key: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct InterestStore {
    records: HashMap<Descriptor, Interest>,

    /// Completion key -> descriptor.
    keys: HashMap<usize, Descriptor>,

    /// Next completion key. Zero is reserved for wake-ups.
    next_key: usize,
}

impl Default for InterestStore {
    fn default() -> InterestStore {
        InterestStore {
            records: HashMap::new(),
            keys: HashMap::new(),
            next_key: 1,
        }
    }
}

impl InterestStore {
    pub(crate) fn new() -> InterestStore {
        InterestStore::default()
    }

    /// Stores a new interest under a fresh completion key and returns the stored record.
    pub(crate) fn insert(&mut self, fd: Descriptor, mut interest: Interest) -> Result<Interest> {
        if self.records.contains_key(&fd) {
            return Err(Error::AlreadyRegistered(fd));
        }
        interest.key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1).max(1);

        self.records.insert(fd, interest);
        self.keys.insert(interest.key, fd);
        Ok(interest)
    }

    /// Overwrites the interest of `fd`, returning the previous one.
    ///
    /// The completion key is kept and the new interest starts out armed.
    pub(crate) fn replace(&mut self, fd: Descriptor, mut interest: Interest) -> Result<Interest> {
        match self.records.get_mut(&fd) {
            Some(record) => {
                interest.key = record.key;
                Ok(std::mem::replace(record, interest))
            }
            None => Err(Error::NotRegistered(fd)),
        }
    }

    pub(crate) fn remove(&mut self, fd: Descriptor) -> Result<Interest> {
        let interest = self.records.remove(&fd).ok_or(Error::NotRegistered(fd))?;
        self.keys.remove(&interest.key);
        Ok(interest)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, fd: Descriptor) -> Option<&Interest> {
        self.records.get(&fd)
    }

    /// Finds the live registration behind a completion key.
    pub(crate) fn resolve(&mut self, key: usize) -> Option<(Descriptor, &mut Interest)> {
        let fd = *self.keys.get(&key)?;
        self.records.get_mut(&fd).map(|interest| (fd, interest))
    }

    pub(crate) fn contains(&self, fd: Descriptor) -> bool {
        self.records.contains_key(&fd)
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.keys.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
